//! Raw memory sources for node slabs.
//!
//! The slab allocator never talks to the global allocator directly. Every slab
//! is requested from a [`SlabSource`], which lets callers plug in their own
//! memory (a bounded pool, an instrumented allocator, a region owned by a
//! larger structure) without the tree knowing.
//!
//! # Usage
//!
//! Most users never name a source; [`SystemSource`] is the default. Tests and
//! capacity-limited embeddings use [`CountingSource`] by mutable reference so
//! the counters stay readable after the tree is gone:
//!
//! ```
//! use slabtree::source::CountingSource;
//! use slabtree::{Options, SlabTree};
//!
//! let mut source = CountingSource::new();
//! {
//!     let mut tree = SlabTree::with_options(8, Options::new().with_source(&mut source)).unwrap();
//!     let node = tree.create_node().unwrap();
//!     tree.insert(node);
//! }
//!
//! source.check_no_leaks();
//! ```

use std::alloc::{self, Layout};
use std::ptr::NonNull;

/// A capability that hands out and takes back raw blocks of memory.
///
/// # Safety contract
///
/// `allocate` must return either `None` or a pointer to a block valid for
/// reads and writes of `layout.size()` bytes, aligned to `layout.align()`,
/// that stays valid until it is passed back to `release` with the same layout.
pub trait SlabSource {
	/// Requests a block for `layout`. Returns `None` when the source is exhausted.
	fn allocate(&mut self, layout: Layout) -> Option<NonNull<u8>>;

	/// Returns a block obtained from [`allocate`](SlabSource::allocate).
	///
	/// # Safety
	///
	/// `ptr` must come from a previous `allocate` call on this source with the
	/// same `layout`, and must not be used after this call.
	unsafe fn release(&mut self, ptr: NonNull<u8>, layout: Layout);
}

impl<T: SlabSource + ?Sized> SlabSource for &mut T {
	fn allocate(&mut self, layout: Layout) -> Option<NonNull<u8>> {
		(**self).allocate(layout)
	}

	unsafe fn release(&mut self, ptr: NonNull<u8>, layout: Layout) {
		(**self).release(ptr, layout)
	}
}

/// The global allocator.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemSource;

impl SlabSource for SystemSource {
	fn allocate(&mut self, layout: Layout) -> Option<NonNull<u8>> {
		if layout.size() == 0 {
			return None;
		}
		// SAFETY: layout has a non-zero size.
		NonNull::new(unsafe { alloc::alloc(layout) })
	}

	unsafe fn release(&mut self, ptr: NonNull<u8>, layout: Layout) {
		alloc::dealloc(ptr.as_ptr(), layout)
	}
}

/// A source that tracks allocation counts and bytes, with an optional budget.
///
/// This wraps [`SystemSource`] and updates its counters on every request.
/// When a budget is set, any request that would push the outstanding bytes
/// above it is refused, which is how exhaustion is simulated in tests.
#[derive(Debug, Default)]
pub struct CountingSource {
	inner: SystemSource,
	budget: Option<usize>,
	alloc_count: usize,
	release_count: usize,
	refused_count: usize,
	bytes_allocated: usize,
	peak_bytes: usize,
}

/// Allocation statistics snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceStats {
	/// Total number of successful allocations.
	pub alloc_count: usize,
	/// Total number of releases.
	pub release_count: usize,
	/// Number of requests refused because of the budget.
	pub refused_count: usize,
	/// Bytes currently handed out.
	pub bytes_allocated: usize,
	/// Peak of `bytes_allocated`.
	pub peak_bytes: usize,
}

impl CountingSource {
	/// Creates an unbounded counting source.
	pub fn new() -> Self {
		Self::default()
	}

	/// Creates a counting source that refuses to hold more than `budget` bytes at once.
	pub fn with_budget(budget: usize) -> Self {
		CountingSource {
			budget: Some(budget),
			..Self::default()
		}
	}

	/// Returns the current allocation statistics.
	pub fn stats(&self) -> SourceStats {
		SourceStats {
			alloc_count: self.alloc_count,
			release_count: self.release_count,
			refused_count: self.refused_count,
			bytes_allocated: self.bytes_allocated,
			peak_bytes: self.peak_bytes,
		}
	}

	/// Checks that every block handed out has been released.
	///
	/// # Panics
	///
	/// Panics if there are unmatched allocations or bytes still allocated.
	pub fn check_no_leaks(&self) {
		let stats = self.stats();

		if stats.alloc_count != stats.release_count {
			panic!(
				"Memory leak detected!\n\
				 Allocations: {}\n\
				 Releases: {}\n\
				 Bytes still allocated: {}",
				stats.alloc_count, stats.release_count, stats.bytes_allocated
			);
		}

		if stats.bytes_allocated != 0 {
			panic!(
				"Memory leak detected!\n\
				 Bytes still allocated: {}\n\
				 (alloc_count == release_count but bytes != 0, possible layout mismatch)",
				stats.bytes_allocated
			);
		}
	}
}

impl SlabSource for CountingSource {
	fn allocate(&mut self, layout: Layout) -> Option<NonNull<u8>> {
		let size = layout.size();
		if let Some(budget) = self.budget {
			if self.bytes_allocated.saturating_add(size) > budget {
				self.refused_count += 1;
				return None;
			}
		}

		let ptr = self.inner.allocate(layout)?;
		self.alloc_count += 1;
		self.bytes_allocated += size;
		self.peak_bytes = self.peak_bytes.max(self.bytes_allocated);
		Some(ptr)
	}

	unsafe fn release(&mut self, ptr: NonNull<u8>, layout: Layout) {
		self.release_count += 1;
		self.bytes_allocated -= layout.size();
		self.inner.release(ptr, layout)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn counting_source_tracks_balance() {
		let mut source = CountingSource::new();
		let layout = Layout::from_size_align(256, 16).unwrap();

		let a = source.allocate(layout).unwrap();
		let b = source.allocate(layout).unwrap();

		let stats = source.stats();
		assert_eq!(stats.alloc_count, 2);
		assert_eq!(stats.bytes_allocated, 512);
		assert_eq!(stats.peak_bytes, 512);

		unsafe {
			source.release(a, layout);
			source.release(b, layout);
		}

		let stats = source.stats();
		assert_eq!(stats.release_count, 2);
		assert_eq!(stats.peak_bytes, 512);
		source.check_no_leaks();
	}

	#[test]
	fn budget_refuses_oversized_requests() {
		let mut source = CountingSource::with_budget(300);
		let layout = Layout::from_size_align(256, 16).unwrap();

		let a = source.allocate(layout).unwrap();
		assert!(source.allocate(layout).is_none());
		assert_eq!(source.stats().refused_count, 1);

		unsafe { source.release(a, layout) };
		let b = source.allocate(layout).unwrap();
		unsafe { source.release(b, layout) };
		source.check_no_leaks();
	}

	#[test]
	#[should_panic(expected = "Memory leak detected")]
	fn check_no_leaks_catches_outstanding_blocks() {
		let mut source = CountingSource::new();
		let layout = Layout::from_size_align(64, 16).unwrap();
		let _leaked = source.allocate(layout).unwrap();
		source.check_no_leaks();
	}

	#[test]
	fn system_source_refuses_zero_sized_layouts() {
		let layout = Layout::from_size_align(0, 16).unwrap();
		assert!(SystemSource.allocate(layout).is_none());
	}
}
