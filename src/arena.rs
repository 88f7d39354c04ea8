//! # Node Slab Allocator
//!
//! Supplies fixed-size node slots in O(1) amortized time and takes them back
//! without returning memory to the [`SlabSource`] until the whole allocator is
//! destroyed.
//!
//! ## Layout
//!
//! Slabs are requested from the source oldest first. Slab `k` holds
//! `initial_capacity << k` slots, so slot numbers are global and dense:
//!
//! ```text
//! initial_capacity = 4
//!
//! slab 0: [ 0  1  2  3 ]
//! slab 1: [ 4  5  6  7  8  9 10 11 ]
//! slab 2: [12 13 ... 27 ]
//!
//! slab(i) = ilog2(i / initial_capacity + 1)
//! base(k) = initial_capacity * (2^k - 1)
//! ```
//!
//! A cursor marks the next never-used slot and `remaining` counts how many
//! untouched slots the newest slab still has. A new slab is only requested
//! when a fresh slot is needed and `remaining` is zero.
//!
//! ## Free list
//!
//! Released slots are rewritten as [`Slot::Free`] and pushed on a LIFO list
//! threaded through the slots themselves. `create_node` always pops the free
//! list before touching the cursor.

use std::alloc::Layout;
use std::ptr::{self, NonNull};

use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::node::{round_up, Links, NodeId, Ownership, Slot, OBJECT_OFFSET, SLOT_ALIGN};
use crate::rbtree::NodeStore;
use crate::source::{SlabSource, SystemSource};

/// One contiguous block of node slots.
#[derive(Debug)]
struct Slab {
	ptr: NonNull<u8>,
	layout: Layout,
	capacity: usize,
}

/// Snapshot of allocator occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ArenaStats {
	/// Number of slabs currently held.
	pub slabs: usize,
	/// Total slots across all slabs.
	pub capacity: usize,
	/// Slots handed out and not yet released.
	pub in_use: usize,
	/// Slots waiting on the free list.
	pub free: usize,
	/// Slots never handed out in the newest slab.
	pub untouched: usize,
	/// Bytes obtained from the slab source.
	pub bytes: usize,
}

/// Slab-backed node allocator.
#[derive(Debug)]
pub struct SlabAllocator<S: SlabSource = SystemSource> {
	source: S,
	slabs: Vec<Slab>,
	payload_size: usize,
	object_size: usize,
	initial_capacity: usize,
	/// Global index of the next never-used slot.
	cursor: usize,
	/// Never-used slots left in the newest slab.
	remaining: usize,
	free_head: Option<NodeId>,
	free_len: usize,
	in_use: usize,
}

impl<S: SlabSource> SlabAllocator<S> {
	/// Creates an allocator for nodes carrying `payload_size` bytes and
	/// allocates its first slab of `initial_capacity` slots.
	///
	/// # Panics
	///
	/// Panics if `initial_capacity` is zero.
	pub fn new(payload_size: usize, initial_capacity: usize, source: S) -> Result<Self> {
		assert!(initial_capacity > 0, "initial slab capacity must be non-zero");

		let mut arena = SlabAllocator {
			source,
			slabs: Vec::new(),
			payload_size,
			object_size: round_up(OBJECT_OFFSET + payload_size, SLOT_ALIGN),
			initial_capacity,
			cursor: 0,
			remaining: 0,
			free_head: None,
			free_len: 0,
			in_use: 0,
		};
		arena.grow()?;

		debug!(
			payload_size,
			object_size = arena.object_size,
			initial_capacity,
			"slab allocator initialized"
		);
		Ok(arena)
	}

	/// Payload bytes per node, as requested.
	pub fn payload_size(&self) -> usize {
		self.payload_size
	}

	/// Slot stride: header plus payload, rounded up to [`SLOT_ALIGN`].
	pub fn object_size(&self) -> usize {
		self.object_size
	}

	pub fn source(&self) -> &S {
		&self.source
	}

	pub fn stats(&self) -> ArenaStats {
		ArenaStats {
			slabs: self.slabs.len(),
			capacity: self.slabs.iter().map(|slab| slab.capacity).sum(),
			in_use: self.in_use,
			free: self.free_len,
			untouched: self.remaining,
			bytes: self.slabs.iter().map(|slab| slab.layout.size()).sum(),
		}
	}

	/// Hands out a detached node with a zeroed payload.
	///
	/// Recycled slots are preferred over fresh ones. Fails only when a fresh
	/// slot is needed and the source refuses the next slab.
	pub fn create_node(&mut self, owner: Ownership) -> Result<NodeId> {
		let id = match self.free_head {
			Some(id) => {
				let next = match self.slot(id) {
					Slot::Free {
						next,
					} => *next,
					Slot::Live {
						..
					} => panic!("free list head {:?} is a live node", id),
				};
				self.free_head = next;
				self.free_len -= 1;
				trace!(node = ?id, "node recycled");
				id
			}
			None => {
				if self.remaining == 0 {
					self.grow()?;
				}
				let id = NodeId(self.cursor as u32);
				self.cursor += 1;
				self.remaining -= 1;
				trace!(node = ?id, remaining = self.remaining, "node taken from slab");
				id
			}
		};

		let base = self.slot_ptr(id);
		// SAFETY: `base` points at a slot of `object_size` bytes inside one of
		// our slabs, aligned to SLOT_ALIGN, and we hold `&mut self`.
		unsafe {
			ptr::write(
				base as *mut Slot,
				Slot::Live {
					links: Links::detached(),
					owner,
				},
			);
			ptr::write_bytes(base.add(OBJECT_OFFSET), 0, self.payload_size);
		}
		self.in_use += 1;
		Ok(id)
	}

	/// Takes back a node that has left the tree.
	///
	/// Arena-owned nodes go on the free list. Caller-owned nodes are left
	/// untouched; their owner disposes of them with [`dispose`](Self::dispose).
	pub fn release_node(&mut self, id: NodeId) {
		match self.owner(id) {
			Ownership::Arena => self.recycle(id),
			Ownership::Caller => {}
		}
	}

	/// Puts any live node on the free list, regardless of its owner.
	pub fn dispose(&mut self, id: NodeId) {
		self.assert_live(id);
		self.recycle(id);
	}

	fn recycle(&mut self, id: NodeId) {
		let base = self.slot_ptr(id);
		// SAFETY: callers validated the slot, and `&mut self` is held.
		unsafe {
			ptr::write(
				base as *mut Slot,
				Slot::Free {
					next: self.free_head,
				},
			);
		}
		self.free_head = Some(id);
		self.free_len += 1;
		self.in_use -= 1;
	}

	/// Returns every slab to the source.
	///
	/// Safe to call any number of times. All outstanding `NodeId`s become
	/// invalid. A later `create_node` starts over from the initial capacity.
	pub fn destroy(&mut self) {
		if self.slabs.is_empty() {
			return;
		}

		let slabs = self.slabs.len();
		for slab in self.slabs.drain(..) {
			// SAFETY: every slab was obtained from this source with this layout.
			unsafe { self.source.release(slab.ptr, slab.layout) };
		}
		self.cursor = 0;
		self.remaining = 0;
		self.free_head = None;
		self.free_len = 0;
		self.in_use = 0;

		debug!(slabs, "slab allocator destroyed");
	}

	pub fn owner(&self, id: NodeId) -> Ownership {
		match self.slot(id) {
			Slot::Live {
				owner,
				..
			} => *owner,
			Slot::Free {
				..
			} => panic!("{:?} is not a live node", id),
		}
	}

	fn assert_live(&self, id: NodeId) {
		if let Slot::Free {
			..
		} = self.slot(id)
		{
			panic!("{:?} is not a live node", id);
		}
	}

	pub fn is_live(&self, id: NodeId) -> bool {
		id.index() < self.cursor
			&& matches!(
				self.slot(id),
				Slot::Live {
					..
				}
			)
	}

	pub fn payload(&self, id: NodeId) -> &[u8] {
		self.assert_live(id);
		let base = self.slot_ptr(id);
		// SAFETY: the payload of a live slot was zeroed in `create_node` and
		// lies entirely within the slot.
		unsafe { std::slice::from_raw_parts(base.add(OBJECT_OFFSET), self.payload_size) }
	}

	pub fn payload_mut(&mut self, id: NodeId) -> &mut [u8] {
		self.assert_live(id);
		let base = self.slot_ptr(id);
		// SAFETY: as in `payload`, with exclusive access through `&mut self`.
		unsafe { std::slice::from_raw_parts_mut(base.add(OBJECT_OFFSET), self.payload_size) }
	}

	/// Requests the next slab, twice the size of the previous one.
	fn grow(&mut self) -> Result<()> {
		let capacity = match self.slabs.last() {
			Some(last) => last.capacity * 2,
			None => self.initial_capacity,
		};

		let requested = capacity.saturating_mul(self.object_size);
		let out_of_memory = Error::OutOfMemory {
			requested,
		};

		// Slot numbers must stay clear of the sentinel id.
		if self.cursor + capacity > NodeId::SENTINEL.index() {
			warn!(cursor = self.cursor, capacity, "node id space exhausted");
			return Err(out_of_memory);
		}

		let layout = capacity
			.checked_mul(self.object_size)
			.and_then(|size| Layout::from_size_align(size, SLOT_ALIGN).ok())
			.ok_or(out_of_memory)?;

		let Some(ptr) = self.source.allocate(layout) else {
			warn!(bytes = requested, slabs = self.slabs.len(), "slab source refused allocation");
			return Err(out_of_memory);
		};

		self.slabs.push(Slab {
			ptr,
			layout,
			capacity,
		});
		self.remaining = capacity;

		debug!(slab = self.slabs.len() - 1, capacity, bytes = requested, "added new slab");
		Ok(())
	}

	/// Locates the slot for `id`.
	///
	/// # Panics
	///
	/// Panics if `id` was never handed out by this allocator.
	fn slot_ptr(&self, id: NodeId) -> *mut u8 {
		let index = id.index();
		assert!(index < self.cursor, "{:?} does not belong to this allocator", id);

		let (slab, local) = locate(index, self.initial_capacity);
		let slab = &self.slabs[slab];
		debug_assert!(local < slab.capacity);
		// SAFETY: local < capacity, so the offset stays inside the slab.
		unsafe { slab.ptr.as_ptr().add(local * self.object_size) }
	}

	fn slot(&self, id: NodeId) -> &Slot {
		// SAFETY: every slot below the cursor was initialized by `create_node`
		// and is only ever overwritten with another valid `Slot`.
		unsafe { &*(self.slot_ptr(id) as *const Slot) }
	}

	fn slot_mut(&mut self, id: NodeId) -> &mut Slot {
		// SAFETY: as in `slot`, with exclusive access through `&mut self`.
		unsafe { &mut *(self.slot_ptr(id) as *mut Slot) }
	}
}

/// Maps a global slot index to `(slab, slot within slab)`.
#[inline]
fn locate(index: usize, initial_capacity: usize) -> (usize, usize) {
	let slab = (index / initial_capacity + 1).ilog2() as usize;
	let base = initial_capacity * ((1usize << slab) - 1);
	(slab, index - base)
}

impl<S: SlabSource> NodeStore for SlabAllocator<S> {
	fn links(&self, id: NodeId) -> &Links {
		match self.slot(id) {
			Slot::Live {
				links,
				..
			} => links,
			Slot::Free {
				..
			} => panic!("{:?} is not a live node", id),
		}
	}

	fn links_mut(&mut self, id: NodeId) -> &mut Links {
		match self.slot_mut(id) {
			Slot::Live {
				links,
				..
			} => links,
			Slot::Free {
				..
			} => panic!("{:?} is not a live node", id),
		}
	}
}

impl<S: SlabSource> Drop for SlabAllocator<S> {
	fn drop(&mut self) {
		self.destroy();
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::source::CountingSource;

	fn arena(initial: usize) -> SlabAllocator {
		SlabAllocator::new(16, initial, SystemSource).unwrap()
	}

	#[test]
	fn locate_follows_doubling_slabs() {
		assert_eq!(locate(0, 4), (0, 0));
		assert_eq!(locate(3, 4), (0, 3));
		assert_eq!(locate(4, 4), (1, 0));
		assert_eq!(locate(11, 4), (1, 7));
		assert_eq!(locate(12, 4), (2, 0));
		assert_eq!(locate(27, 4), (2, 15));
		assert_eq!(locate(28, 4), (3, 0));

		// Capacities that are not powers of two work the same way.
		assert_eq!(locate(2, 3), (0, 2));
		assert_eq!(locate(3, 3), (1, 0));
		assert_eq!(locate(8, 3), (1, 5));
		assert_eq!(locate(9, 3), (2, 0));
	}

	#[test]
	fn object_size_is_rounded() {
		let a = SlabAllocator::new(8, 4, SystemSource).unwrap();
		assert_eq!(a.object_size(), round_up(OBJECT_OFFSET + 8, 16));
		assert_eq!(a.object_size() % 16, 0);

		let b = SlabAllocator::new(0, 4, SystemSource).unwrap();
		assert_eq!(b.object_size(), OBJECT_OFFSET);
	}

	#[test]
	fn slabs_double_when_exhausted() {
		let mut a = arena(4);
		assert_eq!(a.stats().slabs, 1);

		for _ in 0..4 {
			a.create_node(Ownership::Arena).unwrap();
		}
		assert_eq!(a.stats().slabs, 1);
		assert_eq!(a.stats().untouched, 0);

		a.create_node(Ownership::Arena).unwrap();
		let stats = a.stats();
		assert_eq!(stats.slabs, 2);
		assert_eq!(stats.capacity, 12);
		assert_eq!(stats.untouched, 7);
		assert_eq!(stats.in_use, 5);
	}

	#[test]
	fn free_list_is_lifo() {
		let mut a = arena(4);
		let n: Vec<NodeId> = (0..3).map(|_| a.create_node(Ownership::Arena).unwrap()).collect();

		a.release_node(n[0]);
		a.release_node(n[2]);
		assert_eq!(a.stats().free, 2);

		assert_eq!(a.create_node(Ownership::Arena).unwrap(), n[2]);
		assert_eq!(a.create_node(Ownership::Arena).unwrap(), n[0]);
		assert_eq!(a.stats().free, 0);
		assert_eq!(a.stats().in_use, 3);
	}

	#[test]
	fn recycled_payload_is_zeroed() {
		let mut a = arena(4);
		let n = a.create_node(Ownership::Arena).unwrap();
		a.payload_mut(n).copy_from_slice(&[0xab; 16]);
		a.links_mut(n).key = 99;
		a.release_node(n);

		let m = a.create_node(Ownership::Arena).unwrap();
		assert_eq!(m, n);
		assert_eq!(a.payload(m), &[0u8; 16]);
		assert_eq!(*a.links(m), Links::detached());
	}

	#[test]
	fn caller_owned_nodes_are_not_recycled() {
		let mut a = arena(4);
		let n = a.create_node(Ownership::Caller).unwrap();
		a.release_node(n);

		assert!(a.is_live(n));
		assert_eq!(a.stats().free, 0);

		a.dispose(n);
		assert!(!a.is_live(n));
		assert_eq!(a.create_node(Ownership::Arena).unwrap(), n);
	}

	#[test]
	#[should_panic(expected = "is not a live node")]
	fn double_release_panics() {
		let mut a = arena(4);
		let n = a.create_node(Ownership::Arena).unwrap();
		a.release_node(n);
		a.release_node(n);
	}

	#[test]
	#[should_panic(expected = "does not belong to this allocator")]
	fn foreign_id_panics() {
		let a = arena(4);
		let _ = a.payload(NodeId(100));
	}

	#[test]
	fn destroy_is_idempotent_and_restartable() {
		let mut source = CountingSource::new();
		{
			let mut a = SlabAllocator::new(8, 2, &mut source).unwrap();
			for _ in 0..5 {
				a.create_node(Ownership::Arena).unwrap();
			}
			assert_eq!(a.stats().slabs, 2);

			a.destroy();
			a.destroy();
			assert_eq!(a.stats(), ArenaStats::default());

			let n = a.create_node(Ownership::Arena).unwrap();
			assert_eq!(n, NodeId(0));
			assert_eq!(a.stats().capacity, 2);
		}
		source.check_no_leaks();
		assert_eq!(source.stats().alloc_count, 3);
	}

	#[test]
	fn exhaustion_at_init_builds_nothing() {
		let mut source = CountingSource::with_budget(16);
		let err = SlabAllocator::new(8, 64, &mut source).unwrap_err();

		assert!(matches!(err, Error::OutOfMemory { .. }));
		assert_eq!(source.stats().alloc_count, 0);
		assert_eq!(source.stats().refused_count, 1);
	}

	#[test]
	fn exhaustion_on_growth_keeps_state() {
		let object_size = round_up(OBJECT_OFFSET + 8, 16);
		let mut source = CountingSource::with_budget(object_size * 2);
		{
			let mut a = SlabAllocator::new(8, 2, &mut source).unwrap();
			let first = a.create_node(Ownership::Arena).unwrap();
			a.create_node(Ownership::Arena).unwrap();

			let err = a.create_node(Ownership::Arena).unwrap_err();
			assert_eq!(err, Error::OutOfMemory {
				requested: object_size * 4,
			});
			assert_eq!(a.stats().in_use, 2);

			// Recycling still works without new memory.
			a.release_node(first);
			assert_eq!(a.create_node(Ownership::Arena).unwrap(), first);
		}
		source.check_no_leaks();
	}
}
