//! # Error Types for the Slab-Backed Red-Black Tree
//!
//! There is exactly one failure a caller has to handle: the underlying
//! [`SlabSource`](crate::source::SlabSource) refusing to hand out memory for a
//! new slab. Everything else is either a normal outcome or a broken contract.
//!
//! ## Error Handling Strategy
//!
//! ```text
//! SlabTree::with_options ──► first slab ──► Err(OutOfMemory) ──► no tree is built
//!
//! SlabTree::create_node ──► free list hit ──────────────────────► Ok(node)
//!                      └──► fresh slot ──► slab full?
//!                                              │ yes
//!                                              ▼
//!                                     allocate next slab ──► Err(OutOfMemory)
//! ```
//!
//! - **Not found** is not an error. Every search and neighbor query returns
//!   `Option<NodeId>`, and `None` is an ordinary answer.
//! - **Contract violations** (a `NodeId` that this tree never handed out,
//!   releasing a slot twice, re-inserting a linked node) panic. They mean the
//!   caller or this crate has a bug, not that the system is short on memory.
//! - Allocation failures are never retried internally and never leave a
//!   half-built slab behind.

use thiserror::Error;

/// Errors that can occur while obtaining node storage.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
	/// The slab source refused a request for `requested` bytes.
	///
	/// Returned by tree construction (the first slab) and by node creation
	/// when the free list is empty and the current slab is exhausted. The
	/// tree is left exactly as it was before the call.
	#[error("no storage available: slab source refused {requested} bytes")]
	OutOfMemory {
		/// Size in bytes of the slab that could not be allocated.
		requested: usize,
	},
}

/// A Result type alias using our custom Error type.
pub type Result<T> = std::result::Result<T, Error>;
