//! # slabtree: A Slab-Backed Red-Black Ordered Index
//!
//! This crate provides an in-process ordered index keyed by `i64`: a
//! red-black tree whose nodes live in slabs handed out by a custom allocator,
//! so inserting and removing nodes never calls the global allocator per node.
//! It is meant to sit inside larger structures (timer wheels, interval
//! indexes, schedulers) that need O(log n) insert, delete and search plus
//! ordered neighbor queries with predictable memory behavior.
//!
//! ## Design Overview
//!
//! The crate is three layers, leaves first:
//!
//! - [`SlabAllocator`](arena::SlabAllocator) owns raw memory. It hands out
//!   fixed-size node slots, recycles freed ones through a LIFO free list, and
//!   grows by requesting slabs twice the size of the previous one from a
//!   [`SlabSource`].
//! - [`RbTree`](rbtree::RbTree) is the balancing algorithm. It works on
//!   [`NodeId`] handles only and reads links through the
//!   [`NodeStore`](rbtree::NodeStore) seam; it knows nothing about payloads
//!   or memory.
//! - [`SlabTree`] composes one of each and is what callers use.
//!
//! ### Node Structure
//!
//! ```text
//!   NodeId ──► slot in slab k
//!              ┌──────────────────────────────┬──────────────────┐
//!              │ header: key, color, left,    │ payload bytes    │
//!              │ right, parent, owner         │ (caller-defined) │
//!              └──────────────────────────────┴──────────────────┘
//!              0                        OBJECT_OFFSET
//! ```
//!
//! The tree never interprets payload bytes. Payloads of new nodes are zeroed.
//!
//! ### Data Flow
//!
//! ```text
//! create_node ──► SlabAllocator ──► NodeId (detached)
//!                                        │ caller sets key + payload
//!                                        ▼
//! insert ───────────────────────► RbTree links it
//!
//! remove ───────────────────────► RbTree unlinks it
//!                                        │
//!                                        ▼
//!                               SlabAllocator recycles it (arena-owned only)
//! ```
//!
//! ## Basic Usage
//!
//! ```
//! use slabtree::SlabTree;
//!
//! // Every node carries 8 payload bytes.
//! let mut tree = SlabTree::new(8).unwrap();
//!
//! let node = tree.create_node().unwrap();
//! tree.set_key(node, 42);
//! tree.payload_mut(node).copy_from_slice(&7u64.to_le_bytes());
//! tree.insert(node);
//!
//! assert_eq!(tree.search_key(42), Some(node));
//! assert_eq!(tree.search_key_right(40), Some(node));
//! assert_eq!(tree.search_key_left(40), None);
//!
//! tree.remove(node);
//! assert_eq!(tree.search_key(42), None);
//! ```
//!
//! ## Duplicate Keys
//!
//! Several nodes may share a key. Exact searches return the leftmost node of
//! the duplicate chain found by the descent; see [`rbtree`] for the rule.
//!
//! ## Thread Safety
//!
//! None. A `SlabTree` is plain single-owner state; every operation runs to
//! completion without locking, and callers serialize access themselves.

pub mod arena;
pub mod error;
pub mod iter;
pub mod node;
pub mod rbtree;
pub mod source;
#[cfg(any(test, feature = "test-utils"))]
pub mod util;

pub use arena::ArenaStats;
pub use error::{Error, Result};
pub use node::{Color, NodeId, Ownership, OBJECT_OFFSET, SLOT_ALIGN};
pub use source::{CountingSource, SlabSource, SystemSource};

use arena::SlabAllocator;
use iter::Iter;
use node::Links;
use rbtree::{NodeStore, RbTree};

// ---------------------------------------------------------------------------
// Configuration Constants
// ---------------------------------------------------------------------------

/// Number of node slots in the first slab.
/// Every further slab doubles the previous capacity.
pub const DEFAULT_INITIAL_CAPACITY: usize = 64;

/// Construction options for a [`SlabTree`].
#[derive(Debug, Clone)]
pub struct Options<S = SystemSource> {
	initial_capacity: usize,
	source: S,
}

impl Options<SystemSource> {
	/// Options with the default capacity and the global allocator.
	pub fn new() -> Self {
		Options {
			initial_capacity: DEFAULT_INITIAL_CAPACITY,
			source: SystemSource,
		}
	}
}

impl Default for Options<SystemSource> {
	fn default() -> Self {
		Self::new()
	}
}

impl<S> Options<S> {
	/// Sets the number of slots in the first slab. Must be non-zero.
	pub fn with_initial_capacity(mut self, initial_capacity: usize) -> Self {
		self.initial_capacity = initial_capacity;
		self
	}

	/// Draws slabs from `source` instead.
	pub fn with_source<T: SlabSource>(self, source: T) -> Options<T> {
		Options {
			initial_capacity: self.initial_capacity,
			source,
		}
	}

	pub fn initial_capacity(&self) -> usize {
		self.initial_capacity
	}
}

// ---------------------------------------------------------------------------
// SlabTree
// ---------------------------------------------------------------------------

/// An ordered index over `i64` keys with slab-allocated nodes.
///
/// Nodes are created detached, given a key and payload by the caller, and
/// then linked with [`insert`](SlabTree::insert). A node handle stays valid
/// until the node is removed (arena-owned nodes) or released (caller-owned
/// nodes), or until [`clean`](SlabTree::clean).
///
/// # Contract
///
/// Passing a `NodeId` that this tree did not hand out, or one that has been
/// recycled, is a programming error and panics when detected.
#[derive(Debug)]
pub struct SlabTree<S: SlabSource = SystemSource> {
	arena: SlabAllocator<S>,
	tree: RbTree,
	len: usize,
}

impl SlabTree<SystemSource> {
	/// Creates an empty tree whose nodes carry `payload_size` bytes each.
	///
	/// Allocates the first slab immediately.
	pub fn new(payload_size: usize) -> Result<Self> {
		Self::with_options(payload_size, Options::new())
	}
}

impl<S: SlabSource> SlabTree<S> {
	/// Creates an empty tree with explicit options.
	///
	/// Fails with [`Error::OutOfMemory`] if the first slab cannot be
	/// allocated; nothing is retained in that case.
	///
	/// # Panics
	///
	/// Panics if `options` carry an initial capacity of zero.
	pub fn with_options(payload_size: usize, options: Options<S>) -> Result<Self> {
		let arena = SlabAllocator::new(payload_size, options.initial_capacity, options.source)?;
		Ok(SlabTree {
			arena,
			tree: RbTree::new(),
			len: 0,
		})
	}

	// -----------------------------------------------------------------------
	// Node Lifecycle
	// -----------------------------------------------------------------------

	/// Creates a detached, arena-owned node with key 0 and a zeroed payload.
	///
	/// Arena-owned nodes are recycled automatically by [`remove`](Self::remove).
	pub fn create_node(&mut self) -> Result<NodeId> {
		self.arena.create_node(Ownership::Arena)
	}

	/// Creates a detached, caller-owned node.
	///
	/// Caller-owned nodes survive [`remove`](Self::remove) and can be
	/// re-inserted, which suits entries that are re-armed repeatedly. Their
	/// storage is returned with [`release_node`](Self::release_node).
	pub fn create_external_node(&mut self) -> Result<NodeId> {
		self.arena.create_node(Ownership::Caller)
	}

	/// Returns a detached node's storage to the free list.
	///
	/// # Panics
	///
	/// Panics if the node is still linked into the tree.
	pub fn release_node(&mut self, node: NodeId) {
		assert!(!self.is_linked(node), "cannot release linked node {:?}", node);
		self.arena.dispose(node);
	}

	/// Links a detached node into the tree under its current key.
	///
	/// # Panics
	///
	/// Panics if the node is already linked.
	pub fn insert(&mut self, node: NodeId) {
		assert!(!self.is_linked(node), "{:?} is already linked", node);
		self.tree.insert(&mut self.arena, node);
		self.len += 1;
	}

	/// Unlinks a node. Arena-owned nodes are recycled and their handle
	/// becomes invalid; caller-owned nodes stay detached and keep their key.
	///
	/// # Panics
	///
	/// Panics if the node is not linked.
	pub fn remove(&mut self, node: NodeId) {
		assert!(self.is_linked(node), "{:?} is not linked", node);
		self.tree.delete(&mut self.arena, node);
		self.len -= 1;
		self.arena.release_node(node);
	}

	/// Detaches every node. Arena-owned nodes are recycled; slabs are kept.
	pub fn clear(&mut self) {
		let mut nodes = Vec::with_capacity(self.len);
		self.tree.walk(&self.arena, |node| nodes.push(node));
		self.tree.reset();
		self.len = 0;

		for node in nodes {
			let key = self.arena.links(node).key;
			*self.arena.links_mut(node) = Links {
				key,
				..Links::detached()
			};
			self.arena.release_node(node);
		}
	}

	/// Releases all storage back to the slab source.
	///
	/// Every outstanding `NodeId` becomes invalid, caller-owned ones included.
	/// Calling this again is a no-op. The tree stays usable: the next
	/// `create_node` starts a fresh first slab.
	pub fn clean(&mut self) {
		self.tree.reset();
		self.len = 0;
		self.arena.destroy();
	}

	// -----------------------------------------------------------------------
	// Node Access
	// -----------------------------------------------------------------------

	pub fn key(&self, node: NodeId) -> i64 {
		self.arena.links(node).key
	}

	/// Sets the ordering key of a detached node.
	///
	/// # Panics
	///
	/// Panics if the node is linked; re-keying in place would break ordering.
	pub fn set_key(&mut self, node: NodeId, key: i64) {
		assert!(!self.is_linked(node), "cannot re-key linked node {:?}", node);
		self.arena.links_mut(node).key = key;
	}

	/// Payload bytes of a node; `payload_size` long.
	pub fn payload(&self, node: NodeId) -> &[u8] {
		self.arena.payload(node)
	}

	pub fn payload_mut(&mut self, node: NodeId) -> &mut [u8] {
		self.arena.payload_mut(node)
	}

	pub fn owner(&self, node: NodeId) -> Ownership {
		self.arena.owner(node)
	}

	/// Whether the node is currently part of the tree.
	pub fn is_linked(&self, node: NodeId) -> bool {
		self.tree.root() == Some(node) || self.arena.links(node).parent.is_some()
	}

	// -----------------------------------------------------------------------
	// Queries
	// -----------------------------------------------------------------------

	/// Leftmost node of the duplicate chain holding `key`.
	pub fn search_key(&self, key: i64) -> Option<NodeId> {
		self.tree.find_key(&self.arena, key)
	}

	/// Node holding `key`, or else the nearest node with a smaller key.
	pub fn search_key_left(&self, key: i64) -> Option<NodeId> {
		self.tree.find_key_left(&self.arena, key)
	}

	/// Node holding `key`, or else the nearest node with a larger key.
	pub fn search_key_right(&self, key: i64) -> Option<NodeId> {
		self.tree.find_key_right(&self.arena, key)
	}

	/// In-order predecessor.
	pub fn left(&self, node: NodeId) -> Option<NodeId> {
		self.tree.find_left(&self.arena, node)
	}

	/// In-order successor.
	pub fn right(&self, node: NodeId) -> Option<NodeId> {
		self.tree.find_right(&self.arena, node)
	}

	/// Node with the smallest key.
	pub fn first(&self) -> Option<NodeId> {
		self.tree.min(&self.arena)
	}

	/// Node with the largest key.
	pub fn last(&self) -> Option<NodeId> {
		self.tree.max(&self.arena)
	}

	/// In-order iterator over linked nodes.
	pub fn iter(&self) -> Iter<'_, S> {
		Iter::new(self)
	}

	/// Visits every linked node in post-order (children before parents).
	///
	/// This is **not** sorted order; use [`iter`](Self::iter) for that.
	pub fn walk<F: FnMut(NodeId)>(&self, visit: F) {
		self.tree.walk(&self.arena, visit)
	}

	// -----------------------------------------------------------------------
	// Metadata
	// -----------------------------------------------------------------------

	/// Number of linked nodes.
	pub fn len(&self) -> usize {
		self.len
	}

	pub fn is_empty(&self) -> bool {
		self.tree.is_empty()
	}

	pub fn payload_size(&self) -> usize {
		self.arena.payload_size()
	}

	/// Bytes per node slot: header plus payload, rounded up to 16.
	pub fn object_size(&self) -> usize {
		self.arena.object_size()
	}

	pub fn stats(&self) -> ArenaStats {
		self.arena.stats()
	}

	pub fn source(&self) -> &S {
		self.arena.source()
	}
}

impl<'t, S: SlabSource> IntoIterator for &'t SlabTree<S> {
	type Item = NodeId;
	type IntoIter = Iter<'t, S>;

	fn into_iter(self) -> Iter<'t, S> {
		self.iter()
	}
}

// ===========================================================================
// Test-Only Validation
// ===========================================================================

#[cfg(any(test, feature = "test-utils"))]
impl<S: SlabSource> SlabTree<S> {
	/// Validates all tree invariants. Panics with diagnostic info if any invariant is violated.
	///
	/// Checks the red-black invariants and parent back-links (see
	/// [`RbTree::assert_invariants`]), that `len` matches the number of
	/// reachable nodes, and that in-order traversal is non-decreasing.
	pub fn assert_invariants(&self) {
		let count = self.tree.assert_invariants(&self.arena);
		assert_eq!(count, self.len, "len {} != reachable nodes {}", self.len, count);

		let mut prev: Option<i64> = None;
		let mut seen = 0;
		for node in self.iter() {
			let key = self.key(node);
			if let Some(prev) = prev {
				assert!(prev <= key, "in-order keys decrease: {} then {}", prev, key);
			}
			prev = Some(key);
			seen += 1;
		}
		assert_eq!(seen, self.len, "in-order walk saw {} nodes, expected {}", seen, self.len);
	}
}
