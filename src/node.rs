//! Node handles, link headers, and the in-slab slot layout.
//!
//! Every node slot in a slab looks like this:
//!
//! ```text
//! 0                       OBJECT_OFFSET             object_size
//! ┌───────────────────────┬─────────────────────────┬─────────┐
//! │ Slot header           │ payload (payload_size)  │ padding │
//! │ Live{links, owner}    │                         │         │
//! │   or Free{next}       │                         │         │
//! └───────────────────────┴─────────────────────────┴─────────┘
//! ```
//!
//! `OBJECT_OFFSET` is a constant, so the payload of every node created by
//! every tree starts at the same distance from its header.

use std::fmt;
use std::mem::{align_of, size_of};

/// Alignment of slabs, slot strides and payloads.
pub const SLOT_ALIGN: usize = 16;

/// Byte offset of the payload region from the start of a node slot.
pub const OBJECT_OFFSET: usize = round_up(size_of::<Slot>(), SLOT_ALIGN);

// The header must fit in front of the payload and never need more alignment
// than the slab provides.
const _: () = assert!(OBJECT_OFFSET >= size_of::<Slot>());
const _: () = assert!(OBJECT_OFFSET % SLOT_ALIGN == 0);
const _: () = assert!(align_of::<Slot>() <= SLOT_ALIGN);
const _: () = assert!(SLOT_ALIGN.is_power_of_two());

/// Rounds `value` up to a multiple of `align`, which must be a power of two.
pub(crate) const fn round_up(value: usize, align: usize) -> usize {
	(value + align - 1) & !(align - 1)
}

/// Handle to a node slot.
///
/// Handles are plain indices. They stay valid while the slot is live; after
/// a slot is released the same handle may name a different node later.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) u32);

impl NodeId {
	/// The tree's "no child" marker. Never refers to a slab slot.
	pub(crate) const SENTINEL: NodeId = NodeId(u32::MAX);

	#[inline]
	pub(crate) fn index(self) -> usize {
		self.0 as usize
	}

	#[inline]
	pub(crate) fn is_sentinel(self) -> bool {
		self == Self::SENTINEL
	}
}

impl fmt::Debug for NodeId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		if self.is_sentinel() {
			f.write_str("NodeId(sentinel)")
		} else {
			write!(f, "NodeId({})", self.0)
		}
	}
}

/// Node color.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Color {
	Red,
	Black,
}

/// Who is responsible for a node's storage once it leaves the tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Ownership {
	/// Recycled onto the free list when removed from the tree.
	Arena,
	/// Left alone on removal; the caller releases it explicitly.
	Caller,
}

/// The structural header the balancing code works on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct Links {
	pub key: i64,
	pub left: NodeId,
	pub right: NodeId,
	/// Back-reference only; `None` for the root and for detached nodes.
	pub parent: Option<NodeId>,
	pub color: Color,
}

impl Links {
	/// Links of a node that belongs to no tree.
	pub(crate) const fn detached() -> Self {
		Links {
			key: 0,
			left: NodeId::SENTINEL,
			right: NodeId::SENTINEL,
			parent: None,
			color: Color::Black,
		}
	}
}

/// Header stored at offset 0 of every handed-out slot.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub(crate) enum Slot {
	Live {
		links: Links,
		owner: Ownership,
	},
	Free {
		next: Option<NodeId>,
	},
}
