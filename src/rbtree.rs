//! # Red-Black Tree Core
//!
//! The balancing algorithm, written against node handles only. It never
//! touches payload bytes and never allocates; node links are read and written
//! through the [`NodeStore`] seam, which the slab allocator implements.
//!
//! ## Sentinel
//!
//! Every leaf edge points at [`NodeId::SENTINEL`], whose links live inside the
//! [`RbTree`] value itself. The sentinel is permanently Black. Its `parent`
//! field is scratch space for the delete fixup, which may start from the
//! sentinel when the spliced-out node had no children.
//!
//! ## Duplicate keys
//!
//! Insertion sends equal keys to the right. Exact search therefore stops at
//! the first equal node on the descent and then walks down its left chain as
//! long as the key still matches, returning the leftmost node of that chain:
//!
//! ```text
//!           5a              insert 5a, 5b:  5b goes right of 5a
//!            \
//!             5b            find_key(5) reaches 5a first; its left child
//!                           is not 5, so 5a is returned
//! ```
//!
//! Rotations can later move a duplicate above another, which is why the
//! left-chain walk is required rather than returning the first hit.

use crate::node::{Color, Links, NodeId};

/// Storage for node links, indexed by [`NodeId`].
///
/// Implementations only ever see real node ids; the sentinel is resolved by
/// the tree before the store is consulted.
pub trait NodeStore {
	/// Returns the links of a live node.
	fn links(&self, id: NodeId) -> &Links;

	/// Returns the links of a live node for modification.
	fn links_mut(&mut self, id: NodeId) -> &mut Links;
}

/// Which child of a node.
///
/// Every fixup case has a mirror image; the code is written once for `side`
/// and once implicitly for `side.opposite()`.
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub(crate) enum Side {
	Left,
	Right,
}

impl Side {
	#[inline]
	fn opposite(self) -> Side {
		match self {
			Side::Left => Side::Right,
			Side::Right => Side::Left,
		}
	}
}

/// Root pointer plus the per-tree sentinel.
#[derive(Debug, Clone)]
pub struct RbTree {
	root: NodeId,
	sentinel: Links,
}

impl Default for RbTree {
	fn default() -> Self {
		Self::new()
	}
}

impl RbTree {
	/// Creates an empty tree whose root is the sentinel.
	pub fn new() -> Self {
		RbTree {
			root: NodeId::SENTINEL,
			sentinel: Links::detached(),
		}
	}

	/// Returns the root, or `None` if the tree is empty.
	pub fn root(&self) -> Option<NodeId> {
		(!self.root.is_sentinel()).then_some(self.root)
	}

	pub fn is_empty(&self) -> bool {
		self.root.is_sentinel()
	}

	/// Forgets every node without touching them. Node links are left stale.
	pub fn reset(&mut self) {
		self.root = NodeId::SENTINEL;
		self.sentinel = Links::detached();
	}

	#[inline]
	fn node<'a, S: NodeStore + ?Sized>(&'a self, store: &'a S, id: NodeId) -> &'a Links {
		if id.is_sentinel() {
			&self.sentinel
		} else {
			store.links(id)
		}
	}

	#[inline]
	fn child<S: NodeStore + ?Sized>(&self, store: &S, id: NodeId, side: Side) -> NodeId {
		let links = self.node(store, id);
		match side {
			Side::Left => links.left,
			Side::Right => links.right,
		}
	}

	fn edit<'a, S: NodeStore + ?Sized>(&'a mut self, store: &'a mut S) -> Edit<'a, S> {
		Edit {
			root: &mut self.root,
			sentinel: &mut self.sentinel,
			store,
		}
	}

	// -----------------------------------------------------------------------
	// Mutation
	// -----------------------------------------------------------------------

	/// Links `node` into the tree using the key already stored in its links.
	///
	/// The node must not currently be linked into any tree.
	pub fn insert<S: NodeStore + ?Sized>(&mut self, store: &mut S, node: NodeId) {
		self.edit(store).insert(node)
	}

	/// Unlinks `node` from the tree and clears its links (the key is kept).
	pub fn delete<S: NodeStore + ?Sized>(&mut self, store: &mut S, node: NodeId) {
		self.edit(store).delete(node)
	}

	// -----------------------------------------------------------------------
	// Queries
	// -----------------------------------------------------------------------

	/// Returns the leftmost node of the duplicate chain for `key`.
	pub fn find_key<S: NodeStore + ?Sized>(&self, store: &S, key: i64) -> Option<NodeId> {
		let mut node = self.root;

		while !node.is_sentinel() {
			let links = self.node(store, node);
			if key < links.key {
				node = links.left;
			} else if key > links.key {
				node = links.right;
			} else {
				return Some(self.leftmost_match(store, node, key));
			}
		}
		None
	}

	/// Returns the exact match for `key`, or the nearest node with a smaller key.
	pub fn find_key_left<S: NodeStore + ?Sized>(&self, store: &S, key: i64) -> Option<NodeId> {
		let mut node = self.root;
		if node.is_sentinel() {
			return None;
		}

		loop {
			let links = self.node(store, node);
			if key < links.key {
				if links.left.is_sentinel() {
					return self.find_left(store, node);
				}
				node = links.left;
			} else if key > links.key {
				if links.right.is_sentinel() {
					return Some(node);
				}
				node = links.right;
			} else {
				return Some(self.leftmost_match(store, node, key));
			}
		}
	}

	/// Returns the exact match for `key`, or the nearest node with a larger key.
	pub fn find_key_right<S: NodeStore + ?Sized>(&self, store: &S, key: i64) -> Option<NodeId> {
		let mut node = self.root;
		if node.is_sentinel() {
			return None;
		}

		loop {
			let links = self.node(store, node);
			if key < links.key {
				if links.left.is_sentinel() {
					return Some(node);
				}
				node = links.left;
			} else if key > links.key {
				if links.right.is_sentinel() {
					return self.find_right(store, node);
				}
				node = links.right;
			} else {
				return Some(self.leftmost_match(store, node, key));
			}
		}
	}

	fn leftmost_match<S: NodeStore + ?Sized>(&self, store: &S, mut node: NodeId, key: i64) -> NodeId {
		loop {
			let left = self.node(store, node).left;
			if left.is_sentinel() || self.node(store, left).key != key {
				return node;
			}
			node = left;
		}
	}

	/// In-order successor of `node`.
	pub fn find_right<S: NodeStore + ?Sized>(&self, store: &S, node: NodeId) -> Option<NodeId> {
		self.neighbor(store, node, Side::Right)
	}

	/// In-order predecessor of `node`.
	pub fn find_left<S: NodeStore + ?Sized>(&self, store: &S, node: NodeId) -> Option<NodeId> {
		self.neighbor(store, node, Side::Left)
	}

	fn neighbor<S: NodeStore + ?Sized>(&self, store: &S, node: NodeId, side: Side) -> Option<NodeId> {
		if node.is_sentinel() {
			return None;
		}

		let child = self.child(store, node, side);
		if !child.is_sentinel() {
			return Some(self.extreme(store, child, side.opposite()));
		}

		// No child on that side: climb until we arrive from the other side.
		let mut node = node;
		loop {
			let parent = self.node(store, node).parent?;
			if self.child(store, parent, side) != node {
				return Some(parent);
			}
			node = parent;
		}
	}

	/// Follows `side` children from `node` until the next one is the sentinel.
	fn extreme<S: NodeStore + ?Sized>(&self, store: &S, mut node: NodeId, side: Side) -> NodeId {
		loop {
			let next = self.child(store, node, side);
			if next.is_sentinel() {
				return node;
			}
			node = next;
		}
	}

	/// Node with the smallest key (leftmost among duplicates).
	pub fn min<S: NodeStore + ?Sized>(&self, store: &S) -> Option<NodeId> {
		self.root().map(|root| self.extreme(store, root, Side::Left))
	}

	/// Node with the largest key (rightmost among duplicates).
	pub fn max<S: NodeStore + ?Sized>(&self, store: &S) -> Option<NodeId> {
		self.root().map(|root| self.extreme(store, root, Side::Right))
	}

	/// Visits every node in **post-order**: left subtree, right subtree, node.
	///
	/// This is not sorted order. It exists for bulk teardown and inspection,
	/// where children must be seen before their parent. Use
	/// [`find_right`](RbTree::find_right) from [`min`](RbTree::min) to
	/// enumerate keys in order. Recursion depth is bounded by tree height.
	pub fn walk<S, F>(&self, store: &S, mut visit: F)
	where
		S: NodeStore + ?Sized,
		F: FnMut(NodeId),
	{
		if !self.root.is_sentinel() {
			self.walk_from(store, self.root, &mut visit);
		}
	}

	fn walk_from<S, F>(&self, store: &S, node: NodeId, visit: &mut F)
	where
		S: NodeStore + ?Sized,
		F: FnMut(NodeId),
	{
		let links = self.node(store, node);
		let (left, right) = (links.left, links.right);
		if !left.is_sentinel() {
			self.walk_from(store, left, visit);
		}
		if !right.is_sentinel() {
			self.walk_from(store, right, visit);
		}
		visit(node);
	}
}

/// Mutable view used by insert and delete.
struct Edit<'a, S: ?Sized> {
	root: &'a mut NodeId,
	sentinel: &'a mut Links,
	store: &'a mut S,
}

impl<S: NodeStore + ?Sized> Edit<'_, S> {
	#[inline]
	fn node(&self, id: NodeId) -> &Links {
		if id.is_sentinel() {
			&*self.sentinel
		} else {
			self.store.links(id)
		}
	}

	#[inline]
	fn node_mut(&mut self, id: NodeId) -> &mut Links {
		if id.is_sentinel() {
			&mut *self.sentinel
		} else {
			self.store.links_mut(id)
		}
	}

	#[inline]
	fn child(&self, id: NodeId, side: Side) -> NodeId {
		let links = self.node(id);
		match side {
			Side::Left => links.left,
			Side::Right => links.right,
		}
	}

	#[inline]
	fn set_child(&mut self, id: NodeId, side: Side, child: NodeId) {
		let links = self.node_mut(id);
		match side {
			Side::Left => links.left = child,
			Side::Right => links.right = child,
		}
	}

	#[inline]
	fn parent(&self, id: NodeId) -> NodeId {
		self.node(id).parent.expect("non-root node must have a parent")
	}

	#[inline]
	fn color(&self, id: NodeId) -> Color {
		self.node(id).color
	}

	#[inline]
	fn set_color(&mut self, id: NodeId, color: Color) {
		self.node_mut(id).color = color;
	}

	/// Side on which `node` hangs below `parent`.
	#[inline]
	fn side_of(&self, node: NodeId, parent: NodeId) -> Side {
		if self.child(parent, Side::Left) == node {
			Side::Left
		} else {
			Side::Right
		}
	}

	/// Rotates `node` down towards `side`; its opposite child takes its place.
	///
	/// `rotate(x, Side::Left)` is the classic left rotation.
	fn rotate(&mut self, node: NodeId, side: Side) {
		let other = side.opposite();
		let pivot = self.child(node, other);
		let inner = self.child(pivot, side);

		self.set_child(node, other, inner);
		if !inner.is_sentinel() {
			self.node_mut(inner).parent = Some(node);
		}

		let parent = self.node(node).parent;
		self.node_mut(pivot).parent = parent;

		if node == *self.root {
			*self.root = pivot;
		} else {
			let parent = parent.expect("non-root node must have a parent");
			let at = self.side_of(node, parent);
			self.set_child(parent, at, pivot);
		}

		self.set_child(pivot, side, node);
		self.node_mut(node).parent = Some(pivot);
	}

	fn insert(&mut self, node: NodeId) {
		debug_assert!(!node.is_sentinel(), "cannot insert the sentinel");

		if self.root.is_sentinel() {
			let links = self.node_mut(node);
			links.parent = None;
			links.left = NodeId::SENTINEL;
			links.right = NodeId::SENTINEL;
			links.color = Color::Black;
			*self.root = node;
			return;
		}

		// Plain binary-tree descent; equal keys go right.
		let key = self.node(node).key;
		let mut parent = *self.root;
		let side = loop {
			let side = if key < self.node(parent).key {
				Side::Left
			} else {
				Side::Right
			};
			let next = self.child(parent, side);
			if next.is_sentinel() {
				break side;
			}
			parent = next;
		};

		self.set_child(parent, side, node);
		{
			let links = self.node_mut(node);
			links.parent = Some(parent);
			links.left = NodeId::SENTINEL;
			links.right = NodeId::SENTINEL;
			links.color = Color::Red;
		}

		self.insert_fixup(node);
	}

	fn insert_fixup(&mut self, mut node: NodeId) {
		while node != *self.root && self.color(self.parent(node)) == Color::Red {
			let parent = self.parent(node);
			// A red parent is never the root, so the grandparent exists.
			let grand = self.parent(parent);
			let side = self.side_of(parent, grand);
			let uncle = self.child(grand, side.opposite());

			if self.color(uncle) == Color::Red {
				self.set_color(parent, Color::Black);
				self.set_color(uncle, Color::Black);
				self.set_color(grand, Color::Red);
				node = grand;
			} else {
				if node == self.child(parent, side.opposite()) {
					node = parent;
					self.rotate(node, side);
				}

				let parent = self.parent(node);
				let grand = self.parent(parent);
				self.set_color(parent, Color::Black);
				self.set_color(grand, Color::Red);
				self.rotate(grand, side.opposite());
			}
		}

		let root = *self.root;
		self.set_color(root, Color::Black);
	}

	fn delete(&mut self, node: NodeId) {
		debug_assert!(!node.is_sentinel(), "cannot delete the sentinel");

		let (left, right) = (self.node(node).left, self.node(node).right);
		let (splice, mut replacement) = if left.is_sentinel() {
			(node, right)
		} else if right.is_sentinel() {
			(node, left)
		} else {
			let successor = self.leftmost(right);
			let successor_left = self.node(successor).left;
			let child = if successor_left.is_sentinel() {
				self.node(successor).right
			} else {
				successor_left
			};
			(successor, child)
		};

		if splice == *self.root {
			*self.root = replacement;
			let links = self.node_mut(replacement);
			links.color = Color::Black;
			links.parent = None;
			self.clear(node);
			return;
		}

		let was_red = self.color(splice) == Color::Red;

		let splice_parent = self.parent(splice);
		let at = self.side_of(splice, splice_parent);
		self.set_child(splice_parent, at, replacement);

		if splice == node {
			self.node_mut(replacement).parent = Some(splice_parent);
		} else {
			let replacement_parent = if splice_parent == node {
				splice
			} else {
				splice_parent
			};
			self.node_mut(replacement).parent = Some(replacement_parent);

			// The successor takes over the removed node's position and color.
			let removed = *self.node(node);
			{
				let links = self.node_mut(splice);
				links.left = removed.left;
				links.right = removed.right;
				links.parent = removed.parent;
				links.color = removed.color;
			}

			if node == *self.root {
				*self.root = splice;
			} else {
				let parent = removed.parent.expect("non-root node must have a parent");
				let at = self.side_of(node, parent);
				self.set_child(parent, at, splice);
			}

			let (left, right) = (self.node(splice).left, self.node(splice).right);
			if !left.is_sentinel() {
				self.node_mut(left).parent = Some(splice);
			}
			if !right.is_sentinel() {
				self.node_mut(right).parent = Some(splice);
			}
		}

		self.clear(node);

		if was_red {
			return;
		}

		// Double-black fixup, climbing from the replacement.
		while replacement != *self.root && self.color(replacement) == Color::Black {
			let parent = self.parent(replacement);
			let side = self.side_of(replacement, parent);
			let other = side.opposite();
			let mut sibling = self.child(parent, other);

			if self.color(sibling) == Color::Red {
				self.set_color(sibling, Color::Black);
				self.set_color(parent, Color::Red);
				self.rotate(parent, side);
				sibling = self.child(self.parent(replacement), other);
			}

			let near = self.child(sibling, side);
			let far = self.child(sibling, other);
			if self.color(near) == Color::Black && self.color(far) == Color::Black {
				self.set_color(sibling, Color::Red);
				replacement = self.parent(replacement);
			} else {
				if self.color(far) == Color::Black {
					self.set_color(near, Color::Black);
					self.set_color(sibling, Color::Red);
					self.rotate(sibling, other);
					sibling = self.child(self.parent(replacement), other);
				}

				let parent = self.parent(replacement);
				let parent_color = self.color(parent);
				self.set_color(sibling, parent_color);
				self.set_color(parent, Color::Black);
				let far = self.child(sibling, other);
				self.set_color(far, Color::Black);
				self.rotate(parent, side);
				replacement = *self.root;
			}
		}

		self.set_color(replacement, Color::Black);
	}

	fn leftmost(&self, mut node: NodeId) -> NodeId {
		loop {
			let left = self.node(node).left;
			if left.is_sentinel() {
				return node;
			}
			node = left;
		}
	}

	/// Drops all structural links of a removed node. The key stays.
	fn clear(&mut self, node: NodeId) {
		let links = self.node_mut(node);
		links.left = NodeId::SENTINEL;
		links.right = NodeId::SENTINEL;
		links.parent = None;
		links.color = Color::Black;
	}
}

// ===========================================================================
// Test-Only Validation
// ===========================================================================

#[cfg(any(test, feature = "test-utils"))]
impl RbTree {
	/// Validates all red-black invariants and returns the number of nodes.
	///
	/// # Invariants Checked
	///
	/// 1. The sentinel is Black
	/// 2. The root is Black and has no parent
	/// 3. No Red node has a Red child
	/// 4. Every root-to-sentinel path has the same Black-height
	/// 5. Key ordering: left subtree keys < node key <= right subtree keys,
	///    except that equal keys may also sit in the left subtree after rotations
	/// 6. Every child's parent link points back at its parent
	pub fn assert_invariants<S: NodeStore + ?Sized>(&self, store: &S) -> usize {
		// Invariant 1
		assert_eq!(self.sentinel.color, Color::Black, "sentinel must be Black");

		if self.root.is_sentinel() {
			return 0;
		}

		// Invariant 2
		let root = self.node(store, self.root);
		assert_eq!(root.color, Color::Black, "root {:?} must be Black", self.root);
		assert_eq!(root.parent, None, "root {:?} must not have a parent", self.root);

		let mut count = 0;
		self.validate_recursive(store, self.root, None, None, &mut count);
		count
	}

	/// Returns the Black-height of the subtree at `node`.
	fn validate_recursive<S: NodeStore + ?Sized>(
		&self,
		store: &S,
		node: NodeId,
		lower: Option<i64>,
		upper: Option<i64>,
		count: &mut usize,
	) -> usize {
		if node.is_sentinel() {
			return 1;
		}
		*count += 1;

		let links = *self.node(store, node);

		// Invariant 5
		if let Some(lower) = lower {
			assert!(links.key >= lower, "{:?} key {} below lower bound {}", node, links.key, lower);
		}
		if let Some(upper) = upper {
			assert!(links.key <= upper, "{:?} key {} above upper bound {}", node, links.key, upper);
		}

		for child in [links.left, links.right] {
			if child.is_sentinel() {
				continue;
			}
			let child_links = self.node(store, child);

			// Invariant 6
			assert_eq!(
				child_links.parent,
				Some(node),
				"{:?} has parent {:?}, expected {:?}",
				child,
				child_links.parent,
				node
			);

			// Invariant 3
			if links.color == Color::Red {
				assert_eq!(
					child_links.color,
					Color::Black,
					"Red node {:?} has Red child {:?}",
					node,
					child
				);
			}
		}

		let left = self.validate_recursive(store, links.left, lower, Some(links.key), count);
		let right = self.validate_recursive(store, links.right, Some(links.key), upper, count);

		// Invariant 4
		assert_eq!(left, right, "Black-height mismatch below {:?}: {} != {}", node, left, right);

		left + usize::from(links.color == Color::Black)
	}
}
