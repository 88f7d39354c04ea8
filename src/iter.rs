//! In-order iteration over a [`SlabTree`].
//!
//! The iterator holds no stack: each step is one successor (or predecessor)
//! query, so it costs O(log n) worst case and O(1) amortized per node.
use crate::node::NodeId;
use crate::source::SlabSource;
use crate::SlabTree;

/// Double-ended in-order iterator over the node handles of a tree.
///
/// Nodes with equal keys are yielded in their in-order position, which is
/// the order they sit in the tree, not necessarily insertion order.
pub struct Iter<'t, S: SlabSource> {
	tree: &'t SlabTree<S>,
	front: Option<NodeId>,
	back: Option<NodeId>,
	remaining: usize,
}

impl<'t, S: SlabSource> Iter<'t, S> {
	pub(crate) fn new(tree: &'t SlabTree<S>) -> Iter<'t, S> {
		Iter {
			tree,
			front: tree.first(),
			back: tree.last(),
			remaining: tree.len(),
		}
	}

	fn finish(&mut self) {
		self.front = None;
		self.back = None;
	}
}

impl<S: SlabSource> Iterator for Iter<'_, S> {
	type Item = NodeId;

	fn next(&mut self) -> Option<NodeId> {
		let node = self.front?;
		if self.front == self.back {
			self.finish();
		} else {
			self.front = self.tree.right(node);
		}
		self.remaining -= 1;
		Some(node)
	}

	fn size_hint(&self) -> (usize, Option<usize>) {
		(self.remaining, Some(self.remaining))
	}
}

impl<S: SlabSource> DoubleEndedIterator for Iter<'_, S> {
	fn next_back(&mut self) -> Option<NodeId> {
		let node = self.back?;
		if self.front == self.back {
			self.finish();
		} else {
			self.back = self.tree.left(node);
		}
		self.remaining -= 1;
		Some(node)
	}
}

impl<S: SlabSource> ExactSizeIterator for Iter<'_, S> {}

impl<S: SlabSource> std::iter::FusedIterator for Iter<'_, S> {}
