//! # Invariant Testing for slabtree
//!
//! Tests designed to drive every insert and delete fixup branch and validate
//! the red-black invariants afterwards:
//!
//! - Exhaustive small trees (every insertion order, every deletion)
//! - Duplicate-heavy workloads and the leftmost-match contract
//! - Randomized operations with invariant validation

use rand::prelude::*;
use slabtree::{NodeId, SlabTree};

fn build(keys: &[i64]) -> (SlabTree, Vec<NodeId>) {
	let mut tree = SlabTree::new(0).unwrap();
	let nodes = keys
		.iter()
		.map(|&key| {
			let node = tree.create_node().unwrap();
			tree.set_key(node, key);
			tree.insert(node);
			node
		})
		.collect();
	(tree, nodes)
}

/// All permutations of `items`, in lexicographic index order.
fn permutations(items: &[i64]) -> Vec<Vec<i64>> {
	if items.len() <= 1 {
		return vec![items.to_vec()];
	}
	let mut out = Vec::new();
	for i in 0..items.len() {
		let mut rest = items.to_vec();
		let head = rest.remove(i);
		for mut tail in permutations(&rest) {
			tail.insert(0, head);
			out.push(tail);
		}
	}
	out
}

// ===========================================================================
// Exhaustive Small Trees
// ===========================================================================

/// Every insertion order of 1..=6 yields a valid tree.
#[test]
fn every_insertion_order_is_balanced() {
	for n in 1..=6 {
		let keys: Vec<i64> = (1..=n).collect();
		for order in permutations(&keys) {
			let (tree, _) = build(&order);
			tree.assert_invariants();
			let in_order: Vec<i64> = tree.iter().map(|id| tree.key(id)).collect();
			assert_eq!(in_order, keys, "insertion order {:?}", order);
		}
	}
}

/// Deleting any single node from any tree built from 1..=6 keeps it valid.
#[test]
fn every_single_deletion_is_balanced() {
	for n in 1..=6 {
		let keys: Vec<i64> = (1..=n).collect();
		for order in permutations(&keys) {
			for victim in 0..order.len() {
				let (mut tree, nodes) = build(&order);
				tree.remove(nodes[victim]);
				tree.assert_invariants();

				let expected: Vec<i64> = keys.iter().copied().filter(|&k| k != order[victim]).collect();
				let in_order: Vec<i64> = tree.iter().map(|id| tree.key(id)).collect();
				assert_eq!(in_order, expected, "order {:?}, removed {}", order, order[victim]);
			}
		}
	}
}

/// Deleting every node in every order from a 5-node tree.
#[test]
fn every_deletion_sequence_is_balanced() {
	let keys: Vec<i64> = (1..=5).collect();
	for insert_order in permutations(&keys) {
		for delete_order in permutations(&keys) {
			let (mut tree, nodes) = build(&insert_order);
			for key in &delete_order {
				let at = insert_order.iter().position(|k| k == key).unwrap();
				tree.remove(nodes[at]);
				tree.assert_invariants();
			}
			assert!(tree.is_empty());
		}
	}
}

// ===========================================================================
// Fixup Branch Coverage
// ===========================================================================

/// Ascending inserts exercise the right-leaning rotation cases.
#[test]
fn ascending_inserts_rotate_left() {
	let keys: Vec<i64> = (0..1024).collect();
	let (tree, _) = build(&keys);
	tree.assert_invariants();
}

/// Descending inserts exercise the mirror cases.
#[test]
fn descending_inserts_rotate_right() {
	let keys: Vec<i64> = (0..1024).rev().collect();
	let (tree, _) = build(&keys);
	tree.assert_invariants();
}

/// Zig-zag inserts force the inner-grandchild double rotations.
#[test]
fn zigzag_inserts_double_rotate() {
	let mut keys = Vec::new();
	for i in 0..512i64 {
		keys.push(i);
		keys.push(2047 - i);
	}
	let (tree, _) = build(&keys);
	tree.assert_invariants();
}

/// Removing the median repeatedly goes through the two-children splice path.
#[test]
fn repeated_root_removal() {
	let keys: Vec<i64> = (0..500).collect();
	let (mut tree, nodes) = build(&keys);

	let mut remaining = nodes.len();
	while remaining > 0 {
		let median = tree.iter().nth(tree.len() / 2).unwrap();
		tree.remove(median);
		remaining -= 1;
		tree.assert_invariants();
	}
}

// ===========================================================================
// Duplicate Keys
// ===========================================================================

/// Two nodes with the same key: the second descends right of the first.
#[test]
fn duplicate_pair_descends_right() {
	let (tree, nodes) = build(&[5, 5]);
	tree.assert_invariants();

	assert_eq!(tree.search_key(5), Some(nodes[0]));
	assert_eq!(tree.right(nodes[0]), Some(nodes[1]));
	assert_eq!(tree.left(nodes[0]), None);
}

/// A duplicate inserted under a left-leaning chain is found through it.
#[test]
fn duplicate_chain_follows_left_children() {
	// The last insert rotates the second 5 above the first, so the search
	// meets the second 5 and has to step down its left child.
	let (tree, nodes) = build(&[5, 10, 15, 5, 5]);
	tree.assert_invariants();

	assert_eq!(tree.search_key(5), Some(nodes[0]));
	assert_eq!(tree.search_key_left(7).map(|n| tree.key(n)), Some(5));
	assert_eq!(tree.search_key_right(7).map(|n| tree.key(n)), Some(10));
}

/// Many duplicates among distinct keys: every search lands on the run.
#[test]
fn duplicate_runs_resolve_to_first_in_order() {
	let mut rng = StdRng::seed_from_u64(11);
	let mut keys: Vec<i64> = Vec::new();
	for k in 0..50 {
		for _ in 0..rng.random_range(1..8) {
			keys.push(k * 2);
		}
	}
	keys.shuffle(&mut rng);
	let (mut tree, _) = build(&keys);
	tree.assert_invariants();

	for k in 0..50 {
		let found = tree.search_key(k * 2).unwrap();
		assert_eq!(tree.key(found), k * 2);

		// Exact hits take the same path; misses straddle the gaps.
		assert_eq!(tree.search_key_left(k * 2), Some(found));
		assert_eq!(tree.search_key_right(k * 2), Some(found));
		assert_eq!(tree.search_key_right(k * 2 - 1).map(|n| tree.key(n)), Some(k * 2));
		assert_eq!(tree.search_key_left(k * 2 + 1).map(|n| tree.key(n)), Some(k * 2));
	}

	// Drain duplicates one search at a time.
	for k in 0..50 {
		while let Some(node) = tree.search_key(k * 2) {
			tree.remove(node);
		}
		tree.assert_invariants();
	}
	assert!(tree.is_empty());
}

// ===========================================================================
// Randomized Operations
// ===========================================================================

#[test]
fn random_operations_keep_invariants() {
	let mut rng = StdRng::seed_from_u64(1234);
	let mut tree = SlabTree::new(0).unwrap();
	let mut live: Vec<NodeId> = Vec::new();

	for round in 0..20_000 {
		if live.is_empty() || rng.random_bool(0.55) {
			let node = tree.create_node().unwrap();
			tree.set_key(node, rng.random_range(-300..300));
			tree.insert(node);
			live.push(node);
		} else {
			let node = live.swap_remove(rng.random_range(0..live.len()));
			tree.remove(node);
		}

		if round % 500 == 0 {
			tree.assert_invariants();
		}
	}

	tree.assert_invariants();
	assert_eq!(tree.len(), live.len());
}
