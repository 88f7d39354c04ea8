//! Test utilities for replaying operation scripts from JSON fixtures
use crate::{NodeId, Options, Ownership, SlabTree};
use serde::Deserialize;
use std::collections::HashMap;

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
enum Owner {
	#[default]
	Arena,
	Caller,
}

/// One scripted step. Nodes are referred to by the name they were created under.
#[derive(Deserialize, Debug)]
#[serde(tag = "op", rename_all = "snake_case")]
enum Step {
	Insert {
		name: String,
		key: i64,
		#[serde(default)]
		owner: Owner,
	},
	/// Re-keys and links a detached caller-owned node.
	Reinsert {
		name: String,
		key: i64,
	},
	Remove {
		name: String,
	},
	Release {
		name: String,
	},
	Search {
		key: i64,
		expect: Option<String>,
	},
	SearchLeft {
		key: i64,
		expect: Option<String>,
	},
	SearchRight {
		key: i64,
		expect: Option<String>,
	},
	Left {
		name: String,
		expect: Option<String>,
	},
	Right {
		name: String,
		expect: Option<String>,
	},
	/// Post-order node names.
	Walk {
		expect: Vec<String>,
	},
	/// In-order keys.
	Keys {
		expect: Vec<i64>,
	},
	Len {
		expect: usize,
	},
	Clear,
	Clean,
	Check,
}

#[derive(Deserialize, Debug)]
struct Script {
	name: String,
	#[serde(default)]
	payload_size: usize,
	initial_capacity: Option<usize>,
	steps: Vec<Step>,
}

#[derive(Deserialize, Debug)]
struct ScriptFile {
	scripts: Vec<Script>,
}

/// Outcome of a replayed script: the tree and the nodes it created, by name.
pub struct Replay {
	pub name: String,
	pub tree: SlabTree,
	pub nodes: HashMap<String, NodeId>,
}

impl Replay {
	fn node(&self, name: &str) -> NodeId {
		*self.nodes.get(name).unwrap_or_else(|| panic!("[{}] unknown node {:?}", self.name, name))
	}

	fn name_of(&self, node: Option<NodeId>) -> Option<String> {
		let node = node?;
		let name = self
			.nodes
			.iter()
			.find(|(_, &id)| id == node)
			.map(|(name, _)| name.clone())
			.unwrap_or_else(|| format!("{:?}", node));
		Some(name)
	}

	fn check(&self, step: usize, what: &str, actual: Option<NodeId>, expect: &Option<String>) {
		assert_eq!(
			self.name_of(actual).as_deref(),
			expect.as_deref(),
			"[{}] step {}: {} returned the wrong node",
			self.name,
			step,
			what
		);
	}

	fn apply(&mut self, index: usize, step: Step) {
		match step {
			Step::Insert {
				name,
				key,
				owner,
			} => {
				let node = match owner {
					Owner::Arena => self.tree.create_node(),
					Owner::Caller => self.tree.create_external_node(),
				}
				.expect("slab source refused allocation");
				self.tree.set_key(node, key);
				self.tree.insert(node);
				self.nodes.insert(name, node);
			}
			Step::Reinsert {
				name,
				key,
			} => {
				let node = self.node(&name);
				self.tree.set_key(node, key);
				self.tree.insert(node);
			}
			Step::Remove {
				name,
			} => {
				let node = self.node(&name);
				if self.tree.owner(node) == Ownership::Arena {
					// The handle is recycled by the removal.
					self.nodes.remove(&name);
				}
				self.tree.remove(node);
			}
			Step::Release {
				name,
			} => {
				let node = self.node(&name);
				self.tree.release_node(node);
				self.nodes.remove(&name);
			}
			Step::Search {
				key,
				expect,
			} => self.check(index, "search", self.tree.search_key(key), &expect),
			Step::SearchLeft {
				key,
				expect,
			} => self.check(index, "search_left", self.tree.search_key_left(key), &expect),
			Step::SearchRight {
				key,
				expect,
			} => self.check(index, "search_right", self.tree.search_key_right(key), &expect),
			Step::Left {
				name,
				expect,
			} => {
				let node = self.node(&name);
				self.check(index, "left", self.tree.left(node), &expect);
			}
			Step::Right {
				name,
				expect,
			} => {
				let node = self.node(&name);
				self.check(index, "right", self.tree.right(node), &expect);
			}
			Step::Walk {
				expect,
			} => {
				let mut walked = Vec::new();
				self.tree.walk(|node| walked.push(node));
				let walked: Vec<String> =
					walked.into_iter().filter_map(|node| self.name_of(Some(node))).collect();
				assert_eq!(walked, expect, "[{}] step {}: post-order walk", self.name, index);
			}
			Step::Keys {
				expect,
			} => {
				let keys: Vec<i64> = self.tree.iter().map(|node| self.tree.key(node)).collect();
				assert_eq!(keys, expect, "[{}] step {}: in-order keys", self.name, index);
			}
			Step::Len {
				expect,
			} => assert_eq!(self.tree.len(), expect, "[{}] step {}: len", self.name, index),
			Step::Clear => {
				// Arena-owned handles are recycled; caller-owned ones stay valid.
				let tree = &self.tree;
				self.nodes.retain(|_, node| tree.owner(*node) == Ownership::Caller);
				self.tree.clear();
			}
			Step::Clean => {
				self.tree.clean();
				self.nodes.clear();
			}
			Step::Check => self.tree.assert_invariants(),
		}
	}
}

fn replay(script: Script) -> Replay {
	let mut options = Options::new();
	if let Some(capacity) = script.initial_capacity {
		options = options.with_initial_capacity(capacity);
	}

	let mut replay = Replay {
		tree: SlabTree::with_options(script.payload_size, options).expect("failed to build tree"),
		name: script.name,
		nodes: HashMap::new(),
	};
	for (index, step) in script.steps.into_iter().enumerate() {
		replay.apply(index, step);
	}
	replay.tree.assert_invariants();
	replay
}

/// Loads every script in the fixture file at `path` and replays it, panicking
/// at the first step whose expectation does not hold.
pub fn replay_scripts<P: AsRef<std::path::Path>>(path: P) -> Vec<Replay> {
	let file = std::fs::File::open(path).expect("failed to find file");
	let scripts: ScriptFile = serde_json::from_reader(file).unwrap();
	scripts.scripts.into_iter().map(replay).collect()
}
