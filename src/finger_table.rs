use serde::{Serialize, Deserialize};

use crate::chord_id::{ChordId, IdentifierSpace};

/// A single routing shortcut: the best known owner of `start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FingerEntry {
	pub start: ChordId,
	pub node: ChordId,
}

/// The `m` exponentially spaced shortcuts of one node. Slot 0 is the node's
/// successor; there is no separate successor field to fall out of sync with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FingerTable {
	owner: ChordId,
	space: IdentifierSpace,
	entries: Vec<FingerEntry>,
}

impl FingerTable {
	/// A table where every slot points back at the owner, the state of a sole ring member.
	pub fn new(owner: ChordId, space: IdentifierSpace) -> Self {
		let entries = (0..space.bits())
			.map(|i| FingerEntry {
				start: space.finger_start(owner, i),
				node: owner,
			})
			.collect();
		FingerTable { owner, space, entries }
	}

	pub fn entries(&self) -> &[FingerEntry] {
		&self.entries
	}

	pub fn start(&self, index: usize) -> Option<ChordId> {
		self.entries.get(index).map(|e| e.start)
	}

	pub fn successor(&self) -> ChordId {
		self.entries.first().map_or(self.owner, |e| e.node)
	}

	pub fn set_successor(&mut self, node: ChordId) -> bool {
		self.set(0, node)
	}

	/// Unconditionally point slot `index` at `node`. Returns whether anything changed.
	pub fn set(&mut self, index: usize, node: ChordId) -> bool {
		match self.entries.get_mut(index) {
			Some(entry) if entry.node != node => {
				entry.node = node;
				true
			},
			_ => false,
		}
	}

	/// Replace every slot with the nodes resolved for each start, in slot order.
	/// Missing trailing slots keep their current node.
	pub fn install(&mut self, nodes: &[ChordId]) {
		for (entry, node) in self.entries.iter_mut().zip(nodes) {
			entry.node = *node;
		}
	}

	/// Move slot `index` to `candidate` if the candidate still succeeds the
	/// slot's start and is closer to it than the current node. Pointers only
	/// ever move closer here. Returns whether a change occurred.
	pub fn update(&mut self, index: usize, candidate: ChordId) -> bool {
		let space = self.space;
		match self.entries.get_mut(index) {
			Some(entry) => {
				let closer = if entry.node == self.owner {
					// self is the furthest possible owner of any start
					space.in_closed_open(candidate, entry.start, self.owner)
				} else {
					space.in_closed_open(candidate, entry.start, entry.node)
				};
				if closer && candidate != entry.node {
					entry.node = candidate;
					true
				} else {
					false
				}
			},
			None => false,
		}
	}

	/// Offer `candidate` to every slot. Returns whether any slot changed.
	pub fn observe(&mut self, candidate: ChordId) -> bool {
		let mut changed = false;
		for index in 0..self.entries.len() {
			changed |= self.update(index, candidate);
		}
		changed
	}

	/// Scans slots from `m-1` down to `0` for the first node strictly between
	/// the owner and `key`, skipping any in `avoid`. Falls back to the owner.
	pub fn closest_preceding_node(&self, key: ChordId, avoid: &[ChordId]) -> ChordId {
		self.entries
			.iter()
			.rev()
			.map(|e| e.node)
			.find(|node| !avoid.contains(node) && self.space.in_interval(*node, self.owner, key, false))
			.unwrap_or(self.owner)
	}

	/// Drop every reference to `dead`. A slot that pointed at it takes the next
	/// live node further along the table, or the owner if none remains.
	pub fn forget(&mut self, dead: ChordId) -> bool {
		let mut changed = false;
		for index in (0..self.entries.len()).rev() {
			if self.entries[index].node != dead {
				continue;
			}
			let replacement = self.entries[index + 1..]
				.iter()
				.map(|e| e.node)
				.find(|node| *node != dead)
				.unwrap_or(self.owner);
			self.entries[index].node = replacement;
			changed = true;
		}
		changed
	}
}
