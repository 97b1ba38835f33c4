use serde::{Serialize, Deserialize};

use crate::{ChordValue, chord_id::ChordId, finger_table::FingerEntry};

/// Membership lifecycle of a node: `Unjoined -> Joined -> Departed`.
/// `Leaving` covers the hand-off window of a graceful leave.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeState {
	Unjoined,
	Joined,
	Leaving,
	Departed,
}

/// A point-in-time view of one node, used for status reporting and for
/// checking ring-wide properties from the outside.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct NodeSnapshot<V: ChordValue> {
	pub id: ChordId,
	pub state: NodeState,
	pub successor: ChordId,
	pub predecessor: Option<ChordId>,
	pub fingers: Vec<FingerEntry>,
	pub store: Vec<(ChordId, V)>,
}

impl<V: ChordValue> NodeSnapshot<V> {
	pub fn holds(&self, key: ChordId) -> bool {
		self.store.iter().any(|(k, _)| *k == key)
	}

	pub fn keys(&self) -> Vec<ChordId> {
		self.store.iter().map(|(k, _)| *k).collect()
	}
}
