//! A driver-side view of a whole ring running in one process.
//!
//! The ring itself has no coordinator; this type only creates nodes, triggers
//! their membership changes and maintenance, and checks ring-wide properties
//! from the outside by reading each node's snapshot.

use std::{collections::{BTreeMap, BTreeSet}, sync::Arc};

use tracing::{debug, info, warn};

use crate::{
	ChordValue,
	adaptor::local_adaptor::LocalAdaptor,
	associate::Associate,
	chord::{ChordHandle, state::{NodeSnapshot, NodeState}},
	chord_id::{ChordId, IdentifierSpace},
	config::ChordConfig,
	error::{ChordError, Result},
	hasher::{KeyHasher, Sha256Hasher},
	Chord,
};

pub type LocalAssociate<V> = Associate<V, LocalAdaptor<V>>;

pub struct Ring<V: ChordValue>{
	config: ChordConfig,
	space: IdentifierSpace,
	adaptor: LocalAdaptor<V>,
	hasher: Arc<dyn KeyHasher>,
	nodes: BTreeMap<ChordId, ChordHandle<V, LocalAdaptor<V>>>,
}

impl<V: ChordValue> Ring<V>{

	pub fn new(config: ChordConfig) -> Result<Self> {
		Self::with_hasher(config, Arc::new(Sha256Hasher))
	}

	pub fn with_hasher(config: ChordConfig, hasher: Arc<dyn KeyHasher>) -> Result<Self> {
		config.validate()?;
		let space = config.space()?;
		Ok(Ring{
			config,
			space,
			adaptor: LocalAdaptor::new(),
			hasher,
			nodes: BTreeMap::new(),
		})
	}

	pub fn space(&self) -> IdentifierSpace {
		self.space
	}

	pub fn adaptor(&self) -> &LocalAdaptor<V> {
		&self.adaptor
	}

	/// Identifiers of the nodes this driver believes are live, ascending.
	pub fn ids(&self) -> Vec<ChordId> {
		self.nodes.keys().copied().collect()
	}

	pub fn len(&self) -> usize {
		self.nodes.len()
	}

	pub fn is_empty(&self) -> bool {
		self.nodes.is_empty()
	}

	pub fn node(&self, id: impl Into<ChordId>) -> Option<LocalAssociate<V>> {
		self.nodes.get(&id.into()).map(|handle| handle.get_associate())
	}

	/// Create a node and join it through the lowest live node, or create the
	/// ring if there is none.
	pub async fn add_node(&mut self, id: impl Into<ChordId>) -> Result<LocalAssociate<V>> {
		let seed = self.nodes.keys().next().copied();
		self.add_node_via(id, seed).await
	}

	/// Create a node and join it through `seed`.
	pub async fn add_node_via(&mut self, id: impl Into<ChordId>, seed: Option<ChordId>) -> Result<LocalAssociate<V>> {
		let id = id.into();
		if self.nodes.contains_key(&id) {
			return Err(ChordError::IdInUse(id));
		}
		let mut chord = Chord::new(id, self.config.clone(), self.adaptor.clone())?;
		chord.set_hasher(self.hasher.clone());
		let handle = chord.start(seed).await?;
		let associate = handle.get_associate();
		self.nodes.insert(id, handle);
		info!("Ring now has {} nodes", self.nodes.len());
		Ok(associate)
	}

	/// Gracefully remove a node: it leaves the ring and its tasks are stopped.
	/// A node whose hand-off failed stays in the ring, keys and all.
	pub async fn remove_node(&mut self, id: impl Into<ChordId>) -> Result<()> {
		let id = id.into();
		let handle = self.nodes.remove(&id).ok_or(ChordError::NotJoined(id))?;
		let node = handle.get_associate();
		match node.leave().await {
			Ok(()) => {
				handle.stop().await;
				Ok(())
			},
			Err(e) => {
				let still_joined = matches!(node.snapshot().await, Ok(snapshot) if snapshot.state == NodeState::Joined);
				if still_joined {
					warn!("Node {} could not leave and stays in the ring: {}", id, e);
					self.nodes.insert(id, handle);
				} else {
					handle.stop().await;
				}
				Err(e)
			},
		}
	}

	/// Kill a node without letting it leave.
	pub async fn crash_node(&mut self, id: impl Into<ChordId>) -> Result<()> {
		let id = id.into();
		let handle = self.nodes.remove(&id).ok_or(ChordError::NotJoined(id))?;
		handle.crash();
		handle.stop().await;
		Ok(())
	}

	/// One stabilization round across every node, in identifier order:
	/// stabilize, check_predecessor, and a full finger refresh.
	/// Returns whether any node's own pointers changed.
	pub async fn stabilize_round(&self) -> Result<bool> {
		let mut changed = false;
		for handle in self.nodes.values() {
			let node = handle.get_associate();
			changed |= node.stabilize().await?;
			changed |= node.check_predecessor().await?;
			changed |= node.refresh_fingers().await?;
		}
		Ok(changed)
	}

	pub async fn stabilize_rounds(&self, rounds: usize) -> Result<()> {
		for _ in 0..rounds {
			self.stabilize_round().await?;
		}
		Ok(())
	}

	/// Run rounds until every ring property holds, up to `max_rounds`.
	/// Returns the number of rounds it took.
	pub async fn converge(&self, max_rounds: usize) -> Result<usize> {
		for round in 0..=max_rounds {
			if self.check().await.is_ok() {
				debug!("Ring converged after {} rounds", round);
				return Ok(round);
			}
			if round < max_rounds {
				self.stabilize_round().await?;
			}
		}
		self.check().await.map(|_| max_rounds)
	}

	pub async fn snapshots(&self) -> Result<Vec<NodeSnapshot<V>>> {
		let mut snapshots = Vec::with_capacity(self.nodes.len());
		for handle in self.nodes.values() {
			snapshots.push(handle.get_associate().snapshot().await?);
		}
		Ok(snapshots)
	}

	/// Owner of `key` among the live nodes: the first node at or after it.
	pub fn owner_of(&self, key: ChordId) -> Option<ChordId> {
		self.nodes
			.range(key..)
			.next()
			.or_else(|| self.nodes.iter().next())
			.map(|(id, _)| *id)
	}

	pub async fn total_keys(&self) -> Result<usize> {
		Ok(self.snapshots().await?.iter().map(|s| s.store.len()).sum())
	}

	/// Every ring property: closure, predecessor agreement, key ownership and
	/// finger correctness.
	pub async fn check(&self) -> Result<()> {
		let snapshots = self.snapshots().await?;
		self.check_ring(&snapshots)?;
		self.check_ownership(&snapshots)?;
		self.check_fingers(&snapshots)
	}

	/// Following successors visits every live node exactly once before
	/// coming back, and predecessors mirror successors.
	pub fn check_ring(&self, snapshots: &[NodeSnapshot<V>]) -> Result<()> {
		let by_id: BTreeMap<ChordId, &NodeSnapshot<V>> = snapshots.iter().map(|s| (s.id, s)).collect();
		let ids: Vec<ChordId> = by_id.keys().copied().collect();
		let Some(&first) = ids.first() else {
			return Ok(());
		};

		let mut seen = BTreeSet::new();
		let mut current = first;
		for _ in 0..ids.len() {
			if !seen.insert(current) {
				return Err(ChordError::InvariantViolation(format!("successor cycle revisits {} early", current)));
			}
			current = match by_id.get(&current) {
				Some(snapshot) => snapshot.successor,
				None => return Err(ChordError::InvariantViolation(format!("successor {} is not a live node", current))),
			};
		}
		if current != first || seen.len() != ids.len() {
			return Err(ChordError::InvariantViolation(format!("successor walk from {} ended at {}", first, current)));
		}

		for (index, id) in ids.iter().enumerate() {
			let expected_succ = ids[(index + 1) % ids.len()];
			let expected_pred = ids[(index + ids.len() - 1) % ids.len()];
			let snapshot = by_id[id];
			if snapshot.successor != expected_succ {
				return Err(ChordError::InvariantViolation(format!(
					"node {} has successor {}, expected {}", id, snapshot.successor, expected_succ
				)));
			}
			if snapshot.predecessor != Some(expected_pred) {
				return Err(ChordError::InvariantViolation(format!(
					"node {} has predecessor {:?}, expected {}", id, snapshot.predecessor, expected_pred
				)));
			}
			if snapshot.fingers.first().map(|f| f.node) != Some(snapshot.successor) {
				return Err(ChordError::InvariantViolation(format!("node {} finger 0 is not its successor", id)));
			}
		}
		Ok(())
	}

	/// Every stored key lies in its holder's `(predecessor, node]` sector and
	/// no key is held twice.
	pub fn check_ownership(&self, snapshots: &[NodeSnapshot<V>]) -> Result<()> {
		let mut seen = BTreeSet::new();
		for snapshot in snapshots {
			for key in snapshot.keys() {
				if !seen.insert(key) {
					return Err(ChordError::InvariantViolation(format!("key {} is stored twice", key)));
				}
				let owned = match snapshot.predecessor {
					Some(predecessor) => self.space.in_interval(key, predecessor, snapshot.id, true),
					None => false,
				};
				if !owned {
					return Err(ChordError::InvariantViolation(format!(
						"node {} holds key {} outside ({:?}, {}]", snapshot.id, key, snapshot.predecessor, snapshot.id
					)));
				}
			}
		}
		Ok(())
	}

	/// Every finger points at the true owner of its start.
	pub fn check_fingers(&self, snapshots: &[NodeSnapshot<V>]) -> Result<()> {
		for snapshot in snapshots {
			for (index, finger) in snapshot.fingers.iter().enumerate() {
				let expected = self.owner_of(finger.start);
				if Some(finger.node) != expected {
					return Err(ChordError::InvariantViolation(format!(
						"node {} finger {} (start {}) is {}, expected {:?}",
						snapshot.id, index, finger.start, finger.node, expected
					)));
				}
			}
		}
		Ok(())
	}

	/// Stop every node without running the leave protocol.
	pub async fn shutdown(self) {
		for (_, handle) in self.nodes {
			handle.stop().await;
		}
	}
}
