use tracing::{debug, info, instrument, warn};

use crate::{
	ChordValue,
	adaptor::ChordAdaptor,
	chord::{
		message::{PrivateMessage, PublicMessage, Reply},
		state::NodeState,
	},
	chord_id::ChordId,
	error::{ChordError, Result},
};

use super::Associate;


impl<V: ChordValue, ADAPTOR: ChordAdaptor<V>> Associate<V, ADAPTOR> {

	/// Join the ring that `existing` belongs to, or create a new ring when
	/// given None. Other nodes learn about us lazily through stabilization.
	#[instrument(skip(self), fields(node = %self.self_id))]
	pub async fn join(&self, existing: Option<ChordId>) -> Result<()> {
		let seed = match existing {
			Some(seed) if seed != self.self_id => seed,
			_ => {
				return match self.private(PrivateMessage::Create).await? {
					Reply::Ack => Ok(()),
					other => Err(other.unexpected("Create")),
				};
			},
		};

		match self.snapshot().await?.state {
			NodeState::Unjoined => {},
			NodeState::Departed => return Err(ChordError::Departed(self.self_id)),
			_ => return Err(ChordError::AlreadyJoined(self.self_id)),
		}

		info!("Node {} joining through {}", self.self_id, seed);
		let mut attempt = 0;
		let successor = loop{
			match self.lookup_from(seed, self.self_id).await {
				Ok(successor) => break successor,
				Err(e) => self.back_off(self.self_id, e, &mut attempt).await?,
			}
		};
		if successor == self.self_id {
			return Err(ChordError::IdInUse(self.self_id));
		}

		let fingers = self.resolve_fingers(seed, successor).await;
		match self.private(PrivateMessage::Join { fingers }).await? {
			Reply::Ack => {},
			other => return Err(other.unexpected("Join")),
		}

		let moved = self.pull_keys(successor).await?;
		info!("Node {} joined before {}, took over {} keys", self.self_id, successor, moved);
		Ok(())
	}

	/// Resolve each finger start through the bootstrap node. A start that
	/// falls in `[self, finger_{i-1})` is owned by the previous finger and
	/// needs no lookup.
	async fn resolve_fingers(&self, seed: ChordId, successor: ChordId) -> Vec<ChordId> {
		let mut nodes = vec![successor];
		for index in 1..self.space.bits() {
			let start = self.space.finger_start(self.self_id, index);
			let previous = nodes.last().copied().unwrap_or(successor);
			if self.space.in_closed_open(start, self.self_id, previous) {
				nodes.push(previous);
				continue;
			}
			match self.lookup_from(seed, start).await {
				Ok(node) => nodes.push(node),
				Err(e) => {
					// fix_fingers will get to it
					debug!("Node {} could not resolve finger {}: {}", self.self_id, index, e);
					nodes.push(previous);
				},
			}
		}
		nodes
	}

	/// The join-time slice of key migration: copy the keys we now own from
	/// our successor, record them here, then let the successor drop them.
	async fn pull_keys(&self, successor: ChordId) -> Result<usize> {
		let mut attempt = 0;
		let entries = loop{
			match self.remote(successor, PublicMessage::HandOff).await {
				Ok(Reply::Entries { entries }) => break entries,
				Ok(other) => return Err(other.unexpected("HandOff")),
				Err(e) => self.back_off(successor, e, &mut attempt).await?,
			}
		};
		if entries.is_empty() {
			return Ok(0);
		}

		let keys: Vec<ChordId> = entries.iter().map(|(key, _)| *key).collect();
		self.local(PublicMessage::Absorb { entries }.into()).await?;

		let mut attempt = 0;
		loop{
			match self.remote(successor, PublicMessage::Release { keys: keys.clone() }).await {
				Ok(_) => break,
				Err(e) => self.back_off(successor, e, &mut attempt).await?,
			}
		}
		Ok(keys.len())
	}

	/// Gracefully leave the ring: hand every key to the successor, then
	/// splice our predecessor and successor together. The node serves no
	/// further requests afterwards.
	#[instrument(skip(self), fields(node = %self.self_id))]
	pub async fn leave(&self) -> Result<()> {
		let (mut successor, predecessor, entries) = match self.private(PrivateMessage::BeginLeave).await? {
			Reply::Leaving { successor, predecessor, entries } => (successor, predecessor, entries),
			other => return Err(other.unexpected("BeginLeave")),
		};
		info!("Node {} leaving, handing {} keys to {}", self.self_id, entries.len(), successor);

		if successor == self.self_id {
			if !entries.is_empty() {
				warn!("Node {} is the last ring member, dropping {} keys", self.self_id, entries.len());
			}
			self.private(PrivateMessage::Depart).await?;
			self.adaptor.deregister(self.self_id).await;
			return Ok(());
		}

		// The keys are recorded at the successor before we let go of them.
		let mut attempt = 0;
		loop{
			match self.remote(successor, PublicMessage::Absorb { entries: entries.clone() }).await {
				Ok(_) => break,
				Err(e) => {
					if let Err(e) = self.back_off(successor, e, &mut attempt).await {
						let _ = self.private(PrivateMessage::AbortLeave).await;
						return Err(e);
					}
					// a neighbour leaving at the same time may have handed us a new successor
					successor = self.successor().await?;
				},
			}
		}
		self.private(PrivateMessage::Depart).await?;

		if let Some(predecessor) = predecessor.filter(|p| *p != self.self_id) {
			if let Err(e) = self.remote(predecessor, PublicMessage::SuccessorLeaving { successor }).await {
				debug!("Node {} could not reach predecessor {} while leaving: {}", self.self_id, predecessor, e);
			}
		}
		if let Err(e) = self.remote(successor, PublicMessage::PredecessorLeaving { predecessor }).await {
			debug!("Node {} could not reach successor {} while leaving: {}", self.self_id, successor, e);
		}

		self.adaptor.deregister(self.self_id).await;
		info!("Node {} left the ring", self.self_id);
		Ok(())
	}
}
