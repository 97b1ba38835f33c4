use tracing::{debug, info, instrument, warn};

use crate::{
	ChordValue,
	adaptor::ChordAdaptor,
	chord::message::{PrivateMessage, PublicMessage, Reply},
	error::Result,
};

use super::Associate;


impl<V: ChordValue, ADAPTOR: ChordAdaptor<V>> Associate<V, ADAPTOR> {

	/// Stabilize routine has 3 steps, and 2 messages:
	/// 1. ask the successor for its predecessor `x`.
	///     Message: GetPredecessor
	/// 2. if `x` sits between this node and its successor, adopt it as the
	///    new successor.
	/// 3. tell the (possibly new) successor about us.
	///     Message: Notify
	///
	/// Returns whether this node's successor changed. Unreachable peers are
	/// absorbed here; only failures of this node itself are returned.
	#[instrument(skip(self), fields(node = %self.self_id))]
	pub async fn stabilize(&self) -> Result<bool> {
		let successor = self.successor().await?;
		let mut changed = false;

		match self.predecessor_of(successor).await {
			Ok(Some(x)) if x != successor => {
				let reply = self.private(PrivateMessage::OfferSuccessor { candidate: x }).await?;
				changed = Self::changed(reply, "OfferSuccessor")?;
			},
			Ok(_) => {},
			Err(e) => {
				warn!("Node {} lost contact with successor {}: {}", self.self_id, successor, e);
				let reply = self.private(PrivateMessage::ReplaceSuccessor { dead: successor }).await?;
				return Self::changed(reply, "ReplaceSuccessor");
			},
		}

		let successor = self.successor().await?;
		match self.remote(successor, PublicMessage::Notify).await {
			Ok(reply) => {
				if let Reply::Changed { changed: true } = reply {
					debug!("Node {} became the predecessor of {}", self.self_id, successor);
				}
			},
			Err(e) => debug!("Node {} could not notify {}: {}", self.self_id, successor, e),
		}
		Ok(changed)
	}

	/// Refresh one finger slot by routing to its start. Returns whether the
	/// slot changed.
	#[instrument(skip(self), fields(node = %self.self_id))]
	pub async fn fix_fingers(&self) -> Result<bool> {
		let (index, start) = match self.private(PrivateMessage::NextFinger).await? {
			Reply::Finger { index, start } => (index, start),
			other => return Err(other.unexpected("NextFinger")),
		};

		let node = match self.lookup_from(self.self_id, start).await {
			Ok(node) => node,
			Err(e) if self.is_own_failure(&e) => return Err(e),
			Err(e) => {
				debug!("Node {} could not fix finger {}: {}", self.self_id, index, e);
				return Ok(false);
			},
		};
		let reply = self.private(PrivateMessage::FixFinger { index, node }).await?;
		Self::changed(reply, "FixFinger")
	}

	/// Run fix_fingers once per slot, refreshing the whole table.
	pub async fn refresh_fingers(&self) -> Result<bool> {
		let mut changed = false;
		for _ in 0..self.space.bits() {
			changed |= self.fix_fingers().await?;
		}
		Ok(changed)
	}

	/// Clear the predecessor if it no longer answers a ping, so
	/// that a later notify can repopulate it.
	#[instrument(skip(self), fields(node = %self.self_id))]
	pub async fn check_predecessor(&self) -> Result<bool> {
		let predecessor = match self.predecessor().await? {
			Some(predecessor) if predecessor != self.self_id => predecessor,
			_ => return Ok(false),
		};
		match self.ping(predecessor).await {
			Ok(()) => Ok(false),
			Err(e) => {
				info!("Node {} predecessor {} failed a ping: {}", self.self_id, predecessor, e);
				let reply = self.private(PrivateMessage::ClearPredecessor { expected: predecessor }).await?;
				Self::changed(reply, "ClearPredecessor")
			},
		}
	}

	/// One maintenance round: stabilize, check_predecessor and fix_fingers.
	pub async fn maintain(&self) -> Result<bool> {
		let mut changed = self.stabilize().await?;
		changed |= self.check_predecessor().await?;
		changed |= self.fix_fingers().await?;
		Ok(changed)
	}
}
