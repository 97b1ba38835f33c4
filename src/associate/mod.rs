use std::sync::Arc;

use tokio::{sync::{mpsc::Sender, oneshot}, time::sleep};
use tracing::{debug, instrument};

use crate::{
	ChordValue,
	adaptor::ChordAdaptor,
	chord::{
		ProcessorId,
		message::{Inbound, LookupStep, Message, PrivateMessage, PublicMessage, Reply},
		state::NodeSnapshot,
	},
	chord_id::{ChordId, IdentifierSpace},
	config::ChordConfig,
	error::{ChordError, Result},
	hasher::KeyHasher,
};

mod membership;
mod stabilize;


/// A client bound to one node. It drives the multi-step Chord procedures
/// (lookups, joins, leaves, stabilization) by sending single-step requests
/// to its own node and to peers, so no node processor ever waits on another.
pub struct Associate<V: ChordValue, ADAPTOR: ChordAdaptor<V>>{
	self_id: ChordId,
	space: IdentifierSpace,
	config: Arc<ChordConfig>,
	hasher: Arc<dyn KeyHasher>,
	adaptor: ADAPTOR,
	to: Sender<Inbound<V>>,
}

impl<V: ChordValue, ADAPTOR: ChordAdaptor<V>> Clone for Associate<V, ADAPTOR> {
	fn clone(&self) -> Self {
		Associate {
			self_id: self.self_id,
			space: self.space,
			config: self.config.clone(),
			hasher: self.hasher.clone(),
			adaptor: self.adaptor.clone(),
			to: self.to.clone(),
		}
	}
}

impl<V: ChordValue, ADAPTOR: ChordAdaptor<V>> Associate<V, ADAPTOR> {

	pub(crate) fn new(self_id: ChordId, space: IdentifierSpace, config: Arc<ChordConfig>, hasher: Arc<dyn KeyHasher>, adaptor: ADAPTOR, to: Sender<Inbound<V>>) -> Self{
		Associate {
			self_id,
			space,
			config,
			hasher,
			adaptor,
			to,
		}
	}

	pub fn id(&self) -> ChordId {
		self.self_id
	}

	pub fn space(&self) -> IdentifierSpace {
		self.space
	}

	pub(crate) fn adaptor(&self) -> &ADAPTOR {
		&self.adaptor
	}

	/// Place a string key on the ring.
	pub fn hash(&self, key: &str) -> ChordId {
		self.hasher.hash_key(key.as_bytes(), &self.space)
	}

	// ===== Transport =====

	/// Send a request to our own node.
	async fn local(&self, message: Message<V>) -> Result<Reply<V>> {
		let (reply_tx, reply_rx) = oneshot::channel();
		self.to
			.send((ProcessorId::Internal, message, reply_tx))
			.await
			.map_err(|_| ChordError::Departed(self.self_id))?;
		let reply = reply_rx.await.map_err(|_| ChordError::Departed(self.self_id))?;
		match reply {
			Reply::Refused { reason } => Err(reason.into_error(self.self_id)),
			reply => Ok(reply),
		}
	}

	async fn private(&self, message: PrivateMessage) -> Result<Reply<V>> {
		self.local(message.into()).await
	}

	/// Send a request to node `to` as a ring member. Our own node is reached
	/// the same way, so it sees us as a peer.
	async fn remote(&self, to: ChordId, message: PublicMessage<V>) -> Result<Reply<V>> {
		let reply = self.adaptor
			.call(ProcessorId::Member(self.self_id), to, message.into(), self.config.call_timeout())
			.await?;
		match reply {
			Reply::Refused { reason } => Err(reason.into_error(to)),
			reply => Ok(reply),
		}
	}

	/// Route a public request to `to`, short-circuiting through our own
	/// channel when `to` is this node.
	async fn ask(&self, to: ChordId, message: PublicMessage<V>) -> Result<Reply<V>> {
		if to == self.self_id {
			self.local(message.into()).await
		} else {
			self.remote(to, message).await
		}
	}

	fn changed(reply: Reply<V>, request: &'static str) -> Result<bool> {
		match reply {
			Reply::Changed { changed } => Ok(changed),
			Reply::Ack => Ok(false),
			other => Err(other.unexpected(request)),
		}
	}

	/// Errors that concern this node itself rather than the ring; retrying
	/// will not help.
	fn is_own_failure(&self, err: &ChordError) -> bool {
		match err {
			ChordError::Departed(id) | ChordError::NotJoined(id) | ChordError::AlreadyJoined(id) => *id == self.self_id,
			_ => false,
		}
	}

	/// Decide whether `err` is worth another attempt. Waits out the backoff and
	/// returns Ok to retry; returns the final error once the budget is spent.
	async fn back_off(&self, id: ChordId, err: ChordError, attempt: &mut u32) -> Result<()> {
		if self.is_own_failure(&err) || !err.is_transient() {
			return Err(err);
		}
		if *attempt >= self.config.routing_retries {
			return Err(ChordError::RoutingFailure {
				id,
				reason: format!("{} (gave up after {} attempts)", err, *attempt + 1),
			});
		}
		*attempt += 1;
		debug!("Node {} retrying {} after: {}", self.self_id, id, err);
		sleep(self.config.retry_backoff()).await;
		Ok(())
	}

	// ===== State Operations =====

	/// Ask our own node for its identifier.
	pub async fn node_id(&self) -> Result<ChordId> {
		match self.local(PublicMessage::GetID.into()).await? {
			Reply::ID { id } => Ok(id),
			other => Err(other.unexpected("GetID")),
		}
	}

	pub async fn successor(&self) -> Result<ChordId> {
		match self.local(PublicMessage::GetSuccessor.into()).await? {
			Reply::Successor { succ } => Ok(succ),
			other => Err(other.unexpected("GetSuccessor")),
		}
	}

	pub async fn predecessor(&self) -> Result<Option<ChordId>> {
		match self.local(PublicMessage::GetPredecessor.into()).await? {
			Reply::Predecessor { pred } => Ok(pred),
			other => Err(other.unexpected("GetPredecessor")),
		}
	}

	pub async fn predecessor_of(&self, node: ChordId) -> Result<Option<ChordId>> {
		match self.remote(node, PublicMessage::GetPredecessor).await? {
			Reply::Predecessor { pred } => Ok(pred),
			other => Err(other.unexpected("GetPredecessor")),
		}
	}

	/// Liveness check with the configured ping timeout.
	pub async fn ping(&self, node: ChordId) -> Result<()> {
		let reply = self.adaptor
			.call(ProcessorId::Member(self.self_id), node, PublicMessage::Ping.into(), self.config.ping_timeout())
			.await?;
		match reply {
			Reply::Pong => Ok(()),
			Reply::Refused { reason } => Err(reason.into_error(node)),
			other => Err(other.unexpected("Ping")),
		}
	}

	pub async fn snapshot(&self) -> Result<NodeSnapshot<V>> {
		match self.private(PrivateMessage::Snapshot).await? {
			Reply::Snapshot { snapshot } => Ok(snapshot),
			other => Err(other.unexpected("Snapshot")),
		}
	}

	// ===== Routing =====

	/// Find the node responsible for `id`, retrying transient routing
	/// failures up to the configured budget.
	#[instrument(skip(self), fields(node = %self.self_id))]
	pub async fn find_successor(&self, id: ChordId) -> Result<ChordId> {
		let mut attempt = 0;
		loop{
			match self.lookup_from(self.self_id, id).await {
				Ok(owner) => return Ok(owner),
				Err(e) => self.back_off(id, e, &mut attempt).await?,
			}
		}
	}

	/// Walk the ring from `start` towards the owner of `id`, one hop per
	/// request. An unreachable hop is routed around by stepping back and
	/// asking the previous node for another preceding finger.
	pub(crate) async fn lookup_from(&self, start: ChordId, id: ChordId) -> Result<ChordId> {
		let limit = self.config.hop_limit();
		let mut path = vec![start];
		let mut avoid: Vec<ChordId> = Vec::new();
		let mut hops = 0;

		while let Some(&current) = path.last() {
			if hops > limit {
				return Err(ChordError::RoutingFailure {
					id,
					reason: format!("exceeded {} hops", limit),
				});
			}
			let step = self.ask(current, PublicMessage::FindSuccessor { id, avoid: avoid.clone() }).await;
			match step {
				Ok(Reply::Step { step: LookupStep::Owner(owner) }) => {
					debug!("Lookup of {} from {} resolved to {} in {} hops", id, start, owner, hops);
					return Ok(owner);
				},
				Ok(Reply::Step { step: LookupStep::Forward(next) }) => {
					path.push(next);
					hops += 1;
				},
				Ok(other) => return Err(other.unexpected("FindSuccessor")),
				Err(e) if path.len() > 1 && e.is_transient() => {
					debug!("Lookup of {} stepping back from {}: {}", id, current, e);
					path.pop();
					avoid.push(current);
					hops += 1;
					if matches!(e, ChordError::PeerUnreachable(_) | ChordError::Departed(_)) {
						// best effort, our own node may be mid-join
						let _ = self.private(PrivateMessage::ForgetNode { id: current }).await;
					}
				},
				Err(e) => return Err(e),
			}
		}

		Err(ChordError::RoutingFailure {
			id,
			reason: "no reachable route".to_string(),
		})
	}

	// ===== Data Operations =====

	/// Store `value` under the identifier of `key`. Returns the node that now holds it.
	pub async fn put(&self, key: &str, value: V) -> Result<ChordId> {
		self.put_id(self.hash(key), value).await
	}

	/// Read the value stored under the identifier of `key`.
	pub async fn get(&self, key: &str) -> Result<V> {
		self.get_id(self.hash(key)).await
	}

	#[instrument(skip(self, value), fields(node = %self.self_id))]
	pub async fn put_id(&self, key: ChordId, value: V) -> Result<ChordId> {
		let mut attempt = 0;
		loop{
			match self.store_at_owner(key, value.clone()).await {
				Ok(owner) => return Ok(owner),
				Err(e) => self.back_off(key, e, &mut attempt).await?,
			}
		}
	}

	#[instrument(skip(self), fields(node = %self.self_id))]
	pub async fn get_id(&self, key: ChordId) -> Result<V> {
		let mut attempt = 0;
		loop{
			match self.fetch_from_owner(key).await {
				Ok(Some(value)) => return Ok(value),
				Ok(None) => return Err(ChordError::NotFound(key)),
				Err(e) => self.back_off(key, e, &mut attempt).await?,
			}
		}
	}

	async fn store_at_owner(&self, key: ChordId, value: V) -> Result<ChordId> {
		match self.ask_owner(key, PublicMessage::Put { key, value }).await? {
			(owner, Reply::Ack) => Ok(owner),
			(_, other) => Err(other.unexpected("Put")),
		}
	}

	async fn fetch_from_owner(&self, key: ChordId) -> Result<Option<V>> {
		match self.ask_owner(key, PublicMessage::Get { key }).await? {
			(_, Reply::Value { value }) => Ok(value),
			(_, other) => Err(other.unexpected("Get")),
		}
	}

	/// Deliver a keyed request to the owner of `key`. A node that already
	/// handed the key's range to a newly joined predecessor refuses it before
	/// the ring has stabilized, so the request follows predecessors back
	/// until one accepts.
	async fn ask_owner(&self, key: ChordId, message: PublicMessage<V>) -> Result<(ChordId, Reply<V>)> {
		let mut owner = self.lookup_from(self.self_id, key).await?;
		for _ in 0..=self.config.hop_limit() {
			let refused = match self.ask(owner, message.clone()).await {
				Err(ChordError::NotOwner(refused)) => refused,
				Ok(reply) => return Ok((owner, reply)),
				Err(e) => return Err(e),
			};
			owner = match self.ask(refused, PublicMessage::GetPredecessor).await? {
				Reply::Predecessor { pred: Some(pred) } if pred != refused => pred,
				Reply::Predecessor { .. } => return Err(ChordError::NotOwner(refused)),
				other => return Err(other.unexpected("GetPredecessor")),
			};
			debug!("Node {} redirected from {} to {} for {}", self.self_id, refused, owner, key);
		}
		Err(ChordError::RoutingFailure {
			id: key,
			reason: "too many ownership redirects".to_string(),
		})
	}
}
