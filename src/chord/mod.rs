use crate::{
	ChordValue,
	adaptor::ChordAdaptor,
	associate::Associate,
	chord_id::{ChordId, IdentifierSpace},
	config::ChordConfig,
	error::{ChordError, Result},
	finger_table::FingerTable,
	hasher::{KeyHasher, Sha256Hasher},
};

use std::{collections::{BTreeMap, BTreeSet}, fmt::Debug, sync::Arc};

use tokio::sync::mpsc::{channel, Sender, Receiver};
use tokio::task::JoinHandle;
use tokio::time::interval;

use serde::{Serialize, Deserialize};
use tracing::{debug, info, warn};


pub mod message;
pub mod state;

mod private_ops;
mod public_ops;

use self::message::{Inbound, Message, Reply};
use self::state::{NodeSnapshot, NodeState};

/// Identifies who sent a message to a node processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProcessorId{
	/// The node's own driver. Only it may issue private operations.
	Internal,
	/// Another ring member with the provided id.
	Member(ChordId),
}

/// The Chord node itself. This struct acts like a builder in that it is
/// created and configured before being consumed by the start method, which
/// then returns a ChordHandle.
///
/// Once started, the node's pointers, finger table and store are owned by a
/// single processor task, so every request is applied as one unit.
pub struct Chord<V: ChordValue, ADAPTOR: ChordAdaptor<V>>{
	// Core data
	self_id: ChordId,
	space: IdentifierSpace,
	state: NodeState,
	predecessor: Option<ChordId>,
	fingers: FingerTable,
	store: BTreeMap<ChordId, V>,
	// newcomers that copied keys from us and have not released them yet
	handed_off: BTreeSet<ChordId>,
	finger_index: u32,

	// Connections
	adaptor: ADAPTOR,
	config: Arc<ChordConfig>,
	hasher: Arc<dyn KeyHasher>,

	// Operations channel
	channel_rx: Receiver<Inbound<V>>,
	channel_tx: Sender<Inbound<V>>,
}

impl<V: ChordValue, ADAPTOR: ChordAdaptor<V>> Debug for Chord<V, ADAPTOR> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Chord")
			.field("self_id", &self.self_id)
			.field("state", &self.state)
			.field("predecessor", &self.predecessor)
			.field("successor", &self.fingers.successor())
			.field("keys", &self.store.len())
			.finish()
	}
}

impl<V: ChordValue, ADAPTOR: ChordAdaptor<V>> Chord<V, ADAPTOR>{

	/// Creates a new, unjoined node with the provided id. The adaptor is the
	/// registry through which this node and its peers reach each other.
	pub fn new(self_id: ChordId, config: ChordConfig, adaptor: ADAPTOR) -> Result<Self>{
		config.validate()?;
		let space = config.space()?;
		if !space.contains(self_id) {
			return Err(ChordError::InvalidConfig(format!(
				"node id {} does not fit in a {}-bit identifier space",
				self_id,
				space.bits()
			)));
		}
		let (channel_tx, channel_rx) = channel(config.channel_capacity);

		Ok(Chord{
			// Core data
			self_id,
			space,
			state: NodeState::Unjoined,
			predecessor: None,
			fingers: FingerTable::new(self_id, space),
			store: BTreeMap::new(),
			handed_off: BTreeSet::new(),
			// slot 0 is the successor, kept by stabilize
			finger_index: 1,

			// Connections
			adaptor,
			config: Arc::new(config),
			hasher: Arc::new(Sha256Hasher),

			// Operations channel
			channel_rx,
			channel_tx,
		})
	}

	/// Replace the hash function used to place string keys on the ring.
	pub fn set_hasher(&mut self, hasher: Arc<dyn KeyHasher>){
		self.hasher = hasher;
	}

	pub fn id(&self) -> ChordId {
		self.self_id
	}

	fn associate(&self) -> Associate<V, ADAPTOR> {
		Associate::new(
			self.self_id,
			self.space,
			self.config.clone(),
			self.hasher.clone(),
			self.adaptor.clone(),
			self.channel_tx.clone(),
		)
	}

	/// Registers the node with its adaptor and spawns its processor, without
	/// joining any ring. The node answers only pings until joined.
	pub async fn spawn(mut self) -> Result<ChordHandle<V, ADAPTOR>> {
		self.adaptor.register(self.self_id, self.channel_tx.clone()).await?;

		let associate = self.associate();
		let self_id = self.self_id;
		let maintenance_period = self.config.maintenance_interval();

		// Spawn operation task
		let processor_handle = tokio::spawn(async move{
			while let Some((id, operation, reply)) = self.channel_rx.recv().await{
				debug!("Node {} processing message from {:?}: {:?}", self.self_id, id, operation);
				let result = match operation{
					Message::Private(operation) => {
						self.process_private(id, operation)
					},
					Message::Public(operation) => {
						self.process_public(id, operation)
					},
				};
				// the caller may have given up waiting
				let _ = reply.send(result);
			}
			info!("processor for node {} terminating", self.self_id);
		});

		// Start maintenance task
		let maintenance_handle = maintenance_period.map(|period| {
			let maintainer = associate.clone();
			tokio::spawn(async move{
				let mut interval = interval(period);
				loop{
					interval.tick().await;
					match maintainer.maintain().await {
						Ok(_) => {},
						Err(ChordError::NotJoined(_)) => {},
						Err(ChordError::Departed(_)) => break,
						Err(e) => warn!("maintenance of node {} failed: {}", maintainer.id(), e),
					}
				}
			})
		});

		info!("Node {} started", self_id);
		Ok(ChordHandle{
			self_id,
			processor_handle,
			maintenance_handle,
			associate,
		})
	}

	/// Starts the node and joins it to the ring containing `join_id`, or
	/// creates a new ring when given None. A node that cannot join is shut
	/// down again and the error returned.
	pub async fn start(self, join_id: Option<ChordId>) -> Result<ChordHandle<V, ADAPTOR>> {
		let handle = self.spawn().await?;
		match handle.associate.join(join_id).await {
			Ok(()) => Ok(handle),
			Err(e) => {
				warn!("Node {} failed to join: {}", handle.self_id, e);
				handle.stop().await;
				Err(e)
			},
		}
	}

	/// True if `key` lies in this node's sector `(predecessor, self]`.
	/// Without a known predecessor the node cannot rule anything out.
	fn in_this_sector(&self, key: ChordId) -> bool {
		match self.predecessor {
			Some(predecessor) => self.space.in_interval(key, predecessor, self.self_id, true),
			None => true,
		}
	}

	fn snapshot(&self) -> NodeSnapshot<V> {
		NodeSnapshot {
			id: self.self_id,
			state: self.state,
			successor: self.fingers.successor(),
			predecessor: self.predecessor,
			fingers: self.fingers.entries().to_vec(),
			store: self.store.iter().map(|(k, v)| (*k, v.clone())).collect(),
		}
	}

	fn refuse(&self, reason: message::Refusal) -> Reply<V> {
		Reply::Refused{ reason }
	}
}



/// A ChordHandle represents a started node.
pub struct ChordHandle<V: ChordValue, ADAPTOR: ChordAdaptor<V>>{
	self_id: ChordId,
	processor_handle: JoinHandle<()>,
	maintenance_handle: Option<JoinHandle<()>>,

	associate: Associate<V, ADAPTOR>,
}

impl<V: ChordValue, ADAPTOR: ChordAdaptor<V>> ChordHandle<V, ADAPTOR> {
	pub fn id(&self) -> ChordId {
		self.self_id
	}

	/// Get a new Associate bound to the underlying node.
	pub fn get_associate(&self) -> Associate<V, ADAPTOR>{
		self.associate.clone()
	}

	/// Abort the node's tasks without running the leave protocol, as if the
	/// process had died. Peers find out through failed calls.
	pub fn crash(&self){
		if let Some(handle) = &self.maintenance_handle {
			handle.abort();
		}
		self.processor_handle.abort();
	}

	/// Force the node to stop and remove it from the adaptor.
	pub async fn stop(self){
		if let Some(handle) = self.maintenance_handle {
			handle.abort();
			let _ = handle.await;
		}
		self.processor_handle.abort();
		let _ = self.processor_handle.await;
		self.associate.adaptor().deregister(self.self_id).await;
	}
}
