use std::{collections::HashMap, sync::Arc, time::Duration};

use tokio::{sync::{mpsc::Sender, oneshot, RwLock}, time::timeout};
use tracing::{debug, instrument};

use super::ChordAdaptor;
use crate::{
	ChordValue,
	chord_id::ChordId,
	chord::{ProcessorId, message::{Inbound, Message, Reply}},
	error::{ChordError, Result},
};

/// An in-process ChordAdaptor: a shared registry mapping identifiers to the
/// channels of node processors running in the same runtime.
#[derive(Debug)]
pub struct LocalAdaptor<V: ChordValue>{
	members: Arc<RwLock<HashMap<ChordId, Sender<Inbound<V>>>>>,
}

impl<V: ChordValue> Clone for LocalAdaptor<V> {
	fn clone(&self) -> Self {
		LocalAdaptor {
			members: self.members.clone(),
		}
	}
}

impl<V: ChordValue> Default for LocalAdaptor<V> {
	fn default() -> Self {
		Self::new()
	}
}

impl<V: ChordValue> LocalAdaptor<V> {
	pub fn new() -> Self {
		LocalAdaptor {
			members: Arc::new(RwLock::new(HashMap::new())),
		}
	}

	/// Identifiers of every registered node, in no particular order.
	pub async fn member_ids(&self) -> Vec<ChordId> {
		self.members.read().await.keys().copied().collect()
	}
}

impl<V: ChordValue> ChordAdaptor<V> for LocalAdaptor<V> {

	async fn register(&self, id: ChordId, conn: Sender<Inbound<V>>) -> Result<()> {
		let mut members = self.members.write().await;
		if let Some(existing) = members.get(&id) {
			if !existing.is_closed() {
				return Err(ChordError::IdInUse(id));
			}
		}
		members.insert(id, conn);
		Ok(())
	}

	async fn deregister(&self, id: ChordId) {
		self.members.write().await.remove(&id);
	}

	#[instrument(skip(self, message), level = "trace")]
	async fn call(&self, from: ProcessorId, to: ChordId, message: Message<V>, limit: Duration) -> Result<Reply<V>> {
		let conn = match self.members.read().await.get(&to) {
			Some(conn) => conn.clone(),
			None => return Err(ChordError::PeerUnreachable(to)),
		};

		let (reply_tx, reply_rx) = oneshot::channel();
		let exchange = async move {
			conn.send((from, message, reply_tx)).await.ok()?;
			reply_rx.await.ok()
		};
		match timeout(limit, exchange).await {
			Ok(Some(reply)) => Ok(reply),
			Ok(None) => {
				debug!("node {} dropped the request", to);
				Err(ChordError::PeerUnreachable(to))
			},
			Err(_) => {
				debug!("node {} did not answer within {:?}", to, limit);
				Err(ChordError::PeerUnreachable(to))
			},
		}
	}
}
