use std::{future::Future, time::Duration};

use tokio::sync::mpsc::Sender;

use crate::{
	ChordValue,
	chord_id::ChordId,
	chord::{ProcessorId, message::{Inbound, Message, Reply}},
	error::Result,
};

pub mod local_adaptor;


/// The transport seam between nodes. An adaptor resolves identifiers to
/// live node processors and carries one request/reply exchange at a time.
/// Nodes never hold references to each other, only identifiers that are
/// resolved through the adaptor on every call.
pub trait ChordAdaptor<V: ChordValue>: Clone + Send + Sync + 'static {

	/// Make a node processor reachable under `id`. Fails with `IdInUse` if
	/// another live node already holds the identifier.
	fn register(&self, id: ChordId, conn: Sender<Inbound<V>>) -> impl Future<Output = Result<()>> + Send;

	/// Remove a node from the registry; later calls to it are unreachable.
	fn deregister(&self, id: ChordId) -> impl Future<Output = ()> + Send;

	/// Deliver `message` to node `to` on behalf of `from` and wait at most
	/// `limit` for the reply. A missing, closed, or slow node is reported
	/// as `PeerUnreachable`.
	fn call(&self, from: ProcessorId, to: ChordId, message: Message<V>, limit: Duration) -> impl Future<Output = Result<Reply<V>>> + Send;
}
