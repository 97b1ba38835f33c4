//! Error types for the chord ring

use thiserror::Error;

use crate::chord_id::ChordId;

pub type Result<T> = std::result::Result<T, ChordError>;

#[derive(Error, Debug)]
pub enum ChordError {
	// === Data Errors ===
	#[error("No value stored for identifier {0}")]
	NotFound(ChordId),

	// === Routing Errors ===
	#[error("Routing to {id} failed: {reason}")]
	RoutingFailure { id: ChordId, reason: String },

	#[error("Node {0} is unreachable")]
	PeerUnreachable(ChordId),

	#[error("Node {0} does not own the requested identifier")]
	NotOwner(ChordId),

	// === Membership Errors ===
	#[error("Node {0} has departed the ring")]
	Departed(ChordId),

	#[error("Node {0} has not joined a ring")]
	NotJoined(ChordId),

	#[error("Node {0} has already joined a ring")]
	AlreadyJoined(ChordId),

	#[error("Identifier {0} is already in use")]
	IdInUse(ChordId),

	// === Protocol Errors ===
	#[error("Unexpected reply to {request}: {reply}")]
	UnexpectedReply { request: &'static str, reply: String },

	#[error("Invariant violated: {0}")]
	InvariantViolation(String),

	// === Config Errors ===
	#[error("Invalid configuration: {0}")]
	InvalidConfig(String),

	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),

	#[error("Serialization error: {0}")]
	Json(#[from] serde_json::Error),
}

impl ChordError {
	/// Errors that a later stabilization round may clear up, and so are worth
	/// retrying against a freshly routed owner.
	pub fn is_transient(&self) -> bool {
		matches!(
			self,
			ChordError::RoutingFailure { .. }
				| ChordError::PeerUnreachable(_)
				| ChordError::NotOwner(_)
				| ChordError::Departed(_)
				| ChordError::NotJoined(_)
		)
	}
}
