use serde::{Serialize, Deserialize};
use tokio::sync::oneshot;

use crate::{ChordValue, chord_id::ChordId, error::ChordError};

use super::{ProcessorId, state::NodeSnapshot};


/// What a node's processor receives: who asked, what they asked, and where to answer.
pub type Inbound<V> = (ProcessorId, Message<V>, oneshot::Sender<Reply<V>>);

#[derive(Debug)]
pub enum Message<V: ChordValue>{
	Private(PrivateMessage),
	Public(PublicMessage<V>),
}

/// Operations only the node's own driver may request.
#[derive(Debug)]
pub enum PrivateMessage{
	// Membership
	Create,
	Join{fingers: Vec<ChordId>},
	BeginLeave,
	AbortLeave,
	Depart,

	// Stabilization steps
	OfferSuccessor{candidate: ChordId},
	ReplaceSuccessor{dead: ChordId},
	ClearPredecessor{expected: ChordId},
	NextFinger,
	FixFinger{index: u32, node: ChordId},
	ForgetNode{id: ChordId},

	// Other
	Snapshot,
}

impl<V: ChordValue> From<PrivateMessage> for Message<V> {
	fn from(msg: PrivateMessage) -> Self {
		Message::Private(msg)
	}
}


/// Requests any ring member may send. Each one is answered from the
/// receiving node's local state alone.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound = "")]
pub enum PublicMessage<V: ChordValue>{
	// State Operations
	GetID,
	GetSuccessor,
	GetPredecessor,
	Ping,

	// Chord Operations
	FindSuccessor{id: ChordId, avoid: Vec<ChordId>},
	Notify,

	// Data Operations
	Get{key: ChordId},
	Put{key: ChordId, value: V},
	HandOff,
	Release{keys: Vec<ChordId>},
	Absorb{entries: Vec<(ChordId, V)>},

	// Departure
	SuccessorLeaving{successor: ChordId},
	PredecessorLeaving{predecessor: Option<ChordId>},
}

impl<V: ChordValue> PublicMessage<V> {
	pub fn name(&self) -> &'static str {
		match self {
			PublicMessage::GetID => "GetID",
			PublicMessage::GetSuccessor => "GetSuccessor",
			PublicMessage::GetPredecessor => "GetPredecessor",
			PublicMessage::Ping => "Ping",
			PublicMessage::FindSuccessor { .. } => "FindSuccessor",
			PublicMessage::Notify => "Notify",
			PublicMessage::Get { .. } => "Get",
			PublicMessage::Put { .. } => "Put",
			PublicMessage::HandOff => "HandOff",
			PublicMessage::Release { .. } => "Release",
			PublicMessage::Absorb { .. } => "Absorb",
			PublicMessage::SuccessorLeaving { .. } => "SuccessorLeaving",
			PublicMessage::PredecessorLeaving { .. } => "PredecessorLeaving",
		}
	}
}

impl<V: ChordValue> From<PublicMessage<V>> for Message<V> {
	fn from(msg: PublicMessage<V>) -> Self {
		Message::Public(msg)
	}
}


/// One hop of an iterative lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LookupStep{
	/// The answering node's successor owns the id.
	Owner(ChordId),
	/// Ask this node next.
	Forward(ChordId),
}

/// Why a node declined a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Refusal{
	NotJoined,
	AlreadyJoined,
	Departed,
	NotOwner,
	Forbidden,
}

impl Refusal {
	pub fn into_error(self, node: ChordId) -> ChordError {
		match self {
			Refusal::NotJoined => ChordError::NotJoined(node),
			Refusal::AlreadyJoined => ChordError::AlreadyJoined(node),
			Refusal::Departed => ChordError::Departed(node),
			Refusal::NotOwner => ChordError::NotOwner(node),
			Refusal::Forbidden => ChordError::UnexpectedReply {
				request: "private operation",
				reply: format!("node {} only accepts it from its own driver", node),
			},
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound = "")]
pub enum Reply<V: ChordValue>{
	Ack,
	Pong,
	ID{id: ChordId},
	Successor{succ: ChordId},
	Predecessor{pred: Option<ChordId>},
	Step{step: LookupStep},
	Value{value: Option<V>},
	Entries{entries: Vec<(ChordId, V)>},
	Changed{changed: bool},
	Finger{index: u32, start: ChordId},
	Leaving{successor: ChordId, predecessor: Option<ChordId>, entries: Vec<(ChordId, V)>},
	Snapshot{snapshot: NodeSnapshot<V>},
	Refused{reason: Refusal},
}

impl<V: ChordValue> Reply<V> {
	/// Build the error for a reply that does not answer `request`.
	pub fn unexpected(self, request: &'static str) -> ChordError {
		ChordError::UnexpectedReply {
			request,
			reply: format!("{:?}", self),
		}
	}
}
