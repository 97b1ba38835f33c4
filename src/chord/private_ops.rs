use rand::Rng;
use tracing::{info, warn};

use crate::{ChordValue, adaptor::ChordAdaptor, chord_id::ChordId, config::FingerRepair, Chord};

use super::{
	ProcessorId,
	message::{PrivateMessage, Refusal, Reply},
	state::NodeState,
};




impl<V: ChordValue, ADAPTOR: ChordAdaptor<V>> Chord<V, ADAPTOR>{

	pub(crate) fn process_private(&mut self, channel_id: ProcessorId, operation: PrivateMessage) -> Reply<V> {
		// make sure that message came from internal channel
		if channel_id != ProcessorId::Internal {
			warn!("Node {} rejecting private {:?} from {:?}", self.self_id, operation, channel_id);
			return self.refuse(Refusal::Forbidden);
		}

		match operation{
			PrivateMessage::Snapshot => Reply::Snapshot{ snapshot: self.snapshot() },
			PrivateMessage::Create => self.create(),
			PrivateMessage::Join { fingers } => self.join(fingers),
			PrivateMessage::BeginLeave => self.begin_leave(),
			PrivateMessage::AbortLeave => {
				if self.state == NodeState::Leaving {
					warn!("Node {} could not hand off its keys, staying in the ring", self.self_id);
					self.state = NodeState::Joined;
				}
				Reply::Ack
			},
			PrivateMessage::Depart => {
				if self.state == NodeState::Unjoined {
					return self.refuse(Refusal::NotJoined);
				}
				self.store.clear();
				self.predecessor = None;
				self.state = NodeState::Departed;
				info!("Node {} departed", self.self_id);
				Reply::Ack
			},
			operation => {
				match self.state {
					NodeState::Joined | NodeState::Leaving => self.process_maintenance(operation),
					NodeState::Unjoined => self.refuse(Refusal::NotJoined),
					NodeState::Departed => self.refuse(Refusal::Departed),
				}
			},
		}
	}

	fn process_maintenance(&mut self, operation: PrivateMessage) -> Reply<V> {
		match operation{
			PrivateMessage::OfferSuccessor { candidate } => Reply::Changed{ changed: self.offer_successor(candidate) },
			PrivateMessage::ReplaceSuccessor { dead } => Reply::Changed{ changed: self.replace_successor(dead) },
			PrivateMessage::ClearPredecessor { expected } => {
				let changed = self.predecessor == Some(expected);
				if changed {
					info!("Node {} clearing unreachable predecessor {}", self.self_id, expected);
					self.predecessor = None;
				}
				Reply::Changed{ changed }
			},
			PrivateMessage::NextFinger => {
				let index = self.next_finger_index();
				match self.fingers.start(index as usize) {
					Some(start) => Reply::Finger{ index, start },
					None => self.refuse(Refusal::Forbidden),
				}
			},
			PrivateMessage::FixFinger { index, node } => {
				// slot 0 is the successor, which only ever moves closer outside of stabilize
				let changed = if index == 0 {
					self.fingers.update(0, node)
				} else {
					self.fingers.set(index as usize, node)
				};
				Reply::Changed{ changed }
			},
			PrivateMessage::ForgetNode { id } => {
				let changed = id != self.self_id && self.fingers.forget(id);
				Reply::Changed{ changed }
			},
			other => {
				warn!("Node {} got {:?} as maintenance", self.self_id, other);
				self.refuse(Refusal::Forbidden)
			},
		}
	}

	/// The first node of a ring is its own successor and predecessor.
	fn create(&mut self) -> Reply<V> {
		match self.state {
			NodeState::Unjoined => {
				self.fingers = crate::finger_table::FingerTable::new(self.self_id, self.space);
				self.predecessor = Some(self.self_id);
				self.state = NodeState::Joined;
				info!("Node {} created a new ring", self.self_id);
				Reply::Ack
			},
			NodeState::Departed => self.refuse(Refusal::Departed),
			_ => self.refuse(Refusal::AlreadyJoined),
		}
	}

	/// Install the successor and fingers resolved through a bootstrap node.
	/// The predecessor stays unknown until someone notifies us.
	fn join(&mut self, fingers: Vec<ChordId>) -> Reply<V> {
		match self.state {
			NodeState::Unjoined => {
				self.fingers.install(&fingers);
				self.predecessor = None;
				self.state = NodeState::Joined;
				info!("Node {} joined with successor {}", self.self_id, self.fingers.successor());
				Reply::Ack
			},
			NodeState::Departed => self.refuse(Refusal::Departed),
			_ => self.refuse(Refusal::AlreadyJoined),
		}
	}

	fn begin_leave(&mut self) -> Reply<V> {
		match self.state {
			NodeState::Joined => {
				self.state = NodeState::Leaving;
				Reply::Leaving{
					successor: self.fingers.successor(),
					predecessor: self.predecessor,
					entries: self.store.iter().map(|(k, v)| (*k, v.clone())).collect(),
				}
			},
			NodeState::Unjoined => self.refuse(Refusal::NotJoined),
			NodeState::Leaving | NodeState::Departed => self.refuse(Refusal::Departed),
		}
	}

	/// Adopt `candidate` as successor if it sits strictly between us and the
	/// current successor.
	fn offer_successor(&mut self, candidate: ChordId) -> bool {
		let successor = self.fingers.successor();
		if candidate == self.self_id || !self.space.in_interval(candidate, self.self_id, successor, false) {
			return false;
		}
		info!("Node {} adopting successor {} (was {})", self.self_id, candidate, successor);
		self.fingers.set_successor(candidate);
		self.fingers.observe(candidate);
		true
	}

	/// Fail over from an unreachable successor to the nearest finger still
	/// believed alive, then to the predecessor, and finally to ourselves.
	fn replace_successor(&mut self, dead: ChordId) -> bool {
		if self.fingers.successor() != dead || dead == self.self_id {
			return false;
		}
		self.fingers.forget(dead);
		if self.fingers.successor() == self.self_id {
			if let Some(predecessor) = self.predecessor.filter(|p| *p != dead) {
				self.fingers.set_successor(predecessor);
			}
		}
		warn!("Node {} replaced unreachable successor {} with {}", self.self_id, dead, self.fingers.successor());
		true
	}

	fn next_finger_index(&mut self) -> u32 {
		let bits = self.space.bits();
		if bits == 1 {
			return 0;
		}
		match self.config.finger_repair {
			FingerRepair::RoundRobin => {
				let index = self.finger_index;
				let mut next_index = index + 1;
				if next_index >= bits {
					next_index = 1;
				}
				self.finger_index = next_index;
				index
			},
			FingerRepair::Random => rand::thread_rng().gen_range(1..bits),
		}
	}
}
