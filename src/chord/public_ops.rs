use tracing::{debug, info, instrument};

use crate::{ChordValue, adaptor::ChordAdaptor, chord_id::ChordId, Chord};

use super::{
	ProcessorId,
	message::{LookupStep, PublicMessage, Refusal, Reply},
	state::NodeState,
};


impl<V: ChordValue, ADAPTOR: ChordAdaptor<V>> Chord<V, ADAPTOR>{

	pub(crate) fn process_public(&mut self, channel_id: ProcessorId, operation: PublicMessage<V>) -> Reply<V> {
		if let Some(reason) = self.gate_public(&operation) {
			debug!("Node {} refusing {} while {:?}", self.self_id, operation.name(), self.state);
			return self.refuse(reason);
		}

		match operation{
			// State Operations
			PublicMessage::GetID => Reply::ID{ id: self.self_id },
			PublicMessage::GetSuccessor => Reply::Successor{ succ: self.fingers.successor() },
			PublicMessage::GetPredecessor => Reply::Predecessor{ pred: self.predecessor },
			PublicMessage::Ping => Reply::Pong,

			// Chord Operations
			PublicMessage::FindSuccessor { id, avoid } => {
				Reply::Step{ step: self.find_successor_step(id, &avoid) }
			},
			// Step 2 of stabilize procedure: a node that believes it precedes us
			PublicMessage::Notify => {
				match channel_id {
					ProcessorId::Member(candidate) => Reply::Changed{ changed: self.notify(candidate) },
					ProcessorId::Internal => self.refuse(Refusal::Forbidden),
				}
			},

			// Data Operations
			PublicMessage::Get { key } => {
				if !self.in_this_sector(key) {
					return self.refuse(Refusal::NotOwner);
				}
				Reply::Value{ value: self.store.get(&key).cloned() }
			},
			PublicMessage::Put { key, value } => {
				if !self.in_this_sector(key) {
					return self.refuse(Refusal::NotOwner);
				}
				self.store.insert(key, value);
				Reply::Ack
			},
			PublicMessage::HandOff => {
				match channel_id {
					ProcessorId::Member(newcomer) => Reply::Entries{ entries: self.hand_off(newcomer) },
					ProcessorId::Internal => self.refuse(Refusal::Forbidden),
				}
			},
			PublicMessage::Release { keys } => {
				match channel_id {
					// a newcomer may repeat its release after we adopted it
					ProcessorId::Member(newcomer) if self.handed_off.remove(&newcomer) || self.predecessor == Some(newcomer) => {
						Reply::Changed{ changed: self.release(&keys) }
					},
					_ => self.refuse(Refusal::Forbidden),
				}
			},
			PublicMessage::Absorb { entries } => {
				debug!("Node {} absorbing {} keys", self.self_id, entries.len());
				// a value written here since the copy was taken is newer
				for (key, value) in entries {
					self.store.entry(key).or_insert(value);
				}
				Reply::Ack
			},

			// Departure
			PublicMessage::SuccessorLeaving { successor } => {
				match channel_id {
					ProcessorId::Member(leaver) => Reply::Changed{ changed: self.successor_leaving(leaver, successor) },
					ProcessorId::Internal => self.refuse(Refusal::Forbidden),
				}
			},
			PublicMessage::PredecessorLeaving { predecessor } => {
				match channel_id {
					ProcessorId::Member(leaver) => Reply::Changed{ changed: self.predecessor_leaving(leaver, predecessor) },
					ProcessorId::Internal => self.refuse(Refusal::Forbidden),
				}
			},
		}
	}

	/// Which requests a node in its current lifecycle state will not serve.
	fn gate_public(&self, operation: &PublicMessage<V>) -> Option<Refusal> {
		match self.state {
			NodeState::Joined => None,
			NodeState::Departed => Some(Refusal::Departed),
			NodeState::Unjoined => match operation {
				PublicMessage::GetID | PublicMessage::Ping => None,
				_ => Some(Refusal::NotJoined),
			},
			// Reads are still served while the store is being handed over,
			// anything that would add state here is not.
			NodeState::Leaving => match operation {
				PublicMessage::Put { .. }
				| PublicMessage::Absorb { .. }
				| PublicMessage::HandOff
				| PublicMessage::Notify => Some(Refusal::Departed),
				_ => None,
			},
		}
	}

	/// One hop of find_successor: answer if the id falls between us and our
	/// successor, otherwise point the caller at the closest preceding finger.
	fn find_successor_step(&self, id: ChordId, avoid: &[ChordId]) -> LookupStep {
		let successor = self.fingers.successor();
		if self.space.in_interval(id, self.self_id, successor, true) {
			return LookupStep::Owner(successor);
		}
		let next = self.fingers.closest_preceding_node(id, avoid);
		if next == self.self_id {
			LookupStep::Owner(successor)
		} else {
			LookupStep::Forward(next)
		}
	}

	#[instrument(skip(self), fields(node = %self.self_id))]
	fn notify(&mut self, candidate: ChordId) -> bool {
		let adopt = match self.predecessor {
			None => true,
			Some(predecessor) => self.space.in_interval(candidate, predecessor, self.self_id, false),
		};
		if adopt && self.predecessor != Some(candidate) {
			info!("Node {} adopting predecessor {}", self.self_id, candidate);
			self.predecessor = Some(candidate);
			true
		} else {
			false
		}
	}

	/// Copies of the entries a node joining just before us now owns: everything
	/// outside `(newcomer, self]`. They stay here until released.
	///
	/// The newcomer becomes our predecessor right away when it sits between
	/// the old one and us, so writes for its range are refused from now on
	/// instead of landing here after the copy was taken.
	fn hand_off(&mut self, newcomer: ChordId) -> Vec<(ChordId, V)> {
		let adopt = match self.predecessor {
			None => true,
			Some(predecessor) => self.space.in_interval(newcomer, predecessor, self.self_id, false),
		};
		if adopt && newcomer != self.self_id {
			info!("Node {} handing its lower range to {}", self.self_id, newcomer);
			self.predecessor = Some(newcomer);
		}
		self.handed_off.insert(newcomer);
		self.store
			.iter()
			.filter(|(key, _)| !self.space.in_interval(**key, newcomer, self.self_id, true))
			.map(|(key, value)| (*key, value.clone()))
			.collect()
	}

	/// Drop released keys, but only those no longer in our sector.
	fn release(&mut self, keys: &[ChordId]) -> bool {
		let mut changed = false;
		for key in keys {
			if !self.in_this_sector(*key) {
				changed |= self.store.remove(key).is_some();
			}
		}
		changed
	}

	fn successor_leaving(&mut self, leaver: ChordId, successor: ChordId) -> bool {
		let was_successor = self.fingers.successor() == leaver;
		let mut changed = self.fingers.forget(leaver);
		if was_successor && successor != leaver {
			changed |= self.fingers.set_successor(successor);
			info!("Node {} successor {} left, now {}", self.self_id, leaver, successor);
		}
		changed
	}

	fn predecessor_leaving(&mut self, leaver: ChordId, predecessor: Option<ChordId>) -> bool {
		let mut changed = self.fingers.forget(leaver);
		if self.predecessor == Some(leaver) {
			self.predecessor = predecessor.filter(|p| *p != leaver);
			info!("Node {} predecessor {} left, now {:?}", self.self_id, leaver, self.predecessor);
			changed = true;
		}
		changed
	}
}


#[cfg(test)]
mod tests {
	use super::*;
	use crate::{adaptor::local_adaptor::LocalAdaptor, config::ChordConfig};

	fn id(n: u64) -> ChordId {
		ChordId::from(n)
	}

	/// Node 100 with predecessor 50, holding keys 60, 75 and 90.
	fn node_100() -> Chord<String, LocalAdaptor<String>> {
		let mut chord = Chord::new(id(100), ChordConfig::default(), LocalAdaptor::new()).unwrap();
		chord.state = NodeState::Joined;
		chord.predecessor = Some(id(50));
		for key in [60u64, 75, 90] {
			chord.store.insert(id(key), format!("v{}", key));
		}
		chord
	}

	fn keys(chord: &Chord<String, LocalAdaptor<String>>) -> Vec<u64> {
		chord.store.keys().map(|k| k.value()).collect()
	}

	#[test]
	fn hand_off_adopts_newcomer_as_predecessor() {
		let mut chord = node_100();
		let reply = chord.process_public(ProcessorId::Member(id(75)), PublicMessage::HandOff);
		match reply {
			Reply::Entries { entries } => {
				let handed: Vec<u64> = entries.iter().map(|(k, _)| k.value()).collect();
				assert_eq!(handed, vec![60, 75]);
			},
			other => panic!("expected entries, got {:?}", other),
		}
		assert_eq!(chord.predecessor, Some(id(75)));

		// the copies are still here, but new writes for 75's range are refused
		assert_eq!(keys(&chord), vec![60, 75, 90]);
		let put = PublicMessage::Put { key: id(70), value: "late".to_string() };
		assert!(matches!(
			chord.process_public(ProcessorId::Member(id(10)), put),
			Reply::Refused { reason: Refusal::NotOwner }
		));
	}

	#[test]
	fn release_requires_a_hand_off() {
		let mut chord = node_100();
		let release = PublicMessage::Release { keys: vec![id(60), id(75)] };
		assert!(matches!(
			chord.process_public(ProcessorId::Member(id(75)), release.clone()),
			Reply::Refused { reason: Refusal::Forbidden }
		));
		assert_eq!(keys(&chord), vec![60, 75, 90]);

		chord.process_public(ProcessorId::Member(id(75)), PublicMessage::HandOff);
		assert!(matches!(
			chord.process_public(ProcessorId::Member(id(20)), release.clone()),
			Reply::Refused { reason: Refusal::Forbidden }
		));
		assert!(matches!(
			chord.process_public(ProcessorId::Member(id(75)), release),
			Reply::Changed { changed: true }
		));
		assert_eq!(keys(&chord), vec![90]);
	}

	#[test]
	fn release_keeps_keys_still_in_sector() {
		let mut chord = node_100();
		chord.process_public(ProcessorId::Member(id(75)), PublicMessage::HandOff);
		let release = PublicMessage::Release { keys: vec![id(60), id(90)] };
		chord.process_public(ProcessorId::Member(id(75)), release);
		assert_eq!(keys(&chord), vec![75, 90]);
	}

	#[test]
	fn absorb_keeps_newer_values() {
		let mut chord = node_100();
		let entries = vec![(id(90), "old".to_string()), (id(95), "moved".to_string())];
		chord.process_public(ProcessorId::Member(id(50)), PublicMessage::Absorb { entries });
		assert_eq!(chord.store.get(&id(90)).map(String::as_str), Some("v90"));
		assert_eq!(chord.store.get(&id(95)).map(String::as_str), Some("moved"));
	}
}
