use std::fmt;
use serde::{Serialize, Deserialize};

use crate::error::{ChordError, Result};

/// A ChordId is a point around the chord ring. Ids are only meaningful
/// relative to the IdentifierSpace that produced them.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChordId(u64);

impl ChordId {
	pub fn value(&self) -> u64 {
		self.0
	}
}

impl From<u64> for ChordId {
	fn from(id: u64) -> Self {
		ChordId(id)
	}
}

impl fmt::Display for ChordId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

/// The circular space `[0, 2^m)` that both node and key identifiers are drawn from.
/// All arithmetic is modulo `2^m`.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct IdentifierSpace {
	bits: u32,
}

impl IdentifierSpace {
	pub const MAX_BITS: u32 = 64;

	pub fn new(bits: u32) -> Result<Self> {
		if bits == 0 || bits > Self::MAX_BITS {
			return Err(ChordError::InvalidConfig(format!(
				"identifier width must be within 1..={}, got {}",
				Self::MAX_BITS,
				bits
			)));
		}
		Ok(IdentifierSpace { bits })
	}

	/// Bit width `m`, which is also the finger table length.
	pub fn bits(&self) -> u32 {
		self.bits
	}

	fn mask(&self) -> u64 {
		if self.bits == 64 {
			u64::MAX
		} else {
			(1u64 << self.bits) - 1
		}
	}

	/// Largest identifier in the space.
	pub fn max_id(&self) -> ChordId {
		ChordId(self.mask())
	}

	/// Reduce an arbitrary integer into the space.
	pub fn wrap(&self, raw: u64) -> ChordId {
		ChordId(raw & self.mask())
	}

	pub fn contains(&self, id: ChordId) -> bool {
		id.0 & !self.mask() == 0
	}

	/// Clockwise distance from `a` to `b`, `(b - a) mod 2^m`.
	pub fn distance(&self, a: ChordId, b: ChordId) -> u64 {
		b.0.wrapping_sub(a.0) & self.mask()
	}

	/// `(n + 2^index) mod 2^m`, the start of finger slot `index`.
	pub fn finger_start(&self, n: ChordId, index: u32) -> ChordId {
		debug_assert!(index < self.bits);
		ChordId(n.0.wrapping_add(1u64 << index) & self.mask())
	}

	/// Tests if `key` lies strictly after `start` and before `end` walking
	/// clockwise, or at `end` when `inclusive_end` is set.
	///
	/// When `start == end` the interval spans the whole ring: `(a, a]` holds
	/// every identifier and `(a, a)` holds every identifier except `a`.
	pub fn in_interval(&self, key: ChordId, start: ChordId, end: ChordId, inclusive_end: bool) -> bool {
		if start == end {
			return inclusive_end || key != start;
		}
		let to_key = self.distance(start, key);
		let to_end = self.distance(start, end);
		if inclusive_end {
			to_key > 0 && to_key <= to_end
		} else {
			to_key > 0 && to_key < to_end
		}
	}

	/// Tests if `key` lies in `[start, end)`.
	pub fn in_closed_open(&self, key: ChordId, start: ChordId, end: ChordId) -> bool {
		key == start || self.in_interval(key, start, end, false)
	}
}

impl Default for IdentifierSpace {
	fn default() -> Self {
		IdentifierSpace { bits: 8 }
	}
}


#[cfg(test)]
mod tests {
	use super::*;

	fn id(n: u64) -> ChordId {
		ChordId::from(n)
	}

	#[test]
	fn rejects_out_of_range_widths() {
		assert!(IdentifierSpace::new(0).is_err());
		assert!(IdentifierSpace::new(65).is_err());
		assert!(IdentifierSpace::new(64).is_ok());
	}

	#[test]
	fn distance_is_clockwise() {
		let space = IdentifierSpace::new(8).unwrap();
		assert_eq!(space.distance(id(10), id(50)), 40);
		assert_eq!(space.distance(id(50), id(10)), 216);
		assert_eq!(space.distance(id(200), id(200)), 0);
		assert_eq!(space.distance(id(255), id(0)), 1);
	}

	#[test]
	fn finger_starts_wrap() {
		let space = IdentifierSpace::new(8).unwrap();
		assert_eq!(space.finger_start(id(10), 0), id(11));
		assert_eq!(space.finger_start(id(10), 7), id(138));
		assert_eq!(space.finger_start(id(200), 7), id(72));

		let wide = IdentifierSpace::new(64).unwrap();
		assert_eq!(wide.finger_start(id(u64::MAX), 0), id(0));
	}

	#[test]
	fn open_open_interval() {
		let space = IdentifierSpace::new(8).unwrap();
		assert!(space.in_interval(id(30), id(10), id(50), false));
		assert!(!space.in_interval(id(10), id(10), id(50), false));
		assert!(!space.in_interval(id(50), id(10), id(50), false));
		assert!(!space.in_interval(id(60), id(10), id(50), false));
	}

	#[test]
	fn open_closed_interval() {
		let space = IdentifierSpace::new(8).unwrap();
		assert!(space.in_interval(id(50), id(10), id(50), true));
		assert!(!space.in_interval(id(10), id(10), id(50), true));
		assert!(space.in_interval(id(11), id(10), id(50), true));
		assert!(!space.in_interval(id(51), id(10), id(50), true));
	}

	#[test]
	fn wrapping_intervals() {
		let space = IdentifierSpace::new(8).unwrap();
		// (200, 20]
		assert!(space.in_interval(id(250), id(200), id(20), true));
		assert!(space.in_interval(id(0), id(200), id(20), true));
		assert!(space.in_interval(id(20), id(200), id(20), true));
		assert!(!space.in_interval(id(20), id(200), id(20), false));
		assert!(!space.in_interval(id(200), id(200), id(20), true));
		assert!(!space.in_interval(id(100), id(200), id(20), true));
	}

	#[test]
	fn degenerate_interval_spans_ring() {
		let space = IdentifierSpace::new(8).unwrap();
		assert!(space.in_interval(id(42), id(42), id(42), true));
		assert!(space.in_interval(id(7), id(42), id(42), true));
		assert!(!space.in_interval(id(42), id(42), id(42), false));
		assert!(space.in_interval(id(7), id(42), id(42), false));
	}

	#[test]
	fn closed_open_includes_start() {
		let space = IdentifierSpace::new(8).unwrap();
		assert!(space.in_closed_open(id(10), id(10), id(50)));
		assert!(!space.in_closed_open(id(50), id(10), id(50)));
	}
}
