#![allow(dead_code)]

use std::{collections::HashMap, sync::Arc};

use chord_ring::{ChordConfig, ChordId, IdentifierSpace, KeyHasher, Ring, Sha256Hasher};


/// Places chosen keys at fixed identifiers and hashes everything else normally.
#[derive(Debug, Default)]
pub struct FixedHasher {
	table: HashMap<String, u64>,
}

impl FixedHasher {
	pub fn new(entries: &[(&str, u64)]) -> Self {
		FixedHasher {
			table: entries.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
		}
	}
}

impl KeyHasher for FixedHasher {
	fn hash_key(&self, key: &[u8], space: &IdentifierSpace) -> ChordId {
		let fixed = std::str::from_utf8(key).ok().and_then(|k| self.table.get(k));
		match fixed {
			Some(id) => space.wrap(*id),
			None => Sha256Hasher.hash_key(key, space),
		}
	}
}

pub fn id(n: u64) -> ChordId {
	ChordId::from(n)
}

pub fn test_config(bits: u32) -> ChordConfig {
	ChordConfig {
		bits,
		call_timeout_ms: 500,
		ping_timeout_ms: 200,
		retry_backoff_ms: 5,
		..ChordConfig::default()
	}
}

/// Start a ring with the given node ids, joining each through the lowest
/// node and stabilizing in between, then run rounds until it converges.
pub async fn make_ring_with(config: ChordConfig, ids: &[u64], hasher: Arc<dyn KeyHasher>) -> Ring<String> {
	let mut ring = Ring::with_hasher(config, hasher).expect("valid config");
	for n in ids {
		ring.add_node(*n).await.expect("node should join");
		ring.stabilize_rounds(2).await.expect("stabilization should run");
	}
	ring.converge(20).await.expect("ring should converge");
	ring
}

pub async fn make_ring(ids: &[u64]) -> Ring<String> {
	make_ring_with(test_config(8), ids, Arc::new(Sha256Hasher)).await
}
