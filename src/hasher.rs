use std::fmt::Debug;

use sha2::{Digest, Sha256};

use crate::chord_id::{ChordId, IdentifierSpace};

/// Maps an arbitrary key onto the identifier space.
pub trait KeyHasher: Send + Sync + Debug + 'static {
	fn hash_key(&self, key: &[u8], space: &IdentifierSpace) -> ChordId;
}

/// Default hasher: the first eight bytes of the SHA-256 digest, read big-endian
/// and reduced to `m` bits.
#[derive(Debug, Default, Clone, Copy)]
pub struct Sha256Hasher;

impl KeyHasher for Sha256Hasher {
	fn hash_key(&self, key: &[u8], space: &IdentifierSpace) -> ChordId {
		let digest = Sha256::digest(key);
		let mut prefix = [0u8; 8];
		prefix.copy_from_slice(&digest[..8]);
		space.wrap(u64::from_be_bytes(prefix))
	}
}
