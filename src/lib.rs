use std::fmt::Debug;
use serde::{Serialize, Deserialize};


pub mod chord;
pub use chord::{Chord, ChordHandle};

pub mod adaptor;
pub use adaptor::{ChordAdaptor, local_adaptor::LocalAdaptor};

pub mod associate;
pub use associate::Associate;

pub mod chord_id;
pub use chord_id::{ChordId, IdentifierSpace};

pub mod config;
pub use config::{ChordConfig, FingerRepair};

pub mod error;
pub use error::{ChordError, Result};

pub mod finger_table;

pub mod hasher;
pub use hasher::{KeyHasher, Sha256Hasher};

pub mod ring;
pub use ring::Ring;



pub type LocalChord<V> = Chord<V, LocalAdaptor<V>>;



/// Anything that can be stored on the ring.
pub trait ChordValue: Clone + Send + Sync + 'static + Debug + Serialize + for<'de> Deserialize<'de>{}
impl<T: Clone + Send + Sync + 'static + Debug + Serialize + for<'de> Deserialize<'de>> ChordValue for T{}
