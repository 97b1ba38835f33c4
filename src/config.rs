use std::{path::Path, time::Duration};

use serde::{Serialize, Deserialize};
use tokio::fs;

use crate::{chord_id::IdentifierSpace, error::{ChordError, Result}};

/// How fix_fingers picks the slot to refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FingerRepair {
	#[default]
	RoundRobin,
	Random,
}

/// Settings shared by every node of a ring.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChordConfig {
	/// Identifier width `m`; the ring holds `2^m` identifiers.
	pub bits: u32,
	pub call_timeout_ms: u64,
	pub ping_timeout_ms: u64,
	/// Hop ceiling for a single lookup, `2m` when unset.
	pub max_hops: Option<u32>,
	pub routing_retries: u32,
	pub retry_backoff_ms: u64,
	/// When set, every started node runs its own maintenance loop at this period.
	pub maintenance_interval_ms: Option<u64>,
	pub finger_repair: FingerRepair,
	pub channel_capacity: usize,
}

impl Default for ChordConfig {
	fn default() -> Self {
		ChordConfig {
			bits: 8,
			call_timeout_ms: 2000,
			ping_timeout_ms: 500,
			max_hops: None,
			routing_retries: 3,
			retry_backoff_ms: 50,
			maintenance_interval_ms: None,
			finger_repair: FingerRepair::RoundRobin,
			channel_capacity: 50,
		}
	}
}

impl ChordConfig {
	pub fn with_bits(bits: u32) -> Self {
		ChordConfig {
			bits,
			..Default::default()
		}
	}

	pub async fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
		let raw = fs::read_to_string(&path).await?;
		let config: ChordConfig = serde_json::from_str(&raw)?;
		config.validate()?;
		Ok(config)
	}

	pub fn validate(&self) -> Result<()> {
		IdentifierSpace::new(self.bits)?;
		if self.channel_capacity == 0 {
			return Err(ChordError::InvalidConfig("channel_capacity must be positive".to_string()));
		}
		if self.call_timeout_ms == 0 || self.ping_timeout_ms == 0 {
			return Err(ChordError::InvalidConfig("timeouts must be positive".to_string()));
		}
		if self.max_hops == Some(0) {
			return Err(ChordError::InvalidConfig("max_hops must be positive".to_string()));
		}
		if self.maintenance_interval_ms == Some(0) {
			return Err(ChordError::InvalidConfig("maintenance_interval_ms must be positive".to_string()));
		}
		Ok(())
	}

	pub fn space(&self) -> Result<IdentifierSpace> {
		IdentifierSpace::new(self.bits)
	}

	pub fn hop_limit(&self) -> u32 {
		self.max_hops.unwrap_or(self.bits * 2)
	}

	pub fn call_timeout(&self) -> Duration {
		Duration::from_millis(self.call_timeout_ms)
	}

	pub fn ping_timeout(&self) -> Duration {
		Duration::from_millis(self.ping_timeout_ms)
	}

	pub fn retry_backoff(&self) -> Duration {
		Duration::from_millis(self.retry_backoff_ms)
	}

	pub fn maintenance_interval(&self) -> Option<Duration> {
		self.maintenance_interval_ms.map(Duration::from_millis)
	}
}
