use std::collections::HashMap;
use std::time::Duration;

use peerlink_frame::{FrameConfig, DEFAULT_MAX_PAYLOAD};
use peerlink_transport::PeerId;
use serde::{Deserialize, Serialize};

use crate::error::{PeerError, Result};

/// Tunables for one peer. Every field has a default, so partial config
/// documents deserialize cleanly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PeerConfig {
    /// Maximum concurrent streams to one remote.
    pub max_streams: usize,
    /// Capacity of each outbound priority queue.
    pub queue_capacity: usize,
    /// Items the dedup filter holds before it resets.
    pub dedup_capacity: usize,
    /// Target false-positive rate of the dedup filter.
    pub dedup_false_positive_rate: f64,
    /// Lower bound of the per-write deadline.
    pub min_write_timeout: Duration,
    /// Assumed worst-case throughput in bytes per second. Larger frames get
    /// proportionally longer write deadlines.
    pub write_throughput_floor: u64,
    /// Largest accepted payload, inbound and outbound.
    pub max_payload_size: usize,
    /// Human-readable names for remote peers, used as metric labels.
    pub labels: PeerLabels,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            max_streams: 8,
            queue_capacity: 1024,
            dedup_capacity: 100_000,
            dedup_false_positive_rate: 0.001,
            min_write_timeout: Duration::from_secs(1),
            write_throughput_floor: 5 * 1024,
            max_payload_size: DEFAULT_MAX_PAYLOAD,
            labels: PeerLabels::default(),
        }
    }
}

impl PeerConfig {
    /// Reject values that would make a peer unusable.
    pub fn validate(&self) -> Result<()> {
        if self.max_streams == 0 {
            return Err(PeerError::InvalidConfig("max_streams must be positive".into()));
        }
        if self.queue_capacity == 0 {
            return Err(PeerError::InvalidConfig("queue_capacity must be positive".into()));
        }
        if self.dedup_capacity == 0 {
            return Err(PeerError::InvalidConfig("dedup_capacity must be positive".into()));
        }
        let rate = self.dedup_false_positive_rate;
        if !(rate > 0.0 && rate < 1.0) {
            return Err(PeerError::InvalidConfig(format!(
                "dedup_false_positive_rate must be in (0, 1), got {rate}"
            )));
        }
        if self.write_throughput_floor == 0 {
            return Err(PeerError::InvalidConfig(
                "write_throughput_floor must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Deadline for writing a frame carrying `payload_bytes`.
    ///
    /// Header and trailer are not counted.
    pub fn write_deadline(&self, payload_bytes: usize) -> Duration {
        let scaled = Duration::from_millis(
            (payload_bytes as u64).saturating_mul(1000) / self.write_throughput_floor.max(1),
        );
        scaled.max(self.min_write_timeout)
    }

    /// Frame settings for a node on `chain_id`.
    pub fn frame_config(&self, chain_id: u32) -> FrameConfig {
        FrameConfig {
            chain_id,
            max_payload_size: self.max_payload_size,
        }
    }
}

/// Peer id to display name table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerLabels(HashMap<String, String>);

impl PeerLabels {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, peer: impl Into<PeerId>, label: impl Into<String>) -> Self {
        self.insert(peer, label);
        self
    }

    pub fn insert(&mut self, peer: impl Into<PeerId>, label: impl Into<String>) {
        let peer: PeerId = peer.into();
        self.0.insert(peer.as_str().to_string(), label.into());
    }

    /// Label for `peer`, or its id when none is configured.
    pub fn label_for(&self, peer: &PeerId) -> String {
        self.0
            .get(peer.as_str())
            .cloned()
            .unwrap_or_else(|| peer.to_string())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
