//! Multiplexed, deduplicating peer connections for gossip networks.
//!
//! peerlink manages the link to one directly connected node: a bounded pool
//! of streams over a multiplexed connection, chain-tagged framing, urgent and
//! normal outbound queues, and suppression of messages the link has already
//! carried.
//!
//! # Crate Structure
//!
//! - [`transport`]: connection and stream abstractions, plus an in-memory transport
//! - [`frame`]: chain-tagged, length-prefixed framing with a send-time trailer
//! - [`peer`]: the per-peer stream pool, write scheduler and readers (behind `peer` feature)

/// Re-export transport types.
pub mod transport {
    pub use peerlink_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use peerlink_frame::*;
}

/// Re-export peer types (requires `peer` feature).
#[cfg(feature = "peer")]
pub mod peer {
    pub use peerlink_peer::*;
}
