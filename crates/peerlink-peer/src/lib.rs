//! Connection management for one directly connected peer.
//!
//! A [`Peer`] multiplexes up to [`PeerConfig::max_streams`] transport streams
//! to its remote, schedules outbound messages over them with a two-tier
//! priority, runs one frame reader per stream, and remembers recently seen
//! message content so the same gossip isn't sent back and forth.
//!
//! Everything the peer needs from the rest of the node comes in through
//! three seams: a [`MessageCodec`], a [`PeerManager`] and a [`MetricsSink`].

pub mod config;
pub mod dedup;
pub mod error;
pub mod manager;
pub mod message;
pub mod metrics;
pub mod peer;
pub mod pool;

mod reader;
mod scheduler;

pub use config::{PeerConfig, PeerLabels};
pub use dedup::{BloomFilter, DedupFilter};
pub use error::{PeerError, Result};
pub use manager::PeerManager;
pub use message::{CodecError, MessageCodec, Priority, RawCodec, RawMessage, WireMessage};
pub use metrics::{MetricsSink, NoopMetrics, PrometheusMetrics};
pub use peer::Peer;
pub use pool::{PooledWriter, StreamPool};
