use std::time::Duration;

use crate::message::{CodecError, Priority};

/// Errors that can occur in peer operations.
#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    /// Transport-level error, e.g. the transport refused a new stream.
    #[error("transport error: {0}")]
    Transport(#[from] peerlink_transport::TransportError),

    /// Frame-level error on a stream.
    #[error("frame error: {0}")]
    Frame(#[from] peerlink_frame::FrameError),

    /// The message codec rejected a message.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// The peer already has the maximum number of streams.
    #[error("stream count exceeded (max {max})")]
    StreamCountExceeded { max: usize },

    /// The outbound queue for this priority is full; the message was dropped.
    #[error("{0} message queue is full")]
    ChannelFull(Priority),

    /// The message was recently sent to or received from this peer.
    #[error("duplicate message")]
    DuplicateMessage,

    /// A stream write did not finish before its deadline.
    #[error("write timed out after {0:?}")]
    WriteTimeout(Duration),

    /// The peer manager refused an inbound message.
    #[error("message rejected: {0}")]
    Rejected(String),

    /// The configuration is unusable.
    #[error("invalid peer config: {0}")]
    InvalidConfig(String),

    /// The peer has been stopped.
    #[error("peer stopped")]
    Stopped,
}

pub type Result<T> = std::result::Result<T, PeerError>;
