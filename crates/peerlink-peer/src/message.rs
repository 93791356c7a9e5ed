use std::fmt;
use std::time::SystemTime;

use bytes::{BufMut, Bytes, BytesMut};
use peerlink_frame::Frame;

/// Outbound queue tier. Urgent messages always go out before normal ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Priority {
    Urgent,
    Normal,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Priority::Urgent => f.write_str("urgent"),
            Priority::Normal => f.write_str("normal"),
        }
    }
}

/// A message the peer layer can move without knowing its schema.
pub trait WireMessage: Send + Sync + 'static {
    /// Short label used for metrics and logs.
    fn message_type(&self) -> &'static str;

    /// Canonical content bytes. This is also the dedup key.
    fn content(&self) -> &[u8];

    /// Whether this message takes part in duplicate suppression.
    fn needs_dedup(&self) -> bool;

    /// Stamp the moment the message is handed to a stream.
    fn with_send_time(self, sent_at: SystemTime) -> Self
    where
        Self: Sized;
}

/// Message codec failure.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct CodecError(String);

impl CodecError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Converts between frame payloads and messages.
///
/// The peer layer treats payloads as opaque; schema lives entirely here.
pub trait MessageCodec: Send + Sync + 'static {
    type Message: WireMessage;

    /// Parse an inbound frame's payload.
    fn parse(&self, frame: &Frame) -> Result<Self::Message, CodecError>;

    /// Append a message's payload to `dst`.
    fn serialize(&self, message: &Self::Message, dst: &mut BytesMut) -> Result<(), CodecError>;
}

/// Opaque message whose payload is its content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    message_type: &'static str,
    content: Bytes,
    needs_dedup: bool,
    sent_at: Option<SystemTime>,
}

impl RawMessage {
    /// A dedup-eligible message.
    pub fn new(message_type: &'static str, content: impl Into<Bytes>) -> Self {
        Self {
            message_type,
            content: content.into(),
            needs_dedup: true,
            sent_at: None,
        }
    }

    /// Opt this message out of duplicate suppression.
    pub fn without_dedup(mut self) -> Self {
        self.needs_dedup = false;
        self
    }

    pub fn bytes(&self) -> &Bytes {
        &self.content
    }

    /// Send time stamped by the sending peer, if known.
    pub fn sent_at(&self) -> Option<SystemTime> {
        self.sent_at
    }
}

impl WireMessage for RawMessage {
    fn message_type(&self) -> &'static str {
        self.message_type
    }

    fn content(&self) -> &[u8] {
        &self.content
    }

    fn needs_dedup(&self) -> bool {
        self.needs_dedup
    }

    fn with_send_time(mut self, sent_at: SystemTime) -> Self {
        self.sent_at = Some(sent_at);
        self
    }
}

/// Codec for [`RawMessage`]: payload and content are the same bytes.
///
/// The message type is not on the wire. Every inbound message is labeled with
/// the codec's own type, whatever type the sender gave it, so inbound metrics
/// only line up with outbound ones when both sides use that label.
#[derive(Debug, Clone)]
pub struct RawCodec {
    message_type: &'static str,
    dedup: bool,
}

impl RawCodec {
    /// Inbound messages are labeled `message_type` and are dedup-eligible
    /// when `dedup` is set.
    pub fn new(message_type: &'static str, dedup: bool) -> Self {
        Self {
            message_type,
            dedup,
        }
    }
}

impl Default for RawCodec {
    fn default() -> Self {
        Self::new("raw", true)
    }
}

impl MessageCodec for RawCodec {
    type Message = RawMessage;

    fn parse(&self, frame: &Frame) -> Result<RawMessage, CodecError> {
        Ok(RawMessage {
            message_type: self.message_type,
            content: frame.payload.clone(),
            needs_dedup: self.dedup,
            sent_at: Some(frame.send_time()),
        })
    }

    fn serialize(&self, message: &RawMessage, dst: &mut BytesMut) -> Result<(), CodecError> {
        dst.put_slice(&message.content);
        Ok(())
    }
}
