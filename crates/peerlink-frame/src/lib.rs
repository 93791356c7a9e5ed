//! Wire framing for peer streams.
//!
//! Every message on a stream is framed as:
//! - a 4-byte big-endian chain identifier, checked against local configuration
//! - a 4-byte big-endian payload length
//! - the codec payload
//! - an 8-byte big-endian send timestamp (nanoseconds since the Unix epoch)
//!
//! The trailing timestamp sits outside the payload so message codecs never see
//! it; it only feeds latency measurement on the receiving side.

pub mod codec;
pub mod error;
pub mod reader;
pub mod writer;

pub use codec::{
    decode_frame, encode_frame, unix_nanos, Frame, FrameConfig, FrameHeader, WireCodec,
    DEFAULT_MAX_PAYLOAD, HEADER_SIZE, TRAILER_SIZE,
};
pub use error::{FrameError, Result};
pub use reader::FrameReader;
pub use writer::FrameWriter;
