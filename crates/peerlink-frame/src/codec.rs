use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::{FrameError, Result};

/// Frame header: chain id (4) + payload length (4) = 8 bytes.
pub const HEADER_SIZE: usize = 8;

/// Frame trailer: send time in nanoseconds (8).
pub const TRAILER_SIZE: usize = 8;

/// Default maximum payload size: 16 MiB.
pub const DEFAULT_MAX_PAYLOAD: usize = 16 * 1024 * 1024;

/// Fixed header fields that precede every payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub chain_id: u32,
    pub length: u32,
}

impl FrameHeader {
    /// Parse a header from the first [`HEADER_SIZE`] bytes of `src`.
    ///
    /// Returns `None` if fewer bytes are available.
    pub fn parse(src: &[u8]) -> Option<Self> {
        if src.len() < HEADER_SIZE {
            return None;
        }
        let mut header = &src[..HEADER_SIZE];
        Some(Self {
            chain_id: header.get_u32(),
            length: header.get_u32(),
        })
    }
}

/// One decoded wire unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Chain the sender belongs to.
    pub chain_id: u32,
    /// Codec payload.
    pub payload: Bytes,
    /// Sender clock at serialization time, nanoseconds since the Unix epoch.
    pub send_time_nanos: u64,
}

impl Frame {
    /// Create a new frame.
    pub fn new(chain_id: u32, payload: impl Into<Bytes>, send_time_nanos: u64) -> Self {
        Self {
            chain_id,
            payload: payload.into(),
            send_time_nanos,
        }
    }

    /// Header describing this frame.
    ///
    /// Payloads longer than `u32::MAX` are rejected by [`encode_frame`]; the
    /// length here saturates.
    pub fn header(&self) -> FrameHeader {
        FrameHeader {
            chain_id: self.chain_id,
            length: u32::try_from(self.payload.len()).unwrap_or(u32::MAX),
        }
    }

    /// The total wire size of this frame (header + payload + trailer).
    pub fn wire_size(&self) -> usize {
        HEADER_SIZE + self.payload.len() + TRAILER_SIZE
    }

    /// Sender clock at serialization time.
    pub fn send_time(&self) -> SystemTime {
        UNIX_EPOCH + Duration::from_nanos(self.send_time_nanos)
    }

    /// Nanoseconds between the embedded send time and `now`.
    ///
    /// Negative when the sender's clock runs ahead of ours.
    pub fn latency_nanos(&self, now: SystemTime) -> i64 {
        let elapsed = i128::from(unix_nanos(now)) - i128::from(self.send_time_nanos);
        elapsed.clamp(i128::from(i64::MIN), i128::from(i64::MAX)) as i64
    }
}

/// Nanoseconds since the Unix epoch, saturating; 0 for pre-epoch times.
pub fn unix_nanos(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|elapsed| u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

/// Encode a frame into the wire format.
///
/// Wire format:
/// ```text
/// ┌──────────────┬──────────────┬──────────────────┬────────────────┐
/// │ Chain ID     │ Length       │ Payload          │ Send time      │
/// │ (4B BE)      │ (4B BE)      │ (Length bytes)   │ (8B BE nanos)  │
/// └──────────────┴──────────────┴──────────────────┴────────────────┘
/// ```
pub fn encode_frame(frame: &Frame, dst: &mut BytesMut) -> Result<()> {
    let length = u32::try_from(frame.payload.len()).map_err(|_| FrameError::PayloadTooLarge {
        size: frame.payload.len(),
        max: u32::MAX as usize,
    })?;
    dst.reserve(frame.wire_size());
    dst.put_u32(frame.chain_id);
    dst.put_u32(length);
    dst.put_slice(&frame.payload);
    dst.put_u64(frame.send_time_nanos);
    Ok(())
}

/// Decode a frame from a buffer.
///
/// The chain id is validated as soon as the header is buffered, before any
/// payload is waited for. Returns `Ok(None)` if the buffer doesn't contain a
/// complete frame yet; on success, consumes the frame bytes from the buffer.
pub fn decode_frame(src: &mut BytesMut, config: &FrameConfig) -> Result<Option<Frame>> {
    let Some(header) = FrameHeader::parse(&src[..]) else {
        return Ok(None); // Need more data
    };

    if header.chain_id != config.chain_id {
        return Err(FrameError::ChainIdMismatch {
            expected: config.chain_id,
            actual: header.chain_id,
        });
    }

    let payload_len = header.length as usize;
    if payload_len > config.max_payload_size {
        return Err(FrameError::PayloadTooLarge {
            size: payload_len,
            max: config.max_payload_size,
        });
    }

    let total = HEADER_SIZE + payload_len + TRAILER_SIZE;
    if src.len() < total {
        src.reserve(total - src.len());
        return Ok(None); // Need more data
    }

    src.advance(HEADER_SIZE);
    let payload = src.split_to(payload_len).freeze();
    let send_time_nanos = src.get_u64();

    Ok(Some(Frame {
        chain_id: header.chain_id,
        payload,
        send_time_nanos,
    }))
}

/// Configuration for the frame codec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameConfig {
    /// Chain id every inbound frame must carry.
    pub chain_id: u32,
    /// Maximum payload size in bytes. Default: 16 MiB.
    pub max_payload_size: usize,
}

impl FrameConfig {
    /// Configuration for `chain_id` with the default payload cap.
    pub fn new(chain_id: u32) -> Self {
        Self {
            chain_id,
            ..Self::default()
        }
    }
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            chain_id: 0,
            max_payload_size: DEFAULT_MAX_PAYLOAD,
        }
    }
}

/// `tokio_util` codec for the wire format.
#[derive(Debug, Clone, Default)]
pub struct WireCodec {
    config: FrameConfig,
}

impl WireCodec {
    pub fn new(config: FrameConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

impl Decoder for WireCodec {
    type Item = Frame;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
        decode_frame(src, &self.config)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None if src.is_empty() => Ok(None),
            None => Err(FrameError::ConnectionClosed),
        }
    }
}

impl Encoder<&Frame> for WireCodec {
    type Error = FrameError;

    fn encode(&mut self, frame: &Frame, dst: &mut BytesMut) -> Result<()> {
        if frame.payload.len() > self.config.max_payload_size {
            return Err(FrameError::PayloadTooLarge {
                size: frame.payload.len(),
                max: self.config.max_payload_size,
            });
        }
        encode_frame(frame, dst)
    }
}

impl Encoder<Frame> for WireCodec {
    type Error = FrameError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<()> {
        Encoder::<&Frame>::encode(self, &frame, dst)
    }
}
