//! Per-stream inbound loop.

use std::sync::Arc;
use std::time::SystemTime;

use peerlink_frame::{FrameError, FrameReader};
use peerlink_transport::StreamReadHalf;
use tracing::{debug, trace, warn};

use crate::manager::PeerManager;
use crate::message::{MessageCodec, WireMessage};
use crate::peer::PeerShared;

impl<C, M> PeerShared<C, M>
where
    C: MessageCodec,
    M: PeerManager<C::Message>,
{
    pub(crate) fn spawn_reader(self: &Arc<Self>, stream: StreamReadHalf) {
        tokio::spawn(read_loop(Arc::clone(self), stream));
    }

    fn deliver(&self, message: C::Message) {
        if message.needs_dedup() {
            self.dedup.record(message.content());
        }
        let message_type = message.message_type();
        if let Err(err) = self.manager.handle_message(message, &self.id) {
            debug!(peer = %self.id, mtype = message_type, err = %err, "peer manager rejected message");
        }
    }
}

/// Read frames until the stream fails or the peer stops. On exit the stream
/// is marked broken so the pool stops handing out its write half.
async fn read_loop<C, M>(shared: Arc<PeerShared<C, M>>, stream: StreamReadHalf)
where
    C: MessageCodec,
    M: PeerManager<C::Message>,
{
    let stream_id = stream.id();
    trace!(peer = %shared.id, stream = stream_id, "stream reader started");
    let mut reader = FrameReader::with_config(stream, shared.frame_config.clone());

    loop {
        let read = tokio::select! {
            biased;
            _ = shared.shutdown.cancelled() => break,
            read = reader.read_frame() => read,
        };

        let frame = match read {
            Ok(frame) => frame,
            Err(FrameError::ConnectionClosed) => {
                debug!(peer = %shared.id, stream = stream_id, "stream closed by remote");
                break;
            }
            Err(err @ FrameError::ChainIdMismatch { .. }) => {
                warn!(peer = %shared.id, stream = stream_id, err = %err, "mismatched chain id, closing stream");
                break;
            }
            Err(err) => {
                warn!(peer = %shared.id, stream = stream_id, err = %err, "read message failed");
                break;
            }
        };

        let message = match shared.codec.parse(&frame) {
            Ok(message) => message,
            Err(err) => {
                warn!(peer = %shared.id, stream = stream_id, err = %err, "parsing message failed");
                break;
            }
        };

        let message_type = message.message_type();
        shared
            .metrics
            .record_inbound(message_type, frame.payload.len());
        shared.metrics.record_latency(
            message_type,
            &shared.label,
            frame.latency_nanos(SystemTime::now()),
        );
        shared.deliver(message);
    }

    let stream = reader.into_inner();
    stream.mark_broken();
    drop(stream);
    shared.pool.evict_broken();
    trace!(peer = %shared.id, stream = stream_id, "stream reader stopped");
}
