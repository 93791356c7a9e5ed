//! Outbound write loop.
//!
//! Urgent messages are written one at a time, in order, on the loop itself.
//! Normal messages are written on spawned tasks so several can be in flight
//! across streams, but only after every urgent message queued so far.
//!
//! The queue select is unbiased. When it lands on a normal message, the
//! urgent queue is drained first, so urgent still goes out ahead of it.

use std::sync::Arc;
use std::time::{Instant, SystemTime};

use bytes::BytesMut;
use peerlink_frame::{unix_nanos, Frame, FrameError};
use tokio::sync::mpsc;
use tracing::{debug, error, trace, warn};

use crate::error::{PeerError, Result};
use crate::manager::PeerManager;
use crate::message::{MessageCodec, WireMessage};
use crate::peer::PeerShared;
use crate::pool::PooledWriter;

pub(crate) async fn run<C, M>(
    shared: Arc<PeerShared<C, M>>,
    mut urgent: mpsc::Receiver<C::Message>,
    mut normal: mpsc::Receiver<C::Message>,
) where
    C: MessageCodec,
    M: PeerManager<C::Message>,
{
    debug!(peer = %shared.id, "write loop started");
    loop {
        if shared.shutdown.is_cancelled() {
            break;
        }
        tokio::select! {
            _ = shared.shutdown.cancelled() => break,
            Some(message) = urgent.recv() => {
                if !send_inline(&shared, message).await {
                    break;
                }
            }
            Some(message) = normal.recv() => {
                while let Ok(message) = urgent.try_recv() {
                    if !send_inline(&shared, message).await {
                        break;
                    }
                }
                if shared.shutdown.is_cancelled() {
                    break;
                }
                let task = Arc::clone(&shared);
                tokio::spawn(async move {
                    let _ = task.send(message).await;
                });
            }
            else => break,
        }
    }
    debug!(peer = %shared.id, "write loop stopped");
}

/// Send on the loop itself. Returns false if the peer stopped meanwhile.
async fn send_inline<C, M>(shared: &Arc<PeerShared<C, M>>, message: C::Message) -> bool
where
    C: MessageCodec,
    M: PeerManager<C::Message>,
{
    tokio::select! {
        biased;
        _ = shared.shutdown.cancelled() => false,
        _ = shared.send(message) => true,
    }
}

impl<C, M> PeerShared<C, M>
where
    C: MessageCodec,
    M: PeerManager<C::Message>,
{
    /// Write one message on a pooled stream.
    ///
    /// Failing to obtain a stream means the peer is unreachable and it is
    /// removed from the manager. A failed write only retires the stream.
    pub(crate) async fn send(self: &Arc<Self>, message: C::Message) -> Result<()> {
        let message_type = message.message_type();

        let acquire_started = Instant::now();
        let mut writer = match self.acquire_stream().await {
            Ok(writer) => writer,
            Err(err) => {
                error!(peer = %self.id, mtype = message_type, err = %err, "get stream failed, removing peer");
                self.manager.remove_neighbor(&self.id);
                return Err(err);
            }
        };
        let acquire_elapsed = acquire_started.elapsed();

        let sent_at = SystemTime::now();
        let message = message.with_send_time(sent_at);
        let mut payload = BytesMut::new();
        if let Err(err) = self.codec.serialize(&message, &mut payload) {
            warn!(peer = %self.id, mtype = message_type, err = %err, "serializing message failed");
            self.pool.release(writer);
            return Err(err.into());
        }

        // Nothing has touched the stream yet, so it goes back to the pool.
        let max = self.frame_config.max_payload_size;
        if payload.len() > max {
            warn!(peer = %self.id, mtype = message_type, size = payload.len(), max, "message too large to send");
            self.pool.release(writer);
            return Err(FrameError::PayloadTooLarge {
                size: payload.len(),
                max,
            }
            .into());
        }

        let frame = Frame::new(self.frame_config.chain_id, payload.freeze(), unix_nanos(sent_at));
        let deadline = self.config.write_deadline(frame.payload.len());
        let stream = writer.get_ref().id();

        let write_started = Instant::now();
        let written = match tokio::time::timeout(deadline, writer.write_frame(&frame)).await {
            Ok(result) => result.map_err(PeerError::from),
            Err(_) => Err(PeerError::WriteTimeout(deadline)),
        };
        if let Err(err) = written {
            warn!(peer = %self.id, stream, mtype = message_type, err = %err, "write message failed, retiring stream");
            self.pool.retire(writer).await;
            return Err(err);
        }
        let write_elapsed = write_started.elapsed();

        trace!(peer = %self.id, stream, mtype = message_type, bytes = frame.payload.len(), "message written");
        self.metrics
            .record_send_timing(message_type, acquire_elapsed, write_elapsed);
        self.metrics
            .record_outbound(message_type, frame.payload.len());
        self.pool.release(writer);
        Ok(())
    }

    /// Check out a stream, starting a reader if a new one had to be opened.
    async fn acquire_stream(self: &Arc<Self>) -> Result<PooledWriter> {
        let (writer, opened) = self
            .pool
            .acquire(|| self.manager.new_outbound_stream(&self.id))
            .await?;
        if let Some(read) = opened {
            debug!(peer = %self.id, stream = read.id(), "opened outbound stream");
            self.spawn_reader(read);
        }
        Ok(writer)
    }
}
