//! Bounded set of outbound streams to one remote.
//!
//! Streams are checked out exclusively for one frame write and handed back
//! afterwards. The pool never exceeds its cap; when every stream is busy the
//! caller waits for one to come back or for a slot to free up.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use peerlink_frame::{FrameConfig, FrameWriter};
use peerlink_transport::{Stream, StreamReadHalf, StreamWriteHalf};
use tokio::sync::Notify;
use tracing::debug;

use crate::error::{PeerError, Result};

/// Upper bound on closing a retired stream.
const RETIRE_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

/// Write side of a pooled stream.
pub type PooledWriter = FrameWriter<StreamWriteHalf>;

struct PoolState {
    idle: VecDeque<PooledWriter>,
    /// Idle + checked out + slots reserved for streams being opened.
    live: usize,
}

enum Checkout {
    Idle(PooledWriter),
    Reserved,
    Exhausted,
}

pub struct StreamPool {
    state: Mutex<PoolState>,
    available: Notify,
    max_streams: usize,
    frame_config: FrameConfig,
}

impl StreamPool {
    pub fn new(max_streams: usize, frame_config: FrameConfig) -> Self {
        Self {
            state: Mutex::new(PoolState {
                idle: VecDeque::with_capacity(max_streams),
                live: 0,
            }),
            available: Notify::new(),
            max_streams,
            frame_config,
        }
    }

    /// Add an existing stream. Its write half becomes idle; the read half is
    /// returned so the caller can start a reader on it.
    pub fn register(&self, stream: Stream) -> Result<StreamReadHalf> {
        let mut state = self.lock();
        if state.live >= self.max_streams {
            return Err(PeerError::StreamCountExceeded {
                max: self.max_streams,
            });
        }
        state.live += 1;
        let (read, write) = stream.into_split();
        state.idle.push_back(self.writer(write));
        drop(state);

        self.available.notify_one();
        Ok(read)
    }

    /// Check out a stream for exclusive use.
    ///
    /// Prefers an idle stream. Otherwise opens a new one with `open` if under
    /// the cap, in which case the read half of the new stream is returned too.
    /// At the cap, waits until a stream is released or retired.
    pub async fn acquire<F, Fut>(&self, open: F) -> Result<(PooledWriter, Option<StreamReadHalf>)>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = peerlink_transport::Result<Stream>>,
    {
        loop {
            match self.try_checkout() {
                Checkout::Idle(writer) => return Ok((writer, None)),
                Checkout::Reserved => break,
                // notify_one leaves a permit when nobody waits, so a release
                // racing this branch is not lost.
                Checkout::Exhausted => self.available.notified().await,
            }
        }

        match open().await {
            Ok(stream) => {
                let (read, write) = stream.into_split();
                debug!(stream = write.id(), "opened pooled stream");
                Ok((self.writer(write), Some(read)))
            }
            Err(err) => {
                self.lock().live -= 1;
                self.available.notify_one();
                Err(err.into())
            }
        }
    }

    /// Return a stream after a successful write.
    pub fn release(&self, writer: PooledWriter) {
        let mut state = self.lock();
        if writer.get_ref().is_broken() {
            state.live -= 1;
            debug!(stream = writer.get_ref().id(), "released stream is broken, dropping");
        } else {
            state.idle.push_back(writer);
        }
        drop(state);
        self.available.notify_one();
    }

    /// Permanently remove a checked-out stream and close it for writing.
    pub async fn retire(&self, mut writer: PooledWriter) {
        let id = writer.get_ref().id();
        self.lock().live -= 1;
        self.available.notify_one();

        match tokio::time::timeout(RETIRE_SHUTDOWN_TIMEOUT, writer.shutdown()).await {
            Ok(Ok(())) => debug!(stream = id, "retired stream"),
            Ok(Err(err)) => debug!(stream = id, err = %err, "retired stream, shutdown failed"),
            Err(_) => debug!(stream = id, "retired stream, shutdown timed out"),
        }
    }

    /// Drop idle streams whose read side has failed.
    pub fn evict_broken(&self) -> usize {
        let mut state = self.lock();
        let before = state.idle.len();
        state.idle.retain(|writer| !writer.get_ref().is_broken());
        let evicted = before - state.idle.len();
        state.live -= evicted;
        drop(state);

        if evicted > 0 {
            debug!(evicted, "evicted broken streams");
            self.available.notify_one();
        }
        evicted
    }

    /// Streams currently counted against the cap.
    pub fn live(&self) -> usize {
        self.lock().live
    }

    pub fn idle(&self) -> usize {
        self.lock().idle.len()
    }

    pub fn max_streams(&self) -> usize {
        self.max_streams
    }

    fn try_checkout(&self) -> Checkout {
        let mut state = self.lock();
        while let Some(writer) = state.idle.pop_front() {
            if writer.get_ref().is_broken() {
                state.live -= 1;
                debug!(stream = writer.get_ref().id(), "skipping broken idle stream");
                continue;
            }
            return Checkout::Idle(writer);
        }
        if state.live < self.max_streams {
            state.live += 1;
            return Checkout::Reserved;
        }
        Checkout::Exhausted
    }

    fn writer(&self, write: StreamWriteHalf) -> PooledWriter {
        FrameWriter::with_config(write, self.frame_config.clone())
    }

    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
