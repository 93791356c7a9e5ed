use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, DuplexStream, ReadBuf};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Mutex;
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};
use tracing::debug;

use crate::connection::{Connection, PeerId};
use crate::error::{Result, TransportError};
use crate::traits::Stream;

/// Default in-memory buffer per stream direction: 64 KiB.
pub const DEFAULT_STREAM_BUFFER: usize = 64 * 1024;

/// Streams opened but not yet accepted by the remote side.
const STREAM_BACKLOG: usize = 32;

/// One end of an in-process multiplexed connection.
///
/// Both ends share a single close signal, so closing either end aborts every
/// stream of the connection, the way a dropped TCP connection would.
pub struct MemoryConnection {
    remote_peer: PeerId,
    remote_addr: String,
    closed: CancellationToken,
    outbound: mpsc::Sender<Stream>,
    inbound: Mutex<mpsc::Receiver<Stream>>,
    buffer_size: usize,
}

impl MemoryConnection {
    /// Create a connected pair: the first end talks to `b`, the second to `a`.
    pub fn pair(a: impl Into<PeerId>, b: impl Into<PeerId>) -> (Self, Self) {
        Self::pair_with_buffer(a, b, DEFAULT_STREAM_BUFFER)
    }

    /// Create a connected pair with an explicit per-stream buffer size.
    ///
    /// Small buffers make writes stall until the remote side reads, which is
    /// how slow links are simulated.
    pub fn pair_with_buffer(
        a: impl Into<PeerId>,
        b: impl Into<PeerId>,
        buffer_size: usize,
    ) -> (Self, Self) {
        let a = a.into();
        let b = b.into();
        let closed = CancellationToken::new();
        let (a_tx, b_rx) = mpsc::channel(STREAM_BACKLOG);
        let (b_tx, a_rx) = mpsc::channel(STREAM_BACKLOG);

        let a_end = Self {
            remote_addr: format!("/memory/{b}"),
            remote_peer: b,
            closed: closed.clone(),
            outbound: a_tx,
            inbound: Mutex::new(a_rx),
            buffer_size,
        };
        let b_end = Self {
            remote_addr: format!("/memory/{a}"),
            remote_peer: a,
            closed,
            outbound: b_tx,
            inbound: Mutex::new(b_rx),
            buffer_size,
        };
        (a_end, b_end)
    }

    /// Open a new stream; the remote end receives its half from [`accept_stream`].
    ///
    /// [`accept_stream`]: MemoryConnection::accept_stream
    pub fn open_stream(&self) -> Result<Stream> {
        if self.closed.is_cancelled() {
            return Err(TransportError::Closed);
        }

        let (local, remote) = tokio::io::duplex(self.buffer_size);
        let remote = Stream::new(MemoryStream::new(remote, &self.closed));
        self.outbound.try_send(remote).map_err(|err| match err {
            TrySendError::Full(_) => TransportError::Backlog(STREAM_BACKLOG),
            TrySendError::Closed(_) => TransportError::Closed,
        })?;

        let local = Stream::new(MemoryStream::new(local, &self.closed));
        debug!(peer = %self.remote_peer, stream = local.id(), "opened memory stream");
        Ok(local)
    }

    /// Wait for the next stream opened by the remote end.
    pub async fn accept_stream(&self) -> Result<Stream> {
        let mut inbound = self.inbound.lock().await;
        tokio::select! {
            _ = self.closed.cancelled() => Err(TransportError::Closed),
            stream = inbound.recv() => stream.ok_or(TransportError::Closed),
        }
    }
}

impl Connection for MemoryConnection {
    fn remote_peer(&self) -> &PeerId {
        &self.remote_peer
    }

    fn remote_addr(&self) -> &str {
        &self.remote_addr
    }

    fn close(&self) {
        if !self.closed.is_cancelled() {
            debug!(peer = %self.remote_peer, "closing memory connection");
        }
        self.closed.cancel();
    }

    fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}

/// Duplex pipe that fails all I/O once its connection is closed.
struct MemoryStream {
    inner: DuplexStream,
    token: CancellationToken,
    closed: Pin<Box<WaitForCancellationFutureOwned>>,
}

impl MemoryStream {
    fn new(inner: DuplexStream, token: &CancellationToken) -> Self {
        Self {
            inner,
            token: token.clone(),
            closed: Box::pin(token.clone().cancelled_owned()),
        }
    }

    fn poll_closed(&mut self, cx: &mut Context<'_>) -> io::Result<()> {
        if self.token.is_cancelled() || self.closed.as_mut().poll(cx).is_ready() {
            return Err(io::Error::new(
                io::ErrorKind::ConnectionAborted,
                "connection closed",
            ));
        }
        Ok(())
    }
}

impl AsyncRead for MemoryStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if let Err(err) = self.poll_closed(cx) {
            return Poll::Ready(Err(err));
        }
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for MemoryStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        if let Err(err) = self.poll_closed(cx) {
            return Poll::Ready(Err(err));
        }
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}
