use std::fmt;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf, ReadHalf, WriteHalf};

/// Any duplex byte stream a transport can hand out.
pub trait MuxStream: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> MuxStream for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

static NEXT_STREAM_ID: AtomicU64 = AtomicU64::new(1);

/// One multiplexed duplex channel to a remote peer.
///
/// Each stream carries a process-unique id for logging. A stream is usually
/// split with [`Stream::into_split`] so one task can read while another writes.
pub struct Stream {
    id: u64,
    inner: Box<dyn MuxStream>,
}

impl Stream {
    /// Wrap a transport stream.
    pub fn new(inner: impl MuxStream) -> Self {
        Self {
            id: NEXT_STREAM_ID.fetch_add(1, Ordering::Relaxed),
            inner: Box::new(inner),
        }
    }

    /// Process-unique stream id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Split into independently owned read and write halves.
    ///
    /// The halves share a "broken" flag: once the read side marks the stream
    /// broken, the write side reports it through [`StreamWriteHalf::is_broken`].
    pub fn into_split(self) -> (StreamReadHalf, StreamWriteHalf) {
        let broken = Arc::new(AtomicBool::new(false));
        let (read, write) = tokio::io::split(self.inner);
        (
            StreamReadHalf {
                id: self.id,
                inner: read,
                broken: Arc::clone(&broken),
            },
            StreamWriteHalf {
                id: self.id,
                inner: write,
                broken,
            },
        )
    }
}

impl fmt::Debug for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stream").field("id", &self.id).finish()
    }
}

impl AsyncRead for Stream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for Stream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

/// Read side of a split [`Stream`].
pub struct StreamReadHalf {
    id: u64,
    inner: ReadHalf<Box<dyn MuxStream>>,
    broken: Arc<AtomicBool>,
}

impl StreamReadHalf {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Flag the whole stream as unusable.
    pub fn mark_broken(&self) {
        self.broken.store(true, Ordering::Release);
    }
}

impl fmt::Debug for StreamReadHalf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamReadHalf")
            .field("id", &self.id)
            .field("broken", &self.broken.load(Ordering::Acquire))
            .finish()
    }
}

impl AsyncRead for StreamReadHalf {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

/// Write side of a split [`Stream`].
pub struct StreamWriteHalf {
    id: u64,
    inner: WriteHalf<Box<dyn MuxStream>>,
    broken: Arc<AtomicBool>,
}

impl StreamWriteHalf {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// True once the read side has failed.
    pub fn is_broken(&self) -> bool {
        self.broken.load(Ordering::Acquire)
    }
}

impl fmt::Debug for StreamWriteHalf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamWriteHalf")
            .field("id", &self.id)
            .field("broken", &self.is_broken())
            .finish()
    }
}

impl AsyncWrite for StreamWriteHalf {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use super::*;

    #[test]
    fn stream_ids_are_unique() {
        let (a, b) = tokio::io::duplex(64);
        let a = Stream::new(a);
        let b = Stream::new(b);
        assert_ne!(a.id(), b.id());
    }

    #[tokio::test]
    async fn split_halves_share_broken_flag() {
        let (a, _b) = tokio::io::duplex(64);
        let (read, write) = Stream::new(a).into_split();

        assert_eq!(read.id(), write.id());
        assert!(!write.is_broken());
        read.mark_broken();
        assert!(write.is_broken());
    }

    #[tokio::test]
    async fn split_halves_carry_bytes() {
        let (a, b) = tokio::io::duplex(64);
        let (_a_read, mut a_write) = Stream::new(a).into_split();
        let (mut b_read, _b_write) = Stream::new(b).into_split();

        a_write.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        b_read.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");
    }
}
