/// Errors that can occur in transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// An I/O error occurred on the transport.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The connection has been closed.
    #[error("connection closed")]
    Closed,

    /// The remote side has too many unaccepted streams.
    #[error("stream backlog full ({0} pending)")]
    Backlog(usize),

    /// The transport refused to open a stream.
    #[error("stream refused: {0}")]
    Refused(String),
}

pub type Result<T> = std::result::Result<T, TransportError>;
