use std::fmt;

/// Opaque identity of a remote peer as reported by the transport.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(String);

impl PeerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for PeerId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// The primary connection to a remote peer, over which streams are multiplexed.
pub trait Connection: Send + Sync + 'static {
    /// Identity of the remote peer.
    fn remote_peer(&self) -> &PeerId;

    /// Remote address in transport-specific notation.
    fn remote_addr(&self) -> &str;

    /// Tear down the connection.
    ///
    /// Must be idempotent. Pending reads and writes on every stream of this
    /// connection fail once it returns.
    fn close(&self);

    /// Whether [`Connection::close`] has been called (by either side).
    fn is_closed(&self) -> bool;
}
