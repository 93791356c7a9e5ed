//! Stream and connection abstraction for peer links.
//!
//! Transports that establish a secured, multiplexed connection to a remote
//! peer (yamux over TCP, QUIC, ...) live outside this workspace. They plug in
//! here by handing out [`Stream`]s and implementing [`Connection`] for the
//! primary connection handle.
//!
//! [`memory`] provides an in-process connection pair used by tests and demos.

pub mod connection;
pub mod error;
pub mod memory;
pub mod traits;

pub use connection::{Connection, PeerId};
pub use error::{Result, TransportError};
pub use memory::MemoryConnection;
pub use traits::{MuxStream, Stream, StreamReadHalf, StreamWriteHalf};
