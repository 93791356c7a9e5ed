use std::future::Future;

use peerlink_transport::{PeerId, Stream};

use crate::error::Result;

/// The node-level owner of all peers.
///
/// A peer holds a shared handle to its manager and calls back into it for
/// inbound delivery, for new outbound streams and to report itself dead.
pub trait PeerManager<M>: Send + Sync + 'static {
    /// Chain id this node belongs to. Frames carrying any other id are dropped.
    fn chain_id(&self) -> u32;

    /// Deliver an inbound message received from `from`.
    fn handle_message(&self, message: M, from: &PeerId) -> Result<()>;

    /// Drop `peer` from the neighbor set. Called when a peer can no longer
    /// obtain a stream.
    fn remove_neighbor(&self, peer: &PeerId);

    /// Open a new outbound stream to `peer`.
    fn new_outbound_stream(
        &self,
        peer: &PeerId,
    ) -> impl Future<Output = peerlink_transport::Result<Stream>> + Send;
}
