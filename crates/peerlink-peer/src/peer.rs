use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use peerlink_frame::FrameConfig;
use peerlink_transport::{Connection, PeerId, Stream};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::config::PeerConfig;
use crate::dedup::DedupFilter;
use crate::error::{PeerError, Result};
use crate::manager::PeerManager;
use crate::message::{MessageCodec, Priority, WireMessage};
use crate::metrics::{MetricsSink, NoopMetrics};
use crate::pool::StreamPool;
use crate::scheduler;

/// State shared by the peer handle, its write loop, its in-flight sends and
/// its stream readers.
pub(crate) struct PeerShared<C: MessageCodec, M> {
    pub(crate) id: PeerId,
    pub(crate) label: String,
    pub(crate) address: String,
    pub(crate) conn: Arc<dyn Connection>,
    pub(crate) manager: Arc<M>,
    pub(crate) codec: Arc<C>,
    pub(crate) metrics: Arc<dyn MetricsSink>,
    pub(crate) config: PeerConfig,
    pub(crate) frame_config: FrameConfig,
    pub(crate) pool: StreamPool,
    pub(crate) dedup: DedupFilter,
    pub(crate) shutdown: CancellationToken,
    urgent_tx: mpsc::Sender<C::Message>,
    normal_tx: mpsc::Sender<C::Message>,
}

struct Queues<T> {
    urgent: mpsc::Receiver<T>,
    normal: mpsc::Receiver<T>,
}

/// One directly connected remote node.
///
/// Owns a pool of up to `max_streams` streams on the underlying connection,
/// two bounded outbound queues and a dedup filter. Outbound messages go
/// through [`submit`](Peer::submit); inbound messages are handed to the
/// [`PeerManager`].
///
/// Must be created inside a Tokio runtime: adding a stream spawns its reader.
/// Dropping the handle stops the background tasks but leaves the connection
/// open; call [`stop`](Peer::stop) to close it as well.
pub struct Peer<C: MessageCodec, M> {
    shared: Arc<PeerShared<C, M>>,
    queues: Mutex<Option<Queues<C::Message>>>,
}

impl<C, M> Peer<C, M>
where
    C: MessageCodec,
    M: PeerManager<C::Message>,
{
    /// Create a peer over `conn` that reports no metrics.
    pub fn new(
        conn: Arc<dyn Connection>,
        manager: Arc<M>,
        codec: Arc<C>,
        config: PeerConfig,
    ) -> Result<Self> {
        Self::with_metrics(conn, manager, codec, config, Arc::new(NoopMetrics))
    }

    /// Create a peer over `conn` reporting to `metrics`.
    pub fn with_metrics(
        conn: Arc<dyn Connection>,
        manager: Arc<M>,
        codec: Arc<C>,
        config: PeerConfig,
        metrics: Arc<dyn MetricsSink>,
    ) -> Result<Self> {
        config.validate()?;

        let id = conn.remote_peer().clone();
        let address = conn.remote_addr().to_string();
        let label = config.labels.label_for(&id);
        let frame_config = config.frame_config(manager.chain_id());
        let (urgent_tx, urgent) = mpsc::channel(config.queue_capacity);
        let (normal_tx, normal) = mpsc::channel(config.queue_capacity);

        debug!(peer = %id, addr = %address, "creating peer");

        let shared = Arc::new(PeerShared {
            pool: StreamPool::new(config.max_streams, frame_config.clone()),
            dedup: DedupFilter::new(config.dedup_capacity, config.dedup_false_positive_rate),
            id,
            label,
            address,
            conn,
            manager,
            codec,
            metrics,
            frame_config,
            config,
            shutdown: CancellationToken::new(),
            urgent_tx,
            normal_tx,
        });

        Ok(Self {
            shared,
            queues: Mutex::new(Some(Queues { urgent, normal })),
        })
    }

    /// Start the write loop. Only the first call has an effect.
    pub fn start(&self) {
        let Some(queues) = self.lock_queues().take() else {
            debug!(peer = %self.shared.id, "peer already started");
            return;
        };
        if self.shared.shutdown.is_cancelled() {
            return;
        }

        info!(peer = %self.shared.id, addr = %self.shared.address, "peer is started");
        tokio::spawn(scheduler::run(
            Arc::clone(&self.shared),
            queues.urgent,
            queues.normal,
        ));
    }

    /// Stop all background work and close the connection. Idempotent.
    ///
    /// Messages still queued are discarded.
    pub fn stop(&self) {
        if self.shared.shutdown.is_cancelled() {
            return;
        }
        info!(peer = %self.shared.id, addr = %self.shared.address, "peer is stopped");
        self.shared.shutdown.cancel();
        self.shared.conn.close();
        self.lock_queues().take();
    }

    /// Add an accepted or pre-opened stream and start reading from it.
    pub fn add_stream(&self, stream: Stream) -> Result<()> {
        if self.shared.shutdown.is_cancelled() {
            return Err(PeerError::Stopped);
        }
        let id = stream.id();
        let read = self.shared.pool.register(stream)?;
        debug!(peer = %self.shared.id, stream = id, "stream added");
        self.shared.spawn_reader(read);
        Ok(())
    }

    /// Queue `message` for sending.
    ///
    /// Fails without blocking when the queue for `priority` is full, or when
    /// `deduplicate` is set and the message was recently seen. Dedup-eligible
    /// messages are recorded when queued, not when written, so repeats
    /// submitted while the first copy is still waiting are suppressed too.
    pub fn submit(&self, message: C::Message, priority: Priority, deduplicate: bool) -> Result<()> {
        if self.shared.shutdown.is_cancelled() {
            return Err(PeerError::Stopped);
        }

        let dedup = message.needs_dedup();
        if deduplicate && dedup && self.shared.dedup.might_contain(message.content()) {
            trace!(
                peer = %self.shared.id,
                mtype = message.message_type(),
                "suppressing duplicate message"
            );
            return Err(PeerError::DuplicateMessage);
        }

        let queue = match priority {
            Priority::Urgent => &self.shared.urgent_tx,
            Priority::Normal => &self.shared.normal_tx,
        };
        let permit = queue.try_reserve().map_err(|err| match err {
            TrySendError::Full(()) => {
                warn!(
                    peer = %self.shared.id,
                    mtype = message.message_type(),
                    %priority,
                    "send queue is full, dropping message"
                );
                PeerError::ChannelFull(priority)
            }
            TrySendError::Closed(()) => PeerError::Stopped,
        })?;

        if dedup {
            self.shared.dedup.record(message.content());
        }
        permit.send(message);
        Ok(())
    }

    /// Whether `content` was recently sent to or received from this peer.
    pub fn has_seen(&self, content: &[u8]) -> bool {
        self.shared.dedup.might_contain(content)
    }

    pub fn id(&self) -> &PeerId {
        &self.shared.id
    }

    /// Remote transport address.
    pub fn address(&self) -> &str {
        &self.shared.address
    }

    /// Display label used in metrics.
    pub fn label(&self) -> &str {
        &self.shared.label
    }

    pub fn is_stopped(&self) -> bool {
        self.shared.shutdown.is_cancelled()
    }

    /// Streams counted against the cap, including ones checked out.
    pub fn stream_count(&self) -> usize {
        self.shared.pool.live()
    }

    pub fn config(&self) -> &PeerConfig {
        &self.shared.config
    }

    fn lock_queues(&self) -> MutexGuard<'_, Option<Queues<C::Message>>> {
        self.queues.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<C: MessageCodec, M> Drop for Peer<C, M> {
    fn drop(&mut self) {
        self.shared.shutdown.cancel();
    }
}

impl<C: MessageCodec, M> fmt::Debug for Peer<C, M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Peer")
            .field("id", &self.shared.id)
            .field("address", &self.shared.address)
            .field("streams", &self.shared.pool.live())
            .field("stopped", &self.shared.shutdown.is_cancelled())
            .finish()
    }
}
