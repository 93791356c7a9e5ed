#![allow(dead_code)]

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use peerlink_peer::{MetricsSink, Peer, PeerConfig, PeerError, PeerManager, RawCodec, RawMessage};
use peerlink_transport::{MemoryConnection, PeerId, Stream, TransportError};
use tokio::sync::mpsc;

pub type TestPeer = Peer<RawCodec, TestManager>;

/// Manager that opens streams on a memory connection and forwards inbound
/// messages to a channel.
pub struct TestManager {
    chain_id: u32,
    conn: Arc<MemoryConnection>,
    delivered: mpsc::UnboundedSender<(PeerId, RawMessage)>,
    removed: Mutex<Vec<PeerId>>,
    opened: AtomicUsize,
    refuse_streams: AtomicBool,
}

impl TestManager {
    pub fn new(
        chain_id: u32,
        conn: Arc<MemoryConnection>,
        delivered: mpsc::UnboundedSender<(PeerId, RawMessage)>,
    ) -> Self {
        Self {
            chain_id,
            conn,
            delivered,
            removed: Mutex::new(Vec::new()),
            opened: AtomicUsize::new(0),
            refuse_streams: AtomicBool::new(false),
        }
    }

    pub fn removed(&self) -> Vec<PeerId> {
        self.removed.lock().unwrap().clone()
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn refuse_streams(&self) {
        self.refuse_streams.store(true, Ordering::SeqCst);
    }
}

impl PeerManager<RawMessage> for TestManager {
    fn chain_id(&self) -> u32 {
        self.chain_id
    }

    fn handle_message(&self, message: RawMessage, from: &PeerId) -> Result<(), PeerError> {
        self.delivered
            .send((from.clone(), message))
            .map_err(|_| PeerError::Rejected("inbox closed".into()))
    }

    fn remove_neighbor(&self, peer: &PeerId) {
        self.removed.lock().unwrap().push(peer.clone());
    }

    fn new_outbound_stream(
        &self,
        _peer: &PeerId,
    ) -> impl Future<Output = peerlink_transport::Result<Stream>> + Send {
        let result = if self.refuse_streams.load(Ordering::SeqCst) {
            Err(TransportError::Refused("refused by test".into()))
        } else {
            self.opened.fetch_add(1, Ordering::SeqCst);
            self.conn.open_stream()
        };
        std::future::ready(result)
    }
}

#[derive(Default)]
pub struct RecordingMetrics {
    outbound: Mutex<Vec<(String, usize)>>,
    inbound: Mutex<Vec<(String, usize)>>,
    latencies: Mutex<Vec<(String, String, i64)>>,
}

impl RecordingMetrics {
    pub fn outbound(&self) -> Vec<(String, usize)> {
        self.outbound.lock().unwrap().clone()
    }

    pub fn inbound(&self) -> Vec<(String, usize)> {
        self.inbound.lock().unwrap().clone()
    }

    pub fn latencies(&self) -> Vec<(String, String, i64)> {
        self.latencies.lock().unwrap().clone()
    }
}

impl MetricsSink for RecordingMetrics {
    fn record_outbound(&self, message_type: &str, bytes: usize) {
        self.outbound
            .lock()
            .unwrap()
            .push((message_type.to_string(), bytes));
    }

    fn record_inbound(&self, message_type: &str, bytes: usize) {
        self.inbound
            .lock()
            .unwrap()
            .push((message_type.to_string(), bytes));
    }

    fn record_latency(&self, message_type: &str, from: &str, latency_nanos: i64) {
        self.latencies.lock().unwrap().push((
            message_type.to_string(),
            from.to_string(),
            latency_nanos,
        ));
    }
}

/// One side of a test link: a peer for the remote plus everything it talks to.
pub struct Node {
    pub peer: Arc<TestPeer>,
    pub manager: Arc<TestManager>,
    pub metrics: Arc<RecordingMetrics>,
    pub conn: Arc<MemoryConnection>,
    pub inbox: mpsc::UnboundedReceiver<(PeerId, RawMessage)>,
}

impl Node {
    /// Build a peer over `conn` and accept the remote's streams into it.
    pub fn new(conn: MemoryConnection, chain_id: u32, config: PeerConfig) -> Self {
        let conn = Arc::new(conn);
        let (delivered, inbox) = mpsc::unbounded_channel();
        let manager = Arc::new(TestManager::new(chain_id, Arc::clone(&conn), delivered));
        let metrics = Arc::new(RecordingMetrics::default());
        let peer = Arc::new(
            Peer::with_metrics(
                conn.clone(),
                Arc::clone(&manager),
                Arc::new(RawCodec::default()),
                config,
                metrics.clone(),
            )
            .expect("peer config should be valid"),
        );

        let accept_conn = Arc::clone(&conn);
        let accept_peer = Arc::downgrade(&peer);
        tokio::spawn(async move {
            while let Ok(stream) = accept_conn.accept_stream().await {
                let Some(peer) = accept_peer.upgrade() else {
                    break;
                };
                let _ = peer.add_stream(stream);
            }
        });

        Self {
            peer,
            manager,
            metrics,
            conn,
            inbox,
        }
    }

    /// Next delivered message, or None after two seconds.
    pub async fn next_message(&mut self) -> Option<(PeerId, RawMessage)> {
        tokio::time::timeout(Duration::from_secs(2), self.inbox.recv())
            .await
            .ok()
            .flatten()
    }
}

/// Connected "alice" and "bob" nodes. `alice.peer` represents bob and vice versa.
pub fn link(alice_chain: u32, bob_chain: u32, config: PeerConfig) -> (Node, Node) {
    let (a, b) = MemoryConnection::pair("alice", "bob");
    (
        Node::new(a, alice_chain, config.clone()),
        Node::new(b, bob_chain, config),
    )
}

/// Poll `check` until it holds, failing the test after two seconds.
pub async fn eventually(what: &str, mut check: impl FnMut() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}
