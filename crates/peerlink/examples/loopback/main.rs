//! Two in-process nodes gossiping over a memory connection.
//!
//! Alice submits a batch of normal messages and one urgent message to bob;
//! bob acknowledges each one. Alice's Prometheus metrics are printed at the
//! end.
//!
//! Run with:
//!   cargo run --example loopback -- --messages 32 --log-level debug

mod logging;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use peerlink::peer::{
    Peer, PeerConfig, PeerError, PeerManager, Priority, PrometheusMetrics, RawCodec, RawMessage,
    WireMessage,
};
use peerlink::transport::{MemoryConnection, PeerId, Stream};
use prometheus::{Encoder, Registry, TextEncoder};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::logging::{init_logging, LogFormat};

#[derive(Parser, Debug)]
#[command(name = "loopback", about = "Two peerlink nodes over a memory connection")]
struct Cli {
    /// Normal-priority messages alice sends.
    #[arg(long, default_value_t = 16)]
    messages: usize,

    /// Chain id both nodes run on.
    #[arg(long, default_value_t = 1)]
    chain_id: u32,

    /// Log output format (stderr).
    #[arg(long, value_name = "FORMAT", default_value = "text")]
    log_format: LogFormat,

    /// Minimum log level (stderr): error, warn, info, debug or trace.
    #[arg(long, value_name = "LEVEL", default_value = "info")]
    log_level: tracing::Level,
}

type DemoPeer = Peer<RawCodec, Node>;

struct Node {
    name: &'static str,
    chain_id: u32,
    conn: Arc<MemoryConnection>,
    inbox: mpsc::UnboundedSender<RawMessage>,
}

impl PeerManager<RawMessage> for Node {
    fn chain_id(&self) -> u32 {
        self.chain_id
    }

    fn handle_message(&self, message: RawMessage, from: &PeerId) -> Result<(), PeerError> {
        info!(node = self.name, %from, bytes = message.content().len(), "received message");
        self.inbox
            .send(message)
            .map_err(|_| PeerError::Rejected("node is shutting down".into()))
    }

    fn remove_neighbor(&self, peer: &PeerId) {
        warn!(node = self.name, %peer, "neighbor removed");
    }

    fn new_outbound_stream(
        &self,
        _peer: &PeerId,
    ) -> impl Future<Output = peerlink::transport::Result<Stream>> + Send {
        std::future::ready(self.conn.open_stream())
    }
}

fn spawn_node(
    name: &'static str,
    conn: MemoryConnection,
    chain_id: u32,
    registry: Option<&Registry>,
) -> Result<(Arc<DemoPeer>, mpsc::UnboundedReceiver<RawMessage>), Box<dyn std::error::Error>> {
    let conn = Arc::new(conn);
    let (tx, rx) = mpsc::unbounded_channel();
    let node = Arc::new(Node {
        name,
        chain_id,
        conn: Arc::clone(&conn),
        inbox: tx,
    });
    let codec = Arc::new(RawCodec::default());

    let peer = match registry {
        Some(registry) => Arc::new(Peer::with_metrics(
            conn.clone(),
            node,
            codec,
            PeerConfig::default(),
            Arc::new(PrometheusMetrics::register(registry)?),
        )?),
        None => Arc::new(Peer::new(conn.clone(), node, codec, PeerConfig::default())?),
    };

    let accept = Arc::downgrade(&peer);
    tokio::spawn(async move {
        while let Ok(stream) = conn.accept_stream().await {
            let Some(peer) = accept.upgrade() else {
                break;
            };
            if let Err(err) = peer.add_stream(stream) {
                warn!(node = name, err = %err, "rejecting inbound stream");
            }
        }
    });

    peer.start();
    Ok((peer, rx))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.log_level);

    let registry = Registry::new();
    let (a, b) = MemoryConnection::pair("alice", "bob");
    let (to_bob, mut alice_inbox) = spawn_node("alice", a, cli.chain_id, Some(&registry))?;
    let (to_alice, mut bob_inbox) = spawn_node("bob", b, cli.chain_id, None)?;

    for i in 0..cli.messages {
        to_bob.submit(RawMessage::new("tx", format!("tx-{i}")), Priority::Normal, true)?;
    }
    to_bob.submit(RawMessage::new("block", "block-1"), Priority::Urgent, true)?;
    // Resubmitting is suppressed by the dedup filter.
    if let Err(err) = to_bob.submit(RawMessage::new("block", "block-1"), Priority::Urgent, true) {
        info!(err = %err, "resubmission refused");
    }

    let expected = cli.messages + 1;
    for _ in 0..expected {
        let message = tokio::time::timeout(Duration::from_secs(5), bob_inbox.recv())
            .await?
            .ok_or("bob's inbox closed")?;
        let mut ack = b"ack-".to_vec();
        ack.extend_from_slice(message.content());
        to_alice.submit(RawMessage::new("ack", ack), Priority::Normal, true)?;
    }

    for _ in 0..expected {
        tokio::time::timeout(Duration::from_secs(5), alice_inbox.recv())
            .await?
            .ok_or("alice's inbox closed")?;
    }
    info!(acks = expected, streams = to_bob.stream_count(), "all messages acknowledged");

    to_bob.stop();
    to_alice.stop();

    let mut exposition = Vec::new();
    TextEncoder::new().encode(&registry.gather(), &mut exposition)?;
    print!("{}", String::from_utf8(exposition)?);
    Ok(())
}
