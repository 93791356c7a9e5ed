mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use common::{eventually, link, Node};
use peerlink_peer::{PeerConfig, PeerError, PeerLabels, Priority, RawMessage, WireMessage};
use peerlink_transport::MemoryConnection;

#[tokio::test]
async fn message_is_delivered_with_latency() {
    let config = PeerConfig {
        labels: PeerLabels::new().with("alice", "Alice"),
        ..PeerConfig::default()
    };
    let (alice, mut bob) = link(7, 7, config);
    alice.peer.start();

    alice
        .peer
        .submit(RawMessage::new("block", "block-1"), Priority::Normal, true)
        .expect("message should be queued");

    let (from, message) = bob.next_message().await.expect("bob should receive block-1");
    assert_eq!(from.as_str(), "alice");
    assert_eq!(message.content(), b"block-1");
    assert_eq!(message.message_type(), "raw");
    assert!(message.sent_at().is_some());

    assert_eq!(bob.metrics.inbound(), vec![("raw".to_string(), 7)]);
    let latencies = bob.metrics.latencies();
    assert_eq!(latencies.len(), 1);
    assert_eq!(latencies[0].1, "Alice");
    assert!(latencies[0].2 >= 0);

    eventually("sender to record outbound traffic", || {
        alice.metrics.outbound() == vec![("block".to_string(), 7)]
    })
    .await;
}

#[tokio::test]
async fn received_content_is_not_echoed_back() {
    let (alice, mut bob) = link(7, 7, PeerConfig::default());
    alice.peer.start();
    bob.peer.start();

    alice
        .peer
        .submit(RawMessage::new("tx", "tx-9"), Priority::Normal, true)
        .expect("message should be queued");
    bob.next_message().await.expect("bob should receive tx-9");

    let err = bob
        .peer
        .submit(RawMessage::new("tx", "tx-9"), Priority::Normal, true)
        .unwrap_err();
    assert!(matches!(err, PeerError::DuplicateMessage));
}

#[tokio::test]
async fn foreign_chain_frames_are_dropped() {
    let (alice, mut bob) = link(8, 7, PeerConfig::default());
    alice.peer.start();

    alice
        .peer
        .submit(RawMessage::new("block", "wrong-chain"), Priority::Urgent, true)
        .expect("message should be queued");

    assert!(bob.next_message().await.is_none());
    assert!(bob.metrics.inbound().is_empty());
    assert!(!bob.peer.has_seen(b"wrong-chain"));

    // The reader gave up on the stream, so bob no longer counts it.
    eventually("bob to evict the stream", || bob.peer.stream_count() == 0).await;
}

#[tokio::test]
async fn urgent_messages_go_before_queued_normal_ones() {
    let config = PeerConfig {
        max_streams: 1,
        ..PeerConfig::default()
    };
    let (alice, mut bob) = link(7, 7, config);

    for i in 0..3 {
        alice
            .peer
            .submit(RawMessage::new("tx", format!("normal-{i}")), Priority::Normal, true)
            .expect("normal message should be queued");
    }
    for i in 0..3 {
        alice
            .peer
            .submit(RawMessage::new("vote", format!("urgent-{i}")), Priority::Urgent, true)
            .expect("urgent message should be queued");
    }
    alice.peer.start();

    let mut received = Vec::new();
    for _ in 0..6 {
        let (_, message) = bob.next_message().await.expect("bob should receive all six");
        received.push(String::from_utf8(message.content().to_vec()).unwrap());
    }

    assert_eq!(&received[..3], ["urgent-0", "urgent-1", "urgent-2"]);
    let mut normal = received[3..].to_vec();
    normal.sort();
    assert_eq!(normal, ["normal-0", "normal-1", "normal-2"]);
}

#[tokio::test]
async fn urgent_is_drained_before_a_selected_normal_message() {
    let config = PeerConfig {
        max_streams: 1,
        ..PeerConfig::default()
    };
    let (alice, mut bob) = link(7, 7, config);
    alice.peer.start();

    // Both queues are ready every round, so the select picks the normal queue
    // about half the time and the urgent drain has to run first.
    for round in 0..20 {
        alice
            .peer
            .submit(RawMessage::new("tx", format!("normal-{round}")), Priority::Normal, true)
            .expect("normal message should be queued");
        alice
            .peer
            .submit(RawMessage::new("vote", format!("urgent-{round}")), Priority::Urgent, true)
            .expect("urgent message should be queued");

        let mut received = Vec::new();
        for _ in 0..2 {
            let (_, message) = bob.next_message().await.expect("bob should receive both");
            received.push(String::from_utf8(message.content().to_vec()).unwrap());
        }
        assert_eq!(received, [format!("urgent-{round}"), format!("normal-{round}")]);
    }
}

#[tokio::test]
async fn normal_messages_spread_over_streams() {
    let (a, b) = MemoryConnection::pair_with_buffer("alice", "bob", 256);
    let alice = Node::new(a, 7, PeerConfig::default());
    let mut bob = Node::new(b, 7, PeerConfig::default());
    alice.peer.start();

    for i in 0..32 {
        let content = vec![i as u8; 1024];
        alice
            .peer
            .submit(RawMessage::new("block", content), Priority::Normal, true)
            .expect("message should be queued");
    }
    for _ in 0..32 {
        bob.next_message().await.expect("bob should receive every block");
    }

    assert!(alice.manager.opened() > 1);
    assert!(alice.peer.stream_count() <= 8);
}

#[tokio::test]
async fn failing_to_get_a_stream_removes_the_peer() {
    let (alice, _bob) = link(7, 7, PeerConfig::default());
    alice.manager.refuse_streams();
    alice.peer.start();

    alice
        .peer
        .submit(RawMessage::new("tx", "unreachable"), Priority::Normal, true)
        .expect("message should be queued");

    eventually("manager to drop the peer", || {
        alice.manager.removed().iter().any(|peer| peer.as_str() == "bob")
    })
    .await;
    assert_eq!(alice.peer.stream_count(), 0);
}

#[tokio::test]
async fn stalled_write_retires_the_stream() {
    let (a, b) = MemoryConnection::pair_with_buffer("alice", "bob", 64);
    let config = PeerConfig {
        min_write_timeout: Duration::from_millis(100),
        write_throughput_floor: 1_000_000,
        ..PeerConfig::default()
    };
    let alice = Node::new(a, 7, config);

    // Bob accepts streams but never reads from them.
    let held = Arc::new(Mutex::new(Vec::new()));
    {
        let held = Arc::clone(&held);
        tokio::spawn(async move {
            while let Ok(stream) = b.accept_stream().await {
                held.lock().unwrap().push(stream);
            }
        });
    }
    alice.peer.start();

    alice
        .peer
        .submit(
            RawMessage::new("big", vec![0u8; 4096]).without_dedup(),
            Priority::Urgent,
            true,
        )
        .expect("message should be queued");

    eventually("first stream to open", || alice.manager.opened() == 1).await;
    tokio::time::sleep(Duration::from_millis(250)).await;
    assert_eq!(alice.peer.stream_count(), 0);
    assert!(alice.metrics.outbound().is_empty());

    alice
        .peer
        .submit(RawMessage::new("small", "hi"), Priority::Urgent, true)
        .expect("message should be queued");

    eventually("small message to go out on a fresh stream", || {
        alice.metrics.outbound() == vec![("small".to_string(), 2)]
    })
    .await;
    assert_eq!(alice.manager.opened(), 2);
    assert_eq!(alice.peer.stream_count(), 1);
    assert!(alice.manager.removed().is_empty());
}

#[tokio::test]
async fn oversized_message_keeps_the_stream() {
    let config = PeerConfig {
        max_streams: 1,
        max_payload_size: 16,
        ..PeerConfig::default()
    };
    let (alice, mut bob) = link(7, 7, config);
    alice.peer.start();

    alice
        .peer
        .submit(RawMessage::new("tx", "ok-1"), Priority::Urgent, true)
        .expect("message should be queued");
    bob.next_message().await.expect("bob should receive ok-1");

    alice
        .peer
        .submit(RawMessage::new("tx", vec![7u8; 64]), Priority::Urgent, true)
        .expect("oversized message is only caught when sent");
    alice
        .peer
        .submit(RawMessage::new("tx", "ok-2"), Priority::Urgent, true)
        .expect("message should be queued");

    let (_, message) = bob.next_message().await.expect("bob should receive ok-2");
    assert_eq!(message.content(), b"ok-2");

    eventually("both small messages to be counted", || {
        alice.metrics.outbound() == vec![("tx".to_string(), 4), ("tx".to_string(), 4)]
    })
    .await;
    assert_eq!(alice.manager.opened(), 1);
    assert_eq!(alice.peer.stream_count(), 1);
    assert!(alice.manager.removed().is_empty());
}
