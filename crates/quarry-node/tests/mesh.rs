//! Multi-node scenarios over loopback UDP with the causal envelope.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use ed25519_dalek::SigningKey;
use quarry_consensus::RetryPolicy;
use quarry_node::{NodeComm, NodeCommBuilder, NodeConfig, PeerEndpoint};
use quarry_proto::{CausalEnvelope, Coord, Envelope, MessageKind, NodeMessage};
use quarry_transfer::{TransportConfig, TransportHandle};

async fn loopback() -> TransportHandle {
    TransportHandle::new(TransportConfig {
        bind: "127.0.0.1:0".parse().unwrap(),
        ..Default::default()
    })
    .await
    .unwrap()
}

async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..300 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

async fn start_node(identity: &str, seed: u8) -> NodeComm {
    let config = NodeConfig {
        quorum: RetryPolicy {
            max_rejections: 3,
            backoff: Duration::from_millis(400),
            grace: Duration::from_millis(100),
        },
        ..NodeConfig::default()
    };
    let (node, dispatcher) = NodeCommBuilder::new(identity, SigningKey::from_bytes(&[seed; 32]), loopback().await)
        .with_envelope(Arc::new(CausalEnvelope::new(identity)))
        .with_config(config)
        .start()
        .unwrap();
    tokio::spawn(dispatcher.run());
    node
}

/// Add `to` to `from`'s roster and handshake, so both sides know each other.
async fn link(from: &NodeComm, to: &NodeComm, transport: &TransportHandle) {
    let addr = to.local_addr().parse().unwrap();
    from.roster()
        .add(PeerEndpoint::new(to.identity(), addr, transport.clone()))
        .await
        .unwrap();
    from.initiate_connection(to.identity()).await.unwrap();

    let roster = to.roster();
    let id = from.identity().to_string();
    let id = &id;
    assert!(eventually(|| async move { roster.peers().await.unwrap().contains(id) }).await);
}

async fn location(node: &NodeComm, id: &str) -> Option<Coord> {
    node.game_state().read().await.player_locs.get(id).copied()
}

/// Send an ack for `seq` to `node` from a process it has never heard of.
async fn stranger_ack(node: &NodeComm, from: &str, seq: u64) {
    let socket = loopback().await;
    let envelope = CausalEnvelope::new(from);
    let ack = NodeMessage::new(MessageKind::Ack, from, socket.local_addr().unwrap().to_string()).with_seq(seq);
    let bytes = envelope.wrap(&ack).unwrap();
    socket
        .send_to(node.local_addr().parse().unwrap(), &bytes)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_prey_commit_reveal_reaches_every_player() {
    let prey = start_node("prey", 1).await;
    let p1 = start_node("1", 2).await;
    let p2 = start_node("2", 3).await;
    let out = loopback().await;
    link(&prey, &p1, &out).await;
    link(&prey, &p2, &out).await;

    let target = Coord::new(10, 4);
    prey.send_move_commit_to_nodes(prey.commit_move(target))
        .await
        .unwrap();
    prey.reveal_move(target).await.unwrap();

    for player in [&p1, &p2] {
        assert!(eventually(|| async move { location(player, "prey").await == Some(target) }).await);
    }
}

#[tokio::test]
async fn test_move_commits_only_past_roster_size() {
    let p1 = start_node("1", 2).await;
    let p2 = start_node("2", 3).await;
    let p3 = start_node("3", 4).await;
    let out = loopback().await;
    link(&p1, &p2, &out).await;
    link(&p1, &p3, &out).await;

    let seq = p1
        .send_move_to_nodes(Some(Coord::new(1, 1)))
        .await
        .unwrap()
        .unwrap();

    // Both peers apply and ack, which ties the roster size.
    let quorum = p1.quorum();
    assert!(eventually(|| async move { quorum.acks(seq).await.unwrap().map(|a| a.len()) == Some(2) }).await);
    assert_eq!(location(&p2, "1").await, Some(Coord::new(1, 1)));
    assert_eq!(location(&p3, "1").await, Some(Coord::new(1, 1)));
    assert_eq!(location(&p1, "1").await, None);

    // A third ack pushes it past.
    stranger_ack(&p1, "late", seq).await;
    let p1_ref = &p1;
    assert!(eventually(|| async move { location(p1_ref, "1").await == Some(Coord::new(1, 1)) }).await);

    // Every rostered peer acked, so nobody is evicted once the entry closes.
    assert!(eventually(|| async move { quorum.acks(seq).await.unwrap().is_none() }).await);
    assert_eq!(p1.roster().peers().await.unwrap(), vec!["2", "3"]);
}

#[tokio::test]
async fn test_silent_peer_evicted_after_commit() {
    let p1 = start_node("1", 2).await;
    let p2 = start_node("2", 3).await;
    let out = loopback().await;
    link(&p1, &p2, &out).await;

    // A rostered peer that never answers.
    let ghost = loopback().await;
    p1.roster()
        .add(PeerEndpoint::new("ghost", ghost.local_addr().unwrap(), out.clone()))
        .await
        .unwrap();
    assert_eq!(p1.roster().peers().await.unwrap(), vec!["2", "ghost"]);

    let seq = p1
        .send_move_to_nodes(Some(Coord::new(2, 2)))
        .await
        .unwrap()
        .unwrap();
    let quorum = p1.quorum();
    assert!(eventually(|| async move { quorum.acks(seq).await.unwrap() == Some(vec!["2".to_string()]) }).await);
    stranger_ack(&p1, "x", seq).await;
    stranger_ack(&p1, "y", seq).await;

    let p1_ref = &p1;
    assert!(eventually(|| async move { location(p1_ref, "1").await == Some(Coord::new(2, 2)) }).await);
    let roster = p1.roster();
    assert!(eventually(|| async move { roster.peers().await.unwrap() == vec!["2".to_string()] }).await);
}

#[tokio::test]
async fn test_move_abandoned_without_quorum() {
    let p1 = start_node("1", 2).await;
    let p2 = start_node("2", 3).await;
    let out = loopback().await;
    link(&p1, &p2, &out).await;

    let seq = p1
        .send_move_to_nodes(Some(Coord::new(3, 3)))
        .await
        .unwrap()
        .unwrap();

    // Backoff 400ms, three retries: the entry is gone after about 1.2s.
    let quorum = p1.quorum();
    assert!(eventually(|| async move { quorum.acks(seq).await.unwrap().is_some() }).await);
    tokio::time::sleep(Duration::from_millis(1600)).await;
    assert_eq!(quorum.acks(seq).await.unwrap(), None);
    assert_eq!(location(&p1, "1").await, None);
    assert_eq!(location(&p2, "1").await, Some(Coord::new(3, 3)));
    assert_eq!(p1.roster().peers().await.unwrap(), vec!["2"]);
}
