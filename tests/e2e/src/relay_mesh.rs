//! E2E Test: Two-Relayer Mesh
//!
//! Topology:
//!
//! ```text
//!   alice ── relayer-1 ── relayer-2 ── bob
//! ```
//!
//! Verifies:
//! - Relayers link to each other and advertise the consumers they serve
//! - A consumer reaches a consumer behind another relayer
//! - The receiver sees the originator, not the last hop, as the sender
//! - Relayers that list each other keep a single stable link

use {
    kernel_p2p::{test_handle::Event, Hash, PeerId},
    kernel_p2p_e2e_tests::helpers::*,
    std::time::Duration,
};

// ─────────────────────────────────────────────────────────────────────────────
// Test: alice → bob across two relayers
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_message_crosses_two_relayers() {
    init_logging();
    let relayer_1 = start_relayer("relayer-1", Vec::new()).await;
    let relayer_2 = start_relayer("relayer-2", vec![relayer_1.endpoint()]).await;
    let alice = start_consumer("alice", vec![relayer_1.endpoint()]).await;
    let bob = start_consumer("bob", vec![relayer_2.endpoint()]).await;
    wait_linked(&relayer_1, &relayer_2).await;
    wait_linked(&alice, &relayer_1).await;
    wait_linked(&bob, &relayer_2).await;
    println!("✓ Mesh established");

    // relayer-1 can only route to bob once relayer-2's advertisement has
    // arrived, so keep sending fresh transactions until one gets through.
    let delivered = Event::Transaction { peer: alice.id() };
    let mut reached = false;
    for attempt in 0u64..50 {
        alice
            .node
            .send_transaction_message(&bob.id(), &Hash::digest(&attempt.to_be_bytes()), b"tx")
            .unwrap();
        if bob
            .handle
            .wait_for(Duration::from_millis(200), |events| events.contains(&delivered))
            .await
        {
            reached = true;
            break;
        }
    }
    assert!(reached, "bob never received alice's transaction");
    println!("✓ Transaction crossed both relayers");

    // Neither relayer is the originator of anything bob received.
    let events = bob.handle.events();
    assert!(!events.contains(&Event::Transaction {
        peer: relayer_1.id()
    }));
    assert!(!events.contains(&Event::Transaction {
        peer: relayer_2.id()
    }));

    // Signed messages are verified against the originator as well.
    let hash = Hash::digest(b"announced");
    alice
        .node
        .send_snapshot_announcement_message(&bob.id(), b"announced", &kernel_p2p::Key([5; 32]))
        .unwrap();
    assert!(
        bob.handle
            .wait_for(SETTLE_TIMEOUT, |events| {
                events.iter().any(|event| {
                    matches!(event, Event::Announcement { peer, snapshot, .. }
                        if *peer == alice.id() && Hash::digest(snapshot) == hash)
                })
            })
            .await
    );
    println!("✓ Relayed announcement verified against alice");

    for node in [&alice, &bob, &relayer_2, &relayer_1] {
        node.node.teardown().await;
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Test: a relayer without a route drops the message without closing links
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_unroutable_relay_keeps_link_open() {
    init_logging();
    let relayer = start_relayer("relayer", Vec::new()).await;
    let alice = start_consumer("alice", vec![relayer.endpoint()]).await;
    wait_linked(&alice, &relayer).await;

    alice
        .node
        .send_transaction_message(&peer_id("nobody"), &Hash::digest(b"lost"), b"tx")
        .unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert!(alice.is_connected_to(&relayer.id()));
    assert!(relayer.is_connected_to(&alice.id()));

    alice.node.teardown().await;
    relayer.node.teardown().await;
}

// ─────────────────────────────────────────────────────────────────────────────
// Test: relayers that list each other settle on one stable link
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_mutual_relayers_keep_one_link() {
    init_logging();
    let relayer_1 = start_relayer("relayer-1", Vec::new()).await;
    let relayer_2 = start_relayer("relayer-2", vec![relayer_1.endpoint()]).await;
    relayer_1.node.connect_relayer(relayer_2.endpoint());
    wait_linked(&relayer_1, &relayer_2).await;

    // Give a simultaneous dial time to resolve, then watch the link.
    tokio::time::sleep(Duration::from_secs(1)).await;
    let link = |node: &TestNode, other: PeerId| {
        node.node
            .neighbors()
            .into_iter()
            .find(|peer| peer.id == other)
            .map(|peer| peer.address)
    };
    let settled_1 = link(&relayer_1, relayer_2.id());
    let settled_2 = link(&relayer_2, relayer_1.id());
    assert!(settled_1.is_some() && settled_2.is_some());
    println!("✓ Relayers linked");

    for _ in 0..40 {
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(link(&relayer_1, relayer_2.id()), settled_1);
        assert_eq!(link(&relayer_2, relayer_1.id()), settled_2);
    }
    println!("✓ Link stayed up for two seconds without being replaced");

    relayer_2.node.teardown().await;
    relayer_1.node.teardown().await;
}
