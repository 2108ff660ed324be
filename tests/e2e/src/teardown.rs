//! E2E Test: Teardown
//!
//! Verifies that shutting a node down:
//! - Closes every link, so the far side drops the neighbor too
//! - Returns only after every task has stopped, even mid-redial
//! - Makes later sends fail instead of queueing into the void

use {
    kernel_p2p::{Hash, P2pError},
    kernel_p2p_e2e_tests::helpers::*,
    std::time::Duration,
    tokio::time::timeout,
};

const TEARDOWN_TIMEOUT: Duration = Duration::from_secs(5);

// ─────────────────────────────────────────────────────────────────────────────
// Test: a consumer leaving is noticed by its relayer
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_consumer_teardown_closes_links() {
    init_logging();
    let relayer = start_relayer("relayer", Vec::new()).await;
    let alice = start_consumer("alice", vec![relayer.endpoint()]).await;
    let bob = start_consumer("bob", vec![relayer.endpoint()]).await;
    wait_linked(&alice, &relayer).await;
    wait_linked(&bob, &relayer).await;

    timeout(TEARDOWN_TIMEOUT, alice.node.teardown())
        .await
        .expect("teardown finishes");
    assert!(alice.node.neighbors().is_empty());

    let alice_id = alice.id();
    assert!(
        wait_until(SETTLE_TIMEOUT, || !relayer.is_connected_to(&alice_id)).await,
        "relayer still lists alice"
    );
    assert!(relayer.is_connected_to(&bob.id()));
    println!("✓ Relayer dropped alice and kept bob");

    let result = alice
        .node
        .send_transaction_message(&bob.id(), &Hash::digest(b"late"), b"tx");
    assert!(matches!(result, Err(P2pError::Shutdown)), "unexpected {result:?}");
    println!("✓ Sends after teardown are refused");

    bob.node.teardown().await;
    relayer.node.teardown().await;
}

// ─────────────────────────────────────────────────────────────────────────────
// Test: a consumer whose relayer is gone still tears down promptly
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_teardown_while_redialing() {
    init_logging();
    let relayer = start_relayer("relayer", Vec::new()).await;
    let alice = start_consumer("alice", vec![relayer.endpoint()]).await;
    wait_linked(&alice, &relayer).await;

    relayer.node.teardown().await;
    assert!(relayer.node.neighbors().is_empty());
    let relayer_id = relayer.id();
    assert!(
        wait_until(SETTLE_TIMEOUT, || !alice.is_connected_to(&relayer_id)).await,
        "alice still lists the stopped relayer"
    );
    println!("✓ Alice noticed the relayer going away");

    // Let at least one redial fail before shutting down.
    tokio::time::sleep(Duration::from_millis(500)).await;
    timeout(TEARDOWN_TIMEOUT, alice.node.teardown())
        .await
        .expect("teardown finishes");

    // A second teardown has nothing left to do.
    timeout(TEARDOWN_TIMEOUT, alice.node.teardown())
        .await
        .expect("repeated teardown finishes");
    println!("✓ Teardown completed during redial");
}
