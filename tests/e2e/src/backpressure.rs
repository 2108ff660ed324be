//! E2E Test: Backpressure
//!
//! A consumer links to a "relayer" that accepts the connection but never
//! reads from it.  Once the socket buffers fill, the send loop stalls and
//! the bounded queue for that peer fills behind it.
//!
//! Verifies:
//! - Offers to a full queue fail with `QueueFull` instead of blocking
//! - Every refused message is counted as a drop for that peer
//! - The stalled link is eventually closed by the write timeout

use {
    kernel_p2p::{
        transport::Listener, Hash, P2pConfig, P2pError, RelayerEndpoint,
    },
    kernel_p2p_e2e_tests::helpers::*,
};

/// Large enough that a few queued messages overflow loopback socket buffers.
const PAYLOAD_SIZE: usize = 8 * 1024 * 1024;

// ─────────────────────────────────────────────────────────────────────────────
// Test: a stalled peer sheds load instead of blocking the sender
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_stalled_peer_fills_queue_and_drops() {
    init_logging();
    let config = P2pConfig::dev_default();
    let listener = Listener::bind("127.0.0.1:0", &config).await.unwrap();
    let sink_id = peer_id("sink");
    let endpoint = RelayerEndpoint {
        id: sink_id,
        address: listener.local_addr().unwrap().to_string(),
    };

    let mut consumer_config = P2pConfig::dev_default();
    consumer_config.queue_capacity = 4;
    consumer_config.relayers = vec![endpoint];
    let consumer = start_node("consumer", consumer_config).await;
    // Hold the accepted socket open without ever reading from it.
    let _held = listener.accept().await.unwrap();
    assert!(wait_until(SETTLE_TIMEOUT, || consumer.is_connected_to(&sink_id)).await);

    let payload = vec![7u8; PAYLOAD_SIZE];
    let mut refused = 0u64;
    for i in 0u64..200 {
        match consumer.node.send_transaction_message(
            &sink_id,
            &Hash::digest(&i.to_be_bytes()),
            &payload,
        ) {
            Ok(()) => {}
            Err(P2pError::QueueFull(id)) => {
                assert_eq!(id, sink_id);
                refused += 1;
            }
            // The write timeout closed the link while we were sending.
            Err(P2pError::UnknownPeer(_)) => break,
            Err(e) => panic!("unexpected send error {e}"),
        }
        if refused >= 3 {
            break;
        }
    }
    assert!(refused > 0, "queue never filled");

    if let Some(sink) = consumer
        .node
        .neighbors()
        .into_iter()
        .find(|peer| peer.id == sink_id)
    {
        assert!(sink.sent.dropped >= refused);
    }
    println!("✓ {refused} messages refused on a full queue");

    assert!(
        wait_until(SETTLE_TIMEOUT, || !consumer.is_connected_to(&sink_id)).await,
        "stalled link never closed"
    );
    println!("✓ Stalled link closed by the write timeout");

    consumer.node.teardown().await;
}
