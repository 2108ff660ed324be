//! E2E Test: Inbound Authentication
//!
//! Verifies the handshake an inbound connection must complete:
//! - A silent connection is closed once the handshake timeout passes
//! - A first frame other than authentication is rejected
//! - Credentials addressed to another node are rejected
//! - Valid credentials yield the dialer's identity and role

use {
    kernel_p2p::{
        test_handle::RecordingHandle,
        transport::{Client, Listener},
        P2pConfig, P2pError, PeerMessage,
    },
    kernel_p2p_e2e_tests::helpers::*,
    std::time::Duration,
    tokio::time::{timeout, Instant},
};

/// Open a connected pair: the dialing side and the accepted side.
async fn socket_pair(config: &P2pConfig) -> (Client, Client) {
    let listener = Listener::bind("127.0.0.1:0", config).await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let dialer = Client::dial(&addr, config).await.unwrap();
    let accepted = listener.accept().await.unwrap();
    (dialer, accepted)
}

// ─────────────────────────────────────────────────────────────────────────────
// Test: a relayer drops a connection that never authenticates
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_silent_connection_is_closed_after_handshake_timeout() {
    init_logging();
    let relayer = start_relayer("relayer", Vec::new()).await;
    let config = P2pConfig::dev_default();
    let addr = relayer.addr.unwrap().to_string();

    let client = Client::dial(&addr, &config).await.unwrap();
    let started = Instant::now();
    let result = timeout(Duration::from_secs(10), client.receive())
        .await
        .expect("receive returns");
    let elapsed = started.elapsed();

    // The relayer hangs up at the 3s handshake deadline, before the
    // client's own 5s read timeout would fire.
    assert!(result.is_err(), "relayer sent a frame to an unauthenticated peer");
    assert!(
        elapsed >= Duration::from_millis(2_500) && elapsed < Duration::from_millis(4_500),
        "connection closed after {elapsed:?}"
    );
    assert!(relayer.node.neighbors().is_empty());

    relayer.node.teardown().await;
}

#[tokio::test]
async fn test_authenticate_connection_times_out() {
    init_logging();
    let node = start_consumer("node", Vec::new()).await;
    let config = P2pConfig::dev_default();
    let (_dialer, accepted) = socket_pair(&config).await;

    let result = node.node.authenticate_connection(&accepted).await;
    assert!(
        matches!(result, Err(P2pError::AuthenticationTimeout(3_000))),
        "unexpected result {result:?}"
    );

    node.node.teardown().await;
}

// ─────────────────────────────────────────────────────────────────────────────
// Test: only a valid authentication frame opens a session
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_first_frame_must_be_authentication() {
    init_logging();
    let node = start_consumer("node", Vec::new()).await;
    let config = P2pConfig::dev_default();
    let (dialer, accepted) = socket_pair(&config).await;

    dialer.send(&PeerMessage::Ping.encode()).await.unwrap();
    let result = node.node.authenticate_connection(&accepted).await;
    assert!(
        matches!(
            result,
            Err(P2pError::UnexpectedMessage {
                expected: "authentication",
                actual: "ping",
            })
        ),
        "unexpected result {result:?}"
    );

    node.node.teardown().await;
}

#[tokio::test]
async fn test_authentication_for_another_node_is_rejected() {
    init_logging();
    let node = start_consumer("node", Vec::new()).await;
    let config = P2pConfig::dev_default();
    let (dialer, accepted) = socket_pair(&config).await;

    let data = RecordingHandle::auth_message(&peer_id("dialer"), false, &peer_id("elsewhere"));
    dialer
        .send(&PeerMessage::Authentication { data }.encode())
        .await
        .unwrap();
    let result = node.node.authenticate_connection(&accepted).await;
    assert!(
        matches!(result, Err(P2pError::Authentication(_))),
        "unexpected result {result:?}"
    );

    node.node.teardown().await;
}

#[tokio::test]
async fn test_valid_authentication_yields_identity() {
    init_logging();
    let node = start_consumer("node", Vec::new()).await;
    let config = P2pConfig::dev_default();
    let (dialer, accepted) = socket_pair(&config).await;

    let data = RecordingHandle::auth_message(&peer_id("dialer"), true, &node.id());
    dialer
        .send(&PeerMessage::Authentication { data }.encode())
        .await
        .unwrap();
    let token = node.node.authenticate_connection(&accepted).await.unwrap();
    assert_eq!(token.peer_id, peer_id("dialer"));
    assert!(token.is_relayer);

    node.node.teardown().await;
}
