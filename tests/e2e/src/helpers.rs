//! Shared test utilities for kernel-p2p end-to-end tests.

use {
    kernel_p2p::{
        test_handle::RecordingHandle, Hash, Node, P2pConfig, PeerId, RelayerEndpoint,
    },
    std::{net::SocketAddr, sync::Arc, time::Duration},
    tokio::time::{sleep, Instant},
};

// ─────────────────────────────────────────────────────────────────────────────
// Constants
// ─────────────────────────────────────────────────────────────────────────────

/// Upper bound for anything that should happen within a few round gaps.
pub const SETTLE_TIMEOUT: Duration = Duration::from_secs(10);

const POLL_INTERVAL: Duration = Duration::from_millis(10);

// ─────────────────────────────────────────────────────────────────────────────
// Nodes
// ─────────────────────────────────────────────────────────────────────────────

pub struct TestNode {
    pub node: Arc<Node>,
    pub handle: Arc<RecordingHandle>,
    /// Listener address, for relayers.
    pub addr: Option<SocketAddr>,
}

impl TestNode {
    pub fn id(&self) -> PeerId {
        self.node.id()
    }

    /// Endpoint other nodes use to dial this relayer.
    pub fn endpoint(&self) -> RelayerEndpoint {
        let addr = self.addr.expect("only relayers have an endpoint");
        RelayerEndpoint {
            id: self.id(),
            address: addr.to_string(),
        }
    }

    pub fn is_connected_to(&self, id: &PeerId) -> bool {
        self.node.neighbors().iter().any(|peer| peer.id == *id)
    }
}

pub fn init_logging() {
    let _ = env_logger::builder()
        .is_test(true)
        .filter_level(log::LevelFilter::Info)
        .try_init();
}

pub fn peer_id(name: &str) -> PeerId {
    Hash::digest(name.as_bytes())
}

pub async fn start_node(name: &str, mut config: P2pConfig) -> TestNode {
    let id = peer_id(name);
    let handle = Arc::new(RecordingHandle::new(id, config.relayer));
    config.listener = "127.0.0.1:0".to_string();
    let node = Node::new(id, handle.clone(), config);
    let addr = node.start().await.expect("node starts");
    TestNode { node, handle, addr }
}

pub async fn start_relayer(name: &str, relayers: Vec<RelayerEndpoint>) -> TestNode {
    let mut config = P2pConfig::dev_default();
    config.relayer = true;
    config.relayers = relayers;
    start_node(name, config).await
}

pub async fn start_consumer(name: &str, relayers: Vec<RelayerEndpoint>) -> TestNode {
    let mut config = P2pConfig::dev_default();
    config.relayers = relayers;
    start_node(name, config).await
}

// ─────────────────────────────────────────────────────────────────────────────
// Waiting
// ─────────────────────────────────────────────────────────────────────────────

/// Poll `condition` until it holds or `timeout` passes.
pub async fn wait_until<F>(timeout: Duration, condition: F) -> bool
where
    F: Fn() -> bool,
{
    let deadline = Instant::now().checked_add(timeout);
    loop {
        if condition() {
            return true;
        }
        if deadline.map_or(true, |deadline| Instant::now() >= deadline) {
            return false;
        }
        sleep(POLL_INTERVAL).await;
    }
}

/// Wait until `a` and `b` each list the other as a neighbor.
pub async fn wait_linked(a: &TestNode, b: &TestNode) {
    let (a_id, b_id) = (a.id(), b.id());
    assert!(
        wait_until(SETTLE_TIMEOUT, || a.is_connected_to(&b_id) && b.is_connected_to(&a_id)).await,
        "nodes {a_id} and {b_id} never linked"
    );
}
