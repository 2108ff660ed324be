//! A connected neighbor and its outbound queues.
//!
//! A [`Peer`] is the producer side of one connection: any task may
//! [`offer`](Peer::offer) it a message, and the connection's send loop drains
//! the queues.  Offers never block; a full queue drops the message and bumps
//! the peer's drop counter.

use {
    crate::{
        config::P2pConfig,
        metric::{MetricPool, MetricSnapshot},
        types::{AuthToken, Hash, PeerId, SyncPoint},
    },
    log::debug,
    tokio::sync::{
        mpsc::{self, error::TrySendError},
        watch,
    },
    tokio_util::sync::CancellationToken,
};

/// Outbound queue a message is offered to.  The send loop fully drains
/// `High` before touching `Normal`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    High,
    Normal,
}

/// An encoded message waiting in a peer queue.
#[derive(Debug, Clone)]
pub struct ChanMsg {
    /// Dedup key.  Keyed messages are skipped when the key was sent within
    /// the resend window and recorded once they reach the wire.
    pub key: Option<Hash>,
    pub data: Vec<u8>,
}

impl ChanMsg {
    pub fn new(key: Option<Hash>, data: Vec<u8>) -> Self {
        Self { key, data }
    }
}

/// A frontier advertisement observed on some connection.
#[derive(Debug, Clone)]
pub struct GraphUpdate {
    /// Node whose `build_graph` produced `points`.
    pub origin: PeerId,
    pub points: Vec<SyncPoint>,
}

/// Read-only view of a connected peer.
#[derive(Debug, Clone)]
pub struct PeerSnapshot {
    pub id: PeerId,
    pub address: String,
    pub is_relayer: bool,
    pub sent: MetricSnapshot,
    pub received: MetricSnapshot,
}

/// Consumer side of a peer's queues, owned by its connection tasks.
pub(crate) struct PeerReceivers {
    pub high: mpsc::Receiver<ChanMsg>,
    pub normal: mpsc::Receiver<ChanMsg>,
    pub graph: mpsc::Receiver<GraphUpdate>,
    /// Flipped to `true` once every connection task has exited.
    pub closed: watch::Sender<bool>,
}

pub struct Peer {
    pub id: PeerId,
    pub address: String,
    pub is_relayer: bool,
    /// Authentication a consumer presented; re-broadcast by relayers.
    pub consumer_auth: Option<AuthToken>,
    pub sent: MetricPool,
    pub received: MetricPool,
    high: mpsc::Sender<ChanMsg>,
    normal: mpsc::Sender<ChanMsg>,
    graph: mpsc::Sender<GraphUpdate>,
    token: CancellationToken,
    closed: watch::Receiver<bool>,
}

impl Peer {
    /// Create a peer whose close signal is a child of `parent`.
    pub(crate) fn new(
        id: PeerId,
        address: String,
        is_relayer: bool,
        consumer_auth: Option<AuthToken>,
        parent: &CancellationToken,
        config: &P2pConfig,
    ) -> (Self, PeerReceivers) {
        let capacity = config.queue_capacity.max(1);
        let (high_tx, high_rx) = mpsc::channel(capacity);
        let (normal_tx, normal_rx) = mpsc::channel(capacity);
        let (graph_tx, graph_rx) = mpsc::channel(config.sync_queue_capacity.max(1));
        let (closed_tx, closed_rx) = watch::channel(false);
        let peer = Self {
            id,
            address,
            is_relayer,
            consumer_auth,
            sent: MetricPool::new(config.metrics),
            received: MetricPool::new(config.metrics),
            high: high_tx,
            normal: normal_tx,
            graph: graph_tx,
            token: parent.child_token(),
            closed: closed_rx,
        };
        let receivers = PeerReceivers {
            high: high_rx,
            normal: normal_rx,
            graph: graph_rx,
            closed: closed_tx,
        };
        (peer, receivers)
    }

    /// Enqueue `msg` without waiting.  Returns `false` when the queue is full
    /// or the peer is closing.
    pub fn offer(&self, priority: Priority, msg: ChanMsg) -> bool {
        if self.token.is_cancelled() {
            return false;
        }
        let queue = match priority {
            Priority::High => &self.high,
            Priority::Normal => &self.normal,
        };
        match queue.try_send(msg) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.sent.record_drop();
                debug!("{:?} queue full for peer {}, message dropped", priority, self.id);
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Enqueue a frontier notification for this peer's catch-up task.
    pub fn offer_graph(&self, update: GraphUpdate) -> bool {
        !self.token.is_cancelled() && self.graph.try_send(update).is_ok()
    }

    pub fn is_closing(&self) -> bool {
        self.token.is_cancelled()
    }

    pub(crate) fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Close the connection and wait until all of its tasks have exited.
    pub async fn disconnect(&self) {
        self.token.cancel();
        let mut closed = self.closed.clone();
        // A dropped sender means the supervisor is gone, which is just as final.
        let _ = closed.wait_for(|closed| *closed).await;
    }

    pub fn snapshot(&self) -> PeerSnapshot {
        PeerSnapshot {
            id: self.id,
            address: self.address.clone(),
            is_relayer: self.is_relayer,
            sent: self.sent.snapshot(),
            received: self.received.snapshot(),
        }
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        std::time::Duration,
        tokio::time::{timeout, Instant},
    };

    fn peer(capacity: usize) -> (Peer, PeerReceivers) {
        let mut config = P2pConfig::dev_default();
        config.queue_capacity = capacity;
        Peer::new(
            Hash::digest(b"peer"),
            "127.0.0.1:1".to_string(),
            false,
            None,
            &CancellationToken::new(),
            &config,
        )
    }

    #[test]
    fn test_offer_drops_at_capacity() {
        let (peer, _rx) = peer(4);
        let start = std::time::Instant::now();
        let accepted = (0..5u8)
            .filter(|i| peer.offer(Priority::Normal, ChanMsg::new(None, vec![*i])))
            .count();
        assert_eq!(accepted, 4);
        assert!(start.elapsed() < Duration::from_secs(1));
        assert_eq!(peer.sent.dropped(), 1);
        // The other queue is independent.
        assert!(peer.offer(Priority::High, ChanMsg::new(None, vec![9])));
    }

    #[tokio::test]
    async fn test_queues_preserve_order() {
        let (peer, mut rx) = peer(8);
        for i in 0..3u8 {
            assert!(peer.offer(Priority::High, ChanMsg::new(None, vec![i])));
        }
        for i in 0..3u8 {
            assert_eq!(rx.high.recv().await.unwrap().data, vec![i]);
        }
    }

    #[tokio::test]
    async fn test_disconnect_waits_for_close_signal() {
        let (peer, rx) = peer(4);
        let token = peer.token().clone();
        let closer = tokio::spawn(async move {
            token.cancelled().await;
            tokio::time::sleep(Duration::from_millis(50)).await;
            rx.closed.send(true).unwrap();
        });

        let start = Instant::now();
        timeout(Duration::from_secs(1), peer.disconnect())
            .await
            .unwrap();
        assert!(start.elapsed() >= Duration::from_millis(50));
        assert!(peer.is_closing());
        assert!(!peer.offer(Priority::High, ChanMsg::new(None, vec![1])));
        closer.await.unwrap();
    }

    #[tokio::test]
    async fn test_disconnect_returns_when_supervisor_is_gone() {
        let (peer, rx) = peer(4);
        drop(rx);
        timeout(Duration::from_secs(1), peer.disconnect())
            .await
            .unwrap();
    }

    #[test]
    fn test_child_of_cancelled_parent_refuses_offers() {
        let parent = CancellationToken::new();
        let (peer, _rx) = Peer::new(
            Hash::digest(b"peer"),
            String::new(),
            true,
            None,
            &parent,
            &P2pConfig::dev_default(),
        );
        parent.cancel();
        assert!(!peer.offer(Priority::Normal, ChanMsg::new(None, vec![1])));
        assert!(!peer.offer_graph(GraphUpdate {
            origin: peer.id,
            points: vec![],
        }));
    }
}
