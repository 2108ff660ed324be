//! Configuration for the peer-to-peer layer.

use {
    crate::{error::P2pError, types::PeerId},
    serde::{Deserialize, Serialize},
    std::{fmt, str::FromStr, time::Duration},
};

/// Largest payload a single frame may carry (32 MiB).
pub const MAX_MESSAGE_SIZE: usize = 32 * 1024 * 1024;

/// A relayer this node keeps an outbound link to, written `identity@host:port`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RelayerEndpoint {
    /// Network identity the relayer must authenticate as.
    pub id: PeerId,
    /// `host:port` to dial.
    pub address: String,
}

impl FromStr for RelayerEndpoint {
    type Err = P2pError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (id, address) = s
            .split_once('@')
            .ok_or_else(|| P2pError::InvalidEndpoint(s.to_string()))?;
        if address.is_empty() || !address.contains(':') {
            return Err(P2pError::InvalidEndpoint(s.to_string()));
        }
        let id = id
            .parse()
            .map_err(|_| P2pError::InvalidEndpoint(s.to_string()))?;
        Ok(Self {
            id,
            address: address.to_string(),
        })
    }
}

impl TryFrom<String> for RelayerEndpoint {
    type Error = P2pError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<RelayerEndpoint> for String {
    fn from(endpoint: RelayerEndpoint) -> Self {
        endpoint.to_string()
    }
}

impl fmt::Display for RelayerEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.id, self.address)
    }
}

/// Configuration for the kernel P2P network.
///
/// Controls the listener, relayer links, queue capacities and the timers that
/// drive graph sync and relay advertisement.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct P2pConfig {
    /// Address the relayer listener binds to.
    /// Default: `0.0.0.0:7239`
    pub listener: String,

    /// Whether this node accepts consumer connections and forwards relays.
    pub relayer: bool,

    /// Relayers to keep an outbound link to.
    pub relayers: Vec<RelayerEndpoint>,

    /// Maximum payload size of a single frame in bytes.
    pub max_message_size: usize,

    /// Idle read deadline (ms).  Graph broadcasts keep healthy links busy far
    /// more often than this.
    pub read_timeout_ms: u64,

    /// Deadline for writing one frame (ms).
    pub write_timeout_ms: u64,

    /// How long an inbound connection may take to authenticate (ms).
    pub handshake_timeout_ms: u64,

    /// Capacity of each of a peer's two outbound priority queues.
    pub queue_capacity: usize,

    /// Capacity of a peer's graph-notification queue.
    pub sync_queue_capacity: usize,

    /// Capacity of the decoded-message queue between the receive and
    /// dispatch loops.
    pub receive_queue_capacity: usize,

    /// How long the receive loop waits on a full receive queue before giving
    /// up on the connection (ms).
    pub receive_queue_timeout_ms: u64,

    /// Maximum messages the send loop pulls per poll.
    pub send_batch_size: usize,

    /// Sleep between empty send-loop polls (ms).
    pub send_idle_ms: u64,

    /// Snapshot round gap (ms).  Graph broadcasts run every half gap and
    /// relayer links are redialed after a full gap.
    pub round_gap_ms: u64,

    /// Interval between `Consumers` advertisements sent by a relayer (ms).
    pub consumers_interval_ms: u64,

    /// Snapshots requested per storage read during graph catch-up.
    pub sync_batch_size: u64,

    /// Upper bound on snapshots replayed to one peer in a single pass.
    pub sync_max_per_pass: usize,

    /// Whether per-connection message counters are collected.
    pub metrics: bool,
}

impl Default for P2pConfig {
    fn default() -> Self {
        Self {
            listener: "0.0.0.0:7239".to_string(),
            relayer: false,
            relayers: Vec::new(),
            max_message_size: MAX_MESSAGE_SIZE,
            read_timeout_ms: 300_000,
            write_timeout_ms: 10_000,
            handshake_timeout_ms: 3_000,
            queue_capacity: 1_024,
            sync_queue_capacity: 16,
            receive_queue_capacity: 1_024,
            receive_queue_timeout_ms: 10_000,
            send_batch_size: 100,
            send_idle_ms: 300,
            round_gap_ms: 3_000,
            consumers_interval_ms: 10_000,
            sync_batch_size: 100,
            sync_max_per_pass: 1_000,
            metrics: true,
        }
    }
}

impl P2pConfig {
    /// Create a config suitable for local testing with shorter timers.
    #[cfg(any(test, feature = "dev-context-only-utils"))]
    pub fn dev_default() -> Self {
        Self {
            listener: "127.0.0.1:0".to_string(),
            relayer: false,
            relayers: Vec::new(),
            max_message_size: MAX_MESSAGE_SIZE,
            read_timeout_ms: 5_000,
            write_timeout_ms: 1_000,
            handshake_timeout_ms: 3_000,
            queue_capacity: 64,
            sync_queue_capacity: 8,
            receive_queue_capacity: 64,
            receive_queue_timeout_ms: 1_000,
            send_batch_size: 16,
            send_idle_ms: 10,
            round_gap_ms: 400,
            consumers_interval_ms: 100,
            sync_batch_size: 10,
            sync_max_per_pass: 100,
            metrics: true,
        }
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn receive_queue_timeout(&self) -> Duration {
        Duration::from_millis(self.receive_queue_timeout_ms)
    }

    pub fn send_idle(&self) -> Duration {
        Duration::from_millis(self.send_idle_ms)
    }

    /// Interval of the per-peer graph broadcast: half the round gap.
    pub fn graph_interval(&self) -> Duration {
        Duration::from_millis((self.round_gap_ms / 2).max(1))
    }

    /// Backoff before redialing a lost relayer link: one round gap.
    pub fn reconnect_backoff(&self) -> Duration {
        Duration::from_millis(self.round_gap_ms)
    }

    pub fn consumers_interval(&self) -> Duration {
        Duration::from_millis(self.consumers_interval_ms.max(1))
    }
}
