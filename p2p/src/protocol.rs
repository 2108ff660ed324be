//! Peer message types and their binary encoding.
//!
//! Every frame payload is one [`PeerMessage`]: a one-byte type tag followed by
//! a layout fixed by that tag.  Integers are big-endian.  The layouts are
//! shared with every other node on the network, so field order and widths
//! here are normative.
//!
//! | Tag | Kind                  | Body after the tag                                        |
//! |----:|-----------------------|-----------------------------------------------------------|
//! |   1 | ping                  | (none)                                                    |
//! |   3 | authentication        | opaque auth bytes                                         |
//! |   4 | graph                 | sig[64] count:u32 (node[32] round:u64 hash[32] pool[16])* |
//! |   5 | snapshot_confirm      | snapshot[32]                                              |
//! |   6 | transaction_request   | tx[32]                                                    |
//! |   7 | transaction           | versioned transaction                                     |
//! |  10 | snapshot_announcement | sig[64] R[32] versioned snapshot                          |
//! |  11 | snapshot_commitment   | sig[64] snapshot[32] R[32] want_tx:u8                     |
//! |  12 | transaction_challenge | snapshot[32] cosi[64] mask:u64 [versioned transaction]    |
//! |  13 | snapshot_response     | snapshot[32] response[32]                                 |
//! |  14 | snapshot_finalization | versioned snapshot                                        |
//! |  15 | commitments           | sig[64] count:u16 R[32]*                                  |
//! |  16 | full_challenge        | cosi[64] mask:u64 len:u32 snapshot len:u32 transaction    |
//! | 200 | relay                 | from[32] to[32] inner message                             |
//! | 201 | consumers             | count:u16 (id[32] len:u16 auth[len])*                     |
//!
//! Signed kinds carry the signature right after the tag; the signature covers
//! the rest of the payload, which [`PeerMessage::signed_data`] reproduces.

use {
    crate::{
        error::{P2pError, Result},
        transport::TRANSPORT_VERSION,
        types::{
            CosiSignature, Hash, Key, PeerId, PoolInfo, Signature, SyncPoint, HASH_SIZE,
            SIGNATURE_SIZE,
        },
    },
    std::fmt,
};

/// Encoded width of one [`SyncPoint`].
const SYNC_POINT_SIZE: usize = HASH_SIZE + 8 + HASH_SIZE + 16;

/// Wire tag of every message kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageKind {
    Ping = 1,
    Authentication = 3,
    Graph = 4,
    SnapshotConfirm = 5,
    TransactionRequest = 6,
    Transaction = 7,
    SnapshotAnnouncement = 10,
    SnapshotCommitment = 11,
    TransactionChallenge = 12,
    SnapshotResponse = 13,
    SnapshotFinalization = 14,
    Commitments = 15,
    FullChallenge = 16,
    Relay = 200,
    Consumers = 201,
}

impl MessageKind {
    pub const ALL: [MessageKind; 15] = [
        Self::Ping,
        Self::Authentication,
        Self::Graph,
        Self::SnapshotConfirm,
        Self::TransactionRequest,
        Self::Transaction,
        Self::SnapshotAnnouncement,
        Self::SnapshotCommitment,
        Self::TransactionChallenge,
        Self::SnapshotResponse,
        Self::SnapshotFinalization,
        Self::Commitments,
        Self::FullChallenge,
        Self::Relay,
        Self::Consumers,
    ];

    pub fn tag(self) -> u8 {
        self as u8
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        Self::ALL.iter().copied().find(|kind| kind.tag() == tag)
    }

    /// Human-readable tag for logging and metrics.
    pub fn name(self) -> &'static str {
        match self {
            Self::Ping => "ping",
            Self::Authentication => "authentication",
            Self::Graph => "graph",
            Self::SnapshotConfirm => "snapshot_confirm",
            Self::TransactionRequest => "transaction_request",
            Self::Transaction => "transaction",
            Self::SnapshotAnnouncement => "snapshot_announcement",
            Self::SnapshotCommitment => "snapshot_commitment",
            Self::TransactionChallenge => "transaction_challenge",
            Self::SnapshotResponse => "snapshot_response",
            Self::SnapshotFinalization => "snapshot_finalization",
            Self::Commitments => "commitments",
            Self::FullChallenge => "full_challenge",
            Self::Relay => "relay",
            Self::Consumers => "consumers",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A consumer a relayer vouches for, with the consumer's own auth message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerEntry {
    pub id: PeerId,
    pub auth: Vec<u8>,
}

/// One decoded protocol message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerMessage {
    /// Keep-alive; carries nothing.
    Ping,

    /// First frame of every connection, built by the dialer's handle.
    Authentication { data: Vec<u8> },

    /// The sender's signed round frontier.
    Graph {
        signature: Signature,
        points: Vec<SyncPoint>,
    },

    /// The sender has finalized `snapshot`; stop resending it.
    SnapshotConfirm { snapshot: Hash },

    /// Ask the recipient for a transaction body.
    TransactionRequest { hash: Hash },

    /// A versioned transaction body.
    Transaction { data: Vec<u8> },

    /// CoSi phase 1, leader → cosigner.
    SnapshotAnnouncement {
        signature: Signature,
        commitment: Key,
        snapshot: Vec<u8>,
    },

    /// CoSi phase 2, cosigner → leader.
    SnapshotCommitment {
        signature: Signature,
        snapshot: Hash,
        commitment: Key,
        want_tx: bool,
    },

    /// CoSi phase 3, leader → cosigner.  The transaction body is attached
    /// only for cosigners that asked for it.  An empty body encodes the same
    /// as none and decodes as `None`.
    TransactionChallenge {
        snapshot: Hash,
        cosi: CosiSignature,
        transaction: Option<Vec<u8>>,
    },

    /// CoSi phase 4, cosigner → leader.
    SnapshotResponse { snapshot: Hash, response: Key },

    /// CoSi phase 5, leader → everyone: the finalized snapshot.
    SnapshotFinalization { snapshot: Vec<u8> },

    /// Pre-shared commitments for upcoming rounds.
    Commitments {
        signature: Signature,
        commitments: Vec<Key>,
    },

    /// Announcement and challenge folded into one message.
    FullChallenge {
        cosi: CosiSignature,
        snapshot: Vec<u8>,
        transaction: Vec<u8>,
    },

    /// An encoded message travelling through relayers.
    Relay {
        from: PeerId,
        to: PeerId,
        data: Vec<u8>,
    },

    /// A relayer's list of consumers it can reach directly.
    Consumers { consumers: Vec<ConsumerEntry> },
}

// ── Signed payloads ─────────────────────────────────────────────────────────

/// Signed body of a graph message.
pub fn graph_payload(points: &[SyncPoint]) -> Vec<u8> {
    let size = points.len().saturating_mul(SYNC_POINT_SIZE);
    let mut buf = Vec::with_capacity(size.saturating_add(4));
    buf.extend_from_slice(&(points.len() as u32).to_be_bytes());
    for point in points {
        buf.extend_from_slice(point.node_id.as_bytes());
        buf.extend_from_slice(&point.round.to_be_bytes());
        buf.extend_from_slice(point.hash.as_bytes());
        buf.extend_from_slice(&point.pool.count.to_be_bytes());
        buf.extend_from_slice(&point.pool.index.to_be_bytes());
    }
    buf
}

/// Signed body of a snapshot announcement.
pub fn announcement_payload(commitment: &Key, snapshot: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(HASH_SIZE.saturating_add(snapshot.len()));
    buf.extend_from_slice(&commitment.0);
    buf.extend_from_slice(snapshot);
    buf
}

/// Signed body of a snapshot commitment.
pub fn commitment_payload(snapshot: &Hash, commitment: &Key, want_tx: bool) -> Vec<u8> {
    let mut buf = Vec::with_capacity(HASH_SIZE * 2 + 1);
    buf.extend_from_slice(snapshot.as_bytes());
    buf.extend_from_slice(&commitment.0);
    buf.push(u8::from(want_tx));
    buf
}

/// Signed body of a commitments broadcast.
pub fn commitments_payload(commitments: &[Key]) -> Vec<u8> {
    let size = commitments.len().saturating_mul(HASH_SIZE);
    let mut buf = Vec::with_capacity(size.saturating_add(2));
    buf.extend_from_slice(&(commitments.len() as u16).to_be_bytes());
    for key in commitments {
        buf.extend_from_slice(&key.0);
    }
    buf
}

// ── Encoding ────────────────────────────────────────────────────────────────

impl PeerMessage {
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Ping => MessageKind::Ping,
            Self::Authentication { .. } => MessageKind::Authentication,
            Self::Graph { .. } => MessageKind::Graph,
            Self::SnapshotConfirm { .. } => MessageKind::SnapshotConfirm,
            Self::TransactionRequest { .. } => MessageKind::TransactionRequest,
            Self::Transaction { .. } => MessageKind::Transaction,
            Self::SnapshotAnnouncement { .. } => MessageKind::SnapshotAnnouncement,
            Self::SnapshotCommitment { .. } => MessageKind::SnapshotCommitment,
            Self::TransactionChallenge { .. } => MessageKind::TransactionChallenge,
            Self::SnapshotResponse { .. } => MessageKind::SnapshotResponse,
            Self::SnapshotFinalization { .. } => MessageKind::SnapshotFinalization,
            Self::Commitments { .. } => MessageKind::Commitments,
            Self::FullChallenge { .. } => MessageKind::FullChallenge,
            Self::Relay { .. } => MessageKind::Relay,
            Self::Consumers { .. } => MessageKind::Consumers,
        }
    }

    /// The bytes covered by the message signature, for signed kinds.
    pub fn signed_data(&self) -> Option<Vec<u8>> {
        match self {
            Self::Graph { points, .. } => Some(graph_payload(points)),
            Self::SnapshotAnnouncement {
                commitment,
                snapshot,
                ..
            } => Some(announcement_payload(commitment, snapshot)),
            Self::SnapshotCommitment {
                snapshot,
                commitment,
                want_tx,
                ..
            } => Some(commitment_payload(snapshot, commitment, *want_tx)),
            Self::Commitments { commitments, .. } => Some(commitments_payload(commitments)),
            _ => None,
        }
    }

    /// Encode to a frame payload.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = vec![self.kind().tag()];
        match self {
            Self::Ping => {}
            Self::Authentication { data } | Self::Transaction { data } => {
                buf.extend_from_slice(data);
            }
            Self::Graph { signature, .. }
            | Self::SnapshotAnnouncement { signature, .. }
            | Self::SnapshotCommitment { signature, .. }
            | Self::Commitments { signature, .. } => {
                buf.extend_from_slice(&signature.0);
                buf.extend_from_slice(&self.signed_data().unwrap_or_default());
            }
            Self::SnapshotConfirm { snapshot } => buf.extend_from_slice(snapshot.as_bytes()),
            Self::TransactionRequest { hash } => buf.extend_from_slice(hash.as_bytes()),
            Self::TransactionChallenge {
                snapshot,
                cosi,
                transaction,
            } => {
                buf.extend_from_slice(snapshot.as_bytes());
                buf.extend_from_slice(&cosi.signature.0);
                buf.extend_from_slice(&cosi.mask.to_be_bytes());
                if let Some(tx) = transaction {
                    buf.extend_from_slice(tx);
                }
            }
            Self::SnapshotResponse { snapshot, response } => {
                buf.extend_from_slice(snapshot.as_bytes());
                buf.extend_from_slice(&response.0);
            }
            Self::SnapshotFinalization { snapshot } => buf.extend_from_slice(snapshot),
            Self::FullChallenge {
                cosi,
                snapshot,
                transaction,
            } => {
                buf.extend_from_slice(&cosi.signature.0);
                buf.extend_from_slice(&cosi.mask.to_be_bytes());
                buf.extend_from_slice(&(snapshot.len() as u32).to_be_bytes());
                buf.extend_from_slice(snapshot);
                buf.extend_from_slice(&(transaction.len() as u32).to_be_bytes());
                buf.extend_from_slice(transaction);
            }
            Self::Relay { from, to, data } => {
                buf.extend_from_slice(from.as_bytes());
                buf.extend_from_slice(to.as_bytes());
                buf.extend_from_slice(data);
            }
            Self::Consumers { consumers } => {
                // Entries whose lengths do not fit the u16 fields are left
                // out, so the count always matches the body.
                let fitting: Vec<&ConsumerEntry> = consumers
                    .iter()
                    .filter(|entry| entry.auth.len() <= usize::from(u16::MAX))
                    .take(usize::from(u16::MAX))
                    .collect();
                buf.extend_from_slice(&(fitting.len() as u16).to_be_bytes());
                for entry in fitting {
                    buf.extend_from_slice(entry.id.as_bytes());
                    buf.extend_from_slice(&(entry.auth.len() as u16).to_be_bytes());
                    buf.extend_from_slice(&entry.auth);
                }
            }
        }
        buf
    }

    // ── Decoding ────────────────────────────────────────────────────────

    /// Decode a frame payload received with transport `version`.
    pub fn decode(version: u8, data: &[u8]) -> Result<Self> {
        if version != TRANSPORT_VERSION {
            return Err(P2pError::UnsupportedVersion {
                expected: TRANSPORT_VERSION,
                actual: version,
            });
        }
        let (&tag, body) = data.split_first().ok_or(P2pError::EmptyMessage)?;
        let kind = MessageKind::from_tag(tag).ok_or(P2pError::UnknownMessageType(tag))?;
        let mut r = Reader::new(kind, body);

        let msg = match kind {
            MessageKind::Ping => Self::Ping,
            MessageKind::Authentication => Self::Authentication {
                data: r.rest_non_empty("authentication data")?,
            },
            MessageKind::Graph => {
                let signature = r.signature()?;
                let count = r.u32()? as usize;
                let expected = count.checked_mul(SYNC_POINT_SIZE).ok_or_else(|| {
                    P2pError::malformed(kind.name(), format!("sync point count {count} overflows"))
                })?;
                if r.remaining() != expected {
                    return Err(P2pError::malformed(
                        kind.name(),
                        format!(
                            "{count} sync points need {expected} bytes, got {}",
                            r.remaining()
                        ),
                    ));
                }
                let mut points = Vec::with_capacity(count);
                for _ in 0..count {
                    points.push(SyncPoint {
                        node_id: r.hash()?,
                        round: r.u64()?,
                        hash: r.hash()?,
                        pool: PoolInfo {
                            count: r.u64()?,
                            index: r.u64()?,
                        },
                    });
                }
                Self::Graph { signature, points }
            }
            MessageKind::SnapshotConfirm => Self::SnapshotConfirm {
                snapshot: r.hash()?,
            },
            MessageKind::TransactionRequest => Self::TransactionRequest { hash: r.hash()? },
            MessageKind::Transaction => Self::Transaction {
                data: r.rest_non_empty("transaction")?,
            },
            MessageKind::SnapshotAnnouncement => Self::SnapshotAnnouncement {
                signature: r.signature()?,
                commitment: r.key()?,
                snapshot: r.rest_non_empty("snapshot")?,
            },
            MessageKind::SnapshotCommitment => Self::SnapshotCommitment {
                signature: r.signature()?,
                snapshot: r.hash()?,
                commitment: r.key()?,
                want_tx: match r.u8()? {
                    0 => false,
                    1 => true,
                    flag => {
                        return Err(P2pError::malformed(
                            kind.name(),
                            format!("invalid want-transaction flag {flag}"),
                        ))
                    }
                },
            },
            MessageKind::TransactionChallenge => {
                let snapshot = r.hash()?;
                let cosi = r.cosi()?;
                let rest = r.rest();
                Self::TransactionChallenge {
                    snapshot,
                    cosi,
                    transaction: (!rest.is_empty()).then(|| rest.to_vec()),
                }
            }
            MessageKind::SnapshotResponse => Self::SnapshotResponse {
                snapshot: r.hash()?,
                response: r.key()?,
            },
            MessageKind::SnapshotFinalization => Self::SnapshotFinalization {
                snapshot: r.rest_non_empty("snapshot")?,
            },
            MessageKind::Commitments => {
                let signature = r.signature()?;
                let count = r.u16()? as usize;
                if count == 0 {
                    return Err(P2pError::malformed(kind.name(), "empty commitment list"));
                }
                let expected = count.saturating_mul(HASH_SIZE);
                if r.remaining() != expected {
                    return Err(P2pError::malformed(
                        kind.name(),
                        format!("{count} commitments need {expected} bytes, got {}", r.remaining()),
                    ));
                }
                let mut commitments = Vec::with_capacity(count);
                for _ in 0..count {
                    commitments.push(r.key()?);
                }
                Self::Commitments {
                    signature,
                    commitments,
                }
            }
            MessageKind::FullChallenge => {
                let cosi = r.cosi()?;
                let snapshot = r.prefixed("snapshot")?;
                let transaction = r.prefixed("transaction")?;
                Self::FullChallenge {
                    cosi,
                    snapshot,
                    transaction,
                }
            }
            MessageKind::Relay => Self::Relay {
                from: r.hash()?,
                to: r.hash()?,
                data: r.rest_non_empty("relayed message")?,
            },
            MessageKind::Consumers => {
                let count = r.u16()? as usize;
                let mut consumers = Vec::with_capacity(count);
                for _ in 0..count {
                    let id = r.hash()?;
                    let len = r.u16()? as usize;
                    let auth = r.take(len)?.to_vec();
                    consumers.push(ConsumerEntry { id, auth });
                }
                Self::Consumers { consumers }
            }
        };
        r.finish()?;
        Ok(msg)
    }
}

/// Bounds-checked cursor over a message body.
struct Reader<'a> {
    kind: &'static str,
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(kind: MessageKind, data: &'a [u8]) -> Self {
        Self {
            kind: kind.name(),
            data,
            pos: 0,
        }
    }

    fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(P2pError::malformed(
                self.kind,
                format!(
                    "size mismatch: need {n} bytes at offset {}, only {} left",
                    self.pos.saturating_add(1),
                    self.remaining()
                ),
            ));
        }
        let start = self.pos;
        self.pos = start.saturating_add(n);
        Ok(&self.data[start..self.pos])
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.array::<1>()?[0])
    }

    fn u16(&mut self) -> Result<u16> {
        Ok(u16::from_be_bytes(self.array()?))
    }

    fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_be_bytes(self.array()?))
    }

    fn u64(&mut self) -> Result<u64> {
        Ok(u64::from_be_bytes(self.array()?))
    }

    fn hash(&mut self) -> Result<Hash> {
        Ok(Hash(self.array()?))
    }

    fn key(&mut self) -> Result<Key> {
        Ok(Key(self.array()?))
    }

    fn signature(&mut self) -> Result<Signature> {
        Ok(Signature(self.array::<SIGNATURE_SIZE>()?))
    }

    fn cosi(&mut self) -> Result<CosiSignature> {
        Ok(CosiSignature {
            signature: self.signature()?,
            mask: self.u64()?,
        })
    }

    /// A `u32` length followed by that many (at least one) bytes.
    fn prefixed(&mut self, what: &str) -> Result<Vec<u8>> {
        let len = self.u32()? as usize;
        if len == 0 {
            return Err(P2pError::malformed(self.kind, format!("empty {what}")));
        }
        if len > self.remaining() {
            return Err(P2pError::malformed(
                self.kind,
                format!("{what} declares {len} bytes, only {} left", self.remaining()),
            ));
        }
        Ok(self.take(len)?.to_vec())
    }

    fn rest(&mut self) -> &'a [u8] {
        let start = self.pos.min(self.data.len());
        self.pos = self.data.len();
        &self.data[start..]
    }

    fn rest_non_empty(&mut self, what: &str) -> Result<Vec<u8>> {
        let rest = self.rest();
        if rest.is_empty() {
            return Err(P2pError::malformed(self.kind, format!("missing {what}")));
        }
        Ok(rest.to_vec())
    }

    fn finish(&self) -> Result<()> {
        match self.remaining() {
            0 => Ok(()),
            extra => Err(P2pError::malformed(
                self.kind,
                format!("size mismatch: {extra} trailing bytes"),
            )),
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
