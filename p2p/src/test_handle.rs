//! A [`SyncHandle`] that records every callback, for tests.
//!
//! Signatures are deterministic digests of the signer identity and the data,
//! so the handle can check the signature of any message without keys.
//! Authentication messages are `id[32] relayer:u8 target[32] timestamp:u64`.

use {
    crate::{
        cache::{now_millis, CacheStore, LruCacheStore},
        error::{P2pError, Result},
        handle::SyncHandle,
        types::{
            AuthToken, CosiSignature, Hash, Key, PeerId, Signature, SnapshotWithOrder, SyncPoint,
            HASH_SIZE, SIGNATURE_SIZE,
        },
    },
    parking_lot::Mutex,
    std::{sync::Arc, time::Duration},
};

const TARGET_AT: usize = HASH_SIZE + 1;
const TIMESTAMP_AT: usize = TARGET_AT + HASH_SIZE;
const AUTH_MESSAGE_SIZE: usize = TIMESTAMP_AT + 8;

/// One recorded callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    SyncPoint {
        peer: PeerId,
        points: Vec<SyncPoint>,
    },
    ReadSince {
        offset: u64,
        count: u64,
    },
    ReadNodeRound {
        node: PeerId,
        round: u64,
    },
    TransactionRequest {
        peer: PeerId,
        hash: Hash,
    },
    Transaction {
        peer: PeerId,
    },
    Announcement {
        peer: PeerId,
        snapshot: Vec<u8>,
        commitment: Key,
    },
    Commitment {
        peer: PeerId,
        snapshot: Hash,
        commitment: Key,
        want_tx: bool,
    },
    Challenge {
        peer: PeerId,
        snapshot: Hash,
        transaction: Option<Vec<u8>>,
    },
    FullChallenge {
        peer: PeerId,
        snapshot: Vec<u8>,
    },
    Response {
        peer: PeerId,
        snapshot: Hash,
    },
    Commitments {
        peer: PeerId,
        count: usize,
    },
    Finalization {
        peer: PeerId,
        snapshot: Vec<u8>,
    },
}

pub struct RecordingHandle {
    id: PeerId,
    is_relayer: bool,
    store: Arc<LruCacheStore>,
    graph: Mutex<Vec<SyncPoint>>,
    snapshots: Mutex<Vec<SnapshotWithOrder>>,
    events: Mutex<Vec<Event>>,
}

impl RecordingHandle {
    pub fn new(id: PeerId, is_relayer: bool) -> Self {
        Self {
            id,
            is_relayer,
            store: Arc::new(LruCacheStore::new(4096)),
            graph: Mutex::new(Vec::new()),
            snapshots: Mutex::new(Vec::new()),
            events: Mutex::new(Vec::new()),
        }
    }

    pub fn id(&self) -> PeerId {
        self.id
    }

    /// Authentication bytes `id` presents to `target`.
    pub fn auth_message(id: &PeerId, is_relayer: bool, target: &PeerId) -> Vec<u8> {
        let mut data = Vec::with_capacity(AUTH_MESSAGE_SIZE);
        data.extend_from_slice(id.as_bytes());
        data.push(u8::from(is_relayer));
        data.extend_from_slice(target.as_bytes());
        data.extend_from_slice(&now_millis().to_be_bytes());
        data
    }

    /// The signature `signer` produces over `data`.
    pub fn signature_of(signer: &PeerId, data: &[u8]) -> Signature {
        let first = Hash::digest_parts(&[signer.as_bytes(), data]);
        let second = Hash::digest(first.as_bytes());
        let mut signature = [0u8; SIGNATURE_SIZE];
        signature[..HASH_SIZE].copy_from_slice(first.as_bytes());
        signature[HASH_SIZE..].copy_from_slice(second.as_bytes());
        Signature(signature)
    }

    pub fn set_graph(&self, points: Vec<SyncPoint>) {
        *self.graph.lock() = points;
    }

    pub fn set_snapshots(&self, mut snapshots: Vec<SnapshotWithOrder>) {
        snapshots.sort_by_key(|s| s.topology);
        *self.snapshots.lock() = snapshots;
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    pub fn clear_events(&self) {
        self.events.lock().clear();
    }

    /// Poll until `pred` holds for the recorded events or `timeout` passes.
    pub async fn wait_for<F>(&self, timeout: Duration, pred: F) -> bool
    where
        F: Fn(&[Event]) -> bool,
    {
        let deadline = tokio::time::Instant::now().checked_add(timeout);
        loop {
            if pred(&self.events.lock()) {
                return true;
            }
            if deadline.map_or(true, |deadline| tokio::time::Instant::now() >= deadline) {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    fn record(&self, event: Event) {
        self.events.lock().push(event);
    }

    fn verify(&self, signer: &PeerId, data: &[u8], signature: &Signature) -> Result<()> {
        if Self::signature_of(signer, data) == *signature {
            Ok(())
        } else {
            Err(P2pError::Handle(format!("bad signature from {signer}")))
        }
    }
}

impl SyncHandle for RecordingHandle {
    fn sign_data(&self, data: &[u8]) -> Signature {
        Self::signature_of(&self.id, data)
    }

    fn build_authentication_message(&self, target: &PeerId) -> Vec<u8> {
        Self::auth_message(&self.id, self.is_relayer, target)
    }

    fn authenticate_as(
        &self,
        recipient: &PeerId,
        data: &[u8],
        timeout_secs: u64,
    ) -> Result<AuthToken> {
        if data.len() != AUTH_MESSAGE_SIZE {
            return Err(P2pError::Authentication(format!(
                "auth message of {} bytes",
                data.len()
            )));
        }
        let mut id = [0u8; HASH_SIZE];
        id.copy_from_slice(&data[..HASH_SIZE]);
        let is_relayer = data[HASH_SIZE] == 1;
        if &data[TARGET_AT..TIMESTAMP_AT] != recipient.as_bytes() {
            return Err(P2pError::Authentication("wrong recipient".to_string()));
        }
        let mut timestamp = [0u8; 8];
        timestamp.copy_from_slice(&data[TIMESTAMP_AT..]);
        let timestamp = u64::from_be_bytes(timestamp);
        let max_age = timeout_secs.saturating_mul(1000);
        if timeout_secs > 0 && now_millis().saturating_sub(timestamp) > max_age {
            return Err(P2pError::Authentication("stale auth message".to_string()));
        }
        Ok(AuthToken {
            peer_id: Hash(id),
            timestamp,
            is_relayer,
            data: data.to_vec(),
        })
    }

    fn build_graph(&self) -> Vec<SyncPoint> {
        self.graph.lock().clone()
    }

    fn update_sync_point(
        &self,
        peer: &PeerId,
        points: &[SyncPoint],
        data: &[u8],
        signature: &Signature,
    ) -> Result<()> {
        self.verify(peer, data, signature)?;
        self.record(Event::SyncPoint {
            peer: *peer,
            points: points.to_vec(),
        });
        Ok(())
    }

    fn read_snapshots_since_topology(
        &self,
        offset: u64,
        count: u64,
    ) -> Result<Vec<SnapshotWithOrder>> {
        self.record(Event::ReadSince { offset, count });
        Ok(self
            .snapshots
            .lock()
            .iter()
            .filter(|s| s.topology >= offset)
            .take(count as usize)
            .cloned()
            .collect())
    }

    fn read_snapshots_for_node_round(
        &self,
        node: &PeerId,
        round: u64,
    ) -> Result<Vec<SnapshotWithOrder>> {
        self.record(Event::ReadNodeRound { node: *node, round });
        Ok(self
            .snapshots
            .lock()
            .iter()
            .filter(|s| s.node_id == *node && s.round == round)
            .cloned()
            .collect())
    }

    fn send_transaction_to_peer(&self, peer: &PeerId, hash: &Hash) -> Result<()> {
        self.record(Event::TransactionRequest {
            peer: *peer,
            hash: *hash,
        });
        Ok(())
    }

    fn cache_put_transaction(&self, peer: &PeerId, _transaction: &[u8]) -> Result<()> {
        self.record(Event::Transaction { peer: *peer });
        Ok(())
    }

    fn cosi_queue_external_announcement(
        &self,
        peer: &PeerId,
        snapshot: &[u8],
        commitment: &Key,
        data: &[u8],
        signature: &Signature,
    ) -> Result<()> {
        self.verify(peer, data, signature)?;
        self.record(Event::Announcement {
            peer: *peer,
            snapshot: snapshot.to_vec(),
            commitment: *commitment,
        });
        Ok(())
    }

    fn cosi_aggregate_self_commitments(
        &self,
        peer: &PeerId,
        snapshot: &Hash,
        commitment: &Key,
        want_tx: bool,
        data: &[u8],
        signature: &Signature,
    ) -> Result<()> {
        self.verify(peer, data, signature)?;
        self.record(Event::Commitment {
            peer: *peer,
            snapshot: *snapshot,
            commitment: *commitment,
            want_tx,
        });
        Ok(())
    }

    fn cosi_queue_external_challenge(
        &self,
        peer: &PeerId,
        snapshot: &Hash,
        _cosi: &CosiSignature,
        transaction: Option<&[u8]>,
    ) -> Result<()> {
        self.record(Event::Challenge {
            peer: *peer,
            snapshot: *snapshot,
            transaction: transaction.map(<[u8]>::to_vec),
        });
        Ok(())
    }

    fn cosi_queue_external_full_challenge(
        &self,
        peer: &PeerId,
        snapshot: &[u8],
        _cosi: &CosiSignature,
        _transaction: &[u8],
    ) -> Result<()> {
        self.record(Event::FullChallenge {
            peer: *peer,
            snapshot: snapshot.to_vec(),
        });
        Ok(())
    }

    fn cosi_aggregate_self_responses(
        &self,
        peer: &PeerId,
        snapshot: &Hash,
        _response: &Key,
    ) -> Result<()> {
        self.record(Event::Response {
            peer: *peer,
            snapshot: *snapshot,
        });
        Ok(())
    }

    fn cosi_queue_external_commitments(
        &self,
        peer: &PeerId,
        commitments: &[Key],
        data: &[u8],
        signature: &Signature,
    ) -> Result<()> {
        self.verify(peer, data, signature)?;
        self.record(Event::Commitments {
            peer: *peer,
            count: commitments.len(),
        });
        Ok(())
    }

    fn verify_and_queue_append_snapshot_finalization(
        &self,
        peer: &PeerId,
        snapshot: &[u8],
    ) -> Result<()> {
        self.record(Event::Finalization {
            peer: *peer,
            snapshot: snapshot.to_vec(),
        });
        Ok(())
    }

    fn cache_store(&self) -> Arc<dyn CacheStore> {
        self.store.clone()
    }
}
