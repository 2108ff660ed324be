//! The capability interface between the network layer and the kernel.
//!
//! The network layer only carries and shape-checks messages.  Signing,
//! verification, storage reads and every CoSi decision live behind
//! [`SyncHandle`], which the kernel implements and tests replace with a fake.

use {
    crate::{
        cache::CacheStore,
        error::Result,
        types::{
            AuthToken, CosiSignature, Hash, Key, PeerId, Signature, SnapshotWithOrder, SyncPoint,
        },
    },
    std::sync::Arc,
};

/// Callbacks into the kernel.
///
/// Methods are called from connection tasks and must not block for long.
/// Any error returned while handling an inbound message closes the
/// connection that delivered it.
pub trait SyncHandle: Send + Sync {
    /// Sign `data` with this node's network key.
    fn sign_data(&self, data: &[u8]) -> Signature;

    /// Authentication bytes to present to `target` when dialing it.
    fn build_authentication_message(&self, target: &PeerId) -> Vec<u8>;

    /// Verify an authentication message addressed to `recipient`.
    ///
    /// `timeout_secs` bounds the accepted age of the message; `0` disables
    /// the freshness check (used for auth tokens vouched for by a relayer).
    fn authenticate_as(&self, recipient: &PeerId, data: &[u8], timeout_secs: u64)
        -> Result<AuthToken>;

    /// This node's current frontier, one point per known node.
    fn build_graph(&self) -> Vec<SyncPoint>;

    /// Merge a peer's signed frontier.  `data` is the signed payload.
    fn update_sync_point(
        &self,
        peer: &PeerId,
        points: &[SyncPoint],
        data: &[u8],
        signature: &Signature,
    ) -> Result<()>;

    /// Up to `count` finalized snapshots with topology `>= offset`, ascending.
    fn read_snapshots_since_topology(&self, offset: u64, count: u64)
        -> Result<Vec<SnapshotWithOrder>>;

    /// Finalized snapshots of `node` in `round`.
    fn read_snapshots_for_node_round(&self, node: &PeerId, round: u64)
        -> Result<Vec<SnapshotWithOrder>>;

    /// `peer` asked for transaction `hash`.
    fn send_transaction_to_peer(&self, peer: &PeerId, hash: &Hash) -> Result<()>;

    /// `peer` delivered a versioned transaction.
    fn cache_put_transaction(&self, peer: &PeerId, transaction: &[u8]) -> Result<()>;

    // ── CoSi ────────────────────────────────────────────────────────────

    fn cosi_queue_external_announcement(
        &self,
        peer: &PeerId,
        snapshot: &[u8],
        commitment: &Key,
        data: &[u8],
        signature: &Signature,
    ) -> Result<()>;

    fn cosi_aggregate_self_commitments(
        &self,
        peer: &PeerId,
        snapshot: &Hash,
        commitment: &Key,
        want_tx: bool,
        data: &[u8],
        signature: &Signature,
    ) -> Result<()>;

    fn cosi_queue_external_challenge(
        &self,
        peer: &PeerId,
        snapshot: &Hash,
        cosi: &CosiSignature,
        transaction: Option<&[u8]>,
    ) -> Result<()>;

    fn cosi_queue_external_full_challenge(
        &self,
        peer: &PeerId,
        snapshot: &[u8],
        cosi: &CosiSignature,
        transaction: &[u8],
    ) -> Result<()>;

    fn cosi_aggregate_self_responses(
        &self,
        peer: &PeerId,
        snapshot: &Hash,
        response: &Key,
    ) -> Result<()>;

    fn cosi_queue_external_commitments(
        &self,
        peer: &PeerId,
        commitments: &[Key],
        data: &[u8],
        signature: &Signature,
    ) -> Result<()>;

    fn verify_and_queue_append_snapshot_finalization(
        &self,
        peer: &PeerId,
        snapshot: &[u8],
    ) -> Result<()>;

    /// Backing store of the node's confirm cache.
    fn cache_store(&self) -> Arc<dyn CacheStore>;
}
