//! Addressed CoSi and transaction sends.
//!
//! Every send targets one peer and is routed by [`Node::send_to_peer`].
//! Each message gets a dedup key derived from the recipient, the message kind
//! and the identifying fields, so resending the same phase message to the
//! same peer within the resend window is a no-op.  Finalizations use a
//! longer window and can be suppressed ahead of time by the peer's confirm.

use {
    crate::{
        cache::FINALIZATION_WINDOW,
        error::{P2pError, Result},
        node::Node,
        peer::Priority,
        protocol::{
            announcement_payload, commitment_payload, commitments_payload, MessageKind,
            PeerMessage,
        },
        types::{CosiSignature, Hash, Key, PeerId},
    },
    log::debug,
};

/// Dedup key of a message of `kind` sent to `peer`.
pub fn message_key(peer: &PeerId, kind: MessageKind, parts: &[&[u8]]) -> Hash {
    let tag = [kind.tag()];
    let mut all: Vec<&[u8]> = Vec::with_capacity(parts.len().saturating_add(2));
    all.push(peer.as_bytes());
    all.push(&tag);
    all.extend_from_slice(parts);
    Hash::digest_parts(&all)
}

/// Key marking `snapshot` as finalized towards `peer`.
pub fn finalization_key(peer: &PeerId, snapshot: &Hash) -> Hash {
    message_key(peer, MessageKind::SnapshotFinalization, &[snapshot.as_bytes()])
}

impl Node {
    // ── Leader → cosigner ───────────────────────────────────────────────

    pub fn send_snapshot_announcement_message(
        &self,
        peer: &PeerId,
        snapshot: &[u8],
        commitment: &Key,
    ) -> Result<()> {
        let signature = self
            .handle
            .sign_data(&announcement_payload(commitment, snapshot));
        let key = message_key(
            peer,
            MessageKind::SnapshotAnnouncement,
            &[snapshot, &commitment.0],
        );
        let data = PeerMessage::SnapshotAnnouncement {
            signature,
            commitment: *commitment,
            snapshot: snapshot.to_vec(),
        }
        .encode();
        self.send_to_peer(peer, Some(key), data, Priority::High)
    }

    /// Send the challenge; `transaction` goes only to cosigners that asked
    /// for the body in their commitment.
    pub fn send_transaction_challenge_message(
        &self,
        peer: &PeerId,
        snapshot: &Hash,
        cosi: &CosiSignature,
        transaction: Option<&[u8]>,
    ) -> Result<()> {
        let key = message_key(
            peer,
            MessageKind::TransactionChallenge,
            &[snapshot.as_bytes(), &cosi.signature.0, &cosi.mask.to_be_bytes()],
        );
        let data = PeerMessage::TransactionChallenge {
            snapshot: *snapshot,
            cosi: *cosi,
            transaction: transaction
                .filter(|tx| !tx.is_empty())
                .map(<[u8]>::to_vec),
        }
        .encode();
        self.send_to_peer(peer, Some(key), data, Priority::High)
    }

    pub fn send_full_challenge_message(
        &self,
        peer: &PeerId,
        snapshot: &[u8],
        cosi: &CosiSignature,
        transaction: &[u8],
    ) -> Result<()> {
        if snapshot.is_empty() || transaction.is_empty() {
            return Err(P2pError::malformed(
                MessageKind::FullChallenge.name(),
                "snapshot and transaction must not be empty",
            ));
        }
        let key = message_key(
            peer,
            MessageKind::FullChallenge,
            &[snapshot, &cosi.signature.0, &cosi.mask.to_be_bytes()],
        );
        let data = PeerMessage::FullChallenge {
            cosi: *cosi,
            snapshot: snapshot.to_vec(),
            transaction: transaction.to_vec(),
        }
        .encode();
        self.send_to_peer(peer, Some(key), data, Priority::High)
    }

    /// Pre-share commitments for upcoming rounds.
    pub fn send_commitments_message(&self, peer: &PeerId, commitments: &[Key]) -> Result<()> {
        if commitments.is_empty() || commitments.len() > usize::from(u16::MAX) {
            return Err(P2pError::malformed(
                MessageKind::Commitments.name(),
                format!("{} commitments out of range", commitments.len()),
            ));
        }
        let payload = commitments_payload(commitments);
        let signature = self.handle.sign_data(&payload);
        let key = message_key(peer, MessageKind::Commitments, &[&payload]);
        let data = PeerMessage::Commitments {
            signature,
            commitments: commitments.to_vec(),
        }
        .encode();
        self.send_to_peer(peer, Some(key), data, Priority::High)
    }

    /// Push a finalized snapshot, unless `peer` confirmed or was sent it
    /// within the finalization window.
    pub fn send_snapshot_finalization_message(
        &self,
        peer: &PeerId,
        snapshot_hash: &Hash,
        snapshot: &[u8],
    ) -> Result<()> {
        self.queue_snapshot_finalization(peer, snapshot_hash, snapshot)
            .map(|_| ())
    }

    /// Like [`Self::send_snapshot_finalization_message`], returning whether a
    /// message was actually queued.
    pub(crate) fn queue_snapshot_finalization(
        &self,
        peer: &PeerId,
        snapshot_hash: &Hash,
        snapshot: &[u8],
    ) -> Result<bool> {
        if *peer == self.id {
            return Ok(false);
        }
        let key = finalization_key(peer, snapshot_hash);
        if self.cache.contains(key.as_bytes(), FINALIZATION_WINDOW) {
            debug!("finalization of {} already known to {}", snapshot_hash, peer);
            return Ok(false);
        }
        let data = PeerMessage::SnapshotFinalization {
            snapshot: snapshot.to_vec(),
        }
        .encode();
        self.send_to_peer(peer, Some(key), data, Priority::Normal)?;
        Ok(true)
    }

    // ── Cosigner → leader ───────────────────────────────────────────────

    pub fn send_snapshot_commitment_message(
        &self,
        peer: &PeerId,
        snapshot: &Hash,
        commitment: &Key,
        want_tx: bool,
    ) -> Result<()> {
        let signature = self
            .handle
            .sign_data(&commitment_payload(snapshot, commitment, want_tx));
        let key = message_key(
            peer,
            MessageKind::SnapshotCommitment,
            &[snapshot.as_bytes(), &commitment.0],
        );
        let data = PeerMessage::SnapshotCommitment {
            signature,
            snapshot: *snapshot,
            commitment: *commitment,
            want_tx,
        }
        .encode();
        self.send_to_peer(peer, Some(key), data, Priority::High)
    }

    pub fn send_snapshot_response_message(
        &self,
        peer: &PeerId,
        snapshot: &Hash,
        response: &Key,
    ) -> Result<()> {
        let key = message_key(
            peer,
            MessageKind::SnapshotResponse,
            &[snapshot.as_bytes(), &response.0],
        );
        let data = PeerMessage::SnapshotResponse {
            snapshot: *snapshot,
            response: *response,
        }
        .encode();
        self.send_to_peer(peer, Some(key), data, Priority::High)
    }

    // ── Confirmation ────────────────────────────────────────────────────

    /// Tell `peer` this node has finalized `snapshot`.
    pub fn send_snapshot_confirm_message(&self, peer: &PeerId, snapshot: &Hash) -> Result<()> {
        let key = message_key(peer, MessageKind::SnapshotConfirm, &[snapshot.as_bytes()]);
        let data = PeerMessage::SnapshotConfirm {
            snapshot: *snapshot,
        }
        .encode();
        self.send_to_peer(peer, Some(key), data, Priority::Normal)
    }

    /// Record that `peer` has `snapshot`, suppressing finalization resends
    /// to it for the finalization window.
    pub fn confirm_snapshot_for_peer(&self, peer: &PeerId, snapshot: &Hash) {
        self.cache
            .store_now(finalization_key(peer, snapshot).as_bytes());
    }

    // ── Transactions ────────────────────────────────────────────────────

    pub fn send_transaction_request_message(&self, peer: &PeerId, hash: &Hash) -> Result<()> {
        let key = message_key(peer, MessageKind::TransactionRequest, &[hash.as_bytes()]);
        let data = PeerMessage::TransactionRequest { hash: *hash }.encode();
        self.send_to_peer(peer, Some(key), data, Priority::Normal)
    }

    pub fn send_transaction_message(
        &self,
        peer: &PeerId,
        hash: &Hash,
        transaction: &[u8],
    ) -> Result<()> {
        let key = message_key(peer, MessageKind::Transaction, &[hash.as_bytes()]);
        let data = PeerMessage::Transaction {
            data: transaction.to_vec(),
        }
        .encode();
        self.send_to_peer(peer, Some(key), data, Priority::Normal)
    }
}
