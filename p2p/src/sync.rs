//! Graph sync / catch-up protocol.
//!
//! Every connection advertises this node's round frontier on a ticker (half
//! the round gap).  When a frontier arrives:
//!
//! 1. **Merge**: the handle verifies the signature and merges the points
//!    into its view of the sender.
//! 2. **Fan-out**: the update is offered to the catch-up task of every
//!    connected peer, so a frontier learned on one link also wakes the others.
//! 3. **Compare**: a peer's catch-up task keeps the latest frontier that
//!    peer advertised about itself and finds the lowest topological offset
//!    at which the peer lags behind this node.
//! 4. **Replay**: finalized snapshots from that offset are pushed to the
//!    peer as finalization messages, bounded per pass and stopping early when
//!    the peer's queue is full.  The next advertisement resumes the work.

use {
    crate::{
        error::{P2pError, Result},
        handle::SyncHandle,
        node::Node,
        peer::{ChanMsg, GraphUpdate, Peer, Priority},
        protocol::{graph_payload, PeerMessage},
        types::{PeerId, Signature, SyncPoint},
    },
    log::{debug, info},
    std::{collections::HashMap, sync::Arc},
    tokio::sync::mpsc,
};

/// A peer's frontier, keyed by node.
pub type Frontier = HashMap<PeerId, SyncPoint>;

/// Merge `points` into `frontier`; a point replaces the known one for its
/// node only with a higher round.
pub fn merge_frontier(frontier: &mut Frontier, points: &[SyncPoint]) {
    for point in points {
        frontier
            .entry(point.node_id)
            .and_modify(|known| {
                if point.round > known.round {
                    *known = *point;
                }
            })
            .or_insert(*point);
    }
}

/// Lowest topological order among snapshots the remote is missing.
///
/// For every node in `local` whose round the remote has not reached, the
/// snapshots of the remote's round for that node (round 0 when the remote
/// has never heard of it) are read and their minimum topology taken.
/// Returns `None` when the remote is not behind anywhere.
pub fn topological_offset(
    handle: &dyn SyncHandle,
    local: &[SyncPoint],
    remote: &Frontier,
) -> Result<Option<u64>> {
    let mut offset: Option<u64> = None;
    for point in local {
        let remote_round = remote.get(&point.node_id).map(|r| r.round);
        if remote_round.is_some_and(|round| round >= point.round) {
            continue;
        }
        let round = remote_round.unwrap_or(0);
        let snapshots = handle.read_snapshots_for_node_round(&point.node_id, round)?;
        let Some(lowest) = snapshots.iter().map(|s| s.topology).min() else {
            debug!("no snapshots stored for {} round {}", point.node_id, round);
            continue;
        };
        offset = Some(offset.map_or(lowest, |current| current.min(lowest)));
    }
    Ok(offset)
}

impl Node {
    /// Encode a signed graph message carrying this node's frontier.
    pub(crate) fn build_graph_message(&self) -> Vec<u8> {
        let points = self.handle.build_graph();
        let signature = self.handle.sign_data(&graph_payload(&points));
        PeerMessage::Graph { signature, points }.encode()
    }

    pub(crate) fn offer_graph_message(&self, peer: &Peer) {
        let msg = ChanMsg::new(None, self.build_graph_message());
        if !peer.offer(Priority::Normal, msg) {
            debug!("graph advertisement to {} dropped", peer.id);
        }
    }

    /// A frontier from `sender` arrived, directly or relayed.
    pub(crate) fn handle_graph_message(
        &self,
        sender: &PeerId,
        signature: &Signature,
        points: Vec<SyncPoint>,
    ) -> Result<()> {
        let data = graph_payload(&points);
        self.handle
            .update_sync_point(sender, &points, &data, signature)?;
        for peer in self.all_neighbors() {
            let update = GraphUpdate {
                origin: *sender,
                points: points.clone(),
            };
            if !peer.offer_graph(update) {
                debug!("graph update from {} not queued for {}", sender, peer.id);
            }
        }
        Ok(())
    }

    /// Catch-up task of one connection.
    pub(crate) async fn sync_loop(
        self: Arc<Self>,
        peer: Arc<Peer>,
        mut updates: mpsc::Receiver<GraphUpdate>,
    ) -> Result<()> {
        let token = peer.token().clone();
        let mut frontier: Option<Frontier> = None;
        loop {
            let update = tokio::select! {
                _ = token.cancelled() => return Ok(()),
                update = updates.recv() => match update {
                    Some(update) => update,
                    None => return Ok(()),
                },
            };
            if update.origin == peer.id {
                merge_frontier(frontier.get_or_insert_with(HashMap::new), &update.points);
            }
            let Some(remote) = &frontier else {
                continue;
            };
            let sent = self.sync_to_neighbor(&peer.id, remote)?;
            if sent > 0 {
                info!("replayed {} snapshots to {}", sent, peer.id);
            }
        }
    }

    /// Compare this node's frontier with `remote` and replay whatever the
    /// peer is missing.  Returns the number of snapshots queued.
    pub fn sync_to_neighbor(&self, peer: &PeerId, remote: &Frontier) -> Result<usize> {
        let local = self.handle.build_graph();
        match topological_offset(self.handle.as_ref(), &local, remote)? {
            Some(offset) => self.sync_to_neighbor_since(peer, offset, remote),
            None => Ok(0),
        }
    }

    /// Replay finalized snapshots from topology `offset` to `peer`, skipping
    /// those below the peer's known round for their node.
    pub fn sync_to_neighbor_since(
        &self,
        peer: &PeerId,
        mut offset: u64,
        remote: &Frontier,
    ) -> Result<usize> {
        let batch = self.config.sync_batch_size.max(1);
        let limit = self.config.sync_max_per_pass.max(1);
        let mut sent = 0usize;
        loop {
            let snapshots = self.handle.read_snapshots_since_topology(offset, batch)?;
            let start = offset;
            for snapshot in &snapshots {
                offset = offset.max(snapshot.topology.saturating_add(1));
                if remote
                    .get(&snapshot.node_id)
                    .is_some_and(|known| snapshot.round < known.round)
                {
                    continue;
                }
                match self.queue_snapshot_finalization(peer, &snapshot.hash, &snapshot.data) {
                    Ok(true) => sent = sent.saturating_add(1),
                    Ok(false) => {}
                    Err(P2pError::QueueFull(_)) => {
                        debug!("queue to {} full, pausing catch-up at {}", peer, offset);
                        return Ok(sent);
                    }
                    Err(e) => return Err(e),
                }
                if sent >= limit {
                    return Ok(sent);
                }
            }
            if (snapshots.len() as u64) < batch || offset == start {
                return Ok(sent);
            }
        }
    }
}
