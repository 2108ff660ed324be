//! Neighbor tables.
//!
//! [`NeighborMap`] holds the peers this node has a live connection to, one
//! map for relayers and one for consumers.  [`RemoteRelayers`] remembers,
//! for identities we cannot reach directly, which relayers recently claimed
//! to serve them.

use {
    crate::{peer::Peer, types::PeerId},
    dashmap::DashMap,
    parking_lot::Mutex,
    std::{collections::HashMap, sync::Arc, time::Duration},
};

/// Concurrent identity → peer map.
#[derive(Default)]
pub struct NeighborMap {
    peers: DashMap<PeerId, Arc<Peer>>,
}

impl NeighborMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &PeerId) -> Option<Arc<Peer>> {
        self.peers.get(id).map(|entry| Arc::clone(entry.value()))
    }

    /// Insert `peer`, returning the peer it replaced.  The caller must
    /// disconnect the replaced peer.
    pub fn put(&self, peer: Arc<Peer>) -> Option<Arc<Peer>> {
        self.peers.insert(peer.id, peer)
    }

    /// Remove `peer` only if it is still the entry for its identity, so a
    /// closing connection never evicts the connection that replaced it.
    pub fn delete(&self, peer: &Arc<Peer>) -> bool {
        self.peers
            .remove_if(&peer.id, |_, current| Arc::ptr_eq(current, peer))
            .is_some()
    }

    pub fn slice(&self) -> Vec<Arc<Peer>> {
        self.peers.iter().map(|entry| Arc::clone(entry.value())).collect()
    }
}

/// `target -> [(relayer, last_seen_ms)]` with a freshness window.
pub struct RemoteRelayers {
    window: Duration,
    routes: Mutex<HashMap<PeerId, Vec<(PeerId, u64)>>>,
}

impl RemoteRelayers {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            routes: Mutex::new(HashMap::new()),
        }
    }

    fn is_fresh(&self, seen: u64, now: u64) -> bool {
        now < seen.saturating_add(self.window.as_millis() as u64)
    }

    /// Record that `relayer` advertised `target` at `now`.  Stale routes to
    /// `target` are pruned on the way.
    pub fn add(&self, target: PeerId, relayer: PeerId, now: u64) {
        let mut routes = self.routes.lock();
        let entries = routes.entry(target).or_default();
        entries.retain(|(id, seen)| *id != relayer && self.is_fresh(*seen, now));
        entries.push((relayer, now));
    }

    /// Relayers that advertised `target` within the window, most recent
    /// first.
    pub fn get(&self, target: &PeerId, now: u64) -> Vec<PeerId> {
        let routes = self.routes.lock();
        let Some(entries) = routes.get(target) else {
            return Vec::new();
        };
        let mut fresh: Vec<_> = entries
            .iter()
            .filter(|(_, seen)| self.is_fresh(*seen, now))
            .collect();
        fresh.sort_by(|a, b| b.1.cmp(&a.1));
        fresh.into_iter().map(|(id, _)| *id).collect()
    }

    /// Drop every stale route.  Returns how many targets remain routable.
    pub fn prune(&self, now: u64) -> usize {
        let mut routes = self.routes.lock();
        routes.retain(|_, entries| {
            entries.retain(|(_, seen)| self.is_fresh(*seen, now));
            !entries.is_empty()
        });
        routes.len()
    }
}
