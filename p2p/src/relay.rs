//! Relay mesh: routing to peers without a direct connection.
//!
//! Consumers only hold links to relayers, so a message for any other node is
//! wrapped as `Relay{from, to, inner}` and handed to the relayers that can
//! reach `to`.  Relayers learn who they can reach through the periodic
//! `Consumers` advertisement of their relayer neighbors.
//!
//! Loops are cut in three places: a relay whose `from` is this node is
//! dropped, a relay is never forwarded back to the hop it came from or to its
//! originator, and each `(relay, next hop)` pair is forwarded at most once per
//! resend window.

use {
    crate::{
        cache::{now_millis, RESEND_WINDOW},
        error::{P2pError, Result},
        node::Node,
        peer::{ChanMsg, Peer, Priority},
        protocol::{ConsumerEntry, PeerMessage},
        transport::TRANSPORT_VERSION,
        types::{Hash, PeerId},
    },
    log::{debug, warn},
    std::sync::Arc,
    tokio::time::interval,
};

impl Node {
    /// Queue `data` for `to`, directly when connected and through relayers
    /// otherwise.
    ///
    /// `key` is the dedup key of the unwrapped message.  Sending to this node
    /// itself is a no-op.
    pub fn send_to_peer(
        &self,
        to: &PeerId,
        key: Option<Hash>,
        data: Vec<u8>,
        priority: Priority,
    ) -> Result<()> {
        if self.is_shutting_down() {
            return Err(P2pError::Shutdown);
        }
        if *to == self.id {
            return Ok(());
        }
        if let Some(peer) = self.neighbor(to) {
            return self.offer_to(&peer, priority, ChanMsg::new(key, data));
        }

        let mut hops: Vec<Arc<Peer>> = self
            .remote_relayers
            .get(to, now_millis())
            .iter()
            .filter_map(|relayer| self.relayers.get(relayer))
            .collect();
        if hops.is_empty() {
            hops = self.relayers.slice();
        }
        if hops.is_empty() {
            return Err(P2pError::UnknownPeer(*to));
        }

        let relay = PeerMessage::Relay {
            from: self.id,
            to: *to,
            data,
        }
        .encode();
        let base = key.map(|key| key.0.to_vec()).unwrap_or_else(|| relay.clone());
        let mut queued = false;
        for hop in hops {
            let hop_key = Hash::digest_parts(&[&base, hop.id.as_bytes()]);
            if hop.offer(priority, ChanMsg::new(Some(hop_key), relay.clone())) {
                queued = true;
            } else {
                debug!("relayer {} refused relay for {}", hop.id, to);
            }
        }
        if queued {
            Ok(())
        } else {
            warn!("no relayer accepted message for {}", to);
            Err(P2pError::QueueFull(*to))
        }
    }

    /// Handle a `Relay` received on `peer`'s connection.
    pub(crate) fn handle_relay_message(
        &self,
        peer: &Peer,
        from: PeerId,
        to: PeerId,
        data: Vec<u8>,
    ) -> Result<()> {
        if from == self.id {
            debug!("dropping relay from {} that originated here", peer.id);
            return Ok(());
        }

        if to == self.id {
            // The relaying peer is not accountable for what it carries, so
            // problems with the inner message never close its link.
            let inner = match PeerMessage::decode(TRANSPORT_VERSION, &data) {
                Ok(PeerMessage::Relay { .. }) => {
                    warn!("dropping nested relay from {} via {}", from, peer.id);
                    return Ok(());
                }
                Ok(inner) => inner,
                Err(e) => {
                    warn!("dropping malformed relay from {} via {}: {}", from, peer.id, e);
                    return Ok(());
                }
            };
            if let Err(e) = self.handle_message_from(&from, inner) {
                warn!("relayed message from {} via {} rejected: {}", from, peer.id, e);
            }
            return Ok(());
        }

        if !self.is_relayer() {
            debug!("not a relayer, dropping relay for {} from {}", to, peer.id);
            return Ok(());
        }

        let hops: Vec<Arc<Peer>> = match self.neighbor(&to) {
            Some(target) => vec![target],
            None => self
                .remote_relayers
                .get(&to, now_millis())
                .iter()
                .filter_map(|relayer| self.relayers.get(relayer))
                .collect(),
        };
        if hops.is_empty() {
            debug!("no route to {} for relay from {}", to, from);
            return Ok(());
        }

        let relay = PeerMessage::Relay { from, to, data }.encode();
        for hop in hops {
            if hop.id == peer.id || hop.id == from {
                continue;
            }
            let key = Hash::digest_parts(&[&relay, hop.id.as_bytes()]);
            if self.cache.contains(key.as_bytes(), RESEND_WINDOW) {
                debug!("relay for {} already forwarded to {}", to, hop.id);
                continue;
            }
            // Recorded here rather than by the send loop; a dropped forward
            // stays retryable.
            if hop.offer(Priority::High, ChanMsg::new(None, relay.clone())) {
                self.cache.store_now(key.as_bytes());
            } else {
                debug!("forward of relay for {} to {} dropped", to, hop.id);
            }
        }
        Ok(())
    }

    // ── Consumers advertisement ─────────────────────────────────────────

    pub(crate) async fn consumers_loop(self: Arc<Self>) {
        let mut ticker = interval(self.config.consumers_interval());
        loop {
            tokio::select! {
                _ = self.token.cancelled() => break,
                _ = ticker.tick() => {}
            }
            self.remote_relayers.prune(now_millis());
            self.broadcast_consumers();
        }
    }

    /// Tell every relayer neighbor which consumers this node serves.
    /// Returns the number of consumers advertised.
    pub(crate) fn broadcast_consumers(&self) -> usize {
        let entries: Vec<ConsumerEntry> = self
            .consumers
            .slice()
            .iter()
            .filter(|peer| !peer.is_closing())
            .filter_map(|peer| {
                let auth = peer.consumer_auth.as_ref()?;
                (auth.data.len() <= usize::from(u16::MAX)).then(|| ConsumerEntry {
                    id: peer.id,
                    auth: auth.data.clone(),
                })
            })
            .collect();
        if entries.is_empty() {
            return 0;
        }
        let relayers = self.relayers.slice();
        for chunk in entries.chunks(usize::from(u16::MAX)) {
            let data = PeerMessage::Consumers {
                consumers: chunk.to_vec(),
            }
            .encode();
            for relayer in &relayers {
                if !relayer.offer(Priority::Normal, ChanMsg::new(None, data.clone())) {
                    debug!("consumers advertisement to {} dropped", relayer.id);
                }
            }
        }
        entries.len()
    }

    /// Record the consumers a relayer neighbor advertises.
    pub(crate) fn handle_consumers_message(
        &self,
        peer: &Peer,
        consumers: Vec<ConsumerEntry>,
    ) -> Result<()> {
        if !peer.is_relayer {
            return Err(P2pError::UnexpectedMessage {
                expected: "consumers from a relayer",
                actual: "consumers from a consumer",
            });
        }
        let now = now_millis();
        for entry in consumers {
            if entry.id == self.id {
                continue;
            }
            let auth = self.handle.authenticate_as(&peer.id, &entry.auth, 0)?;
            if auth.peer_id != entry.id {
                return Err(P2pError::Authentication(format!(
                    "relayer {} vouched for {} with credentials of {}",
                    peer.id, entry.id, auth.peer_id
                )));
            }
            self.remote_relayers.add(entry.id, peer.id, now);
        }
        Ok(())
    }
}
