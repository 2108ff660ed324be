//! Connection lifecycle and inbound dispatch.
//!
//! A [`Node`] owns every connection this process holds.  Each connection runs
//! four tasks under a supervisor:
//!
//! ```text
//!   socket ──► receive loop ──► receive queue ──► dispatch loop ──► handle
//!                                                     │
//!   socket ◄── send loop ◄── high / normal queues ◄───┴── offers from anywhere
//!                                   ▲
//!   graph queue ──► catch-up loop ──┘
//! ```
//!
//! Whichever task exits first cancels the peer's token; the supervisor then
//! joins the rest, closes the socket and flips the peer's closed flag, which
//! is what [`Peer::disconnect`] waits on.

use {
    crate::{
        cache::{ConfirmCache, REMOTE_RELAYER_WINDOW, RESEND_WINDOW},
        config::{P2pConfig, RelayerEndpoint},
        error::{P2pError, Result},
        handle::SyncHandle,
        neighbors::{NeighborMap, RemoteRelayers},
        peer::{ChanMsg, Peer, PeerReceivers, PeerSnapshot, Priority},
        protocol::{
            announcement_payload, commitment_payload, commitments_payload, MessageKind,
            PeerMessage,
        },
        transport::{Client, Listener},
        types::{AuthToken, PeerId},
    },
    log::{debug, error, info, warn},
    parking_lot::Mutex,
    std::{future::Future, net::SocketAddr, sync::Arc, time::Duration},
    tokio::{
        sync::mpsc::{self, error::SendTimeoutError},
        task::JoinHandle,
        time::{sleep, timeout, Instant},
    },
    tokio_util::sync::CancellationToken,
};

/// Pause after a failed `accept` before trying again.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

pub struct Node {
    pub(crate) id: PeerId,
    pub(crate) config: P2pConfig,
    pub(crate) handle: Arc<dyn SyncHandle>,
    pub(crate) cache: ConfirmCache,
    pub(crate) relayers: NeighborMap,
    pub(crate) consumers: NeighborMap,
    pub(crate) remote_relayers: RemoteRelayers,
    pub(crate) token: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Node {
    pub fn new(id: PeerId, handle: Arc<dyn SyncHandle>, config: P2pConfig) -> Arc<Self> {
        let cache = ConfirmCache::new(handle.cache_store());
        Arc::new(Self {
            id,
            config,
            handle,
            cache,
            relayers: NeighborMap::new(),
            consumers: NeighborMap::new(),
            remote_relayers: RemoteRelayers::new(REMOTE_RELAYER_WINDOW),
            token: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        })
    }

    pub fn id(&self) -> PeerId {
        self.id
    }

    pub fn config(&self) -> &P2pConfig {
        &self.config
    }

    pub fn is_relayer(&self) -> bool {
        self.config.relayer
    }

    pub(crate) fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Start the configured roles: the listener and consumers broadcast when
    /// this node is a relayer, and one reconnect loop per configured relayer.
    ///
    /// Returns the bound listener address for relayers.
    pub async fn start(self: &Arc<Self>) -> Result<Option<SocketAddr>> {
        let local = if self.is_relayer() {
            let addr = self.listen(&self.config.listener).await?;
            self.spawn(Arc::clone(self).consumers_loop());
            Some(addr)
        } else {
            None
        };
        for endpoint in &self.config.relayers {
            if endpoint.id == self.id {
                continue;
            }
            self.connect_relayer(endpoint.clone());
        }
        Ok(local)
    }

    /// Bind `addr` and accept inbound connections until teardown.
    pub async fn listen(self: &Arc<Self>, addr: &str) -> Result<SocketAddr> {
        let listener = Listener::bind(addr, &self.config).await?;
        let local = listener.local_addr()?;
        info!("node {} listening on {}", self.id, local);
        self.spawn(Arc::clone(self).accept_loop(listener));
        Ok(local)
    }

    /// Keep a link to `endpoint` open, redialing one round gap after every
    /// failure, until teardown.
    pub fn connect_relayer(self: &Arc<Self>, endpoint: RelayerEndpoint) {
        self.spawn(Arc::clone(self).relayer_loop(endpoint));
    }

    /// Read-only view of every connected neighbor.
    pub fn neighbors(&self) -> Vec<PeerSnapshot> {
        self.all_neighbors().iter().map(|peer| peer.snapshot()).collect()
    }

    /// Close every connection and wait for every task this node started.
    pub async fn teardown(&self) {
        info!("tearing down node {}", self.id);
        self.token.cancel();
        for peer in self.all_neighbors() {
            peer.disconnect().await;
        }
        loop {
            let tasks = std::mem::take(&mut *self.tasks.lock());
            if tasks.is_empty() {
                break;
            }
            for task in tasks {
                if let Err(e) = task.await {
                    error!("node {} task failed during teardown: {}", self.id, e);
                }
            }
        }
        info!("node {} stopped", self.id);
    }

    // ── Neighbor helpers ────────────────────────────────────────────────

    /// The direct connection to `id`, relayer links first.
    pub(crate) fn neighbor(&self, id: &PeerId) -> Option<Arc<Peer>> {
        self.relayers.get(id).or_else(|| self.consumers.get(id))
    }

    pub(crate) fn all_neighbors(&self) -> Vec<Arc<Peer>> {
        let mut peers = self.relayers.slice();
        peers.extend(self.consumers.slice());
        peers
    }

    fn neighbor_map(&self, is_relayer: bool) -> &NeighborMap {
        if is_relayer {
            &self.relayers
        } else {
            &self.consumers
        }
    }

    /// Make `peer` the connection for its identity, closing the one it
    /// replaces.
    ///
    /// Two relayers that dial each other end up with two links.  While one
    /// is live, only a link dialed by the lower identity may replace it, so
    /// both sides settle on the same link.  Returns `false` when `peer` was
    /// refused and must be closed by the caller.
    async fn register_peer(&self, peer: &Arc<Peer>, dialed_by: &PeerId) -> bool {
        let map = self.neighbor_map(peer.is_relayer);
        if peer.is_relayer && *dialed_by != self.id.min(peer.id) {
            if let Some(current) = map.get(&peer.id).filter(|current| !current.is_closing()) {
                info!(
                    "keeping link {} to relayer {}, refusing the one from {}",
                    current.address, peer.id, peer.address
                );
                return false;
            }
        }
        if let Some(old) = map.put(Arc::clone(peer)) {
            info!("peer {} reconnected, closing previous connection", peer.id);
            old.disconnect().await;
        }
        true
    }

    fn spawn<F>(&self, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut tasks = self.tasks.lock();
        if self.token.is_cancelled() {
            return;
        }
        tasks.retain(|task| !task.is_finished());
        tasks.push(tokio::spawn(fut));
    }

    // ── Inbound ─────────────────────────────────────────────────────────

    async fn accept_loop(self: Arc<Self>, listener: Listener) {
        loop {
            let accepted = tokio::select! {
                _ = self.token.cancelled() => break,
                accepted = listener.accept() => accepted,
            };
            match accepted {
                Ok(client) => self.spawn(Arc::clone(&self).serve_inbound(client)),
                Err(e) => {
                    error!("node {} accept failed: {}", self.id, e);
                    tokio::select! {
                        _ = self.token.cancelled() => break,
                        _ = sleep(ACCEPT_BACKOFF) => {}
                    }
                }
            }
        }
        debug!("node {} accept loop stopped", self.id);
    }

    async fn serve_inbound(self: Arc<Self>, client: Client) {
        let auth = match self.authenticate_connection(&client).await {
            Ok(auth) => auth,
            Err(e) => {
                warn!("rejected connection from {}: {}", client.remote_addr(), e);
                if let Err(e) = client.close().await {
                    debug!("closing rejected connection: {}", e);
                }
                return;
            }
        };
        let id = auth.peer_id;
        let is_relayer = auth.is_relayer;
        let consumer_auth = (!is_relayer).then_some(auth);
        let (peer, receivers) = Peer::new(
            id,
            client.remote_addr().to_string(),
            is_relayer,
            consumer_auth,
            &self.token,
            &self.config,
        );
        let peer = Arc::new(peer);
        if !self.register_peer(&peer, &id).await {
            if let Err(e) = client.close().await {
                debug!("closing refused connection: {}", e);
            }
            return;
        }
        self.run_connection(peer, receivers, client).await;
    }

    /// Wait for the first frame of an inbound connection and verify it.
    ///
    /// The frame must arrive within the handshake timeout and must be an
    /// authentication message accepted by the handle.  No peer exists until
    /// this returns `Ok`.
    pub async fn authenticate_connection(&self, client: &Client) -> Result<AuthToken> {
        let handshake = self.config.handshake_timeout();
        let (version, data) = tokio::select! {
            _ = self.token.cancelled() => return Err(P2pError::Shutdown),
            frame = timeout(handshake, client.receive()) => frame
                .map_err(|_| P2pError::AuthenticationTimeout(self.config.handshake_timeout_ms))??,
        };
        match PeerMessage::decode(version, &data)? {
            PeerMessage::Authentication { data } => {
                let auth = self
                    .handle
                    .authenticate_as(&self.id, &data, handshake.as_secs().max(1))?;
                if auth.peer_id == self.id {
                    return Err(P2pError::Authentication("connection from self".to_string()));
                }
                info!(
                    "authenticated {} from {} (relayer={})",
                    auth.peer_id,
                    client.remote_addr(),
                    auth.is_relayer
                );
                Ok(auth)
            }
            other => Err(P2pError::UnexpectedMessage {
                expected: MessageKind::Authentication.name(),
                actual: other.kind().name(),
            }),
        }
    }

    // ── Outbound ────────────────────────────────────────────────────────

    async fn relayer_loop(self: Arc<Self>, endpoint: RelayerEndpoint) {
        let backoff = self.config.reconnect_backoff();
        loop {
            // An inbound link from the same relayer already serves this role.
            if self.relayers.get(&endpoint.id).is_some_and(|peer| !peer.is_closing()) {
                tokio::select! {
                    _ = self.token.cancelled() => break,
                    _ = sleep(backoff) => continue,
                }
            }
            match self.dial_relayer(&endpoint).await {
                Ok(()) => info!("relayer link {} closed", endpoint),
                Err(P2pError::Shutdown) => break,
                Err(e) => warn!("relayer link {} failed: {}", endpoint, e),
            }
            tokio::select! {
                _ = self.token.cancelled() => break,
                _ = sleep(backoff) => {}
            }
        }
        debug!("node {} stopped dialing {}", self.id, endpoint);
    }

    async fn dial_relayer(self: &Arc<Self>, endpoint: &RelayerEndpoint) -> Result<()> {
        let client = tokio::select! {
            _ = self.token.cancelled() => return Err(P2pError::Shutdown),
            client = Client::dial(&endpoint.address, &self.config) => client?,
        };
        let auth = self.handle.build_authentication_message(&endpoint.id);
        client
            .send(&PeerMessage::Authentication { data: auth }.encode())
            .await?;
        let (peer, receivers) = Peer::new(
            endpoint.id,
            endpoint.address.clone(),
            true,
            None,
            &self.token,
            &self.config,
        );
        let peer = Arc::new(peer);
        if !self.register_peer(&peer, &self.id).await {
            return client.close().await;
        }
        self.run_connection(peer, receivers, client).await;
        Ok(())
    }

    // ── Established ─────────────────────────────────────────────────────

    /// Run an authenticated connection until it fails or is closed.
    async fn run_connection(
        self: &Arc<Self>,
        peer: Arc<Peer>,
        receivers: PeerReceivers,
        client: Client,
    ) {
        let PeerReceivers {
            high,
            normal,
            graph,
            closed,
        } = receivers;
        let client = Arc::new(client);
        let token = peer.token().clone();
        let (inbox_tx, inbox_rx) = mpsc::channel(self.config.receive_queue_capacity.max(1));
        info!(
            "peer {} established ({}, relayer={})",
            peer.id, peer.address, peer.is_relayer
        );

        let receive = spawn_connection_task(
            &token,
            Arc::clone(self).receive_loop(Arc::clone(&peer), Arc::clone(&client), inbox_tx),
        );
        let dispatch = spawn_connection_task(
            &token,
            Arc::clone(self).dispatch_loop(Arc::clone(&peer), inbox_rx),
        );
        let send = spawn_connection_task(
            &token,
            Arc::clone(self).send_loop(Arc::clone(&peer), Arc::clone(&client), high, normal),
        );
        let catch_up = spawn_connection_task(
            &token,
            Arc::clone(self).sync_loop(Arc::clone(&peer), graph),
        );

        let (receive, dispatch, send, catch_up) = tokio::join!(receive, dispatch, send, catch_up);
        for (name, result) in [
            ("receive", receive),
            ("dispatch", dispatch),
            ("send", send),
            ("catch-up", catch_up),
        ] {
            match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("peer {} {} loop: {}", peer.id, name, e),
                Err(e) => error!("peer {} {} task failed: {}", peer.id, name, e),
            }
        }

        if let Err(e) = client.close().await {
            debug!("closing stream to {}: {}", peer.id, e);
        }
        self.neighbor_map(peer.is_relayer).delete(&peer);
        let _ = closed.send(true);
        info!("peer {} disconnected", peer.id);
    }

    async fn receive_loop(
        self: Arc<Self>,
        peer: Arc<Peer>,
        client: Arc<Client>,
        inbox: mpsc::Sender<PeerMessage>,
    ) -> Result<()> {
        let token = peer.token().clone();
        let queue_timeout = self.config.receive_queue_timeout();
        loop {
            let (version, data) = tokio::select! {
                _ = token.cancelled() => return Ok(()),
                frame = client.receive() => frame?,
            };
            let msg = PeerMessage::decode(version, &data)?;
            peer.received.record(msg.kind(), data.len());
            tokio::select! {
                _ = token.cancelled() => return Ok(()),
                sent = inbox.send_timeout(msg, queue_timeout) => match sent {
                    Ok(()) => {}
                    Err(SendTimeoutError::Timeout(_)) => return Err(P2pError::QueueFull(peer.id)),
                    Err(SendTimeoutError::Closed(_)) => return Err(P2pError::ChannelClosed),
                },
            }
        }
    }

    async fn dispatch_loop(
        self: Arc<Self>,
        peer: Arc<Peer>,
        mut inbox: mpsc::Receiver<PeerMessage>,
    ) -> Result<()> {
        let token = peer.token().clone();
        loop {
            let msg = tokio::select! {
                _ = token.cancelled() => return Ok(()),
                msg = inbox.recv() => match msg {
                    Some(msg) => msg,
                    None => return Ok(()),
                },
            };
            match self.handle_peer_message(&peer, msg) {
                Ok(()) => {}
                Err(P2pError::QueueFull(id)) => {
                    debug!("queue full for {} while handling message from {}", id, peer.id);
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn send_loop(
        self: Arc<Self>,
        peer: Arc<Peer>,
        client: Arc<Client>,
        mut high: mpsc::Receiver<ChanMsg>,
        mut normal: mpsc::Receiver<ChanMsg>,
    ) -> Result<()> {
        let token = peer.token().clone();
        let batch_size = self.config.send_batch_size.max(1);
        let idle = self.config.send_idle();
        let graph_interval = self.config.graph_interval();
        let mut next_graph = Instant::now();
        let mut batch = Vec::with_capacity(batch_size);

        loop {
            let now = Instant::now();
            if now >= next_graph {
                self.offer_graph_message(&peer);
                next_graph = now.checked_add(graph_interval).unwrap_or(now);
            }

            while batch.len() < batch_size {
                match high.try_recv() {
                    Ok(msg) => batch.push(msg),
                    Err(_) => break,
                }
            }
            while batch.len() < batch_size {
                match normal.try_recv() {
                    Ok(msg) => batch.push(msg),
                    Err(_) => break,
                }
            }

            if batch.is_empty() {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => return Ok(()),
                    Some(msg) = high.recv() => batch.push(msg),
                    Some(msg) = normal.recv() => batch.push(msg),
                    _ = sleep(idle) => {}
                }
                continue;
            }

            for msg in batch.drain(..) {
                if let Some(key) = &msg.key {
                    if self.cache.contains(key.as_bytes(), RESEND_WINDOW) {
                        continue;
                    }
                }
                tokio::select! {
                    _ = token.cancelled() => return Ok(()),
                    sent = client.send(&msg.data) => sent?,
                }
                if let Some(kind) = msg.data.first().copied().and_then(MessageKind::from_tag) {
                    peer.sent.record(kind, msg.data.len());
                }
                if let Some(key) = &msg.key {
                    self.cache.store_now(key.as_bytes());
                }
            }
        }
    }

    // ── Dispatch ────────────────────────────────────────────────────────

    /// Route one message received on `peer`'s connection.
    pub(crate) fn handle_peer_message(&self, peer: &Peer, msg: PeerMessage) -> Result<()> {
        match msg {
            PeerMessage::Relay { from, to, data } => {
                self.handle_relay_message(peer, from, to, data)
            }
            PeerMessage::Consumers { consumers } => self.handle_consumers_message(peer, consumers),
            msg => self.handle_message_from(&peer.id, msg),
        }
    }

    /// Deliver a message whose originator is `sender`, whether it arrived
    /// directly or unwrapped from a relay.
    pub(crate) fn handle_message_from(&self, sender: &PeerId, msg: PeerMessage) -> Result<()> {
        let kind = msg.kind();
        let handle = &self.handle;
        match msg {
            PeerMessage::Ping => Ok(()),
            PeerMessage::Graph { signature, points } => {
                self.handle_graph_message(sender, &signature, points)
            }
            PeerMessage::SnapshotConfirm { snapshot } => {
                self.confirm_snapshot_for_peer(sender, &snapshot);
                Ok(())
            }
            PeerMessage::TransactionRequest { hash } => {
                handle.send_transaction_to_peer(sender, &hash)
            }
            PeerMessage::Transaction { data } => handle.cache_put_transaction(sender, &data),
            PeerMessage::SnapshotAnnouncement {
                signature,
                commitment,
                snapshot,
            } => {
                let data = announcement_payload(&commitment, &snapshot);
                handle.cosi_queue_external_announcement(
                    sender,
                    &snapshot,
                    &commitment,
                    &data,
                    &signature,
                )
            }
            PeerMessage::SnapshotCommitment {
                signature,
                snapshot,
                commitment,
                want_tx,
            } => {
                let data = commitment_payload(&snapshot, &commitment, want_tx);
                handle.cosi_aggregate_self_commitments(
                    sender,
                    &snapshot,
                    &commitment,
                    want_tx,
                    &data,
                    &signature,
                )
            }
            PeerMessage::TransactionChallenge {
                snapshot,
                cosi,
                transaction,
            } => handle.cosi_queue_external_challenge(
                sender,
                &snapshot,
                &cosi,
                transaction.as_deref(),
            ),
            PeerMessage::FullChallenge {
                cosi,
                snapshot,
                transaction,
            } => handle.cosi_queue_external_full_challenge(sender, &snapshot, &cosi, &transaction),
            PeerMessage::SnapshotResponse { snapshot, response } => {
                handle.cosi_aggregate_self_responses(sender, &snapshot, &response)
            }
            PeerMessage::Commitments {
                signature,
                commitments,
            } => {
                let data = commitments_payload(&commitments);
                handle.cosi_queue_external_commitments(sender, &commitments, &data, &signature)
            }
            PeerMessage::SnapshotFinalization { snapshot } => {
                handle.verify_and_queue_append_snapshot_finalization(sender, &snapshot)
            }
            PeerMessage::Authentication { .. }
            | PeerMessage::Relay { .. }
            | PeerMessage::Consumers { .. } => Err(P2pError::UnexpectedMessage {
                expected: "session message",
                actual: kind.name(),
            }),
        }
    }

    /// Offer an encoded message to a direct neighbor.
    pub(crate) fn offer_to(&self, peer: &Peer, priority: Priority, msg: ChanMsg) -> Result<()> {
        if peer.offer(priority, msg) {
            Ok(())
        } else {
            warn!("dropped message for peer {}: queue full or closing", peer.id);
            Err(P2pError::QueueFull(peer.id))
        }
    }
}

/// Spawn a connection task that cancels `token` when it exits for any
/// reason, so its siblings follow it down.
fn spawn_connection_task<F>(token: &CancellationToken, fut: F) -> JoinHandle<Result<()>>
where
    F: Future<Output = Result<()>> + Send + 'static,
{
    let guard = token.clone().drop_guard();
    tokio::spawn(async move {
        let _guard = guard;
        fut.await
    })
}
