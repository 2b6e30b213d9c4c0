//! # Connection Bus
//!
//! Owns the listener and the live-connection set.
//!
//! Each accepted socket becomes a [`Connection`] running on its own task.
//! The bus loop multiplexes:
//! - new sockets from the listener
//! - [`ConnectionEvent`]s coming back from connections
//! - the keep-alive timer (every `keepalive_interval`)
//! - the latency timer (every twice that)
//! - the shutdown channel
//!
//! Broadcasts go through each connection's command channel. A connection
//! that has already gone away simply refuses the command; the broadcast
//! carries on with the rest.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, Mutex};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};

use crate::chat::{from_key, ChatComponent, TranslationArg};
use crate::error::Result;
use crate::protocol::packets::{ClientboundPacket, PlayerListAction};
use crate::protocol::types::{ChatPosition, PlayerListEntry};
use crate::service::connection::{
    Connection, ConnectionEvent, ConnectionHandle, ConnectionInfo,
};
use crate::service::context::ServerContext;
use crate::utils::timeout::latency_interval;

/// The live connections, keyed by connection id
///
/// Only the bus inserts and removes; connections read it for status
/// responses and the join player list.
#[derive(Debug, Default)]
pub struct ConnectionSet {
    connections: RwLock<HashMap<u64, ConnectionHandle>>,
}

impl ConnectionSet {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<u64, ConnectionHandle>> {
        self.connections.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<u64, ConnectionHandle>> {
        self.connections.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn insert(&self, handle: ConnectionHandle) {
        self.write().insert(handle.id(), handle);
    }

    pub(crate) fn remove(&self, id: u64) -> Option<ConnectionHandle> {
        self.write().remove(&id)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    pub fn get(&self, id: u64) -> Option<ConnectionHandle> {
        self.read().get(&id).cloned()
    }

    /// Copy of every handle, so callers never hold the lock while sending
    pub fn handles(&self) -> Vec<ConnectionHandle> {
        self.read().values().cloned().collect()
    }

    /// Players of every play-state connection, ordered by connection id
    pub fn players(&self) -> Vec<PlayerListEntry> {
        let connections = self.read();
        let mut playing: Vec<(u64, PlayerListEntry)> = connections
            .values()
            .filter(|handle| handle.info().is_playing())
            .filter_map(|handle| handle.info().player().map(|entry| (handle.id(), entry)))
            .collect();
        playing.sort_by_key(|(id, _)| *id);
        playing.into_iter().map(|(_, entry)| entry).collect()
    }

    /// Reserve a player slot for a login in progress
    ///
    /// Slots are held from LoginStart until the connection leaves the set,
    /// so logins racing each other cannot overshoot `max_players`.
    pub fn claim_player_slot(&self, info: &ConnectionInfo, max_players: usize) -> bool {
        // Claims are serialised by the write lock
        let connections = self.write();
        if info.holds_player_slot() {
            return true;
        }
        let held = connections
            .values()
            .filter(|handle| handle.id() != info.id() && handle.info().holds_player_slot())
            .count();
        if held >= max_players {
            return false;
        }
        info.set_player_slot();
        true
    }

    pub fn online_count(&self) -> usize {
        self.read()
            .values()
            .filter(|handle| handle.info().is_playing())
            .count()
    }
}

/// Accept loop, live set and periodic broadcasts
pub struct ConnectionBus {
    ctx: Arc<ServerContext>,
    connections: Arc<ConnectionSet>,
    next_id: AtomicU64,
    events_tx: mpsc::UnboundedSender<ConnectionEvent>,
    events_rx: Mutex<mpsc::UnboundedReceiver<ConnectionEvent>>,
    subscriber: Option<mpsc::UnboundedSender<ConnectionEvent>>,
}

impl ConnectionBus {
    pub fn new(ctx: Arc<ServerContext>) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            ctx,
            connections: Arc::new(ConnectionSet::new()),
            next_id: AtomicU64::new(1),
            events_tx,
            events_rx: Mutex::new(events_rx),
            subscriber: None,
        }
    }

    /// Forward every [`ConnectionEvent`] to `subscriber` once the bus has handled it
    pub fn with_subscriber(mut self, subscriber: mpsc::UnboundedSender<ConnectionEvent>) -> Self {
        self.subscriber = Some(subscriber);
        self
    }

    pub fn context(&self) -> &Arc<ServerContext> {
        &self.ctx
    }

    pub fn connections(&self) -> &Arc<ConnectionSet> {
        &self.connections
    }

    /// Bind the configured listen address
    pub async fn bind(&self) -> Result<TcpListener> {
        let listener = TcpListener::bind(&self.ctx.config().server.address).await?;
        info!(address = %listener.local_addr()?, "Listening");
        Ok(listener)
    }

    /// Bind and serve until CTRL+C
    pub async fn start(&self) -> Result<()> {
        let listener = self.bind().await?;
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);

        tokio::spawn(async move {
            if let Ok(()) = tokio::signal::ctrl_c().await {
                info!("Received CTRL+C signal, shutting down");
                let _ = shutdown_tx.send(()).await;
            }
        });

        self.serve(listener, shutdown_rx).await
    }

    /// Run the bus loop until `shutdown_rx` fires or its sender is dropped
    #[instrument(skip(self, listener, shutdown_rx))]
    pub async fn serve(&self, listener: TcpListener, mut shutdown_rx: mpsc::Receiver<()>) -> Result<()> {
        let mut events = self.events_rx.lock().await;

        let keepalive_period = self.ctx.config().server.keepalive_interval;
        let latency_period = latency_interval(keepalive_period);
        let mut keepalive = interval_at(Instant::now() + keepalive_period, keepalive_period);
        keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut latency = interval_at(Instant::now() + latency_period, latency_period);
        latency.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("Shutting down server. Waiting for connections to close...");
                    self.shutdown(&mut events).await;
                    self.ctx.metrics().log_metrics();
                    return Ok(());
                }

                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((stream, peer)) => {
                            if let Err(e) = stream.set_nodelay(true) {
                                debug!(error = %e, "Failed to set TCP_NODELAY");
                            }
                            self.accept(stream, Some(peer));
                        }
                        Err(e) => {
                            error!(error = %e, "Error accepting connection");
                        }
                    }
                }

                Some(event) = events.recv() => self.handle_event(event),

                _ = keepalive.tick() => self.broadcast_keepalive(),

                _ = latency.tick() => self.broadcast_latency(),
            }
        }
    }

    /// Register a transport and spawn its connection task
    ///
    /// Returns the connection id, or `None` when `max_connections` is reached.
    pub fn accept<T>(&self, transport: T, peer: Option<SocketAddr>) -> Option<u64>
    where
        T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let metrics = self.ctx.metrics();
        if self.connections.len() >= self.ctx.config().server.max_connections {
            metrics.connection_rejected();
            warn!(peer = ?peer, "Connection limit reached; refusing");
            return None;
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (connection, handle) = Connection::new(
            id,
            transport,
            peer,
            Arc::clone(&self.ctx),
            Arc::clone(&self.connections),
            self.events_tx.clone(),
        );
        self.connections.insert(handle);
        metrics.connection_established();
        debug!(conn = id, peer = ?peer, "Accepted connection");

        let connections = Arc::clone(&self.connections);
        let ctx = Arc::clone(&self.ctx);
        tokio::spawn(async move {
            connection.run().await;
            if connections.remove(id).is_some() {
                ctx.metrics().connection_closed();
            }
        });
        Some(id)
    }

    fn handle_event(&self, event: ConnectionEvent) {
        match &event {
            ConnectionEvent::Joined { id, player } => {
                self.broadcast_except(*id, |_| {
                    Some(ClientboundPacket::PlayerListItem(PlayerListAction::Add(vec![
                        player.clone(),
                    ])))
                });
                self.announce("multiplayer.player.joined", &player.username);
            }
            ConnectionEvent::Disconnected { id, player } => {
                if self.connections.remove(*id).is_some() {
                    self.ctx.metrics().connection_closed();
                }
                if let Some(player) = player {
                    self.broadcast_play(|_| {
                        Some(ClientboundPacket::PlayerListItem(PlayerListAction::Remove(vec![
                            player.uuid,
                        ])))
                    });
                    self.announce("multiplayer.player.left", &player.username);
                }
            }
            ConnectionEvent::Packet { .. } => {}
        }

        if let Some(subscriber) = &self.subscriber {
            let _ = subscriber.send(event);
        }
    }

    fn announce(&self, key: &str, username: &str) {
        let message = from_key(
            self.ctx.locales(),
            key,
            vec![TranslationArg::from(username)],
        )
        .color("yellow");
        self.broadcast_play(|_| {
            Some(ClientboundPacket::ChatMessage {
                message: message.clone(),
                position: ChatPosition::System,
            })
        });
    }

    /// Queue the packet `f` returns for every live connection, then flush each
    ///
    /// `f` sees every connection whatever its state and returns `None` to
    /// skip one. Returns how many connections accepted a packet.
    pub fn broadcast<F>(&self, f: F) -> usize
    where
        F: FnMut(&ConnectionInfo) -> Option<ClientboundPacket>,
    {
        self.broadcast_filtered(|_| true, f)
    }

    fn broadcast_play<F>(&self, f: F) -> usize
    where
        F: FnMut(&ConnectionInfo) -> Option<ClientboundPacket>,
    {
        self.broadcast_filtered(|handle| handle.info().is_playing(), f)
    }

    fn broadcast_except<F>(&self, skip: u64, f: F) -> usize
    where
        F: FnMut(&ConnectionInfo) -> Option<ClientboundPacket>,
    {
        self.broadcast_filtered(|handle| handle.id() != skip && handle.info().is_playing(), f)
    }

    fn broadcast_filtered<P, F>(&self, mut include: P, mut f: F) -> usize
    where
        P: FnMut(&ConnectionHandle) -> bool,
        F: FnMut(&ConnectionInfo) -> Option<ClientboundPacket>,
    {
        let mut delivered = 0;
        for handle in self.connections.handles() {
            if !include(&handle) {
                continue;
            }
            let Some(packet) = f(handle.info()) else {
                continue;
            };
            match handle.queue(packet, false).and_then(|()| handle.flush()) {
                Ok(()) => delivered += 1,
                Err(_) => debug!(conn = handle.id(), "Connection went away during broadcast"),
            }
        }
        delivered
    }

    /// Ask every play-state connection to send a keep-alive or time out
    pub fn broadcast_keepalive(&self) {
        let timeout = self.ctx.config().server.keepalive_timeout;
        for handle in self.connections.handles() {
            if handle.info().is_playing() && handle.keep_alive(timeout).is_err() {
                debug!(conn = handle.id(), "Connection went away before keep-alive");
            }
        }
    }

    /// Send every player's measured latency to every play-state connection
    pub fn broadcast_latency(&self) {
        let latencies: Vec<_> = self
            .connections
            .players()
            .into_iter()
            .map(|entry| (entry.uuid, entry.latency_ms))
            .collect();
        if latencies.is_empty() {
            return;
        }
        self.broadcast_play(|_| {
            Some(ClientboundPacket::PlayerListItem(PlayerListAction::UpdateLatency(
                latencies.clone(),
            )))
        });
    }

    /// Kick everyone with `reason`
    pub fn kick_all(&self, reason: &ChatComponent) -> usize {
        self.connections
            .handles()
            .into_iter()
            .filter(|handle| handle.kick(reason.clone()).is_ok())
            .count()
    }

    async fn shutdown(&self, events: &mut mpsc::UnboundedReceiver<ConnectionEvent>) {
        let reason = from_key(
            self.ctx.locales(),
            "multiplayer.disconnect.server_shutdown",
            Vec::new(),
        );
        let kicked = self.kick_all(&reason);
        info!(connections = kicked, "Kicked live connections");

        let timeout = tokio::time::sleep(self.ctx.config().server.shutdown_timeout);
        tokio::pin!(timeout);

        while !self.connections.is_empty() {
            tokio::select! {
                _ = &mut timeout => {
                    warn!(remaining = self.connections.len(), "Shutdown timeout reached, forcing exit");
                    break;
                }
                event = events.recv() => match event {
                    Some(event) => self.handle_event(event),
                    None => break,
                },
            }
        }
        info!("All connections closed, shutting down");
    }
}

impl std::fmt::Debug for ConnectionBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionBus")
            .field("connections", &self.connections.len())
            .field("has_subscriber", &self.subscriber.is_some())
            .finish_non_exhaustive()
    }
}
