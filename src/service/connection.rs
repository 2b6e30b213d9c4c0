//! # Connection
//!
//! One client socket, driven by its own task.
//!
//! A [`Connection`] owns the framed transport, the negotiated protocol
//! version and locale, the outbound queue and the keep-alive bookkeeping.
//! Nothing else touches that state: the bus talks to a connection through a
//! [`ConnectionHandle`] (a command channel) and hears back through
//! [`ConnectionEvent`]s. Shared, read-mostly facts about the connection
//! (state, latency, player) are published in a [`ConnectionInfo`].
//!
//! ## Ordering
//! [`Connection::send`] drains the queue one packet at a time: encode, write,
//! flush, then run the packet's [`AfterSend`] hook before touching the next
//! one. SetCompression relies on this; the peer switches on receipt, we switch
//! once the packet is on the wire.
//!
//! ## Failure
//! Registry misses drop one packet. Anything else disconnects this
//! connection only. [`Connection::disconnect`] runs its side effects once.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::codec::Framed;
use tracing::{debug, info, instrument, trace, warn};

use crate::chat::locale::is_locale_tag;
use crate::chat::{from_key, ChatComponent, TranslationArg};
use crate::core::codec::{FrameCodec, InboundFrame};
use crate::core::legacy::{LegacyPing, LegacyStatus};
use crate::error::{ProtocolError, Result};
use crate::protocol::packets::{
    AfterSend, ClientboundPacket, EncodeContext, Handshake, JoinGame, PlayerListAction,
    PlayerSample, ServerboundPacket, StatusPlayers, StatusResponse, StatusVersion,
};
use crate::protocol::state::ConnectionState;
use crate::protocol::types::PlayerListEntry;
use crate::service::bus::ConnectionSet;
use crate::service::context::{Identity, Player, ServerContext};
use crate::utils::crypto::{self, VERIFY_TOKEN_LEN};
use crate::utils::timeout::{with_timeout_error, DEFAULT_TIMEOUT};

/// Players listed in a status response sample
pub const STATUS_SAMPLE_SIZE: usize = 12;

/// What other tasks may read about a connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSnapshot {
    pub state: ConnectionState,
    pub protocol_version: i32,
    pub locale: String,
    pub latency_ms: i32,
    pub player: Option<PlayerListEntry>,
}

/// Published view of one connection, shared with the bus
#[derive(Debug)]
pub struct ConnectionInfo {
    id: u64,
    peer: Option<SocketAddr>,
    snapshot: RwLock<ConnectionSnapshot>,
    holds_player_slot: AtomicBool,
}

impl ConnectionInfo {
    fn new(id: u64, peer: Option<SocketAddr>, locale: String) -> Self {
        Self {
            id,
            peer,
            snapshot: RwLock::new(ConnectionSnapshot {
                state: ConnectionState::Handshaking,
                protocol_version: 0,
                locale,
                latency_ms: 0,
                player: None,
            }),
            holds_player_slot: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    pub fn snapshot(&self) -> ConnectionSnapshot {
        self.snapshot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn state(&self) -> ConnectionState {
        self.snapshot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .state
    }

    /// Whether this connection counts against `max_players`
    pub fn holds_player_slot(&self) -> bool {
        self.holds_player_slot.load(Ordering::Acquire)
    }

    pub(crate) fn set_player_slot(&self) {
        self.holds_player_slot.store(true, Ordering::Release);
    }

    pub fn is_playing(&self) -> bool {
        self.state() == ConnectionState::Play
    }

    /// Player-list entry carrying the latest measured latency
    pub fn player(&self) -> Option<PlayerListEntry> {
        let snapshot = self.snapshot.read().unwrap_or_else(PoisonError::into_inner);
        snapshot.player.clone().map(|mut entry| {
            entry.latency_ms = snapshot.latency_ms;
            entry
        })
    }

    fn update(&self, f: impl FnOnce(&mut ConnectionSnapshot)) {
        let mut snapshot = self.snapshot.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut snapshot);
    }
}

/// Notifications a connection sends to whoever owns it
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    /// Login completed and the join sequence was sent
    Joined { id: u64, player: PlayerListEntry },
    /// A play-state packet, after the core handled it
    Packet { id: u64, packet: ServerboundPacket },
    /// Sent exactly once, after the socket is torn down
    Disconnected {
        id: u64,
        player: Option<PlayerListEntry>,
    },
}

#[derive(Debug)]
enum Command {
    Queue {
        packet: ClientboundPacket,
        priority: bool,
    },
    Flush,
    KeepAlive {
        timeout: Duration,
    },
    Kick(ChatComponent),
    Disconnect,
}

/// Cloneable remote control for a running [`Connection`]
///
/// Every method fails with [`ProtocolError::ConnectionClosed`] once the
/// connection task has finished.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    info: Arc<ConnectionInfo>,
    commands: mpsc::UnboundedSender<Command>,
}

impl ConnectionHandle {
    pub fn id(&self) -> u64 {
        self.info.id
    }

    pub fn info(&self) -> &Arc<ConnectionInfo> {
        &self.info
    }

    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }

    fn command(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| ProtocolError::ConnectionClosed)
    }

    pub fn queue(&self, packet: ClientboundPacket, priority: bool) -> Result<()> {
        self.command(Command::Queue { packet, priority })
    }

    pub fn flush(&self) -> Result<()> {
        self.command(Command::Flush)
    }

    /// Send a keep-alive, or drop the connection if the last one is older than `timeout`
    pub fn keep_alive(&self, timeout: Duration) -> Result<()> {
        self.command(Command::KeepAlive { timeout })
    }

    pub fn kick(&self, reason: ChatComponent) -> Result<()> {
        self.command(Command::Kick(reason))
    }

    pub fn disconnect(&self) -> Result<()> {
        self.command(Command::Disconnect)
    }
}

#[derive(Debug, Default)]
struct KeepAlive {
    pending: Option<(i64, Instant)>,
    last_ack_at: Option<Instant>,
}

#[derive(Debug)]
struct PendingLogin {
    username: String,
    verify_token: [u8; VERIFY_TOKEN_LEN],
}

enum Step {
    Frame(Option<Result<InboundFrame>>),
    Command(Option<Command>),
}

/// Server side of one client stream
pub struct Connection<T> {
    info: Arc<ConnectionInfo>,
    framed: Framed<T, FrameCodec>,
    ctx: Arc<ServerContext>,
    connections: Arc<ConnectionSet>,
    commands: mpsc::UnboundedReceiver<Command>,
    events: mpsc::UnboundedSender<ConnectionEvent>,
    queue: VecDeque<ClientboundPacket>,
    state: ConnectionState,
    protocol_version: i32,
    locale: String,
    view_distance: Option<i32>,
    keep_alive: KeepAlive,
    pending_login: Option<PendingLogin>,
    player: Option<Player>,
    next_teleport_id: i32,
    closed: bool,
}

impl<T> Connection<T>
where
    T: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(
        id: u64,
        transport: T,
        peer: Option<SocketAddr>,
        ctx: Arc<ServerContext>,
        connections: Arc<ConnectionSet>,
        events: mpsc::UnboundedSender<ConnectionEvent>,
    ) -> (Self, ConnectionHandle) {
        let locale = ctx.config().protocol.default_locale.clone();
        let info = Arc::new(ConnectionInfo::new(id, peer, locale.clone()));
        let (commands_tx, commands) = mpsc::unbounded_channel();
        let framed = Framed::new(transport, FrameCodec::from_config(&ctx.config().transport));

        let connection = Self {
            info: Arc::clone(&info),
            framed,
            ctx,
            connections,
            commands,
            events,
            queue: VecDeque::new(),
            state: ConnectionState::Handshaking,
            protocol_version: 0,
            locale,
            view_distance: None,
            keep_alive: KeepAlive::default(),
            pending_login: None,
            player: None,
            next_teleport_id: 0,
            closed: false,
        };
        let handle = ConnectionHandle {
            info,
            commands: commands_tx,
        };
        (connection, handle)
    }

    pub fn id(&self) -> u64 {
        self.info.id
    }

    pub fn info(&self) -> &Arc<ConnectionInfo> {
        &self.info
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn protocol_version(&self) -> i32 {
        self.protocol_version
    }

    pub fn locale(&self) -> &str {
        &self.locale
    }

    pub fn player(&self) -> Option<&Player> {
        self.player.as_ref()
    }

    pub fn codec(&self) -> &FrameCodec {
        self.framed.codec()
    }

    /// Packets waiting for the next [`send`](Self::send)
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Process frames and commands until the connection is closed
    #[instrument(skip(self), fields(conn = self.info.id, peer = ?self.info.peer))]
    pub async fn run(mut self) {
        let mut commands_open = true;
        while !self.closed {
            let step = tokio::select! {
                frame = self.framed.next() => Step::Frame(frame),
                command = self.commands.recv(), if commands_open => Step::Command(command),
            };

            let result = match step {
                Step::Frame(Some(Ok(frame))) => self.receive(frame).await,
                Step::Frame(Some(Err(e))) => Err(e),
                Step::Frame(None) => {
                    debug!("Peer closed the stream");
                    self.disconnect().await;
                    Ok(())
                }
                Step::Command(Some(command)) => self.handle_command(command).await,
                Step::Command(None) => {
                    commands_open = false;
                    Ok(())
                }
            };

            if let Err(e) = result {
                self.fail(e).await;
            }
        }
    }

    async fn handle_command(&mut self, command: Command) -> Result<()> {
        match command {
            Command::Queue { packet, priority } => {
                self.queue(packet, priority);
                Ok(())
            }
            Command::Flush => self.send().await,
            Command::KeepAlive { timeout } => self.keep_alive(timeout).await,
            Command::Kick(reason) => {
                self.kick(reason).await;
                Ok(())
            }
            Command::Disconnect => {
                self.disconnect().await;
                Ok(())
            }
        }
    }

    async fn fail(&mut self, error: ProtocolError) {
        if !error.is_fatal_for_connection() {
            match error {
                ProtocolError::UnmappedPacket { .. } => self.ctx.metrics().unmapped_packet(),
                _ => self.ctx.metrics().unknown_packet(),
            }
            debug!(conn = self.info.id, error = %error, "Skipping packet");
            return;
        }

        match error {
            ProtocolError::Io(_) | ProtocolError::ConnectionClosed | ProtocolError::Timeout => {
                debug!(conn = self.info.id, error = %error, "Transport failed");
            }
            ProtocolError::VerificationTokenMismatch => {
                self.ctx.metrics().protocol_error();
                warn!(conn = self.info.id, "Verification token mismatch");
                let reason = from_key(
                    self.ctx.locales(),
                    "multiplayer.disconnect.unverified_username",
                    Vec::new(),
                );
                self.kick(reason).await;
            }
            _ => {
                self.ctx.metrics().protocol_error();
                warn!(conn = self.info.id, error = %error, "Protocol error; disconnecting");
            }
        }
        self.disconnect().await;
    }

    /// Append `packet` to the outbound queue, or put it first when `priority` is set
    ///
    /// A no-op once the connection is closed.
    pub fn queue(&mut self, packet: ClientboundPacket, priority: bool) {
        if self.closed {
            trace!(conn = self.info.id, packet = packet.name(), "Queue on closed connection");
            return;
        }
        if priority {
            self.queue.push_front(packet);
        } else {
            self.queue.push_back(packet);
        }
    }

    /// Drain the queue in order
    ///
    /// Returns quietly once the connection is closed; unsent packets stay
    /// dropped.
    pub async fn send(&mut self) -> Result<()> {
        while self.send_next().await? {}
        Ok(())
    }

    async fn send_next(&mut self) -> Result<bool> {
        if self.closed {
            return Ok(false);
        }
        let Some(packet) = self.queue.pop_front() else {
            return Ok(false);
        };

        let frame = match self.encode(&packet) {
            Ok(frame) => frame,
            Err(e) if !e.is_fatal_for_connection() => {
                self.ctx.metrics().unmapped_packet();
                warn!(conn = self.info.id, packet = packet.name(), error = %e, "Dropping outbound packet");
                return Ok(true);
            }
            Err(e) => return Err(e),
        };

        let byte_count = frame.len() as u64;
        let compressed = self.framed.codec().compresses(frame.len());
        with_timeout_error(self.framed.send(frame), DEFAULT_TIMEOUT).await?;
        self.ctx.metrics().packet_sent(byte_count, compressed);
        trace!(conn = self.info.id, packet = packet.name(), bytes = byte_count, "Sent");

        if let Some(hook) = packet.after_send() {
            self.after_send(hook);
        }
        Ok(true)
    }

    fn encode(&self, packet: &ClientboundPacket) -> Result<Bytes> {
        let ctx = EncodeContext {
            protocol_version: self.protocol_version,
            locale: &self.locale,
            locales: self.ctx.locales(),
        };
        self.ctx.registry().encode_clientbound(packet, &ctx)
    }

    fn after_send(&mut self, hook: AfterSend) {
        match hook {
            AfterSend::EnableCompression { threshold } => {
                self.framed.codec_mut().enable_compression(threshold);
                debug!(conn = self.info.id, threshold, "Compression enabled");
            }
        }
    }

    /// Send a state-appropriate disconnect packet ahead of any backlog, then disconnect
    pub async fn kick(&mut self, reason: ChatComponent) {
        if self.closed {
            return;
        }
        info!(conn = self.info.id, reason = %reason.to_plain_text(), "Kicking connection");

        let packet = match self.state {
            ConnectionState::Login => Some(ClientboundPacket::LoginDisconnect { reason }),
            ConnectionState::Play => Some(ClientboundPacket::Disconnect { reason }),
            ConnectionState::Handshaking | ConnectionState::Status => None,
        };
        if let Some(packet) = packet {
            self.queue(packet, true);
            if let Err(e) = self.send_next().await {
                debug!(conn = self.info.id, error = %e, "Disconnect packet not delivered");
            }
        }
        self.disconnect().await;
    }

    /// Tear the connection down
    ///
    /// Drops the queue, shuts the socket, saves the player, then emits
    /// [`ConnectionEvent::Disconnected`]. Later calls do nothing.
    pub async fn disconnect(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.queue.clear();

        if let Err(e) = self.framed.get_mut().shutdown().await {
            debug!(conn = self.info.id, error = %e, "Socket shutdown failed");
        }

        if let Some(player) = &self.player {
            if let Err(e) = with_timeout_error(self.ctx.players().save(player), DEFAULT_TIMEOUT).await {
                warn!(conn = self.info.id, uuid = %player.uuid, error = %e, "Failed to save player");
            }
        }

        let player = self.info.player();
        let _ = self.events.send(ConnectionEvent::Disconnected {
            id: self.info.id,
            player,
        });
        debug!(conn = self.info.id, "Connection closed");
    }

    async fn keep_alive(&mut self, timeout: Duration) -> Result<()> {
        if self.state != ConnectionState::Play || self.closed {
            return Ok(());
        }

        match self.keep_alive.pending {
            Some((_, sent_at)) if sent_at.elapsed() >= timeout => {
                self.ctx.metrics().keepalive_timeout();
                warn!(
                    conn = self.info.id,
                    waited_ms = sent_at.elapsed().as_millis() as u64,
                    "Keep-alive not acknowledged"
                );
                let reason = from_key(self.ctx.locales(), "disconnect.timeout", Vec::new());
                self.kick(reason).await;
                Ok(())
            }
            Some(_) => Ok(()),
            None => {
                // i32 range keeps the id valid for VarInt keep-alives
                let id = i64::from(rand::random::<i32>());
                self.keep_alive.pending = Some((id, Instant::now()));
                self.queue(ClientboundPacket::KeepAlive { id }, false);
                self.send().await
            }
        }
    }

    /// Handle one decoded frame
    pub async fn receive(&mut self, frame: InboundFrame) -> Result<()> {
        match frame {
            InboundFrame::Packet(bytes) => self.receive_packet(bytes).await,
            InboundFrame::LegacyPing(ping) => self.answer_legacy_ping(ping).await,
            InboundFrame::EndOfStream => {
                debug!(conn = self.info.id, "Zero-length frame");
                self.disconnect().await;
                Ok(())
            }
        }
    }

    async fn receive_packet(&mut self, frame: Bytes) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.ctx.metrics().packet_received(frame.len() as u64);
        let packet = self
            .ctx
            .registry()
            .decode_serverbound(self.state, self.protocol_version, frame)?;
        trace!(conn = self.info.id, packet = packet.name(), "Received");
        self.handle(packet).await
    }

    async fn handle(&mut self, packet: ServerboundPacket) -> Result<()> {
        match (self.state, packet) {
            (ConnectionState::Handshaking, ServerboundPacket::Handshake(handshake)) => {
                self.handshake(handshake)
            }
            (ConnectionState::Status, ServerboundPacket::StatusRequest) => self.status().await,
            (ConnectionState::Status, ServerboundPacket::StatusPing { payload }) => {
                self.queue(ClientboundPacket::StatusPong { payload }, false);
                self.send().await?;
                self.disconnect().await;
                Ok(())
            }
            (ConnectionState::Login, ServerboundPacket::LoginStart { username }) => {
                self.login_start(username).await
            }
            (
                ConnectionState::Login,
                ServerboundPacket::EncryptionResponse {
                    shared_secret,
                    verify_token,
                },
            ) => self.encryption_response(&shared_secret, &verify_token).await,
            (ConnectionState::Play, packet) => {
                self.handle_play(&packet);
                let _ = self.events.send(ConnectionEvent::Packet {
                    id: self.info.id,
                    packet,
                });
                Ok(())
            }
            (state, packet) => Err(ProtocolError::UnexpectedPacket(format!(
                "{} in state {state}",
                packet.name()
            ))),
        }
    }

    fn handshake(&mut self, handshake: Handshake) -> Result<()> {
        let next = ConnectionState::from_next_state(handshake.next_state)?;
        self.protocol_version = handshake.protocol_version;
        self.state = next;
        self.info.update(|snapshot| {
            snapshot.state = next;
            snapshot.protocol_version = handshake.protocol_version;
        });
        debug!(
            conn = self.info.id,
            protocol = handshake.protocol_version,
            address = %handshake.server_address,
            next_state = %next,
            "Handshake"
        );
        Ok(())
    }

    async fn status(&mut self) -> Result<()> {
        let protocol = &self.ctx.config().protocol;
        let reported = if protocol.supports(self.protocol_version) {
            self.protocol_version
        } else {
            protocol.max_protocol
        };
        let players = self.connections.players();
        let response = StatusResponse {
            version: StatusVersion {
                name: protocol.version_name.clone(),
                protocol: reported,
            },
            players: StatusPlayers {
                max: self.ctx.max_players(),
                online: players.len(),
                sample: players
                    .iter()
                    .take(STATUS_SAMPLE_SIZE)
                    .map(|entry| PlayerSample {
                        name: entry.username.clone(),
                        id: entry.uuid,
                    })
                    .collect(),
            },
            description: ChatComponent::text(self.ctx.motd()),
            favicon: None,
        };

        self.queue(ClientboundPacket::StatusResponse(Box::new(response)), false);
        self.send().await
    }

    async fn answer_legacy_ping(&mut self, ping: LegacyPing) -> Result<()> {
        self.ctx.metrics().legacy_ping();
        debug!(conn = self.info.id, host = ?ping.host, protocol = ?ping.protocol_version, "Legacy ping");

        let protocol = &self.ctx.config().protocol;
        let response = LegacyStatus {
            protocol_version: protocol.max_protocol,
            version_name: protocol.version_name.clone(),
            motd: self.ctx.motd(),
            online_players: self.connections.online_count(),
            max_players: self.ctx.max_players(),
        }
        .encode();

        let transport = self.framed.get_mut();
        transport.write_all(&response).await?;
        transport.flush().await?;
        self.disconnect().await;
        Ok(())
    }

    async fn login_start(&mut self, username: String) -> Result<()> {
        if self.pending_login.is_some() || self.player.is_some() {
            return Err(ProtocolError::UnexpectedPacket("LoginStart".into()));
        }

        let ctx = Arc::clone(&self.ctx);
        let protocol = &ctx.config().protocol;
        let version_arg = || vec![TranslationArg::from(protocol.version_name.as_str())];
        if self.protocol_version < protocol.min_protocol {
            let reason = from_key(ctx.locales(), "multiplayer.disconnect.outdated_client", version_arg());
            self.kick(reason).await;
            return Ok(());
        }
        if self.protocol_version > protocol.max_protocol {
            let reason = from_key(ctx.locales(), "multiplayer.disconnect.outdated_server", version_arg());
            self.kick(reason).await;
            return Ok(());
        }
        if !self.connections.claim_player_slot(&self.info, ctx.max_players()) {
            let reason = from_key(ctx.locales(), "multiplayer.disconnect.server_full", Vec::new());
            self.kick(reason).await;
            return Ok(());
        }

        match ctx.key_pair() {
            Some(pair) => {
                let verify_token = crypto::verify_token();
                debug!(conn = self.info.id, username = %username, "Requesting encryption");
                self.pending_login = Some(PendingLogin {
                    username,
                    verify_token,
                });
                self.queue(
                    ClientboundPacket::EncryptionRequest {
                        server_id: String::new(),
                        public_key: pair.public_der().to_vec(),
                        verify_token: verify_token.to_vec(),
                    },
                    false,
                );
                self.send().await
            }
            None => {
                let identity =
                    with_timeout_error(ctx.identity().resolve(&username, None), DEFAULT_TIMEOUT).await?;
                self.finish_login(identity).await
            }
        }
    }

    async fn encryption_response(&mut self, shared_secret: &[u8], verify_token: &[u8]) -> Result<()> {
        let ctx = Arc::clone(&self.ctx);
        let (Some(pending), Some(pair)) = (self.pending_login.take(), ctx.key_pair()) else {
            return Err(ProtocolError::UnexpectedPacket("EncryptionResponse".into()));
        };

        let token = pair.decrypt(verify_token)?;
        if token != pending.verify_token {
            return Err(ProtocolError::VerificationTokenMismatch);
        }
        let secret = pair.decrypt(shared_secret)?;
        self.framed.codec_mut().enable_encryption(&secret)?;

        let server_hash = crypto::server_hash("", &secret, pair.public_der());
        let identity = with_timeout_error(
            ctx.identity().resolve(&pending.username, Some(&server_hash)),
            DEFAULT_TIMEOUT,
        )
        .await?;
        self.finish_login(identity).await
    }

    async fn finish_login(&mut self, identity: Identity) -> Result<()> {
        let ctx = Arc::clone(&self.ctx);
        let player = with_timeout_error(
            ctx.players().load(identity.uuid, &identity.username),
            DEFAULT_TIMEOUT,
        )
        .await?;
        self.player = Some(player);

        let threshold = ctx.compression_threshold();
        if threshold >= 0 {
            self.queue(ClientboundPacket::SetCompression { threshold }, false);
            self.framed
                .codec_mut()
                .announce_compression(threshold as usize);
        }
        self.queue(
            ClientboundPacket::LoginSuccess {
                uuid: identity.uuid,
                username: identity.username.clone(),
            },
            false,
        );
        self.send().await?;

        ctx.metrics().login();
        info!(
            conn = self.info.id,
            username = %identity.username,
            uuid = %identity.uuid,
            protocol = self.protocol_version,
            "Player logged in"
        );
        self.join().await
    }

    async fn join(&mut self) -> Result<()> {
        let Some(player) = self.player.clone() else {
            return Err(ProtocolError::UnexpectedPacket("join without a player".into()));
        };
        let ctx = Arc::clone(&self.ctx);
        let entry = PlayerListEntry {
            uuid: player.uuid,
            username: player.username.clone(),
            game_mode: player.game_mode,
            latency_ms: 0,
        };

        self.state = ConnectionState::Play;
        self.info.update(|snapshot| {
            snapshot.state = ConnectionState::Play;
            snapshot.player = Some(entry.clone());
        });

        let position = player.position;
        self.queue(
            ClientboundPacket::JoinGame(JoinGame {
                entity_id: ctx.next_entity_id(),
                game_mode: player.game_mode,
                dimension: 0,
                difficulty: 1,
                max_players: u8::try_from(ctx.max_players()).unwrap_or(u8::MAX),
                level_type: "default".to_string(),
                reduced_debug_info: false,
            }),
            false,
        );
        self.queue(
            ClientboundPacket::SpawnPosition {
                x: position.x.floor() as i32,
                y: position.y.floor() as i32,
                z: position.z.floor() as i32,
            },
            false,
        );
        self.next_teleport_id += 1;
        self.queue(
            ClientboundPacket::PlayerPositionAndLook {
                position,
                flags: 0,
                teleport_id: self.next_teleport_id,
            },
            false,
        );

        let mut online = self.connections.players();
        if !online.iter().any(|other| other.uuid == entry.uuid) {
            online.push(entry.clone());
        }
        self.queue(
            ClientboundPacket::PlayerListItem(PlayerListAction::Add(online)),
            false,
        );
        self.send().await?;

        self.send_chunks(&player).await?;

        let _ = self.events.send(ConnectionEvent::Joined {
            id: self.info.id,
            player: entry,
        });
        Ok(())
    }

    async fn send_chunks(&mut self, player: &Player) -> Result<()> {
        let ctx = Arc::clone(&self.ctx);
        let radius = match self.view_distance {
            Some(view) => view.min(ctx.render_distance()),
            None => ctx.render_distance(),
        };
        let (center_x, center_z) = player.position.chunk();

        let mut sent = 0usize;
        for x in center_x - radius..=center_x + radius {
            for z in center_z - radius..=center_z + radius {
                let chunk = ctx.world().chunk(&player.world, x, z);
                if let Some(column) = with_timeout_error(chunk, DEFAULT_TIMEOUT).await? {
                    self.queue(ClientboundPacket::ChunkData(column), false);
                    sent += 1;
                }
            }
            self.send().await?;
        }
        debug!(conn = self.info.id, radius, chunks = sent, "Sent chunks");
        Ok(())
    }

    fn handle_play(&mut self, packet: &ServerboundPacket) {
        match packet {
            ServerboundPacket::KeepAlive { id } => match self.keep_alive.pending {
                Some((expected, sent_at)) if expected == *id => {
                    let latency = sent_at.elapsed().as_millis().min(i32::MAX as u128) as i32;
                    self.keep_alive.pending = None;
                    self.keep_alive.last_ack_at = Some(Instant::now());
                    self.info.update(|snapshot| snapshot.latency_ms = latency);
                    trace!(conn = self.info.id, latency_ms = latency, "Keep-alive acknowledged");
                }
                _ => debug!(conn = self.info.id, id, "Unexpected keep-alive id"),
            },
            ServerboundPacket::ClientSettings(settings) => {
                let locale = settings.locale.to_ascii_lowercase();
                if is_locale_tag(&locale) {
                    self.locale = locale.clone();
                    self.info.update(|snapshot| snapshot.locale = locale);
                }
                self.view_distance = Some(i32::from(settings.view_distance.max(0)));
            }
            ServerboundPacket::TeleportConfirm { teleport_id } => {
                trace!(conn = self.info.id, teleport_id, "Teleport confirmed");
            }
            ServerboundPacket::PlayerPosition { x, y, z, on_ground } => {
                if let Some(player) = self.player.as_mut() {
                    player.position.x = *x;
                    player.position.y = *y;
                    player.position.z = *z;
                    player.position.on_ground = *on_ground;
                }
            }
            ServerboundPacket::PlayerRotation {
                yaw,
                pitch,
                on_ground,
            } => {
                if let Some(player) = self.player.as_mut() {
                    player.position.yaw = *yaw;
                    player.position.pitch = *pitch;
                    player.position.on_ground = *on_ground;
                }
            }
            ServerboundPacket::PlayerPositionAndRotation {
                x,
                y,
                z,
                yaw,
                pitch,
                on_ground,
            } => {
                if let Some(player) = self.player.as_mut() {
                    player.position.x = *x;
                    player.position.y = *y;
                    player.position.z = *z;
                    player.position.yaw = *yaw;
                    player.position.pitch = *pitch;
                    player.position.on_ground = *on_ground;
                }
            }
            _ => {}
        }
    }
}

impl<T> std::fmt::Debug for Connection<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.info.id)
            .field("state", &self.state)
            .field("protocol_version", &self.protocol_version)
            .field("queued", &self.queue.len())
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}
