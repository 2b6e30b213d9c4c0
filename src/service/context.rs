//! # Server Context
//!
//! Everything a connection needs that outlives it: configuration, the packet
//! registry, the locale table, the server key pair, metrics and the
//! collaborators the embedding application supplies.
//!
//! ## Collaborators
//! - [`Settings`]: namespaced settings lookup (MOTD, player cap, thresholds)
//! - [`PlayerStore`]: loads a player on login and saves it on disconnect
//! - [`WorldSource`]: resolves a world name and chunk coordinates to chunk data
//! - [`IdentityResolver`]: turns a login name (and online-mode server hash)
//!   into a profile
//!
//! In-memory implementations of each are provided and used by default.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use futures::future::{self, BoxFuture};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::chat::LocaleTable;
use crate::config::CraftwireConfig;
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::registry::PacketRegistry;
use crate::protocol::types::{ChunkColumn, GameMode, Position};
use crate::utils::crypto::{self, ServerKeyPair};
use crate::utils::metrics::{Metrics, Timer};

/// Render distance used when the settings store has none
pub const DEFAULT_RENDER_DISTANCE: i64 = 8;

/// World players are placed in when the store has no record of them
pub const DEFAULT_WORLD: &str = "world";

/// A typed settings value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SettingValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl SettingValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            SettingValue::Bool(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            SettingValue::Int(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            SettingValue::Float(value) => Some(*value),
            SettingValue::Int(value) => Some(*value as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            SettingValue::Text(value) => Some(value),
            _ => None,
        }
    }
}

impl fmt::Display for SettingValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettingValue::Bool(value) => write!(f, "{value}"),
            SettingValue::Int(value) => write!(f, "{value}"),
            SettingValue::Float(value) => write!(f, "{value}"),
            SettingValue::Text(value) => f.write_str(value),
        }
    }
}

impl From<bool> for SettingValue {
    fn from(value: bool) -> Self {
        SettingValue::Bool(value)
    }
}

impl From<i64> for SettingValue {
    fn from(value: i64) -> Self {
        SettingValue::Int(value)
    }
}

impl From<f64> for SettingValue {
    fn from(value: f64) -> Self {
        SettingValue::Float(value)
    }
}

impl From<&str> for SettingValue {
    fn from(value: &str) -> Self {
        SettingValue::Text(value.to_string())
    }
}

impl From<String> for SettingValue {
    fn from(value: String) -> Self {
        SettingValue::Text(value)
    }
}

/// Namespaced settings lookup
pub trait Settings: Send + Sync {
    fn get(&self, namespace: &str, name: &str) -> Result<Option<SettingValue>>;

    /// Store `value`, returning whatever it replaced
    fn set(&self, namespace: &str, name: &str, value: SettingValue) -> Result<Option<SettingValue>>;
}

/// Settings held in a map; seeded from configuration
#[derive(Debug, Default)]
pub struct MemorySettings {
    values: RwLock<HashMap<(String, String), SettingValue>>,
}

impl MemorySettings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed from the `server`, `transport` and `settings` sections
    ///
    /// Entries under `settings` win over the section fields they shadow.
    pub fn from_config(config: &CraftwireConfig) -> Self {
        let mut values = HashMap::new();
        let mut put = |namespace: &str, name: &str, value: SettingValue| {
            values.insert((namespace.to_string(), name.to_string()), value);
        };

        put("server", "motd", config.server.motd.clone().into());
        put("server", "max_players", (config.server.max_players as i64).into());
        put(
            "transport",
            "compression_threshold",
            i64::from(config.transport.compression_threshold).into(),
        );
        put("world", "render_distance", DEFAULT_RENDER_DISTANCE.into());

        for (namespace, entries) in &config.settings {
            for (name, value) in entries {
                put(namespace.as_str(), name.as_str(), value.clone());
            }
        }

        Self {
            values: RwLock::new(values),
        }
    }
}

impl Settings for MemorySettings {
    fn get(&self, namespace: &str, name: &str) -> Result<Option<SettingValue>> {
        let values = self
            .values
            .read()
            .map_err(|_| ProtocolError::Collaborator(constants::ERR_SETTINGS_LOCK.into()))?;
        Ok(values
            .get(&(namespace.to_string(), name.to_string()))
            .cloned())
    }

    fn set(&self, namespace: &str, name: &str, value: SettingValue) -> Result<Option<SettingValue>> {
        let mut values = self
            .values
            .write()
            .map_err(|_| ProtocolError::Collaborator(constants::ERR_SETTINGS_LOCK.into()))?;
        Ok(values.insert((namespace.to_string(), name.to_string()), value))
    }
}

/// The player object the core reads and writes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Player {
    pub uuid: Uuid,
    pub username: String,
    pub game_mode: GameMode,
    pub permission_level: u8,
    pub position: Position,
    pub world: String,
}

impl Player {
    /// A fresh player at the world origin
    pub fn new(uuid: Uuid, username: impl Into<String>) -> Self {
        Self {
            uuid,
            username: username.into(),
            game_mode: GameMode::default(),
            permission_level: 0,
            position: Position::new(0.0, 64.0, 0.0),
            world: DEFAULT_WORLD.to_string(),
        }
    }
}

/// Player persistence
pub trait PlayerStore: Send + Sync {
    /// Player record for a login, creating one if none exists
    fn load<'a>(&'a self, uuid: Uuid, username: &'a str) -> BoxFuture<'a, Result<Player>>;

    fn save<'a>(&'a self, player: &'a Player) -> BoxFuture<'a, Result<()>>;
}

/// Players kept in memory; counts saves
#[derive(Debug, Default)]
pub struct MemoryPlayerStore {
    players: Mutex<HashMap<Uuid, Player>>,
    saves: AtomicUsize,
}

impl MemoryPlayerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `save` calls so far
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    pub fn get(&self, uuid: &Uuid) -> Option<Player> {
        self.players
            .lock()
            .ok()
            .and_then(|players| players.get(uuid).cloned())
    }

    /// Insert a record ahead of its login
    pub fn insert(&self, player: Player) -> Result<()> {
        let mut players = self
            .players
            .lock()
            .map_err(|_| ProtocolError::Collaborator(constants::ERR_PLAYERS_LOCK.into()))?;
        players.insert(player.uuid, player);
        Ok(())
    }
}

impl PlayerStore for MemoryPlayerStore {
    fn load<'a>(&'a self, uuid: Uuid, username: &'a str) -> BoxFuture<'a, Result<Player>> {
        let loaded = self
            .players
            .lock()
            .map_err(|_| ProtocolError::Collaborator(constants::ERR_PLAYERS_LOCK.into()))
            .map(|players| {
                players.get(&uuid).cloned().map_or_else(
                    || Player::new(uuid, username),
                    |mut player| {
                        player.username = username.to_string();
                        player
                    },
                )
            });
        Box::pin(future::ready(loaded))
    }

    fn save<'a>(&'a self, player: &'a Player) -> BoxFuture<'a, Result<()>> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        Box::pin(future::ready(self.insert(player.clone())))
    }
}

/// Chunk data by world and chunk coordinates
pub trait WorldSource: Send + Sync {
    fn chunk<'a>(&'a self, world: &'a str, x: i32, z: i32) -> BoxFuture<'a, Result<Option<ChunkColumn>>>;
}

/// A world with no chunks
#[derive(Debug, Default, Clone, Copy)]
pub struct EmptyWorld;

impl WorldSource for EmptyWorld {
    fn chunk<'a>(&'a self, _world: &'a str, _x: i32, _z: i32) -> BoxFuture<'a, Result<Option<ChunkColumn>>> {
        Box::pin(future::ready(Ok(None)))
    }
}

/// A resolved player profile
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub uuid: Uuid,
    pub username: String,
}

/// Profile lookup for a login
pub trait IdentityResolver: Send + Sync {
    /// `server_hash` is present only for online-mode logins
    fn resolve<'a>(&'a self, username: &'a str, server_hash: Option<&'a str>) -> BoxFuture<'a, Result<Identity>>;
}

/// Offline-mode profiles: the UUID is derived from the name
#[derive(Debug, Default, Clone, Copy)]
pub struct OfflineIdentity;

impl IdentityResolver for OfflineIdentity {
    fn resolve<'a>(&'a self, username: &'a str, _server_hash: Option<&'a str>) -> BoxFuture<'a, Result<Identity>> {
        Box::pin(future::ready(Ok(Identity {
            uuid: crypto::offline_uuid(username),
            username: username.to_string(),
        })))
    }
}

/// Shared server state handed to every connection
pub struct ServerContext {
    config: CraftwireConfig,
    registry: PacketRegistry,
    locales: LocaleTable,
    settings: Arc<dyn Settings>,
    players: Arc<dyn PlayerStore>,
    world: Arc<dyn WorldSource>,
    identity: Arc<dyn IdentityResolver>,
    key_pair: Option<ServerKeyPair>,
    metrics: Metrics,
    next_entity_id: AtomicI32,
}

impl ServerContext {
    pub fn builder(config: CraftwireConfig) -> ServerContextBuilder {
        ServerContextBuilder::new(config)
    }

    pub fn config(&self) -> &CraftwireConfig {
        &self.config
    }

    pub fn registry(&self) -> &PacketRegistry {
        &self.registry
    }

    pub fn locales(&self) -> &LocaleTable {
        &self.locales
    }

    pub fn settings(&self) -> &dyn Settings {
        self.settings.as_ref()
    }

    pub fn players(&self) -> &dyn PlayerStore {
        self.players.as_ref()
    }

    pub fn world(&self) -> &dyn WorldSource {
        self.world.as_ref()
    }

    pub fn identity(&self) -> &dyn IdentityResolver {
        self.identity.as_ref()
    }

    /// Present when the server runs in online mode
    pub fn key_pair(&self) -> Option<&ServerKeyPair> {
        self.key_pair.as_ref()
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn next_entity_id(&self) -> i32 {
        self.next_entity_id.fetch_add(1, Ordering::Relaxed)
    }

    fn setting(&self, namespace: &str, name: &str) -> Option<SettingValue> {
        match self.settings.get(namespace, name) {
            Ok(value) => value,
            Err(e) => {
                warn!(namespace, name, error = %e, "Settings lookup failed; using configuration");
                None
            }
        }
    }

    pub fn motd(&self) -> String {
        self.setting("server", "motd")
            .and_then(|value| value.as_str().map(str::to_string))
            .unwrap_or_else(|| self.config.server.motd.clone())
    }

    pub fn max_players(&self) -> usize {
        self.setting("server", "max_players")
            .and_then(|value| value.as_int())
            .and_then(|value| usize::try_from(value).ok())
            .unwrap_or(self.config.server.max_players)
    }

    /// Negative disables compression
    pub fn compression_threshold(&self) -> i32 {
        self.setting("transport", "compression_threshold")
            .and_then(|value| value.as_int())
            .and_then(|value| i32::try_from(value).ok())
            .unwrap_or(self.config.transport.compression_threshold)
    }

    /// Chunk radius sent on join
    pub fn render_distance(&self) -> i32 {
        self.setting("world", "render_distance")
            .and_then(|value| value.as_int())
            .unwrap_or(DEFAULT_RENDER_DISTANCE)
            .clamp(0, 32) as i32
    }
}

impl fmt::Debug for ServerContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerContext")
            .field("address", &self.config.server.address)
            .field("online_mode", &self.key_pair.is_some())
            .field("locales", &self.locales.len())
            .finish_non_exhaustive()
    }
}

/// Assembles a [`ServerContext`], defaulting every unset part
pub struct ServerContextBuilder {
    config: CraftwireConfig,
    registry: Option<PacketRegistry>,
    locales: Option<LocaleTable>,
    settings: Option<Arc<dyn Settings>>,
    players: Option<Arc<dyn PlayerStore>>,
    world: Option<Arc<dyn WorldSource>>,
    identity: Option<Arc<dyn IdentityResolver>>,
    key_pair: Option<ServerKeyPair>,
}

impl ServerContextBuilder {
    pub fn new(config: CraftwireConfig) -> Self {
        Self {
            config,
            registry: None,
            locales: None,
            settings: None,
            players: None,
            world: None,
            identity: None,
            key_pair: None,
        }
    }

    pub fn registry(mut self, registry: PacketRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn locales(mut self, locales: LocaleTable) -> Self {
        self.locales = Some(locales);
        self
    }

    pub fn settings(mut self, settings: Arc<dyn Settings>) -> Self {
        self.settings = Some(settings);
        self
    }

    pub fn players(mut self, players: Arc<dyn PlayerStore>) -> Self {
        self.players = Some(players);
        self
    }

    pub fn world(mut self, world: Arc<dyn WorldSource>) -> Self {
        self.world = Some(world);
        self
    }

    pub fn identity(mut self, identity: Arc<dyn IdentityResolver>) -> Self {
        self.identity = Some(identity);
        self
    }

    /// Use an existing key pair instead of generating one in online mode
    pub fn key_pair(mut self, key_pair: ServerKeyPair) -> Self {
        self.key_pair = Some(key_pair);
        self
    }

    /// Validate the configuration and load whatever was not supplied
    ///
    /// # Errors
    /// Invalid configuration, an invalid bundled declaration, or RSA key
    /// generation failure. The server must not start on any of these.
    pub fn build(self) -> Result<ServerContext> {
        self.config.validate_strict()?;

        let registry = match self.registry {
            Some(registry) => registry,
            None => PacketRegistry::bundled()?,
        };
        let locales = match self.locales {
            Some(locales) => locales,
            None => LocaleTable::bundled()?,
        };
        let key_pair = match (self.config.server.online_mode, self.key_pair) {
            (true, None) => {
                let _timer = Timer::start("rsa_key_generation");
                Some(ServerKeyPair::generate()?)
            }
            (true, Some(pair)) => Some(pair),
            (false, _) => None,
        };
        let settings = self
            .settings
            .unwrap_or_else(|| Arc::new(MemorySettings::from_config(&self.config)));

        info!(
            online_mode = key_pair.is_some(),
            min_protocol = self.config.protocol.min_protocol,
            max_protocol = self.config.protocol.max_protocol,
            "Server context ready"
        );

        Ok(ServerContext {
            registry,
            locales,
            settings,
            players: self.players.unwrap_or_else(|| Arc::new(MemoryPlayerStore::new())),
            world: self.world.unwrap_or_else(|| Arc::new(EmptyWorld)),
            identity: self.identity.unwrap_or_else(|| Arc::new(OfflineIdentity)),
            key_pair,
            metrics: Metrics::new(),
            next_entity_id: AtomicI32::new(1),
            config: self.config,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_seeded_from_config() {
        let config = CraftwireConfig::from_toml(
            r#"
            [server]
            motd = "Hello"
            max_players = 5

            [settings.world]
            render_distance = 3
            "#,
        )
        .unwrap();
        let settings = MemorySettings::from_config(&config);

        assert_eq!(
            settings.get("server", "motd").unwrap(),
            Some(SettingValue::Text("Hello".into()))
        );
        assert_eq!(
            settings.get("server", "max_players").unwrap(),
            Some(SettingValue::Int(5))
        );
        assert_eq!(
            settings.get("world", "render_distance").unwrap(),
            Some(SettingValue::Int(3))
        );
        assert_eq!(settings.get("world", "missing").unwrap(), None);
    }

    #[test]
    fn set_returns_previous_value() {
        let settings = MemorySettings::new();
        assert_eq!(settings.set("a", "b", 1i64.into()).unwrap(), None);
        assert_eq!(
            settings.set("a", "b", 2i64.into()).unwrap(),
            Some(SettingValue::Int(1))
        );
    }

    #[test]
    fn context_reads_settings_before_config() {
        let ctx = ServerContext::builder(CraftwireConfig::default())
            .build()
            .unwrap();
        assert_eq!(ctx.motd(), "A Craftwire Server");
        ctx.settings()
            .set("server", "motd", "Changed".into())
            .unwrap();
        assert_eq!(ctx.motd(), "Changed");

        ctx.settings()
            .set("server", "max_players", "lots".into())
            .unwrap();
        assert_eq!(ctx.max_players(), 20);
        assert_eq!(ctx.render_distance(), DEFAULT_RENDER_DISTANCE as i32);
        assert!(ctx.key_pair().is_none());
    }

    #[test]
    fn entity_ids_increase() {
        let ctx = ServerContext::builder(CraftwireConfig::default())
            .build()
            .unwrap();
        let first = ctx.next_entity_id();
        assert_eq!(ctx.next_entity_id(), first + 1);
    }

    #[tokio::test]
    async fn memory_store_counts_saves() {
        let store = MemoryPlayerStore::new();
        let id = crypto::offline_uuid("Steve");
        let mut player = store.load(id, "Steve").await.unwrap();
        player.permission_level = 4;
        store.save(&player).await.unwrap();

        assert_eq!(store.save_count(), 1);
        assert_eq!(store.get(&id).unwrap().permission_level, 4);
        assert_eq!(store.load(id, "Steve").await.unwrap().permission_level, 4);
    }

    #[tokio::test]
    async fn offline_identity_uses_name_uuid() {
        let identity = OfflineIdentity.resolve("Notch", None).await.unwrap();
        assert_eq!(identity.uuid, crypto::offline_uuid("Notch"));
        assert_eq!(identity.username, "Notch");
    }
}
