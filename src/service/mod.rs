//! # Service Layer
//!
//! Connections, the bus that owns them, and the shared server context.
//!
//! ## Components
//! - **Context**: configuration, registry, locales, key pair, metrics and collaborators
//! - **Connection**: per-socket state machine and outbound queue
//! - **Bus**: accept loop, live set, keep-alive and latency broadcasts, shutdown

pub mod bus;
pub mod connection;
pub mod context;

pub use bus::{ConnectionBus, ConnectionSet};
pub use connection::{Connection, ConnectionEvent, ConnectionHandle, ConnectionInfo, ConnectionSnapshot};
pub use context::{
    EmptyWorld, Identity, IdentityResolver, MemoryPlayerStore, MemorySettings, OfflineIdentity, Player,
    PlayerStore, ServerContext, ServerContextBuilder, SettingValue, Settings, WorldSource,
};
