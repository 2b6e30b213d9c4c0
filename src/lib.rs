//! # Craftwire
//!
//! Server-side core of the Minecraft Java protocol, speaking several protocol
//! versions from one process.
//!
//! ## Layers
//! - [`core`]: VarInt/VarLong, the wire buffer, the frame codec (length
//!   prefix, zlib, AES/CFB8) and legacy ping detection
//! - [`protocol`]: connection states, version ranges, the versioned packet
//!   registry and typed packet bodies
//! - [`chat`]: chat components and translation masking per client version
//!   and locale
//! - [`service`]: connections, the connection bus and the server context
//! - [`config`], [`error`], [`utils`]: configuration, the error taxonomy,
//!   logging, metrics, compression and crypto helpers
//!
//! ## Example
//! ```rust,no_run
//! use std::sync::Arc;
//! use craftwire::config::CraftwireConfig;
//! use craftwire::service::{ConnectionBus, ServerContext};
//!
//! # async fn run() -> craftwire::error::Result<()> {
//! let config = CraftwireConfig::from_file("craftwire.toml")?;
//! craftwire::utils::init_logging(&config.logging)?;
//! let ctx = Arc::new(ServerContext::builder(config).build()?);
//! ConnectionBus::new(ctx).start().await
//! # }
//! ```

pub mod chat;
pub mod config;
pub mod core;
pub mod error;
pub mod protocol;
pub mod service;
pub mod utils;

pub use config::CraftwireConfig;
pub use error::{ProtocolError, Result};
pub use protocol::{ConnectionState, PacketRegistry, VersionSpec};
pub use service::{ConnectionBus, ServerContext};
