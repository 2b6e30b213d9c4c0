//! # Protocol Layer
//!
//! Connection states, versioned packet identities and typed packet bodies.
//!
//! ## Components
//! - **Version**: protocol version ranges
//! - **State**: handshaking, status, login and play
//! - **Registry**: packet name to wire id, per version range
//! - **Packets**: serverbound parsers and clientbound encoders

pub mod packets;
pub mod registry;
pub mod state;
pub mod types;
pub mod version;

pub use registry::PacketRegistry;
pub use state::{ConnectionState, Direction};
pub use version::{check_version, VersionSpec};
