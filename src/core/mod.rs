//! # Core Protocol Components
//!
//! Wire primitives and framing.
//!
//! ## Components
//! - **VarInt**: 7-bit variable-length integers
//! - **WireBuffer**: typed reads and writes over a growable buffer
//! - **Codec**: tokio codec for length framing, compression and encryption
//! - **Legacy**: the pre-netty server-list ping
//!
//! ## Security
//! - Maximum frame size: 2^21 - 1 bytes
//! - Maximum inflated size: 8MiB
//! - Length validation before allocation

pub mod buffer;
pub mod codec;
pub mod legacy;
pub mod varint;
