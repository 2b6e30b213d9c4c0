//! # Error Types
//!
//! Error handling for the protocol core.
//!
//! Every failure the wire codec, frame pipeline, registry, chat masking and
//! connection layer can produce is a variant of [`ProtocolError`].
//!
//! ## Error Categories
//! - **Codec Errors**: reading past the buffer, out-of-range writes, overlong varints
//! - **Frame Errors**: inconsistent length or compression headers, cipher and zlib failures
//! - **Registry Errors**: unknown packets, invalid declaration files
//! - **Login Errors**: verification token mismatch, unsupported client versions
//! - **I/O Errors**: socket and file failures
//!
//! ## Connection-level policy
//! Registry misses ([`ProtocolError::UnknownPacket`] inbound,
//! [`ProtocolError::UnmappedPacket`] outbound) are survivable inside a live
//! connection: the packet is logged and skipped. Every other error disconnects the affected
//! connection and nothing else.
//!
//! ## Example Usage
//! ```rust
//! use craftwire::core::buffer::WireBuffer;
//! use craftwire::error::{ProtocolError, Result};
//!
//! fn read_flag(buf: &mut WireBuffer) -> Result<bool> {
//!     buf.read_bool()
//! }
//!
//! let mut empty = WireBuffer::new();
//! assert!(matches!(read_flag(&mut empty), Err(ProtocolError::UnexpectedEndOfBuffer)));
//! ```

use std::io;
use thiserror::Error;

/// Error message constants to reduce allocations in error paths.
pub mod constants {
    pub const ERR_FRAME_TOO_LONG: &str = "Frame length exceeds protocol maximum";
    pub const ERR_NEGATIVE_LENGTH: &str = "Negative length prefix";
    pub const ERR_FRAME_UNDERRUN: &str = "Frame body shorter than declared";
    pub const ERR_DATA_LENGTH_MISMATCH: &str = "Inflated length does not match data length header";
    pub const ERR_DATA_LENGTH_TOO_LARGE: &str = "Data length header exceeds maximum";
    pub const ERR_BELOW_THRESHOLD: &str = "Compressed packet below compression threshold";

    pub const ERR_INVALID_UTF8: &str = "String is not valid UTF-8";
    pub const ERR_STRING_TOO_LONG: &str = "String exceeds maximum length";

    pub const ERR_SETTINGS_LOCK: &str = "Settings lock poisoned";
    pub const ERR_PLAYERS_LOCK: &str = "Player store lock poisoned";
}

/// Primary error type for all protocol operations
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unexpected end of buffer")]
    UnexpectedEndOfBuffer,

    #[error("Value out of range: {0}")]
    ValueOutOfRange(String),

    #[error("VarInt is too long")]
    VarIntTooLong,

    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    #[error("Decryption failed")]
    DecryptionFailure,

    #[error("Encryption failed")]
    EncryptionFailure,

    #[error("Compression failed")]
    CompressionFailure,

    #[error("Decompression failed")]
    DecompressionFailure,

    #[error("Unknown packet {id:#04x} in state {state}")]
    UnknownPacket { state: String, id: i32 },

    #[error("Unknown clientbound packet {name} in state {state}")]
    UnmappedPacket { state: String, name: String },

    #[error("Unexpected packet {0} for connection state")]
    UnexpectedPacket(String),

    #[error("Verification token mismatch")]
    VerificationTokenMismatch,

    #[error("Unsupported protocol version: {0}")]
    UnsupportedVersion(i32),

    #[error("Invalid packet declaration: {0}")]
    InvalidDeclaration(String),

    #[error("Invalid locale table: {0}")]
    InvalidLocale(String),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Collaborator error: {0}")]
    Collaborator(String),

    #[error("Timeout occurred")]
    Timeout,
}

impl ProtocolError {
    /// Whether a connection that hit this error must be torn down.
    ///
    /// Registry misses drop a single packet; everything else is unrecoverable
    /// for the connection (stream cipher and zlib state cannot resync).
    pub fn is_fatal_for_connection(&self) -> bool {
        !matches!(
            self,
            ProtocolError::UnknownPacket { .. } | ProtocolError::UnmappedPacket { .. }
        )
    }

    /// Codec-level failures surface as malformed frames at the connection level.
    pub fn into_frame_error(self) -> Self {
        match self {
            ProtocolError::UnexpectedEndOfBuffer
            | ProtocolError::VarIntTooLong
            | ProtocolError::ValueOutOfRange(_) => ProtocolError::MalformedFrame(self.to_string()),
            other => other,
        }
    }
}

/// Type alias for Results using ProtocolError
pub type Result<T> = std::result::Result<T, ProtocolError>;
