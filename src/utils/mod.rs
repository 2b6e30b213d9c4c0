//! # Utility Modules
//!
//! Supporting utilities shared by the codec and the connection bus.
//!
//! ## Components
//! - **Compression**: zlib deflate/inflate with a decompression size limit
//! - **Crypto**: RSA key pair, AES/CFB8 stream cipher, login digests
//! - **Logging**: subscriber setup from [`LoggingConfig`](crate::config::LoggingConfig)
//! - **Metrics**: per-server atomic counters
//! - **Timeout**: keep-alive constants and async timeout wrappers

pub mod compression;
pub mod crypto;
pub mod logging;
pub mod metrics;
pub mod timeout;

pub use logging::init_logging;
pub use metrics::{Metrics, MetricsSnapshot};
