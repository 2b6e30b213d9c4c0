//! # Frame Codec
//!
//! Length-prefixed framing for the game protocol, as a tokio-util codec.
//!
//! ## Wire Format
//! ```text
//! without compression:  [Length VarInt] [Id VarInt] [Body]
//! with compression:     [Length VarInt] [DataLength VarInt] [zlib(Id + Body) | Id + Body]
//! ```
//! `DataLength` is the inflated size, or `0` when the rest is sent plain.
//! Once encryption is on, every byte in both directions passes through an
//! AES-128/CFB8 stream cipher, length prefixes included.
//!
//! ## Security
//! - Frames above `max_frame_length` (2^21 - 1) are rejected before buffering
//! - Inflated output is capped at `max_uncompressed_length`
//! - The inflated size must match the declared data length exactly

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::{trace, warn};

use crate::config::TransportConfig;
use crate::core::legacy::{self, Detection, LegacyPing};
use crate::core::varint::{peek_varint, put_varint, varint_len};
use crate::error::{constants, ProtocolError, Result};
use crate::utils::compression::{self, DEFAULT_LEVEL, MAX_DECOMPRESSION_SIZE};
use crate::utils::crypto::{self, Aes128Cfb8Dec, Aes128Cfb8Enc};

/// Largest value a 3-byte VarInt length prefix can hold
pub const MAX_FRAME_LENGTH: usize = 2_097_151;

/// One decoded unit of the inbound stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundFrame {
    /// Packet id followed by the packet body, already inflated
    Packet(Bytes),
    /// A pre-netty server-list ping; framing was bypassed
    LegacyPing(LegacyPing),
    /// A zero length prefix; treated like the peer closing the stream
    EndOfStream,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionState {
    Disabled,
    /// Threshold announced but the announcement has not been flushed yet
    Enabling,
    Enabled,
}

/// Codec for one connection. Cipher and compression state live here for the
/// lifetime of the connection.
pub struct FrameCodec {
    compression: CompressionState,
    threshold: usize,
    level: u32,
    max_frame_length: usize,
    max_uncompressed_length: usize,
    encryptor: Option<Aes128Cfb8Enc>,
    decryptor: Option<Aes128Cfb8Dec>,
    /// Bytes at the front of the read buffer that are already plaintext
    decrypted: usize,
    awaiting_first_bytes: bool,
}

impl FrameCodec {
    pub fn new() -> Self {
        Self {
            compression: CompressionState::Disabled,
            threshold: 0,
            level: DEFAULT_LEVEL,
            max_frame_length: MAX_FRAME_LENGTH,
            max_uncompressed_length: MAX_DECOMPRESSION_SIZE,
            encryptor: None,
            decryptor: None,
            decrypted: 0,
            awaiting_first_bytes: true,
        }
    }

    pub fn from_config(config: &TransportConfig) -> Self {
        Self {
            level: config.compression_level,
            max_frame_length: config.max_frame_length.min(MAX_FRAME_LENGTH),
            max_uncompressed_length: config.max_uncompressed_length,
            ..Self::new()
        }
    }

    /// Codec for the client side of a stream: no legacy detection
    pub fn client() -> Self {
        Self {
            awaiting_first_bytes: false,
            ..Self::new()
        }
    }

    pub fn compression_state(&self) -> CompressionState {
        self.compression
    }

    /// Threshold announced to the peer; frames stay plain until
    /// [`enable_compression`](Self::enable_compression)
    pub fn announce_compression(&mut self, threshold: usize) {
        if self.compression == CompressionState::Disabled {
            self.threshold = threshold;
            self.compression = CompressionState::Enabling;
        }
    }

    pub fn enable_compression(&mut self, threshold: usize) {
        self.threshold = threshold;
        self.compression = CompressionState::Enabled;
        trace!(threshold, "Compression enabled");
    }

    /// Whether an outbound payload of `len` bytes would be deflated
    pub fn compresses(&self, len: usize) -> bool {
        self.compression == CompressionState::Enabled && len > self.threshold
    }

    pub fn is_encrypted(&self) -> bool {
        self.encryptor.is_some()
    }

    /// Switch both directions to AES/CFB8 keyed with `shared_secret`
    ///
    /// Anything still buffered was sent after the peer switched, so it is
    /// decrypted on the next decode. A second call is ignored; the cipher
    /// state is never reset.
    pub fn enable_encryption(&mut self, shared_secret: &[u8]) -> Result<()> {
        if self.is_encrypted() {
            warn!("Encryption already enabled; ignoring");
            return Ok(());
        }
        let (encryptor, decryptor) = crypto::create_ciphers(shared_secret)?;
        self.encryptor = Some(encryptor);
        self.decryptor = Some(decryptor);
        self.decrypted = 0;
        Ok(())
    }

    fn take(&mut self, src: &mut BytesMut, n: usize) -> BytesMut {
        self.decrypted = self.decrypted.saturating_sub(n);
        src.split_to(n)
    }

    fn inflate(&self, mut frame: BytesMut) -> Result<Bytes> {
        let (data_length, header_len) = peek_varint(&frame)
            .map_err(ProtocolError::into_frame_error)?
            .ok_or_else(|| ProtocolError::MalformedFrame(constants::ERR_FRAME_UNDERRUN.into()))?;
        frame.advance(header_len);

        if data_length < 0 {
            return Err(ProtocolError::MalformedFrame(constants::ERR_NEGATIVE_LENGTH.into()));
        }
        if data_length == 0 {
            return Ok(frame.freeze());
        }

        let expected = data_length as usize;
        if expected > self.max_uncompressed_length {
            return Err(ProtocolError::MalformedFrame(
                constants::ERR_DATA_LENGTH_TOO_LARGE.into(),
            ));
        }
        if expected < self.threshold {
            return Err(ProtocolError::MalformedFrame(constants::ERR_BELOW_THRESHOLD.into()));
        }

        let inflated = compression::decompress(&frame, expected)?;
        if inflated.len() != expected {
            return Err(ProtocolError::MalformedFrame(
                constants::ERR_DATA_LENGTH_MISMATCH.into(),
            ));
        }
        Ok(Bytes::from(inflated))
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for FrameCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameCodec")
            .field("compression", &self.compression)
            .field("threshold", &self.threshold)
            .field("encrypted", &self.is_encrypted())
            .finish_non_exhaustive()
    }
}

impl Decoder for FrameCodec {
    type Item = InboundFrame;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        if let Some(decryptor) = self.decryptor.as_mut() {
            if src.len() > self.decrypted {
                crypto::decrypt_in_place(decryptor, &mut src[self.decrypted..]);
            }
            self.decrypted = src.len();
        }

        if self.awaiting_first_bytes {
            match legacy::detect(src) {
                Detection::Incomplete => return Ok(None),
                Detection::Legacy => {
                    self.awaiting_first_bytes = false;
                    let raw = src.split();
                    return Ok(Some(InboundFrame::LegacyPing(LegacyPing::parse(&raw))));
                }
                Detection::Modern => self.awaiting_first_bytes = false,
            }
        }

        let Some((length, header_len)) =
            peek_varint(src).map_err(ProtocolError::into_frame_error)?
        else {
            return Ok(None);
        };

        if length < 0 {
            return Err(ProtocolError::MalformedFrame(constants::ERR_NEGATIVE_LENGTH.into()));
        }
        if length == 0 {
            self.take(src, header_len);
            return Ok(Some(InboundFrame::EndOfStream));
        }

        let length = length as usize;
        if length > self.max_frame_length {
            return Err(ProtocolError::MalformedFrame(constants::ERR_FRAME_TOO_LONG.into()));
        }

        let total = header_len + length;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        let mut frame = self.take(src, total);
        frame.advance(header_len);

        let payload = if self.compression == CompressionState::Enabled {
            self.inflate(frame)?
        } else {
            frame.freeze()
        };
        Ok(Some(InboundFrame::Packet(payload)))
    }
}

/// Encodes a packet id followed by its body
impl Encoder<Bytes> for FrameCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<()> {
        let start = dst.len();
        let frame_too_long =
            || ProtocolError::MalformedFrame(constants::ERR_FRAME_TOO_LONG.into());

        if self.compression == CompressionState::Enabled {
            let data_length = i32::try_from(item.len()).map_err(|_| frame_too_long())?;
            if item.len() > self.threshold {
                let deflated = compression::compress(&item, self.level)?;
                let inner = varint_len(data_length) + deflated.len();
                if inner > self.max_frame_length {
                    return Err(frame_too_long());
                }
                dst.reserve(varint_len(inner as i32) + inner);
                put_varint(dst, inner as i32);
                put_varint(dst, data_length);
                dst.put_slice(&deflated);
            } else {
                let inner = 1 + item.len();
                if inner > self.max_frame_length {
                    return Err(frame_too_long());
                }
                dst.reserve(varint_len(inner as i32) + inner);
                put_varint(dst, inner as i32);
                dst.put_u8(0);
                dst.put_slice(&item);
            }
        } else {
            if item.len() > self.max_frame_length {
                return Err(frame_too_long());
            }
            dst.reserve(varint_len(item.len() as i32) + item.len());
            put_varint(dst, item.len() as i32);
            dst.put_slice(&item);
        }

        if let Some(encryptor) = self.encryptor.as_mut() {
            crypto::encrypt_in_place(encryptor, &mut dst[start..]);
        }
        Ok(())
    }
}
