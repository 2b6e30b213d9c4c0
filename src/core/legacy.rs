//! Legacy server-list ping.
//!
//! Pre-netty clients open with `FE 01 FA` instead of a length-prefixed frame.
//! Those bytes never go through framing: the server answers with a single
//! kick packet (`0xFF`) whose string carries the status fields, then closes.

use bytes::{BufMut, Bytes, BytesMut};

use crate::core::buffer::WireBuffer;

/// First three bytes of a 1.6-style server-list ping
pub const LEGACY_PING_SIGNATURE: [u8; 3] = [0xFE, 0x01, 0xFA];

/// Packet id of the legacy kick packet that carries the response
pub const LEGACY_KICK_ID: u8 = 0xFF;

/// Result of inspecting the first bytes of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Detection {
    /// Fewer than three bytes, all matching the signature so far
    Incomplete,
    Legacy,
    Modern,
}

pub fn detect(src: &[u8]) -> Detection {
    let n = src.len().min(LEGACY_PING_SIGNATURE.len());
    if src[..n] != LEGACY_PING_SIGNATURE[..n] {
        Detection::Modern
    } else if n < LEGACY_PING_SIGNATURE.len() {
        Detection::Incomplete
    } else {
        Detection::Legacy
    }
}

/// Fields a 1.6 client appends after the signature. Older clients omit them,
/// so every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LegacyPing {
    pub protocol_version: Option<u8>,
    pub host: Option<String>,
    pub port: Option<i32>,
}

impl LegacyPing {
    /// Best-effort parse of the raw bytes, signature included
    pub fn parse(raw: &[u8]) -> Self {
        let mut buf = WireBuffer::from_bytes(raw);
        let mut ping = Self::default();

        let _ = buf.read_bytes(LEGACY_PING_SIGNATURE.len());
        let Some(channel) = read_utf16(&mut buf) else {
            return ping;
        };
        if channel != "MC|PingHost" || buf.read_u16().is_err() {
            return ping;
        }
        ping.protocol_version = buf.read_u8().ok();
        ping.host = read_utf16(&mut buf);
        ping.port = buf.read_i32().ok();
        ping
    }
}

fn read_utf16(buf: &mut WireBuffer) -> Option<String> {
    let chars = buf.read_u16().ok()? as usize;
    let raw = buf.read_bytes(chars * 2).ok()?;
    let units: Vec<u16> = raw
        .chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
        .collect();
    String::from_utf16(&units).ok()
}

/// Values reported back to a legacy client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyStatus {
    pub protocol_version: i32,
    pub version_name: String,
    pub motd: String,
    pub online_players: usize,
    pub max_players: usize,
}

impl LegacyStatus {
    /// `0xFF`, UTF-16 length, then `§1\0proto\0version\0motd\0online\0max`
    pub fn encode(&self) -> Bytes {
        let text = format!(
            "\u{a7}1\0{}\0{}\0{}\0{}\0{}",
            self.protocol_version,
            self.version_name,
            self.motd,
            self.online_players,
            self.max_players
        );
        let units: Vec<u16> = text.encode_utf16().collect();

        let mut out = BytesMut::with_capacity(3 + units.len() * 2);
        out.put_u8(LEGACY_KICK_ID);
        out.put_u16(units.len().min(u16::MAX as usize) as u16);
        for unit in units.iter().take(u16::MAX as usize) {
            out.put_u16(*unit);
        }
        out.freeze()
    }
}
