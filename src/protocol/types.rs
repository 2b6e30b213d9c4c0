//! Value types shared by packet bodies and the player collaborator.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::buffer::WireBuffer;
use crate::error::{ProtocolError, Result};

/// Protocol version that moved packed block positions to x|z|y
pub const BLOCK_POSITION_XZY_SINCE: i32 = 477;

/// Entity position and look
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub yaw: f32,
    pub pitch: f32,
    pub on_ground: bool,
}

impl Position {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self {
            x,
            y,
            z,
            ..Self::default()
        }
    }

    /// Chunk column containing this position
    pub fn chunk(&self) -> (i32, i32) {
        ((self.x.floor() as i32) >> 4, (self.z.floor() as i32) >> 4)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GameMode {
    #[default]
    Survival,
    Creative,
    Adventure,
    Spectator,
}

impl GameMode {
    pub fn id(self) -> u8 {
        match self {
            GameMode::Survival => 0,
            GameMode::Creative => 1,
            GameMode::Adventure => 2,
            GameMode::Spectator => 3,
        }
    }
}

/// Where a chat message is displayed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ChatPosition {
    #[default]
    Chat,
    System,
    ActionBar,
}

impl ChatPosition {
    pub fn id(self) -> i8 {
        match self {
            ChatPosition::Chat => 0,
            ChatPosition::System => 1,
            ChatPosition::ActionBar => 2,
        }
    }
}

/// One chunk column as produced by the world collaborator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkColumn {
    pub x: i32,
    pub z: i32,
    /// Which 16-block sections are present
    pub bit_mask: i32,
    /// Section data, biomes included, already in wire layout
    pub data: Bytes,
}

/// Entry in a player-list "add" action
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerListEntry {
    pub uuid: Uuid,
    pub username: String,
    pub game_mode: GameMode,
    pub latency_ms: i32,
}

/// Write a block position in the layout `protocol_version` expects
pub fn write_block_position(
    buf: &mut WireBuffer,
    protocol_version: i32,
    x: i32,
    y: i32,
    z: i32,
) -> &mut WireBuffer {
    let (x, y, z) = (x as i64 & 0x3FF_FFFF, y as i64 & 0xFFF, z as i64 & 0x3FF_FFFF);
    let packed = if protocol_version >= BLOCK_POSITION_XZY_SINCE {
        (x << 38) | (z << 12) | y
    } else {
        (x << 38) | (y << 26) | z
    };
    buf.write_i64(packed)
}

/// Read a block position written by [`write_block_position`]
pub fn read_block_position(buf: &mut WireBuffer, protocol_version: i32) -> Result<(i32, i32, i32)> {
    let packed = buf.read_i64()?;
    let x = packed >> 38;
    let (y, z) = if protocol_version >= BLOCK_POSITION_XZY_SINCE {
        (packed << 52 >> 52, packed << 26 >> 38)
    } else {
        (packed << 26 >> 52, packed << 38 >> 38)
    };
    Ok((x as i32, y as i32, z as i32))
}

/// Encode a yaw/pitch angle as 1/256ths of a turn
pub fn angle_to_byte(degrees: f32) -> i8 {
    ((degrees.rem_euclid(360.0) / 360.0 * 256.0) as i32 & 0xFF) as u8 as i8
}

/// Clamp a count to the unsigned byte the protocol sends
pub fn byte_count(value: usize) -> Result<u8> {
    u8::try_from(value).map_err(|_| ProtocolError::ValueOutOfRange(format!("{value} does not fit in a byte")))
}
