//! Packets sent by the client.
//!
//! Every packet the registry can resolve has a decoder in [`decoder_for`];
//! the registry caches that function pointer next to the packet's ids, so
//! resolving an id and finding its parser is one lookup.

use bytes::Bytes;

use crate::core::buffer::WireBuffer;
use crate::error::Result;

/// Protocol version where keep-alive ids became 64-bit
pub const KEEP_ALIVE_I64_SINCE: i32 = 339;

/// Protocol version that added the main-hand field to client settings
pub const MAIN_HAND_SINCE: i32 = 107;

/// Parses a packet body (id already stripped) for a protocol version
pub type PacketDecoder = fn(&mut WireBuffer, i32) -> Result<ServerboundPacket>;

#[derive(Debug, Clone, PartialEq)]
pub struct Handshake {
    pub protocol_version: i32,
    pub server_address: String,
    pub server_port: u16,
    pub next_state: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSettings {
    pub locale: String,
    pub view_distance: i8,
    pub chat_mode: i32,
    pub chat_colors: bool,
    pub skin_parts: u8,
    /// Absent before 1.9
    pub main_hand: Option<i32>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ServerboundPacket {
    Handshake(Handshake),
    StatusRequest,
    StatusPing {
        payload: i64,
    },
    LoginStart {
        username: String,
    },
    EncryptionResponse {
        shared_secret: Bytes,
        verify_token: Bytes,
    },
    KeepAlive {
        id: i64,
    },
    ChatMessage {
        message: String,
    },
    ClientSettings(ClientSettings),
    TeleportConfirm {
        teleport_id: i32,
    },
    PlayerPosition {
        x: f64,
        y: f64,
        z: f64,
        on_ground: bool,
    },
    PlayerRotation {
        yaw: f32,
        pitch: f32,
        on_ground: bool,
    },
    PlayerPositionAndRotation {
        x: f64,
        y: f64,
        z: f64,
        yaw: f32,
        pitch: f32,
        on_ground: bool,
    },
    PluginMessage {
        channel: String,
        data: Bytes,
    },
}

/// Parser for the packet declared under `name`
pub fn decoder_for(name: &str) -> Option<PacketDecoder> {
    let decoder: PacketDecoder = match name {
        "Handshake" => decode_handshake,
        "StatusRequest" => |_, _| Ok(ServerboundPacket::StatusRequest),
        "StatusPing" => |buf, _| {
            Ok(ServerboundPacket::StatusPing {
                payload: buf.read_i64()?,
            })
        },
        "LoginStart" => |buf, _| {
            Ok(ServerboundPacket::LoginStart {
                username: buf.read_string_bounded(16)?,
            })
        },
        "EncryptionResponse" => |buf, _| {
            Ok(ServerboundPacket::EncryptionResponse {
                shared_secret: buf.read_byte_array()?,
                verify_token: buf.read_byte_array()?,
            })
        },
        "KeepAlive" => |buf, version| {
            let id = if version >= KEEP_ALIVE_I64_SINCE {
                buf.read_i64()?
            } else {
                buf.read_varint()? as i64
            };
            Ok(ServerboundPacket::KeepAlive { id })
        },
        "ChatMessage" => |buf, _| {
            Ok(ServerboundPacket::ChatMessage {
                message: buf.read_string_bounded(256)?,
            })
        },
        "ClientSettings" => decode_client_settings,
        "TeleportConfirm" => |buf, _| {
            Ok(ServerboundPacket::TeleportConfirm {
                teleport_id: buf.read_varint()?,
            })
        },
        "PlayerPosition" => |buf, _| {
            Ok(ServerboundPacket::PlayerPosition {
                x: buf.read_f64()?,
                y: buf.read_f64()?,
                z: buf.read_f64()?,
                on_ground: buf.read_bool()?,
            })
        },
        "PlayerRotation" => |buf, _| {
            Ok(ServerboundPacket::PlayerRotation {
                yaw: buf.read_f32()?,
                pitch: buf.read_f32()?,
                on_ground: buf.read_bool()?,
            })
        },
        "PlayerPositionAndRotation" => |buf, _| {
            Ok(ServerboundPacket::PlayerPositionAndRotation {
                x: buf.read_f64()?,
                y: buf.read_f64()?,
                z: buf.read_f64()?,
                yaw: buf.read_f32()?,
                pitch: buf.read_f32()?,
                on_ground: buf.read_bool()?,
            })
        },
        "PluginMessage" => |buf, _| {
            Ok(ServerboundPacket::PluginMessage {
                channel: buf.read_string_bounded(20)?,
                data: buf.read_remaining(),
            })
        },
        _ => return None,
    };
    Some(decoder)
}

fn decode_handshake(buf: &mut WireBuffer, _version: i32) -> Result<ServerboundPacket> {
    Ok(ServerboundPacket::Handshake(Handshake {
        protocol_version: buf.read_varint()?,
        server_address: buf.read_string_bounded(255)?,
        server_port: buf.read_u16()?,
        next_state: buf.read_varint()?,
    }))
}

fn decode_client_settings(buf: &mut WireBuffer, version: i32) -> Result<ServerboundPacket> {
    Ok(ServerboundPacket::ClientSettings(ClientSettings {
        locale: buf.read_string_bounded(16)?,
        view_distance: buf.read_i8()?,
        chat_mode: buf.read_varint()?,
        chat_colors: buf.read_bool()?,
        skin_parts: buf.read_u8()?,
        main_hand: if version >= MAIN_HAND_SINCE {
            Some(buf.read_varint()?)
        } else {
            None
        },
    }))
}

impl ServerboundPacket {
    /// Name the packet is declared under
    pub fn name(&self) -> &'static str {
        match self {
            ServerboundPacket::Handshake(_) => "Handshake",
            ServerboundPacket::StatusRequest => "StatusRequest",
            ServerboundPacket::StatusPing { .. } => "StatusPing",
            ServerboundPacket::LoginStart { .. } => "LoginStart",
            ServerboundPacket::EncryptionResponse { .. } => "EncryptionResponse",
            ServerboundPacket::KeepAlive { .. } => "KeepAlive",
            ServerboundPacket::ChatMessage { .. } => "ChatMessage",
            ServerboundPacket::ClientSettings(_) => "ClientSettings",
            ServerboundPacket::TeleportConfirm { .. } => "TeleportConfirm",
            ServerboundPacket::PlayerPosition { .. } => "PlayerPosition",
            ServerboundPacket::PlayerRotation { .. } => "PlayerRotation",
            ServerboundPacket::PlayerPositionAndRotation { .. } => "PlayerPositionAndRotation",
            ServerboundPacket::PluginMessage { .. } => "PluginMessage",
        }
    }

    /// Client-side encoding of the body; used by test clients and tools
    pub fn encode(&self, buf: &mut WireBuffer, protocol_version: i32) -> Result<()> {
        match self {
            ServerboundPacket::Handshake(h) => {
                buf.write_varint(h.protocol_version);
                buf.write_string_bounded(&h.server_address, 255)?;
                buf.write_u16(h.server_port).write_varint(h.next_state);
            }
            ServerboundPacket::StatusRequest => {}
            ServerboundPacket::StatusPing { payload } => {
                buf.write_i64(*payload);
            }
            ServerboundPacket::LoginStart { username } => {
                buf.write_string_bounded(username, 16)?;
            }
            ServerboundPacket::EncryptionResponse {
                shared_secret,
                verify_token,
            } => {
                buf.write_byte_array(shared_secret)?;
                buf.write_byte_array(verify_token)?;
            }
            ServerboundPacket::KeepAlive { id } => {
                if protocol_version >= KEEP_ALIVE_I64_SINCE {
                    buf.write_i64(*id);
                } else {
                    buf.write_varint(*id as i32);
                }
            }
            ServerboundPacket::ChatMessage { message } => {
                buf.write_string_bounded(message, 256)?;
            }
            ServerboundPacket::ClientSettings(s) => {
                buf.write_string_bounded(&s.locale, 16)?;
                buf.write_i8(s.view_distance)
                    .write_varint(s.chat_mode)
                    .write_bool(s.chat_colors)
                    .write_u8(s.skin_parts);
                if protocol_version >= MAIN_HAND_SINCE {
                    buf.write_varint(s.main_hand.unwrap_or(1));
                }
            }
            ServerboundPacket::TeleportConfirm { teleport_id } => {
                buf.write_varint(*teleport_id);
            }
            ServerboundPacket::PlayerPosition { x, y, z, on_ground } => {
                buf.write_f64(*x).write_f64(*y).write_f64(*z).write_bool(*on_ground);
            }
            ServerboundPacket::PlayerRotation {
                yaw,
                pitch,
                on_ground,
            } => {
                buf.write_f32(*yaw).write_f32(*pitch).write_bool(*on_ground);
            }
            ServerboundPacket::PlayerPositionAndRotation {
                x,
                y,
                z,
                yaw,
                pitch,
                on_ground,
            } => {
                buf.write_f64(*x)
                    .write_f64(*y)
                    .write_f64(*z)
                    .write_f32(*yaw)
                    .write_f32(*pitch)
                    .write_bool(*on_ground);
            }
            ServerboundPacket::PluginMessage { channel, data } => {
                buf.write_string_bounded(channel, 20)?;
                buf.write_bytes(data);
            }
        }
        Ok(())
    }
}
