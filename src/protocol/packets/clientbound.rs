//! Packets sent by the server.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::chat::{mask, ChatComponent, LocaleTable, MaskContext};
use crate::core::buffer::WireBuffer;
use crate::error::{ProtocolError, Result};
use crate::protocol::packets::serverbound::KEEP_ALIVE_I64_SINCE;
use crate::protocol::state::ConnectionState;
use crate::protocol::types::{
    write_block_position, ChatPosition, ChunkColumn, GameMode, PlayerListEntry, Position,
};

/// JoinGame dimension widened from a byte to an int
pub const DIMENSION_I32_SINCE: i32 = 108;

/// PlayerPositionAndLook carries a teleport id, ChunkData a VarInt bit mask
pub const TELEPORT_ID_SINCE: i32 = 107;

/// ChunkData lists block entities after the section data
pub const BLOCK_ENTITIES_SINCE: i32 = 110;

/// Receiving connection details needed to encode a body
#[derive(Debug, Clone, Copy)]
pub struct EncodeContext<'a> {
    pub protocol_version: i32,
    pub locale: &'a str,
    pub locales: &'a LocaleTable,
}

impl EncodeContext<'_> {
    fn mask(&self, component: &ChatComponent) -> ChatComponent {
        let ctx = MaskContext {
            protocol_version: self.protocol_version,
            locale: self.locale,
        };
        mask(self.locales, component, Some(&ctx))
    }
}

/// Work the connection performs once a packet has been flushed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AfterSend {
    EnableCompression { threshold: usize },
}

/// Server-list status document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusResponse {
    pub version: StatusVersion,
    pub players: StatusPlayers,
    pub description: ChatComponent,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub favicon: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusVersion {
    pub name: String,
    pub protocol: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusPlayers {
    pub max: usize,
    pub online: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sample: Vec<PlayerSample>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerSample {
    pub name: String,
    pub id: Uuid,
}

#[derive(Debug, Clone, PartialEq)]
pub struct JoinGame {
    pub entity_id: i32,
    pub game_mode: GameMode,
    pub dimension: i32,
    pub difficulty: u8,
    pub max_players: u8,
    pub level_type: String,
    pub reduced_debug_info: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayerListAction {
    Add(Vec<PlayerListEntry>),
    UpdateLatency(Vec<(Uuid, i32)>),
    Remove(Vec<Uuid>),
}

impl PlayerListAction {
    fn id(&self) -> i32 {
        match self {
            PlayerListAction::Add(_) => 0,
            PlayerListAction::UpdateLatency(_) => 2,
            PlayerListAction::Remove(_) => 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ClientboundPacket {
    StatusResponse(Box<StatusResponse>),
    StatusPong {
        payload: i64,
    },
    LoginDisconnect {
        reason: ChatComponent,
    },
    EncryptionRequest {
        server_id: String,
        public_key: Vec<u8>,
        verify_token: Vec<u8>,
    },
    LoginSuccess {
        uuid: Uuid,
        username: String,
    },
    SetCompression {
        threshold: i32,
    },
    KeepAlive {
        id: i64,
    },
    JoinGame(JoinGame),
    ChatMessage {
        message: ChatComponent,
        position: ChatPosition,
    },
    Disconnect {
        reason: ChatComponent,
    },
    PlayerListItem(PlayerListAction),
    PlayerPositionAndLook {
        position: Position,
        flags: u8,
        teleport_id: i32,
    },
    SpawnPosition {
        x: i32,
        y: i32,
        z: i32,
    },
    ChunkData(ChunkColumn),
}

impl ClientboundPacket {
    /// Name the packet is declared under
    pub fn name(&self) -> &'static str {
        match self {
            ClientboundPacket::StatusResponse(_) => "StatusResponse",
            ClientboundPacket::StatusPong { .. } => "StatusPong",
            ClientboundPacket::LoginDisconnect { .. } => "LoginDisconnect",
            ClientboundPacket::EncryptionRequest { .. } => "EncryptionRequest",
            ClientboundPacket::LoginSuccess { .. } => "LoginSuccess",
            ClientboundPacket::SetCompression { .. } => "SetCompression",
            ClientboundPacket::KeepAlive { .. } => "KeepAlive",
            ClientboundPacket::JoinGame(_) => "JoinGame",
            ClientboundPacket::ChatMessage { .. } => "ChatMessage",
            ClientboundPacket::Disconnect { .. } => "Disconnect",
            ClientboundPacket::PlayerListItem(_) => "PlayerListItem",
            ClientboundPacket::PlayerPositionAndLook { .. } => "PlayerPositionAndLook",
            ClientboundPacket::SpawnPosition { .. } => "SpawnPosition",
            ClientboundPacket::ChunkData(_) => "ChunkData",
        }
    }

    /// State whose id table the packet is declared in
    pub fn state(&self) -> ConnectionState {
        match self {
            ClientboundPacket::StatusResponse(_) | ClientboundPacket::StatusPong { .. } => {
                ConnectionState::Status
            }
            ClientboundPacket::LoginDisconnect { .. }
            | ClientboundPacket::EncryptionRequest { .. }
            | ClientboundPacket::LoginSuccess { .. }
            | ClientboundPacket::SetCompression { .. } => ConnectionState::Login,
            _ => ConnectionState::Play,
        }
    }

    pub fn after_send(&self) -> Option<AfterSend> {
        match self {
            ClientboundPacket::SetCompression { threshold } if *threshold >= 0 => {
                Some(AfterSend::EnableCompression {
                    threshold: *threshold as usize,
                })
            }
            _ => None,
        }
    }

    /// Serialize the body, masking chat for the receiving connection
    pub fn encode(&self, buf: &mut WireBuffer, ctx: &EncodeContext<'_>) -> Result<()> {
        let version = ctx.protocol_version;
        match self {
            ClientboundPacket::StatusResponse(status) => {
                let mut status = status.as_ref().clone();
                status.description = ctx.mask(&status.description);
                buf.write_json(&status)?;
            }
            ClientboundPacket::StatusPong { payload } => {
                buf.write_i64(*payload);
            }
            ClientboundPacket::LoginDisconnect { reason } | ClientboundPacket::Disconnect { reason } => {
                buf.write_json(&ctx.mask(reason))?;
            }
            ClientboundPacket::EncryptionRequest {
                server_id,
                public_key,
                verify_token,
            } => {
                buf.write_string_bounded(server_id, 20)?;
                buf.write_byte_array(public_key)?;
                buf.write_byte_array(verify_token)?;
            }
            ClientboundPacket::LoginSuccess { uuid, username } => {
                buf.write_string_bounded(&uuid.hyphenated().to_string(), 36)?;
                buf.write_string_bounded(username, 16)?;
            }
            ClientboundPacket::SetCompression { threshold } => {
                buf.write_varint(*threshold);
            }
            ClientboundPacket::KeepAlive { id } => {
                if version >= KEEP_ALIVE_I64_SINCE {
                    buf.write_i64(*id);
                } else {
                    let id = i32::try_from(*id).map_err(|_| {
                        ProtocolError::ValueOutOfRange(format!("keep-alive id {id} for protocol {version}"))
                    })?;
                    buf.write_varint(id);
                }
            }
            ClientboundPacket::JoinGame(join) => {
                buf.write_i32(join.entity_id).write_u8(join.game_mode.id());
                if version >= DIMENSION_I32_SINCE {
                    buf.write_i32(join.dimension);
                } else {
                    buf.write_byte(join.dimension as i64)?;
                }
                buf.write_u8(join.difficulty).write_u8(join.max_players);
                buf.write_string_bounded(&join.level_type, 16)?;
                buf.write_bool(join.reduced_debug_info);
            }
            ClientboundPacket::ChatMessage { message, position } => {
                buf.write_json(&ctx.mask(message))?;
                buf.write_i8(position.id());
            }
            ClientboundPacket::PlayerListItem(action) => {
                encode_player_list(buf, action)?;
            }
            ClientboundPacket::PlayerPositionAndLook {
                position,
                flags,
                teleport_id,
            } => {
                buf.write_f64(position.x)
                    .write_f64(position.y)
                    .write_f64(position.z)
                    .write_f32(position.yaw)
                    .write_f32(position.pitch)
                    .write_u8(*flags);
                if version >= TELEPORT_ID_SINCE {
                    buf.write_varint(*teleport_id);
                }
            }
            ClientboundPacket::SpawnPosition { x, y, z } => {
                write_block_position(buf, version, *x, *y, *z);
            }
            ClientboundPacket::ChunkData(column) => {
                buf.write_i32(column.x).write_i32(column.z).write_bool(true);
                if version >= TELEPORT_ID_SINCE {
                    buf.write_varint(column.bit_mask);
                } else {
                    buf.write_short(column.bit_mask as i64 & 0xFFFF)?;
                }
                buf.write_byte_array(&column.data)?;
                if version >= BLOCK_ENTITIES_SINCE {
                    buf.write_varint(0);
                }
            }
        }
        Ok(())
    }
}

fn encode_player_list(buf: &mut WireBuffer, action: &PlayerListAction) -> Result<()> {
    buf.write_varint(action.id());
    match action {
        PlayerListAction::Add(entries) => {
            buf.write_varint(entries.len() as i32);
            for entry in entries {
                buf.write_uuid(&entry.uuid);
                buf.write_string_bounded(&entry.username, 16)?;
                buf.write_varint(0) // properties
                    .write_varint(entry.game_mode.id() as i32)
                    .write_varint(entry.latency_ms)
                    .write_bool(false); // display name
            }
        }
        PlayerListAction::UpdateLatency(entries) => {
            buf.write_varint(entries.len() as i32);
            for (uuid, latency) in entries {
                buf.write_uuid(uuid).write_varint(*latency);
            }
        }
        PlayerListAction::Remove(uuids) => {
            buf.write_varint(uuids.len() as i32);
            for uuid in uuids {
                buf.write_uuid(uuid);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn encode(packet: &ClientboundPacket, version: i32) -> WireBuffer {
        let locales = LocaleTable::bundled().unwrap();
        let ctx = EncodeContext {
            protocol_version: version,
            locale: "en_us",
            locales: &locales,
        };
        let mut buf = WireBuffer::new();
        packet.encode(&mut buf, &ctx).unwrap();
        buf
    }

    fn join(dimension: i32) -> ClientboundPacket {
        ClientboundPacket::JoinGame(JoinGame {
            entity_id: 1,
            game_mode: GameMode::Creative,
            dimension,
            difficulty: 1,
            max_players: 20,
            level_type: "default".into(),
            reduced_debug_info: false,
        })
    }

    #[test]
    fn join_game_dimension_width() {
        let old = encode(&join(-1), 47);
        let new = encode(&join(-1), 108);
        assert_eq!(new.len(), old.len() + 3);

        let mut old = old;
        old.read_i32().unwrap();
        old.read_u8().unwrap();
        assert_eq!(old.read_i8().unwrap(), -1);
    }

    #[test]
    fn teleport_id_only_for_newer_clients() {
        let packet = ClientboundPacket::PlayerPositionAndLook {
            position: Position::new(0.5, 64.0, 0.5),
            flags: 0,
            teleport_id: 300,
        };
        assert_eq!(encode(&packet, 47).len(), 33);
        assert_eq!(encode(&packet, 107).len(), 35);
    }

    #[test]
    fn chunk_data_layouts() {
        let packet = ClientboundPacket::ChunkData(ChunkColumn {
            x: 0,
            z: 0,
            bit_mask: 1,
            data: Bytes::from_static(&[0xAB; 4]),
        });
        // x, z, full, u16 mask, len, data
        assert_eq!(encode(&packet, 47).len(), 4 + 4 + 1 + 2 + 1 + 4);
        // VarInt mask
        assert_eq!(encode(&packet, 107).len(), 4 + 4 + 1 + 1 + 1 + 4);
        // block entity count
        assert_eq!(encode(&packet, 110).len(), 4 + 4 + 1 + 1 + 1 + 4 + 1);
    }

    #[test]
    fn keep_alive_id_must_fit_old_width() {
        let locales = LocaleTable::default();
        let ctx = EncodeContext {
            protocol_version: 47,
            locale: "en_us",
            locales: &locales,
        };
        let packet = ClientboundPacket::KeepAlive { id: i64::MAX };
        assert!(packet.encode(&mut WireBuffer::new(), &ctx).is_err());
    }

    #[test]
    fn disconnect_reason_is_masked() {
        let reason = ChatComponent::translate("multiplayer.disconnect.server_shutdown", vec![]);
        let packet = ClientboundPacket::Disconnect { reason };

        let mut old = encode(&packet, 47);
        let text: ChatComponent = old.read_json().unwrap();
        assert_eq!(text, ChatComponent::text("Server closed"));

        let mut new = encode(&packet, 340);
        let native: ChatComponent = new.read_json().unwrap();
        assert_eq!(native.translation_key(), Some("multiplayer.disconnect.server_shutdown"));
    }

    #[test]
    fn set_compression_declares_hook() {
        assert_eq!(
            ClientboundPacket::SetCompression { threshold: 256 }.after_send(),
            Some(AfterSend::EnableCompression { threshold: 256 })
        );
        assert_eq!(ClientboundPacket::SetCompression { threshold: -1 }.after_send(), None);
        assert_eq!(ClientboundPacket::KeepAlive { id: 1 }.after_send(), None);
    }

    #[test]
    fn login_success_uses_hyphenated_uuid() {
        let uuid = Uuid::nil();
        let mut buf = encode(
            &ClientboundPacket::LoginSuccess {
                uuid,
                username: "Steve".into(),
            },
            340,
        );
        assert_eq!(buf.read_string().unwrap(), "00000000-0000-0000-0000-000000000000");
        assert_eq!(buf.read_string().unwrap(), "Steve");
    }

    #[test]
    fn player_list_latency_update() {
        let uuid = Uuid::from_u128(7);
        let mut buf = encode(
            &ClientboundPacket::PlayerListItem(PlayerListAction::UpdateLatency(vec![(uuid, 42)])),
            340,
        );
        assert_eq!(buf.read_varint().unwrap(), 2);
        assert_eq!(buf.read_varint().unwrap(), 1);
        assert_eq!(buf.read_uuid().unwrap(), uuid);
        assert_eq!(buf.read_varint().unwrap(), 42);
    }
}
