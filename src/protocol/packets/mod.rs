//! Typed packet bodies for both directions.

pub mod clientbound;
pub mod serverbound;

pub use clientbound::{
    AfterSend, ClientboundPacket, EncodeContext, JoinGame, PlayerListAction, PlayerSample,
    StatusPlayers, StatusResponse, StatusVersion,
};
pub use serverbound::{ClientSettings, Handshake, PacketDecoder, ServerboundPacket};
