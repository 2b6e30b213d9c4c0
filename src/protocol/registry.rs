//! # Packet Registry
//!
//! Maps packet names to numeric ids per direction, connection state and
//! protocol version. Built once from a declaration document:
//!
//! ```json
//! { "serverbound": { "play": { "KeepAlive": { "47": 0, "107": 11, "341": null } } } }
//! ```
//!
//! A packet is declared either with one id valid for every version, or with
//! a map from version range to id. In a range map only the starts matter for
//! all but the newest range: each range ends one below the start of the next
//! newer one. The newest range is open-ended unless written as `"a-b"`. A
//! `null` id means the packet does not exist for that range.

use std::collections::{BTreeMap, HashMap};

use bytes::Bytes;
use serde::Deserialize;
use tracing::{debug, info, instrument};

use crate::core::buffer::WireBuffer;
use crate::error::{ProtocolError, Result};
use crate::protocol::packets::clientbound::{ClientboundPacket, EncodeContext};
use crate::protocol::packets::serverbound::{decoder_for, PacketDecoder, ServerboundPacket};
use crate::protocol::state::{ConnectionState, Direction};
use crate::protocol::version::VersionSpec;

const BUNDLED_PACKETS: &str = include_str!("../../assets/packets.json");

#[derive(Deserialize)]
#[serde(untagged)]
enum IdDeclaration {
    Fixed(i32),
    Ranged(BTreeMap<String, Option<i32>>),
}

/// One version range of a packet and its id there
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdMapping {
    pub range: VersionSpec,
    pub id: Option<i32>,
}

#[derive(Clone)]
struct PacketEntry {
    name: String,
    /// Newest range first
    mappings: Vec<IdMapping>,
    decoder: Option<PacketDecoder>,
}

impl PacketEntry {
    fn id_for(&self, version: i32) -> Option<i32> {
        self.mappings
            .iter()
            .find(|mapping| mapping.range.contains(version))
            .and_then(|mapping| mapping.id)
    }
}

impl std::fmt::Debug for PacketEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PacketEntry")
            .field("name", &self.name)
            .field("mappings", &self.mappings)
            .field("has_decoder", &self.decoder.is_some())
            .finish()
    }
}

type StateTable = HashMap<ConnectionState, Vec<PacketEntry>>;

/// Versioned packet identity table
#[derive(Debug, Clone, Default)]
pub struct PacketRegistry {
    serverbound: StateTable,
    clientbound: StateTable,
}

impl PacketRegistry {
    /// Parse and validate a declaration document
    ///
    /// # Errors
    /// `InvalidDeclaration` for unknown directions or states, bad range keys,
    /// range maps with fewer than two distinct ranges, negative ids, or
    /// serverbound packets without a decoder.
    #[instrument(skip(text), fields(bytes = text.len()))]
    pub fn from_json(text: &str) -> Result<Self> {
        let document: HashMap<String, HashMap<String, HashMap<String, IdDeclaration>>> =
            serde_json::from_str(text).map_err(|e| {
                ProtocolError::InvalidDeclaration(format!("malformed packet map: {e}"))
            })?;

        let mut registry = Self::default();
        for (direction, states) in document {
            let direction = match direction.as_str() {
                "serverbound" => Direction::Serverbound,
                "clientbound" => Direction::Clientbound,
                other => {
                    return Err(ProtocolError::InvalidDeclaration(format!(
                        "unknown direction '{other}'"
                    )))
                }
            };

            for (state, packets) in states {
                let state: ConnectionState = state.parse()?;
                let mut entries = Vec::with_capacity(packets.len());

                for (name, declaration) in packets {
                    let mappings = derive_mappings(&name, declaration)?;
                    let decoder = match direction {
                        Direction::Serverbound => Some(decoder_for(&name).ok_or_else(|| {
                            ProtocolError::InvalidDeclaration(format!(
                                "no decoder for serverbound packet '{name}'"
                            ))
                        })?),
                        Direction::Clientbound => None,
                    };
                    entries.push(PacketEntry {
                        name,
                        mappings,
                        decoder,
                    });
                }

                entries.sort_by(|a, b| a.name.cmp(&b.name));
                registry.table_mut(direction).insert(state, entries);
            }
        }

        info!(
            serverbound = registry.count(Direction::Serverbound),
            clientbound = registry.count(Direction::Clientbound),
            "Packet registry loaded"
        );
        Ok(registry)
    }

    /// The declaration shipped with the crate
    pub fn bundled() -> Result<Self> {
        Self::from_json(BUNDLED_PACKETS)
    }

    fn table(&self, direction: Direction) -> &StateTable {
        match direction {
            Direction::Serverbound => &self.serverbound,
            Direction::Clientbound => &self.clientbound,
        }
    }

    fn table_mut(&mut self, direction: Direction) -> &mut StateTable {
        match direction {
            Direction::Serverbound => &mut self.serverbound,
            Direction::Clientbound => &mut self.clientbound,
        }
    }

    fn entries(&self, direction: Direction, state: ConnectionState) -> &[PacketEntry] {
        self.table(direction)
            .get(&state)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Number of declared packets in one direction
    pub fn count(&self, direction: Direction) -> usize {
        self.table(direction).values().map(Vec::len).sum()
    }

    /// Derived ranges for a declared packet, newest first
    pub fn mappings(&self, direction: Direction, state: ConnectionState, name: &str) -> Option<&[IdMapping]> {
        self.entries(direction, state)
            .iter()
            .find(|entry| entry.name == name)
            .map(|entry| entry.mappings.as_slice())
    }

    fn find_by_id(
        &self,
        direction: Direction,
        state: ConnectionState,
        version: i32,
        id: i32,
    ) -> Result<&PacketEntry> {
        self.entries(direction, state)
            .iter()
            .find(|entry| entry.id_for(version) == Some(id))
            .ok_or_else(|| ProtocolError::UnknownPacket {
                state: state.to_string(),
                id,
            })
    }

    /// Name of the packet with wire id `id` for `version`
    pub fn resolve_name(
        &self,
        direction: Direction,
        state: ConnectionState,
        version: i32,
        id: i32,
    ) -> Result<&str> {
        self.find_by_id(direction, state, version, id)
            .map(|entry| entry.name.as_str())
    }

    /// Wire id of the packet declared as `name` for `version`
    pub fn resolve_id(
        &self,
        direction: Direction,
        state: ConnectionState,
        version: i32,
        name: &str,
    ) -> Result<i32> {
        self.entries(direction, state)
            .iter()
            .find(|entry| entry.name == name)
            .and_then(|entry| entry.id_for(version))
            .ok_or_else(|| ProtocolError::UnmappedPacket {
                state: state.to_string(),
                name: name.to_string(),
            })
    }

    /// Split the id off an inbound frame, resolve it and parse the body
    pub fn decode_serverbound(
        &self,
        state: ConnectionState,
        version: i32,
        frame: Bytes,
    ) -> Result<ServerboundPacket> {
        let mut buf = WireBuffer::from(frame);
        let id = buf.read_varint().map_err(ProtocolError::into_frame_error)?;
        let entry = self.find_by_id(Direction::Serverbound, state, version, id)?;
        let decode = entry.decoder.ok_or_else(|| ProtocolError::UnknownPacket {
            state: state.to_string(),
            id,
        })?;

        let packet = decode(&mut buf, version).map_err(ProtocolError::into_frame_error)?;
        if buf.remaining() > 0 {
            debug!(packet = %entry.name, trailing = buf.remaining(), "Ignoring trailing bytes");
        }
        Ok(packet)
    }

    /// Id followed by body, ready for the frame codec
    pub fn encode_clientbound(&self, packet: &ClientboundPacket, ctx: &EncodeContext<'_>) -> Result<Bytes> {
        let id = self.resolve_id(
            Direction::Clientbound,
            packet.state(),
            ctx.protocol_version,
            packet.name(),
        )?;
        let mut buf = WireBuffer::new();
        packet.encode(&mut buf, ctx)?;
        buf.prepend().write_varint(id);
        Ok(buf.into_bytes())
    }
}

/// Turn one packet's declaration into sorted, non-empty id mappings
fn derive_mappings(name: &str, declaration: IdDeclaration) -> Result<Vec<IdMapping>> {
    let invalid = |reason: String| ProtocolError::InvalidDeclaration(format!("'{name}': {reason}"));
    let check_id = |id: Option<i32>| match id {
        Some(id) if id < 0 => Err(invalid(format!("negative id {id}"))),
        other => Ok(other),
    };

    let ranged = match declaration {
        IdDeclaration::Fixed(id) => {
            return Ok(vec![IdMapping {
                range: VersionSpec::starting_at(0),
                id: check_id(Some(id))?,
            }]);
        }
        IdDeclaration::Ranged(ranged) => ranged,
    };

    let mut parsed = Vec::with_capacity(ranged.len());
    for (key, id) in &ranged {
        let spec = VersionSpec::parse(key, None).map_err(|e| invalid(e.to_string()))?;
        // a bare number only fixes a start
        let explicit_end = key.contains('-').then_some(spec.end).flatten();
        parsed.push((spec.start, explicit_end, check_id(*id)?));
    }

    parsed.sort_by(|a, b| b.0.cmp(&a.0));
    if parsed.windows(2).any(|pair| pair[0].0 == pair[1].0) {
        return Err(invalid("two ranges share a start".into()));
    }
    if parsed.len() < 2 {
        return Err(invalid("a range map needs at least two distinct ranges".into()));
    }

    let mut mappings = Vec::with_capacity(parsed.len());
    let mut newer_start: Option<i32> = None;
    for (start, explicit_end, id) in parsed {
        let end = match newer_start {
            Some(next) => Some(next - 1),
            None => explicit_end,
        };
        mappings.push(IdMapping {
            range: VersionSpec::new(start, end),
            id,
        });
        newer_start = Some(start);
    }
    Ok(mappings)
}
