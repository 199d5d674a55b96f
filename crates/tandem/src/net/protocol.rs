use rkyv::util::AlignedVec;
use rkyv::{Archive, Deserialize, Serialize, rancor};

use crate::engine::{
    ActionId, ClientId, Inbound, Outbound, PlayerAction, Snapshot, StateId, StateUpdate,
};

pub const MAX_PACKET_SIZE: usize = 16 * 1024;
pub const PROTOCOL_VERSION: u32 = 1;
pub const PROTOCOL_MAGIC: u32 = 0x54414E44;
pub const DEFAULT_PORT: u16 = 27016;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct PacketHeader {
    pub magic: u32,
    pub version: u32,
}

impl Default for PacketHeader {
    fn default() -> Self {
        Self {
            magic: PROTOCOL_MAGIC,
            version: PROTOCOL_VERSION,
        }
    }
}

impl PacketHeader {
    pub fn is_valid(&self) -> bool {
        self.magic == PROTOCOL_MAGIC && self.version == PROTOCOL_VERSION
    }
}

/// Every message that crosses the wire. Times are wall-clock milliseconds;
/// application states and actions travel as opaque bytes.
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub enum Message {
    Ping {
        sent_time: f64,
    },
    Pong {
        server_time: f64,
        sent_time: f64,
    },
    GameStateUpdate {
        state: Vec<u8>,
        id: StateId,
        based_on_id: Option<StateId>,
        handled_action_ids: Vec<ActionId>,
        server_time_estimate: f64,
    },
    PlayerAction {
        id: ActionId,
        action: Vec<u8>,
    },
    ClientJoined {
        client_id: ClientId,
    },
    ClientLeft {
        client_id: ClientId,
    },
}

impl Message {
    pub fn name(&self) -> &'static str {
        match self {
            Message::Ping { .. } => "ping",
            Message::Pong { .. } => "pong",
            Message::GameStateUpdate { .. } => "gameStateUpdate",
            Message::PlayerAction { .. } => "playerAction",
            Message::ClientJoined { .. } => "clientJoined",
            Message::ClientLeft { .. } => "clientLeft",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct Packet {
    pub header: PacketHeader,
    pub payload: Message,
}

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("serialization failed: {0}")]
    Serialize(rancor::Error),
    #[error("deserialization failed: {0}")]
    Deserialize(rancor::Error),
    #[error("bad packet header (magic {magic:#010x}, version {version})")]
    BadHeader { magic: u32, version: u32 },
    #[error("packet of {0} bytes exceeds the size limit")]
    TooLarge(usize),
    #[error("non-finite time in {0} message")]
    InvalidTime(&'static str),
    #[error("payload decode failed: {0}")]
    Payload(String),
}

/// Copies bytes into a buffer aligned for rkyv access. Datagrams land in
/// arbitrary buffers, so every decode goes through this.
pub fn aligned(data: &[u8]) -> AlignedVec {
    let mut buffer = AlignedVec::with_capacity(data.len());
    buffer.extend_from_slice(data);
    buffer
}

impl Packet {
    pub fn new(payload: Message) -> Self {
        Self {
            header: PacketHeader::default(),
            payload,
        }
    }

    pub fn serialize(&self) -> Result<Vec<u8>, ProtocolError> {
        let bytes = rkyv::to_bytes::<rancor::Error>(self)
            .map(|aligned| aligned.into_vec())
            .map_err(ProtocolError::Serialize)?;

        if bytes.len() > MAX_PACKET_SIZE {
            return Err(ProtocolError::TooLarge(bytes.len()));
        }
        Ok(bytes)
    }

    /// Decodes and validates a datagram: size, archive layout, then header.
    pub fn deserialize(data: &[u8]) -> Result<Self, ProtocolError> {
        if data.len() > MAX_PACKET_SIZE {
            return Err(ProtocolError::TooLarge(data.len()));
        }

        let packet = rkyv::from_bytes::<Self, rancor::Error>(&aligned(data))
            .map_err(ProtocolError::Deserialize)?;

        if !packet.header.is_valid() {
            return Err(ProtocolError::BadHeader {
                magic: packet.header.magic,
                version: packet.header.version,
            });
        }
        Ok(packet)
    }
}

/// Conversion between an application type and the bytes carried on the wire.
pub trait Payload: Sized {
    fn encode(&self) -> Result<Vec<u8>, ProtocolError>;
    fn decode(bytes: &[u8]) -> Result<Self, ProtocolError>;
}

impl Payload for Vec<u8> {
    fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        Ok(self.clone())
    }

    fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        Ok(bytes.to_vec())
    }
}

impl Payload for () {
    fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        Ok(Vec::new())
    }

    fn decode(_bytes: &[u8]) -> Result<Self, ProtocolError> {
        Ok(())
    }
}

fn finite(value: f64, message: &'static str) -> Result<f64, ProtocolError> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(ProtocolError::InvalidTime(message))
    }
}

pub fn encode_outbound<S: Payload>(message: &Outbound<'_, S>) -> Result<Message, ProtocolError> {
    let encoded = match message {
        Outbound::Ping { sent_time } => Message::Ping {
            sent_time: *sent_time,
        },
        Outbound::StateUpdate(StateUpdate {
            state,
            id,
            based_on_id,
            handled_action_ids,
            server_time_estimate,
        }) => Message::GameStateUpdate {
            state: state.encode()?,
            id: *id,
            based_on_id: *based_on_id,
            handled_action_ids: handled_action_ids.clone(),
            server_time_estimate: *server_time_estimate,
        },
    };
    Ok(encoded)
}

/// Turns a wire message into engine input. Messages a client never acts on
/// (such as `ping`) yield `Ok(None)`.
pub fn decode_inbound<S: Payload, A: Payload>(
    message: Message,
) -> Result<Option<Inbound<S, A>>, ProtocolError> {
    let name = message.name();
    let inbound = match message {
        Message::Pong {
            server_time,
            sent_time,
        } => Inbound::Pong {
            server_time: finite(server_time, name)?,
            sent_time: finite(sent_time, name)?,
        },
        Message::GameStateUpdate {
            state,
            id,
            server_time_estimate,
            ..
        } => Inbound::StateUpdate(Snapshot {
            state: S::decode(&state)?,
            id,
            server_time_estimate: finite(server_time_estimate, name)?,
        }),
        Message::PlayerAction { id, action } => {
            Inbound::PlayerAction(PlayerAction::new(id, A::decode(&action)?))
        }
        Message::ClientJoined { client_id } => Inbound::ClientJoined(client_id),
        Message::ClientLeft { client_id } => Inbound::ClientLeft(client_id),
        Message::Ping { .. } => return Ok(None),
    };
    Ok(Some(inbound))
}
