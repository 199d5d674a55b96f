use std::collections::BTreeMap;

use glam::Vec3;
use rkyv::{Archive, Deserialize, Serialize, rancor};

use tandem::net::aligned;
use tandem::{Payload, PlayerAction, ProtocolError, Roster};

pub const MAX_SPEED: f32 = 8.0;
/// Fraction of velocity kept after one second without thrust.
pub const DAMPING: f32 = 0.25;

#[derive(Archive, Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
#[rkyv(derive(Debug))]
pub struct Body {
    pub position: Vec3,
    pub velocity: Vec3,
}

/// Shared world: one body per player token.
#[derive(Archive, Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
#[rkyv(derive(Debug))]
pub struct DemoWorld {
    pub elapsed: f32,
    pub connected: u32,
    pub bodies: BTreeMap<u64, Body>,
}

#[derive(Archive, Deserialize, Serialize, Debug, Clone, PartialEq)]
#[rkyv(derive(Debug))]
pub struct DemoAction {
    pub player: u64,
    pub thrust: Vec3,
}

impl DemoAction {
    pub fn thrust(player: u64, thrust: Vec3) -> Self {
        Self { player, thrust }
    }
}

impl Payload for DemoWorld {
    fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        rkyv::to_bytes::<rancor::Error>(self)
            .map(|bytes| bytes.into_vec())
            .map_err(ProtocolError::Serialize)
    }

    fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        rkyv::from_bytes::<Self, rancor::Error>(&aligned(bytes)).map_err(ProtocolError::Deserialize)
    }
}

impl Payload for DemoAction {
    fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        rkyv::to_bytes::<rancor::Error>(self)
            .map(|bytes| bytes.into_vec())
            .map_err(ProtocolError::Serialize)
    }

    fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        rkyv::from_bytes::<Self, rancor::Error>(&aligned(bytes)).map_err(ProtocolError::Deserialize)
    }
}

/// Applies thrust from `actions`, then integrates every body over `dt` seconds.
pub fn advance(
    world: &DemoWorld,
    actions: &[PlayerAction<DemoAction>],
    roster: &Roster,
    dt: f32,
) -> DemoWorld {
    let mut next = world.clone();
    next.elapsed += dt;
    next.connected = roster.len() as u32;

    for action in actions {
        let body = next.bodies.entry(action.payload.player).or_default();
        body.velocity = (body.velocity + action.payload.thrust).clamp_length_max(MAX_SPEED);
    }

    let damping = DAMPING.powf(dt);
    for body in next.bodies.values_mut() {
        body.position += body.velocity * dt;
        body.velocity *= damping;
    }

    next
}
