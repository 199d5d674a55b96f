use std::collections::BTreeSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use rkyv::{Archive, Deserialize, Serialize};

static STATE_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Identifier of one produced game state. Random, so ids minted by different
/// peers do not collide in practice.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Archive, Serialize, Deserialize,
)]
#[rkyv(derive(Debug))]
pub struct StateId(pub u128);

impl StateId {
    pub fn generate() -> Self {
        use std::collections::hash_map::RandomState;
        use std::hash::{BuildHasher, Hasher};

        let counter = STATE_ID_COUNTER.fetch_add(1, Ordering::Relaxed);
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|elapsed| elapsed.as_nanos() as u64)
            .unwrap_or(0);

        let mut high = RandomState::new().build_hasher();
        high.write_u64(nanos);
        high.write_u64(counter);

        let mut low = RandomState::new().build_hasher();
        low.write_u64(counter);
        low.write_u64(nanos);

        Self(((high.finish() as u128) << 64) | low.finish() as u128)
    }
}

impl fmt::Display for StateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Archive, Serialize, Deserialize,
)]
#[rkyv(derive(Debug))]
pub struct ActionId(pub u64);

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Archive, Serialize, Deserialize,
)]
#[rkyv(derive(Debug))]
pub struct ClientId(pub u32);

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Remote participants known to this session.
pub type Roster = BTreeSet<ClientId>;

#[derive(Debug, Clone, PartialEq)]
pub struct PlayerAction<A> {
    pub id: ActionId,
    pub payload: A,
}

impl<A> PlayerAction<A> {
    pub fn new(id: ActionId, payload: A) -> Self {
        Self { id, payload }
    }
}

/// A state produced by one peer, as seen in an authoritative broadcast.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot<S> {
    pub state: S,
    pub id: StateId,
    pub server_time_estimate: f64,
}

/// Outbound candidate for the authoritative state.
#[derive(Debug, Clone, PartialEq)]
pub struct StateUpdate<'a, S> {
    pub state: &'a S,
    pub id: StateId,
    pub based_on_id: Option<StateId>,
    pub handled_action_ids: Vec<ActionId>,
    pub server_time_estimate: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Inbound<S, A> {
    Pong { server_time: f64, sent_time: f64 },
    StateUpdate(Snapshot<S>),
    PlayerAction(PlayerAction<A>),
    ClientJoined(ClientId),
    ClientLeft(ClientId),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outbound<'a, S> {
    Ping { sent_time: f64 },
    StateUpdate(StateUpdate<'a, S>),
}
