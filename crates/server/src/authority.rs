use tandem::{ActionId, Message, StateId};

/// The state every client is currently expected to build on.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthoritativeState {
    pub state: Vec<u8>,
    pub id: StateId,
    pub based_on_id: Option<StateId>,
    pub handled_action_ids: Vec<ActionId>,
    pub server_time_estimate: f64,
}

impl AuthoritativeState {
    pub fn to_message(&self) -> Message {
        Message::GameStateUpdate {
            state: self.state.clone(),
            id: self.id,
            based_on_id: self.based_on_id,
            handled_action_ids: self.handled_action_ids.clone(),
            server_time_estimate: self.server_time_estimate,
        }
    }
}

/// First-writer-wins chain of states.
///
/// A candidate is accepted when it names the current authoritative id as its
/// parent, or when nothing has been accepted yet.
#[derive(Debug, Default)]
pub struct Authority {
    current: Option<AuthoritativeState>,
    accepted: u64,
    rejected: u64,
}

impl Authority {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<&AuthoritativeState> {
        self.current.as_ref()
    }

    /// Returns true when `candidate` became the current state. On rejection
    /// the current state is left untouched and is what the sender should adopt.
    pub fn offer(&mut self, candidate: AuthoritativeState) -> bool {
        let extends_current = match &self.current {
            None => true,
            Some(current) => candidate.based_on_id == Some(current.id),
        };

        if extends_current {
            self.accepted += 1;
            self.current = Some(candidate);
        } else {
            self.rejected += 1;
        }
        extends_current
    }

    pub fn reset(&mut self) {
        self.current = None;
    }

    pub fn accepted(&self) -> u64 {
        self.accepted
    }

    pub fn rejected(&self) -> u64 {
        self.rejected
    }
}
