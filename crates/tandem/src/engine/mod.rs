mod reconcile;
mod scheduler;
mod state;
mod stats;

pub use reconcile::ReconciliationEngine;
pub use scheduler::{PeriodicScheduler, TaskHandle, TaskKind};
pub use state::{
    ActionId, ClientId, Inbound, Outbound, PlayerAction, Roster, Snapshot, StateId, StateUpdate,
};
pub use stats::SyncStats;
