pub mod clock;
pub mod config;
pub mod engine;
pub mod net;
pub mod session;

pub use clock::{
    Clock, ClockOffsetTracker, DEFAULT_OFFSET_MS, DEFAULT_WINDOW_CAPACITY, ManualClock,
    SlidingMedian, SystemClock,
};
pub use config::SessionConfig;
pub use engine::{
    ActionId, ClientId, Inbound, Outbound, PeriodicScheduler, PlayerAction, ReconciliationEngine,
    Roster, Snapshot, StateId, StateUpdate, SyncStats, TaskHandle, TaskKind,
};
pub use net::{
    ConnectionState, DEFAULT_PORT, LinkMonitor, MAX_PACKET_SIZE, Message, Packet, PacketHeader,
    Payload, ProtocolError, Transport, TransportError, UdpReceiver, UdpTransport,
};
pub use session::{Session, SessionError};
