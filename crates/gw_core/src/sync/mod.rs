//! Partner synchronization: wire format, transport seam, the sans-IO
//! protocol engine, room pairing, per-trial timers and the async session
//! driver that ties them to a [`crate::engine::trial::TrialMachine`].

pub mod message;
pub mod protocol;
pub mod provider;
pub mod room;
pub mod session;
pub mod timers;
pub mod transport;

pub use message::{MoveId, WireMessage};
pub use protocol::{ConnectionState, PendingMoveBuffer, Role, SyncEngine, SyncEvent, SyncMode};
pub use provider::{request_decision, DecisionProvider, ProviderError, ProviderFuture, ProviderReply};
pub use room::{ConnectionId, JoinOutcome, LeaveOutcome, Room, RoomManager, RoomMode, RoomStats};
pub use session::{drive_greedy, SessionSetup, TrialSession};
pub use timers::{TimerEvent, TimerKind, TrialTimers};
pub use transport::{ChannelTransport, Transport};
