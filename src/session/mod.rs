//! Session orchestration: roster, coordinator, and connectivity state

mod coordinator;
mod roster;
mod state;

pub(crate) mod events;

pub use coordinator::MeetingSession;
pub use roster::{Participant, RemoteStream};
pub use state::{ConnectionState, ConnectionStateMachine};
