//! Signaling protocol and channel
//!
//! The wire protocol is a closed tagged enum over JSON text frames; the
//! channel owns one persistent WebSocket to the signaling endpoint.

pub mod protocol;

mod channel;

pub use protocol::{ParticipantInfo, SignalMessage};

pub(crate) use channel::{SignalingChannel, SignalingEvent};
pub use channel::normalize_signaling_url;
