//! Client-side meeting session orchestration over a WebRTC mesh
//!
//! This crate coordinates the independently-failing pieces of a
//! multi-participant audio/video meeting — a signaling socket, N peer
//! connections, local capture, and chat data channels — under a single
//! consistent view of who is in the meeting and what their media state is.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │  MeetingSession (public handle)                          │
//! │  └─ SessionCoordinator (roster + event loop)             │
//! │     ├─ SignalingChannel (JSON frames over WebSocket)     │
//! │     ├─ PeerConnectionManager (mesh of PeerConnections)   │
//! │     │   └─ per-peer "chat" data channel                  │
//! │     ├─ MediaController (mic/camera/screen capture)       │
//! │     ├─ ChatChannel (ordered message log)                 │
//! │     └─ ConnectionStateMachine (backoff reconnection)     │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! Every participant maintains a direct peer connection to every other
//! participant; signaling only relays negotiation messages. Between any
//! pair, the lexicographically greater id originates the offer and the
//! smaller id answers, so simultaneous joins never glare.
//!
//! # Example
//!
//! ```no_run
//! use meetmesh::{MeetingConfig, MeetingSession};
//! use std::sync::Arc;
//!
//! # async fn example(source: Arc<dyn meetmesh::MediaSource>) -> meetmesh::Result<()> {
//! let config = MeetingConfig {
//!     signaling_url: "wss://meet.example.com/signal".to_string(),
//!     meeting_id: "standup".to_string(),
//!     display_name: "alice".to_string(),
//!     ..Default::default()
//! };
//!
//! let session = MeetingSession::new(config, source)?;
//! session.connect().await?;
//!
//! session.toggle_mute().await?;
//! session.send_chat("hello everyone").await?;
//!
//! session.disconnect().await;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod chat;
pub mod config;
pub mod error;
pub mod media;
pub mod session;
pub mod signaling;

mod peer;

pub use chat::{ChatChannel, ChatMessage};
pub use config::{IceServerConfig, MeetingConfig, ReconnectPolicy};
pub use error::{Error, Result};
pub use media::{CameraConstraints, CaptureTrack, MediaController, MediaSource};
pub use peer::{PeerState, CHAT_CHANNEL_LABEL};
pub use session::{ConnectionState, MeetingSession, Participant, RemoteStream};
pub use signaling::{ParticipantInfo, SignalMessage};

/// Get the version of this crate
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!version().is_empty());
    }
}
