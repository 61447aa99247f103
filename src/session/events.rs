//! Internal events funneled into the session event loop
//!
//! Signaling, peer-connection callbacks, and media watchers all feed one
//! mpsc consumed by a single coordinator task, so the roster and the
//! connection map are only ever mutated from that task.

use crate::signaling::SignalingEvent;
use std::sync::Arc;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::track::track_remote::TrackRemote;

/// Top-level event consumed by the coordinator task
#[derive(Debug)]
pub(crate) enum SessionEvent {
    /// Signaling channel activity
    Signal(SignalingEvent),
    /// Peer connection activity
    Peer(PeerEvent),
    /// Local media activity
    Media(MediaEvent),
}

/// Events surfaced by individual peer connections
pub(crate) enum PeerEvent {
    /// A remote media track arrived for a participant
    RemoteTrack {
        /// Participant the track belongs to
        participant_id: String,
        /// The remote track
        track: Arc<TrackRemote>,
    },
    /// The underlying connection changed state
    StateChanged {
        /// Participant whose connection changed
        participant_id: String,
        /// New connection state
        state: RTCPeerConnectionState,
    },
}

/// Events surfaced by local media capture
#[derive(Debug)]
pub(crate) enum MediaEvent {
    /// The platform ended display capture (user closed the OS sharing UI)
    ScreenShareEnded,
}

// TrackRemote carries no Debug impl; print the event shape without it
impl std::fmt::Debug for PeerEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PeerEvent::RemoteTrack { participant_id, .. } => f
                .debug_struct("RemoteTrack")
                .field("participant_id", participant_id)
                .finish_non_exhaustive(),
            PeerEvent::StateChanged {
                participant_id,
                state,
            } => f
                .debug_struct("StateChanged")
                .field("participant_id", participant_id)
                .field("state", state)
                .finish(),
        }
    }
}
