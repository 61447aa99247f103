//! Participant roster types

use crate::signaling::ParticipantInfo;
use std::sync::Arc;
use std::sync::RwLock;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::track::track_remote::TrackRemote;

/// A remote participant's media stream, accumulated as tracks arrive
///
/// Populated by the peer layer when remote tracks fire; the roster only
/// holds the reference.
#[derive(Default)]
pub struct RemoteStream {
    tracks: RwLock<Vec<Arc<TrackRemote>>>,
}

// TrackRemote carries no Debug impl; report the track count instead
impl std::fmt::Debug for RemoteStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteStream")
            .field("tracks", &self.tracks().len())
            .finish()
    }
}

impl RemoteStream {
    /// An empty stream
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an arrived track
    pub(crate) fn add_track(&self, track: Arc<TrackRemote>) {
        self.tracks
            .write()
            .expect("remote stream lock poisoned")
            .push(track);
    }

    /// All tracks received so far
    pub fn tracks(&self) -> Vec<Arc<TrackRemote>> {
        self.tracks
            .read()
            .expect("remote stream lock poisoned")
            .clone()
    }

    /// The audio track, if one has arrived
    pub fn audio_track(&self) -> Option<Arc<TrackRemote>> {
        self.track_of_kind(RTPCodecType::Audio)
    }

    /// The video track, if one has arrived
    pub fn video_track(&self) -> Option<Arc<TrackRemote>> {
        self.track_of_kind(RTPCodecType::Video)
    }

    fn track_of_kind(&self, kind: RTPCodecType) -> Option<Arc<TrackRemote>> {
        self.tracks
            .read()
            .expect("remote stream lock poisoned")
            .iter()
            .find(|track| track.kind() == kind)
            .cloned()
    }
}

/// One entry in the meeting roster
#[derive(Debug, Clone)]
pub struct Participant {
    /// Stable unique participant id
    pub id: String,

    /// Display name
    pub name: String,

    /// Whether this participant is the meeting host
    pub is_host: bool,

    /// Current mute state as reported over signaling
    pub is_muted: bool,

    /// Current camera-off state as reported over signaling
    pub is_video_off: bool,

    /// Remote media stream; `None` until the first track arrives, which is
    /// a normal transient state rather than an error
    pub stream: Option<Arc<RemoteStream>>,
}

impl Participant {
    /// Roster entry for a participant announced over signaling
    pub(crate) fn from_info(info: ParticipantInfo) -> Self {
        Self {
            id: info.id,
            name: info.name,
            is_host: info.is_host,
            is_muted: info.is_muted,
            is_video_off: info.is_video_off,
            stream: None,
        }
    }
}
