//! Signaling wire protocol types
//!
//! JSON text frames over the signaling socket, discriminated by a
//! kebab-case `"type"` field with camelCase payload fields — the shape a
//! browser client produces. SDP and ICE payloads reuse the webrtc crate's
//! serde representations, which already match the browser JSON forms.

use serde::{Deserialize, Serialize};
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

/// Participant descriptor carried in join/roster messages
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantInfo {
    /// Stable unique participant id
    pub id: String,

    /// Display name
    pub name: String,

    /// Whether this participant is the meeting host
    pub is_host: bool,

    /// Current mute state
    pub is_muted: bool,

    /// Current camera-off state
    pub is_video_off: bool,
}

/// Signaling messages exchanged over the socket
///
/// A closed enum: every message kind the protocol defines is a variant
/// here, and dispatch is an exhaustive match. A frame whose `type` is not
/// one of these fails to parse and is dropped by the channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum SignalMessage {
    /// Join a meeting (client → server)
    JoinMeeting {
        /// Meeting to join
        meeting_id: String,
        /// Joining participant descriptor
        participant: ParticipantInfo,
    },

    /// Everyone already present, sent once right after join (server → client)
    ParticipantsList {
        /// Current meeting roster, not including the receiver
        participants: Vec<ParticipantInfo>,
    },

    /// A new participant joined (server → client)
    ParticipantJoined {
        /// The participant that joined
        participant: ParticipantInfo,
    },

    /// A participant left (server → client)
    ParticipantLeft {
        /// Id of the participant that left
        participant_id: String,
    },

    /// Mute/camera state change (client ↔ server)
    ParticipantUpdate {
        /// Id of the participant whose state changed
        participant_id: String,
        /// New mute state, if it changed
        #[serde(skip_serializing_if = "Option::is_none")]
        is_muted: Option<bool>,
        /// New camera-off state, if it changed
        #[serde(skip_serializing_if = "Option::is_none")]
        is_video_off: Option<bool>,
    },

    /// SDP offer relayed to one participant (client ↔ server)
    Offer {
        /// The SDP offer
        offer: RTCSessionDescription,
        /// Addressee participant id
        target_participant: String,
        /// Originating participant id
        from_participant: String,
    },

    /// SDP answer relayed to one participant (client ↔ server)
    Answer {
        /// The SDP answer
        answer: RTCSessionDescription,
        /// Addressee participant id
        target_participant: String,
        /// Originating participant id
        from_participant: String,
    },

    /// Trickle ICE candidate relayed to one participant (client ↔ server)
    IceCandidate {
        /// The ICE candidate
        candidate: RTCIceCandidateInit,
        /// Addressee participant id
        target_participant: String,
        /// Originating participant id
        from_participant: String,
    },
}

impl SignalMessage {
    /// Serialize to a JSON frame
    pub fn to_json(&self) -> crate::Result<String> {
        serde_json::to_string(self).map_err(|e| {
            crate::Error::Serialization(format!("Failed to serialize signaling message: {}", e))
        })
    }

    /// Parse from a JSON frame
    pub fn from_json(json: &str) -> crate::Result<Self> {
        serde_json::from_str(json).map_err(|e| {
            crate::Error::Serialization(format!("Failed to deserialize signaling message: {}", e))
        })
    }

    /// Wire name of this message kind
    pub fn kind(&self) -> &'static str {
        match self {
            SignalMessage::JoinMeeting { .. } => "join-meeting",
            SignalMessage::ParticipantsList { .. } => "participants-list",
            SignalMessage::ParticipantJoined { .. } => "participant-joined",
            SignalMessage::ParticipantLeft { .. } => "participant-left",
            SignalMessage::ParticipantUpdate { .. } => "participant-update",
            SignalMessage::Offer { .. } => "offer",
            SignalMessage::Answer { .. } => "answer",
            SignalMessage::IceCandidate { .. } => "ice-candidate",
        }
    }
}
