//! Peer connection map
//!
//! Owns the per-participant connections of the mesh. Creation is
//! idempotent: asking for a participant that already has a connection
//! returns the existing one, which is what keeps the offer and answer
//! paths from ever racing two connections for the same pair.

use super::connection::{PeerConnection, PeerState};
use crate::chat::ChatChannel;
use crate::config::IceServerConfig;
use crate::media::MediaController;
use crate::session::events::SessionEvent;
use crate::signaling::SignalingChannel;
use crate::Result;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};
use webrtc::data_channel::RTCDataChannel;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

/// Manages the mesh of per-participant peer connections
pub struct PeerConnectionManager {
    /// Map of participant id to connection; exactly one entry per id
    peers: RwLock<HashMap<String, Arc<PeerConnection>>>,

    /// Local participant id, used as the `from` of relayed candidates
    local_id: String,

    /// ICE servers for new connections
    ice_servers: Vec<IceServerConfig>,

    /// Timeout around offer/answer creation
    negotiation_timeout: Duration,

    /// Signaling channel candidates are relayed through
    signaling: Arc<SignalingChannel>,

    /// Chat log incoming data-channel payloads land in
    chat: Arc<ChatChannel>,

    /// Source of the currently-captured local tracks
    media: Arc<MediaController>,

    /// Event sink into the session event loop
    events: mpsc::UnboundedSender<SessionEvent>,
}

impl PeerConnectionManager {
    /// Create an empty manager
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        local_id: String,
        ice_servers: Vec<IceServerConfig>,
        negotiation_timeout: Duration,
        signaling: Arc<SignalingChannel>,
        chat: Arc<ChatChannel>,
        media: Arc<MediaController>,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Self {
        Self {
            peers: RwLock::new(HashMap::new()),
            local_id,
            ice_servers,
            negotiation_timeout,
            signaling,
            chat,
            media,
            events,
        }
    }

    /// Get the existing connection for a participant, or create one.
    ///
    /// Idempotent: two calls with the same id return the same connection
    /// instance. New connections get the currently-captured local tracks
    /// attached and the `"chat"` data channel opened.
    pub async fn get_or_create(&self, participant_id: &str) -> Result<Arc<PeerConnection>> {
        if let Some(existing) = self.peers.read().await.get(participant_id) {
            return Ok(Arc::clone(existing));
        }

        let connection = Arc::new(
            PeerConnection::new(
                participant_id.to_string(),
                self.local_id.clone(),
                &self.ice_servers,
                self.negotiation_timeout,
                self.media.local_tracks().await,
                Arc::clone(&self.signaling),
                Arc::clone(&self.chat),
                self.events.clone(),
            )
            .await?,
        );

        let mut peers = self.peers.write().await;
        // A concurrent creation for the same id wins; keep the first entry
        let entry = peers
            .entry(participant_id.to_string())
            .or_insert_with(|| Arc::clone(&connection));
        Ok(Arc::clone(entry))
    }

    /// The existing connection for a participant, if any
    pub async fn get(&self, participant_id: &str) -> Option<Arc<PeerConnection>> {
        self.peers.read().await.get(participant_id).cloned()
    }

    /// Whether a connection exists for a participant
    pub async fn has_peer(&self, participant_id: &str) -> bool {
        self.peers.read().await.contains_key(participant_id)
    }

    /// Close and discard a participant's connection. No-op on unknown ids.
    pub async fn close(&self, participant_id: &str) {
        let removed = self.peers.write().await.remove(participant_id);

        match removed {
            Some(connection) => {
                info!("Removing peer connection for {}", participant_id);
                if let Err(e) = connection.close().await {
                    warn!("Error closing connection for {}: {}", participant_id, e);
                }
            }
            None => debug!("No connection to close for {}", participant_id),
        }
    }

    /// Close every connection and clear the map
    pub async fn close_all(&self) {
        let drained: Vec<_> = self.peers.write().await.drain().collect();

        for (participant_id, connection) in drained {
            debug!("Closing connection for {}", participant_id);
            if let Err(e) = connection.close().await {
                warn!("Error closing connection for {}: {}", participant_id, e);
            }
        }
    }

    /// Substitute the outgoing video track on every open connection.
    ///
    /// Used for screen-share start/stop; connections are not recreated and
    /// no SDP is renegotiated. Per-connection failures are logged, not
    /// propagated, so one bad peer cannot block the substitution.
    pub async fn replace_outgoing_video_track(&self, track: Arc<TrackLocalStaticSample>) {
        let peers: Vec<_> = self.peers.read().await.values().cloned().collect();

        debug!(
            "Replacing outgoing video track on {} connections",
            peers.len()
        );
        for connection in peers {
            if !connection.has_video_sender().await {
                continue;
            }
            if let Err(e) = connection.replace_video_track(Arc::clone(&track)).await {
                warn!(
                    "Failed to replace video track for {}: {}",
                    connection.participant_id(),
                    e
                );
            }
        }
    }

    /// Every chat-capable data channel across all connections
    pub async fn chat_channels(&self) -> Vec<Arc<RTCDataChannel>> {
        let peers: Vec<_> = self.peers.read().await.values().cloned().collect();

        let mut channels = Vec::new();
        for connection in peers {
            channels.extend(connection.chat_channels().await);
        }
        channels
    }

    /// The mirrored state of a participant's connection, if one exists
    pub async fn peer_state(&self, participant_id: &str) -> Option<PeerState> {
        match self.peers.read().await.get(participant_id) {
            Some(connection) => Some(connection.state().await),
            None => None,
        }
    }

    /// Number of live connections
    pub async fn count(&self) -> usize {
        self.peers.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_manager() -> PeerConnectionManager {
        let (events_tx, _events_rx) = mpsc::unbounded_channel();
        let (signal_tx, _signal_rx) = mpsc::unbounded_channel();
        let signaling = Arc::new(SignalingChannel::new("ws://localhost:1", signal_tx));
        let chat = Arc::new(ChatChannel::new());
        let media = Arc::new(MediaController::new(
            Arc::new(crate::media::test_support::NullMediaSource),
            Duration::from_secs(1),
            events_tx.clone(),
        ));

        PeerConnectionManager::new(
            "self".to_string(),
            vec![IceServerConfig::stun("stun:stun.l.google.com:19302")],
            Duration::from_secs(5),
            signaling,
            chat,
            media,
            events_tx,
        )
    }

    #[tokio::test]
    async fn test_get_or_create_is_idempotent() {
        let manager = test_manager();

        let first = manager.get_or_create("bob").await.unwrap();
        let second = manager.get_or_create("bob").await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(manager.count().await, 1);
    }

    #[tokio::test]
    async fn test_get_unknown_is_none() {
        let manager = test_manager();
        assert!(manager.get("nobody").await.is_none());
        assert!(!manager.has_peer("nobody").await);
    }

    #[tokio::test]
    async fn test_close_unknown_is_noop() {
        let manager = test_manager();
        manager.close("nobody").await;
        assert_eq!(manager.count().await, 0);
    }

    #[tokio::test]
    async fn test_close_removes_connection() {
        let manager = test_manager();

        manager.get_or_create("bob").await.unwrap();
        assert_eq!(manager.count().await, 1);

        manager.close("bob").await;
        assert_eq!(manager.count().await, 0);
        assert!(manager.get("bob").await.is_none());
    }

    #[tokio::test]
    async fn test_close_all() {
        let manager = test_manager();

        manager.get_or_create("bob").await.unwrap();
        manager.get_or_create("carol").await.unwrap();
        assert_eq!(manager.count().await, 2);

        manager.close_all().await;
        assert_eq!(manager.count().await, 0);
    }

    #[tokio::test]
    async fn test_chat_channels_cover_all_peers() {
        let manager = test_manager();

        manager.get_or_create("bob").await.unwrap();
        manager.get_or_create("carol").await.unwrap();

        // One outgoing chat channel per connection (no incoming ones yet)
        assert_eq!(manager.chat_channels().await.len(), 2);
    }

    #[tokio::test]
    async fn test_replace_video_track_without_senders_is_noop() {
        let manager = test_manager();
        manager.get_or_create("bob").await.unwrap();

        // No local tracks were attached, so there is no video sender to
        // substitute; the call must still succeed
        let track = Arc::new(TrackLocalStaticSample::new(
            webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability {
                mime_type: "video/VP8".to_string(),
                ..Default::default()
            },
            "video-test".to_string(),
            "stream-test".to_string(),
        ));
        manager.replace_outgoing_video_track(track).await;
    }
}
