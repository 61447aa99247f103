//! Per-participant WebRTC peer connection
//!
//! Wraps one `RTCPeerConnection` together with its outgoing `"chat"` data
//! channel, the retained RTP senders used for screen-share track
//! substitution, and a buffer for ICE candidates that arrive before the
//! remote description is applied.

use crate::chat::ChatChannel;
use crate::config::IceServerConfig;
use crate::session::events::{PeerEvent, SessionEvent};
use crate::signaling::{SignalMessage, SignalingChannel};
use crate::{Error, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::time::timeout;
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

/// Label of the data channel carrying chat
pub const CHAT_CHANNEL_LABEL: &str = "chat";

/// Per-peer connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    /// Initial state, negotiation not yet completed
    New,
    /// Connection negotiation in progress
    Connecting,
    /// Connection established
    Connected,
    /// Connection failed; reported but not auto-renegotiated
    Failed,
    /// Connection closed
    Closed,
}

/// WebRTC peer connection wrapper for one remote participant
pub(crate) struct PeerConnection {
    /// Remote participant id
    participant_id: String,

    /// Unique identifier for this connection instance
    connection_id: String,

    /// Mirrored connection state
    state: Arc<RwLock<PeerState>>,

    /// The underlying WebRTC peer connection
    pc: Arc<RTCPeerConnection>,

    /// Outgoing chat data channel, created at connection setup
    chat_out: Arc<RTCDataChannel>,

    /// Remote-initiated chat data channel, if one arrived
    chat_in: Arc<RwLock<Option<Arc<RTCDataChannel>>>>,

    /// Audio RTP sender (retained to prevent track cleanup)
    audio_sender: RwLock<Option<Arc<RTCRtpSender>>>,

    /// Video RTP sender, used for screen-share track substitution
    video_sender: RwLock<Option<Arc<RTCRtpSender>>>,

    /// ICE candidates that arrived before the remote description
    pending_candidates: Mutex<Vec<RTCIceCandidateInit>>,

    /// Whether a remote description has been applied
    has_remote_description: AtomicBool,

    /// Timeout around offer/answer creation
    negotiation_timeout: Duration,
}

impl PeerConnection {
    /// Create a connection to one remote participant.
    ///
    /// Attaches the currently-captured local tracks, opens the outgoing
    /// `"chat"` data channel, and registers the remote-track, data-channel,
    /// trickle-ICE and state-change handlers.
    pub async fn new(
        participant_id: String,
        local_id: String,
        ice_servers: &[IceServerConfig],
        negotiation_timeout: Duration,
        local_tracks: Option<(Arc<TrackLocalStaticSample>, Arc<TrackLocalStaticSample>)>,
        signaling: Arc<SignalingChannel>,
        chat: Arc<ChatChannel>,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Result<Self> {
        let connection_id = uuid::Uuid::new_v4().to_string();

        info!(
            "Creating peer connection: participant_id={}, connection_id={}",
            participant_id, connection_id
        );

        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| Error::PeerConnection(format!("Failed to register codecs: {}", e)))?;

        let interceptor_registry =
            register_default_interceptors(Default::default(), &mut media_engine).map_err(|e| {
                Error::PeerConnection(format!("Failed to register interceptors: {}", e))
            })?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(interceptor_registry)
            .build();

        let rtc_config = RTCConfiguration {
            ice_servers: ice_servers
                .iter()
                .map(|server| RTCIceServer {
                    urls: server.urls.clone(),
                    username: server.username.clone().unwrap_or_default(),
                    credential: server.credential.clone().unwrap_or_default(),
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        };

        let pc = Arc::new(api.new_peer_connection(rtc_config).await.map_err(|e| {
            Error::PeerConnection(format!("Failed to create peer connection: {}", e))
        })?);

        // Attach whatever is currently captured locally
        let mut audio_sender = None;
        let mut video_sender = None;
        if let Some((audio, video)) = local_tracks {
            audio_sender = Some(
                pc.add_track(audio as Arc<dyn TrackLocal + Send + Sync>)
                    .await
                    .map_err(|e| Error::MediaTrack(format!("Failed to add audio track: {}", e)))?,
            );
            video_sender = Some(
                pc.add_track(video as Arc<dyn TrackLocal + Send + Sync>)
                    .await
                    .map_err(|e| Error::MediaTrack(format!("Failed to add video track: {}", e)))?,
            );
        }

        // Outgoing chat channel; the remote side mirrors one back through
        // on_data_channel
        let chat_out = pc
            .create_data_channel(CHAT_CHANNEL_LABEL, None)
            .await
            .map_err(|e| Error::DataChannel(format!("Failed to create chat channel: {}", e)))?;
        Self::attach_chat_handlers(&chat_out, Arc::clone(&chat));

        let chat_in: Arc<RwLock<Option<Arc<RTCDataChannel>>>> = Arc::new(RwLock::new(None));
        {
            let chat = Arc::clone(&chat);
            let chat_in = Arc::clone(&chat_in);
            let participant = participant_id.clone();
            pc.on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
                let chat = Arc::clone(&chat);
                let chat_in = Arc::clone(&chat_in);
                let participant = participant.clone();
                Box::pin(async move {
                    if dc.label() != CHAT_CHANNEL_LABEL {
                        debug!(
                            "Ignoring unexpected data channel '{}' from {}",
                            dc.label(),
                            participant
                        );
                        return;
                    }
                    debug!("Incoming chat channel from {}", participant);
                    Self::attach_chat_handlers(&dc, chat);
                    *chat_in.write().await = Some(dc);
                })
            }));
        }

        // Trickle ICE: forward each local candidate through signaling,
        // addressed to this participant
        {
            let signaling = Arc::clone(&signaling);
            let target = participant_id.clone();
            let from = local_id.clone();
            pc.on_ice_candidate(Box::new(move |candidate| {
                let signaling = Arc::clone(&signaling);
                let target = target.clone();
                let from = from.clone();
                Box::pin(async move {
                    let Some(candidate) = candidate else { return };
                    match candidate.to_json() {
                        Ok(init) => {
                            signaling.send(&SignalMessage::IceCandidate {
                                candidate: init,
                                target_participant: target,
                                from_participant: from,
                            });
                        }
                        Err(e) => warn!("Failed to serialize local ICE candidate: {}", e),
                    }
                })
            }));
        }

        // Remote track arrival is published onto the participant roster by
        // the coordinator
        {
            let events = events.clone();
            let participant = participant_id.clone();
            pc.on_track(Box::new(move |track, _receiver, _transceiver| {
                let events = events.clone();
                let participant = participant.clone();
                Box::pin(async move {
                    debug!(
                        "Remote {} track arrived from {}",
                        track.kind(),
                        participant
                    );
                    let _ = events.send(SessionEvent::Peer(PeerEvent::RemoteTrack {
                        participant_id: participant,
                        track,
                    }));
                })
            }));
        }

        let state = Arc::new(RwLock::new(PeerState::New));
        {
            let state = Arc::clone(&state);
            let events = events.clone();
            let participant = participant_id.clone();
            pc.on_peer_connection_state_change(Box::new(move |s: RTCPeerConnectionState| {
                let state = Arc::clone(&state);
                let events = events.clone();
                let participant = participant.clone();
                Box::pin(async move {
                    let new_state = match s {
                        RTCPeerConnectionState::New => PeerState::New,
                        RTCPeerConnectionState::Connecting => PeerState::Connecting,
                        RTCPeerConnectionState::Connected => PeerState::Connected,
                        RTCPeerConnectionState::Failed => PeerState::Failed,
                        RTCPeerConnectionState::Disconnected | RTCPeerConnectionState::Closed => {
                            PeerState::Closed
                        }
                        _ => return,
                    };

                    let mut guard = state.write().await;
                    if *guard != new_state {
                        debug!(
                            "Peer {} state transition: {:?} -> {:?}",
                            participant, *guard, new_state
                        );
                        *guard = new_state;
                    }
                    drop(guard);

                    let _ = events.send(SessionEvent::Peer(PeerEvent::StateChanged {
                        participant_id: participant,
                        state: s,
                    }));
                })
            }));
        }

        Ok(Self {
            participant_id,
            connection_id,
            state,
            pc,
            chat_out,
            chat_in,
            audio_sender: RwLock::new(audio_sender),
            video_sender: RwLock::new(video_sender),
            pending_candidates: Mutex::new(Vec::new()),
            has_remote_description: AtomicBool::new(false),
            negotiation_timeout,
        })
    }

    fn attach_chat_handlers(dc: &Arc<RTCDataChannel>, chat: Arc<ChatChannel>) {
        let label = dc.label().to_string();
        dc.on_open(Box::new(move || {
            debug!("Data channel '{}' open", label);
            Box::pin(async {})
        }));

        dc.on_message(Box::new(move |msg: DataChannelMessage| {
            let chat = Arc::clone(&chat);
            Box::pin(async move {
                chat.ingest(&msg.data).await;
            })
        }));
    }

    /// Remote participant id
    pub fn participant_id(&self) -> &str {
        &self.participant_id
    }

    /// Unique id of this connection instance
    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    /// Mirrored connection state
    pub async fn state(&self) -> PeerState {
        *self.state.read().await
    }

    /// Create an SDP offer and apply it as the local description.
    ///
    /// Returns the offer to be relayed through signaling; ICE candidates
    /// trickle separately.
    pub async fn create_offer(&self) -> Result<RTCSessionDescription> {
        let offer = timeout(self.negotiation_timeout, self.pc.create_offer(None))
            .await
            .map_err(|_| Error::Timeout("offer creation timed out".to_string()))?
            .map_err(|e| Error::Sdp(format!("Failed to create offer: {}", e)))?;

        self.pc
            .set_local_description(offer)
            .await
            .map_err(|e| Error::Sdp(format!("Failed to set local description: {}", e)))?;

        let local = self
            .pc
            .local_description()
            .await
            .ok_or_else(|| Error::Sdp("No local description after setting offer".to_string()))?;

        debug!("Created SDP offer for {}", self.participant_id);
        Ok(local)
    }

    /// Apply a remote offer and produce the answer, applied as the local
    /// description. Flushes any ICE candidates buffered before the offer
    /// arrived.
    pub async fn accept_offer(
        &self,
        offer: RTCSessionDescription,
    ) -> Result<RTCSessionDescription> {
        self.pc
            .set_remote_description(offer)
            .await
            .map_err(|e| Error::Sdp(format!("Failed to set remote description: {}", e)))?;
        self.has_remote_description.store(true, Ordering::SeqCst);
        self.flush_pending_candidates().await;

        let answer = timeout(self.negotiation_timeout, self.pc.create_answer(None))
            .await
            .map_err(|_| Error::Timeout("answer creation timed out".to_string()))?
            .map_err(|e| Error::Sdp(format!("Failed to create answer: {}", e)))?;

        self.pc
            .set_local_description(answer)
            .await
            .map_err(|e| Error::Sdp(format!("Failed to set local description: {}", e)))?;

        let local = self
            .pc
            .local_description()
            .await
            .ok_or_else(|| Error::Sdp("No local description after setting answer".to_string()))?;

        debug!("Created SDP answer for {}", self.participant_id);
        Ok(local)
    }

    /// Apply a remote answer to an offer this side originated. Flushes any
    /// buffered ICE candidates.
    pub async fn apply_answer(&self, answer: RTCSessionDescription) -> Result<()> {
        self.pc
            .set_remote_description(answer)
            .await
            .map_err(|e| Error::Sdp(format!("Failed to set remote description: {}", e)))?;
        self.has_remote_description.store(true, Ordering::SeqCst);
        self.flush_pending_candidates().await;

        debug!("Applied SDP answer from {}", self.participant_id);
        Ok(())
    }

    /// Add a remote ICE candidate.
    ///
    /// Candidates arriving before the remote description are buffered and
    /// flushed once `accept_offer`/`apply_answer` succeeds.
    pub async fn add_remote_candidate(&self, candidate: RTCIceCandidateInit) -> Result<()> {
        if !self.has_remote_description.load(Ordering::SeqCst) {
            debug!(
                "Buffering early ICE candidate from {}",
                self.participant_id
            );
            self.pending_candidates.lock().await.push(candidate);
            return Ok(());
        }

        self.pc
            .add_ice_candidate(candidate)
            .await
            .map_err(|e| Error::IceCandidate(format!("Failed to add ICE candidate: {}", e)))
    }

    /// Number of ICE candidates buffered for the remote description
    pub async fn pending_candidate_count(&self) -> usize {
        self.pending_candidates.lock().await.len()
    }

    async fn flush_pending_candidates(&self) {
        let pending: Vec<_> = self.pending_candidates.lock().await.drain(..).collect();
        if pending.is_empty() {
            return;
        }

        debug!(
            "Flushing {} buffered ICE candidates for {}",
            pending.len(),
            self.participant_id
        );
        for candidate in pending {
            if let Err(e) = self.pc.add_ice_candidate(candidate).await {
                warn!(
                    "Failed to apply buffered ICE candidate for {}: {}",
                    self.participant_id, e
                );
            }
        }
    }

    /// Substitute the outgoing video track without renegotiating
    pub async fn replace_video_track(&self, track: Arc<TrackLocalStaticSample>) -> Result<()> {
        let guard = self.video_sender.read().await;
        let sender = guard.as_ref().ok_or_else(|| {
            Error::MediaTrack("No outgoing video sender on this connection".to_string())
        })?;

        sender
            .replace_track(Some(track as Arc<dyn TrackLocal + Send + Sync>))
            .await
            .map_err(|e| Error::MediaTrack(format!("Failed to replace video track: {}", e)))
    }

    /// Whether this connection carries an outgoing video sender
    pub async fn has_video_sender(&self) -> bool {
        self.video_sender.read().await.is_some()
    }

    /// Whether this connection carries an outgoing audio sender
    pub async fn has_audio_sender(&self) -> bool {
        self.audio_sender.read().await.is_some()
    }

    /// Every chat-capable data channel on this connection (outgoing plus
    /// the remote-initiated one, once it arrives)
    pub async fn chat_channels(&self) -> Vec<Arc<RTCDataChannel>> {
        let mut channels = vec![Arc::clone(&self.chat_out)];
        if let Some(incoming) = self.chat_in.read().await.as_ref() {
            channels.push(Arc::clone(incoming));
        }
        channels
    }

    /// Close the underlying connection
    pub async fn close(&self) -> Result<()> {
        info!("Closing peer connection for {}", self.participant_id);

        *self.state.write().await = PeerState::Closed;
        self.pc
            .close()
            .await
            .map_err(|e| Error::PeerConnection(format!("Failed to close connection: {}", e)))
    }
}
