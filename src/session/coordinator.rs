//! Session orchestration
//!
//! `SessionCoordinator` owns the authoritative roster and the session
//! event loop; `MeetingSession` is the public handle around it. Every
//! signaling message, peer callback and media notification funnels into
//! one mpsc consumed by a single task, so the roster and connection map
//! are mutated from one place only.

use crate::chat::{ChatChannel, ChatMessage};
use crate::config::MeetingConfig;
use crate::media::{MediaController, MediaSource};
use crate::peer::{PeerConnectionManager, PeerState};
use crate::session::events::{MediaEvent, PeerEvent, SessionEvent};
use crate::session::roster::{Participant, RemoteStream};
use crate::session::state::{ConnectionState, ConnectionStateMachine};
use crate::signaling::{ParticipantInfo, SignalMessage, SignalingChannel, SignalingEvent};
use crate::{Error, Result};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;

/// Decide which side of a pair originates the offer.
///
/// Glare tie-break: the lexicographically greater id is always the
/// offerer; the smaller id answers and never offers. Applied identically
/// on the `participants-list` and `participant-joined` paths, so exactly
/// one offer is originated per pair in every ordering.
fn is_offerer(local_id: &str, remote_id: &str) -> bool {
    local_id > remote_id
}

/// The session orchestrator
pub(crate) struct SessionCoordinator {
    config: MeetingConfig,

    /// Local participant id (the display name, which is the stable id on
    /// the wire)
    local_id: String,

    state: ConnectionStateMachine,
    signaling: Arc<SignalingChannel>,
    peers: Arc<PeerConnectionManager>,
    media: Arc<MediaController>,
    chat: Arc<ChatChannel>,

    /// Authoritative participant roster, keyed by id; mutated only from
    /// the event-loop task
    roster: RwLock<HashMap<String, Participant>>,

    /// Cancels a pending reconnect timer (and connect-retry sleeps)
    reconnect_guard: std::sync::Mutex<Option<CancellationToken>>,
}

impl SessionCoordinator {
    fn fresh_reconnect_token(&self) -> CancellationToken {
        let token = CancellationToken::new();
        let mut guard = self.reconnect_guard.lock().expect("reconnect lock poisoned");
        if let Some(previous) = guard.replace(token.clone()) {
            previous.cancel();
        }
        token
    }

    fn cancel_reconnect(&self) {
        if let Some(token) = self
            .reconnect_guard
            .lock()
            .expect("reconnect lock poisoned")
            .take()
        {
            token.cancel();
        }
    }

    async fn local_participant_info(&self) -> ParticipantInfo {
        ParticipantInfo {
            id: self.local_id.clone(),
            name: self.config.display_name.clone(),
            is_host: self.config.is_host,
            is_muted: self.media.is_muted().await,
            is_video_off: self.media.is_video_off().await,
        }
    }

    async fn send_join(&self) {
        let participant = self.local_participant_info().await;
        self.signaling.send(&SignalMessage::JoinMeeting {
            meeting_id: self.config.meeting_id.clone(),
            participant,
        });
    }

    /// Main event dispatch, one event at a time in arrival order
    async fn handle_event(self: Arc<Self>, event: SessionEvent) {
        match event {
            SessionEvent::Signal(SignalingEvent::Message(msg)) => {
                self.handle_signal_message(msg).await;
            }
            SessionEvent::Signal(SignalingEvent::Closed) => {
                Self::handle_socket_closed(&self);
            }
            SessionEvent::Peer(PeerEvent::RemoteTrack {
                participant_id,
                track,
            }) => {
                self.handle_remote_track(&participant_id, track).await;
            }
            SessionEvent::Peer(PeerEvent::StateChanged {
                participant_id,
                state,
            }) => {
                if state == RTCPeerConnectionState::Failed {
                    // Reported, not auto-recovered; the caller may
                    // renegotiate explicitly
                    warn!("Peer connection to {} failed", participant_id);
                }
            }
            SessionEvent::Media(MediaEvent::ScreenShareEnded) => {
                if let Err(e) = self.media.stop_screen_share(&self.peers).await {
                    warn!("Failed to revert to camera after screen share ended: {}", e);
                }
            }
        }
    }

    async fn handle_signal_message(&self, msg: SignalMessage) {
        match msg {
            SignalMessage::ParticipantsList { participants } => {
                debug!("Roster snapshot with {} participants", participants.len());
                for info in participants {
                    if info.id == self.local_id {
                        continue;
                    }
                    let id = info.id.clone();
                    self.add_participant(info).await;
                    if is_offerer(&self.local_id, &id) {
                        self.originate_offer(&id).await;
                    }
                }
            }

            SignalMessage::ParticipantJoined { participant } => {
                if participant.id == self.local_id {
                    return;
                }
                let id = participant.id.clone();
                self.add_participant(participant).await;
                // An offer already in flight for this id means this is a
                // duplicate join event; creating it again would renegotiate
                if is_offerer(&self.local_id, &id) && !self.peers.has_peer(&id).await {
                    self.originate_offer(&id).await;
                }
            }

            SignalMessage::Offer {
                offer,
                target_participant,
                from_participant,
            } => {
                if target_participant != self.local_id {
                    debug!("Ignoring offer addressed to {}", target_participant);
                    return;
                }
                let connection = match self.peers.get_or_create(&from_participant).await {
                    Ok(connection) => connection,
                    Err(e) => {
                        warn!("Failed to create connection for {}: {}", from_participant, e);
                        return;
                    }
                };
                match connection.accept_offer(offer).await {
                    Ok(answer) => {
                        self.signaling.send(&SignalMessage::Answer {
                            answer,
                            target_participant: from_participant,
                            from_participant: self.local_id.clone(),
                        });
                    }
                    Err(e) => warn!("Failed to answer offer from {}: {}", from_participant, e),
                }
            }

            SignalMessage::Answer {
                answer,
                target_participant,
                from_participant,
            } => {
                if target_participant != self.local_id {
                    debug!("Ignoring answer addressed to {}", target_participant);
                    return;
                }
                match self.peers.get(&from_participant).await {
                    Some(connection) => {
                        if let Err(e) = connection.apply_answer(answer).await {
                            warn!("Failed to apply answer from {}: {}", from_participant, e);
                        }
                    }
                    None => warn!(
                        "Answer from {} with no matching connection, ignoring",
                        from_participant
                    ),
                }
            }

            SignalMessage::IceCandidate {
                candidate,
                target_participant,
                from_participant,
            } => {
                if target_participant != self.local_id {
                    debug!("Ignoring candidate addressed to {}", target_participant);
                    return;
                }
                match self.peers.get(&from_participant).await {
                    Some(connection) => {
                        if let Err(e) = connection.add_remote_candidate(candidate).await {
                            warn!("Failed to add candidate from {}: {}", from_participant, e);
                        }
                    }
                    None => warn!(
                        "Discarding ICE candidate from unknown participant {}",
                        from_participant
                    ),
                }
            }

            SignalMessage::ParticipantLeft { participant_id } => {
                info!("Participant left: {}", participant_id);
                self.roster.write().await.remove(&participant_id);
                self.peers.close(&participant_id).await;
            }

            SignalMessage::ParticipantUpdate {
                participant_id,
                is_muted,
                is_video_off,
            } => {
                let mut roster = self.roster.write().await;
                match roster.get_mut(&participant_id) {
                    Some(participant) => {
                        if let Some(muted) = is_muted {
                            participant.is_muted = muted;
                        }
                        if let Some(video_off) = is_video_off {
                            participant.is_video_off = video_off;
                        }
                    }
                    None => debug!("Update for unknown participant {}", participant_id),
                }
            }

            SignalMessage::JoinMeeting { .. } => {
                debug!("Ignoring server-bound join-meeting frame");
            }
        }
    }

    /// Add a participant to the roster if absent. Idempotent.
    async fn add_participant(&self, info: ParticipantInfo) {
        let mut roster = self.roster.write().await;
        if !roster.contains_key(&info.id) {
            info!("Participant joined: {}", info.id);
            roster.insert(info.id.clone(), Participant::from_info(info));
        }
    }

    /// Create/reuse the connection for a participant and send it an offer
    async fn originate_offer(&self, participant_id: &str) {
        let connection = match self.peers.get_or_create(participant_id).await {
            Ok(connection) => connection,
            Err(e) => {
                warn!("Failed to create connection for {}: {}", participant_id, e);
                return;
            }
        };

        match connection.create_offer().await {
            Ok(offer) => {
                self.signaling.send(&SignalMessage::Offer {
                    offer,
                    target_participant: participant_id.to_string(),
                    from_participant: self.local_id.clone(),
                });
            }
            Err(e) => warn!("Failed to create offer for {}: {}", participant_id, e),
        }
    }

    async fn handle_remote_track(
        &self,
        participant_id: &str,
        track: Arc<webrtc::track::track_remote::TrackRemote>,
    ) {
        let mut roster = self.roster.write().await;
        match roster.get_mut(participant_id) {
            Some(participant) => {
                participant
                    .stream
                    .get_or_insert_with(|| Arc::new(RemoteStream::new()))
                    .add_track(track);
            }
            None => warn!(
                "Remote track from {} with no roster entry, ignoring",
                participant_id
            ),
        }
    }

    /// The socket dropped out from under an established session: schedule
    /// a reconnect per the backoff policy.
    fn handle_socket_closed(this: &Arc<Self>) {
        if this.state.state() == ConnectionState::Disconnected {
            // User-initiated teardown; nothing to schedule
            return;
        }

        let Some(mut delay) = this.state.connection_lost() else {
            return; // attempts exhausted, terminal Failed
        };

        let token = this.fresh_reconnect_token();
        let this = Arc::clone(this);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => return,
                    _ = tokio::time::sleep(delay) => {}
                }

                match this.signaling.connect().await {
                    Ok(()) => {
                        this.send_join().await;
                        this.state.connected();
                        return;
                    }
                    Err(e) => {
                        warn!("Reconnect attempt failed: {}", e);
                        match this.state.connection_lost() {
                            Some(next) => delay = next,
                            None => return,
                        }
                    }
                }
            }
        });
    }
}

/// Public handle to one meeting session
///
/// Multiple sessions can coexist in one process; every piece of mutable
/// state is owned by the session instance.
pub struct MeetingSession {
    inner: Arc<SessionCoordinator>,
}

impl MeetingSession {
    /// Create a session from a validated configuration and a capture
    /// source. No I/O happens until `connect()`.
    pub fn new(config: MeetingConfig, source: Arc<dyn MediaSource>) -> Result<Self> {
        config.validate()?;

        let local_id = config.display_name.clone();
        let (events_tx, mut events_rx) = mpsc::unbounded_channel::<SessionEvent>();

        // Signaling events are wrapped into the session event stream
        let (signal_tx, mut signal_rx) = mpsc::unbounded_channel::<SignalingEvent>();
        {
            let events_tx = events_tx.clone();
            tokio::spawn(async move {
                while let Some(event) = signal_rx.recv().await {
                    if events_tx.send(SessionEvent::Signal(event)).is_err() {
                        break;
                    }
                }
            });
        }

        let signaling = Arc::new(SignalingChannel::new(&config.signaling_url, signal_tx));
        let chat = Arc::new(ChatChannel::new());
        let media = Arc::new(MediaController::new(
            source,
            Duration::from_millis(config.media_timeout_ms),
            events_tx.clone(),
        ));
        let peers = Arc::new(PeerConnectionManager::new(
            local_id.clone(),
            config.ice_servers_or_default(),
            Duration::from_millis(config.negotiation_timeout_ms),
            Arc::clone(&signaling),
            Arc::clone(&chat),
            Arc::clone(&media),
            events_tx,
        ));
        let state = ConnectionStateMachine::new(config.reconnect.clone());

        let inner = Arc::new(SessionCoordinator {
            config,
            local_id,
            state,
            signaling,
            peers,
            media,
            chat,
            roster: RwLock::new(HashMap::new()),
            reconnect_guard: std::sync::Mutex::new(None),
        });

        // The event loop holds a weak reference so dropping the last
        // handle lets the session wind down
        let weak = Arc::downgrade(&inner);
        tokio::spawn(async move {
            while let Some(event) = events_rx.recv().await {
                let Some(coordinator) = weak.upgrade() else { break };
                coordinator.handle_event(event).await;
            }
        });

        Ok(Self { inner })
    }

    /// Connect to the meeting: acquire local media, open the signaling
    /// socket (with bounded-backoff retries) and send the join message.
    ///
    /// Media acquisition failure is fatal and returned immediately;
    /// signaling failure is retried per the reconnect policy, and
    /// exhaustion leaves the session in `Failed`.
    pub async fn connect(&self) -> Result<()> {
        let inner = &self.inner;

        match inner.state.state() {
            ConnectionState::Connecting | ConnectionState::Connected => {
                warn!("connect() called while already {:?}", inner.state.state());
                return Ok(());
            }
            _ => {}
        }

        inner.state.begin_connect();
        let token = inner.fresh_reconnect_token();

        if let Err(e) = inner.media.acquire().await {
            inner.state.disconnected();
            return Err(e);
        }

        loop {
            match inner.signaling.connect().await {
                Ok(()) => break,
                Err(e) => {
                    warn!("Signaling connect failed: {}", e);
                    let Some(delay) = inner.state.connection_lost() else {
                        return Err(Error::ConnectionFailed(format!(
                            "signaling connect failed after {} attempts: {}",
                            inner.config.reconnect.max_attempts, e
                        )));
                    };
                    tokio::select! {
                        _ = token.cancelled() => {
                            return Err(Error::ConnectionFailed(
                                "connect cancelled by disconnect()".to_string(),
                            ));
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }

        inner.send_join().await;
        inner.state.connected();
        info!("Joined meeting {}", inner.config.meeting_id);

        Ok(())
    }

    /// Tear the session down: cancel any pending reconnect, close every
    /// peer connection, stop local capture, close the socket. Idempotent.
    pub async fn disconnect(&self) {
        let inner = &self.inner;
        info!("Disconnecting from meeting {}", inner.config.meeting_id);

        inner.cancel_reconnect();
        inner.peers.close_all().await;
        inner.media.release().await;
        inner.signaling.close();

        inner.state.disconnected();
        inner.roster.write().await.clear();
    }

    /// Current session connectivity
    pub fn connection_state(&self) -> ConnectionState {
        self.inner.state.state()
    }

    /// Watch session connectivity transitions
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// Local participant id
    pub fn local_id(&self) -> &str {
        &self.inner.local_id
    }

    /// Snapshot of the current roster
    pub async fn participants(&self) -> Vec<Participant> {
        self.inner.roster.read().await.values().cloned().collect()
    }

    /// One roster entry by id
    pub async fn participant(&self, id: &str) -> Option<Participant> {
        self.inner.roster.read().await.get(id).cloned()
    }

    /// Flip the local mute state and notify peers over signaling.
    ///
    /// Returns the new mute state. The audio track keeps capturing; only
    /// its enabled flag changes, so no renegotiation happens.
    pub async fn toggle_mute(&self) -> Result<bool> {
        let muted = self.inner.media.toggle_mute().await?;
        self.inner.signaling.send(&SignalMessage::ParticipantUpdate {
            participant_id: self.inner.local_id.clone(),
            is_muted: Some(muted),
            is_video_off: None,
        });
        Ok(muted)
    }

    /// Flip the local camera-off state and notify peers over signaling.
    ///
    /// Returns the new video-off state.
    pub async fn toggle_video(&self) -> Result<bool> {
        let video_off = self.inner.media.toggle_video().await?;
        self.inner.signaling.send(&SignalMessage::ParticipantUpdate {
            participant_id: self.inner.local_id.clone(),
            is_muted: None,
            is_video_off: Some(video_off),
        });
        Ok(video_off)
    }

    /// Start screen sharing (display capture replaces the outgoing video
    /// track on every connection)
    pub async fn start_screen_share(&self) -> Result<()> {
        self.inner.media.start_screen_share(&self.inner.peers).await
    }

    /// Stop screen sharing and revert to the camera
    pub async fn stop_screen_share(&self) -> Result<()> {
        self.inner.media.stop_screen_share(&self.inner.peers).await
    }

    /// Whether screen sharing is active
    pub async fn is_screen_sharing(&self) -> bool {
        self.inner.media.is_screen_sharing().await
    }

    /// Current local mute state
    pub async fn is_muted(&self) -> bool {
        self.inner.media.is_muted().await
    }

    /// Current local camera-off state
    pub async fn is_video_off(&self) -> bool {
        self.inner.media.is_video_off().await
    }

    /// Broadcast a chat message to every open channel; the local log gets
    /// the entry immediately
    pub async fn send_chat(&self, text: &str) -> Result<ChatMessage> {
        let channels = self.inner.peers.chat_channels().await;
        Ok(self
            .inner
            .chat
            .broadcast(
                &self.inner.local_id,
                &self.inner.config.display_name,
                text,
                &channels,
            )
            .await)
    }

    /// The ordered chat history
    pub async fn chat_log(&self) -> Vec<ChatMessage> {
        self.inner.chat.log().await
    }

    /// The mirrored state of one peer connection, if it exists
    pub async fn peer_state(&self, participant_id: &str) -> Option<PeerState> {
        self.inner.peers.peer_state(participant_id).await
    }

    /// Originate a fresh offer to one participant.
    ///
    /// A peer connection that reached `Failed` is reported but never
    /// renegotiated automatically; this is the explicit recovery path.
    pub async fn renegotiate(&self, participant_id: &str) -> Result<()> {
        let connection = self
            .inner
            .peers
            .get(participant_id)
            .await
            .ok_or_else(|| Error::PeerNotFound(participant_id.to_string()))?;

        let offer = connection.create_offer().await?;
        self.inner.signaling.send(&SignalMessage::Offer {
            offer,
            target_participant: participant_id.to_string(),
            from_participant: self.inner.local_id.clone(),
        });
        Ok(())
    }
}
