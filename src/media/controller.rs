//! Local media control
//!
//! Owns the local capture state: microphone and camera acquisition,
//! mute/video-off flags, and screen-share track substitution. Track
//! substitution goes through the peer manager's retained RTP senders, so
//! no connection is recreated and no SDP is renegotiated.

use crate::media::source::{CameraConstraints, CaptureTrack, MediaSource};
use crate::peer::PeerConnectionManager;
use crate::session::events::{MediaEvent, SessionEvent};
use crate::{Error, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tokio::time::timeout;
use tracing::{debug, info, warn};
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

/// Local capture state, created by `connect()` and destroyed by
/// `disconnect()`
struct LocalMedia {
    audio: CaptureTrack,
    video: CaptureTrack,
    is_screen_sharing: bool,
}

/// Controls local camera, microphone and screen capture
pub struct MediaController {
    /// Capture device provider
    source: Arc<dyn MediaSource>,

    /// Timeout around each device acquisition
    acquire_timeout: Duration,

    /// Current local capture, if acquired
    local: RwLock<Option<LocalMedia>>,

    /// Event sink for platform-initiated capture termination
    events: mpsc::UnboundedSender<SessionEvent>,
}

impl MediaController {
    /// Create a controller over the given capture source
    pub(crate) fn new(
        source: Arc<dyn MediaSource>,
        acquire_timeout: Duration,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Self {
        Self {
            source,
            acquire_timeout,
            local: RwLock::new(None),
            events,
        }
    }

    /// Acquire microphone and camera capture.
    ///
    /// Fatal to `connect()` on failure; not retried. Each acquisition is
    /// wrapped in a timeout so a stalled device prompt cannot hang the
    /// caller. No-op when media is already acquired.
    pub async fn acquire(&self) -> Result<()> {
        if self.local.read().await.is_some() {
            debug!("Local media already acquired");
            return Ok(());
        }

        info!("Acquiring local media (microphone + camera)");

        let audio = timeout(self.acquire_timeout, self.source.open_microphone())
            .await
            .map_err(|_| Error::Timeout("microphone acquisition timed out".to_string()))??;

        let video = timeout(
            self.acquire_timeout,
            self.source.open_camera(CameraConstraints::default()),
        )
        .await
        .map_err(|_| Error::Timeout("camera acquisition timed out".to_string()))??;

        *self.local.write().await = Some(LocalMedia {
            audio,
            video,
            is_screen_sharing: false,
        });

        Ok(())
    }

    /// Whether local media has been acquired
    pub async fn has_media(&self) -> bool {
        self.local.read().await.is_some()
    }

    /// The currently-captured local tracks (audio, video), if any
    pub(crate) async fn local_tracks(
        &self,
    ) -> Option<(Arc<TrackLocalStaticSample>, Arc<TrackLocalStaticSample>)> {
        self.local
            .read()
            .await
            .as_ref()
            .map(|media| (media.audio.track(), media.video.track()))
    }

    /// The local preview (video) track, if any
    pub async fn preview_track(&self) -> Option<Arc<TrackLocalStaticSample>> {
        self.local.read().await.as_ref().map(|m| m.video.track())
    }

    /// Current mute state (`false` when no media is acquired)
    pub async fn is_muted(&self) -> bool {
        self.local
            .read()
            .await
            .as_ref()
            .map(|m| !m.audio.is_enabled())
            .unwrap_or(false)
    }

    /// Current camera-off state (`false` when no media is acquired)
    pub async fn is_video_off(&self) -> bool {
        self.local
            .read()
            .await
            .as_ref()
            .map(|m| !m.video.is_enabled())
            .unwrap_or(false)
    }

    /// Whether screen sharing is active
    pub async fn is_screen_sharing(&self) -> bool {
        self.local
            .read()
            .await
            .as_ref()
            .map(|m| m.is_screen_sharing)
            .unwrap_or(false)
    }

    /// Flip the audio track's enabled flag. Capture keeps running.
    ///
    /// Returns the new mute state.
    pub async fn toggle_mute(&self) -> Result<bool> {
        let guard = self.local.read().await;
        let media = guard.as_ref().ok_or(Error::MediaNotAcquired)?;

        let enabled = !media.audio.is_enabled();
        media.audio.set_enabled(enabled);

        debug!("Audio track enabled: {}", enabled);
        Ok(!enabled)
    }

    /// Flip the video track's enabled flag. Capture keeps running.
    ///
    /// Returns the new video-off state.
    pub async fn toggle_video(&self) -> Result<bool> {
        let guard = self.local.read().await;
        let media = guard.as_ref().ok_or(Error::MediaNotAcquired)?;

        let enabled = !media.video.is_enabled();
        media.video.set_enabled(enabled);

        debug!("Video track enabled: {}", enabled);
        Ok(!enabled)
    }

    /// Start screen sharing: open display capture, substitute its track
    /// into every open connection, and make it the local preview. The
    /// previous camera capture is stopped.
    ///
    /// Platform-initiated termination of the capture is reported through
    /// the session event loop and handled identically to
    /// `stop_screen_share()`.
    pub(crate) async fn start_screen_share(&self, peers: &PeerConnectionManager) -> Result<()> {
        if self.local.read().await.as_ref().ok_or(Error::MediaNotAcquired)?.is_screen_sharing {
            debug!("Screen share already active");
            return Ok(());
        }

        info!("Starting screen share");

        let mut display = timeout(self.acquire_timeout, self.source.open_display())
            .await
            .map_err(|_| Error::Timeout("display acquisition timed out".to_string()))??;
        let ended = display.take_ended();

        peers.replace_outgoing_video_track(display.track()).await;

        {
            let mut guard = self.local.write().await;
            let media = guard.as_mut().ok_or(Error::MediaNotAcquired)?;

            display.set_enabled(media.video.is_enabled());
            let camera = std::mem::replace(&mut media.video, display);
            camera.stop();
            media.is_screen_sharing = true;
        }

        if let Some(ended) = ended {
            let events = self.events.clone();
            tokio::spawn(async move {
                // Err means the capture was stopped locally and the device
                // dropped the sender without firing it
                if ended.await.is_ok() {
                    info!("Screen capture ended by platform");
                    let _ = events.send(SessionEvent::Media(MediaEvent::ScreenShareEnded));
                }
            });
        } else {
            warn!("Display capture provides no ended signal; platform termination will go unnoticed");
        }

        Ok(())
    }

    /// Stop screen sharing: re-acquire the camera, substitute it back into
    /// every connection and restore it as the local preview.
    pub(crate) async fn stop_screen_share(&self, peers: &PeerConnectionManager) -> Result<()> {
        if !self.local.read().await.as_ref().ok_or(Error::MediaNotAcquired)?.is_screen_sharing {
            debug!("Screen share not active");
            return Ok(());
        }

        info!("Stopping screen share");

        let camera = timeout(
            self.acquire_timeout,
            self.source.open_camera(CameraConstraints::default()),
        )
        .await
        .map_err(|_| Error::Timeout("camera re-acquisition timed out".to_string()))??;

        peers.replace_outgoing_video_track(camera.track()).await;

        let mut guard = self.local.write().await;
        let media = guard.as_mut().ok_or(Error::MediaNotAcquired)?;

        camera.set_enabled(media.video.is_enabled());
        let display = std::mem::replace(&mut media.video, camera);
        display.stop();
        media.is_screen_sharing = false;

        Ok(())
    }

    /// Stop every capture track and release local media. Idempotent.
    pub async fn release(&self) {
        if let Some(media) = self.local.write().await.take() {
            info!("Releasing local media");
            media.audio.stop();
            media.video.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::ChatChannel;
    use crate::config::IceServerConfig;
    use crate::signaling::SignalingChannel;
    use std::sync::atomic::AtomicBool;
    use tokio::sync::oneshot;
    use tokio_util::sync::CancellationToken;
    use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
    use webrtc::track::track_local::TrackLocal;

    /// Deterministic in-memory capture source for tests
    struct FakeMediaSource {
        /// Fires the display capture's ended signal when dropped or sent
        display_ended: std::sync::Mutex<Option<oneshot::Sender<()>>>,
        fail_camera: bool,
    }

    impl FakeMediaSource {
        fn new() -> Self {
            Self {
                display_ended: std::sync::Mutex::new(None),
                fail_camera: false,
            }
        }

        fn failing_camera() -> Self {
            Self {
                display_ended: std::sync::Mutex::new(None),
                fail_camera: true,
            }
        }

        fn end_display_capture(&self) {
            if let Some(tx) = self.display_ended.lock().unwrap().take() {
                let _ = tx.send(());
            }
        }

        fn track(id: &str, mime: &str) -> Arc<TrackLocalStaticSample> {
            Arc::new(TrackLocalStaticSample::new(
                RTCRtpCodecCapability {
                    mime_type: mime.to_string(),
                    ..Default::default()
                },
                id.to_string(),
                "stream-fake".to_string(),
            ))
        }
    }

    #[async_trait::async_trait]
    impl MediaSource for FakeMediaSource {
        async fn open_microphone(&self) -> Result<CaptureTrack> {
            Ok(CaptureTrack::new(
                Self::track("mic-0", "audio/opus"),
                Arc::new(AtomicBool::new(true)),
                CancellationToken::new(),
                None,
            ))
        }

        async fn open_camera(&self, _constraints: CameraConstraints) -> Result<CaptureTrack> {
            if self.fail_camera {
                return Err(Error::MediaAcquisition("permission denied".to_string()));
            }
            Ok(CaptureTrack::new(
                Self::track("camera-0", "video/VP8"),
                Arc::new(AtomicBool::new(true)),
                CancellationToken::new(),
                None,
            ))
        }

        async fn open_display(&self) -> Result<CaptureTrack> {
            let (tx, rx) = oneshot::channel();
            *self.display_ended.lock().unwrap() = Some(tx);
            Ok(CaptureTrack::new(
                Self::track("display-0", "video/VP8"),
                Arc::new(AtomicBool::new(true)),
                CancellationToken::new(),
                Some(rx),
            ))
        }
    }

    fn harness(
        source: Arc<dyn MediaSource>,
    ) -> (
        Arc<MediaController>,
        Arc<PeerConnectionManager>,
        mpsc::UnboundedReceiver<SessionEvent>,
    ) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (signal_tx, _signal_rx) = mpsc::unbounded_channel();
        let signaling = Arc::new(SignalingChannel::new("ws://localhost:1", signal_tx));
        let chat = Arc::new(ChatChannel::new());
        let media = Arc::new(MediaController::new(
            source,
            Duration::from_secs(1),
            events_tx.clone(),
        ));
        let peers = Arc::new(PeerConnectionManager::new(
            "alice".to_string(),
            vec![IceServerConfig::stun("stun:stun.l.google.com:19302")],
            Duration::from_secs(5),
            signaling,
            chat,
            Arc::clone(&media),
            events_tx,
        ));
        (media, peers, events_rx)
    }

    #[tokio::test]
    async fn test_acquire_and_release() {
        let (media, _peers, _rx) = harness(Arc::new(FakeMediaSource::new()));

        assert!(!media.has_media().await);
        media.acquire().await.unwrap();
        assert!(media.has_media().await);
        assert!(media.local_tracks().await.is_some());

        media.release().await;
        assert!(!media.has_media().await);

        // Idempotent
        media.release().await;
    }

    #[tokio::test]
    async fn test_acquire_failure_is_fatal() {
        let (media, _peers, _rx) = harness(Arc::new(FakeMediaSource::failing_camera()));

        let err = media.acquire().await.unwrap_err();
        assert!(matches!(err, Error::MediaAcquisition(_)));
        assert!(err.is_fatal());
        assert!(!media.has_media().await);
    }

    #[tokio::test]
    async fn test_toggle_mute_flips_enabled_without_stopping() {
        let (media, _peers, _rx) = harness(Arc::new(FakeMediaSource::new()));
        media.acquire().await.unwrap();

        assert!(!media.is_muted().await);
        assert!(media.toggle_mute().await.unwrap());
        assert!(media.is_muted().await);

        // Capture is still live: the track is unchanged
        let (audio, _) = media.local_tracks().await.unwrap();
        assert_eq!(audio.id(), "mic-0");

        assert!(!media.toggle_mute().await.unwrap());
        assert!(!media.is_muted().await);
    }

    #[tokio::test]
    async fn test_toggle_video() {
        let (media, _peers, _rx) = harness(Arc::new(FakeMediaSource::new()));
        media.acquire().await.unwrap();

        assert!(media.toggle_video().await.unwrap());
        assert!(media.is_video_off().await);
        assert!(!media.toggle_video().await.unwrap());
    }

    #[tokio::test]
    async fn test_toggle_without_media_fails() {
        let (media, _peers, _rx) = harness(Arc::new(FakeMediaSource::new()));
        assert!(matches!(
            media.toggle_mute().await,
            Err(Error::MediaNotAcquired)
        ));
    }

    #[tokio::test]
    async fn test_screen_share_substitutes_preview() {
        let (media, peers, _rx) = harness(Arc::new(FakeMediaSource::new()));
        media.acquire().await.unwrap();

        media.start_screen_share(&peers).await.unwrap();
        assert!(media.is_screen_sharing().await);
        assert_eq!(media.preview_track().await.unwrap().id(), "display-0");

        media.stop_screen_share(&peers).await.unwrap();
        assert!(!media.is_screen_sharing().await);
        assert_eq!(media.preview_track().await.unwrap().id(), "camera-0");
    }

    #[tokio::test]
    async fn test_platform_ended_screen_share_emits_event() {
        let source = Arc::new(FakeMediaSource::new());
        let (media, peers, mut rx) = harness(source.clone());
        media.acquire().await.unwrap();

        media.start_screen_share(&peers).await.unwrap();
        source.end_display_capture();

        match rx.recv().await {
            Some(SessionEvent::Media(MediaEvent::ScreenShareEnded)) => {}
            other => panic!("Expected ScreenShareEnded, got {:?}", other),
        }

        // The session reacts by stopping the share; preview reverts to the
        // camera without a new connect
        media.stop_screen_share(&peers).await.unwrap();
        assert_eq!(media.preview_track().await.unwrap().id(), "camera-0");
    }

    #[tokio::test]
    async fn test_video_off_carries_across_screen_share() {
        let (media, peers, _rx) = harness(Arc::new(FakeMediaSource::new()));
        media.acquire().await.unwrap();

        media.toggle_video().await.unwrap();
        assert!(media.is_video_off().await);

        media.start_screen_share(&peers).await.unwrap();
        assert!(media.is_video_off().await);

        media.stop_screen_share(&peers).await.unwrap();
        assert!(media.is_video_off().await);
    }
}
