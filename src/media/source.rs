//! Local capture device abstraction
//!
//! The crate orchestrates media but does not talk to hardware. Capture is
//! supplied by the embedding application through the [`MediaSource`]
//! trait, whose implementations feed samples into the returned track (and
//! are expected to write silence/black while the track is disabled).

use crate::Result;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

/// Camera capture constraints
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CameraConstraints {
    /// Target frame width in pixels
    pub width: u32,
    /// Target frame height in pixels
    pub height: u32,
}

impl Default for CameraConstraints {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
        }
    }
}

/// A live local capture feeding one outgoing track
///
/// Holds the track peers receive, the `enabled` flag mute/video-off flip
/// (capture keeps running; the device writes silence/black while
/// disabled), and the stop signal that ends capture for good.
pub struct CaptureTrack {
    track: Arc<TrackLocalStaticSample>,
    enabled: Arc<AtomicBool>,
    stop: CancellationToken,
    ended: Option<oneshot::Receiver<()>>,
}

impl CaptureTrack {
    /// Wrap a track produced by a capture device.
    ///
    /// `stop` is cancelled to end capture; `ended` fires when the platform
    /// terminates capture on its own (the OS-level screen-share UI).
    pub fn new(
        track: Arc<TrackLocalStaticSample>,
        enabled: Arc<AtomicBool>,
        stop: CancellationToken,
        ended: Option<oneshot::Receiver<()>>,
    ) -> Self {
        Self {
            track,
            enabled,
            stop,
            ended,
        }
    }

    /// The outgoing track fed by this capture
    pub fn track(&self) -> Arc<TrackLocalStaticSample> {
        Arc::clone(&self.track)
    }

    /// Whether the track is currently producing media
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Flip the enabled flag without stopping capture
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    /// Stop capture. Idempotent.
    pub fn stop(&self) {
        self.stop.cancel();
    }

    /// Take the platform-ended signal, if the device provides one
    pub(crate) fn take_ended(&mut self) -> Option<oneshot::Receiver<()>> {
        self.ended.take()
    }
}

impl Drop for CaptureTrack {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

/// Capture device provider implemented by the embedding application
#[async_trait]
pub trait MediaSource: Send + Sync {
    /// Open microphone capture.
    ///
    /// Fails when the platform denies access or lacks the device.
    async fn open_microphone(&self) -> Result<CaptureTrack>;

    /// Open camera capture with the given constraints.
    ///
    /// Fails when the platform denies access or lacks the device.
    async fn open_camera(&self, constraints: CameraConstraints) -> Result<CaptureTrack>;

    /// Open display capture for screen sharing.
    ///
    /// The returned capture should carry an `ended` signal so
    /// platform-initiated termination reaches the session.
    async fn open_display(&self) -> Result<CaptureTrack>;
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;

    /// Capture source producing inert tracks, for tests that need a
    /// controller but never pump samples
    pub(crate) struct NullMediaSource;

    fn track(id: &str, mime: &str) -> Arc<TrackLocalStaticSample> {
        Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: mime.to_string(),
                ..Default::default()
            },
            id.to_string(),
            "stream-null".to_string(),
        ))
    }

    #[async_trait]
    impl MediaSource for NullMediaSource {
        async fn open_microphone(&self) -> crate::Result<CaptureTrack> {
            Ok(CaptureTrack::new(
                track("mic-null", "audio/opus"),
                Arc::new(AtomicBool::new(true)),
                CancellationToken::new(),
                None,
            ))
        }

        async fn open_camera(&self, _constraints: CameraConstraints) -> crate::Result<CaptureTrack> {
            Ok(CaptureTrack::new(
                track("camera-null", "video/VP8"),
                Arc::new(AtomicBool::new(true)),
                CancellationToken::new(),
                None,
            ))
        }

        async fn open_display(&self) -> crate::Result<CaptureTrack> {
            Ok(CaptureTrack::new(
                track("display-null", "video/VP8"),
                Arc::new(AtomicBool::new(true)),
                CancellationToken::new(),
                None,
            ))
        }
    }
}
