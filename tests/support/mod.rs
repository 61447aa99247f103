//! Integration test support
//!
//! Provides a scripted signaling server on a random local port and a
//! deterministic capture source, so session flows can be driven end to end
//! without real devices or a deployed signaling service.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use meetmesh::{CameraConstraints, CaptureTrack, MediaSource};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, Mutex, Notify};
use tokio::time::timeout;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

/// Scripted signaling server
///
/// Accepts connections on a random port, records every frame a client
/// sends, and pushes scripted frames back. `kick_client` drops the live
/// connection so reconnection paths can be exercised.
pub struct SignalingServer {
    /// ws:// URL of the listener
    pub url: String,
    received: Mutex<mpsc::UnboundedReceiver<Value>>,
    client: Arc<std::sync::Mutex<Option<mpsc::UnboundedSender<String>>>>,
    kick: Arc<Notify>,
    connections: Arc<AtomicUsize>,
}

impl SignalingServer {
    /// Bind and start the accept loop
    pub async fn spawn() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind test signaling server");
        let addr = listener.local_addr().expect("no local addr");

        let (received_tx, received_rx) = mpsc::unbounded_channel();
        let client: Arc<std::sync::Mutex<Option<mpsc::UnboundedSender<String>>>> =
            Arc::new(std::sync::Mutex::new(None));
        let kick = Arc::new(Notify::new());
        let connections = Arc::new(AtomicUsize::new(0));

        {
            let received_tx = received_tx.clone();
            let client = Arc::clone(&client);
            let kick = Arc::clone(&kick);
            let connections = Arc::clone(&connections);
            tokio::spawn(async move {
                loop {
                    let Ok((stream, _)) = listener.accept().await else {
                        return;
                    };
                    let Ok(ws) = accept_async(stream).await else {
                        continue;
                    };
                    connections.fetch_add(1, Ordering::SeqCst);

                    let (mut write, mut read) = ws.split();
                    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
                    *client.lock().unwrap() = Some(tx);

                    let received_tx = received_tx.clone();
                    let kick = Arc::clone(&kick);
                    tokio::spawn(async move {
                        loop {
                            tokio::select! {
                                _ = kick.notified() => {
                                    let _ = write.send(Message::Close(None)).await;
                                    return;
                                }
                                out = rx.recv() => {
                                    let Some(out) = out else { return };
                                    if write.send(Message::Text(out)).await.is_err() {
                                        return;
                                    }
                                }
                                frame = read.next() => {
                                    match frame {
                                        Some(Ok(Message::Text(text))) => {
                                            if let Ok(value) = serde_json::from_str(&text) {
                                                let _ = received_tx.send(value);
                                            }
                                        }
                                        Some(Ok(Message::Close(_))) | None | Some(Err(_)) => return,
                                        Some(Ok(_)) => {}
                                    }
                                }
                            }
                        }
                    });
                }
            });
        }

        Self {
            url: format!("ws://{}", addr),
            received: Mutex::new(received_rx),
            client,
            kick,
            connections,
        }
    }

    /// Next frame the client sent, as JSON
    pub async fn recv_frame(&self) -> Value {
        timeout(RECV_TIMEOUT, self.received.lock().await.recv())
            .await
            .expect("timed out waiting for a signaling frame")
            .expect("signaling frame stream ended")
    }

    /// Next frame of the given `type`, skipping others (ICE candidates
    /// trickle at unpredictable points)
    pub async fn recv_frame_of_type(&self, ty: &str) -> Value {
        loop {
            let frame = self.recv_frame().await;
            if frame["type"] == ty {
                return frame;
            }
        }
    }

    /// Push a scripted frame to the connected client
    pub fn send_frame(&self, frame: &Value) {
        let tx = self
            .client
            .lock()
            .unwrap()
            .clone()
            .expect("no client connected");
        tx.send(frame.to_string()).expect("client writer gone");
    }

    /// Drop the live client connection
    pub fn kick_client(&self) {
        self.kick.notify_one();
    }

    /// Number of connections accepted so far
    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

/// Deterministic capture source: inert tracks, no hardware
pub struct FakeMedia;

fn fake_track(id: &str, mime: &str) -> Arc<TrackLocalStaticSample> {
    Arc::new(TrackLocalStaticSample::new(
        RTCRtpCodecCapability {
            mime_type: mime.to_string(),
            ..Default::default()
        },
        id.to_string(),
        "stream-fake".to_string(),
    ))
}

#[async_trait]
impl MediaSource for FakeMedia {
    async fn open_microphone(&self) -> meetmesh::Result<CaptureTrack> {
        Ok(CaptureTrack::new(
            fake_track("mic-0", "audio/opus"),
            Arc::new(AtomicBool::new(true)),
            CancellationToken::new(),
            None,
        ))
    }

    async fn open_camera(&self, _constraints: CameraConstraints) -> meetmesh::Result<CaptureTrack> {
        Ok(CaptureTrack::new(
            fake_track("camera-0", "video/VP8"),
            Arc::new(AtomicBool::new(true)),
            CancellationToken::new(),
            None,
        ))
    }

    async fn open_display(&self) -> meetmesh::Result<CaptureTrack> {
        Ok(CaptureTrack::new(
            fake_track("display-0", "video/VP8"),
            Arc::new(AtomicBool::new(true)),
            CancellationToken::new(),
            None,
        ))
    }
}

/// Capture source whose display capture can be terminated "by the
/// platform", the way the OS-level sharing UI ends a screen share
pub struct ScriptedDisplayMedia {
    display_ended: std::sync::Mutex<Option<tokio::sync::oneshot::Sender<()>>>,
}

impl ScriptedDisplayMedia {
    pub fn new() -> Self {
        Self {
            display_ended: std::sync::Mutex::new(None),
        }
    }

    /// Fire the ended signal of the live display capture
    pub fn end_display_capture(&self) {
        if let Some(tx) = self.display_ended.lock().unwrap().take() {
            let _ = tx.send(());
        }
    }
}

#[async_trait]
impl MediaSource for ScriptedDisplayMedia {
    async fn open_microphone(&self) -> meetmesh::Result<CaptureTrack> {
        FakeMedia.open_microphone().await
    }

    async fn open_camera(&self, constraints: CameraConstraints) -> meetmesh::Result<CaptureTrack> {
        FakeMedia.open_camera(constraints).await
    }

    async fn open_display(&self) -> meetmesh::Result<CaptureTrack> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        *self.display_ended.lock().unwrap() = Some(tx);
        Ok(CaptureTrack::new(
            fake_track("display-0", "video/VP8"),
            Arc::new(AtomicBool::new(true)),
            CancellationToken::new(),
            Some(rx),
        ))
    }
}

/// Participant descriptor in the wire shape
pub fn participant_json(id: &str) -> Value {
    serde_json::json!({
        "id": id,
        "name": id,
        "isHost": false,
        "isMuted": false,
        "isVideoOff": false,
    })
}
