//! WebSocket signaling channel
//!
//! Owns the persistent socket to the signaling endpoint. Outgoing messages
//! go through an unbounded channel into a writer task; received frames are
//! parsed and forwarded to the session's event loop. The channel itself
//! never schedules reconnects — it reports the loss and the session applies
//! the backoff policy.

use super::protocol::SignalMessage;
use crate::{Error, Result};
use futures_util::{SinkExt, StreamExt};
use std::sync::RwLock;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Events surfaced by the signaling channel to the session event loop
#[derive(Debug)]
pub(crate) enum SignalingEvent {
    /// A protocol message arrived
    Message(SignalMessage),
    /// The socket closed (remote close, error, or EOF)
    Closed,
}

/// Normalize a signaling endpoint into a canonical WebSocket URL.
///
/// `http(s)` schemes map to their WebSocket counterparts; an explicit
/// `ws(s)` scheme passes through; a bare host defaults to `wss://`.
pub fn normalize_signaling_url(raw: &str) -> String {
    let raw = raw.trim().trim_end_matches('/');

    if raw.starts_with("ws://") || raw.starts_with("wss://") {
        raw.to_string()
    } else if let Some(rest) = raw.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if let Some(rest) = raw.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else {
        format!("wss://{}", raw)
    }
}

/// WebSocket signaling channel
pub(crate) struct SignalingChannel {
    /// Normalized signaling URL
    url: String,

    /// Event sink into the session event loop
    events: mpsc::UnboundedSender<SignalingEvent>,

    /// Writer half of the current socket, present while connected
    writer: RwLock<Option<mpsc::UnboundedSender<Message>>>,

    /// Cancels the socket tasks of the current connection
    shutdown: RwLock<Option<CancellationToken>>,
}

impl SignalingChannel {
    /// Create a channel for the given endpoint. The socket is not opened
    /// until `connect()` is called.
    pub fn new(url: &str, events: mpsc::UnboundedSender<SignalingEvent>) -> Self {
        Self {
            url: normalize_signaling_url(url),
            events,
            writer: RwLock::new(None),
            shutdown: RwLock::new(None),
        }
    }

    /// The normalized WebSocket URL this channel connects to
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Open the socket and start the reader/writer tasks.
    ///
    /// Replaces any previous connection's tasks. Fails if the transport
    /// cannot be established.
    pub async fn connect(&self) -> Result<()> {
        info!("Connecting to signaling server: {}", self.url);

        let (ws_stream, _) = connect_async(&self.url)
            .await
            .map_err(|e| Error::WebSocket(format!("Failed to connect: {}", e)))?;

        info!("Connected to signaling server");

        let (write, read) = ws_stream.split();
        let (tx, rx) = mpsc::unbounded_channel();
        let token = CancellationToken::new();

        // Tear down the previous connection's tasks, if any
        self.teardown();

        *self.writer.write().expect("writer lock poisoned") = Some(tx);
        *self.shutdown.write().expect("shutdown lock poisoned") = Some(token.clone());

        tokio::spawn(Self::writer_task(write, rx, token.clone()));
        tokio::spawn(Self::reader_task(read, self.events.clone(), token));

        Ok(())
    }

    /// Serialize and transmit a message if the socket is open.
    ///
    /// Never fails: when the socket is down the message is logged and
    /// dropped, matching the fire-and-forget send model.
    pub fn send(&self, msg: &SignalMessage) {
        let json = match msg.to_json() {
            Ok(json) => json,
            Err(e) => {
                warn!("Dropping unserializable signaling message: {}", e);
                return;
            }
        };

        let guard = self.writer.read().expect("writer lock poisoned");
        match guard.as_ref() {
            Some(tx) => {
                if tx.send(Message::Text(json)).is_err() {
                    debug!("Socket writer gone, dropping {} message", msg.kind());
                }
            }
            None => {
                debug!("Socket not open, dropping {} message", msg.kind());
            }
        }
    }

    /// Close the socket and stop its tasks. Safe to call when already closed.
    pub fn close(&self) {
        self.teardown();
    }

    fn teardown(&self) {
        if let Some(token) = self.shutdown.write().expect("shutdown lock poisoned").take() {
            token.cancel();
        }
        self.writer.write().expect("writer lock poisoned").take();
    }

    /// Writer task: drains the outgoing queue into the socket sink
    async fn writer_task(
        mut write: futures_util::stream::SplitSink<WsStream, Message>,
        mut rx: mpsc::UnboundedReceiver<Message>,
        token: CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    let _ = write.send(Message::Close(None)).await;
                    break;
                }
                msg = rx.recv() => {
                    let Some(msg) = msg else { break };
                    if let Err(e) = write.send(msg).await {
                        warn!("Failed to send signaling frame: {}", e);
                        break;
                    }
                }
            }
        }

        debug!("Signaling writer task terminated");
    }

    /// Reader task: parses incoming frames and forwards protocol messages.
    ///
    /// A frame that fails to parse is logged and discarded; it never stops
    /// processing of subsequent frames.
    async fn reader_task(
        mut read: futures_util::stream::SplitStream<WsStream>,
        events: mpsc::UnboundedSender<SignalingEvent>,
        token: CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    debug!("Signaling reader task cancelled");
                    return;
                }
                frame = read.next() => {
                    match frame {
                        Some(Ok(Message::Text(text))) => {
                            match SignalMessage::from_json(&text) {
                                Ok(msg) => {
                                    debug!("Received signaling message: {}", msg.kind());
                                    if events.send(SignalingEvent::Message(msg)).is_err() {
                                        return;
                                    }
                                }
                                Err(e) => {
                                    warn!("Discarding malformed signaling frame: {}", e);
                                }
                            }
                        }
                        Some(Ok(Message::Close(_))) => {
                            info!("Signaling socket closed by server");
                            break;
                        }
                        Some(Ok(_)) => {
                            // Ping/pong and binary frames carry no protocol messages
                        }
                        Some(Err(e)) => {
                            warn!("Signaling socket error: {}", e);
                            break;
                        }
                        None => {
                            info!("Signaling socket stream ended");
                            break;
                        }
                    }
                }
            }
        }

        let _ = events.send(SignalingEvent::Closed);
        debug!("Signaling reader task terminated");
    }
}
