//! Chat side-channel over peer data channels
//!
//! A logical channel layered on each peer connection's `"chat"` data
//! channel. Outgoing messages fan out to every channel that is already
//! open; incoming payloads from any channel land in a single ordered,
//! append-only log.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;
use webrtc::data_channel::data_channel_state::RTCDataChannelState;
use webrtc::data_channel::RTCDataChannel;

/// One entry in the chat log
#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessage {
    /// Unique message id
    pub id: Uuid,
    /// Sender's participant id
    pub participant_id: String,
    /// Sender's display name
    pub participant_name: String,
    /// Message text
    pub message: String,
    /// Unix timestamp in milliseconds, assigned on append
    pub timestamp_ms: u64,
}

/// Wire payload carried on the data channel
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChatPayload {
    sender_id: String,
    sender_name: String,
    text: String,
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Ordered chat log with data-channel fan-out
pub struct ChatChannel {
    /// Append-only message log; never mutated or reordered after insertion
    log: RwLock<Vec<ChatMessage>>,
}

impl ChatChannel {
    /// Create an empty chat channel
    pub fn new() -> Self {
        Self {
            log: RwLock::new(Vec::new()),
        }
    }

    /// Broadcast a message to every open data channel.
    ///
    /// The message is appended to the local log first, so the sender sees
    /// it without waiting for an echo. Channels not yet in the `Open`
    /// ready-state are skipped, not queued.
    pub async fn broadcast(
        &self,
        sender_id: &str,
        sender_name: &str,
        text: &str,
        channels: &[Arc<RTCDataChannel>],
    ) -> ChatMessage {
        let message = ChatMessage {
            id: Uuid::new_v4(),
            participant_id: sender_id.to_string(),
            participant_name: sender_name.to_string(),
            message: text.to_string(),
            timestamp_ms: now_millis(),
        };
        self.log.write().await.push(message.clone());

        let payload = ChatPayload {
            sender_id: sender_id.to_string(),
            sender_name: sender_name.to_string(),
            text: text.to_string(),
        };
        let json = match serde_json::to_string(&payload) {
            Ok(json) => json,
            Err(e) => {
                warn!("Failed to serialize chat payload: {}", e);
                return message;
            }
        };

        for channel in channels {
            if channel.ready_state() != RTCDataChannelState::Open {
                debug!("Skipping chat channel not yet open");
                continue;
            }
            if let Err(e) = channel.send_text(json.clone()).await {
                warn!("Failed to send chat message: {}", e);
            }
        }

        message
    }

    /// Ingest a raw payload received on any data channel.
    ///
    /// Malformed payloads are dropped with a log line.
    pub(crate) async fn ingest(&self, data: &[u8]) {
        let payload: ChatPayload = match serde_json::from_slice(data) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Dropping malformed chat payload: {}", e);
                return;
            }
        };

        let message = ChatMessage {
            id: Uuid::new_v4(),
            participant_id: payload.sender_id,
            participant_name: payload.sender_name,
            message: payload.text,
            timestamp_ms: now_millis(),
        };
        self.log.write().await.push(message);
    }

    /// The ordered message history
    pub async fn log(&self) -> Vec<ChatMessage> {
        self.log.read().await.clone()
    }

    /// Number of messages in the log
    pub async fn len(&self) -> usize {
        self.log.read().await.len()
    }

    /// Whether the log is empty
    pub async fn is_empty(&self) -> bool {
        self.log.read().await.is_empty()
    }
}

impl Default for ChatChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_broadcast_appends_exactly_one_local_entry() {
        let chat = ChatChannel::new();

        let sent = chat.broadcast("alice", "alice", "hello", &[]).await;

        let log = chat.log().await;
        assert_eq!(log.len(), 1);
        assert_eq!(log[0], sent);
        assert_eq!(log[0].participant_id, "alice");
        assert_eq!(log[0].message, "hello");
    }

    #[tokio::test]
    async fn test_ingest_appends_in_order() {
        let chat = ChatChannel::new();

        let first = serde_json::to_vec(&ChatPayload {
            sender_id: "bob".to_string(),
            sender_name: "bob".to_string(),
            text: "first".to_string(),
        })
        .unwrap();
        let second = serde_json::to_vec(&ChatPayload {
            sender_id: "carol".to_string(),
            sender_name: "carol".to_string(),
            text: "second".to_string(),
        })
        .unwrap();

        chat.ingest(&first).await;
        chat.ingest(&second).await;

        let log = chat.log().await;
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].message, "first");
        assert_eq!(log[1].message, "second");
    }

    #[tokio::test]
    async fn test_malformed_payload_dropped() {
        let chat = ChatChannel::new();

        chat.ingest(b"{not json").await;
        chat.ingest(b"{\"unexpected\":\"shape\"}").await;

        assert!(chat.is_empty().await);
    }

    #[tokio::test]
    async fn test_interleaved_local_and_remote() {
        let chat = ChatChannel::new();

        chat.broadcast("alice", "alice", "hi all", &[]).await;
        chat.ingest(
            &serde_json::to_vec(&ChatPayload {
                sender_id: "bob".to_string(),
                sender_name: "bob".to_string(),
                text: "hi alice".to_string(),
            })
            .unwrap(),
        )
        .await;
        chat.broadcast("alice", "alice", "how are you", &[]).await;

        let log = chat.log().await;
        assert_eq!(log.len(), 3);
        assert_eq!(log[1].participant_id, "bob");
        assert_eq!(log[2].message, "how are you");
    }

    #[test]
    fn test_payload_wire_shape() {
        let payload = ChatPayload {
            sender_id: "alice".to_string(),
            sender_name: "Alice".to_string(),
            text: "hello".to_string(),
        };
        let json = serde_json::to_string(&payload).unwrap();
        assert!(json.contains(r#""senderId":"alice""#));
        assert!(json.contains(r#""senderName":"Alice""#));
    }
}
