//! Configuration types for meeting sessions

use serde::{Deserialize, Serialize};

/// Default STUN server used when no ICE servers are supplied
pub const DEFAULT_STUN_SERVER: &str = "stun:stun.l.google.com:19302";

/// Main configuration for a meeting session
///
/// Supplied once when the session is created; there is no persisted state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeetingConfig {
    /// Signaling endpoint. Accepts `ws://`, `wss://`, `http://`, `https://`
    /// or a bare host; normalized to a WebSocket URL at connect time.
    pub signaling_url: String,

    /// Meeting identifier to join
    pub meeting_id: String,

    /// Participant display name. Also used as the stable participant id
    /// on the wire.
    pub display_name: String,

    /// Whether this participant is the meeting host
    pub is_host: bool,

    /// ICE servers for peer connections (STUN-only default if empty at
    /// construction via `Default`)
    pub ice_servers: Vec<IceServerConfig>,

    /// Reconnection policy for the signaling socket
    pub reconnect: ReconnectPolicy,

    /// Timeout for local media acquisition in milliseconds (default: 10000ms)
    pub media_timeout_ms: u64,

    /// Timeout for SDP offer/answer creation in milliseconds (default: 10000ms)
    pub negotiation_timeout_ms: u64,
}

/// ICE server configuration (STUN or TURN)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IceServerConfig {
    /// Server URLs (`stun:`, `turn:` or `turns:` form)
    pub urls: Vec<String>,

    /// Username for TURN authentication
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    /// Credential for TURN authentication
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

impl IceServerConfig {
    /// A STUN-only server entry with no credentials
    pub fn stun(url: impl Into<String>) -> Self {
        Self {
            urls: vec![url.into()],
            username: None,
            credential: None,
        }
    }
}

/// Reconnection policy for the signaling socket
///
/// Controls how reconnection attempts are scheduled when the socket is lost.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectPolicy {
    /// Maximum number of reconnection attempts before the session becomes
    /// terminally failed (default: 6)
    pub max_attempts: u32,
    /// Base backoff delay in milliseconds (default: 1000ms)
    pub backoff_base_ms: u64,
    /// Maximum backoff delay in milliseconds (default: 30000ms)
    pub backoff_max_ms: u64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 6,
            backoff_base_ms: 1000,
            backoff_max_ms: 30_000,
        }
    }
}

impl ReconnectPolicy {
    /// Backoff delay for a given attempt number (1-indexed):
    /// `min(backoff_max_ms, backoff_base_ms * 2^attempt)`.
    pub fn backoff_delay(&self, attempt: u32) -> std::time::Duration {
        let exp = self
            .backoff_base_ms
            .checked_mul(1u64.checked_shl(attempt).unwrap_or(u64::MAX))
            .unwrap_or(u64::MAX);
        std::time::Duration::from_millis(exp.min(self.backoff_max_ms))
    }

    /// Check if another attempt is allowed (1-indexed attempt number)
    pub fn allows_attempt(&self, attempt: u32) -> bool {
        attempt <= self.max_attempts
    }
}

impl Default for MeetingConfig {
    fn default() -> Self {
        Self {
            signaling_url: "ws://localhost:8080".to_string(),
            meeting_id: String::new(),
            display_name: String::new(),
            is_host: false,
            ice_servers: vec![IceServerConfig::stun(DEFAULT_STUN_SERVER)],
            reconnect: ReconnectPolicy::default(),
            media_timeout_ms: 10_000,
            negotiation_timeout_ms: 10_000,
        }
    }
}

impl MeetingConfig {
    /// Validate configuration parameters
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `signaling_url` is empty
    /// - `meeting_id` is empty
    /// - `display_name` is empty
    /// - `ice_servers` is empty
    /// - the reconnect policy allows zero attempts
    pub fn validate(&self) -> crate::Result<()> {
        use crate::Error;

        if self.signaling_url.trim().is_empty() {
            return Err(Error::InvalidConfig(
                "signaling_url must not be empty".to_string(),
            ));
        }

        if self.meeting_id.trim().is_empty() {
            return Err(Error::InvalidConfig(
                "meeting_id must not be empty".to_string(),
            ));
        }

        if self.display_name.trim().is_empty() {
            return Err(Error::InvalidConfig(
                "display_name must not be empty".to_string(),
            ));
        }

        if self.reconnect.max_attempts == 0 {
            return Err(Error::InvalidConfig(
                "reconnect.max_attempts must be at least 1".to_string(),
            ));
        }

        Ok(())
    }

    /// The configured ICE servers, or the default STUN-only list when none
    /// were supplied
    pub fn ice_servers_or_default(&self) -> Vec<IceServerConfig> {
        if self.ice_servers.is_empty() {
            vec![IceServerConfig::stun(DEFAULT_STUN_SERVER)]
        } else {
            self.ice_servers.clone()
        }
    }
}
