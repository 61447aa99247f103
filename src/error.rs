//! Error types for meeting sessions

/// Result type alias using the meeting session Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in meeting session operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid configuration parameter
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Signaling protocol error
    #[error("Signaling error: {0}")]
    Signaling(String),

    /// WebSocket transport error
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// Local media acquisition failure (no device or permission denied)
    #[error("Media acquisition failed: {0}")]
    MediaAcquisition(String),

    /// Media track error
    #[error("Media track error: {0}")]
    MediaTrack(String),

    /// No local media has been acquired yet
    #[error("Local media not acquired")]
    MediaNotAcquired,

    /// WebRTC peer connection error
    #[error("Peer connection error: {0}")]
    PeerConnection(String),

    /// Peer not found
    #[error("Peer not found: {0}")]
    PeerNotFound(String),

    /// SDP negotiation error
    #[error("SDP negotiation error: {0}")]
    Sdp(String),

    /// ICE candidate error
    #[error("ICE candidate error: {0}")]
    IceCandidate(String),

    /// Data channel error
    #[error("Data channel error: {0}")]
    DataChannel(String),

    /// Operation timed out
    #[error("Operation timeout: {0}")]
    Timeout(String),

    /// Reconnection attempts exhausted
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Any other error
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Check if this error is retryable (transport-level, may succeed later)
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Signaling(_) | Error::WebSocket(_) | Error::Timeout(_) | Error::Io(_)
        )
    }

    /// Check if this error is fatal to `connect()` (not retried automatically)
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::InvalidConfig(_) | Error::MediaAcquisition(_) | Error::ConnectionFailed(_)
        )
    }
}
