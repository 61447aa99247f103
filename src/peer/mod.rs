//! Peer connection management
//!
//! Handles per-participant connection lifecycle, SDP negotiation, trickle
//! ICE, and chat data channels.

mod connection;
mod manager;

pub use connection::{PeerState, CHAT_CHANNEL_LABEL};
pub use manager::PeerConnectionManager;

pub(crate) use connection::PeerConnection;
