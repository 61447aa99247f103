//! Session connectivity state machine
//!
//! Tracks overall session connectivity and governs reconnection
//! scheduling. State is published through a watch channel so callers and
//! tests can await transitions.

use crate::config::ReconnectPolicy;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Overall session connectivity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not connected; the initial state and the result of `disconnect()`
    Disconnected,
    /// Socket being established (first connect or a scheduled reconnect)
    Connecting,
    /// Socket open and the join message sent
    Connected,
    /// Reconnection attempts exhausted; terminal until an explicit
    /// `connect()`
    Failed,
}

/// Connection state machine with bounded-backoff reconnection accounting
pub struct ConnectionStateMachine {
    state: watch::Sender<ConnectionState>,
    attempts: AtomicU32,
    policy: ReconnectPolicy,
}

impl ConnectionStateMachine {
    /// Create a state machine in `Disconnected`
    pub fn new(policy: ReconnectPolicy) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            state,
            attempts: AtomicU32::new(0),
            policy,
        }
    }

    /// Current state
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Subscribe to state transitions
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// An explicit `connect()` was requested: reset the attempt counter
    /// and enter `Connecting`. Valid from any state.
    pub fn begin_connect(&self) {
        self.attempts.store(0, Ordering::SeqCst);
        self.transition(ConnectionState::Connecting);
    }

    /// Socket open and join sent: enter `Connected` and reset the
    /// reconnect-attempt counter.
    pub fn connected(&self) {
        self.attempts.store(0, Ordering::SeqCst);
        self.transition(ConnectionState::Connected);
    }

    /// The socket was lost (or a connect attempt failed).
    ///
    /// Returns the backoff delay before the next attempt, or `None` when
    /// attempts are exhausted — in which case the state becomes `Failed`
    /// and stays there until an explicit `connect()`.
    pub fn connection_lost(&self) -> Option<Duration> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;

        if !self.policy.allows_attempt(attempt) {
            warn!(
                "Reconnection attempts exhausted after {} tries",
                attempt - 1
            );
            self.transition(ConnectionState::Failed);
            return None;
        }

        let delay = self.policy.backoff_delay(attempt);
        info!(
            "Scheduling reconnect attempt {}/{} in {:?}",
            attempt, self.policy.max_attempts, delay
        );
        self.transition(ConnectionState::Connecting);
        Some(delay)
    }

    /// An explicit `disconnect()` was requested
    pub fn disconnected(&self) {
        self.attempts.store(0, Ordering::SeqCst);
        self.transition(ConnectionState::Disconnected);
    }

    /// Number of reconnect attempts made since the last successful
    /// connection
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    fn transition(&self, new_state: ConnectionState) {
        self.state.send_if_modified(|state| {
            if *state != new_state {
                debug!("Session state transition: {:?} -> {:?}", state, new_state);
                *state = new_state;
                true
            } else {
                false
            }
        });
    }
}
