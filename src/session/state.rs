//! Published console state: connection status and device state

use super::liveness::LivenessState;
use crate::protocol::{DeviceState, StatusUpdate};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;

/// Connection Orchestrator states
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ConsoleState {
    Unauthenticated,
    AcquiringCredentials,
    Signing,
    Connecting,
    Subscribing,
    Live,
    /// Live, but heartbeats are past the soft threshold and a resync was requested
    Degraded,
    Reconnecting { attempt: u32, delay_ms: u64 },
    /// Terminal until the operator re-authenticates
    CredentialFailed,
    /// Terminal: reconnect attempts exhausted or an unrecoverable signing failure
    ConnectFailed,
    /// Graceful closure not initiated by sign-out; no automatic retry
    Disconnected,
    /// Operator signed out
    Terminated,
}

impl ConsoleState {
    /// Operator-facing status label
    pub fn label(&self) -> String {
        match self {
            ConsoleState::Unauthenticated => "Not signed in".to_string(),
            ConsoleState::AcquiringCredentials => "Acquiring credentials".to_string(),
            ConsoleState::Signing => "Preparing connection".to_string(),
            ConsoleState::Connecting => "Connecting".to_string(),
            ConsoleState::Subscribing => "Subscribing".to_string(),
            ConsoleState::Live => "Connected".to_string(),
            ConsoleState::Degraded => "Connected (resyncing)".to_string(),
            ConsoleState::Reconnecting { delay_ms, .. } => format!(
                "Connection lost (retrying in {}s)",
                delay_ms.div_ceil(1000)
            ),
            ConsoleState::CredentialFailed => "Authorization error".to_string(),
            ConsoleState::ConnectFailed => "Connection failed".to_string(),
            ConsoleState::Disconnected => "Disconnected".to_string(),
            ConsoleState::Terminated => "Signed out".to_string(),
        }
    }

    /// Live or degraded: a session is up and commands may be issued
    pub fn is_live(&self) -> bool {
        matches!(self, ConsoleState::Live | ConsoleState::Degraded)
    }

    /// No automatic progress happens from here without operator action
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ConsoleState::CredentialFailed
                | ConsoleState::ConnectFailed
                | ConsoleState::Disconnected
                | ConsoleState::Terminated
        )
    }
}

/// Whether the named shadow answered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ShadowStatus {
    Unknown,
    Available,
    NotProvisioned,
}

/// Everything the operator surface shows about the connection
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsoleStatus {
    pub state: ConsoleState,
    pub label: String,
    pub connected: bool,
    pub shadow: ShadowStatus,
    pub reconnect_attempts: u32,
    pub last_error: Option<String>,
    pub liveness: Option<LivenessState>,
    pub updated_at: DateTime<Utc>,
}

impl ConsoleStatus {
    pub fn initial(now: DateTime<Utc>) -> Self {
        let state = ConsoleState::Unauthenticated;
        Self {
            label: state.label(),
            state,
            connected: false,
            shadow: ShadowStatus::Unknown,
            reconnect_attempts: 0,
            last_error: None,
            liveness: None,
            updated_at: now,
        }
    }
}

/// Single-writer store for [`DeviceState`]
///
/// Readers hold a `watch::Receiver`; every write replaces the whole value.
pub struct DeviceStateStore {
    tx: watch::Sender<DeviceState>,
}

impl DeviceStateStore {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(DeviceState::default());
        Self { tx }
    }

    /// Apply a status update and return the new state
    pub fn apply(&self, update: &StatusUpdate, now: DateTime<Utc>) -> DeviceState {
        let next = self.tx.borrow().applied(update, now);
        self.tx.send_replace(next.clone());
        next
    }

    pub fn current(&self) -> DeviceState {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<DeviceState> {
        self.tx.subscribe()
    }

    pub fn reset(&self) {
        self.tx.send_replace(DeviceState::default());
    }
}

impl Default for DeviceStateStore {
    fn default() -> Self {
        Self::new()
    }
}
