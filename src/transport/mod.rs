//! Transport layer for the console's publish/subscribe session
//!
//! [`Transport`] is one connected client; [`TransportConnector`] creates them
//! from a signed connection descriptor. Both are traits so the orchestrator
//! can run against [`crate::testing::MockTransportConnector`] in tests and
//! against the rumqttc implementation in [`mqtt`] in production.

use crate::signing::SignedConnectionDescriptor;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

pub mod mqtt;
pub mod session;

pub use rumqttc::QoS;
pub use session::{SessionHandle, TransportSession};

/// Identifies one connection attempt; events from superseded ids are dropped
pub type ConnectionId = u64;

/// Loss code for a graceful, client-initiated closure
pub const LOSS_GRACEFUL: i32 = 0;
/// Broker refused the connection (authorization or protocol)
pub const LOSS_REFUSED: i32 = 5;
/// Keep-alive ping was not answered
pub const LOSS_PING_TIMEOUT: i32 = 7;
/// Socket closed or network failure
pub const LOSS_SOCKET_CLOSED: i32 = 8;

/// Why a session ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LossReason {
    pub code: i32,
    pub message: String,
}

impl LossReason {
    pub fn graceful<S: Into<String>>(message: S) -> Self {
        Self {
            code: LOSS_GRACEFUL,
            message: message.into(),
        }
    }

    pub fn abnormal<S: Into<String>>(code: i32, message: S) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn is_graceful(&self) -> bool {
        self.code == LOSS_GRACEFUL
    }
}

/// Transport session lifecycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Connecting,
    Connected,
    Disconnecting,
    Lost(LossReason),
}

/// Event delivered from a live transport to the orchestrator
#[derive(Debug, Clone, PartialEq)]
pub struct SessionEvent {
    pub connection_id: ConnectionId,
    pub kind: SessionEventKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEventKind {
    Message { topic: String, payload: Vec<u8> },
    ConnectionLost(LossReason),
}

pub type SessionEventSender = mpsc::UnboundedSender<SessionEvent>;
pub type SessionEventReceiver = mpsc::UnboundedReceiver<SessionEvent>;

/// Per-attempt connection options
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    pub client_id: String,
    pub keep_alive: Duration,
    pub connect_timeout: Duration,
    pub clean_session: bool,
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    ConnectFailed(String),
    #[error("No connection acknowledgement within {0:?}")]
    ConnectTimeout(Duration),
    #[error("Connection refused: {0}")]
    Refused(String),
    #[error("Invalid connection URL: {0}")]
    InvalidUrl(String),
    #[error("Not connected")]
    NotConnected,
    #[error("Subscribe to {topic} failed: {reason}")]
    Subscribe { topic: String, reason: String },
    #[error("Publish to {topic} failed: {reason}")]
    Publish { topic: String, reason: String },
    #[error("Connection lost (code {code}): {message}")]
    Lost { code: i32, message: String },
}

/// One connected publish/subscribe client
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    fn connection_id(&self) -> ConnectionId;

    async fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), TransportError>;

    async fn publish(&self, topic: &str, payload: Vec<u8>, qos: QoS)
        -> Result<(), TransportError>;

    /// Close the connection; returns once the client has stopped
    async fn disconnect(&mut self) -> Result<(), TransportError>;

    fn is_connected(&self) -> bool;

    fn state(&self) -> SessionState;
}

/// Creates connected transports
///
/// `connect` resolves once the broker has acknowledged the connection, or
/// with an error; network failures never panic. Messages and losses for the
/// new connection are delivered on `events`, tagged with `connection_id`.
#[async_trait::async_trait]
pub trait TransportConnector: Send + Sync {
    async fn connect(
        &self,
        descriptor: &SignedConnectionDescriptor,
        options: &ConnectOptions,
        connection_id: ConnectionId,
        events: SessionEventSender,
    ) -> Result<Box<dyn Transport>, TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loss_reason_classification() {
        assert!(LossReason::graceful("sign-out").is_graceful());
        assert!(!LossReason::abnormal(LOSS_PING_TIMEOUT, "ping").is_graceful());
    }

    #[test]
    fn test_session_state_serializes_tagged() {
        let json = serde_json::to_value(SessionState::Lost(LossReason::abnormal(8, "closed")))
            .unwrap();
        assert_eq!(json["state"], "lost");
        assert_eq!(json["code"], 8);
    }
}
