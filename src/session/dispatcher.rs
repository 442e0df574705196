//! Command Dispatcher: operator "call" commands

use crate::clock::Clock;
use crate::protocol::CallCommand;
use crate::transport::{QoS, TransportError, TransportSession};
use std::collections::BTreeSet;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum DispatchError {
    #[error("Not connected")]
    NotConnected,
    #[error("Unknown destination: {0:?}")]
    InvalidDestination(String),
    #[error("Command send failed: {0}")]
    Publish(TransportError),
}

/// `len` lowercase alphanumeric characters drawn from a v4 UUID
pub fn random_suffix(len: usize) -> String {
    Uuid::new_v4().simple().to_string().chars().take(len).collect()
}

pub struct CommandDispatcher {
    topic: String,
    destinations: BTreeSet<String>,
    clock: Arc<dyn Clock>,
    last_issued_ms: i64,
}

impl CommandDispatcher {
    pub fn new(topic: String, destinations: &[String], clock: Arc<dyn Clock>) -> Self {
        Self {
            topic,
            destinations: destinations.iter().cloned().collect(),
            clock,
            last_issued_ms: 0,
        }
    }

    pub fn is_known_destination(&self, destination: &str) -> bool {
        !destination.is_empty() && self.destinations.contains(destination)
    }

    /// `<millis>-<6 random chars>`; the millisecond part never repeats or goes backwards
    fn next_request_id(&mut self, now_ms: i64) -> String {
        let millis = now_ms.max(self.last_issued_ms + 1);
        self.last_issued_ms = millis;
        format!("{millis}-{}", random_suffix(6))
    }

    /// Publish a call command at QoS 1
    ///
    /// Fire-and-forget past the publish: no acknowledgement is tracked and a
    /// failed send is not retried.
    pub async fn issue_call(
        &mut self,
        session: &TransportSession,
        destination: &str,
    ) -> Result<CallCommand, DispatchError> {
        if !session.is_connected() {
            return Err(DispatchError::NotConnected);
        }
        if !self.is_known_destination(destination) {
            return Err(DispatchError::InvalidDestination(destination.to_string()));
        }

        let now_ms = self.clock.now().timestamp_millis();
        let command = CallCommand {
            request_id: self.next_request_id(now_ms),
            destination: destination.to_string(),
            issued_at: now_ms,
        };

        let payload = command.to_payload().map_err(|e| {
            DispatchError::Publish(TransportError::Publish {
                topic: self.topic.clone(),
                reason: e.to_string(),
            })
        })?;

        match session.publish(&self.topic, payload, QoS::AtLeastOnce).await {
            Ok(()) => {
                info!(
                    request_id = %command.request_id,
                    destination = %command.destination,
                    "Call command published"
                );
                Ok(command)
            }
            Err(TransportError::NotConnected) => Err(DispatchError::NotConnected),
            Err(e) => {
                warn!(request_id = %command.request_id, "Call command failed: {}", e);
                Err(DispatchError::Publish(e))
            }
        }
    }
}
