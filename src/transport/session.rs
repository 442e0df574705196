//! Transport Session: owns the single current connection

use super::{
    ConnectOptions, ConnectionId, LossReason, QoS, SessionEventSender, SessionState, Transport,
    TransportConnector, TransportError,
};
use crate::signing::SignedConnectionDescriptor;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// The current connection and its id
pub struct SessionHandle {
    transport: Box<dyn Transport>,
    connection_id: ConnectionId,
}

impl SessionHandle {
    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }
}

/// Holds at most one [`SessionHandle`]
///
/// A new connection is only attempted after the previous handle has been
/// disconnected and dropped, so two sessions are never live at once.
pub struct TransportSession {
    connector: Arc<dyn TransportConnector>,
    events: SessionEventSender,
    current: Option<SessionHandle>,
    state: SessionState,
    next_connection_id: ConnectionId,
}

impl TransportSession {
    pub fn new(connector: Arc<dyn TransportConnector>, events: SessionEventSender) -> Self {
        Self {
            connector,
            events,
            current: None,
            state: SessionState::Idle,
            next_connection_id: 1,
        }
    }

    /// Tear down any current session, then connect a new one
    pub async fn connect(
        &mut self,
        descriptor: &SignedConnectionDescriptor,
        options: &ConnectOptions,
    ) -> Result<ConnectionId, TransportError> {
        self.disconnect().await;

        let connection_id = self.next_connection_id;
        self.next_connection_id += 1;
        self.state = SessionState::Connecting;

        debug!(
            connection_id,
            client_id = %options.client_id,
            host = %descriptor.host,
            "Opening transport session"
        );

        match self
            .connector
            .connect(descriptor, options, connection_id, self.events.clone())
            .await
        {
            Ok(transport) => {
                self.current = Some(SessionHandle {
                    transport,
                    connection_id,
                });
                self.state = SessionState::Connected;
                info!(connection_id, "Transport session connected");
                Ok(connection_id)
            }
            Err(e) => {
                let code = match e {
                    TransportError::Refused(_) => super::LOSS_REFUSED,
                    _ => super::LOSS_SOCKET_CLOSED,
                };
                self.state = SessionState::Lost(LossReason::abnormal(code, e.to_string()));
                warn!(connection_id, "Transport connect failed: {}", e);
                Err(e)
            }
        }
    }

    /// Gracefully close the current session, if any
    pub async fn disconnect(&mut self) {
        let Some(mut handle) = self.current.take() else {
            return;
        };

        self.state = SessionState::Disconnecting;
        if let Err(e) = handle.transport.disconnect().await {
            debug!(
                connection_id = handle.connection_id,
                "Disconnect reported error: {}", e
            );
        }
        self.state = SessionState::Idle;
        info!(connection_id = handle.connection_id, "Transport session closed");
    }

    /// Record that the current session was lost and release it
    ///
    /// Returns false when `connection_id` is not the current session.
    pub async fn mark_lost(&mut self, connection_id: ConnectionId, reason: LossReason) -> bool {
        if !self.is_current(connection_id) {
            return false;
        }

        if let Some(mut handle) = self.current.take() {
            // Stop the client task; the connection itself is already gone.
            if let Err(e) = handle.transport.disconnect().await {
                debug!(connection_id, "Disconnect after loss reported error: {}", e);
            }
        }
        self.state = SessionState::Lost(reason);
        true
    }

    pub async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        qos: QoS,
    ) -> Result<(), TransportError> {
        let handle = self.live_handle()?;
        handle.transport.publish(topic, payload, qos).await
    }

    pub async fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), TransportError> {
        let handle = self.live_handle()?;
        handle.transport.subscribe(topic, qos).await
    }

    fn live_handle(&self) -> Result<&SessionHandle, TransportError> {
        self.current
            .as_ref()
            .filter(|h| h.is_connected())
            .ok_or(TransportError::NotConnected)
    }

    pub fn is_connected(&self) -> bool {
        self.current.as_ref().is_some_and(|h| h.is_connected())
    }

    pub fn is_current(&self, connection_id: ConnectionId) -> bool {
        self.current
            .as_ref()
            .is_some_and(|h| h.connection_id == connection_id)
    }

    pub fn current_connection_id(&self) -> Option<ConnectionId> {
        self.current.as_ref().map(|h| h.connection_id)
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }
}
