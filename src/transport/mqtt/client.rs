//! Impure I/O for the rumqttc-backed transport
//!
//! Each connection attempt gets its own `AsyncClient` and event-loop task.
//! The task never reconnects by itself: on any error it reports the loss and
//! exits, and the orchestrator decides what happens next.

use super::connection::configure_mqtt_options;
use super::message_handler::{EventRoute, MessageHandler};
use crate::signing::SignedConnectionDescriptor;
use crate::transport::{
    ConnectOptions, ConnectionId, LossReason, QoS, SessionEvent, SessionEventKind,
    SessionEventSender, SessionState, Transport, TransportConnector, TransportError,
    LOSS_REFUSED, LOSS_SOCKET_CLOSED,
};
use async_trait::async_trait;
use rumqttc::{AsyncClient, EventLoop};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

const REQUEST_CHANNEL_CAPACITY: usize = 10;
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);
const DISCONNECT_FLUSH: Duration = Duration::from_millis(500);

/// Creates [`MqttTransport`]s over MQTT-over-WebSocket
#[derive(Debug, Default, Clone)]
pub struct MqttConnector;

impl MqttConnector {
    pub fn new() -> Self {
        Self
    }

    /// Wait for connection confirmation (ConnAck) with timeout
    async fn wait_for_connection_confirmation(
        mut state_rx: watch::Receiver<SessionState>,
        timeout: Duration,
    ) -> Result<(), TransportError> {
        let timeout_result = tokio::time::timeout(timeout, async {
            loop {
                if state_rx.changed().await.is_err() {
                    return Err(TransportError::ConnectFailed(
                        "State channel closed".to_string(),
                    ));
                }
                match *state_rx.borrow() {
                    SessionState::Connected => return Ok(()),
                    SessionState::Lost(ref reason) if reason.code == LOSS_REFUSED => {
                        return Err(TransportError::Refused(reason.message.clone()));
                    }
                    SessionState::Lost(ref reason) => {
                        return Err(TransportError::ConnectFailed(reason.message.clone()));
                    }
                    SessionState::Idle | SessionState::Disconnecting => {
                        return Err(TransportError::ConnectFailed(
                            "Closed before acknowledgement".to_string(),
                        ));
                    }
                    SessionState::Connecting => continue,
                }
            }
        })
        .await;

        match timeout_result {
            Ok(result) => result,
            Err(_) => Err(TransportError::ConnectTimeout(timeout)),
        }
    }
}

#[async_trait]
impl TransportConnector for MqttConnector {
    async fn connect(
        &self,
        descriptor: &SignedConnectionDescriptor,
        options: &ConnectOptions,
        connection_id: ConnectionId,
        events: SessionEventSender,
    ) -> Result<Box<dyn Transport>, TransportError> {
        let mqtt_options = configure_mqtt_options(descriptor, options)?;
        let (client, event_loop) = AsyncClient::new(mqtt_options, REQUEST_CHANNEL_CAPACITY);

        let (state_tx, state_rx) = watch::channel(SessionState::Connecting);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(run_event_loop(
            connection_id,
            event_loop,
            state_tx,
            shutdown_rx,
            events,
        ));

        let mut transport = MqttTransport {
            connection_id,
            client,
            state_rx: state_rx.clone(),
            shutdown_tx,
            event_loop_handle: Some(handle),
        };

        if let Err(e) =
            Self::wait_for_connection_confirmation(state_rx, options.connect_timeout).await
        {
            warn!(connection_id, "MQTT connect failed: {}", e);
            let _ = transport.shutdown_tx.send(true);
            if let Some(handle) = transport.event_loop_handle.take() {
                handle.abort();
            }
            return Err(e);
        }

        info!(connection_id, client_id = %options.client_id, "MQTT connection acknowledged");
        Ok(Box::new(transport))
    }
}

/// Drive one rumqttc event loop until loss or shutdown
async fn run_event_loop(
    connection_id: ConnectionId,
    mut event_loop: EventLoop,
    state_tx: watch::Sender<SessionState>,
    mut shutdown_rx: watch::Receiver<bool>,
    events: SessionEventSender,
) {
    debug!(connection_id, "Starting MQTT event loop");

    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    // Flush the queued DISCONNECT before dropping the socket.
                    let _ = tokio::time::timeout(DISCONNECT_FLUSH, event_loop.poll()).await;
                    let _ = state_tx.send(SessionState::Idle);
                    break;
                }
            }

            result = event_loop.poll() => {
                match result {
                    Ok(event) => match MessageHandler::route_mqtt_event(&event) {
                        EventRoute::ConnectionAcknowledged => {
                            let _ = state_tx.send(SessionState::Connected);
                        }
                        EventRoute::MessageReceived { topic, payload } => {
                            debug!(target: "mqtt_transport", connection_id, "Received message on {}", topic);
                            let _ = events.send(SessionEvent {
                                connection_id,
                                kind: SessionEventKind::Message { topic, payload },
                            });
                        }
                        EventRoute::Disconnected => {
                            let reason = LossReason::abnormal(LOSS_SOCKET_CLOSED, "Broker disconnected");
                            report_loss(connection_id, reason, &state_tx, &events);
                            break;
                        }
                        EventRoute::SubscriptionConfirmed { packet_id, return_codes } => {
                            match MessageHandler::validate_subscription_success(&return_codes) {
                                Ok(()) => debug!(target: "mqtt_transport", connection_id, packet_id, "Subscription confirmed"),
                                Err(e) => warn!(connection_id, packet_id, "{}", e),
                            }
                        }
                        EventRoute::InfrastructureEvent(event_str) => {
                            debug!(target: "mqtt_transport", "MQTT event: {}", event_str);
                        }
                        EventRoute::OutgoingEvent => {}
                    },
                    Err(e) => {
                        let reason = MessageHandler::loss_reason(&e, *shutdown_rx.borrow());
                        if !reason.is_graceful() {
                            error!(connection_id, "MQTT event loop error: {}", e);
                        }
                        report_loss(connection_id, reason, &state_tx, &events);
                        break;
                    }
                }
            }
        }
    }

    debug!(connection_id, "MQTT event loop stopped");
}

fn report_loss(
    connection_id: ConnectionId,
    reason: LossReason,
    state_tx: &watch::Sender<SessionState>,
    events: &SessionEventSender,
) {
    let _ = state_tx.send(SessionState::Lost(reason.clone()));
    let _ = events.send(SessionEvent {
        connection_id,
        kind: SessionEventKind::ConnectionLost(reason),
    });
}

/// A connected rumqttc client
pub struct MqttTransport {
    connection_id: ConnectionId,
    client: AsyncClient,
    state_rx: watch::Receiver<SessionState>,
    shutdown_tx: watch::Sender<bool>,
    event_loop_handle: Option<JoinHandle<()>>,
}

impl MqttTransport {
    fn check_connection_state(&self) -> Result<(), TransportError> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(TransportError::NotConnected)
        }
    }
}

#[async_trait]
impl Transport for MqttTransport {
    fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    async fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), TransportError> {
        self.check_connection_state()?;
        self.client
            .subscribe(topic, qos)
            .await
            .map_err(|e| TransportError::Subscribe {
                topic: topic.to_string(),
                reason: e.to_string(),
            })
    }

    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        qos: QoS,
    ) -> Result<(), TransportError> {
        self.check_connection_state()?;
        self.client
            .publish(topic, qos, false, payload)
            .await
            .map_err(|e| TransportError::Publish {
                topic: topic.to_string(),
                reason: e.to_string(),
            })
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        let queued = self.client.disconnect().await;
        let _ = self.shutdown_tx.send(true);

        if let Some(mut handle) = self.event_loop_handle.take() {
            match tokio::time::timeout(SHUTDOWN_GRACE, &mut handle).await {
                Ok(Ok(())) => debug!(connection_id = self.connection_id, "Event loop task shut down gracefully"),
                Ok(Err(e)) if !e.is_cancelled() => {
                    warn!(connection_id = self.connection_id, "Event loop task ended with error: {}", e);
                }
                Err(_) => {
                    handle.abort();
                    warn!(connection_id = self.connection_id, "Event loop task didn't shut down gracefully, aborted");
                }
                _ => {}
            }
        }

        queued.map_err(|e| TransportError::ConnectFailed(format!("disconnect: {e}")))
    }

    fn is_connected(&self) -> bool {
        matches!(*self.state_rx.borrow(), SessionState::Connected) && !*self.shutdown_tx.borrow()
    }

    fn state(&self) -> SessionState {
        self.state_rx.borrow().clone()
    }
}

impl Drop for MqttTransport {
    fn drop(&mut self) {
        if let Some(handle) = self.event_loop_handle.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_confirmation_on_connack() {
        let (state_tx, state_rx) = watch::channel(SessionState::Connecting);
        let waiter = tokio::spawn(MqttConnector::wait_for_connection_confirmation(
            state_rx,
            Duration::from_secs(1),
        ));

        state_tx.send(SessionState::Connected).unwrap();
        assert_eq!(waiter.await.unwrap(), Ok(()));
    }

    #[tokio::test]
    async fn test_confirmation_maps_refusal() {
        let (state_tx, state_rx) = watch::channel(SessionState::Connecting);
        state_tx
            .send(SessionState::Lost(LossReason::abnormal(LOSS_REFUSED, "not authorized")))
            .unwrap();

        let result =
            MqttConnector::wait_for_connection_confirmation(state_rx, Duration::from_secs(1)).await;
        assert_eq!(result, Err(TransportError::Refused("not authorized".to_string())));
    }

    #[tokio::test]
    async fn test_confirmation_times_out() {
        let (_state_tx, state_rx) = watch::channel(SessionState::Connecting);
        let result =
            MqttConnector::wait_for_connection_confirmation(state_rx, Duration::from_millis(20))
                .await;
        assert_eq!(result, Err(TransportError::ConnectTimeout(Duration::from_millis(20))));
    }
}
