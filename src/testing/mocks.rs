//! Mock implementations for testing
//!
//! Provides a mock transport connector and identity exchange so the whole
//! connection lifecycle can run without a broker or an identity service.

use crate::auth::{CredentialError, Credentials, IdentityExchange, IdentityProof};
use crate::clock::Clock;
use crate::signing::SignedConnectionDescriptor;
use crate::transport::{
    ConnectOptions, ConnectionId, LossReason, QoS, SessionEvent, SessionEventKind,
    SessionEventSender, SessionState, Transport, TransportConnector, TransportError,
};
use async_trait::async_trait;
use chrono::{Duration, TimeZone, Utc};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration as StdDuration;

/// One message handed to a mock transport
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedMessage {
    pub connection_id: ConnectionId,
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: QoS,
}

#[derive(Default)]
struct ConnectorState {
    connects: usize,
    fail_connects: usize,
    connect_error: Option<TransportError>,
    fail_publishes: bool,
    fail_subscribes: bool,
    live: BTreeSet<ConnectionId>,
    max_concurrent_live: usize,
    client_ids: Vec<String>,
    subscriptions: Vec<(ConnectionId, String)>,
    published: Vec<PublishedMessage>,
    senders: HashMap<ConnectionId, SessionEventSender>,
    last_connection_id: Option<ConnectionId>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Mock connector; every transport it creates shares one recorded history
#[derive(Default, Clone)]
pub struct MockTransportConnector {
    inner: Arc<Mutex<ConnectorState>>,
}

impl MockTransportConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse the next `n` connection attempts
    pub fn fail_next_connects(&self, n: usize) {
        self.fail_next_connects_with(n, TransportError::Refused("Mock connection refused".into()));
    }

    /// Fail the next `n` connection attempts with `error`
    pub fn fail_next_connects_with(&self, n: usize, error: TransportError) {
        let mut state = lock(&self.inner);
        state.fail_connects = n;
        state.connect_error = Some(error);
    }

    pub fn fail_publishes(&self, fail: bool) {
        lock(&self.inner).fail_publishes = fail;
    }

    pub fn fail_subscribes(&self, fail: bool) {
        lock(&self.inner).fail_subscribes = fail;
    }

    /// Connection attempts so far, failed ones included
    pub fn connect_count(&self) -> usize {
        lock(&self.inner).connects
    }

    /// Transports currently reporting connected
    pub fn live_sessions(&self) -> usize {
        lock(&self.inner).live.len()
    }

    /// Highest number of simultaneously connected transports ever observed
    pub fn max_concurrent_live(&self) -> usize {
        lock(&self.inner).max_concurrent_live
    }

    pub fn client_ids(&self) -> Vec<String> {
        lock(&self.inner).client_ids.clone()
    }

    /// Subscribed topics, in order, across all connections
    pub fn subscriptions(&self) -> Vec<String> {
        lock(&self.inner)
            .subscriptions
            .iter()
            .map(|(_, topic)| topic.clone())
            .collect()
    }

    pub fn published(&self) -> Vec<PublishedMessage> {
        lock(&self.inner).published.clone()
    }

    pub fn published_to(&self, topic: &str) -> usize {
        lock(&self.inner)
            .published
            .iter()
            .filter(|m| m.topic == topic)
            .count()
    }

    pub fn last_connection_id(&self) -> Option<ConnectionId> {
        lock(&self.inner).last_connection_id
    }

    /// Deliver an inbound message on the most recent connection
    pub fn inject_message(&self, topic: &str, payload: &[u8]) -> bool {
        self.send_event(SessionEventKind::Message {
            topic: topic.to_string(),
            payload: payload.to_vec(),
        })
    }

    /// Drop the most recent connection as the broker or network would
    pub fn drop_connection(&self, reason: LossReason) -> bool {
        let mut state = lock(&self.inner);
        let Some(id) = state.last_connection_id else {
            return false;
        };
        if !state.live.remove(&id) {
            return false;
        }
        let Some(sender) = state.senders.get(&id) else {
            return false;
        };
        sender
            .send(SessionEvent {
                connection_id: id,
                kind: SessionEventKind::ConnectionLost(reason),
            })
            .is_ok()
    }

    fn send_event(&self, kind: SessionEventKind) -> bool {
        let state = lock(&self.inner);
        let Some(id) = state.last_connection_id else {
            return false;
        };
        match state.senders.get(&id) {
            Some(sender) => sender
                .send(SessionEvent {
                    connection_id: id,
                    kind,
                })
                .is_ok(),
            None => false,
        }
    }
}

#[async_trait]
impl TransportConnector for MockTransportConnector {
    async fn connect(
        &self,
        _descriptor: &SignedConnectionDescriptor,
        options: &ConnectOptions,
        connection_id: ConnectionId,
        events: SessionEventSender,
    ) -> Result<Box<dyn Transport>, TransportError> {
        let mut state = lock(&self.inner);
        state.connects += 1;
        state.client_ids.push(options.client_id.clone());

        if state.fail_connects > 0 {
            state.fail_connects -= 1;
            return Err(state
                .connect_error
                .clone()
                .unwrap_or_else(|| TransportError::Refused("Mock connection refused".into())));
        }

        state.live.insert(connection_id);
        state.max_concurrent_live = state.max_concurrent_live.max(state.live.len());
        state.senders.insert(connection_id, events);
        state.last_connection_id = Some(connection_id);

        Ok(Box::new(MockTransport {
            connection_id,
            inner: self.inner.clone(),
        }))
    }
}

/// Transport handed out by [`MockTransportConnector`]
pub struct MockTransport {
    connection_id: ConnectionId,
    inner: Arc<Mutex<ConnectorState>>,
}

#[async_trait]
impl Transport for MockTransport {
    fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    async fn subscribe(&self, topic: &str, _qos: QoS) -> Result<(), TransportError> {
        let mut state = lock(&self.inner);
        if !state.live.contains(&self.connection_id) {
            return Err(TransportError::NotConnected);
        }
        if state.fail_subscribes {
            return Err(TransportError::Subscribe {
                topic: topic.to_string(),
                reason: "Mock subscribe failure".to_string(),
            });
        }
        state
            .subscriptions
            .push((self.connection_id, topic.to_string()));
        Ok(())
    }

    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        qos: QoS,
    ) -> Result<(), TransportError> {
        let mut state = lock(&self.inner);
        if !state.live.contains(&self.connection_id) {
            return Err(TransportError::NotConnected);
        }
        if state.fail_publishes {
            return Err(TransportError::Publish {
                topic: topic.to_string(),
                reason: "Mock publish failure".to_string(),
            });
        }
        state.published.push(PublishedMessage {
            connection_id: self.connection_id,
            topic: topic.to_string(),
            payload,
            qos,
        });
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        let mut state = lock(&self.inner);
        state.live.remove(&self.connection_id);
        state.senders.remove(&self.connection_id);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        lock(&self.inner).live.contains(&self.connection_id)
    }

    fn state(&self) -> SessionState {
        if self.is_connected() {
            SessionState::Connected
        } else {
            SessionState::Idle
        }
    }
}

#[derive(Default)]
struct ExchangeState {
    calls: usize,
    forgets: usize,
    last_id_token: Option<String>,
    failures_left: usize,
    failure: Option<CredentialError>,
}

/// Identity exchange issuing numbered credentials valid for a fixed lifetime
pub struct MockIdentityExchange {
    clock: Arc<dyn Clock>,
    lifetime: Duration,
    identity_id: Option<String>,
    state: Mutex<ExchangeState>,
}

impl MockIdentityExchange {
    pub fn new(clock: Arc<dyn Clock>, lifetime: Duration) -> Self {
        Self {
            clock,
            lifetime,
            identity_id: None,
            state: Mutex::new(ExchangeState::default()),
        }
    }

    /// Report `identity_id` on issued credentials
    pub fn with_identity_id(mut self, identity_id: impl Into<String>) -> Self {
        self.identity_id = Some(identity_id.into());
        self
    }

    /// Fail the next `n` exchanges with `error`
    pub fn fail_next(&self, n: usize, error: CredentialError) {
        let mut state = lock(&self.state);
        state.failures_left = n;
        state.failure = Some(error);
    }

    pub fn call_count(&self) -> usize {
        lock(&self.state).calls
    }

    /// Times the broker asked the exchange to forget the identity
    pub fn forget_count(&self) -> usize {
        lock(&self.state).forgets
    }

    pub fn last_id_token(&self) -> Option<String> {
        lock(&self.state).last_id_token.clone()
    }
}

#[async_trait]
impl IdentityExchange for MockIdentityExchange {
    async fn exchange(&self, proof: &IdentityProof) -> Result<Credentials, CredentialError> {
        let mut state = lock(&self.state);
        state.calls += 1;
        state.last_id_token = Some(proof.id_token.clone());

        if state.failures_left > 0 {
            state.failures_left -= 1;
            return Err(state
                .failure
                .clone()
                .unwrap_or_else(|| CredentialError::Exchange("Mock failure".to_string())));
        }

        Ok(Credentials {
            access_key_id: format!("AKIDMOCK{:04}", state.calls),
            secret_access_key: "mock-secret-access-key".to_string(),
            session_token: Some(format!("mock-session-token-{}", state.calls)),
            expires_at: self.clock.now() + self.lifetime,
            identity_id: self.identity_id.clone(),
        })
    }

    fn forget_identity(&self) {
        lock(&self.state).forgets += 1;
    }
}

/// A signed descriptor for the example endpoint, valid for five minutes
pub fn sample_descriptor() -> SignedConnectionDescriptor {
    let issued_at = Utc
        .with_ymd_and_hms(2024, 1, 1, 12, 0, 0)
        .single()
        .unwrap_or_else(Utc::now);
    let host = "example-ats.iot.us-east-1.amazonaws.com".to_string();
    SignedConnectionDescriptor {
        full_url: format!(
            "wss://{host}/mqtt?X-Amz-Algorithm=AWS4-HMAC-SHA256&X-Amz-Signature=00"
        ),
        host,
        path: "/mqtt".to_string(),
        issued_at,
        expires_at: issued_at + Duration::seconds(300),
    }
}

pub fn sample_options() -> ConnectOptions {
    ConnectOptions {
        client_id: "anon-test01".to_string(),
        keep_alive: StdDuration::from_secs(60),
        connect_timeout: StdDuration::from_secs(10),
        clean_session: true,
    }
}
