//! Connection Orchestrator
//!
//! One task owns every piece of connection state: the credential broker, the
//! transport session, the liveness monitor and the command dispatcher. The
//! outside world talks to it through [`ConsoleHandle`] (an `mpsc` command
//! channel) and observes it through two `watch` channels: [`ConsoleStatus`]
//! and [`DeviceState`].
//!
//! ```text
//! Unauthenticated -> AcquiringCredentials -> Signing -> Connecting -> Subscribing -> Live
//!     Live <-> Degraded                       (soft staleness, shadow resync)
//!     Live -> Reconnecting -> AcquiringCredentials   (hard staleness or abnormal loss)
//!     * -> Terminated                         (operator sign-out)
//! ```

use super::backoff::{ReconnectPolicy, ReconnectionDecision};
use super::dispatcher::{random_suffix, CommandDispatcher};
use super::liveness::{LivenessMonitor, LivenessSignal, Staleness};
use super::state::{ConsoleState, ConsoleStatus, DeviceStateStore, ShadowStatus};
use crate::auth::{CredentialBroker, CredentialError, Credentials, IdentityExchange, IdentityProof};
use crate::clock::Clock;
use crate::config::ConsoleConfig;
use crate::error::ConsoleError;
use crate::protocol::{
    route_message, CallCommand, DeviceState, RoutedMessage, StatusUpdate, TopicKind, TopicSet,
    SHADOW_GET_PAYLOAD,
};
use crate::signing::{RequestSigner, SigningParams};
use crate::transport::{
    ConnectOptions, LossReason, QoS, SessionEvent, SessionEventKind, SessionEventReceiver,
    TransportConnector, TransportError, TransportSession, LOSS_REFUSED,
};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn, Instrument};

const COMMAND_CHANNEL_CAPACITY: usize = 32;

/// Requests from the operator surface
#[derive(Debug)]
pub enum ConsoleCommand {
    Call {
        destination: String,
        reply: oneshot::Sender<Result<CallCommand, ConsoleError>>,
    },
    SignIn {
        proof: IdentityProof,
        reply: oneshot::Sender<()>,
    },
    SignOut {
        reply: oneshot::Sender<()>,
    },
}

/// Cloneable handle to a running orchestrator
#[derive(Clone)]
pub struct ConsoleHandle {
    commands: mpsc::Sender<ConsoleCommand>,
    status: watch::Receiver<ConsoleStatus>,
    device: watch::Receiver<DeviceState>,
}

impl ConsoleHandle {
    pub fn status(&self) -> ConsoleStatus {
        self.status.borrow().clone()
    }

    pub fn device(&self) -> DeviceState {
        self.device.borrow().clone()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<ConsoleStatus> {
        self.status.clone()
    }

    /// Issue a call command and wait for the publish outcome
    pub async fn call(&self, destination: impl Into<String>) -> Result<CallCommand, ConsoleError> {
        let (reply, rx) = oneshot::channel();
        self.send(ConsoleCommand::Call {
            destination: destination.into(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| ConsoleError::Unavailable)?
    }

    pub async fn sign_in(&self, proof: IdentityProof) -> Result<(), ConsoleError> {
        let (reply, rx) = oneshot::channel();
        self.send(ConsoleCommand::SignIn { proof, reply }).await?;
        rx.await.map_err(|_| ConsoleError::Unavailable)
    }

    pub async fn sign_out(&self) -> Result<(), ConsoleError> {
        let (reply, rx) = oneshot::channel();
        self.send(ConsoleCommand::SignOut { reply }).await?;
        rx.await.map_err(|_| ConsoleError::Unavailable)
    }

    async fn send(&self, command: ConsoleCommand) -> Result<(), ConsoleError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| ConsoleError::Unavailable)
    }
}

pub struct ConnectionOrchestrator {
    config: Arc<ConsoleConfig>,
    clock: Arc<dyn Clock>,
    broker: CredentialBroker,
    signer: RequestSigner,
    session: TransportSession,
    liveness: LivenessMonitor,
    dispatcher: CommandDispatcher,
    topics: TopicSet,
    policy: ReconnectPolicy,
    device: DeviceStateStore,
    status_tx: watch::Sender<ConsoleStatus>,
    state: ConsoleState,
    shadow: ShadowStatus,
    reconnect_attempts: u32,
    reconnect_due: Option<DateTime<Utc>>,
    establishing: bool,
    force_refresh_next: bool,
    last_error: Option<String>,
}

impl ConnectionOrchestrator {
    /// Build an orchestrator and the receiver its transport events arrive on
    pub fn new(
        config: Arc<ConsoleConfig>,
        clock: Arc<dyn Clock>,
        exchange: Arc<dyn IdentityExchange>,
        proof: Option<IdentityProof>,
        connector: Arc<dyn TransportConnector>,
    ) -> (Self, SessionEventReceiver) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (status_tx, _) = watch::channel(ConsoleStatus::initial(clock.now()));

        let orchestrator = Self {
            broker: CredentialBroker::new(exchange, clock.clone(), proof, config.refresh_skew()),
            signer: RequestSigner::new(SigningParams::from_iot(&config.iot), clock.clone()),
            session: TransportSession::new(connector, events_tx),
            liveness: LivenessMonitor::from_section(&config.liveness),
            dispatcher: CommandDispatcher::new(
                TopicSet::from_iot(&config.iot).command_call,
                &config.console.destinations,
                clock.clone(),
            ),
            topics: TopicSet::from_iot(&config.iot),
            policy: ReconnectPolicy::from_section(&config.reconnect),
            device: DeviceStateStore::new(),
            status_tx,
            state: ConsoleState::Unauthenticated,
            shadow: ShadowStatus::Unknown,
            reconnect_attempts: 0,
            reconnect_due: None,
            establishing: false,
            force_refresh_next: false,
            last_error: None,
            config,
            clock,
        };
        (orchestrator, events_rx)
    }

    /// Begin connecting if an identity is present
    pub async fn start(&mut self) {
        if self.broker.has_identity() {
            self.establish().await;
        } else {
            info!("No identity proof available; waiting for sign-in");
            self.transition(ConsoleState::Unauthenticated);
        }
    }

    /// Run one full establish flow, unless one is already running
    pub async fn establish(&mut self) {
        if self.establishing {
            debug!("Establish already in progress");
            return;
        }
        self.establishing = true;
        self.reconnect_due = None;

        let span = crate::connection_span!(
            attempt = self.reconnect_attempts,
            thing = %self.config.iot.thing_name
        );
        let result = self.try_establish().instrument(span).await;
        self.establishing = false;

        if let Err(e) = result {
            self.handle_establish_failure(e);
        }
    }

    async fn try_establish(&mut self) -> Result<(), ConsoleError> {
        self.transition(ConsoleState::AcquiringCredentials);
        let credentials = self.acquire_credentials().await?;

        self.transition(ConsoleState::Signing);
        let descriptor = self.signer.sign(&credentials)?;
        debug!(
            amz_date = %descriptor.amz_date(),
            has_session_token = descriptor.has_session_token(),
            "Connection URL signed"
        );

        self.transition(ConsoleState::Connecting);
        let options = self.connect_options(&credentials);
        let connection_id = match self.session.connect(&descriptor, &options).await {
            Ok(id) => id,
            Err(e) => {
                // Only an explicit refusal is attributed to the credentials;
                // network failures retry with the cached set.
                if matches!(e, TransportError::Refused(_)) {
                    self.force_refresh_next = true;
                }
                return Err(e.into());
            }
        };

        self.transition(ConsoleState::Subscribing);
        self.subscribe_all().await;
        self.request_shadow_sync().await;

        self.enter_live();
        info!(connection_id, "Console live");
        Ok(())
    }

    /// Bounded retry around the broker; stops early when re-authentication is required
    async fn acquire_credentials(&mut self) -> Result<Arc<Credentials>, CredentialError> {
        let max_attempts = self.config.identity.max_attempts;
        let retry_delay = Duration::from_millis(self.config.identity.retry_delay_ms);
        let mut attempt = 0;

        loop {
            attempt += 1;
            let result = if self.force_refresh_next {
                self.broker.force_refresh().await
            } else {
                self.broker.obtain().await
            };

            match result {
                Ok(credentials) => {
                    self.force_refresh_next = false;
                    return Ok(credentials);
                }
                Err(e) if e.requires_reauthentication() || attempt >= max_attempts => {
                    error!(attempt, max_attempts, "Credential acquisition failed: {}", e);
                    return Err(e);
                }
                Err(e) => {
                    warn!(attempt, max_attempts, "Credential acquisition failed, retrying: {}", e);
                    if !retry_delay.is_zero() {
                        tokio::time::sleep(retry_delay).await;
                    }
                }
            }
        }
    }

    fn connect_options(&self, credentials: &Credentials) -> ConnectOptions {
        let identity = credentials.identity_id.as_deref().unwrap_or("anon");
        ConnectOptions {
            client_id: format!("{identity}-{}", random_suffix(6)),
            keep_alive: Duration::from_secs(self.config.transport.keep_alive_secs),
            connect_timeout: Duration::from_secs(self.config.transport.connect_timeout_secs),
            clean_session: self.config.transport.clean_session,
        }
    }

    /// Subscribe the fixed topic set; a failed subscription only degrades telemetry
    async fn subscribe_all(&mut self) {
        for topic in self.topics.subscriptions() {
            match self.session.subscribe(&topic, QoS::AtLeastOnce).await {
                Ok(()) => debug!(topic = %topic, "Subscribed"),
                Err(e) => warn!(topic = %topic, "{}", ConsoleError::from(e)),
            }
        }
    }

    /// Publish `{}` on the shadow get topic; fire-and-forget
    async fn request_shadow_sync(&mut self) {
        let topic = &self.topics.shadow_get;
        match self
            .session
            .publish(topic, SHADOW_GET_PAYLOAD.to_vec(), QoS::AtLeastOnce)
            .await
        {
            Ok(()) => debug!(topic = %topic, "Shadow sync requested"),
            Err(e) => warn!(topic = %topic, "Shadow sync request failed: {}", e),
        }
    }

    fn enter_live(&mut self) {
        self.reconnect_attempts = 0;
        self.reconnect_due = None;
        self.last_error = None;
        self.liveness.mark_live(self.clock.now());
        self.transition(ConsoleState::Live);
    }

    fn handle_establish_failure(&mut self, err: ConsoleError) {
        self.record_error(&err);
        match err {
            ConsoleError::Credential(_) => {
                self.transition(ConsoleState::CredentialFailed);
            }
            ConsoleError::Signing(e) => {
                error!("Signing failed with valid inputs: {}", e);
                self.transition(ConsoleState::ConnectFailed);
            }
            other => {
                warn!("Connection attempt failed: {}", other);
                self.schedule_reconnect();
            }
        }
    }

    /// Arm the single reconnect timer
    fn schedule_reconnect(&mut self) {
        if self.reconnect_due.is_some() {
            debug!("Reconnect already scheduled");
            return;
        }

        let shutdown = self.state == ConsoleState::Terminated;
        match self
            .policy
            .should_attempt_reconnection(self.reconnect_attempts, shutdown)
        {
            ReconnectionDecision::Proceed { attempt, delay_ms } => {
                self.reconnect_attempts = attempt;
                self.reconnect_due =
                    Some(self.clock.now() + chrono::Duration::milliseconds(delay_ms as i64));
                info!(attempt, delay_ms, "Reconnect scheduled");
                self.transition(ConsoleState::Reconnecting { attempt, delay_ms });
            }
            ReconnectionDecision::AbortShutdownRequested => {
                debug!("Reconnect skipped after sign-out");
            }
            ReconnectionDecision::AbortMaxAttemptsExceeded => {
                self.transition(ConsoleState::ConnectFailed);
            }
        }
    }

    /// Periodic work: a due reconnect, then liveness evaluation
    pub async fn tick(&mut self) {
        let now = self.clock.now();

        if let Some(due) = self.reconnect_due {
            if now >= due {
                self.establish().await;
            }
            return;
        }

        if !self.state.is_live() {
            return;
        }

        let connected = self.session.is_connected();
        match self.liveness.tick(now, connected) {
            LivenessSignal::NeedsHardReconnect => {
                warn!(
                    last_heartbeat_at = ?self.liveness.last_heartbeat_at(),
                    "Heartbeat past hard threshold, rebuilding session"
                );
                self.session.disconnect().await;
                self.liveness.mark_down();
                self.schedule_reconnect();
            }
            LivenessSignal::NeedsResync => {
                info!("Heartbeat past soft threshold, requesting shadow resync");
                self.transition(ConsoleState::Degraded);
                self.request_shadow_sync().await;
            }
            LivenessSignal::None => self.recover_if_fresh(now, connected),
        }
    }

    fn recover_if_fresh(&mut self, now: DateTime<Utc>, connected: bool) {
        if self.state == ConsoleState::Degraded
            && self.liveness.evaluate(now, connected) == Staleness::Fresh
        {
            self.transition(ConsoleState::Live);
        }
    }

    /// React to an event from the transport; superseded sessions are ignored
    pub async fn handle_session_event(&mut self, event: SessionEvent) {
        let connection_id = event.connection_id;
        if !self.session.is_current(connection_id) {
            debug!(connection_id, "Dropping event from superseded session");
            return;
        }

        match event.kind {
            SessionEventKind::Message { topic, payload } => {
                self.handle_message(&topic, &payload);
            }
            SessionEventKind::ConnectionLost(reason) => {
                self.handle_connection_lost(connection_id, reason).await;
            }
        }
    }

    async fn handle_connection_lost(&mut self, connection_id: u64, reason: LossReason) {
        self.session.mark_lost(connection_id, reason.clone()).await;
        self.liveness.mark_down();

        if reason.is_graceful() {
            info!(connection_id, "Connection closed by broker");
            self.transition(ConsoleState::Disconnected);
            return;
        }

        let err = ConsoleError::TransportLost {
            code: reason.code,
            message: reason.message,
        };
        warn!(connection_id, "{}", err);
        if reason.code == LOSS_REFUSED {
            self.force_refresh_next = true;
        }
        self.record_error(&err);
        self.schedule_reconnect();
    }

    /// Route one inbound message by topic suffix
    pub fn handle_message(&mut self, topic: &str, payload: &[u8]) {
        match route_message(topic, payload) {
            Ok(RoutedMessage::Status { source, update }) => {
                self.apply_status_update(&update, source);
            }
            Ok(RoutedMessage::ShadowRejected(rejection)) => {
                if rejection.is_not_found() {
                    warn!(
                        shadow = %self.config.iot.shadow_name,
                        "Shadow not provisioned: {}", rejection.message
                    );
                    self.shadow = ShadowStatus::NotProvisioned;
                    self.publish_status();
                } else {
                    warn!(
                        code = rejection.code,
                        "Shadow get rejected: {}", rejection.message
                    );
                }
            }
            Err(e) => {
                let err = ConsoleError::message_parse(topic, e.to_string());
                warn!("{}", err);
                self.record_error(&err);
            }
        }
    }

    /// Replace the device state and feed the heartbeat to the liveness monitor
    pub fn apply_status_update(&mut self, update: &StatusUpdate, source: TopicKind) {
        let now = self.clock.now();
        let device = self.device.apply(update, now);
        if let Some(heartbeat_at) = device.last_heartbeat_at {
            self.liveness.record_heartbeat(heartbeat_at);
        }
        debug!(
            state = %device.state,
            heartbeat_at = ?device.last_heartbeat_at,
            ?source,
            "Device state updated"
        );

        if source != TopicKind::DeviceStatus {
            self.shadow = ShadowStatus::Available;
        }

        let connected = self.session.is_connected();
        if self.state == ConsoleState::Degraded
            && self.liveness.evaluate(now, connected) == Staleness::Fresh
        {
            self.transition(ConsoleState::Live);
        } else {
            self.publish_status();
        }
    }

    /// Dispatch an operator call command
    pub async fn issue_call(&mut self, destination: &str) -> Result<CallCommand, ConsoleError> {
        let span = crate::command_span!(command = "call", destination = %destination);
        let dispatcher = &mut self.dispatcher;
        let session = &self.session;
        dispatcher
            .issue_call(session, destination)
            .instrument(span)
            .await
            .map_err(ConsoleError::from)
    }

    /// Re-authenticate and connect
    pub async fn sign_in(&mut self, proof: IdentityProof) {
        info!("Operator signed in");
        self.broker.set_identity(proof);
        self.reconnect_attempts = 0;
        self.reconnect_due = None;
        self.force_refresh_next = false;
        self.last_error = None;
        self.establish().await;
    }

    /// Tear everything down and forget the identity
    pub async fn sign_out(&mut self) {
        info!("Operator signed out");
        self.reconnect_due = None;
        self.session.disconnect().await;
        self.broker.clear();
        self.liveness.reset();
        self.device.reset();
        self.shadow = ShadowStatus::Unknown;
        self.reconnect_attempts = 0;
        self.force_refresh_next = false;
        self.last_error = None;
        self.transition(ConsoleState::Terminated);
    }

    async fn handle_command(&mut self, command: ConsoleCommand) {
        match command {
            ConsoleCommand::Call { destination, reply } => {
                let result = self.issue_call(&destination).await;
                let _ = reply.send(result);
            }
            ConsoleCommand::SignIn { proof, reply } => {
                self.sign_in(proof).await;
                let _ = reply.send(());
            }
            ConsoleCommand::SignOut { reply } => {
                self.sign_out().await;
                let _ = reply.send(());
            }
        }
    }

    fn transition(&mut self, next: ConsoleState) {
        if self.state != next {
            info!(from = %self.state.label(), to = %next.label(), "Console state changed");
            self.state = next;
        }
        self.publish_status();
    }

    /// Keep the failure for the status line if the propagation policy allows it
    fn record_error(&mut self, err: &ConsoleError) {
        if err.is_user_visible() {
            self.last_error = Some(err.operator_message());
        }
    }

    fn publish_status(&self) {
        self.status_tx.send_replace(self.status());
    }

    pub fn status(&self) -> ConsoleStatus {
        ConsoleStatus {
            label: self.state.label(),
            state: self.state.clone(),
            connected: self.session.is_connected(),
            shadow: self.shadow,
            reconnect_attempts: self.reconnect_attempts,
            last_error: self.last_error.clone(),
            liveness: Some(self.liveness.state()),
            updated_at: self.clock.now(),
        }
    }

    pub fn state(&self) -> &ConsoleState {
        &self.state
    }

    pub fn device_state(&self) -> DeviceState {
        self.device.current()
    }

    pub fn shadow_status(&self) -> ShadowStatus {
        self.shadow
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_connected()
    }

    pub fn current_connection_id(&self) -> Option<u64> {
        self.session.current_connection_id()
    }

    pub fn reconnect_due(&self) -> Option<DateTime<Utc>> {
        self.reconnect_due
    }

    pub fn topics(&self) -> &TopicSet {
        &self.topics
    }

    pub fn subscribe_status(&self) -> watch::Receiver<ConsoleStatus> {
        self.status_tx.subscribe()
    }

    pub fn subscribe_device(&self) -> watch::Receiver<DeviceState> {
        self.device.subscribe()
    }

    fn reconnect_wait(&self) -> Option<Duration> {
        self.reconnect_due.map(|due| {
            (due - self.clock.now())
                .to_std()
                .unwrap_or(Duration::ZERO)
        })
    }

    /// Move the orchestrator onto its own task
    pub fn spawn(self, events: SessionEventReceiver) -> (ConsoleHandle, JoinHandle<()>) {
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let handle = ConsoleHandle {
            commands: commands_tx,
            status: self.subscribe_status(),
            device: self.subscribe_device(),
        };
        let task = tokio::spawn(self.run(events, commands_rx));
        (handle, task)
    }

    /// Event loop; returns once every [`ConsoleHandle`] is dropped
    pub async fn run(
        mut self,
        mut events: SessionEventReceiver,
        mut commands: mpsc::Receiver<ConsoleCommand>,
    ) {
        let mut ticker =
            tokio::time::interval(Duration::from_millis(self.config.liveness.tick_interval_ms));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        self.start().await;

        loop {
            let reconnect_wait = self.reconnect_wait();
            tokio::select! {
                Some(event) = events.recv() => self.handle_session_event(event).await,
                _ = ticker.tick() => self.tick().await,
                _ = wait_for(reconnect_wait) => self.tick().await,
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => {
                        info!("All console handles dropped, shutting down");
                        self.sign_out().await;
                        break;
                    }
                },
            }
        }
    }
}

async fn wait_for(delay: Option<Duration>) {
    match delay {
        Some(delay) => tokio::time::sleep(delay).await,
        None => std::future::pending().await,
    }
}
