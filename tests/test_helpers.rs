//! Test helpers and utilities for integration tests

use amr_console::auth::IdentityProof;
use amr_console::clock::ManualClock;
use amr_console::config::ConsoleConfig;
use amr_console::session::ConnectionOrchestrator;
use amr_console::testing::{MockIdentityExchange, MockTransportConnector};
use amr_console::transport::SessionEventReceiver;
use chrono::{Duration, TimeZone, Utc};
use std::sync::Arc;

pub const TEST_CONFIG_TOML: &str = r#"
[iot]
region = "us-east-1"
endpoint = "example-ats.iot.us-east-1.amazonaws.com"
thing_name = "AMR-001"
shadow_name = "robot"

[identity]
identity_pool_id = "us-east-1:00000000-0000-0000-0000-000000000000"
user_pool_id = "us-east-1_TESTPOOL"
retry_delay_ms = 0

[console]
destinations = ["A-01", "B-02", "C-03"]
"#;

/// Create a test configuration for integration tests
#[allow(dead_code)]
pub fn test_config() -> ConsoleConfig {
    ConsoleConfig::from_toml_str(TEST_CONFIG_TOML).unwrap()
}

/// Orchestrator wired to mocks and a manual clock
#[allow(dead_code)]
pub struct Harness {
    pub orchestrator: ConnectionOrchestrator,
    pub events: SessionEventReceiver,
    pub connector: Arc<MockTransportConnector>,
    pub exchange: Arc<MockIdentityExchange>,
    pub clock: Arc<ManualClock>,
}

#[allow(dead_code)]
impl Harness {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: ConsoleConfig) -> Self {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap(),
        ));
        let exchange = Arc::new(MockIdentityExchange::new(
            clock.clone(),
            Duration::seconds(3600),
        ));
        let connector = Arc::new(MockTransportConnector::new());
        let (orchestrator, events) = ConnectionOrchestrator::new(
            Arc::new(config),
            clock.clone(),
            exchange.clone(),
            Some(IdentityProof::new("test-id-token")),
            connector.clone(),
        );
        Self {
            orchestrator,
            events,
            connector,
            exchange,
            clock,
        }
    }

    /// Feed every queued transport event to the orchestrator
    pub async fn pump_events(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(event) = self.events.try_recv() {
            self.orchestrator.handle_session_event(event).await;
            handled += 1;
        }
        handled
    }

    pub fn advance_ms(&self, ms: i64) {
        self.clock.advance(Duration::milliseconds(ms));
    }

    pub fn now_ms(&self) -> i64 {
        use amr_console::clock::Clock;
        self.clock.now().timestamp_millis()
    }
}
