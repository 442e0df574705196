//! Operator console configuration
//!
//! Loaded once at startup from TOML and shared read-only (`Arc<ConsoleConfig>`)
//! with every component. Nothing in the core looks configuration up globally.

use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Main console configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConsoleConfig {
    pub iot: IotSection,
    pub identity: IdentitySection,
    pub console: ConsoleSection,
    #[serde(default)]
    pub liveness: LivenessSection,
    #[serde(default)]
    pub reconnect: ReconnectSection,
    #[serde(default)]
    pub transport: TransportSection,
}

/// IoT endpoint and device addressing
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IotSection {
    /// Region identifier, e.g. "ap-northeast-1"
    pub region: String,
    /// Device gateway host (no scheme, no path)
    pub endpoint: String,
    /// Thing identifier of the robot
    pub thing_name: String,
    /// Named shadow holding the robot's reported state
    pub shadow_name: String,
    /// Namespace for the robot's own topics (`{ns}/{thing}/status`)
    #[serde(default = "default_topic_namespace")]
    pub topic_namespace: String,
    /// Reserved prefix for shadow topics
    #[serde(default = "default_shadow_prefix")]
    pub shadow_topic_prefix: String,
    /// Service name used in the credential scope
    #[serde(default = "default_service_name")]
    pub service_name: String,
    /// How long a signed connection URL stays valid after issue
    #[serde(default = "default_signing_window")]
    pub signing_window_secs: u64,
}

/// Identity exchange settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IdentitySection {
    pub identity_pool_id: String,
    pub user_pool_id: String,
    /// Environment variable holding the identity proof (id token)
    #[serde(default = "default_id_token_env")]
    pub id_token_env: String,
    /// Override for the exchange endpoint (defaults to the regional endpoint)
    pub endpoint: Option<String>,
    /// Cached credentials are refreshed this long before they expire
    #[serde(default = "default_refresh_skew")]
    pub refresh_skew_secs: u64,
    /// Consecutive acquisition failures tolerated before giving up
    #[serde(default = "default_credential_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// Pause between failed acquisition attempts
    #[serde(default = "default_credential_retry_delay")]
    pub retry_delay_ms: u64,
}

/// Operator-facing settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConsoleSection {
    /// Destinations the robot may be called to
    pub destinations: Vec<String>,
    /// Address the HTTP console listens on
    #[serde(default = "default_bind")]
    pub bind: String,
}

/// Heartbeat staleness thresholds
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LivenessSection {
    #[serde(default = "default_tick_interval")]
    pub tick_interval_ms: u64,
    #[serde(default = "default_soft_threshold")]
    pub soft_threshold_ms: u64,
    #[serde(default = "default_hard_threshold")]
    pub hard_threshold_ms: u64,
    #[serde(default = "default_resync_cooldown")]
    pub resync_cooldown_ms: u64,
}

impl Default for LivenessSection {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval(),
            soft_threshold_ms: default_soft_threshold(),
            hard_threshold_ms: default_hard_threshold(),
            resync_cooldown_ms: default_resync_cooldown(),
        }
    }
}

/// Reconnect backoff
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReconnectSection {
    #[serde(default = "default_initial_delay")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: u32,
    /// Maximum reconnection attempts (None = unlimited)
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectSection {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_initial_delay(),
            max_delay_ms: default_max_delay(),
            multiplier: default_multiplier(),
            max_attempts: None,
        }
    }
}

/// Transport connection options
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransportSection {
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_clean_session")]
    pub clean_session: bool,
}

impl Default for TransportSection {
    fn default() -> Self {
        Self {
            keep_alive_secs: default_keep_alive(),
            connect_timeout_secs: default_connect_timeout(),
            clean_session: default_clean_session(),
        }
    }
}

fn default_topic_namespace() -> String {
    "amr".to_string()
}

fn default_shadow_prefix() -> String {
    "$aws/things".to_string()
}

fn default_service_name() -> String {
    "iotdevicegateway".to_string()
}

fn default_signing_window() -> u64 {
    300
}

fn default_id_token_env() -> String {
    "AMR_ID_TOKEN".to_string()
}

fn default_refresh_skew() -> u64 {
    60
}

fn default_credential_attempts() -> u32 {
    3
}

fn default_request_timeout() -> u64 {
    10
}

fn default_credential_retry_delay() -> u64 {
    500
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_tick_interval() -> u64 {
    1000
}

fn default_soft_threshold() -> u64 {
    25_000
}

fn default_hard_threshold() -> u64 {
    120_000
}

fn default_resync_cooldown() -> u64 {
    10_000
}

fn default_initial_delay() -> u64 {
    1000
}

fn default_max_delay() -> u64 {
    30_000
}

fn default_multiplier() -> u32 {
    2
}

fn default_keep_alive() -> u64 {
    60
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_clean_session() -> bool {
    true
}

/// Longest validity a presigned URL may be given
const MAX_SIGNING_WINDOW_SECS: u64 = 7 * 24 * 60 * 60;
const MAX_REFRESH_SKEW_SECS: u64 = 24 * 60 * 60;
/// Upper bound for every millisecond timing knob
const MAX_DURATION_MS: u64 = 24 * 60 * 60 * 1000;

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),
    #[error("Invalid thing name: {0}")]
    InvalidThingName(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl ConsoleConfig {
    /// Load configuration from TOML file and validate it
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate configuration from a TOML string
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: ConsoleConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints serde cannot express
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_non_empty("iot.region", &self.iot.region)?;
        require_non_empty("iot.endpoint", &self.iot.endpoint)?;
        require_non_empty("iot.shadow_name", &self.iot.shadow_name)?;
        require_non_empty("iot.topic_namespace", &self.iot.topic_namespace)?;
        require_non_empty("identity.identity_pool_id", &self.identity.identity_pool_id)?;
        require_non_empty("identity.user_pool_id", &self.identity.user_pool_id)?;
        validate_thing_name(&self.iot.thing_name)?;

        if self.iot.endpoint.contains("://") || self.iot.endpoint.contains('/') {
            return Err(ConfigError::InvalidConfig(format!(
                "iot.endpoint must be a bare host, got '{}'",
                self.iot.endpoint
            )));
        }

        if self.iot.signing_window_secs == 0
            || self.iot.signing_window_secs > MAX_SIGNING_WINDOW_SECS
        {
            return Err(ConfigError::InvalidConfig(format!(
                "iot.signing_window_secs must be between 1 and {MAX_SIGNING_WINDOW_SECS}"
            )));
        }
        if self.identity.refresh_skew_secs > MAX_REFRESH_SKEW_SECS {
            return Err(ConfigError::InvalidConfig(format!(
                "identity.refresh_skew_secs must be at most {MAX_REFRESH_SKEW_SECS}"
            )));
        }

        if self.console.destinations.is_empty() {
            return Err(ConfigError::InvalidConfig(
                "console.destinations must list at least one destination".to_string(),
            ));
        }
        if self.console.destinations.iter().any(|d| d.trim().is_empty()) {
            return Err(ConfigError::InvalidConfig(
                "console.destinations must not contain empty entries".to_string(),
            ));
        }

        if self.console.bind.parse::<std::net::SocketAddr>().is_err() {
            return Err(ConfigError::InvalidConfig(format!(
                "console.bind must be a socket address, got '{}'",
                self.console.bind
            )));
        }

        if self.identity.max_attempts == 0 {
            return Err(ConfigError::InvalidConfig(
                "identity.max_attempts must be greater than 0".to_string(),
            ));
        }

        let liveness = &self.liveness;
        let durations_ms = [
            ("liveness.tick_interval_ms", liveness.tick_interval_ms),
            ("liveness.soft_threshold_ms", liveness.soft_threshold_ms),
            ("liveness.hard_threshold_ms", liveness.hard_threshold_ms),
            ("liveness.resync_cooldown_ms", liveness.resync_cooldown_ms),
            ("reconnect.max_delay_ms", self.reconnect.max_delay_ms),
            ("identity.retry_delay_ms", self.identity.retry_delay_ms),
        ];
        if let Some((field, _)) = durations_ms.iter().find(|(_, ms)| *ms > MAX_DURATION_MS) {
            return Err(ConfigError::InvalidConfig(format!(
                "{field} must be at most {MAX_DURATION_MS}"
            )));
        }
        if liveness.tick_interval_ms == 0 {
            return Err(ConfigError::InvalidConfig(
                "liveness.tick_interval_ms must be greater than 0".to_string(),
            ));
        }
        if liveness.hard_threshold_ms <= liveness.soft_threshold_ms {
            return Err(ConfigError::InvalidConfig(format!(
                "liveness.hard_threshold_ms ({}) must be greater than soft_threshold_ms ({})",
                liveness.hard_threshold_ms, liveness.soft_threshold_ms
            )));
        }

        let reconnect = &self.reconnect;
        if reconnect.initial_delay_ms == 0 || reconnect.initial_delay_ms > reconnect.max_delay_ms
        {
            return Err(ConfigError::InvalidConfig(
                "reconnect.initial_delay_ms must be > 0 and <= max_delay_ms".to_string(),
            ));
        }
        if reconnect.multiplier == 0 {
            return Err(ConfigError::InvalidConfig(
                "reconnect.multiplier must be greater than 0".to_string(),
            ));
        }
        if reconnect.max_attempts == Some(0) {
            return Err(ConfigError::InvalidConfig(
                "reconnect.max_attempts must be greater than 0 or omitted for unlimited"
                    .to_string(),
            ));
        }

        Ok(())
    }

    /// Read the identity proof from the configured environment variable
    pub fn get_id_token(&self) -> Result<String, ConfigError> {
        std::env::var(&self.identity.id_token_env)
            .map_err(|_| ConfigError::EnvVarNotFound(self.identity.id_token_env.clone()))
    }

    pub fn refresh_skew(&self) -> Duration {
        Duration::seconds(self.identity.refresh_skew_secs as i64)
    }

    /// Create a test configuration for unit testing
    #[cfg(test)]
    pub fn test_config() -> Self {
        let toml_content = r#"
[iot]
region = "us-east-1"
endpoint = "example-ats.iot.us-east-1.amazonaws.com"
thing_name = "AMR-001"
shadow_name = "robot"

[identity]
identity_pool_id = "us-east-1:00000000-0000-0000-0000-000000000000"
user_pool_id = "us-east-1_TESTPOOL"

[console]
destinations = ["A-01", "B-02", "C-03"]
"#;
        toml::from_str(toml_content).expect("Test config should parse")
    }
}

fn require_non_empty(field: &str, value: &str) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::InvalidConfig(format!("{field} must not be empty")));
    }
    Ok(())
}

/// Thing names are restricted to `[a-zA-Z0-9:_-]+`
fn validate_thing_name(thing_name: &str) -> Result<(), ConfigError> {
    let valid_chars = thing_name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == ':' || c == '_' || c == '-');

    if thing_name.is_empty() || !valid_chars {
        return Err(ConfigError::InvalidThingName(format!(
            "Thing name '{thing_name}' must match pattern [a-zA-Z0-9:_-]+"
        )));
    }

    Ok(())
}
