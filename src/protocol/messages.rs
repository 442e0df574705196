//! Wire payloads exchanged with the robot and its shadow
//!
//! Inbound:
//! - device status `{state, updatedAt, heartbeatAt, requestId?}` (epoch ms)
//! - shadow `get/accepted` carrying `state.reported`
//! - shadow `update/documents` carrying `current.state.reported`
//! - shadow `get/rejected` carrying `{code, message}`
//!
//! Outbound: the call command and the empty shadow `get` request.

use super::topics::{classify_topic, TopicKind};
use crate::clock::from_epoch_millis;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Rejection code the shadow service uses for a shadow that does not exist
pub const SHADOW_NOT_FOUND: i64 = 404;

/// Payload of the shadow `get` request
pub const SHADOW_GET_PAYLOAD: &[u8] = b"{}";

/// Robot state as reported by the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RobotState {
    Idle,
    Moving,
    Offline,
    Unknown,
}

impl RobotState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RobotState::Idle => "idle",
            RobotState::Moving => "moving",
            RobotState::Offline => "offline",
            RobotState::Unknown => "unknown",
        }
    }
}

impl From<&str> for RobotState {
    fn from(value: &str) -> Self {
        match value {
            "idle" => RobotState::Idle,
            "moving" => RobotState::Moving,
            "offline" => RobotState::Offline,
            _ => RobotState::Unknown,
        }
    }
}

impl std::fmt::Display for RobotState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Last known device state; persists across reconnects until a fresh status arrives
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceState {
    pub state: RobotState,
    pub last_reported_at: Option<DateTime<Utc>>,
    pub last_heartbeat_at: Option<DateTime<Utc>>,
}

impl Default for DeviceState {
    fn default() -> Self {
        Self {
            state: RobotState::Unknown,
            last_reported_at: None,
            last_heartbeat_at: None,
        }
    }
}

impl DeviceState {
    /// Apply a status update as one whole replacement
    ///
    /// State falls back to the previous value when absent. The heartbeat
    /// instant is `heartbeatAt`, else `updatedAt`, else `now`.
    pub fn applied(&self, update: &StatusUpdate, now: DateTime<Utc>) -> DeviceState {
        DeviceState {
            state: update.state.unwrap_or(self.state),
            last_reported_at: Some(update.updated_at.unwrap_or(now)),
            last_heartbeat_at: Some(update.heartbeat_instant(now)),
        }
    }
}

/// A device status report, from the status topic or a shadow document
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StatusUpdate {
    pub state: Option<RobotState>,
    pub updated_at: Option<DateTime<Utc>>,
    pub heartbeat_at: Option<DateTime<Utc>>,
    pub request_id: Option<String>,
}

impl StatusUpdate {
    pub fn heartbeat_instant(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        self.heartbeat_at.or(self.updated_at).unwrap_or(now)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawStatus {
    state: Option<String>,
    updated_at: Option<f64>,
    heartbeat_at: Option<f64>,
    request_id: Option<String>,
}

impl From<RawStatus> for StatusUpdate {
    fn from(raw: RawStatus) -> Self {
        StatusUpdate {
            state: raw.state.as_deref().map(RobotState::from),
            updated_at: raw.updated_at.and_then(|ms| from_epoch_millis(ms as i64)),
            heartbeat_at: raw.heartbeat_at.and_then(|ms| from_epoch_millis(ms as i64)),
            request_id: raw.request_id,
        }
    }
}

/// Body of a shadow `get/rejected` message
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ShadowRejection {
    pub code: i64,
    #[serde(default)]
    pub message: String,
}

impl ShadowRejection {
    pub fn is_not_found(&self) -> bool {
        self.code == SHADOW_NOT_FOUND
    }
}

/// An inbound message after routing
#[derive(Debug, Clone, PartialEq)]
pub enum RoutedMessage {
    Status {
        source: TopicKind,
        update: StatusUpdate,
    },
    ShadowRejected(ShadowRejection),
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum MessageParseError {
    #[error("No route for topic {0}")]
    UnknownTopic(String),
    #[error("Invalid JSON: {0}")]
    InvalidJson(String),
    #[error("Missing {0} in shadow document")]
    MissingField(&'static str),
}

/// Decode an inbound payload according to its topic suffix
pub fn route_message(topic: &str, payload: &[u8]) -> Result<RoutedMessage, MessageParseError> {
    let kind =
        classify_topic(topic).ok_or_else(|| MessageParseError::UnknownTopic(topic.to_string()))?;

    let value: Value = serde_json::from_slice(payload)
        .map_err(|e| MessageParseError::InvalidJson(e.to_string()))?;

    match kind {
        TopicKind::DeviceStatus => Ok(RoutedMessage::Status {
            source: kind,
            update: parse_status(value)?,
        }),
        TopicKind::ShadowGetAccepted => {
            let reported = value
                .pointer("/state/reported")
                .cloned()
                .ok_or(MessageParseError::MissingField("state.reported"))?;
            Ok(RoutedMessage::Status {
                source: kind,
                update: parse_status(reported)?,
            })
        }
        TopicKind::ShadowUpdateDocuments => {
            let reported = value
                .pointer("/current/state/reported")
                .cloned()
                .ok_or(MessageParseError::MissingField("current.state.reported"))?;
            Ok(RoutedMessage::Status {
                source: kind,
                update: parse_status(reported)?,
            })
        }
        TopicKind::ShadowGetRejected => {
            let rejection: ShadowRejection = serde_json::from_value(value)
                .map_err(|e| MessageParseError::InvalidJson(e.to_string()))?;
            Ok(RoutedMessage::ShadowRejected(rejection))
        }
    }
}

fn parse_status(value: Value) -> Result<StatusUpdate, MessageParseError> {
    let raw: RawStatus =
        serde_json::from_value(value).map_err(|e| MessageParseError::InvalidJson(e.to_string()))?;
    Ok(raw.into())
}

/// Operator "call" command published to the command topic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallCommand {
    pub request_id: String,
    pub destination: String,
    /// Epoch milliseconds
    pub issued_at: i64,
}

impl CallCommand {
    pub fn to_payload(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}
