//! AMR operator console - connection and liveness manager
//!
//! Keeps one authenticated publish/subscribe session open to a robot's
//! device gateway and tracks whether the robot itself is still alive.
//!
//! # Overview
//!
//! - [`auth`]: transient credentials from an identity exchange, cached by the broker
//! - [`signing`]: SigV4 presigned `wss://` connection URLs
//! - [`transport`]: the single live session over MQTT-over-WebSocket
//! - [`session`]: orchestrator state machine, liveness monitor, backoff, commands
//! - [`protocol`]: topic layout and device/shadow payloads
//! - [`console`]: the operator HTTP surface
//!
//! # Quick Start
//!
//! ```rust
//! use amr_console::protocol::{route_message, RoutedMessage, RobotState};
//!
//! let topic = "$aws/things/AMR-001/shadow/name/robot/get/accepted";
//! let payload = br#"{"state":{"reported":{"state":"idle","updatedAt":1000,"heartbeatAt":900}}}"#;
//!
//! match route_message(topic, payload).unwrap() {
//!     RoutedMessage::Status { update, .. } => assert_eq!(update.state, Some(RobotState::Idle)),
//!     other => panic!("unexpected route: {other:?}"),
//! }
//! ```

pub mod auth;
pub mod clock;
pub mod config;
pub mod console;
pub mod error;
pub mod observability;
pub mod protocol;
pub mod session;
pub mod signing;
pub mod testing;
pub mod transport;

pub use config::ConsoleConfig;
pub use error::{ConsoleError, ConsoleResult};
pub use session::{ConnectionOrchestrator, ConsoleHandle, ConsoleState, ConsoleStatus};
