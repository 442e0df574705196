//! Connection lifecycle: orchestration, liveness, backoff and commands

pub mod backoff;
pub mod dispatcher;
pub mod liveness;
pub mod orchestrator;
pub mod state;

pub use backoff::{ReconnectPolicy, ReconnectionDecision};
pub use dispatcher::{CommandDispatcher, DispatchError};
pub use liveness::{LivenessMonitor, LivenessSignal, LivenessState, Staleness};
pub use orchestrator::{ConnectionOrchestrator, ConsoleCommand, ConsoleHandle};
pub use state::{ConsoleState, ConsoleStatus, DeviceStateStore, ShadowStatus};
