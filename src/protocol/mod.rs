//! Topics and payloads exchanged with the robot and its device shadow

pub mod messages;
pub mod topics;

pub use messages::*;
pub use topics::*;
