//! Testing utilities and mock implementations
//!
//! Mocks for the transport and identity seams so the connection lifecycle
//! can be exercised without a broker or an identity service.

pub mod mocks;

pub use crate::clock::ManualClock;
pub use mocks::*;
