//! Pure reconnection decision logic
//!
//! Delay for attempt `n` (1-based) is `min(initial * multiplier^(n-1), max)`.
//! The attempt counter is reset by the orchestrator on the first `Live` entry.

use crate::config::ReconnectSection;
use tracing::info;

/// Exponential backoff parameters
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: u32,
    /// Maximum number of reconnection attempts (None = unlimited)
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay_ms: 1_000,
            max_delay_ms: 30_000,
            multiplier: 2,
            max_attempts: None,
        }
    }
}

/// Outcome of asking whether to reconnect
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconnectionDecision {
    Proceed { attempt: u32, delay_ms: u64 },
    AbortShutdownRequested,
    AbortMaxAttemptsExceeded,
}

impl ReconnectPolicy {
    pub fn from_section(section: &ReconnectSection) -> Self {
        Self {
            initial_delay_ms: section.initial_delay_ms,
            max_delay_ms: section.max_delay_ms,
            multiplier: section.multiplier,
            max_attempts: section.max_attempts,
        }
    }

    /// Backoff delay for a 1-based attempt number
    pub fn calculate_backoff_delay(&self, attempt: u32) -> u64 {
        let exponent = attempt.saturating_sub(1);
        let factor = (self.multiplier as u64).saturating_pow(exponent);
        self.initial_delay_ms
            .saturating_mul(factor)
            .min(self.max_delay_ms)
    }

    /// Decide whether another attempt may be scheduled (pure function)
    pub fn should_attempt_reconnection(
        &self,
        current_attempts: u32,
        shutdown_requested: bool,
    ) -> ReconnectionDecision {
        if shutdown_requested {
            return ReconnectionDecision::AbortShutdownRequested;
        }

        if let Some(max_attempts) = self.max_attempts {
            if current_attempts >= max_attempts {
                info!(max_attempts, "Reconnection attempts exhausted");
                return ReconnectionDecision::AbortMaxAttemptsExceeded;
            }
        }

        let attempt = current_attempts + 1;
        ReconnectionDecision::Proceed {
            attempt,
            delay_ms: self.calculate_backoff_delay(attempt),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_default_sequence_doubles_then_caps() {
        let policy = ReconnectPolicy::default();
        let delays: Vec<u64> = (1..=7).map(|n| policy.calculate_backoff_delay(n)).collect();
        assert_eq!(delays, vec![1_000, 2_000, 4_000, 8_000, 16_000, 30_000, 30_000]);
    }

    #[test]
    fn test_attempt_zero_uses_initial_delay() {
        assert_eq!(ReconnectPolicy::default().calculate_backoff_delay(0), 1_000);
    }

    #[test]
    fn test_shutdown_takes_priority() {
        let policy = ReconnectPolicy {
            max_attempts: Some(1),
            ..ReconnectPolicy::default()
        };
        assert_eq!(
            policy.should_attempt_reconnection(5, true),
            ReconnectionDecision::AbortShutdownRequested
        );
    }

    #[test]
    fn test_max_attempts_enforced() {
        let policy = ReconnectPolicy {
            max_attempts: Some(3),
            ..ReconnectPolicy::default()
        };
        assert_eq!(
            policy.should_attempt_reconnection(2, false),
            ReconnectionDecision::Proceed {
                attempt: 3,
                delay_ms: 4_000
            }
        );
        assert_eq!(
            policy.should_attempt_reconnection(3, false),
            ReconnectionDecision::AbortMaxAttemptsExceeded
        );
    }

    #[test]
    fn test_unlimited_attempts() {
        let policy = ReconnectPolicy::default();
        assert!(matches!(
            policy.should_attempt_reconnection(10_000, false),
            ReconnectionDecision::Proceed { delay_ms: 30_000, .. }
        ));
    }

    proptest! {
        #[test]
        fn prop_delay_is_monotonic_and_capped(
            initial in 1u64..5_000,
            extra in 0u64..120_000,
            multiplier in 1u32..5,
            attempt in 1u32..200,
        ) {
            let policy = ReconnectPolicy {
                initial_delay_ms: initial,
                max_delay_ms: initial + extra,
                multiplier,
                max_attempts: None,
            };
            let current = policy.calculate_backoff_delay(attempt);
            let next = policy.calculate_backoff_delay(attempt + 1);
            prop_assert!(current <= next);
            prop_assert!(next <= policy.max_delay_ms);
            prop_assert!(current >= initial.min(policy.max_delay_ms));
        }
    }
}
