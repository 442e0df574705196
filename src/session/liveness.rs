//! Liveness Monitor: application-level heartbeat staleness
//!
//! Staleness is level-based. [`LivenessMonitor::evaluate`] reports how stale
//! the device is on every call; [`LivenessMonitor::tick`] layers the resync
//! in-flight guard on top so one stale period yields one resync request per
//! cooldown.

use crate::config::LivenessSection;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::debug;

/// Raw staleness level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Staleness {
    /// No heartbeat yet, or heartbeat within the soft threshold
    Fresh,
    /// Past the soft threshold
    Soft,
    /// Past the hard threshold while connected
    Hard,
}

/// Recovery action requested by a tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LivenessSignal {
    None,
    NeedsResync,
    NeedsHardReconnect,
}

/// Snapshot of the monitor for status reporting
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LivenessState {
    pub last_heartbeat_at: Option<DateTime<Utc>>,
    pub soft_threshold_ms: i64,
    pub hard_threshold_ms: i64,
    pub resync_in_flight: bool,
}

#[derive(Debug, Clone)]
pub struct LivenessMonitor {
    soft_threshold: Duration,
    hard_threshold: Duration,
    resync_cooldown: Duration,
    last_heartbeat_at: Option<DateTime<Utc>>,
    live_since: Option<DateTime<Utc>>,
    resync_issued_at: Option<DateTime<Utc>>,
}

impl LivenessMonitor {
    pub fn new(soft_threshold: Duration, hard_threshold: Duration, resync_cooldown: Duration) -> Self {
        Self {
            soft_threshold,
            hard_threshold,
            resync_cooldown,
            last_heartbeat_at: None,
            live_since: None,
            resync_issued_at: None,
        }
    }

    pub fn from_section(section: &LivenessSection) -> Self {
        Self::new(
            Duration::milliseconds(section.soft_threshold_ms as i64),
            Duration::milliseconds(section.hard_threshold_ms as i64),
            Duration::milliseconds(section.resync_cooldown_ms as i64),
        )
    }

    /// Record a heartbeat instant; older instants never move the clock back
    pub fn record_heartbeat(&mut self, at: DateTime<Utc>) {
        let advanced = self.last_heartbeat_at.map_or(true, |last| at > last);
        if advanced {
            self.last_heartbeat_at = Some(at);
            if self.resync_issued_at.take().is_some() {
                debug!(heartbeat_at = %at, "Heartbeat advanced, resync complete");
            }
        }
    }

    /// The session just went live
    pub fn mark_live(&mut self, now: DateTime<Utc>) {
        self.live_since = Some(now);
        self.resync_issued_at = None;
    }

    /// The session went away; heartbeat history is kept
    pub fn mark_down(&mut self) {
        self.live_since = None;
        self.resync_issued_at = None;
    }

    /// Forget everything (sign-out)
    pub fn reset(&mut self) {
        self.last_heartbeat_at = None;
        self.live_since = None;
        self.resync_issued_at = None;
    }

    /// Level-based staleness; never stale before the first heartbeat
    pub fn evaluate(&self, now: DateTime<Utc>, connected: bool) -> Staleness {
        let Some(last) = self.last_heartbeat_at else {
            return Staleness::Fresh;
        };

        // A rebuilt session gets a full hard window before it can be torn down.
        let hard_reference = self.live_since.map_or(last, |live| live.max(last));
        if connected && now - hard_reference > self.hard_threshold {
            return Staleness::Hard;
        }
        if now - last > self.soft_threshold {
            return Staleness::Soft;
        }
        Staleness::Fresh
    }

    /// Evaluate and apply the resync in-flight guard
    pub fn tick(&mut self, now: DateTime<Utc>, connected: bool) -> LivenessSignal {
        match self.evaluate(now, connected) {
            Staleness::Fresh => LivenessSignal::None,
            Staleness::Hard => LivenessSignal::NeedsHardReconnect,
            Staleness::Soft => {
                if let Some(issued) = self.resync_issued_at {
                    if now - issued < self.resync_cooldown {
                        return LivenessSignal::None;
                    }
                }
                self.resync_issued_at = Some(now);
                LivenessSignal::NeedsResync
            }
        }
    }

    pub fn is_resync_in_flight(&self) -> bool {
        self.resync_issued_at.is_some()
    }

    pub fn last_heartbeat_at(&self) -> Option<DateTime<Utc>> {
        self.last_heartbeat_at
    }

    pub fn state(&self) -> LivenessState {
        LivenessState {
            last_heartbeat_at: self.last_heartbeat_at,
            soft_threshold_ms: self.soft_threshold.num_milliseconds(),
            hard_threshold_ms: self.hard_threshold.num_milliseconds(),
            resync_in_flight: self.is_resync_in_flight(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const SOFT: i64 = 25_000;
    const HARD: i64 = 120_000;
    const COOLDOWN: i64 = 10_000;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn ms(n: i64) -> Duration {
        Duration::milliseconds(n)
    }

    fn monitor() -> LivenessMonitor {
        LivenessMonitor::new(ms(SOFT), ms(HARD), ms(COOLDOWN))
    }

    #[test]
    fn test_no_signal_before_first_heartbeat() {
        let mut monitor = monitor();
        assert_eq!(monitor.tick(t0() + ms(10 * HARD), true), LivenessSignal::None);
        assert_eq!(monitor.evaluate(t0() + ms(10 * HARD), true), Staleness::Fresh);
    }

    #[test]
    fn test_soft_threshold_emits_resync_once_per_cooldown() {
        let mut monitor = monitor();
        monitor.record_heartbeat(t0());

        assert_eq!(monitor.tick(t0() + ms(SOFT), true), LivenessSignal::None);
        assert_eq!(monitor.tick(t0() + ms(SOFT + 1), true), LivenessSignal::NeedsResync);
        assert!(monitor.is_resync_in_flight());
        assert_eq!(monitor.tick(t0() + ms(SOFT + 1_001), true), LivenessSignal::None);

        // Cooldown elapsed, still stale: ask again.
        assert_eq!(
            monitor.tick(t0() + ms(SOFT + 1 + COOLDOWN), true),
            LivenessSignal::NeedsResync
        );
    }

    #[test]
    fn test_evaluate_stays_level_based() {
        let mut monitor = monitor();
        monitor.record_heartbeat(t0());
        monitor.tick(t0() + ms(SOFT + 1), true);

        assert_eq!(monitor.evaluate(t0() + ms(SOFT + 2), true), Staleness::Soft);
        assert_eq!(monitor.evaluate(t0() + ms(SOFT + 3), true), Staleness::Soft);
    }

    #[test]
    fn test_heartbeat_clears_resync_in_flight() {
        let mut monitor = monitor();
        monitor.record_heartbeat(t0());
        monitor.tick(t0() + ms(SOFT + 1), true);

        monitor.record_heartbeat(t0() + ms(SOFT + 500));
        assert!(!monitor.is_resync_in_flight());
        assert_eq!(monitor.tick(t0() + ms(SOFT + 600), true), LivenessSignal::None);
    }

    #[test]
    fn test_older_heartbeat_ignored() {
        let mut monitor = monitor();
        monitor.record_heartbeat(t0() + ms(5_000));
        monitor.record_heartbeat(t0());
        assert_eq!(monitor.last_heartbeat_at(), Some(t0() + ms(5_000)));
    }

    #[test]
    fn test_hard_threshold_requires_connection() {
        let mut monitor = monitor();
        monitor.record_heartbeat(t0());

        assert_eq!(
            monitor.tick(t0() + ms(HARD + 1), true),
            LivenessSignal::NeedsHardReconnect
        );
        assert_eq!(monitor.evaluate(t0() + ms(HARD + 1), false), Staleness::Soft);
    }

    #[test]
    fn test_new_session_gets_full_hard_window() {
        let mut monitor = monitor();
        monitor.record_heartbeat(t0());
        let relive = t0() + ms(HARD + 5_000);
        monitor.mark_live(relive);

        assert_ne!(monitor.evaluate(relive + ms(HARD), true), Staleness::Hard);
        assert_eq!(monitor.evaluate(relive + ms(HARD + 1), true), Staleness::Hard);
    }

    #[test]
    fn test_reset_forgets_heartbeat() {
        let mut monitor = monitor();
        monitor.record_heartbeat(t0());
        monitor.reset();
        assert_eq!(monitor.state().last_heartbeat_at, None);
        assert_eq!(monitor.tick(t0() + ms(HARD * 2), true), LivenessSignal::None);
    }
}
