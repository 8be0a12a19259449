//! Staleness watchdog
//!
//! A connection that stops sending bytes without an error or a close (a
//! half-open TCP peer) would otherwise leave the feed silent forever. The
//! server is asked to send a newline every `heartbeat`; the monitor checks on
//! a fixed period, independent of that heartbeat, whether anything arrived in
//! the last `staleness_multiplier x heartbeat` (10 s with the defaults).

use std::time::Duration;

use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};

use crate::config::StreamConfig;

/// Decides when a connection has been silent for too long
#[derive(Debug, Clone, Copy)]
pub(crate) struct HeartbeatMonitor {
    period: Duration,
    threshold: Duration,
}

impl HeartbeatMonitor {
    pub fn new(period: Duration, threshold: Duration) -> Self {
        Self { period, threshold }
    }

    pub fn from_config(config: &StreamConfig) -> Self {
        Self::new(config.watchdog_period(), config.staleness_threshold())
    }

    pub fn threshold(&self) -> Duration {
        self.threshold
    }

    /// Repeating timer driving the checks; first tick one period from now
    pub fn ticker(&self) -> Interval {
        let mut ticker = interval_at(Instant::now() + self.period, self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker
    }

    /// Strictly more than `threshold` elapsed since `last_activity`
    pub fn is_stale(&self, last_activity: Instant, now: Instant) -> bool {
        now.saturating_duration_since(last_activity) > self.threshold
    }
}
