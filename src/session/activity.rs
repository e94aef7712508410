use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AfkCheck {
    Active,
    BecameAfk,
    StillAfk,
}

/// Tracks the last qualifying input and classifies the player as active or AFK.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityMonitor {
    pub threshold_secs: u64,
    pub is_afk: bool,
    pub last_input_at: DateTime<Utc>,
    #[serde(skip)]
    last_input: Instant,
}

impl ActivityMonitor {
    pub fn new(threshold_secs: u64, now: Instant) -> Self {
        Self {
            threshold_secs,
            is_afk: false,
            last_input_at: Utc::now(),
            last_input: now,
        }
    }

    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_input)
    }

    pub fn is_currently_afk(&self, now: Instant) -> bool {
        self.idle_for(now) > Duration::from_secs(self.threshold_secs)
    }

    /// Refreshes the AFK flag. Called once per clock tick.
    pub fn check(&mut self, now: Instant) -> AfkCheck {
        let afk = self.is_currently_afk(now);
        let outcome = match (self.is_afk, afk) {
            (_, false) => AfkCheck::Active,
            (false, true) => AfkCheck::BecameAfk,
            (true, true) => AfkCheck::StillAfk,
        };
        self.is_afk = afk;
        outcome
    }

    /// Registers an input and returns whether the player was AFK before it.
    ///
    /// The timestamp is consulted as well as the flag so an input that lands
    /// before the next tick still counts as a return from AFK.
    pub fn record_activity(&mut self, now: Instant) -> bool {
        let was_afk = self.is_afk || self.is_currently_afk(now);
        self.touch(now);
        was_afk
    }

    /// Restarts the idle window without reporting a return from AFK.
    pub fn rearm(&mut self, now: Instant) {
        self.touch(now);
    }

    fn touch(&mut self, now: Instant) {
        self.last_input = now;
        self.last_input_at = Utc::now();
        self.is_afk = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn threshold_is_exclusive() {
        let t0 = Instant::now();
        let monitor = ActivityMonitor::new(12, t0);
        assert!(!monitor.is_currently_afk(t0 + Duration::from_secs(12)));
        assert!(monitor.is_currently_afk(t0 + Duration::from_secs(13)));
    }

    #[test]
    fn check_reports_transition_once() {
        let t0 = Instant::now();
        let mut monitor = ActivityMonitor::new(10, t0);
        assert_eq!(monitor.check(t0 + Duration::from_secs(5)), AfkCheck::Active);
        assert_eq!(
            monitor.check(t0 + Duration::from_secs(11)),
            AfkCheck::BecameAfk
        );
        assert_eq!(
            monitor.check(t0 + Duration::from_secs(12)),
            AfkCheck::StillAfk
        );
        assert!(monitor.is_afk);
    }

    #[test]
    fn input_before_any_tick_still_counts_as_return() {
        let t0 = Instant::now();
        let mut monitor = ActivityMonitor::new(12, t0);
        assert!(monitor.record_activity(t0 + Duration::from_secs(13)));
        assert!(!monitor.is_afk);
        assert!(!monitor.record_activity(t0 + Duration::from_secs(14)));
    }

    #[test]
    fn rearm_clears_afk() {
        let t0 = Instant::now();
        let mut monitor = ActivityMonitor::new(10, t0);
        monitor.check(t0 + Duration::from_secs(30));
        monitor.rearm(t0 + Duration::from_secs(30));
        assert!(!monitor.is_afk);
        assert_eq!(
            monitor.check(t0 + Duration::from_secs(35)),
            AfkCheck::Active
        );
    }
}
