use serde::{Deserialize, Serialize};

use super::config::{MilestonePolicy, ProgressSource};

/// Pending reward for one session, never above `cap`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct RewardLedger {
    #[serde(rename = "pendingReward")]
    pub pending: u64,
    #[serde(rename = "sessionCap")]
    pub cap: u64,
}

impl RewardLedger {
    pub fn new(cap: u64) -> Self {
        Self { pending: 0, cap }
    }

    /// Adds `amount`, clamped at the cap. Returns the post-clamp balance.
    pub fn accrue(&mut self, amount: u64) -> u64 {
        self.pending = self.pending.saturating_add(amount).min(self.cap);
        self.pending
    }

    pub fn is_capped(&self) -> bool {
        self.pending >= self.cap
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MilestoneHit {
    /// Reward the milestone asked for.
    pub requested: u64,
    /// Reward actually added after clamping.
    pub granted: u64,
    pub pending: u64,
    pub interrupt: bool,
}

impl MilestoneHit {
    pub fn truncated(&self) -> bool {
        self.granted < self.requested
    }
}

fn award(ledger: &mut RewardLedger, reward: u64, interrupt: bool) -> MilestoneHit {
    let before = ledger.pending;
    let pending = ledger.accrue(reward);
    MilestoneHit {
        requested: reward,
        granted: pending - before,
        pending,
        interrupt,
    }
}

/// Evaluates one active second against a time milestone.
pub fn on_active_second(
    policy: &MilestonePolicy,
    counter: &mut u64,
    ledger: &mut RewardLedger,
) -> Option<MilestoneHit> {
    let MilestonePolicy::Time { every_secs, reward } = *policy else {
        return None;
    };

    *counter += 1;
    if *counter < every_secs {
        return None;
    }
    *counter = 0;
    Some(award(ledger, reward, true))
}

/// Evaluates `weight` discrete in-game events against an event milestone.
pub fn on_event(
    policy: &MilestonePolicy,
    weight: u64,
    counter: &mut u64,
    ledger: &mut RewardLedger,
) -> Option<MilestoneHit> {
    let MilestonePolicy::Event {
        every_events,
        reward,
        ..
    } = *policy
    else {
        return None;
    };

    *counter = counter.saturating_add(weight);
    let milestones = *counter / every_events;
    if milestones == 0 {
        return None;
    }
    // A batch can cross several milestones; the remainder starts the next cycle.
    *counter %= every_events;
    Some(award(ledger, reward.saturating_mul(milestones), false))
}

/// Whether a score delta is the fixed-value event the policy counts.
pub fn score_counts_as_event(policy: &MilestonePolicy, delta: u64) -> bool {
    matches!(
        policy,
        MilestonePolicy::Event {
            score_event_value: Some(value),
            ..
        } if *value == delta
    )
}

/// Reward owed at cash-out for the given progress, before the session cap.
pub fn cash_out_amount(policy: &MilestonePolicy, elapsed_secs: u64, collected: u64) -> u64 {
    let MilestonePolicy::CashOut {
        source,
        progress_units,
        reward_units,
    } = *policy
    else {
        return 0;
    };

    let progress = match source {
        ProgressSource::ElapsedSeconds => elapsed_secs,
        ProgressSource::CollectedItems => collected,
    };

    progress.saturating_mul(reward_units) / progress_units
}

#[cfg(test)]
mod tests {
    use super::*;

    const CASH_OUT: MilestonePolicy = MilestonePolicy::CashOut {
        source: ProgressSource::ElapsedSeconds,
        progress_units: 100,
        reward_units: 5,
    };

    #[test]
    fn accrue_clamps_at_cap() {
        let mut ledger = RewardLedger::new(50);
        assert_eq!(ledger.accrue(30), 30);
        assert_eq!(ledger.accrue(30), 50);
        assert!(ledger.is_capped());
        assert_eq!(ledger.accrue(7), 50);
        assert_eq!(ledger.pending, 50);
    }

    #[test]
    fn accrue_survives_overflowing_amounts() {
        let mut ledger = RewardLedger::new(50);
        ledger.accrue(10);
        assert_eq!(ledger.accrue(u64::MAX), 50);
    }

    #[test]
    fn time_milestone_fires_on_the_boundary() {
        let policy = MilestonePolicy::Time {
            every_secs: 180,
            reward: 1,
        };
        let mut ledger = RewardLedger::new(50);
        let mut counter = 0;
        for _ in 0..179 {
            assert_eq!(on_active_second(&policy, &mut counter, &mut ledger), None);
        }
        let hit = on_active_second(&policy, &mut counter, &mut ledger).unwrap();
        assert!(hit.interrupt);
        assert_eq!(hit.pending, 1);
        assert_eq!(counter, 0);
    }

    #[test]
    fn eighth_kill_awards_and_resets() {
        let policy = MilestonePolicy::Event {
            every_events: 8,
            reward: 1,
            score_event_value: None,
        };
        let mut ledger = RewardLedger::new(50);
        let mut counter = 0;
        for _ in 0..7 {
            assert!(on_event(&policy, 1, &mut counter, &mut ledger).is_none());
        }
        assert_eq!(counter, 7);
        let hit = on_event(&policy, 1, &mut counter, &mut ledger).unwrap();
        assert_eq!(hit.granted, 1);
        assert!(!hit.interrupt);
        assert_eq!(counter, 0);
        assert_eq!(ledger.pending, 1);
    }

    #[test]
    fn batched_kills_pay_every_milestone_crossed() {
        let policy = MilestonePolicy::Event {
            every_events: 8,
            reward: 1,
            score_event_value: None,
        };
        let mut ledger = RewardLedger::new(50);
        let mut counter = 0;
        let hit = on_event(&policy, 16, &mut counter, &mut ledger).unwrap();
        assert_eq!(hit.requested, 2);
        assert_eq!(hit.granted, 2);
        assert_eq!(counter, 0);

        let hit = on_event(&policy, 11, &mut counter, &mut ledger).unwrap();
        assert_eq!(hit.granted, 1);
        assert_eq!(counter, 3);
        assert_eq!(ledger.pending, 3);

        let mut batched = RewardLedger::new(50);
        let mut singles = RewardLedger::new(50);
        on_event(&policy, 16, &mut 0, &mut batched);
        let mut single_counter = 0;
        for _ in 0..16 {
            on_event(&policy, 1, &mut single_counter, &mut singles);
        }
        assert_eq!(batched.pending, singles.pending);
    }

    #[test]
    fn batch_beyond_cap_is_clamped() {
        let policy = MilestonePolicy::Event {
            every_events: 1,
            reward: 1,
            score_event_value: None,
        };
        let mut ledger = RewardLedger::new(5);
        let hit = on_event(&policy, 40, &mut 0, &mut ledger).unwrap();
        assert_eq!(hit.requested, 40);
        assert_eq!(hit.granted, 5);
        assert!(hit.truncated());
    }

    #[test]
    fn capped_milestone_reports_truncation() {
        let policy = MilestonePolicy::Event {
            every_events: 1,
            reward: 3,
            score_event_value: None,
        };
        let mut ledger = RewardLedger::new(4);
        on_event(&policy, 1, &mut 0, &mut ledger);
        let hit = on_event(&policy, 1, &mut 0, &mut ledger).unwrap();
        assert_eq!(hit.granted, 1);
        assert!(hit.truncated());
    }

    #[test]
    fn only_the_configured_score_delta_counts() {
        let policy = MilestonePolicy::Event {
            every_events: 1,
            reward: 1,
            score_event_value: Some(100),
        };
        assert!(score_counts_as_event(&policy, 100));
        assert!(!score_counts_as_event(&policy, 10));
        assert!(!score_counts_as_event(&CASH_OUT, 100));
    }

    #[test]
    fn cash_out_converts_with_floor() {
        assert_eq!(cash_out_amount(&CASH_OUT, 1200, 0), 60);
        assert_eq!(cash_out_amount(&CASH_OUT, 199, 0), 9);
        assert_eq!(cash_out_amount(&CASH_OUT, 19, 0), 0);

        let items = MilestonePolicy::CashOut {
            source: ProgressSource::CollectedItems,
            progress_units: 100,
            reward_units: 5,
        };
        assert_eq!(cash_out_amount(&items, 1200, 40), 2);
    }
}
