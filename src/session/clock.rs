use std::{future::Future, ops::ControlFlow};

use tokio::{
    task::JoinHandle,
    time::{self, Duration, Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

use super::{
    activity::AfkCheck,
    config::RewardConfig,
    interruption::ScheduledTask,
    state::{SessionPhase, SessionState, TickOutcome},
};

/// One survival-clock tick: activity check, then +1 second, then milestone.
///
/// A time milestone leaves the session in `InterruptionAd` when it returns.
pub fn advance(
    state: &mut SessionState,
    generation: u64,
    interruption_id: impl FnOnce() -> String,
    config: &RewardConfig,
    now: Instant,
) -> TickOutcome {
    if state.phase != SessionPhase::Playing || !state.is_current(generation) {
        return TickOutcome::Skipped;
    }

    let Some(monitor) = state.activity_mut() else {
        return TickOutcome::Skipped;
    };
    match monitor.check(now) {
        AfkCheck::Active => {}
        AfkCheck::BecameAfk => return TickOutcome::Afk { newly: true },
        AfkCheck::StillAfk => return TickOutcome::Afk { newly: false },
    }

    let hit = state.accrue_active_second(&config.milestone);
    let elapsed = state.elapsed_active_secs;
    match hit {
        Some(hit) => {
            if hit.interrupt {
                // Cannot fail: the phase was checked above.
                let _ = state.suspend(interruption_id(), config.interruption_secs, now);
            }
            TickOutcome::Milestone { elapsed, hit }
        }
        None => TickOutcome::Advanced { elapsed },
    }
}

/// Runs `on_tick` every `period`, first one a full period after the start,
/// until the token is cancelled or `on_tick` breaks.
pub fn spawn_clock<F, Fut>(period: Duration, mut on_tick: F) -> ScheduledTask
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ControlFlow<()>> + Send + 'static,
{
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    let handle: JoinHandle<()> = tokio::spawn(async move {
        let mut ticker = time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = ticker.tick() => {
                    if on_tick().await.is_break() {
                        break;
                    }
                }
            }
        }
    });
    ScheduledTask::new(cancel, handle)
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    };

    use super::*;
    use crate::session::config::{AfkPolicy, GameProfile, MilestonePolicy};

    fn doom(threshold: u64) -> RewardConfig {
        RewardConfig {
            afk_threshold_secs: threshold,
            ..GameProfile::Doom.reward_config()
        }
    }

    fn start(config: &RewardConfig, t0: Instant) -> SessionState {
        let mut state = SessionState::new(config.session_cap);
        state.begin("s-1".into(), config, t0).unwrap();
        state
    }

    fn ad_id() -> String {
        "ad".to_string()
    }

    #[test]
    fn afk_ticks_do_not_advance() {
        let config = doom(10);
        let t0 = Instant::now();
        let mut state = start(&config, t0);
        let generation = state.generation;

        for second in 1..=10 {
            let now = t0 + Duration::from_secs(second);
            advance(&mut state, generation, ad_id, &config, now);
        }
        assert_eq!(state.elapsed_active_secs, 10);

        let outcome = advance(&mut state, generation, ad_id, &config, t0 + Duration::from_secs(11));
        assert_eq!(outcome, TickOutcome::Afk { newly: true });
        for second in 12..40 {
            let outcome =
                advance(&mut state, generation, ad_id, &config, t0 + Duration::from_secs(second));
            assert_eq!(outcome, TickOutcome::Afk { newly: false });
            assert_eq!(state.elapsed_active_secs, 10);
        }
        assert!(state.is_afk());
    }

    #[test]
    fn hundred_eightieth_active_tick_suspends_with_reward() {
        let config = doom(10);
        let t0 = Instant::now();
        let mut state = start(&config, t0);
        let generation = state.generation;

        for second in 1..180 {
            let now = t0 + Duration::from_secs(second);
            state.record_activity(&config, now);
            let outcome = advance(&mut state, generation, ad_id, &config, now);
            assert_eq!(outcome, TickOutcome::Advanced { elapsed: second });
        }
        let now = t0 + Duration::from_secs(180);
        let outcome = advance(&mut state, generation, ad_id, &config, now);

        assert!(matches!(outcome, TickOutcome::Milestone { elapsed: 180, .. }));
        assert_eq!(state.phase, SessionPhase::InterruptionAd);
        assert_eq!(state.pending_reward(), 1);
        assert_eq!(state.elapsed_active_secs, 180);
    }

    #[test]
    fn afk_punishment_scenario() {
        let config = RewardConfig {
            afk_policy: AfkPolicy::Reset,
            ..doom(12)
        };
        let t0 = Instant::now();
        let mut state = start(&config, t0);
        let generation = state.generation;
        state.elapsed_active_secs = 45;

        for second in 1..=13 {
            advance(&mut state, generation, ad_id, &config, t0 + Duration::from_secs(second));
        }
        // 12 active ticks, then the 13th finds the player AFK.
        assert_eq!(state.elapsed_active_secs, 57);
        assert!(state.is_afk());

        state.record_activity(&config, t0 + Duration::from_secs(13));
        assert_eq!(state.elapsed_active_secs, 0);
    }

    #[test]
    fn stale_generation_is_ignored() {
        let config = RewardConfig {
            milestone: MilestonePolicy::Time {
                every_secs: 2,
                reward: 1,
            },
            ..doom(10)
        };
        let t0 = Instant::now();
        let mut state = start(&config, t0);
        let stale = state.generation;
        state.suspend("ad".into(), 15, t0).unwrap();
        state.resume(t0).unwrap();

        let outcome = advance(&mut state, stale, ad_id, &config, t0 + Duration::from_secs(1));
        assert_eq!(outcome, TickOutcome::Skipped);
        assert_eq!(state.elapsed_active_secs, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn clock_ticks_once_per_period_until_cancelled() {
        let ticks = Arc::new(AtomicU64::new(0));
        let counter = ticks.clone();
        let task = spawn_clock(Duration::from_secs(1), move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                ControlFlow::Continue(())
            }
        });

        time::sleep(Duration::from_millis(500)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 0);

        time::sleep(Duration::from_secs(3)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 3);

        task.cancel();
        time::sleep(Duration::from_secs(5)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 3);
    }
}
