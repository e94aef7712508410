use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::Instant;

use super::{
    accrual::{self, MilestoneHit, RewardLedger},
    activity::ActivityMonitor,
    config::{AfkPolicy, MilestonePolicy, RewardConfig},
    interruption::{ActiveInterruption, DismissError, InterruptionKind},
};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum SessionPhase {
    #[default]
    Idle,
    Playing,
    InterruptionAd,
    EndingAd,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum EndReason {
    CashOut,
    GameOver,
    Restart,
}

impl EndReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            EndReason::CashOut => "CashOut",
            EndReason::GameOver => "GameOver",
            EndReason::Restart => "Restart",
        }
    }

    /// Whether the run's progress is converted under a cash-out policy.
    fn converts_progress(&self) -> bool {
        !matches!(self, EndReason::Restart)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("session already active")]
    AlreadyActive,
    #[error("no session is playing")]
    NotPlaying,
    #[error("no interruption is running")]
    NoInterruption,
    #[error(transparent)]
    Dismiss(#[from] DismissError),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum FlushOutcome {
    Credited { balance: u64 },
    Failed,
    /// Reward was earned but nobody is signed in to receive it.
    Skipped,
    NothingToFlush,
}

impl FlushOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlushOutcome::Credited { .. } => "Credited",
            FlushOutcome::Failed => "Failed",
            FlushOutcome::Skipped => "Skipped",
            FlushOutcome::NothingToFlush => "None",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SessionResult {
    pub session_id: String,
    pub reason: EndReason,
    pub elapsed_active_secs: u64,
    pub reward: u64,
    pub outcome: FlushOutcome,
    pub message: String,
}

impl SessionResult {
    pub fn new(
        session_id: String,
        reason: EndReason,
        elapsed_active_secs: u64,
        reward: u64,
        outcome: FlushOutcome,
    ) -> Self {
        let message = match &outcome {
            FlushOutcome::Credited { balance } => {
                format!("You earned {reward} coins! Balance: {balance}")
            }
            FlushOutcome::Failed => format!("Could not credit {reward} coins"),
            FlushOutcome::Skipped => format!("Sign in to keep the {reward} coins you earned"),
            FlushOutcome::NothingToFlush => "No coins earned this time".to_string(),
        };

        Self {
            session_id,
            reason,
            elapsed_active_secs,
            reward,
            outcome,
            message,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityOutcome {
    Active,
    ReturnedFromAfk { punished: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Not playing, or the callback belongs to an earlier phase.
    Skipped,
    Afk { newly: bool },
    Advanced { elapsed: u64 },
    Milestone { elapsed: u64, hit: MilestoneHit },
}

/// The one mutable record a game wrapper owns.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    pub phase: SessionPhase,
    pub session_id: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub elapsed_active_secs: u64,
    #[serde(flatten)]
    pub reward: RewardLedger,
    pub milestone_counter: u64,
    pub collected_items: u64,
    pub activity: Option<ActivityMonitor>,
    pub interruption: Option<ActiveInterruption>,
    pub end_reason: Option<EndReason>,
    pub last_result: Option<SessionResult>,
    /// Bumped on every phase change; scheduled callbacks carry the value they
    /// were created under and are ignored once it moves on.
    #[serde(skip)]
    pub generation: u64,
    #[serde(skip)]
    flush_taken: bool,
}

impl SessionState {
    pub fn new(session_cap: u64) -> Self {
        Self {
            phase: SessionPhase::Idle,
            session_id: None,
            started_at: None,
            elapsed_active_secs: 0,
            reward: RewardLedger::new(session_cap),
            milestone_counter: 0,
            collected_items: 0,
            activity: None,
            interruption: None,
            end_reason: None,
            last_result: None,
            generation: 0,
            flush_taken: false,
        }
    }

    pub fn pending_reward(&self) -> u64 {
        self.reward.pending
    }

    pub fn is_afk(&self) -> bool {
        self.activity.as_ref().is_some_and(|monitor| monitor.is_afk)
    }

    pub fn interruption_remaining_secs(&self, now: Instant) -> u64 {
        self.interruption
            .as_ref()
            .map(|ad| ad.remaining_secs(now))
            .unwrap_or(0)
    }

    /// Idle → Playing.
    pub fn begin(
        &mut self,
        session_id: String,
        config: &RewardConfig,
        now: Instant,
    ) -> Result<(), SessionError> {
        if self.phase != SessionPhase::Idle {
            return Err(SessionError::AlreadyActive);
        }

        let generation = self.generation + 1;
        *self = Self::new(config.session_cap);
        self.phase = SessionPhase::Playing;
        self.session_id = Some(session_id);
        self.started_at = Some(Utc::now());
        self.activity = Some(ActivityMonitor::new(config.afk_threshold_secs, now));
        self.generation = generation;
        Ok(())
    }

    pub fn record_activity(&mut self, config: &RewardConfig, now: Instant) -> ActivityOutcome {
        let Some(monitor) = self.activity.as_mut() else {
            return ActivityOutcome::Active;
        };

        if !monitor.record_activity(now) {
            return ActivityOutcome::Active;
        }

        let punished = self.phase == SessionPhase::Playing && config.afk_policy == AfkPolicy::Reset;
        if punished {
            self.elapsed_active_secs = 0;
            if config.interrupts_on_milestone() {
                self.milestone_counter = 0;
            }
        }
        ActivityOutcome::ReturnedFromAfk { punished }
    }

    /// Counts `weight` in-game events (kills, ghosts eaten).
    pub fn record_event(
        &mut self,
        config: &RewardConfig,
        weight: u64,
    ) -> Result<Option<MilestoneHit>, SessionError> {
        self.require_playing()?;
        Ok(accrual::on_event(
            &config.milestone,
            weight,
            &mut self.milestone_counter,
            &mut self.reward,
        ))
    }

    /// Score deltas only matter when they match the policy's fixed-value event.
    pub fn record_score(
        &mut self,
        config: &RewardConfig,
        delta: u64,
    ) -> Result<Option<MilestoneHit>, SessionError> {
        self.require_playing()?;
        if accrual::score_counts_as_event(&config.milestone, delta) {
            self.record_event(config, 1)
        } else {
            Ok(None)
        }
    }

    pub fn record_collected(&mut self, count: u64) -> Result<u64, SessionError> {
        self.require_playing()?;
        self.collected_items = self.collected_items.saturating_add(count);
        Ok(self.collected_items)
    }

    /// Playing → InterruptionAd.
    pub fn suspend(
        &mut self,
        interruption_id: String,
        duration_secs: u64,
        now: Instant,
    ) -> Result<(), SessionError> {
        self.require_playing()?;
        let interruption = ActiveInterruption::new(
            interruption_id,
            InterruptionKind::Mandatory,
            duration_secs,
            now,
        );
        self.phase = SessionPhase::InterruptionAd;
        self.interruption = Some(interruption);
        self.generation += 1;
        Ok(())
    }

    /// InterruptionAd → Playing. Returns the finished interruption.
    pub fn resume(&mut self, now: Instant) -> Result<ActiveInterruption, SessionError> {
        if self.phase != SessionPhase::InterruptionAd {
            return Err(SessionError::NoInterruption);
        }
        let interruption = self.interruption.take().ok_or(SessionError::NoInterruption)?;
        self.phase = SessionPhase::Playing;
        if let Some(monitor) = self.activity.as_mut() {
            monitor.rearm(now);
        }
        self.generation += 1;
        Ok(interruption)
    }

    /// Playing → EndingAd. Cash-out policies convert progress here; the
    /// conversion is returned when there was any.
    pub fn end(
        &mut self,
        reason: EndReason,
        interruption_id: String,
        config: &RewardConfig,
        now: Instant,
    ) -> Result<Option<MilestoneHit>, SessionError> {
        self.require_playing()?;
        let interruption = ActiveInterruption::new(
            interruption_id,
            InterruptionKind::Ending,
            config.ending_secs,
            now,
        );

        let mut conversion = None;
        if reason.converts_progress() {
            let requested = accrual::cash_out_amount(
                &config.milestone,
                self.elapsed_active_secs,
                self.collected_items,
            );
            if requested > 0 {
                let before = self.reward.pending;
                let pending = self.reward.accrue(requested);
                conversion = Some(MilestoneHit {
                    requested,
                    granted: pending - before,
                    pending,
                    interrupt: false,
                });
            }
        }

        self.phase = SessionPhase::EndingAd;
        self.end_reason = Some(reason);
        self.interruption = Some(interruption);
        self.generation += 1;
        Ok(conversion)
    }

    /// Hands out the pending reward for flushing, at most once per session.
    pub fn take_flush(&mut self) -> Option<u64> {
        if self.phase != SessionPhase::EndingAd || self.flush_taken {
            return None;
        }
        self.flush_taken = true;
        match self.reward.pending {
            0 => None,
            amount => Some(amount),
        }
    }

    /// EndingAd → Idle, keeping the result for display.
    pub fn finish(&mut self, result: SessionResult) {
        let generation = self.generation + 1;
        let cap = self.reward.cap;
        *self = Self::new(cap);
        self.last_result = Some(result);
        self.generation = generation;
    }

    /// Drops the session without flushing (title screen, unmount).
    pub fn reset(&mut self) {
        let generation = self.generation + 1;
        let cap = self.reward.cap;
        *self = Self::new(cap);
        self.generation = generation;
    }

    pub fn check_dismiss(&self, now: Instant) -> Result<(), SessionError> {
        match (&self.phase, &self.interruption) {
            (SessionPhase::InterruptionAd | SessionPhase::EndingAd, Some(ad)) => {
                Ok(ad.check_dismiss(now)?)
            }
            _ => Err(SessionError::NoInterruption),
        }
    }

    pub fn dismiss_result(&mut self) -> Option<SessionResult> {
        self.last_result.take()
    }

    pub fn is_current(&self, generation: u64) -> bool {
        self.generation == generation
    }

    pub(super) fn activity_mut(&mut self) -> Option<&mut ActivityMonitor> {
        self.activity.as_mut()
    }

    pub(super) fn accrue_active_second(&mut self, policy: &MilestonePolicy) -> Option<MilestoneHit> {
        self.elapsed_active_secs += 1;
        accrual::on_active_second(policy, &mut self.milestone_counter, &mut self.reward)
    }

    fn require_playing(&self) -> Result<(), SessionError> {
        if self.phase == SessionPhase::Playing {
            Ok(())
        } else {
            Err(SessionError::NotPlaying)
        }
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new(super::config::DEFAULT_SESSION_CAP)
    }
}

#[cfg(test)]
mod tests {
    use tokio::time::Duration;

    use super::*;
    use crate::session::config::{GameProfile, ProgressSource, MAX_DURATION_SECS};

    fn cash_out_config() -> RewardConfig {
        RewardConfig {
            milestone: MilestonePolicy::CashOut {
                source: ProgressSource::ElapsedSeconds,
                progress_units: 100,
                reward_units: 5,
            },
            ..GameProfile::Tetris.reward_config()
        }
    }

    fn playing(config: &RewardConfig, now: Instant) -> SessionState {
        let mut state = SessionState::new(config.session_cap);
        state.begin("s-1".into(), config, now).unwrap();
        state
    }

    #[test]
    fn serialized_state_omits_clock_internals() {
        let config = GameProfile::Wolf3d.reward_config();
        let state = playing(&config, Instant::now());
        let value = serde_json::to_value(&state).unwrap();

        assert_eq!(value["sessionId"], "s-1");
        assert!(value.get("generation").is_none());
        assert!(value.get("flushTaken").is_none());
        let activity = &value["activity"];
        assert!(activity.get("lastInputAt").is_some());
        assert!(activity.get("lastInput").is_none());
    }

    #[test]
    fn begin_resets_counters_and_bumps_generation() {
        let config = GameProfile::Wolf3d.reward_config();
        let t0 = Instant::now();
        let mut state = SessionState::new(config.session_cap);
        state.elapsed_active_secs = 99;
        state.reward.accrue(7);
        state.milestone_counter = 3;

        state.begin("s-1".into(), &config, t0).unwrap();

        assert_eq!(state.phase, SessionPhase::Playing);
        assert_eq!(state.elapsed_active_secs, 0);
        assert_eq!(state.pending_reward(), 0);
        assert_eq!(state.milestone_counter, 0);
        assert_eq!(state.generation, 1);
        assert_eq!(
            state.begin("s-2".into(), &config, t0),
            Err(SessionError::AlreadyActive)
        );
    }

    #[test]
    fn oversized_countdowns_still_transition_cleanly() {
        let config = RewardConfig {
            ending_secs: u64::MAX,
            ..GameProfile::Doom.reward_config()
        };
        let t0 = Instant::now();
        let mut state = playing(&config, t0);
        let generation = state.generation;

        state.suspend("ad-1".into(), u64::MAX, t0).unwrap();
        assert_eq!(state.phase, SessionPhase::InterruptionAd);
        assert_eq!(state.generation, generation + 1);
        state.resume(t0).unwrap();

        state
            .end(EndReason::GameOver, "ad-2".into(), &config, t0)
            .unwrap();
        assert_eq!(state.phase, SessionPhase::EndingAd);
        assert_eq!(
            state.interruption.as_ref().map(|ad| ad.duration_secs),
            Some(MAX_DURATION_SECS)
        );
    }

    #[test]
    fn afk_return_resets_elapsed_under_reset_policy() {
        let mut config = GameProfile::Doom.reward_config();
        config.afk_threshold_secs = 12;
        let t0 = Instant::now();
        let mut state = playing(&config, t0);
        state.elapsed_active_secs = 45;
        state.milestone_counter = 45;

        let outcome = state.record_activity(&config, t0 + Duration::from_secs(13));

        assert_eq!(outcome, ActivityOutcome::ReturnedFromAfk { punished: true });
        assert_eq!(state.elapsed_active_secs, 0);
        assert_eq!(state.milestone_counter, 0);
    }

    #[test]
    fn afk_return_keeps_elapsed_under_pause_policy() {
        let mut config = GameProfile::Doom.reward_config();
        config.afk_policy = AfkPolicy::Pause;
        let t0 = Instant::now();
        let mut state = playing(&config, t0);
        state.elapsed_active_secs = 45;

        let outcome = state.record_activity(&config, t0 + Duration::from_secs(60));

        assert_eq!(outcome, ActivityOutcome::ReturnedFromAfk { punished: false });
        assert_eq!(state.elapsed_active_secs, 45);
    }

    #[test]
    fn cash_out_converts_and_clamps_to_cap() {
        let config = cash_out_config();
        let t0 = Instant::now();
        let mut state = playing(&config, t0);
        state.elapsed_active_secs = 1200;

        let conversion = state
            .end(EndReason::CashOut, "ad-1".into(), &config, t0)
            .unwrap()
            .unwrap();

        assert_eq!(conversion.requested, 60);
        assert_eq!(conversion.granted, 50);
        assert!(conversion.truncated());
        assert_eq!(state.pending_reward(), 50);
        assert_eq!(state.phase, SessionPhase::EndingAd);
    }

    #[test]
    fn restart_forfeits_conversion() {
        let config = cash_out_config();
        let t0 = Instant::now();
        let mut state = playing(&config, t0);
        state.elapsed_active_secs = 1200;

        let conversion = state
            .end(EndReason::Restart, "ad-1".into(), &config, t0)
            .unwrap();

        assert_eq!(conversion, None);
        assert_eq!(state.pending_reward(), 0);
    }

    #[test]
    fn flush_is_handed_out_once() {
        let config = GameProfile::Wolf3d.reward_config();
        let t0 = Instant::now();
        let mut state = playing(&config, t0);
        for _ in 0..8 {
            state.record_event(&config, 1).unwrap();
        }
        state
            .end(EndReason::CashOut, "ad-1".into(), &config, t0)
            .unwrap();

        assert_eq!(state.take_flush(), Some(1));
        assert_eq!(state.take_flush(), None);
    }

    #[test]
    fn zero_progress_has_nothing_to_flush() {
        let config = GameProfile::Doom.reward_config();
        let t0 = Instant::now();
        let mut state = playing(&config, t0);
        state
            .end(EndReason::GameOver, "ad-1".into(), &config, t0)
            .unwrap();
        assert_eq!(state.take_flush(), None);

        let result = SessionResult::new("s-1".into(), EndReason::GameOver, 0, 0, FlushOutcome::NothingToFlush);
        state.finish(result);
        assert_eq!(state.phase, SessionPhase::Idle);
        assert_eq!(state.pending_reward(), 0);
        assert!(state.last_result.is_some());
    }

    #[test]
    fn events_outside_playing_are_rejected() {
        let config = GameProfile::Wolf3d.reward_config();
        let mut state = SessionState::new(config.session_cap);
        assert_eq!(state.record_event(&config, 1), Err(SessionError::NotPlaying));
        assert_eq!(state.record_collected(3), Err(SessionError::NotPlaying));
    }

    #[test]
    fn pacman_ghost_score_awards_one() {
        let config = GameProfile::Pacman.reward_config();
        let t0 = Instant::now();
        let mut state = playing(&config, t0);

        assert_eq!(state.record_score(&config, 10).unwrap(), None);
        let hit = state.record_score(&config, 100).unwrap().unwrap();
        assert_eq!(hit.pending, 1);
    }

    #[test]
    fn resume_rearms_activity_and_keeps_elapsed() {
        let config = GameProfile::Doom.reward_config();
        let t0 = Instant::now();
        let mut state = playing(&config, t0);
        state.elapsed_active_secs = 180;
        state.suspend("ad-1".into(), 15, t0).unwrap();

        let later = t0 + Duration::from_secs(15);
        let ad = state.resume(later).unwrap();

        assert_eq!(ad.kind, InterruptionKind::Mandatory);
        assert_eq!(state.phase, SessionPhase::Playing);
        assert_eq!(state.elapsed_active_secs, 180);
        assert!(!state.activity.as_ref().unwrap().is_currently_afk(later));
    }

    #[test]
    fn dismiss_rules_follow_the_interruption_kind() {
        let config = GameProfile::Doom.reward_config();
        let t0 = Instant::now();
        let mut state = playing(&config, t0);
        state.suspend("ad-1".into(), 15, t0).unwrap();
        assert_eq!(
            state.check_dismiss(t0 + Duration::from_secs(20)),
            Err(SessionError::Dismiss(DismissError::Mandatory))
        );

        state.resume(t0).unwrap();
        state
            .end(EndReason::CashOut, "ad-2".into(), &config, t0)
            .unwrap();
        assert!(state.check_dismiss(t0 + Duration::from_secs(1)).is_err());
        assert_eq!(state.check_dismiss(t0 + Duration::from_secs(5)), Ok(()));
    }
}
