use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_SESSION_CAP: u64 = 50;
pub const DEFAULT_INTERRUPTION_SECS: u64 = 15;
pub const DEFAULT_ENDING_SECS: u64 = 5;
/// Upper bound for countdowns and the AFK threshold: one day.
pub const MAX_DURATION_SECS: u64 = 86_400;

const FAST_ACTION_AFK_SECS: u64 = 10;
const PLATFORMER_AFK_SECS: u64 = 30;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },
    #[error("{field} must be at most {max} seconds")]
    TooLong { field: &'static str, max: u64 },
    #[error("unknown game profile '{0}'")]
    UnknownProfile(String),
}

/// What happens to survival progress when a player comes back from AFK.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum AfkPolicy {
    /// Survival time restarts from zero on the first input after going AFK.
    #[default]
    Reset,
    /// AFK ticks are skipped; accumulated time is kept.
    Pause,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum ProgressSource {
    ElapsedSeconds,
    CollectedItems,
}

/// How progress turns into reward.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum MilestonePolicy {
    /// `reward` every `every_secs` of active survival, followed by a mandatory interruption.
    Time { every_secs: u64, reward: u64 },
    /// `reward` every `every_events` discrete events. A score delta equal to
    /// `score_event_value` counts as one event.
    Event {
        every_events: u64,
        reward: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        score_event_value: Option<u64>,
    },
    /// Progress is converted at cash-out: `progress_units` of progress buy `reward_units`.
    CashOut {
        source: ProgressSource,
        progress_units: u64,
        reward_units: u64,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RewardConfig {
    pub game: String,
    pub afk_threshold_secs: u64,
    #[serde(default)]
    pub afk_policy: AfkPolicy,
    pub milestone: MilestonePolicy,
    #[serde(default = "default_session_cap")]
    pub session_cap: u64,
    #[serde(default = "default_interruption_secs")]
    pub interruption_secs: u64,
    #[serde(default = "default_ending_secs")]
    pub ending_secs: u64,
}

fn default_session_cap() -> u64 {
    DEFAULT_SESSION_CAP
}

fn default_interruption_secs() -> u64 {
    DEFAULT_INTERRUPTION_SECS
}

fn default_ending_secs() -> u64 {
    DEFAULT_ENDING_SECS
}

impl RewardConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let nonzero = |value: u64, field: &'static str| {
            if value == 0 {
                Err(ConfigError::Zero { field })
            } else {
                Ok(())
            }
        };

        let bounded = |value: u64, field: &'static str| {
            nonzero(value, field)?;
            if value > MAX_DURATION_SECS {
                Err(ConfigError::TooLong {
                    field,
                    max: MAX_DURATION_SECS,
                })
            } else {
                Ok(())
            }
        };

        bounded(self.afk_threshold_secs, "afk_threshold_secs")?;
        nonzero(self.session_cap, "session_cap")?;
        bounded(self.interruption_secs, "interruption_secs")?;
        bounded(self.ending_secs, "ending_secs")?;

        match self.milestone {
            MilestonePolicy::Time { every_secs, reward } => {
                nonzero(every_secs, "milestone.every_secs")?;
                nonzero(reward, "milestone.reward")
            }
            MilestonePolicy::Event {
                every_events,
                reward,
                score_event_value,
            } => {
                nonzero(every_events, "milestone.every_events")?;
                nonzero(reward, "milestone.reward")?;
                if let Some(value) = score_event_value {
                    nonzero(value, "milestone.score_event_value")?;
                }
                Ok(())
            }
            MilestonePolicy::CashOut {
                progress_units,
                reward_units,
                ..
            } => {
                nonzero(progress_units, "milestone.progress_units")?;
                nonzero(reward_units, "milestone.reward_units")
            }
        }
    }

    /// Whether the mandatory mid-session interruption can ever fire.
    pub fn interrupts_on_milestone(&self) -> bool {
        matches!(self.milestone, MilestonePolicy::Time { .. })
    }
}

/// Built-in wrappers and their reward tuning.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum GameProfile {
    Doom,
    Wolf3d,
    SpaceInvaders,
    Pacman,
    Mario,
    Tetris,
    Runner,
}

impl GameProfile {
    pub const ALL: [GameProfile; 7] = [
        GameProfile::Doom,
        GameProfile::Wolf3d,
        GameProfile::SpaceInvaders,
        GameProfile::Pacman,
        GameProfile::Mario,
        GameProfile::Tetris,
        GameProfile::Runner,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            GameProfile::Doom => "doom",
            GameProfile::Wolf3d => "wolf3d",
            GameProfile::SpaceInvaders => "spaceInvaders",
            GameProfile::Pacman => "pacman",
            GameProfile::Mario => "mario",
            GameProfile::Tetris => "tetris",
            GameProfile::Runner => "runner",
        }
    }

    pub fn parse(value: &str) -> Result<Self, ConfigError> {
        Self::ALL
            .into_iter()
            .find(|profile| profile.as_str().eq_ignore_ascii_case(value))
            .ok_or_else(|| ConfigError::UnknownProfile(value.to_string()))
    }

    pub fn reward_config(&self) -> RewardConfig {
        let (afk_threshold_secs, afk_policy, milestone) = match self {
            GameProfile::Doom => (
                FAST_ACTION_AFK_SECS,
                AfkPolicy::Reset,
                MilestonePolicy::Time {
                    every_secs: 180,
                    reward: 1,
                },
            ),
            GameProfile::Wolf3d | GameProfile::SpaceInvaders => (
                FAST_ACTION_AFK_SECS,
                AfkPolicy::Pause,
                MilestonePolicy::Event {
                    every_events: 8,
                    reward: 1,
                    score_event_value: None,
                },
            ),
            GameProfile::Pacman => (
                FAST_ACTION_AFK_SECS,
                AfkPolicy::Pause,
                MilestonePolicy::Event {
                    every_events: 1,
                    reward: 1,
                    score_event_value: Some(100),
                },
            ),
            GameProfile::Mario => (
                PLATFORMER_AFK_SECS,
                AfkPolicy::Reset,
                MilestonePolicy::Time {
                    every_secs: 180,
                    reward: 1,
                },
            ),
            GameProfile::Tetris => (
                PLATFORMER_AFK_SECS,
                AfkPolicy::Pause,
                MilestonePolicy::CashOut {
                    source: ProgressSource::ElapsedSeconds,
                    progress_units: 100,
                    reward_units: 5,
                },
            ),
            GameProfile::Runner => (
                FAST_ACTION_AFK_SECS,
                AfkPolicy::Reset,
                MilestonePolicy::CashOut {
                    source: ProgressSource::CollectedItems,
                    progress_units: 100,
                    reward_units: 5,
                },
            ),
        };

        RewardConfig {
            game: self.as_str().to_string(),
            afk_threshold_secs,
            afk_policy,
            milestone,
            session_cap: DEFAULT_SESSION_CAP,
            interruption_secs: DEFAULT_INTERRUPTION_SECS,
            ending_secs: DEFAULT_ENDING_SECS,
        }
    }
}
