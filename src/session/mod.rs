pub mod accrual;
pub mod activity;
pub mod clock;
pub mod commands;
pub mod config;
pub mod controller;
pub mod interruption;
pub mod state;

pub use config::{AfkPolicy, GameProfile, MilestonePolicy, ProgressSource, RewardConfig};
pub use controller::{SessionController, SessionSnapshot};
pub use state::{
    EndReason, FlushOutcome, SessionError, SessionPhase, SessionResult, SessionState,
};
