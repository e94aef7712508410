//! Ledger rows for played sessions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::session::FlushOutcome;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum LedgerStatus {
    Playing,
    Ending,
    Completed,
    Abandoned,
    /// Left open by a crash and closed on the next start.
    Interrupted,
}

impl LedgerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LedgerStatus::Playing => "Playing",
            LedgerStatus::Ending => "Ending",
            LedgerStatus::Completed => "Completed",
            LedgerStatus::Abandoned => "Abandoned",
            LedgerStatus::Interrupted => "Interrupted",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum FlushStatus {
    None,
    Credited,
    Failed,
    Skipped,
}

impl FlushStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlushStatus::None => "None",
            FlushStatus::Credited => "Credited",
            FlushStatus::Failed => "Failed",
            FlushStatus::Skipped => "Skipped",
        }
    }
}

impl From<&FlushOutcome> for FlushStatus {
    fn from(outcome: &FlushOutcome) -> Self {
        match outcome {
            FlushOutcome::Credited { .. } => FlushStatus::Credited,
            FlushOutcome::Failed => FlushStatus::Failed,
            FlushOutcome::Skipped => FlushStatus::Skipped,
            FlushOutcome::NothingToFlush => FlushStatus::None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub id: String,
    pub game: String,
    pub user_id: Option<String>,
    pub status: LedgerStatus,
    pub end_reason: Option<String>,
    pub elapsed_active_secs: u64,
    pub pending_reward: u64,
    pub session_cap: u64,
    pub flush_status: FlushStatus,
    pub balance_after: Option<u64>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
