use std::future::Future;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::{
    task::JoinHandle,
    time::{self, Duration, Instant},
};
use tokio_util::sync::CancellationToken;

use super::config::MAX_DURATION_SECS;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum InterruptionKind {
    /// Mid-session ad after a time milestone. Cannot be skipped.
    Mandatory,
    /// Ad shown before the session result.
    Ending,
}

impl InterruptionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            InterruptionKind::Mandatory => "Mandatory",
            InterruptionKind::Ending => "Ending",
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DismissError {
    #[error("mandatory interruption cannot be skipped")]
    Mandatory,
    #[error("interruption still has {remaining_secs}s to run")]
    CountdownRunning { remaining_secs: u64 },
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveInterruption {
    pub id: String,
    pub kind: InterruptionKind,
    pub duration_secs: u64,
    pub started_at: DateTime<Utc>,
    #[serde(skip)]
    deadline: Instant,
}

impl ActiveInterruption {
    /// Durations beyond [`MAX_DURATION_SECS`] are clamped to it.
    pub fn new(id: String, kind: InterruptionKind, duration_secs: u64, now: Instant) -> Self {
        let duration_secs = duration_secs.min(MAX_DURATION_SECS);
        Self {
            id,
            kind,
            duration_secs,
            started_at: Utc::now(),
            deadline: now + Duration::from_secs(duration_secs),
        }
    }

    /// Whole seconds left, rounded up so the display never shows 0 early.
    pub fn remaining_secs(&self, now: Instant) -> u64 {
        let left = self.deadline.saturating_duration_since(now);
        let whole = left.as_secs();
        if left.subsec_nanos() > 0 {
            whole + 1
        } else {
            whole
        }
    }

    pub fn check_dismiss(&self, now: Instant) -> Result<(), DismissError> {
        match self.kind {
            InterruptionKind::Mandatory => Err(DismissError::Mandatory),
            InterruptionKind::Ending => match self.remaining_secs(now) {
                0 => Ok(()),
                remaining_secs => Err(DismissError::CountdownRunning { remaining_secs }),
            },
        }
    }
}

/// A spawned background job that stops when its token is cancelled.
pub struct ScheduledTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl ScheduledTask {
    pub fn new(cancel: CancellationToken, handle: JoinHandle<()>) -> Self {
        Self { cancel, handle }
    }

    /// Stops the task at its next await point. The task is not aborted, so
    /// work it has already committed to (a completion callback) runs to the end.
    pub fn cancel(self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

/// Starts a countdown of `duration_secs`. `on_complete` runs exactly once when
/// it reaches zero and never if the returned task is cancelled first.
pub fn begin_interruption<F, Fut>(duration_secs: u64, on_complete: F) -> ScheduledTask
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    let handle = tokio::spawn(async move {
        tokio::select! {
            biased;
            _ = token.cancelled() => {}
            _ = time::sleep(Duration::from_secs(duration_secs)) => on_complete().await,
        }
    });
    ScheduledTask::new(cancel, handle)
}
