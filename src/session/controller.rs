use std::{future::Future, ops::ControlFlow, pin::Pin, sync::Arc};

use chrono::Utc;
use serde::Serialize;
use tokio::{
    sync::Mutex,
    time::{Duration, Instant},
};
use uuid::Uuid;

use crate::{
    db::{Database, FlushStatus, InterruptionRecord, LedgerStatus, SessionRecord},
    events::{EventBus, SessionEvent},
    settings::SettingsStore,
    sink::{CurrentUser, RewardSink},
    surface::{GameSurface, SurfaceMessage, TouchControl},
};

use super::{
    accrual::MilestoneHit,
    clock,
    config::{ConfigError, RewardConfig},
    interruption::{begin_interruption, ActiveInterruption, InterruptionKind, ScheduledTask},
    state::{
        ActivityOutcome, EndReason, FlushOutcome, SessionError, SessionPhase, SessionResult,
        SessionState, TickOutcome,
    },
};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info, log_warn};

type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub is_afk: bool,
    pub interruption_remaining_secs: u64,
}

impl SessionSnapshot {
    fn capture(state: &SessionState, now: Instant) -> Self {
        Self {
            state: state.clone(),
            is_afk: state.is_afk(),
            interruption_remaining_secs: state.interruption_remaining_secs(now),
        }
    }

    pub fn session_id(&self) -> &str {
        self.state.session_id.as_deref().unwrap_or_default()
    }
}

/// Timers owned by the current phase: the clock while playing, a countdown
/// while an ad runs.
#[derive(Default)]
struct SessionTasks {
    clock: Option<ScheduledTask>,
    countdown: Option<ScheduledTask>,
}

#[derive(Clone)]
pub struct SessionController {
    state: Arc<Mutex<SessionState>>,
    tasks: Arc<Mutex<SessionTasks>>,
    config: Arc<RewardConfig>,
    user: Arc<Mutex<Option<CurrentUser>>>,
    sink: Arc<dyn RewardSink>,
    surface: Arc<dyn GameSurface>,
    ledger: Option<Database>,
    events: EventBus,
    tick_interval: Duration,
    heartbeat_every_ticks: u64,
}

impl SessionController {
    pub fn new(
        config: RewardConfig,
        user: Option<CurrentUser>,
        sink: Arc<dyn RewardSink>,
        surface: Arc<dyn GameSurface>,
        events: EventBus,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let debug_mode = SettingsStore::debug_mode();

        Ok(Self {
            state: Arc::new(Mutex::new(SessionState::new(config.session_cap))),
            tasks: Arc::new(Mutex::new(SessionTasks::default())),
            config: Arc::new(config),
            user: Arc::new(Mutex::new(user)),
            sink,
            surface,
            ledger: None,
            events,
            tick_interval: Duration::from_secs(1),
            heartbeat_every_ticks: if debug_mode { 1 } else { 10 },
        })
    }

    pub fn with_ledger(mut self, db: Database) -> Self {
        self.ledger = Some(db);
        self
    }

    pub fn config(&self) -> &RewardConfig {
        &self.config
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Sign-in changes apply to the next flush, including a session already running.
    pub async fn set_user(&self, user: Option<CurrentUser>) {
        match &user {
            Some(user) => log_info!("Rewards will be credited to {}", user.id),
            None => log_info!("Signed out; rewards will not be credited"),
        }
        *self.user.lock().await = user;
    }

    pub async fn user(&self) -> Option<CurrentUser> {
        self.user.lock().await.clone()
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        let state = self.state.lock().await;
        SessionSnapshot::capture(&state, Instant::now())
    }

    pub async fn start(&self) -> Result<SessionSnapshot, SessionError> {
        let now = Instant::now();
        let session_id = Uuid::new_v4().to_string();

        let snapshot = {
            let mut state = self.state.lock().await;
            state.begin(session_id.clone(), &self.config, now)?;
            SessionSnapshot::capture(&state, now)
        };

        let started_at = snapshot.state.started_at.unwrap_or_else(Utc::now);
        let user_id = self.user().await.map(|user| user.id);
        let record = SessionRecord {
            id: session_id.clone(),
            game: self.config.game.clone(),
            user_id,
            status: LedgerStatus::Playing,
            end_reason: None,
            elapsed_active_secs: 0,
            pending_reward: 0,
            session_cap: self.config.session_cap,
            flush_status: FlushStatus::None,
            balance_after: None,
            started_at,
            ended_at: None,
            created_at: started_at,
            updated_at: started_at,
        };
        self.record("insert session", move |db| async move {
            db.insert_session(&record).await
        })
        .await;

        self.start_clock(snapshot.state.generation).await;

        log_info!("Session {} started ({})", session_id, self.config.game);
        self.events
            .emit(SessionEvent::SessionStateChanged(snapshot.clone()));
        Ok(snapshot)
    }

    /// Any qualifying input: key press, touch, pointer, or a frame ping.
    pub async fn record_activity(&self) -> ActivityOutcome {
        let now = Instant::now();
        let (outcome, snapshot) = {
            let mut state = self.state.lock().await;
            let outcome = state.record_activity(&self.config, now);
            (outcome, SessionSnapshot::capture(&state, now))
        };

        if let ActivityOutcome::ReturnedFromAfk { punished } = outcome {
            if punished {
                log_info!(
                    "Session {} back from AFK; survival time reset",
                    snapshot.session_id()
                );
            } else {
                log_info!("Session {} back from AFK", snapshot.session_id());
            }
            self.events.emit(SessionEvent::SessionStateChanged(snapshot));
        }
        outcome
    }

    /// Touch control input: counts as activity, then goes to the surface.
    pub async fn handle_input(&self, control: TouchControl) -> ActivityOutcome {
        let outcome = self.record_activity().await;
        if let Err(err) = control.dispatch(self.surface.as_ref()) {
            log_warn!("Failed to forward {:?} to game surface: {}", control, err);
        }
        outcome
    }

    /// Raw message posted by the embedded game. Best effort: anything that
    /// cannot be parsed or applied is logged and dropped.
    pub async fn handle_surface_message(&self, raw: &str) {
        let message = match SurfaceMessage::parse(raw) {
            Ok(message) => message,
            Err(err) => {
                log_warn!("Ignoring malformed surface message {:?}: {}", raw, err);
                return;
            }
        };

        let applied = match message {
            SurfaceMessage::Activity => {
                self.record_activity().await;
                Ok(())
            }
            SurfaceMessage::GameOver => self.game_over().await.map(|_| ()),
            SurfaceMessage::Kill { count } => self.record_event(count).await.map(|_| ()),
            SurfaceMessage::Score { delta } => self.record_score(delta).await.map(|_| ()),
            SurfaceMessage::Collect { count } => self.record_collected(count).await.map(|_| ()),
        };

        if let Err(err) = applied {
            log_debug!("Surface message {:?} not applied: {}", message, err);
        }
    }

    pub async fn record_event(&self, weight: u64) -> Result<Option<MilestoneHit>, SessionError> {
        let now = Instant::now();
        let (hit, snapshot) = {
            let mut state = self.state.lock().await;
            let hit = state.record_event(&self.config, weight)?;
            (hit, SessionSnapshot::capture(&state, now))
        };
        self.after_event_hit(hit, snapshot);
        Ok(hit)
    }

    pub async fn record_score(&self, delta: u64) -> Result<Option<MilestoneHit>, SessionError> {
        let now = Instant::now();
        let (hit, snapshot) = {
            let mut state = self.state.lock().await;
            let hit = state.record_score(&self.config, delta)?;
            (hit, SessionSnapshot::capture(&state, now))
        };
        self.after_event_hit(hit, snapshot);
        Ok(hit)
    }

    pub async fn record_collected(&self, count: u64) -> Result<u64, SessionError> {
        let mut state = self.state.lock().await;
        state.record_collected(count)
    }

    pub async fn cash_out(&self) -> Result<SessionSnapshot, SessionError> {
        self.end_session(EndReason::CashOut).await
    }

    pub async fn game_over(&self) -> Result<SessionSnapshot, SessionError> {
        self.end_session(EndReason::GameOver).await
    }

    pub async fn restart(&self) -> Result<SessionSnapshot, SessionError> {
        self.end_session(EndReason::Restart).await
    }

    /// Closes the result message when idle. Ads refuse unless the ending
    /// countdown already reached zero; dismissing never completes an ad.
    pub async fn dismiss(&self) -> Result<(), SessionError> {
        let now = Instant::now();
        let mut state = self.state.lock().await;
        let phase = state.phase;
        match phase {
            SessionPhase::Idle => {
                if state.dismiss_result().is_some() {
                    let snapshot = SessionSnapshot::capture(&state, now);
                    drop(state);
                    self.events.emit(SessionEvent::SessionStateChanged(snapshot));
                }
                Ok(())
            }
            _ => state.check_dismiss(now),
        }
    }

    /// Tears the session down without flushing (title screen, unmount).
    pub async fn shutdown(&self) {
        {
            let mut tasks = self.tasks.lock().await;
            if let Some(task) = tasks.clock.take() {
                task.cancel();
            }
            if let Some(task) = tasks.countdown.take() {
                task.cancel();
            }
        }

        let now = Instant::now();
        let (abandoned, snapshot) = {
            let mut state = self.state.lock().await;
            let abandoned = (state.phase != SessionPhase::Idle).then(|| {
                (
                    state.session_id.clone().unwrap_or_default(),
                    state.elapsed_active_secs,
                    state.pending_reward(),
                    state.interruption.clone(),
                )
            });
            state.reset();
            (abandoned, SessionSnapshot::capture(&state, now))
        };

        let Some((session_id, elapsed, pending, interruption)) = abandoned else {
            return;
        };

        if pending > 0 {
            log_warn!(
                "Session {} abandoned with {} unflushed points",
                session_id,
                pending
            );
        } else {
            log_info!("Session {} abandoned", session_id);
        }

        if let Some(ad) = interruption {
            self.close_interruption(&ad).await;
        }
        let ended_at = Utc::now();
        self.record("mark session abandoned", move |db| async move {
            db.mark_session_abandoned(&session_id, elapsed, pending, ended_at)
                .await
        })
        .await;

        self.events.emit(SessionEvent::SessionStateChanged(snapshot));
    }

    async fn end_session(&self, reason: EndReason) -> Result<SessionSnapshot, SessionError> {
        let now = Instant::now();
        let (snapshot, conversion) = {
            let mut state = self.state.lock().await;
            let conversion = state.end(reason, Uuid::new_v4().to_string(), &self.config, now)?;
            (SessionSnapshot::capture(&state, now), conversion)
        };
        self.cancel_clock().await;

        let session_id = snapshot.session_id().to_string();
        let elapsed = snapshot.state.elapsed_active_secs;
        let pending = snapshot.state.pending_reward();
        log_info!(
            "Session {} ending ({}) after {}s with {} points pending",
            session_id,
            reason.as_str(),
            elapsed,
            pending
        );

        if let Some(hit) = conversion {
            self.report_truncation(&session_id, &hit);
        }

        let ledger_session_id = session_id.clone();
        self.record("mark session ending", move |db| async move {
            db.mark_session_ending(
                &ledger_session_id,
                reason.as_str(),
                elapsed,
                pending,
                Utc::now(),
            )
            .await
        })
        .await;

        if let Some(ad) = snapshot.state.interruption.clone() {
            self.open_interruption(&session_id, &ad).await;
            let controller = self.clone();
            let generation = snapshot.state.generation;
            let countdown =
                begin_interruption(ad.duration_secs, move || controller.finish_after(generation));
            self.replace_countdown(countdown).await;
        }

        self.events
            .emit(SessionEvent::SessionStateChanged(snapshot.clone()));
        Ok(snapshot)
    }

    fn after_event_hit(&self, hit: Option<MilestoneHit>, snapshot: SessionSnapshot) {
        let Some(hit) = hit else {
            return;
        };
        log_info!(
            "Session {} milestone: +{} ({} pending)",
            snapshot.session_id(),
            hit.granted,
            hit.pending
        );
        self.report_truncation(snapshot.session_id(), &hit);
        self.events.emit(SessionEvent::SessionStateChanged(snapshot));
    }

    fn report_truncation(&self, session_id: &str, hit: &MilestoneHit) {
        if !hit.truncated() {
            return;
        }
        log_debug!(
            "Session {} reward clamped at cap: requested {}, granted {}",
            session_id,
            hit.requested,
            hit.granted
        );
        self.events.emit(SessionEvent::RewardTruncated {
            session_id: session_id.to_string(),
            requested: hit.requested,
            granted: hit.granted,
        });
    }

    async fn start_clock(&self, generation: u64) {
        let controller = self.clone();
        let task = clock::spawn_clock(self.tick_interval, move || {
            controller.clone().tick(generation)
        });
        if let Some(previous) = self.tasks.lock().await.clock.replace(task) {
            previous.cancel();
        }
    }

    async fn cancel_clock(&self) {
        if let Some(task) = self.tasks.lock().await.clock.take() {
            task.cancel();
        }
    }

    async fn replace_countdown(&self, countdown: ScheduledTask) {
        if let Some(previous) = self.tasks.lock().await.countdown.replace(countdown) {
            previous.cancel();
        }
    }

    fn tick(self, generation: u64) -> BoxFuture<ControlFlow<()>> {
        Box::pin(async move { self.on_tick(generation).await })
    }

    fn resume_after(self, generation: u64) -> BoxFuture<()> {
        Box::pin(async move { self.complete_interruption(generation).await })
    }

    fn finish_after(self, generation: u64) -> BoxFuture<()> {
        Box::pin(async move { self.finish_session(generation).await })
    }

    async fn on_tick(&self, generation: u64) -> ControlFlow<()> {
        let now = Instant::now();
        let (outcome, snapshot) = {
            let mut state = self.state.lock().await;
            let outcome = clock::advance(
                &mut state,
                generation,
                || Uuid::new_v4().to_string(),
                &self.config,
                now,
            );
            (outcome, SessionSnapshot::capture(&state, now))
        };

        match outcome {
            TickOutcome::Skipped => ControlFlow::Break(()),
            TickOutcome::Afk { newly } => {
                if newly {
                    log_info!(
                        "Session {} AFK (no input for {}s); clock paused",
                        snapshot.session_id(),
                        self.config.afk_threshold_secs
                    );
                    self.events.emit(SessionEvent::SessionStateChanged(snapshot));
                }
                ControlFlow::Continue(())
            }
            TickOutcome::Advanced { elapsed } => {
                self.heartbeat(snapshot, elapsed);
                ControlFlow::Continue(())
            }
            TickOutcome::Milestone { elapsed, hit } => {
                log_info!(
                    "Session {} survived {}s: +{} ({} pending)",
                    snapshot.session_id(),
                    elapsed,
                    hit.granted,
                    hit.pending
                );
                self.report_truncation(snapshot.session_id(), &hit);
                if snapshot.state.phase == SessionPhase::InterruptionAd {
                    self.enter_interruption(snapshot).await;
                    ControlFlow::Break(())
                } else {
                    self.heartbeat(snapshot, elapsed);
                    ControlFlow::Continue(())
                }
            }
        }
    }

    fn heartbeat(&self, snapshot: SessionSnapshot, elapsed: u64) {
        if elapsed % self.heartbeat_every_ticks == 0 {
            if let Some(db) = self.ledger.clone() {
                let session_id = snapshot.session_id().to_string();
                let pending = snapshot.state.pending_reward();
                tokio::spawn(async move {
                    if let Err(err) = db
                        .update_session_progress(&session_id, elapsed, pending, Utc::now())
                        .await
                    {
                        log_error!("Failed to persist progress for {}: {:?}", session_id, err);
                    }
                });
            }
        }
        self.events.emit(SessionEvent::SessionHeartbeat(snapshot));
    }

    async fn enter_interruption(&self, snapshot: SessionSnapshot) {
        let Some(ad) = snapshot.state.interruption.clone() else {
            return;
        };
        let generation = snapshot.state.generation;
        let session_id = snapshot.session_id().to_string();

        self.cancel_clock().await;
        self.open_interruption(&session_id, &ad).await;

        let controller = self.clone();
        let countdown =
            begin_interruption(ad.duration_secs, move || controller.resume_after(generation));
        self.replace_countdown(countdown).await;

        self.events.emit(SessionEvent::SessionStateChanged(snapshot));
    }

    async fn complete_interruption(&self, generation: u64) {
        let now = Instant::now();
        let resumed = {
            let mut state = self.state.lock().await;
            if !state.is_current(generation) {
                return;
            }
            match state.resume(now) {
                Ok(ad) => (ad, state.generation, SessionSnapshot::capture(&state, now)),
                Err(err) => {
                    log_warn!("Interruption countdown finished out of phase: {}", err);
                    return;
                }
            }
        };
        let (ad, generation, snapshot) = resumed;
        self.tasks.lock().await.countdown.take();

        log_info!(
            "Session {} resumed after {}s interruption",
            snapshot.session_id(),
            ad.duration_secs
        );
        if let Err(err) = self.surface.focus() {
            log_warn!("Could not refocus game surface: {}", err);
        }
        self.start_clock(generation).await;
        self.close_interruption(&ad).await;

        self.events.emit(SessionEvent::SessionStateChanged(snapshot));
    }

    async fn finish_session(&self, generation: u64) {
        let taken = {
            let mut state = self.state.lock().await;
            if !state.is_current(generation) || state.phase != SessionPhase::EndingAd {
                return;
            }
            let flush = state.take_flush();
            (
                state.session_id.clone().unwrap_or_default(),
                state.end_reason.unwrap_or(EndReason::GameOver),
                state.elapsed_active_secs,
                state.interruption.clone(),
                flush,
            )
        };
        let (session_id, reason, elapsed, interruption, flush) = taken;
        self.tasks.lock().await.countdown.take();

        let (reward, outcome) = self.flush(&session_id, flush).await;
        let result = SessionResult::new(session_id.clone(), reason, elapsed, reward, outcome);
        log_info!("Session {} completed: {}", session_id, result.message);

        let now = Instant::now();
        let snapshot = {
            let mut state = self.state.lock().await;
            if state.is_current(generation) {
                state.finish(result.clone());
                Some(SessionSnapshot::capture(&state, now))
            } else {
                None
            }
        };

        if let Some(ad) = interruption {
            self.close_interruption(&ad).await;
        }
        let flush_status = FlushStatus::from(&result.outcome);
        let balance_after = match result.outcome {
            FlushOutcome::Credited { balance } => Some(balance),
            _ => None,
        };
        self.record("mark session completed", move |db| async move {
            db.mark_session_completed(&session_id, flush_status, balance_after, Utc::now())
                .await
        })
        .await;

        self.events.emit(SessionEvent::SessionCompleted(result));
        if let Some(snapshot) = snapshot {
            self.events.emit(SessionEvent::SessionStateChanged(snapshot));
        }
    }

    /// Single attempt. Failures are logged and the reward is dropped.
    async fn flush(&self, session_id: &str, amount: Option<u64>) -> (u64, FlushOutcome) {
        let Some(amount) = amount else {
            return (0, FlushOutcome::NothingToFlush);
        };
        let Some(user) = self.user().await else {
            log_info!(
                "Guest session {} earned {} points; nothing credited",
                session_id,
                amount
            );
            return (amount, FlushOutcome::Skipped);
        };

        match self.sink.credit(&user, amount).await {
            Ok(balance) => {
                log_info!(
                    "Credited {} points to {} (balance {})",
                    amount,
                    user.id,
                    balance
                );
                (amount, FlushOutcome::Credited { balance })
            }
            Err(err) => {
                log_error!(
                    "Failed to credit {} points to {} for session {}: {}",
                    amount,
                    user.id,
                    session_id,
                    err
                );
                (amount, FlushOutcome::Failed)
            }
        }
    }

    async fn open_interruption(&self, session_id: &str, ad: &ActiveInterruption) {
        self.events.emit(SessionEvent::InterruptionStarted {
            session_id: session_id.to_string(),
            duration_secs: ad.duration_secs,
            mandatory: ad.kind == InterruptionKind::Mandatory,
        });

        let record = InterruptionRecord {
            id: ad.id.clone(),
            session_id: session_id.to_string(),
            kind: ad.kind.as_str().to_string(),
            started_at: ad.started_at,
            ended_at: None,
            duration_secs: None,
        };
        self.record("insert interruption", move |db| async move {
            db.insert_interruption(&record).await
        })
        .await;
    }

    async fn close_interruption(&self, ad: &ActiveInterruption) {
        let ended_at = Utc::now();
        let duration_secs = (ended_at - ad.started_at).num_seconds().max(0) as u64;
        let interruption_id = ad.id.clone();
        self.record("close interruption", move |db| async move {
            db.finalize_interruption(&interruption_id, ended_at, duration_secs)
                .await
        })
        .await;
    }

    /// Ledger writes never affect the session; failures are only logged.
    async fn record<F, Fut>(&self, action: &str, op: F)
    where
        F: FnOnce(Database) -> Fut,
        Fut: Future<Output = anyhow::Result<()>>,
    {
        let Some(db) = self.ledger.clone() else {
            return;
        };
        if let Err(err) = op(db).await {
            log_error!("Session ledger: failed to {}: {:?}", action, err);
        }
    }
}
