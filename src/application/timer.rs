use crate::application::tasks::TaskService;
use crate::domain::models::{FocusLog, StudyTask, TimerMode};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::focus_log_repository::FocusLogRepository;
use crate::infrastructure::task_store::{StoreAuth, TaskStore};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

pub const MIN_DURATION_MINUTES: u32 = 1;
/// Largest duration whose second count still fits in `remaining_seconds`.
pub const MAX_DURATION_MINUTES: u32 = u32::MAX / 60;

/// What a single countdown step did, beyond decrementing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickEffect {
    None,
    StudyCompleted,
    BreakCompleted,
}

/// The countdown state machine, free of I/O. Every transition succeeds;
/// persistence failures are handled outside this type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerState {
    pub mode: TimerMode,
    pub remaining_seconds: u32,
    pub running: bool,
    pub study_minutes: u32,
    pub break_minutes: u32,
}

fn normalize_minutes(minutes: i64) -> u32 {
    let clamped = minutes.clamp(
        i64::from(MIN_DURATION_MINUTES),
        i64::from(MAX_DURATION_MINUTES),
    );
    u32::try_from(clamped).unwrap_or(MAX_DURATION_MINUTES)
}

impl TimerState {
    pub fn new(study_minutes: i64, break_minutes: i64) -> Self {
        let study_minutes = normalize_minutes(study_minutes);
        let break_minutes = normalize_minutes(break_minutes);
        Self {
            mode: TimerMode::Studying,
            remaining_seconds: study_minutes * 60,
            running: false,
            study_minutes,
            break_minutes,
        }
    }

    pub fn tick(&mut self) -> TickEffect {
        if !self.running {
            return TickEffect::None;
        }
        if self.remaining_seconds > 1 {
            self.remaining_seconds -= 1;
            return TickEffect::None;
        }
        match self.mode {
            TimerMode::Studying => {
                self.mode = TimerMode::Resting;
                self.remaining_seconds = self.break_minutes * 60;
                TickEffect::StudyCompleted
            }
            TimerMode::Resting => {
                self.mode = TimerMode::Studying;
                self.remaining_seconds = self.study_minutes * 60;
                TickEffect::BreakCompleted
            }
        }
    }

    pub fn reset(&mut self) {
        self.running = false;
        self.mode = TimerMode::Studying;
        self.remaining_seconds = self.study_minutes * 60;
    }

    pub fn set_study_minutes(&mut self, minutes: i64) {
        self.study_minutes = normalize_minutes(minutes);
        if !self.running && self.mode == TimerMode::Studying {
            self.remaining_seconds = self.study_minutes * 60;
        }
    }

    pub fn set_break_minutes(&mut self, minutes: i64) {
        self.break_minutes = normalize_minutes(minutes);
    }
}

/// Snapshot re-emitted to the presentation layer on every state change.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct TimerSnapshot {
    pub mode: TimerMode,
    pub remaining_seconds: u32,
    pub running: bool,
    pub study_minutes: u32,
    pub break_minutes: u32,
    pub active_task: Option<StudyTask>,
    pub notice: Option<String>,
}

struct RuntimeState {
    timer: TimerState,
    auth: Option<StoreAuth>,
    active_task: Option<StudyTask>,
    notice: Option<String>,
    phase_started_at: Option<DateTime<Utc>>,
    ticker: Option<JoinHandle<()>>,
    next_log_sequence: u64,
}

impl RuntimeState {
    fn snapshot(&self) -> TimerSnapshot {
        TimerSnapshot {
            mode: self.timer.mode,
            remaining_seconds: self.timer.remaining_seconds,
            running: self.timer.running,
            study_minutes: self.timer.study_minutes,
            break_minutes: self.timer.break_minutes,
            active_task: self.active_task.clone(),
            notice: self.notice.clone(),
        }
    }

    /// Closes the phase that just ended and returns its log entry.
    fn close_phase(
        &mut self,
        mode: TimerMode,
        ended_at: DateTime<Utc>,
        interruption_reason: Option<&str>,
    ) -> Option<FocusLog> {
        let started_at = self.phase_started_at.take()?;
        let sequence = self.next_log_sequence;
        self.next_log_sequence += 1;
        Some(FocusLog {
            id: format!("flog-{}-{}", ended_at.timestamp_millis(), sequence),
            task_id: self.active_task.as_ref().map(|task| task.id.clone()),
            mode,
            started_at,
            ended_at: Some(ended_at),
            interruption_reason: interruption_reason.map(str::to_string),
        })
    }
}

struct ControllerInner<S>
where
    S: TaskStore + 'static,
{
    tasks: Arc<TaskService<S>>,
    focus_logs: Arc<dyn FocusLogRepository>,
    state: Mutex<RuntimeState>,
    snapshot_tx: watch::Sender<TimerSnapshot>,
}

/// Owns the countdown and couples phase completions to task progress.
///
/// The tick path never awaits: store writes triggered by a completed study
/// phase run as detached tasks whose results fold back into the snapshot
/// when they land. An in-flight write racing `reset` or teardown is left to
/// finish on its own; it always carries an absolute progress value, so a
/// late completion cannot double-count.
pub struct PomodoroController<S>
where
    S: TaskStore + 'static,
{
    inner: Arc<ControllerInner<S>>,
}

impl<S> PomodoroController<S>
where
    S: TaskStore + 'static,
{
    pub fn new(
        tasks: Arc<TaskService<S>>,
        focus_logs: Arc<dyn FocusLogRepository>,
        study_minutes: i64,
        break_minutes: i64,
    ) -> Self {
        let timer = TimerState::new(study_minutes, break_minutes);
        let state = RuntimeState {
            timer,
            auth: None,
            active_task: None,
            notice: None,
            phase_started_at: None,
            ticker: None,
            next_log_sequence: 0,
        };
        let (snapshot_tx, _snapshot_rx) = watch::channel(state.snapshot());
        Self {
            inner: Arc::new(ControllerInner {
                tasks,
                focus_logs,
                state: Mutex::new(state),
                snapshot_tx,
            }),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<TimerSnapshot> {
        self.inner.snapshot_tx.subscribe()
    }

    pub fn snapshot(&self) -> TimerSnapshot {
        self.inner.lock_state().snapshot()
    }

    pub fn set_auth(&self, auth: Option<StoreAuth>) {
        {
            let mut state = self.inner.lock_state();
            if auth.is_none() {
                state.active_task = None;
            }
            state.auth = auth;
        }
        self.inner.emit();
    }

    /// Starts (or resumes) the countdown and the once-per-second driver.
    pub fn start(&self) {
        {
            let mut state = self.inner.lock_state();
            if state.timer.running {
                return;
            }
            state.timer.running = true;
            if state.phase_started_at.is_none() {
                state.phase_started_at = Some(Utc::now());
            }

            let weak = Arc::downgrade(&self.inner);
            let handle = tokio::spawn(async move {
                let mut interval = tokio::time::interval(Duration::from_secs(1));
                interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                // The first tick of a fresh interval fires immediately.
                interval.tick().await;
                loop {
                    interval.tick().await;
                    let Some(inner) = weak.upgrade() else {
                        break;
                    };
                    ControllerInner::advance_tick(&inner);
                }
            });
            if let Some(stale) = state.ticker.replace(handle) {
                stale.abort();
            }
        }
        self.inner.emit();
    }

    /// Stops the driver; future ticks stop deterministically, in-flight
    /// writes do not.
    pub fn pause(&self) {
        let interrupted = {
            let mut state = self.inner.lock_state();
            if !state.timer.running {
                return;
            }
            state.timer.running = false;
            if let Some(ticker) = state.ticker.take() {
                ticker.abort();
            }
            let mode = state.timer.mode;
            state.close_phase(mode, Utc::now(), Some("paused"))
        };
        self.inner.emit();
        if let Some(log) = interrupted {
            self.inner.spawn_log_append(log);
        }
    }

    /// Returns to a stopped Studying state with a full study countdown.
    /// Progress already written stays written.
    pub fn reset(&self) {
        let interrupted = {
            let mut state = self.inner.lock_state();
            if let Some(ticker) = state.ticker.take() {
                ticker.abort();
            }
            let mode = state.timer.mode;
            let log = state.close_phase(mode, Utc::now(), Some("reset"));
            state.timer.reset();
            log
        };
        self.inner.emit();
        if let Some(log) = interrupted {
            self.inner.spawn_log_append(log);
        }
    }

    pub fn set_study_minutes(&self, minutes: i64) {
        self.inner.lock_state().timer.set_study_minutes(minutes);
        self.inner.emit();
    }

    pub fn set_break_minutes(&self, minutes: i64) {
        self.inner.lock_state().timer.set_break_minutes(minutes);
        self.inner.emit();
    }

    pub async fn set_active_task(&self, task_id: &str) -> Result<Option<StudyTask>, InfraError> {
        let auth = self.inner.require_auth()?;
        let task = self.inner.tasks.set_active_task(&auth, task_id).await?;
        {
            let mut state = self.inner.lock_state();
            state.active_task = task.clone();
        }
        self.inner.emit();
        Ok(task)
    }

    pub async fn exit_active_task(&self) -> Result<(), InfraError> {
        let auth = self.inner.require_auth()?;
        self.inner.tasks.exit_active_task(&auth).await?;
        {
            let mut state = self.inner.lock_state();
            state.active_task = None;
        }
        self.inner.emit();
        Ok(())
    }

    /// Re-reads the active task from the store into the snapshot.
    pub async fn refresh_active_task(&self) -> Result<Option<StudyTask>, InfraError> {
        let auth = self.inner.require_auth()?;
        let task = self.inner.tasks.read_active_task(&auth).await?;
        {
            let mut state = self.inner.lock_state();
            state.active_task = task.clone();
        }
        self.inner.emit();
        Ok(task)
    }

    pub fn take_notice(&self) -> Option<String> {
        let notice = self.inner.lock_state().notice.take();
        if notice.is_some() {
            self.inner.emit();
        }
        notice
    }

    /// Applies one countdown step. Returns the handle of the detached
    /// persistence task when the step completed a phase.
    pub fn advance_tick(&self) -> Option<JoinHandle<()>> {
        ControllerInner::advance_tick(&self.inner)
    }
}

impl<S> Drop for PomodoroController<S>
where
    S: TaskStore + 'static,
{
    fn drop(&mut self) {
        if let Ok(mut state) = self.inner.state.lock() {
            if let Some(ticker) = state.ticker.take() {
                ticker.abort();
            }
        }
    }
}

impl<S> ControllerInner<S>
where
    S: TaskStore + 'static,
{
    fn lock_state(&self) -> MutexGuard<'_, RuntimeState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn emit(&self) {
        let snapshot = self.lock_state().snapshot();
        let _ = self.snapshot_tx.send(snapshot);
    }

    fn require_auth(&self) -> Result<StoreAuth, InfraError> {
        self.lock_state()
            .auth
            .clone()
            .ok_or_else(|| InfraError::Auth("no signed-in user".to_string()))
    }

    fn set_notice(&self, notice: String) {
        self.lock_state().notice = Some(notice);
        self.emit();
    }

    fn spawn_log_append(self: &Arc<Self>, log: FocusLog) {
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(error) = inner.focus_logs.append(&log) {
                inner.set_notice(format!("focus history not recorded: {error}"));
            }
        });
    }

    fn advance_tick(inner: &Arc<Self>) -> Option<JoinHandle<()>> {
        let now = Utc::now();
        let completion = {
            let mut state = inner.lock_state();
            match state.timer.tick() {
                TickEffect::None => None,
                TickEffect::StudyCompleted => {
                    let log = state.close_phase(TimerMode::Studying, now, None);
                    state.phase_started_at = Some(now);
                    // Clamp against the latest snapshot and write the
                    // absolute value; a relative add would misbehave when
                    // writes land out of order.
                    let write = match (state.auth.clone(), state.active_task.as_mut()) {
                        (Some(auth), Some(task)) => {
                            let progress = task.clamped_progress(task.progress + 1);
                            task.progress = progress;
                            Some((auth, task.id.clone(), progress))
                        }
                        _ => None,
                    };
                    Some((log, write))
                }
                TickEffect::BreakCompleted => {
                    let log = state.close_phase(TimerMode::Resting, now, None);
                    state.phase_started_at = Some(now);
                    Some((log, None))
                }
            }
        };
        inner.emit();

        let (log, write) = completion?;
        let detached = Arc::clone(inner);
        Some(tokio::spawn(async move {
            detached.settle_completion(log, write).await;
        }))
    }

    async fn settle_completion(
        self: Arc<Self>,
        log: Option<FocusLog>,
        write: Option<(StoreAuth, String, u32)>,
    ) {
        if let Some(log) = log {
            if let Err(error) = self.focus_logs.append(&log) {
                self.set_notice(format!("focus history not recorded: {error}"));
            }
        }

        let Some((auth, task_id, progress)) = write else {
            return;
        };
        match self.tasks.write_progress(&auth, &task_id, progress).await {
            Ok(Some(task)) => {
                let mut state = self.lock_state();
                if state
                    .active_task
                    .as_ref()
                    .is_some_and(|active| active.id == task.id)
                {
                    state.active_task = Some(task);
                }
                drop(state);
                self.emit();
            }
            // Row gone on the server: the task was deleted or deactivated
            // elsewhere, so drop it from the snapshot and keep going.
            Ok(None) => {
                let mut state = self.lock_state();
                if state
                    .active_task
                    .as_ref()
                    .is_some_and(|active| active.id == task_id)
                {
                    state.active_task = None;
                }
                drop(state);
                self.emit();
            }
            Err(error) => {
                self.set_notice(format!("progress not saved: {error}"));
            }
        }
    }
}
