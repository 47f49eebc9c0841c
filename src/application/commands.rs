use crate::application::bootstrap::bootstrap_workspace;
use crate::application::session::{
    BackendConfig, EnsureSessionResult, SessionManager, SignUpResult,
};
use crate::application::tasks::TaskService;
use crate::application::timer::{PomodoroController, TimerSnapshot};
use crate::domain::models::{StudyTask, TimerMode};
use crate::infrastructure::auth_client::ReqwestAuthClient;
use crate::infrastructure::config::{load_timer_defaults, read_app_name, save_timer_defaults, TimerDefaults};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::focus_log_repository::{FocusLogRepository, SqliteFocusLogRepository};
use crate::infrastructure::session_store::KeyringSessionStore;
use crate::infrastructure::task_store::{ReqwestTaskStore, StoreAuth};
use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use serde::Serialize;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

pub struct AppState {
    config_dir: PathBuf,
    database_path: PathBuf,
    logs_dir: PathBuf,
    backend: BackendConfig,
    task_service: Arc<TaskService<ReqwestTaskStore>>,
    controller: PomodoroController<ReqwestTaskStore>,
    focus_logs: Arc<SqliteFocusLogRepository>,
    log_guard: Mutex<()>,
}

impl AppState {
    pub fn new(workspace_root: PathBuf) -> Result<Self, InfraError> {
        let backend = load_backend_config_from_env()?;
        Self::with_backend_config(workspace_root, backend)
    }

    pub fn with_backend_config(
        workspace_root: PathBuf,
        backend: BackendConfig,
    ) -> Result<Self, InfraError> {
        let bootstrap = bootstrap_workspace(&workspace_root)?;
        let config_dir = workspace_root.join("config");
        let logs_dir = workspace_root.join("logs");

        let defaults = load_timer_defaults(&config_dir);
        let store = Arc::new(ReqwestTaskStore::new(
            backend.base_url.clone(),
            backend.anon_key.clone(),
        ));
        let task_service = Arc::new(TaskService::new(store));
        let focus_logs = Arc::new(SqliteFocusLogRepository::new(&bootstrap.database_path));
        let controller = PomodoroController::new(
            Arc::clone(&task_service),
            Arc::clone(&focus_logs) as Arc<dyn FocusLogRepository>,
            i64::from(defaults.study_minutes),
            i64::from(defaults.break_minutes),
        );

        Ok(Self {
            config_dir,
            database_path: bootstrap.database_path,
            logs_dir,
            backend,
            task_service,
            controller,
            focus_logs,
            log_guard: Mutex::new(()),
        })
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn database_path(&self) -> &Path {
        &self.database_path
    }

    pub fn command_error(&self, command: &str, error: &InfraError) -> String {
        self.log_error(command, &error.to_string());
        error.to_string()
    }

    pub fn log_info(&self, command: &str, message: &str) {
        self.append_log("info", command, message);
    }

    pub fn log_error(&self, command: &str, message: &str) {
        self.append_log("error", command, message);
    }

    fn append_log(&self, level: &str, command: &str, message: &str) {
        let Ok(_guard) = self.log_guard.lock() else {
            return;
        };
        let path = self.logs_dir.join("commands.log");
        let payload = serde_json::json!({
            "timestamp": Utc::now().to_rfc3339(),
            "level": level,
            "command": command,
            "message": message,
        });

        if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(path) {
            let _ = writeln!(file, "{}", payload);
        }
    }

    fn session_manager(&self) -> SessionManager<KeyringSessionStore, ReqwestAuthClient> {
        SessionManager::new(
            self.backend.clone(),
            Arc::new(KeyringSessionStore::default()),
            Arc::new(ReqwestAuthClient::new()),
        )
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BootstrapResponse {
    pub app_name: String,
    pub workspace_root: String,
    pub database_path: String,
    pub study_minutes: u32,
    pub break_minutes: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionResponse {
    pub user_id: String,
    pub email: String,
    pub expires_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SignUpResponse {
    pub status: String,
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<SessionResponse>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TimerStateResponse {
    pub mode: String,
    pub remaining_seconds: u32,
    pub running: bool,
    pub study_minutes: u32,
    pub break_minutes: u32,
    pub active_task: Option<StudyTask>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notice: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FocusLogItem {
    pub id: String,
    pub task_id: Option<String>,
    pub mode: String,
    pub started_at: String,
    pub ended_at: Option<String>,
    pub interruption_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FocusSummaryResponse {
    pub start: String,
    pub end: String,
    pub completed_count: u32,
    pub interrupted_count: u32,
    pub total_study_minutes: i64,
    pub logs: Vec<FocusLogItem>,
}

pub fn ping_impl(state: &AppState) -> Result<String, InfraError> {
    state.log_info("ping", "health check");
    Ok("pong".to_string())
}

pub fn bootstrap_impl(state: &AppState) -> Result<BootstrapResponse, InfraError> {
    let app_name = read_app_name(state.config_dir())?;
    let defaults = load_timer_defaults(state.config_dir());
    let workspace_root = state
        .config_dir()
        .parent()
        .unwrap_or(state.config_dir())
        .display()
        .to_string();

    state.log_info("bootstrap", "workspace ready");
    Ok(BootstrapResponse {
        app_name,
        workspace_root,
        database_path: state.database_path().display().to_string(),
        study_minutes: defaults.study_minutes,
        break_minutes: defaults.break_minutes,
    })
}

pub async fn sign_up_impl(
    state: &AppState,
    email: String,
    password: String,
) -> Result<SignUpResponse, InfraError> {
    let manager = state.session_manager();
    let result = manager.sign_up(&email, &password).await?;

    match result {
        SignUpResult::SignedIn(session) => {
            state.controller.set_auth(Some(StoreAuth {
                access_token: session.access_token.clone(),
                user_id: session.user_id.clone(),
            }));
            state.log_info("sign_up", &format!("signed up user_id={}", session.user_id));
            Ok(SignUpResponse {
                status: "signed_in".to_string(),
                email: session.email.clone(),
                session: Some(session_response(&session.user_id, &session.email, session.expires_at)),
            })
        }
        SignUpResult::ConfirmationRequired { email } => {
            state.log_info("sign_up", "confirmation email sent");
            Ok(SignUpResponse {
                status: "confirmation_required".to_string(),
                email,
                session: None,
            })
        }
    }
}

pub async fn sign_in_impl(
    state: &AppState,
    email: String,
    password: String,
) -> Result<SessionResponse, InfraError> {
    let manager = state.session_manager();
    let session = manager.sign_in(&email, &password).await?;

    let auth = StoreAuth {
        access_token: session.access_token.clone(),
        user_id: session.user_id.clone(),
    };
    state.controller.set_auth(Some(auth.clone()));
    if let Err(error) = state.controller.refresh_active_task().await {
        state.log_error(
            "sign_in",
            &format!("could not load active task: {error}"),
        );
    }

    state.log_info("sign_in", &format!("signed in user_id={}", session.user_id));
    Ok(session_response(
        &session.user_id,
        &session.email,
        session.expires_at,
    ))
}

pub async fn sign_out_impl(state: &AppState) -> Result<(), InfraError> {
    let manager = state.session_manager();
    manager.sign_out().await?;
    state.controller.reset();
    state.controller.set_auth(None);
    state.log_info("sign_out", "session revoked and cleared");
    Ok(())
}

pub async fn get_session_impl(state: &AppState) -> Result<Option<SessionResponse>, InfraError> {
    let manager = state.session_manager();
    match manager.ensure_session().await? {
        EnsureSessionResult::Existing(session) | EnsureSessionResult::Refreshed(session) => {
            state.controller.set_auth(Some(StoreAuth {
                access_token: session.access_token.clone(),
                user_id: session.user_id.clone(),
            }));
            Ok(Some(session_response(
                &session.user_id,
                &session.email,
                session.expires_at,
            )))
        }
        EnsureSessionResult::SignInRequired => Ok(None),
    }
}

pub async fn list_tasks_impl(state: &AppState) -> Result<Vec<StudyTask>, InfraError> {
    let auth = required_store_auth(state).await?;
    match state.task_service.list_tasks(&auth).await {
        Ok(tasks) => Ok(tasks),
        // The backend rejected a token our clock still considered valid;
        // force a refresh and retry once before giving up.
        Err(InfraError::SessionExpired) => {
            let auth = refreshed_store_auth(state).await?;
            state.task_service.list_tasks(&auth).await
        }
        Err(error) => Err(error),
    }
}

pub async fn create_task_impl(
    state: &AppState,
    task: String,
    estimated_tomatoes: u32,
) -> Result<StudyTask, InfraError> {
    let auth = required_store_auth(state).await?;
    let created = state
        .task_service
        .create_task(&auth, &task, estimated_tomatoes)
        .await?;
    state.log_info("create_task", &format!("created task_id={}", created.id));
    Ok(created)
}

pub async fn update_task_progress_impl(
    state: &AppState,
    task_id: String,
    progress: u32,
) -> Result<Option<StudyTask>, InfraError> {
    let task_id = task_id.trim();
    if task_id.is_empty() {
        return Err(InfraError::InvalidConfig(
            "task_id must not be empty".to_string(),
        ));
    }

    let auth = required_store_auth(state).await?;
    let updated = state
        .task_service
        .set_progress(&auth, task_id, progress)
        .await?;
    match &updated {
        Some(task) => state.log_info(
            "update_task_progress",
            &format!("task_id={} progress={}", task.id, task.progress),
        ),
        None => state.log_info(
            "update_task_progress",
            &format!("task_id={task_id} no longer exists"),
        ),
    }

    if state
        .controller
        .snapshot()
        .active_task
        .is_some_and(|active| active.id == task_id)
    {
        let _ = state.controller.refresh_active_task().await;
    }
    Ok(updated)
}

pub async fn delete_task_impl(state: &AppState, task_id: String) -> Result<bool, InfraError> {
    let task_id = task_id.trim();
    if task_id.is_empty() {
        return Err(InfraError::InvalidConfig(
            "task_id must not be empty".to_string(),
        ));
    }

    let auth = required_store_auth(state).await?;
    let deleted = state.task_service.delete_task(&auth, task_id).await?;
    if deleted {
        state.log_info("delete_task", &format!("deleted task_id={task_id}"));
        if state
            .controller
            .snapshot()
            .active_task
            .is_some_and(|active| active.id == task_id)
        {
            let _ = state.controller.refresh_active_task().await;
        }
    }
    Ok(deleted)
}

pub fn get_timer_state_impl(state: &AppState) -> Result<TimerStateResponse, InfraError> {
    Ok(to_timer_state_response(
        state.controller.snapshot(),
        state.controller.take_notice(),
    ))
}

pub async fn start_timer_impl(state: &AppState) -> Result<TimerStateResponse, InfraError> {
    if state.controller.snapshot().active_task.is_none() {
        // Picking up the active task at start covers timers begun right
        // after app launch, before any task command has run.
        if let Ok(Some(_)) = get_session_impl(state).await {
            let _ = state.controller.refresh_active_task().await;
        }
    }
    state.controller.start();
    state.log_info("start_timer", "countdown running");
    Ok(to_timer_state_response(state.controller.snapshot(), None))
}

pub fn pause_timer_impl(state: &AppState) -> Result<TimerStateResponse, InfraError> {
    state.controller.pause();
    state.log_info("pause_timer", "countdown paused");
    Ok(to_timer_state_response(state.controller.snapshot(), None))
}

pub fn reset_timer_impl(state: &AppState) -> Result<TimerStateResponse, InfraError> {
    state.controller.reset();
    state.log_info("reset_timer", "countdown reset");
    Ok(to_timer_state_response(state.controller.snapshot(), None))
}

pub async fn set_active_task_impl(
    state: &AppState,
    task_id: String,
) -> Result<Option<StudyTask>, InfraError> {
    let task_id = task_id.trim();
    if task_id.is_empty() {
        return Err(InfraError::InvalidConfig(
            "task_id must not be empty".to_string(),
        ));
    }

    let auth = required_store_auth(state).await?;
    state.controller.set_auth(Some(auth));
    let task = state.controller.set_active_task(task_id).await?;
    state.log_info("set_active_task", &format!("active task_id={task_id}"));
    Ok(task)
}

pub async fn exit_active_task_impl(state: &AppState) -> Result<(), InfraError> {
    let auth = required_store_auth(state).await?;
    state.controller.set_auth(Some(auth));
    state.controller.exit_active_task().await?;
    state.log_info("exit_active_task", "no task is active");
    Ok(())
}

pub fn set_study_duration_impl(
    state: &AppState,
    minutes: i64,
) -> Result<TimerStateResponse, InfraError> {
    state.controller.set_study_minutes(minutes);
    persist_timer_defaults(state);
    state.log_info(
        "set_study_duration",
        &format!("study_minutes={}", state.controller.snapshot().study_minutes),
    );
    Ok(to_timer_state_response(state.controller.snapshot(), None))
}

pub fn set_break_duration_impl(
    state: &AppState,
    minutes: i64,
) -> Result<TimerStateResponse, InfraError> {
    state.controller.set_break_minutes(minutes);
    persist_timer_defaults(state);
    state.log_info(
        "set_break_duration",
        &format!("break_minutes={}", state.controller.snapshot().break_minutes),
    );
    Ok(to_timer_state_response(state.controller.snapshot(), None))
}

pub fn get_focus_summary_impl(
    state: &AppState,
    start: Option<String>,
    end: Option<String>,
) -> Result<FocusSummaryResponse, InfraError> {
    let default_start = Utc::now() - Duration::days(7);
    let start = match start {
        Some(raw) => parse_datetime_input(&raw, "start")?,
        None => default_start,
    };
    let end = match end {
        Some(raw) => parse_datetime_input(&raw, "end")?,
        None => Utc::now(),
    };
    if end <= start {
        return Err(InfraError::InvalidConfig(
            "end must be greater than start".to_string(),
        ));
    }

    let logs_in_range = state.focus_logs.list_between(start, end)?;

    let completed_count = logs_in_range
        .iter()
        .filter(|log| log.mode == TimerMode::Studying && log.interruption_reason.is_none())
        .count() as u32;
    let interrupted_count = logs_in_range
        .iter()
        .filter(|log| log.interruption_reason.is_some())
        .count() as u32;
    let total_study_minutes = logs_in_range
        .iter()
        .filter(|log| log.mode == TimerMode::Studying)
        .filter_map(|log| log.ended_at.map(|ended| (ended - log.started_at).num_minutes()))
        .filter(|minutes| *minutes > 0)
        .sum();

    let logs = logs_in_range
        .into_iter()
        .map(|log| FocusLogItem {
            id: log.id,
            task_id: log.task_id,
            mode: log.mode.as_str().to_string(),
            started_at: log.started_at.to_rfc3339(),
            ended_at: log.ended_at.map(|value| value.to_rfc3339()),
            interruption_reason: log.interruption_reason,
        })
        .collect::<Vec<_>>();

    Ok(FocusSummaryResponse {
        start: start.to_rfc3339(),
        end: end.to_rfc3339(),
        completed_count,
        interrupted_count,
        total_study_minutes,
        logs,
    })
}

async fn required_store_auth(state: &AppState) -> Result<StoreAuth, InfraError> {
    let manager = state.session_manager();
    match manager.ensure_session().await? {
        EnsureSessionResult::Existing(session) | EnsureSessionResult::Refreshed(session) => {
            Ok(StoreAuth {
                access_token: session.access_token,
                user_id: session.user_id,
            })
        }
        EnsureSessionResult::SignInRequired => Err(InfraError::SessionExpired),
    }
}

async fn refreshed_store_auth(state: &AppState) -> Result<StoreAuth, InfraError> {
    let manager = state.session_manager();
    match manager.refresh_now().await? {
        EnsureSessionResult::Existing(session) | EnsureSessionResult::Refreshed(session) => {
            Ok(StoreAuth {
                access_token: session.access_token,
                user_id: session.user_id,
            })
        }
        EnsureSessionResult::SignInRequired => Err(InfraError::SessionExpired),
    }
}

fn session_response(user_id: &str, email: &str, expires_at: DateTime<Utc>) -> SessionResponse {
    SessionResponse {
        user_id: user_id.to_string(),
        email: email.to_string(),
        expires_at: expires_at.to_rfc3339(),
    }
}

fn to_timer_state_response(snapshot: TimerSnapshot, notice: Option<String>) -> TimerStateResponse {
    TimerStateResponse {
        mode: snapshot.mode.as_str().to_string(),
        remaining_seconds: snapshot.remaining_seconds,
        running: snapshot.running,
        study_minutes: snapshot.study_minutes,
        break_minutes: snapshot.break_minutes,
        active_task: snapshot.active_task,
        notice: notice.or(snapshot.notice),
    }
}

fn persist_timer_defaults(state: &AppState) {
    let snapshot = state.controller.snapshot();
    let defaults = TimerDefaults {
        study_minutes: snapshot.study_minutes,
        break_minutes: snapshot.break_minutes,
    };
    if let Err(error) = save_timer_defaults(state.config_dir(), defaults) {
        state.log_error(
            "set_duration",
            &format!("could not persist timer defaults: {error}"),
        );
    }
}

fn load_backend_config_from_env() -> Result<BackendConfig, InfraError> {
    load_backend_config_from_lookup(|key| std::env::var(key).ok())
}

fn load_backend_config_from_lookup<F>(lookup: F) -> Result<BackendConfig, InfraError>
where
    F: Fn(&str) -> Option<String>,
{
    let base_url = required_lookup_value(
        &lookup,
        &["STUDYTRACK_BACKEND_URL", "SUPABASE_URL"],
        "backend base url",
    )?;
    let anon_key = required_lookup_value(
        &lookup,
        &["STUDYTRACK_BACKEND_ANON_KEY", "SUPABASE_ANON_KEY"],
        "backend anon key",
    )?;
    Ok(BackendConfig::new(base_url, anon_key))
}

fn required_lookup_value<F>(
    lookup: &F,
    keys: &[&str],
    field_name: &str,
) -> Result<String, InfraError>
where
    F: Fn(&str) -> Option<String>,
{
    for key in keys {
        if let Some(value) = lookup(key) {
            let normalized = value.trim();
            if !normalized.is_empty() {
                return Ok(normalized.to_string());
            }
        }
    }
    Err(InfraError::InvalidConfig(format!(
        "missing {} (set one of: {})",
        field_name,
        keys.join(", ")
    )))
}

fn parse_datetime_input(value: &str, field_name: &str) -> Result<DateTime<Utc>, InfraError> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Ok(parsed.with_timezone(&Utc));
    }
    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        return Ok(Utc.from_utc_datetime(
            &date.and_hms_opt(0, 0, 0).expect("valid midnight"),
        ));
    }
    Err(InfraError::InvalidConfig(format!(
        "{field_name} must be RFC3339 or YYYY-MM-DD"
    )))
}
