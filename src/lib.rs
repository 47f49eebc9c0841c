mod application;
mod domain;
mod infrastructure;

use application::commands::{
    bootstrap_impl, create_task_impl, delete_task_impl, exit_active_task_impl,
    get_focus_summary_impl, get_session_impl, get_timer_state_impl, list_tasks_impl,
    pause_timer_impl, ping_impl, reset_timer_impl, set_active_task_impl, set_break_duration_impl,
    set_study_duration_impl, sign_in_impl, sign_out_impl, sign_up_impl, start_timer_impl,
    update_task_progress_impl, AppState, BootstrapResponse, FocusSummaryResponse, SessionResponse,
    SignUpResponse, TimerStateResponse,
};
use domain::models::StudyTask;

#[tauri::command]
fn ping(state: tauri::State<'_, AppState>) -> Result<String, String> {
    ping_impl(state.inner()).map_err(|error| state.command_error("ping", &error))
}

#[tauri::command]
fn bootstrap(state: tauri::State<'_, AppState>) -> Result<BootstrapResponse, String> {
    bootstrap_impl(state.inner()).map_err(|error| state.command_error("bootstrap", &error))
}

#[tauri::command]
async fn sign_up(
    state: tauri::State<'_, AppState>,
    email: String,
    password: String,
) -> Result<SignUpResponse, String> {
    sign_up_impl(state.inner(), email, password)
        .await
        .map_err(|error| state.command_error("sign_up", &error))
}

#[tauri::command]
async fn sign_in(
    state: tauri::State<'_, AppState>,
    email: String,
    password: String,
) -> Result<SessionResponse, String> {
    sign_in_impl(state.inner(), email, password)
        .await
        .map_err(|error| state.command_error("sign_in", &error))
}

#[tauri::command]
async fn sign_out(state: tauri::State<'_, AppState>) -> Result<(), String> {
    sign_out_impl(state.inner())
        .await
        .map_err(|error| state.command_error("sign_out", &error))
}

#[tauri::command]
async fn get_session(
    state: tauri::State<'_, AppState>,
) -> Result<Option<SessionResponse>, String> {
    get_session_impl(state.inner())
        .await
        .map_err(|error| state.command_error("get_session", &error))
}

#[tauri::command]
async fn list_tasks(state: tauri::State<'_, AppState>) -> Result<Vec<StudyTask>, String> {
    list_tasks_impl(state.inner())
        .await
        .map_err(|error| state.command_error("list_tasks", &error))
}

#[tauri::command]
async fn create_task(
    state: tauri::State<'_, AppState>,
    task: String,
    estimated_tomatoes: u32,
) -> Result<StudyTask, String> {
    create_task_impl(state.inner(), task, estimated_tomatoes)
        .await
        .map_err(|error| state.command_error("create_task", &error))
}

#[tauri::command]
async fn update_task_progress(
    state: tauri::State<'_, AppState>,
    task_id: String,
    progress: u32,
) -> Result<Option<StudyTask>, String> {
    update_task_progress_impl(state.inner(), task_id, progress)
        .await
        .map_err(|error| state.command_error("update_task_progress", &error))
}

#[tauri::command]
async fn delete_task(state: tauri::State<'_, AppState>, task_id: String) -> Result<bool, String> {
    delete_task_impl(state.inner(), task_id)
        .await
        .map_err(|error| state.command_error("delete_task", &error))
}

#[tauri::command]
fn get_timer_state(state: tauri::State<'_, AppState>) -> Result<TimerStateResponse, String> {
    get_timer_state_impl(state.inner())
        .map_err(|error| state.command_error("get_timer_state", &error))
}

#[tauri::command]
async fn start_timer(state: tauri::State<'_, AppState>) -> Result<TimerStateResponse, String> {
    start_timer_impl(state.inner())
        .await
        .map_err(|error| state.command_error("start_timer", &error))
}

#[tauri::command]
fn pause_timer(state: tauri::State<'_, AppState>) -> Result<TimerStateResponse, String> {
    pause_timer_impl(state.inner()).map_err(|error| state.command_error("pause_timer", &error))
}

#[tauri::command]
fn reset_timer(state: tauri::State<'_, AppState>) -> Result<TimerStateResponse, String> {
    reset_timer_impl(state.inner()).map_err(|error| state.command_error("reset_timer", &error))
}

#[tauri::command]
async fn set_active_task(
    state: tauri::State<'_, AppState>,
    task_id: String,
) -> Result<Option<StudyTask>, String> {
    set_active_task_impl(state.inner(), task_id)
        .await
        .map_err(|error| state.command_error("set_active_task", &error))
}

#[tauri::command]
async fn exit_active_task(state: tauri::State<'_, AppState>) -> Result<(), String> {
    exit_active_task_impl(state.inner())
        .await
        .map_err(|error| state.command_error("exit_active_task", &error))
}

#[tauri::command]
fn set_study_duration(
    state: tauri::State<'_, AppState>,
    minutes: i64,
) -> Result<TimerStateResponse, String> {
    set_study_duration_impl(state.inner(), minutes)
        .map_err(|error| state.command_error("set_study_duration", &error))
}

#[tauri::command]
fn set_break_duration(
    state: tauri::State<'_, AppState>,
    minutes: i64,
) -> Result<TimerStateResponse, String> {
    set_break_duration_impl(state.inner(), minutes)
        .map_err(|error| state.command_error("set_break_duration", &error))
}

#[tauri::command]
fn get_focus_summary(
    state: tauri::State<'_, AppState>,
    start: Option<String>,
    end: Option<String>,
) -> Result<FocusSummaryResponse, String> {
    get_focus_summary_impl(state.inner(), start, end)
        .map_err(|error| state.command_error("get_focus_summary", &error))
}

pub fn run() {
    let workspace_root = std::env::current_dir().expect("failed to resolve current directory");
    let app_state = AppState::new(workspace_root).expect("failed to initialize app state");

    tauri::Builder::default()
        .manage(app_state)
        .invoke_handler(tauri::generate_handler![
            ping,
            bootstrap,
            sign_up,
            sign_in,
            sign_out,
            get_session,
            list_tasks,
            create_task,
            update_task_progress,
            delete_task,
            get_timer_state,
            start_timer,
            pause_timer,
            reset_timer,
            set_active_task,
            exit_active_task,
            set_study_duration,
            set_break_duration,
            get_focus_summary
        ])
        .run(tauri::generate_context!())
        .expect("failed to run tauri app");
}
