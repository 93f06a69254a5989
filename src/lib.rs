pub mod application;
pub mod domain;
pub mod infrastructure;

use application::bootstrap::bootstrap_workspace;
use application::commands::{
    confirm_item_impl, get_day_schedule_impl, get_day_stats_impl, get_event_schedule_impl,
    list_meetings_impl, refresh_schedule_impl, sign_in_impl, sign_out_impl,
    toggle_confirmation_impl, toggle_favorite_impl, toggle_free_slot_blocked_impl,
    toggle_free_slot_interest_impl, unconfirm_item_impl, FavoriteResponse, ItemStatusResponse,
    MeetingListResponse, RefreshResponse, SessionResponse, SignInRequest, SlotStatusResponse,
};
use application::schedule_view::DaySchedule;
use domain::models::DayStats;
use infrastructure::logging::init_logging;
use serde::Serialize;
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;

pub use application::commands::{AppState, Backends};
pub use infrastructure::error::ScheduleError;

#[derive(Debug, Serialize)]
pub struct BootstrapResponse {
    pub workspace_root: String,
    pub database_path: String,
    pub event_id: String,
}

pub fn bootstrap(root: Option<String>) -> Result<BootstrapResponse, String> {
    let workspace_root = match root {
        Some(path) => PathBuf::from(path),
        None => std::env::current_dir().map_err(|error| error.to_string())?,
    };

    let result = bootstrap_workspace(&workspace_root).map_err(|error| error.to_string())?;
    Ok(BootstrapResponse {
        workspace_root: result.workspace_root.display().to_string(),
        database_path: result.database_path.display().to_string(),
        event_id: result.event.event_id,
    })
}

pub fn ping() -> &'static str {
    "pong"
}

/// Bootstraps `workspace_root`, installs logging into its `logs/` directory
/// and builds the command state. Keep the guard alive for as long as logs
/// should be flushed.
pub fn start(workspace_root: PathBuf) -> Result<(AppState, Option<WorkerGuard>), String> {
    let bootstrap = bootstrap_workspace(&workspace_root).map_err(|error| error.to_string())?;
    let guard = init_logging(&bootstrap.logs_dir).map_err(|error| error.to_string())?;
    let state = AppState::new(workspace_root).map_err(|error| error.to_string())?;
    Ok((state, guard))
}

pub async fn sign_in(state: &AppState, request: SignInRequest) -> Result<SessionResponse, String> {
    sign_in_impl(state, request)
        .await
        .map_err(|error| state.command_error("sign_in", &error))
}

pub fn sign_out(state: &AppState) -> Result<bool, String> {
    sign_out_impl(state).map_err(|error| state.command_error("sign_out", &error))
}

pub async fn refresh_schedule(state: &AppState) -> Result<RefreshResponse, String> {
    refresh_schedule_impl(state)
        .await
        .map_err(|error| state.command_error("refresh_schedule", &error))
}

pub fn get_day_schedule(state: &AppState, date: String) -> Result<DaySchedule, String> {
    get_day_schedule_impl(state, &date)
        .map_err(|error| state.command_error("get_day_schedule", &error))
}

pub fn get_event_schedule(state: &AppState) -> Result<Vec<DaySchedule>, String> {
    get_event_schedule_impl(state)
        .map_err(|error| state.command_error("get_event_schedule", &error))
}

pub fn get_day_stats(state: &AppState, date: String) -> Result<DayStats, String> {
    get_day_stats_impl(state, &date).map_err(|error| state.command_error("get_day_stats", &error))
}

pub async fn toggle_confirmation(
    state: &AppState,
    item_id: String,
    kind: Option<String>,
) -> Result<ItemStatusResponse, String> {
    toggle_confirmation_impl(state, &item_id, kind.as_deref())
        .await
        .map_err(|error| state.command_error("toggle_confirmation", &error))
}

pub async fn confirm_item(
    state: &AppState,
    item_id: String,
    kind: Option<String>,
) -> Result<ItemStatusResponse, String> {
    confirm_item_impl(state, &item_id, kind.as_deref())
        .await
        .map_err(|error| state.command_error("confirm_item", &error))
}

pub async fn unconfirm_item(
    state: &AppState,
    item_id: String,
    kind: Option<String>,
) -> Result<ItemStatusResponse, String> {
    unconfirm_item_impl(state, &item_id, kind.as_deref())
        .await
        .map_err(|error| state.command_error("unconfirm_item", &error))
}

pub async fn toggle_free_slot_interest(
    state: &AppState,
    slot_time: String,
) -> Result<SlotStatusResponse, String> {
    toggle_free_slot_interest_impl(state, &slot_time)
        .await
        .map_err(|error| state.command_error("toggle_free_slot_interest", &error))
}

pub async fn toggle_free_slot_blocked(
    state: &AppState,
    slot_time: String,
) -> Result<SlotStatusResponse, String> {
    toggle_free_slot_blocked_impl(state, &slot_time)
        .await
        .map_err(|error| state.command_error("toggle_free_slot_blocked", &error))
}

pub async fn toggle_favorite(
    state: &AppState,
    item_id: String,
    kind: Option<String>,
) -> Result<FavoriteResponse, String> {
    toggle_favorite_impl(state, &item_id, kind.as_deref())
        .await
        .map_err(|error| state.command_error("toggle_favorite", &error))
}

pub fn list_meetings(
    state: &AppState,
    filter: Option<String>,
) -> Result<MeetingListResponse, String> {
    list_meetings_impl(state, filter.as_deref())
        .map_err(|error| state.command_error("list_meetings", &error))
}
