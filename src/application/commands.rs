use crate::application::bootstrap::bootstrap_workspace;
use crate::application::schedule_sources::{
    filter_meetings, meeting_counts, RetryPolicy, ScheduleSources,
};
use crate::application::schedule_view::{
    build_day_schedule, build_event_schedule, day_stats, DaySchedule, ScheduleViewModel,
};
use crate::application::status_store::{
    ImplicitDefaults, NowProvider, StatusLookup, UserStatusStore,
};
use crate::domain::event_time::EventClock;
use crate::domain::models::{
    DayStats, ItemKind, ItemStatus, MeetingCounts, MeetingFilter, ScheduleItem, Session, SlotStatus,
};
use crate::domain::schedule_grid::{generate_slots, GridPolicy};
use crate::infrastructure::agenda_feed_client::{AgendaFeedClient, ReqwestAgendaFeedClient};
use crate::infrastructure::config::{BackendConfig, EventConfig};
use crate::infrastructure::error::ScheduleError;
use crate::infrastructure::meeting_repository::{MeetingRepository, RestMeetingRepository};
use crate::infrastructure::session_store::{KeyringSessionStore, SessionStore};
use crate::infrastructure::status_row_store::{
    RestStatusRowStore, SqliteStatusRowStore, StatusRowStore,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{error, info, warn};

const SESSION_LEEWAY_SECONDS: i64 = 60;

type SharedStatusStore = Arc<UserStatusStore<dyn StatusRowStore>>;

pub type RowStoreFactory =
    Arc<dyn Fn(&Session) -> Result<Arc<dyn StatusRowStore>, ScheduleError> + Send + Sync>;
pub type MeetingRepositoryFactory =
    Arc<dyn Fn(&Session) -> Result<Arc<dyn MeetingRepository>, ScheduleError> + Send + Sync>;

/// The collaborators a session talks to. Row stores and meeting repositories
/// are built per session because they carry its access token.
#[derive(Clone)]
pub struct Backends {
    session_store: Arc<dyn SessionStore>,
    row_store_factory: RowStoreFactory,
    meeting_repository_factory: Option<MeetingRepositoryFactory>,
    agenda_client: Option<Arc<dyn AgendaFeedClient>>,
}

impl Backends {
    pub fn new(session_store: Arc<dyn SessionStore>, row_store_factory: RowStoreFactory) -> Self {
        Self {
            session_store,
            row_store_factory,
            meeting_repository_factory: None,
            agenda_client: None,
        }
    }

    /// Every session shares `row_store`.
    pub fn with_shared_row_store(
        session_store: Arc<dyn SessionStore>,
        row_store: Arc<dyn StatusRowStore>,
    ) -> Self {
        Self::new(
            session_store,
            Arc::new(move |_: &Session| -> Result<Arc<dyn StatusRowStore>, ScheduleError> {
                Ok(row_store.clone())
            }),
        )
    }

    pub fn with_agenda_client(mut self, agenda_client: Arc<dyn AgendaFeedClient>) -> Self {
        self.agenda_client = Some(agenda_client);
        self
    }

    pub fn with_meeting_repository_factory(mut self, factory: MeetingRepositoryFactory) -> Self {
        self.meeting_repository_factory = Some(factory);
        self
    }

    /// REST backend when `restUrl` is configured, otherwise the local SQLite
    /// table with no meeting source.
    pub fn from_config(
        config: &BackendConfig,
        database_path: &Path,
    ) -> Result<Self, ScheduleError> {
        let session_store: Arc<dyn SessionStore> = Arc::new(KeyringSessionStore::default());

        let mut backends = match config.rest_url() {
            Some(rest_url) => {
                let rest_url = rest_url.to_string();
                let api_key = config.api_key.clone();
                let row_store_factory: RowStoreFactory = {
                    let rest_url = rest_url.clone();
                    let api_key = api_key.clone();
                    Arc::new(
                        move |session: &Session| -> Result<Arc<dyn StatusRowStore>, ScheduleError> {
                            Ok(Arc::new(RestStatusRowStore::new(
                                &rest_url,
                                api_key.clone(),
                                session.access_token.clone(),
                            )?))
                        },
                    )
                };
                let meeting_factory: MeetingRepositoryFactory = Arc::new(
                    move |session: &Session| -> Result<Arc<dyn MeetingRepository>, ScheduleError> {
                        Ok(Arc::new(RestMeetingRepository::new(
                            &rest_url,
                            api_key.clone(),
                            session.access_token.clone(),
                        )?))
                    },
                );
                Self::new(session_store, row_store_factory)
                    .with_meeting_repository_factory(meeting_factory)
            }
            None => {
                let row_store: Arc<dyn StatusRowStore> =
                    Arc::new(SqliteStatusRowStore::new(database_path));
                Self::with_shared_row_store(session_store, row_store)
            }
        };

        if let Some(agenda_url) = config.agenda_url() {
            let client = ReqwestAgendaFeedClient::new(agenda_url, config.api_key.clone())?;
            backends = backends.with_agenda_client(Arc::new(client));
        }
        Ok(backends)
    }
}

#[derive(Default)]
struct RuntimeState {
    session: Option<Session>,
    status_store: Option<SharedStatusStore>,
    meeting_repository: Option<Arc<dyn MeetingRepository>>,
    items: Vec<ScheduleItem>,
}

pub struct AppState {
    config_dir: PathBuf,
    database_path: PathBuf,
    logs_dir: PathBuf,
    event: EventConfig,
    clock: EventClock,
    policy: GridPolicy,
    backends: Backends,
    retry_policy: RetryPolicy,
    now_provider: NowProvider,
    runtime: Mutex<RuntimeState>,
}

impl AppState {
    pub fn new(workspace_root: PathBuf) -> Result<Self, ScheduleError> {
        let bootstrap = bootstrap_workspace(&workspace_root)?;
        let backends = Backends::from_config(&bootstrap.backend, &bootstrap.database_path)?;
        let state = Self::with_backends(workspace_root, backends)?;
        state.restore_session()?;
        Ok(state)
    }

    /// Bootstraps the workspace but talks to `backends` instead of the
    /// configured ones. Does not restore a stored session.
    pub fn with_backends(
        workspace_root: PathBuf,
        backends: Backends,
    ) -> Result<Self, ScheduleError> {
        let bootstrap = bootstrap_workspace(&workspace_root)?;
        let clock = bootstrap.event.clock()?;
        let policy = bootstrap.event.grid_policy();

        Ok(Self {
            config_dir: bootstrap.config_dir,
            database_path: bootstrap.database_path,
            logs_dir: bootstrap.logs_dir,
            event: bootstrap.event,
            clock,
            policy,
            backends,
            retry_policy: RetryPolicy::default(),
            now_provider: Arc::new(Utc::now),
            runtime: Mutex::new(RuntimeState::default()),
        })
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }

    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn database_path(&self) -> &Path {
        &self.database_path
    }

    pub fn logs_dir(&self) -> &Path {
        &self.logs_dir
    }

    pub fn event(&self) -> &EventConfig {
        &self.event
    }

    pub fn command_error(&self, command: &str, error: &ScheduleError) -> String {
        error!(command, %error, "command failed");
        error.to_string()
    }

    pub fn log_info(&self, command: &str, message: &str) {
        info!(command, "{message}");
    }

    fn now(&self) -> DateTime<Utc> {
        (self.now_provider)()
    }

    /// Picks up a still-valid session from the session store. Statuses are
    /// hydrated on the next refresh.
    pub fn restore_session(&self) -> Result<bool, ScheduleError> {
        let session = match self.backends.session_store.load_session() {
            Ok(session) => session,
            Err(error) => {
                warn!(%error, "could not read stored session; starting signed out");
                None
            }
        };
        let Some(session) = session else {
            return Ok(false);
        };
        if !session.is_valid_at(self.now(), SESSION_LEEWAY_SECONDS) {
            info!(user_id = %session.user_id, "stored session expired; starting signed out");
            return Ok(false);
        }
        info!(user_id = %session.user_id, "restored stored session");
        self.activate_session(session)?;
        Ok(true)
    }

    fn activate_session(&self, session: Session) -> Result<SharedStatusStore, ScheduleError> {
        let rows = (self.backends.row_store_factory)(&session)?;
        let store: SharedStatusStore = Arc::new(
            UserStatusStore::new(session.user_id.clone(), rows)
                .with_event_id(self.event.event_id.clone())
                .with_now_provider(self.now_provider.clone()),
        );
        let meeting_repository = match self.backends.meeting_repository_factory.as_ref() {
            Some(factory) => Some(factory(&session)?),
            None => None,
        };

        let mut runtime = lock_runtime(self)?;
        runtime.session = Some(session);
        runtime.status_store = Some(store.clone());
        runtime.meeting_repository = meeting_repository;
        Ok(store)
    }

    fn sources(
        &self,
        meeting_repository: Option<Arc<dyn MeetingRepository>>,
    ) -> ScheduleSources<dyn AgendaFeedClient, dyn MeetingRepository> {
        let mut sources = ScheduleSources::new(self.clock.clone(), self.event.event_id.clone())
            .with_retry_policy(self.retry_policy.clone());
        if let Some(client) = self.backends.agenda_client.clone() {
            sources = sources.with_agenda_client(client);
        }
        if let Some(repository) = meeting_repository {
            sources = sources.with_meeting_repository(repository);
        }
        sources
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignInRequest {
    pub user_id: String,
    #[serde(default)]
    pub email: Option<String>,
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SessionResponse {
    pub user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub expires_at: String,
    pub restored_statuses: usize,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RefreshResponse {
    pub agenda_items: usize,
    pub meetings: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub statuses: Option<usize>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ItemStatusResponse {
    pub item_id: String,
    pub kind: ItemKind,
    pub status: ItemStatus,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SlotStatusResponse {
    pub slot_time: String,
    pub status: SlotStatus,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FavoriteResponse {
    pub item_id: String,
    pub is_favorite: bool,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MeetingListResponse {
    pub filter: MeetingFilter,
    pub meetings: Vec<ScheduleItem>,
    pub counts: MeetingCounts,
}

pub async fn sign_in_impl(
    state: &AppState,
    request: SignInRequest,
) -> Result<SessionResponse, ScheduleError> {
    let session = Session {
        user_id: request.user_id.trim().to_string(),
        email: request
            .email
            .map(|email| email.trim().to_string())
            .filter(|email| !email.is_empty()),
        access_token: request.access_token.trim().to_string(),
        expires_at: request.expires_at,
    };
    if !session.is_valid_at(state.now(), SESSION_LEEWAY_SECONDS) {
        return Err(ScheduleError::InvalidConfig(
            "session must carry a user id, an access token and a future expiry".to_string(),
        ));
    }

    if let Err(error) = state.backends.session_store.save_session(&session) {
        warn!(
            %error,
            user_id = %session.user_id,
            "could not store session; it will not survive a restart"
        );
    }
    let store = state.activate_session(session.clone())?;
    let restored_statuses = match store.hydrate().await {
        Ok(count) => count,
        Err(error) => {
            warn!(%error, user_id = %session.user_id, "could not load statuses; showing defaults");
            0
        }
    };

    state.log_info(
        "sign_in",
        &format!("signed in user_id={} statuses={restored_statuses}", session.user_id),
    );
    Ok(SessionResponse {
        user_id: session.user_id,
        email: session.email,
        expires_at: session.expires_at.to_rfc3339(),
        restored_statuses,
    })
}

/// Drops the session and its status cache. Loaded agenda items stay; the
/// user's meetings go with the session.
pub fn sign_out_impl(state: &AppState) -> Result<bool, ScheduleError> {
    if let Err(error) = state.backends.session_store.delete_session() {
        warn!(%error, "could not remove stored session");
    }
    let mut runtime = lock_runtime(state)?;
    let was_signed_in = runtime.session.take().is_some();
    runtime.status_store = None;
    runtime.meeting_repository = None;
    runtime
        .items
        .retain(|item| item.kind == ItemKind::AgendaEvent);
    drop(runtime);

    state.log_info("sign_out", &format!("signed out was_signed_in={was_signed_in}"));
    Ok(was_signed_in)
}

/// Reloads both sources and re-hydrates the signed-in user's statuses.
pub async fn refresh_schedule_impl(state: &AppState) -> Result<RefreshResponse, ScheduleError> {
    let (user_id, store, meeting_repository) = {
        let runtime = lock_runtime(state)?;
        (
            runtime.session.as_ref().map(|session| session.user_id.clone()),
            runtime.status_store.clone(),
            runtime.meeting_repository.clone(),
        )
    };

    let items = state
        .sources(meeting_repository)
        .load_items(user_id.as_deref())
        .await;
    let agenda_items = items
        .iter()
        .filter(|item| item.kind == ItemKind::AgendaEvent)
        .count();
    let meetings = items.len() - agenda_items;

    let statuses = match store {
        Some(store) => match store.hydrate().await {
            Ok(count) => Some(count),
            Err(error) => {
                warn!(%error, "could not refresh statuses; keeping cached values");
                None
            }
        },
        None => None,
    };

    lock_runtime(state)?.items = items;
    state.log_info(
        "refresh_schedule",
        &format!("agenda_items={agenda_items} meetings={meetings}"),
    );
    Ok(RefreshResponse {
        agenda_items,
        meetings,
        statuses,
    })
}

pub fn get_day_schedule_impl(state: &AppState, date: &str) -> Result<DaySchedule, ScheduleError> {
    let day = parse_event_day(state, date)?;
    let (items, store) = snapshot(state)?;
    let now = state.now();
    let schedule = match store {
        Some(store) => {
            ScheduleViewModel::new(store).build_day(&state.clock, &state.policy, day, &items, now)?
        }
        None => {
            build_day_schedule(&state.clock, &state.policy, day, &items, &ImplicitDefaults, now)?
        }
    };
    Ok(schedule)
}

/// One day schedule per configured event day.
pub fn get_event_schedule_impl(state: &AppState) -> Result<Vec<DaySchedule>, ScheduleError> {
    let (items, store) = snapshot(state)?;
    let days = state.event.event_days();
    let lookup: &dyn StatusLookup = match store.as_deref() {
        Some(store) => store,
        None => &ImplicitDefaults,
    };
    Ok(build_event_schedule(
        &state.clock,
        &state.policy,
        &days,
        &items,
        lookup,
        state.now(),
    )?)
}

pub fn get_day_stats_impl(state: &AppState, date: &str) -> Result<DayStats, ScheduleError> {
    let schedule = get_day_schedule_impl(state, date)?;
    Ok(day_stats(&schedule))
}

pub async fn toggle_confirmation_impl(
    state: &AppState,
    item_id: &str,
    kind: Option<&str>,
) -> Result<ItemStatusResponse, ScheduleError> {
    let (view_model, item) = item_command(state, item_id, kind)?;
    let status = view_model.toggle_confirmation(&item).await?;
    Ok(item_outcome(state, "toggle_confirmation", item, status))
}

pub async fn confirm_item_impl(
    state: &AppState,
    item_id: &str,
    kind: Option<&str>,
) -> Result<ItemStatusResponse, ScheduleError> {
    let (view_model, item) = item_command(state, item_id, kind)?;
    let status = view_model.confirm(&item).await?;
    Ok(item_outcome(state, "confirm_item", item, status))
}

pub async fn unconfirm_item_impl(
    state: &AppState,
    item_id: &str,
    kind: Option<&str>,
) -> Result<ItemStatusResponse, ScheduleError> {
    let (view_model, item) = item_command(state, item_id, kind)?;
    let status = view_model.unconfirm(&item).await?;
    Ok(item_outcome(state, "unconfirm_item", item, status))
}

pub async fn toggle_free_slot_interest_impl(
    state: &AppState,
    slot_time: &str,
) -> Result<SlotStatusResponse, ScheduleError> {
    toggle_free_slot(state, slot_time, SlotStatus::Interested).await
}

pub async fn toggle_free_slot_blocked_impl(
    state: &AppState,
    slot_time: &str,
) -> Result<SlotStatusResponse, ScheduleError> {
    toggle_free_slot(state, slot_time, SlotStatus::Blocked).await
}

pub async fn toggle_favorite_impl(
    state: &AppState,
    item_id: &str,
    kind: Option<&str>,
) -> Result<FavoriteResponse, ScheduleError> {
    let (view_model, item) = item_command(state, item_id, kind)?;
    let is_favorite = view_model.favorite(&item).await?;
    state.log_info(
        "toggle_favorite",
        &format!("item_id={} is_favorite={is_favorite}", item.id),
    );
    Ok(FavoriteResponse {
        item_id: item.id,
        is_favorite,
    })
}

pub fn list_meetings_impl(
    state: &AppState,
    filter: Option<&str>,
) -> Result<MeetingListResponse, ScheduleError> {
    let filter = match filter {
        Some(raw) => MeetingFilter::parse(raw).map_err(ScheduleError::InvalidTarget)?,
        None => MeetingFilter::All,
    };
    let (items, _) = snapshot(state)?;
    let now = state.now();
    Ok(MeetingListResponse {
        filter,
        meetings: filter_meetings(&items, filter, now).into_iter().cloned().collect(),
        counts: meeting_counts(&items, now),
    })
}

async fn toggle_free_slot(
    state: &AppState,
    slot_time: &str,
    own: SlotStatus,
) -> Result<SlotStatusResponse, ScheduleError> {
    let (items, store) = snapshot(state)?;
    let store = store.ok_or(ScheduleError::NoSession)?;
    let start = state.clock.normalize(slot_time)?;
    let day = state.clock.local_date(&start);

    let slots = generate_slots(&state.clock, &state.policy, day, &items, state.now())?;
    let slot = slots
        .iter()
        .find(|slot| slot.start_time == start)
        .ok_or_else(|| {
            ScheduleError::InvalidTarget(format!("{slot_time} is not on the slot grid"))
        })?;

    let view_model = ScheduleViewModel::new(store);
    let status = match own {
        SlotStatus::Blocked => view_model.block(slot).await?,
        _ => view_model.mark_interested(slot).await?,
    };

    let slot_time = start.to_rfc3339();
    state.log_info(
        "toggle_free_slot",
        &format!("slot_time={slot_time} status={}", status.as_str()),
    );
    Ok(SlotStatusResponse { slot_time, status })
}

fn item_command(
    state: &AppState,
    item_id: &str,
    kind: Option<&str>,
) -> Result<(ScheduleViewModel<dyn StatusRowStore>, ScheduleItem), ScheduleError> {
    let kind = kind.map(parse_item_kind).transpose()?;
    let (items, store) = snapshot(state)?;
    let store = store.ok_or(ScheduleError::NoSession)?;
    let item = items
        .into_iter()
        .find(|item| item.id == item_id && kind.is_none_or(|kind| item.kind == kind))
        .ok_or_else(|| ScheduleError::InvalidTarget(format!("unknown schedule item: {item_id}")))?;
    Ok((ScheduleViewModel::new(store), item))
}

fn item_outcome(
    state: &AppState,
    command: &str,
    item: ScheduleItem,
    status: ItemStatus,
) -> ItemStatusResponse {
    state.log_info(
        command,
        &format!("item_id={} status={}", item.id, status.as_str()),
    );
    ItemStatusResponse {
        item_id: item.id,
        kind: item.kind,
        status,
    }
}

fn snapshot(
    state: &AppState,
) -> Result<(Vec<ScheduleItem>, Option<SharedStatusStore>), ScheduleError> {
    let runtime = lock_runtime(state)?;
    Ok((runtime.items.clone(), runtime.status_store.clone()))
}

fn parse_event_day(state: &AppState, date: &str) -> Result<NaiveDate, ScheduleError> {
    let day = NaiveDate::parse_from_str(date.trim(), "%Y-%m-%d")
        .map_err(|error| ScheduleError::InvalidTarget(format!("invalid date '{date}': {error}")))?;
    if !state.event.contains_day(day) {
        return Err(ScheduleError::InvalidTarget(format!("{day} is outside the event")));
    }
    Ok(day)
}

fn parse_item_kind(value: &str) -> Result<ItemKind, ScheduleError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "agenda" | "agenda_event" => Ok(ItemKind::AgendaEvent),
        "meeting" | "personal_meeting" => Ok(ItemKind::PersonalMeeting),
        other => Err(ScheduleError::InvalidTarget(format!("unsupported item kind: {other}"))),
    }
}

fn lock_runtime(state: &AppState) -> Result<MutexGuard<'_, RuntimeState>, ScheduleError> {
    state
        .runtime
        .lock()
        .map_err(|error| ScheduleError::InvalidState(format!("runtime lock poisoned: {error}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::session_store::InMemorySessionStore;
    use crate::infrastructure::source_mapper::{AgendaFeedItem, MeetingRow};
    use crate::infrastructure::status_row_store::InMemoryStatusRowStore;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static NEXT_TEMP_WORKSPACE: AtomicUsize = AtomicUsize::new(0);

    struct FixedAgenda(Vec<AgendaFeedItem>);

    #[async_trait]
    impl AgendaFeedClient for FixedAgenda {
        async fn fetch_agenda(
            &self,
            _event_id: &str,
        ) -> Result<Vec<AgendaFeedItem>, ScheduleError> {
            Ok(self.0.clone())
        }
    }

    struct FixedMeetings(Vec<MeetingRow>);

    #[async_trait]
    impl MeetingRepository for FixedMeetings {
        async fn list_as_requester(
            &self,
            _user_id: &str,
        ) -> Result<Vec<MeetingRow>, ScheduleError> {
            Ok(self.0.clone())
        }

        async fn speaker_profile_ids(&self, _user_id: &str) -> Result<Vec<String>, ScheduleError> {
            Ok(Vec::new())
        }

        async fn list_as_speaker(
            &self,
            _speaker_ids: &[String],
        ) -> Result<Vec<MeetingRow>, ScheduleError> {
            Ok(Vec::new())
        }
    }

    struct TempWorkspace {
        path: PathBuf,
        rows: Arc<InMemoryStatusRowStore>,
        sessions: Arc<InMemorySessionStore>,
    }

    impl TempWorkspace {
        fn new() -> Self {
            let sequence = NEXT_TEMP_WORKSPACE.fetch_add(1, Ordering::Relaxed);
            let path = std::env::temp_dir().join(format!(
                "myschedule-command-tests-{}-{}",
                std::process::id(),
                sequence
            ));
            fs::create_dir_all(&path).expect("create temp workspace");
            Self {
                path,
                rows: Arc::new(InMemoryStatusRowStore::new()),
                sessions: Arc::new(InMemorySessionStore::default()),
            }
        }

        fn app_state(&self) -> AppState {
            let agenda = vec![
                agenda_item("k1", "2025-11-12T09:00:00", Some("keynote")),
                agenda_item("p1", "2025-11-12T10:00:00", Some("panel")),
            ];
            let meetings = vec![MeetingRow {
                id: "m1".to_string(),
                scheduled_at: Some("2025-11-12T14:00:00Z".to_string()),
                speaker_name: Some("Ada".to_string()),
                created_at: Some("2025-11-01T00:00:00Z".to_string()),
                ..MeetingRow::default()
            }];
            let backends = Backends::with_shared_row_store(self.sessions.clone(), self.rows.clone())
                .with_agenda_client(Arc::new(FixedAgenda(agenda)))
                .with_meeting_repository_factory(Arc::new(
                    move |_: &Session| -> Result<Arc<dyn MeetingRepository>, ScheduleError> {
                        Ok(Arc::new(FixedMeetings(meetings.clone())))
                    },
                ));
            let state = AppState::with_backends(self.path.clone(), backends)
                .expect("initialize app state")
                .with_now_provider(Arc::new(|| {
                    Utc.with_ymd_and_hms(2025, 11, 12, 13, 0, 0).unwrap()
                }));
            state.restore_session().expect("restore session");
            state
        }
    }

    impl Drop for TempWorkspace {
        fn drop(&mut self) {
            let _ = fs::remove_dir_all(&self.path);
        }
    }

    fn agenda_item(id: &str, time: &str, item_type: Option<&str>) -> AgendaFeedItem {
        AgendaFeedItem {
            id: id.to_string(),
            title: Some(format!("Talk {id}")),
            time: Some(time.to_string()),
            item_type: item_type.map(str::to_string),
            ..AgendaFeedItem::default()
        }
    }

    fn sign_in_request() -> SignInRequest {
        SignInRequest {
            user_id: "user-1".to_string(),
            email: Some(" ada@example.com ".to_string()),
            access_token: "token".to_string(),
            expires_at: Utc.with_ymd_and_hms(2025, 11, 13, 0, 0, 0).unwrap(),
        }
    }

    async fn signed_in_state(workspace: &TempWorkspace) -> AppState {
        let state = workspace.app_state();
        sign_in_impl(&state, sign_in_request()).await.expect("sign in");
        refresh_schedule_impl(&state).await.expect("refresh");
        state
    }

    #[tokio::test]
    async fn signed_out_view_shows_agenda_with_defaults() {
        let workspace = TempWorkspace::new();
        let state = workspace.app_state();

        let refreshed = refresh_schedule_impl(&state).await.expect("refresh");
        assert_eq!(refreshed.agenda_items, 2);
        assert_eq!(refreshed.meetings, 0);
        assert_eq!(refreshed.statuses, None);

        let day = get_day_schedule_impl(&state, "2025-11-12").expect("day schedule");
        assert_eq!(day.slots().count(), 44);
        assert!(day.has_items);
        assert!(day.is_today);

        let stats = get_day_stats_impl(&state, "2025-11-12").expect("stats");
        assert_eq!(stats.confirmed, 0);
        assert_eq!(stats.total, 0);
        assert!(stats.tentative > 0);
    }

    #[tokio::test]
    async fn mutations_require_a_session() {
        let workspace = TempWorkspace::new();
        let state = workspace.app_state();
        refresh_schedule_impl(&state).await.expect("refresh");

        let result = toggle_confirmation_impl(&state, "k1", None).await;
        assert!(matches!(result, Err(ScheduleError::NoSession)));
        let result = toggle_free_slot_interest_impl(&state, "2025-11-12T16:00:00").await;
        assert!(matches!(result, Err(ScheduleError::NoSession)));
    }

    #[tokio::test]
    async fn sign_in_loads_meetings_and_persists_session() {
        let workspace = TempWorkspace::new();
        let state = signed_in_state(&workspace).await;

        let stored = workspace.sessions.load_session().expect("load").expect("session saved");
        assert_eq!(stored.user_id, "user-1");
        assert_eq!(stored.email.as_deref(), Some("ada@example.com"));

        let meetings = list_meetings_impl(&state, None).expect("meetings");
        assert_eq!(meetings.meetings.len(), 1);
        assert_eq!(meetings.meetings[0].title, "Meeting with Ada");
        assert_eq!(meetings.counts.upcoming, 1);
        assert_eq!(meetings.counts.past, 0);

        let passed = list_meetings_impl(&state, Some("passed")).expect("passed meetings");
        assert!(passed.meetings.is_empty());
        assert!(list_meetings_impl(&state, Some("someday")).is_err());
    }

    struct UnavailableSessionStore;

    impl SessionStore for UnavailableSessionStore {
        fn save_session(&self, _session: &Session) -> Result<(), ScheduleError> {
            Err(ScheduleError::Credential("no keyring service".to_string()))
        }

        fn load_session(&self) -> Result<Option<Session>, ScheduleError> {
            Err(ScheduleError::Credential("no keyring service".to_string()))
        }

        fn delete_session(&self) -> Result<(), ScheduleError> {
            Err(ScheduleError::Credential("no keyring service".to_string()))
        }
    }

    #[tokio::test]
    async fn unavailable_keyring_does_not_block_sign_in_or_out() {
        let workspace = TempWorkspace::new();
        let backends = Backends::with_shared_row_store(
            Arc::new(UnavailableSessionStore),
            workspace.rows.clone(),
        )
        .with_agenda_client(Arc::new(FixedAgenda(vec![agenda_item(
            "k1",
            "2025-11-12T09:00:00",
            Some("keynote"),
        )])));
        let state = AppState::with_backends(workspace.path.clone(), backends)
            .expect("initialize app state")
            .with_now_provider(Arc::new(|| {
                Utc.with_ymd_and_hms(2025, 11, 12, 13, 0, 0).unwrap()
            }));
        assert!(!state.restore_session().expect("restore degrades"));

        let session = sign_in_impl(&state, sign_in_request()).await.expect("sign in");
        assert_eq!(session.user_id, "user-1");
        refresh_schedule_impl(&state).await.expect("refresh");

        let confirmed = confirm_item_impl(&state, "k1", None).await.expect("confirm");
        assert_eq!(confirmed.status, ItemStatus::Confirmed);

        assert!(sign_out_impl(&state).expect("sign out"));
        assert!(matches!(
            confirm_item_impl(&state, "k1", None).await,
            Err(ScheduleError::NoSession)
        ));
    }

    #[tokio::test]
    async fn expired_sign_in_is_rejected() {
        let workspace = TempWorkspace::new();
        let state = workspace.app_state();
        let mut request = sign_in_request();
        request.expires_at = Utc.with_ymd_and_hms(2025, 11, 12, 12, 0, 0).unwrap();

        assert!(sign_in_impl(&state, request).await.is_err());
        assert!(workspace.sessions.load_session().expect("load").is_none());
    }

    #[tokio::test]
    async fn confirmation_round_trip_writes_then_deletes_row() {
        let workspace = TempWorkspace::new();
        let state = signed_in_state(&workspace).await;

        let confirmed = toggle_confirmation_impl(&state, "k1", Some("agenda"))
            .await
            .expect("confirm");
        assert_eq!(confirmed.status, ItemStatus::Confirmed);
        assert_eq!(workspace.rows.snapshot().expect("rows").len(), 1);

        let stats = get_day_stats_impl(&state, "2025-11-12").expect("stats");
        assert!(stats.confirmed > 0);

        let reverted = unconfirm_item_impl(&state, "k1", None).await.expect("unconfirm");
        assert_eq!(reverted.status, ItemStatus::Tentative);
        assert!(workspace.rows.snapshot().expect("rows").is_empty());

        let again = confirm_item_impl(&state, "m1", Some("meeting"))
            .await
            .expect("confirm meeting");
        assert_eq!(again.kind, ItemKind::PersonalMeeting);
        assert!(confirm_item_impl(&state, "m1", Some("agenda")).await.is_err());
    }

    #[tokio::test]
    async fn free_slot_toggles_reject_occupied_and_off_grid_slots() {
        let workspace = TempWorkspace::new();
        let state = signed_in_state(&workspace).await;

        let interested = toggle_free_slot_interest_impl(&state, "2025-11-12T16:00:00")
            .await
            .expect("interest");
        assert_eq!(interested.status, SlotStatus::Interested);

        let blocked = toggle_free_slot_blocked_impl(&state, "2025-11-12T16:00:00-05:00")
            .await
            .expect("block");
        assert_eq!(blocked.status, SlotStatus::Blocked);

        let cleared = toggle_free_slot_blocked_impl(&state, "2025-11-12T16:00:00Z")
            .await
            .expect("unblock");
        assert_eq!(cleared.status, SlotStatus::Available);
        assert!(workspace.rows.snapshot().expect("rows").is_empty());

        let occupied = toggle_free_slot_interest_impl(&state, "2025-11-12T09:00:00").await;
        assert!(matches!(occupied, Err(ScheduleError::InvalidTarget(_))));
        let off_grid = toggle_free_slot_interest_impl(&state, "2025-11-12T16:05:00").await;
        assert!(matches!(off_grid, Err(ScheduleError::InvalidTarget(_))));
    }

    #[tokio::test]
    async fn favorites_only_apply_to_agenda_items() {
        let workspace = TempWorkspace::new();
        let state = signed_in_state(&workspace).await;

        let favorite = toggle_favorite_impl(&state, "p1", None).await.expect("favorite");
        assert!(favorite.is_favorite);
        let day = get_day_schedule_impl(&state, "2025-11-12").expect("day");
        assert!(day
            .slots()
            .filter_map(|slot| slot.occupant.as_ref())
            .any(|occupant| occupant.id == "p1" && occupant.is_favorite));

        let meeting = toggle_favorite_impl(&state, "m1", None).await;
        assert!(matches!(meeting, Err(ScheduleError::InvalidTarget(_))));
    }

    #[tokio::test]
    async fn sign_out_drops_statuses_and_meetings() {
        let workspace = TempWorkspace::new();
        let state = signed_in_state(&workspace).await;
        confirm_item_impl(&state, "k1", None).await.expect("confirm");

        assert!(sign_out_impl(&state).expect("sign out"));
        assert!(workspace.sessions.load_session().expect("load").is_none());
        assert!(list_meetings_impl(&state, None).expect("meetings").meetings.is_empty());

        let stats = get_day_stats_impl(&state, "2025-11-12").expect("stats");
        assert_eq!(stats.confirmed, 0);
        assert!(!sign_out_impl(&state).expect("second sign out"));
    }

    #[tokio::test]
    async fn stored_session_is_restored_and_hydrated_on_refresh() {
        let workspace = TempWorkspace::new();
        {
            let state = signed_in_state(&workspace).await;
            confirm_item_impl(&state, "k1", None).await.expect("confirm");
        }

        let state = workspace.app_state();
        let refreshed = refresh_schedule_impl(&state).await.expect("refresh");
        assert_eq!(refreshed.meetings, 1);
        assert_eq!(refreshed.statuses, Some(1));

        let stats = get_day_stats_impl(&state, "2025-11-12").expect("stats");
        assert!(stats.confirmed > 0);
    }

    #[tokio::test]
    async fn event_schedule_covers_every_configured_day() {
        let workspace = TempWorkspace::new();
        let state = workspace.app_state();
        refresh_schedule_impl(&state).await.expect("refresh");

        let days = get_event_schedule_impl(&state).expect("event schedule");
        assert_eq!(days.len(), 3);
        assert!(days[0].has_items);
        assert!(!days[1].has_items);
        assert_eq!(days[2].day_name, "Friday");
        assert!(get_day_schedule_impl(&state, "12/11/2025").is_err());
        assert!(matches!(
            get_day_schedule_impl(&state, "2025-11-20"),
            Err(ScheduleError::InvalidTarget(_))
        ));
    }

    #[test]
    fn item_kind_parsing_accepts_short_and_long_names() {
        assert_eq!(parse_item_kind("Agenda").expect("agenda"), ItemKind::AgendaEvent);
        assert_eq!(
            parse_item_kind("personal_meeting").expect("meeting"),
            ItemKind::PersonalMeeting
        );
        assert!(parse_item_kind("slot").is_err());
    }
}
