use crate::domain::models::StatusTarget;
use crate::infrastructure::error::ScheduleError;
use crate::infrastructure::status_row_mapper::{decode_status_row, format_instant, StatusRow};
use crate::infrastructure::storage::{initialize_database, open_connection};
use async_trait::async_trait;
use reqwest::Client;
use rusqlite::{params, OptionalExtension};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use url::Url;

const STATUS_TABLE_PATH: [&str; 3] = ["rest", "v1", "user_agenda_status"];

/// Row-level access to `user_agenda_status`. No transactions: every call is
/// one independent read or write.
#[async_trait]
pub trait StatusRowStore: Send + Sync {
    async fn list_for_user(&self, user_id: &str) -> Result<Vec<StatusRow>, ScheduleError>;

    async fn find_row_id(
        &self,
        user_id: &str,
        target: &StatusTarget,
    ) -> Result<Option<String>, ScheduleError>;

    async fn insert(&self, row: &StatusRow) -> Result<String, ScheduleError>;

    async fn update(&self, row_id: &str, row: &StatusRow) -> Result<(), ScheduleError>;

    async fn delete(&self, row_id: &str) -> Result<(), ScheduleError>;
}

/// Select the existing row for `target`, then update it or insert a new one.
pub async fn upsert_by_target<S: StatusRowStore + ?Sized>(
    store: &S,
    user_id: &str,
    target: &StatusTarget,
    row: &StatusRow,
) -> Result<String, ScheduleError> {
    match store.find_row_id(user_id, target).await? {
        Some(row_id) => {
            store.update(&row_id, row).await?;
            Ok(row_id)
        }
        None => store.insert(row).await,
    }
}

/// Removes the row for `target` if one exists. Returns whether a row was removed.
pub async fn delete_by_target<S: StatusRowStore + ?Sized>(
    store: &S,
    user_id: &str,
    target: &StatusTarget,
) -> Result<bool, ScheduleError> {
    match store.find_row_id(user_id, target).await? {
        Some(row_id) => {
            store.delete(&row_id).await?;
            Ok(true)
        }
        None => Ok(false),
    }
}

fn target_column(target: &StatusTarget) -> (&'static str, String) {
    match target {
        StatusTarget::Agenda(id) => ("agenda_id", id.clone()),
        StatusTarget::Meeting(id) => ("meeting_id", id.clone()),
        StatusTarget::Slot(time) => ("slot_time", format_instant(*time)),
    }
}

fn ensure_single_key(row: &StatusRow) -> Result<(), ScheduleError> {
    let keys = [&row.agenda_id, &row.meeting_id, &row.slot_time]
        .into_iter()
        .filter(|key| key.as_deref().is_some_and(|value| !value.trim().is_empty()))
        .count();
    if keys != 1 {
        return Err(ScheduleError::InvalidRecord(format!(
            "status row must carry exactly one target key, found {keys}"
        )));
    }
    Ok(())
}

#[derive(Debug, Default)]
pub struct InMemoryStatusRowStore {
    rows: Mutex<BTreeMap<String, StatusRow>>,
    next_id: AtomicU64,
}

impl InMemoryStatusRowStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Result<Vec<StatusRow>, ScheduleError> {
        Ok(self.lock()?.values().cloned().collect())
    }

    fn lock(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, BTreeMap<String, StatusRow>>, ScheduleError> {
        self.rows
            .lock()
            .map_err(|error| {
                ScheduleError::InvalidState(format!("status rows lock poisoned: {error}"))
            })
    }
}

#[async_trait]
impl StatusRowStore for InMemoryStatusRowStore {
    async fn list_for_user(&self, user_id: &str) -> Result<Vec<StatusRow>, ScheduleError> {
        Ok(self
            .lock()?
            .values()
            .filter(|row| row.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn find_row_id(
        &self,
        user_id: &str,
        target: &StatusTarget,
    ) -> Result<Option<String>, ScheduleError> {
        Ok(self
            .lock()?
            .iter()
            .find(|(_, row)| {
                row.user_id == user_id
                    && decode_status_row(row).is_ok_and(|record| &record.target == target)
            })
            .map(|(row_id, _)| row_id.clone()))
    }

    async fn insert(&self, row: &StatusRow) -> Result<String, ScheduleError> {
        ensure_single_key(row)?;
        let row_id = (self.next_id.fetch_add(1, Ordering::SeqCst) + 1).to_string();
        let mut stored = row.clone();
        stored.id = Some(row_id.clone());
        self.lock()?.insert(row_id.clone(), stored);
        Ok(row_id)
    }

    async fn update(&self, row_id: &str, row: &StatusRow) -> Result<(), ScheduleError> {
        ensure_single_key(row)?;
        let mut rows = self.lock()?;
        let existing = rows
            .get_mut(row_id)
            .ok_or_else(|| ScheduleError::Remote(format!("status row {row_id} not found")))?;
        let mut stored = row.clone();
        stored.id = Some(row_id.to_string());
        *existing = stored;
        Ok(())
    }

    async fn delete(&self, row_id: &str) -> Result<(), ScheduleError> {
        self.lock()?.remove(row_id);
        Ok(())
    }
}

/// Local durable store used when no REST backend is configured.
#[derive(Debug, Clone)]
pub struct SqliteStatusRowStore {
    db_path: PathBuf,
}

impl SqliteStatusRowStore {
    pub fn new(db_path: impl AsRef<Path>) -> Self {
        Self {
            db_path: db_path.as_ref().to_path_buf(),
        }
    }

    pub fn open(db_path: impl AsRef<Path>) -> Result<Self, ScheduleError> {
        let store = Self::new(db_path);
        initialize_database(&store.db_path)?;
        Ok(store)
    }

    async fn run<T, F>(&self, task: F) -> Result<T, ScheduleError>
    where
        T: Send + 'static,
        F: FnOnce(&rusqlite::Connection) -> Result<T, ScheduleError> + Send + 'static,
    {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let connection = open_connection(&db_path)?;
            task(&connection)
        })
        .await
        .map_err(|error| ScheduleError::InvalidState(format!("sqlite worker failed: {error}")))?
    }
}

const SELECT_COLUMNS: &str = "id, user_id, event_id, agenda_id, meeting_id, slot_time, status, \
     slot_status, is_favorite, confirmed_at, updated_at";

fn row_from_sql(row: &rusqlite::Row<'_>) -> rusqlite::Result<StatusRow> {
    let id: i64 = row.get(0)?;
    Ok(StatusRow {
        id: Some(id.to_string()),
        user_id: row.get(1)?,
        event_id: row.get(2)?,
        agenda_id: row.get(3)?,
        meeting_id: row.get(4)?,
        slot_time: row.get(5)?,
        status: row.get(6)?,
        slot_status: row.get(7)?,
        is_favorite: row.get::<_, i64>(8)? != 0,
        confirmed_at: row.get(9)?,
        updated_at: row.get(10)?,
    })
}

fn parse_sqlite_id(row_id: &str) -> Result<i64, ScheduleError> {
    row_id
        .trim()
        .parse::<i64>()
        .map_err(|error| {
            ScheduleError::InvalidRecord(format!("invalid row id '{row_id}': {error}"))
        })
}

#[async_trait]
impl StatusRowStore for SqliteStatusRowStore {
    async fn list_for_user(&self, user_id: &str) -> Result<Vec<StatusRow>, ScheduleError> {
        let user_id = user_id.to_string();
        self.run(move |connection| {
            let mut statement = connection.prepare(&format!(
                "SELECT {SELECT_COLUMNS} FROM user_agenda_status WHERE user_id = ?1 ORDER BY id"
            ))?;
            let rows = statement
                .query_map(params![user_id], row_from_sql)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
    }

    async fn find_row_id(
        &self,
        user_id: &str,
        target: &StatusTarget,
    ) -> Result<Option<String>, ScheduleError> {
        let user_id = user_id.to_string();
        let (column, value) = target_column(target);
        self.run(move |connection| {
            let found: Option<i64> = connection
                .query_row(
                    &format!(
                        "SELECT id FROM user_agenda_status \
                         WHERE user_id = ?1 AND {column} = ?2 LIMIT 1"
                    ),
                    params![user_id, value],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(found.map(|id| id.to_string()))
        })
        .await
    }

    async fn insert(&self, row: &StatusRow) -> Result<String, ScheduleError> {
        ensure_single_key(row)?;
        let row = row.clone();
        self.run(move |connection| {
            connection.execute(
                "INSERT INTO user_agenda_status
                   (user_id, event_id, agenda_id, meeting_id, slot_time, status, slot_status,
                    is_favorite, confirmed_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    row.user_id,
                    row.event_id,
                    row.agenda_id,
                    row.meeting_id,
                    row.slot_time,
                    row.status,
                    row.slot_status,
                    row.is_favorite as i64,
                    row.confirmed_at,
                    row.updated_at,
                ],
            )?;
            Ok(connection.last_insert_rowid().to_string())
        })
        .await
    }

    async fn update(&self, row_id: &str, row: &StatusRow) -> Result<(), ScheduleError> {
        ensure_single_key(row)?;
        let id = parse_sqlite_id(row_id)?;
        let row = row.clone();
        self.run(move |connection| {
            let changed = connection.execute(
                "UPDATE user_agenda_status SET
                   event_id = ?2, agenda_id = ?3, meeting_id = ?4, slot_time = ?5, status = ?6,
                   slot_status = ?7, is_favorite = ?8, confirmed_at = ?9, updated_at = ?10
                 WHERE id = ?1",
                params![
                    id,
                    row.event_id,
                    row.agenda_id,
                    row.meeting_id,
                    row.slot_time,
                    row.status,
                    row.slot_status,
                    row.is_favorite as i64,
                    row.confirmed_at,
                    row.updated_at,
                ],
            )?;
            if changed == 0 {
                return Err(ScheduleError::Remote(format!("status row {id} not found")));
            }
            Ok(())
        })
        .await
    }

    async fn delete(&self, row_id: &str) -> Result<(), ScheduleError> {
        let id = parse_sqlite_id(row_id)?;
        self.run(move |connection| {
            connection.execute("DELETE FROM user_agenda_status WHERE id = ?1", params![id])?;
            Ok(())
        })
        .await
    }
}

/// PostgREST-style access to the shared backend table, bound to one
/// signed-in session.
#[derive(Debug, Clone)]
pub struct RestStatusRowStore {
    client: Client,
    endpoint: Url,
    api_key: Option<String>,
    access_token: String,
}

#[derive(Debug, serde::Deserialize)]
struct InsertedRow {
    #[serde(
        default,
        deserialize_with = "crate::infrastructure::status_row_mapper::deserialize_row_id"
    )]
    id: Option<String>,
}

impl RestStatusRowStore {
    pub fn new(
        rest_url: &str,
        api_key: Option<String>,
        access_token: impl Into<String>,
    ) -> Result<Self, ScheduleError> {
        Ok(Self {
            client: Client::new(),
            endpoint: table_endpoint(rest_url)?,
            api_key: api_key
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty()),
            access_token: access_token.into(),
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    fn request(&self, method: reqwest::Method) -> reqwest::RequestBuilder {
        let mut request = self
            .client
            .request(method, self.endpoint.clone())
            .bearer_auth(&self.access_token);
        if let Some(api_key) = self.api_key.as_deref() {
            request = request.header("apikey", api_key);
        }
        request
    }

    async fn send(
        &self,
        request: reqwest::RequestBuilder,
        action: &str,
    ) -> Result<String, ScheduleError> {
        let response = request
            .send()
            .await
            .map_err(|error| {
                ScheduleError::Remote(format!("network error while {action}: {error}"))
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|error| {
                ScheduleError::Remote(format!("failed reading response while {action}: {error}"))
            })?;

        if !status.is_success() {
            return Err(rest_http_error(status, &body, action));
        }
        Ok(body)
    }
}

pub(crate) fn table_endpoint(rest_url: &str) -> Result<Url, ScheduleError> {
    let mut url = Url::parse(rest_url.trim())
        .map_err(|error| {
            ScheduleError::InvalidConfig(format!("invalid restUrl '{rest_url}': {error}"))
        })?;
    {
        let mut segments = url
            .path_segments_mut()
            .map_err(|_| ScheduleError::InvalidConfig("restUrl cannot be a base".to_string()))?;
        segments.pop_if_empty();
        segments.extend(STATUS_TABLE_PATH);
    }
    Ok(url)
}

pub(crate) fn rest_http_error(
    status: reqwest::StatusCode,
    body: &str,
    action: &str,
) -> ScheduleError {
    let code = status.as_u16();
    let message = if body.trim().is_empty() {
        format!("row store error while {action}: http {code}")
    } else {
        format!("row store error while {action}: http {code}; body={body}")
    };
    if status.is_server_error() {
        ScheduleError::Remote(format!("{message} (temporarily unavailable)"))
    } else {
        ScheduleError::Remote(message)
    }
}

#[async_trait]
impl StatusRowStore for RestStatusRowStore {
    async fn list_for_user(&self, user_id: &str) -> Result<Vec<StatusRow>, ScheduleError> {
        let request = self
            .request(reqwest::Method::GET)
            .query(&[("select", "*".to_string()), ("user_id", format!("eq.{user_id}"))]);
        let body = self.send(request, "listing status rows").await?;
        serde_json::from_str(&body).map_err(|error| {
            ScheduleError::Remote(format!("invalid status rows payload: {error}; body={body}"))
        })
    }

    async fn find_row_id(
        &self,
        user_id: &str,
        target: &StatusTarget,
    ) -> Result<Option<String>, ScheduleError> {
        let (column, value) = target_column(target);
        let request = self.request(reqwest::Method::GET).query(&[
            ("select", "id".to_string()),
            ("user_id", format!("eq.{user_id}")),
            (column, format!("eq.{value}")),
            ("limit", "1".to_string()),
        ]);
        let body = self.send(request, "looking up status row").await?;
        let rows: Vec<InsertedRow> = serde_json::from_str(&body).map_err(|error| {
            ScheduleError::Remote(format!(
                "invalid status row lookup payload: {error}; body={body}"
            ))
        })?;
        Ok(rows.into_iter().find_map(|row| row.id))
    }

    async fn insert(&self, row: &StatusRow) -> Result<String, ScheduleError> {
        ensure_single_key(row)?;
        let request = self
            .request(reqwest::Method::POST)
            .header("Prefer", "return=representation")
            .json(row);
        let body = self.send(request, "inserting status row").await?;
        let rows: Vec<InsertedRow> = serde_json::from_str(&body).map_err(|error| {
            ScheduleError::Remote(format!(
                "invalid status row insert payload: {error}; body={body}"
            ))
        })?;
        rows.into_iter()
            .find_map(|row| row.id)
            .ok_or_else(|| {
                ScheduleError::Remote("status row insert response did not include id".to_string())
            })
    }

    async fn update(&self, row_id: &str, row: &StatusRow) -> Result<(), ScheduleError> {
        ensure_single_key(row)?;
        let request = self
            .request(reqwest::Method::PATCH)
            .query(&[("id", format!("eq.{row_id}"))])
            .json(row);
        self.send(request, "updating status row").await?;
        Ok(())
    }

    async fn delete(&self, row_id: &str) -> Result<(), ScheduleError> {
        let request = self
            .request(reqwest::Method::DELETE)
            .query(&[("id", format!("eq.{row_id}"))]);
        self.send(request, "deleting status row").await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};
    use std::fs;

    struct TempDb {
        dir: PathBuf,
    }

    impl TempDb {
        fn new() -> Self {
            let dir = std::env::temp_dir().join(format!(
                "myschedule-rows-{}-{}",
                std::process::id(),
                NEXT_DIR.fetch_add(1, Ordering::SeqCst)
            ));
            fs::create_dir_all(&dir).expect("create temp dir");
            Self { dir }
        }

        fn path(&self) -> PathBuf {
            self.dir.join("schedule.sqlite")
        }
    }

    impl Drop for TempDb {
        fn drop(&mut self) {
            let _ = fs::remove_dir_all(&self.dir);
        }
    }

    static NEXT_DIR: AtomicU64 = AtomicU64::new(0);

    fn slot_time() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2025-11-12T14:15:00Z")
            .expect("valid datetime")
            .with_timezone(&Utc)
    }

    fn agenda_row(user_id: &str, agenda_id: &str, status: &str) -> StatusRow {
        StatusRow {
            user_id: user_id.to_string(),
            agenda_id: Some(agenda_id.to_string()),
            status: Some(status.to_string()),
            ..StatusRow::default()
        }
    }

    fn slot_row(user_id: &str, status: &str) -> StatusRow {
        StatusRow {
            user_id: user_id.to_string(),
            slot_time: Some(format_instant(slot_time())),
            status: Some(status.to_string()),
            slot_status: Some(status.to_string()),
            ..StatusRow::default()
        }
    }

    async fn exercise_store(store: &dyn StatusRowStore) {
        let agenda = StatusTarget::Agenda("A1".to_string());
        let slot = StatusTarget::Slot(slot_time());

        assert!(store.find_row_id("user-1", &agenda).await.expect("find").is_none());

        let confirmed = agenda_row("user-1", "A1", "confirmed");
        let first = upsert_by_target(store, "user-1", &agenda, &confirmed)
            .await
            .expect("insert");
        let tentative = agenda_row("user-1", "A1", "tentative");
        let second = upsert_by_target(store, "user-1", &agenda, &tentative)
            .await
            .expect("update");
        assert_eq!(first, second);

        upsert_by_target(store, "user-1", &slot, &slot_row("user-1", "blocked"))
            .await
            .expect("slot insert");
        upsert_by_target(store, "user-2", &agenda, &agenda_row("user-2", "A1", "confirmed"))
            .await
            .expect("other user");

        let rows = store.list_for_user("user-1").await.expect("list");
        assert_eq!(rows.len(), 2);
        let agenda_rows = rows
            .iter()
            .filter(|row| row.agenda_id.as_deref() == Some("A1"))
            .collect::<Vec<_>>();
        assert_eq!(agenda_rows.len(), 1);
        assert_eq!(agenda_rows[0].status.as_deref(), Some("tentative"));

        assert!(delete_by_target(store, "user-1", &slot).await.expect("delete"));
        assert!(!delete_by_target(store, "user-1", &slot).await.expect("delete again"));
        assert_eq!(store.list_for_user("user-1").await.expect("list").len(), 1);
        assert_eq!(store.list_for_user("user-2").await.expect("list").len(), 1);
    }

    #[tokio::test]
    async fn in_memory_store_upserts_by_target() {
        let store = InMemoryStatusRowStore::new();
        exercise_store(&store).await;
    }

    #[tokio::test]
    async fn sqlite_store_upserts_by_target() {
        let db = TempDb::new();
        let store = SqliteStatusRowStore::open(db.path()).expect("open");
        exercise_store(&store).await;
    }

    #[tokio::test]
    async fn rows_with_several_keys_are_refused() {
        let mut row = agenda_row("user-1", "A1", "confirmed");
        row.meeting_id = Some("m-1".to_string());

        let store = InMemoryStatusRowStore::new();
        assert!(matches!(store.insert(&row).await, Err(ScheduleError::InvalidRecord(_))));

        let db = TempDb::new();
        let sqlite = SqliteStatusRowStore::open(db.path()).expect("open");
        assert!(matches!(sqlite.insert(&row).await, Err(ScheduleError::InvalidRecord(_))));
    }

    #[tokio::test]
    async fn sqlite_schema_rejects_keyless_rows() {
        let db = TempDb::new();
        initialize_database(&db.path()).expect("init");
        let connection = open_connection(&db.path()).expect("open");
        let result = connection.execute(
            "INSERT INTO user_agenda_status (user_id, status) VALUES ('user-1', 'confirmed')",
            [],
        );
        assert!(result.is_err());
    }

    #[test]
    fn rest_endpoint_appends_table_path() {
        let anon = Some("anon".to_string());
        let store = RestStatusRowStore::new("https://project.example.co/", anon, "token")
            .expect("store");
        assert_eq!(
            store.endpoint().as_str(),
            "https://project.example.co/rest/v1/user_agenda_status"
        );
        assert!(RestStatusRowStore::new("not a url", None, "token").is_err());
    }

    #[test]
    fn server_errors_are_transient() {
        let error = rest_http_error(reqwest::StatusCode::BAD_GATEWAY, "", "listing status rows");
        assert!(error.is_transient());
        let unauthorized = reqwest::StatusCode::UNAUTHORIZED;
        let error = rest_http_error(unauthorized, "jwt expired", "listing status rows");
        assert!(!error.is_transient());
    }
}
