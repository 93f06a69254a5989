use crate::domain::event_time::EventClock;
use crate::domain::models::{ItemKind, MeetingCounts, MeetingFilter, ScheduleItem};
use crate::infrastructure::agenda_feed_client::AgendaFeedClient;
use crate::infrastructure::error::ScheduleError;
use crate::infrastructure::meeting_repository::MeetingRepository;
use crate::infrastructure::source_mapper::{merge_schedule_items, AgendaFeedItem, MeetingRow};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::time::{sleep, Duration as TokioDuration};
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u8,
    pub base_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 200,
        }
    }
}

/// Loads agenda and meeting sources and merges them into schedule items.
/// A failing source contributes nothing; the other still loads.
pub struct ScheduleSources<A, M>
where
    A: AgendaFeedClient + ?Sized,
    M: MeetingRepository + ?Sized,
{
    clock: EventClock,
    event_id: String,
    agenda_client: Option<Arc<A>>,
    meeting_repository: Option<Arc<M>>,
    retry_policy: RetryPolicy,
}

impl<A, M> ScheduleSources<A, M>
where
    A: AgendaFeedClient + ?Sized,
    M: MeetingRepository + ?Sized,
{
    pub fn new(clock: EventClock, event_id: impl Into<String>) -> Self {
        Self {
            clock,
            event_id: event_id.into(),
            agenda_client: None,
            meeting_repository: None,
            retry_policy: RetryPolicy::default(),
        }
    }

    pub fn with_agenda_client(mut self, agenda_client: Arc<A>) -> Self {
        self.agenda_client = Some(agenda_client);
        self
    }

    pub fn with_meeting_repository(mut self, meeting_repository: Arc<M>) -> Self {
        self.meeting_repository = Some(meeting_repository);
        self
    }

    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    /// Agenda items first, then the user's meetings.
    pub async fn load_items(&self, user_id: Option<&str>) -> Vec<ScheduleItem> {
        let agenda = self.fetch_agenda().await;
        let meetings = match user_id {
            Some(user_id) => self.fetch_meetings(user_id).await,
            None => Vec::new(),
        };
        let items = merge_schedule_items(&self.clock, &agenda, &meetings);
        info!(
            agenda = agenda.len(),
            meetings = meetings.len(),
            items = items.len(),
            "loaded schedule sources"
        );
        items
    }

    pub async fn fetch_agenda(&self) -> Vec<AgendaFeedItem> {
        let Some(client) = self.agenda_client.as_ref() else {
            return Vec::new();
        };
        match self.fetch_agenda_with_retry(client.as_ref()).await {
            Ok(items) => items,
            Err(error) => {
                warn!(
                    %error,
                    event_id = %self.event_id,
                    "agenda unavailable; showing no agenda items"
                );
                Vec::new()
            }
        }
    }

    /// Requested meetings plus meetings booked with the user's speaker
    /// profiles, de-duplicated by id (requested rows win) and sorted newest
    /// first by `created_at`.
    pub async fn fetch_meetings(&self, user_id: &str) -> Vec<MeetingRow> {
        let Some(repository) = self.meeting_repository.as_ref() else {
            return Vec::new();
        };

        let mut meetings = match repository.list_as_requester(user_id).await {
            Ok(rows) => rows,
            Err(error) => {
                warn!(%error, "requested meetings unavailable");
                Vec::new()
            }
        };

        let speaker_ids = match repository.speaker_profile_ids(user_id).await {
            Ok(ids) => ids,
            Err(error) => {
                warn!(%error, "speaker profiles unavailable");
                Vec::new()
            }
        };
        if !speaker_ids.is_empty() {
            match repository.list_as_speaker(&speaker_ids).await {
                Ok(rows) => {
                    let mut seen = meetings
                        .iter()
                        .map(|row| row.id.clone())
                        .collect::<HashSet<_>>();
                    meetings.extend(rows.into_iter().filter(|row| seen.insert(row.id.clone())));
                }
                Err(error) => warn!(%error, "speaker meetings unavailable"),
            }
        }

        meetings.sort_by_key(|row| std::cmp::Reverse(created_at(row)));
        meetings
    }

    async fn fetch_agenda_with_retry(
        &self,
        client: &A,
    ) -> Result<Vec<AgendaFeedItem>, ScheduleError> {
        let max_attempts = self.retry_policy.max_attempts.max(1);
        let mut attempt: u8 = 0;

        loop {
            match client.fetch_agenda(&self.event_id).await {
                Ok(items) => return Ok(items),
                Err(error) if error.is_transient() && attempt + 1 < max_attempts => {
                    let delay = self
                        .retry_policy
                        .base_delay_ms
                        .saturating_mul(2u64.saturating_pow(attempt as u32));
                    warn!(%error, attempt = attempt + 1, delay_ms = delay, "retrying agenda fetch");
                    sleep(TokioDuration::from_millis(delay)).await;
                    attempt = attempt.saturating_add(1);
                }
                Err(error) => return Err(error),
            }
        }
    }
}

fn created_at(row: &MeetingRow) -> DateTime<Utc> {
    row.created_at
        .as_deref()
        .and_then(|raw| DateTime::parse_from_rfc3339(raw.trim()).ok())
        .map(|parsed| parsed.with_timezone(&Utc))
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

/// Personal meetings only. Incoming means starting at or after `now`.
pub fn filter_meetings(
    items: &[ScheduleItem],
    filter: MeetingFilter,
    now: DateTime<Utc>,
) -> Vec<&ScheduleItem> {
    items
        .iter()
        .filter(|item| item.kind == ItemKind::PersonalMeeting)
        .filter(|item| match filter {
            MeetingFilter::All => true,
            MeetingFilter::Incoming => item.start_time >= now,
            MeetingFilter::Passed => item.start_time < now,
        })
        .collect()
}

pub fn meeting_counts(items: &[ScheduleItem], now: DateTime<Utc>) -> MeetingCounts {
    MeetingCounts {
        total: filter_meetings(items, MeetingFilter::All, now).len(),
        upcoming: filter_meetings(items, MeetingFilter::Incoming, now).len(),
        past: filter_meetings(items, MeetingFilter::Passed, now).len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    enum FakeAgendaResponse {
        Success(Vec<AgendaFeedItem>),
        NetworkError,
        Unauthorized,
    }

    struct FakeAgendaClient {
        responses: Mutex<Vec<FakeAgendaResponse>>,
        calls: AtomicUsize,
    }

    impl FakeAgendaClient {
        fn with_responses(mut responses: Vec<FakeAgendaResponse>) -> Self {
            responses.reverse();
            Self {
                responses: Mutex::new(responses),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl AgendaFeedClient for FakeAgendaClient {
        async fn fetch_agenda(&self, event_id: &str) -> Result<Vec<AgendaFeedItem>, ScheduleError> {
            assert_eq!(event_id, "bsl2025");
            self.calls.fetch_add(1, Ordering::SeqCst);
            let next = self.responses.lock().expect("responses lock").pop();
            match next {
                Some(FakeAgendaResponse::Success(items)) => Ok(items),
                Some(FakeAgendaResponse::NetworkError) | None => Err(ScheduleError::Remote(
                    "network error while fetching agenda: connection refused".to_string(),
                )),
                Some(FakeAgendaResponse::Unauthorized) => {
                    Err(ScheduleError::Remote("agenda feed error: http 401".to_string()))
                }
            }
        }
    }

    #[derive(Default)]
    struct FakeMeetingRepository {
        requested: Vec<MeetingRow>,
        speaker_ids: Vec<String>,
        speaker_meetings: Vec<MeetingRow>,
        requested_fails: bool,
    }

    #[async_trait]
    impl MeetingRepository for FakeMeetingRepository {
        async fn list_as_requester(
            &self,
            _user_id: &str,
        ) -> Result<Vec<MeetingRow>, ScheduleError> {
            if self.requested_fails {
                return Err(ScheduleError::Remote("row store error: http 500".to_string()));
            }
            Ok(self.requested.clone())
        }

        async fn speaker_profile_ids(&self, _user_id: &str) -> Result<Vec<String>, ScheduleError> {
            Ok(self.speaker_ids.clone())
        }

        async fn list_as_speaker(
            &self,
            speaker_ids: &[String],
        ) -> Result<Vec<MeetingRow>, ScheduleError> {
            Ok(self
                .speaker_meetings
                .iter()
                .filter(|row| row.speaker_id.as_ref().is_some_and(|id| speaker_ids.contains(id)))
                .cloned()
                .collect())
        }
    }

    fn agenda_item(id: &str, time: &str) -> AgendaFeedItem {
        AgendaFeedItem {
            id: id.to_string(),
            time: Some(time.to_string()),
            ..AgendaFeedItem::default()
        }
    }

    fn meeting(id: &str, scheduled_at: &str, created_at: &str, title: &str) -> MeetingRow {
        MeetingRow {
            id: id.to_string(),
            title: Some(title.to_string()),
            scheduled_at: Some(scheduled_at.to_string()),
            created_at: Some(created_at.to_string()),
            speaker_id: Some("spk-1".to_string()),
            ..MeetingRow::default()
        }
    }

    fn sources(
        agenda: FakeAgendaClient,
        meetings: FakeMeetingRepository,
    ) -> (Arc<FakeAgendaClient>, ScheduleSources<FakeAgendaClient, FakeMeetingRepository>) {
        let agenda = Arc::new(agenda);
        let sources = ScheduleSources::new(EventClock::default(), "bsl2025")
            .with_agenda_client(Arc::clone(&agenda))
            .with_meeting_repository(Arc::new(meetings))
            .with_retry_policy(RetryPolicy {
                max_attempts: 2,
                base_delay_ms: 1,
            });
        (agenda, sources)
    }

    #[tokio::test]
    async fn agenda_fetch_retries_network_errors() {
        let (client, sources) = sources(
            FakeAgendaClient::with_responses(vec![
                FakeAgendaResponse::NetworkError,
                FakeAgendaResponse::Success(vec![agenda_item("A1", "2025-11-12T08:00:00Z")]),
            ]),
            FakeMeetingRepository::default(),
        );
        assert_eq!(sources.fetch_agenda().await.len(), 1);
        assert_eq!(client.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn agenda_failures_degrade_to_empty() {
        let (client, sources) = sources(
            FakeAgendaClient::with_responses(vec![FakeAgendaResponse::Unauthorized]),
            FakeMeetingRepository::default(),
        );
        assert!(sources.fetch_agenda().await.is_empty());
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn meetings_are_deduplicated_and_sorted_newest_first() {
        let repository = FakeMeetingRepository {
            requested: vec![
                meeting("m-1", "2025-11-12T10:00:00Z", "2025-10-01T00:00:00Z", "requested copy"),
                meeting("m-2", "2025-11-12T11:00:00Z", "2025-10-03T00:00:00Z", "second"),
            ],
            speaker_ids: vec!["spk-1".to_string()],
            speaker_meetings: vec![
                meeting("m-1", "2025-11-12T10:00:00Z", "2025-10-01T00:00:00Z", "speaker copy"),
                meeting("m-3", "2025-11-13T09:00:00Z", "2025-10-02T00:00:00Z", "third"),
            ],
            ..FakeMeetingRepository::default()
        };
        let (_, sources) = sources(FakeAgendaClient::with_responses(vec![]), repository);

        let meetings = sources.fetch_meetings("user-1").await;
        let ids = meetings.iter().map(|row| row.id.as_str()).collect::<Vec<_>>();
        assert_eq!(ids, vec!["m-2", "m-3", "m-1"]);
        assert_eq!(meetings[2].title.as_deref(), Some("requested copy"));
    }

    #[tokio::test]
    async fn one_failing_source_leaves_the_other() {
        let repository = FakeMeetingRepository {
            requested_fails: true,
            speaker_ids: vec!["spk-1".to_string()],
            speaker_meetings: vec![meeting(
                "m-3",
                "2025-11-13T09:00:00Z",
                "2025-10-02T00:00:00Z",
                "third",
            )],
            ..FakeMeetingRepository::default()
        };
        let (_, sources) = sources(
            FakeAgendaClient::with_responses(vec![FakeAgendaResponse::Unauthorized]),
            repository,
        );

        let items = sources.load_items(Some("user-1")).await;
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].id, "m-3");
    }

    #[tokio::test]
    async fn signed_out_loads_agenda_only() {
        let repository = FakeMeetingRepository {
            requested: vec![meeting(
                "m-1",
                "2025-11-12T10:00:00Z",
                "2025-10-01T00:00:00Z",
                "first",
            )],
            ..FakeMeetingRepository::default()
        };
        let (_, sources) = sources(
            FakeAgendaClient::with_responses(vec![FakeAgendaResponse::Success(vec![agenda_item(
                "A1",
                "2025-11-12T08:00:00Z",
            )])]),
            repository,
        );
        let items = sources.load_items(None).await;
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].kind, ItemKind::AgendaEvent);
    }

    #[tokio::test]
    async fn meeting_filters_split_on_now() {
        let repository = FakeMeetingRepository {
            requested: vec![
                meeting("m-1", "2025-11-12T10:00:00Z", "2025-10-01T00:00:00Z", "past"),
                meeting("m-2", "2025-11-13T10:00:00Z", "2025-10-02T00:00:00Z", "upcoming"),
            ],
            ..FakeMeetingRepository::default()
        };
        let (_, sources) = sources(
            FakeAgendaClient::with_responses(vec![FakeAgendaResponse::Success(vec![agenda_item(
                "A1",
                "2025-11-12T08:00:00Z",
            )])]),
            repository,
        );
        let items = sources.load_items(Some("user-1")).await;
        let now = DateTime::parse_from_rfc3339("2025-11-13T00:00:00Z")
            .expect("valid datetime")
            .with_timezone(&Utc);

        let incoming = filter_meetings(&items, MeetingFilter::Incoming, now);
        assert_eq!(incoming.len(), 1);
        assert_eq!(incoming[0].id, "m-2");
        assert_eq!(filter_meetings(&items, MeetingFilter::Passed, now)[0].id, "m-1");
        assert_eq!(
            meeting_counts(&items, now),
            MeetingCounts {
                total: 2,
                upcoming: 1,
                past: 1
            }
        );
    }
}
