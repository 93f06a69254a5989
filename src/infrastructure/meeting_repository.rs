use crate::infrastructure::error::ScheduleError;
use crate::infrastructure::source_mapper::MeetingRow;
use crate::infrastructure::status_row_store::rest_http_error;
use async_trait::async_trait;
use reqwest::Client;
use url::Url;

#[async_trait]
pub trait MeetingRepository: Send + Sync {
    /// Meetings the user requested, newest first.
    async fn list_as_requester(&self, user_id: &str) -> Result<Vec<MeetingRow>, ScheduleError>;

    /// Speaker profile ids owned by the user.
    async fn speaker_profile_ids(&self, user_id: &str) -> Result<Vec<String>, ScheduleError>;

    /// Meetings booked with any of the given speaker profiles, newest first.
    async fn list_as_speaker(
        &self,
        speaker_ids: &[String],
    ) -> Result<Vec<MeetingRow>, ScheduleError>;
}

#[derive(Debug, Clone)]
pub struct RestMeetingRepository {
    client: Client,
    base_url: Url,
    api_key: Option<String>,
    access_token: String,
}

#[derive(Debug, serde::Deserialize)]
struct SpeakerIdRow {
    #[serde(
        default,
        deserialize_with = "crate::infrastructure::status_row_mapper::deserialize_row_id"
    )]
    id: Option<String>,
}

impl RestMeetingRepository {
    pub fn new(
        rest_url: &str,
        api_key: Option<String>,
        access_token: impl Into<String>,
    ) -> Result<Self, ScheduleError> {
        let base_url = Url::parse(rest_url.trim())
            .map_err(|error| {
                ScheduleError::InvalidConfig(format!("invalid restUrl '{rest_url}': {error}"))
            })?;
        if base_url.cannot_be_a_base() {
            return Err(ScheduleError::InvalidConfig("restUrl cannot be a base".to_string()));
        }
        Ok(Self {
            client: Client::new(),
            base_url,
            api_key: api_key
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty()),
            access_token: access_token.into(),
        })
    }

    pub fn table_endpoint(&self, table: &str) -> Result<Url, ScheduleError> {
        let mut url = self.base_url.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| ScheduleError::InvalidConfig("restUrl cannot be a base".to_string()))?;
            segments.pop_if_empty();
            segments.extend(["rest", "v1", table]);
        }
        Ok(url)
    }

    async fn select<T: serde::de::DeserializeOwned>(
        &self,
        table: &str,
        query: &[(&str, String)],
        action: &str,
    ) -> Result<Vec<T>, ScheduleError> {
        let mut request = self
            .client
            .get(self.table_endpoint(table)?)
            .bearer_auth(&self.access_token)
            .query(query);
        if let Some(api_key) = self.api_key.as_deref() {
            request = request.header("apikey", api_key);
        }

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
        serde_json::from_str(&body)
            .map_err(|error| {
                ScheduleError::Remote(format!(
                    "invalid payload while {action}: {error}; body={body}"
                ))
            })
    }
}

/// PostgREST `in.(...)` list with each value double-quoted.
pub fn in_filter(values: &[String]) -> String {
    let quoted = values
        .iter()
        .map(|value| format!("\"{}\"", value.replace('"', "\\\"")))
        .collect::<Vec<_>>()
        .join(",");
    format!("in.({quoted})")
}

#[async_trait]
impl MeetingRepository for RestMeetingRepository {
    async fn list_as_requester(&self, user_id: &str) -> Result<Vec<MeetingRow>, ScheduleError> {
        self.select(
            "meetings",
            &[
                ("select", "*".to_string()),
                ("requester_id", format!("eq.{user_id}")),
                ("order", "created_at.desc".to_string()),
            ],
            "listing requested meetings",
        )
        .await
    }

    async fn speaker_profile_ids(&self, user_id: &str) -> Result<Vec<String>, ScheduleError> {
        let rows: Vec<SpeakerIdRow> = self
            .select(
                "bsl_speakers",
                &[("select", "id".to_string()), ("user_id", format!("eq.{user_id}"))],
                "listing speaker profiles",
            )
            .await?;
        Ok(rows.into_iter().filter_map(|row| row.id).collect())
    }

    async fn list_as_speaker(
        &self,
        speaker_ids: &[String],
    ) -> Result<Vec<MeetingRow>, ScheduleError> {
        if speaker_ids.is_empty() {
            return Ok(Vec::new());
        }
        self.select(
            "meetings",
            &[
                ("select", "*".to_string()),
                ("speaker_id", in_filter(speaker_ids)),
                ("order", "created_at.desc".to_string()),
            ],
            "listing speaker meetings",
        )
        .await
    }
}
