use crate::infrastructure::error::ScheduleError;
use crate::infrastructure::source_mapper::AgendaFeedItem;
use async_trait::async_trait;
use reqwest::Client;
use tracing::warn;
use url::Url;

#[async_trait]
pub trait AgendaFeedClient: Send + Sync {
    async fn fetch_agenda(&self, event_id: &str) -> Result<Vec<AgendaFeedItem>, ScheduleError>;
}

#[derive(Debug, Clone)]
pub struct ReqwestAgendaFeedClient {
    client: Client,
    endpoint: Url,
    api_key: Option<String>,
}

impl ReqwestAgendaFeedClient {
    pub fn new(agenda_url: &str, api_key: Option<String>) -> Result<Self, ScheduleError> {
        let endpoint = Url::parse(agenda_url.trim()).map_err(|error| {
            ScheduleError::InvalidConfig(format!("invalid agendaUrl '{agenda_url}': {error}"))
        })?;
        Ok(Self {
            client: Client::new(),
            endpoint,
            api_key: api_key
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty()),
        })
    }
}

#[async_trait]
impl AgendaFeedClient for ReqwestAgendaFeedClient {
    async fn fetch_agenda(&self, event_id: &str) -> Result<Vec<AgendaFeedItem>, ScheduleError> {
        let mut request = self
            .client
            .get(self.endpoint.clone())
            .query(&[("eventId", event_id)]);
        if let Some(api_key) = self.api_key.as_deref() {
            request = request.header("apikey", api_key).bearer_auth(api_key);
        }

        let response = request
            .send()
            .await
            .map_err(|error| {
                ScheduleError::Remote(format!("network error while fetching agenda: {error}"))
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|error| {
                ScheduleError::Remote(format!("failed reading agenda response: {error}"))
            })?;

        if !status.is_success() {
            let code = status.as_u16();
            let suffix = if status.is_server_error() { " (temporarily unavailable)" } else { "" };
            return Err(ScheduleError::Remote(format!("agenda feed error: http {code}{suffix}")));
        }

        parse_agenda_payload(&body)
    }
}

/// Accepts a bare array or a `{ "data": [...] }` envelope; any other JSON
/// shape is an empty agenda. Entries that do not decode are skipped.
pub fn parse_agenda_payload(body: &str) -> Result<Vec<AgendaFeedItem>, ScheduleError> {
    let parsed: serde_json::Value = serde_json::from_str(body)
        .map_err(|error| ScheduleError::Remote(format!("invalid agenda payload: {error}")))?;

    let entries = match parsed {
        serde_json::Value::Array(entries) => entries,
        serde_json::Value::Object(mut envelope) => match envelope.remove("data") {
            Some(serde_json::Value::Array(entries)) => entries,
            _ => Vec::new(),
        },
        _ => Vec::new(),
    };

    Ok(entries
        .into_iter()
        .filter_map(|entry| match serde_json::from_value::<AgendaFeedItem>(entry) {
            Ok(item) => Some(item),
            Err(error) => {
                warn!(%error, "skipping undecodable agenda entry");
                None
            }
        })
        .collect())
}
