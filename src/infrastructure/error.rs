use crate::domain::event_time::TimestampError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Timestamp error: {0}")]
    Timestamp(#[from] TimestampError),
    #[error("Invalid config: {0}")]
    InvalidConfig(String),
    #[error("Remote error: {0}")]
    Remote(String),
    #[error("Credential error: {0}")]
    Credential(String),
    #[error("Invalid record: {0}")]
    InvalidRecord(String),
    #[error("Invalid target: {0}")]
    InvalidTarget(String),
    #[error("Invalid state: {0}")]
    InvalidState(String),
    #[error("no signed-in session")]
    NoSession,
    #[error("a change for {0} is still in flight")]
    MutationInFlight(String),
}

impl ScheduleError {
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Remote(message) => {
                let message = message.to_ascii_lowercase();
                message.contains("network error")
                    || message.contains("timeout")
                    || message.contains("timed out")
                    || message.contains("temporarily unavailable")
                    || message.contains("connection reset")
            }
            _ => false,
        }
    }
}
