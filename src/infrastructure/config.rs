use crate::domain::event_time::{DEFAULT_EVENT_OFFSET, EventClock};
use crate::domain::schedule_grid::{event_days, GridPolicy};
use crate::infrastructure::error::ScheduleError;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

const EVENT_JSON: &str = "event.json";
const BACKEND_JSON: &str = "backend.json";
const SUPPORTED_SCHEMA: u64 = 1;

const BACKEND_URL_KEYS: [&str; 2] = ["MYSCHEDULE_BACKEND_URL", "SUPABASE_URL"];
const AGENDA_URL_KEYS: [&str; 1] = ["MYSCHEDULE_AGENDA_URL"];
const API_KEY_KEYS: [&str; 2] = ["MYSCHEDULE_API_KEY", "SUPABASE_ANON_KEY"];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WorkingHours {
    pub start: u32,
    pub end: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EventConfig {
    pub event_id: String,
    pub utc_offset: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub working_hours: WorkingHours,
    pub slot_minutes: u32,
}

impl Default for EventConfig {
    fn default() -> Self {
        Self {
            event_id: "bsl2025".to_string(),
            utc_offset: DEFAULT_EVENT_OFFSET.to_string(),
            start_date: NaiveDate::from_ymd_opt(2025, 11, 12).unwrap_or_default(),
            end_date: NaiveDate::from_ymd_opt(2025, 11, 14).unwrap_or_default(),
            working_hours: WorkingHours { start: 8, end: 19 },
            slot_minutes: 15,
        }
    }
}

impl EventConfig {
    pub fn validate(&self) -> Result<(), ScheduleError> {
        if self.event_id.trim().is_empty() {
            return Err(ScheduleError::InvalidConfig("eventId must not be empty".to_string()));
        }
        if self.end_date < self.start_date {
            return Err(ScheduleError::InvalidConfig(
                "endDate must not be before startDate".to_string(),
            ));
        }
        self.grid_policy()
            .validate()
            .map_err(ScheduleError::InvalidConfig)?;
        self.clock()?;
        Ok(())
    }

    pub fn clock(&self) -> Result<EventClock, ScheduleError> {
        EventClock::new(&self.utc_offset)
            .map_err(|error| ScheduleError::InvalidConfig(error.to_string()))
    }

    pub fn grid_policy(&self) -> GridPolicy {
        GridPolicy {
            start_hour: self.working_hours.start,
            end_hour: self.working_hours.end,
            slot_minutes: self.slot_minutes,
        }
    }

    pub fn event_days(&self) -> Vec<NaiveDate> {
        event_days(self.start_date, self.end_date)
    }

    pub fn contains_day(&self, day: NaiveDate) -> bool {
        day >= self.start_date && day <= self.end_date
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct BackendConfig {
    #[serde(default)]
    pub rest_url: Option<String>,
    #[serde(default)]
    pub agenda_url: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
}

impl BackendConfig {
    /// Environment values win over the file when set and non-empty.
    pub fn with_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = optional_lookup_value(&lookup, &BACKEND_URL_KEYS) {
            self.rest_url = Some(value);
        }
        if let Some(value) = optional_lookup_value(&lookup, &AGENDA_URL_KEYS) {
            self.agenda_url = Some(value);
        }
        if let Some(value) = optional_lookup_value(&lookup, &API_KEY_KEYS) {
            self.api_key = Some(value);
        }
        self.normalized()
    }

    pub fn rest_url(&self) -> Option<&str> {
        self.rest_url.as_deref()
    }

    pub fn agenda_url(&self) -> Option<&str> {
        self.agenda_url.as_deref()
    }

    fn normalized(self) -> Self {
        let clean = |value: Option<String>| {
            value
                .map(|raw| raw.trim().to_string())
                .filter(|raw| !raw.is_empty())
        };
        Self {
            rest_url: clean(self.rest_url),
            agenda_url: clean(self.agenda_url),
            api_key: clean(self.api_key),
        }
    }
}

fn default_files() -> HashMap<&'static str, serde_json::Value> {
    HashMap::from([
        (
            EVENT_JSON,
            serde_json::json!({
                "schema": 1,
                "eventId": "bsl2025",
                "utcOffset": DEFAULT_EVENT_OFFSET,
                "startDate": "2025-11-12",
                "endDate": "2025-11-14",
                "workingHours": { "start": 8, "end": 19 },
                "slotMinutes": 15
            }),
        ),
        (
            BACKEND_JSON,
            serde_json::json!({
                "schema": 1,
                "restUrl": null,
                "agendaUrl": null,
                "apiKey": null
            }),
        ),
    ])
}

pub fn ensure_default_configs(config_dir: &Path) -> Result<(), ScheduleError> {
    for (name, value) in default_files() {
        let path = config_dir.join(name);
        if !path.exists() {
            let formatted = serde_json::to_string_pretty(&value)?;
            fs::write(path, format!("{formatted}\n"))?;
        }
    }
    Ok(())
}

fn read_config(path: &Path) -> Result<serde_json::Value, ScheduleError> {
    let raw = fs::read_to_string(path)?;
    let parsed: serde_json::Value = serde_json::from_str(&raw)?;
    let schema = parsed
        .get("schema")
        .and_then(serde_json::Value::as_u64)
        .ok_or_else(|| {
            ScheduleError::InvalidConfig(format!("missing schema in {}", path.display()))
        })?;
    if schema != SUPPORTED_SCHEMA {
        return Err(ScheduleError::InvalidConfig(format!(
            "unsupported schema {} in {}",
            schema,
            path.display()
        )));
    }
    Ok(parsed)
}

pub fn load_event_config(config_dir: &Path) -> Result<EventConfig, ScheduleError> {
    let path = config_dir.join(EVENT_JSON);
    let config: EventConfig = serde_json::from_value(read_config(&path)?).map_err(|error| {
        ScheduleError::InvalidConfig(format!("invalid {}: {error}", path.display()))
    })?;
    config.validate()?;
    Ok(config)
}

pub fn load_backend_config(config_dir: &Path) -> Result<BackendConfig, ScheduleError> {
    load_backend_config_with_lookup(config_dir, |key| std::env::var(key).ok())
}

pub fn load_backend_config_with_lookup<F>(
    config_dir: &Path,
    lookup: F,
) -> Result<BackendConfig, ScheduleError>
where
    F: Fn(&str) -> Option<String>,
{
    let path = config_dir.join(BACKEND_JSON);
    let config: BackendConfig = serde_json::from_value(read_config(&path)?).map_err(|error| {
        ScheduleError::InvalidConfig(format!("invalid {}: {error}", path.display()))
    })?;
    Ok(config.with_overrides(lookup))
}

fn optional_lookup_value<F>(lookup: &F, keys: &[&str]) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    for key in keys {
        if let Some(value) = lookup(key) {
            let normalized = value.trim();
            if !normalized.is_empty() {
                return Some(normalized.to_string());
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicU64, Ordering};

    static NEXT_DIR: AtomicU64 = AtomicU64::new(0);

    struct TempConfigDir {
        path: PathBuf,
    }

    impl TempConfigDir {
        fn new() -> Self {
            let path = std::env::temp_dir().join(format!(
                "myschedule-config-{}-{}",
                std::process::id(),
                NEXT_DIR.fetch_add(1, Ordering::SeqCst)
            ));
            fs::create_dir_all(&path).expect("create config dir");
            Self { path }
        }
    }

    impl Drop for TempConfigDir {
        fn drop(&mut self) {
            let _ = fs::remove_dir_all(&self.path);
        }
    }

    #[test]
    fn defaults_are_written_once_and_load() {
        let dir = TempConfigDir::new();
        ensure_default_configs(&dir.path).expect("write defaults");

        let event = load_event_config(&dir.path).expect("event config");
        assert_eq!(event, EventConfig::default());
        assert_eq!(event.event_days().len(), 3);
        assert_eq!(event.grid_policy(), GridPolicy::default());

        let backend = load_backend_config_with_lookup(&dir.path, |_| None).expect("backend config");
        assert_eq!(backend, BackendConfig::default());

        fs::write(dir.path.join(BACKEND_JSON), "{\"schema\":1,\"restUrl\":\"https://kept\"}\n")
            .expect("overwrite");
        ensure_default_configs(&dir.path).expect("second pass");
        let backend = load_backend_config_with_lookup(&dir.path, |_| None).expect("backend config");
        assert_eq!(backend.rest_url(), Some("https://kept"));
    }

    #[test]
    fn schema_header_is_required() {
        let dir = TempConfigDir::new();
        fs::write(dir.path.join(EVENT_JSON), "{\"eventId\":\"x\"}").expect("write");
        assert!(matches!(load_event_config(&dir.path), Err(ScheduleError::InvalidConfig(_))));

        fs::write(dir.path.join(EVENT_JSON), "{\"schema\":2}").expect("write");
        assert!(matches!(load_event_config(&dir.path), Err(ScheduleError::InvalidConfig(_))));
    }

    #[test]
    fn event_validation_rejects_bad_values() {
        let mut config = EventConfig::default();
        config.working_hours = WorkingHours { start: 19, end: 8 };
        assert!(config.validate().is_err());

        let mut config = EventConfig::default();
        config.slot_minutes = 0;
        assert!(config.validate().is_err());

        let mut config = EventConfig::default();
        config.utc_offset = "EST".to_string();
        assert!(config.validate().is_err());

        let mut config = EventConfig::default();
        config.end_date = NaiveDate::from_ymd_opt(2025, 11, 1).expect("date");
        assert!(config.validate().is_err());
    }

    #[test]
    fn environment_overrides_win_in_key_order() {
        let env = HashMap::from([
            ("SUPABASE_URL", "https://fallback.example.co"),
            ("MYSCHEDULE_API_KEY", "  "),
            ("SUPABASE_ANON_KEY", "anon-key"),
            ("MYSCHEDULE_AGENDA_URL", "https://api.example.com/agenda"),
        ]);
        let config = BackendConfig {
            rest_url: Some("https://file.example.co".to_string()),
            agenda_url: None,
            api_key: Some("file-key".to_string()),
        }
        .with_overrides(|key| env.get(key).map(|value| value.to_string()));

        assert_eq!(config.rest_url(), Some("https://fallback.example.co"));
        assert_eq!(config.agenda_url(), Some("https://api.example.com/agenda"));
        assert_eq!(config.api_key.as_deref(), Some("anon-key"));
    }
}
