use crate::domain::models::{ItemStatus, SlotStatus, StatusTarget, TargetStatus, UserStatusRecord};
use crate::infrastructure::error::ScheduleError;
use chrono::{DateTime, SecondsFormat, Utc};
use tracing::warn;

const LEGACY_UNCONFIRMED: &str = "unconfirmed";

/// Wire shape of one `user_agenda_status` row. Exactly one of `agenda_id`,
/// `meeting_id` and `slot_time` is set on rows this crate writes.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq, Default)]
pub struct StatusRow {
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_row_id"
    )]
    pub id: Option<String>,
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    #[serde(default)]
    pub agenda_id: Option<String>,
    #[serde(default)]
    pub meeting_id: Option<String>,
    #[serde(default)]
    pub slot_time: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub slot_status: Option<String>,
    #[serde(default)]
    pub is_favorite: bool,
    #[serde(default)]
    pub confirmed_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

pub fn encode_status_row(
    user_id: &str,
    event_id: Option<&str>,
    record: &UserStatusRecord,
) -> Result<StatusRow, ScheduleError> {
    record.validate().map_err(ScheduleError::InvalidRecord)?;

    let mut row = StatusRow {
        id: None,
        user_id: user_id.to_string(),
        event_id: event_id
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(ToOwned::to_owned),
        is_favorite: record.is_favorite,
        confirmed_at: record.confirmed_at.map(format_instant),
        updated_at: Some(format_instant(record.updated_at)),
        ..StatusRow::default()
    };

    match &record.target {
        StatusTarget::Agenda(id) => row.agenda_id = Some(id.clone()),
        StatusTarget::Meeting(id) => row.meeting_id = Some(id.clone()),
        StatusTarget::Slot(time) => row.slot_time = Some(format_instant(*time)),
    }

    match record.status {
        TargetStatus::Item(status) => row.status = Some(status.as_str().to_string()),
        TargetStatus::Slot(status) => {
            row.status = Some(status.as_str().to_string());
            row.slot_status = Some(status.as_str().to_string());
        }
    }

    Ok(row)
}

pub fn decode_status_row(row: &StatusRow) -> Result<UserStatusRecord, ScheduleError> {
    let target = decode_target(row)?;

    let status = match &target {
        StatusTarget::Agenda(_) | StatusTarget::Meeting(_) => {
            TargetStatus::Item(parse_item_status(row.status.as_deref())?)
        }
        StatusTarget::Slot(_) => {
            let raw = non_empty(row.slot_status.as_deref()).or(non_empty(row.status.as_deref()));
            TargetStatus::Slot(parse_slot_status(raw)?)
        }
    };

    let confirmed_at = match status {
        TargetStatus::Item(ItemStatus::Confirmed) => non_empty(row.confirmed_at.as_deref())
            .map(|value| parse_instant(value, "confirmed_at"))
            .transpose()?,
        _ => None,
    };
    let updated_at = non_empty(row.updated_at.as_deref())
        .map(|value| parse_instant(value, "updated_at"))
        .transpose()?
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);

    Ok(UserStatusRecord {
        is_favorite: row.is_favorite && matches!(target, StatusTarget::Agenda(_)),
        target,
        status,
        confirmed_at,
        updated_at,
    })
}

/// Decodes every row, skipping the ones that fail with a warning.
pub fn decode_status_rows(rows: &[StatusRow]) -> Vec<UserStatusRecord> {
    rows.iter()
        .filter_map(|row| match decode_status_row(row) {
            Ok(record) => Some(record),
            Err(error) => {
                warn!(
                    row_id = row.id.as_deref().unwrap_or("-"),
                    %error,
                    "skipping undecodable status row"
                );
                None
            }
        })
        .collect()
}

/// Row ids arrive as strings from some backends and as integers from others.
pub fn deserialize_row_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = <Option<serde_json::Value> as serde::Deserialize>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(id)) => Some(id),
        Some(serde_json::Value::Number(id)) => Some(id.to_string()),
        _ => None,
    })
}

pub fn format_instant(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn decode_target(row: &StatusRow) -> Result<StatusTarget, ScheduleError> {
    let agenda_id = non_empty(row.agenda_id.as_deref());
    let meeting_id = non_empty(row.meeting_id.as_deref());
    let slot_time = non_empty(row.slot_time.as_deref());

    let key_count = [agenda_id.is_some(), meeting_id.is_some(), slot_time.is_some()]
        .into_iter()
        .filter(|present| *present)
        .count();
    if key_count > 1 {
        warn!(
            row_id = row.id.as_deref().unwrap_or("-"),
            agenda_id = agenda_id.unwrap_or("-"),
            meeting_id = meeting_id.unwrap_or("-"),
            slot_time = slot_time.unwrap_or("-"),
            "status row carries more than one target key; using agenda > meeting > slot precedence"
        );
    }

    if let Some(id) = agenda_id {
        return Ok(StatusTarget::Agenda(id.to_string()));
    }
    if let Some(id) = meeting_id {
        return Ok(StatusTarget::Meeting(id.to_string()));
    }
    if let Some(time) = slot_time {
        return Ok(StatusTarget::Slot(parse_instant(time, "slot_time")?));
    }
    Err(ScheduleError::InvalidRecord(
        "status row has none of agenda_id, meeting_id, slot_time".to_string(),
    ))
}

fn parse_item_status(value: Option<&str>) -> Result<ItemStatus, ScheduleError> {
    match value.map(|raw| raw.trim().to_ascii_lowercase()).as_deref() {
        None | Some("") | Some("tentative") | Some(LEGACY_UNCONFIRMED) => Ok(ItemStatus::Tentative),
        Some("confirmed") => Ok(ItemStatus::Confirmed),
        Some(other) => Err(ScheduleError::InvalidRecord(format!(
            "invalid item status value: {other}"
        ))),
    }
}

fn parse_slot_status(value: Option<&str>) -> Result<SlotStatus, ScheduleError> {
    match value.map(|raw| raw.trim().to_ascii_lowercase()).as_deref() {
        None | Some("") | Some("available") => Ok(SlotStatus::Available),
        Some("interested") => Ok(SlotStatus::Interested),
        Some("blocked") => Ok(SlotStatus::Blocked),
        Some("tentative") | Some(LEGACY_UNCONFIRMED) => Ok(SlotStatus::Tentative),
        Some(other) => Err(ScheduleError::InvalidRecord(format!(
            "invalid slot status value: {other}"
        ))),
    }
}

fn parse_instant(value: &str, field_name: &str) -> Result<DateTime<Utc>, ScheduleError> {
    DateTime::parse_from_rfc3339(value.trim())
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|error| {
            ScheduleError::InvalidRecord(format!("invalid {field_name} '{value}': {error}"))
        })
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}
