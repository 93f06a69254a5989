use crate::domain::event_time::{add_minutes, EventClock};
use crate::domain::models::{AgendaType, ItemKind, ScheduleItem};
use crate::infrastructure::error::ScheduleError;
use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use tracing::warn;

pub const DEFAULT_LOCATION: &str = "TBD";
pub const DEFAULT_MEETING_MINUTES: u32 = 15;
const DEFAULT_COUNTERPART: &str = "User";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct AgendaFeedItem {
    #[serde(deserialize_with = "deserialize_loose_id")]
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub time: Option<String>,
    #[serde(default, rename = "type")]
    pub item_type: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub speakers: Option<Vec<String>>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct MeetingRow {
    #[serde(deserialize_with = "deserialize_loose_id")]
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub scheduled_at: Option<String>,
    #[serde(default)]
    pub end_time: Option<String>,
    #[serde(default)]
    pub duration_minutes: Option<u32>,
    #[serde(default)]
    pub speaker_name: Option<String>,
    #[serde(default)]
    pub requester_name: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub meeting_location: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub requester_id: Option<String>,
    #[serde(default)]
    pub speaker_id: Option<String>,
}

fn deserialize_loose_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(id) => Ok(id),
        serde_json::Value::Number(id) => Ok(id.to_string()),
        other => Err(serde::de::Error::custom(format!("unsupported id value: {other}"))),
    }
}

pub fn map_agenda_item(
    clock: &EventClock,
    item: &AgendaFeedItem,
) -> Result<ScheduleItem, ScheduleError> {
    let id = required_text(Some(&item.id), "agenda.id")?;
    let raw_time = required_text(item.time.as_ref(), "agenda.time")?;
    let start_time = clock.normalize(&raw_time)?;
    let duration_minutes = AgendaType::parse(item.item_type.as_deref()).duration_minutes();

    Ok(ScheduleItem {
        id,
        kind: ItemKind::AgendaEvent,
        title: optional_text(item.title.as_ref()).unwrap_or_default(),
        description: optional_text(item.description.as_ref()),
        location: optional_text(item.location.as_ref())
            .unwrap_or_else(|| DEFAULT_LOCATION.to_string()),
        start_time,
        end_time: add_minutes(start_time, duration_minutes as i64),
        participants: item
            .speakers
            .iter()
            .flatten()
            .filter_map(|speaker| optional_text(Some(speaker)))
            .collect(),
        duration_minutes,
    })
}

pub fn map_meeting_row(
    clock: &EventClock,
    row: &MeetingRow,
) -> Result<ScheduleItem, ScheduleError> {
    let id = required_text(Some(&row.id), "meeting.id")?;
    let raw_start = required_text(row.scheduled_at.as_ref(), "meeting.scheduled_at")?;
    let start_time = clock.normalize(&raw_start)?;
    let duration_minutes = row
        .duration_minutes
        .filter(|minutes| *minutes > 0)
        .unwrap_or(DEFAULT_MEETING_MINUTES);
    let end_time = meeting_end_time(clock, row, start_time, duration_minutes);

    let speaker_name = optional_text(row.speaker_name.as_ref());
    let counterpart = speaker_name
        .clone()
        .or_else(|| optional_text(row.requester_name.as_ref()))
        .unwrap_or_else(|| DEFAULT_COUNTERPART.to_string());

    Ok(ScheduleItem {
        id,
        kind: ItemKind::PersonalMeeting,
        title: optional_text(row.title.as_ref())
            .unwrap_or_else(|| format!("Meeting with {counterpart}")),
        description: optional_text(row.notes.as_ref())
            .or_else(|| optional_text(row.message.as_ref())),
        location: optional_text(row.location.as_ref())
            .or_else(|| optional_text(row.meeting_location.as_ref()))
            .unwrap_or_else(|| DEFAULT_LOCATION.to_string()),
        start_time,
        end_time,
        participants: speaker_name.into_iter().collect(),
        duration_minutes,
    })
}

/// Stored end times that fail to parse or do not follow the start fall back
/// to `start + duration`.
fn meeting_end_time(
    clock: &EventClock,
    row: &MeetingRow,
    start_time: DateTime<FixedOffset>,
    duration_minutes: u32,
) -> DateTime<FixedOffset> {
    let derived = add_minutes(start_time, duration_minutes as i64);
    let Some(raw_end) = optional_text(row.end_time.as_ref()) else {
        return derived;
    };
    match clock.normalize(&raw_end) {
        Ok(end_time) if end_time > start_time => end_time,
        Ok(_) => {
            warn!(
                meeting_id = %row.id,
                end_time = %raw_end,
                "meeting ends before it starts; using duration"
            );
            derived
        }
        Err(error) => {
            warn!(meeting_id = %row.id, %error, "unparseable meeting end time; using duration");
            derived
        }
    }
}

/// Agenda items first, then meetings, in source order. Rows that cannot be
/// placed on the grid are dropped with a warning.
pub fn merge_schedule_items(
    clock: &EventClock,
    agenda: &[AgendaFeedItem],
    meetings: &[MeetingRow],
) -> Vec<ScheduleItem> {
    let agenda_items = agenda.iter().filter_map(|item| match map_agenda_item(clock, item) {
        Ok(mapped) => Some(mapped),
        Err(error) => {
            warn!(agenda_id = %item.id, %error, "dropping agenda item");
            None
        }
    });
    let meeting_items = meetings.iter().filter_map(|row| match map_meeting_row(clock, row) {
        Ok(mapped) => Some(mapped),
        Err(error) => {
            warn!(meeting_id = %row.id, %error, "dropping meeting");
            None
        }
    });
    agenda_items.chain(meeting_items).collect()
}

fn required_text(value: Option<&String>, field_name: &str) -> Result<String, ScheduleError> {
    optional_text(value)
        .ok_or_else(|| ScheduleError::InvalidRecord(format!("{field_name} is missing")))
}

fn optional_text(value: Option<&String>) -> Option<String> {
    value
        .map(|raw| raw.trim())
        .filter(|raw| !raw.is_empty())
        .map(ToOwned::to_owned)
}
