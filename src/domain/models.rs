use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    AgendaEvent,
    PersonalMeeting,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AgendaType {
    Keynote,
    Panel,
    Break,
    Meal,
    Registration,
    Other,
}

impl AgendaType {
    pub fn parse(value: Option<&str>) -> Self {
        match value.map(|raw| raw.trim().to_ascii_lowercase()).as_deref() {
            Some("keynote") | None | Some("") => Self::Keynote,
            Some("panel") => Self::Panel,
            Some("break") => Self::Break,
            Some("meal") => Self::Meal,
            Some("registration") => Self::Registration,
            Some(_) => Self::Other,
        }
    }

    pub fn duration_minutes(&self) -> u32 {
        match self {
            Self::Panel => 60,
            _ => 30,
        }
    }
}

/// A unit of occupied time, projected from either the agenda feed or the
/// meetings table. Never persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScheduleItem {
    pub id: String,
    pub kind: ItemKind,
    pub title: String,
    pub description: Option<String>,
    pub location: String,
    pub start_time: DateTime<FixedOffset>,
    pub end_time: DateTime<FixedOffset>,
    pub participants: Vec<String>,
    pub duration_minutes: u32,
}

impl ScheduleItem {
    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.id, "item.id")?;
        if self.end_time <= self.start_time {
            return Err("item.end_time must be after item.start_time".to_string());
        }
        Ok(())
    }

    pub fn is_agenda_event(&self) -> bool {
        self.kind == ItemKind::AgendaEvent
    }

    pub fn status_target(&self) -> StatusTarget {
        match self.kind {
            ItemKind::AgendaEvent => StatusTarget::Agenda(self.id.clone()),
            ItemKind::PersonalMeeting => StatusTarget::Meeting(self.id.clone()),
        }
    }

    /// Half-open overlap against `[slot_start, slot_end)`.
    pub fn overlaps(
        &self,
        slot_start: DateTime<FixedOffset>,
        slot_end: DateTime<FixedOffset>,
    ) -> bool {
        (self.start_time >= slot_start && self.start_time < slot_end)
            || (slot_start >= self.start_time && slot_start < self.end_time)
    }
}

/// One fixed-width cell of a day's working-hours grid. The occupant is
/// borrowed from the item list the grid was generated from.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct TimeSlot<'a> {
    pub id: String,
    pub index: usize,
    pub start_time: DateTime<FixedOffset>,
    pub end_time: DateTime<FixedOffset>,
    pub occupant: Option<&'a ScheduleItem>,
    pub is_past: bool,
    pub is_now: bool,
    pub is_future: bool,
}

impl TimeSlot<'_> {
    pub fn is_free(&self) -> bool {
        self.occupant.is_none()
    }

    pub fn status_target(&self) -> StatusTarget {
        match self.occupant {
            Some(item) => item.status_target(),
            None => StatusTarget::Slot(self.start_time.with_timezone(&Utc)),
        }
    }
}

/// The mutually exclusive key of a status row.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StatusTarget {
    Agenda(String),
    Meeting(String),
    Slot(DateTime<Utc>),
}

impl StatusTarget {
    pub fn is_slot(&self) -> bool {
        matches!(self, Self::Slot(_))
    }

    pub fn default_status(&self) -> TargetStatus {
        match self {
            Self::Agenda(_) | Self::Meeting(_) => TargetStatus::Item(ItemStatus::Tentative),
            Self::Slot(_) => TargetStatus::Slot(SlotStatus::Available),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        match self {
            Self::Agenda(id) => validate_non_empty(id, "target.agenda_id"),
            Self::Meeting(id) => validate_non_empty(id, "target.meeting_id"),
            Self::Slot(_) => Ok(()),
        }
    }
}

impl fmt::Display for StatusTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Agenda(id) => write!(f, "agenda:{id}"),
            Self::Meeting(id) => write!(f, "meeting:{id}"),
            Self::Slot(time) => write!(f, "slot:{}", time.to_rfc3339()),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Tentative,
    Confirmed,
}

impl ItemStatus {
    pub fn toggled(self) -> Self {
        match self {
            Self::Tentative => Self::Confirmed,
            Self::Confirmed => Self::Tentative,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Tentative => "tentative",
            Self::Confirmed => "confirmed",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SlotStatus {
    Available,
    Interested,
    Blocked,
    Tentative,
}

impl SlotStatus {
    /// Toggles between `own` and `Available`.
    pub fn toggled_towards(self, own: SlotStatus) -> Self {
        if self == own { Self::Available } else { own }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Available => "available",
            Self::Interested => "interested",
            Self::Blocked => "blocked",
            Self::Tentative => "tentative",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum TargetStatus {
    Item(ItemStatus),
    Slot(SlotStatus),
}

impl TargetStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Item(status) => status.as_str(),
            Self::Slot(status) => status.as_str(),
        }
    }
}

/// Per-user status of one target. Absence of a record means the target's
/// implicit default.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserStatusRecord {
    pub target: StatusTarget,
    pub status: TargetStatus,
    pub is_favorite: bool,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl UserStatusRecord {
    pub fn new(target: StatusTarget, updated_at: DateTime<Utc>) -> Self {
        let status = target.default_status();
        Self {
            target,
            status,
            is_favorite: false,
            confirmed_at: None,
            updated_at,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        self.target.validate()?;
        match (&self.target, &self.status) {
            (StatusTarget::Slot(_), TargetStatus::Item(_)) => {
                return Err("slot records must carry a slot status".to_string());
            }
            (StatusTarget::Agenda(_) | StatusTarget::Meeting(_), TargetStatus::Slot(_)) => {
                return Err("agenda and meeting records must carry an item status".to_string());
            }
            _ => {}
        }
        if self.is_favorite && !matches!(self.target, StatusTarget::Agenda(_)) {
            return Err("only agenda records may be favorites".to_string());
        }
        if self.confirmed_at.is_some() && self.status != TargetStatus::Item(ItemStatus::Confirmed) {
            return Err("confirmed_at is only set on confirmed records".to_string());
        }
        Ok(())
    }

    /// True when the record carries nothing beyond its target's default and
    /// therefore must not be stored.
    pub fn is_implicit_default(&self) -> bool {
        self.status == self.target.default_status() && !self.is_favorite
    }
}

/// Total mapping from an optional record to the status shown for `target`.
pub fn resolve_status(target: &StatusTarget, record: Option<&UserStatusRecord>) -> TargetStatus {
    record
        .filter(|record| &record.target == target)
        .map(|record| record.status)
        .unwrap_or_else(|| target.default_status())
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Session {
    pub user_id: String,
    pub email: Option<String>,
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    pub fn is_valid_at(&self, now: DateTime<Utc>, leeway_seconds: i64) -> bool {
        self.expires_at > now + chrono::Duration::seconds(leeway_seconds)
            && !self.access_token.trim().is_empty()
            && !self.user_id.trim().is_empty()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MeetingFilter {
    All,
    Incoming,
    Passed,
}

impl MeetingFilter {
    pub fn parse(value: &str) -> Result<Self, String> {
        match value.trim().to_ascii_lowercase().as_str() {
            "" | "all" => Ok(Self::All),
            "incoming" | "upcoming" => Ok(Self::Incoming),
            "passed" | "past" => Ok(Self::Passed),
            other => Err(format!("unsupported meeting filter: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct MeetingCounts {
    pub total: usize,
    pub upcoming: usize,
    pub past: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DayStats {
    pub date: NaiveDate,
    pub confirmed: usize,
    pub tentative: usize,
    pub interested: usize,
    pub blocked: usize,
    pub favorites: usize,
    pub total: usize,
}

fn validate_non_empty(value: &str, field_name: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        return Err(format!("{field_name} must not be empty"));
    }
    Ok(())
}
