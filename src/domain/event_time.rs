use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveTime, Offset, TimeZone, Utc};
use thiserror::Error;

pub const DEFAULT_EVENT_OFFSET: &str = "-05:00";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TimestampError {
    #[error("unparseable timestamp '{0}'")]
    Unparseable(String),
    #[error("invalid utc offset '{0}': expected +HH:MM or -HH:MM")]
    InvalidOffset(String),
    #[error("local time {0} does not exist at the event offset")]
    NonexistentLocalTime(String),
}

/// Wall clock of the event venue: a single fixed UTC offset that every
/// backend timestamp is reinterpreted against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventClock {
    offset_literal: String,
    offset: FixedOffset,
}

impl EventClock {
    pub fn new(offset_literal: &str) -> Result<Self, TimestampError> {
        let literal = offset_literal.trim();
        let offset = parse_offset_literal(literal)
            .ok_or_else(|| TimestampError::InvalidOffset(literal.to_string()))?;
        Ok(Self {
            offset_literal: literal.to_string(),
            offset,
        })
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    pub fn offset_literal(&self) -> &str {
        &self.offset_literal
    }

    /// Zulu timestamps are read as event-local wall time, explicit numeric
    /// offsets are kept, and naive timestamps get the event offset appended.
    pub fn normalize(&self, raw: &str) -> Result<DateTime<FixedOffset>, TimestampError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(TimestampError::Unparseable(raw.to_string()));
        }

        let normalized = if let Some(stripped) = trimmed
            .strip_suffix('Z')
            .or_else(|| trimmed.strip_suffix('z'))
        {
            format!("{stripped}{}", self.offset_literal)
        } else if has_numeric_offset(trimmed) {
            trimmed.to_string()
        } else {
            format!("{trimmed}{}", self.offset_literal)
        };

        parse_iso8601(&normalized).ok_or_else(|| TimestampError::Unparseable(raw.to_string()))
    }

    pub fn at(
        &self,
        day: NaiveDate,
        time: NaiveTime,
    ) -> Result<DateTime<FixedOffset>, TimestampError> {
        let local = day.and_time(time);
        self.offset
            .from_local_datetime(&local)
            .single()
            .ok_or_else(|| TimestampError::NonexistentLocalTime(local.to_string()))
    }

    pub fn local_date<Tz: TimeZone>(&self, instant: &DateTime<Tz>) -> NaiveDate {
        instant.with_timezone(&self.offset).date_naive()
    }
}

impl Default for EventClock {
    /// The event offset, or UTC should the default literal ever fail to parse.
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_OFFSET).unwrap_or_else(|_| Self {
            offset_literal: "+00:00".to_string(),
            offset: Utc.fix(),
        })
    }
}

pub fn add_minutes(instant: DateTime<FixedOffset>, minutes: i64) -> DateTime<FixedOffset> {
    instant + Duration::minutes(minutes)
}

fn parse_offset_literal(literal: &str) -> Option<FixedOffset> {
    let sign = match literal.as_bytes().first()? {
        b'+' => 1,
        b'-' => -1,
        _ => return None,
    };
    let digits: String = literal[1..].chars().filter(|ch| *ch != ':').collect();
    if digits.len() != 4 || !digits.chars().all(|ch| ch.is_ascii_digit()) {
        return None;
    }
    let hours = digits[..2].parse::<i32>().ok()?;
    let minutes = digits[2..].parse::<i32>().ok()?;
    if hours > 23 || minutes > 59 {
        return None;
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}

/// Matches a trailing `+HH:MM`, `-HH:MM`, `+HHMM` or `-HHMM`.
fn has_numeric_offset(value: &str) -> bool {
    let bytes = value.as_bytes();
    let tail_matches = |len: usize, with_colon: bool| -> bool {
        if bytes.len() < len {
            return false;
        }
        let tail = &bytes[bytes.len() - len..];
        if tail[0] != b'+' && tail[0] != b'-' {
            return false;
        }
        if with_colon {
            tail[1].is_ascii_digit()
                && tail[2].is_ascii_digit()
                && tail[3] == b':'
                && tail[4].is_ascii_digit()
                && tail[5].is_ascii_digit()
        } else {
            tail[1..].iter().all(u8::is_ascii_digit)
        }
    };
    tail_matches(6, true) || tail_matches(5, false)
}

fn parse_iso8601(value: &str) -> Option<DateTime<FixedOffset>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Some(parsed);
    }
    const FORMATS: [&str; 4] = [
        "%Y-%m-%dT%H:%M:%S%.f%z",
        "%Y-%m-%d %H:%M:%S%.f%z",
        "%Y-%m-%dT%H:%M%z",
        "%Y-%m-%d %H:%M%z",
    ];
    FORMATS
        .iter()
        .find_map(|format| DateTime::parse_from_str(value, format).ok())
}
