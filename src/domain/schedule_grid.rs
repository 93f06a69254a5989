use crate::domain::event_time::{add_minutes, EventClock, TimestampError};
use crate::domain::models::{ScheduleItem, TimeSlot};
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GridPolicy {
    pub start_hour: u32,
    pub end_hour: u32,
    pub slot_minutes: u32,
}

impl Default for GridPolicy {
    fn default() -> Self {
        Self {
            start_hour: 8,
            end_hour: 19,
            slot_minutes: 15,
        }
    }
}

impl GridPolicy {
    pub fn validate(&self) -> Result<(), String> {
        if self.end_hour > 24 {
            return Err("grid.end_hour must be <= 24".to_string());
        }
        if self.end_hour <= self.start_hour {
            return Err("grid.end_hour must be after grid.start_hour".to_string());
        }
        if self.slot_minutes == 0 || self.slot_minutes > 60 {
            return Err("grid.slot_minutes must be between 1 and 60".to_string());
        }
        Ok(())
    }

    pub fn slot_count(&self) -> usize {
        let total_minutes = self.end_hour.saturating_sub(self.start_hour) * 60;
        if self.slot_minutes == 0 {
            return 0;
        }
        total_minutes.div_ceil(self.slot_minutes) as usize
    }
}

/// Builds the day's slot sequence and assigns occupants from `items`.
/// Pure in `(day, items, now)`.
pub fn generate_slots<'a>(
    clock: &EventClock,
    policy: &GridPolicy,
    day: NaiveDate,
    items: &'a [ScheduleItem],
    now: DateTime<Utc>,
) -> Result<Vec<TimeSlot<'a>>, TimestampError> {
    let day_start_time = NaiveTime::from_hms_opt(policy.start_hour, 0, 0)
        .ok_or_else(|| {
            TimestampError::NonexistentLocalTime(format!("{day} {}:00", policy.start_hour))
        })?;
    let day_start = clock.at(day, day_start_time)?;
    let is_today = clock.local_date(&now) == day;
    let day_items = items_on_day(clock, day, items);

    let mut slots = Vec::with_capacity(policy.slot_count());
    for index in 0..policy.slot_count() {
        let slot_start = add_minutes(day_start, (index as i64) * policy.slot_minutes as i64);
        let slot_end = add_minutes(slot_start, policy.slot_minutes as i64);

        let is_past = slot_end < now;
        let is_future = slot_start > now;
        slots.push(TimeSlot {
            id: format!("{day}-slot-{index}"),
            index,
            start_time: slot_start,
            end_time: slot_end,
            occupant: resolve_occupant(&day_items, slot_start, slot_end),
            is_past,
            is_now: is_today && !is_past && !is_future,
            is_future,
        });
    }
    Ok(slots)
}

/// First overlapping item in source order wins.
pub fn resolve_occupant<'a>(
    items: &[&'a ScheduleItem],
    slot_start: DateTime<FixedOffset>,
    slot_end: DateTime<FixedOffset>,
) -> Option<&'a ScheduleItem> {
    items
        .iter()
        .copied()
        .find(|item| item.overlaps(slot_start, slot_end))
}

pub fn items_on_day<'a>(
    clock: &EventClock,
    day: NaiveDate,
    items: &'a [ScheduleItem],
) -> Vec<&'a ScheduleItem> {
    items
        .iter()
        .filter(|item| clock.local_date(&item.start_time) == day)
        .collect()
}

/// Every calendar day from `start` to `end`, inclusive.
pub fn event_days(start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
    start.iter_days().take_while(|day| *day <= end).collect()
}
