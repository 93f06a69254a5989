use crate::application::status_store::{StatusLookup, UserStatusStore};
use crate::domain::event_time::{EventClock, TimestampError};
use crate::domain::models::{
    DayStats, ItemKind, ItemStatus, ScheduleItem, SlotStatus, TargetStatus, TimeSlot,
};
use crate::domain::schedule_grid::{generate_slots, items_on_day, GridPolicy};
use crate::infrastructure::error::ScheduleError;
use crate::infrastructure::status_row_store::StatusRowStore;
use chrono::{DateTime, FixedOffset, NaiveDate, Timelike, Utc};
use serde::Serialize;
use std::sync::Arc;

/// What a slot shows, after status resolution.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SlotDisplay {
    Confirmed,
    Tentative,
    Interested,
    Blocked,
    Available,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct OccupantView {
    pub id: String,
    pub kind: ItemKind,
    pub title: String,
    pub location: String,
    pub participants: Vec<String>,
    pub start_time: DateTime<FixedOffset>,
    pub end_time: DateTime<FixedOffset>,
    pub status: ItemStatus,
    pub is_favorite: bool,
    /// True only on the first slot the item covers.
    pub is_start: bool,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SlotView {
    pub id: String,
    pub start_time: DateTime<FixedOffset>,
    pub end_time: DateTime<FixedOffset>,
    pub is_past: bool,
    pub is_now: bool,
    pub is_future: bool,
    pub occupant: Option<OccupantView>,
    pub free_status: Option<SlotStatus>,
    pub display: SlotDisplay,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct HourGroup {
    pub hour: u32,
    pub hour_label: String,
    pub slots: Vec<SlotView>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct DaySchedule {
    pub date: NaiveDate,
    pub day_name: String,
    pub is_today: bool,
    pub has_items: bool,
    pub hour_groups: Vec<HourGroup>,
}

impl DaySchedule {
    pub fn slots(&self) -> impl Iterator<Item = &SlotView> {
        self.hour_groups.iter().flat_map(|group| group.slots.iter())
    }
}

pub fn build_day_schedule<L: StatusLookup + ?Sized>(
    clock: &EventClock,
    policy: &GridPolicy,
    day: NaiveDate,
    items: &[ScheduleItem],
    lookup: &L,
    now: DateTime<Utc>,
) -> Result<DaySchedule, TimestampError> {
    let slots = generate_slots(clock, policy, day, items, now)?;

    let mut hour_groups: Vec<HourGroup> = Vec::new();
    let mut previous_occupant: Option<&str> = None;
    for slot in &slots {
        let view = slot_view(slot, lookup, previous_occupant);
        previous_occupant = slot.occupant.map(|item| item.id.as_str());

        let hour = slot.start_time.hour();
        match hour_groups.last_mut() {
            Some(group) if group.hour == hour => group.slots.push(view),
            _ => hour_groups.push(HourGroup {
                hour,
                hour_label: slot.start_time.format("%-I %p").to_string(),
                slots: vec![view],
            }),
        }
    }

    Ok(DaySchedule {
        date: day,
        day_name: day.format("%A").to_string(),
        is_today: clock.local_date(&now) == day,
        has_items: !items_on_day(clock, day, items).is_empty(),
        hour_groups,
    })
}

pub fn build_event_schedule<L: StatusLookup + ?Sized>(
    clock: &EventClock,
    policy: &GridPolicy,
    days: &[NaiveDate],
    items: &[ScheduleItem],
    lookup: &L,
    now: DateTime<Utc>,
) -> Result<Vec<DaySchedule>, TimestampError> {
    days.iter()
        .map(|day| build_day_schedule(clock, policy, *day, items, lookup, now))
        .collect()
}

/// Per-slot counts over a built day. `total` counts committed time:
/// confirmed items plus marked free slots.
pub fn day_stats(schedule: &DaySchedule) -> DayStats {
    let mut stats = DayStats {
        date: schedule.date,
        confirmed: 0,
        tentative: 0,
        interested: 0,
        blocked: 0,
        favorites: 0,
        total: 0,
    };
    for slot in schedule.slots() {
        match slot.display {
            SlotDisplay::Confirmed => stats.confirmed += 1,
            SlotDisplay::Tentative if slot.occupant.is_some() => stats.tentative += 1,
            SlotDisplay::Interested => stats.interested += 1,
            SlotDisplay::Blocked => stats.blocked += 1,
            SlotDisplay::Tentative | SlotDisplay::Available => {}
        }
        if slot.occupant.as_ref().is_some_and(|occupant| occupant.is_favorite) {
            stats.favorites += 1;
        }
    }
    stats.total = stats.confirmed + stats.interested + stats.blocked;
    stats
}

fn slot_view<L: StatusLookup + ?Sized>(
    slot: &TimeSlot<'_>,
    lookup: &L,
    previous_occupant: Option<&str>,
) -> SlotView {
    let target = slot.status_target();
    let status = lookup.status_of(&target);

    let (occupant, free_status, display) = match slot.occupant {
        Some(item) => {
            let item_status = match status {
                TargetStatus::Item(status) => status,
                TargetStatus::Slot(_) => ItemStatus::Tentative,
            };
            let display = match item_status {
                ItemStatus::Confirmed => SlotDisplay::Confirmed,
                ItemStatus::Tentative => SlotDisplay::Tentative,
            };
            let occupant = OccupantView {
                id: item.id.clone(),
                kind: item.kind,
                title: item.title.clone(),
                location: item.location.clone(),
                participants: item.participants.clone(),
                start_time: item.start_time,
                end_time: item.end_time,
                status: item_status,
                is_favorite: item.is_agenda_event() && lookup.is_favorite(&item.id),
                is_start: previous_occupant != Some(item.id.as_str()),
            };
            (Some(occupant), None, display)
        }
        None => {
            let slot_status = match status {
                TargetStatus::Slot(status) => status,
                TargetStatus::Item(_) => SlotStatus::Available,
            };
            let display = match slot_status {
                SlotStatus::Available => SlotDisplay::Available,
                SlotStatus::Interested => SlotDisplay::Interested,
                SlotStatus::Blocked => SlotDisplay::Blocked,
                SlotStatus::Tentative => SlotDisplay::Tentative,
            };
            (None, Some(slot_status), display)
        }
    };

    SlotView {
        id: slot.id.clone(),
        start_time: slot.start_time,
        end_time: slot.end_time,
        is_past: slot.is_past,
        is_now: slot.is_now,
        is_future: slot.is_future,
        occupant,
        free_status,
        display,
    }
}

/// Mutation entry points for the schedule screen. Each returns the status
/// the UI should show once the write is acknowledged.
pub struct ScheduleViewModel<R>
where
    R: StatusRowStore + ?Sized,
{
    store: Arc<UserStatusStore<R>>,
}

impl<R> ScheduleViewModel<R>
where
    R: StatusRowStore + ?Sized + 'static,
{
    pub fn new(store: Arc<UserStatusStore<R>>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &UserStatusStore<R> {
        &self.store
    }

    pub fn build_day(
        &self,
        clock: &EventClock,
        policy: &GridPolicy,
        day: NaiveDate,
        items: &[ScheduleItem],
        now: DateTime<Utc>,
    ) -> Result<DaySchedule, ScheduleError> {
        Ok(build_day_schedule(clock, policy, day, items, self.store.as_ref(), now)?)
    }

    pub async fn confirm(&self, item: &ScheduleItem) -> Result<ItemStatus, ScheduleError> {
        self.store.set_item_status(item, ItemStatus::Confirmed).await
    }

    pub async fn unconfirm(&self, item: &ScheduleItem) -> Result<ItemStatus, ScheduleError> {
        self.store.set_item_status(item, ItemStatus::Tentative).await
    }

    pub async fn toggle_confirmation(
        &self,
        item: &ScheduleItem,
    ) -> Result<ItemStatus, ScheduleError> {
        self.store.toggle_confirmation(item).await
    }

    pub async fn mark_interested(&self, slot: &TimeSlot<'_>) -> Result<SlotStatus, ScheduleError> {
        ensure_free(slot)?;
        self.store.toggle_free_slot_interest(slot.start_time).await
    }

    pub async fn block(&self, slot: &TimeSlot<'_>) -> Result<SlotStatus, ScheduleError> {
        ensure_free(slot)?;
        self.store.toggle_free_slot_blocked(slot.start_time).await
    }

    pub async fn favorite(&self, item: &ScheduleItem) -> Result<bool, ScheduleError> {
        self.store.toggle_favorite(item).await
    }
}

fn ensure_free(slot: &TimeSlot<'_>) -> Result<(), ScheduleError> {
    match slot.occupant {
        Some(item) => Err(ScheduleError::InvalidTarget(format!(
            "slot {} is occupied by {}",
            slot.id,
            item.status_target()
        ))),
        None => Ok(()),
    }
}
