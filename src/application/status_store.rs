use crate::domain::models::{
    resolve_status, ItemStatus, ScheduleItem, SlotStatus, StatusTarget, TargetStatus,
    UserStatusRecord,
};
use crate::infrastructure::error::ScheduleError;
use crate::infrastructure::status_row_mapper::{decode_status_rows, encode_status_row};
use crate::infrastructure::status_row_store::{delete_by_target, upsert_by_target, StatusRowStore};
use chrono::{DateTime, FixedOffset, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

pub type NowProvider = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Read side of the status store, shared by the live store and the
/// signed-out fallback.
pub trait StatusLookup {
    fn status_of(&self, target: &StatusTarget) -> TargetStatus;
    fn is_favorite(&self, agenda_id: &str) -> bool;
}

/// Every target at its implicit default. Used when nobody is signed in.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImplicitDefaults;

impl StatusLookup for ImplicitDefaults {
    fn status_of(&self, target: &StatusTarget) -> TargetStatus {
        resolve_status(target, None)
    }

    fn is_favorite(&self, _agenda_id: &str) -> bool {
        false
    }
}

/// Cached records plus the targets with a write in flight. Shared with the
/// write tasks so a write settles the cache even after its caller is gone.
#[derive(Default)]
struct StatusCache {
    records: Mutex<HashMap<StatusTarget, UserStatusRecord>>,
    in_flight: Mutex<HashSet<StatusTarget>>,
}

impl StatusCache {
    fn lock_records(
        &self,
    ) -> Result<MutexGuard<'_, HashMap<StatusTarget, UserStatusRecord>>, ScheduleError> {
        self.records.lock().map_err(|error| {
            ScheduleError::InvalidState(format!("status cache lock poisoned: {error}"))
        })
    }

    fn lock_in_flight(&self) -> Result<MutexGuard<'_, HashSet<StatusTarget>>, ScheduleError> {
        self.in_flight.lock().map_err(|error| {
            ScheduleError::InvalidState(format!("in-flight lock poisoned: {error}"))
        })
    }

    /// `None` or an implicit-default record removes the entry.
    fn put(
        &self,
        target: &StatusTarget,
        record: Option<UserStatusRecord>,
    ) -> Result<(), ScheduleError> {
        let mut records = self.lock_records()?;
        match record.filter(|record| !record.is_implicit_default()) {
            Some(record) => {
                records.insert(target.clone(), record);
            }
            None => {
                records.remove(target);
            }
        }
        Ok(())
    }
}

/// Holds a target's slot in the in-flight set until dropped.
struct InFlightGuard {
    cache: Arc<StatusCache>,
    target: StatusTarget,
}

impl InFlightGuard {
    fn acquire(cache: &Arc<StatusCache>, target: &StatusTarget) -> Result<Self, ScheduleError> {
        if !cache.lock_in_flight()?.insert(target.clone()) {
            warn!(target = %target, "rejecting concurrent status change");
            return Err(ScheduleError::MutationInFlight(target.to_string()));
        }
        Ok(Self {
            cache: Arc::clone(cache),
            target: target.clone(),
        })
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if let Ok(mut targets) = self.cache.in_flight.lock() {
            targets.remove(&self.target);
        }
    }
}

/// Per-session cache of the user's status rows with write-through to the
/// row store. Construct one per signed-in session and drop it on sign-out.
pub struct UserStatusStore<R>
where
    R: StatusRowStore + ?Sized,
{
    user_id: String,
    event_id: Option<String>,
    rows: Arc<R>,
    cache: Arc<StatusCache>,
    now_provider: NowProvider,
}

impl<R> UserStatusStore<R>
where
    R: StatusRowStore + ?Sized + 'static,
{
    pub fn new(user_id: impl Into<String>, rows: Arc<R>) -> Self {
        Self {
            user_id: user_id.into(),
            event_id: None,
            rows,
            cache: Arc::new(StatusCache::default()),
            now_provider: Arc::new(Utc::now),
        }
    }

    pub fn with_event_id(mut self, event_id: impl Into<String>) -> Self {
        self.event_id = Some(event_id.into());
        self
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Replaces the cache with the user's stored rows. Undecodable rows are
    /// skipped; rows holding only the implicit default are not cached.
    /// Targets with a write in flight keep their cached record.
    pub async fn hydrate(&self) -> Result<usize, ScheduleError> {
        let rows = self.rows.list_for_user(&self.user_id).await?;
        let records = decode_status_rows(&rows);

        let pending = self.cache.lock_in_flight()?.clone();
        let mut cache = self.cache.lock_records()?;
        cache.retain(|target, _| pending.contains(target));
        for record in records {
            if record.is_implicit_default() || pending.contains(&record.target) {
                continue;
            }
            cache.insert(record.target.clone(), record);
        }
        info!(
            user_id = %self.user_id,
            rows = rows.len(),
            cached = cache.len(),
            pending = pending.len(),
            "hydrated status cache"
        );
        Ok(cache.len())
    }

    pub fn clear(&self) -> Result<(), ScheduleError> {
        self.cache.lock_records()?.clear();
        Ok(())
    }

    pub fn record(&self, target: &StatusTarget) -> Result<Option<UserStatusRecord>, ScheduleError> {
        Ok(self.cache.lock_records()?.get(target).cloned())
    }

    pub fn records(&self) -> Result<Vec<UserStatusRecord>, ScheduleError> {
        let mut records = self.cache.lock_records()?.values().cloned().collect::<Vec<_>>();
        records.sort_by_key(|record| record.target.to_string());
        Ok(records)
    }

    pub fn item_status(&self, item: &ScheduleItem) -> ItemStatus {
        match self.status_of(&item.status_target()) {
            TargetStatus::Item(status) => status,
            TargetStatus::Slot(_) => ItemStatus::Tentative,
        }
    }

    pub fn slot_status(&self, slot_time: DateTime<FixedOffset>) -> SlotStatus {
        match self.status_of(&StatusTarget::Slot(slot_time.with_timezone(&Utc))) {
            TargetStatus::Slot(status) => status,
            TargetStatus::Item(_) => SlotStatus::Available,
        }
    }

    pub fn is_in_flight(&self, target: &StatusTarget) -> bool {
        self.cache
            .lock_in_flight()
            .map(|targets| targets.contains(target))
            .unwrap_or(false)
    }

    /// Sets an agenda or meeting target to `status`. Stamps `confirmed_at` on
    /// confirmation and clears it otherwise.
    pub async fn set_item_status(
        &self,
        item: &ScheduleItem,
        status: ItemStatus,
    ) -> Result<ItemStatus, ScheduleError> {
        let record = self
            .mutate(item.status_target(), |record, now| {
                Ok(with_item_status(record, status, now))
            })
            .await?;
        Ok(item_status_of(&record))
    }

    pub async fn toggle_confirmation(
        &self,
        item: &ScheduleItem,
    ) -> Result<ItemStatus, ScheduleError> {
        let record = self
            .mutate(item.status_target(), |record, now| {
                let next = item_status_of(&record).toggled();
                Ok(with_item_status(record, next, now))
            })
            .await?;
        Ok(item_status_of(&record))
    }

    pub async fn set_slot_status(
        &self,
        slot_time: DateTime<FixedOffset>,
        status: SlotStatus,
    ) -> Result<SlotStatus, ScheduleError> {
        let target = StatusTarget::Slot(slot_time.with_timezone(&Utc));
        let record = self
            .mutate(target, |mut record, _| {
                record.status = TargetStatus::Slot(status);
                Ok(record)
            })
            .await?;
        Ok(slot_status_of(&record))
    }

    pub async fn toggle_free_slot_interest(
        &self,
        slot_time: DateTime<FixedOffset>,
    ) -> Result<SlotStatus, ScheduleError> {
        self.toggle_slot_towards(slot_time, SlotStatus::Interested).await
    }

    pub async fn toggle_free_slot_blocked(
        &self,
        slot_time: DateTime<FixedOffset>,
    ) -> Result<SlotStatus, ScheduleError> {
        self.toggle_slot_towards(slot_time, SlotStatus::Blocked).await
    }

    /// Flips the favorite flag of an agenda item, creating a tentative row
    /// when none exists.
    pub async fn toggle_favorite(&self, item: &ScheduleItem) -> Result<bool, ScheduleError> {
        if !item.is_agenda_event() {
            return Err(ScheduleError::InvalidTarget(format!(
                "only agenda events can be favorites: {}",
                item.status_target()
            )));
        }
        let record = self
            .mutate(item.status_target(), |mut record, _| {
                record.is_favorite = !record.is_favorite;
                Ok(record)
            })
            .await?;
        Ok(record.is_favorite)
    }

    async fn toggle_slot_towards(
        &self,
        slot_time: DateTime<FixedOffset>,
        own: SlotStatus,
    ) -> Result<SlotStatus, ScheduleError> {
        let target = StatusTarget::Slot(slot_time.with_timezone(&Utc));
        let record = self
            .mutate(target, |mut record, _| {
                let next = slot_status_of(&record).toggled_towards(own);
                record.status = TargetStatus::Slot(next);
                Ok(record)
            })
            .await?;
        Ok(slot_status_of(&record))
    }

    /// Applies `change` to the target's current record under the per-target
    /// guard: cache first, then the remote write, restoring the cache if the
    /// write fails. A change that leaves the state as it was writes nothing.
    ///
    /// The write runs on its own task. Dropping the returned future does not
    /// cancel it; the task still settles the cache and releases the guard.
    async fn mutate<F>(
        &self,
        target: StatusTarget,
        change: F,
    ) -> Result<UserStatusRecord, ScheduleError>
    where
        F: FnOnce(UserStatusRecord, DateTime<Utc>) -> Result<UserStatusRecord, ScheduleError>,
    {
        target.validate().map_err(ScheduleError::InvalidTarget)?;
        let guard = InFlightGuard::acquire(&self.cache, &target)?;
        let now = (self.now_provider)();

        let previous = self.cache.lock_records()?.get(&target).cloned();
        let current = previous
            .clone()
            .unwrap_or_else(|| UserStatusRecord::new(target.clone(), now));

        let mut next = change(current.clone(), now)?;
        next.updated_at = now;
        next.validate().map_err(ScheduleError::InvalidRecord)?;

        if next.status == current.status && next.is_favorite == current.is_favorite {
            debug!(
                target = %target,
                status = next.status.as_str(),
                "status unchanged; skipping write"
            );
            return Ok(current);
        }

        self.cache.put(&target, Some(next.clone()))?;

        let rows = Arc::clone(&self.rows);
        let cache = Arc::clone(&self.cache);
        let user_id = self.user_id.clone();
        let event_id = self.event_id.clone();
        let write = tokio::spawn(async move {
            let _guard = guard;
            let written = persist(rows.as_ref(), &user_id, event_id.as_deref(), &next).await;
            match written {
                Ok(()) => {
                    info!(
                        target = %next.target,
                        status = next.status.as_str(),
                        favorite = next.is_favorite,
                        "status updated"
                    );
                    cache.put(&next.target, Some(next.clone())).map(|()| next)
                }
                Err(error) => {
                    warn!(
                        target = %next.target,
                        %error,
                        "status write failed; restoring previous state"
                    );
                    cache.put(&next.target, previous).and(Err(error))
                }
            }
        });

        write.await.map_err(|error| {
            ScheduleError::InvalidState(format!("status write task failed: {error}"))
        })?
    }
}

/// Deletes the row when `record` is the implicit default, upserts it otherwise.
async fn persist<R>(
    rows: &R,
    user_id: &str,
    event_id: Option<&str>,
    record: &UserStatusRecord,
) -> Result<(), ScheduleError>
where
    R: StatusRowStore + ?Sized,
{
    if record.is_implicit_default() {
        delete_by_target(rows, user_id, &record.target).await?;
    } else {
        let row = encode_status_row(user_id, event_id, record)?;
        upsert_by_target(rows, user_id, &record.target, &row).await?;
    }
    Ok(())
}

impl<R> StatusLookup for UserStatusStore<R>
where
    R: StatusRowStore + ?Sized,
{
    fn status_of(&self, target: &StatusTarget) -> TargetStatus {
        match self.cache.records.lock() {
            Ok(cache) => resolve_status(target, cache.get(target)),
            Err(_) => resolve_status(target, None),
        }
    }

    fn is_favorite(&self, agenda_id: &str) -> bool {
        let target = StatusTarget::Agenda(agenda_id.to_string());
        self.cache
            .records
            .lock()
            .map(|cache| cache.get(&target).is_some_and(|record| record.is_favorite))
            .unwrap_or(false)
    }
}

fn with_item_status(
    mut record: UserStatusRecord,
    status: ItemStatus,
    now: DateTime<Utc>,
) -> UserStatusRecord {
    if item_status_of(&record) != status {
        record.confirmed_at = match status {
            ItemStatus::Confirmed => Some(now),
            ItemStatus::Tentative => None,
        };
    }
    record.status = TargetStatus::Item(status);
    record
}

fn item_status_of(record: &UserStatusRecord) -> ItemStatus {
    match record.status {
        TargetStatus::Item(status) => status,
        TargetStatus::Slot(_) => ItemStatus::Tentative,
    }
}

fn slot_status_of(record: &UserStatusRecord) -> SlotStatus {
    match record.status {
        TargetStatus::Slot(status) => status,
        TargetStatus::Item(_) => SlotStatus::Available,
    }
}
