//! In-memory [`CalendarEntryStore`] and [`ExceptionStore`].
//!
//! Used by the test suites and the `recur` CLI. Exceptions are kept in
//! insertion order, which is the "store order" the expander preserves for
//! modified occurrences.
//!
//! Unlike the bare trait contract, this store enforces uniqueness of
//! deletion markers per `(entry_id, start_time_utc)` and of modifications per
//! `(entry_id, original_start_utc)`. Creating a duplicate returns (or
//! updates) the existing record, so two racing first-time edits of one
//! occurrence cannot leave two records behind.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::model::{
    CalendarEntry, EntryException, EntryPatch, ExceptionFields, ExceptionTiming, NewEntry,
};
use crate::store::{CalendarEntryStore, ExceptionStore, StoreResult};
use crate::time;

#[derive(Debug, Default)]
pub struct InMemoryEntryStore {
    entries: RwLock<HashMap<Uuid, CalendarEntry>>,
}

impl InMemoryEntryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store with already-persisted entries, ids preserved.
    pub fn with_entries(entries: impl IntoIterator<Item = CalendarEntry>) -> Self {
        Self {
            entries: RwLock::new(entries.into_iter().map(|e| (e.id, e)).collect()),
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl CalendarEntryStore for InMemoryEntryStore {
    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<CalendarEntry>> {
        Ok(self.entries.read().await.get(&id).cloned())
    }

    async fn find_recurring_overlapping(
        &self,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> StoreResult<Vec<CalendarEntry>> {
        let entries = self.entries.read().await;
        let mut found: Vec<CalendarEntry> = entries
            .values()
            .filter(|e| e.recurring && e.start_time_utc < window_end)
            .filter(|e| e.recurrence_ends_utc.is_some_and(|ends| ends >= window_start))
            .cloned()
            .collect();
        found.sort_by_key(|e| (e.start_time_utc, e.id));
        Ok(found)
    }

    async fn find_non_recurring_in_range(
        &self,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> StoreResult<Vec<CalendarEntry>> {
        let entries = self.entries.read().await;
        let mut found: Vec<CalendarEntry> = entries
            .values()
            .filter(|e| !e.recurring)
            .filter(|e| e.start_time_utc >= window_start && e.start_time_utc < window_end)
            .cloned()
            .collect();
        found.sort_by_key(|e| (e.start_time_utc, e.id));
        Ok(found)
    }

    async fn create(&self, new: NewEntry) -> StoreResult<CalendarEntry> {
        let entry = CalendarEntry {
            id: Uuid::new_v4(),
            creator_id: new.creator_id,
            title: new.title,
            description: new.description,
            all_day: new.all_day,
            start_time_utc: new.start_time_utc,
            end_time_utc: new.end_time_utc,
            recurring: new.recurring,
            frequency: new.frequency,
            recurrence_ends_utc: new.recurrence_ends_utc,
            recurrence_pattern: None,
        };
        self.entries.write().await.insert(entry.id, entry.clone());
        Ok(entry)
    }

    async fn update(&self, id: Uuid, patch: EntryPatch) -> StoreResult<Option<CalendarEntry>> {
        let mut entries = self.entries.write().await;
        Ok(entries.get_mut(&id).map(|entry| {
            patch.apply_to(entry);
            entry.clone()
        }))
    }

    async fn delete(&self, id: Uuid) -> StoreResult<bool> {
        Ok(self.entries.write().await.remove(&id).is_some())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryExceptionStore {
    records: RwLock<Vec<EntryException>>,
}

impl InMemoryExceptionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store with already-persisted exceptions, in the given order.
    pub fn with_exceptions(exceptions: impl IntoIterator<Item = EntryException>) -> Self {
        Self {
            records: RwLock::new(exceptions.into_iter().collect()),
        }
    }

    /// Append a record as-is, bypassing the uniqueness checks.
    pub async fn insert_raw(&self, exception: EntryException) {
        self.records.write().await.push(exception);
    }

    pub async fn count_for_entry(&self, entry_id: Uuid) -> usize {
        self.records
            .read()
            .await
            .iter()
            .filter(|r| r.entry_id == entry_id)
            .count()
    }
}

#[async_trait]
impl ExceptionStore for InMemoryExceptionStore {
    async fn find_deletion_markers(&self, entry_id: Uuid) -> StoreResult<Vec<DateTime<Utc>>> {
        Ok(self
            .records
            .read()
            .await
            .iter()
            .filter(|r| r.entry_id == entry_id && r.deleted)
            .map(|r| r.start_time_utc)
            .collect())
    }

    async fn find_modified(
        &self,
        entry_id: Uuid,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> StoreResult<Vec<EntryException>> {
        Ok(self
            .records
            .read()
            .await
            .iter()
            .filter(|r| r.entry_id == entry_id && r.modified)
            .filter(|r| r.start_time_utc >= window_start && r.start_time_utc < window_end)
            .cloned()
            .collect())
    }

    async fn find_matching_at_instant(
        &self,
        entry_id: Uuid,
        instant: DateTime<Utc>,
    ) -> StoreResult<Vec<EntryException>> {
        Ok(self
            .records
            .read()
            .await
            .iter()
            .filter(|r| r.entry_id == entry_id && r.modified)
            .filter(|r| time::within_tolerance(r.start_time_utc, instant))
            .cloned()
            .collect())
    }

    async fn find_all_for_entry(&self, entry_id: Uuid) -> StoreResult<Vec<EntryException>> {
        Ok(self
            .records
            .read()
            .await
            .iter()
            .filter(|r| r.entry_id == entry_id)
            .cloned()
            .collect())
    }

    async fn create_deletion_marker(
        &self,
        entry_id: Uuid,
        instant: DateTime<Utc>,
    ) -> StoreResult<EntryException> {
        let mut records = self.records.write().await;
        if let Some(existing) = records
            .iter()
            .find(|r| r.entry_id == entry_id && r.deleted && r.start_time_utc == instant)
        {
            tracing::debug!(%entry_id, %instant, "deletion marker already present");
            return Ok(existing.clone());
        }
        let marker = EntryException::deletion_marker(entry_id, instant);
        records.push(marker.clone());
        Ok(marker)
    }

    async fn create_modification(
        &self,
        entry_id: Uuid,
        original_instant: DateTime<Utc>,
        fields: ExceptionFields,
    ) -> StoreResult<EntryException> {
        let mut records = self.records.write().await;
        if let Some(existing) = records.iter_mut().find(|r| {
            r.entry_id == entry_id && r.modified && r.original_start_utc == original_instant
        }) {
            tracing::debug!(%entry_id, %original_instant, "modification already present; updating it");
            existing.apply_fields(fields);
            return Ok(existing.clone());
        }
        let modification = EntryException::modification(entry_id, original_instant, fields);
        records.push(modification.clone());
        Ok(modification)
    }

    async fn update_modification(
        &self,
        id: Uuid,
        fields: ExceptionFields,
    ) -> StoreResult<Option<EntryException>> {
        let mut records = self.records.write().await;
        Ok(records.iter_mut().find(|r| r.id == id && r.modified).map(|r| {
            r.apply_fields(fields);
            r.clone()
        }))
    }

    async fn update_timing(
        &self,
        id: Uuid,
        timing: ExceptionTiming,
    ) -> StoreResult<Option<EntryException>> {
        let mut records = self.records.write().await;
        Ok(records.iter_mut().find(|r| r.id == id).map(|r| {
            r.apply_timing(timing);
            r.clone()
        }))
    }

    async fn delete_exception(&self, id: Uuid) -> StoreResult<bool> {
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|r| r.id != id);
        Ok(records.len() != before)
    }

    async fn delete_all_for_entry(&self, entry_id: Uuid) -> StoreResult<usize> {
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|r| r.entry_id != entry_id);
        Ok(before - records.len())
    }
}
