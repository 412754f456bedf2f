//! Persistence seams consumed by the engine.
//!
//! The engine owns no database connection. Backends implement these two
//! traits; [`crate::memory`] provides an in-memory implementation of both.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::StoreError;
use crate::model::{
    CalendarEntry, EntryException, EntryPatch, ExceptionFields, ExceptionTiming, NewEntry,
};

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Read/write access to persisted calendar entries.
#[async_trait]
pub trait CalendarEntryStore: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<CalendarEntry>>;

    /// Recurring entries that may have occurrences in `[window_start, window_end)`:
    /// `start_time_utc < window_end` and `recurrence_ends_utc >= window_start`.
    async fn find_recurring_overlapping(
        &self,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> StoreResult<Vec<CalendarEntry>>;

    /// Non-recurring entries starting in `[window_start, window_end)`.
    async fn find_non_recurring_in_range(
        &self,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> StoreResult<Vec<CalendarEntry>>;

    async fn create(&self, entry: NewEntry) -> StoreResult<CalendarEntry>;

    /// Apply `patch` and return the updated entry, or `None` if `id` is unknown.
    async fn update(&self, id: Uuid, patch: EntryPatch) -> StoreResult<Option<CalendarEntry>>;

    /// Returns `false` if `id` is unknown.
    async fn delete(&self, id: Uuid) -> StoreResult<bool>;
}

/// Read/write access to per-occurrence exceptions.
#[async_trait]
pub trait ExceptionStore: Send + Sync {
    /// Instants marked deleted for `entry_id`.
    async fn find_deletion_markers(&self, entry_id: Uuid) -> StoreResult<Vec<DateTime<Utc>>>;

    /// Modified exceptions whose (new) start lies in `[window_start, window_end)`.
    async fn find_modified(
        &self,
        entry_id: Uuid,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> StoreResult<Vec<EntryException>>;

    /// Modified exceptions whose start is within
    /// [`MATCH_TOLERANCE`](crate::time::MATCH_TOLERANCE) of `instant`.
    async fn find_matching_at_instant(
        &self,
        entry_id: Uuid,
        instant: DateTime<Utc>,
    ) -> StoreResult<Vec<EntryException>>;

    /// Every exception of `entry_id`, deletion markers included.
    async fn find_all_for_entry(&self, entry_id: Uuid) -> StoreResult<Vec<EntryException>>;

    async fn create_deletion_marker(
        &self,
        entry_id: Uuid,
        instant: DateTime<Utc>,
    ) -> StoreResult<EntryException>;

    async fn create_modification(
        &self,
        entry_id: Uuid,
        original_instant: DateTime<Utc>,
        fields: ExceptionFields,
    ) -> StoreResult<EntryException>;

    /// Returns `None` if `id` is unknown.
    async fn update_modification(
        &self,
        id: Uuid,
        fields: ExceptionFields,
    ) -> StoreResult<Option<EntryException>>;

    /// Rewrite the instants of an exception. Returns `None` if `id` is unknown.
    async fn update_timing(
        &self,
        id: Uuid,
        timing: ExceptionTiming,
    ) -> StoreResult<Option<EntryException>>;

    async fn delete_exception(&self, id: Uuid) -> StoreResult<bool>;

    /// Returns the number of records removed.
    async fn delete_all_for_entry(&self, entry_id: Uuid) -> StoreResult<usize>;
}

/// Pick one record out of a `find_matching_at_instant` result.
///
/// Correct writes leave at most one candidate, but stores are not required
/// to enforce that. The most recently created record wins; among equal
/// `created_at` values the last one returned wins.
pub fn select_most_recent(candidates: Vec<EntryException>) -> Option<EntryException> {
    if candidates.len() > 1 {
        tracing::warn!(
            count = candidates.len(),
            entry_id = %candidates[0].entry_id,
            "multiple exceptions match one occurrence instant; using the most recent"
        );
    }
    candidates
        .into_iter()
        .reduce(|best, next| if next.created_at >= best.created_at { next } else { best })
}
