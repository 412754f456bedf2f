//! Entry mutation orchestrator -- create, read, list, update and delete
//! calendar entries, for whole series and for single occurrences.
//!
//! The service is stateless apart from its two stores. It never holds a live
//! entity handle: every write is an explicit `update(id, patch)` or exception
//! store call, and every read goes back to the store.
//!
//! Single-occurrence edits are keyed by `(entry id, occurrence instant)`:
//!
//! | Operation | Matching modification | No matching modification |
//! |---|---|---|
//! | update | edit it in place | deletion marker + new modification |
//! | delete | delete it | deletion marker |
//!
//! The first-edit path performs two independent writes without a
//! transaction. Two callers editing the same occurrence concurrently can both
//! take that path; stores that enforce uniqueness on the original instant
//! (see [`crate::memory`]) absorb the duplicate.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::expander::{self, contributes_to_window};
use crate::model::{
    CalendarEntry, EntryException, EntryPatch, EntryUpdate, ExceptionFields, NewEntry, Occurrence,
};
use crate::reanchor::reanchor_exception;
use crate::rule::{build_rule, Frequency, RecurrenceRule};
use crate::store::{select_most_recent, CalendarEntryStore, ExceptionStore};
use crate::time;

/// Which part of a recurring entry an update or delete applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// The entry itself and therefore every occurrence.
    Series,
    /// The single occurrence starting at this instant (matched within
    /// [`MATCH_TOLERANCE`](crate::time::MATCH_TOLERANCE)).
    Occurrence(DateTime<Utc>),
}

impl Scope {
    /// Build a scope from the `applyToSeries` and occurrence-instant request
    /// parameters. `Ok(None)` means the caller gave no scope at all.
    ///
    /// # Errors
    /// Returns `EngineError::Validation` when `applyToSeries=false` comes
    /// without an occurrence instant.
    pub fn from_params(
        apply_to_series: Option<bool>,
        instant: Option<DateTime<Utc>>,
    ) -> Result<Option<Self>> {
        match (apply_to_series, instant) {
            (None, _) => Ok(None),
            (Some(true), _) => Ok(Some(Scope::Series)),
            (Some(false), Some(instant)) => Ok(Some(Scope::Occurrence(instant))),
            (Some(false), None) => Err(EngineError::Validation(
                "an occurrence instant is required when applyToSeries is false".to_string(),
            )),
        }
    }
}

/// Listing window. Both bounds are required; the window is `[start, end)`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ListQuery {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl ListQuery {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            start: Some(start),
            end: Some(end),
        }
    }

    /// Parse the raw `start`/`end` query parameters.
    pub fn from_params(start: Option<&str>, end: Option<&str>) -> Result<Self> {
        Ok(Self {
            start: start.map(time::parse_instant).transpose()?,
            end: end.map(time::parse_instant).transpose()?,
        })
    }

    fn window(&self) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
        let (Some(start), Some(end)) = (self.start, self.end) else {
            return Err(EngineError::Validation(
                "both start and end are required for a range query".to_string(),
            ));
        };
        if start >= end {
            return Err(EngineError::Validation(format!(
                "range start {} must be before end {}",
                start, end
            )));
        }
        Ok((start, end))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum UpdateOutcome {
    /// The entry was updated; exceptions were moved or removed as needed.
    Series(CalendarEntry),
    /// The occurrence's modification record after the edit.
    Occurrence(EntryException),
}

#[derive(Debug, Clone, PartialEq)]
pub enum DeleteOutcome {
    /// The entry and all of its exceptions were deleted.
    Series {
        entry_id: Uuid,
        exceptions_removed: usize,
    },
    /// A modified occurrence was removed entirely.
    ModificationRemoved { exception_id: Uuid },
    /// A generated occurrence is now suppressed by this deletion marker.
    OccurrenceSuppressed(EntryException),
}

pub struct CalendarService<E, X> {
    entries: E,
    exceptions: X,
    config: EngineConfig,
}

impl<E, X> CalendarService<E, X>
where
    E: CalendarEntryStore,
    X: ExceptionStore,
{
    pub fn new(entries: E, exceptions: X) -> Self {
        Self::with_config(entries, exceptions, EngineConfig::default())
    }

    pub fn with_config(entries: E, exceptions: X, config: EngineConfig) -> Self {
        Self {
            entries,
            exceptions,
            config,
        }
    }

    pub fn entries(&self) -> &E {
        &self.entries
    }

    pub fn exceptions(&self) -> &X {
        &self.exceptions
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Persist a new entry. A recurring entry is stored first and then given
    /// a pattern anchored on its persisted start.
    #[tracing::instrument(skip_all, fields(recurring = new.recurring))]
    pub async fn create(&self, mut new: NewEntry) -> Result<CalendarEntry> {
        validate_times(new.start_time_utc, new.end_time_utc)?;
        if new.recurring {
            require_recurrence(new.frequency, new.recurrence_ends_utc)?;
        } else {
            new.frequency = None;
            new.recurrence_ends_utc = None;
        }

        let entry = self.entries.create(new).await?;
        if !entry.recurring {
            tracing::info!(entry_id = %entry.id, "created entry");
            return Ok(entry);
        }

        let (frequency, ends) = require_recurrence(entry.frequency, entry.recurrence_ends_utc)?;
        let pattern = build_rule(frequency, entry.start_time_utc, ends).serialize();
        let patch = EntryPatch {
            recurrence_pattern: Some(Some(pattern)),
            ..EntryPatch::default()
        };
        let entry = self
            .entries
            .update(entry.id, patch)
            .await?
            .ok_or_else(|| EngineError::entry_not_found(entry.id))?;
        tracing::info!(entry_id = %entry.id, %frequency, "created recurring entry");
        Ok(entry)
    }

    pub async fn find_entry(&self, id: Uuid) -> Result<CalendarEntry> {
        self.entries
            .find_by_id(id)
            .await?
            .ok_or_else(|| EngineError::entry_not_found(id))
    }

    /// Fetch one entry as an occurrence.
    ///
    /// For a recurring entry with an instant hint, the series is expanded
    /// within [`MATCH_TOLERANCE`](crate::time::MATCH_TOLERANCE) of the hint
    /// and the closest occurrence is returned; `None` means that occurrence
    /// was deleted and has no replacement. Without a hint, a recurring entry
    /// is returned as its series head.
    #[tracing::instrument(skip(self))]
    pub async fn get(&self, id: Uuid, hint: Option<DateTime<Utc>>) -> Result<Option<Occurrence>> {
        let entry = self.find_entry(id).await?;
        let hint = match hint {
            Some(hint) if entry.recurring => hint,
            _ => return Ok(Some(Occurrence::from_entry(&entry))),
        };

        let (window_start, window_end) = time::tolerance_window(hint);
        let occurrences = expander::expand(
            &entry,
            window_start,
            window_end,
            &self.exceptions,
            &self.config,
        )
        .await?;
        Ok(occurrences
            .into_iter()
            .min_by_key(|o| (o.start_time_utc - hint).abs()))
    }

    /// All occurrences in the query window: non-recurring entries first,
    /// then each contributing series' expansion. Not globally sorted.
    #[tracing::instrument(skip(self))]
    pub async fn list(&self, query: ListQuery) -> Result<Vec<Occurrence>> {
        let (start, end) = query.window()?;

        let mut occurrences: Vec<Occurrence> = self
            .entries
            .find_non_recurring_in_range(start, end)
            .await?
            .iter()
            .map(Occurrence::from_entry)
            .collect();

        let series = self.entries.find_recurring_overlapping(start, end).await?;
        for entry in series.iter().filter(|e| contributes_to_window(e, start, end)) {
            let expanded =
                expander::expand(entry, start, end, &self.exceptions, &self.config).await?;
            occurrences.extend(expanded);
        }

        tracing::debug!(count = occurrences.len(), series = series.len(), "listed occurrences");
        Ok(occurrences)
    }

    /// Update an entry or one of its occurrences.
    ///
    /// `scope` is required for recurring entries and ignored for
    /// non-recurring ones.
    ///
    /// # Errors
    /// `NotFound` for an unknown entry, `Validation` for a missing scope or
    /// inconsistent fields, `MalformedPattern` for a corrupt stored pattern,
    /// `Storage` for store failures.
    #[tracing::instrument(skip(self, update))]
    pub async fn update(
        &self,
        id: Uuid,
        update: EntryUpdate,
        scope: Option<Scope>,
    ) -> Result<UpdateOutcome> {
        let entry = self.find_entry(id).await?;
        if !entry.recurring {
            return self.update_series(entry, &update).await;
        }
        match scope {
            Some(Scope::Series) => self.update_series(entry, &update).await,
            Some(Scope::Occurrence(instant)) => self.update_occurrence(entry, instant, update).await,
            None => Err(scope_required(id)),
        }
    }

    /// Delete an entry or one of its occurrences.
    ///
    /// `scope` is required for recurring entries and ignored for
    /// non-recurring ones. Deleting an unknown entry is `NotFound`.
    #[tracing::instrument(skip(self))]
    pub async fn delete(&self, id: Uuid, scope: Option<Scope>) -> Result<DeleteOutcome> {
        let entry = self.find_entry(id).await?;
        if !entry.recurring {
            return self.delete_series(entry.id).await;
        }
        match scope {
            Some(Scope::Series) => self.delete_series(entry.id).await,
            Some(Scope::Occurrence(instant)) => self.delete_occurrence(entry, instant).await,
            None => Err(scope_required(id)),
        }
    }

    async fn update_series(
        &self,
        entry: CalendarEntry,
        update: &EntryUpdate,
    ) -> Result<UpdateOutcome> {
        let mut patch = EntryPatch::from(update);
        let mut next = entry.clone();
        patch.apply_to(&mut next);
        validate_times(next.start_time_utc, next.end_time_utc)?;

        let old_rule = match (entry.recurring, entry.frequency, entry.recurrence_ends_utc) {
            (true, Some(frequency), Some(ends)) => Some(build_rule(frequency, entry.start_time_utc, ends)),
            _ => None,
        };
        let mut new_rule = None;
        if next.recurring {
            let (frequency, ends) = require_recurrence(next.frequency, next.recurrence_ends_utc)?;
            let rule = build_rule(frequency, next.start_time_utc, ends);
            patch.recurrence_pattern = Some(Some(rule.serialize()));
            new_rule = Some(rule);
        } else {
            patch.frequency = Some(None);
            patch.recurrence_ends_utc = Some(None);
            patch.recurrence_pattern = Some(None);
        }

        let updated = self
            .entries
            .update(entry.id, patch)
            .await?
            .ok_or_else(|| EngineError::entry_not_found(entry.id))?;

        if entry.recurring && !updated.recurring {
            let removed = self.exceptions.delete_all_for_entry(entry.id).await?;
            tracing::info!(entry_id = %entry.id, removed, "series made non-recurring; exceptions removed");
        } else if let (Some(old_rule), Some(new_rule)) = (&old_rule, &new_rule) {
            if old_rule.anchor != new_rule.anchor {
                self.reanchor_exceptions(entry.id, old_rule, new_rule).await?;
            }
        }

        tracing::info!(entry_id = %updated.id, "updated series");
        Ok(UpdateOutcome::Series(updated))
    }

    async fn reanchor_exceptions(
        &self,
        entry_id: Uuid,
        old_rule: &RecurrenceRule,
        new_rule: &RecurrenceRule,
    ) -> Result<()> {
        let existing = self.exceptions.find_all_for_entry(entry_id).await?;
        for exception in &existing {
            let shifted = reanchor_exception(exception, old_rule, new_rule)?;
            self.exceptions
                .update_timing(exception.id, shifted.timing())
                .await?
                .ok_or_else(|| EngineError::exception_not_found(exception.id))?;
        }
        tracing::info!(
            %entry_id,
            count = existing.len(),
            from = %old_rule.anchor,
            to = %new_rule.anchor,
            "reanchored exceptions"
        );
        Ok(())
    }

    async fn update_occurrence(
        &self,
        entry: CalendarEntry,
        instant: DateTime<Utc>,
        update: EntryUpdate,
    ) -> Result<UpdateOutcome> {
        let candidates = self
            .exceptions
            .find_matching_at_instant(entry.id, instant)
            .await?;

        if let Some(existing) = select_most_recent(candidates) {
            let start = update.start_time_utc.unwrap_or(existing.start_time_utc);
            let end = update
                .end_time_utc
                .or(existing.end_time_utc)
                .unwrap_or_else(|| time::apply_duration(start, entry.duration_ms()));
            validate_times(start, end)?;
            let fields = ExceptionFields {
                title: update
                    .title
                    .or(existing.title)
                    .unwrap_or_else(|| entry.title.clone()),
                description: update.description.or(existing.description),
                all_day: update.all_day.or(existing.all_day).unwrap_or(entry.all_day),
                start_time_utc: start,
                end_time_utc: end,
            };
            let modified = self
                .exceptions
                .update_modification(existing.id, fields)
                .await?
                .ok_or_else(|| EngineError::exception_not_found(existing.id))?;
            tracing::info!(entry_id = %entry.id, exception_id = %modified.id, "edited modified occurrence");
            return Ok(UpdateOutcome::Occurrence(modified));
        }

        let original = self.resolve_generated_instant(&entry, instant)?;
        let start = update.start_time_utc.unwrap_or(original);
        let end = update
            .end_time_utc
            .unwrap_or_else(|| time::apply_duration(start, entry.duration_ms()));
        validate_times(start, end)?;
        let fields = ExceptionFields {
            title: update.title.unwrap_or_else(|| entry.title.clone()),
            description: update.description.or_else(|| entry.description.clone()),
            all_day: update.all_day.unwrap_or(entry.all_day),
            start_time_utc: start,
            end_time_utc: end,
        };

        self.exceptions
            .create_deletion_marker(entry.id, original)
            .await?;
        let modified = self
            .exceptions
            .create_modification(entry.id, original, fields)
            .await?;
        tracing::info!(
            entry_id = %entry.id,
            exception_id = %modified.id,
            %original,
            "first edit of occurrence"
        );
        Ok(UpdateOutcome::Occurrence(modified))
    }

    async fn delete_series(&self, id: Uuid) -> Result<DeleteOutcome> {
        if !self.entries.delete(id).await? {
            return Err(EngineError::entry_not_found(id));
        }
        let exceptions_removed = self.exceptions.delete_all_for_entry(id).await?;
        tracing::info!(entry_id = %id, exceptions_removed, "deleted entry");
        Ok(DeleteOutcome::Series {
            entry_id: id,
            exceptions_removed,
        })
    }

    async fn delete_occurrence(
        &self,
        entry: CalendarEntry,
        instant: DateTime<Utc>,
    ) -> Result<DeleteOutcome> {
        let candidates = self
            .exceptions
            .find_matching_at_instant(entry.id, instant)
            .await?;

        if let Some(existing) = select_most_recent(candidates) {
            if !self.exceptions.delete_exception(existing.id).await? {
                return Err(EngineError::exception_not_found(existing.id));
            }
            tracing::info!(entry_id = %entry.id, exception_id = %existing.id, "removed modified occurrence");
            return Ok(DeleteOutcome::ModificationRemoved {
                exception_id: existing.id,
            });
        }

        let original = self.resolve_generated_instant(&entry, instant)?;
        let marker = self
            .exceptions
            .create_deletion_marker(entry.id, original)
            .await?;
        tracing::info!(entry_id = %entry.id, %original, "suppressed occurrence");
        Ok(DeleteOutcome::OccurrenceSuppressed(marker))
    }

    /// Snap a client-supplied instant to the generated occurrence it refers
    /// to, so deletion markers always carry an exact generated instant.
    /// Falls back to the instant as given when no occurrence is within
    /// [`MATCH_TOLERANCE`](crate::time::MATCH_TOLERANCE).
    fn resolve_generated_instant(
        &self,
        entry: &CalendarEntry,
        instant: DateTime<Utc>,
    ) -> Result<DateTime<Utc>> {
        let pattern = entry.recurrence_pattern.as_deref().ok_or_else(|| {
            EngineError::MalformedPattern(format!("entry {} has no recurrence pattern", entry.id))
        })?;
        let rule = RecurrenceRule::parse(pattern)?;
        let (window_start, window_end) = time::tolerance_window(instant);
        let nearest = rule
            .occurrences_between(window_start, window_end, self.config.max_occurrences)?
            .into_iter()
            .min_by_key(|t| (*t - instant).abs());
        Ok(nearest.unwrap_or(instant))
    }
}

fn validate_times(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<()> {
    if time::duration_ms(start, end) < 0 {
        return Err(EngineError::Validation(format!(
            "end {} is before start {}",
            end, start
        )));
    }
    Ok(())
}

fn require_recurrence(
    frequency: Option<Frequency>,
    ends: Option<DateTime<Utc>>,
) -> Result<(Frequency, DateTime<Utc>)> {
    match (frequency, ends) {
        (Some(frequency), Some(ends)) => Ok((frequency, ends)),
        (None, _) => Err(EngineError::Validation(
            "a recurring entry requires a frequency".to_string(),
        )),
        (_, None) => Err(EngineError::Validation(
            "a recurring entry requires a recurrence end".to_string(),
        )),
    }
}

fn scope_required(id: Uuid) -> EngineError {
    EngineError::Validation(format!(
        "entry {} is recurring; applyToSeries is required",
        id
    ))
}
