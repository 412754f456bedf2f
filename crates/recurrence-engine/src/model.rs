//! Calendar entries, per-occurrence exceptions and materialized occurrences.
//!
//! All types serialize with camelCase field names and RFC 3339 instants.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::rule::Frequency;
use crate::time;

/// A scheduled activity, optionally recurring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalendarEntry {
    pub id: Uuid,
    pub creator_id: Uuid,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub all_day: bool,
    pub start_time_utc: DateTime<Utc>,
    pub end_time_utc: DateTime<Utc>,
    #[serde(default)]
    pub recurring: bool,
    #[serde(default)]
    pub frequency: Option<Frequency>,
    /// Inclusive upper bound for generated occurrences.
    #[serde(default)]
    pub recurrence_ends_utc: Option<DateTime<Utc>>,
    /// Canonical rule string, derived from start/frequency/recurrence end.
    #[serde(default)]
    pub recurrence_pattern: Option<String>,
}

impl CalendarEntry {
    /// Length of every occurrence, in milliseconds.
    pub fn duration_ms(&self) -> i64 {
        time::duration_ms(self.start_time_utc, self.end_time_utc)
    }
}

/// Creation input. The recurrence pattern is derived, never supplied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewEntry {
    pub creator_id: Uuid,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub all_day: bool,
    pub start_time_utc: DateTime<Utc>,
    pub end_time_utc: DateTime<Utc>,
    #[serde(default)]
    pub recurring: bool,
    #[serde(default)]
    pub frequency: Option<Frequency>,
    #[serde(default)]
    pub recurrence_ends_utc: Option<DateTime<Utc>>,
}

/// Caller-facing partial update. `None` leaves a field untouched.
///
/// Applied to the series (`Scope::Series`) it edits the entry; applied to one
/// occurrence it edits that occurrence's exception, where only the title,
/// description, all-day flag and times are meaningful.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EntryUpdate {
    pub title: Option<String>,
    pub description: Option<String>,
    pub all_day: Option<bool>,
    pub start_time_utc: Option<DateTime<Utc>>,
    pub end_time_utc: Option<DateTime<Utc>>,
    pub recurring: Option<bool>,
    pub frequency: Option<Frequency>,
    pub recurrence_ends_utc: Option<DateTime<Utc>>,
}

/// Store-level patch. The outer `Option` means "leave untouched"; an inner
/// `None` clears an optional field.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntryPatch {
    pub title: Option<String>,
    pub description: Option<Option<String>>,
    pub all_day: Option<bool>,
    pub start_time_utc: Option<DateTime<Utc>>,
    pub end_time_utc: Option<DateTime<Utc>>,
    pub recurring: Option<bool>,
    pub frequency: Option<Option<Frequency>>,
    pub recurrence_ends_utc: Option<Option<DateTime<Utc>>>,
    pub recurrence_pattern: Option<Option<String>>,
}

impl EntryPatch {
    /// Apply the patch to an entry in place.
    pub fn apply_to(&self, entry: &mut CalendarEntry) {
        if let Some(title) = &self.title {
            entry.title = title.clone();
        }
        if let Some(description) = &self.description {
            entry.description = description.clone();
        }
        if let Some(all_day) = self.all_day {
            entry.all_day = all_day;
        }
        if let Some(start) = self.start_time_utc {
            entry.start_time_utc = start;
        }
        if let Some(end) = self.end_time_utc {
            entry.end_time_utc = end;
        }
        if let Some(recurring) = self.recurring {
            entry.recurring = recurring;
        }
        if let Some(frequency) = self.frequency {
            entry.frequency = frequency;
        }
        if let Some(ends) = self.recurrence_ends_utc {
            entry.recurrence_ends_utc = ends;
        }
        if let Some(pattern) = &self.recurrence_pattern {
            entry.recurrence_pattern = pattern.clone();
        }
    }
}

impl From<&EntryUpdate> for EntryPatch {
    fn from(update: &EntryUpdate) -> Self {
        EntryPatch {
            title: update.title.clone(),
            description: update.description.clone().map(Some),
            all_day: update.all_day,
            start_time_utc: update.start_time_utc,
            end_time_utc: update.end_time_utc,
            recurring: update.recurring,
            frequency: update.frequency.map(Some),
            recurrence_ends_utc: update.recurrence_ends_utc.map(Some),
            recurrence_pattern: None,
        }
    }
}

/// A deviation from one occurrence of a recurring series.
///
/// `start_time_utc` is the matching key. For a deletion marker it is the
/// suppressed occurrence instant; for a modification it is the replacement
/// occurrence's start. `deleted` and `modified` are never both set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryException {
    pub id: Uuid,
    /// Parent entry. Lookup only; the exception does not own it.
    pub entry_id: Uuid,
    /// Generated occurrence this record was created for.
    pub original_start_utc: DateTime<Utc>,
    pub start_time_utc: DateTime<Utc>,
    #[serde(default)]
    pub end_time_utc: Option<DateTime<Utc>>,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default)]
    pub modified: bool,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub all_day: Option<bool>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl EntryException {
    pub fn deletion_marker(entry_id: Uuid, instant: DateTime<Utc>) -> Self {
        EntryException {
            id: Uuid::new_v4(),
            entry_id,
            original_start_utc: instant,
            start_time_utc: instant,
            end_time_utc: None,
            deleted: true,
            modified: false,
            title: None,
            description: None,
            all_day: None,
            created_at: Utc::now(),
        }
    }

    pub fn modification(
        entry_id: Uuid,
        original_instant: DateTime<Utc>,
        fields: ExceptionFields,
    ) -> Self {
        EntryException {
            id: Uuid::new_v4(),
            entry_id,
            original_start_utc: original_instant,
            start_time_utc: fields.start_time_utc,
            end_time_utc: Some(fields.end_time_utc),
            deleted: false,
            modified: true,
            title: Some(fields.title),
            description: fields.description,
            all_day: Some(fields.all_day),
            created_at: Utc::now(),
        }
    }

    /// Overwrite the modified fields in place.
    pub fn apply_fields(&mut self, fields: ExceptionFields) {
        self.title = Some(fields.title);
        self.description = fields.description;
        self.all_day = Some(fields.all_day);
        self.start_time_utc = fields.start_time_utc;
        self.end_time_utc = Some(fields.end_time_utc);
    }

    pub fn apply_timing(&mut self, timing: ExceptionTiming) {
        self.original_start_utc = timing.original_start_utc;
        self.start_time_utc = timing.start_time_utc;
        self.end_time_utc = timing.end_time_utc;
    }

    pub fn timing(&self) -> ExceptionTiming {
        ExceptionTiming {
            original_start_utc: self.original_start_utc,
            start_time_utc: self.start_time_utc,
            end_time_utc: self.end_time_utc,
        }
    }
}

/// Content of a modified occurrence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExceptionFields {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub all_day: bool,
    pub start_time_utc: DateTime<Utc>,
    pub end_time_utc: DateTime<Utc>,
}

/// The instants of an exception, rewritten together when a series is
/// rescheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExceptionTiming {
    pub original_start_utc: DateTime<Utc>,
    pub start_time_utc: DateTime<Utc>,
    pub end_time_utc: Option<DateTime<Utc>>,
}

/// One concrete occurrence, materialized for a query. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Occurrence {
    pub parent_id: Uuid,
    pub creator_id: Uuid,
    /// The parent entry's own start (the series anchor).
    pub series_start: DateTime<Utc>,
    pub title: String,
    pub description: Option<String>,
    pub all_day: bool,
    pub start_time_utc: DateTime<Utc>,
    pub end_time_utc: DateTime<Utc>,
    pub recurring: bool,
    pub frequency: Option<Frequency>,
    pub recurrence_ends_utc: Option<DateTime<Utc>>,
    /// Set when this occurrence comes from a modified exception.
    pub exception_id: Option<Uuid>,
}

impl Occurrence {
    /// The generated occurrence of `entry` starting at `start`.
    pub fn generated(entry: &CalendarEntry, start: DateTime<Utc>, duration_ms: i64) -> Self {
        Occurrence {
            parent_id: entry.id,
            creator_id: entry.creator_id,
            series_start: entry.start_time_utc,
            title: entry.title.clone(),
            description: entry.description.clone(),
            all_day: entry.all_day,
            start_time_utc: start,
            end_time_utc: time::apply_duration(start, duration_ms),
            recurring: true,
            frequency: entry.frequency,
            recurrence_ends_utc: entry.recurrence_ends_utc,
            exception_id: None,
        }
    }

    /// A modified occurrence: the exception's content with the parent's
    /// recurrence metadata.
    pub fn modified(entry: &CalendarEntry, exception: &EntryException) -> Self {
        let start = exception.start_time_utc;
        Occurrence {
            parent_id: entry.id,
            creator_id: entry.creator_id,
            series_start: entry.start_time_utc,
            title: exception.title.clone().unwrap_or_else(|| entry.title.clone()),
            description: exception.description.clone(),
            all_day: exception.all_day.unwrap_or(entry.all_day),
            start_time_utc: start,
            end_time_utc: exception
                .end_time_utc
                .unwrap_or_else(|| time::apply_duration(start, entry.duration_ms())),
            recurring: true,
            frequency: entry.frequency,
            recurrence_ends_utc: entry.recurrence_ends_utc,
            exception_id: Some(exception.id),
        }
    }

    /// A non-recurring entry, or a recurring one viewed as its series head.
    pub fn from_entry(entry: &CalendarEntry) -> Self {
        Occurrence {
            parent_id: entry.id,
            creator_id: entry.creator_id,
            series_start: entry.start_time_utc,
            title: entry.title.clone(),
            description: entry.description.clone(),
            all_day: entry.all_day,
            start_time_utc: entry.start_time_utc,
            end_time_utc: entry.end_time_utc,
            recurring: entry.recurring,
            frequency: entry.frequency,
            recurrence_ends_utc: entry.recurrence_ends_utc,
            exception_id: None,
        }
    }
}
