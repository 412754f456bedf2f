//! Occurrence expansion -- turns a recurring entry into the concrete
//! occurrences of a `[window_start, window_end)` query window, folding in the
//! entry's deletion markers and modified exceptions.

use std::collections::HashSet;

use chrono::{DateTime, Utc};

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::model::{CalendarEntry, Occurrence};
use crate::rule::RecurrenceRule;
use crate::store::ExceptionStore;

/// Expand a recurring entry within `[window_start, window_end)`.
///
/// The result is the generated occurrences (ascending, deletion markers
/// removed) followed by the modified exceptions whose new start lies in the
/// window, in store order. The two groups are not merged or sorted; use
/// [`sort_chronologically`] for a global order.
///
/// Deletion markers are matched on the exact instant. They are only ever
/// written from generated instants, so no tolerance applies here.
///
/// # Errors
/// Returns `EngineError::Validation` if the entry is not recurring or the
/// window holds more than `config.max_occurrences` occurrences,
/// `EngineError::MalformedPattern` if its pattern is missing or corrupt, and
/// `EngineError::Storage` if the exception store fails.
pub async fn expand<X>(
    entry: &CalendarEntry,
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
    exceptions: &X,
    config: &EngineConfig,
) -> Result<Vec<Occurrence>>
where
    X: ExceptionStore + ?Sized,
{
    if !entry.recurring {
        return Err(EngineError::Validation(format!(
            "entry {} is not recurring",
            entry.id
        )));
    }

    let duration_ms = entry.duration_ms();
    let pattern = entry.recurrence_pattern.as_deref().ok_or_else(|| {
        EngineError::MalformedPattern(format!("entry {} has no recurrence pattern", entry.id))
    })?;
    let rule = RecurrenceRule::parse(pattern)?;

    let instants = match entry.recurrence_ends_utc {
        Some(ends) if ends < entry.start_time_utc => Vec::new(),
        Some(ends) => rule
            .occurrences_between(window_start, window_end, config.max_occurrences)?
            .into_iter()
            .filter(|t| *t <= ends)
            .collect(),
        None => rule.occurrences_between(window_start, window_end, config.max_occurrences)?,
    };

    let deleted: HashSet<DateTime<Utc>> = exceptions
        .find_deletion_markers(entry.id)
        .await?
        .into_iter()
        .collect();

    let mut occurrences: Vec<Occurrence> = instants
        .into_iter()
        .filter(|t| !deleted.contains(t))
        .map(|t| Occurrence::generated(entry, t, duration_ms))
        .collect();
    let generated = occurrences.len();

    let modified = exceptions
        .find_modified(entry.id, window_start, window_end)
        .await?;
    occurrences.extend(modified.iter().map(|ex| Occurrence::modified(entry, ex)));

    tracing::debug!(
        entry_id = %entry.id,
        %window_start,
        %window_end,
        generated,
        modified = modified.len(),
        suppressed = deleted.len(),
        "expanded recurring entry"
    );

    Ok(occurrences)
}

/// Whether a recurring entry can have occurrences in `[window_start, window_end)`.
///
/// A series that started before the window still contributes while its
/// recurrence end is at or after `window_start`. A series starting at or
/// after `window_end`, or ending before `window_start`, contributes nothing.
pub fn contributes_to_window(
    entry: &CalendarEntry,
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
) -> bool {
    entry.recurring
        && entry.start_time_utc < window_end
        && entry
            .recurrence_ends_utc
            .is_some_and(|ends| ends >= window_start && ends >= entry.start_time_utc)
}

/// Sort occurrences by start, then end, then parent id.
pub fn sort_chronologically(occurrences: &mut [Occurrence]) {
    occurrences.sort_by(|a, b| {
        (a.start_time_utc, a.end_time_utc, a.parent_id).cmp(&(
            b.start_time_utc,
            b.end_time_utc,
            b.parent_id,
        ))
    });
}
