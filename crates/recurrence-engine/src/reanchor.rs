//! Moving exceptions along with a rescheduled series.
//!
//! Exceptions point at a calendar occurrence, not at an absolute instant.
//! When a series is rescheduled, an exception on the k-th occurrence of the
//! old rule moves to the k-th occurrence of the new rule: a deletion marker
//! for the second occurrence of a weekly Wednesday 23:30 series still
//! suppresses the second occurrence after the series moves to Thursday 00:30.
//! A modification keeps its offset from the occurrence it replaces. Titles
//! and descriptions of modified exceptions are not touched.

use chrono::Duration;

use crate::error::Result;
use crate::model::EntryException;
use crate::rule::RecurrenceRule;

/// Return `exception` moved from its occurrence under `old_rule` to the
/// occurrence at the same position under `new_rule`.
///
/// An exception that matches no occurrence of `old_rule`, or whose position
/// is past the end of `new_rule`, is shifted by the anchor delta instead.
///
/// # Errors
/// Returns `EngineError::MalformedPattern` if either rule cannot be
/// evaluated.
pub fn reanchor_exception(
    exception: &EntryException,
    old_rule: &RecurrenceRule,
    new_rule: &RecurrenceRule,
) -> Result<EntryException> {
    let target = match old_rule.occurrence_index(exception.original_start_utc)? {
        Some(index) => new_rule.nth_occurrence(index)?,
        None => None,
    };
    let delta = match target {
        Some(new_original) => new_original - exception.original_start_utc,
        None => new_rule.anchor - old_rule.anchor,
    };
    Ok(shift_exception(exception, delta))
}

fn shift_exception(exception: &EntryException, delta: Duration) -> EntryException {
    let mut shifted = exception.clone();
    shifted.original_start_utc = exception.original_start_utc + delta;
    shifted.start_time_utc = exception.start_time_utc + delta;
    shifted.end_time_utc = exception.end_time_utc.map(|end| end + delta);
    shifted
}
