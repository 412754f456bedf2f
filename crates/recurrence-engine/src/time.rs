//! UTC instant arithmetic shared by the rule codec, the expander and the
//! orchestrator.
//!
//! Every function takes and returns `DateTime<Utc>` by value; nothing here
//! converts between timezones.

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc};

use crate::error::{EngineError, Result};

/// Tolerance used when matching a client-supplied occurrence instant against
/// a stored exception.
///
/// Instants that round-trip through client string serialization pick up
/// millisecond jitter, so exception lookup matches within one minute either
/// side rather than on exact equality.
pub const MATCH_TOLERANCE: Duration = Duration::minutes(1);

pub fn add_days(instant: DateTime<Utc>, days: i64) -> DateTime<Utc> {
    instant + Duration::days(days)
}

pub fn add_minutes(instant: DateTime<Utc>, minutes: i64) -> DateTime<Utc> {
    instant + Duration::minutes(minutes)
}

/// `end - start` in milliseconds. Negative when `end` precedes `start`;
/// callers validate ordering.
pub fn duration_ms(start: DateTime<Utc>, end: DateTime<Utc>) -> i64 {
    (end - start).num_milliseconds()
}

pub fn apply_duration(anchor: DateTime<Utc>, duration_ms: i64) -> DateTime<Utc> {
    anchor + Duration::milliseconds(duration_ms)
}

/// True when `a` and `b` are at most [`MATCH_TOLERANCE`] apart.
pub fn within_tolerance(a: DateTime<Utc>, b: DateTime<Utc>) -> bool {
    (a - b).abs() <= MATCH_TOLERANCE
}

/// Half-open window `[instant - tol, instant + tol + 1ms)` covering every
/// instant [`within_tolerance`] of `instant`.
pub fn tolerance_window(instant: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    (
        instant - MATCH_TOLERANCE,
        instant + MATCH_TOLERANCE + Duration::milliseconds(1),
    )
}

/// Parse an ISO 8601 boundary parameter into a UTC instant.
///
/// Accepts RFC 3339 (`2023-01-04T14:48:00.000Z`, any offset), a naive
/// datetime (`2023-01-04T14:48:00`, read as UTC) and a bare date
/// (`2023-01-04`, midnight UTC).
pub fn parse_instant(s: &str) -> Result<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    if let Ok(ndt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f") {
        return Ok(ndt.and_utc());
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|ndt| ndt.and_utc())
        .ok_or_else(|| EngineError::Validation(format!("invalid instant '{}'", s)))
}
