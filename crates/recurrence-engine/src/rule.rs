//! Recurrence rule codec -- builds, serializes and parses the canonical
//! recurrence pattern stored on recurring entries, and generates the raw
//! occurrence instants of a rule.
//!
//! The canonical form is a two-line RFC 5545 subset:
//!
//! ```text
//! DTSTART:20230104T144800Z
//! RRULE:FREQ=MONTHLY;UNTIL=20240104T144800Z
//! ```
//!
//! Generation is delegated to the `rrule` crate, evaluated in UTC. Calendar
//! units are added to the anchor's calendar fields, so the hour and minute
//! of every occurrence match the anchor.
//!
//! ## Monthly clamp
//!
//! A monthly rule anchored on day 29, 30 or 31 lands on
//! `min(anchor day, last day of month)`: Jan-31 is followed by Feb-28
//! (Feb-29 in leap years), Mar-31, Apr-30. The canonical form spells this
//! as `BYMONTHDAY=28,..,D;BYSETPOS=-1`. Days 1 to 28 exist in every month
//! and need no clause.
//!
//! ## Sub-second anchors
//!
//! RFC 5545 stops at whole seconds. When the anchor or the end bound carry
//! milliseconds, they are kept in a trailing `X-MILLIS=<anchor>,<until>`
//! parameter and re-applied to every generated instant.

use std::fmt;
use std::ops::ControlFlow;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Duration, NaiveDateTime, SubsecRound, Utc};
use rrule::RRuleSet;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::time;

const ICAL_UTC_FORMAT: &str = "%Y%m%dT%H%M%SZ";

/// Occurrences fetched from the `rrule` crate per query.
const PAGE_SIZE: u16 = 500;

/// How often a recurring entry repeats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    /// +1 calendar day.
    Daily,
    /// +7 calendar days, same weekday.
    Weekly,
    /// +1 calendar month, same day-of-month (clamped, see module docs).
    Monthly,
}

impl Frequency {
    /// The RFC 5545 `FREQ` value.
    pub fn as_rrule(self) -> &'static str {
        match self {
            Frequency::Daily => "DAILY",
            Frequency::Weekly => "WEEKLY",
            Frequency::Monthly => "MONTHLY",
        }
    }

    fn from_rrule(value: &str) -> Option<Self> {
        match value {
            "DAILY" => Some(Frequency::Daily),
            "WEEKLY" => Some(Frequency::Weekly),
            "MONTHLY" => Some(Frequency::Monthly),
            _ => None,
        }
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Frequency::Daily => "daily",
            Frequency::Weekly => "weekly",
            Frequency::Monthly => "monthly",
        };
        f.write_str(name)
    }
}

impl FromStr for Frequency {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "daily" => Ok(Frequency::Daily),
            "weekly" => Ok(Frequency::Weekly),
            "monthly" => Ok(Frequency::Monthly),
            other => Err(EngineError::Validation(format!(
                "unknown frequency '{}' (expected daily, weekly or monthly)",
                other
            ))),
        }
    }
}

/// "Repeat at `frequency`, anchored at `anchor`, through `until` inclusive."
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecurrenceRule {
    pub frequency: Frequency,
    pub anchor: DateTime<Utc>,
    pub until: DateTime<Utc>,
}

/// Build a rule. Both instants are truncated to millisecond precision.
pub fn build_rule(
    frequency: Frequency,
    start: DateTime<Utc>,
    until: DateTime<Utc>,
) -> RecurrenceRule {
    RecurrenceRule {
        frequency,
        anchor: start.trunc_subsecs(3),
        until: until.trunc_subsecs(3),
    }
}

impl RecurrenceRule {
    /// The canonical pattern string.
    pub fn serialize(&self) -> String {
        let mut text = format!(
            "DTSTART:{}\nRRULE:{}",
            self.anchor.format(ICAL_UTC_FORMAT),
            self.rrule_body()
        );
        let anchor_ms = self.anchor.timestamp_subsec_millis();
        let until_ms = self.until.timestamp_subsec_millis();
        if anchor_ms != 0 || until_ms != 0 {
            text.push_str(&format!(";X-MILLIS={},{}", anchor_ms, until_ms));
        }
        text
    }

    /// Parse a canonical pattern string.
    ///
    /// # Errors
    /// Returns `EngineError::MalformedPattern` if the string does not follow
    /// the canonical grammar, including well-formed RFC 5545 text that this
    /// codec would not have produced (extra parts, wrong month-day clause).
    pub fn parse(pattern: &str) -> Result<Self> {
        let text = pattern.trim();
        let malformed = |why: &str| EngineError::MalformedPattern(format!("{}: {:?}", why, text));

        let mut lines = text.lines();
        let (Some(dtstart_line), Some(rrule_line), None) = (lines.next(), lines.next(), lines.next())
        else {
            return Err(malformed("expected DTSTART and RRULE lines"));
        };

        let anchor = dtstart_line
            .strip_prefix("DTSTART:")
            .and_then(parse_ical_utc)
            .ok_or_else(|| malformed("invalid DTSTART"))?;
        let body = rrule_line
            .strip_prefix("RRULE:")
            .ok_or_else(|| malformed("missing RRULE"))?;

        let mut frequency = None;
        let mut until = None;
        let mut millis = (0u32, 0u32);
        for part in body.split(';') {
            let (key, value) = part.split_once('=').ok_or_else(|| malformed("invalid rule part"))?;
            match key {
                "FREQ" => {
                    frequency = Some(
                        Frequency::from_rrule(value).ok_or_else(|| malformed("unsupported FREQ"))?,
                    );
                }
                "UNTIL" => until = Some(parse_ical_utc(value).ok_or_else(|| malformed("invalid UNTIL"))?),
                "X-MILLIS" => millis = parse_millis(value).ok_or_else(|| malformed("invalid X-MILLIS"))?,
                // Derived from the anchor; checked by the canonical comparison below.
                "BYMONTHDAY" | "BYSETPOS" => {}
                _ => return Err(malformed("unsupported rule part")),
            }
        }

        let frequency = frequency.ok_or_else(|| malformed("missing FREQ"))?;
        let until = until.ok_or_else(|| malformed("missing UNTIL"))?;
        let rule = RecurrenceRule {
            frequency,
            anchor: anchor + Duration::milliseconds(i64::from(millis.0)),
            until: until + Duration::milliseconds(i64::from(millis.1)),
        };

        if rule.serialize() != text {
            return Err(malformed("non-canonical pattern"));
        }
        Ok(rule)
    }

    /// Occurrence instants of this rule in `[window_start, window_end)`,
    /// ascending, never after `until`.
    ///
    /// The `rrule` crate is queried page by page, so every occurrence in the
    /// window is returned. An `until` before the anchor yields no
    /// occurrences.
    ///
    /// # Errors
    /// Returns `EngineError::Validation` if the window holds more than
    /// `limit` occurrences, and `EngineError::MalformedPattern` if the
    /// `rrule` crate rejects the rule.
    pub fn occurrences_between(
        &self,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<DateTime<Utc>>> {
        let mut instants = Vec::new();
        let mut exceeded = false;
        self.for_each_between(window_start, window_end, |t| {
            if instants.len() == limit {
                exceeded = true;
                return ControlFlow::Break(());
            }
            instants.push(t);
            ControlFlow::Continue(())
        })?;

        if exceeded {
            tracing::warn!(
                limit,
                frequency = %self.frequency,
                anchor = %self.anchor,
                %window_start,
                %window_end,
                "recurrence expansion exceeds occurrence limit"
            );
            return Err(EngineError::Validation(format!(
                "window {} to {} holds more than {} occurrences",
                window_start, window_end, limit
            )));
        }
        Ok(instants)
    }

    /// Zero-based position of the occurrence within
    /// [`MATCH_TOLERANCE`](crate::time::MATCH_TOLERANCE) of
    /// `instant`, or `None` when no occurrence is that close.
    ///
    /// # Errors
    /// Returns `EngineError::MalformedPattern` if the `rrule` crate rejects
    /// the rule.
    pub fn occurrence_index(&self, instant: DateTime<Utc>) -> Result<Option<usize>> {
        let (_, search_end) = time::tolerance_window(instant);
        let mut best: Option<(usize, Duration)> = None;
        let mut index = 0;
        self.for_each_between(self.anchor, search_end, |t| {
            let distance = (t - instant).abs();
            if time::within_tolerance(t, instant) && best.is_none_or(|(_, d)| distance < d) {
                best = Some((index, distance));
            }
            index += 1;
            ControlFlow::Continue(())
        })?;
        Ok(best.map(|(index, _)| index))
    }

    /// The occurrence at zero-based position `index`, or `None` when the
    /// rule ends first.
    ///
    /// # Errors
    /// Returns `EngineError::MalformedPattern` if the `rrule` crate rejects
    /// the rule.
    pub fn nth_occurrence(&self, index: usize) -> Result<Option<DateTime<Utc>>> {
        let mut seen = 0;
        let mut found = None;
        self.for_each_between(self.anchor, self.until + Duration::milliseconds(1), |t| {
            if seen == index {
                found = Some(t);
                return ControlFlow::Break(());
            }
            seen += 1;
            ControlFlow::Continue(())
        })?;
        Ok(found)
    }

    /// Feed every occurrence in `[window_start, window_end)` to `visit`, in
    /// ascending order, until it breaks.
    fn for_each_between<F>(
        &self,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
        mut visit: F,
    ) -> Result<()>
    where
        F: FnMut(DateTime<Utc>) -> ControlFlow<()>,
    {
        if self.until < self.anchor || window_start >= window_end {
            return Ok(());
        }

        // The rrule crate works in whole seconds. Generate on the truncated
        // anchor and shift each instant by the anchor's millisecond offset.
        let offset = Duration::milliseconds(i64::from(self.anchor.timestamp_subsec_millis()));
        let rrule_text = format!(
            "DTSTART:{}\nRRULE:{}",
            self.anchor.format(ICAL_UTC_FORMAT),
            self.rrule_body()
        );
        let rrule_set: RRuleSet = rrule_text
            .parse()
            .map_err(|e| EngineError::MalformedPattern(format!("{}", e)))?;

        // `after`/`before` boundary inclusivity is not relied on: widen by a
        // second and filter exactly below.
        let before = (window_end - offset).with_timezone(&rrule::Tz::UTC);
        let mut cursor = window_start - offset - Duration::seconds(1);
        let mut last_seen: Option<DateTime<Utc>> = None;
        loop {
            let page = rrule_set
                .clone()
                .after(cursor.with_timezone(&rrule::Tz::UTC))
                .before(before)
                .all(PAGE_SIZE);
            let full_page = page.dates.len() >= usize::from(PAGE_SIZE);
            let Some(page_last) = page.dates.last().map(|dt| dt.with_timezone(&Utc)) else {
                return Ok(());
            };

            for raw in page.dates {
                let t = raw.with_timezone(&Utc) + offset;
                if last_seen.is_some_and(|seen| t <= seen) {
                    continue;
                }
                last_seen = Some(t);
                if t > self.until {
                    return Ok(());
                }
                if t < window_start || t >= window_end {
                    continue;
                }
                if visit(t).is_break() {
                    return Ok(());
                }
            }

            if !full_page {
                return Ok(());
            }
            cursor = page_last + Duration::seconds(1);
        }
    }

    /// The `RRULE:` value without the millisecond extension.
    fn rrule_body(&self) -> String {
        let mut body = format!(
            "FREQ={};UNTIL={}",
            self.frequency.as_rrule(),
            self.until.format(ICAL_UTC_FORMAT)
        );
        if let Some(clause) = self.month_day_clause() {
            body.push(';');
            body.push_str(&clause);
        }
        body
    }

    fn month_day_clause(&self) -> Option<String> {
        let day = self.anchor.day();
        if self.frequency != Frequency::Monthly || day < 29 {
            return None;
        }
        let days: Vec<String> = (28..=day).map(|d| d.to_string()).collect();
        Some(format!("BYMONTHDAY={};BYSETPOS=-1", days.join(",")))
    }
}

impl fmt::Display for RecurrenceRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.serialize())
    }
}

impl FromStr for RecurrenceRule {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        RecurrenceRule::parse(s)
    }
}

fn parse_ical_utc(value: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(value, ICAL_UTC_FORMAT)
        .ok()
        .map(|ndt| ndt.and_utc())
}

fn parse_millis(value: &str) -> Option<(u32, u32)> {
    let (anchor, until) = value.split_once(',')?;
    let anchor: u32 = anchor.parse().ok()?;
    let until: u32 = until.parse().ok()?;
    (anchor < 1000 && until < 1000).then_some((anchor, until))
}

