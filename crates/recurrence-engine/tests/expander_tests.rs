//! Tests for window expansion with deletion markers and modified exceptions.

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use recurrence_engine::error::{EngineError, StoreError};
use recurrence_engine::model::{
    CalendarEntry, EntryException, ExceptionFields, ExceptionTiming, Occurrence,
};
use recurrence_engine::rule::{build_rule, Frequency};
use recurrence_engine::store::{ExceptionStore, StoreResult};
use recurrence_engine::{
    contributes_to_window, expand, sort_chronologically, EngineConfig, InMemoryExceptionStore,
};
use uuid::Uuid;

fn utc(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
}

fn series(frequency: Frequency, start: DateTime<Utc>, end: DateTime<Utc>, ends: DateTime<Utc>) -> CalendarEntry {
    CalendarEntry {
        id: Uuid::new_v4(),
        creator_id: Uuid::new_v4(),
        title: "Standup".to_string(),
        description: Some("daily sync".to_string()),
        all_day: false,
        start_time_utc: start,
        end_time_utc: end,
        recurring: true,
        frequency: Some(frequency),
        recurrence_ends_utc: Some(ends),
        recurrence_pattern: Some(build_rule(frequency, start, ends).serialize()),
    }
}

/// The monthly entry used throughout: Jan-4 14:48, 24h long, through Jan-4 2024.
fn monthly_entry() -> CalendarEntry {
    series(
        Frequency::Monthly,
        utc(2023, 1, 4, 14, 48),
        utc(2023, 1, 5, 14, 48),
        utc(2024, 1, 4, 14, 48),
    )
}

fn weekly_entry() -> CalendarEntry {
    series(
        Frequency::Weekly,
        utc(2023, 1, 4, 14, 48),
        utc(2023, 1, 4, 15, 48),
        utc(2024, 1, 4, 14, 48),
    )
}

fn starts(occurrences: &[Occurrence]) -> Vec<DateTime<Utc>> {
    occurrences.iter().map(|o| o.start_time_utc).collect()
}

// ---------------------------------------------------------------------------
// Worked scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn monthly_scenario_yields_two_day_long_occurrences() {
    let entry = monthly_entry();
    let store = InMemoryExceptionStore::new();

    let occurrences = expand(
        &entry,
        utc(2023, 1, 1, 0, 0),
        utc(2023, 2, 12, 0, 0),
        &store,
        &EngineConfig::default(),
    )
    .await
    .unwrap();

    assert_eq!(starts(&occurrences), vec![utc(2023, 1, 4, 14, 48), utc(2023, 2, 4, 14, 48)]);
    for o in &occurrences {
        assert_eq!(o.end_time_utc - o.start_time_utc, Duration::hours(24));
        assert_eq!(o.parent_id, entry.id);
        assert_eq!(o.series_start, entry.start_time_utc);
        assert!(o.recurring);
        assert_eq!(o.frequency, Some(Frequency::Monthly));
        assert_eq!(o.recurrence_ends_utc, entry.recurrence_ends_utc);
        assert_eq!(o.title, "Standup");
        assert_eq!(o.exception_id, None);
    }
}

#[tokio::test]
async fn deletion_marker_suppresses_exactly_one_occurrence() {
    let entry = weekly_entry();
    let store = InMemoryExceptionStore::new();
    let config = EngineConfig::default();
    let (from, to) = (utc(2023, 1, 1, 0, 0), utc(2024, 1, 5, 0, 0));

    let before = expand(&entry, from, to, &store, &config).await.unwrap();
    assert_eq!(before.len(), 53);

    let second = before[1].start_time_utc;
    assert_eq!(second, utc(2023, 1, 11, 14, 48));
    store.create_deletion_marker(entry.id, second).await.unwrap();

    let after = expand(&entry, from, to, &store, &config).await.unwrap();
    let expected: Vec<_> = starts(&before).into_iter().filter(|t| *t != second).collect();
    assert_eq!(starts(&after), expected);
}

#[tokio::test]
async fn deletion_markers_match_exact_instants_only() {
    let entry = weekly_entry();
    let store = InMemoryExceptionStore::new();
    store
        .create_deletion_marker(entry.id, utc(2023, 1, 11, 14, 48) + Duration::milliseconds(1))
        .await
        .unwrap();

    let occurrences = expand(
        &entry,
        utc(2023, 1, 1, 0, 0),
        utc(2023, 1, 19, 0, 0),
        &store,
        &EngineConfig::default(),
    )
    .await
    .unwrap();
    assert_eq!(occurrences.len(), 3);
}

#[tokio::test]
async fn modified_exceptions_follow_generated_occurrences() {
    let entry = monthly_entry();
    let store = InMemoryExceptionStore::new();
    store
        .create_deletion_marker(entry.id, utc(2023, 2, 4, 14, 48))
        .await
        .unwrap();
    let modified = store
        .create_modification(
            entry.id,
            utc(2023, 2, 4, 14, 48),
            ExceptionFields {
                title: "Moved".to_string(),
                description: None,
                all_day: true,
                start_time_utc: utc(2023, 2, 5, 14, 48),
                end_time_utc: utc(2023, 2, 6, 14, 48),
            },
        )
        .await
        .unwrap();

    let occurrences = expand(
        &entry,
        utc(2023, 1, 1, 0, 0),
        utc(2023, 3, 31, 0, 0),
        &store,
        &EngineConfig::default(),
    )
    .await
    .unwrap();

    // Generated group first, then the modification; no cross-group sort.
    assert_eq!(
        starts(&occurrences),
        vec![utc(2023, 1, 4, 14, 48), utc(2023, 3, 4, 14, 48), utc(2023, 2, 5, 14, 48)]
    );
    let moved = &occurrences[2];
    assert_eq!(moved.title, "Moved");
    assert_eq!(moved.description, None);
    assert!(moved.all_day);
    assert_eq!(moved.end_time_utc, utc(2023, 2, 6, 14, 48));
    assert_eq!(moved.series_start, entry.start_time_utc);
    assert_eq!(moved.frequency, Some(Frequency::Monthly));
    assert_eq!(moved.recurrence_ends_utc, entry.recurrence_ends_utc);
    assert_eq!(moved.exception_id, Some(modified.id));
}

#[tokio::test]
async fn modified_exception_outside_window_is_not_returned() {
    let entry = monthly_entry();
    let store = InMemoryExceptionStore::new();
    store
        .create_modification(
            entry.id,
            utc(2023, 2, 4, 14, 48),
            ExceptionFields {
                title: "Moved".to_string(),
                description: None,
                all_day: false,
                start_time_utc: utc(2023, 3, 20, 9, 0),
                end_time_utc: utc(2023, 3, 20, 10, 0),
            },
        )
        .await
        .unwrap();

    let occurrences = expand(
        &entry,
        utc(2023, 1, 1, 0, 0),
        utc(2023, 3, 20, 9, 0),
        &store,
        &EngineConfig::default(),
    )
    .await
    .unwrap();
    assert!(occurrences.iter().all(|o| o.exception_id.is_none()));
}

// ---------------------------------------------------------------------------
// Boundaries and edge cases
// ---------------------------------------------------------------------------

#[tokio::test]
async fn window_start_is_inclusive_and_end_exclusive() {
    let entry = weekly_entry();
    let store = InMemoryExceptionStore::new();

    let occurrences = expand(
        &entry,
        utc(2023, 1, 11, 14, 48),
        utc(2023, 1, 25, 14, 48),
        &store,
        &EngineConfig::default(),
    )
    .await
    .unwrap();
    assert_eq!(
        starts(&occurrences),
        vec![utc(2023, 1, 11, 14, 48), utc(2023, 1, 18, 14, 48)]
    );
}

#[tokio::test]
async fn recurrence_end_bounds_generation_inclusively() {
    let mut entry = weekly_entry();
    entry.recurrence_ends_utc = Some(utc(2023, 1, 18, 14, 48));
    entry.recurrence_pattern =
        Some(build_rule(Frequency::Weekly, entry.start_time_utc, utc(2023, 1, 18, 14, 48)).serialize());
    let store = InMemoryExceptionStore::new();

    let occurrences = expand(
        &entry,
        utc(2023, 1, 1, 0, 0),
        utc(2023, 12, 31, 0, 0),
        &store,
        &EngineConfig::default(),
    )
    .await
    .unwrap();
    assert_eq!(occurrences.len(), 3);
    assert_eq!(occurrences[2].start_time_utc, utc(2023, 1, 18, 14, 48));
}

#[tokio::test]
async fn recurrence_end_before_start_yields_nothing() {
    let mut entry = weekly_entry();
    entry.recurrence_ends_utc = Some(utc(2022, 12, 1, 0, 0));
    entry.recurrence_pattern =
        Some(build_rule(Frequency::Weekly, entry.start_time_utc, utc(2022, 12, 1, 0, 0)).serialize());
    let store = InMemoryExceptionStore::new();

    let occurrences = expand(
        &entry,
        utc(2022, 1, 1, 0, 0),
        utc(2024, 1, 1, 0, 0),
        &store,
        &EngineConfig::default(),
    )
    .await
    .unwrap();
    assert!(occurrences.is_empty());
}

#[tokio::test]
async fn non_recurring_entry_is_rejected() {
    let mut entry = weekly_entry();
    entry.recurring = false;
    let store = InMemoryExceptionStore::new();

    let err = expand(
        &entry,
        utc(2023, 1, 1, 0, 0),
        utc(2023, 2, 1, 0, 0),
        &store,
        &EngineConfig::default(),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)), "got {:?}", err);
}

#[tokio::test]
async fn missing_or_corrupt_pattern_is_malformed() {
    let store = InMemoryExceptionStore::new();
    let config = EngineConfig::default();

    for pattern in [None, Some("FREQ=WEEKLY".to_string())] {
        let mut entry = weekly_entry();
        entry.recurrence_pattern = pattern;
        let err = expand(&entry, utc(2023, 1, 1, 0, 0), utc(2023, 2, 1, 0, 0), &store, &config)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::MalformedPattern(_)), "got {:?}", err);
    }
}

#[tokio::test]
async fn expansion_is_deterministic() {
    let entry = monthly_entry();
    let store = InMemoryExceptionStore::new();
    store
        .create_deletion_marker(entry.id, utc(2023, 3, 4, 14, 48))
        .await
        .unwrap();
    let config = EngineConfig::default();
    let (from, to) = (utc(2023, 1, 1, 0, 0), utc(2024, 2, 1, 0, 0));

    let first = expand(&entry, from, to, &store, &config).await.unwrap();
    let second = expand(&entry, from, to, &store, &config).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(first.len(), 12);
}

#[tokio::test]
async fn expansion_over_max_occurrences_is_an_error() {
    let entry = series(
        Frequency::Daily,
        utc(2023, 1, 1, 7, 0),
        utc(2023, 1, 1, 7, 30),
        utc(2023, 12, 31, 7, 0),
    );
    let store = InMemoryExceptionStore::new();
    let config = EngineConfig { max_occurrences: 10 };

    let err = expand(&entry, utc(2023, 1, 1, 0, 0), utc(2024, 1, 1, 0, 0), &store, &config)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)), "got {:?}", err);
}

#[tokio::test]
async fn default_config_expands_multi_year_daily_series() {
    let entry = series(
        Frequency::Daily,
        utc(2023, 1, 1, 9, 0),
        utc(2023, 1, 1, 10, 0),
        utc(2026, 1, 1, 9, 0),
    );
    let store = InMemoryExceptionStore::new();

    let occurrences = expand(
        &entry,
        utc(2023, 1, 1, 0, 0),
        utc(2026, 1, 2, 0, 0),
        &store,
        &EngineConfig::default(),
    )
    .await
    .unwrap();
    assert_eq!(occurrences.len(), 1097);
}

// ---------------------------------------------------------------------------
// Storage failures propagate untouched
// ---------------------------------------------------------------------------

struct UnavailableStore;

#[async_trait]
impl ExceptionStore for UnavailableStore {
    async fn find_deletion_markers(&self, _: Uuid) -> StoreResult<Vec<DateTime<Utc>>> {
        Err(StoreError::new("exception store unavailable"))
    }
    async fn find_modified(
        &self,
        _: Uuid,
        _: DateTime<Utc>,
        _: DateTime<Utc>,
    ) -> StoreResult<Vec<EntryException>> {
        Err(StoreError::new("exception store unavailable"))
    }
    async fn find_matching_at_instant(
        &self,
        _: Uuid,
        _: DateTime<Utc>,
    ) -> StoreResult<Vec<EntryException>> {
        Err(StoreError::new("exception store unavailable"))
    }
    async fn find_all_for_entry(&self, _: Uuid) -> StoreResult<Vec<EntryException>> {
        Err(StoreError::new("exception store unavailable"))
    }
    async fn create_deletion_marker(&self, _: Uuid, _: DateTime<Utc>) -> StoreResult<EntryException> {
        Err(StoreError::new("exception store unavailable"))
    }
    async fn create_modification(
        &self,
        _: Uuid,
        _: DateTime<Utc>,
        _: ExceptionFields,
    ) -> StoreResult<EntryException> {
        Err(StoreError::new("exception store unavailable"))
    }
    async fn update_modification(
        &self,
        _: Uuid,
        _: ExceptionFields,
    ) -> StoreResult<Option<EntryException>> {
        Err(StoreError::new("exception store unavailable"))
    }
    async fn update_timing(
        &self,
        _: Uuid,
        _: ExceptionTiming,
    ) -> StoreResult<Option<EntryException>> {
        Err(StoreError::new("exception store unavailable"))
    }
    async fn delete_exception(&self, _: Uuid) -> StoreResult<bool> {
        Err(StoreError::new("exception store unavailable"))
    }
    async fn delete_all_for_entry(&self, _: Uuid) -> StoreResult<usize> {
        Err(StoreError::new("exception store unavailable"))
    }
}

#[tokio::test]
async fn store_failure_surfaces_as_storage_error() {
    let err = expand(
        &monthly_entry(),
        utc(2023, 1, 1, 0, 0),
        utc(2023, 2, 1, 0, 0),
        &UnavailableStore,
        &EngineConfig::default(),
    )
    .await
    .unwrap_err();
    match err {
        EngineError::Storage(inner) => assert_eq!(inner.message, "exception store unavailable"),
        other => panic!("expected storage error, got {:?}", other),
    }
}

// ---------------------------------------------------------------------------
// Fan-out and ordering helpers
// ---------------------------------------------------------------------------

#[test]
fn series_started_before_window_still_contributes() {
    let entry = weekly_entry();
    let (from, to) = (utc(2023, 6, 1, 0, 0), utc(2023, 7, 1, 0, 0));

    assert!(contributes_to_window(&entry, from, to));
    // Recurrence end exactly at window start still counts.
    assert!(contributes_to_window(&entry, utc(2024, 1, 4, 14, 48), utc(2024, 2, 1, 0, 0)));
}

#[test]
fn series_outside_window_does_not_contribute() {
    let entry = weekly_entry();

    // Ended before the window.
    assert!(!contributes_to_window(&entry, utc(2024, 1, 5, 0, 0), utc(2024, 2, 1, 0, 0)));
    // Starts exactly at the window end.
    assert!(!contributes_to_window(&entry, utc(2022, 12, 1, 0, 0), utc(2023, 1, 4, 14, 48)));

    let mut single = entry.clone();
    single.recurring = false;
    assert!(!contributes_to_window(&single, utc(2023, 1, 1, 0, 0), utc(2023, 2, 1, 0, 0)));
}

#[tokio::test]
async fn sort_chronologically_merges_groups() {
    let entry = monthly_entry();
    let store = InMemoryExceptionStore::new();
    store
        .create_deletion_marker(entry.id, utc(2023, 2, 4, 14, 48))
        .await
        .unwrap();
    store
        .create_modification(
            entry.id,
            utc(2023, 2, 4, 14, 48),
            ExceptionFields {
                title: "Moved".to_string(),
                description: None,
                all_day: false,
                start_time_utc: utc(2023, 2, 5, 14, 48),
                end_time_utc: utc(2023, 2, 6, 14, 48),
            },
        )
        .await
        .unwrap();

    let mut occurrences = expand(
        &entry,
        utc(2023, 1, 1, 0, 0),
        utc(2023, 3, 31, 0, 0),
        &store,
        &EngineConfig::default(),
    )
    .await
    .unwrap();
    sort_chronologically(&mut occurrences);
    assert_eq!(
        starts(&occurrences),
        vec![utc(2023, 1, 4, 14, 48), utc(2023, 2, 5, 14, 48), utc(2023, 3, 4, 14, 48)]
    );
}
