//! Property tests for the two lifecycle computation paths.
//!
//! 1. Idempotence: the same snapshot always yields identical tables.
//! 2. Agreement: the overlap path and the event index count the same grants
//!    for every (group, year) bucket and every sampled day.
//! 3. Step shape: the index value only changes on event dates.
//! 4. Clipping: no terminated grant is active after the clip date.

use proptest::prelude::*;

use chrono::{Duration, NaiveDate};
use grantscope::{
    time_series, yearly_snapshot, ActiveIntervalIndex, CalendarStep, GrantRecord, Grouping,
    Pipeline, PipelineConfig, SnapshotSpec, YearRange,
};

const STATES: [(&str, &str); 4] = [
    ("CA", "California"),
    ("NY", "New York"),
    ("TX", "Texas"),
    ("PR", "Puerto Rico"),
];

fn base() -> NaiveDate {
    NaiveDate::from_ymd_opt(2018, 1, 1).unwrap()
}

fn clip() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 12, 31).unwrap()
}

// =============================================================================
// Strategy helpers
// =============================================================================

/// Grants starting between 2018 and ~2026 lasting up to ~12 years, so that
/// plenty of terminated windows cross the clip date.
fn record_strategy() -> impl Strategy<Value = GrantRecord> {
    (0i64..3_000, 0i64..4_500, 0usize..STATES.len(), any::<bool>(), 0u32..2_000)
        .prop_map(|(start_offset, length, state, terminated, amount)| {
            let start = base() + Duration::days(start_offset);
            let end = start + Duration::days(length);
            let (code, name) = STATES[state];
            GrantRecord::new(format!("g{start_offset}-{length}"), start, end)
                .with_state(code, name)
                .with_amount(f64::from(amount) * 1_000.0)
                .terminated(terminated)
        })
}

fn records_strategy() -> impl Strategy<Value = Vec<GrantRecord>> {
    prop::collection::vec(record_strategy(), 0..60)
}

fn spec() -> SnapshotSpec {
    SnapshotSpec {
        grouping: Grouping::State,
        years: YearRange::new(2020, 2025),
        clip_date: clip(),
        restrict_to: None,
    }
}

proptest! {
    #[test]
    fn prop_pipeline_is_idempotent(records in records_strategy()) {
        let pipeline = Pipeline::new(PipelineConfig::default()).unwrap();
        let first = serde_json::to_vec(&pipeline.run(&records).unwrap()).unwrap();
        let second = serde_json::to_vec(&pipeline.run(&records).unwrap()).unwrap();
        prop_assert_eq!(first, second);
    }

    #[test]
    fn prop_overlap_path_agrees_with_index(records in records_strategy()) {
        let index = ActiveIntervalIndex::build(&records, Grouping::State, clip());
        let rows = yearly_snapshot(&records, &spec());

        for row in &rows {
            let from = NaiveDate::from_ymd_opt(row.year, 1, 1).unwrap();
            let to = NaiveDate::from_ymd_opt(row.year, 12, 31).unwrap();
            prop_assert_eq!(row.active_count, index.active_during(&row.group, from, to));
        }

        let yearly_total: u64 = rows.iter().filter(|r| r.year == 2023).map(|r| r.active_count).sum();
        let index_total: u64 = index
            .groups()
            .map(|k| index.active_during(&k.0, spec().years.start_of(2023).unwrap(), spec().years.end_of(2023).unwrap()))
            .sum();
        prop_assert_eq!(yearly_total, index_total);
    }

    #[test]
    fn prop_single_day_buckets_match_active_at(records in records_strategy(), day in 0i64..3_000) {
        let at = base() + Duration::days(day);
        let index = ActiveIntervalIndex::build(&records, Grouping::State, clip());

        for (code, _) in STATES {
            let direct = records
                .iter()
                .filter(|r| r.state_code.as_deref() == Some(code))
                .filter_map(|r| r.active_window(clip()))
                .filter(|w| w.contains(at))
                .count() as u64;
            prop_assert_eq!(index.active_at(code, at), direct);
            prop_assert_eq!(index.active_during(code, at, at), direct);
        }
    }

    #[test]
    fn prop_index_is_constant_between_events(records in records_strategy()) {
        let index = ActiveIntervalIndex::build(&records, Grouping::State, clip());
        for key in index.groups() {
            let events = index.events(&key.0);
            for pair in events.windows(2) {
                let value = index.active_at(&key.0, pair[0].date);
                let last_day = pair[1].date - Duration::days(1);
                prop_assert_eq!(index.active_at(&key.0, last_day), value);
                prop_assert_ne!(index.active_at(&key.0, pair[1].date), value);
            }
            if let Some(last) = events.last() {
                prop_assert_eq!(index.active_at(&key.0, last.date), 0);
            }
        }
    }

    #[test]
    fn prop_terminated_grants_vanish_after_clip(records in records_strategy()) {
        let terminated: Vec<GrantRecord> = records.into_iter().filter(|r| r.terminated).collect();
        let index = ActiveIntervalIndex::build(&terminated, Grouping::State, clip());
        let after = clip() + Duration::days(1);
        prop_assert_eq!(index.total_at(after), 0);

        let series = time_series(&index, CalendarStep::Monthly, Some((after, after + Duration::days(400))));
        prop_assert!(series.iter().all(|r| r.active_count == 0));
    }
}

#[test]
fn empty_snapshot_produces_no_rows() {
    let index = ActiveIntervalIndex::build(&[], Grouping::State, clip());
    assert!(yearly_snapshot(&[], &spec()).is_empty());
    assert!(time_series(&index, CalendarStep::Daily, None).is_empty());
}
