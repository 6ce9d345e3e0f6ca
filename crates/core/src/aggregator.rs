//! Time-bucketed aggregation into long-format tables.
//!
//! Two granularities are produced:
//!
//! - [`yearly_snapshot`]: one row per (group, year) from the direct overlap
//!   test over each grant's clipped window.
//! - [`time_series`]: one row per (group, calendar date) sampled from an
//!   [`ActiveIntervalIndex`].
//!
//! Groups are independent, so with the `parallel` feature each group is
//! computed on the rayon pool. Rows are always emitted in ascending group
//! order, then ascending bucket.

use std::collections::BTreeMap;

use chrono::{Datelike, Months, NaiveDate};
#[cfg(feature = "parallel")]
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::{group_grants, ActiveIntervalIndex, GrantRecord, GroupKey, Grouping, UsableGrant};
use crate::{TOTAL_DISPLAY_NAME, TOTAL_KEY};

/// Spacing of time-series sample dates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalendarStep {
    /// Every day.
    Daily,
    /// The first day of every month.
    #[default]
    Monthly,
}

impl CalendarStep {
    /// Sample dates within the inclusive `[start, end]`.
    ///
    /// Monthly sampling begins at the first month start on or after `start`.
    /// An inverted range yields no dates.
    pub fn dates(self, start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
        let mut out = Vec::new();
        let first = match self {
            CalendarStep::Daily => Some(start),
            CalendarStep::Monthly if start.day() == 1 => Some(start),
            CalendarStep::Monthly => start
                .with_day(1)
                .and_then(|d| d.checked_add_months(Months::new(1))),
        };

        let mut cursor = first;
        while let Some(date) = cursor.filter(|d| *d <= end) {
            out.push(date);
            cursor = match self {
                CalendarStep::Daily => date.succ_opt(),
                CalendarStep::Monthly => date.checked_add_months(Months::new(1)),
            };
        }
        out
    }
}

/// Inclusive range of calendar years.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct YearRange {
    pub first: i32,
    pub last: i32,
}

impl YearRange {
    pub fn new(first: i32, last: i32) -> Self {
        Self { first, last }
    }

    pub fn years(&self) -> impl Iterator<Item = i32> {
        self.first..=self.last
    }

    pub fn contains(&self, year: i32) -> bool {
        (self.first..=self.last).contains(&year)
    }

    /// Jan 1 of `year`, or `None` when `year` lies outside the range.
    pub fn start_of(&self, year: i32) -> Option<NaiveDate> {
        if !self.contains(year) {
            return None;
        }
        NaiveDate::from_ymd_opt(year, 1, 1)
    }

    /// Dec 31 of `year`, or `None` when `year` lies outside the range.
    pub fn end_of(&self, year: i32) -> Option<NaiveDate> {
        if !self.contains(year) {
            return None;
        }
        NaiveDate::from_ymd_opt(year, 12, 31)
    }
}

/// What to aggregate for the yearly snapshot table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotSpec {
    pub grouping: Grouping,
    pub years: YearRange,
    pub clip_date: NaiveDate,
    /// When set, exactly these groups are produced, zero-filled if absent
    /// from the data.
    pub restrict_to: Option<Vec<String>>,
}

/// One (group, year) row of the yearly snapshot table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotRow {
    pub group: String,
    pub display_name: String,
    pub year: i32,
    pub active_count: u64,
    /// Non-zero only in the last year of the range.
    pub terminated_count: u64,
    /// `100 * terminated / active`, rounded to 2 decimals; 0 when nothing is active.
    pub terminated_percentage: f64,
    /// Summed amount of grants overlapping the year.
    pub active_funding: f64,
    /// Summed amount of terminated grants, last year only.
    pub terminated_funding: f64,
}

/// One (group, date) row of the time-series table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeriesRow {
    pub date: NaiveDate,
    pub group: String,
    pub display_name: String,
    pub active_count: u64,
}

/// Build the yearly snapshot table with the direct overlap test.
///
/// Terminations are a point-in-time event: the group's terminated grants are
/// attributed to the last year of `spec.years` and to no other year.
pub fn yearly_snapshot(records: &[GrantRecord], spec: &SnapshotSpec) -> Vec<SnapshotRow> {
    let (grouped, _stats) = group_grants(records, spec.grouping, spec.clip_date);

    let targets: Vec<(GroupKey, String, &[UsableGrant])> = match &spec.restrict_to {
        Some(keys) => {
            let mut keys: Vec<&String> = keys.iter().collect();
            keys.sort();
            keys.dedup();
            keys.into_iter()
                .map(|key| match grouped.get(key.as_str()) {
                    Some(group) => (
                        GroupKey(key.clone()),
                        group.display_name.clone(),
                        group.grants.as_slice(),
                    ),
                    None => (GroupKey(key.clone()), key.clone(), &[][..]),
                })
                .collect()
        }
        None => grouped
            .iter()
            .map(|(key, group)| (key.clone(), group.display_name.clone(), group.grants.as_slice()))
            .collect(),
    };

    per_group(&targets, |(key, display_name, grants)| {
        snapshot_rows(key, display_name, grants, spec)
    })
}

fn snapshot_rows(
    key: &GroupKey,
    display_name: &str,
    grants: &[UsableGrant],
    spec: &SnapshotSpec,
) -> Vec<SnapshotRow> {
    let mut rows = Vec::new();
    for year in spec.years.years() {
        let (Some(from), Some(to)) = (spec.years.start_of(year), spec.years.end_of(year)) else {
            continue;
        };

        let mut active_count = 0u64;
        let mut active_funding = 0.0;
        for grant in grants.iter().filter(|g| g.window.overlaps(from, to)) {
            active_count += 1;
            active_funding += grant.amount;
        }

        let (terminated_count, terminated_funding) = if year == spec.years.last {
            grants
                .iter()
                .filter(|g| g.terminated)
                .fold((0u64, 0.0), |(n, amount), g| (n + 1, amount + g.amount))
        } else {
            (0, 0.0)
        };

        rows.push(SnapshotRow {
            group: key.0.clone(),
            display_name: display_name.to_string(),
            year,
            active_count,
            terminated_count,
            terminated_percentage: percentage(terminated_count, active_count),
            active_funding,
            terminated_funding,
        });
    }
    rows
}

/// Build the time-series table by sampling `index` at each step date.
///
/// `range` defaults to the index's event span. Each group's series is
/// trimmed to start at its first date with a positive count; a group that is
/// never positive at any sample keeps its full series.
pub fn time_series(
    index: &ActiveIntervalIndex,
    step: CalendarStep,
    range: Option<(NaiveDate, NaiveDate)>,
) -> Vec<SeriesRow> {
    let Some((start, end)) = range.or_else(|| index.span()) else {
        return Vec::new();
    };
    let dates = step.dates(start, end);
    if dates.is_empty() {
        return Vec::new();
    }

    let keys: Vec<&GroupKey> = index.groups().collect();
    per_group(&keys, |key| {
        let display_name = index.display_name(&key.0).unwrap_or(&key.0);
        let counts: Vec<u64> = dates.iter().map(|d| index.active_at(&key.0, *d)).collect();
        let first_positive = counts.iter().position(|c| *c > 0).unwrap_or(0);

        dates[first_positive..]
            .iter()
            .zip(&counts[first_positive..])
            .map(|(&date, &active_count)| SeriesRow {
                date,
                group: key.0.clone(),
                display_name: display_name.to_string(),
                active_count,
            })
            .collect()
    })
}

/// Collapse a per-group series into one "all groups" series.
pub fn total_series(rows: &[SeriesRow]) -> Vec<SeriesRow> {
    let mut by_date: BTreeMap<NaiveDate, u64> = BTreeMap::new();
    for row in rows {
        *by_date.entry(row.date).or_insert(0) += row.active_count;
    }
    by_date
        .into_iter()
        .map(|(date, active_count)| SeriesRow {
            date,
            group: TOTAL_KEY.to_string(),
            display_name: TOTAL_DISPLAY_NAME.to_string(),
            active_count,
        })
        .collect()
}

/// `100 * part / whole` rounded to 2 decimals, 0 for an empty whole.
pub(crate) fn percentage(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    round2(part as f64 / whole as f64 * 100.0)
}

pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

// Order-preserving fan-out over independent groups.
#[cfg(feature = "parallel")]
fn per_group<T, R, F>(items: &[T], f: F) -> Vec<R>
where
    T: Sync,
    R: Send,
    F: Fn(&T) -> Vec<R> + Sync + Send,
{
    items
        .par_iter()
        .map(&f)
        .collect::<Vec<Vec<R>>>()
        .into_iter()
        .flatten()
        .collect()
}

#[cfg(not(feature = "parallel"))]
fn per_group<T, R, F>(items: &[T], f: F) -> Vec<R>
where
    F: Fn(&T) -> Vec<R>,
{
    items.iter().flat_map(f).collect()
}
