//! Active-interval index: per-group step functions built from signed events.
//!
//! Each usable grant contributes a `+1` event on its effective date and a
//! `-1` event on the day after its (clipped) expiration. Events landing on
//! the same day within a group are collapsed into one net delta, then a
//! running sum over the sorted dates yields the active count in effect from
//! each event date until the next one.
//!
//! # Complexity
//! - `build`: O(n log n) over the number of grants
//! - `active_at` / `active_during`: O(log e) binary search over one group's
//!   event dates

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::{group_grants, GrantRecord, GroupKey, Grouping, IndexStats};

/// A net change in the active count of one group on one day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub date: NaiveDate,
    pub delta: i64,
}

/// Sorted events of one group with their prefix sums.
#[derive(Debug, Clone, Default)]
struct GroupTimeline {
    display_name: String,
    /// Event dates, ascending, one entry per day with a non-zero net delta.
    dates: Vec<NaiveDate>,
    deltas: Vec<i64>,
    /// `cumulative[i]` is the active count from `dates[i]` until `dates[i + 1]`.
    cumulative: Vec<i64>,
    /// Distinct effective dates, ascending.
    start_dates: Vec<NaiveDate>,
    /// `starts_through[i]` counts grants starting on or before `start_dates[i]`.
    starts_through: Vec<u64>,
}

impl GroupTimeline {
    fn active_at(&self, at: NaiveDate) -> u64 {
        let idx = self.dates.partition_point(|d| *d <= at);
        if idx == 0 {
            return 0;
        }
        u64::try_from(self.cumulative[idx - 1]).unwrap_or(0)
    }

    fn starts_through(&self, at: NaiveDate) -> u64 {
        let idx = self.start_dates.partition_point(|d| *d <= at);
        if idx == 0 {
            0
        } else {
            self.starts_through[idx - 1]
        }
    }
}

/// Queryable "how many grants were active" structure for one grouping.
///
/// The index owns the event tables derived from one immutable grant
/// snapshot; it is never mutated after [`build`].
///
/// # Example
///
/// ```rust
/// use chrono::NaiveDate;
/// use grantscope::{ActiveIntervalIndex, GrantRecord, Grouping};
///
/// let d = |s: &str| s.parse::<NaiveDate>().unwrap();
/// let records = vec![
///     GrantRecord::new("1", d("2020-01-01"), d("2020-01-01")).with_directorate("BIO"),
///     GrantRecord::new("2", d("2020-01-01"), d("2020-01-01")).with_directorate("BIO"),
/// ];
/// let index = ActiveIntervalIndex::build(&records, Grouping::Directorate, d("2025-12-31"));
///
/// assert_eq!(index.active_at("BIO", d("2020-01-01")), 2);
/// assert_eq!(index.active_at("BIO", d("2020-01-02")), 0);
/// ```
///
/// [`build`]: ActiveIntervalIndex::build
#[derive(Debug, Clone)]
pub struct ActiveIntervalIndex {
    grouping: Grouping,
    clip_date: NaiveDate,
    groups: BTreeMap<GroupKey, GroupTimeline>,
    stats: IndexStats,
    /// First and last raw event date across all groups.
    span: Option<(NaiveDate, NaiveDate)>,
}

impl ActiveIntervalIndex {
    /// Build the index for `grouping` from a grant snapshot.
    ///
    /// Terminated grants are clipped at `clip_date`. Records missing a date
    /// or group key, and windows left empty by clipping, are skipped and
    /// counted in [`stats`].
    ///
    /// [`stats`]: ActiveIntervalIndex::stats
    pub fn build(records: &[GrantRecord], grouping: Grouping, clip_date: NaiveDate) -> Self {
        let (grouped, stats) = group_grants(records, grouping, clip_date);
        let mut span: Option<(NaiveDate, NaiveDate)> = None;
        let mut groups = BTreeMap::new();

        for (key, group) in grouped {
            let mut net: BTreeMap<NaiveDate, i64> = BTreeMap::new();
            let mut starts: BTreeMap<NaiveDate, u64> = BTreeMap::new();

            for grant in &group.grants {
                let start = grant.window.start;
                *net.entry(start).or_insert(0) += 1;
                *starts.entry(start).or_insert(0) += 1;
                widen(&mut span, start);

                // A window ending on NaiveDate::MAX never stops counting.
                match grant.window.end.succ_opt() {
                    Some(stop) => {
                        *net.entry(stop).or_insert(0) -= 1;
                        widen(&mut span, stop);
                    }
                    None => widen(&mut span, grant.window.end),
                }
            }

            let mut timeline = GroupTimeline {
                display_name: group.display_name,
                ..GroupTimeline::default()
            };
            let mut running = 0i64;
            for (date, delta) in net.into_iter().filter(|(_, delta)| *delta != 0) {
                running += delta;
                timeline.dates.push(date);
                timeline.deltas.push(delta);
                timeline.cumulative.push(running);
            }
            let mut started = 0u64;
            for (date, count) in starts {
                started += count;
                timeline.start_dates.push(date);
                timeline.starts_through.push(started);
            }

            groups.insert(key, timeline);
        }

        Self {
            grouping,
            clip_date,
            groups,
            stats,
            span,
        }
    }

    pub fn grouping(&self) -> Grouping {
        self.grouping
    }

    pub fn clip_date(&self) -> NaiveDate {
        self.clip_date
    }

    pub fn stats(&self) -> IndexStats {
        self.stats
    }

    /// Number of groups with at least one usable grant.
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Group keys in ascending order.
    pub fn groups(&self) -> impl Iterator<Item = &GroupKey> + '_ {
        self.groups.keys()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.groups.contains_key(key)
    }

    pub fn display_name(&self, key: &str) -> Option<&str> {
        self.groups.get(key).map(|g| g.display_name.as_str())
    }

    /// Earliest and latest event date across all groups, `None` when empty.
    pub fn span(&self) -> Option<(NaiveDate, NaiveDate)> {
        self.span
    }

    /// The collapsed, date-sorted events of one group.
    pub fn events(&self, key: &str) -> Vec<Event> {
        self.groups
            .get(key)
            .map(|g| {
                g.dates
                    .iter()
                    .zip(&g.deltas)
                    .map(|(&date, &delta)| Event { date, delta })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Grants of `key` with `effective_date <= at <= expiration_date`.
    ///
    /// Unknown groups and days before a group's first event yield 0. Days
    /// after the last event keep its value.
    pub fn active_at(&self, key: &str, at: NaiveDate) -> u64 {
        self.groups.get(key).map_or(0, |g| g.active_at(at))
    }

    /// Grants of `key` whose window overlaps the inclusive `[from, to]`.
    ///
    /// Computed as the grants active on `from` plus the grants starting in
    /// `(from, to]`, so it agrees with the direct overlap test.
    pub fn active_during(&self, key: &str, from: NaiveDate, to: NaiveDate) -> u64 {
        if from > to {
            return 0;
        }
        self.groups.get(key).map_or(0, |g| {
            g.active_at(from) + (g.starts_through(to) - g.starts_through(from))
        })
    }

    /// Sum of [`active_at`] over every group.
    ///
    /// [`active_at`]: ActiveIntervalIndex::active_at
    pub fn total_at(&self, at: NaiveDate) -> u64 {
        self.groups.values().map(|g| g.active_at(at)).sum()
    }
}

fn widen(span: &mut Option<(NaiveDate, NaiveDate)>, date: NaiveDate) {
    *span = Some(match *span {
        None => (date, date),
        Some((lo, hi)) => (lo.min(date), hi.max(date)),
    });
}
