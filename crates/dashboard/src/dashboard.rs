//! Dashboard tables built on the Grantscope lifecycle engine.
//!
//! A [`GrantsDashboard`] owns one immutable grant snapshot and derives every
//! long-format table the dashboard panels consume: the state map, the
//! directorate evolution and termination panels, the lifecycle time series,
//! and the political-alignment scatter.
//!
//! # Usage
//!
//! ```rust
//! use chrono::NaiveDate;
//! use grantscope::{CalendarStep, GrantRecord, PipelineConfig};
//! use grantscope_dashboard::GrantsDashboard;
//!
//! let d = |s: &str| s.parse::<NaiveDate>().unwrap();
//! let records = vec![
//!     GrantRecord::new("2300001", d("2023-09-01"), d("2026-08-31"))
//!         .with_state("CO", "Colorado")
//!         .with_directorate("GEO")
//!         .with_amount(350_000.0),
//! ];
//!
//! let dashboard = GrantsDashboard::new(records, PipelineConfig::default()).unwrap();
//! let map = dashboard.state_year_table();
//! let timeline = dashboard.lifecycle(CalendarStep::Monthly);
//! assert_eq!(map.len(), 6);
//! assert_eq!(timeline[0].date, d("2023-09-01"));
//! ```

pub mod lookup;

use std::collections::BTreeMap;

use chrono::NaiveDate;
use grantscope::{
    check_columns, time_series, total_series, yearly_snapshot, ActiveIntervalIndex, CalendarStep,
    GrantRecord, Grouping, IndexStats, Pipeline, PipelineConfig, PipelineOutput, SeriesRow,
    SnapshotRow, SnapshotSpec, TableCache,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

pub use grantscope::GrantError as Error;
pub type Result<T> = std::result::Result<T, Error>;

/// Elections before this year take the 2020 result, from it on the 2024 one.
pub const ALIGNMENT_SWITCH_YEAR: i32 = 2024;

// ---------------------------------------------------------------------------
// Row types
// ---------------------------------------------------------------------------

/// A state snapshot row placed on the map by FIPS code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateYearRow {
    pub fips: u32,
    #[serde(flatten)]
    pub snapshot: SnapshotRow,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct YearMetrics {
    pub active_count: u64,
    pub terminated_count: u64,
    pub terminated_percentage: f64,
}

/// One state with its metrics for every year of the range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateYearWide {
    pub state: String,
    pub state_name: String,
    pub fips: u32,
    pub years: BTreeMap<i32, YearMetrics>,
}

/// All-time counts for one directorate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectorateTotal {
    pub directorate: String,
    pub grants: u64,
    pub terminated: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TerminationImpact {
    pub directorate: String,
    pub active_in_final_year: u64,
    pub terminated: u64,
    pub termination_percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateTermination {
    pub state: String,
    pub state_name: String,
    pub terminated: u64,
}

/// Election outcome for one state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateAlignment {
    pub abbreviation: String,
    pub winner_2020: String,
    pub winner_2024: String,
    pub governor_party: Option<String>,
}

/// Auxiliary state -> election outcome table joined onto state metrics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoliticalTable {
    rows: Vec<StateAlignment>,
}

impl PoliticalTable {
    pub fn new(rows: Vec<StateAlignment>) -> Self {
        Self { rows }
    }

    pub fn get(&self, abbreviation: &str) -> Option<&StateAlignment> {
        self.rows.iter().find(|r| r.abbreviation == abbreviation)
    }

    /// The winning party that applies to `year`, if the state is known.
    pub fn alignment_for(&self, abbreviation: &str, year: i32) -> Option<&str> {
        let row = self.get(abbreviation)?;
        let winner = if year < ALIGNMENT_SWITCH_YEAR {
            &row.winner_2020
        } else {
            &row.winner_2024
        };
        let winner = winner.trim();
        (!winner.is_empty()).then_some(winner)
    }
}

/// Grant metrics for one (state, year) with the state's political alignment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoliticalRow {
    pub abbreviation: String,
    pub state: String,
    pub year: i32,
    pub active_grants: u64,
    pub total_funding_millions: f64,
    pub terminated_grants: u64,
    pub terminated_funding_millions: f64,
    pub termination_percentage: f64,
    pub political_alignment: String,
}

// ---------------------------------------------------------------------------
// Dashboard
// ---------------------------------------------------------------------------

/// Derived tables for one grant snapshot.
///
/// The state and directorate indexes are built once in [`new`]; every table
/// accessor is a pure function of the snapshot and the config.
///
/// [`new`]: GrantsDashboard::new
pub struct GrantsDashboard {
    records: Vec<GrantRecord>,
    config: PipelineConfig,
    state_index: ActiveIntervalIndex,
    directorate_index: ActiveIntervalIndex,
    cache: Option<TableCache>,
}

impl GrantsDashboard {
    /// Validate the config and snapshot, then index the snapshot.
    pub fn new(records: Vec<GrantRecord>, config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        check_columns(&records)?;

        let state_index = ActiveIntervalIndex::build(&records, Grouping::State, config.clip_date);
        let directorate_index =
            ActiveIntervalIndex::build(&records, Grouping::Directorate, config.clip_date);

        let stats = state_index.stats();
        if stats.dropped() > 0 {
            warn!(
                dropped = stats.dropped(),
                missing_date = stats.missing_date,
                missing_key = stats.missing_key,
                degenerate = stats.degenerate,
                "grant records excluded from state tables"
            );
        }
        info!(
            records = records.len(),
            states = state_index.len(),
            directorates = directorate_index.len(),
            "dashboard indexed"
        );

        Ok(Self {
            records,
            config,
            state_index,
            directorate_index,
            cache: None,
        })
    }

    /// Reuse stored pipeline outputs from `cache` in [`overview`].
    ///
    /// [`overview`]: GrantsDashboard::overview
    pub fn with_cache(mut self, cache: TableCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn records(&self) -> &[GrantRecord] {
        &self.records
    }

    /// Drop counters of the state index.
    pub fn stats(&self) -> IndexStats {
        self.state_index.stats()
    }

    /// The configured pipeline's yearly and time-series tables, memoized by
    /// input fingerprint when a cache is attached.
    pub fn overview(&self) -> Result<PipelineOutput> {
        let pipeline = Pipeline::new(self.config.clone())?;
        match &self.cache {
            Some(cache) => pipeline.run_cached(cache, &self.records),
            None => pipeline.run(&self.records),
        }
    }

    fn snapshot(&self, grouping: Grouping, restrict_to: Option<Vec<String>>) -> Vec<SnapshotRow> {
        let spec = SnapshotSpec {
            grouping,
            restrict_to,
            ..self.config.snapshot_spec()
        };
        yearly_snapshot(&self.records, &spec)
    }

    /// State rows, naming states that only carried a code from the lookup table.
    fn state_snapshot(&self) -> Vec<SnapshotRow> {
        let mut rows = self.snapshot(Grouping::State, None);
        for row in rows.iter_mut().filter(|r| r.display_name == r.group) {
            if let Some(name) = lookup::state_name(&row.group) {
                row.display_name = name.to_string();
            }
        }
        rows
    }

    /// Yearly state rows for the choropleth; states without a FIPS code are
    /// dropped.
    pub fn state_year_table(&self) -> Vec<StateYearRow> {
        self.state_snapshot()
            .into_iter()
            .filter_map(|snapshot| {
                lookup::fips_code(&snapshot.group).map(|fips| StateYearRow { fips, snapshot })
            })
            .collect()
    }

    /// [`state_year_table`] pivoted to one row per state.
    ///
    /// [`state_year_table`]: GrantsDashboard::state_year_table
    pub fn state_year_wide(&self) -> Vec<StateYearWide> {
        let mut by_state: BTreeMap<String, StateYearWide> = BTreeMap::new();
        for row in self.state_year_table() {
            let entry = by_state
                .entry(row.snapshot.group.clone())
                .or_insert_with(|| StateYearWide {
                    state: row.snapshot.group.clone(),
                    state_name: row.snapshot.display_name.clone(),
                    fips: row.fips,
                    years: self
                        .config
                        .years()
                        .years()
                        .map(|y| (y, YearMetrics::default()))
                        .collect(),
                });
            entry.years.insert(
                row.snapshot.year,
                YearMetrics {
                    active_count: row.snapshot.active_count,
                    terminated_count: row.snapshot.terminated_count,
                    terminated_percentage: row.snapshot.terminated_percentage,
                },
            );
        }
        by_state.into_values().collect()
    }

    /// Yearly rows for every main directorate, including ones with no grants.
    pub fn directorate_table(&self) -> Vec<SnapshotRow> {
        let main = lookup::MAIN_DIRECTORATES
            .iter()
            .map(|d| d.to_string())
            .collect();
        self.snapshot(Grouping::Directorate, Some(main))
    }

    /// All-time grant and termination counts per directorate.
    pub fn directorate_totals(&self) -> Vec<DirectorateTotal> {
        let mut totals: BTreeMap<String, DirectorateTotal> = BTreeMap::new();
        for record in &self.records {
            if record.active_window(self.config.clip_date).is_none() {
                continue;
            }
            let Some(key) = Grouping::Directorate.key_of(record) else {
                continue;
            };
            let total = totals.entry(key.0.clone()).or_insert_with(|| DirectorateTotal {
                directorate: key.0,
                grants: 0,
                terminated: 0,
            });
            total.grants += 1;
            if record.terminated {
                total.terminated += 1;
            }
        }
        totals.into_values().collect()
    }

    /// Final-year termination impact per main directorate, most terminated first.
    pub fn termination_impact(&self) -> Vec<TerminationImpact> {
        let final_year = self.config.last_year;
        let mut impact: Vec<TerminationImpact> = self
            .directorate_table()
            .into_iter()
            .filter(|row| row.year == final_year)
            .map(|row| TerminationImpact {
                directorate: row.group,
                active_in_final_year: row.active_count,
                terminated: row.terminated_count,
                termination_percentage: row.terminated_percentage,
            })
            .collect();
        impact.sort_by(|a, b| {
            b.terminated
                .cmp(&a.terminated)
                .then_with(|| a.directorate.cmp(&b.directorate))
        });
        impact
    }

    /// The `n` states with the most terminated grants.
    pub fn top_terminated_states(&self, n: usize) -> Vec<StateTermination> {
        let final_year = self.config.last_year;
        let mut states: Vec<StateTermination> = self
            .state_snapshot()
            .into_iter()
            .filter(|row| row.year == final_year && row.terminated_count > 0)
            .map(|row| StateTermination {
                state: row.group,
                state_name: row.display_name,
                terminated: row.terminated_count,
            })
            .collect();
        states.sort_by(|a, b| {
            b.terminated
                .cmp(&a.terminated)
                .then_with(|| a.state_name.cmp(&b.state_name))
        });
        states.truncate(n);
        states
    }

    /// Jan 1 of the first year through the clip date.
    fn lifecycle_window(&self) -> Option<(NaiveDate, NaiveDate)> {
        let (start, _) = self.config.window()?;
        Some((start, self.config.clip_date))
    }

    /// Active grants per state sampled at `step` over the configured years.
    pub fn lifecycle(&self, step: CalendarStep) -> Vec<SeriesRow> {
        time_series(&self.state_index, step, self.lifecycle_window())
    }

    /// Daily active grants per state over the full span of event dates.
    pub fn lifecycle_daily(&self) -> Vec<SeriesRow> {
        time_series(&self.state_index, CalendarStep::Daily, None)
    }

    /// [`lifecycle`] summed across states.
    ///
    /// [`lifecycle`]: GrantsDashboard::lifecycle
    pub fn lifecycle_total(&self, step: CalendarStep) -> Vec<SeriesRow> {
        total_series(&self.lifecycle(step))
    }

    /// Active grants per main directorate sampled at `step`.
    pub fn directorate_lifecycle(&self, step: CalendarStep) -> Vec<SeriesRow> {
        time_series(&self.directorate_index, step, self.lifecycle_window())
            .into_iter()
            .filter(|row| lookup::is_main_directorate(&row.group))
            .collect()
    }

    /// State metrics joined with election outcomes; states missing from
    /// `political` are dropped.
    pub fn political_alignment(&self, political: &PoliticalTable) -> Vec<PoliticalRow> {
        self.state_snapshot()
            .into_iter()
            .filter_map(|row| {
                let alignment = political.alignment_for(&row.group, row.year)?.to_string();
                Some(PoliticalRow {
                    abbreviation: row.group,
                    state: row.display_name,
                    year: row.year,
                    active_grants: row.active_count,
                    total_funding_millions: millions(row.active_funding),
                    terminated_grants: row.terminated_count,
                    terminated_funding_millions: millions(row.terminated_funding),
                    termination_percentage: row.terminated_percentage,
                    political_alignment: alignment,
                })
            })
            .collect()
    }
}

fn millions(dollars: f64) -> f64 {
    (dollars / 1_000_000.0 * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn d(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    fn sample_records() -> Vec<GrantRecord> {
        vec![
            GrantRecord::new("2000001", d("2020-09-01"), d("2023-08-31"))
                .with_state("CA", "California")
                .with_directorate("CSE")
                .with_amount(600_000.0),
            GrantRecord::new("2100002", d("2021-07-01"), d("2026-06-30"))
                .with_state("CA", "California")
                .with_directorate("BIO")
                .with_amount(1_250_000.0)
                .terminated(true),
            GrantRecord::new("2200003", d("2022-01-15"), d("2025-12-31"))
                .with_state("TX", "Texas")
                .with_directorate("BIO")
                .with_amount(400_000.0)
                .terminated(true),
            GrantRecord::new("2300004", d("2023-03-01"), d("2027-02-28"))
                .with_state("TX", "Texas")
                .with_directorate("OIA")
                .with_amount(90_000.0),
            GrantRecord::new("2300005", d("2023-05-01"), d("2024-04-30"))
                .with_state("GU", "Guam")
                .with_directorate("GEO"),
        ]
    }

    fn dashboard() -> GrantsDashboard {
        GrantsDashboard::new(sample_records(), PipelineConfig::default()).unwrap()
    }

    fn political() -> PoliticalTable {
        PoliticalTable::new(vec![
            StateAlignment {
                abbreviation: "CA".to_string(),
                winner_2020: "Democrat".to_string(),
                winner_2024: "Democrat".to_string(),
                governor_party: Some("Democrat".to_string()),
            },
            StateAlignment {
                abbreviation: "TX".to_string(),
                winner_2020: "Republican".to_string(),
                winner_2024: "Republican".to_string(),
                governor_party: None,
            },
        ])
    }

    #[test]
    fn state_table_drops_states_without_fips() {
        let table = dashboard().state_year_table();
        assert_eq!(table.len(), 12);
        assert!(table.iter().all(|r| r.snapshot.group != "GU"));

        let tx_2025 = table
            .iter()
            .find(|r| r.snapshot.group == "TX" && r.snapshot.year == 2025)
            .unwrap();
        assert_eq!(tx_2025.fips, 48);
        assert_eq!(tx_2025.snapshot.active_count, 2);
        assert_eq!(tx_2025.snapshot.terminated_count, 1);
        assert_eq!(tx_2025.snapshot.terminated_percentage, 50.0);
    }

    #[test]
    fn state_row_serializes_flat() {
        let row = &dashboard().state_year_table()[0];
        let json = serde_json::to_value(row).unwrap();
        assert_eq!(json["fips"], 6);
        assert_eq!(json["group"], "CA");
        assert_eq!(json["year"], 2020);
    }

    #[test]
    fn wide_table_has_every_year() {
        let wide = dashboard().state_year_wide();
        assert_eq!(wide.len(), 2);
        let ca = &wide[0];
        assert_eq!(ca.state, "CA");
        assert_eq!(ca.state_name, "California");
        assert_eq!(ca.years.len(), 6);
        assert_eq!(ca.years[&2020].active_count, 1);
        assert_eq!(ca.years[&2022].active_count, 2);
        assert_eq!(ca.years[&2025].terminated_count, 1);
    }

    #[test]
    fn directorate_table_covers_main_directorates_only() {
        let table = dashboard().directorate_table();
        assert_eq!(table.len(), lookup::MAIN_DIRECTORATES.len() * 6);
        assert!(table.iter().all(|r| r.group != "OIA"));

        let tip: Vec<&SnapshotRow> = table.iter().filter(|r| r.group == "TIP").collect();
        assert!(tip.iter().all(|r| r.active_count == 0 && r.terminated_percentage == 0.0));
    }

    #[test]
    fn directorate_totals_count_all_time() {
        let totals = dashboard().directorate_totals();
        let bio = totals.iter().find(|t| t.directorate == "BIO").unwrap();
        assert_eq!(bio.grants, 2);
        assert_eq!(bio.terminated, 2);
        assert!(totals.iter().any(|t| t.directorate == "OIA"));
    }

    #[test]
    fn termination_impact_is_sorted() {
        let impact = dashboard().termination_impact();
        assert_eq!(impact.len(), lookup::MAIN_DIRECTORATES.len());
        assert_eq!(impact[0].directorate, "BIO");
        assert_eq!(impact[0].active_in_final_year, 2);
        assert_eq!(impact[0].terminated, 2);
        assert_eq!(impact[0].termination_percentage, 100.0);
        assert!(impact[1..].iter().all(|i| i.terminated == 0));
        assert!(impact[1..].windows(2).all(|w| w[0].directorate <= w[1].directorate));
    }

    #[test]
    fn top_terminated_states_ranks_and_truncates() {
        let dash = dashboard();
        let top = dash.top_terminated_states(15);
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].state_name, "California");
        assert_eq!(dash.top_terminated_states(1).len(), 1);
    }

    #[test]
    fn monthly_lifecycle_starts_at_first_active_month() {
        let dash = dashboard();
        let rows = dash.lifecycle(CalendarStep::Monthly);
        let tx: Vec<&SeriesRow> = rows.iter().filter(|r| r.group == "TX").collect();
        assert_eq!(tx[0].date, d("2022-02-01"));
        assert_eq!(tx.last().unwrap().date, d("2025-12-01"));

        let total = dash.lifecycle_total(CalendarStep::Monthly);
        assert_eq!(total.len(), 72 - 8);
        let mid_2023 = total.iter().find(|r| r.date == d("2023-06-01")).unwrap();
        assert_eq!(mid_2023.active_count, 5);
    }

    #[test]
    fn daily_lifecycle_spans_event_dates() {
        let rows = dashboard().lifecycle_daily();
        let ca: Vec<&SeriesRow> = rows.iter().filter(|r| r.group == "CA").collect();
        assert_eq!(ca[0].date, d("2020-09-01"));
        assert_eq!(rows.iter().map(|r| r.date).max(), Some(d("2027-03-01")));
        let after_clip = ca.iter().find(|r| r.date == d("2026-01-01")).unwrap();
        assert_eq!(after_clip.active_count, 0);
    }

    #[test]
    fn directorate_lifecycle_skips_minor_directorates() {
        let rows = dashboard().directorate_lifecycle(CalendarStep::Monthly);
        assert!(rows.iter().any(|r| r.group == "BIO"));
        assert!(rows.iter().all(|r| r.group != "OIA"));
    }

    #[test]
    fn political_join_switches_election_cycle() {
        let mut table = political();
        table.rows[1].winner_2024 = "Democrat".to_string();
        let rows = dashboard().political_alignment(&table);
        assert_eq!(rows.len(), 12);

        let tx = |year: i32| rows.iter().find(|r| r.abbreviation == "TX" && r.year == year).unwrap();
        assert_eq!(tx(2023).political_alignment, "Republican");
        assert_eq!(tx(2024).political_alignment, "Democrat");
        assert_eq!(tx(2025).terminated_funding_millions, 0.4);
        assert_eq!(tx(2024).terminated_funding_millions, 0.0);
        assert_eq!(tx(2024).total_funding_millions, 0.49);
    }

    #[test]
    fn political_join_drops_unknown_states() {
        let table = PoliticalTable::new(political().rows.into_iter().take(1).collect());
        let rows = dashboard().political_alignment(&table);
        assert!(rows.iter().all(|r| r.abbreviation == "CA"));
        assert_eq!(rows.len(), 6);
    }

    #[test]
    fn overview_is_memoized_in_attached_cache() {
        let file = NamedTempFile::new().unwrap();
        let path = file.path().to_str().unwrap().to_string();
        let dash = dashboard().with_cache(TableCache::open(&path).unwrap());

        let first = dash.overview().unwrap();
        let second = dash.overview().unwrap();
        assert_eq!(first, second);
        assert_eq!(first, dashboard().overview().unwrap());
    }

    #[test]
    fn blank_state_name_is_filled_from_lookup() {
        let mut record = GrantRecord::new("2400006", d("2024-01-01"), d("2025-06-30"))
            .with_state("NV", "")
            .terminated(true);
        record.state_name = None;
        let dash = GrantsDashboard::new(vec![record], PipelineConfig::default()).unwrap();

        let table = dash.state_year_table();
        assert!(table.iter().all(|r| r.snapshot.display_name == "Nevada"));
        assert_eq!(dash.state_year_wide()[0].state_name, "Nevada");
        assert_eq!(dash.top_terminated_states(1)[0].state_name, "Nevada");
    }

    #[test]
    fn stats_report_dropped_records() {
        let mut records = sample_records();
        records[0].state_code = None;
        let dash = GrantsDashboard::new(records, PipelineConfig::default()).unwrap();
        assert_eq!(dash.stats().missing_key, 1);
        assert_eq!(dash.stats().indexed, 4);
    }

    #[test]
    fn empty_snapshot_yields_empty_tables() {
        let dash = GrantsDashboard::new(Vec::new(), PipelineConfig::default()).unwrap();
        assert!(dash.state_year_table().is_empty());
        assert!(dash.lifecycle(CalendarStep::Monthly).is_empty());
        assert!(dash.lifecycle_daily().is_empty());
        assert!(dash.top_terminated_states(15).is_empty());
        assert_eq!(dash.termination_impact().len(), lookup::MAIN_DIRECTORATES.len());
    }
}
