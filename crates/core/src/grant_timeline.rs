//! Grantscope: active-grant lifecycle reconstruction.
//!
//! The core primitive is a [`GrantRecord`]: one research grant with an
//! effective date, an inclusive expiration date, grouping attributes
//! (state, directorate) and a terminated flag.
//!
//! Two computation paths derive the dashboard tables from a grant snapshot:
//!
//! - **Overlap path** ([`yearly_snapshot`]): a grant counts toward the
//!   bucket `[T0, T1]` when `effective_date <= T1` and
//!   `expiration_date >= T0`.
//! - **Event path** ([`ActiveIntervalIndex`] + [`time_series`]): each grant
//!   becomes a `+1` event on its effective date and a `-1` event on the day
//!   after it stops counting. A running sum over the sorted events is a step
//!   function answering "how many grants were active on day T".
//!
//! Both paths apply the same clipping rule: a terminated grant stops being
//! active at the clip date even when its nominal expiration is later.
//!
//! # Quick start
//!
//! ```rust
//! use chrono::NaiveDate;
//! use grantscope::{GrantRecord, Pipeline, PipelineConfig};
//!
//! let d = |s: &str| s.parse::<NaiveDate>().unwrap();
//! let records = vec![
//!     GrantRecord::new("2101234", d("2021-03-01"), d("2023-06-30")).with_state("CA", "California"),
//!     GrantRecord::new("2201234", d("2022-01-01"), d("2030-01-01"))
//!         .with_state("CA", "California")
//!         .terminated(true),
//! ];
//!
//! let pipeline = Pipeline::new(PipelineConfig::default()).unwrap();
//! let output = pipeline.run(&records).unwrap();
//!
//! let row_2022 = output.yearly.iter().find(|r| r.year == 2022).unwrap();
//! assert_eq!(row_2022.active_count, 2);
//! ```

mod aggregator;
mod interval_index;
mod table_cache;

pub use aggregator::{
    time_series, total_series, yearly_snapshot, CalendarStep, SeriesRow, SnapshotRow,
    SnapshotSpec, YearRange,
};
pub use interval_index::{ActiveIntervalIndex, Event};
pub use table_cache::{Fingerprint, TableCache};

use std::borrow::Borrow;
use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum GrantError {
    #[error("missing column: no record carries `{0}`")]
    MissingColumn(&'static str),
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<redb::DatabaseError> for GrantError {
    fn from(e: redb::DatabaseError) -> Self {
        GrantError::Storage(e.to_string())
    }
}
impl From<redb::TransactionError> for GrantError {
    fn from(e: redb::TransactionError) -> Self {
        GrantError::Storage(e.to_string())
    }
}
impl From<redb::TableError> for GrantError {
    fn from(e: redb::TableError) -> Self {
        GrantError::Storage(e.to_string())
    }
}
impl From<redb::StorageError> for GrantError {
    fn from(e: redb::StorageError) -> Self {
        GrantError::Storage(e.to_string())
    }
}
impl From<redb::CommitError> for GrantError {
    fn from(e: redb::CommitError) -> Self {
        GrantError::Storage(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, GrantError>;

// ---------------------------------------------------------------------------
// Core types
// ---------------------------------------------------------------------------

/// Award identifier as issued by the funding agency.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GrantId(pub String);

impl std::fmt::Display for GrantId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One grant from the input snapshot.
///
/// Dates and grouping attributes are optional because the upstream table may
/// carry blanks; records missing what a computation needs are dropped from
/// it and counted in [`IndexStats`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GrantRecord {
    pub id: GrantId,
    /// First day the grant is active.
    pub effective_date: Option<NaiveDate>,
    /// Last day the grant is active (inclusive).
    pub expiration_date: Option<NaiveDate>,
    /// Two-letter code of the awardee institution's home state.
    pub state_code: Option<String>,
    pub state_name: Option<String>,
    /// Directorate abbreviation (e.g. `MPS`, `CSE`).
    pub directorate: Option<String>,
    /// Awarded amount in dollars.
    pub amount: f64,
    /// Whether the grant appears in the termination list.
    pub terminated: bool,
}

impl GrantRecord {
    /// Create a non-terminated, ungrouped record with both dates set.
    pub fn new(id: impl Into<String>, effective: NaiveDate, expiration: NaiveDate) -> Self {
        Self {
            id: GrantId(id.into()),
            effective_date: Some(effective),
            expiration_date: Some(expiration),
            state_code: None,
            state_name: None,
            directorate: None,
            amount: 0.0,
            terminated: false,
        }
    }

    pub fn with_state(mut self, code: impl Into<String>, name: impl Into<String>) -> Self {
        self.state_code = Some(code.into());
        self.state_name = Some(name.into());
        self
    }

    pub fn with_directorate(mut self, code: impl Into<String>) -> Self {
        self.directorate = Some(code.into());
        self
    }

    pub fn with_amount(mut self, amount: f64) -> Self {
        self.amount = amount;
        self
    }

    pub fn terminated(mut self, terminated: bool) -> Self {
        self.terminated = terminated;
        self
    }

    /// The inclusive range of days this grant counts as active.
    ///
    /// A terminated grant whose expiration lies past `clip_date` is cut back
    /// to `clip_date`. Returns `None` when either date is missing or the
    /// (clipped) window is empty.
    pub fn active_window(&self, clip_date: NaiveDate) -> Option<ActiveWindow> {
        let start = self.effective_date?;
        let mut end = self.expiration_date?;
        if self.terminated && end > clip_date {
            end = clip_date;
        }
        (start <= end).then_some(ActiveWindow { start, end })
    }
}

/// An inclusive `[start, end]` range of days.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl ActiveWindow {
    pub fn contains(&self, at: NaiveDate) -> bool {
        self.start <= at && at <= self.end
    }

    /// Standard interval-overlap test against the inclusive `[from, to]`.
    pub fn overlaps(&self, from: NaiveDate, to: NaiveDate) -> bool {
        self.start <= to && self.end >= from
    }
}

/// Key of one aggregation group (a state code, a directorate code, or the
/// single total group).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupKey(pub String);

impl Borrow<str> for GroupKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for GroupKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Key of the single group produced by [`Grouping::Total`].
pub const TOTAL_KEY: &str = "ALL";
const TOTAL_DISPLAY_NAME: &str = "All";

/// The dimension grants are aggregated by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Grouping {
    /// Home state of the awardee institution.
    #[default]
    State,
    /// Funding directorate.
    Directorate,
    /// No grouping: every grant lands in one total group.
    Total,
}

impl Grouping {
    /// Group key for `record`, or `None` when the attribute is blank.
    pub fn key_of(self, record: &GrantRecord) -> Option<GroupKey> {
        let raw = match self {
            Grouping::State => record.state_code.as_deref(),
            Grouping::Directorate => record.directorate.as_deref(),
            Grouping::Total => Some(TOTAL_KEY),
        };
        non_blank(raw).map(|s| GroupKey(s.to_string()))
    }

    fn display_name_of(self, record: &GrantRecord) -> Option<&str> {
        match self {
            Grouping::State => non_blank(record.state_name.as_deref()),
            Grouping::Directorate => None,
            Grouping::Total => Some(TOTAL_DISPLAY_NAME),
        }
    }
}

/// Awarded amount, with a blank (non-finite) amount counted as 0.
fn funding_of(record: &GrantRecord) -> f64 {
    if record.amount.is_finite() {
        record.amount
    } else {
        0.0
    }
}

fn non_blank(s: Option<&str>) -> Option<&str> {
    s.map(str::trim).filter(|s| !s.is_empty())
}

/// Counters for records excluded while grouping.
///
/// Every record lands in exactly one bucket, so
/// `records_seen == indexed + dropped()`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexStats {
    pub records_seen: usize,
    pub indexed: usize,
    pub missing_date: usize,
    pub missing_key: usize,
    /// Windows that were empty after clipping.
    pub degenerate: usize,
}

impl IndexStats {
    pub fn dropped(&self) -> usize {
        self.missing_date + self.missing_key + self.degenerate
    }
}

// ---------------------------------------------------------------------------
// Grouping of usable records
// ---------------------------------------------------------------------------

/// A record that survived validation, reduced to what aggregation reads.
#[derive(Debug, Clone, Copy)]
pub(crate) struct UsableGrant {
    pub window: ActiveWindow,
    pub amount: f64,
    pub terminated: bool,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct GroupGrants {
    pub display_name: String,
    pub grants: Vec<UsableGrant>,
}

/// Clip, validate and bucket `records` by `grouping`.
///
/// Shared by both computation paths so they see the same set of windows.
pub(crate) fn group_grants(
    records: &[GrantRecord],
    grouping: Grouping,
    clip_date: NaiveDate,
) -> (BTreeMap<GroupKey, GroupGrants>, IndexStats) {
    let mut groups: BTreeMap<GroupKey, GroupGrants> = BTreeMap::new();
    let mut stats = IndexStats {
        records_seen: records.len(),
        ..IndexStats::default()
    };

    for record in records {
        if record.effective_date.is_none() || record.expiration_date.is_none() {
            stats.missing_date += 1;
            continue;
        }
        let Some(key) = grouping.key_of(record) else {
            stats.missing_key += 1;
            continue;
        };
        let Some(window) = record.active_window(clip_date) else {
            stats.degenerate += 1;
            continue;
        };

        let group = groups.entry(key).or_default();
        if group.display_name.is_empty() {
            if let Some(name) = grouping.display_name_of(record) {
                group.display_name = name.to_string();
            }
        }
        group.grants.push(UsableGrant {
            window,
            amount: funding_of(record),
            terminated: record.terminated,
        });
        stats.indexed += 1;
    }

    for (key, group) in groups.iter_mut() {
        if group.display_name.is_empty() {
            group.display_name = key.0.clone();
        }
    }

    debug!(
        ?grouping,
        records = stats.records_seen,
        indexed = stats.indexed,
        missing_date = stats.missing_date,
        missing_key = stats.missing_key,
        degenerate = stats.degenerate,
        groups = groups.len(),
        "grouped grant records"
    );

    (groups, stats)
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// Parameters of one pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// First year of the observed range.
    pub first_year: i32,
    /// Last year of the observed range; terminations are attributed here.
    pub last_year: i32,
    /// Terminated grants stop counting as active after this day.
    pub clip_date: NaiveDate,
    /// Step of the time-series table.
    pub series_step: CalendarStep,
    pub grouping: Grouping,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            first_year: 2020,
            last_year: 2025,
            clip_date: NaiveDate::from_ymd_opt(2025, 12, 31).unwrap_or(NaiveDate::MAX),
            series_step: CalendarStep::Monthly,
            grouping: Grouping::State,
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.first_year > self.last_year {
            return Err(GrantError::InvalidConfig(format!(
                "`first_year` ({}) must not be after `last_year` ({})",
                self.first_year, self.last_year
            )));
        }
        let window = self.window().ok_or_else(|| {
            GrantError::InvalidConfig(format!(
                "years {}..={} are not representable as calendar dates",
                self.first_year, self.last_year
            ))
        })?;
        if self.clip_date < window.0 {
            return Err(GrantError::InvalidConfig(format!(
                "`clip_date` ({}) precedes the start of {}",
                self.clip_date, self.first_year
            )));
        }
        Ok(())
    }

    pub fn years(&self) -> YearRange {
        YearRange::new(self.first_year, self.last_year)
    }

    /// Jan 1 of the first year through Dec 31 of the last year.
    pub fn window(&self) -> Option<(NaiveDate, NaiveDate)> {
        let years = self.years();
        Some((years.start_of(years.first)?, years.end_of(years.last)?))
    }

    pub fn snapshot_spec(&self) -> SnapshotSpec {
        SnapshotSpec {
            grouping: self.grouping,
            years: self.years(),
            clip_date: self.clip_date,
            restrict_to: None,
        }
    }
}

/// The pair of derived tables for one grant snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineOutput {
    pub yearly: Vec<SnapshotRow>,
    pub series: Vec<SeriesRow>,
    pub stats: IndexStats,
}

/// Runs the index and both aggregation paths over a grant snapshot.
///
/// # Example
///
/// ```rust
/// use grantscope::{Pipeline, PipelineConfig, TableCache};
///
/// let pipeline = Pipeline::new(PipelineConfig::default()).unwrap();
/// let cache = TableCache::open_in_memory().unwrap();
/// let output = pipeline.run_cached(&cache, &[]).unwrap();
/// assert!(output.yearly.is_empty());
/// assert!(output.series.is_empty());
/// ```
#[derive(Debug, Clone)]
pub struct Pipeline {
    config: PipelineConfig,
}

impl Pipeline {
    /// Create a pipeline, rejecting an invalid config up front.
    pub fn new(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Compute the yearly snapshot and time-series tables.
    ///
    /// Either both tables are returned or an error is; nothing is partially
    /// computed.
    pub fn run(&self, records: &[GrantRecord]) -> Result<PipelineOutput> {
        check_columns(records)?;

        let index = ActiveIntervalIndex::build(records, self.config.grouping, self.config.clip_date);
        let yearly = yearly_snapshot(records, &self.config.snapshot_spec());
        let series = time_series(&index, self.config.series_step, self.config.window());

        info!(
            records = records.len(),
            groups = index.len(),
            yearly_rows = yearly.len(),
            series_rows = series.len(),
            "pipeline run complete"
        );

        Ok(PipelineOutput {
            yearly,
            series,
            stats: index.stats(),
        })
    }

    /// Like [`run`], but reuses a stored result for identical inputs.
    ///
    /// [`run`]: Pipeline::run
    pub fn run_cached(&self, cache: &TableCache, records: &[GrantRecord]) -> Result<PipelineOutput> {
        let fingerprint = Fingerprint::of(records, &self.config)?;
        match cache.get(&fingerprint) {
            Ok(Some(output)) => {
                debug!(%fingerprint, "pipeline cache hit");
                return Ok(output);
            }
            Ok(None) => debug!(%fingerprint, "pipeline cache miss"),
            // An undecodable entry is recomputed and overwritten.
            Err(GrantError::Serialization(e)) => {
                warn!(%fingerprint, error = %e, "discarding unreadable cache entry");
            }
            Err(e) => return Err(e),
        }

        let output = self.run(records)?;
        cache.put(&fingerprint, &output)?;
        Ok(output)
    }
}

/// Fail when a required date is absent from every record.
///
/// Individual blanks are soft failures handled by grouping; a date that no
/// record carries means the table was built without that column.
pub fn check_columns(records: &[GrantRecord]) -> Result<()> {
    if records.is_empty() {
        return Ok(());
    }
    if records.iter().all(|r| r.effective_date.is_none()) {
        return Err(GrantError::MissingColumn("effective_date"));
    }
    if records.iter().all(|r| r.expiration_date.is_none()) {
        return Err(GrantError::MissingColumn("expiration_date"));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
