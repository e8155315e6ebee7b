#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Record types flowing through the crime warehouse pipeline.
//!
//! Cleaned crime incidents and daily climate rows come out of extraction,
//! are joined on calendar date, and are then projected into the four star
//! schema dimensions and the fact table. Every type here is plain data; the
//! `crime_warehouse_etl` crate owns the transformations.

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// A calendar date as the pipeline keys it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DateKey {
    pub year: i64,
    pub month: i64,
    pub day: i64,
}

impl DateKey {
    #[must_use]
    pub const fn new(year: i64, month: i64, day: i64) -> Self {
        Self { year, month, day }
    }
}

impl std::fmt::Display for DateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:04}-{:02}-{:02}", self.year, self.month, self.day)
    }
}

/// A cleaned crime incident.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrimeRecord {
    /// Lower-cased, unique incident identifier.
    pub event_id: String,
    pub year: i64,
    pub month: i64,
    pub day: i64,
    pub day_of_year: i64,
    pub day_of_week: String,
    pub location_type: String,
    pub crime_type: String,
    /// Neighbourhood code; unrecognized codes carry the configured sentinel.
    pub hood_id: i64,
    pub neighbourhood_name: String,
}

impl CrimeRecord {
    #[must_use]
    pub const fn date(&self) -> DateKey {
        DateKey::new(self.year, self.month, self.day)
    }
}

/// One hourly weather reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherObservation {
    pub year: i64,
    pub month: i64,
    pub day: i64,
    /// Reading time as written in the source (e.g. `"13:00"`).
    pub time: String,
    /// Temperature in degrees Celsius. `None` when the cell is blank.
    pub temperature: Option<f64>,
    /// Lower-cased descriptor, or the missing-weather sentinel.
    pub weather: String,
}

impl WeatherObservation {
    #[must_use]
    pub const fn date(&self) -> DateKey {
        DateKey::new(self.year, self.month, self.day)
    }
}

/// Weather statistics for one calendar day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyClimate {
    pub year: i64,
    pub month: i64,
    pub day: i64,
    pub temperature_mean: Option<f64>,
    pub temperature_min: Option<f64>,
    pub temperature_max: Option<f64>,
    /// Representative descriptor. Equals the missing-weather sentinel until
    /// gap filling repairs it.
    pub weather: String,
}

impl DailyClimate {
    #[must_use]
    pub const fn date(&self) -> DateKey {
        DateKey::new(self.year, self.month, self.day)
    }
}

/// A crime incident left-joined with its day's climate. Climate fields are
/// `None` when no weather was recorded for that day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinedRecord {
    pub crime: CrimeRecord,
    pub temperature_mean: Option<f64>,
    pub temperature_min: Option<f64>,
    pub temperature_max: Option<f64>,
    pub weather: Option<String>,
}

/// Surrogate keys attached to a joined record. A key is `None` when its
/// natural key was absent from the surrogate table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SurrogateKeys {
    pub date: Option<i64>,
    pub event: Option<i64>,
    pub climate: Option<i64>,
    pub neighbourhood: Option<i64>,
}

/// A joined record carrying its surrogate keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyedRecord {
    pub record: JoinedRecord,
    pub keys: SurrogateKeys,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateDimensionRow {
    pub year: i64,
    pub month: i64,
    pub day: i64,
    pub day_of_year: i64,
    pub day_of_week: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrimeEventDimensionRow {
    pub event_id: String,
    pub crime_type: String,
    pub year: i64,
    pub month: i64,
    pub day: i64,
    pub day_of_year: i64,
    pub day_of_week: String,
    pub location_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClimateDimensionRow {
    pub day: i64,
    pub month: i64,
    pub year: i64,
    pub temperature_mean: Option<f64>,
    pub temperature_min: Option<f64>,
    pub temperature_max: Option<f64>,
    pub weather: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NeighbourhoodDimensionRow {
    pub hood_id: i64,
    pub neighbourhood_name: String,
}

/// A surrogate key and the natural key it stands for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SurrogateRow<K> {
    pub surrogate_key: i64,
    pub natural_key: K,
}

/// One row of the fact table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactRecord {
    pub date_surrogate_key: i64,
    pub event_surrogate_key: i64,
    pub climate_surrogate_key: i64,
    pub neighbourhood_surrogate_key: i64,
    /// Number of fact rows sharing `date_surrogate_key`.
    pub crime_number: i64,
    pub temperature_mean: Option<f64>,
    pub temperature_min: Option<f64>,
    pub temperature_max: Option<f64>,
}

impl FactRecord {
    /// The composite primary key.
    #[must_use]
    pub const fn key(&self) -> [i64; 4] {
        [
            self.date_surrogate_key,
            self.event_surrogate_key,
            self.climate_surrogate_key,
            self.neighbourhood_surrogate_key,
        ]
    }
}

/// A pipeline stage. Each stage holds its own sink connection.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Stage {
    /// Read, clean, aggregate, gap-fill, and join the inputs.
    Extract,
    /// Build and load the dimension and surrogate tables.
    Dimensions,
    /// Assemble and load the fact table.
    Facts,
    /// Attach primary and foreign keys.
    Schema,
    /// Check the persisted warehouse for orphans and count mismatches.
    Verify,
}

/// Classification of pipeline anomalies.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AnomalyKind {
    /// Missing columns, unmapped months, failed casts.
    InputShape,
    /// Sentinel substitution, conflicting natural keys. Never fatal.
    DataQuality,
    /// Orphan fact rows, duplicate fact keys, out-of-order constraints.
    Integrity,
    /// The sink is unavailable or the connection was lost.
    Resource,
}

/// A non-fatal data-quality finding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityWarning {
    pub stage: Stage,
    /// Table or frame the finding concerns.
    pub subject: String,
    pub message: String,
}

/// Row count of a loaded table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableCount {
    pub table: String,
    pub rows: u64,
}

/// Outcome of the gap-filling pass over the daily climate frame.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GapFillSummary {
    /// Days missing a descriptor before the first pass.
    pub missing_before: usize,
    /// Passes actually run.
    pub passes: usize,
    /// Days still missing after the last pass.
    pub missing_after: usize,
}

/// Summary of a full build.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    /// Crime rows read before cleaning.
    pub crime_rows_read: usize,
    /// Crime rows surviving dedup and the year filter.
    pub crime_rows_cleaned: usize,
    /// Weather observations read across all files.
    pub weather_rows_read: usize,
    pub weather_files: usize,
    /// Calendar days in the daily climate frame.
    pub climate_days: usize,
    pub gap_fill: GapFillSummary,
    /// Loaded tables in load order.
    pub tables: Vec<TableCount>,
    pub warnings: Vec<QualityWarning>,
}

impl RunReport {
    /// Returns the loaded row count for `table`.
    #[must_use]
    pub fn rows(&self, table: &str) -> Option<u64> {
        self.tables.iter().find(|t| t.table == table).map(|t| t.rows)
    }
}

/// A fact row whose surrogate key has no matching surrogate table row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrphanFact {
    /// Composite key of the fact row.
    pub key: [i64; 4],
    /// Surrogate table missing the key.
    pub missing_from: String,
}

/// A date whose stored `crime_number` disagrees with its fact row count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrimeNumberMismatch {
    pub date_surrogate_key: i64,
    pub stored: i64,
    pub counted: i64,
}

/// Result of checking a persisted warehouse.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyReport {
    pub fact_rows: usize,
    pub orphans: Vec<OrphanFact>,
    pub crime_number_mismatches: Vec<CrimeNumberMismatch>,
}

impl VerifyReport {
    /// Returns `true` when no orphans or mismatches were found.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.orphans.is_empty() && self.crime_number_mismatches.is_empty()
    }
}
