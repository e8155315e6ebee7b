//! Canonicalizes raw crime and weather rows.
//!
//! Crime rows are deduplicated on `event_id` (keeping the first occurrence)
//! *before* the year filter, so a duplicate of an out-of-range row is
//! dropped along with it.

use std::collections::BTreeSet;

use crime_warehouse_etl_models::{CrimeRecord, WeatherObservation};

use crate::{
    config::{Sentinels, WarehouseConfig, WeatherColumns},
    error::EtlError,
    source::{RawRow, RawTable},
};

const MONTHS: [&str; 12] = [
    "january",
    "february",
    "march",
    "april",
    "may",
    "june",
    "july",
    "august",
    "september",
    "october",
    "november",
    "december",
];

/// Maps a lower-cased month name to its number.
#[must_use]
pub fn month_number(name: &str) -> Option<i64> {
    MONTHS
        .iter()
        .position(|m| *m == name)
        .and_then(|i| i64::try_from(i + 1).ok())
}

/// Parses an integer cell. Whole-valued decimals such as `"2017.0"` are
/// accepted since spreadsheet exports write them that way.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn parse_integer(value: &str) -> Option<i64> {
    let value = value.trim();
    value.parse::<i64>().ok().or_else(|| {
        value
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite() && v.fract() == 0.0 && v.abs() < 9.0e15)
            .map(|v| v as i64)
    })
}

/// Cleaned crime rows plus the count read before cleaning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanedCrimes {
    pub records: Vec<CrimeRecord>,
    pub rows_read: usize,
    pub duplicates_dropped: usize,
    pub out_of_range_dropped: usize,
}

struct CrimeColumns {
    event_id: usize,
    year: usize,
    month: usize,
    day: usize,
    day_of_year: usize,
    day_of_week: usize,
    location_type: usize,
    crime_type: usize,
    hood_id: usize,
    neighbourhood_name: usize,
}

impl CrimeColumns {
    fn locate(table: &RawTable) -> Result<Self, EtlError> {
        Ok(Self {
            event_id: table.column("event_id")?,
            year: table.column("occurrence_year")?,
            month: table.column("occurrence_month")?,
            day: table.column("occurrence_day")?,
            day_of_year: table.column("day_of_year")?,
            day_of_week: table.column("day_of_week")?,
            location_type: table.column("location_type")?,
            crime_type: table.column("crime_type")?,
            hood_id: table.column("hood_id")?,
            neighbourhood_name: table.column("neighbourhood_name")?,
        })
    }
}

fn integer_cell(
    table: &RawTable,
    row: &RawRow,
    index: usize,
    column: &str,
) -> Result<i64, EtlError> {
    let value = &row.values[index];
    parse_integer(value).ok_or_else(|| EtlError::Cast {
        at: table.row_ref(row),
        column: column.to_string(),
        value: value.clone(),
    })
}

fn clean_crime(
    table: &RawTable,
    row: &RawRow,
    cols: &CrimeColumns,
    year: i64,
    sentinels: &Sentinels,
) -> Result<CrimeRecord, EtlError> {
    let text = |i: usize| row.values[i].to_lowercase();

    let month_name = text(cols.month);
    let month = month_number(&month_name).ok_or_else(|| EtlError::UnmappedMonth {
        at: table.row_ref(row),
        value: month_name.clone(),
    })?;

    let mut neighbourhood_name = text(cols.neighbourhood_name);
    if neighbourhood_name == sentinels.unknown_neighbourhood_raw {
        neighbourhood_name.clone_from(&sentinels.unknown_neighbourhood_name);
    }

    let hood_id = if row.values[cols.hood_id] == sentinels.unknown_hood_code {
        sentinels.unknown_hood_id
    } else {
        integer_cell(table, row, cols.hood_id, "hood_id")?
    };

    Ok(CrimeRecord {
        event_id: text(cols.event_id),
        year,
        month,
        day: integer_cell(table, row, cols.day, "occurrence_day")?,
        day_of_year: integer_cell(table, row, cols.day_of_year, "day_of_year")?,
        day_of_week: text(cols.day_of_week),
        location_type: text(cols.location_type),
        crime_type: text(cols.crime_type),
        hood_id,
        neighbourhood_name,
    })
}

/// Cleans the crime table: dedup on `event_id`, year filter, lower-casing,
/// month mapping, sentinel substitution, and integer casts.
///
/// # Errors
///
/// Returns an input-shape [`EtlError`] for a missing column, an unmapped
/// month, or a failed cast on a kept row.
pub fn normalize_crimes(
    table: &RawTable,
    config: &WarehouseConfig,
) -> Result<CleanedCrimes, EtlError> {
    let cols = CrimeColumns::locate(table)?;
    let years: BTreeSet<i64> = config.years.iter().copied().collect();

    let mut seen = BTreeSet::new();
    let mut records = Vec::new();
    let mut duplicates_dropped = 0;
    let mut out_of_range_dropped = 0;

    for row in &table.rows {
        if !seen.insert(row.values[cols.event_id].to_lowercase()) {
            duplicates_dropped += 1;
            continue;
        }

        let Some(year) = parse_integer(&row.values[cols.year]).filter(|y| years.contains(y))
        else {
            out_of_range_dropped += 1;
            continue;
        };

        records.push(clean_crime(table, row, &cols, year, &config.sentinels)?);
    }

    log::info!(
        "Cleaned {} of {} crime rows ({duplicates_dropped} duplicates, \
         {out_of_range_dropped} outside {:?})",
        records.len(),
        table.rows.len(),
        config.years,
    );

    Ok(CleanedCrimes {
        records,
        rows_read: table.rows.len(),
        duplicates_dropped,
        out_of_range_dropped,
    })
}

fn retained_columns(table: &RawTable, layout: &WeatherColumns) -> BTreeSet<String> {
    let dropped: BTreeSet<String> = layout
        .dropped_columns
        .iter()
        .map(|c| c.to_lowercase())
        .collect();
    table
        .headers
        .iter()
        .filter(|h| !dropped.contains(*h))
        .cloned()
        .collect()
}

/// Unions the weather files into hourly observations: drops the configured
/// columns, deduplicates on `(year, month, day, time)` keeping the first,
/// lower-cases the descriptor, and substitutes the missing-weather sentinel
/// for blank descriptors.
///
/// # Errors
///
/// Returns an input-shape [`EtlError`] if files disagree on their retained
/// columns, a required column is absent, or a date or temperature cell is
/// not numeric.
pub fn normalize_weather(
    tables: &[RawTable],
    config: &WarehouseConfig,
) -> Result<Vec<WeatherObservation>, EtlError> {
    let layout = &config.weather;
    let mut schema: Option<BTreeSet<String>> = None;
    let mut seen = BTreeSet::new();
    let mut observations = Vec::new();
    let mut rows_read = 0usize;

    for table in tables {
        let retained = retained_columns(table, layout);
        let expected = schema.get_or_insert_with(|| retained.clone());
        if *expected != retained {
            let missing: Vec<_> = expected.difference(&retained).collect();
            let extra: Vec<_> = retained.difference(expected).collect();
            return Err(EtlError::SchemaMismatch {
                path: table.path.clone(),
                detail: format!("missing {missing:?}, unexpected {extra:?}"),
            });
        }

        let year = table.column("year")?;
        let month = table.column("month")?;
        let day = table.column("day")?;
        let time = table.column(&layout.time_column)?;
        let temperature = table.column(&layout.temperature_column)?;
        let weather = table.column(&layout.weather_column)?;

        for row in &table.rows {
            rows_read += 1;
            let observation = WeatherObservation {
                year: integer_cell(table, row, year, "year")?,
                month: integer_cell(table, row, month, "month")?,
                day: integer_cell(table, row, day, "day")?,
                time: row.values[time].clone(),
                temperature: temperature_cell(table, row, temperature)?,
                weather: descriptor(&row.values[weather], &config.sentinels.missing_weather),
            };

            if seen.insert((observation.date(), observation.time.clone())) {
                observations.push(observation);
            }
        }
    }

    log::info!(
        "Read {} unique hourly observations from {} rows across {} weather files",
        observations.len(),
        rows_read,
        tables.len(),
    );

    Ok(observations)
}

fn temperature_cell(table: &RawTable, row: &RawRow, index: usize) -> Result<Option<f64>, EtlError> {
    let value = &row.values[index];
    if value.is_empty() {
        return Ok(None);
    }
    value
        .parse::<f64>()
        .map(Some)
        .map_err(|_| EtlError::Cast {
            at: table.row_ref(row),
            column: "temperature".to_string(),
            value: value.clone(),
        })
}

fn descriptor(value: &str, missing: &str) -> String {
    if value.is_empty() {
        missing.to_string()
    } else {
        value.to_lowercase()
    }
}
