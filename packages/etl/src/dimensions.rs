//! Dimension and surrogate-key derivation.
//!
//! Each dimension is the distinct projection of the joined frame, keyed on
//! its natural key. When two rows share a natural key but disagree on a
//! descriptive attribute, the first-seen row wins and a data-quality
//! warning is recorded. Surrogate keys are dense from 1.

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt::Debug,
};

use crime_warehouse_database::{
    models::{Row, TableDef},
    tables,
};
use crime_warehouse_etl_models::{
    ClimateDimensionRow, CrimeEventDimensionRow, DateDimensionRow, DateKey, JoinedRecord,
    KeyedRecord, NeighbourhoodDimensionRow, QualityWarning, Stage, SurrogateKeys, SurrogateRow,
};

use crate::{config::KeyOrder, rows::to_rows};

/// A dimension's rows, its surrogate table, and the natural-to-surrogate
/// lookup.
#[derive(Debug, Clone)]
pub struct Dimension<K, R> {
    pub rows: Vec<R>,
    pub surrogates: Vec<SurrogateRow<K>>,
    lookup: BTreeMap<K, i64>,
}

impl<K, R> Dimension<K, R>
where
    K: Clone + Ord + Debug,
    R: PartialEq,
{
    /// Projects `source` to distinct rows by `key`, then assigns surrogate
    /// keys in `order`. Conflicts are appended to `warnings`.
    pub fn build(
        table: &TableDef,
        source: impl IntoIterator<Item = R>,
        key: impl Fn(&R) -> K,
        order: KeyOrder,
        warnings: &mut Vec<QualityWarning>,
    ) -> Self {
        let mut rows: Vec<R> = Vec::new();
        let mut position: BTreeMap<K, usize> = BTreeMap::new();
        let mut conflicted: BTreeSet<K> = BTreeSet::new();

        for row in source {
            let k = key(&row);
            if let Some(&i) = position.get(&k) {
                if rows[i] != row && conflicted.insert(k.clone()) {
                    log::warn!(
                        "{}: conflicting attributes for key {k:?}; keeping first-seen row",
                        table.name
                    );
                    warnings.push(QualityWarning {
                        stage: Stage::Dimensions,
                        subject: table.name.to_string(),
                        message: format!(
                            "conflicting attributes for key {k:?}; kept first-seen row"
                        ),
                    });
                }
                continue;
            }
            position.insert(k, rows.len());
            rows.push(row);
        }

        let mut keys: Vec<K> = rows.iter().map(&key).collect();
        if order == KeyOrder::Sorted {
            keys.sort();
        }

        let surrogates: Vec<SurrogateRow<K>> = keys
            .into_iter()
            .zip(1..)
            .map(|(natural_key, surrogate_key)| SurrogateRow {
                surrogate_key,
                natural_key,
            })
            .collect();

        let lookup = surrogates
            .iter()
            .map(|s| (s.natural_key.clone(), s.surrogate_key))
            .collect();

        log::debug!("{}: {} distinct rows", table.name, rows.len());

        Self {
            rows,
            surrogates,
            lookup,
        }
    }

    /// Surrogate key for `key`, if the natural key is present.
    #[must_use]
    pub fn surrogate(&self, key: &K) -> Option<i64> {
        self.lookup.get(key).copied()
    }
}

/// The four star-schema dimensions.
#[derive(Debug, Clone)]
pub struct DimensionSet {
    pub date: Dimension<DateKey, DateDimensionRow>,
    pub event: Dimension<String, CrimeEventDimensionRow>,
    pub climate: Dimension<DateKey, ClimateDimensionRow>,
    pub neighbourhood: Dimension<i64, NeighbourhoodDimensionRow>,
}

impl DimensionSet {
    /// Derives all dimensions from the joined frame.
    #[must_use]
    pub fn build(
        joined: &[JoinedRecord],
        order: KeyOrder,
        warnings: &mut Vec<QualityWarning>,
    ) -> Self {
        let date = Dimension::build(
            &tables::DATE_DIMENSION,
            joined.iter().map(|j| DateDimensionRow {
                year: j.crime.year,
                month: j.crime.month,
                day: j.crime.day,
                day_of_year: j.crime.day_of_year,
                day_of_week: j.crime.day_of_week.clone(),
            }),
            |r| DateKey::new(r.year, r.month, r.day),
            order,
            warnings,
        );

        let event = Dimension::build(
            &tables::CRIME_EVENT_DIMENSION,
            joined.iter().map(|j| CrimeEventDimensionRow {
                event_id: j.crime.event_id.clone(),
                crime_type: j.crime.crime_type.clone(),
                year: j.crime.year,
                month: j.crime.month,
                day: j.crime.day,
                day_of_year: j.crime.day_of_year,
                day_of_week: j.crime.day_of_week.clone(),
                location_type: j.crime.location_type.clone(),
            }),
            |r| r.event_id.clone(),
            order,
            warnings,
        );

        // Days without weather observations have no climate row.
        let climate = Dimension::build(
            &tables::CLIMATE_DIMENSION,
            joined
                .iter()
                .filter(|j| j.weather.is_some())
                .map(|j| ClimateDimensionRow {
                    day: j.crime.day,
                    month: j.crime.month,
                    year: j.crime.year,
                    temperature_mean: j.temperature_mean,
                    temperature_min: j.temperature_min,
                    temperature_max: j.temperature_max,
                    weather: j.weather.clone(),
                }),
            |r| DateKey::new(r.year, r.month, r.day),
            order,
            warnings,
        );

        let neighbourhood = Dimension::build(
            &tables::NEIGHBOURHOOD_DIMENSION,
            joined.iter().map(|j| NeighbourhoodDimensionRow {
                hood_id: j.crime.hood_id,
                neighbourhood_name: j.crime.neighbourhood_name.clone(),
            }),
            |r| r.hood_id,
            order,
            warnings,
        );

        Self {
            date,
            event,
            climate,
            neighbourhood,
        }
    }

    /// Looks up the surrogate keys for one joined record.
    #[must_use]
    pub fn keys_for(&self, record: &JoinedRecord) -> SurrogateKeys {
        let date = record.crime.date();
        SurrogateKeys {
            date: self.date.surrogate(&date),
            event: self.event.surrogate(&record.crime.event_id),
            climate: self.climate.surrogate(&date),
            neighbourhood: self.neighbourhood.surrogate(&record.crime.hood_id),
        }
    }

    /// Left-joins the surrogate keys back onto the joined frame.
    #[must_use]
    pub fn attach_keys(&self, joined: &[JoinedRecord]) -> Vec<KeyedRecord> {
        joined
            .iter()
            .map(|record| KeyedRecord {
                keys: self.keys_for(record),
                record: record.clone(),
            })
            .collect()
    }

    /// Dimension and surrogate tables with their rows, in load order.
    #[must_use]
    pub fn table_rows(&self) -> Vec<(&'static TableDef, Vec<Row>)> {
        vec![
            (&tables::DATE_DIMENSION, to_rows(&self.date.rows)),
            (&tables::DATE_SURROGATE, to_rows(&self.date.surrogates)),
            (&tables::CRIME_EVENT_DIMENSION, to_rows(&self.event.rows)),
            (&tables::CRIME_EVENT_SURROGATE, to_rows(&self.event.surrogates)),
            (&tables::CLIMATE_DIMENSION, to_rows(&self.climate.rows)),
            (&tables::CLIMATE_SURROGATE, to_rows(&self.climate.surrogates)),
            (
                &tables::NEIGHBOURHOOD_DIMENSION,
                to_rows(&self.neighbourhood.rows),
            ),
            (
                &tables::NEIGHBOURHOOD_SURROGATE,
                to_rows(&self.neighbourhood.surrogates),
            ),
        ]
    }
}
