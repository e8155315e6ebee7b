//! Integrity checks against a persisted warehouse.
//!
//! Re-derives two invariants from the stored tables: every fact key resolves
//! to a surrogate row, and `crime_number` equals the count of fact rows
//! sharing the date key.

use std::collections::{BTreeMap, BTreeSet};

use crime_warehouse_database::{
    Connector, WarehouseSink,
    models::{Row, TableDef},
    tables,
};
use crime_warehouse_etl_models::{CrimeNumberMismatch, OrphanFact, Stage, VerifyReport};

use crate::{
    error::{EtlError, StageError},
    rows::integer_at,
    stage::StageConnection,
};

const FACT_KEYS: [(&str, &TableDef); 4] = [
    ("date_surrogate_key", &tables::DATE_SURROGATE),
    ("event_surrogate_key", &tables::CRIME_EVENT_SURROGATE),
    ("climate_surrogate_key", &tables::CLIMATE_SURROGATE),
    ("neighbourhood_surrogate_key", &tables::NEIGHBOURHOOD_SURROGATE),
];

fn integer(table: &TableDef, row: &Row, column: &str) -> Result<i64, EtlError> {
    integer_at(table, row, column).ok_or_else(|| EtlError::UnexpectedValue {
        table: table.name.to_string(),
        column: column.to_string(),
        value: table
            .column_index(column)
            .and_then(|i| row.get(i))
            .map_or_else(|| "<missing>".to_string(), ToString::to_string),
    })
}

async fn fetch_existing(sink: &dyn WarehouseSink, table: &TableDef) -> Result<Vec<Row>, EtlError> {
    if !sink.table_exists(table.name).await? {
        return Err(EtlError::MissingTable {
            table: table.name.to_string(),
        });
    }
    Ok(sink.fetch(table).await?)
}

/// Checks the fact table against the surrogate tables.
///
/// # Errors
///
/// Returns [`EtlError::MissingTable`] if a warehouse table is absent, or
/// [`EtlError::UnexpectedValue`] if a key cell is not an integer.
pub async fn verify_warehouse(sink: &dyn WarehouseSink) -> Result<VerifyReport, EtlError> {
    let facts = fetch_existing(sink, &tables::FACT).await?;

    let mut known: Vec<BTreeSet<i64>> = Vec::with_capacity(FACT_KEYS.len());
    for (column, surrogate) in FACT_KEYS {
        let rows = fetch_existing(sink, surrogate).await?;
        known.push(
            rows.iter()
                .map(|r| integer(surrogate, r, column))
                .collect::<Result<_, _>>()?,
        );
    }

    let mut orphans = Vec::new();
    let mut per_date: BTreeMap<i64, i64> = BTreeMap::new();
    let mut stored: Vec<(i64, i64)> = Vec::with_capacity(facts.len());

    for row in &facts {
        let mut key = [0i64; 4];
        for (i, (column, _)) in FACT_KEYS.iter().enumerate() {
            key[i] = integer(&tables::FACT, row, column)?;
        }
        for (i, (_, surrogate)) in FACT_KEYS.iter().enumerate() {
            if !known[i].contains(&key[i]) {
                orphans.push(OrphanFact {
                    key,
                    missing_from: surrogate.name.to_string(),
                });
            }
        }

        *per_date.entry(key[0]).or_default() += 1;
        stored.push((key[0], integer(&tables::FACT, row, "crime_number")?));
    }

    let mut reported = BTreeSet::new();
    let crime_number_mismatches = stored
        .into_iter()
        .filter_map(|(date, stored)| {
            let counted = per_date[&date];
            (stored != counted && reported.insert((date, stored))).then_some(
                CrimeNumberMismatch {
                    date_surrogate_key: date,
                    stored,
                    counted,
                },
            )
        })
        .collect::<Vec<_>>();

    if !orphans.is_empty() {
        log::warn!("{} orphan fact rows", orphans.len());
    }
    if !crime_number_mismatches.is_empty() {
        log::warn!(
            "{} dates with a wrong crime_number",
            crime_number_mismatches.len()
        );
    }

    Ok(VerifyReport {
        fact_rows: facts.len(),
        orphans,
        crime_number_mismatches,
    })
}

/// Connects through `connector` and verifies the warehouse.
///
/// # Errors
///
/// Returns a [`StageError`] tagged [`Stage::Verify`] if the sink is
/// unavailable or a table is missing.
pub async fn verify(connector: &dyn Connector) -> Result<VerifyReport, StageError> {
    let conn = StageConnection::acquire(connector, Stage::Verify).await?;
    verify_warehouse(&*conn)
        .await
        .map_err(|e| StageError::new(Stage::Verify, e))
}

#[cfg(test)]
mod tests {
    use crime_warehouse_database::{memory::MemoryConnector, models::Value, replace_and_load};
    use crime_warehouse_etl_models::AnomalyKind;

    use super::*;

    fn fact(keys: [i64; 4], crime_number: i64) -> Row {
        let mut row: Row = keys.iter().map(|k| Value::from(*k)).collect();
        row.push(Value::from(crime_number));
        row.extend([Value::Null, Value::Null, Value::Null]);
        row
    }

    async fn seed(connector: &MemoryConnector, facts: &[Row]) {
        let sink = connector.connect().await.unwrap();
        let date = |key: i64, day: i64| {
            vec![
                Value::from(key),
                Value::from(2017),
                Value::from(1),
                Value::from(day),
            ]
        };
        let surrogates: [(&TableDef, Vec<Row>); 4] = [
            (&tables::DATE_SURROGATE, vec![date(1, 1), date(2, 2)]),
            (
                &tables::CRIME_EVENT_SURROGATE,
                (1..=3)
                    .map(|k| vec![Value::from(k), Value::from(format!("e{k}"))])
                    .collect(),
            ),
            (&tables::CLIMATE_SURROGATE, vec![date(1, 1), date(2, 2)]),
            (
                &tables::NEIGHBOURHOOD_SURROGATE,
                vec![vec![Value::from(1), Value::from(70)]],
            ),
        ];
        for (table, rows) in &surrogates {
            replace_and_load(sink.as_ref(), table, rows).await.unwrap();
        }
        replace_and_load(sink.as_ref(), &tables::FACT, facts)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn consistent_warehouse_is_clean() {
        let connector = MemoryConnector::new();
        seed(
            &connector,
            &[fact([1, 1, 1, 1], 2), fact([1, 2, 1, 1], 2), fact([2, 3, 2, 1], 1)],
        )
        .await;

        let report = verify(&connector).await.unwrap();
        assert!(report.is_clean());
        assert_eq!(report.fact_rows, 3);
        assert_eq!(connector.open_connections(), 0);
    }

    #[tokio::test]
    async fn reports_orphans_and_wrong_counts() {
        let connector = MemoryConnector::new();
        seed(
            &connector,
            &[fact([1, 1, 1, 1], 1), fact([1, 2, 1, 1], 1), fact([9, 3, 2, 1], 1)],
        )
        .await;

        let report = verify(&connector).await.unwrap();

        assert_eq!(
            report.orphans,
            vec![OrphanFact {
                key: [9, 3, 2, 1],
                missing_from: "date_surrogate_table".to_string(),
            }]
        );
        assert_eq!(
            report.crime_number_mismatches,
            vec![CrimeNumberMismatch {
                date_surrogate_key: 1,
                stored: 1,
                counted: 2,
            }]
        );
    }

    #[tokio::test]
    async fn missing_fact_table_is_integrity_error() {
        let connector = MemoryConnector::new();
        let err = verify(&connector).await.unwrap_err();
        assert_eq!(err.stage, Stage::Verify);
        assert_eq!(err.kind, AnomalyKind::Integrity);
        assert!(matches!(err.source, EtlError::MissingTable { ref table } if table == "fact_table"));
    }
}
