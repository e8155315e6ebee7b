//! Fact table assembly.

use std::collections::{BTreeMap, BTreeSet};

use crime_warehouse_etl_models::{FactRecord, KeyedRecord};

use crate::error::EtlError;

fn require(key: Option<i64>, record: &KeyedRecord, dimension: &'static str) -> Result<i64, EtlError> {
    key.ok_or_else(|| EtlError::MissingSurrogateKey {
        event_id: record.record.crime.event_id.clone(),
        dimension,
    })
}

/// Builds fact rows from keyed records, in input order.
///
/// `crime_number` is the number of fact rows sharing the row's date key.
///
/// # Errors
///
/// Returns [`EtlError::MissingSurrogateKey`] if a record lacks a key (it
/// would become an orphan fact row) and [`EtlError::DuplicateFactKey`] if
/// two records share all four keys.
pub fn assemble_facts(keyed: &[KeyedRecord]) -> Result<Vec<FactRecord>, EtlError> {
    let mut facts = Vec::with_capacity(keyed.len());
    let mut seen = BTreeSet::new();

    for record in keyed {
        let fact = FactRecord {
            date_surrogate_key: require(record.keys.date, record, "date")?,
            event_surrogate_key: require(record.keys.event, record, "crime event")?,
            climate_surrogate_key: require(record.keys.climate, record, "climate")?,
            neighbourhood_surrogate_key: require(record.keys.neighbourhood, record, "neighbourhood")?,
            crime_number: 0,
            temperature_mean: record.record.temperature_mean,
            temperature_min: record.record.temperature_min,
            temperature_max: record.record.temperature_max,
        };

        if !seen.insert(fact.key()) {
            return Err(EtlError::DuplicateFactKey { key: fact.key() });
        }
        facts.push(fact);
    }

    let mut per_date: BTreeMap<i64, i64> = BTreeMap::new();
    for fact in &facts {
        *per_date.entry(fact.date_surrogate_key).or_default() += 1;
    }
    for fact in &mut facts {
        fact.crime_number = per_date[&fact.date_surrogate_key];
    }

    log::info!(
        "Assembled {} fact rows across {} dates",
        facts.len(),
        per_date.len()
    );

    Ok(facts)
}

#[cfg(test)]
mod tests {
    use crime_warehouse_etl_models::{CrimeRecord, JoinedRecord, SurrogateKeys};

    use super::*;

    fn keyed(event: i64, date: i64) -> KeyedRecord {
        KeyedRecord {
            record: JoinedRecord {
                crime: CrimeRecord {
                    event_id: format!("e{event}"),
                    year: 2017,
                    month: 6,
                    day: date,
                    day_of_year: 151 + date,
                    day_of_week: "sunday".to_string(),
                    location_type: "park".to_string(),
                    crime_type: "robbery".to_string(),
                    hood_id: 3,
                    neighbourhood_name: "yorkville".to_string(),
                },
                temperature_mean: Some(20.0),
                temperature_min: Some(15.0),
                temperature_max: Some(25.0),
                weather: Some("clear".to_string()),
            },
            keys: SurrogateKeys {
                date: Some(date),
                event: Some(event),
                climate: Some(date),
                neighbourhood: Some(1),
            },
        }
    }

    #[test]
    fn crime_number_counts_rows_per_date() {
        let facts = assemble_facts(&[keyed(1, 1), keyed(2, 2), keyed(3, 1), keyed(4, 1)]).unwrap();

        let numbers: Vec<_> = facts.iter().map(|f| f.crime_number).collect();
        assert_eq!(numbers, vec![3, 1, 3, 3]);
        for fact in &facts {
            let sharing = facts
                .iter()
                .filter(|f| f.date_surrogate_key == fact.date_surrogate_key)
                .count();
            assert_eq!(fact.crime_number, i64::try_from(sharing).unwrap());
        }
        assert_eq!(facts[1].temperature_max, Some(25.0));
    }

    #[test]
    fn duplicate_key_tuple_fails_fast() {
        let err = assemble_facts(&[keyed(1, 1), keyed(1, 1)]).unwrap_err();
        assert!(matches!(err, EtlError::DuplicateFactKey { key: [1, 1, 1, 1] }));
    }

    #[test]
    fn missing_key_would_orphan_the_row() {
        let mut record = keyed(5, 2);
        record.keys.neighbourhood = None;
        let err = assemble_facts(&[record]).unwrap_err();
        assert!(matches!(
            err,
            EtlError::MissingSurrogateKey { dimension: "neighbourhood", ref event_id } if event_id == "e5"
        ));
    }
}
