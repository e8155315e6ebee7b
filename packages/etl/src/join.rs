//! Left join of cleaned crime rows with the daily climate frame.

use std::collections::{BTreeMap, BTreeSet};

use crime_warehouse_database::tables;
use crime_warehouse_etl_models::{
    CrimeRecord, DailyClimate, DateKey, JoinedRecord, QualityWarning, Stage,
};

/// Attaches each crime's day of climate, keeping crime row order. Crimes on
/// a day without weather get `None` climate fields, and each such day is
/// appended to `warnings` once.
pub fn join_climate(
    crimes: &[CrimeRecord],
    climate: &[DailyClimate],
    warnings: &mut Vec<QualityWarning>,
) -> Vec<JoinedRecord> {
    let by_date: BTreeMap<DateKey, &DailyClimate> = climate.iter().map(|c| (c.date(), c)).collect();

    let mut unmatched: BTreeSet<DateKey> = BTreeSet::new();
    let joined: Vec<JoinedRecord> = crimes
        .iter()
        .map(|crime| {
            let date = crime.date();
            let day = by_date.get(&date);
            if day.is_none() && unmatched.insert(date) {
                log::warn!("No weather observations for {date}");
                warnings.push(QualityWarning {
                    stage: Stage::Extract,
                    subject: tables::CLIMATE_DIMENSION.name.to_string(),
                    message: format!("no weather observations for {date}"),
                });
            }
            JoinedRecord {
                crime: crime.clone(),
                temperature_mean: day.and_then(|d| d.temperature_mean),
                temperature_min: day.and_then(|d| d.temperature_min),
                temperature_max: day.and_then(|d| d.temperature_max),
                weather: day.map(|d| d.weather.clone()),
            }
        })
        .collect();

    if !unmatched.is_empty() {
        log::warn!(
            "{} crime dates fall on days with no weather observations",
            unmatched.len()
        );
    }

    joined
}

#[cfg(test)]
mod tests {
    use super::*;

    fn crime(event_id: &str, day: i64) -> CrimeRecord {
        CrimeRecord {
            event_id: event_id.to_string(),
            year: 2020,
            month: 2,
            day,
            day_of_year: 31 + day,
            day_of_week: "monday".to_string(),
            location_type: "street".to_string(),
            crime_type: "theft".to_string(),
            hood_id: 1,
            neighbourhood_name: "annex".to_string(),
        }
    }

    #[test]
    fn keeps_crime_order_and_tolerates_missing_days() {
        let climate = vec![DailyClimate {
            year: 2020,
            month: 2,
            day: 1,
            temperature_mean: Some(-2.0),
            temperature_min: Some(-5.0),
            temperature_max: Some(1.0),
            weather: "snow".to_string(),
        }];

        let mut warnings = Vec::new();
        let joined = join_climate(
            &[crime("b", 1), crime("a", 2), crime("c", 1), crime("d", 2)],
            &climate,
            &mut warnings,
        );

        let ids: Vec<_> = joined.iter().map(|j| j.crime.event_id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a", "c"]);
        assert_eq!(joined[0].weather.as_deref(), Some("snow"));
        assert_eq!(joined[2].temperature_min, Some(-5.0));
        assert_eq!(joined[1].weather, None);
        assert_eq!(joined[1].temperature_mean, None);

        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].stage, Stage::Extract);
        assert_eq!(warnings[0].subject, "climate_dimension_table");
        assert_eq!(warnings[0].message, "no weather observations for 2020-02-02");
    }
}
