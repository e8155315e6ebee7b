//! Conversion of pipeline records into sink rows.
//!
//! Each impl emits values in the column order of its table in
//! [`crime_warehouse_database::tables`].

use crime_warehouse_database::models::{Row, Value};
use crime_warehouse_etl_models::{
    ClimateDimensionRow, CrimeEventDimensionRow, CrimeRecord, DailyClimate, DateDimensionRow,
    DateKey, FactRecord, NeighbourhoodDimensionRow, SurrogateRow,
};

/// A record that loads as one row of a warehouse table.
pub trait ToRow {
    fn to_row(&self) -> Row;
}

/// Converts a slice of records.
pub fn to_rows<T: ToRow>(records: &[T]) -> Vec<Row> {
    records.iter().map(ToRow::to_row).collect()
}

impl ToRow for CrimeRecord {
    fn to_row(&self) -> Row {
        vec![
            self.event_id.as_str().into(),
            self.year.into(),
            self.month.into(),
            self.day.into(),
            self.day_of_year.into(),
            self.day_of_week.as_str().into(),
            self.location_type.as_str().into(),
            self.crime_type.as_str().into(),
            self.hood_id.into(),
            self.neighbourhood_name.as_str().into(),
        ]
    }
}

impl ToRow for DailyClimate {
    fn to_row(&self) -> Row {
        vec![
            self.year.into(),
            self.month.into(),
            self.day.into(),
            self.temperature_mean.into(),
            self.temperature_min.into(),
            self.temperature_max.into(),
            self.weather.as_str().into(),
        ]
    }
}

impl ToRow for DateDimensionRow {
    fn to_row(&self) -> Row {
        vec![
            self.year.into(),
            self.month.into(),
            self.day.into(),
            self.day_of_year.into(),
            self.day_of_week.as_str().into(),
        ]
    }
}

impl ToRow for CrimeEventDimensionRow {
    fn to_row(&self) -> Row {
        vec![
            self.event_id.as_str().into(),
            self.crime_type.as_str().into(),
            self.year.into(),
            self.month.into(),
            self.day.into(),
            self.day_of_year.into(),
            self.day_of_week.as_str().into(),
            self.location_type.as_str().into(),
        ]
    }
}

impl ToRow for ClimateDimensionRow {
    fn to_row(&self) -> Row {
        vec![
            self.day.into(),
            self.month.into(),
            self.year.into(),
            self.temperature_mean.into(),
            self.temperature_min.into(),
            self.temperature_max.into(),
            self.weather.clone().into(),
        ]
    }
}

impl ToRow for NeighbourhoodDimensionRow {
    fn to_row(&self) -> Row {
        vec![self.hood_id.into(), self.neighbourhood_name.as_str().into()]
    }
}

impl ToRow for SurrogateRow<DateKey> {
    fn to_row(&self) -> Row {
        vec![
            self.surrogate_key.into(),
            self.natural_key.year.into(),
            self.natural_key.month.into(),
            self.natural_key.day.into(),
        ]
    }
}

impl ToRow for SurrogateRow<String> {
    fn to_row(&self) -> Row {
        vec![self.surrogate_key.into(), self.natural_key.as_str().into()]
    }
}

impl ToRow for SurrogateRow<i64> {
    fn to_row(&self) -> Row {
        vec![self.surrogate_key.into(), self.natural_key.into()]
    }
}

impl ToRow for FactRecord {
    fn to_row(&self) -> Row {
        vec![
            self.date_surrogate_key.into(),
            self.event_surrogate_key.into(),
            self.climate_surrogate_key.into(),
            self.neighbourhood_surrogate_key.into(),
            self.crime_number.into(),
            self.temperature_mean.into(),
            self.temperature_min.into(),
            self.temperature_max.into(),
        ]
    }
}

/// Reads an integer cell, by column name.
#[must_use]
pub fn integer_at(
    table: &crime_warehouse_database::models::TableDef,
    row: &Row,
    column: &str,
) -> Option<i64> {
    table
        .column_index(column)
        .and_then(|i| row.get(i))
        .and_then(Value::as_i64)
}

#[cfg(test)]
mod tests {
    use crime_warehouse_database::tables;

    use super::*;

    #[test]
    fn rows_match_table_widths() {
        let fact = FactRecord {
            date_surrogate_key: 1,
            event_surrogate_key: 2,
            climate_surrogate_key: 3,
            neighbourhood_surrogate_key: 4,
            crime_number: 5,
            temperature_mean: Some(1.5),
            temperature_min: None,
            temperature_max: Some(3.0),
        };
        let row = fact.to_row();
        assert_eq!(row.len(), tables::FACT.columns.len());
        assert_eq!(integer_at(&tables::FACT, &row, "crime_number"), Some(5));
        assert_eq!(row[6], Value::Null);

        let surrogate = SurrogateRow {
            surrogate_key: 7,
            natural_key: DateKey::new(2019, 4, 30),
        };
        let row = surrogate.to_row();
        assert_eq!(row.len(), tables::DATE_SURROGATE.columns.len());
        assert_eq!(integer_at(&tables::DATE_SURROGATE, &row, "month"), Some(4));
    }

    #[test]
    fn climate_dimension_leads_with_day() {
        let row = ClimateDimensionRow {
            day: 30,
            month: 4,
            year: 2019,
            temperature_mean: None,
            temperature_min: None,
            temperature_max: None,
            weather: Some("rain".to_string()),
        }
        .to_row();
        assert_eq!(row.len(), tables::CLIMATE_DIMENSION.columns.len());
        assert_eq!(integer_at(&tables::CLIMATE_DIMENSION, &row, "day"), Some(30));
        assert_eq!(row[6], Value::from("rain"));
    }
}
