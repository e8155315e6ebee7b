//! Table layouts for the warehouse.
//!
//! Layouts are created without keys; primary and foreign keys are attached
//! by the schema wirer after bulk load.

use crime_warehouse_database_models::{Column, TableDef};

/// Cleaned crime frame, persisted during extraction.
pub const CRIME_SOURCE: TableDef = TableDef {
    name: "crime_source_table",
    columns: &[
        Column::text("event_id"),
        Column::integer("year"),
        Column::integer("month"),
        Column::integer("day"),
        Column::integer("day_of_year"),
        Column::text("day_of_week"),
        Column::text("location_type"),
        Column::text("crime_type"),
        Column::integer("hood_id"),
        Column::text("neighbourhood_name"),
    ],
};

/// Gap-filled daily climate frame, persisted during extraction.
pub const WEATHER_SOURCE: TableDef = TableDef {
    name: "weather_source_table",
    columns: &[
        Column::integer("year"),
        Column::integer("month"),
        Column::integer("day"),
        Column::real("temperature_mean"),
        Column::real("temperature_min"),
        Column::real("temperature_max"),
        Column::text("weather"),
    ],
};

pub const DATE_DIMENSION: TableDef = TableDef {
    name: "date_dimension_table",
    columns: &[
        Column::integer("year"),
        Column::integer("month"),
        Column::integer("day"),
        Column::integer("day_of_year"),
        Column::text("day_of_week"),
    ],
};

pub const DATE_SURROGATE: TableDef = TableDef {
    name: "date_surrogate_table",
    columns: &[
        Column::integer("date_surrogate_key"),
        Column::integer("year"),
        Column::integer("month"),
        Column::integer("day"),
    ],
};

pub const CRIME_EVENT_DIMENSION: TableDef = TableDef {
    name: "crime_event_dimension_table",
    columns: &[
        Column::text("event_id"),
        Column::text("crime_type"),
        Column::integer("year"),
        Column::integer("month"),
        Column::integer("day"),
        Column::integer("day_of_year"),
        Column::text("day_of_week"),
        Column::text("location_type"),
    ],
};

pub const CRIME_EVENT_SURROGATE: TableDef = TableDef {
    name: "crime_event_surrogate_table",
    columns: &[
        Column::integer("event_surrogate_key"),
        Column::text("event_id"),
    ],
};

pub const CLIMATE_DIMENSION: TableDef = TableDef {
    name: "climate_dimension_table",
    columns: &[
        Column::integer("day"),
        Column::integer("month"),
        Column::integer("year"),
        Column::real("temperature_mean"),
        Column::real("temperature_min"),
        Column::real("temperature_max"),
        Column::text("weather"),
    ],
};

pub const CLIMATE_SURROGATE: TableDef = TableDef {
    name: "climate_surrogate_table",
    columns: &[
        Column::integer("climate_surrogate_key"),
        Column::integer("year"),
        Column::integer("month"),
        Column::integer("day"),
    ],
};

pub const NEIGHBOURHOOD_DIMENSION: TableDef = TableDef {
    name: "neighbourhood_dimension_table",
    columns: &[
        Column::integer("hood_id"),
        Column::text("neighbourhood_name"),
    ],
};

pub const NEIGHBOURHOOD_SURROGATE: TableDef = TableDef {
    name: "neighbourhood_surrogate_table",
    columns: &[
        Column::integer("neighbourhood_surrogate_key"),
        Column::integer("hood_id"),
    ],
};

pub const FACT: TableDef = TableDef {
    name: "fact_table",
    columns: &[
        Column::integer("date_surrogate_key"),
        Column::integer("event_surrogate_key"),
        Column::integer("climate_surrogate_key"),
        Column::integer("neighbourhood_surrogate_key"),
        Column::integer("crime_number"),
        Column::real("temperature_mean"),
        Column::real("temperature_min"),
        Column::real("temperature_max"),
    ],
};

/// Every warehouse output table, in load order.
pub const WAREHOUSE_TABLES: &[TableDef] = &[
    DATE_DIMENSION,
    DATE_SURROGATE,
    CRIME_EVENT_DIMENSION,
    CRIME_EVENT_SURROGATE,
    CLIMATE_DIMENSION,
    CLIMATE_SURROGATE,
    NEIGHBOURHOOD_DIMENSION,
    NEIGHBOURHOOD_SURROGATE,
    FACT,
];

/// Looks up a warehouse or staging table by name.
#[must_use]
pub fn by_name(name: &str) -> Option<&'static TableDef> {
    WAREHOUSE_TABLES
        .iter()
        .chain([&CRIME_SOURCE, &WEATHER_SOURCE])
        .find(|t| t.name == name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fact_leads_with_surrogate_keys() {
        assert_eq!(
            &FACT.column_names()[..4],
            &[
                "date_surrogate_key",
                "event_surrogate_key",
                "climate_surrogate_key",
                "neighbourhood_surrogate_key",
            ]
        );
    }

    #[test]
    fn resolves_staging_and_output_tables() {
        assert_eq!(by_name("fact_table"), Some(&FACT));
        assert_eq!(by_name("weather_source_table"), Some(&WEATHER_SOURCE));
        assert!(by_name("crime_weather_source_table").is_none());
    }
}
