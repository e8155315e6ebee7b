//! Pipeline configuration.
//!
//! Loaded from a TOML file. Every field has a default, so an empty file (or
//! no file at all) yields the stock configuration.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Errors from loading or validating a configuration file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("Failed to read config {path}: {source}")]
    Io {
        /// Config file path.
        path: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The file is not valid TOML or does not match the schema.
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value is out of range.
    #[error("Invalid config: {message}")]
    Invalid {
        /// Description of the problem.
        message: String,
    },
}

/// How the gap filler decides when to stop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GapFillMode {
    /// Always run exactly `passes` passes.
    #[default]
    FixedPasses,
    /// Run until a pass changes nothing, at most `max_passes` passes.
    FixedPoint,
}

/// Order in which surrogate keys are handed out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyOrder {
    /// Order of first appearance in the joined frame.
    #[default]
    FirstSeen,
    /// Ascending natural key.
    Sorted,
}

/// Placeholder values substituted for unrecognized or missing input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Sentinels {
    /// Stands in for a missing weather descriptor. Also marks the days the
    /// gap filler repairs.
    pub missing_weather: String,
    /// Neighbourhood name substituted for `unknown_neighbourhood_raw`.
    pub unknown_neighbourhood_name: String,
    /// Lower-cased source name meaning "no recognized neighbourhood".
    pub unknown_neighbourhood_raw: String,
    /// Source hood code meaning "no recognized neighbourhood".
    pub unknown_hood_code: String,
    /// Hood id substituted for `unknown_hood_code`.
    pub unknown_hood_id: i64,
}

impl Default for Sentinels {
    fn default() -> Self {
        Self {
            missing_weather: "UNKNOWN".to_string(),
            unknown_neighbourhood_name: "random".to_string(),
            unknown_neighbourhood_raw: "nsa".to_string(),
            unknown_hood_code: "NSA".to_string(),
            unknown_hood_id: 0,
        }
    }
}

/// Layout of the per-station weather files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WeatherColumns {
    /// Source column holding the hourly temperature.
    pub temperature_column: String,
    /// Source column holding the free-text descriptor.
    pub weather_column: String,
    /// Source column holding the reading time.
    pub time_column: String,
    /// Station metadata and flag columns discarded on read.
    pub dropped_columns: Vec<String>,
}

impl Default for WeatherColumns {
    fn default() -> Self {
        Self {
            temperature_column: "Temp (°C)".to_string(),
            weather_column: "Weather".to_string(),
            time_column: "Time".to_string(),
            dropped_columns: [
                "Longitude (x)",
                "Latitude (y)",
                "Station Name",
                "Climate ID",
                "Date/Time",
                "Temp Flag",
                "Dew Point Temp (°C)",
                "Dew Point Temp Flag",
                "Rel Hum (%)",
                "Rel Hum Flag",
                "Wind Dir (10s deg)",
                "Wind Dir Flag",
                "Wind Spd (km/h)",
                "Wind Spd Flag",
                "Visibility (km)",
                "Visibility Flag",
                "Stn Press (kPa)",
                "Stn Press Flag",
                "Hmdx",
                "Hmdx Flag",
                "Wind Chill",
                "Wind Chill Flag",
            ]
            .into_iter()
            .map(str::to_string)
            .collect(),
        }
    }
}

/// Gap filler settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GapFillConfig {
    pub mode: GapFillMode,
    /// Pass count for [`GapFillMode::FixedPasses`].
    pub passes: usize,
    /// Upper bound for [`GapFillMode::FixedPoint`].
    pub max_passes: usize,
}

impl Default for GapFillConfig {
    fn default() -> Self {
        Self {
            mode: GapFillMode::FixedPasses,
            passes: 8,
            max_passes: 365,
        }
    }
}

/// Full pipeline configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WarehouseConfig {
    /// Crime incident CSV.
    pub crime_csv: PathBuf,
    /// Directory of per-station weather CSV files.
    pub weather_dir: PathBuf,
    /// Years kept by the normalizer.
    pub years: Vec<i64>,
    pub sentinels: Sentinels,
    pub weather: WeatherColumns,
    pub gap_fill: GapFillConfig,
    pub key_order: KeyOrder,
    /// Persist the cleaned crime and daily climate frames as
    /// `crime_source_table` and `weather_source_table`.
    pub staging_tables: bool,
    /// Rows per `INSERT` statement.
    pub insert_chunk_size: usize,
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        Self {
            crime_csv: PathBuf::from("crime_dataset.csv"),
            weather_dir: PathBuf::from("weather_dataset"),
            years: vec![2017, 2018, 2019, 2020],
            sentinels: Sentinels::default(),
            weather: WeatherColumns::default(),
            gap_fill: GapFillConfig::default(),
            key_order: KeyOrder::default(),
            staging_tables: true,
            insert_chunk_size: 1000,
        }
    }
}

impl WarehouseConfig {
    /// Parses and validates a TOML document.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the document is malformed or a value is out
    /// of range.
    pub fn from_toml_str(toml_str: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::de::from_str(toml_str)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses, and validates the config file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read or is invalid.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        log::debug!("Loaded config from {}", path.display());
        Self::from_toml_str(&contents)
    }

    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] describing the first bad value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |message: &str| -> Result<(), ConfigError> {
            Err(ConfigError::Invalid {
                message: message.to_string(),
            })
        };

        if self.years.is_empty() {
            return invalid("years must list at least one year");
        }
        if self.sentinels.missing_weather.is_empty() {
            return invalid("sentinels.missing_weather must not be empty");
        }
        if self.gap_fill.mode == GapFillMode::FixedPoint && self.gap_fill.max_passes == 0 {
            return invalid("gap_fill.max_passes must be at least 1");
        }
        if self.insert_chunk_size == 0 {
            return invalid("insert_chunk_size must be at least 1");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let config = WarehouseConfig::from_toml_str("").unwrap();
        assert_eq!(config, WarehouseConfig::default());
        assert_eq!(config.gap_fill.passes, 8);
        assert_eq!(config.sentinels.missing_weather, "UNKNOWN");
        assert_eq!(config.weather.dropped_columns.len(), 22);
    }

    #[test]
    fn overrides_nested_fields() {
        let config = WarehouseConfig::from_toml_str(
            r#"
            years = [2019]
            key_order = "sorted"

            [sentinels]
            missing_weather = "normal"

            [gap_fill]
            mode = "fixed_point"
            max_passes = 30
            "#,
        )
        .unwrap();

        assert_eq!(config.years, vec![2019]);
        assert_eq!(config.key_order, KeyOrder::Sorted);
        assert_eq!(config.sentinels.missing_weather, "normal");
        assert_eq!(config.sentinels.unknown_hood_code, "NSA");
        assert_eq!(config.gap_fill.mode, GapFillMode::FixedPoint);
        assert_eq!(config.gap_fill.passes, 8);
    }

    #[test]
    fn rejects_out_of_range_values() {
        assert!(matches!(
            WarehouseConfig::from_toml_str("years = []"),
            Err(ConfigError::Invalid { .. })
        ));
        assert!(matches!(
            WarehouseConfig::from_toml_str("insert_chunk_size = 0"),
            Err(ConfigError::Invalid { .. })
        ));
        assert!(matches!(
            WarehouseConfig::from_toml_str("key_order = \"random\""),
            Err(ConfigError::Parse(_))
        ));
    }
}
