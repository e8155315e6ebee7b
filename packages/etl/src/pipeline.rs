//! Stage orchestration.
//!
//! Stages run strictly in sequence: extract, dimensions, facts, schema.
//! Each acquires its own [`StageConnection`] and hands its output to the
//! next stage explicitly. Loads are committed per table, so a failure in
//! one stage leaves earlier stages' tables in place.

use std::time::Instant;

use crime_warehouse_database::{
    Connector, WarehouseSink,
    models::{Row, Statement, TableDef},
    replace_and_load, tables,
};
use crime_warehouse_etl_models::{
    CrimeRecord, DailyClimate, FactRecord, JoinedRecord, KeyedRecord, QualityWarning, RunReport,
    Stage, TableCount,
};

use crate::{
    aggregate::aggregate_daily,
    config::WarehouseConfig,
    dimensions::DimensionSet,
    error::{EtlError, StageError},
    facts::assemble_facts,
    gap_fill::fill_gaps,
    join::join_climate,
    normalize::{normalize_crimes, normalize_weather},
    rows::to_rows,
    schema::{apply_plan, warehouse_plan},
    source,
    stage::StageConnection,
};

/// Frames produced by the extract stage.
#[derive(Debug, Clone)]
pub struct ExtractOutput {
    pub crimes: Vec<CrimeRecord>,
    pub climate: Vec<DailyClimate>,
    pub joined: Vec<JoinedRecord>,
}

/// Dimensions and the surrogate-keyed frame produced by the dimensions
/// stage.
#[derive(Debug, Clone)]
pub struct DimensionOutput {
    pub dimensions: DimensionSet,
    pub keyed: Vec<KeyedRecord>,
}

/// Runs the warehouse build against a connector.
pub struct Pipeline<'a> {
    config: &'a WarehouseConfig,
    connector: &'a dyn Connector,
}

async fn load(
    sink: &dyn WarehouseSink,
    table: &TableDef,
    rows: &[Row],
    report: &mut RunReport,
) -> Result<(), EtlError> {
    let inserted = replace_and_load(sink, table, rows).await?;
    log::info!("Loaded {inserted} rows into {}", table.name);
    report.tables.push(TableCount {
        table: table.name.to_string(),
        rows: inserted,
    });
    Ok(())
}

fn finished(stage: Stage, started: Instant) {
    log::info!(
        "Finished {stage} stage in {:.2}s",
        started.elapsed().as_secs_f64()
    );
}

impl<'a> Pipeline<'a> {
    #[must_use]
    pub const fn new(config: &'a WarehouseConfig, connector: &'a dyn Connector) -> Self {
        Self { config, connector }
    }

    /// Runs every stage in order and returns the run report.
    ///
    /// # Errors
    ///
    /// Returns the first [`StageError`]. Tables committed by earlier stages
    /// are left in place.
    pub async fn run(&self) -> Result<RunReport, StageError> {
        let mut report = RunReport::default();

        let extracted = self.extract(&mut report).await?;
        let dimensions = self.load_dimensions(&extracted, &mut report).await?;
        drop(extracted);
        self.load_facts(&dimensions, &mut report).await?;
        drop(dimensions);
        self.wire_schema().await?;

        log::info!(
            "Warehouse build complete: {} tables loaded, {} warnings",
            report.tables.len(),
            report.warnings.len()
        );

        Ok(report)
    }

    /// Reads, cleans, aggregates, gap-fills, and joins the inputs. Persists
    /// the staging tables when enabled.
    ///
    /// # Errors
    ///
    /// Returns a [`StageError`] for unreadable or malformed input, or if the
    /// sink is unavailable.
    pub async fn extract(&self, report: &mut RunReport) -> Result<ExtractOutput, StageError> {
        let stage = Stage::Extract;
        let started = Instant::now();
        log::info!("Starting {stage} stage");

        let conn = StageConnection::acquire(self.connector, stage).await?;
        let fail = |e| StageError::new(stage, e);
        let config = self.config;

        let crime_table = source::read_csv(&config.crime_csv).map_err(fail)?;
        let cleaned = normalize_crimes(&crime_table, config).map_err(fail)?;

        let files = source::list_csv_files(&config.weather_dir).map_err(fail)?;
        if files.is_empty() {
            log::warn!("No weather files in {}", config.weather_dir.display());
        }
        let weather_tables = files
            .iter()
            .map(|path| source::read_csv(path))
            .collect::<Result<Vec<_>, _>>()
            .map_err(fail)?;
        let observations = normalize_weather(&weather_tables, config).map_err(fail)?;

        let mut climate = aggregate_daily(&observations);
        let gap_fill = fill_gaps(
            &mut climate,
            &config.sentinels.missing_weather,
            &config.gap_fill,
        );
        if gap_fill.missing_after > 0 {
            report.warnings.push(QualityWarning {
                stage,
                subject: tables::WEATHER_SOURCE.name.to_string(),
                message: format!(
                    "{} days still {:?} after {} gap-fill passes",
                    gap_fill.missing_after, config.sentinels.missing_weather, gap_fill.passes
                ),
            });
        }

        let joined = join_climate(&cleaned.records, &climate, &mut report.warnings);

        if config.staging_tables {
            load(&*conn, &tables::CRIME_SOURCE, &to_rows(&cleaned.records), report)
                .await
                .map_err(fail)?;
            load(&*conn, &tables::WEATHER_SOURCE, &to_rows(&climate), report)
                .await
                .map_err(fail)?;
        }

        report.crime_rows_read = cleaned.rows_read;
        report.crime_rows_cleaned = cleaned.records.len();
        report.weather_files = weather_tables.len();
        report.weather_rows_read = weather_tables.iter().map(|t| t.rows.len()).sum();
        report.climate_days = climate.len();
        report.gap_fill = gap_fill;

        drop(conn);
        finished(stage, started);

        Ok(ExtractOutput {
            crimes: cleaned.records,
            climate,
            joined,
        })
    }

    /// Replaces the previous run's warehouse tables, then builds and loads
    /// the four dimensions and their surrogate tables.
    ///
    /// # Errors
    ///
    /// Returns a [`StageError`] if a drop or load fails.
    pub async fn load_dimensions(
        &self,
        extracted: &ExtractOutput,
        report: &mut RunReport,
    ) -> Result<DimensionOutput, StageError> {
        let stage = Stage::Dimensions;
        let started = Instant::now();
        log::info!("Starting {stage} stage");

        let conn = StageConnection::acquire(self.connector, stage).await?;
        let fail = |e| StageError::new(stage, e);

        // Fact first, so no remaining table references a dropped one.
        for table in tables::WAREHOUSE_TABLES.iter().rev() {
            conn.execute(&Statement::DropTable(table))
                .await
                .map_err(|e| fail(e.into()))?;
        }

        let mut warnings = Vec::new();
        let dimensions = DimensionSet::build(&extracted.joined, self.config.key_order, &mut warnings);
        report.warnings.extend(warnings);

        for (table, rows) in dimensions.table_rows() {
            load(&*conn, table, &rows, report).await.map_err(fail)?;
        }

        let keyed = dimensions.attach_keys(&extracted.joined);

        drop(conn);
        finished(stage, started);

        Ok(DimensionOutput { dimensions, keyed })
    }

    /// Assembles and loads the fact table.
    ///
    /// # Errors
    ///
    /// Returns a [`StageError`] for a missing surrogate key, a duplicate fact
    /// key, or a failed load.
    pub async fn load_facts(
        &self,
        dimensions: &DimensionOutput,
        report: &mut RunReport,
    ) -> Result<Vec<FactRecord>, StageError> {
        let stage = Stage::Facts;
        let started = Instant::now();
        log::info!("Starting {stage} stage");

        let conn = StageConnection::acquire(self.connector, stage).await?;
        let fail = |e| StageError::new(stage, e);

        let facts = assemble_facts(&dimensions.keyed).map_err(fail)?;
        load(&*conn, &tables::FACT, &to_rows(&facts), report)
            .await
            .map_err(fail)?;

        drop(conn);
        finished(stage, started);

        Ok(facts)
    }

    /// Attaches primary and foreign keys to every warehouse table.
    ///
    /// # Errors
    ///
    /// Returns a [`StageError`] if a table cannot be constrained.
    pub async fn wire_schema(&self) -> Result<(), StageError> {
        let stage = Stage::Schema;
        let started = Instant::now();
        log::info!("Starting {stage} stage");

        let conn = StageConnection::acquire(self.connector, stage).await?;
        let keyed = apply_plan(&*conn, &warehouse_plan())
            .await
            .map_err(|e| StageError::new(stage, e))?;
        log::info!("Keyed {keyed} tables");

        drop(conn);
        finished(stage, started);
        Ok(())
    }
}
