#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Command-line entry point for the crime warehouse.
//!
//! `build` runs the full pipeline against the sink named by `--database` or
//! `DATABASE_URL`, `verify` re-checks a persisted warehouse, and `tables`
//! lists the warehouse tables with their row counts.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use crime_warehouse_database::{
    Connector,
    db::{self, DatabaseTarget},
    tables,
};
use crime_warehouse_etl::{Pipeline, StageError, WarehouseConfig, verify};
use serde::Serialize;

#[derive(Parser)]
#[command(
    name = "crime_warehouse",
    about = "Crime and climate star-schema warehouse builder"
)]
struct Cli {
    /// TOML config file. Defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Sink URL (`postgres://...`, `sqlite://<path>`, or `memory`).
    /// Overrides `DATABASE_URL`.
    #[arg(long, global = true)]
    database: Option<String>,

    /// Print reports as JSON on stdout.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Rebuild the warehouse from the crime CSV and weather directory
    Build {
        /// Crime incident CSV (overrides the config)
        #[arg(long)]
        crime_csv: Option<PathBuf>,

        /// Directory of weather CSV files (overrides the config)
        #[arg(long)]
        weather_dir: Option<PathBuf>,

        /// Check the warehouse after building
        #[arg(long)]
        verify: bool,
    },
    /// Check fact rows against the surrogate tables
    Verify,
    /// List warehouse tables and their row counts
    Tables,
}

#[derive(Serialize)]
struct TableStatus {
    table: &'static str,
    exists: bool,
    rows: Option<usize>,
}

fn print_json<T: Serialize>(value: &T) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn failed(e: StageError) -> Box<dyn std::error::Error> {
    log::error!("{e}");
    Box::new(e)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    pretty_env_logger::init();
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => WarehouseConfig::load(path)?,
        None => WarehouseConfig::default(),
    };

    let target = match &cli.database {
        Some(url) => DatabaseTarget::parse(url)?,
        None => DatabaseTarget::from_env()?,
    };
    log::info!("Using sink {target}");
    let connector = db::connector_for(&target, config.insert_chunk_size);

    match cli.command {
        Commands::Build {
            crime_csv,
            weather_dir,
            verify: check,
        } => {
            if let Some(path) = crime_csv {
                config.crime_csv = path;
            }
            if let Some(dir) = weather_dir {
                config.weather_dir = dir;
            }

            let report = Pipeline::new(&config, connector.as_ref())
                .run()
                .await
                .map_err(failed)?;

            if cli.json {
                print_json(&report)?;
            } else {
                for table in &report.tables {
                    println!("{:<32} {:>10}", table.table, table.rows);
                }
                println!(
                    "gap fill: {} missing days, {} passes, {} left",
                    report.gap_fill.missing_before,
                    report.gap_fill.passes,
                    report.gap_fill.missing_after
                );
                for warning in &report.warnings {
                    println!(
                        "warning [{}] {}: {}",
                        warning.stage, warning.subject, warning.message
                    );
                }
            }

            if check {
                run_verify(connector.as_ref(), cli.json).await?;
            }
        }
        Commands::Verify => run_verify(connector.as_ref(), cli.json).await?,
        Commands::Tables => list_tables(connector.as_ref(), cli.json).await?,
    }

    Ok(())
}

async fn run_verify(connector: &dyn Connector, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let report = verify::verify(connector).await.map_err(failed)?;

    if json {
        print_json(&report)?;
    } else {
        println!("{} fact rows checked", report.fact_rows);
        for orphan in &report.orphans {
            println!(
                "orphan fact {:?}: no row in {}",
                orphan.key, orphan.missing_from
            );
        }
        for mismatch in &report.crime_number_mismatches {
            println!(
                "date key {}: crime_number {} but {} fact rows",
                mismatch.date_surrogate_key, mismatch.stored, mismatch.counted
            );
        }
    }

    if report.is_clean() {
        log::info!("Warehouse is consistent");
        Ok(())
    } else {
        Err(format!(
            "{} orphan fact rows, {} crime_number mismatches",
            report.orphans.len(),
            report.crime_number_mismatches.len()
        )
        .into())
    }
}

async fn list_tables(connector: &dyn Connector, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let sink = connector.connect().await?;

    let mut statuses = Vec::new();
    for table in [&tables::CRIME_SOURCE, &tables::WEATHER_SOURCE]
        .into_iter()
        .chain(tables::WAREHOUSE_TABLES)
    {
        let exists = sink.table_exists(table.name).await?;
        let rows = if exists {
            Some(sink.fetch(table).await?.len())
        } else {
            None
        };
        statuses.push(TableStatus {
            table: table.name,
            exists,
            rows,
        });
    }

    if json {
        print_json(&statuses)?;
    } else {
        for status in &statuses {
            match status.rows {
                Some(rows) => println!("{:<32} {rows:>10}", status.table),
                None => println!("{:<32} {:>10}", status.table, "missing"),
            }
        }
    }

    Ok(())
}
