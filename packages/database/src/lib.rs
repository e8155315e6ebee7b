#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Relational sink for the crime warehouse.
//!
//! The ETL pipeline talks to storage only through [`WarehouseSink`], which
//! exposes execute/commit/fetch and bulk insert. Two implementations exist:
//!
//! - [`sql::SqlSink`] wraps a `switchy_database` connection (`PostgreSQL` or
//!   `SQLite`) and renders statements to SQL.
//! - [`memory::MemorySink`] keeps tables in process and enforces keys,
//!   referential integrity, and cascade deletes itself. It backs dry runs
//!   and tests.

pub mod db;
pub mod memory;
pub mod sql;
pub mod tables;

use async_trait::async_trait;
use crime_warehouse_database_models::{Row, Statement, TableDef};

pub use crime_warehouse_database_models as models;

/// Errors that can occur during sink operations.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// Database query error.
    #[error("Database error: {0}")]
    Database(#[from] switchy_database::DatabaseError),

    /// The sink could not be reached or the connection was lost.
    #[error("Connection error: {message}")]
    Connection {
        /// Description of what went wrong.
        message: String,
    },

    /// Data conversion error.
    #[error("Data conversion error: {message}")]
    Conversion {
        /// Description of what went wrong.
        message: String,
    },

    /// The statement names a table that does not exist in the sink.
    #[error("Unknown table: {table}")]
    UnknownTable {
        /// Table name.
        table: String,
    },

    /// A row's width does not match the table layout.
    #[error("Row for {table} has {actual} values, expected {expected}")]
    Arity {
        /// Table name.
        table: String,
        /// Column count of the table.
        expected: usize,
        /// Value count of the offending row.
        actual: usize,
    },

    /// Two rows share a primary key, or a key column is `NULL`.
    #[error("Primary key violation on {table}: key {key}")]
    PrimaryKeyViolation {
        /// Table name.
        table: String,
        /// Offending key, rendered.
        key: String,
    },

    /// A foreign key value has no referenced row, or the referenced table is
    /// not keyed on the referenced columns.
    #[error("Foreign key violation on {table} -> {references}: {detail}")]
    ForeignKeyViolation {
        /// Referencing table.
        table: String,
        /// Referenced table.
        references: String,
        /// Offending key or missing key description.
        detail: String,
    },

    /// Transaction misuse (nested `begin`, `commit` without `begin`, ...).
    #[error("Transaction error: {message}")]
    Transaction {
        /// Description of what went wrong.
        message: String,
    },
}

impl DbError {
    /// Returns `true` for errors raised by key or referential checks.
    #[must_use]
    pub const fn is_integrity(&self) -> bool {
        matches!(
            self,
            Self::PrimaryKeyViolation { .. } | Self::ForeignKeyViolation { .. }
        )
    }

    /// Returns `true` when the sink itself is unavailable.
    #[must_use]
    pub const fn is_resource(&self) -> bool {
        matches!(self, Self::Connection { .. } | Self::Database(_))
    }
}

/// A relational sink the pipeline writes the warehouse into.
///
/// Outside of [`begin`](Self::begin)/[`commit`](Self::commit) every call is
/// its own unit of work.
#[async_trait]
pub trait WarehouseSink: Send + Sync {
    /// Executes a schema or data statement. Returns affected rows where the
    /// statement has a row count, `0` otherwise.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the statement fails.
    async fn execute(&self, statement: &Statement<'_>) -> Result<u64, DbError>;

    /// Inserts `rows` into `table`. Each row holds one value per column in
    /// table order.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if any chunk fails to insert.
    async fn bulk_insert(&self, table: &TableDef, rows: &[Row]) -> Result<u64, DbError>;

    /// Reads every row of `table`, in table column order.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the table is missing or a value cannot be
    /// converted.
    async fn fetch(&self, table: &TableDef) -> Result<Vec<Row>, DbError>;

    /// Returns whether a table with this name exists.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the catalog query fails.
    async fn table_exists(&self, table: &str) -> Result<bool, DbError>;

    /// Opens a transaction.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if a transaction is already open or cannot start.
    async fn begin(&self) -> Result<(), DbError>;

    /// Commits the open transaction.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if no transaction is open or the commit fails.
    async fn commit(&self) -> Result<(), DbError>;

    /// Rolls back the open transaction. A no-op when none is open.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the rollback fails.
    async fn rollback(&self) -> Result<(), DbError>;
}

/// Hands out sink connections, one per unit of work.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Short label for log messages (`postgres`, `sqlite`, `memory`).
    fn label(&self) -> &str;

    /// Opens a connection and verifies it responds.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Connection`] if the sink is unreachable.
    async fn connect(&self) -> Result<Box<dyn WarehouseSink>, DbError>;
}

/// Runs `statements` inside one transaction, rolling back if any fails.
///
/// # Errors
///
/// Returns the first statement's [`DbError`] after rolling back.
pub async fn execute_atomically(
    sink: &dyn WarehouseSink,
    statements: &[Statement<'_>],
) -> Result<(), DbError> {
    sink.begin().await?;
    for statement in statements {
        if let Err(e) = sink.execute(statement).await {
            if let Err(rollback) = sink.rollback().await {
                log::error!("Rollback failed after {e}: {rollback}");
            }
            return Err(e);
        }
    }
    sink.commit().await
}

/// Replaces `table` and loads `rows` into it as a single transaction, so a
/// failed load never leaves a half-filled table behind.
///
/// # Errors
///
/// Returns [`DbError`] if the replace or any insert fails.
pub async fn replace_and_load(
    sink: &dyn WarehouseSink,
    table: &TableDef,
    rows: &[Row],
) -> Result<u64, DbError> {
    sink.begin().await?;
    let result = async {
        sink.execute(&Statement::ReplaceTable(table)).await?;
        sink.bulk_insert(table, rows).await
    }
    .await;

    match result {
        Ok(inserted) => {
            sink.commit().await?;
            log::debug!("Loaded {inserted} rows into {}", table.name);
            Ok(inserted)
        }
        Err(e) => {
            if let Err(rollback) = sink.rollback().await {
                log::error!("Rollback of {} failed after {e}: {rollback}", table.name);
            }
            Err(e)
        }
    }
}
