//! SQL sink over a `switchy_database` connection.
//!
//! Statements are rendered per [`Dialect`]. `PostgreSQL` attaches keys with
//! `ALTER TABLE ... ADD CONSTRAINT`. `SQLite` cannot add constraints to an
//! existing table, so the table is rebuilt: a constrained copy is created,
//! rows are copied over, and the copy replaces the original. Either way the
//! statements for one table run inside the caller's transaction.

use async_trait::async_trait;
use crime_warehouse_database_models::{ColumnType, Constraint, Row, Statement, TableDef, Value};
use moosicbox_json_utils::database::ToValue as _;
use switchy_database::{Database, DatabaseTransaction, DatabaseValue};
use tokio::sync::Mutex;

use crate::{DbError, WarehouseSink};

/// Maximum number of bind parameters per statement. `SQLite`'s default
/// limit is lower than `PostgreSQL`'s 65,535, so it bounds both.
pub const MAX_PARAMS: usize = 32_766;

/// Suffix for the constrained copy built during a `SQLite` rebuild.
const REBUILD_SUFFIX: &str = "__constrained";

/// SQL flavor spoken by the underlying connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// `PostgreSQL`.
    Postgres,
    /// `SQLite`.
    Sqlite,
}

impl Dialect {
    #[must_use]
    const fn column_type(self, column_type: ColumnType) -> &'static str {
        match (self, column_type) {
            (_, ColumnType::Integer) => "BIGINT",
            (Self::Postgres, ColumnType::Real) => "DOUBLE PRECISION",
            (Self::Sqlite, ColumnType::Real) => "REAL",
            (_, ColumnType::Text) => "TEXT",
        }
    }

    fn placeholder(self, n: usize) -> String {
        match self {
            Self::Postgres => format!("${n}"),
            Self::Sqlite => "?".to_string(),
        }
    }
}

fn column_list(table: &TableDef) -> String {
    table.column_names().join(", ")
}

fn constraint_clause(constraint: &Constraint, table: &str) -> String {
    match constraint {
        Constraint::PrimaryKey(columns) => format!(
            "CONSTRAINT {table}_pkey PRIMARY KEY ({})",
            columns.join(", ")
        ),
        Constraint::ForeignKey(fk) => format!(
            "CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({}) ON DELETE {}",
            fk.name,
            fk.columns.join(", "),
            fk.references,
            fk.referenced_columns.join(", "),
            fk.on_delete
        ),
    }
}

/// Renders `CREATE TABLE` for `table` under `name`, with optional inline
/// constraints.
#[must_use]
pub fn render_create_table(
    dialect: Dialect,
    table: &TableDef,
    name: &str,
    constraints: &[Constraint],
) -> String {
    let mut parts: Vec<String> = table
        .columns
        .iter()
        .map(|c| format!("{} {}", c.name, dialect.column_type(c.column_type)))
        .collect();
    parts.extend(constraints.iter().map(|c| constraint_clause(c, table.name)));
    format!("CREATE TABLE {name} ({})", parts.join(", "))
}

/// Renders `DROP TABLE IF EXISTS`. On `PostgreSQL` dependent foreign keys
/// are dropped along with the table.
#[must_use]
pub fn render_drop_table(dialect: Dialect, name: &str) -> String {
    match dialect {
        Dialect::Postgres => format!("DROP TABLE IF EXISTS {name} CASCADE"),
        Dialect::Sqlite => format!("DROP TABLE IF EXISTS {name}"),
    }
}

/// Renders the statements that attach `constraints` to an existing,
/// populated `table`.
#[must_use]
pub fn render_constraints(
    dialect: Dialect,
    table: &TableDef,
    constraints: &[Constraint],
) -> Vec<String> {
    match dialect {
        Dialect::Postgres => constraints
            .iter()
            .map(|c| {
                format!(
                    "ALTER TABLE {} ADD {}",
                    table.name,
                    constraint_clause(c, table.name)
                )
            })
            .collect(),
        Dialect::Sqlite => {
            let copy = format!("{}{REBUILD_SUFFIX}", table.name);
            let columns = column_list(table);
            vec![
                render_drop_table(dialect, &copy),
                render_create_table(dialect, table, &copy, constraints),
                format!(
                    "INSERT INTO {copy} ({columns}) SELECT {columns} FROM {}",
                    table.name
                ),
                format!("DROP TABLE {}", table.name),
                format!("ALTER TABLE {copy} RENAME TO {}", table.name),
            ]
        }
    }
}

/// Renders a multi-row `INSERT` for `row_count` rows.
#[must_use]
pub fn render_insert(dialect: Dialect, table: &TableDef, row_count: usize) -> String {
    let width = table.columns.len();
    let mut sql = format!("INSERT INTO {} ({}) VALUES ", table.name, column_list(table));
    let mut n = 1usize;
    for i in 0..row_count {
        if i > 0 {
            sql.push_str(", ");
        }
        sql.push('(');
        for j in 0..width {
            if j > 0 {
                sql.push_str(", ");
            }
            sql.push_str(&dialect.placeholder(n));
            n += 1;
        }
        sql.push(')');
    }
    sql
}

/// Renders `DELETE ... WHERE column = <param 1>`.
#[must_use]
pub fn render_delete(dialect: Dialect, table: &TableDef, column: &str) -> String {
    format!(
        "DELETE FROM {} WHERE {column} = {}",
        table.name,
        dialect.placeholder(1)
    )
}

fn to_database_value(value: &Value) -> DatabaseValue {
    match value {
        Value::Null => DatabaseValue::Null,
        Value::Integer(v) => DatabaseValue::Int64(*v),
        Value::Real(v) => DatabaseValue::Real64(*v),
        Value::Text(v) => DatabaseValue::String(v.clone()),
    }
}

fn from_row(table: &TableDef, row: &switchy_database::Row) -> Result<Row, DbError> {
    table
        .columns
        .iter()
        .map(|c| {
            let value = match c.column_type {
                ColumnType::Integer => row
                    .to_value::<Option<i64>>(c.name)
                    .map(Value::from),
                ColumnType::Real => row.to_value::<Option<f64>>(c.name).map(Value::from),
                ColumnType::Text => row.to_value::<Option<String>>(c.name).map(Value::from),
            };
            value.map_err(|e| DbError::Conversion {
                message: format!("{}.{}: {e:?}", table.name, c.name),
            })
        })
        .collect()
}

/// Which key a failed statement violated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Violation {
    PrimaryKey,
    ForeignKey,
}

/// Recognizes key violations in `PostgreSQL` (SQLSTATE class 23) and
/// `SQLite` error text.
fn violation(message: &str) -> Option<Violation> {
    let message = message.to_ascii_lowercase();
    if message.contains("foreign key") || message.contains("23503") {
        Some(Violation::ForeignKey)
    } else if [
        "duplicate key",
        "unique constraint",
        "could not create unique index",
        "primary key",
        "not null constraint",
        "contains null values",
        "23505",
        "23502",
    ]
    .iter()
    .any(|needle| message.contains(needle))
    {
        Some(Violation::PrimaryKey)
    } else {
        None
    }
}

/// Maps an engine error raised while writing `table` to a key violation
/// when its text names one. `references` lists the tables the write could
/// have dangled into. Other errors pass through unchanged.
fn integrity_error(table: &str, references: &str, err: DbError) -> DbError {
    let DbError::Database(e) = &err else {
        return err;
    };
    let detail = e.to_string();
    match violation(&detail) {
        Some(Violation::PrimaryKey) => DbError::PrimaryKeyViolation {
            table: table.to_string(),
            key: detail,
        },
        Some(Violation::ForeignKey) => DbError::ForeignKeyViolation {
            table: table.to_string(),
            references: references.to_string(),
            detail,
        },
        None => err,
    }
}

/// A [`WarehouseSink`] backed by a `switchy_database` connection.
pub struct SqlSink {
    db: Box<dyn Database>,
    dialect: Dialect,
    chunk_size: usize,
    tx: Mutex<Option<Box<dyn DatabaseTransaction>>>,
}

impl SqlSink {
    /// Wraps an open connection. `chunk_size` caps rows per `INSERT`.
    #[must_use]
    pub fn new(db: Box<dyn Database>, dialect: Dialect, chunk_size: usize) -> Self {
        Self {
            db,
            dialect,
            chunk_size: chunk_size.max(1),
            tx: Mutex::new(None),
        }
    }

    async fn exec(&self, sql: &str) -> Result<(), DbError> {
        log::debug!("{sql}");
        let tx = self.tx.lock().await;
        match tx.as_ref() {
            Some(tx) => tx.exec_raw(sql).await?,
            None => self.db.exec_raw(sql).await?,
        }
        Ok(())
    }

    async fn exec_params(&self, sql: &str, params: &[DatabaseValue]) -> Result<u64, DbError> {
        let tx = self.tx.lock().await;
        let affected = match tx.as_ref() {
            Some(tx) => tx.exec_raw_params(sql, params).await?,
            None => self.db.exec_raw_params(sql, params).await?,
        };
        Ok(affected)
    }

    async fn query(
        &self,
        sql: &str,
        params: &[DatabaseValue],
    ) -> Result<Vec<switchy_database::Row>, DbError> {
        log::debug!("{sql}");
        let tx = self.tx.lock().await;
        let rows = match tx.as_ref() {
            Some(tx) => tx.query_raw_params(sql, params).await?,
            None => self.db.query_raw_params(sql, params).await?,
        };
        Ok(rows)
    }
}

#[async_trait]
impl WarehouseSink for SqlSink {
    async fn execute(&self, statement: &Statement<'_>) -> Result<u64, DbError> {
        match statement {
            Statement::ReplaceTable(table) => {
                self.exec(&render_drop_table(self.dialect, table.name))
                    .await?;
                self.exec(&render_create_table(self.dialect, table, table.name, &[]))
                    .await?;
                Ok(0)
            }
            Statement::DropTable(table) => {
                self.exec(&render_drop_table(self.dialect, table.name))
                    .await?;
                Ok(0)
            }
            Statement::ApplyConstraints { table, constraints } => {
                let references = constraints
                    .iter()
                    .filter_map(Constraint::referenced_table)
                    .collect::<Vec<_>>()
                    .join(", ");
                for sql in render_constraints(self.dialect, table, constraints) {
                    self.exec(&sql)
                        .await
                        .map_err(|e| integrity_error(table.name, &references, e))?;
                }
                Ok(0)
            }
            Statement::DeleteWhere {
                table,
                column,
                value,
            } => {
                let sql = render_delete(self.dialect, table, column);
                log::debug!("{sql}");
                self.exec_params(&sql, &[to_database_value(value)]).await
            }
        }
    }

    async fn bulk_insert(&self, table: &TableDef, rows: &[Row]) -> Result<u64, DbError> {
        if rows.is_empty() {
            return Ok(0);
        }

        let width = table.columns.len();
        let chunk_size = self.chunk_size.min(MAX_PARAMS / width.max(1)).max(1);
        let mut inserted = 0u64;

        for chunk in rows.chunks(chunk_size) {
            let mut params = Vec::with_capacity(chunk.len() * width);
            for row in chunk {
                if row.len() != width {
                    return Err(DbError::Arity {
                        table: table.name.to_string(),
                        expected: width,
                        actual: row.len(),
                    });
                }
                params.extend(row.iter().map(to_database_value));
            }
            let sql = render_insert(self.dialect, table, chunk.len());
            inserted += self
                .exec_params(&sql, &params)
                .await
                .map_err(|e| integrity_error(table.name, "unknown", e))?;
        }

        log::debug!("Inserted {inserted} rows into {}", table.name);
        Ok(inserted)
    }

    async fn fetch(&self, table: &TableDef) -> Result<Vec<Row>, DbError> {
        let sql = format!("SELECT {} FROM {}", column_list(table), table.name);
        let rows = self.query(&sql, &[]).await?;
        rows.iter().map(|r| from_row(table, r)).collect()
    }

    async fn table_exists(&self, table: &str) -> Result<bool, DbError> {
        let sql = match self.dialect {
            Dialect::Postgres => {
                "SELECT 1 AS present FROM information_schema.tables WHERE table_name = $1"
            }
            Dialect::Sqlite => {
                "SELECT 1 AS present FROM sqlite_master WHERE type = 'table' AND name = ?"
            }
        };
        let rows = self
            .query(sql, &[DatabaseValue::String(table.to_string())])
            .await?;
        Ok(!rows.is_empty())
    }

    async fn begin(&self) -> Result<(), DbError> {
        let mut tx = self.tx.lock().await;
        if tx.is_some() {
            return Err(DbError::Transaction {
                message: "transaction already open".to_string(),
            });
        }
        *tx = Some(self.db.begin_transaction().await?);
        Ok(())
    }

    async fn commit(&self) -> Result<(), DbError> {
        let tx = self
            .tx
            .lock()
            .await
            .take()
            .ok_or_else(|| DbError::Transaction {
                message: "commit without an open transaction".to_string(),
            })?;
        tx.commit().await?;
        Ok(())
    }

    async fn rollback(&self) -> Result<(), DbError> {
        let tx = self.tx.lock().await.take();
        if let Some(tx) = tx {
            tx.rollback().await?;
        }
        Ok(())
    }
}
