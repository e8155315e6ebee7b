//! In-process relational sink.
//!
//! Tables live in a shared map behind the [`MemoryConnector`], so every
//! connection it hands out sees the same warehouse. Primary keys, foreign
//! keys, and `ON DELETE CASCADE` are enforced here rather than delegated to
//! a database engine. Transactions snapshot the whole state on `begin` and
//! restore it on `rollback` (or when a connection is dropped mid-transaction).

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use crime_warehouse_database_models::{
    Constraint, ForeignKey, KeyValue, OnDelete, Row, Statement, TableDef,
};

use crate::{Connector, DbError, WarehouseSink};

#[derive(Debug, Clone)]
struct MemoryTable {
    def: TableDef,
    rows: Vec<Row>,
    primary_key: Option<Vec<&'static str>>,
    foreign_keys: Vec<ForeignKey>,
}

impl MemoryTable {
    const fn new(def: TableDef) -> Self {
        Self {
            def,
            rows: Vec::new(),
            primary_key: None,
            foreign_keys: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default)]
struct MemoryState {
    tables: BTreeMap<&'static str, MemoryTable>,
}

/// Hands out [`MemorySink`] connections over one shared warehouse.
#[derive(Debug, Clone, Default)]
pub struct MemoryConnector {
    state: Arc<Mutex<MemoryState>>,
    open: Arc<AtomicUsize>,
    unavailable: Arc<AtomicBool>,
}

impl MemoryConnector {
    /// Creates an empty in-memory warehouse.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of connections currently held.
    #[must_use]
    pub fn open_connections(&self) -> usize {
        self.open.load(Ordering::SeqCst)
    }

    /// Makes subsequent [`Connector::connect`] calls fail, simulating an
    /// unreachable sink.
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    /// Names of all existing tables, sorted.
    #[must_use]
    pub fn table_names(&self) -> Vec<&'static str> {
        self.state
            .lock()
            .map(|s| s.tables.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Primary key columns of `table`, if it has been keyed.
    #[must_use]
    pub fn primary_key(&self, table: &str) -> Option<Vec<&'static str>> {
        self.state
            .lock()
            .ok()
            .and_then(|s| s.tables.get(table).and_then(|t| t.primary_key.clone()))
    }

    /// Foreign keys declared on `table`.
    #[must_use]
    pub fn foreign_keys(&self, table: &str) -> Vec<ForeignKey> {
        self.state
            .lock()
            .ok()
            .and_then(|s| s.tables.get(table).map(|t| t.foreign_keys.clone()))
            .unwrap_or_default()
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    fn label(&self) -> &str {
        "memory"
    }

    async fn connect(&self) -> Result<Box<dyn WarehouseSink>, DbError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(DbError::Connection {
                message: "in-memory sink marked unavailable".to_string(),
            });
        }
        self.open.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemorySink {
            state: Arc::clone(&self.state),
            open: Arc::clone(&self.open),
            snapshot: Mutex::new(None),
        }))
    }
}

/// A connection to a [`MemoryConnector`] warehouse.
pub struct MemorySink {
    state: Arc<Mutex<MemoryState>>,
    open: Arc<AtomicUsize>,
    snapshot: Mutex<Option<MemoryState>>,
}

impl Drop for MemorySink {
    fn drop(&mut self) {
        if let Ok(mut snapshot) = self.snapshot.lock()
            && let Some(saved) = snapshot.take()
        {
            log::warn!("Connection dropped with an open transaction; rolling back");
            if let Ok(mut state) = self.state.lock() {
                *state = saved;
            }
        }
        self.open.fetch_sub(1, Ordering::SeqCst);
    }
}

fn poisoned() -> DbError {
    DbError::Connection {
        message: "in-memory sink state poisoned".to_string(),
    }
}

impl MemorySink {
    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>, DbError> {
        self.state.lock().map_err(|_| poisoned())
    }
}

fn column_indices(def: &TableDef, columns: &[&str]) -> Result<Vec<usize>, DbError> {
    columns
        .iter()
        .map(|c| {
            def.column_index(c).ok_or_else(|| DbError::Conversion {
                message: format!("{} has no column {c}", def.name),
            })
        })
        .collect()
}

/// Key of `row` at `indices`, or `None` if any part is `NULL`.
fn key_of(row: &Row, indices: &[usize]) -> Option<Vec<KeyValue>> {
    indices.iter().map(|&i| row.get(i).and_then(|v| v.key())).collect()
}

fn render_key(key: &[KeyValue]) -> String {
    let parts: Vec<String> = key
        .iter()
        .map(|k| match k {
            KeyValue::Integer(v) => v.to_string(),
            KeyValue::Real(bits) => f64::from_bits(*bits).to_string(),
            KeyValue::Text(v) => format!("'{v}'"),
        })
        .collect();
    format!("({})", parts.join(", "))
}

fn check_primary_key(table: &MemoryTable, columns: &[&str]) -> Result<(), DbError> {
    let indices = column_indices(&table.def, columns)?;
    let mut seen = BTreeSet::new();
    for row in &table.rows {
        let Some(key) = key_of(row, &indices) else {
            return Err(DbError::PrimaryKeyViolation {
                table: table.def.name.to_string(),
                key: format!("NULL in ({})", columns.join(", ")),
            });
        };
        if !seen.insert(key.clone()) {
            return Err(DbError::PrimaryKeyViolation {
                table: table.def.name.to_string(),
                key: render_key(&key),
            });
        }
    }
    Ok(())
}

fn check_foreign_key(
    state: &MemoryState,
    table: &MemoryTable,
    fk: &ForeignKey,
) -> Result<(), DbError> {
    let violation = |detail: String| DbError::ForeignKeyViolation {
        table: table.def.name.to_string(),
        references: fk.references.to_string(),
        detail,
    };

    let parent = state
        .tables
        .get(fk.references)
        .ok_or_else(|| DbError::UnknownTable {
            table: fk.references.to_string(),
        })?;

    if parent.primary_key.as_deref() != Some(fk.referenced_columns.as_slice()) {
        return Err(violation(format!(
            "({}) is not the primary key of {}",
            fk.referenced_columns.join(", "),
            fk.references
        )));
    }

    let parent_idx = column_indices(&parent.def, &fk.referenced_columns)?;
    let parent_keys: BTreeSet<Vec<KeyValue>> = parent
        .rows
        .iter()
        .filter_map(|r| key_of(r, &parent_idx))
        .collect();

    let child_idx = column_indices(&table.def, &fk.columns)?;
    for row in &table.rows {
        if let Some(key) = key_of(row, &child_idx)
            && !parent_keys.contains(&key)
        {
            return Err(violation(format!(
                "{} has no match for ({}) = {}",
                fk.references,
                fk.columns.join(", "),
                render_key(&key)
            )));
        }
    }
    Ok(())
}

fn apply_constraints(
    state: &mut MemoryState,
    def: &TableDef,
    constraints: &[Constraint],
) -> Result<(), DbError> {
    let mut table = state
        .tables
        .get(def.name)
        .cloned()
        .ok_or_else(|| DbError::UnknownTable {
            table: def.name.to_string(),
        })?;

    for constraint in constraints {
        match constraint {
            Constraint::PrimaryKey(columns) => {
                if table.primary_key.is_some() {
                    return Err(DbError::PrimaryKeyViolation {
                        table: def.name.to_string(),
                        key: "primary key already defined".to_string(),
                    });
                }
                check_primary_key(&table, columns)?;
                table.primary_key = Some(columns.clone());
            }
            Constraint::ForeignKey(fk) => {
                check_foreign_key(state, &table, fk)?;
                table.foreign_keys.push(fk.clone());
            }
        }
    }

    state.tables.insert(def.name, table);
    Ok(())
}

/// Removes foreign keys on other tables that point at `table`, the way
/// `DROP TABLE ... CASCADE` does.
fn detach_dependents(state: &mut MemoryState, table: &str) {
    for other in state.tables.values_mut() {
        other.foreign_keys.retain(|fk| fk.references != table);
    }
}

fn delete_matching(
    state: &mut MemoryState,
    table: &'static str,
    matches: &dyn Fn(&Row) -> bool,
) -> Result<u64, DbError> {
    let target = state
        .tables
        .get_mut(table)
        .ok_or_else(|| DbError::UnknownTable {
            table: table.to_string(),
        })?;
    let def = target.def;
    let (removed, kept): (Vec<Row>, Vec<Row>) = target.rows.drain(..).partition(|r| matches(r));
    target.rows = kept;

    if removed.is_empty() {
        return Ok(0);
    }

    let dependents: Vec<(&'static str, ForeignKey)> = state
        .tables
        .values()
        .flat_map(|child| {
            child
                .foreign_keys
                .iter()
                .filter(|fk| fk.references == table)
                .map(|fk| (child.def.name, fk.clone()))
        })
        .collect();

    for (child, fk) in dependents {
        let parent_idx = column_indices(&def, &fk.referenced_columns)?;
        let removed_keys: BTreeSet<Vec<KeyValue>> = removed
            .iter()
            .filter_map(|r| key_of(r, &parent_idx))
            .collect();
        let child_def = state.tables[child].def;
        let child_idx = column_indices(&child_def, &fk.columns)?;
        let hit = move |r: &Row| key_of(r, &child_idx).is_some_and(|k| removed_keys.contains(&k));

        match fk.on_delete {
            OnDelete::Cascade => {
                delete_matching(state, child, &hit)?;
            }
            OnDelete::NoAction => {
                if state.tables[child].rows.iter().any(&hit) {
                    return Err(DbError::ForeignKeyViolation {
                        table: child.to_string(),
                        references: table.to_string(),
                        detail: "dependent rows exist".to_string(),
                    });
                }
            }
        }
    }

    Ok(removed.len() as u64)
}

fn insert_rows(state: &mut MemoryState, def: &TableDef, rows: &[Row]) -> Result<u64, DbError> {
    let mut table = state
        .tables
        .get(def.name)
        .cloned()
        .ok_or_else(|| DbError::UnknownTable {
            table: def.name.to_string(),
        })?;

    for row in rows {
        if row.len() != table.def.columns.len() {
            return Err(DbError::Arity {
                table: def.name.to_string(),
                expected: table.def.columns.len(),
                actual: row.len(),
            });
        }
    }
    table.rows.extend(rows.iter().cloned());

    if let Some(pk) = table.primary_key.clone() {
        check_primary_key(&table, &pk)?;
    }
    for fk in &table.foreign_keys {
        check_foreign_key(state, &table, fk)?;
    }

    state.tables.insert(def.name, table);
    Ok(rows.len() as u64)
}

#[async_trait]
impl WarehouseSink for MemorySink {
    async fn execute(&self, statement: &Statement<'_>) -> Result<u64, DbError> {
        let mut state = self.lock()?;
        match statement {
            Statement::ReplaceTable(def) => {
                detach_dependents(&mut state, def.name);
                state.tables.insert(def.name, MemoryTable::new(**def));
                Ok(0)
            }
            Statement::DropTable(def) => {
                detach_dependents(&mut state, def.name);
                state.tables.remove(def.name);
                Ok(0)
            }
            Statement::ApplyConstraints { table, constraints } => {
                apply_constraints(&mut state, table, constraints)?;
                Ok(0)
            }
            Statement::DeleteWhere {
                table,
                column,
                value,
            } => {
                let idx = column_indices(table, &[*column])?[0];
                let mut working = state.clone();
                let target = value.clone();
                let deleted = delete_matching(&mut working, table.name, &move |r: &Row| {
                    r.get(idx).is_some_and(|v| *v == target)
                })?;
                *state = working;
                Ok(deleted)
            }
        }
    }

    async fn bulk_insert(&self, table: &TableDef, rows: &[Row]) -> Result<u64, DbError> {
        let mut state = self.lock()?;
        insert_rows(&mut state, table, rows)
    }

    async fn fetch(&self, table: &TableDef) -> Result<Vec<Row>, DbError> {
        let state = self.lock()?;
        state
            .tables
            .get(table.name)
            .map(|t| t.rows.clone())
            .ok_or_else(|| DbError::UnknownTable {
                table: table.name.to_string(),
            })
    }

    async fn table_exists(&self, table: &str) -> Result<bool, DbError> {
        Ok(self.lock()?.tables.contains_key(table))
    }

    async fn begin(&self) -> Result<(), DbError> {
        let mut snapshot = self.snapshot.lock().map_err(|_| poisoned())?;
        if snapshot.is_some() {
            return Err(DbError::Transaction {
                message: "transaction already open".to_string(),
            });
        }
        *snapshot = Some(self.lock()?.clone());
        Ok(())
    }

    async fn commit(&self) -> Result<(), DbError> {
        let mut snapshot = self.snapshot.lock().map_err(|_| poisoned())?;
        if snapshot.take().is_none() {
            return Err(DbError::Transaction {
                message: "commit without an open transaction".to_string(),
            });
        }
        Ok(())
    }

    async fn rollback(&self) -> Result<(), DbError> {
        let saved = self.snapshot.lock().map_err(|_| poisoned())?.take();
        if let Some(saved) = saved {
            *self.lock()? = saved;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crime_warehouse_database_models::{Column, Value};

    use super::*;

    const PARENT: TableDef = TableDef {
        name: "parent",
        columns: &[Column::integer("id"), Column::text("name")],
    };

    const CHILD: TableDef = TableDef {
        name: "child",
        columns: &[Column::integer("child_id"), Column::integer("parent_id")],
    };

    fn fk(on_delete: OnDelete) -> Constraint {
        Constraint::ForeignKey(ForeignKey {
            name: "child_parent_fk".to_string(),
            columns: vec!["parent_id"],
            references: "parent",
            referenced_columns: vec!["id"],
            on_delete,
        })
    }

    async fn seeded(connector: &MemoryConnector) -> Box<dyn WarehouseSink> {
        let sink = connector.connect().await.unwrap();
        sink.execute(&Statement::ReplaceTable(&PARENT)).await.unwrap();
        sink.execute(&Statement::ReplaceTable(&CHILD)).await.unwrap();
        sink.bulk_insert(
            &PARENT,
            &[
                vec![Value::Integer(1), Value::from("a")],
                vec![Value::Integer(2), Value::from("b")],
            ],
        )
        .await
        .unwrap();
        sink.bulk_insert(
            &CHILD,
            &[
                vec![Value::Integer(10), Value::Integer(1)],
                vec![Value::Integer(11), Value::Integer(1)],
                vec![Value::Integer(12), Value::Integer(2)],
            ],
        )
        .await
        .unwrap();
        sink
    }

    #[tokio::test]
    async fn rejects_duplicate_primary_key() {
        let connector = MemoryConnector::new();
        let sink = connector.connect().await.unwrap();
        sink.execute(&Statement::ReplaceTable(&PARENT)).await.unwrap();
        sink.bulk_insert(
            &PARENT,
            &[
                vec![Value::Integer(1), Value::from("a")],
                vec![Value::Integer(1), Value::from("b")],
            ],
        )
        .await
        .unwrap();

        let err = sink
            .execute(&Statement::ApplyConstraints {
                table: &PARENT,
                constraints: &[Constraint::PrimaryKey(vec!["id"])],
            })
            .await
            .unwrap_err();
        assert!(err.is_integrity());
        assert!(connector.primary_key("parent").is_none());
    }

    #[tokio::test]
    async fn foreign_key_requires_keyed_parent() {
        let connector = MemoryConnector::new();
        let sink = seeded(&connector).await;

        let constraints = [Constraint::PrimaryKey(vec!["child_id"]), fk(OnDelete::Cascade)];
        let err = sink
            .execute(&Statement::ApplyConstraints {
                table: &CHILD,
                constraints: &constraints,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::ForeignKeyViolation { .. }));
        // All-or-nothing: the primary key was not kept either.
        assert!(connector.primary_key("child").is_none());
    }

    #[tokio::test]
    async fn cascade_delete_removes_dependents() {
        let connector = MemoryConnector::new();
        let sink = seeded(&connector).await;
        sink.execute(&Statement::ApplyConstraints {
            table: &PARENT,
            constraints: &[Constraint::PrimaryKey(vec!["id"])],
        })
        .await
        .unwrap();
        sink.execute(&Statement::ApplyConstraints {
            table: &CHILD,
            constraints: &[Constraint::PrimaryKey(vec!["child_id"]), fk(OnDelete::Cascade)],
        })
        .await
        .unwrap();

        let deleted = sink
            .execute(&Statement::DeleteWhere {
                table: &PARENT,
                column: "id",
                value: Value::Integer(1),
            })
            .await
            .unwrap();
        assert_eq!(deleted, 1);

        let children = sink.fetch(&CHILD).await.unwrap();
        assert_eq!(children, vec![vec![Value::Integer(12), Value::Integer(2)]]);
    }

    #[tokio::test]
    async fn no_action_blocks_delete() {
        let connector = MemoryConnector::new();
        let sink = seeded(&connector).await;
        sink.execute(&Statement::ApplyConstraints {
            table: &PARENT,
            constraints: &[Constraint::PrimaryKey(vec!["id"])],
        })
        .await
        .unwrap();
        sink.execute(&Statement::ApplyConstraints {
            table: &CHILD,
            constraints: &[fk(OnDelete::NoAction)],
        })
        .await
        .unwrap();

        let err = sink
            .execute(&Statement::DeleteWhere {
                table: &PARENT,
                column: "id",
                value: Value::Integer(2),
            })
            .await
            .unwrap_err();
        assert!(err.is_integrity());
        assert_eq!(sink.fetch(&PARENT).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn rollback_restores_snapshot() {
        let connector = MemoryConnector::new();
        let sink = seeded(&connector).await;

        sink.begin().await.unwrap();
        sink.execute(&Statement::DropTable(&CHILD)).await.unwrap();
        assert!(!sink.table_exists("child").await.unwrap());
        sink.rollback().await.unwrap();

        assert!(sink.table_exists("child").await.unwrap());
        assert_eq!(sink.fetch(&CHILD).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn dropping_connection_releases_and_rolls_back() {
        let connector = MemoryConnector::new();
        {
            let sink = seeded(&connector).await;
            assert_eq!(connector.open_connections(), 1);
            sink.begin().await.unwrap();
            sink.execute(&Statement::DropTable(&PARENT)).await.unwrap();
        }
        assert_eq!(connector.open_connections(), 0);
        assert!(connector.table_names().contains(&"parent"));
    }

    #[tokio::test]
    async fn unavailable_connector_refuses_connections() {
        let connector = MemoryConnector::new();
        connector.set_available(false);
        let err = connector.connect().await.err().unwrap();
        assert!(err.is_resource());
        assert_eq!(connector.open_connections(), 0);
    }

    #[tokio::test]
    async fn commit_without_begin_is_an_error() {
        let connector = MemoryConnector::new();
        let sink = connector.connect().await.unwrap();
        assert!(matches!(
            sink.commit().await,
            Err(DbError::Transaction { .. })
        ));
    }
}
