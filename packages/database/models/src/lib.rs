#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Column, table, constraint, and statement types for the warehouse sink.
//!
//! These types describe what the ETL pipeline asks of a relational sink
//! without committing to a SQL dialect. Each sink implementation in
//! `crime_warehouse_database` renders or interprets them.

use std::fmt;

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display};

/// A single cell value passed to or read from the sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// SQL `NULL`.
    Null,
    /// 64-bit signed integer.
    Integer(i64),
    /// Double-precision float.
    Real(f64),
    /// UTF-8 text.
    Text(String),
}

impl Value {
    /// Returns the integer payload, if this is an [`Value::Integer`].
    #[must_use]
    pub const fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the value as a float. Integers are widened.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Real(v) => Some(*v),
            Self::Integer(v) => Some(*v as f64),
            _ => None,
        }
    }

    /// Returns the text payload, if this is a [`Value::Text`].
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(v) => Some(v),
            _ => None,
        }
    }

    /// Returns `true` for [`Value::Null`].
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Returns a hashable form of this value for key comparisons, or `None`
    /// for `NULL` (which never participates in key equality).
    #[must_use]
    pub fn key(&self) -> Option<KeyValue> {
        match self {
            Self::Null => None,
            Self::Integer(v) => Some(KeyValue::Integer(*v)),
            Self::Real(v) => Some(KeyValue::Real(v.to_bits())),
            Self::Text(v) => Some(KeyValue::Text(v.clone())),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("NULL"),
            Self::Integer(v) => write!(f, "{v}"),
            Self::Real(v) => write!(f, "{v}"),
            Self::Text(v) => write!(f, "'{v}'"),
        }
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Self::Integer(i64::from(value))
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Real(value)
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl<T: Into<Self>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

/// Hashable projection of a non-null [`Value`]. Floats compare by bit
/// pattern.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum KeyValue {
    /// Integer key part.
    Integer(i64),
    /// Float key part (raw bits).
    Real(u64),
    /// Text key part.
    Text(String),
}

/// Storage class of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum ColumnType {
    /// Stored as `BIGINT`.
    Integer,
    /// Stored as a double-precision float.
    Real,
    /// Stored as `TEXT`.
    Text,
}

/// A column in a [`TableDef`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Column {
    /// Column name.
    pub name: &'static str,
    /// Storage class.
    pub column_type: ColumnType,
}

impl Column {
    /// Creates an integer column.
    #[must_use]
    pub const fn integer(name: &'static str) -> Self {
        Self {
            name,
            column_type: ColumnType::Integer,
        }
    }

    /// Creates a float column.
    #[must_use]
    pub const fn real(name: &'static str) -> Self {
        Self {
            name,
            column_type: ColumnType::Real,
        }
    }

    /// Creates a text column.
    #[must_use]
    pub const fn text(name: &'static str) -> Self {
        Self {
            name,
            column_type: ColumnType::Text,
        }
    }
}

/// An unconstrained table layout. Keys are attached later through
/// [`Statement::ApplyConstraints`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableDef {
    /// Table name.
    pub name: &'static str,
    /// Ordered column list.
    pub columns: &'static [Column],
}

impl TableDef {
    /// Returns the position of `column`, if present.
    #[must_use]
    pub fn column_index(&self, column: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == column)
    }

    /// Returns all column names in declaration order.
    #[must_use]
    pub fn column_names(&self) -> Vec<&'static str> {
        self.columns.iter().map(|c| c.name).collect()
    }
}

/// Referential action applied when a referenced row is deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
pub enum OnDelete {
    /// Reject the delete while dependent rows exist.
    #[strum(serialize = "NO ACTION")]
    NoAction,
    /// Delete dependent rows along with the referenced row.
    #[strum(serialize = "CASCADE")]
    Cascade,
}

/// A foreign key from one table's columns to another table's key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKey {
    /// Constraint name.
    pub name: String,
    /// Referencing columns, in order.
    pub columns: Vec<&'static str>,
    /// Referenced table.
    pub references: &'static str,
    /// Referenced columns, matching `columns` positionally.
    pub referenced_columns: Vec<&'static str>,
    /// Delete policy.
    pub on_delete: OnDelete,
}

/// A key constraint attached to an existing table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Constraint {
    /// Primary key over the given columns.
    PrimaryKey(Vec<&'static str>),
    /// Foreign key.
    ForeignKey(ForeignKey),
}

impl Constraint {
    /// Returns the table this constraint depends on, if any.
    #[must_use]
    pub const fn referenced_table(&self) -> Option<&'static str> {
        match self {
            Self::PrimaryKey(_) => None,
            Self::ForeignKey(fk) => Some(fk.references),
        }
    }
}

/// A schema or data statement executed against the sink.
#[derive(Debug, Clone, PartialEq)]
pub enum Statement<'a> {
    /// Drops the table if it exists and recreates it without constraints.
    ReplaceTable(&'a TableDef),
    /// Drops the table if it exists.
    DropTable(&'a TableDef),
    /// Attaches all given constraints to the table. Sinks apply the whole
    /// list or nothing.
    ApplyConstraints {
        /// Target table.
        table: &'a TableDef,
        /// Constraints to attach, primary key first.
        constraints: &'a [Constraint],
    },
    /// Deletes every row where `column = value`, honoring referential
    /// actions.
    DeleteWhere {
        /// Target table.
        table: &'a TableDef,
        /// Filter column.
        column: &'static str,
        /// Filter value.
        value: Value,
    },
}

/// A fetched row, in table column order.
pub type Row = Vec<Value>;

#[cfg(test)]
mod tests {
    use super::*;

    const T: TableDef = TableDef {
        name: "t",
        columns: &[Column::integer("a"), Column::text("b")],
    };

    #[test]
    fn option_into_value() {
        assert_eq!(Value::from(Some(3_i64)), Value::Integer(3));
        assert_eq!(Value::from(Option::<i64>::None), Value::Null);
        assert_eq!(Value::from(Some("x")), Value::Text("x".to_string()));
    }

    #[test]
    fn null_has_no_key() {
        assert!(Value::Null.key().is_none());
        assert_eq!(Value::Integer(1).key(), Some(KeyValue::Integer(1)));
    }

    #[test]
    fn finds_columns() {
        assert_eq!(T.column_index("b"), Some(1));
        assert_eq!(T.column_index("c"), None);
        assert_eq!(T.column_names(), vec!["a", "b"]);
    }

    #[test]
    fn on_delete_renders_sql_keyword() {
        assert_eq!(OnDelete::Cascade.as_ref(), "CASCADE");
        assert_eq!(OnDelete::NoAction.to_string(), "NO ACTION");
    }
}
