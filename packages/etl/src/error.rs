//! Pipeline errors.

use std::fmt;

use crime_warehouse_database::DbError;
use crime_warehouse_etl_models::{AnomalyKind, Stage};

/// Points at a line of a source file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowRef {
    /// Source file path.
    pub path: String,
    /// 1-based line number in the file.
    pub line: u64,
}

impl fmt::Display for RowRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.path, self.line)
    }
}

/// Errors raised while transforming or loading the warehouse.
#[derive(Debug, thiserror::Error)]
pub enum EtlError {
    /// An input file or directory could not be read.
    #[error("Failed to read {path}: {source}")]
    Io {
        /// File or directory path.
        path: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A CSV file is malformed.
    #[error("Malformed CSV {path}: {source}")]
    Csv {
        /// File path.
        path: String,
        /// Underlying parse error.
        source: csv::Error,
    },

    /// A required column is absent.
    #[error("{path} has no column named {column:?}")]
    MissingColumn {
        /// File path.
        path: String,
        /// Lower-cased column name.
        column: String,
    },

    /// A month name outside the twelve recognized names.
    #[error("Unrecognized month {value:?} at {at}")]
    UnmappedMonth {
        /// Offending row.
        at: RowRef,
        /// Lower-cased cell value.
        value: String,
    },

    /// A cell that must be an integer or number is not.
    #[error("Cannot read {column} value {value:?} at {at} as a number")]
    Cast {
        /// Offending row.
        at: RowRef,
        /// Column name.
        column: String,
        /// Cell value.
        value: String,
    },

    /// Weather files disagree on their retained columns.
    #[error("{path} does not share the weather schema: {detail}")]
    SchemaMismatch {
        /// File path.
        path: String,
        /// Which columns differ.
        detail: String,
    },

    /// A joined record has no surrogate key for one of its dimensions.
    #[error("Event {event_id} has no {dimension} surrogate key")]
    MissingSurrogateKey {
        /// Event the fact row would describe.
        event_id: String,
        /// Dimension lacking the key.
        dimension: &'static str,
    },

    /// Two fact rows share the composite key.
    #[error("Duplicate fact key {key:?}")]
    DuplicateFactKey {
        /// `(date, event, climate, neighbourhood)` surrogate keys.
        key: [i64; 4],
    },

    /// A foreign key was scheduled before the table it references was keyed.
    #[error("Cannot constrain {table}: referenced table {references} is not keyed yet")]
    OutOfOrderConstraint {
        /// Referencing table.
        table: String,
        /// Referenced table.
        references: String,
    },

    /// A warehouse table expected to exist is missing.
    #[error("Table {table} does not exist")]
    MissingTable {
        /// Table name.
        table: String,
    },

    /// A stored value has the wrong type for its column.
    #[error("Unexpected value in {table}.{column}: {value}")]
    UnexpectedValue {
        /// Table name.
        table: String,
        /// Column name.
        column: String,
        /// Rendered value.
        value: String,
    },

    /// The sink rejected an operation.
    #[error(transparent)]
    Sink(#[from] DbError),
}

impl EtlError {
    /// Classifies this error.
    #[must_use]
    pub const fn kind(&self) -> AnomalyKind {
        match self {
            Self::Io { .. }
            | Self::Csv { .. }
            | Self::MissingColumn { .. }
            | Self::UnmappedMonth { .. }
            | Self::Cast { .. }
            | Self::SchemaMismatch { .. } => AnomalyKind::InputShape,
            Self::MissingSurrogateKey { .. }
            | Self::DuplicateFactKey { .. }
            | Self::OutOfOrderConstraint { .. }
            | Self::MissingTable { .. }
            | Self::UnexpectedValue { .. } => AnomalyKind::Integrity,
            Self::Sink(e) => {
                if e.is_integrity() {
                    AnomalyKind::Integrity
                } else {
                    AnomalyKind::Resource
                }
            }
        }
    }
}

/// An [`EtlError`] tagged with the stage it aborted.
#[derive(Debug, thiserror::Error)]
#[error("{stage} stage failed ({kind}): {source}")]
pub struct StageError {
    /// Stage that failed.
    pub stage: Stage,
    /// Classification of `source`.
    pub kind: AnomalyKind,
    /// The underlying error.
    #[source]
    pub source: EtlError,
}

impl StageError {
    #[must_use]
    pub const fn new(stage: Stage, source: EtlError) -> Self {
        Self {
            stage,
            kind: source.kind(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_input_and_integrity_errors() {
        let month = EtlError::UnmappedMonth {
            at: RowRef {
                path: "crime.csv".to_string(),
                line: 4,
            },
            value: "smarch".to_string(),
        };
        assert_eq!(month.kind(), AnomalyKind::InputShape);
        assert_eq!(
            month.to_string(),
            "Unrecognized month \"smarch\" at crime.csv:4"
        );

        let dup = EtlError::DuplicateFactKey { key: [1, 2, 3, 4] };
        assert_eq!(dup.kind(), AnomalyKind::Integrity);
    }

    #[test]
    fn sink_errors_split_by_cause() {
        let fk = EtlError::from(DbError::ForeignKeyViolation {
            table: "fact_table".to_string(),
            references: "date_surrogate_table".to_string(),
            detail: "key (9)".to_string(),
        });
        assert_eq!(fk.kind(), AnomalyKind::Integrity);

        let gone = EtlError::from(DbError::Connection {
            message: "refused".to_string(),
        });
        assert_eq!(gone.kind(), AnomalyKind::Resource);
    }

    #[test]
    fn stage_error_names_stage_and_kind() {
        let err = StageError::new(
            Stage::Schema,
            EtlError::OutOfOrderConstraint {
                table: "fact_table".to_string(),
                references: "date_surrogate_table".to_string(),
            },
        );
        assert_eq!(err.kind, AnomalyKind::Integrity);
        assert!(err.to_string().starts_with("schema stage failed (integrity): "));
    }
}
