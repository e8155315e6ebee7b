//! CSV extraction.
//!
//! Files are read into [`RawTable`]s of trimmed string cells with
//! lower-cased headers. Typing happens in the normalizer so that every cast
//! failure can point back at its source line.

use std::path::{Path, PathBuf};

use crate::error::{EtlError, RowRef};

/// One data line of a CSV file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRow {
    /// 1-based line number in the source file.
    pub line: u64,
    /// Cells in header order. Short lines are padded with empty cells.
    pub values: Vec<String>,
}

/// A CSV file read as text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawTable {
    /// Source path, for error messages.
    pub path: String,
    /// Lower-cased, trimmed header names.
    pub headers: Vec<String>,
    pub rows: Vec<RawRow>,
}

impl RawTable {
    /// Returns the position of `column` (compared case-insensitively).
    ///
    /// # Errors
    ///
    /// Returns [`EtlError::MissingColumn`] if no header matches.
    pub fn column(&self, column: &str) -> Result<usize, EtlError> {
        let wanted = column.to_lowercase();
        self.headers
            .iter()
            .position(|h| *h == wanted)
            .ok_or_else(|| EtlError::MissingColumn {
                path: self.path.clone(),
                column: wanted,
            })
    }

    /// Builds a [`RowRef`] for `row`.
    #[must_use]
    pub fn row_ref(&self, row: &RawRow) -> RowRef {
        RowRef {
            path: self.path.clone(),
            line: row.line,
        }
    }
}

/// Reads a CSV file with a header row.
///
/// # Errors
///
/// Returns [`EtlError::Csv`] if the file cannot be opened or parsed.
pub fn read_csv(path: &Path) -> Result<RawTable, EtlError> {
    let csv_err = |e| EtlError::Csv {
        path: path.display().to_string(),
        source: e,
    };

    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .map_err(csv_err)?;

    let headers: Vec<String> = reader
        .headers()
        .map_err(csv_err)?
        .iter()
        .map(|h| h.trim().trim_start_matches('\u{feff}').to_lowercase())
        .collect();

    let mut rows = Vec::new();
    for result in reader.records() {
        let record = result.map_err(csv_err)?;
        let line = record.position().map_or(0, csv::Position::line);
        let mut values: Vec<String> = record.iter().map(|v| v.trim().to_owned()).collect();
        values.resize(headers.len(), String::new());
        rows.push(RawRow { line, values });
    }

    log::debug!("Read {} rows from {}", rows.len(), path.display());

    Ok(RawTable {
        path: path.display().to_string(),
        headers,
        rows,
    })
}

/// Lists the `.csv` files directly inside `dir`, sorted by name.
///
/// # Errors
///
/// Returns [`EtlError::Io`] if the directory cannot be read.
pub fn list_csv_files(dir: &Path) -> Result<Vec<PathBuf>, EtlError> {
    let io_err = |e| EtlError::Io {
        path: dir.display().to_string(),
        source: e,
    };

    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(io_err)? {
        let path = entry.map_err(io_err)?.path();
        if path.is_file()
            && path
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"))
        {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    static FIXTURE_DIRS: AtomicUsize = AtomicUsize::new(0);

    /// Creates an empty, uniquely named directory under the system temp dir.
    pub(crate) fn fixture_dir(name: &str) -> PathBuf {
        let n = FIXTURE_DIRS.fetch_add(1, Ordering::SeqCst);
        let dir = std::env::temp_dir().join(format!(
            "crime_warehouse_{name}_{}_{n}",
            std::process::id()
        ));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn lower_cases_headers_and_pads_short_lines() {
        let dir = fixture_dir("read_csv");
        let path = dir.join("crime.csv");
        std::fs::write(&path, "Event_ID, Hood_ID ,Name\nE1,12,Annex\nE2,7\n").unwrap();

        let table = read_csv(&path).unwrap();
        assert_eq!(table.headers, vec!["event_id", "hood_id", "name"]);
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.rows[0].line, 2);
        assert_eq!(table.rows[1].values, vec!["E2", "7", ""]);
        assert_eq!(table.column("HOOD_ID").unwrap(), 1);
        assert!(matches!(
            table.column("premises"),
            Err(EtlError::MissingColumn { column, .. }) if column == "premises"
        ));
    }

    #[test]
    fn lists_only_csv_files_in_name_order() {
        let dir = fixture_dir("list_csv");
        std::fs::write(dir.join("b.csv"), "x\n").unwrap();
        std::fs::write(dir.join("a.CSV"), "x\n").unwrap();
        std::fs::write(dir.join("notes.txt"), "x\n").unwrap();

        let files = list_csv_files(&dir).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.CSV", "b.csv"]);
    }

    #[test]
    fn missing_directory_is_io_error() {
        let dir = fixture_dir("missing").join("nope");
        assert!(matches!(list_csv_files(&dir), Err(EtlError::Io { .. })));
    }
}
