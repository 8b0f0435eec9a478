//! Persistent report of flagged documents.
//!
//! The report is a two-column CSV table (`filename`, `summary`) meant to be
//! opened in a spreadsheet. Every append reads the whole table, adds one row
//! and rewrites it through a temporary file that atomically replaces the
//! original, so a crash mid-write leaves the previous table intact.
//!
//! Rows are never deduplicated: running the same folder twice lists every
//! flagged document twice.

use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::PersistenceError;
use crate::models::ReportEntry;

const COLUMNS: [&str; 2] = ["filename", "summary"];
const UTF8_BOM: &str = "\u{feff}";

/// Append-only report table backed by a CSV file.
#[derive(Debug, Clone)]
pub struct ReportStore {
    path: PathBuf,
}

impl ReportStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// All rows in file order. An absent store has no rows.
    pub fn load(&self) -> Result<Vec<ReportEntry>, PersistenceError> {
        if !self.exists() {
            return Ok(Vec::new());
        }
        let bytes = std::fs::read(&self.path).map_err(|source| self.io_err(source))?;
        let bytes = bytes
            .strip_prefix(UTF8_BOM.as_bytes())
            .unwrap_or(bytes.as_slice());

        let mut reader = csv::Reader::from_reader(bytes);
        let headers = reader.headers().map_err(|source| self.csv_err(source))?;
        if headers.iter().ne(COLUMNS.iter().copied()) {
            return Err(PersistenceError::Schema {
                path: self.path.clone(),
                found: headers.iter().map(str::to_string).collect(),
            });
        }

        reader
            .deserialize::<ReportEntry>()
            .map(|row| row.map_err(|source| self.csv_err(source)))
            .collect()
    }

    /// Read the table, add `entry` at the end and write it back.
    pub fn append(&self, entry: ReportEntry) -> Result<(), PersistenceError> {
        let mut rows = self.load()?;
        rows.push(entry);
        self.write_all(&rows)
    }

    fn write_all(&self, rows: &[ReportEntry]) -> Result<(), PersistenceError> {
        let mut out = Vec::new();
        // Spreadsheet apps need the BOM to read UTF-8 CSV.
        out.extend_from_slice(UTF8_BOM.as_bytes());
        {
            let mut writer = csv::Writer::from_writer(&mut out);
            writer
                .write_record(COLUMNS)
                .map_err(|source| self.csv_err(source))?;
            for row in rows {
                writer
                    .write_record([row.filename.as_str(), row.summary.as_str()])
                    .map_err(|source| self.csv_err(source))?;
            }
            writer.flush().map_err(|source| self.io_err(source))?;
        }

        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir).map_err(|source| self.io_err(source))?;

        let mut tmp = tempfile::NamedTempFile::new_in(&dir).map_err(|source| self.io_err(source))?;
        tmp.write_all(&out).map_err(|source| self.io_err(source))?;
        tmp.as_file()
            .sync_all()
            .map_err(|source| self.io_err(source))?;
        tmp.persist(&self.path)
            .map_err(|e| self.io_err(e.error))?;

        Ok(())
    }

    fn io_err(&self, source: std::io::Error) -> PersistenceError {
        PersistenceError::Io {
            path: self.path.clone(),
            source,
        }
    }

    fn csv_err(&self, source: csv::Error) -> PersistenceError {
        PersistenceError::Csv {
            path: self.path.clone(),
            source,
        }
    }
}
