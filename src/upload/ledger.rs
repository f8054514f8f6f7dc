//! Progress ledger: append-only record of finished uploads.
//!
//! The number of data rows is the resume offset. A run that finds K rows
//! skips the first K discovered files, so rows are only ever appended and
//! never rewritten.

use crate::error::SquareshotError;
use crate::output::UploadRecord;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::debug;

/// Column names written as the first row of a new ledger.
pub const LEDGER_HEADER: [&str; 5] = ["Filename", "URL", "Display URL", "Delete URL", "Status"];

/// Where finished uploads are recorded.
///
/// Calls are short and synchronous; the orchestrator never holds a lock
/// across an `append`.
pub trait ProgressLedger: Send + Sync {
    /// Data rows already present (the header is not counted).
    fn completed_count(&self) -> Result<usize, SquareshotError>;

    /// Append `records` after the existing rows.
    fn append(&self, records: &[UploadRecord]) -> Result<(), SquareshotError>;
}

/// CSV ledger on disk.
#[derive(Debug, Clone)]
pub struct CsvLedger {
    path: PathBuf,
}

impl CsvLedger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_error(&self, detail: impl ToString) -> SquareshotError {
        SquareshotError::LedgerRead {
            path: self.path.clone(),
            detail: detail.to_string(),
        }
    }

    fn write_error(&self, detail: impl ToString) -> SquareshotError {
        SquareshotError::LedgerWrite {
            path: self.path.clone(),
            detail: detail.to_string(),
        }
    }
}

impl ProgressLedger for CsvLedger {
    fn completed_count(&self) -> Result<usize, SquareshotError> {
        if !self.path.exists() {
            return Ok(0);
        }
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_path(&self.path)
            .map_err(|e| self.read_error(e))?;

        let mut rows = 0usize;
        for record in reader.records() {
            record.map_err(|e| self.read_error(e))?;
            rows += 1;
        }
        debug!("Ledger '{}' holds {} rows", self.path.display(), rows);
        Ok(rows)
    }

    fn append(&self, records: &[UploadRecord]) -> Result<(), SquareshotError> {
        if records.is_empty() {
            return Ok(());
        }
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| self.write_error(e))?;
        }
        let fresh = std::fs::metadata(&self.path)
            .map(|m| m.len() == 0)
            .unwrap_or(true);

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| self.write_error(e))?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);

        if fresh {
            writer
                .write_record(LEDGER_HEADER)
                .map_err(|e| self.write_error(e))?;
        }
        for record in records {
            writer.serialize(record).map_err(|e| self.write_error(e))?;
        }
        writer.flush().map_err(|e| self.write_error(e))?;
        Ok(())
    }
}

/// In-memory ledger for tests and dry runs.
///
/// Besides the rows it remembers the size of every `append` call, which is
/// how flush cadence is observed.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    state: Mutex<MemoryState>,
}

#[derive(Debug, Default)]
struct MemoryState {
    rows: Vec<UploadRecord>,
    batches: Vec<usize>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from `rows` already-completed entries.
    pub fn with_rows(rows: Vec<UploadRecord>) -> Self {
        Self {
            state: Mutex::new(MemoryState {
                rows,
                batches: Vec::new(),
            }),
        }
    }

    pub fn rows(&self) -> Vec<UploadRecord> {
        self.state.lock().map(|s| s.rows.clone()).unwrap_or_default()
    }

    /// Sizes of each `append` call, in order.
    pub fn batches(&self) -> Vec<usize> {
        self.state
            .lock()
            .map(|s| s.batches.clone())
            .unwrap_or_default()
    }
}

impl ProgressLedger for MemoryLedger {
    fn completed_count(&self) -> Result<usize, SquareshotError> {
        self.state
            .lock()
            .map(|s| s.rows.len())
            .map_err(|_| SquareshotError::Internal("memory ledger lock poisoned".into()))
    }

    fn append(&self, records: &[UploadRecord]) -> Result<(), SquareshotError> {
        if records.is_empty() {
            return Ok(());
        }
        let mut state = self
            .state
            .lock()
            .map_err(|_| SquareshotError::Internal("memory ledger lock poisoned".into()))?;
        state.rows.extend_from_slice(records);
        state.batches.push(records.len());
        Ok(())
    }
}
