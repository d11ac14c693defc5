//! Durable contact logs
//!
//! The store is append-only. Rows are batched per cycle and written in one
//! append; the CSV header goes out only when the file is new or empty.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, warn};

use crate::ContactRecord;

/// Errors from contact logs
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Append-only sink for first-sighting records
pub trait ContactLog: Send {
    /// Every record currently persisted
    fn load(&mut self) -> Result<Vec<ContactRecord>, StoreError>;

    /// Append a batch of records
    fn append(&mut self, records: &[ContactRecord]) -> Result<(), StoreError>;

    /// Human-readable location for logs
    fn describe(&self) -> String;
}

/// CSV file contact log
#[derive(Debug, Clone)]
pub struct CsvContactLog {
    path: PathBuf,
}

impl CsvContactLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// True when a non-empty file does not end in a newline (a torn last row)
fn ends_mid_row(file: &mut File) -> io::Result<bool> {
    let len = file.metadata()?.len();
    if len == 0 {
        return Ok(false);
    }
    let mut last = [0u8; 1];
    file.seek(SeekFrom::Start(len - 1))?;
    file.read_exact(&mut last)?;
    Ok(last[0] != b'\n')
}

impl ContactLog for CsvContactLog {
    fn load(&mut self) -> Result<Vec<ContactRecord>, StoreError> {
        if !self.path.exists() {
            debug!("No contact log at {}, starting empty", self.path.display());
            return Ok(Vec::new());
        }

        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .trim(csv::Trim::All)
            .from_path(&self.path)?;

        let mut records = Vec::new();
        for (index, row) in reader.deserialize::<ContactRecord>().enumerate() {
            match row {
                Ok(mut record) => {
                    record.hex = record.hex.to_lowercase();
                    if record.hex.is_empty() {
                        continue;
                    }
                    records.push(record);
                }
                // +2: one for the header, one for 1-based numbering
                Err(e) => warn!("Skipping unreadable contact row {}: {}", index + 2, e),
            }
        }
        Ok(records)
    }

    fn append(&mut self, records: &[ContactRecord]) -> Result<(), StoreError> {
        if records.is_empty() {
            return Ok(());
        }

        let mut file = OpenOptions::new()
            .read(true)
            .create(true)
            .append(true)
            .open(&self.path)?;

        let write_header = file.metadata()?.len() == 0;
        if ends_mid_row(&mut file)? {
            warn!("{} ends in a partial row, starting a new line", self.path.display());
            file.write_all(b"\n")?;
        }

        let mut writer = csv::WriterBuilder::new()
            .has_headers(write_header)
            .from_writer(file);
        for record in records {
            writer.serialize(record)?;
        }
        writer.flush()?;

        debug!("Appended {} rows to {}", records.len(), self.path.display());
        Ok(())
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// In-memory contact log; clones share the same rows
#[derive(Debug, Clone, Default)]
pub struct MemoryContactLog {
    rows: Arc<Mutex<Vec<ContactRecord>>>,
}

impl MemoryContactLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: Vec<ContactRecord>) -> Self {
        Self {
            rows: Arc::new(Mutex::new(records)),
        }
    }

    pub fn records(&self) -> Vec<ContactRecord> {
        self.rows.lock().clone()
    }
}

impl ContactLog for MemoryContactLog {
    fn load(&mut self) -> Result<Vec<ContactRecord>, StoreError> {
        Ok(self.rows.lock().clone())
    }

    fn append(&mut self, records: &[ContactRecord]) -> Result<(), StoreError> {
        self.rows.lock().extend_from_slice(records);
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}
