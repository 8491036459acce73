//! Persistent log as a plain text file.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::PathBuf;

use dht_node_core::logging::{LogEntry, LogStore, StoreError};

pub struct FileLogStore {
    path: PathBuf,
}

impl FileLogStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl LogStore for FileLogStore {
    fn append(&mut self, entry: &LogEntry) -> Result<(), StoreError> {
        let mut record = String::new();
        entry.write_record(&mut record).map_err(|_| StoreError::Write)?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|_| StoreError::Unavailable)?;
        file.write_all(record.as_bytes())
            .map_err(|_| StoreError::Write)
    }

    fn load_recent(&mut self, max: usize) -> Result<Vec<LogEntry>, StoreError> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(_) => return Err(StoreError::Read),
        };
        Ok(text
            .lines()
            .rev()
            .filter_map(LogEntry::parse_record)
            .take(max)
            .collect())
    }
}
