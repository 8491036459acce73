use alloc::collections::VecDeque;
use alloc::vec::Vec;

use thiserror_no_std::Error;

use super::LogEntry;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreError {
    #[error("Log storage not available")]
    Unavailable,

    #[error("Writing log record failed")]
    Write,

    #[error("Reading log records failed")]
    Read,
}

/// Append-only persistent log.
pub trait LogStore {
    fn append(&mut self, entry: &LogEntry) -> Result<(), StoreError>;

    /// Up to `max` of the most recently appended entries, most recent first.
    fn load_recent(&mut self, max: usize) -> Result<Vec<LogEntry>, StoreError>;
}

impl<S: LogStore + ?Sized> LogStore for &mut S {
    fn append(&mut self, entry: &LogEntry) -> Result<(), StoreError> {
        (**self).append(entry)
    }

    fn load_recent(&mut self, max: usize) -> Result<Vec<LogEntry>, StoreError> {
        (**self).load_recent(max)
    }
}

/// RAM-backed store keeping the newest `capacity` entries.
///
/// Does not survive a reset. Used where no storage medium is present.
pub struct MemoryLogStore {
    entries: VecDeque<LogEntry>,
    capacity: usize,
}

impl MemoryLogStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl LogStore for MemoryLogStore {
    fn append(&mut self, entry: &LogEntry) -> Result<(), StoreError> {
        if self.capacity == 0 {
            return Err(StoreError::Unavailable);
        }
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry.clone());
        Ok(())
    }

    fn load_recent(&mut self, max: usize) -> Result<Vec<LogEntry>, StoreError> {
        Ok(self.entries.iter().rev().take(max).cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::Timestamp;
    use crate::logging::Severity;

    fn entry(secs: u64) -> LogEntry {
        LogEntry::new(Timestamp::from_secs(secs), Severity::Fatal, "fault")
    }

    #[test]
    fn test_memory_store_keeps_newest() {
        let mut store = MemoryLogStore::new(3);
        for secs in 0..5 {
            store.append(&entry(secs)).unwrap();
        }

        assert_eq!(store.len(), 3);
        let recent = store.load_recent(2).unwrap();
        assert_eq!(recent, [entry(4), entry(3)]);
    }

    #[test]
    fn test_zero_capacity_store_is_unavailable() {
        let mut store = MemoryLogStore::new(0);
        assert_eq!(store.append(&entry(0)), Err(StoreError::Unavailable));
        assert!(store.load_recent(5).unwrap().is_empty());
    }
}
