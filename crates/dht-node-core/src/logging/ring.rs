use heapless::Deque;

use super::LogEntry;

/// Fixed-capacity log, most recent entry first. A full ring drops its
/// oldest entry to make room.
pub struct LogRing<const N: usize> {
    entries: Deque<LogEntry, N>,
}

impl<const N: usize> Default for LogRing<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> LogRing<N> {
    pub const fn new() -> Self {
        Self {
            entries: Deque::new(),
        }
    }

    pub fn push(&mut self, entry: LogEntry) {
        if self.entries.is_full() {
            self.entries.pop_back();
        }
        // Cannot fail: there is room after the eviction above.
        let _ = self.entries.push_front(entry);
    }

    /// Most recent first
    pub fn iter(&self) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub const fn capacity(&self) -> usize {
        N
    }
}
