use alloc::vec::Vec;
use core::cell::RefCell;
use core::fmt;

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use log::{Level, Log, Metadata, Record, SetLoggerError};

use super::{DURABLE_TARGET, LIVE_LOG_CAPACITY, LogEntry, LogRing, LogStore, LogView, Severity};
use crate::clock::Timestamp;

struct Sinks<S, const N: usize> {
    ring: LogRing<N>,
    /// `None` while a caller works with the store outside the lock
    store: Option<S>,
    /// Entries waiting to be appended to the store
    queued: Vec<LogEntry>,
}

/// `log` backend of the node.
///
/// Forwards every enabled record to `console`, then records it in the live
/// ring and, for fatal or durable records, in the persistent store.
///
/// The lock is a critical section, so it only guards the ring and a queue of
/// entries bound for the store. Store I/O happens with the store moved out of
/// the lock. Whoever holds it appends what was queued before putting it back.
pub struct NodeLogger<S, const N: usize = LIVE_LOG_CAPACITY> {
    console: &'static dyn Log,
    uptime: fn() -> Timestamp,
    max_severity: Severity,
    sinks: Mutex<CriticalSectionRawMutex, RefCell<Sinks<S, N>>>,
}

impl<S: LogStore, const N: usize> NodeLogger<S, N> {
    pub fn new(console: &'static dyn Log, uptime: fn() -> Timestamp, max_severity: Severity, store: S) -> Self {
        Self {
            console,
            uptime,
            max_severity,
            sinks: Mutex::new(RefCell::new(Sinks {
                ring: LogRing::new(),
                store: Some(store),
                queued: Vec::new(),
            })),
        }
    }

    /// Records an entry in the ring and, if fatal or `durable`, the store.
    /// Does not reach the console.
    pub fn record(&self, severity: Severity, durable: bool, args: fmt::Arguments<'_>) {
        if severity > self.max_severity {
            return;
        }

        let entry = LogEntry::from_args((self.uptime)(), severity, args);
        let persist = durable || severity == Severity::Fatal;
        let queued = self.sinks.lock(|sinks| {
            let mut sinks = sinks.borrow_mut();
            if severity != Severity::Trace {
                sinks.ring.push(entry.clone());
            }
            if persist {
                sinks.queued.push(entry);
            }
            persist
        });
        if queued {
            // If the store is out, its holder appends the entry.
            self.with_store(|_| ());
        }
    }

    /// Runs `f` on the store outside the critical section, then drains the
    /// queue into it. `None` if the store is already out.
    fn with_store<R>(&self, f: impl FnOnce(&mut S) -> R) -> Option<R> {
        let taken = self.sinks.lock(|sinks| sinks.borrow_mut().store.take());
        let mut store = Some(taken?);
        let result = store.as_mut().map(f);

        loop {
            let queued = self.sinks.lock(|sinks| {
                let mut sinks = sinks.borrow_mut();
                if sinks.queued.is_empty() {
                    sinks.store = store.take();
                }
                core::mem::take(&mut sinks.queued)
            });
            let Some(held) = store.as_mut() else {
                break;
            };
            for entry in &queued {
                if let Err(e) = held.append(entry) {
                    self.console_error(format_args!("Could not persist log entry: {}", e));
                }
            }
        }
        result
    }

    fn console_error(&self, args: fmt::Arguments<'_>) {
        self.console.log(
            &Record::builder()
                .args(args)
                .level(Level::Error)
                .target("dht_node_core::logging")
                .build(),
        );
    }

    pub fn max_severity(&self) -> Severity {
        self.max_severity
    }
}

impl<S: LogStore + Send + 'static, const N: usize> NodeLogger<S, N> {
    /// Installs this logger as the global `log` backend.
    pub fn install(&'static self) -> Result<(), SetLoggerError> {
        log::set_logger(self)?;
        log::set_max_level(self.max_severity.level_filter());
        Ok(())
    }
}

impl<S: LogStore + Send, const N: usize> Log for NodeLogger<S, N> {
    fn enabled(&self, metadata: &Metadata) -> bool {
        Severity::of(metadata.level(), metadata.target()) <= self.max_severity
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        self.console.log(record);
        self.record(
            Severity::of(record.level(), record.target()),
            record.target() == DURABLE_TARGET,
            *record.args(),
        );
    }

    fn flush(&self) {
        self.console.flush();
    }
}

impl<S: LogStore, const N: usize> LogView for NodeLogger<S, N> {
    fn live_entries(&self) -> Vec<LogEntry> {
        self.sinks.lock(|sinks| {
            sinks
                .try_borrow()
                .map(|sinks| sinks.ring.iter().cloned().collect())
                .unwrap_or_default()
        })
    }

    fn persistent_entries(&self, max: usize) -> Vec<LogEntry> {
        match self.with_store(|store| store.load_recent(max)) {
            Some(Ok(entries)) => entries,
            Some(Err(e)) => {
                self.console_error(format_args!("Could not load persisted log: {}", e));
                Vec::new()
            }
            None => Vec::new(),
        }
    }
}

/// Console that discards everything.
pub struct NullConsole;

impl Log for NullConsole {
    fn enabled(&self, _metadata: &Metadata) -> bool {
        false
    }

    fn log(&self, _record: &Record) {}

    fn flush(&self) {}
}

#[cfg(test)]
mod tests {
    extern crate std;

    use super::*;
    use crate::logging::{FATAL_TARGET, MemoryLogStore, StoreError};
    use alloc::vec;

    static CONSOLE: NullConsole = NullConsole;

    fn uptime() -> Timestamp {
        Timestamp::from_secs(42)
    }

    fn logger(max: Severity) -> NodeLogger<MemoryLogStore> {
        NodeLogger::new(&CONSOLE, uptime, max, MemoryLogStore::new(16))
    }

    fn messages(entries: &[LogEntry]) -> Vec<&str> {
        entries.iter().map(LogEntry::message).collect()
    }

    #[test]
    fn test_ring_gets_non_trace_entries() {
        let logger = logger(Severity::Trace);
        logger.record(Severity::Info, false, format_args!("first"));
        logger.record(Severity::Trace, false, format_args!("noise"));
        logger.record(Severity::Warn, false, format_args!("second"));

        let live = logger.live_entries();
        assert_eq!(messages(&live), vec!["second", "first"]);
        assert_eq!(live[0].timestamp(), Timestamp::from_secs(42));
        assert!(logger.persistent_entries(10).is_empty());
    }

    #[test]
    fn test_fatal_and_durable_reach_store() {
        let logger = logger(Severity::Debug);
        logger.record(Severity::Fatal, false, format_args!("no wlan"));
        logger.record(Severity::Info, true, format_args!("booted"));
        logger.record(Severity::Error, false, format_args!("transient"));

        let persisted = logger.persistent_entries(10);
        assert_eq!(messages(&persisted), vec!["booted", "no wlan"]);
        assert_eq!(persisted[1].severity(), Severity::Fatal);
    }

    #[test]
    fn test_records_above_max_severity_are_dropped() {
        let logger = logger(Severity::Warn);
        logger.record(Severity::Info, true, format_args!("chatty"));
        assert!(logger.live_entries().is_empty());
        assert!(logger.persistent_entries(10).is_empty());
    }

    #[test]
    fn test_log_facade_mapping() {
        let logger = logger(Severity::Debug);
        logger.log(
            &Record::builder()
                .args(format_args!("reset pending"))
                .level(Level::Error)
                .target(FATAL_TARGET)
                .build(),
        );
        logger.log(
            &Record::builder()
                .args(format_args!("too detailed"))
                .level(Level::Trace)
                .target("dht_node_core")
                .build(),
        );

        let live = logger.live_entries();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].severity(), Severity::Fatal);
        assert_eq!(logger.persistent_entries(1).len(), 1);
    }

    struct BrokenStore;

    impl LogStore for BrokenStore {
        fn append(&mut self, _entry: &LogEntry) -> Result<(), StoreError> {
            Err(StoreError::Write)
        }

        fn load_recent(&mut self, _max: usize) -> Result<Vec<LogEntry>, StoreError> {
            Err(StoreError::Read)
        }
    }

    #[test]
    fn test_store_failures_stay_local() {
        let logger: NodeLogger<BrokenStore> = NodeLogger::new(&CONSOLE, uptime, Severity::Debug, BrokenStore);
        logger.record(Severity::Fatal, false, format_args!("still shown"));
        assert_eq!(messages(&logger.live_entries()), vec!["still shown"]);
        assert!(logger.persistent_entries(5).is_empty());
    }

    /// Store that lets another thread log while it is reading.
    struct ContendedStore {
        inner: MemoryLogStore,
        start: std::sync::mpsc::Sender<()>,
        done: std::sync::mpsc::Receiver<()>,
        peer_blocked: std::sync::Arc<core::sync::atomic::AtomicBool>,
    }

    impl LogStore for ContendedStore {
        fn append(&mut self, entry: &LogEntry) -> Result<(), StoreError> {
            self.inner.append(entry)
        }

        fn load_recent(&mut self, max: usize) -> Result<Vec<LogEntry>, StoreError> {
            let _ = self.start.send(());
            let finished = self.done.recv_timeout(std::time::Duration::from_secs(2)).is_ok();
            self.peer_blocked
                .store(!finished, core::sync::atomic::Ordering::SeqCst);
            self.inner.load_recent(max)
        }
    }

    #[test]
    fn test_loading_the_store_does_not_block_other_loggers() {
        use core::sync::atomic::{AtomicBool, Ordering};
        use std::sync::{Arc, mpsc};

        let (start_tx, start_rx) = mpsc::channel();
        let (done_tx, done_rx) = mpsc::channel();
        let peer_blocked = Arc::new(AtomicBool::new(true));
        let store = ContendedStore {
            inner: MemoryLogStore::new(16),
            start: start_tx,
            done: done_rx,
            peer_blocked: peer_blocked.clone(),
        };
        let logger: NodeLogger<ContendedStore> = NodeLogger::new(&CONSOLE, uptime, Severity::Debug, store);
        logger.record(Severity::Info, true, format_args!("booted"));
        let logger = &logger;

        std::thread::scope(|scope| {
            scope.spawn(move || {
                if start_rx.recv().is_ok() {
                    logger.record(Severity::Warn, false, format_args!("from peer"));
                    logger.record(Severity::Fatal, false, format_args!("peer fatal"));
                    let _ = done_tx.send(());
                }
            });

            let first = logger.persistent_entries(10);
            assert_eq!(messages(&first), vec!["booted"]);
        });

        assert!(!peer_blocked.load(Ordering::SeqCst));
        assert_eq!(messages(&logger.live_entries()), vec!["peer fatal", "from peer", "booted"]);
        // The entry queued during the load was appended once the store came back
        let persisted = logger.persistent_entries(10);
        assert_eq!(messages(&persisted), vec!["peer fatal", "booted"]);
    }
}
