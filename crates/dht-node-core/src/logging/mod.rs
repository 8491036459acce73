//! Diagnostic log
//!
//! Components log through the `log` facade. [`NodeLogger`] sits behind it:
//! it forwards every record to a console logger and keeps the node's own
//! diagnostic log:
//!
//! - a most-recent-first ring of the last [`LIVE_LOG_CAPACITY`] non-trace
//!   entries, shown on the status page;
//! - an append-only [`LogStore`] receiving fatal entries and entries logged
//!   with the [`DURABLE_TARGET`] target.
//!
//! `log` has no fatal level. Fatal entries are error records with the
//! [`FATAL_TARGET`] target; use the [`fatal!`](crate::fatal) macro.

mod logger;
mod ring;
mod store;

pub use logger::{NodeLogger, NullConsole};
pub use ring::LogRing;
pub use store::{LogStore, MemoryLogStore, StoreError};

use alloc::vec::Vec;
use core::fmt::{self, Write};

use heapless::String;
use serde::{Deserialize, Serialize};

use crate::clock::Timestamp;

/// Entries kept for the live view
pub const LIVE_LOG_CAPACITY: usize = 20;
/// Longer messages are truncated
pub const MESSAGE_CAPACITY: usize = 128;
/// Target marking an error record as fatal
pub const FATAL_TARGET: &str = "fatal";
/// Target marking a record for the persistent store
pub const DURABLE_TARGET: &str = "durable";

/// Logs an error as fatal. Fatal entries always reach the persistent store.
#[macro_export]
macro_rules! fatal {
    ($($arg:tt)+) => {
        $crate::__log::error!(target: $crate::logging::FATAL_TARGET, $($arg)+)
    };
}

/// Logs at the given level and persists the entry, e.g. `durable!(info, "booted")`.
#[macro_export]
macro_rules! durable {
    ($level:ident, $($arg:tt)+) => {
        $crate::__log::$level!(target: $crate::logging::DURABLE_TARGET, $($arg)+)
    };
}

/// Most severe first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Fatal,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl Severity {
    pub const fn name(self) -> &'static str {
        match self {
            Self::Fatal => "fatal",
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        [
            Self::Fatal,
            Self::Error,
            Self::Warn,
            Self::Info,
            Self::Debug,
            Self::Trace,
        ]
        .into_iter()
        .find(|severity| severity.name() == name)
    }

    /// Maps a `log` record onto a severity, honouring [`FATAL_TARGET`].
    pub fn of(level: log::Level, target: &str) -> Self {
        match level {
            log::Level::Error if target == FATAL_TARGET => Self::Fatal,
            log::Level::Error => Self::Error,
            log::Level::Warn => Self::Warn,
            log::Level::Info => Self::Info,
            log::Level::Debug => Self::Debug,
            log::Level::Trace => Self::Trace,
        }
    }

    pub const fn level_filter(self) -> log::LevelFilter {
        match self {
            Self::Fatal | Self::Error => log::LevelFilter::Error,
            Self::Warn => log::LevelFilter::Warn,
            Self::Info => log::LevelFilter::Info,
            Self::Debug => log::LevelFilter::Debug,
            Self::Trace => log::LevelFilter::Trace,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One diagnostic log line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    timestamp: Timestamp,
    severity: Severity,
    message: String<MESSAGE_CAPACITY>,
}

impl LogEntry {
    pub fn new(timestamp: Timestamp, severity: Severity, message: &str) -> Self {
        Self::from_args(timestamp, severity, format_args!("{}", message))
    }

    /// Formats `args` into the entry, truncating at [`MESSAGE_CAPACITY`].
    /// Tabs and line breaks become spaces so the entry stays one record.
    pub fn from_args(timestamp: Timestamp, severity: Severity, args: fmt::Arguments<'_>) -> Self {
        let mut message = String::new();
        let _ = SingleLine(&mut message).write_fmt(args);
        Self {
            timestamp,
            severity,
            message,
        }
    }

    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    pub fn severity(&self) -> Severity {
        self.severity
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Writes the persistent form, `timestamp \t severity \t message \n`.
    pub fn write_record<W: Write>(&self, out: &mut W) -> fmt::Result {
        writeln!(out, "{}\t{}\t{}", self.timestamp, self.severity, self.message)
    }

    /// Parses one persistent record, with or without its line break.
    pub fn parse_record(line: &str) -> Option<Self> {
        let mut fields = line.trim_end_matches(['\r', '\n']).splitn(3, '\t');
        let timestamp = fields.next()?.parse().ok()?;
        let severity = Severity::from_name(fields.next()?)?;
        let message = fields.next()?;
        Some(Self::new(timestamp, severity, message))
    }
}

/// Read access used by the status page.
pub trait LogView {
    /// Live ring contents, most recent first
    fn live_entries(&self) -> Vec<LogEntry>;

    /// Up to `max` persisted entries, most recent first
    fn persistent_entries(&self, max: usize) -> Vec<LogEntry>;
}

impl<V: LogView + ?Sized> LogView for &V {
    fn live_entries(&self) -> Vec<LogEntry> {
        (**self).live_entries()
    }

    fn persistent_entries(&self, max: usize) -> Vec<LogEntry> {
        (**self).persistent_entries(max)
    }
}

/// Truncating writer that flattens control characters.
struct SingleLine<'a, const N: usize>(&'a mut String<N>);

impl<const N: usize> Write for SingleLine<'_, N> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for ch in s.chars() {
            let ch = if matches!(ch, '\t' | '\r' | '\n') { ' ' } else { ch };
            if self.0.push(ch).is_err() {
                break;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::String as StdString;

    #[test]
    fn test_severity_order_and_names() {
        assert!(Severity::Fatal < Severity::Error);
        assert!(Severity::Debug < Severity::Trace);
        assert_eq!(Severity::from_name("warn"), Some(Severity::Warn));
        assert_eq!(Severity::from_name("WARN"), None);
        assert_eq!(Severity::of(log::Level::Error, FATAL_TARGET), Severity::Fatal);
        assert_eq!(Severity::of(log::Level::Error, "dht_node_core"), Severity::Error);
    }

    #[test]
    fn test_record_line_format() {
        let entry = LogEntry::new(Timestamp::from_millis(61_500), Severity::Fatal, "No WLAN\tconnection");
        let mut line = StdString::new();
        entry.write_record(&mut line).unwrap();
        assert_eq!(line, "0d 00:01:01.500\tfatal\tNo WLAN connection\n");
        assert_eq!(LogEntry::parse_record(&line), Some(entry));
    }

    #[test]
    fn test_parse_rejects_broken_lines() {
        assert_eq!(LogEntry::parse_record(""), None);
        assert_eq!(LogEntry::parse_record("0d 00:00:01.000\tloud\tx"), None);
        assert_eq!(LogEntry::parse_record("yesterday\tinfo\tx"), None);
        assert_eq!(LogEntry::parse_record("99999999999999d 00:00:00.000\tfatal\tx"), None);
    }

    #[test]
    fn test_long_message_is_truncated() {
        let long = "x".repeat(MESSAGE_CAPACITY + 40);
        let entry = LogEntry::new(Timestamp::ZERO, Severity::Info, &long);
        assert_eq!(entry.message().len(), MESSAGE_CAPACITY);
    }
}
