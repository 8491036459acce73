//! Monotonic node time
//!
//! All scheduling in the node is relative to boot. [`Timestamp`] counts
//! microseconds since boot and is what log entries, readings and the
//! telemetry schedule are stamped with.

use core::fmt;
use core::str::FromStr;
use core::time::Duration;

const MICROS_PER_MILLI: u64 = 1_000;
const MICROS_PER_SEC: u64 = 1_000_000;
const SECS_PER_DAY: u64 = 86_400;

/// Microseconds elapsed since boot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Timestamp(u64);

impl Timestamp {
    pub const ZERO: Self = Self(0);

    pub const fn from_micros(micros: u64) -> Self {
        Self(micros)
    }

    pub const fn from_millis(millis: u64) -> Self {
        Self(millis * MICROS_PER_MILLI)
    }

    pub const fn from_secs(secs: u64) -> Self {
        Self(secs * MICROS_PER_SEC)
    }

    pub const fn as_micros(self) -> u64 {
        self.0
    }

    pub const fn as_secs(self) -> u64 {
        self.0 / MICROS_PER_SEC
    }

    /// Time elapsed since `earlier`, zero if `earlier` lies in the future.
    pub fn saturating_duration_since(self, earlier: Timestamp) -> Duration {
        Duration::from_micros(self.0.saturating_sub(earlier.0))
    }

    pub fn saturating_add(self, duration: Duration) -> Self {
        let micros = u64::try_from(duration.as_micros()).unwrap_or(u64::MAX);
        Self(self.0.saturating_add(micros))
    }

    /// Breaks the timestamp down into days, hours, minutes and seconds.
    pub const fn uptime(self) -> Uptime {
        let total = self.as_secs();
        Uptime {
            days: total / SECS_PER_DAY,
            hours: (total % SECS_PER_DAY / 3600) as u8,
            minutes: (total % 3600 / 60) as u8,
            seconds: (total % 60) as u8,
        }
    }
}

/// Compact form used in log records: `3d 04:05:06.789`.
impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let uptime = self.uptime();
        let millis = self.0 % MICROS_PER_SEC / MICROS_PER_MILLI;
        write!(
            f,
            "{}d {:02}:{:02}:{:02}.{:03}",
            uptime.days, uptime.hours, uptime.minutes, uptime.seconds, millis
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParseTimestampError;

impl FromStr for Timestamp {
    type Err = ParseTimestampError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (days, clock) = s.split_once("d ").ok_or(ParseTimestampError)?;
        let (hms, millis) = clock.split_once('.').ok_or(ParseTimestampError)?;
        let mut fields = hms.splitn(3, ':');

        let mut next = |limit: u64| -> Result<u64, ParseTimestampError> {
            let value: u64 = fields
                .next()
                .ok_or(ParseTimestampError)?
                .parse()
                .map_err(|_| ParseTimestampError)?;
            if value >= limit {
                return Err(ParseTimestampError);
            }
            Ok(value)
        };
        let hours = next(24)?;
        let minutes = next(60)?;
        let seconds = next(60)?;

        let days: u64 = days.parse().map_err(|_| ParseTimestampError)?;
        let millis: u64 = millis.parse().map_err(|_| ParseTimestampError)?;
        if millis >= 1000 {
            return Err(ParseTimestampError);
        }

        // Records read back from storage may be corrupt; reject rather than wrap.
        let micros = days
            .checked_mul(SECS_PER_DAY)
            .and_then(|secs| secs.checked_add(hours * 3600 + minutes * 60 + seconds))
            .and_then(|secs| secs.checked_mul(MICROS_PER_SEC))
            .and_then(|micros| micros.checked_add(millis * MICROS_PER_MILLI))
            .ok_or(ParseTimestampError)?;
        Ok(Self(micros))
    }
}

/// Uptime broken into calendar-like units for the status page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Uptime {
    pub days: u64,
    pub hours: u8,
    pub minutes: u8,
    pub seconds: u8,
}

impl fmt::Display for Uptime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} days, {} hours, {} minutes, {} seconds",
            self.days, self.hours, self.minutes, self.seconds
        )
    }
}

/// Source of monotonic time.
pub trait Clock {
    /// Microseconds since boot. Must never go backwards.
    fn now_micros(&self) -> u64;

    fn now(&self) -> Timestamp {
        Timestamp::from_micros(self.now_micros())
    }
}

impl<C: Clock + ?Sized> Clock for &C {
    fn now_micros(&self) -> u64 {
        (**self).now_micros()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::ToString;

    #[test]
    fn test_display_compact_form() {
        let ts = Timestamp::from_millis(((3 * 86_400 + 4 * 3600 + 5 * 60 + 6) * 1000) + 789);
        assert_eq!(ts.to_string(), "3d 04:05:06.789");
        assert_eq!(Timestamp::ZERO.to_string(), "0d 00:00:00.000");
    }

    #[test]
    fn test_parse_matches_display() {
        let ts = Timestamp::from_millis(93_784_005);
        let parsed: Timestamp = ts.to_string().parse().unwrap();
        assert_eq!(parsed, ts);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("".parse::<Timestamp>().is_err());
        assert!("1d 25:00:00.000".parse::<Timestamp>().is_err());
        assert!("1d 01:00:00".parse::<Timestamp>().is_err());
        assert!("xd 01:00:00.000".parse::<Timestamp>().is_err());
    }

    #[test]
    fn test_parse_rejects_out_of_range_days() {
        assert!("99999999999999d 00:00:00.000".parse::<Timestamp>().is_err());
        assert!("213503982d 23:59:59.999".parse::<Timestamp>().is_err());
        // Largest day count that still fits in microseconds
        assert!("213503981d 00:00:00.000".parse::<Timestamp>().is_ok());
    }

    #[test]
    fn test_uptime_text() {
        let ts = Timestamp::from_secs(86_400 + 2 * 3600 + 3 * 60 + 4);
        assert_eq!(
            ts.uptime().to_string(),
            "1 days, 2 hours, 3 minutes, 4 seconds"
        );
    }

    #[test]
    fn test_duration_since_saturates() {
        let early = Timestamp::from_secs(10);
        let late = Timestamp::from_secs(12);
        assert_eq!(late.saturating_duration_since(early), Duration::from_secs(2));
        assert_eq!(early.saturating_duration_since(late), Duration::ZERO);
    }
}
