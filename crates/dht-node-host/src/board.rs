//! Host stand-ins for the board: clock, delay, platform and indicator LEDs.

use std::convert::Infallible;
use std::fs;
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use embedded_hal::digital::{ErrorType, OutputPin};
use embedded_hal_async::delay::DelayNs;
use log::{debug, warn};

use dht_node_core::clock::{Clock, Timestamp};
use dht_node_core::platform::Platform;

/// Exit code standing in for a device reset (EX_TEMPFAIL)
pub const RESET_EXIT_CODE: i32 = 75;

static BOOT: OnceLock<Instant> = OnceLock::new();

/// Microseconds since the process started
pub fn micros_since_boot() -> u64 {
    let boot = BOOT.get_or_init(Instant::now);
    u64::try_from(boot.elapsed().as_micros()).unwrap_or(u64::MAX)
}

pub fn uptime() -> Timestamp {
    Timestamp::from_micros(micros_since_boot())
}

pub struct HostClock;

impl Clock for HostClock {
    fn now_micros(&self) -> u64 {
        micros_since_boot()
    }
}

/// Sleeps the thread. The runtime loop is the only task, so blocking is fine.
pub struct HostDelay;

impl DelayNs for HostDelay {
    async fn delay_ns(&mut self, ns: u32) {
        std::thread::sleep(Duration::from_nanos(u64::from(ns)));
    }
}

pub struct HostPlatform;

impl Platform for HostPlatform {
    fn reset(&mut self) -> ! {
        warn!("Device reset: exiting with code {}", RESET_EXIT_CODE);
        log::logger().flush();
        std::process::exit(RESET_EXIT_CODE)
    }

    fn cpu_frequency_mhz(&self) -> u32 {
        fs::read_to_string("/proc/cpuinfo")
            .ok()
            .and_then(|info| {
                info.lines()
                    .find(|line| line.starts_with("cpu MHz"))
                    .and_then(|line| line.split(':').nth(1))
                    .and_then(|mhz| mhz.trim().parse::<f32>().ok())
            })
            .map_or(0, |mhz| mhz as u32)
    }

    /// Resident set size of the process
    fn heap_used(&self) -> usize {
        const PAGE_SIZE: usize = 4096;
        fs::read_to_string("/proc/self/statm")
            .ok()
            .and_then(|statm| statm.split_whitespace().nth(1)?.parse::<usize>().ok())
            .map_or(0, |pages| pages * PAGE_SIZE)
    }

    /// Memory available to new allocations system-wide
    fn heap_free(&self) -> usize {
        fs::read_to_string("/proc/meminfo")
            .ok()
            .and_then(|meminfo| {
                meminfo
                    .lines()
                    .find(|line| line.starts_with("MemAvailable:"))?
                    .split_whitespace()
                    .nth(1)?
                    .parse::<usize>()
                    .ok()
            })
            .map_or(0, |kib| kib * 1024)
    }
}

/// An indicator LED that reports its state changes in the log.
pub struct LogIndicator {
    name: &'static str,
    lit: bool,
}

impl LogIndicator {
    pub fn new(name: &'static str) -> Self {
        Self { name, lit: false }
    }

    fn drive(&mut self, lit: bool) {
        if self.lit != lit {
            debug!("{} indicator {}", self.name, if lit { "on" } else { "off" });
        }
        self.lit = lit;
    }
}

impl ErrorType for LogIndicator {
    type Error = Infallible;
}

impl OutputPin for LogIndicator {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.drive(false);
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.drive(true);
        Ok(())
    }
}
