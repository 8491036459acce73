//! Clock, platform and console for the ESP32-S3 board.

use dht_node_core::clock::{Clock, Timestamp};
use dht_node_core::platform::Platform;
use log::{Log, Metadata, Record};

/// Frequency `main` configures with `CpuClock::max()`
pub const CPU_FREQUENCY_MHZ: u32 = 240;

/// Microseconds since boot from the hardware system timer.
///
/// Readable inside critical sections, which the DHT11 capture relies on.
pub fn micros_since_boot() -> u64 {
    esp_hal::time::Instant::now().duration_since_epoch().as_micros()
}

pub fn uptime() -> Timestamp {
    Timestamp::from_micros(micros_since_boot())
}

#[derive(Debug, Clone, Copy, Default)]
pub struct EspClock;

impl Clock for EspClock {
    fn now_micros(&self) -> u64 {
        micros_since_boot()
    }
}

pub struct EspPlatform;

impl Platform for EspPlatform {
    fn reset(&mut self) -> ! {
        log::logger().flush();
        esp_hal::system::software_reset()
    }

    fn cpu_frequency_mhz(&self) -> u32 {
        CPU_FREQUENCY_MHZ
    }

    fn heap_used(&self) -> usize {
        esp_alloc::HEAP.used()
    }

    fn heap_free(&self) -> usize {
        esp_alloc::HEAP.free()
    }
}

/// Prints log records over RTT.
pub struct RttConsole;

impl Log for RttConsole {
    fn enabled(&self, _metadata: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        rtt_target::rprintln!(
            "{} [{}] {}: {}",
            uptime(),
            record.level(),
            record.target(),
            record.args()
        );
    }

    fn flush(&self) {}
}
