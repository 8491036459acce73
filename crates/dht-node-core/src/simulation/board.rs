use alloc::rc::Rc;
use core::cell::Cell;
use core::convert::Infallible;
use core::time::Duration;

use embedded_hal::digital::{ErrorType, OutputPin};
use embedded_hal_async::delay::DelayNs;

use crate::clock::Clock;
use crate::platform::Platform;

/// Manually advanced clock shared by everything cloned from it.
#[derive(Clone, Default)]
pub struct VirtualClock {
    micros: Rc<Cell<u64>>,
}

impl VirtualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, duration: Duration) {
        let micros = u64::try_from(duration.as_micros()).unwrap_or(u64::MAX);
        self.micros.set(self.micros.get().saturating_add(micros));
    }
}

impl Clock for VirtualClock {
    fn now_micros(&self) -> u64 {
        self.micros.get()
    }
}

/// Async delay that only yields once, optionally moving a [`VirtualClock`].
#[derive(Clone, Default)]
pub struct InstantDelay {
    clock: Option<VirtualClock>,
    waited_ns: Rc<Cell<u64>>,
    calls: Rc<Cell<u32>>,
}

impl InstantDelay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn driving(clock: VirtualClock) -> Self {
        Self {
            clock: Some(clock),
            ..Self::default()
        }
    }

    /// Total time all clones were asked to wait
    pub fn waited(&self) -> Duration {
        Duration::from_nanos(self.waited_ns.get())
    }

    pub fn calls(&self) -> u32 {
        self.calls.get()
    }
}

impl DelayNs for InstantDelay {
    async fn delay_ns(&mut self, ns: u32) {
        self.waited_ns.set(self.waited_ns.get() + u64::from(ns));
        self.calls.set(self.calls.get() + 1);
        if let Some(clock) = &self.clock {
            clock.advance(Duration::from_nanos(u64::from(ns)));
        }
        embassy_futures::yield_now().await;
    }
}

/// Output pin that remembers its level and how often it changed.
#[derive(Clone, Default)]
pub struct RecordingPin {
    high: Rc<Cell<bool>>,
    changes: Rc<Cell<u32>>,
}

impl RecordingPin {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_set_high(&self) -> bool {
        self.high.get()
    }

    /// Number of level changes seen so far
    pub fn changes(&self) -> u32 {
        self.changes.get()
    }

    fn drive(&self, high: bool) {
        if self.high.get() != high {
            self.changes.set(self.changes.get() + 1);
        }
        self.high.set(high);
    }
}

impl ErrorType for RecordingPin {
    type Error = Infallible;
}

impl OutputPin for RecordingPin {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.drive(false);
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.drive(true);
        Ok(())
    }
}

/// Platform whose reset unwinds with a panic, so a test can observe it.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResetRequested;

impl Platform for ResetRequested {
    fn reset(&mut self) -> ! {
        panic!("device reset requested");
    }

    fn cpu_frequency_mhz(&self) -> u32 {
        240
    }

    fn heap_used(&self) -> usize {
        12_288
    }

    fn heap_free(&self) -> usize {
        61_456
    }
}
