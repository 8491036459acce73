use alloc::rc::Rc;
use alloc::vec::Vec;
use core::cell::{Cell, RefCell};
use core::convert::Infallible;
use core::time::Duration;

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{ErrorType, InputPin, OutputPin};

use crate::clock::Clock;
use crate::sensors::DataLine;
use crate::sensors::pulse::{DecodedBuffer, synthesize};

/// Virtual time spent by one level sample
const POLL_COST_US: u64 = 1;

struct Bus {
    time_base: fn() -> u64,
    offset: Cell<u64>,
    output: Cell<bool>,
    driven_high: Cell<bool>,
    released_at: Cell<Option<u64>>,
    script: RefCell<Vec<u32>>,
    handshakes: Cell<usize>,
}

impl Bus {
    fn now(&self) -> u64 {
        (self.time_base)() + self.offset.get()
    }

    fn advance_micros(&self, micros: u64) {
        self.offset.set(self.offset.get() + micros);
    }

    fn level(&self) -> bool {
        if self.output.get() {
            return self.driven_high.get();
        }
        let Some(released_at) = self.released_at.get() else {
            return true;
        };

        // The line idles high and toggles at the end of every scripted pulse.
        let elapsed = self.now() - released_at;
        let mut boundary = 0u64;
        let mut toggles = 0usize;
        for duration in self.script.borrow().iter() {
            boundary += u64::from(*duration);
            if boundary > elapsed {
                break;
            }
            toggles += 1;
        }
        toggles % 2 == 0
    }
}

fn boot_time() -> u64 {
    0
}

/// A DHT11 on a virtual bus.
///
/// The sensor answers every start signal with the scripted pulse durations
/// measured from the moment the line is released. The default script is
/// empty, which models a disconnected sensor.
#[derive(Clone)]
pub struct SimulatedDht11 {
    bus: Rc<Bus>,
}

impl Default for SimulatedDht11 {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedDht11 {
    pub fn new() -> Self {
        Self::with_time_base(boot_time)
    }

    /// Uses `time_base` (microseconds) as the bus's notion of real time.
    /// Virtual delays and polling add on top of it.
    pub fn with_time_base(time_base: fn() -> u64) -> Self {
        Self {
            bus: Rc::new(Bus {
                time_base,
                offset: Cell::new(0),
                output: Cell::new(true),
                driven_high: Cell::new(true),
                released_at: Cell::new(None),
                script: RefCell::new(Vec::new()),
                handshakes: Cell::new(0),
            }),
        }
    }

    /// Answers subsequent cycles with a well-formed frame carrying `buffer`.
    pub fn respond_with(&self, buffer: DecodedBuffer) {
        self.respond_with_pulses(synthesize(&buffer).to_vec());
    }

    /// Answers subsequent cycles with arbitrary pulse durations.
    pub fn respond_with_pulses(&self, durations: Vec<u32>) {
        *self.bus.script.borrow_mut() = durations;
    }

    pub fn go_silent(&self) {
        self.bus.script.borrow_mut().clear();
    }

    pub fn advance(&self, duration: Duration) {
        self.bus
            .advance_micros(u64::try_from(duration.as_micros()).unwrap_or(u64::MAX));
    }

    /// Number of times the line was released for the sensor to answer
    pub fn handshakes(&self) -> usize {
        self.bus.handshakes.get()
    }

    /// Whether the host is driving the line high, i.e. the bus is idle
    pub fn is_driven_high(&self) -> bool {
        self.bus.output.get() && self.bus.driven_high.get()
    }

    pub fn line(&self) -> SimulatedLine {
        SimulatedLine {
            bus: self.bus.clone(),
        }
    }

    pub fn clock(&self) -> SimulatedClock {
        SimulatedClock {
            bus: self.bus.clone(),
        }
    }

    pub fn delay(&self) -> SimulatedDelay {
        SimulatedDelay {
            bus: self.bus.clone(),
        }
    }
}

/// The host side of the virtual data line
pub struct SimulatedLine {
    bus: Rc<Bus>,
}

impl ErrorType for SimulatedLine {
    type Error = Infallible;
}

impl InputPin for SimulatedLine {
    fn is_high(&mut self) -> Result<bool, Self::Error> {
        self.bus.advance_micros(POLL_COST_US);
        Ok(self.bus.level())
    }

    fn is_low(&mut self) -> Result<bool, Self::Error> {
        self.is_high().map(|high| !high)
    }
}

impl OutputPin for SimulatedLine {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.bus.driven_high.set(false);
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.bus.driven_high.set(true);
        Ok(())
    }
}

impl DataLine for SimulatedLine {
    fn set_as_output(&mut self) -> Result<(), Self::Error> {
        self.bus.output.set(true);
        self.bus.released_at.set(None);
        Ok(())
    }

    fn set_as_input(&mut self) -> Result<(), Self::Error> {
        self.bus.output.set(false);
        self.bus.released_at.set(Some(self.bus.now()));
        self.bus.handshakes.set(self.bus.handshakes.get() + 1);
        Ok(())
    }
}

/// Bus time, including everything spent polling and waiting
pub struct SimulatedClock {
    bus: Rc<Bus>,
}

impl Clock for SimulatedClock {
    fn now_micros(&self) -> u64 {
        self.bus.now()
    }
}

/// Blocking delay that only moves bus time
pub struct SimulatedDelay {
    bus: Rc<Bus>,
}

impl DelayNs for SimulatedDelay {
    fn delay_ns(&mut self, ns: u32) {
        self.bus.advance_micros(u64::from(ns.div_ceil(1000)));
    }
}
