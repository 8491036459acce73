use core::fmt::Debug;
use core::time::Duration;

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{InputPin, OutputPin};
use log::{debug, error, trace};

use super::pulse::{EXPECTED_PULSES, PulseTrain};
use super::{ProtocolError, Sensor, SensorReading};
use crate::clock::Clock;

/// Line held high before the start signal so the sensor sees a clean edge
const SETTLE_MS: u32 = 50;
/// Start signal; the datasheet asks for at least 18 ms low
const START_SIGNAL_MS: u32 = 18;
/// No transition for this long means the sensor stopped talking
const IDLE_TIMEOUT_US: u64 = 250;
/// A full cycle takes about 5 ms; nothing may keep the capture loop longer
const CAPTURE_DEADLINE_US: u64 = 10_000;
/// Backstop for a clock that does not advance while polling
const MAX_POLL_ITERATIONS: u32 = 200_000;

/// A single GPIO that can be turned around between driving and sensing.
pub trait DataLine: InputPin + OutputPin {
    /// Switches to push-pull output. The driven level is unspecified.
    fn set_as_output(&mut self) -> Result<(), Self::Error>;

    /// Releases the line to input with pull-up.
    fn set_as_input(&mut self) -> Result<(), Self::Error>;
}

/// DHT11 driver over a bit-banged single-wire bus.
///
/// Owns the data line for its whole life and leaves it driven high after
/// every cycle, successful or not, so the next cycle starts from idle.
pub struct Dht11<L, C, D> {
    line: L,
    clock: C,
    delay: D,
    min_interval: Duration,
    cached: Option<SensorReading>,
}

impl<L: DataLine, C: Clock, D: DelayNs> Dht11<L, C, D> {
    pub fn new(line: L, clock: C, delay: D, min_interval: Duration) -> Self {
        Self {
            line,
            clock,
            delay,
            min_interval,
            cached: None,
        }
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Whether the next [`capture_and_decode`](Self::capture_and_decode)
    /// drives the bus instead of returning the cached reading.
    pub fn bus_due(&self) -> bool {
        let now = self.clock.now();
        self.cached
            .is_none_or(|cached| now.saturating_duration_since(cached.captured_at()) >= self.min_interval)
    }

    /// Reads the sensor, or returns the cached reading when the previous
    /// successful capture is younger than the minimum interval.
    pub fn capture_and_decode(&mut self) -> Result<SensorReading, ProtocolError> {
        if !self.bus_due()
            && let Some(cached) = self.cached
        {
            trace!("DHT11: reusing reading from {}", cached.captured_at());
            return Ok(cached);
        }

        let train = self.capture()?;
        let reading = SensorReading::from_buffer(&train.decode(), self.clock.now())?;
        debug!(
            "DHT11: {:.1} C, {:.1} %RH",
            reading.temperature(),
            reading.humidity()
        );
        self.cached = Some(reading);
        Ok(reading)
    }

    /// Runs one bus cycle and returns the captured train.
    fn capture(&mut self) -> Result<PulseTrain, ProtocolError> {
        let captured = self.send_start_signal().and_then(|()| {
            let mut pulses = [0u32; EXPECTED_PULSES];
            let count = critical_section::with(|_| self.read_pulses(&mut pulses))?;
            trace!("DHT11: captured {} pulses", count);
            PulseTrain::from_durations(&pulses[..count])
        });
        let restored = self.release_to_idle();
        let train = captured?;
        restored?;
        Ok(train)
    }

    fn send_start_signal(&mut self) -> Result<(), ProtocolError> {
        self.line.set_as_output().map_err(line_fault)?;
        self.line.set_high().map_err(line_fault)?;
        self.delay.delay_ms(SETTLE_MS);
        self.line.set_low().map_err(line_fault)?;
        self.delay.delay_ms(START_SIGNAL_MS);
        self.line.set_as_input().map_err(line_fault)
    }

    /// Times level transitions until the expected count, the idle timeout or
    /// the capture deadline. Returns the number of recorded pulses.
    fn read_pulses(&mut self, pulses: &mut [u32; EXPECTED_PULSES]) -> Result<usize, ProtocolError> {
        let started = self.clock.now_micros();
        let mut level = self.line.is_high().map_err(line_fault)?;
        let mut last_edge = started;
        let mut count = 0usize;

        for _ in 0..MAX_POLL_ITERATIONS {
            let sample = self.line.is_high().map_err(line_fault)?;
            let now = self.clock.now_micros();

            if sample != level {
                if count == EXPECTED_PULSES {
                    return Err(ProtocolError::InvalidPulseCount {
                        expected: EXPECTED_PULSES,
                        received: count + 1,
                    });
                }
                pulses[count] = u32::try_from(now - last_edge).unwrap_or(u32::MAX);
                count += 1;
                level = sample;
                last_edge = now;
            } else if now - last_edge > IDLE_TIMEOUT_US {
                break;
            }

            if now - started > CAPTURE_DEADLINE_US {
                break;
            }
        }

        Ok(count)
    }

    fn release_to_idle(&mut self) -> Result<(), ProtocolError> {
        self.line.set_as_output().map_err(line_fault)?;
        self.line.set_high().map_err(line_fault)
    }
}

impl<L: DataLine, C: Clock, D: DelayNs> Sensor for Dht11<L, C, D> {
    fn capture_and_decode(&mut self) -> Result<SensorReading, ProtocolError> {
        Dht11::capture_and_decode(self)
    }

    fn last_reading(&self) -> Option<SensorReading> {
        self.cached
    }
}

fn line_fault<E: Debug>(e: E) -> ProtocolError {
    error!("DHT11 data line fault: {:?}", e);
    ProtocolError::LineFault
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensors::pulse::{DecodedBuffer, synthesize};
    use crate::simulation::SimulatedDht11;
    use alloc::vec::Vec;

    fn driver(sim: &SimulatedDht11) -> Dht11<impl DataLine, impl Clock, impl DelayNs> {
        Dht11::new(sim.line(), sim.clock(), sim.delay(), Duration::from_secs(6))
    }

    #[test]
    fn test_end_to_end_reading() {
        let sim = SimulatedDht11::new();
        sim.respond_with(DecodedBuffer::from_parts(45, 0, 23, 5));
        sim.advance(Duration::from_secs(1));
        let mut dht = driver(&sim);

        let reading = dht.capture_and_decode().unwrap();
        assert_eq!(reading.humidity(), 45.0);
        assert_eq!(reading.temperature(), 23.5);
        assert!(reading.captured_at().as_micros() >= 1_000_000);
        assert_eq!(dht.last_reading(), Some(reading));
        assert_eq!(sim.handshakes(), 1);
    }

    #[test]
    fn test_rate_guard_skips_bus() {
        let sim = SimulatedDht11::new();
        sim.respond_with(DecodedBuffer::from_parts(50, 0, 21, 0));
        let mut dht = driver(&sim);

        let first = dht.capture_and_decode().unwrap();
        sim.advance(Duration::from_secs(2));
        let second = dht.capture_and_decode().unwrap();

        assert_eq!(first, second);
        assert_eq!(sim.handshakes(), 1);
        assert!(!dht.bus_due());

        sim.advance(Duration::from_secs(4));
        assert!(dht.bus_due());
    }

    #[test]
    fn test_bus_driven_again_after_interval() {
        let sim = SimulatedDht11::new();
        sim.respond_with(DecodedBuffer::from_parts(50, 0, 21, 0));
        let mut dht = driver(&sim);

        dht.capture_and_decode().unwrap();
        sim.respond_with(DecodedBuffer::from_parts(55, 0, 22, 3));
        sim.advance(Duration::from_secs(6));
        let reading = dht.capture_and_decode().unwrap();

        assert_eq!(reading.temperature(), 22.3);
        assert_eq!(sim.handshakes(), 2);
    }

    #[test]
    fn test_checksum_failure_keeps_cache() {
        let sim = SimulatedDht11::new();
        sim.respond_with(DecodedBuffer::from_parts(40, 0, 20, 0));
        let mut dht = driver(&sim);
        let good = dht.capture_and_decode().unwrap();

        sim.respond_with(DecodedBuffer::new([40, 0, 20, 0, 61]));
        sim.advance(Duration::from_secs(7));
        assert_eq!(
            dht.capture_and_decode(),
            Err(ProtocolError::InvalidChecksum {
                computed: 60,
                received: 61
            })
        );
        assert_eq!(dht.last_reading(), Some(good));
        assert!(sim.is_driven_high());
    }

    #[test]
    fn test_silent_sensor_times_out() {
        let sim = SimulatedDht11::new();
        let mut dht = driver(&sim);

        assert_eq!(
            dht.capture_and_decode(),
            Err(ProtocolError::InvalidPulseCount {
                expected: EXPECTED_PULSES,
                received: 0
            })
        );
        assert!(dht.last_reading().is_none());
        assert!(sim.is_driven_high());
    }

    #[test]
    fn test_missing_pulses_are_rejected() {
        let sim = SimulatedDht11::new();
        let pulses = synthesize(&DecodedBuffer::from_parts(45, 0, 23, 5));
        sim.respond_with_pulses(pulses[..70].to_vec());
        let mut dht = driver(&sim);

        assert_eq!(
            dht.capture_and_decode(),
            Err(ProtocolError::InvalidPulseCount {
                expected: EXPECTED_PULSES,
                received: 70
            })
        );
        assert!(sim.is_driven_high());
    }

    #[test]
    fn test_extra_pulses_are_rejected() {
        let sim = SimulatedDht11::new();
        let mut pulses: Vec<u32> = synthesize(&DecodedBuffer::from_parts(45, 0, 23, 5)).to_vec();
        pulses.extend_from_slice(&[40, 40]);
        sim.respond_with_pulses(pulses);
        let mut dht = driver(&sim);

        assert_eq!(
            dht.capture_and_decode(),
            Err(ProtocolError::InvalidPulseCount {
                expected: EXPECTED_PULSES,
                received: EXPECTED_PULSES + 1
            })
        );
        assert!(dht.last_reading().is_none());
        assert!(sim.is_driven_high());
    }
}
