//! Simulated DHT11 with synthetic weather.

use std::time::Duration;

use dht_node_core::sensors::pulse::DecodedBuffer;
use dht_node_core::sensors::{Dht11, ProtocolError, Sensor, SensorReading};
use dht_node_core::simulation::{SimulatedClock, SimulatedDelay, SimulatedDht11, SimulatedLine};

use crate::board::micros_since_boot;

/// Every n-th frame arrives with a flipped checksum bit
const CORRUPT_EVERY: u32 = 9;

/// The real DHT11 driver talking to a virtual sensor. Before each bus cycle
/// the sensor is loaded with a frame derived from the current uptime.
/// Calls the driver answers from its cache consume no frame.
pub struct HostSensor {
    bus: SimulatedDht11,
    driver: Dht11<SimulatedLine, SimulatedClock, SimulatedDelay>,
    frames: u32,
}

impl HostSensor {
    pub fn new(min_interval: Duration) -> Self {
        let bus = SimulatedDht11::with_time_base(micros_since_boot);
        let driver = Dht11::new(bus.line(), bus.clock(), bus.delay(), min_interval);
        Self {
            bus,
            driver,
            frames: 0,
        }
    }

    fn next_frame(&mut self) -> DecodedBuffer {
        let t = micros_since_boot() as f64 / 1e6;

        // Temperature: 20–26 °C sinusoidal with slow drift
        let temperature = 23.0 + 3.0 * (t / 120.0).sin() + 0.5 * (t / 37.0).cos();
        // Humidity: 40–60 % with different period
        let humidity = 50.0 + 10.0 * (t / 180.0).sin() + 2.0 * (t / 23.0).cos();

        let (h_int, h_frac) = split_tenths(humidity);
        let (t_int, t_frac) = split_tenths(temperature);
        let frame = DecodedBuffer::from_parts(h_int, h_frac, t_int, t_frac);

        self.frames += 1;
        if self.frames % CORRUPT_EVERY == 0 {
            let mut bytes = frame.bytes();
            bytes[4] ^= 0x01;
            return DecodedBuffer::new(bytes);
        }
        frame
    }
}

/// Splits a non-negative value into integer and tenths as the DHT11 encodes it.
fn split_tenths(value: f64) -> (u8, u8) {
    let tenths = (value.max(0.0) * 10.0).round() as u32;
    ((tenths / 10).min(255) as u8, (tenths % 10) as u8)
}

impl Sensor for HostSensor {
    fn capture_and_decode(&mut self) -> Result<SensorReading, ProtocolError> {
        if self.driver.bus_due() {
            let frame = self.next_frame();
            self.bus.respond_with(frame);
        }
        self.driver.capture_and_decode()
    }

    fn last_reading(&self) -> Option<SensorReading> {
        self.driver.last_reading()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_tenths() {
        assert_eq!(split_tenths(23.46), (23, 5));
        assert_eq!(split_tenths(-3.0), (0, 0));
    }

    #[test]
    fn test_host_sensor_reads_plausible_values() {
        let mut sensor = HostSensor::new(Duration::from_secs(6));
        let reading = sensor.capture_and_decode().unwrap();
        assert!((20.0..=27.0).contains(&reading.temperature()));
        assert!((35.0..=65.0).contains(&reading.humidity()));
        assert_eq!(sensor.last_reading(), Some(reading));
    }

    #[test]
    fn test_cached_reads_consume_no_frames() {
        let mut sensor = HostSensor::new(Duration::from_secs(3600));
        let first = sensor.capture_and_decode();
        for _ in 0..20 {
            assert_eq!(sensor.capture_and_decode(), first);
        }
        assert_eq!(sensor.frames, 1);
    }

    #[test]
    fn test_every_ninth_bus_cycle_is_corrupt() {
        let mut sensor = HostSensor::new(Duration::ZERO);
        let results: Vec<_> = (0..CORRUPT_EVERY * 2).map(|_| sensor.capture_and_decode()).collect();
        assert_eq!(sensor.frames, CORRUPT_EVERY * 2);
        let corrupt: Vec<usize> = results
            .iter()
            .enumerate()
            .filter(|(_, result)| result.is_err())
            .map(|(i, _)| i)
            .collect();
        assert_eq!(corrupt, vec![8, 17]);
    }
}
