//! Sensor reading model and the sensor trait
//!
//! The node carries a single DHT11 on a single-wire bus. [`Dht11`] drives the
//! bus and [`pulse`] turns the captured pulse train into a validated
//! [`DecodedBuffer`]. Only a checksum-validated buffer can become a
//! [`SensorReading`].

mod dht11;
pub mod pulse;

pub use dht11::{DataLine, Dht11};
pub use pulse::{DecodedBuffer, PulseTrain};

use thiserror_no_std::Error;

use crate::clock::Timestamp;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolError {
    /// The sensor answered with the wrong number of level transitions, or not at all
    #[error("Expected {expected} pulses, captured {received}")]
    InvalidPulseCount { expected: usize, received: usize },

    /// Bit-level corruption on the wire
    #[error("Checksum mismatch (computed {computed:#04x}, received {received:#04x})")]
    InvalidChecksum { computed: u8, received: u8 },

    /// The GPIO driver refused to switch or sample the data line
    #[error("Data line fault")]
    LineFault,
}

/// One humidity/temperature sample.
///
/// Fields are private: a reading only exists once its buffer passed the
/// checksum, and it never changes afterwards.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorReading {
    temperature: f32,
    humidity: f32,
    captured_at: Timestamp,
}

impl SensorReading {
    /// Converts a decoded buffer into a reading, verifying its checksum first.
    pub fn from_buffer(buffer: &DecodedBuffer, captured_at: Timestamp) -> Result<Self, ProtocolError> {
        buffer.verify()?;
        Ok(Self {
            humidity: tenths(buffer.humidity_int(), buffer.humidity_frac()),
            temperature: tenths(buffer.temperature_int(), buffer.temperature_frac()),
            captured_at,
        })
    }

    /// Degrees Celsius, one fractional digit
    pub fn temperature(&self) -> f32 {
        self.temperature
    }

    /// Percent relative humidity, one fractional digit
    pub fn humidity(&self) -> f32 {
        self.humidity
    }

    pub fn captured_at(&self) -> Timestamp {
        self.captured_at
    }

    /// The only sanity check the node applies before publishing.
    pub fn is_plausible(&self) -> bool {
        self.temperature > 0.0
    }
}

fn tenths(integer: u8, fraction: u8) -> f32 {
    f32::from(integer) + f32::from(fraction) / 10.0
}

/// A sensor that produces validated humidity/temperature readings.
pub trait Sensor {
    /// Returns a fresh reading, or the cached one while the sensor's
    /// minimum interval has not elapsed.
    fn capture_and_decode(&mut self) -> Result<SensorReading, ProtocolError>;

    /// Most recent successful reading, if any.
    fn last_reading(&self) -> Option<SensorReading>;
}

impl<S: Sensor + ?Sized> Sensor for &mut S {
    fn capture_and_decode(&mut self) -> Result<SensorReading, ProtocolError> {
        (**self).capture_and_decode()
    }

    fn last_reading(&self) -> Option<SensorReading> {
        (**self).last_reading()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reading_from_valid_buffer() {
        let buffer = DecodedBuffer::from_parts(45, 0, 23, 5);
        let reading = SensorReading::from_buffer(&buffer, Timestamp::from_secs(3)).unwrap();
        assert_eq!(reading.humidity(), 45.0);
        assert_eq!(reading.temperature(), 23.5);
        assert_eq!(reading.captured_at(), Timestamp::from_secs(3));
        assert!(reading.is_plausible());
    }

    #[test]
    fn test_reading_refuses_bad_checksum() {
        let buffer = DecodedBuffer::new([45, 0, 23, 5, 0]);
        assert_eq!(
            SensorReading::from_buffer(&buffer, Timestamp::ZERO),
            Err(ProtocolError::InvalidChecksum {
                computed: 73,
                received: 0
            })
        );
    }

    #[test]
    fn test_zero_degrees_is_implausible() {
        let buffer = DecodedBuffer::from_parts(30, 0, 0, 0);
        let reading = SensorReading::from_buffer(&buffer, Timestamp::ZERO).unwrap();
        assert!(!reading.is_plausible());
    }
}
