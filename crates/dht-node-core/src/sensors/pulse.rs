//! DHT11 pulse train decoding
//!
//! One bus cycle yields 84 level transitions. Every bit is a low preamble
//! followed by a high phase whose length carries the bit: roughly 27 µs for
//! `0`, 70 µs for `1`. The capture lays them out as:
//!
//! | index        | phase                                         |
//! |--------------|-----------------------------------------------|
//! | 0            | host releases the line                        |
//! | 1, 2         | sensor response, low then high                |
//! | 3            | low preamble of bit 0                         |
//! | 4, 6, .., 82 | high phase of bits 0 to 39                    |
//! | 5, 7, .., 81 | low preamble of bits 1 to 39                  |
//! | 83           | final low before the sensor releases the line |
//!
//! Index 3 counts as handshake because it is the only preamble that comes
//! before any data, so data starts on an even index and only even indices
//! from there on are read.

use super::ProtocolError;

/// Transitions in one complete bus cycle
pub const EXPECTED_PULSES: usize = 84;
/// Leading transitions that carry no data
pub const HANDSHAKE_PULSES: usize = 4;
pub const DATA_BITS: usize = 40;
/// High phases longer than this decode as `1`
pub const HIGH_LEVEL_US: u32 = 50;

/// Exactly [`EXPECTED_PULSES`] pulse durations in microseconds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PulseTrain {
    pulses: [u32; EXPECTED_PULSES],
}

impl PulseTrain {
    /// Builds a train, rejecting any capture with too few or too many pulses.
    pub fn from_durations(durations: &[u32]) -> Result<Self, ProtocolError> {
        let pulses: [u32; EXPECTED_PULSES] =
            durations
                .try_into()
                .map_err(|_| ProtocolError::InvalidPulseCount {
                    expected: EXPECTED_PULSES,
                    received: durations.len(),
                })?;
        Ok(Self { pulses })
    }

    pub fn durations(&self) -> &[u32; EXPECTED_PULSES] {
        &self.pulses
    }

    /// Decodes the 40 data bits, most significant first.
    ///
    /// Only the high phases (indices 4, 6, .., 82) are looked at. Preambles
    /// and the trailing low carry no data. Counted as (preamble, high) from
    /// index 3, each high phase is the second pulse of its pair. Counted in
    /// pairs from index 4 it is the first. Both describe the same pulses.
    ///
    /// The returned buffer is not validated; see [`DecodedBuffer::verify`].
    pub fn decode(&self) -> DecodedBuffer {
        let mut bits: u64 = 0;
        for high in self.pulses[HANDSHAKE_PULSES..].iter().step_by(2) {
            bits = (bits << 1) | u64::from(*high > HIGH_LEVEL_US);
        }

        let mut bytes = [0u8; 5];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = (bits >> (8 * (4 - i))) as u8;
        }
        DecodedBuffer::new(bytes)
    }
}

/// `[humidity_int, humidity_frac, temp_int, temp_frac, checksum]`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodedBuffer([u8; 5]);

impl DecodedBuffer {
    pub const fn new(bytes: [u8; 5]) -> Self {
        Self(bytes)
    }

    /// Builds a buffer with a matching checksum byte.
    pub fn from_parts(humidity_int: u8, humidity_frac: u8, temp_int: u8, temp_frac: u8) -> Self {
        let mut bytes = [humidity_int, humidity_frac, temp_int, temp_frac, 0];
        bytes[4] = checksum(&bytes);
        Self(bytes)
    }

    pub const fn bytes(&self) -> [u8; 5] {
        self.0
    }

    pub const fn humidity_int(&self) -> u8 {
        self.0[0]
    }

    pub const fn humidity_frac(&self) -> u8 {
        self.0[1]
    }

    pub const fn temperature_int(&self) -> u8 {
        self.0[2]
    }

    pub const fn temperature_frac(&self) -> u8 {
        self.0[3]
    }

    pub const fn received_checksum(&self) -> u8 {
        self.0[4]
    }

    pub fn computed_checksum(&self) -> u8 {
        checksum(&self.0)
    }

    pub fn verify(&self) -> Result<(), ProtocolError> {
        let computed = self.computed_checksum();
        let received = self.received_checksum();
        if computed != received {
            return Err(ProtocolError::InvalidChecksum { computed, received });
        }
        Ok(())
    }
}

/// Sum of the four data bytes modulo 256
fn checksum(bytes: &[u8; 5]) -> u8 {
    bytes[..4].iter().fold(0u8, |sum, b| sum.wrapping_add(*b))
}

/// Nominal durations of a bus cycle that carries `buffer`.
#[cfg(any(test, feature = "simulation"))]
pub fn synthesize(buffer: &DecodedBuffer) -> [u32; EXPECTED_PULSES] {
    const RELEASE_US: u32 = 30;
    const RESPONSE_US: u32 = 80;
    const BIT_PREAMBLE_US: u32 = 50;
    const ZERO_US: u32 = 27;
    const ONE_US: u32 = 70;

    let mut pulses = [0u32; EXPECTED_PULSES];
    pulses[0] = RELEASE_US;
    pulses[1] = RESPONSE_US;
    pulses[2] = RESPONSE_US;

    let bytes = buffer.bytes();
    for bit in 0..DATA_BITS {
        let set = bytes[bit / 8] & (0x80 >> (bit % 8)) != 0;
        pulses[3 + 2 * bit] = BIT_PREAMBLE_US;
        pulses[4 + 2 * bit] = if set { ONE_US } else { ZERO_US };
    }
    // The sensor pulls low once more before releasing the line.
    pulses[EXPECTED_PULSES - 1] = BIT_PREAMBLE_US;
    pulses
}
