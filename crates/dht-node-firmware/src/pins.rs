//! GPIO selection by number.
//!
//! esp-hal gives every pin its own type, so pins named in the node config
//! are degraded to [`AnyPin`] up front and handed out by number.

use esp_hal::gpio::{AnyPin, Pin};
use esp_hal::peripherals::{
    GPIO1, GPIO2, GPIO3, GPIO4, GPIO5, GPIO6, GPIO7, GPIO8, GPIO9, GPIO14, GPIO15, GPIO16, GPIO17,
    GPIO18, GPIO21,
};
use thiserror_no_std::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinError {
    #[error("GPIO{0} cannot be assigned on this board")]
    Unavailable(u8),

    #[error("GPIO{0} was already taken")]
    Taken(u8),
}

/// Free GPIOs of the board, excluding the SD card bus.
pub struct FreePins {
    pub gpio1: GPIO1<'static>,
    pub gpio2: GPIO2<'static>,
    pub gpio3: GPIO3<'static>,
    pub gpio4: GPIO4<'static>,
    pub gpio5: GPIO5<'static>,
    pub gpio6: GPIO6<'static>,
    pub gpio7: GPIO7<'static>,
    pub gpio8: GPIO8<'static>,
    pub gpio9: GPIO9<'static>,
    pub gpio14: GPIO14<'static>,
    pub gpio15: GPIO15<'static>,
    pub gpio16: GPIO16<'static>,
    pub gpio17: GPIO17<'static>,
    pub gpio18: GPIO18<'static>,
    pub gpio21: GPIO21<'static>,
}

pub struct PinBank {
    pins: [(u8, Option<AnyPin<'static>>); 15],
}

impl PinBank {
    pub fn new(free: FreePins) -> Self {
        Self {
            pins: [
                (1, Some(free.gpio1.degrade())),
                (2, Some(free.gpio2.degrade())),
                (3, Some(free.gpio3.degrade())),
                (4, Some(free.gpio4.degrade())),
                (5, Some(free.gpio5.degrade())),
                (6, Some(free.gpio6.degrade())),
                (7, Some(free.gpio7.degrade())),
                (8, Some(free.gpio8.degrade())),
                (9, Some(free.gpio9.degrade())),
                (14, Some(free.gpio14.degrade())),
                (15, Some(free.gpio15.degrade())),
                (16, Some(free.gpio16.degrade())),
                (17, Some(free.gpio17.degrade())),
                (18, Some(free.gpio18.degrade())),
                (21, Some(free.gpio21.degrade())),
            ],
        }
    }

    /// Moves GPIO `number` out of the bank.
    pub fn take(&mut self, number: u8) -> Result<AnyPin<'static>, PinError> {
        let (_, slot) = self
            .pins
            .iter_mut()
            .find(|(n, _)| *n == number)
            .ok_or(PinError::Unavailable(number))?;
        slot.take().ok_or(PinError::Taken(number))
    }
}
