//! The DHT11 data pin.
//!
//! The sensor shares one open-drain wire for the host's start signal and its
//! own reply, so the pin flips between output and pulled-up input on every
//! capture.

use core::convert::Infallible;

use dht_node_core::sensors::DataLine;
use embedded_hal::digital::{ErrorType, InputPin, OutputPin};
use esp_hal::gpio::{DriveMode, Flex, InputConfig, Level, OutputConfig, Pull};

pub struct FlexLine<'d> {
    pin: Flex<'d>,
}

impl<'d> FlexLine<'d> {
    /// Takes the pin and parks it released (driven high), the bus idle state.
    pub fn new(mut pin: Flex<'d>) -> Self {
        pin.apply_input_config(&InputConfig::default().with_pull(Pull::Up));
        pin.apply_output_config(
            &OutputConfig::default()
                .with_drive_mode(DriveMode::OpenDrain)
                .with_pull(Pull::Up),
        );
        pin.set_level(Level::High);
        pin.set_output_enable(true);
        pin.set_input_enable(true);
        Self { pin }
    }
}

impl ErrorType for FlexLine<'_> {
    type Error = Infallible;
}

impl InputPin for FlexLine<'_> {
    fn is_high(&mut self) -> Result<bool, Self::Error> {
        Ok(self.pin.is_high())
    }

    fn is_low(&mut self) -> Result<bool, Self::Error> {
        Ok(self.pin.is_low())
    }
}

impl OutputPin for FlexLine<'_> {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.pin.set_low();
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.pin.set_high();
        Ok(())
    }
}

impl DataLine for FlexLine<'_> {
    fn set_as_output(&mut self) -> Result<(), Self::Error> {
        self.pin.set_output_enable(true);
        Ok(())
    }

    fn set_as_input(&mut self) -> Result<(), Self::Error> {
        self.pin.set_output_enable(false);
        Ok(())
    }
}
