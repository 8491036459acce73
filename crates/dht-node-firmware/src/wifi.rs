//! Station-mode WiFi on esp-radio with addressing from embassy-net.

use core::net::Ipv4Addr;

use alloc::string::String;

use dht_node_core::connectivity::{LinkStatus, WifiLink};
use embassy_net::Stack;
use esp_radio::wifi::{ClientConfig, ModeConfig, WifiController, WifiError};
use log::debug;

/// The radio controller plus the network stack running on top of it.
///
/// The link counts as connected once the station is associated and DHCP
/// has handed out an address.
pub struct RadioLink {
    controller: WifiController<'static>,
    stack: Stack<'static>,
}

impl RadioLink {
    pub fn new(controller: WifiController<'static>, stack: Stack<'static>) -> Self {
        Self { controller, stack }
    }

    fn associated(&self) -> bool {
        matches!(self.controller.is_connected(), Ok(true))
    }
}

impl WifiLink for RadioLink {
    type Error = WifiError;

    fn is_connected(&mut self) -> bool {
        self.associated() && self.stack.is_config_up()
    }

    fn associate(&mut self, ssid: &str, password: &str) -> Result<(), WifiError> {
        let config = ModeConfig::Client(
            ClientConfig::default()
                .with_ssid(String::from(ssid))
                .with_password(String::from(password)),
        );
        self.controller.set_config(&config)?;

        if !matches!(self.controller.is_started(), Ok(true)) {
            debug!("Starting WiFi station");
            self.controller.start()?;
        }
        self.controller.connect()
    }

    fn status(&mut self) -> LinkStatus {
        match self.controller.is_connected() {
            Ok(true) if self.stack.is_config_up() => LinkStatus::Up,
            Ok(true) => LinkStatus::AwaitingAddress,
            Ok(false) if matches!(self.controller.is_started(), Ok(true)) => LinkStatus::Associating,
            Ok(false) => LinkStatus::Idle,
            Err(_) => LinkStatus::Failed,
        }
    }

    fn address(&mut self) -> Option<Ipv4Addr> {
        self.stack.config_v4().map(|config| config.address.address())
    }

    fn deactivate(&mut self) -> Result<(), WifiError> {
        if self.associated() {
            self.controller.disconnect()?;
        }
        self.controller.stop()
    }
}
