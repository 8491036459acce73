//! WiFi link supervision
//!
//! The link is brought up once at boot and again whenever the runtime loop
//! notices it dropped. Association is polled a bounded number of times; a
//! node that cannot reach its access point is reset rather than left
//! running without a network.

use core::fmt::Debug;
use core::net::Ipv4Addr;

use embedded_hal::digital::OutputPin;
use embedded_hal_async::delay::DelayNs;
use heapless::String;
use log::{debug, error, info, trace, warn};
use thiserror_no_std::Error;

use crate::config::WifiConfig;
use crate::platform::Platform;

/// Status polls before giving up on association
pub const CONNECT_ATTEMPTS: u32 = 60;
pub const CONNECT_POLL_INTERVAL_MS: u32 = 500;
/// Progress is logged on every n-th poll
const PROGRESS_LOG_EVERY: u32 = 5;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkError {
    #[error("No WLAN connection after {attempts} attempts (last status {status:?})")]
    Unavailable { attempts: u32, status: LinkStatus },
}

/// Coarse association progress reported by the radio
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStatus {
    Idle,
    Associating,
    /// Associated, still waiting for an address
    AwaitingAddress,
    Up,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// The station interface of the radio.
pub trait WifiLink {
    type Error: Debug;

    /// Associated and holding an address
    fn is_connected(&mut self) -> bool;

    /// Activates the interface and requests association. Returns without
    /// waiting for the access point.
    fn associate(&mut self, ssid: &str, password: &str) -> Result<(), Self::Error>;

    fn status(&mut self) -> LinkStatus;

    fn address(&mut self) -> Option<Ipv4Addr>;

    /// Drops the association and powers the interface down.
    fn deactivate(&mut self) -> Result<(), Self::Error>;
}

/// What a successful connect hands back
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkHandle {
    pub address: Ipv4Addr,
}

pub struct ConnectivityManager<W, I> {
    link: W,
    indicator: I,
    state: ConnectionState,
    ssid: String<32>,
    password: String<64>,
    max_attempts: u32,
    address: Option<Ipv4Addr>,
}

impl<W: WifiLink, I: OutputPin> ConnectivityManager<W, I> {
    /// `indicator` is lit steady while connected and blinks while associating.
    pub fn new(link: W, indicator: I, config: &WifiConfig) -> Self {
        let mut ssid = String::new();
        let mut password = String::new();
        if ssid.push_str(config.ssid).is_err() || password.push_str(config.password).is_err() {
            warn!("WiFi credentials exceed 32/64 bytes and were dropped");
            ssid.clear();
            password.clear();
        }

        Self {
            link,
            indicator,
            state: ConnectionState::Disconnected,
            ssid,
            password,
            max_attempts: CONNECT_ATTEMPTS,
            address: None,
        }
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn address(&self) -> Option<Ipv4Addr> {
        self.address
    }

    pub fn link(&self) -> &W {
        &self.link
    }

    /// Checks the link, noting a drop since the last check.
    pub fn is_connected(&mut self) -> bool {
        let up = self.link.is_connected();
        if !up && self.state == ConnectionState::Connected {
            warn!("WiFi link lost");
            self.state = ConnectionState::Disconnected;
            self.address = None;
            self.indicator_off();
        }
        up
    }

    /// Associates with the configured network, polling up to the attempt bound.
    pub async fn connect<D: DelayNs>(&mut self, delay: &mut D) -> Result<LinkHandle, LinkError> {
        let already_up = self.link.is_connected();
        trace!("wifi is_connected={}", already_up);

        if !already_up {
            self.state = ConnectionState::Connecting;
            info!("Connecting to WLAN {}", self.ssid);
            if let Err(e) = self.link.associate(&self.ssid, &self.password) {
                error!("WiFi association request failed: {:?}", e);
            }

            if !self.wait_for_association(delay).await {
                let status = self.link.status();
                self.state = ConnectionState::Disconnected;
                self.indicator_off();
                return Err(LinkError::Unavailable {
                    attempts: self.max_attempts,
                    status,
                });
            }
        }

        let address = self.link.address().unwrap_or_else(|| {
            warn!("Link is up but reports no address");
            Ipv4Addr::UNSPECIFIED
        });
        self.address = Some(address);
        self.state = ConnectionState::Connected;
        if let Err(e) = self.indicator.set_high() {
            warn!("Failed to light link indicator: {:?}", e);
        }
        info!("WLAN connected, IP: {}", address);
        Ok(LinkHandle { address })
    }

    /// Like [`connect`](Self::connect), but a link that cannot be established
    /// is logged as fatal and the device is reset.
    pub async fn connect_or_reset<D: DelayNs, P: Platform>(
        &mut self,
        delay: &mut D,
        platform: &mut P,
    ) -> LinkHandle {
        match self.connect(delay).await {
            Ok(handle) => handle,
            Err(e) => {
                crate::fatal!("{}", e);
                platform.reset()
            }
        }
    }

    /// Best-effort teardown. Never fails; the indicator always ends up off.
    pub fn disconnect(&mut self) {
        if self.link.is_connected() {
            match self.link.deactivate() {
                Ok(()) => debug!("WiFi deactivated"),
                Err(e) => error!("WiFi disconnect failed: {:?}", e),
            }
        }
        self.state = ConnectionState::Disconnected;
        self.address = None;
        self.indicator_off();
    }

    /// Polls once per interval, toggling the indicator. True once associated.
    async fn wait_for_association<D: DelayNs>(&mut self, delay: &mut D) -> bool {
        let mut lit = false;
        for attempt in 1..=self.max_attempts {
            lit = !lit;
            let blink = if lit {
                self.indicator.set_high()
            } else {
                self.indicator.set_low()
            };
            if let Err(e) = blink {
                trace!("Indicator blink failed: {:?}", e);
            }

            delay.delay_ms(CONNECT_POLL_INTERVAL_MS).await;
            if self.link.is_connected() {
                return true;
            }
            if attempt % PROGRESS_LOG_EVERY == 0 {
                debug!(
                    "Waiting for WLAN ({}/{}), status {:?}",
                    attempt,
                    self.max_attempts,
                    self.link.status()
                );
            }
        }
        false
    }

    fn indicator_off(&mut self) {
        if let Err(e) = self.indicator.set_low() {
            error!("Failed to clear link indicator: {:?}", e);
        }
    }
}
