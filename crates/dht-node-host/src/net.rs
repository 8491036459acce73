//! Host networking: the machine's own network as the "WiFi" link and a
//! non-blocking `std::net` listener for the control surface.

use std::io::{self, ErrorKind, Read, Write};
use std::net::{IpAddr, Ipv4Addr, TcpListener, TcpStream, UdpSocket};
use std::time::Duration;

use log::{debug, info};

use dht_node_core::connectivity::{LinkStatus, WifiLink};
use dht_node_core::control::Listener;

const CLIENT_TIMEOUT: Duration = Duration::from_secs(2);

// ---------------------------------------------------------------------------
// Link
// ---------------------------------------------------------------------------

/// The host is always on its network once "associated".
pub struct HostLink {
    active: bool,
}

impl HostLink {
    pub fn new() -> Self {
        Self { active: false }
    }
}

impl WifiLink for HostLink {
    type Error = io::Error;

    fn is_connected(&mut self) -> bool {
        self.active
    }

    fn associate(&mut self, ssid: &str, _password: &str) -> Result<(), Self::Error> {
        info!("Host network stands in for WLAN '{}'", ssid);
        self.active = true;
        Ok(())
    }

    fn status(&mut self) -> LinkStatus {
        if self.active { LinkStatus::Up } else { LinkStatus::Idle }
    }

    /// Address of the interface that routes outwards. Connecting a UDP
    /// socket sends nothing; it only selects the route.
    fn address(&mut self) -> Option<Ipv4Addr> {
        let probe = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).ok()?;
        probe.connect((Ipv4Addr::new(192, 0, 2, 1), 9)).ok()?;
        match probe.local_addr().ok()?.ip() {
            IpAddr::V4(address) => Some(address),
            IpAddr::V6(_) => Some(Ipv4Addr::LOCALHOST),
        }
    }

    fn deactivate(&mut self) -> Result<(), Self::Error> {
        self.active = false;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Listener
// ---------------------------------------------------------------------------

pub struct StdListener {
    listener: Option<TcpListener>,
    client: Option<StdClient>,
}

impl StdListener {
    pub fn new() -> Self {
        Self {
            listener: None,
            client: None,
        }
    }
}

impl Listener for StdListener {
    type Error = io::Error;
    type Client = StdClient;

    async fn bind(&mut self, port: u16) -> Result<(), Self::Error> {
        let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, port))?;
        listener.set_nonblocking(true)?;
        self.listener = Some(listener);
        Ok(())
    }

    async fn accept(&mut self) -> Result<Option<&mut Self::Client>, Self::Error> {
        if self.client.is_none() {
            let Some(listener) = &self.listener else {
                return Err(io::Error::new(ErrorKind::NotConnected, "not listening"));
            };
            match listener.accept() {
                Ok((stream, peer)) => {
                    debug!("Client connected from {}", peer);
                    stream.set_nonblocking(false)?;
                    stream.set_read_timeout(Some(CLIENT_TIMEOUT))?;
                    stream.set_write_timeout(Some(CLIENT_TIMEOUT))?;
                    self.client = Some(StdClient { stream });
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(None),
                Err(e) => return Err(e),
            }
        }
        Ok(self.client.as_mut())
    }

    async fn close_client(&mut self) {
        if let Some(client) = self.client.take() {
            let _ = client.stream.shutdown(std::net::Shutdown::Both);
        }
    }

    fn close(&mut self) {
        self.client = None;
        self.listener = None;
    }
}

/// Accepted connection, blocking with a timeout.
pub struct StdClient {
    stream: TcpStream,
}

impl embedded_io::ErrorType for StdClient {
    type Error = io::Error;
}

impl embedded_io_async::Read for StdClient {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        self.stream.read(buf)
    }
}

impl embedded_io_async::Write for StdClient {
    async fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        self.stream.write(buf)
    }

    async fn flush(&mut self) -> Result<(), Self::Error> {
        self.stream.flush()
    }
}
