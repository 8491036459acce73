//! `embedded-io-async` view of an embassy-net TCP socket.

use core::fmt;

use embassy_net::tcp::{self, State, TcpSocket};
use embedded_io::ErrorKind;

/// A TCP failure, or an operation on a socket with no peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketError {
    Tcp(tcp::Error),
    NoAddress,
    NotBound,
}

impl fmt::Display for SocketError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp(e) => write!(f, "TCP error: {:?}", e),
            Self::NoAddress => f.write_str("network interface has no address"),
            Self::NotBound => f.write_str("listener is not bound"),
        }
    }
}

impl core::error::Error for SocketError {}

impl embedded_io::Error for SocketError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::Tcp(tcp::Error::ConnectionReset) => ErrorKind::ConnectionReset,
            Self::NoAddress => ErrorKind::AddrNotAvailable,
            Self::NotBound => ErrorKind::NotConnected,
            Self::Tcp(_) => ErrorKind::Other,
        }
    }
}

impl From<tcp::Error> for SocketError {
    fn from(e: tcp::Error) -> Self {
        Self::Tcp(e)
    }
}

pub struct NetSocket {
    inner: TcpSocket<'static>,
}

impl NetSocket {
    pub fn new(inner: TcpSocket<'static>) -> Self {
        Self { inner }
    }

    pub fn inner(&mut self) -> &mut TcpSocket<'static> {
        &mut self.inner
    }

    pub fn state(&self) -> State {
        self.inner.state()
    }

    /// Sends what is buffered, then tears the connection down.
    pub async fn shut(&mut self) {
        let _ = self.inner.flush().await;
        self.inner.abort();
        let _ = self.inner.flush().await;
    }
}

impl embedded_io::ErrorType for NetSocket {
    type Error = SocketError;
}

impl embedded_io_async::Read for NetSocket {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        Ok(self.inner.read(buf).await?)
    }
}

impl embedded_io_async::Write for NetSocket {
    async fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        Ok(self.inner.write(buf).await?)
    }

    async fn flush(&mut self) -> Result<(), Self::Error> {
        Ok(self.inner.flush().await?)
    }
}
