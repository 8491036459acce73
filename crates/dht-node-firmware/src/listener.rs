//! Control surface listener on one embassy-net TCP socket.
//!
//! embassy-net binds inside `accept`, so binding records the port and puts
//! the socket into the listen state with a single poll. `accept` then only
//! inspects the socket state and never waits for a client.

use core::task::Poll;

use dht_node_core::control::Listener;
use embassy_futures::poll_once;
use embassy_net::Stack;
use embassy_net::tcp::State;
use embassy_time::Duration;
use log::{debug, warn};

use crate::socket::{NetSocket, SocketError};

/// Read/write timeout for one HTTP exchange
const CLIENT_TIMEOUT: Duration = Duration::from_secs(5);

pub struct SocketListener {
    stack: Stack<'static>,
    socket: NetSocket,
    port: Option<u16>,
}

impl SocketListener {
    pub fn new(stack: Stack<'static>, mut socket: NetSocket) -> Self {
        socket.inner().set_timeout(Some(CLIENT_TIMEOUT));
        Self {
            stack,
            socket,
            port: None,
        }
    }

    fn listen(&mut self, port: u16) -> Result<(), SocketError> {
        match poll_once(self.socket.inner().accept(port)) {
            Poll::Ready(Err(e)) => {
                warn!("Could not listen on port {}: {:?}", port, e);
                Err(SocketError::NotBound)
            }
            _ => Ok(()),
        }
    }
}

impl Listener for SocketListener {
    type Error = SocketError;
    type Client = NetSocket;

    async fn bind(&mut self, port: u16) -> Result<(), SocketError> {
        if !self.stack.is_config_up() {
            return Err(SocketError::NoAddress);
        }
        self.socket.inner().abort();
        self.listen(port)?;
        self.port = Some(port);
        Ok(())
    }

    async fn accept(&mut self) -> Result<Option<&mut NetSocket>, SocketError> {
        let port = self.port.ok_or(SocketError::NotBound)?;
        match self.socket.state() {
            State::Established | State::CloseWait => Ok(Some(&mut self.socket)),
            State::Listen | State::SynReceived => Ok(None),
            State::Closed => {
                self.listen(port)?;
                Ok(None)
            }
            other => {
                debug!("Dropping half-closed client in state {:?}", other);
                self.socket.inner().abort();
                Ok(None)
            }
        }
    }

    async fn close_client(&mut self) {
        self.socket.shut().await;
    }

    fn close(&mut self) {
        self.socket.inner().abort();
        self.port = None;
    }
}
