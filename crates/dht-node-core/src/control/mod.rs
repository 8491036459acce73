//! HTTP control surface
//!
//! A single-client-at-a-time status endpoint. Each call to
//! [`ControlSurface::serve`] handles at most one pending request and returns
//! at once when nobody is waiting, so the runtime loop can call it every
//! cycle. Besides the status page it carries the node's lifecycle commands.

mod page;

pub use page::{StatusSnapshot, render};

use core::fmt::Debug;

use embedded_hal_async::delay::DelayNs;
use embedded_io_async::{Read, Write};
use log::{debug, error, info, trace, warn};
use thiserror_no_std::Error;

use crate::clock::Timestamp;
use crate::logging::{LogEntry, LogView};
use crate::platform::Platform;
use crate::sensors::Sensor;

pub const BIND_ATTEMPTS: u32 = 15;
pub const BIND_RETRY_DELAY_MS: u32 = 2_000;
/// Only the request line matters; the rest of the request is ignored.
pub const REQUEST_BUFFER: usize = 2048;
/// Persistent records shown in the permanent log view
pub const PERMANENT_VIEW_ENTRIES: usize = 20;

const RESPONSE_HEAD: &str =
    "HTTP/1.1 200 OK\r\nContent-Type: text/html; charset=utf-8\r\nConnection: close\r\n\r\n";

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlError {
    #[error("Could not bind port {port} after {attempts} attempts")]
    Bind { port: u16, attempts: u32 },

    #[error("Listening socket failed")]
    Socket,
}

/// Listening TCP socket that hands out at most one client at a time.
pub trait Listener {
    type Error: Debug;
    type Client: Read + Write;

    fn bind(&mut self, port: u16) -> impl Future<Output = Result<(), Self::Error>>;

    /// Returns the pending client, or `None` straight away if there is none.
    fn accept(&mut self) -> impl Future<Output = Result<Option<&mut Self::Client>, Self::Error>>;

    /// Flushes and closes the current client, if any.
    fn close_client(&mut self) -> impl Future<Output = ()>;

    /// Stops listening.
    fn close(&mut self);
}

/// The fixed set of paths the node answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Refresh,
    ShowPermanent,
    ShowLive,
    Restart,
    Terminate,
}

impl Route {
    /// Parses the request line, e.g. `GET /refresh? HTTP/1.1`.
    ///
    /// `None` for a request without a path or with an unknown one.
    pub fn parse(request: &[u8]) -> Option<Self> {
        let line_end = request
            .iter()
            .position(|b| *b == b'\n')
            .unwrap_or(request.len());
        let line = core::str::from_utf8(&request[..line_end]).ok()?;

        let target = line.split_ascii_whitespace().nth(1)?;
        let path = target.split('?').next().unwrap_or(target);
        match path {
            "/" | "/refresh" => Some(Self::Refresh),
            "/showpermmsg" => Some(Self::ShowPermanent),
            "/showlivemsg" => Some(Self::ShowLive),
            "/restart" => Some(Self::Restart),
            "/terminate" => Some(Self::Terminate),
            _ => None,
        }
    }
}

/// Which log is embedded in the status page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogViewMode {
    Live,
    Permanent,
}

/// What the runtime loop should do after a serve call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Directive {
    Continue,
    Restart,
    Terminate,
}

pub struct ControlSurface<L, V> {
    listener: L,
    log_view: V,
    port: u16,
    mode: LogViewMode,
    listening: bool,
}

impl<L: Listener, V: LogView> ControlSurface<L, V> {
    pub fn new(listener: L, log_view: V, port: u16) -> Self {
        Self {
            listener,
            log_view,
            port,
            mode: LogViewMode::Live,
            listening: false,
        }
    }

    pub fn mode(&self) -> LogViewMode {
        self.mode
    }

    pub fn is_listening(&self) -> bool {
        self.listening
    }

    /// Binds the listening socket, retrying with a fixed backoff.
    pub async fn open<D: DelayNs>(&mut self, delay: &mut D) -> Result<(), ControlError> {
        for attempt in 1..=BIND_ATTEMPTS {
            trace!("Binding port {} (attempt {})", self.port, attempt);
            match self.listener.bind(self.port).await {
                Ok(()) => {
                    self.listening = true;
                    info!("Control surface listening on port {}", self.port);
                    return Ok(());
                }
                Err(e) => {
                    warn!(
                        "Bind of port {} failed ({}/{}): {:?}",
                        self.port, attempt, BIND_ATTEMPTS, e
                    );
                    if attempt < BIND_ATTEMPTS {
                        delay.delay_ms(BIND_RETRY_DELAY_MS).await;
                    }
                }
            }
        }

        Err(ControlError::Bind {
            port: self.port,
            attempts: BIND_ATTEMPTS,
        })
    }

    /// Stops listening. Safe to call more than once.
    pub fn close(&mut self) {
        if self.listening {
            self.listener.close();
            self.listening = false;
            debug!("Control surface closed");
        }
    }

    /// Services at most one pending request.
    pub async fn serve<S: Sensor, P: Platform>(
        &mut self,
        sensor: &mut S,
        platform: &P,
        now: Timestamp,
    ) -> Result<Directive, ControlError> {
        if !self.listening {
            return Ok(Directive::Continue);
        }

        let client = match self.listener.accept().await {
            Ok(Some(client)) => client,
            Ok(None) => return Ok(Directive::Continue),
            Err(e) => {
                error!("Accept failed: {:?}", e);
                return Err(ControlError::Socket);
            }
        };

        let mut request = [0u8; REQUEST_BUFFER];
        let received = match read_request_line(client, &mut request).await {
            Ok(n) => n,
            Err(e) => {
                warn!("Reading request failed: {:?}", e);
                self.listener.close_client().await;
                return Ok(Directive::Continue);
            }
        };

        let Some(route) = Route::parse(&request[..received]) else {
            debug!("Closing client after malformed or unknown request");
            self.listener.close_client().await;
            return Ok(Directive::Continue);
        };
        trace!("Request {:?}", route);

        match route {
            Route::Restart => {
                self.listener.close_client().await;
                crate::durable!(info, "Restart requested over HTTP");
                return Ok(Directive::Restart);
            }
            Route::Terminate => {
                self.listener.close_client().await;
                crate::durable!(info, "Termination requested over HTTP");
                return Ok(Directive::Terminate);
            }
            Route::ShowPermanent => self.mode = LogViewMode::Permanent,
            Route::ShowLive => self.mode = LogViewMode::Live,
            Route::Refresh => {}
        }

        let reading = match sensor.capture_and_decode() {
            Ok(reading) => Some(reading),
            Err(e) => {
                error!("Status page without reading: {}", e);
                None
            }
        };
        let entries: alloc::vec::Vec<LogEntry> = match self.mode {
            LogViewMode::Live => self.log_view.live_entries(),
            LogViewMode::Permanent => self.log_view.persistent_entries(PERMANENT_VIEW_ENTRIES),
        };
        let snapshot = StatusSnapshot {
            uptime: now,
            cpu_mhz: platform.cpu_frequency_mhz(),
            heap_used: platform.heap_used(),
            heap_free: platform.heap_free(),
            reading,
        };
        let body = render(&snapshot, &entries, self.mode);

        let written = async {
            client.write_all(RESPONSE_HEAD.as_bytes()).await?;
            client.write_all(body.as_bytes()).await?;
            client.flush().await
        }
        .await;
        if let Err(e) = written {
            warn!("Writing response failed: {:?}", e);
        }
        self.listener.close_client().await;
        Ok(Directive::Continue)
    }
}

/// Reads until the request line is complete, the buffer is full or the
/// peer stops sending. Returns the number of bytes read.
async fn read_request_line<C: Read>(client: &mut C, buf: &mut [u8]) -> Result<usize, C::Error> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = client.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        let line_done = buf[filled..filled + n].contains(&b'\n');
        filled += n;
        if line_done {
            break;
        }
    }
    Ok(filled)
}
