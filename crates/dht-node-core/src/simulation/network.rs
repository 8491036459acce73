use alloc::collections::VecDeque;
use alloc::rc::Rc;
use alloc::string::String;
use alloc::vec::Vec;
use core::cell::{Cell, RefCell};
use core::convert::Infallible;
use core::net::Ipv4Addr;

use thiserror_no_std::Error;

use crate::connectivity::{LinkStatus, WifiLink};
use crate::control::Listener;
use crate::telemetry::{Broker, InboundMessage};

/// Error injected by a scripted collaborator
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Simulated fault")]
pub struct SimulatedFault;

// ---------------------------------------------------------------------------
// WiFi link
// ---------------------------------------------------------------------------

struct LinkState {
    up: Cell<bool>,
    requested: Cell<bool>,
    up_after: Option<u32>,
    polls: Cell<u32>,
    associations: Cell<u32>,
    deactivations: Cell<u32>,
    fail_deactivation: Cell<bool>,
    credentials: RefCell<Option<(String, String)>>,
}

/// Station interface that comes up a fixed number of polls after
/// association was requested. Clones share state.
#[derive(Clone)]
pub struct SimulatedLink {
    state: Rc<LinkState>,
}

impl SimulatedLink {
    pub const ADDRESS: Ipv4Addr = Ipv4Addr::new(192, 168, 4, 20);

    /// Comes up on the `polls`-th status poll after association.
    pub fn up_after(polls: u32) -> Self {
        Self::with_threshold(Some(polls))
    }

    /// Never comes up.
    pub fn unreachable() -> Self {
        Self::with_threshold(None)
    }

    fn with_threshold(up_after: Option<u32>) -> Self {
        Self {
            state: Rc::new(LinkState {
                up: Cell::new(false),
                requested: Cell::new(false),
                up_after,
                polls: Cell::new(0),
                associations: Cell::new(0),
                deactivations: Cell::new(0),
                fail_deactivation: Cell::new(false),
                credentials: RefCell::new(None),
            }),
        }
    }

    /// Marks the link associated without going through association.
    pub fn force_up(&self) {
        self.state.up.set(true);
    }

    /// The access point goes away.
    pub fn drop_link(&self) {
        self.state.up.set(false);
        self.state.requested.set(false);
    }

    pub fn fail_deactivation(&self) {
        self.state.fail_deactivation.set(true);
    }

    /// Status polls since the last association request
    pub fn polls_since_associate(&self) -> u32 {
        self.state.polls.get()
    }

    pub fn associations(&self) -> u32 {
        self.state.associations.get()
    }

    pub fn deactivations(&self) -> u32 {
        self.state.deactivations.get()
    }

    pub fn last_credentials(&self) -> Option<(String, String)> {
        self.state.credentials.borrow().clone()
    }
}

impl WifiLink for SimulatedLink {
    type Error = SimulatedFault;

    fn is_connected(&mut self) -> bool {
        let state = &self.state;
        if state.up.get() {
            return true;
        }
        if !state.requested.get() {
            return false;
        }

        state.polls.set(state.polls.get() + 1);
        if state.up_after.is_some_and(|polls| state.polls.get() >= polls) {
            state.up.set(true);
        }
        state.up.get()
    }

    fn associate(&mut self, ssid: &str, password: &str) -> Result<(), Self::Error> {
        let state = &self.state;
        state.requested.set(true);
        state.polls.set(0);
        state.associations.set(state.associations.get() + 1);
        *state.credentials.borrow_mut() = Some((ssid.into(), password.into()));
        Ok(())
    }

    fn status(&mut self) -> LinkStatus {
        if self.state.up.get() {
            LinkStatus::Up
        } else if self.state.requested.get() {
            LinkStatus::Associating
        } else {
            LinkStatus::Idle
        }
    }

    fn address(&mut self) -> Option<Ipv4Addr> {
        self.state.up.get().then_some(Self::ADDRESS)
    }

    fn deactivate(&mut self) -> Result<(), Self::Error> {
        let state = &self.state;
        state.deactivations.set(state.deactivations.get() + 1);
        if state.fail_deactivation.get() {
            return Err(SimulatedFault);
        }
        state.up.set(false);
        state.requested.set(false);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Listening socket
// ---------------------------------------------------------------------------

#[derive(Default)]
struct ListenerState {
    bind_failures: Cell<u32>,
    bind_attempts: Cell<u32>,
    bound: Cell<bool>,
    closed: Cell<bool>,
    /// Raw request and the most bytes one read hands out
    pending: RefCell<VecDeque<(Vec<u8>, usize)>>,
    responses: RefCell<Vec<Vec<u8>>>,
    closed_clients: Cell<u32>,
    bytes_written: Cell<usize>,
}

/// Listener fed with raw requests through its [`ListenerProbe`].
pub struct ScriptedListener {
    state: Rc<ListenerState>,
    client: Option<ScriptedClient>,
}

impl Default for ScriptedListener {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedListener {
    pub fn new() -> Self {
        Self {
            state: Rc::new(ListenerState::default()),
            client: None,
        }
    }

    pub fn probe(&self) -> ListenerProbe {
        ListenerProbe {
            state: self.state.clone(),
        }
    }
}

impl Listener for ScriptedListener {
    type Error = SimulatedFault;
    type Client = ScriptedClient;

    async fn bind(&mut self, _port: u16) -> Result<(), Self::Error> {
        let state = &self.state;
        state.bind_attempts.set(state.bind_attempts.get() + 1);
        if state.bind_failures.get() > 0 {
            state.bind_failures.set(state.bind_failures.get() - 1);
            return Err(SimulatedFault);
        }
        state.bound.set(true);
        state.closed.set(false);
        Ok(())
    }

    async fn accept(&mut self) -> Result<Option<&mut Self::Client>, Self::Error> {
        if !self.state.bound.get() {
            return Err(SimulatedFault);
        }
        if self.client.is_none() {
            let Some((request, segment)) = self.state.pending.borrow_mut().pop_front() else {
                return Ok(None);
            };
            self.client = Some(ScriptedClient {
                request,
                segment,
                read: 0,
                response: Vec::new(),
            });
        }
        Ok(self.client.as_mut())
    }

    async fn close_client(&mut self) {
        if let Some(client) = self.client.take() {
            let state = &self.state;
            state.closed_clients.set(state.closed_clients.get() + 1);
            state
                .bytes_written
                .set(state.bytes_written.get() + client.response.len());
            if !client.response.is_empty() {
                state.responses.borrow_mut().push(client.response);
            }
        }
    }

    fn close(&mut self) {
        self.client = None;
        self.state.bound.set(false);
        self.state.closed.set(true);
    }
}

/// Observes and scripts a [`ScriptedListener`].
#[derive(Clone)]
pub struct ListenerProbe {
    state: Rc<ListenerState>,
}

impl ListenerProbe {
    /// Queues a client that will send `request` once accepted.
    pub fn queue_request(&self, request: &[u8]) {
        self.queue_segmented_request(request, usize::MAX);
    }

    /// Like [`queue_request`](Self::queue_request), but each read returns at
    /// most `segment` bytes, as when a request spans several TCP segments.
    pub fn queue_segmented_request(&self, request: &[u8], segment: usize) {
        self.state
            .pending
            .borrow_mut()
            .push_back((request.to_vec(), segment.max(1)));
    }

    /// Makes the next `count` bind calls fail.
    pub fn fail_binds(&self, count: u32) {
        self.state.bind_failures.set(count);
    }

    pub fn bind_attempts(&self) -> u32 {
        self.state.bind_attempts.get()
    }

    pub fn is_bound(&self) -> bool {
        self.state.bound.get()
    }

    pub fn is_closed(&self) -> bool {
        self.state.closed.get()
    }

    pub fn closed_clients(&self) -> u32 {
        self.state.closed_clients.get()
    }

    /// Bytes written to all closed clients
    pub fn bytes_written(&self) -> usize {
        self.state.bytes_written.get()
    }

    /// Non-empty responses, in the order the clients were closed
    pub fn responses(&self) -> Vec<Vec<u8>> {
        self.state.responses.borrow().clone()
    }
}

/// One accepted client: reads back its request, records what is written.
pub struct ScriptedClient {
    request: Vec<u8>,
    segment: usize,
    read: usize,
    response: Vec<u8>,
}

impl ScriptedClient {
    /// Client sending `request` at most `segment` bytes per read.
    pub fn segmented(request: &[u8], segment: usize) -> Self {
        Self {
            request: request.to_vec(),
            segment: segment.max(1),
            read: 0,
            response: Vec::new(),
        }
    }
}

impl embedded_io::ErrorType for ScriptedClient {
    type Error = Infallible;
}

impl embedded_io_async::Read for ScriptedClient {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        let remaining = &self.request[self.read..];
        let n = remaining.len().min(buf.len()).min(self.segment);
        buf[..n].copy_from_slice(&remaining[..n]);
        self.read += n;
        Ok(n)
    }
}

impl embedded_io_async::Write for ScriptedClient {
    async fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        self.response.extend_from_slice(buf);
        Ok(buf.len())
    }

    async fn flush(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Broker
// ---------------------------------------------------------------------------

#[derive(Default)]
struct BrokerState {
    connect_failures: Cell<u32>,
    connects: Cell<u32>,
    fail_publishes: Cell<bool>,
    published: RefCell<Vec<(String, String)>>,
    subscriptions: RefCell<Vec<String>>,
    inbound: RefCell<VecDeque<InboundMessage>>,
}

/// Broker that records publishes and replays queued inbound messages.
pub struct RecordingBroker {
    state: Rc<BrokerState>,
}

impl Default for RecordingBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingBroker {
    pub fn new() -> Self {
        Self {
            state: Rc::new(BrokerState::default()),
        }
    }

    pub fn probe(&self) -> BrokerProbe {
        BrokerProbe {
            state: self.state.clone(),
        }
    }
}

impl Broker for RecordingBroker {
    type Error = SimulatedFault;

    async fn connect(&mut self) -> Result<(), Self::Error> {
        let state = &self.state;
        state.connects.set(state.connects.get() + 1);
        if state.connect_failures.get() > 0 {
            state.connect_failures.set(state.connect_failures.get() - 1);
            return Err(SimulatedFault);
        }
        Ok(())
    }

    async fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), Self::Error> {
        if self.state.fail_publishes.get() {
            return Err(SimulatedFault);
        }
        self.state.published.borrow_mut().push((
            topic.into(),
            String::from_utf8_lossy(payload).into_owned(),
        ));
        Ok(())
    }

    async fn subscribe(&mut self, topic: &str) -> Result<(), Self::Error> {
        self.state.subscriptions.borrow_mut().push(topic.into());
        Ok(())
    }

    async fn poll_inbound(&mut self) -> Result<Option<InboundMessage>, Self::Error> {
        Ok(self.state.inbound.borrow_mut().pop_front())
    }

    fn describe(&self) -> &str {
        "recording broker"
    }
}

/// Observes and scripts a [`RecordingBroker`].
#[derive(Clone)]
pub struct BrokerProbe {
    state: Rc<BrokerState>,
}

impl BrokerProbe {
    /// Makes the next `count` connects fail.
    pub fn fail_connects(&self, count: u32) {
        self.state.connect_failures.set(count);
    }

    pub fn fail_publishes(&self, fail: bool) {
        self.state.fail_publishes.set(fail);
    }

    /// Queues a message for the next inbound poll. Oversized input is cut.
    pub fn deliver(&self, topic: &str, payload: &[u8]) {
        let message = InboundMessage::truncated(topic, payload);
        self.state.inbound.borrow_mut().push_back(message);
    }

    pub fn connects(&self) -> u32 {
        self.state.connects.get()
    }

    pub fn published(&self) -> Vec<(String, String)> {
        self.state.published.borrow().clone()
    }

    pub fn subscriptions(&self) -> Vec<String> {
        self.state.subscriptions.borrow().clone()
    }
}
