//! [`Broker`] over `rust-mqtt`.
//!
//! The client speaks MQTT v5 through a shared handle on one embassy-net
//! socket. Reconnecting resolves the broker again, reopens the socket beneath
//! the same client and sends a fresh CONNECT.

use core::fmt::Write as _;

use dht_node_core::config::BrokerConfig;
use dht_node_core::telemetry::{Broker, InboundMessage};
use embassy_net::Stack;
use embassy_net::dns::DnsQueryType;
use embassy_net::tcp::{self, ConnectError, State, TcpSocket};
use embassy_sync::blocking_mutex::raw::NoopRawMutex;
use embassy_sync::mutex::Mutex;
use embassy_time::{Duration, Instant};
use heapless::String;
use log::{debug, trace, warn};
use rust_mqtt::client::client::MqttClient;
use rust_mqtt::client::client_config::{ClientConfig, MqttVersion};
use rust_mqtt::packet::v5::publish_packet::QualityOfService;
use rust_mqtt::packet::v5::reason_codes::ReasonCode;
use rust_mqtt::utils::rng_generator::CountingRng;
use thiserror_no_std::Error;

const KEEP_ALIVE_SECS: u16 = 60;
const MAX_PROPERTIES: usize = 5;

/// Size of each of the client's send and receive buffers
pub const PACKET_BUFFER_SIZE: usize = 256;

#[derive(Error, Debug)]
pub enum MqttError {
    #[error("DNS lookup failed")]
    Dns,

    #[error("TCP connect failed: {0:?}")]
    Connect(ConnectError),

    #[error("Broker returned {0:?}")]
    Protocol(ReasonCode),

    #[error("Not connected")]
    NotConnected,
}

impl From<ReasonCode> for MqttError {
    fn from(code: ReasonCode) -> Self {
        Self::Protocol(code)
    }
}

/// The socket as the client sees it. The broker keeps its own handle for
/// connect and teardown.
pub struct SessionSocket<'a> {
    socket: &'a Mutex<NoopRawMutex, TcpSocket<'static>>,
}

impl embedded_io_06::ErrorType for SessionSocket<'_> {
    type Error = tcp::Error;
}

impl embedded_io_async_06::Read for SessionSocket<'_> {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        self.socket.lock().await.read(buf).await
    }
}

impl embedded_io_async_06::Write for SessionSocket<'_> {
    async fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        self.socket.lock().await.write(buf).await
    }

    async fn flush(&mut self) -> Result<(), Self::Error> {
        self.socket.lock().await.flush().await
    }
}

pub struct MqttBroker<'a> {
    stack: Stack<'static>,
    socket: &'a Mutex<NoopRawMutex, TcpSocket<'static>>,
    client: MqttClient<'a, SessionSocket<'a>, MAX_PROPERTIES, CountingRng>,
    host: &'a str,
    port: u16,
    address: String<64>,
    last_sent: Instant,
}

impl<'a> MqttBroker<'a> {
    pub fn new(
        stack: Stack<'static>,
        socket: &'a Mutex<NoopRawMutex, TcpSocket<'static>>,
        send_buffer: &'a mut [u8],
        recv_buffer: &'a mut [u8],
        config: &BrokerConfig<'a>,
    ) -> Self {
        let mut client_config = ClientConfig::new(MqttVersion::MQTTv5, CountingRng(20000));
        client_config.add_max_subscribe_qos(QualityOfService::QoS0);
        client_config.add_client_id(config.client_id);
        client_config.keep_alive = KEEP_ALIVE_SECS;
        if !config.username.is_empty() {
            client_config.add_username(config.username);
        }
        if !config.password.is_empty() {
            client_config.add_password(config.password);
        }

        let send_len = send_buffer.len();
        let recv_len = recv_buffer.len();
        let client = MqttClient::new(
            SessionSocket { socket },
            send_buffer,
            send_len,
            recv_buffer,
            recv_len,
            client_config,
        );

        let mut address = String::new();
        if write!(address, "{}:{}", config.host, config.port).is_err() {
            warn!("Broker address {} truncated", config.host);
        }
        Self {
            stack,
            socket,
            client,
            host: config.host,
            port: config.port,
            address,
            last_sent: Instant::now(),
        }
    }

    async fn ensure_open(&self) -> Result<(), MqttError> {
        if self.socket.lock().await.state() == State::Established {
            Ok(())
        } else {
            Err(MqttError::NotConnected)
        }
    }
}

impl Broker for MqttBroker<'_> {
    type Error = MqttError;

    async fn connect(&mut self) -> Result<(), MqttError> {
        let addresses = self.stack.dns_query(self.host, DnsQueryType::A).await.map_err(|e| {
            warn!("DNS lookup of {} failed: {:?}", self.host, e);
            MqttError::Dns
        })?;
        let address = *addresses.first().ok_or(MqttError::Dns)?;
        debug!("{} resolved to {}", self.host, address);

        {
            let mut socket = self.socket.lock().await;
            socket.abort();
            let _ = socket.flush().await;
            socket.set_timeout(Some(Duration::from_secs(u64::from(KEEP_ALIVE_SECS))));
            socket.connect((address, self.port)).await.map_err(MqttError::Connect)?;
        }

        self.client.connect_to_broker().await?;
        self.last_sent = Instant::now();
        Ok(())
    }

    async fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), MqttError> {
        self.ensure_open().await?;
        self.client
            .send_message(topic, payload, QualityOfService::QoS0, false)
            .await?;
        self.last_sent = Instant::now();
        Ok(())
    }

    async fn subscribe(&mut self, topic: &str) -> Result<(), MqttError> {
        self.ensure_open().await?;
        self.client.subscribe_to_topic(topic).await?;
        self.last_sent = Instant::now();
        Ok(())
    }

    async fn poll_inbound(&mut self) -> Result<Option<InboundMessage>, MqttError> {
        self.ensure_open().await?;

        if self.last_sent.elapsed() >= Duration::from_secs(u64::from(KEEP_ALIVE_SECS / 2)) {
            trace!("Sending MQTT keep-alive");
            self.client.send_ping().await?;
            self.last_sent = Instant::now();
        }

        if !self.socket.lock().await.can_recv() {
            return Ok(None);
        }
        let (topic, payload) = self.client.receive_message().await?;
        Ok(Some(InboundMessage::truncated(topic, payload)))
    }

    fn describe(&self) -> &str {
        &self.address
    }
}
