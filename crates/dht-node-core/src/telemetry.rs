//! Telemetry publishing
//!
//! [`TelemetryPublisher`] is ticked by the runtime loop every cycle. Most
//! ticks are free: it only touches the sensor and the network once the
//! publish interval has elapsed. The broker connection is opened lazily on
//! the first tick that has something to publish and re-opened the same way
//! after any failure. Delivery is best effort.

use core::fmt::{Debug, Write};
use core::time::Duration;

use embedded_hal::digital::OutputPin;
use heapless::String;
use log::{debug, error, info, trace, warn};

use crate::clock::Timestamp;
use crate::config::{BrokerConfig, TelemetryConfig};
use crate::sensors::{Sensor, SensorReading};

pub const TOPIC_CAPACITY: usize = 64;
pub const INBOUND_PAYLOAD_CAPACITY: usize = 32;
const PAYLOAD_CAPACITY: usize = 16;

/// A message delivered on a subscribed topic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String<TOPIC_CAPACITY>,
    pub payload: heapless::Vec<u8, INBOUND_PAYLOAD_CAPACITY>,
}

impl InboundMessage {
    /// Copies a received message, cutting topic and payload to capacity.
    /// The topic is cut on a character boundary.
    pub fn truncated(topic: &str, payload: &[u8]) -> Self {
        let mut message = Self {
            topic: String::new(),
            payload: heapless::Vec::new(),
        };
        for ch in topic.chars() {
            if message.topic.push(ch).is_err() {
                break;
            }
        }
        let kept = payload.len().min(INBOUND_PAYLOAD_CAPACITY);
        // Length clamped to capacity above
        let _ = message.payload.extend_from_slice(&payload[..kept]);
        message
    }
}

/// Connection to the remote telemetry broker.
pub trait Broker {
    type Error: Debug;

    /// Opens (or re-opens) the session.
    fn connect(&mut self) -> impl Future<Output = Result<(), Self::Error>>;

    fn publish(&mut self, topic: &str, payload: &[u8]) -> impl Future<Output = Result<(), Self::Error>>;

    fn subscribe(&mut self, topic: &str) -> impl Future<Output = Result<(), Self::Error>>;

    /// Returns the next inbound message if one is already waiting. Never blocks.
    fn poll_inbound(&mut self) -> impl Future<Output = Result<Option<InboundMessage>, Self::Error>>;

    /// Human-readable broker address for log lines
    fn describe(&self) -> &str {
        "broker"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerState {
    Disconnected,
    Connecting,
    Connected,
}

/// When the publisher last read the sensor and last published.
#[derive(Debug, Clone, Copy)]
pub struct PublishSchedule {
    pub poll_interval: Duration,
    pub publish_interval: Duration,
    pub last_publish_at: Option<Timestamp>,
    last_poll_at: Option<Timestamp>,
}

impl PublishSchedule {
    pub fn new(poll_interval: Duration, publish_interval: Duration) -> Self {
        Self {
            poll_interval,
            publish_interval,
            last_publish_at: None,
            last_poll_at: None,
        }
    }

    /// No publish yet counts as due, so the first eligible tick publishes.
    pub fn publish_due(&self, now: Timestamp) -> bool {
        self.last_publish_at
            .is_none_or(|last| now.saturating_duration_since(last) >= self.publish_interval)
    }

    fn poll_due(&self, now: Timestamp) -> bool {
        self.last_poll_at
            .is_none_or(|last| now.saturating_duration_since(last) >= self.poll_interval)
    }
}

/// Payload of an inbound switch command: `ON` or anything else.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchCommand {
    On,
    Off,
}

impl SwitchCommand {
    pub fn from_payload(payload: &[u8]) -> Self {
        if payload == b"ON" { Self::On } else { Self::Off }
    }
}

pub struct TelemetryPublisher<B, I> {
    broker: B,
    indicator: I,
    state: BrokerState,
    schedule: PublishSchedule,
    publish_topic: String<TOPIC_CAPACITY>,
    subscribe_topic: Option<String<TOPIC_CAPACITY>>,
    latest: Option<SensorReading>,
}

impl<B: Broker, I: OutputPin> TelemetryPublisher<B, I> {
    /// `indicator` follows `ON`/`OFF` commands on the subscribe topic.
    pub fn new(broker: B, indicator: I, broker_config: &BrokerConfig, telemetry: &TelemetryConfig) -> Self {
        Self {
            broker,
            indicator,
            state: BrokerState::Disconnected,
            schedule: PublishSchedule::new(telemetry.poll_interval(), telemetry.publish_interval()),
            publish_topic: bounded(broker_config.publish_topic),
            subscribe_topic: broker_config.subscribe_topic.map(bounded),
            latest: None,
        }
    }

    pub fn state(&self) -> BrokerState {
        self.state
    }

    pub fn schedule(&self) -> &PublishSchedule {
        &self.schedule
    }

    pub fn broker(&self) -> &B {
        &self.broker
    }

    /// Runs one scheduling step. Errors are logged and swallowed.
    pub async fn tick<S: Sensor>(&mut self, now: Timestamp, sensor: &mut S) {
        if self.state == BrokerState::Connected {
            self.service_inbound().await;
        }

        if !self.schedule.publish_due(now) {
            return;
        }

        if self.state != BrokerState::Connected && !self.connect().await {
            return;
        }

        let Some(reading) = self.sample(now, sensor) else {
            return;
        };

        if !reading.is_plausible() {
            trace!(
                "Skipping implausible reading ({:.1} C)",
                reading.temperature()
            );
            return;
        }

        let Some(payload) = temperature_payload(reading.temperature()) else {
            error!(
                "Temperature {} does not fit the publish payload",
                reading.temperature()
            );
            return;
        };

        match self
            .broker
            .publish(&self.publish_topic, payload.as_bytes())
            .await
        {
            Ok(()) => {
                debug!(
                    "Published temperature={} C (humidity={:.1} %)",
                    payload,
                    reading.humidity()
                );
                self.schedule.last_publish_at = Some(now);
            }
            Err(e) => {
                error!("Publish to {} failed: {:?}", self.publish_topic, e);
                self.state = BrokerState::Disconnected;
            }
        }
    }

    /// Applies a message received on the subscribe topic.
    pub fn on_message(&mut self, topic: &str, payload: &[u8]) {
        if self.subscribe_topic.as_deref() != Some(topic) {
            trace!("Ignoring message on {}", topic);
            return;
        }

        let command = SwitchCommand::from_payload(payload);
        debug!("Command on {}: {:?}", topic, command);
        let result = match command {
            SwitchCommand::On => self.indicator.set_high(),
            SwitchCommand::Off => self.indicator.set_low(),
        };
        if let Err(e) = result {
            warn!("Failed to drive command indicator: {:?}", e);
        }
    }

    async fn connect(&mut self) -> bool {
        self.state = BrokerState::Connecting;
        if let Err(e) = self.broker.connect().await {
            error!("Connection to {} failed: {:?}", self.broker.describe(), e);
            self.state = BrokerState::Disconnected;
            return false;
        }

        self.state = BrokerState::Connected;
        info!("Connected with MQTT broker: {}", self.broker.describe());
        debug!(
            "Measure interval: {}s, publish interval: {}s",
            self.schedule.poll_interval.as_secs(),
            self.schedule.publish_interval.as_secs()
        );

        if let Some(topic) = &self.subscribe_topic
            && let Err(e) = self.broker.subscribe(topic).await
        {
            warn!("Subscribe to {} failed: {:?}", topic, e);
        }
        true
    }

    /// Fresh reading when the poll interval allows it, else the last one.
    fn sample<S: Sensor>(&mut self, now: Timestamp, sensor: &mut S) -> Option<SensorReading> {
        if !self.schedule.poll_due(now) {
            return self.latest;
        }

        match sensor.capture_and_decode() {
            Ok(reading) => {
                self.latest = Some(reading);
                self.schedule.last_poll_at = Some(now);
                Some(reading)
            }
            Err(e) => {
                trace!("No reading to publish: {}", e);
                None
            }
        }
    }

    async fn service_inbound(&mut self) {
        match self.broker.poll_inbound().await {
            Ok(Some(message)) => self.on_message(&message.topic, &message.payload),
            Ok(None) => {}
            Err(e) => {
                warn!("Broker session dropped: {:?}", e);
                self.state = BrokerState::Disconnected;
            }
        }
    }
}

/// One-decimal rendering of a temperature, or `None` if it overflows.
fn temperature_payload(celsius: f32) -> Option<String<PAYLOAD_CAPACITY>> {
    let mut payload = String::new();
    write!(payload, "{:.1}", celsius).ok()?;
    Some(payload)
}

fn bounded(text: &str) -> String<TOPIC_CAPACITY> {
    let mut out = String::new();
    for ch in text.chars() {
        if out.push(ch).is_err() {
            warn!("Topic {} truncated to {} bytes", text, TOPIC_CAPACITY);
            break;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensors::ProtocolError;
    use crate::sensors::pulse::DecodedBuffer;
    use crate::simulation::{RecordingBroker, RecordingPin};
    use embassy_futures::block_on;

    /// Sensor that hands out queued results.
    struct QueuedSensor {
        results: alloc::vec::Vec<Result<SensorReading, ProtocolError>>,
        reads: usize,
    }

    impl QueuedSensor {
        fn always(temperature: u8) -> Self {
            Self::new(alloc::vec![Ok(reading(temperature)); 16])
        }

        fn new(mut results: alloc::vec::Vec<Result<SensorReading, ProtocolError>>) -> Self {
            results.reverse();
            Self { results, reads: 0 }
        }
    }

    impl Sensor for QueuedSensor {
        fn capture_and_decode(&mut self) -> Result<SensorReading, ProtocolError> {
            self.reads += 1;
            self.results.pop().unwrap_or(Err(ProtocolError::LineFault))
        }

        fn last_reading(&self) -> Option<SensorReading> {
            None
        }
    }

    fn reading(temperature: u8) -> SensorReading {
        SensorReading::from_buffer(&DecodedBuffer::from_parts(40, 0, temperature, 5), Timestamp::ZERO).unwrap()
    }

    fn publisher(broker: RecordingBroker) -> TelemetryPublisher<RecordingBroker, RecordingPin> {
        let config = BrokerConfig {
            publish_topic: "feeds/temp",
            subscribe_topic: Some("feeds/led"),
            ..BrokerConfig::default()
        };
        TelemetryPublisher::new(broker, RecordingPin::new(), &config, &TelemetryConfig::default())
    }

    #[test]
    fn test_one_publish_per_interval() {
        let broker = RecordingBroker::new();
        let probe = broker.probe();
        let mut telemetry = publisher(broker);
        let mut sensor = QueuedSensor::always(23);

        block_on(async {
            for secs in 0..60 {
                telemetry.tick(Timestamp::from_secs(secs), &mut sensor).await;
            }
        });
        assert_eq!(probe.published().len(), 1);

        block_on(telemetry.tick(Timestamp::from_secs(60), &mut sensor));
        block_on(telemetry.tick(Timestamp::from_secs(61), &mut sensor));
        let published = probe.published();
        assert_eq!(published.len(), 2);
        assert_eq!(published[0], ("feeds/temp".into(), "23.5".into()));
        assert_eq!(probe.connects(), 1);
    }

    #[test]
    fn test_decode_failure_does_not_advance_clock() {
        let broker = RecordingBroker::new();
        let probe = broker.probe();
        let mut telemetry = publisher(broker);
        let mut sensor = QueuedSensor::new(alloc::vec![
            Err(ProtocolError::InvalidChecksum {
                computed: 1,
                received: 2
            }),
            Ok(reading(21)),
        ]);

        block_on(telemetry.tick(Timestamp::from_secs(0), &mut sensor));
        assert!(probe.published().is_empty());
        assert!(telemetry.schedule().last_publish_at.is_none());

        block_on(telemetry.tick(Timestamp::from_secs(1), &mut sensor));
        assert_eq!(probe.published().len(), 1);
        assert_eq!(telemetry.schedule().last_publish_at, Some(Timestamp::from_secs(1)));
    }

    #[test]
    fn test_implausible_reading_is_skipped() {
        let broker = RecordingBroker::new();
        let probe = broker.probe();
        let mut telemetry = publisher(broker);
        let cold = SensorReading::from_buffer(&DecodedBuffer::from_parts(40, 0, 0, 0), Timestamp::ZERO).unwrap();
        let mut sensor = QueuedSensor::new(alloc::vec![Ok(cold)]);

        block_on(telemetry.tick(Timestamp::ZERO, &mut sensor));
        assert!(probe.published().is_empty());
        assert!(telemetry.schedule().last_publish_at.is_none());
    }

    #[test]
    fn test_no_network_before_due() {
        let broker = RecordingBroker::new();
        let probe = broker.probe();
        let mut telemetry = publisher(broker);
        let mut sensor = QueuedSensor::always(22);

        block_on(telemetry.tick(Timestamp::ZERO, &mut sensor));
        block_on(telemetry.tick(Timestamp::from_secs(10), &mut sensor));
        assert_eq!(probe.connects(), 1);
        assert_eq!(sensor.reads, 1);
    }

    #[test]
    fn test_failed_connect_is_retried_next_tick() {
        let broker = RecordingBroker::new();
        let probe = broker.probe();
        probe.fail_connects(1);
        let mut telemetry = publisher(broker);
        let mut sensor = QueuedSensor::always(22);

        block_on(telemetry.tick(Timestamp::ZERO, &mut sensor));
        assert_eq!(telemetry.state(), BrokerState::Disconnected);
        assert_eq!(sensor.reads, 0);

        block_on(telemetry.tick(Timestamp::from_secs(1), &mut sensor));
        assert_eq!(telemetry.state(), BrokerState::Connected);
        assert_eq!(probe.published().len(), 1);
        assert_eq!(probe.subscriptions(), alloc::vec![alloc::string::String::from("feeds/led")]);
    }

    #[test]
    fn test_publish_failure_drops_session() {
        let broker = RecordingBroker::new();
        let probe = broker.probe();
        probe.fail_publishes(true);
        let mut telemetry = publisher(broker);
        let mut sensor = QueuedSensor::always(22);

        block_on(telemetry.tick(Timestamp::ZERO, &mut sensor));
        assert_eq!(telemetry.state(), BrokerState::Disconnected);
        assert!(telemetry.schedule().last_publish_at.is_none());

        probe.fail_publishes(false);
        block_on(telemetry.tick(Timestamp::from_secs(1), &mut sensor));
        assert_eq!(probe.connects(), 2);
        assert_eq!(probe.published().len(), 1);
    }

    #[test]
    fn test_inbound_command_drives_indicator() {
        let broker = RecordingBroker::new();
        let probe = broker.probe();
        let indicator = RecordingPin::new();
        let config = BrokerConfig {
            subscribe_topic: Some("feeds/led"),
            ..BrokerConfig::default()
        };
        let mut telemetry =
            TelemetryPublisher::new(broker, indicator.clone(), &config, &TelemetryConfig::default());
        let mut sensor = QueuedSensor::always(22);

        block_on(telemetry.tick(Timestamp::ZERO, &mut sensor));
        probe.deliver("feeds/led", b"ON");
        block_on(telemetry.tick(Timestamp::from_secs(1), &mut sensor));
        assert!(indicator.is_set_high());

        probe.deliver("feeds/other", b"OFF");
        block_on(telemetry.tick(Timestamp::from_secs(2), &mut sensor));
        assert!(indicator.is_set_high());

        probe.deliver("feeds/led", b"off");
        block_on(telemetry.tick(Timestamp::from_secs(3), &mut sensor));
        assert!(!indicator.is_set_high());
    }

    #[test]
    fn test_temperature_payload_rejects_overflow() {
        assert_eq!(temperature_payload(23.5).as_deref(), Some("23.5"));
        assert_eq!(temperature_payload(-4.0).as_deref(), Some("-4.0"));
        assert_eq!(temperature_payload(f32::MAX), None);
    }

    #[test]
    fn test_inbound_message_is_cut_to_capacity() {
        let long_topic = "t".repeat(TOPIC_CAPACITY + 5);
        let long_payload = [b'x'; INBOUND_PAYLOAD_CAPACITY + 5];
        let message = InboundMessage::truncated(&long_topic, &long_payload);
        assert_eq!(message.topic.len(), TOPIC_CAPACITY);
        assert_eq!(message.payload.len(), INBOUND_PAYLOAD_CAPACITY);

        // Multi-byte characters are never split
        let accented = "é".repeat(TOPIC_CAPACITY);
        let message = InboundMessage::truncated(&accented, b"ON");
        assert_eq!(message.topic.len(), TOPIC_CAPACITY);
        assert!(message.topic.chars().all(|ch| ch == 'é'));
        assert_eq!(&message.payload[..], b"ON");
    }
}
