#![cfg(feature = "simulation")]

use std::time::Duration;

use dht_node_core::clock::{Clock, Timestamp};
use dht_node_core::config::NodeConfig;
use dht_node_core::connectivity::ConnectivityManager;
use dht_node_core::control::ControlSurface;
use dht_node_core::logging::{LogView, MemoryLogStore, NodeLogger, NullConsole, Severity};
use dht_node_core::runtime::{Exit, RuntimeLoop};
use dht_node_core::sensors::pulse::{DecodedBuffer, EXPECTED_PULSES, synthesize};
use dht_node_core::sensors::{Dht11, ProtocolError, SensorReading};
use dht_node_core::simulation::{
    InstantDelay, RecordingBroker, RecordingPin, ResetRequested, ScriptedListener, SimulatedDht11,
    SimulatedLink, VirtualClock,
};
use dht_node_core::telemetry::TelemetryPublisher;
use embassy_futures::block_on;

static CONSOLE: NullConsole = NullConsole;

fn boot() -> Timestamp {
    Timestamp::ZERO
}

#[test]
fn test_injected_frame_decodes_to_reading() {
    let sim = SimulatedDht11::new();
    sim.respond_with(DecodedBuffer::from_parts(45, 0, 23, 5));
    sim.advance(Duration::from_secs(10));
    let mut dht = Dht11::new(sim.line(), sim.clock(), sim.delay(), Duration::from_secs(6));

    let reading: SensorReading = dht.capture_and_decode().unwrap();

    assert_eq!(reading.humidity(), 45.0);
    assert_eq!(reading.temperature(), 23.5);
    assert!(reading.captured_at() >= Timestamp::from_secs(10));
    assert!(reading.captured_at() <= sim.clock().now());
}

#[test]
fn test_jittered_pulses_still_decode() {
    let sim = SimulatedDht11::new();
    let mut pulses = synthesize(&DecodedBuffer::from_parts(61, 0, 19, 8));
    for (i, pulse) in pulses.iter_mut().enumerate() {
        // +-6 us of jitter stays clear of the 50 us threshold
        *pulse = if i % 2 == 0 { *pulse + 6 } else { *pulse - 6 };
    }
    sim.respond_with_pulses(pulses.to_vec());
    let mut dht = Dht11::new(sim.line(), sim.clock(), sim.delay(), Duration::from_secs(6));

    let reading = dht.capture_and_decode().unwrap();
    assert_eq!(reading.humidity(), 61.0);
    assert_eq!(reading.temperature(), 19.8);
}

#[test]
fn test_truncated_frame_is_a_pulse_count_error() {
    let sim = SimulatedDht11::new();
    let pulses = synthesize(&DecodedBuffer::from_parts(61, 0, 19, 8));
    sim.respond_with_pulses(pulses[..EXPECTED_PULSES - 1].to_vec());
    let mut dht = Dht11::new(sim.line(), sim.clock(), sim.delay(), Duration::from_secs(6));

    assert_eq!(
        dht.capture_and_decode(),
        Err(ProtocolError::InvalidPulseCount {
            expected: EXPECTED_PULSES,
            received: EXPECTED_PULSES - 1
        })
    );
}

#[test]
fn test_node_serves_publishes_and_terminates() {
    let config = NodeConfig::default();

    let sim = SimulatedDht11::new();
    sim.respond_with(DecodedBuffer::from_parts(45, 0, 23, 5));
    let sensor = Dht11::new(sim.line(), sim.clock(), sim.delay(), config.sensor.min_interval());

    let broker = RecordingBroker::new();
    let published = broker.probe();
    let telemetry = TelemetryPublisher::new(broker, RecordingPin::new(), &config.broker, &config.telemetry);

    let link = SimulatedLink::up_after(3);
    let connectivity = ConnectivityManager::new(link.clone(), RecordingPin::new(), &config.wifi);

    let listener = ScriptedListener::new();
    let requests = listener.probe();
    requests.queue_request(b"GET /showpermmsg? HTTP/1.1\r\n\r\n");
    let logger: NodeLogger<MemoryLogStore> =
        NodeLogger::new(&CONSOLE, boot, Severity::Debug, MemoryLogStore::new(8));
    logger.record(Severity::Info, true, format_args!("boot marker"));
    let control = ControlSurface::new(listener, &logger, config.listen_port);

    let clock = VirtualClock::new();
    let mut node = RuntimeLoop::new(
        sensor,
        telemetry,
        connectivity,
        control,
        ResetRequested,
        clock.clone(),
        InstantDelay::driving(clock.clone()),
        config.cycle_period_ms,
    );

    let exit = block_on(async {
        let mut run = std::pin::pin!(node.run_until_exit());
        let mut queued = false;
        loop {
            if let std::task::Poll::Ready(exit) = embassy_futures::poll_once(run.as_mut()) {
                break exit;
            }
            if !queued && !requests.responses().is_empty() {
                requests.queue_request(b"GET /terminate? HTTP/1.1\r\n\r\n");
                queued = true;
            }
        }
    })
    .unwrap();
    node.shutdown();

    assert_eq!(exit, Exit::Terminated);
    let page = String::from_utf8(requests.responses()[0].clone()).unwrap();
    assert!(page.contains("Permanent messages"));
    assert!(page.contains("boot marker"));
    assert!(page.contains("23.5"));
    assert_eq!(published.published().len(), 1);
    assert_eq!(published.published()[0].1, "23.5");
    assert_eq!(sim.handshakes(), 1);
    assert!(requests.is_closed());
    assert_eq!(link.deactivations(), 1);
    assert!(logger
        .persistent_entries(10)
        .iter()
        .any(|entry| entry.message() == "boot marker"));
}
