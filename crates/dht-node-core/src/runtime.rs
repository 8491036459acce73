//! The node's cooperative main loop
//!
//! One cycle is: sleep, check the WiFi link, service at most one HTTP
//! request, tick telemetry. Nothing else runs concurrently, so every
//! component owns its hardware outright and no locking is needed. The loop
//! leaves only through `terminate` (orderly) or a reset (everything else).

use embedded_hal::digital::OutputPin;
use embedded_hal_async::delay::DelayNs;
use log::{debug, info, warn};

use crate::clock::Clock;
use crate::connectivity::{ConnectivityManager, WifiLink};
use crate::control::{ControlSurface, Directive, Listener};
use crate::error::NodeError;
use crate::logging::LogView;
use crate::platform::Platform;
use crate::sensors::Sensor;
use crate::telemetry::{Broker, TelemetryPublisher};

/// Why [`RuntimeLoop::run_until_exit`] returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exit {
    Terminated,
    Restart,
}

/// Owns every component of the node and drives them in turn.
///
/// Type parameters: `S` sensor, `B`/`A` broker and command indicator,
/// `W`/`I` WiFi link and link indicator, `L`/`V` listener and log view,
/// `P` platform, `C` clock, `D` async delay.
pub struct RuntimeLoop<S, B, A, W, I, L, V, P, C, D> {
    sensor: S,
    telemetry: TelemetryPublisher<B, A>,
    connectivity: ConnectivityManager<W, I>,
    control: ControlSurface<L, V>,
    platform: P,
    clock: C,
    delay: D,
    cycle_period_ms: u32,
}

impl<S, B, A, W, I, L, V, P, C, D> RuntimeLoop<S, B, A, W, I, L, V, P, C, D>
where
    S: Sensor,
    B: Broker,
    A: OutputPin,
    W: WifiLink,
    I: OutputPin,
    L: Listener,
    V: LogView,
    P: Platform,
    C: Clock,
    D: DelayNs,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        sensor: S,
        telemetry: TelemetryPublisher<B, A>,
        connectivity: ConnectivityManager<W, I>,
        control: ControlSurface<L, V>,
        platform: P,
        clock: C,
        delay: D,
        cycle_period_ms: u32,
    ) -> Self {
        Self {
            sensor,
            telemetry,
            connectivity,
            control,
            platform,
            clock,
            delay,
            cycle_period_ms,
        }
    }

    pub fn telemetry(&self) -> &TelemetryPublisher<B, A> {
        &self.telemetry
    }

    pub fn connectivity(&self) -> &ConnectivityManager<W, I> {
        &self.connectivity
    }

    pub fn control(&self) -> &ControlSurface<L, V> {
        &self.control
    }

    /// Brings the node up and cycles until a lifecycle command or a fault.
    ///
    /// A WiFi link that cannot be (re)established resets the device from
    /// inside this call.
    pub async fn run_until_exit(&mut self) -> Result<Exit, NodeError> {
        self.connectivity
            .connect_or_reset(&mut self.delay, &mut self.platform)
            .await;

        // The first bus cycle after power-up often fails; get it out of the way.
        if let Err(e) = self.sensor.capture_and_decode() {
            debug!("Warm-up capture failed: {}", e);
        }

        self.control.open(&mut self.delay).await?;

        loop {
            self.delay.delay_ms(self.cycle_period_ms).await;

            if !self.connectivity.is_connected() {
                warn!("WiFi link down, reconnecting");
                self.connectivity
                    .connect_or_reset(&mut self.delay, &mut self.platform)
                    .await;
            }

            let directive = self
                .control
                .serve(&mut self.sensor, &self.platform, self.clock.now())
                .await?;
            match directive {
                Directive::Continue => {}
                Directive::Restart => return Ok(Exit::Restart),
                Directive::Terminate => return Ok(Exit::Terminated),
            }

            self.telemetry.tick(self.clock.now(), &mut self.sensor).await;
        }
    }

    /// Best-effort release of the socket and the link.
    pub fn shutdown(&mut self) {
        self.control.close();
        self.connectivity.disconnect();
    }

    /// Runs the node. Returns only after `terminate`; a restart request or
    /// any fault resets the device.
    pub async fn run(mut self) {
        let outcome = self.run_until_exit().await;
        self.shutdown();

        match outcome {
            Ok(Exit::Terminated) => info!("Runtime loop terminated"),
            Ok(Exit::Restart) => {
                crate::durable!(info, "Restarting device");
                self.platform.reset()
            }
            Err(e) => {
                crate::fatal!("{}", e);
                self.platform.reset()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BrokerConfig, TelemetryConfig, WifiConfig};
    use crate::connectivity::ConnectionState;
    use crate::control::ControlError;
    use crate::logging::{MemoryLogStore, NodeLogger, NullConsole, Severity};
    use crate::sensors::pulse::DecodedBuffer;
    use crate::simulation::{
        BrokerProbe, InstantDelay, ListenerProbe, RecordingBroker, RecordingPin, ResetRequested, ScriptedListener,
        SimulatedDht11, SimulatedLink, VirtualClock,
    };
    use crate::clock::Timestamp;
    use alloc::string::String;
    use core::time::Duration;
    use embassy_futures::block_on;

    static CONSOLE: NullConsole = NullConsole;

    fn uptime() -> Timestamp {
        Timestamp::ZERO
    }

    type Sim = crate::sensors::Dht11<
        crate::simulation::SimulatedLine,
        crate::simulation::SimulatedClock,
        crate::simulation::SimulatedDelay,
    >;

    type Node = RuntimeLoop<
        Sim,
        RecordingBroker,
        RecordingPin,
        SimulatedLink,
        RecordingPin,
        ScriptedListener,
        NodeLogger<MemoryLogStore>,
        ResetRequested,
        VirtualClock,
        InstantDelay,
    >;

    struct Rig {
        node: Node,
        link: SimulatedLink,
        listener: ListenerProbe,
        broker: BrokerProbe,
        link_led: RecordingPin,
        clock: VirtualClock,
    }

    fn rig() -> Rig {
        let dht = SimulatedDht11::new();
        dht.respond_with(DecodedBuffer::from_parts(45, 0, 23, 5));
        let sensor = crate::sensors::Dht11::new(dht.line(), dht.clock(), dht.delay(), Duration::from_secs(6));

        let broker = RecordingBroker::new();
        let broker_probe = broker.probe();
        let telemetry = TelemetryPublisher::new(
            broker,
            RecordingPin::new(),
            &BrokerConfig::default(),
            &TelemetryConfig::default(),
        );

        let link = SimulatedLink::up_after(2);
        let link_led = RecordingPin::new();
        let wifi = WifiConfig {
            ssid: "lab",
            password: "secret",
        };
        let connectivity = ConnectivityManager::new(link.clone(), link_led.clone(), &wifi);

        let listener = ScriptedListener::new();
        let listener_probe = listener.probe();
        let logger = NodeLogger::new(&CONSOLE, uptime, Severity::Debug, MemoryLogStore::new(8));
        let control = ControlSurface::new(listener, logger, 80);

        let clock = VirtualClock::new();
        let node = RuntimeLoop::new(
            sensor,
            telemetry,
            connectivity,
            control,
            ResetRequested,
            clock.clone(),
            InstantDelay::driving(clock.clone()),
            500,
        );

        Rig {
            node,
            link,
            listener: listener_probe,
            broker: broker_probe,
            link_led,
            clock,
        }
    }

    #[test]
    fn test_terminate_unwinds_cleanly() {
        let mut rig = rig();
        rig.listener.queue_request(b"GET /terminate? HTTP/1.1\r\n\r\n");

        let exit = block_on(rig.node.run_until_exit()).unwrap();
        assert_eq!(exit, Exit::Terminated);
        // Control is serviced before telemetry within a cycle.
        assert!(rig.broker.published().is_empty());

        rig.node.shutdown();
        assert!(rig.listener.is_closed());
        assert_eq!(rig.link.deactivations(), 1);
        assert!(!rig.link_led.is_set_high());
        assert_eq!(rig.node.connectivity().state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_run_returns_on_terminate() {
        let rig = rig();
        rig.listener.queue_request(b"GET /terminate? HTTP/1.1\r\n\r\n");
        block_on(rig.node.run());
        assert!(rig.listener.is_closed());
        assert_eq!(rig.link.deactivations(), 1);
    }

    #[test]
    fn test_publishes_and_serves_between_commands() {
        let mut rig = rig();
        rig.listener.queue_request(b"GET /refresh? HTTP/1.1\r\n\r\n");

        // Every delay yields once, so each poll runs up to the next sleep.
        let node = &mut rig.node;
        let listener = rig.listener.clone();
        let result = block_on(async {
            let mut run = core::pin::pin!(node.run_until_exit());
            let mut queued = false;
            loop {
                if let core::task::Poll::Ready(result) = embassy_futures::poll_once(run.as_mut()) {
                    break result;
                }
                if !queued && listener.responses().len() == 1 {
                    listener.queue_request(b"GET /terminate? HTTP/1.1\r\n\r\n");
                    queued = true;
                }
            }
        });

        assert_eq!(result.unwrap(), Exit::Terminated);
        let page = String::from_utf8(rig.listener.responses()[0].clone()).unwrap();
        assert!(page.contains("23.5"));
        assert_eq!(
            rig.broker.published(),
            alloc::vec![(String::from("feeds/temperature"), String::from("23.5"))]
        );
        assert!(rig.clock.now() >= Timestamp::from_millis(1_000));
    }

    #[test]
    fn test_bind_failure_surfaces_as_error() {
        let mut rig = rig();
        rig.listener.fail_binds(u32::MAX);

        let result = block_on(rig.node.run_until_exit());
        assert!(matches!(
            result,
            Err(NodeError::Control(ControlError::Bind { port: 80, .. }))
        ));
    }

    #[test]
    #[should_panic(expected = "device reset requested")]
    fn test_fault_resets_device() {
        let rig = rig();
        rig.listener.fail_binds(u32::MAX);
        block_on(rig.node.run());
    }

    #[test]
    #[should_panic(expected = "device reset requested")]
    fn test_restart_resets_device() {
        let rig = rig();
        rig.listener.queue_request(b"GET /restart? HTTP/1.1\r\n\r\n");
        block_on(rig.node.run());
    }

    #[test]
    fn test_lost_link_is_reestablished() {
        let mut rig = rig();
        let link = rig.link.clone();
        let listener = rig.listener.clone();

        let node = &mut rig.node;
        let result = block_on(async {
            let mut run = core::pin::pin!(node.run_until_exit());
            let mut dropped = false;
            let mut queued = false;
            loop {
                if let core::task::Poll::Ready(result) = embassy_futures::poll_once(run.as_mut()) {
                    break result;
                }
                if !dropped && link.associations() == 1 && listener.is_bound() {
                    link.drop_link();
                    dropped = true;
                } else if dropped && !queued && link.associations() == 2 {
                    listener.queue_request(b"GET /terminate? HTTP/1.1\r\n\r\n");
                    queued = true;
                }
            }
        });

        assert_eq!(result.unwrap(), Exit::Terminated);
        assert_eq!(link.associations(), 2);
    }
}
