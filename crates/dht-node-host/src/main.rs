//! Desktop runner for the dht-node sensor node.
//!
//! Runs the real runtime loop on the host: the DHT11 is simulated on a
//! virtual single-wire bus fed with slowly drifting synthetic frames, the
//! control surface listens on a real TCP port, the broker only logs what it
//! would publish, and the persistent log is a plain file.
//!
//! ```text
//! dht-node-host [config.json]
//! ```
//!
//! Without a config file the defaults apply, except that the control
//! surface listens on port 8080. Open `http://localhost:8080/` to see the
//! status page. A device reset ends the process with exit code 75 so a
//! supervisor can restart it.

mod board;
mod broker;
mod net;
mod sensor;
mod store;

use std::fs;

use log::info;
use thiserror_no_std::Error;

use dht_node_core::config::NodeConfig;
use dht_node_core::connectivity::ConnectivityManager;
use dht_node_core::control::ControlSurface;
use dht_node_core::logging::NodeLogger;
use dht_node_core::runtime::RuntimeLoop;
use dht_node_core::telemetry::TelemetryPublisher;

use board::{HostClock, HostDelay, HostPlatform, LogIndicator};
use broker::LogBroker;
use net::{HostLink, StdListener};
use sensor::HostSensor;
use store::FileLogStore;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

const HOST_LISTEN_PORT: u16 = 8080;

#[derive(Error, Debug)]
enum HostError {
    #[error("Cannot read config file: {0}")]
    ReadConfig(std::io::Error),

    #[error("Invalid config file: {0}")]
    ParseConfig(serde_json::Error),

    #[error("Logger already installed")]
    Logger,
}

/// Loads the config named on the command line, or the host defaults.
///
/// The file contents are leaked so the config can borrow from them for the
/// life of the process.
fn load_config() -> Result<NodeConfig<'static>, HostError> {
    let Some(path) = std::env::args().nth(1) else {
        return Ok(NodeConfig {
            listen_port: HOST_LISTEN_PORT,
            ..NodeConfig::default()
        });
    };

    let text = fs::read_to_string(&path).map_err(HostError::ReadConfig)?;
    let text: &'static str = Box::leak(text.into_boxed_str());
    serde_json::from_str(text).map_err(HostError::ParseConfig)
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

fn main() -> std::process::ExitCode {
    match run() {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("dht-node-host: {e}");
            std::process::ExitCode::FAILURE
        }
    }
}

fn run() -> Result<(), HostError> {
    let config = load_config()?;

    let console = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(config.log.max_severity.level_filter().as_str()),
    )
    .build();
    let store = FileLogStore::new(config.log.store_path);
    let logger: &'static NodeLogger<FileLogStore> = Box::leak(Box::new(NodeLogger::new(
        Box::leak(Box::new(console)),
        board::uptime,
        config.log.max_severity,
        store,
    )));
    logger.install().map_err(|_| HostError::Logger)?;

    dht_node_core::durable!(info, "dht-node-host {} starting", env!("CARGO_PKG_VERSION"));

    let sensor = HostSensor::new(config.sensor.min_interval());
    let telemetry = TelemetryPublisher::new(
        LogBroker::new(&config.broker),
        LogIndicator::new("command"),
        &config.broker,
        &config.telemetry,
    );
    let connectivity = ConnectivityManager::new(HostLink::new(), LogIndicator::new("link"), &config.wifi);
    let control = ControlSurface::new(StdListener::new(), logger, config.listen_port);

    let node = RuntimeLoop::new(
        sensor,
        telemetry,
        connectivity,
        control,
        HostPlatform,
        HostClock,
        HostDelay,
        config.cycle_period_ms,
    );
    embassy_futures::block_on(node.run());

    info!("dht-node-host stopped");
    log::logger().flush();
    Ok(())
}
