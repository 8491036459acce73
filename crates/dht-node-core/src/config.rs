//! Static node configuration
//!
//! Everything here is supplied once at boot. The firmware fills it from
//! compile-time environment values, the host runner from an optional JSON
//! file. Fields borrow from the source so no copies are made on the device.

use core::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror_no_std::Error;

use crate::logging::Severity;

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(bound(deserialize = "'de: 'a"), default)]
pub struct NodeConfig<'a> {
    pub wifi: WifiConfig<'a>,
    pub broker: BrokerConfig<'a>,
    /// TCP port of the HTTP control surface
    pub listen_port: u16,
    pub sensor: SensorConfig,
    pub indicators: IndicatorConfig,
    pub telemetry: TelemetryConfig,
    pub log: LogConfig<'a>,
    /// Sleep at the top of every runtime cycle
    pub cycle_period_ms: u32,
}

/// Two roles were given the same GPIO.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("GPIO{pin} is assigned to both the {first} and the {second}")]
pub struct PinConflict {
    pub pin: u8,
    pub first: &'static str,
    pub second: &'static str,
}

impl NodeConfig<'_> {
    /// Every GPIO the node drives, by role.
    pub fn pin_assignments(&self) -> [(&'static str, u8); 3] {
        [
            ("sensor data line", self.sensor.pin),
            ("link indicator", self.indicators.link_pin),
            ("command indicator", self.indicators.command_pin),
        ]
    }

    pub fn check_pins(&self) -> Result<(), PinConflict> {
        let assignments = self.pin_assignments();
        for (i, (first, pin)) in assignments.iter().enumerate() {
            if let Some((second, _)) = assignments[i + 1..].iter().find(|(_, other)| other == pin) {
                return Err(PinConflict {
                    pin: *pin,
                    first: *first,
                    second: *second,
                });
            }
        }
        Ok(())
    }
}

impl Default for NodeConfig<'_> {
    fn default() -> Self {
        Self {
            wifi: WifiConfig::default(),
            broker: BrokerConfig::default(),
            listen_port: 80,
            sensor: SensorConfig::default(),
            indicators: IndicatorConfig::default(),
            telemetry: TelemetryConfig::default(),
            log: LogConfig::default(),
            cycle_period_ms: 500,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct WifiConfig<'a> {
    pub ssid: &'a str,
    pub password: &'a str,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(bound(deserialize = "'de: 'a"), default)]
pub struct BrokerConfig<'a> {
    pub host: &'a str,
    pub port: u16,
    pub client_id: &'a str,
    pub username: &'a str,
    pub password: &'a str,
    /// Topic the temperature is published to
    pub publish_topic: &'a str,
    /// Topic whose `ON`/`OFF` payloads drive the command indicator
    #[serde(borrow)]
    pub subscribe_topic: Option<&'a str>,
}

impl Default for BrokerConfig<'_> {
    fn default() -> Self {
        Self {
            host: "io.adafruit.com",
            port: 1883,
            client_id: "dht-node",
            username: "",
            password: "",
            publish_topic: "feeds/temperature",
            subscribe_topic: None,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy)]
#[serde(default)]
pub struct SensorConfig {
    /// GPIO number of the single-wire data line
    pub pin: u8,
    /// Datasheet minimum time between two bus cycles
    pub min_interval_secs: u32,
}

impl SensorConfig {
    pub fn min_interval(&self) -> Duration {
        Duration::from_secs(u64::from(self.min_interval_secs))
    }
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            pin: 4,
            min_interval_secs: 6,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy)]
#[serde(default)]
pub struct IndicatorConfig {
    /// GPIO of the LED that mirrors the WiFi link
    pub link_pin: u8,
    /// GPIO of the LED driven by broker commands
    pub command_pin: u8,
}

impl Default for IndicatorConfig {
    fn default() -> Self {
        Self {
            link_pin: 2,
            command_pin: 5,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy)]
#[serde(default)]
pub struct TelemetryConfig {
    pub poll_interval_secs: u32,
    pub publish_interval_secs: u32,
}

impl TelemetryConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(u64::from(self.poll_interval_secs))
    }

    pub fn publish_interval(&self) -> Duration {
        Duration::from_secs(u64::from(self.publish_interval_secs))
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 30,
            publish_interval_secs: 60,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(bound(deserialize = "'de: 'a"), default)]
pub struct LogConfig<'a> {
    /// Records less severe than this are dropped before reaching any sink
    pub max_severity: Severity,
    /// Location of the persistent log on stores that have paths
    pub store_path: &'a str,
}

impl Default for LogConfig<'_> {
    fn default() -> Self {
        Self {
            max_severity: Severity::Debug,
            store_path: "app.log",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_device() {
        let config = NodeConfig::default();
        assert_eq!(config.listen_port, 80);
        assert_eq!(config.sensor.pin, 4);
        assert_eq!(config.sensor.min_interval(), Duration::from_secs(6));
        assert_eq!(config.telemetry.poll_interval(), Duration::from_secs(30));
        assert_eq!(config.telemetry.publish_interval(), Duration::from_secs(60));
        assert_eq!(config.broker.port, 1883);
        assert!(config.broker.subscribe_topic.is_none());
        assert_eq!(config.log.max_severity, Severity::Debug);
        assert_eq!(config.cycle_period_ms, 500);
        assert_eq!(config.indicators.link_pin, 2);
        assert_eq!(config.indicators.command_pin, 5);
        assert_eq!(config.check_pins(), Ok(()));
    }

    #[test]
    fn test_check_pins_reports_shared_gpio() {
        let mut config = NodeConfig::default();
        config.indicators.command_pin = config.sensor.pin;
        assert_eq!(
            config.check_pins(),
            Err(PinConflict {
                pin: 4,
                first: "sensor data line",
                second: "command indicator",
            })
        );

        config.indicators.command_pin = 7;
        config.indicators.link_pin = 7;
        assert_eq!(config.check_pins().map_err(|e| e.pin), Err(7));
    }
}
