//! Settings baked in at build time by `build.rs`.

use dht_node_core::config::{BrokerConfig, IndicatorConfig, NodeConfig, SensorConfig, WifiConfig};

/// Log file on the SD card (FAT 8.3 name)
pub const LOG_FILE_NAME: &str = "APP.LOG";

pub fn node_config() -> NodeConfig<'static> {
    let subscribe_topic = env!("MQTT_SUBSCRIBE_TOPIC");

    let mut config = NodeConfig {
        wifi: WifiConfig {
            ssid: env!("WIFI_SSID"),
            password: env!("WIFI_PASSWORD"),
        },
        broker: BrokerConfig {
            host: env!("MQTT_HOST"),
            port: env!("MQTT_PORT").parse().unwrap_or(1883),
            client_id: env!("MQTT_CLIENT_ID"),
            username: env!("MQTT_USERNAME"),
            password: env!("MQTT_PASSWORD"),
            publish_topic: env!("MQTT_PUBLISH_TOPIC"),
            subscribe_topic: (!subscribe_topic.is_empty()).then_some(subscribe_topic),
        },
        listen_port: env!("LISTEN_PORT").parse().unwrap_or(80),
        sensor: SensorConfig {
            pin: env!("DHT_PIN").parse().unwrap_or(4),
            ..SensorConfig::default()
        },
        indicators: IndicatorConfig {
            link_pin: env!("LINK_LED_PIN").parse().unwrap_or(2),
            command_pin: env!("COMMAND_LED_PIN").parse().unwrap_or(5),
        },
        ..NodeConfig::default()
    };
    config.log.store_path = LOG_FILE_NAME;
    config
}
