//! Bakes the node's settings into the binary.
//!
//! Values come from the process environment or a `.env` file next to this
//! crate. Anything unset falls back to an empty string (or the device
//! default for numbers) so `env!` always resolves.

const SETTINGS: &[(&str, &str)] = &[
    ("WIFI_SSID", ""),
    ("WIFI_PASSWORD", ""),
    ("MQTT_HOST", "io.adafruit.com"),
    ("MQTT_PORT", "1883"),
    ("MQTT_CLIENT_ID", "dht-node"),
    ("MQTT_USERNAME", ""),
    ("MQTT_PASSWORD", ""),
    ("MQTT_PUBLISH_TOPIC", "feeds/temperature"),
    ("MQTT_SUBSCRIBE_TOPIC", ""),
    ("LISTEN_PORT", "80"),
    ("DHT_PIN", "4"),
    ("LINK_LED_PIN", "2"),
    ("COMMAND_LED_PIN", "5"),
];

/// GPIOs `pins::PinBank` hands out. The SD card SPI bus owns 10 to 13.
const FREE_GPIOS: &[u8] = &[1, 2, 3, 4, 5, 6, 7, 8, 9, 14, 15, 16, 17, 18, 21];

fn main() {
    // A missing .env is fine; the shell environment may carry everything.
    let _ = dotenvy::dotenv();

    println!("cargo:rerun-if-changed=.env");
    for (key, default) in SETTINGS {
        println!("cargo:rerun-if-env-changed={key}");
        let value = std::env::var(key).unwrap_or_else(|_| default.to_string());
        println!("cargo:rustc-env={key}={value}");
    }

    for (key, default) in [("MQTT_PORT", "1883"), ("LISTEN_PORT", "80")] {
        let port = std::env::var(key).unwrap_or_else(|_| default.into());
        if port.parse::<u16>().is_err() {
            panic!("{key} must be a port number, got {port:?}");
        }
    }

    for (key, default) in [("DHT_PIN", "4"), ("LINK_LED_PIN", "2"), ("COMMAND_LED_PIN", "5")] {
        let pin = std::env::var(key).unwrap_or_else(|_| default.into());
        match pin.parse::<u8>() {
            Ok(number) if FREE_GPIOS.contains(&number) => {}
            _ => panic!("{key} must be one of GPIO {FREE_GPIOS:?}, got {pin:?}"),
        }
    }
}
