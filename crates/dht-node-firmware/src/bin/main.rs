#![no_std]
#![no_main]
#![deny(
    clippy::mem_forget,
    reason = "mem::forget is generally not safe to do with esp_hal types, especially those \
    holding buffers for the duration of a data transfer."
)]
#![deny(clippy::large_stack_frames)]

use dht_node_core::connectivity::ConnectivityManager;
use dht_node_core::control::ControlSurface;
use dht_node_core::logging::{MemoryLogStore, NodeLogger};
use dht_node_core::runtime::RuntimeLoop;
use dht_node_core::sensors::Dht11;
use dht_node_core::telemetry::TelemetryPublisher;
use embassy_executor::Spawner;
use embassy_net::tcp::TcpSocket;
use embassy_net::{Runner, StackResources};
use embassy_sync::blocking_mutex::raw::NoopRawMutex;
use embassy_sync::mutex::Mutex;
use embassy_time::{Duration, Timer};
use embedded_hal_bus::spi::{ExclusiveDevice, NoDelay};
use embedded_sdmmc::SdCard;
use esp_hal::Blocking;
use esp_hal::clock::CpuClock;
use esp_hal::delay::Delay;
use esp_hal::gpio::{Flex, Level, Output, OutputConfig};
use esp_hal::rng::Rng;
use esp_hal::spi::master::{Config, Spi};
use esp_hal::time::Rate;
use esp_hal::timer::timg::TimerGroup;
use esp_radio::wifi::WifiDevice;
use log::{info, warn};
use rtt_target::rprintln;
use static_cell::StaticCell;

use dht_node_firmware::board::{self, EspClock, EspPlatform, RttConsole};
use dht_node_firmware::config::{LOG_FILE_NAME, node_config};
use dht_node_firmware::dht_line::FlexLine;
use dht_node_firmware::listener::SocketListener;
use dht_node_firmware::log_store::{FirmwareLogStore, FixedTime, SdCardLogStore};
use dht_node_firmware::mqtt::{MqttBroker, PACKET_BUFFER_SIZE};
use dht_node_firmware::pins::{FreePins, PinBank};
use dht_node_firmware::socket::NetSocket;
use dht_node_firmware::wifi::RadioLink;

const SOCKET_BUFFER_SIZE: usize = 2048;
/// Entries kept in RAM when no SD card answers
const MEMORY_LOG_CAPACITY: usize = 64;

type SdSpi = ExclusiveDevice<Spi<'static, Blocking>, Output<'static>, NoDelay>;
type LogStoreType = FirmwareLogStore<SdCard<SdSpi, Delay>, FixedTime>;

static RTT_CONSOLE: RttConsole = RttConsole;
static LOGGER: StaticCell<NodeLogger<LogStoreType>> = StaticCell::new();
static RADIO: StaticCell<esp_radio::Controller<'static>> = StaticCell::new();
// DHCP, DNS, the control listener and the broker connection
static NET_RESOURCES: StaticCell<StackResources<4>> = StaticCell::new();
static HTTP_RX: StaticCell<[u8; SOCKET_BUFFER_SIZE]> = StaticCell::new();
static HTTP_TX: StaticCell<[u8; SOCKET_BUFFER_SIZE]> = StaticCell::new();
static MQTT_RX: StaticCell<[u8; SOCKET_BUFFER_SIZE]> = StaticCell::new();
static MQTT_TX: StaticCell<[u8; SOCKET_BUFFER_SIZE]> = StaticCell::new();
static MQTT_SEND: StaticCell<[u8; PACKET_BUFFER_SIZE]> = StaticCell::new();
static MQTT_RECV: StaticCell<[u8; PACKET_BUFFER_SIZE]> = StaticCell::new();

#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    rprintln!("PANIC: {}", info);
    esp_hal::system::software_reset()
}

extern crate alloc;

// This creates a default app-descriptor required by the esp-idf bootloader.
// For more information see: <https://docs.espressif.com/projects/esp-idf/en/stable/esp32/api-reference/system/app_image_format.html#application-description>
esp_bootloader_esp_idf::esp_app_desc!();

#[embassy_executor::task]
async fn net_task(mut runner: Runner<'static, WifiDevice<'static>>) {
    runner.run().await
}

#[allow(
    clippy::large_stack_frames,
    reason = "it's not unusual to allocate larger buffers etc. in main"
)]
#[esp_rtos::main]
async fn main(spawner: Spawner) -> ! {
    rtt_target::rtt_init_print!();

    let hal_config = esp_hal::Config::default().with_cpu_clock(CpuClock::max());
    let peripherals = esp_hal::init(hal_config);

    esp_alloc::heap_allocator!(#[esp_hal::ram(reclaimed)] size: 73744);

    let timg0 = TimerGroup::new(peripherals.TIMG0);
    esp_rtos::start(timg0.timer0);

    let config = node_config();
    config.check_pins().expect("Conflicting GPIO assignments");
    let mut pins = PinBank::new(FreePins {
        gpio1: peripherals.GPIO1,
        gpio2: peripherals.GPIO2,
        gpio3: peripherals.GPIO3,
        gpio4: peripherals.GPIO4,
        gpio5: peripherals.GPIO5,
        gpio6: peripherals.GPIO6,
        gpio7: peripherals.GPIO7,
        gpio8: peripherals.GPIO8,
        gpio9: peripherals.GPIO9,
        gpio14: peripherals.GPIO14,
        gpio15: peripherals.GPIO15,
        gpio16: peripherals.GPIO16,
        gpio17: peripherals.GPIO17,
        gpio18: peripherals.GPIO18,
        gpio21: peripherals.GPIO21,
    });

    // Persistent log: SD card over SPI2, RAM if no card answers
    let spi_bus = Spi::new(peripherals.SPI2, Config::default().with_frequency(Rate::from_khz(400)))
        .expect("Failed to configure SPI bus")
        .with_sck(peripherals.GPIO12)
        .with_mosi(peripherals.GPIO11)
        .with_miso(peripherals.GPIO13);
    let sd_cs = Output::new(peripherals.GPIO10, Level::High, OutputConfig::default());
    let sd_device = ExclusiveDevice::new_no_delay(spi_bus, sd_cs).expect("Failed to set up SD chip select");
    let sd_card = SdCard::new(sd_device, Delay::new());
    let store = match sd_card.num_bytes() {
        Ok(bytes) => {
            rprintln!("SD card found ({} bytes)", bytes);
            FirmwareLogStore::SdCard(SdCardLogStore::new(sd_card, FixedTime, LOG_FILE_NAME))
        }
        Err(e) => {
            rprintln!("No SD card ({:?}); log kept in RAM", e);
            FirmwareLogStore::Memory(MemoryLogStore::new(MEMORY_LOG_CAPACITY))
        }
    };

    let logger: &'static NodeLogger<LogStoreType> = LOGGER.init(NodeLogger::new(
        &RTT_CONSOLE,
        board::uptime,
        config.log.max_severity,
        store,
    ));
    if logger.install().is_err() {
        rprintln!("Logger already installed");
    }
    dht_node_core::durable!(info, "dht-node-firmware {} booted", env!("CARGO_PKG_VERSION"));

    // WiFi and network stack
    let radio = RADIO.init(esp_radio::init().expect("Failed to initialize Wi-Fi/BLE controller"));
    let (wifi_controller, interfaces) = esp_radio::wifi::new(radio, peripherals.WIFI, Default::default())
        .expect("Failed to initialize Wi-Fi controller");

    let rng = Rng::new();
    let seed = (u64::from(rng.random()) << 32) | u64::from(rng.random());
    let (stack, runner) = embassy_net::new(
        interfaces.sta,
        embassy_net::Config::dhcpv4(Default::default()),
        NET_RESOURCES.init(StackResources::new()),
        seed,
    );
    spawner.spawn(net_task(runner).expect("net_task spawned twice"));

    let http_socket = TcpSocket::new(
        stack,
        HTTP_RX.init([0; SOCKET_BUFFER_SIZE]),
        HTTP_TX.init([0; SOCKET_BUFFER_SIZE]),
    );
    let mqtt_socket = Mutex::<NoopRawMutex, _>::new(TcpSocket::new(
        stack,
        MQTT_RX.init([0; SOCKET_BUFFER_SIZE]),
        MQTT_TX.init([0; SOCKET_BUFFER_SIZE]),
    ));

    let dht_pin = pins.take(config.sensor.pin).expect("DHT data pin unavailable");
    let sensor = Dht11::new(
        FlexLine::new(Flex::new(dht_pin)),
        EspClock,
        Delay::new(),
        config.sensor.min_interval(),
    );

    let link_pin = pins.take(config.indicators.link_pin).expect("Link LED pin unavailable");
    let command_pin = pins.take(config.indicators.command_pin).expect("Command LED pin unavailable");
    let link_led = Output::new(link_pin, Level::Low, OutputConfig::default());
    let command_led = Output::new(command_pin, Level::Low, OutputConfig::default());

    let telemetry = TelemetryPublisher::new(
        MqttBroker::new(
            stack,
            &mqtt_socket,
            MQTT_SEND.init([0; PACKET_BUFFER_SIZE]),
            MQTT_RECV.init([0; PACKET_BUFFER_SIZE]),
            &config.broker,
        ),
        command_led,
        &config.broker,
        &config.telemetry,
    );
    let connectivity = ConnectivityManager::new(RadioLink::new(wifi_controller, stack), link_led, &config.wifi);
    let control = ControlSurface::new(
        SocketListener::new(stack, NetSocket::new(http_socket)),
        logger,
        config.listen_port,
    );

    info!("Starting runtime loop");
    let node = RuntimeLoop::new(
        sensor,
        telemetry,
        connectivity,
        control,
        EspPlatform,
        EspClock,
        embassy_time::Delay,
        config.cycle_period_ms,
    );
    node.run().await;

    warn!("Application terminated; idling until reset");
    loop {
        Timer::after(Duration::from_secs(60)).await;
    }
}
