#![no_std]
#![no_main]
#![deny(
    clippy::mem_forget,
    reason = "mem::forget is generally not safe to do with esp_hal types, especially those \
    holding buffers for the duration of a data transfer."
)]
#![feature(type_alias_impl_trait)]

use defmt::{error, info, warn};
use embassy_executor::Spawner;
use embassy_net::{Config, IpAddress, Ipv4Address, Runner, Stack, StackResources};
use embassy_time::{Delay, Duration, Timer};
use esp_backtrace as _;
use esp_hal::analog::adc::{Adc, AdcConfig, Attenuation};
use esp_hal::clock::CpuClock;
use esp_hal::gpio::{Level, Output, OutputConfig};
use esp_hal::timer::timg::TimerGroup;
use esp_wifi::wifi::{
    ClientConfiguration, Configuration, WifiController, WifiDevice, WifiEvent, WifiState,
};
use esp_wifi::{init, EspWifiController};
use smoltcp::wire::DnsQueryType;
use solar_tracker_core::h_bridge::DEFAULT_PULSE_MS;
use solar_tracker_core::{CycleScheduler, HBridge, TelemetryConfig, TrackerConfig};
use solar_tracker_firmware::tracker::sensors_manager::AdcSensorsManager;
use solar_tracker_firmware::utils::channels::{ActionChannel, ActionSub};
use solar_tracker_firmware::utils::mqtt_manager::{self, MqttTelemetryTransport};
use solar_tracker_firmware::utils::protocol::Presence;
use solar_tracker_firmware::utils::topics;

// When you are okay with using a nightly compiler it's better to use https://docs.rs/static_cell/2.1.0/static_cell/macro.make_static.html
macro_rules! mk_static {
    ($t:ty,$val:expr) => {{
        static STATIC_CELL: static_cell::StaticCell<$t> = static_cell::StaticCell::new();
        #[deny(unused_attributes)]
        let x = STATIC_CELL.uninit().write(($val));
        x
    }};
}

// This creates a default app-descriptor required by the esp-idf bootloader.
// For more information see: <https://docs.espressif.com/projects/esp-idf/en/stable/esp32/api-reference/system/app_image_format.html#application-description>
esp_bootloader_esp_idf::esp_app_desc!();

const SSID: &str = env!("SSID");
const PASSWORD: &str = env!("PASSWORD");
// ThingsBoard device access token
const MQTT_TOKEN: &str = env!("MQTT_TOKEN");

const MQTT_BROKER_HOST: &str = "demo.thingsboard.io";
const MQTT_BROKER_PORT: u16 = 1883;
const MQTT_CLIENT_ID: &str = "solar-tracker";

#[esp_hal_embassy::main]
async fn main(spawner: Spawner) -> ! {
    // generator version: 0.4.0

    rtt_target::rtt_init_defmt!();

    let config = esp_hal::Config::default().with_cpu_clock(CpuClock::max());
    let peripherals = esp_hal::init(config);

    esp_alloc::heap_allocator!(size: 72 * 1024);

    let timer0 = TimerGroup::new(peripherals.TIMG1);
    esp_hal_embassy::init(timer0.timer0);

    info!("Embassy initialized!");
    info!("Free memory: {} bytes", esp_alloc::HEAP.free());

    let tracker_config = TrackerConfig {
        telemetry: TelemetryConfig {
            topic: topics::DEVICE_TELEMETRY_TOPIC,
            ..TelemetryConfig::default()
        },
        ..TrackerConfig::default()
    };

    // Motor bridge and status LED, all off before anything else runs
    let q1 = Output::new(peripherals.GPIO25, Level::Low, OutputConfig::default());
    let q2 = Output::new(peripherals.GPIO26, Level::Low, OutputConfig::default());
    let q3 = Output::new(peripherals.GPIO27, Level::Low, OutputConfig::default());
    let q4 = Output::new(peripherals.GPIO14, Level::Low, OutputConfig::default());
    let led = Output::new(peripherals.GPIO22, Level::Low, OutputConfig::default());
    let actuator = HBridge::new(q1, q2, q3, q4, led, Delay, DEFAULT_PULSE_MS)
        .expect("Failed to initialize motor bridge");

    let mut adc1_config = AdcConfig::new();
    let left_ldr = adc1_config.enable_pin(peripherals.GPIO32, Attenuation::_11dB);
    let right_ldr = adc1_config.enable_pin(peripherals.GPIO33, Attenuation::_11dB);
    let panel = adc1_config.enable_pin(peripherals.GPIO35, Attenuation::_11dB);
    let adc1 = Adc::new(peripherals.ADC1, adc1_config);
    let sensors = AdcSensorsManager::new(adc1, left_ldr, right_ldr, panel);

    let mut rng = esp_hal::rng::Rng::new(peripherals.RNG);
    let timer1 = TimerGroup::new(peripherals.TIMG0);
    let wifi_init = &*mk_static!(
        EspWifiController<'static>,
        init(timer1.timer0, rng.clone(), peripherals.RADIO_CLK)
            .expect("Failed to initialize WIFI/BLE controller")
    );

    let (wifi_controller, interfaces) = esp_wifi::wifi::new(&wifi_init, peripherals.WIFI)
        .expect("Failed to initialize WIFI controller");
    let wifi_interface = interfaces.sta;

    let config = Config::dhcpv4(Default::default());
    let seed = (rng.random() as u64) << 32 | rng.random() as u64;
    let (stack, runner) = embassy_net::new(
        wifi_interface,
        config,
        mk_static!(StackResources::<3>, StackResources::<3>::new()),
        seed,
    );

    let action_channel = mk_static!(ActionChannel, ActionChannel::new());
    let action_pub = action_channel
        .publisher()
        .expect("Failed to create MQTT action publisher");
    let action_sub = action_channel
        .subscriber()
        .expect("Failed to create MQTT action subscriber");

    let presence = Presence {
        online: true,
        firmware: env!("CARGO_PKG_VERSION"),
        dark_threshold: tracker_config.dark_threshold,
    };

    spawner.spawn(connection(wifi_controller)).ok();
    spawner.spawn(net_task(runner)).ok();
    spawner
        .spawn(broker_task(spawner, stack, action_sub, presence))
        .ok();
    spawner.spawn(system_health_monitor()).ok();

    // Tracking does not wait for the network; telemetry is dropped until the broker is up
    let transport = MqttTelemetryTransport::new(action_pub);
    let mut scheduler = CycleScheduler::new(tracker_config, sensors, actuator, transport, Delay)
        .expect("Invalid tracker configuration");

    scheduler.run().await
}

async fn wait_for_connection(stack: Stack<'_>) {
    info!("Waiting for link to be up");
    loop {
        if stack.is_link_up() {
            break;
        }
        Timer::after(Duration::from_millis(500)).await;
    }

    info!("Waiting to get IP address...");
    loop {
        if let Some(config) = stack.config_v4() {
            info!("Got IP: {}", config.address);
            break;
        }
        Timer::after(Duration::from_millis(500)).await;
    }
}

async fn resolve_broker(stack: Stack<'_>) -> Ipv4Address {
    loop {
        match stack.dns_query(MQTT_BROKER_HOST, DnsQueryType::A).await {
            Ok(addresses) => {
                if let Some(IpAddress::Ipv4(address)) = addresses.first().copied() {
                    info!("Resolved {} to {}", MQTT_BROKER_HOST, address);
                    return address;
                }
                warn!("No A record for {}", MQTT_BROKER_HOST);
            }
            Err(e) => error!("DNS query for {} failed: {}", MQTT_BROKER_HOST, e),
        }
        Timer::after(Duration::from_secs(5)).await;
    }
}

#[embassy_executor::task]
async fn broker_task(
    spawner: Spawner,
    stack: Stack<'static>,
    action_sub: ActionSub,
    presence: Presence,
) {
    wait_for_connection(stack).await;
    let host = resolve_broker(stack).await;

    info!("Connecting to MQTT broker at {}:{}", host, MQTT_BROKER_PORT);
    mqtt_manager::init(
        &spawner,
        stack,
        MQTT_CLIENT_ID,
        MQTT_TOKEN,
        action_sub,
        presence,
        host,
        MQTT_BROKER_PORT,
    )
    .await;
}

// maintains wifi connection, when it disconnects it tries to reconnect
#[embassy_executor::task]
async fn connection(mut controller: WifiController<'static>) {
    info!("start connection task");
    loop {
        match esp_wifi::wifi::wifi_state() {
            WifiState::StaConnected => {
                // wait until we're no longer connected
                controller.wait_for_event(WifiEvent::StaDisconnected).await;
                info!("Wifi lost connection");
                Timer::after(Duration::from_millis(5000)).await
            }
            _ => {}
        }
        if !matches!(controller.is_started(), Ok(true)) {
            let client_config = Configuration::Client(ClientConfiguration {
                ssid: SSID.try_into().unwrap(),
                password: PASSWORD.try_into().unwrap(),
                ..Default::default()
            });
            controller.set_configuration(&client_config).unwrap();
            info!("Starting wifi");
            controller.start_async().await.unwrap();
            info!("Wifi started!");
        }
        info!("About to connect...");

        match embassy_time::with_timeout(Duration::from_secs(30), controller.connect_async()).await {
            Ok(Ok(_)) => info!("Wifi connected!"),
            Ok(Err(e)) => {
                error!("Failed to connect to wifi: {}", e);
                Timer::after(Duration::from_millis(5000)).await
            },
            Err(_) => {
                error!("Wifi connection timeout");
                Timer::after(Duration::from_millis(5000)).await
            }
        }
    }
}

#[embassy_executor::task]
async fn net_task(mut runner: Runner<'static, WifiDevice<'static>>) {
    runner.run().await
}

#[embassy_executor::task]
async fn system_health_monitor() {
    loop {
        let free_heap = esp_alloc::HEAP.free();
        let used_heap = esp_alloc::HEAP.used();

        info!(
            "Heap status - Free: {} bytes, Used: {} bytes, Total: {} bytes, MQTT: {}",
            free_heap,
            used_heap,
            free_heap + used_heap,
            mqtt_manager::is_connected()
        );

        // Less than 8KB free
        if free_heap < 8192 {
            error!("Low memory warning: only {} bytes free", free_heap);
        }

        Timer::after(Duration::from_secs(30)).await;
    }
}
