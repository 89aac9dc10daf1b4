//! OtaBridge firmware entry point.
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                      Adapters (outer ring)                     │
//! │                                                                │
//! │  WifiAdapter       EspMqttAgent    NvsAdapter    LogEventSink  │
//! │  (Connectivity)    (MqttAgent)     (ConfigPort)  (EventSink)   │
//! │  FlashPal (ImagePlatform)                                      │
//! │                                                                │
//! │  ──────────────── Port Trait Boundary ───────────────────      │
//! │                                                                │
//! │  ┌────────────────────────────────────────────────────────┐    │
//! │  │   OtaRuntime: CommandBridge · InboundDispatch          │    │
//! │  │   OtaAgent · JobWorker · AgentService                  │    │
//! │  └────────────────────────────────────────────────────────┘    │
//! └────────────────────────────────────────────────────────────────┘
//! ```
#![deny(unused_must_use)]

use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use esp_idf_svc::eventloop::EspSystemEventLoop;
use esp_idf_svc::hal::peripherals::Peripherals;
use esp_idf_svc::nvs::EspDefaultNvsPartition;
use esp_idf_svc::wifi::{BlockingWifi, EspWifi};
use log::{error, info, warn};

use otabridge::adapters::device_id;
use otabridge::adapters::esp_mqtt::EspMqttAgent;
use otabridge::adapters::log_sink::LogEventSink;
use otabridge::adapters::nvs::NvsAdapter;
use otabridge::adapters::wifi::{ConnectivityPort, WifiAdapter};
use otabridge::app::ports::ConfigPort;
use otabridge::config::AgentConfig;
use otabridge::mqtt::agent::MqttAgent;
use otabridge::ota::pal::FlashPal;
use otabridge::runtime::OtaRuntime;

const WIFI_SSID_KEY: &str = "wifi_ssid";
const WIFI_PASS_KEY: &str = "wifi_pass";

fn main() -> Result<()> {
    // ── 1. ESP-IDF bootstrap ──────────────────────────────────
    esp_idf_svc::sys::link_patches();
    esp_idf_logger::init()?;

    info!("╔══════════════════════════════════════╗");
    info!("║  OtaBridge v{}                    ║", env!("CARGO_PKG_VERSION"));
    info!("╚══════════════════════════════════════╝");

    // ── 2. Load config from NVS (or defaults) ─────────────────
    let mut nvs = NvsAdapter::new().map_err(|e| anyhow!("NVS init failed: {}", e))?;
    let config = match nvs.load() {
        Ok(c) => c,
        Err(e) => {
            warn!("Config load failed ({}), using defaults", e);
            let defaults = AgentConfig::default();
            if let Err(e) = nvs.save(&defaults) {
                warn!("Config reset not persisted: {}", e);
            }
            defaults
        }
    };
    let thing_name = device_id::resolve_thing_name(&config.thing_name);
    info!("Thing name: {}", thing_name);

    // ── 3. Network ────────────────────────────────────────────
    let peripherals = Peripherals::take().context("peripherals already taken")?;
    let sysloop = EspSystemEventLoop::take()?;
    let nvs_partition = EspDefaultNvsPartition::take()?;
    let driver = EspWifi::new(peripherals.modem, sysloop.clone(), Some(nvs_partition))?;
    let mut wifi = WifiAdapter::new(BlockingWifi::wrap(driver, sysloop)?);

    let ssid = nvs
        .read_credential(WIFI_SSID_KEY)
        .ok()
        .flatten()
        .or_else(|| option_env!("WIFI_SSID").map(str::to_owned))
        .context("no WiFi SSID provisioned")?;
    let password = nvs
        .read_credential(WIFI_PASS_KEY)
        .ok()
        .flatten()
        .or_else(|| option_env!("WIFI_PASS").map(str::to_owned))
        .unwrap_or_default();
    wifi.set_credentials(&ssid, &password)
        .map_err(|e| anyhow!("WiFi credentials: {}", e))?;
    wifi.connect().map_err(|e| anyhow!("WiFi: {}", e))?;

    // ── 4. MQTT agent + runtime ───────────────────────────────
    let agent = EspMqttAgent::start(&config.broker_url, &thing_name)
        .map_err(|e| anyhow!("MQTT agent start failed: {}", e))?;
    let runtime = OtaRuntime::new(config, agent as Arc<dyn MqttAgent>, FlashPal::new())?;

    info!("System ready. Entering lifecycle loop.");

    // ── 5. Lifecycle loop ─────────────────────────────────────
    let mut log_sink = LogEventSink::new();
    let summary = runtime.run(&mut log_sink)?;

    if summary.exit_requested {
        info!("Exit requested by job");
    }
    if summary.failed() {
        error!("{} relay publish(es) failed", summary.relay_failures);
    }
    wifi.disconnect();
    info!("OtaBridge finished");
    Ok(())
}
