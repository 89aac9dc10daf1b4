//! Adapters: concrete implementations of the hexagonal port traits.
//!
//! | Adapter     | Implements        | Connects to                 |
//! |-------------|-------------------|-----------------------------|
//! | `device_id` | (thing name)      | ESP32 eFuse MAC             |
//! | `esp_mqtt`  | MqttAgent         | ESP-IDF MQTT client         |
//! | `log_sink`  | EventSink         | Serial log output           |
//! | `nvs`       | ConfigPort        | NVS / in-memory store       |
//! | `wifi`      | ConnectivityPort  | ESP-IDF WiFi STA            |

pub mod device_id;
#[cfg(target_os = "espidf")]
pub mod esp_mqtt;
pub mod log_sink;
pub mod nvs;
pub mod wifi;
