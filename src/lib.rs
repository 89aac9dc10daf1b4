//! OTA / device-jobs control-plane bridge.
//!
//! Several independent tasks (the update engine, the job worker, the
//! lifecycle loop) share one asynchronous MQTT agent connection. The
//! library exposes every piece for integration testing on the host; all
//! ESP-IDF-specific code is guarded by `#[cfg(target_os = "espidf")]`
//! within each module.

#![deny(unused_must_use)]

pub mod adapters;
pub mod app;
pub mod config;
pub mod dispatch;
pub mod drivers;
pub mod error;
pub mod esp_link_shims;
pub mod events;
pub mod jobs;
pub mod mqtt;
pub mod ota;
pub mod pool;
pub mod runtime;
