//! Agent configuration parameters
//!
//! All tunable parameters for the OTA/jobs bridge. Values can be
//! overridden via NVS (see [`crate::adapters::nvs`]); everything else in
//! this file is a fixed protocol constant.

use core::fmt;

use serde::{Deserialize, Serialize};

// ── Protocol constants ────────────────────────────────────────

/// Control-plane topic prefix shared by the jobs and streams services.
pub const TOPIC_PREFIX: &str = "$aws/things/";
/// Category keyword for the device-jobs service.
pub const JOBS_KEYWORD: &str = "jobs";
/// Category keyword for the file-stream service.
pub const STREAMS_KEYWORD: &str = "streams";
/// Job identifiers with this prefix belong to the update engine.
pub const OTA_JOB_PREFIX: &str = "AFR_OTA";

/// Longest thing name accepted by the broker.
pub const MAX_THING_NAME_LEN: usize = 128;
/// Longest job identifier accepted by the jobs service.
pub const MAX_JOB_ID_LEN: usize = 64;
/// Staging capacity for a custom job document.
pub const MAX_JOB_DOC_LEN: usize = 2048;
/// Caller-owned storage for the file path of an update.
pub const MAX_FILE_PATH_LEN: usize = 260;
/// Caller-owned storage for the stream name of an update.
pub const MAX_STREAM_NAME_LEN: usize = 128;
/// Longest topic or topic filter built or stored by this crate.
pub const MAX_TOPIC_LEN: usize = 256;
/// Subscription registry capacity.
pub const MAX_SUBSCRIPTIONS: usize = 10;
/// Depth of the update engine's event queue.
pub const EVENT_QUEUE_DEPTH: usize = 16;
/// Bytes prepended to every file block (little-endian block index).
pub const BLOCK_HEADER_LEN: usize = 4;

pub type ThingName = heapless::String<MAX_THING_NAME_LEN>;

/// Firmware version reported at start-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppVersion {
    pub major: u8,
    pub minor: u8,
    pub build: u16,
}

impl fmt::Display for AppVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.build)
    }
}

/// Core agent configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    // --- Identity ---
    /// Thing name used in every topic. Empty means "derive from MAC".
    pub thing_name: ThingName,
    /// Broker URL (ESP-IDF binary only)
    pub broker_url: heapless::String<128>,

    // --- Timing ---
    /// Completion timeout for bridge operations (milliseconds)
    pub mqtt_timeout_ms: u32,
    /// Statistics report and lifecycle poll period (milliseconds)
    pub stats_interval_ms: u32,

    // --- Transfer ---
    /// File block size is `1 << log2_block_size` bytes
    pub log2_block_size: u8,
    /// Number of blocks asked for per stream request
    pub blocks_per_request: u8,
    /// Number of receive buffers in the pool
    pub data_buffers: u8,

    // --- Jobs ---
    /// Report FAILED for job documents with an unknown action
    pub report_unknown_actions: bool,

    pub app_version: AppVersion,
}

impl AgentConfig {
    /// File block size in bytes.
    pub fn block_size(&self) -> usize {
        1usize << self.log2_block_size
    }

    /// Largest inbound payload accepted on either receive path, and the
    /// size of every pool slot.
    pub fn max_block_size(&self) -> usize {
        self.block_size() + BLOCK_HEADER_LEN
    }

    pub fn mqtt_timeout(&self) -> core::time::Duration {
        core::time::Duration::from_millis(u64::from(self.mqtt_timeout_ms))
    }

    pub fn stats_interval(&self) -> core::time::Duration {
        core::time::Duration::from_millis(u64::from(self.stats_interval_ms))
    }

    /// Range-check every field. Returns the name of the first bad field.
    pub fn validate(&self) -> Result<(), &'static str> {
        if !(8..=14).contains(&self.log2_block_size) {
            return Err("log2_block_size must be 8–14");
        }
        if self.blocks_per_request == 0 || self.blocks_per_request > 32 {
            return Err("blocks_per_request must be 1–32");
        }
        if self.data_buffers == 0 || self.data_buffers > 16 {
            return Err("data_buffers must be 1–16");
        }
        if !(100..=60_000).contains(&self.mqtt_timeout_ms) {
            return Err("mqtt_timeout_ms must be 100–60000");
        }
        if !(10..=60_000).contains(&self.stats_interval_ms) {
            return Err("stats_interval_ms must be 10–60000");
        }
        if self.thing_name.contains(['/', '+', '#']) {
            return Err("thing_name must not contain topic separators or wildcards");
        }
        Ok(())
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        let mut broker_url = heapless::String::new();
        let _ = broker_url.push_str("mqtts://localhost:8883");
        Self {
            // Identity
            thing_name: ThingName::new(),
            broker_url,

            // Timing
            mqtt_timeout_ms: 5000,
            stats_interval_ms: 1000,

            // Transfer
            log2_block_size: 12, // 4 KiB blocks
            blocks_per_request: 4,
            data_buffers: 4,

            // Jobs
            report_unknown_actions: true,

            app_version: AppVersion {
                major: 0,
                minor: 9,
                build: 2,
            },
        }
    }
}
