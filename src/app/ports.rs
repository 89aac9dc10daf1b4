//! Port traits: the hexagonal boundary between the bridge's domain logic
//! and the outside world.
//!
//! ```text
//!   Adapter ──▶ Port trait ──▶ AgentService / OtaAgent (domain)
//! ```
//!
//! | Port | Implemented by | Consumed by |
//! |------|----------------|-------------|
//! | [`UpdateEngine`] | `ota::agent::OtaAgent` | Inbound Dispatch, `AgentCallback`, `AgentService` |
//! | [`ImagePlatform`] | `ota::pal::FlashPal` | `OtaAgent` |
//! | [`OtaConnection`] | `dispatch::BridgeConnection` | `OtaAgent` |
//! | [`OtaAppCallback`] | `app::callback::AgentCallback` | `OtaAgent` |
//! | [`EventSink`] | `adapters::log_sink::LogEventSink` | `AgentService` |
//! | [`ConfigPort`] | `adapters::nvs::NvsAdapter` | binary start-up |
//!
//! ## Security notes
//!
//! - **ConfigPort** implementations MUST validate before persisting.
//! - **ImagePlatform** implementations MUST NOT mark an image bootable
//!   before `close_file` has accepted it.

use crate::config::AgentConfig;
use crate::error::{OtaError, OtaMqttError};
use crate::mqtt::agent::QoS;
use crate::ota::{FileContext, ImageState, OtaEvent, OtaJobEvent, OtaState, OtaStatistics, PlatformImageState};

// ───────────────────────────────────────────────────────────────
// Update engine port (driving: domain → engine)
// ───────────────────────────────────────────────────────────────

/// The externally driven firmware-update engine.
pub trait UpdateEngine: Send + Sync {
    /// Queue an event without blocking. Hands the event back when the
    /// queue is full so the caller can recover any buffer it carries.
    fn signal_event(&self, event: OtaEvent) -> Result<(), OtaEvent>;

    /// Event-processing loop. Entered once; returns after shutdown.
    fn process_events(&self);

    fn state(&self) -> OtaState;

    fn statistics(&self) -> OtaStatistics;

    /// Request suspension. The state changes once the loop handles it.
    fn suspend(&self) -> Result<(), OtaError>;

    /// Request resumption of a suspended engine.
    fn resume(&self) -> Result<(), OtaError>;

    /// Request an orderly stop.
    fn shutdown(&self);

    /// Activate the image completed by the last job.
    fn activate_new_image(&self) -> Result<(), OtaError>;

    fn set_image_state(&self, state: ImageState) -> Result<(), OtaError>;

    fn image_state(&self) -> ImageState;
}

// ───────────────────────────────────────────────────────────────
// Platform port (driven: engine → flash)
// ───────────────────────────────────────────────────────────────

/// Image write/activate primitives.
pub trait ImagePlatform: Send {
    /// Open the inactive image slot for `file`.
    fn create_file(&mut self, file: &FileContext) -> Result<(), OtaError>;

    /// Write `data` at byte `offset`. Offsets must be sequential.
    fn write_block(&mut self, offset: u32, data: &[u8]) -> Result<(), OtaError>;

    /// Finish the image; it becomes bootable only through [`activate`](Self::activate).
    fn close_file(&mut self) -> Result<(), OtaError>;

    /// Discard a partly written image.
    fn abort(&mut self) -> Result<(), OtaError>;

    /// Make the closed image the boot image and restart into it.
    fn activate(&mut self) -> Result<(), OtaError>;

    fn reset(&mut self) -> Result<(), OtaError>;

    fn image_state(&self) -> PlatformImageState;

    fn set_image_state(&mut self, state: ImageState) -> Result<(), OtaError>;
}

// ───────────────────────────────────────────────────────────────
// Connection port (driven: engine → MQTT)
// ───────────────────────────────────────────────────────────────

/// Blocking MQTT primitives used by the engine.
pub trait OtaConnection: Send + Sync {
    fn subscribe(&self, topic_filter: &str, qos: QoS) -> Result<(), OtaMqttError>;

    fn unsubscribe(&self, topic_filter: &str, qos: QoS) -> Result<(), OtaMqttError>;

    fn publish(&self, topic: &str, payload: &[u8], qos: QoS) -> Result<(), OtaMqttError>;
}

// ───────────────────────────────────────────────────────────────
// Application callback port (driven: engine → application)
// ───────────────────────────────────────────────────────────────

/// Receives engine life-cycle notifications on the engine's thread.
pub trait OtaAppCallback: Send + Sync {
    fn on_job_event(&self, engine: &dyn UpdateEngine, event: OtaJobEvent);
}

// ───────────────────────────────────────────────────────────────
// Event sink port (driven: domain → logging / telemetry)
// ───────────────────────────────────────────────────────────────

/// The lifecycle loop emits structured [`AgentEvent`](super::events::AgentEvent)s
/// through this port.
pub trait EventSink {
    fn emit(&mut self, event: &super::events::AgentEvent);
}

// ───────────────────────────────────────────────────────────────
// Configuration port (driven: domain ↔ persistent config)
// ───────────────────────────────────────────────────────────────

/// Loads and persists the agent configuration.
///
/// # Security
///
/// Implementations MUST validate config values before persisting.
/// Invalid ranges are rejected with [`ConfigError::ValidationFailed`],
/// not silently clamped.
pub trait ConfigPort {
    /// Load configuration from persistent storage.
    /// Returns [`AgentConfig::default()`] if no stored config exists.
    fn load(&self) -> Result<AgentConfig, ConfigError>;

    /// Validate and persist configuration.
    fn save(&mut self, config: &AgentConfig) -> Result<(), ConfigError>;
}

/// Errors from [`ConfigPort`] operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// No config found in storage (first boot).
    NotFound,
    /// Stored config failed deserialization.
    Corrupted,
    /// A config field failed range validation.
    ValidationFailed(&'static str),
    /// Generic I/O error from the storage backend.
    IoError,
}

impl core::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NotFound => write!(f, "config not found"),
            Self::Corrupted => write!(f, "config corrupted"),
            Self::ValidationFailed(msg) => write!(f, "validation failed: {}", msg),
            Self::IoError => write!(f, "I/O error"),
        }
    }
}
