//! Outbound lifecycle events.
//!
//! The [`AgentService`](super::service::AgentService) emits these through
//! the [`EventSink`](super::ports::EventSink) port. Adapters on the other
//! side decide what to do with them (serial log, telemetry topic, ...).

use crate::config::AppVersion;
use crate::ota::{OtaState, OtaStatistics};

/// Structured events emitted by the lifecycle loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentEvent {
    /// The loop has started the update engine.
    Started(AppVersion),

    /// Periodic update-engine statistics.
    Statistics(OtaStatistics),

    /// The engine reached `Suspended`.
    Suspended,

    /// The engine left `Suspended`.
    Resumed(OtaState),

    /// An `exit` job asked the device to shut down.
    ExitRequested,

    /// A relay PUBLISH of a custom job failed.
    RelayFailed,

    /// The engine reached `Stopped` and its thread was joined.
    Stopped(OtaStatistics),
}
