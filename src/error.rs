//! Unified error types for the OTA/jobs bridge.
//!
//! A single `Error` enum that every subsystem can convert into, keeping the
//! top-level lifecycle loop's error handling uniform. All variants are
//! `Copy` so they can be stored in a completion signal and passed across
//! threads without allocation.

use core::fmt;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Every fallible operation in the crate funnels into this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// A transport operation failed or timed out.
    Mqtt(MqttError),
    /// The update engine or image platform failed.
    Ota(OtaError),
    /// A job message violated the jobs protocol.
    Job(JobError),
    /// Configuration is invalid or could not be loaded.
    Config(&'static str),
    /// Start-up wiring failed.
    Init(&'static str),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mqtt(e) => write!(f, "mqtt: {e}"),
            Self::Ota(e) => write!(f, "ota: {e}"),
            Self::Job(e) => write!(f, "job: {e}"),
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Init(msg) => write!(f, "init: {msg}"),
        }
    }
}

impl std::error::Error for Error {}

// ---------------------------------------------------------------------------
// Transport errors
// ---------------------------------------------------------------------------

/// Result codes of the asynchronous MQTT agent.
///
/// `BadParameter`, `NoMemory` and `IllegalState` are reported at enqueue
/// time. `RecvFailed` is what the command bridge synthesizes when no
/// completion arrives within its timeout. The rest arrive through the
/// completion callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MqttError {
    /// A required argument was empty or malformed.
    BadParameter,
    /// The agent's command queue had no room.
    NoMemory,
    /// The packet could not be sent.
    SendFailed,
    /// No acknowledgement was received in time.
    RecvFailed,
    /// The broker answered with an unexpected packet.
    BadResponse,
    /// The broker refused the operation (e.g. SUBACK failure).
    ServerRefused,
    /// The connection has been terminated.
    IllegalState,
}

impl fmt::Display for MqttError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadParameter => write!(f, "bad parameter"),
            Self::NoMemory => write!(f, "agent command queue full"),
            Self::SendFailed => write!(f, "send failed"),
            Self::RecvFailed => write!(f, "no completion received"),
            Self::BadResponse => write!(f, "bad response from broker"),
            Self::ServerRefused => write!(f, "refused by broker"),
            Self::IllegalState => write!(f, "connection terminated"),
        }
    }
}

impl From<MqttError> for Error {
    fn from(e: MqttError) -> Self {
        Self::Mqtt(e)
    }
}

/// Connection primitive failures as seen by the update engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OtaMqttError {
    PublishFailed,
    SubscribeFailed,
    UnsubscribeFailed,
}

impl fmt::Display for OtaMqttError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PublishFailed => write!(f, "publish failed"),
            Self::SubscribeFailed => write!(f, "subscribe failed"),
            Self::UnsubscribeFailed => write!(f, "unsubscribe failed"),
        }
    }
}

// ---------------------------------------------------------------------------
// Jobs protocol errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobError {
    /// Payload is not valid JSON.
    InvalidJson,
    /// No job identifier in the topic or the document.
    MissingJobId,
    /// Job execution carries no job document.
    MissingDocument,
    /// Job identifier exceeds the staging bound.
    JobIdTooLong,
    /// Job document exceeds the staging bound.
    DocumentTooLarge,
    /// A topic built from the thing name and job id does not fit.
    TopicTooLong,
}

impl fmt::Display for JobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidJson => write!(f, "payload is not valid JSON"),
            Self::MissingJobId => write!(f, "job id not found"),
            Self::MissingDocument => write!(f, "job document not found"),
            Self::JobIdTooLong => write!(f, "job id too long"),
            Self::DocumentTooLarge => write!(f, "job document exceeds staging buffer"),
            Self::TopicTooLong => write!(f, "topic exceeds maximum length"),
        }
    }
}

impl From<JobError> for Error {
    fn from(e: JobError) -> Self {
        Self::Job(e)
    }
}

// ---------------------------------------------------------------------------
// Update engine / image platform errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OtaError {
    /// A file transfer is already open.
    AlreadyInProgress,
    /// Declared file size is zero or larger than the partition.
    InvalidSize,
    /// Job document is missing a required update field.
    InvalidJobDocument,
    /// No inactive partition available.
    NoPartition,
    BeginFailed,
    WriteFailed,
    /// Image digest does not match the job document.
    VerifyFailed,
    BootSetFailed,
    /// Close requested before every byte was written.
    IncompleteTransfer,
    /// Operation requires an open transfer.
    NotReceiving,
    /// Block offset does not match the next expected offset.
    NonSequential,
    /// Block would exceed the declared file size.
    Overflow,
    /// The new image could not be activated.
    ActivateFailed,
    /// The platform image state could not be changed.
    ImageStateFailed,
    /// The engine's event queue is full.
    QueueFull,
    /// The engine is not in a state that accepts the request.
    InvalidState,
    /// A subscribe, unsubscribe or publish for the transfer failed.
    ConnectionFailed,
    /// The transfer was aborted on request.
    Aborted,
    /// The engine did not reach the requested state in time.
    StateTimeout,
}

impl fmt::Display for OtaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyInProgress => write!(f, "file transfer already in progress"),
            Self::InvalidSize => write!(f, "file size out of range"),
            Self::InvalidJobDocument => write!(f, "job document missing update fields"),
            Self::NoPartition => write!(f, "no inactive OTA partition available"),
            Self::BeginFailed => write!(f, "OTA begin failed"),
            Self::WriteFailed => write!(f, "OTA write failed"),
            Self::VerifyFailed => write!(f, "OTA verification failed"),
            Self::BootSetFailed => write!(f, "set boot partition failed"),
            Self::IncompleteTransfer => write!(f, "close called before all bytes written"),
            Self::NotReceiving => write!(f, "operation requires an open transfer"),
            Self::NonSequential => write!(f, "block offset does not match expected offset"),
            Self::Overflow => write!(f, "block would exceed declared file size"),
            Self::ActivateFailed => write!(f, "image activation failed"),
            Self::ImageStateFailed => write!(f, "image state change failed"),
            Self::QueueFull => write!(f, "engine event queue full"),
            Self::InvalidState => write!(f, "request not valid in current engine state"),
            Self::ConnectionFailed => write!(f, "MQTT operation for the transfer failed"),
            Self::Aborted => write!(f, "transfer aborted"),
            Self::StateTimeout => write!(f, "engine state change timed out"),
        }
    }
}

impl From<OtaError> for Error {
    fn from(e: OtaError) -> Self {
        Self::Ota(e)
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = core::result::Result<T, Error>;
