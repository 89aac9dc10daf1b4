//! Update engine: types shared across the engine boundary.
//!
//! ```text
//!  Inbound Dispatch ──signal_event──▶ ┌──────────────┐ ──OtaConnection──▶ CommandBridge
//!  AgentService     ──suspend/...──▶ │   OtaAgent   │ ──ImagePlatform──▶ FlashPal
//!                                    │ (ota-agent   │
//!                                    │   thread)    │ ──OtaAppCallback─▶ AgentCallback
//!                                    └──────────────┘
//! ```
//!
//! Event buffers travel *inside* events: a buffer acquired from the pool
//! by the receive callback is owned by the event until the engine hands it
//! back through [`OtaJobEvent::Processed`].

pub mod agent;
pub mod pal;

use crate::config::{MAX_FILE_PATH_LEN, MAX_JOB_ID_LEN, MAX_STREAM_NAME_LEN};
use crate::pool::EventBuffer;

/// Engine lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OtaState {
    Init = 0,
    Ready = 1,
    WaitingForJob = 2,
    WaitingForFileBlock = 3,
    Suspended = 4,
    ShuttingDown = 5,
    Stopped = 6,
}

impl OtaState {
    pub fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Init,
            1 => Self::Ready,
            2 => Self::WaitingForJob,
            3 => Self::WaitingForFileBlock,
            4 => Self::Suspended,
            5 => Self::ShuttingDown,
            _ => Self::Stopped,
        }
    }
}

/// Packet counters, as reported by the lifecycle loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OtaStatistics {
    /// File blocks handed to the engine.
    pub received: u32,
    /// File blocks accepted into the event queue.
    pub queued: u32,
    /// File blocks written to the image.
    pub processed: u32,
    /// File blocks discarded (queue full, suspended, out of order).
    pub dropped: u32,
}

/// Events driving the engine's processing loop.
#[derive(Debug)]
pub enum OtaEvent {
    Start,
    RequestJobDocument,
    ReceivedJobDocument(EventBuffer),
    ReceivedFileBlock(EventBuffer),
    /// Ask for the next window of blocks again (used on resume).
    RequestFileBlock,
    Suspend,
    Resume,
    UserAbort,
    Shutdown,
}

impl OtaEvent {
    /// Take the pool buffer carried by this event, if any.
    pub fn into_buffer(self) -> Option<EventBuffer> {
        match self {
            Self::ReceivedJobDocument(buffer) | Self::ReceivedFileBlock(buffer) => Some(buffer),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Start => "Start",
            Self::RequestJobDocument => "RequestJobDocument",
            Self::ReceivedJobDocument(_) => "ReceivedJobDocument",
            Self::ReceivedFileBlock(_) => "ReceivedFileBlock",
            Self::RequestFileBlock => "RequestFileBlock",
            Self::Suspend => "Suspend",
            Self::Resume => "Resume",
            Self::UserAbort => "UserAbort",
            Self::Shutdown => "Shutdown",
        }
    }
}

/// Life-cycle notifications from the engine to the application.
#[derive(Debug)]
pub enum OtaJobEvent {
    /// The new image is complete and verified; activate it.
    Activate,
    /// The update job failed.
    Fail,
    /// Booted into a new image that is pending self-test.
    StartTest,
    /// The engine is done with this event buffer.
    Processed(EventBuffer),
    /// The pending image did not pass its self-test.
    SelfTestFailed,
}

/// Application-level image state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageState {
    Testing,
    Accepted,
    Rejected,
    Aborted,
}

/// Image state as reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlatformImageState {
    Valid,
    Invalid,
    PendingCommit,
    Unknown,
}

/// The file described by an update job document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileContext {
    pub job_id: heapless::String<MAX_JOB_ID_LEN>,
    pub file_path: heapless::String<MAX_FILE_PATH_LEN>,
    pub stream_name: heapless::String<MAX_STREAM_NAME_LEN>,
    pub file_size: u32,
    pub file_id: u32,
    /// Expected SHA-256 of the whole image, when the job supplies one.
    pub sha256: Option<[u8; 32]>,
}

impl FileContext {
    /// Number of blocks of `block_size` bytes the file spans.
    pub fn block_count(&self, block_size: usize) -> u32 {
        (self.file_size as usize).div_ceil(block_size) as u32
    }
}
