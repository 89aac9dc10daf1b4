//! Inbound commands to the lifecycle loop.
//!
//! Sent by the job worker (job outcomes) and by whoever controls the
//! agent (suspend/resume/shutdown). The [`AgentService`](super::service::AgentService)
//! drains them between statistics reports.

use crate::events::EventQueue;

/// Commands that other threads can send into the lifecycle loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentCommand {
    /// Pause the update engine (see `AgentService::suspend`).
    Suspend,

    /// Resume a suspended update engine.
    Resume,

    /// Stop the update engine and end the loop.
    Shutdown,

    /// An `exit` job completed; shut down in an orderly way.
    JobExit,

    /// The relay PUBLISH of a `publish` job failed.
    RelayFailed,
}

pub const COMMAND_QUEUE_DEPTH: usize = 8;

/// Queue feeding the lifecycle loop.
pub type CommandQueue = EventQueue<AgentCommand, COMMAND_QUEUE_DEPTH>;
