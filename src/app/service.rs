//! Agent Lifecycle Loop.
//!
//! [`AgentService`] starts the update engine on its own thread, reports
//! statistics while it runs and serves [`AgentCommand`]s from the job
//! worker and the operator. Outcomes that used to be global flags (exit
//! requested, relay failed) travel as commands and end up in the
//! [`RunSummary`].
//!
//! ```text
//!  CommandQueue ──▶ ┌────────────────────────┐ ──▶ EventSink
//!                   │      AgentService      │
//!                   │  start · stats · stop  │ ──▶ UpdateEngine (ota-agent thread)
//!                   └────────────────────────┘
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{error, info, warn};

use crate::config::{AgentConfig, AppVersion};
use crate::drivers::task_pin;
use crate::error::{Error, OtaError, Result};
use crate::ota::{OtaEvent, OtaState, OtaStatistics};

use super::commands::{AgentCommand, CommandQueue};
use super::events::AgentEvent;
use super::ports::{EventSink, UpdateEngine};

/// What a finished run observed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// An `exit` job ended the run.
    pub exit_requested: bool,
    /// Relay PUBLISHes of `publish` jobs that failed.
    pub relay_failures: u32,
    /// Engine statistics after it stopped.
    pub statistics: OtaStatistics,
}

impl RunSummary {
    /// Whether the run saw an error worth a non-zero exit status.
    pub fn failed(&self) -> bool {
        self.relay_failures > 0
    }
}

// ───────────────────────────────────────────────────────────────
// AgentService
// ───────────────────────────────────────────────────────────────

pub struct AgentService {
    engine: Arc<dyn UpdateEngine>,
    commands: Arc<CommandQueue>,
    stats_interval: Duration,
    /// Bound on suspend/resume polling.
    state_timeout: Duration,
    version: AppVersion,
}

impl AgentService {
    pub fn new(engine: Arc<dyn UpdateEngine>, commands: Arc<CommandQueue>, config: &AgentConfig) -> Self {
        Self {
            engine,
            commands,
            stats_interval: config.stats_interval(),
            state_timeout: config.mqtt_timeout(),
            version: config.app_version,
        }
    }

    pub fn commands(&self) -> &Arc<CommandQueue> {
        &self.commands
    }

    // ── Lifecycle ─────────────────────────────────────────────

    /// Run the engine until it stops.
    pub fn run(&self, sink: &mut dyn EventSink) -> Result<RunSummary> {
        sink.emit(&AgentEvent::Started(self.version));
        info!("Agent: starting update engine, version {}", self.version);

        let engine = Arc::clone(&self.engine);
        let handle = task_pin::spawn(task_pin::OTA_AGENT_TASK, move || engine.process_events())
            .map_err(|e| {
                error!("Agent: engine task spawn failed: {}", e);
                Error::Init("engine task spawn failed")
            })?;

        if self.engine.signal_event(OtaEvent::Start).is_err() {
            error!("Agent: engine refused start");
            self.engine.shutdown();
        }

        let mut summary = RunSummary::default();
        let mut last_report = Instant::now();
        loop {
            if let Some(command) = self.commands.receive_timeout(self.stats_interval) {
                self.handle_command(command, &mut summary, sink);
            }
            if last_report.elapsed() >= self.stats_interval {
                sink.emit(&AgentEvent::Statistics(self.engine.statistics()));
                last_report = Instant::now();
            }
            if self.engine.state() == OtaState::Stopped {
                break;
            }
            if handle.is_finished() {
                warn!("Agent: engine task ended before reaching Stopped");
                break;
            }
        }

        if handle.join().is_err() {
            error!("Agent: engine task panicked");
        }
        // Outcomes forwarded while the engine was stopping.
        while let Some(command) = self.commands.try_receive() {
            self.handle_command(command, &mut summary, sink);
        }

        summary.statistics = self.engine.statistics();
        sink.emit(&AgentEvent::Stopped(summary.statistics));
        info!("Agent: stopped");
        Ok(summary)
    }

    fn handle_command(&self, command: AgentCommand, summary: &mut RunSummary, sink: &mut dyn EventSink) {
        match command {
            AgentCommand::Suspend => match self.suspend() {
                Ok(()) if self.engine.state() == OtaState::Suspended => sink.emit(&AgentEvent::Suspended),
                Ok(()) => {}
                Err(e) => warn!("Agent: suspend failed: {}", e),
            },
            AgentCommand::Resume => match self.resume() {
                Ok(()) if self.engine.state() != OtaState::Suspended => {
                    sink.emit(&AgentEvent::Resumed(self.engine.state()));
                }
                Ok(()) => {}
                Err(e) => warn!("Agent: resume failed: {}", e),
            },
            AgentCommand::Shutdown => {
                info!("Agent: shutdown requested");
                self.engine.shutdown();
            }
            AgentCommand::JobExit => {
                if !summary.exit_requested {
                    summary.exit_requested = true;
                    sink.emit(&AgentEvent::ExitRequested);
                }
                self.engine.shutdown();
            }
            AgentCommand::RelayFailed => {
                summary.relay_failures += 1;
                sink.emit(&AgentEvent::RelayFailed);
            }
        }
    }

    // ── Suspend / resume ──────────────────────────────────────

    /// Suspend the engine and wait until it is Suspended.
    ///
    /// No-op when already Suspended or Stopped. An engine that has not
    /// started yet is refused with `InvalidState` without waiting.
    pub fn suspend(&self) -> core::result::Result<(), OtaError> {
        match self.engine.state() {
            OtaState::Suspended | OtaState::Stopped => return Ok(()),
            OtaState::Init => return Err(OtaError::InvalidState),
            _ => {}
        }
        self.engine.suspend()?;
        self.wait_for(|state| matches!(state, OtaState::Suspended | OtaState::Stopped))
    }

    /// Resume a suspended engine and wait until it has left Suspended.
    ///
    /// No-op unless Suspended.
    pub fn resume(&self) -> core::result::Result<(), OtaError> {
        if self.engine.state() != OtaState::Suspended {
            return Ok(());
        }
        self.engine.resume()?;
        self.wait_for(|state| state != OtaState::Suspended)
    }

    fn wait_for(&self, reached: impl Fn(OtaState) -> bool) -> core::result::Result<(), OtaError> {
        let deadline = Instant::now() + self.state_timeout;
        loop {
            let state = self.engine.state();
            if reached(state) {
                return Ok(());
            }
            if Instant::now() >= deadline {
                warn!("Agent: engine still {:?} after {} ms", state, self.state_timeout.as_millis());
                return Err(OtaError::StateTimeout);
            }
            std::thread::sleep(self.stats_interval.min(deadline.saturating_duration_since(Instant::now())));
        }
    }
}
