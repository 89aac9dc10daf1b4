//! Log-based event sink adapter.
//!
//! Implements [`EventSink`] by writing lifecycle events to the logger
//! (UART / USB-CDC on the device, stderr on the host).

use log::{info, warn};

use crate::app::events::AgentEvent;
use crate::app::ports::EventSink;

/// Adapter that logs every [`AgentEvent`] to the serial console.
#[derive(Default)]
pub struct LogEventSink;

impl LogEventSink {
    pub fn new() -> Self {
        Self
    }
}

impl EventSink for LogEventSink {
    fn emit(&mut self, event: &AgentEvent) {
        match event {
            AgentEvent::Started(version) => info!("START | app version {}", version),
            AgentEvent::Statistics(s) => {
                info!(
                    " Received: {}   Queued: {}   Processed: {}   Dropped: {}",
                    s.received, s.queued, s.processed, s.dropped
                );
            }
            AgentEvent::Suspended => info!("STATE | suspended"),
            AgentEvent::Resumed(state) => info!("STATE | resumed to {:?}", state),
            AgentEvent::ExitRequested => info!("EXIT  | requested by job"),
            AgentEvent::RelayFailed => warn!("ERROR | relay publish failed"),
            AgentEvent::Stopped(s) => {
                info!(
                    "STOP  | received={} queued={} processed={} dropped={}",
                    s.received, s.queued, s.processed, s.dropped
                );
            }
        }
    }
}
