//! Custom job actions.
//!
//! A job document names one `action`:
//!
//! | Action | Required fields | Effect | Reported |
//! |--------|-----------------|--------|----------|
//! | `print` | `message` | log the message | SUCCEEDED |
//! | `publish` | `topic`, `message` | relay `message` to `topic` (QoS 0) | SUCCEEDED, even if the relay fails |
//! | `exit` | none | terminate the MQTT connection after reporting | SUCCEEDED |
//! | anything else | none | log | FAILED, unless unknown actions are ignored |
//!
//! A missing required field reports FAILED without side effects. Every
//! report is a QoS 1 PUBLISH of `{"status":"..."}` to the job's update
//! topic, and [`JobActionDispatcher::dispatch`] only returns once that
//! PUBLISH has completed or timed out.

use std::sync::Arc;

use log::{error, info, warn};
use serde::Serialize;

use crate::config::ThingName;
use crate::error::MqttError;
use crate::mqtt::agent::QoS;
use crate::mqtt::bridge::CommandBridge;

use super::document::{DocumentQuery, JsonDocument};
use super::topics::update_topic;

pub const ACTION_KEY: &str = "action";
pub const MESSAGE_KEY: &str = "message";
pub const TOPIC_KEY: &str = "topic";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobAction {
    Print,
    Publish,
    Exit,
    Unknown,
}

impl JobAction {
    /// Exact, case-sensitive keyword match.
    pub fn parse(action: &str) -> Self {
        match action {
            "print" => Self::Print,
            "publish" => Self::Publish,
            "exit" => Self::Exit,
            _ => Self::Unknown,
        }
    }
}

/// Terminal status of a job execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Succeeded,
    Failed,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Succeeded => "SUCCEEDED",
            Self::Failed => "FAILED",
        }
    }
}

#[derive(Serialize)]
struct StatusReport {
    status: JobStatus,
}

/// `{"status":"SUCCEEDED"}` / `{"status":"FAILED"}`.
pub fn status_report(status: JobStatus) -> Vec<u8> {
    serde_json::to_vec(&StatusReport { status })
        .unwrap_or_else(|_| format!("{{\"status\":\"{}\"}}", status.as_str()).into_bytes())
}

/// What one dispatch did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobOutcome {
    pub action: JobAction,
    /// Status reported to the jobs service, if any.
    pub status: Option<JobStatus>,
    /// Result of the status PUBLISH (`Ok` when nothing was reported).
    pub report: Result<(), MqttError>,
    /// The relay PUBLISH of a `publish` action failed.
    pub relay_failed: bool,
}

impl JobOutcome {
    pub fn exit_requested(&self) -> bool {
        self.action == JobAction::Exit
    }
}

/// Executes custom job documents and reports their status.
///
/// Stateless across calls; must run on a thread that may block on the
/// command bridge (never on the MQTT agent's thread).
pub struct JobActionDispatcher {
    bridge: Arc<CommandBridge>,
    thing_name: ThingName,
    report_unknown: bool,
}

impl JobActionDispatcher {
    pub fn new(bridge: Arc<CommandBridge>, thing_name: ThingName, report_unknown: bool) -> Self {
        Self {
            bridge,
            thing_name,
            report_unknown,
        }
    }

    /// Parse `document` and dispatch it. Unparseable documents report FAILED.
    pub fn dispatch_text(&self, job_id: &str, document: &str) -> JobOutcome {
        match JsonDocument::parse(document.as_bytes()) {
            Ok(doc) => self.dispatch(job_id, &doc),
            Err(e) => {
                error!("Job[{}]: document rejected: {}", job_id, e);
                self.finish(job_id, JobAction::Unknown, Some(JobStatus::Failed), false)
            }
        }
    }

    pub fn dispatch(&self, job_id: &str, document: &dyn DocumentQuery) -> JobOutcome {
        let Some(action_name) = document.search(ACTION_KEY) else {
            error!("Job[{}]: document has no \"{}\" key", job_id, ACTION_KEY);
            return self.finish(job_id, JobAction::Unknown, Some(JobStatus::Failed), false);
        };

        let action = JobAction::parse(&action_name);
        match action {
            JobAction::Print => {
                let status = match document.search(MESSAGE_KEY) {
                    Some(message) => {
                        info!("Job[{}]: {}", job_id, message);
                        JobStatus::Succeeded
                    }
                    None => {
                        error!("Job[{}]: \"print\" without \"{}\"", job_id, MESSAGE_KEY);
                        JobStatus::Failed
                    }
                };
                self.finish(job_id, action, Some(status), false)
            }
            JobAction::Publish => {
                let (Some(topic), Some(message)) = (document.search(TOPIC_KEY), document.search(MESSAGE_KEY))
                else {
                    error!(
                        "Job[{}]: \"publish\" needs \"{}\" and \"{}\"",
                        job_id, TOPIC_KEY, MESSAGE_KEY
                    );
                    return self.finish(job_id, action, Some(JobStatus::Failed), false);
                };
                let relay_failed = match self.bridge.publish(&topic, message.as_bytes(), QoS::AtMostOnce) {
                    Ok(()) => false,
                    Err(e) => {
                        error!("Job[{}]: relay to '{}' failed: {}", job_id, topic, e);
                        true
                    }
                };
                self.finish(job_id, action, Some(JobStatus::Succeeded), relay_failed)
            }
            JobAction::Exit => {
                info!("Job[{}]: exit requested", job_id);
                let outcome = self.finish(job_id, action, Some(JobStatus::Succeeded), false);
                if let Err(e) = self.bridge.terminate() {
                    error!("Job[{}]: could not request disconnect: {}", job_id, e);
                }
                outcome
            }
            JobAction::Unknown if self.report_unknown => {
                warn!("Job[{}]: unknown action \"{}\"", job_id, action_name);
                self.finish(job_id, action, Some(JobStatus::Failed), false)
            }
            JobAction::Unknown => {
                warn!("Job[{}]: unknown action \"{}\" ignored", job_id, action_name);
                self.finish(job_id, action, None, false)
            }
        }
    }

    fn finish(
        &self,
        job_id: &str,
        action: JobAction,
        status: Option<JobStatus>,
        relay_failed: bool,
    ) -> JobOutcome {
        let report = match status {
            Some(status) => self.report_status(job_id, status),
            None => Ok(()),
        };
        JobOutcome {
            action,
            status,
            report,
            relay_failed,
        }
    }

    /// Publish `status` for `job_id` and wait for the PUBLISH to complete.
    pub fn report_status(&self, job_id: &str, status: JobStatus) -> Result<(), MqttError> {
        let topic = update_topic(&self.thing_name, job_id).map_err(|e| {
            error!("Job[{}]: cannot build update topic: {}", job_id, e);
            MqttError::BadParameter
        })?;
        self.bridge
            .publish(&topic, &status_report(status), QoS::AtLeastOnce)
            .inspect(|_| info!("Job[{}]: reported {}", job_id, status.as_str()))
            .inspect_err(|e| error!("Job[{}]: status {} not reported: {}", job_id, status.as_str(), e))
    }
}
