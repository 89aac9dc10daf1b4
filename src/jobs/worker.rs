//! Next-job staging and the job worker thread.
//!
//! The job-message callback runs on the MQTT agent's thread and may not
//! block, but executing a job blocks on the command bridge (the status
//! report, and the relay PUBLISH). So the callback only *stages* the job
//! (copies its id and document out of the receive buffer into bounded
//! storage) and hands it to the `job-worker` thread:
//!
//! ```text
//!  mqtt-agent thread                        job-worker thread
//!  ─────────────────                        ─────────────────
//!  stage_next_job(payload) ──submit──▶ EventQueue<JobRequest> ──▶ JobActionDispatcher
//!                                                                   │
//!                                   CommandQueue ◀── JobExit / RelayFailed
//! ```

use std::sync::Arc;
use std::thread::JoinHandle;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;
use log::{debug, info, warn};

use crate::app::commands::{AgentCommand, CommandQueue};
use crate::config::{MAX_JOB_DOC_LEN, MAX_JOB_ID_LEN};
use crate::drivers::task_pin;
use crate::error::JobError;
use crate::events::EventQueue;

use super::action::{JobActionDispatcher, JobOutcome};
use super::document::JsonDocument;

pub const JOB_ID_KEY: &str = "execution.jobId";
pub const JOB_DOC_KEY: &str = "execution.jobDocument";
pub const JOB_QUEUE_DEPTH: usize = 4;

/// A custom job copied out of the receive buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRequest {
    pub job_id: heapless::String<MAX_JOB_ID_LEN>,
    pub document: heapless::String<MAX_JOB_DOC_LEN>,
}

impl JobRequest {
    pub fn new(job_id: &str, document: &str) -> Result<Self, JobError> {
        if job_id.is_empty() {
            return Err(JobError::MissingJobId);
        }
        let mut request = Self {
            job_id: heapless::String::new(),
            document: heapless::String::new(),
        };
        request
            .job_id
            .push_str(job_id)
            .map_err(|()| JobError::JobIdTooLong)?;
        request
            .document
            .push_str(document)
            .map_err(|()| JobError::DocumentTooLarge)?;
        Ok(request)
    }
}

/// Job id of the execution carried by a jobs-service payload, if any.
pub fn execution_job_id(payload: &[u8]) -> Result<Option<String>, JobError> {
    let doc = JsonDocument::parse(payload)?;
    Ok(doc.str_at(JOB_ID_KEY).map(str::to_owned))
}

/// Stage the job execution from a `notify-next` or `$next/get/accepted`
/// payload.
///
/// `Ok(None)` when the payload carries no execution (no job pending).
pub fn stage_next_job(payload: &[u8]) -> Result<Option<JobRequest>, JobError> {
    let doc = JsonDocument::parse(payload)?;
    if doc.value("execution").is_none() {
        return Ok(None);
    }
    let job_id = doc.str_at(JOB_ID_KEY).ok_or(JobError::MissingJobId)?;
    let document = doc.value(JOB_DOC_KEY).ok_or(JobError::MissingDocument)?;
    let document = serde_json::to_string(document).map_err(|_| JobError::InvalidJson)?;
    JobRequest::new(job_id, &document).map(Some)
}

// ── Worker ────────────────────────────────────────────────────

/// Runs custom jobs off the MQTT agent's thread.
pub struct JobWorker {
    requests: EventQueue<JobRequest, JOB_QUEUE_DEPTH>,
    stop: Signal<CriticalSectionRawMutex, ()>,
}

impl JobWorker {
    pub fn new() -> Self {
        Self {
            requests: EventQueue::new(),
            stop: Signal::new(),
        }
    }

    /// Queue a job without blocking. Hands it back when the queue is full.
    pub fn submit(&self, request: JobRequest) -> Result<(), JobRequest> {
        self.requests.send(request)
    }

    pub fn pending(&self) -> usize {
        self.requests.len()
    }

    /// Start the `job-worker` thread.
    pub fn start(
        self: &Arc<Self>,
        dispatcher: JobActionDispatcher,
        commands: Arc<CommandQueue>,
    ) -> std::io::Result<JoinHandle<()>> {
        let worker = Arc::clone(self);
        task_pin::spawn(task_pin::JOB_WORKER_TASK, move || {
            let executor: edge_executor::LocalExecutor<'_, 2> = edge_executor::LocalExecutor::new();
            futures_lite::future::block_on(executor.run(worker.serve(&dispatcher, &commands)));
        })
    }

    /// Ask the thread to exit after the job it is running, if any.
    pub fn stop(&self) {
        self.stop.signal(());
    }

    async fn serve(&self, dispatcher: &JobActionDispatcher, commands: &CommandQueue) {
        info!("Jobs: worker running");
        loop {
            let next = futures_lite::future::or(async { Some(self.requests.receive().await) }, async {
                self.stop.wait().await;
                None
            })
            .await;
            let Some(request) = next else { break };
            self.run_job(dispatcher, commands, &request);
        }
        self.requests
            .drain(|request| warn!("Jobs: job {} dropped at shutdown", request.job_id));
        info!("Jobs: worker stopped");
    }

    /// Execute one job and forward its lifecycle-relevant outcome.
    pub fn run_job(
        &self,
        dispatcher: &JobActionDispatcher,
        commands: &CommandQueue,
        request: &JobRequest,
    ) -> JobOutcome {
        debug!("Jobs: running {}", request.job_id);
        let outcome = dispatcher.dispatch_text(&request.job_id, &request.document);
        if outcome.relay_failed && commands.send(AgentCommand::RelayFailed).is_err() {
            warn!("Jobs: command queue full, relay failure not forwarded");
        }
        if outcome.exit_requested() && commands.send(AgentCommand::JobExit).is_err() {
            warn!("Jobs: command queue full, exit not forwarded");
        }
        outcome
    }
}

impl Default for JobWorker {
    fn default() -> Self {
        Self::new()
    }
}
