//! The update engine.
//!
//! # State machine
//!
//! ```text
//!   Init ──process_events──▶ Ready ──Start──▶ WaitingForJob ──job doc──▶ WaitingForFileBlock
//!                                                  ▲                          │ last block
//!                                                  └──── verified / failed ───┘
//!
//!   Ready | WaitingForJob | WaitingForFileBlock ──Suspend──▶ Suspended ──Resume──▶ (previous)
//!   any ──shutdown()──▶ ShuttingDown ──▶ Stopped
//! ```
//!
//! # Stream protocol
//!
//! The job document names a stream and one file. Blocks are requested in
//! windows of `blocks_per_request` on `…/streams/<stream>/get/raw`:
//!
//! ```json
//! {"c":"<client token>","f":<file id>,"l":<block size>,"o":<first block>,"n":<count>}
//! ```
//!
//! and arrive on `…/streams/<stream>/data/raw` as a little-endian `u32`
//! block index followed by the block bytes. Blocks are written strictly in
//! order; anything else is dropped (and counted). When the last block is
//! written the image is closed and its SHA-256 compared with the job
//! document's, if it supplied one.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use hmac_sha256::Hash;
use log::{debug, error, info, warn};
use serde::Serialize;

use crate::app::ports::{ImagePlatform, OtaAppCallback, OtaConnection, UpdateEngine};
use crate::config::{
    AgentConfig, BLOCK_HEADER_LEN, EVENT_QUEUE_DEPTH, OTA_JOB_PREFIX, STREAMS_KEYWORD, ThingName,
};
use crate::error::OtaError;
use crate::events::EventQueue;
use crate::jobs::action::{JobStatus, status_report};
use crate::jobs::document::JsonDocument;
use crate::jobs::topics::{describe_next_accepted_topic, describe_next_topic, next_job_notify_topic, update_topic};
use crate::mqtt::agent::QoS;
use crate::mqtt::topic::{TopicBuf, compose};
use crate::pool::EventBuffer;

use super::{FileContext, ImageState, OtaEvent, OtaJobEvent, OtaState, OtaStatistics, PlatformImageState};

/// How often the loop re-checks the shutdown flag while idle.
const EVENT_POLL: Duration = Duration::from_millis(100);

const JOB_ID_KEY: &str = "execution.jobId";
const STREAM_KEY: &str = "execution.jobDocument.afr_ota.streamname";
const FILE_PATH_KEY: &str = "execution.jobDocument.afr_ota.files[0].filepath";
const FILE_SIZE_KEY: &str = "execution.jobDocument.afr_ota.files[0].filesize";
const FILE_ID_KEY: &str = "execution.jobDocument.afr_ota.files[0].fileid";
const SHA256_KEY: &str = "execution.jobDocument.afr_ota.files[0].sha256";

// ── Configuration ─────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub thing_name: ThingName,
    pub block_size: usize,
    pub blocks_per_request: u32,
    /// Unsubscribe the job topics when shutting down.
    pub unsubscribe_on_shutdown: bool,
}

impl EngineConfig {
    pub fn new(config: &AgentConfig, thing_name: ThingName) -> Self {
        Self {
            thing_name,
            block_size: config.block_size(),
            blocks_per_request: u32::from(config.blocks_per_request),
            unsubscribe_on_shutdown: true,
        }
    }
}

// ── Wire messages ─────────────────────────────────────────────

#[derive(Serialize)]
struct DescribeRequest<'a> {
    #[serde(rename = "clientToken")]
    client_token: &'a str,
}

#[derive(Serialize)]
struct BlockRequest<'a> {
    c: &'a str,
    f: u32,
    l: usize,
    o: u32,
    n: u32,
}

// ── Statistics ────────────────────────────────────────────────

struct Counters {
    received: AtomicU32,
    queued: AtomicU32,
    processed: AtomicU32,
    dropped: AtomicU32,
}

impl Counters {
    const fn new() -> Self {
        Self {
            received: AtomicU32::new(0),
            queued: AtomicU32::new(0),
            processed: AtomicU32::new(0),
            dropped: AtomicU32::new(0),
        }
    }

    fn snapshot(&self) -> OtaStatistics {
        OtaStatistics {
            received: self.received.load(Ordering::Relaxed),
            queued: self.queued.load(Ordering::Relaxed),
            processed: self.processed.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

fn bump(counter: &AtomicU32) {
    counter.fetch_add(1, Ordering::Relaxed);
}

// ── Transfer (owned by the processing loop) ───────────────────

struct Transfer {
    file: FileContext,
    data_topic: TopicBuf,
    request_topic: TopicBuf,
    total_blocks: u32,
    next_block: u32,
    /// One bit per block received.
    bitmap: Vec<u8>,
    digest: Hash,
}

impl Transfer {
    fn mark(&mut self, index: u32) {
        self.bitmap[(index / 8) as usize] |= 1 << (index % 8);
    }

    fn expected_len(&self, index: u32, block_size: usize) -> usize {
        let start = index as usize * block_size;
        block_size.min(self.file.file_size as usize - start)
    }

    fn is_complete(&self) -> bool {
        self.next_block == self.total_blocks
    }
}

/// Loop-local state of the processing thread.
#[derive(Default)]
struct LoopState {
    transfer: Option<Transfer>,
    suspended_from: Option<OtaState>,
}

// ── Engine ────────────────────────────────────────────────────

/// Firmware-update engine behind the [`UpdateEngine`] port.
pub struct OtaAgent<P: ImagePlatform> {
    config: EngineConfig,
    events: EventQueue<OtaEvent, EVENT_QUEUE_DEPTH>,
    state: AtomicU8,
    stats: Counters,
    shutdown_requested: AtomicBool,
    request_counter: AtomicU32,
    image_state: Mutex<ImageState>,
    platform: Mutex<P>,
    connection: Box<dyn OtaConnection>,
    callback: Box<dyn OtaAppCallback>,
}

impl<P: ImagePlatform> OtaAgent<P> {
    pub fn new(
        config: EngineConfig,
        platform: P,
        connection: Box<dyn OtaConnection>,
        callback: Box<dyn OtaAppCallback>,
    ) -> Self {
        Self {
            config,
            events: EventQueue::new(),
            state: AtomicU8::new(OtaState::Init as u8),
            stats: Counters::new(),
            shutdown_requested: AtomicBool::new(false),
            request_counter: AtomicU32::new(0),
            image_state: Mutex::new(ImageState::Testing),
            platform: Mutex::new(platform),
            connection,
            callback,
        }
    }

    /// Borrow the image platform (e.g. to inspect a simulated image).
    pub fn platform(&self) -> MutexGuard<'_, P> {
        self.platform.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: OtaState) {
        let previous = OtaState::from_u8(self.state.swap(state as u8, Ordering::AcqRel));
        if previous != state {
            debug!("OTA: {:?} -> {:?}", previous, state);
        }
    }

    fn client_token(&self) -> String {
        let n = self.request_counter.fetch_add(1, Ordering::Relaxed);
        format!("{}:{}", n, self.config.thing_name)
    }

    fn notify(&self, event: OtaJobEvent) {
        self.callback.on_job_event(self, event);
    }

    /// Hand an event's buffer back through the application callback.
    fn processed(&self, buffer: EventBuffer) {
        self.notify(OtaJobEvent::Processed(buffer));
    }

    // ── Event handlers ────────────────────────────────────────

    fn handle(&self, event: OtaEvent, local: &mut LoopState) {
        debug!("OTA: event {}", event.name());
        match event {
            OtaEvent::Start => self.on_start(),
            OtaEvent::RequestJobDocument => {
                if self.state() == OtaState::WaitingForJob {
                    self.request_job_document();
                }
            }
            OtaEvent::ReceivedJobDocument(buffer) => self.on_job_document(buffer, local),
            OtaEvent::ReceivedFileBlock(buffer) => self.on_file_block(buffer, local),
            OtaEvent::RequestFileBlock => {
                if let Some(transfer) = local.transfer.as_ref() {
                    if let Err(e) = self.request_window(transfer) {
                        self.abandon(local, e);
                    }
                }
            }
            OtaEvent::Suspend => self.on_suspend(local),
            OtaEvent::Resume => self.on_resume(local),
            OtaEvent::UserAbort => {
                if local.transfer.is_some() {
                    self.abandon(local, OtaError::Aborted);
                }
            }
            OtaEvent::Shutdown => self.shutdown_requested.store(true, Ordering::Release),
        }
    }

    fn on_start(&self) {
        if self.state() != OtaState::Ready {
            debug!("OTA: start ignored in {:?}", self.state());
            return;
        }
        self.check_pending_image();
        match self.subscribe_job_topics() {
            Ok(()) => {
                self.set_state(OtaState::WaitingForJob);
                self.request_job_document();
            }
            Err(e) => error!("OTA: cannot subscribe to job topics: {}", e),
        }
    }

    fn check_pending_image(&self) {
        let platform_state = self.platform().image_state();
        if platform_state != PlatformImageState::PendingCommit {
            return;
        }
        info!("OTA: running a new image pending self-test");
        self.notify(OtaJobEvent::StartTest);
        let platform_state = self.platform().image_state();
        if platform_state == PlatformImageState::PendingCommit {
            error!("OTA: new image not accepted by self-test");
            self.notify(OtaJobEvent::SelfTestFailed);
        }
    }

    fn subscribe_job_topics(&self) -> Result<(), OtaError> {
        let thing = &self.config.thing_name;
        for topic in [next_job_notify_topic(thing), describe_next_accepted_topic(thing)] {
            let topic = topic.map_err(|_| OtaError::ConnectionFailed)?;
            self.connection
                .subscribe(&topic, QoS::AtLeastOnce)
                .map_err(|_| OtaError::ConnectionFailed)?;
        }
        Ok(())
    }

    fn request_job_document(&self) {
        let Ok(topic) = describe_next_topic(&self.config.thing_name) else {
            error!("OTA: thing name too long for job topics");
            return;
        };
        let token = self.client_token();
        let payload = match serde_json::to_vec(&DescribeRequest { client_token: &token }) {
            Ok(payload) => payload,
            Err(e) => {
                error!("OTA: cannot encode job request: {}", e);
                return;
            }
        };
        match self.connection.publish(&topic, &payload, QoS::AtLeastOnce) {
            Ok(()) => info!("OTA: requested next job"),
            Err(e) => warn!("OTA: next-job request failed: {}", e),
        }
    }

    fn on_job_document(&self, buffer: EventBuffer, local: &mut LoopState) {
        let doc = JsonDocument::parse(buffer.data());
        self.processed(buffer);

        let doc = match doc {
            Ok(doc) => doc,
            Err(e) => {
                error!("OTA: rejected job document: {}", e);
                return;
            }
        };
        let file = match parse_update_job(&doc) {
            Ok(file) => file,
            Err(e) => {
                self.reject_job_document(&doc, e);
                return;
            }
        };
        match self.state() {
            OtaState::WaitingForJob => {}
            OtaState::WaitingForFileBlock => {
                let active = local.transfer.as_ref().map(|t| t.file.job_id.as_str());
                if active == Some(file.job_id.as_str()) {
                    debug!("OTA: job {} already in progress", file.job_id);
                } else {
                    warn!("OTA: job {} ignored, {:?} in progress", file.job_id, active);
                }
                return;
            }
            state => {
                warn!("OTA: job {} ignored in {:?}", file.job_id, state);
                return;
            }
        }

        info!(
            "OTA: job {}: '{}' ({} bytes) from stream '{}'",
            file.job_id, file.file_path, file.file_size, file.stream_name
        );
        let job_id = file.job_id.clone();
        match self.begin_transfer(file) {
            Ok(transfer) => {
                local.transfer = Some(transfer);
                self.set_state(OtaState::WaitingForFileBlock);
            }
            Err(e) => self.fail_job(&job_id, e),
        }
    }

    /// An update job whose document cannot be used is reported FAILED,
    /// otherwise the service keeps it IN_PROGRESS.
    fn reject_job_document(&self, doc: &JsonDocument, reason: OtaError) {
        match doc.str_at(JOB_ID_KEY) {
            Some(job_id) if job_id.starts_with(OTA_JOB_PREFIX) && self.state() == OtaState::WaitingForJob => {
                self.fail_job(job_id, reason);
            }
            Some(job_id) => warn!("OTA: rejected job document for {}: {}", job_id, reason),
            None => debug!("OTA: no job execution in document"),
        }
    }

    fn begin_transfer(&self, file: FileContext) -> Result<Transfer, OtaError> {
        let thing = &self.config.thing_name;
        let data_topic = compose(thing, STREAMS_KEYWORD, format_args!("{}/data/raw", file.stream_name))
            .ok_or(OtaError::InvalidJobDocument)?;
        let request_topic = compose(thing, STREAMS_KEYWORD, format_args!("{}/get/raw", file.stream_name))
            .ok_or(OtaError::InvalidJobDocument)?;
        let total_blocks = file.block_count(self.config.block_size);

        self.platform().create_file(&file)?;
        if self.connection.subscribe(&data_topic, QoS::AtMostOnce).is_err() {
            self.abort_image();
            return Err(OtaError::ConnectionFailed);
        }

        let transfer = Transfer {
            file,
            data_topic,
            request_topic,
            total_blocks,
            next_block: 0,
            bitmap: vec![0; (total_blocks as usize).div_ceil(8)],
            digest: Hash::new(),
        };
        if let Err(e) = self.request_window(&transfer) {
            self.release_stream(&transfer);
            self.abort_image();
            return Err(e);
        }
        Ok(transfer)
    }

    /// Ask for the next window of blocks, starting at `next_block`.
    fn request_window(&self, transfer: &Transfer) -> Result<(), OtaError> {
        let count = self
            .config
            .blocks_per_request
            .min(transfer.total_blocks - transfer.next_block);
        let token = self.client_token();
        let request = BlockRequest {
            c: &token,
            f: transfer.file.file_id,
            l: self.config.block_size,
            o: transfer.next_block,
            n: count,
        };
        let payload = serde_json::to_vec(&request).map_err(|_| OtaError::InvalidJobDocument)?;
        self.connection
            .publish(&transfer.request_topic, &payload, QoS::AtMostOnce)
            .map_err(|_| OtaError::ConnectionFailed)?;
        debug!("OTA: requested blocks {}..{}", transfer.next_block, transfer.next_block + count);
        Ok(())
    }

    fn on_file_block(&self, buffer: EventBuffer, local: &mut LoopState) {
        if self.state() != OtaState::WaitingForFileBlock {
            bump(&self.stats.dropped);
            debug!("OTA: block dropped in {:?}", self.state());
            self.processed(buffer);
            return;
        }
        let Some(transfer) = local.transfer.as_mut() else {
            bump(&self.stats.dropped);
            self.processed(buffer);
            return;
        };

        let data = buffer.data();
        if data.len() < BLOCK_HEADER_LEN {
            bump(&self.stats.dropped);
            warn!("OTA: block of {} bytes has no header", data.len());
            self.processed(buffer);
            return;
        }
        let (header, body) = data.split_at(BLOCK_HEADER_LEN);
        let index = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);

        if index != transfer.next_block {
            bump(&self.stats.dropped);
            debug!("OTA: block {} dropped, expecting {}", index, transfer.next_block);
            let ahead = index > transfer.next_block && index < transfer.total_blocks;
            self.processed(buffer);
            if ahead {
                if let Err(e) = self.request_window(transfer) {
                    self.abandon(local, e);
                }
            }
            return;
        }
        if body.len() != transfer.expected_len(index, self.config.block_size) {
            bump(&self.stats.dropped);
            warn!("OTA: block {} has wrong length {}", index, body.len());
            self.processed(buffer);
            return;
        }

        let offset = index * self.config.block_size as u32;
        let written = self.platform().write_block(offset, body);
        if written.is_ok() {
            transfer.digest.update(body);
            transfer.mark(index);
            transfer.next_block += 1;
            bump(&self.stats.processed);
        }
        self.processed(buffer);

        if let Err(e) = written {
            self.abandon(local, e);
            return;
        }
        if let Some(done) = local.transfer.take_if(|t| t.is_complete()) {
            self.complete_transfer(done);
            return;
        }
        let window_done = local
            .transfer
            .as_ref()
            .is_some_and(|t| t.next_block % self.config.blocks_per_request == 0);
        if window_done {
            let requested = local.transfer.as_ref().map(|t| self.request_window(t));
            if let Some(Err(e)) = requested {
                self.abandon(local, e);
            }
        }
    }

    fn complete_transfer(&self, transfer: Transfer) {
        self.release_stream(&transfer);
        let Transfer { file, digest, .. } = transfer;

        let closed = self.platform().close_file();
        let verified = closed.and_then(|()| match file.sha256 {
            Some(expected) if digest.finalize() != expected => Err(OtaError::VerifyFailed),
            _ => Ok(()),
        });

        match verified {
            Ok(()) => {
                info!("OTA: job {} image complete and verified", file.job_id);
                self.report(&file.job_id, JobStatus::Succeeded);
                self.set_state(OtaState::WaitingForJob);
                self.notify(OtaJobEvent::Activate);
            }
            Err(e) => {
                self.abort_image();
                self.fail_job(&file.job_id, e);
            }
        }
    }

    /// Give up on the active transfer.
    fn abandon(&self, local: &mut LoopState, reason: OtaError) {
        let Some(transfer) = local.transfer.take() else {
            return;
        };
        self.release_stream(&transfer);
        self.abort_image();
        self.fail_job(&transfer.file.job_id, reason);
    }

    fn fail_job(&self, job_id: &str, reason: OtaError) {
        error!("OTA: job {} failed: {}", job_id, reason);
        self.report(job_id, JobStatus::Failed);
        self.set_state(OtaState::WaitingForJob);
        self.notify(OtaJobEvent::Fail);
    }

    fn release_stream(&self, transfer: &Transfer) {
        if let Err(e) = self.connection.unsubscribe(&transfer.data_topic, QoS::AtMostOnce) {
            warn!("OTA: unsubscribe from '{}' failed: {}", transfer.data_topic, e);
        }
    }

    fn abort_image(&self) {
        if let Err(e) = self.platform().abort() {
            warn!("OTA: image abort failed: {}", e);
        }
    }

    fn report(&self, job_id: &str, status: JobStatus) {
        let topic = match update_topic(&self.config.thing_name, job_id) {
            Ok(topic) => topic,
            Err(e) => {
                error!("OTA: cannot report job {}: {}", job_id, e);
                return;
            }
        };
        if let Err(e) = self
            .connection
            .publish(&topic, &status_report(status), QoS::AtLeastOnce)
        {
            warn!("OTA: status {} for job {} not reported: {}", status.as_str(), job_id, e);
        }
    }

    fn on_suspend(&self, local: &mut LoopState) {
        match self.state() {
            state @ (OtaState::Ready | OtaState::WaitingForJob | OtaState::WaitingForFileBlock) => {
                local.suspended_from = Some(state);
                self.set_state(OtaState::Suspended);
                info!("OTA: suspended");
            }
            state => debug!("OTA: suspend ignored in {:?}", state),
        }
    }

    fn on_resume(&self, local: &mut LoopState) {
        if self.state() != OtaState::Suspended {
            return;
        }
        let resume_to = local.suspended_from.take().unwrap_or(OtaState::Ready);
        let resume_to = match (resume_to, local.transfer.is_some()) {
            (OtaState::WaitingForFileBlock, false) => OtaState::WaitingForJob,
            (state, _) => state,
        };
        self.set_state(resume_to);
        info!("OTA: resumed to {:?}", resume_to);
        match resume_to {
            OtaState::WaitingForFileBlock => {
                if let Some(Err(e)) = local.transfer.as_ref().map(|t| self.request_window(t)) {
                    self.abandon(local, e);
                }
            }
            OtaState::WaitingForJob => self.request_job_document(),
            _ => {}
        }
    }

    fn finish_shutdown(&self, local: &mut LoopState) {
        self.set_state(OtaState::ShuttingDown);
        info!("OTA: shutting down");
        if let Some(transfer) = local.transfer.take() {
            self.release_stream(&transfer);
            self.abort_image();
        }
        if self.config.unsubscribe_on_shutdown {
            let thing = &self.config.thing_name;
            for topic in [next_job_notify_topic(thing), describe_next_accepted_topic(thing)]
                .into_iter()
                .flatten()
            {
                if let Err(e) = self.connection.unsubscribe(&topic, QoS::AtLeastOnce) {
                    debug!("OTA: unsubscribe from '{}' failed: {}", topic, e);
                }
            }
        }
        self.drain_events();
        self.set_state(OtaState::Stopped);
        // Events signalled while the state was changing.
        self.drain_events();
        info!("OTA: stopped");
    }

    fn drain_events(&self) {
        self.events.drain(|event| {
            if let Some(buffer) = event.into_buffer() {
                self.processed(buffer);
            }
        });
    }
}

impl<P: ImagePlatform> UpdateEngine for OtaAgent<P> {
    fn signal_event(&self, event: OtaEvent) -> Result<(), OtaEvent> {
        let is_block = matches!(event, OtaEvent::ReceivedFileBlock(_));
        if is_block {
            bump(&self.stats.received);
        }
        if matches!(self.state(), OtaState::ShuttingDown | OtaState::Stopped)
            && !matches!(event, OtaEvent::Shutdown)
        {
            if is_block {
                bump(&self.stats.dropped);
            }
            return Err(event);
        }
        match self.events.send(event) {
            Ok(()) => {
                if is_block {
                    bump(&self.stats.queued);
                }
                Ok(())
            }
            Err(event) => {
                if is_block {
                    bump(&self.stats.dropped);
                }
                warn!("OTA: event queue full, {} dropped", event.name());
                Err(event)
            }
        }
    }

    fn process_events(&self) {
        let mut local = LoopState::default();
        self.set_state(OtaState::Ready);
        info!("OTA: agent ready");
        while !self.shutdown_requested.load(Ordering::Acquire) {
            if let Some(event) = self.events.receive_timeout(EVENT_POLL) {
                self.handle(event, &mut local);
            }
        }
        self.finish_shutdown(&mut local);
    }

    fn state(&self) -> OtaState {
        OtaState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn statistics(&self) -> OtaStatistics {
        self.stats.snapshot()
    }

    fn suspend(&self) -> Result<(), OtaError> {
        match self.state() {
            OtaState::Suspended | OtaState::ShuttingDown | OtaState::Stopped => Ok(()),
            OtaState::Init => Err(OtaError::InvalidState),
            _ => self.events.send(OtaEvent::Suspend).map_err(|_| OtaError::QueueFull),
        }
    }

    fn resume(&self) -> Result<(), OtaError> {
        if self.state() != OtaState::Suspended {
            return Err(OtaError::InvalidState);
        }
        self.events.send(OtaEvent::Resume).map_err(|_| OtaError::QueueFull)
    }

    fn shutdown(&self) {
        self.shutdown_requested.store(true, Ordering::Release);
        // Wakes the loop; the flag alone is enough if the queue is full.
        if self.events.send(OtaEvent::Shutdown).is_err() {
            warn!("OTA: event queue full, shutdown relies on the flag");
        }
    }

    fn activate_new_image(&self) -> Result<(), OtaError> {
        self.platform().activate().map_err(|e| {
            error!("OTA: activation failed: {}", e);
            OtaError::ActivateFailed
        })
    }

    fn set_image_state(&self, state: ImageState) -> Result<(), OtaError> {
        self.platform().set_image_state(state)?;
        *self.image_state.lock().unwrap_or_else(PoisonError::into_inner) = state;
        info!("OTA: image state {:?}", state);
        Ok(())
    }

    fn image_state(&self) -> ImageState {
        *self.image_state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ── Job document parsing ──────────────────────────────────────

/// Extract the file description from an update job document.
pub fn parse_update_job(doc: &JsonDocument) -> Result<FileContext, OtaError> {
    let job_id = doc.str_at(JOB_ID_KEY).ok_or(OtaError::InvalidJobDocument)?;
    if !job_id.starts_with(OTA_JOB_PREFIX) {
        return Err(OtaError::InvalidJobDocument);
    }
    let mut file = FileContext::default();
    bounded_copy(&mut file.job_id, job_id)?;
    bounded_copy(
        &mut file.stream_name,
        doc.str_at(STREAM_KEY).ok_or(OtaError::InvalidJobDocument)?,
    )?;
    bounded_copy(
        &mut file.file_path,
        doc.str_at(FILE_PATH_KEY).ok_or(OtaError::InvalidJobDocument)?,
    )?;
    if file.stream_name.is_empty() || file.stream_name.contains(['/', '+', '#']) {
        return Err(OtaError::InvalidJobDocument);
    }
    let size = doc.u64_at(FILE_SIZE_KEY).ok_or(OtaError::InvalidJobDocument)?;
    file.file_size = u32::try_from(size).map_err(|_| OtaError::InvalidSize)?;
    file.file_id = match doc.u64_at(FILE_ID_KEY) {
        Some(id) => u32::try_from(id).map_err(|_| OtaError::InvalidJobDocument)?,
        None => 0,
    };
    file.sha256 = match doc.str_at(SHA256_KEY) {
        Some(hex) => Some(parse_sha256(hex).ok_or(OtaError::InvalidJobDocument)?),
        None => None,
    };
    Ok(file)
}

fn bounded_copy<const N: usize>(dst: &mut heapless::String<N>, src: &str) -> Result<(), OtaError> {
    dst.clear();
    dst.push_str(src).map_err(|()| OtaError::InvalidJobDocument)
}

fn parse_sha256(hex: &str) -> Option<[u8; 32]> {
    if hex.len() != 64 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    let mut digest = [0u8; 32];
    for (byte, pair) in digest.iter_mut().zip(hex.as_bytes().chunks(2)) {
        *byte = u8::from_str_radix(core::str::from_utf8(pair).ok()?, 16).ok()?;
    }
    Some(digest)
}
