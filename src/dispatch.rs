//! Inbound Dispatch: the two receive callbacks, and the engine's
//! connection primitives that register them.
//!
//! ```text
//!  mqtt-agent thread
//!  ─────────────────
//!  SubscriptionRegistry ──▶ TopicCategory::Stream ──▶ on_data_block ──▶ pool ──▶ ReceivedFileBlock ──▶ engine
//!                       └─▶ TopicCategory::Job    ──▶ on_job_message
//!                                                      ├─ AFR_OTA… ──▶ pool ──▶ ReceivedJobDocument ──▶ engine
//!                                                      ├─ other job ──▶ stage_next_job ──▶ JobWorker
//!                                                      └─ acks      ──▶ log
//! ```
//!
//! Both callbacks run on the transport's thread, so they do bounded work
//! only: pool acquire, one copy, one non-blocking enqueue. A full pool or
//! a full queue drops the message.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};

use log::{debug, error, info, warn};

use crate::app::ports::{OtaConnection, UpdateEngine};
use crate::config::{OTA_JOB_PREFIX, ThingName};
use crate::error::{MqttError, OtaMqttError};
use crate::jobs::topics::{JobsTopic, match_topic};
use crate::jobs::worker::{JobWorker, execution_job_id, stage_next_job};
use crate::mqtt::agent::{IncomingPublishCallback, PublishInfo, QoS};
use crate::mqtt::bridge::CommandBridge;
use crate::mqtt::topic::{TopicCategory, classify};
use crate::ota::OtaEvent;
use crate::pool::{BufferPool, EventBuffer};

// ───────────────────────────────────────────────────────────────
// Receive callbacks
// ───────────────────────────────────────────────────────────────

pub struct InboundDispatch {
    pool: Arc<BufferPool>,
    engine: Weak<dyn UpdateEngine>,
    jobs: Arc<JobWorker>,
    thing_name: ThingName,
    /// Largest payload either callback accepts.
    max_payload: usize,
    dropped: AtomicU32,
}

impl InboundDispatch {
    pub fn new(
        pool: Arc<BufferPool>,
        engine: Weak<dyn UpdateEngine>,
        jobs: Arc<JobWorker>,
        thing_name: ThingName,
    ) -> Self {
        let max_payload = pool.slot_size();
        Self {
            pool,
            engine,
            jobs,
            thing_name,
            max_payload,
            dropped: AtomicU32::new(0),
        }
    }

    /// Inbound messages dropped here (pool exhausted, engine gone or full).
    pub fn dropped(&self) -> u32 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn max_payload(&self) -> usize {
        self.max_payload
    }

    /// The receive callback serving topics of `category`.
    pub fn callback_for(self: &Arc<Self>, category: TopicCategory) -> Option<IncomingPublishCallback> {
        let this = Arc::clone(self);
        match category {
            TopicCategory::Stream => Some(Arc::new(move |publish: &PublishInfo<'_>| this.on_data_block(publish))),
            TopicCategory::Job => Some(Arc::new(move |publish: &PublishInfo<'_>| this.on_job_message(publish))),
            TopicCategory::Unrecognized => None,
        }
    }

    /// Copy a file block into a pool buffer and hand it to the engine.
    ///
    /// # Panics
    ///
    /// If the payload exceeds the pool slot size.
    pub fn on_data_block(&self, publish: &PublishInfo<'_>) {
        self.check_size(publish);
        self.forward(publish, OtaEvent::ReceivedFileBlock);
    }

    /// Route a jobs-service message.
    ///
    /// # Panics
    ///
    /// If the payload exceeds the pool slot size.
    pub fn on_job_message(&self, publish: &PublishInfo<'_>) {
        self.check_size(publish);
        let Some(matched) = match_topic(publish.topic, &self.thing_name) else {
            warn!("Jobs: '{}' is not a jobs-service topic", publish.topic);
            return;
        };

        match matched.kind {
            JobsTopic::DescribeSuccess | JobsTopic::NextJobChanged => {
                let job_id = match matched.concrete_job_id() {
                    Some(id) => Some(id.to_owned()),
                    None => match execution_job_id(publish.payload) {
                        Ok(id) => id,
                        Err(e) => {
                            warn!("Jobs: malformed message on '{}': {}", publish.topic, e);
                            return;
                        }
                    },
                };
                match job_id {
                    None => info!("Jobs: no pending job"),
                    Some(id) if id.starts_with(OTA_JOB_PREFIX) => {
                        debug!("Jobs: update job {}", id);
                        self.forward(publish, OtaEvent::ReceivedJobDocument);
                    }
                    Some(_) => self.stage_custom_job(publish),
                }
            }
            JobsTopic::UpdateSuccess => {
                info!("Jobs: status update accepted for {}", matched.job_id.unwrap_or("?"));
            }
            JobsTopic::UpdateFailed => {
                warn!("Jobs: status update rejected for {}", matched.job_id.unwrap_or("?"));
                error!("Jobs: rejection: {}", String::from_utf8_lossy(publish.payload));
            }
            JobsTopic::StartNextFailed => {
                warn!("Jobs: start-next rejected: {}", String::from_utf8_lossy(publish.payload));
            }
            kind => warn!("Jobs: unexpected {:?} on '{}'", kind, publish.topic),
        }
    }

    fn check_size(&self, publish: &PublishInfo<'_>) {
        assert!(
            publish.payload.len() <= self.max_payload,
            "inbound payload of {} bytes exceeds {}",
            publish.payload.len(),
            self.max_payload
        );
    }

    fn stage_custom_job(&self, publish: &PublishInfo<'_>) {
        match stage_next_job(publish.payload) {
            Ok(Some(request)) => {
                let job_id = request.job_id.clone();
                match self.jobs.submit(request) {
                    Ok(()) => debug!("Jobs: staged {}", job_id),
                    Err(_) => warn!("Jobs: worker busy, job {} dropped", job_id),
                }
            }
            Ok(None) => info!("Jobs: no pending job"),
            Err(e) => warn!("Jobs: cannot stage job from '{}': {}", publish.topic, e),
        }
    }

    fn forward(&self, publish: &PublishInfo<'_>, wrap: fn(EventBuffer) -> OtaEvent) {
        let Some(engine) = self.engine.upgrade() else {
            self.drop_message("engine gone", publish.topic);
            return;
        };
        let Some(mut buffer) = self.pool.acquire() else {
            self.drop_message("no free buffer", publish.topic);
            return;
        };
        buffer.fill(publish.payload);
        if let Err(event) = engine.signal_event(wrap(buffer)) {
            if let Some(buffer) = event.into_buffer() {
                self.pool.release(buffer);
            }
            self.drop_message("engine queue full", publish.topic);
        }
    }

    fn drop_message(&self, reason: &str, topic: &str) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
        warn!("Pool: {}, message on '{}' dropped", reason, topic);
    }
}

// ───────────────────────────────────────────────────────────────
// Engine connection primitives
// ───────────────────────────────────────────────────────────────

/// [`OtaConnection`] over the Command Bridge.
pub struct BridgeConnection {
    bridge: Arc<CommandBridge>,
    dispatch: Arc<InboundDispatch>,
}

impl BridgeConnection {
    pub fn new(bridge: Arc<CommandBridge>, dispatch: Arc<InboundDispatch>) -> Self {
        Self { bridge, dispatch }
    }
}

fn mapped(result: Result<(), MqttError>, op: &str, topic: &str, err: OtaMqttError) -> Result<(), OtaMqttError> {
    result.map_err(|e| {
        error!("OTA: {} '{}' failed: {}", op, topic, e);
        err
    })
}

impl OtaConnection for BridgeConnection {
    fn subscribe(&self, topic_filter: &str, qos: QoS) -> Result<(), OtaMqttError> {
        let category = classify(topic_filter, &self.dispatch.thing_name);
        let Some(callback) = self.dispatch.callback_for(category) else {
            error!("OTA: no receive callback for '{}'", topic_filter);
            return Err(OtaMqttError::SubscribeFailed);
        };
        let result = self.bridge.subscribe(topic_filter, qos, callback);
        mapped(result, "subscribe", topic_filter, OtaMqttError::SubscribeFailed)?;
        info!("OTA: subscribed to '{}'", topic_filter);
        Ok(())
    }

    fn unsubscribe(&self, topic_filter: &str, qos: QoS) -> Result<(), OtaMqttError> {
        let result = self.bridge.unsubscribe(topic_filter, qos);
        mapped(result, "unsubscribe", topic_filter, OtaMqttError::UnsubscribeFailed)?;
        info!("OTA: unsubscribed from '{}'", topic_filter);
        Ok(())
    }

    fn publish(&self, topic: &str, payload: &[u8], qos: QoS) -> Result<(), OtaMqttError> {
        let result = self.bridge.publish(topic, payload, qos);
        mapped(result, "publish", topic, OtaMqttError::PublishFailed)
    }
}
