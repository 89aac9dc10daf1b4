//! In-process MQTT agent for host builds and tests.
//!
//! Behaves like a broker connection that is always up: commands are queued
//! to a dedicated `mqtt-agent` thread which acknowledges them, records every
//! PUBLISH, and echoes a PUBLISH back through the subscription registry when
//! the topic matches something the "broker" holds a subscription for.
//! Inbound traffic from the service side (job documents, stream blocks) is
//! simulated with [`LoopbackAgent::inject`].
//!
//! ```text
//!  publish/subscribe/inject ──▶ EventQueue<LoopbackCommand> ──▶ mqtt-agent thread
//!                                                                ├─ complete(result)
//!                                                                └─ registry.dispatch(..)
//! ```

use core::cell::RefCell;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use log::{debug, info, warn};

use crate::config::EVENT_QUEUE_DEPTH;
use crate::drivers::task_pin;
use crate::error::MqttError;
use crate::events::EventQueue;

use super::agent::{CommandInfo, MqttAgent, PublishInfo, QoS, Subscription};
use super::subscriptions::{SubscriptionRegistry, topic_matches_filter};

/// How long [`LoopbackAgent::inject`] waits for room in the command queue.
const INJECT_BLOCK_TIME: Duration = Duration::from_secs(1);

enum LoopbackCommand {
    Publish {
        topic: String,
        payload: Vec<u8>,
        qos: QoS,
        command: CommandInfo,
    },
    Subscribe {
        filter: String,
        command: CommandInfo,
    },
    Unsubscribe {
        filter: String,
        command: CommandInfo,
    },
    Inbound {
        topic: String,
        payload: Vec<u8>,
    },
    Terminate {
        command: CommandInfo,
    },
}

/// A PUBLISH the agent sent on behalf of a caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: QoS,
}

impl PublishedMessage {
    pub fn payload_str(&self) -> &str {
        core::str::from_utf8(&self.payload).unwrap_or("<binary>")
    }
}

type Shared<T> = Mutex<CriticalSectionRawMutex, RefCell<T>>;

pub struct LoopbackAgent {
    commands: EventQueue<LoopbackCommand, EVENT_QUEUE_DEPTH>,
    registry: Arc<SubscriptionRegistry>,
    /// Filters the simulated broker has acknowledged.
    broker_filters: Shared<Vec<String>>,
    published: Shared<Vec<PublishedMessage>>,
    failing_prefix: Shared<Option<String>>,
    terminated: AtomicBool,
}

impl LoopbackAgent {
    fn new() -> Self {
        Self {
            commands: EventQueue::new(),
            registry: Arc::new(SubscriptionRegistry::new()),
            broker_filters: Mutex::new(RefCell::new(Vec::new())),
            published: Mutex::new(RefCell::new(Vec::new())),
            failing_prefix: Mutex::new(RefCell::new(None)),
            terminated: AtomicBool::new(false),
        }
    }

    /// Create the agent and start its processing thread.
    pub fn start() -> std::io::Result<Arc<Self>> {
        let agent = Arc::new(Self::new());
        let worker = Arc::clone(&agent);
        task_pin::spawn(task_pin::MQTT_AGENT_TASK, move || worker.run())?;
        Ok(agent)
    }

    /// Simulate an inbound PUBLISH from the broker.
    pub fn inject(&self, topic: &str, payload: &[u8]) -> Result<(), MqttError> {
        self.enqueue(
            LoopbackCommand::Inbound {
                topic: topic.into(),
                payload: payload.to_vec(),
            },
            INJECT_BLOCK_TIME,
        )
    }

    /// Every PUBLISH sent so far, oldest first.
    pub fn published(&self) -> Vec<PublishedMessage> {
        self.published.lock(|cell| cell.borrow().clone())
    }

    pub fn published_to(&self, topic: &str) -> Vec<PublishedMessage> {
        self.published
            .lock(|cell| cell.borrow().iter().filter(|m| m.topic == topic).cloned().collect())
    }

    /// Complete every later PUBLISH whose topic starts with `prefix` with
    /// [`MqttError::SendFailed`].
    pub fn fail_publishes_to(&self, prefix: &str) {
        self.failing_prefix
            .lock(|cell| *cell.borrow_mut() = Some(prefix.into()));
    }

    /// Whether the simulated broker holds a subscription for `filter`.
    pub fn is_subscribed(&self, filter: &str) -> bool {
        self.broker_filters
            .lock(|cell| cell.borrow().iter().any(|f| f == filter))
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::Acquire)
    }

    fn enqueue(&self, command: LoopbackCommand, block_time: Duration) -> Result<(), MqttError> {
        if self.is_terminated() {
            return Err(MqttError::IllegalState);
        }
        if self.commands.send_timeout(command, block_time) {
            Ok(())
        } else {
            warn!("MQTT(sim): command queue full");
            Err(MqttError::NoMemory)
        }
    }

    // ── Agent thread ──────────────────────────────────────────

    fn run(&self) {
        let executor: edge_executor::LocalExecutor<'_, 2> = edge_executor::LocalExecutor::new();
        futures_lite::future::block_on(executor.run(self.process_commands()));
    }

    async fn process_commands(&self) {
        info!("MQTT(sim): agent running");
        loop {
            let command = self.commands.receive().await;
            if !self.handle(command) {
                break;
            }
        }
        // Anything still queued will never reach a broker.
        self.commands.drain(|command| match command {
            LoopbackCommand::Publish { command, .. }
            | LoopbackCommand::Subscribe { command, .. }
            | LoopbackCommand::Unsubscribe { command, .. }
            | LoopbackCommand::Terminate { command } => command.complete(Err(MqttError::IllegalState)),
            LoopbackCommand::Inbound { .. } => {}
        });
        info!("MQTT(sim): agent stopped");
    }

    /// Returns `false` once the connection is terminated.
    fn handle(&self, command: LoopbackCommand) -> bool {
        match command {
            LoopbackCommand::Publish {
                topic,
                payload,
                qos,
                command,
            } => {
                let failing = self.failing_prefix.lock(|cell| {
                    cell.borrow()
                        .as_deref()
                        .is_some_and(|prefix| topic.starts_with(prefix))
                });
                if failing {
                    debug!("MQTT(sim): PUBLISH '{}' failed", topic);
                    command.complete(Err(MqttError::SendFailed));
                    return true;
                }
                self.published.lock(|cell| {
                    cell.borrow_mut().push(PublishedMessage {
                        topic: topic.clone(),
                        payload: payload.clone(),
                        qos,
                    });
                });
                command.complete(Ok(()));
                if self.broker_matches(&topic) {
                    self.registry
                        .dispatch(&PublishInfo::new(&topic, &payload, qos));
                }
            }
            LoopbackCommand::Subscribe { filter, command } => {
                self.broker_filters.lock(|cell| {
                    let mut filters = cell.borrow_mut();
                    if !filters.contains(&filter) {
                        filters.push(filter);
                    }
                });
                command.complete(Ok(()));
            }
            LoopbackCommand::Unsubscribe { filter, command } => {
                self.broker_filters
                    .lock(|cell| cell.borrow_mut().retain(|f| *f != filter));
                command.complete(Ok(()));
            }
            LoopbackCommand::Inbound { topic, payload } => {
                self.registry
                    .dispatch(&PublishInfo::new(&topic, &payload, QoS::AtLeastOnce));
            }
            LoopbackCommand::Terminate { command } => {
                self.terminated.store(true, Ordering::Release);
                info!("MQTT(sim): connection terminated");
                command.complete(Ok(()));
                return false;
            }
        }
        true
    }

    fn broker_matches(&self, topic: &str) -> bool {
        self.broker_filters
            .lock(|cell| cell.borrow().iter().any(|f| topic_matches_filter(topic, f)))
    }
}

impl MqttAgent for LoopbackAgent {
    fn publish(&self, publish: &PublishInfo<'_>, command: CommandInfo) -> Result<(), MqttError> {
        let block_time = command.block_time;
        self.enqueue(
            LoopbackCommand::Publish {
                topic: publish.topic.into(),
                payload: publish.payload.to_vec(),
                qos: publish.qos,
                command,
            },
            block_time,
        )
    }

    fn subscribe(&self, subscription: &Subscription<'_>, command: CommandInfo) -> Result<(), MqttError> {
        let block_time = command.block_time;
        self.enqueue(
            LoopbackCommand::Subscribe {
                filter: subscription.topic_filter.into(),
                command,
            },
            block_time,
        )
    }

    fn unsubscribe(&self, subscription: &Subscription<'_>, command: CommandInfo) -> Result<(), MqttError> {
        let block_time = command.block_time;
        self.enqueue(
            LoopbackCommand::Unsubscribe {
                filter: subscription.topic_filter.into(),
                command,
            },
            block_time,
        )
    }

    fn terminate(&self, command: CommandInfo) -> Result<(), MqttError> {
        let block_time = command.block_time;
        self.enqueue(LoopbackCommand::Terminate { command }, block_time)
    }

    fn subscriptions(&self) -> &Arc<SubscriptionRegistry> {
        &self.registry
    }
}
