//! Synchronous command bridge over the asynchronous MQTT agent.
//!
//! Each call enqueues one command and then blocks the calling thread until
//! the agent reports completion or the timeout elapses:
//!
//! ```text
//!  caller thread                         agent thread
//!  ─────────────                         ────────────
//!  ctx = Arc<CommandContext>
//!  agent.publish(.., ctx.clone()) ──────▶ (queued)
//!  wait_timeout(ctx.done) ─ ─ ─ ─ ─ ─ ─ ─ packet sent / acked
//!       │                                ctx.complete(result)
//!       │                                  ├─ registry add/remove (sub/unsub)
//!       ◀──────────────────────────────────└─ done.signal(result)
//!  return result   (or RecvFailed on timeout)
//! ```
//!
//! The context is reference counted: the agent holds one reference until
//! it completes the command, so a completion that arrives after the caller
//! gave up lands in a context nobody waits on any more. Every call gets a
//! fresh context, so a stale completion can never wake a later call.

use std::sync::Arc;
use std::time::Duration;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;
use log::{debug, error, warn};

use crate::config::MAX_TOPIC_LEN;
use crate::error::MqttError;
use crate::events::wait_timeout;

use super::agent::{CommandCompletion, CommandInfo, IncomingPublishCallback, MqttAgent, PublishInfo, QoS, Subscription};
use super::subscriptions::SubscriptionRegistry;

// ── Pending command context ───────────────────────────────────

enum Operation {
    Publish,
    Subscribe {
        registry: Arc<SubscriptionRegistry>,
        filter: heapless::String<MAX_TOPIC_LEN>,
        callback: IncomingPublishCallback,
    },
    Unsubscribe {
        registry: Arc<SubscriptionRegistry>,
        filter: heapless::String<MAX_TOPIC_LEN>,
    },
}

/// Correlates one in-flight command with the thread waiting on it.
struct CommandContext {
    done: Signal<CriticalSectionRawMutex, Result<(), MqttError>>,
    operation: Operation,
}

impl CommandContext {
    fn new(operation: Operation) -> Arc<Self> {
        Arc::new(Self {
            done: Signal::new(),
            operation,
        })
    }
}

impl CommandCompletion for CommandContext {
    fn complete(&self, result: Result<(), MqttError>) {
        let result = match (&self.operation, result) {
            (Operation::Subscribe { registry, filter, callback }, Ok(())) => {
                if registry.add(filter, Arc::clone(callback)) {
                    Ok(())
                } else {
                    error!("Bridge: subscribed to '{}' but it could not be routed", filter);
                    Err(MqttError::NoMemory)
                }
            }
            (Operation::Unsubscribe { registry, filter }, Ok(())) => {
                registry.remove(filter);
                Ok(())
            }
            (_, result) => result,
        };
        self.done.signal(result);
    }
}

// ── Bridge ────────────────────────────────────────────────────

/// Blocking publish/subscribe/unsubscribe over a shared [`MqttAgent`].
///
/// Safe to call from any number of threads at once. Must not be called
/// from the agent's own thread (e.g. inside an incoming-publish callback),
/// since the completion would then never be processed before the timeout.
pub struct CommandBridge {
    agent: Arc<dyn MqttAgent>,
    timeout: Duration,
}

impl CommandBridge {
    pub fn new(agent: Arc<dyn MqttAgent>, timeout: Duration) -> Self {
        Self { agent, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn publish(&self, topic: &str, payload: &[u8], qos: QoS) -> Result<(), MqttError> {
        if topic.is_empty() {
            return Err(MqttError::BadParameter);
        }
        let ctx = CommandContext::new(Operation::Publish);
        let publish = PublishInfo::new(topic, payload, qos);
        self.agent
            .publish(&publish, CommandInfo::new(self.timeout, ctx.clone()))
            .inspect_err(|e| warn!("Bridge: publish to '{}' not queued: {}", topic, e))?;
        self.wait(&ctx, "publish", topic)
    }

    /// Subscribe and route matching PUBLISHes to `on_message`.
    ///
    /// Routing is live before this returns `Ok`.
    pub fn subscribe(
        &self,
        topic_filter: &str,
        qos: QoS,
        on_message: IncomingPublishCallback,
    ) -> Result<(), MqttError> {
        let filter = bounded_filter(topic_filter)?;
        let ctx = CommandContext::new(Operation::Subscribe {
            registry: Arc::clone(self.agent.subscriptions()),
            filter,
            callback: on_message,
        });
        let subscription = Subscription { topic_filter, qos };
        self.agent
            .subscribe(&subscription, CommandInfo::new(self.timeout, ctx.clone()))
            .inspect_err(|e| warn!("Bridge: subscribe to '{}' not queued: {}", topic_filter, e))?;
        self.wait(&ctx, "subscribe", topic_filter)
    }

    pub fn unsubscribe(&self, topic_filter: &str, qos: QoS) -> Result<(), MqttError> {
        let filter = bounded_filter(topic_filter)?;
        let ctx = CommandContext::new(Operation::Unsubscribe {
            registry: Arc::clone(self.agent.subscriptions()),
            filter,
        });
        let subscription = Subscription { topic_filter, qos };
        self.agent
            .unsubscribe(&subscription, CommandInfo::new(self.timeout, ctx.clone()))
            .inspect_err(|e| warn!("Bridge: unsubscribe from '{}' not queued: {}", topic_filter, e))?;
        self.wait(&ctx, "unsubscribe", topic_filter)
    }

    /// Ask the agent to drop the connection. Does not wait.
    pub fn terminate(&self) -> Result<(), MqttError> {
        self.agent
            .terminate(CommandInfo::detached(self.timeout))
            .inspect_err(|e| error!("Bridge: terminate not queued: {}", e))
    }

    fn wait(&self, ctx: &CommandContext, op: &str, topic: &str) -> Result<(), MqttError> {
        match wait_timeout(ctx.done.wait(), self.timeout) {
            Some(Ok(())) => {
                debug!("Bridge: {} '{}' complete", op, topic);
                Ok(())
            }
            Some(Err(e)) => {
                error!("Bridge: {} '{}' failed: {}", op, topic, e);
                Err(e)
            }
            None => {
                error!(
                    "Bridge: {} '{}' timed out after {} ms",
                    op,
                    topic,
                    self.timeout.as_millis()
                );
                Err(MqttError::RecvFailed)
            }
        }
    }
}

fn bounded_filter(topic_filter: &str) -> Result<heapless::String<MAX_TOPIC_LEN>, MqttError> {
    if topic_filter.is_empty() {
        return Err(MqttError::BadParameter);
    }
    let mut filter = heapless::String::new();
    filter
        .push_str(topic_filter)
        .map_err(|()| MqttError::BadParameter)?;
    Ok(filter)
}
