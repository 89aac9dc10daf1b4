//! Boundary with the asynchronous MQTT agent.
//!
//! The agent owns the one network connection and its own processing
//! thread. Every operation is *enqueued*: the call returns as soon as the
//! command is queued (or rejected), and the outcome is delivered later,
//! on the agent's thread, through the command's [`CommandCompletion`].
//!
//! Implementations:
//!
//! | Agent | Target | Backing |
//! |-------|--------|---------|
//! | [`LoopbackAgent`](super::loopback::LoopbackAgent) | host | in-process broker simulation |
//! | `EspMqttAgent` | ESP-IDF | `esp_idf_svc::mqtt::client::EspMqttClient` |

use std::sync::Arc;
use std::time::Duration;

use crate::error::MqttError;

use super::subscriptions::SubscriptionRegistry;

/// MQTT delivery guarantee.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QoS {
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

/// An outgoing or incoming PUBLISH.
///
/// Borrowed: agents copy what they need before `publish` returns, so the
/// caller's buffers are free again as soon as the call is back.
#[derive(Debug, Clone, Copy)]
pub struct PublishInfo<'a> {
    pub topic: &'a str,
    pub payload: &'a [u8],
    pub qos: QoS,
    pub retain: bool,
}

impl<'a> PublishInfo<'a> {
    pub fn new(topic: &'a str, payload: &'a [u8], qos: QoS) -> Self {
        Self {
            topic,
            payload,
            qos,
            retain: false,
        }
    }
}

/// One topic filter of a SUBSCRIBE or UNSUBSCRIBE.
#[derive(Debug, Clone, Copy)]
pub struct Subscription<'a> {
    pub topic_filter: &'a str,
    pub qos: QoS,
}

/// Receives the outcome of one enqueued command.
///
/// Called exactly once, on the agent's thread, and must not block.
pub trait CommandCompletion: Send + Sync {
    fn complete(&self, result: Result<(), MqttError>);
}

/// Per-command parameters handed to the agent alongside the operation.
#[derive(Clone)]
pub struct CommandInfo {
    /// How long enqueueing may wait for room in the agent's queue.
    pub block_time: Duration,
    /// Completion target. The agent keeps this alive until it fires.
    pub completion: Option<Arc<dyn CommandCompletion>>,
}

impl CommandInfo {
    pub fn new(block_time: Duration, completion: Arc<dyn CommandCompletion>) -> Self {
        Self {
            block_time,
            completion: Some(completion),
        }
    }

    /// Fire-and-forget command.
    pub fn detached(block_time: Duration) -> Self {
        Self {
            block_time,
            completion: None,
        }
    }

    /// Deliver `result` to the completion target, if any.
    pub fn complete(&self, result: Result<(), MqttError>) {
        if let Some(completion) = &self.completion {
            completion.complete(result);
        }
    }
}

/// Callback invoked on the agent's thread for each matching inbound PUBLISH.
pub type IncomingPublishCallback = Arc<dyn Fn(&PublishInfo<'_>) + Send + Sync>;

/// Asynchronous, queued MQTT connection.
///
/// `Err` from an enqueue method means the command was never queued and
/// its completion will not fire.
pub trait MqttAgent: Send + Sync {
    fn publish(&self, publish: &PublishInfo<'_>, command: CommandInfo) -> Result<(), MqttError>;

    fn subscribe(&self, subscription: &Subscription<'_>, command: CommandInfo) -> Result<(), MqttError>;

    fn unsubscribe(&self, subscription: &Subscription<'_>, command: CommandInfo) -> Result<(), MqttError>;

    /// Disconnect and refuse every later command.
    fn terminate(&self, command: CommandInfo) -> Result<(), MqttError>;

    /// Routing table consulted for every inbound PUBLISH.
    fn subscriptions(&self) -> &Arc<SubscriptionRegistry>;
}
