//! [`MqttAgent`] over the ESP-IDF MQTT client.
//!
//! The ESP-IDF client already runs its own task and outbox; this adapter
//! adds the agent contract on top of it:
//!
//! ```text
//!  publish/subscribe/unsubscribe ──▶ EspMqttClient::enqueue/subscribe/unsubscribe ──▶ message id
//!                                                                                     │
//!  mqtt-agent thread: EspMqttConnection::next()                                       ▼
//!    Published / Subscribed / Unsubscribed(id) ──▶ PendingTable ──▶ CommandInfo::complete
//!    Received { topic, data }                  ──▶ SubscriptionRegistry::dispatch
//!    Disconnected                              ──▶ fail every pending command
//! ```
//!
//! An acknowledgement can overtake the bookkeeping of its own command (the
//! client task may answer before `enqueue` returns), so early acks are
//! remembered and matched when the command is registered.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use esp_idf_svc::mqtt::client::{
    EspMqttClient, EspMqttConnection, EventPayload, MessageId, MqttClientConfiguration, QoS as EspQoS,
};
use log::{debug, error, info, warn};

use crate::drivers::task_pin;
use crate::error::MqttError;
use crate::mqtt::agent::{CommandInfo, MqttAgent, PublishInfo, QoS, Subscription};
use crate::mqtt::subscriptions::SubscriptionRegistry;

#[derive(Default)]
struct PendingTable {
    waiting: Vec<(MessageId, CommandInfo)>,
    /// Acks seen before their command was registered.
    early: Vec<MessageId>,
}

pub struct EspMqttAgent {
    client: Mutex<Option<EspMqttClient<'static>>>,
    pending: Mutex<PendingTable>,
    registry: Arc<SubscriptionRegistry>,
    terminated: AtomicBool,
}

fn esp_qos(qos: QoS) -> EspQoS {
    match qos {
        QoS::AtMostOnce => EspQoS::AtMostOnce,
        QoS::AtLeastOnce => EspQoS::AtLeastOnce,
        QoS::ExactlyOnce => EspQoS::ExactlyOnce,
    }
}

impl EspMqttAgent {
    /// Connect to `broker_url` as `client_id` and start the event thread.
    pub fn start(broker_url: &str, client_id: &str) -> Result<Arc<Self>, MqttError> {
        let config = MqttClientConfiguration {
            client_id: Some(client_id),
            ..Default::default()
        };
        let (client, connection) = EspMqttClient::new(broker_url, &config).map_err(|e| {
            error!("MQTT: client creation failed: {}", e);
            MqttError::BadParameter
        })?;
        info!("MQTT: client for '{}' created", broker_url);

        let agent = Arc::new(Self {
            client: Mutex::new(Some(client)),
            pending: Mutex::new(PendingTable::default()),
            registry: Arc::new(SubscriptionRegistry::new()),
            terminated: AtomicBool::new(false),
        });
        let worker = Arc::clone(&agent);
        task_pin::spawn(task_pin::MQTT_AGENT_TASK, move || worker.run(connection)).map_err(|e| {
            error!("MQTT: event task spawn failed: {}", e);
            MqttError::NoMemory
        })?;
        Ok(agent)
    }

    fn with_client<T>(
        &self,
        f: impl FnOnce(&mut EspMqttClient<'static>) -> Result<T, esp_idf_svc::sys::EspError>,
    ) -> Result<T, MqttError> {
        if self.terminated.load(Ordering::Acquire) {
            return Err(MqttError::IllegalState);
        }
        let mut guard = self.client.lock().unwrap_or_else(PoisonError::into_inner);
        let client = guard.as_mut().ok_or(MqttError::IllegalState)?;
        f(client).map_err(|e| {
            warn!("MQTT: enqueue failed: {}", e);
            MqttError::NoMemory
        })
    }

    /// Wait for the ack of `id`, or complete now if it already arrived.
    fn register(&self, id: MessageId, command: CommandInfo) {
        let early = {
            let mut table = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(pos) = table.early.iter().position(|e| *e == id) {
                table.early.swap_remove(pos);
                Some(command)
            } else {
                table.waiting.push((id, command));
                None
            }
        };
        if let Some(command) = early {
            command.complete(Ok(()));
        }
    }

    fn acknowledge(&self, id: MessageId) {
        let command = {
            let mut table = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
            match table.waiting.iter().position(|(pending, _)| *pending == id) {
                Some(pos) => Some(table.waiting.swap_remove(pos).1),
                None => {
                    table.early.push(id);
                    None
                }
            }
        };
        if let Some(command) = command {
            debug!("MQTT: message {} acknowledged", id);
            command.complete(Ok(()));
        }
    }

    fn fail_pending(&self, result: MqttError) {
        let waiting = {
            let mut table = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
            table.early.clear();
            core::mem::take(&mut table.waiting)
        };
        for (_, command) in waiting {
            command.complete(Err(result));
        }
    }

    // ── Event thread ──────────────────────────────────────────

    fn run(&self, mut connection: EspMqttConnection) {
        info!("MQTT: event loop running");
        while let Ok(event) = connection.next() {
            match event.payload() {
                EventPayload::Connected(_) => info!("MQTT: connected"),
                EventPayload::Disconnected => {
                    warn!("MQTT: disconnected");
                    self.fail_pending(MqttError::SendFailed);
                }
                EventPayload::Published(id) | EventPayload::Subscribed(id) | EventPayload::Unsubscribed(id) => {
                    self.acknowledge(id);
                }
                EventPayload::Received { topic: Some(topic), data, .. } => {
                    self.registry
                        .dispatch(&PublishInfo::new(topic, data, QoS::AtLeastOnce));
                }
                EventPayload::Received { topic: None, .. } => {
                    warn!("MQTT: fragmented message ignored");
                }
                EventPayload::Error(e) => error!("MQTT: {:?}", e),
                _ => {}
            }
        }
        self.fail_pending(MqttError::IllegalState);
        info!("MQTT: event loop stopped");
    }
}

impl MqttAgent for EspMqttAgent {
    fn publish(&self, publish: &PublishInfo<'_>, command: CommandInfo) -> Result<(), MqttError> {
        let qos = esp_qos(publish.qos);
        let id = self.with_client(|client| client.enqueue(publish.topic, qos, publish.retain, publish.payload))?;
        if publish.qos == QoS::AtMostOnce {
            // No PUBACK for QoS 0.
            command.complete(Ok(()));
        } else {
            self.register(id, command);
        }
        Ok(())
    }

    fn subscribe(&self, subscription: &Subscription<'_>, command: CommandInfo) -> Result<(), MqttError> {
        let qos = esp_qos(subscription.qos);
        let id = self.with_client(|client| client.subscribe(subscription.topic_filter, qos))?;
        self.register(id, command);
        Ok(())
    }

    fn unsubscribe(&self, subscription: &Subscription<'_>, command: CommandInfo) -> Result<(), MqttError> {
        let id = self.with_client(|client| client.unsubscribe(subscription.topic_filter))?;
        self.register(id, command);
        Ok(())
    }

    fn terminate(&self, command: CommandInfo) -> Result<(), MqttError> {
        if self.terminated.swap(true, Ordering::AcqRel) {
            return Err(MqttError::IllegalState);
        }
        // Dropping the client disconnects and ends the event loop.
        let client = self.client.lock().unwrap_or_else(PoisonError::into_inner).take();
        drop(client);
        info!("MQTT: connection terminated");
        command.complete(Ok(()));
        Ok(())
    }

    fn subscriptions(&self) -> &Arc<SubscriptionRegistry> {
        &self.registry
    }
}
