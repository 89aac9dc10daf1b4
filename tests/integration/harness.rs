//! Shared fixtures for the integration tests.
//!
//! [`Bench`] wires a full [`OtaRuntime`] over the in-process loopback agent
//! with a simulated flash platform, and runs it on a scoped thread while a
//! test body plays the cloud side (job documents, stream blocks).

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use otabridge::app::events::AgentEvent;
use otabridge::app::ports::{EventSink, UpdateEngine};
use otabridge::app::service::RunSummary;
use otabridge::config::AgentConfig;
use otabridge::error::MqttError;
use otabridge::mqtt::agent::{CommandInfo, MqttAgent, PublishInfo, Subscription};
use otabridge::mqtt::loopback::LoopbackAgent;
use otabridge::mqtt::subscriptions::SubscriptionRegistry;
use otabridge::ota::OtaState;
use otabridge::ota::pal::FlashPal;
use otabridge::runtime::OtaRuntime;

pub const THING: &str = "bench-1";

/// Small blocks and short periods so every test finishes quickly.
pub fn test_config() -> AgentConfig {
    AgentConfig {
        thing_name: THING.try_into().unwrap(),
        mqtt_timeout_ms: 500,
        stats_interval_ms: 20,
        log2_block_size: 8,
        blocks_per_request: 2,
        data_buffers: 4,
        ..AgentConfig::default()
    }
}

/// `$aws/things/bench-1/<tail>`.
pub fn topic(tail: &str) -> String {
    format!("$aws/things/{THING}/{tail}")
}

/// A `$next/get/accepted` style payload carrying one job execution.
pub fn job_execution(job_id: &str, document: &str) -> Vec<u8> {
    format!(r#"{{"execution":{{"jobId":"{job_id}","jobDocument":{document}}}}}"#).into_bytes()
}

/// Poll `cond` until it holds; fails the test after 5 s.
pub fn wait_until(what: &str, mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        thread::sleep(Duration::from_millis(5));
    }
}

// ── RecordingSink ─────────────────────────────────────────────

/// [`EventSink`] whose history stays readable from the test thread.
#[derive(Clone, Default)]
pub struct RecordingSink {
    events: Arc<Mutex<Vec<AgentEvent>>>,
}

#[allow(dead_code)]
impl RecordingSink {
    pub fn events(&self) -> Vec<AgentEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn contains(&self, event: &AgentEvent) -> bool {
        self.events.lock().unwrap().contains(event)
    }

    pub fn count(&self, pred: impl Fn(&AgentEvent) -> bool) -> usize {
        self.events.lock().unwrap().iter().filter(|e| pred(e)).count()
    }
}

impl EventSink for RecordingSink {
    fn emit(&mut self, event: &AgentEvent) {
        self.events.lock().unwrap().push(*event);
    }
}

// ── SilentAgent ───────────────────────────────────────────────

/// Accepts every command and never completes any of them.
#[derive(Default)]
pub struct SilentAgent {
    held: Mutex<Vec<CommandInfo>>,
    registry: Arc<SubscriptionRegistry>,
}

#[allow(dead_code)]
impl SilentAgent {
    pub fn held(&self) -> usize {
        self.held.lock().unwrap().len()
    }

    /// Complete everything held so far with `result`.
    pub fn release_all(&self, result: Result<(), MqttError>) {
        let held = core::mem::take(&mut *self.held.lock().unwrap());
        for command in held {
            command.complete(result);
        }
    }

    fn hold(&self, command: CommandInfo) -> Result<(), MqttError> {
        self.held.lock().unwrap().push(command);
        Ok(())
    }
}

impl MqttAgent for SilentAgent {
    fn publish(&self, _publish: &PublishInfo<'_>, command: CommandInfo) -> Result<(), MqttError> {
        self.hold(command)
    }

    fn subscribe(&self, _subscription: &Subscription<'_>, command: CommandInfo) -> Result<(), MqttError> {
        self.hold(command)
    }

    fn unsubscribe(&self, _subscription: &Subscription<'_>, command: CommandInfo) -> Result<(), MqttError> {
        self.hold(command)
    }

    fn terminate(&self, command: CommandInfo) -> Result<(), MqttError> {
        self.hold(command)
    }

    fn subscriptions(&self) -> &Arc<SubscriptionRegistry> {
        &self.registry
    }
}

// ── Bench ─────────────────────────────────────────────────────

pub struct Bench {
    pub agent: Arc<LoopbackAgent>,
    pub runtime: OtaRuntime<FlashPal>,
    pub sink: RecordingSink,
}

/// Stops the engine when the test body ends, even by panicking, so the
/// scoped runtime thread can always be joined.
struct StopOnDrop<'a>(&'a dyn UpdateEngine);

impl Drop for StopOnDrop<'_> {
    fn drop(&mut self) {
        self.0.shutdown();
    }
}

#[allow(dead_code)]
impl Bench {
    pub fn new() -> Self {
        Self::with(test_config(), FlashPal::new())
    }

    pub fn with(config: AgentConfig, platform: FlashPal) -> Self {
        let agent = LoopbackAgent::start().unwrap();
        let runtime = OtaRuntime::new(config, Arc::clone(&agent) as Arc<dyn MqttAgent>, platform).unwrap();
        Self {
            agent,
            runtime,
            sink: RecordingSink::default(),
        }
    }

    pub fn engine(&self) -> &dyn UpdateEngine {
        self.runtime.engine().as_ref()
    }

    /// Run the runtime while `body` drives it; the engine is shut down
    /// once `body` returns.
    pub fn run<R>(&self, body: impl FnOnce(&Self) -> R) -> (RunSummary, R) {
        thread::scope(|s| {
            let mut sink = self.sink.clone();
            let runner = s.spawn(move || self.runtime.run(&mut sink));
            let stop = StopOnDrop(self.engine());
            let result = body(self);
            drop(stop);
            let summary = runner.join().expect("runtime thread panicked").expect("runtime failed");
            (summary, result)
        })
    }

    /// Wait until the engine has subscribed and asked for the next job.
    pub fn wait_ready(&self) {
        wait_until("engine waiting for a job", || {
            self.engine().state() == OtaState::WaitingForJob
                && !self.agent.published_to(&topic("jobs/$next/get")).is_empty()
        });
    }

    /// Status payloads reported for `job_id`, oldest first.
    pub fn reports(&self, job_id: &str) -> Vec<String> {
        self.agent
            .published_to(&topic(&format!("jobs/{job_id}/update")))
            .iter()
            .map(|m| m.payload_str().to_owned())
            .collect()
    }

    pub fn wait_report(&self, job_id: &str) -> String {
        wait_until("job status report", || !self.reports(job_id).is_empty());
        self.reports(job_id).remove(0)
    }
}
