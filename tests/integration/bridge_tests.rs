//! Command bridge over the loopback agent and over an agent that never
//! answers.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use otabridge::error::MqttError;
use otabridge::mqtt::agent::{IncomingPublishCallback, MqttAgent, PublishInfo, QoS};
use otabridge::mqtt::bridge::CommandBridge;
use otabridge::mqtt::loopback::LoopbackAgent;

use crate::harness::{SilentAgent, wait_until};

fn loopback_bridge() -> (Arc<LoopbackAgent>, Arc<CommandBridge>) {
    let agent = LoopbackAgent::start().unwrap();
    let bridge = Arc::new(CommandBridge::new(
        Arc::clone(&agent) as Arc<dyn MqttAgent>,
        Duration::from_millis(500),
    ));
    (agent, bridge)
}

fn collector() -> (Arc<Mutex<Vec<String>>>, IncomingPublishCallback) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let callback: IncomingPublishCallback = Arc::new(move |p: &PublishInfo<'_>| {
        sink.lock().unwrap().push(String::from_utf8_lossy(p.payload).into_owned());
    });
    (seen, callback)
}

// ── Timeouts ──────────────────────────────────────────────────

#[test]
fn silent_agent_times_out_within_bound() {
    let agent = Arc::new(SilentAgent::default());
    let bridge = CommandBridge::new(Arc::clone(&agent) as Arc<dyn MqttAgent>, Duration::from_millis(100));

    let started = Instant::now();
    assert_eq!(
        bridge.publish("a/b", b"x", QoS::AtLeastOnce),
        Err(MqttError::RecvFailed)
    );
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(100), "returned early: {elapsed:?}");
    assert!(elapsed < Duration::from_secs(2), "wait not bounded: {elapsed:?}");
    assert_eq!(agent.held(), 1);
}

#[test]
fn timed_out_subscribe_is_not_routed() {
    let agent = Arc::new(SilentAgent::default());
    let bridge = CommandBridge::new(Arc::clone(&agent) as Arc<dyn MqttAgent>, Duration::from_millis(50));
    let (_, callback) = collector();

    assert_eq!(
        bridge.subscribe("a/#", QoS::AtLeastOnce, callback),
        Err(MqttError::RecvFailed)
    );
    assert!(!agent.subscriptions().contains("a/#"));
}

#[test]
fn late_completion_does_not_satisfy_next_call() {
    let agent = Arc::new(SilentAgent::default());
    let bridge = CommandBridge::new(Arc::clone(&agent) as Arc<dyn MqttAgent>, Duration::from_millis(50));

    assert_eq!(bridge.publish("a/b", b"1", QoS::AtLeastOnce), Err(MqttError::RecvFailed));
    agent.release_all(Ok(()));
    assert_eq!(bridge.publish("a/b", b"2", QoS::AtLeastOnce), Err(MqttError::RecvFailed));
}

// ── Loopback ──────────────────────────────────────────────────

#[test]
fn publish_completes_and_is_recorded() {
    let (agent, bridge) = loopback_bridge();
    bridge.publish("dev/telemetry", b"42", QoS::AtLeastOnce).unwrap();

    let sent = agent.published_to("dev/telemetry");
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].payload_str(), "42");
    assert_eq!(sent[0].qos, QoS::AtLeastOnce);
}

#[test]
fn subscription_routes_until_unsubscribed() {
    let (agent, bridge) = loopback_bridge();
    let (seen, callback) = collector();

    bridge.subscribe("dev/in/+", QoS::AtLeastOnce, callback).unwrap();
    agent.inject("dev/in/a", b"one").unwrap();
    wait_until("first delivery", || seen.lock().unwrap().len() == 1);

    bridge.unsubscribe("dev/in/+", QoS::AtLeastOnce).unwrap();
    agent.inject("dev/in/a", b"two").unwrap();
    // A publish after the inject is processed in order, so once it
    // completes the inject has been handled too.
    bridge.publish("dev/out", b"sync", QoS::AtMostOnce).unwrap();
    assert_eq!(*seen.lock().unwrap(), vec!["one".to_string()]);
}

#[test]
fn failed_send_is_reported_to_caller() {
    let (agent, bridge) = loopback_bridge();
    agent.fail_publishes_to("relay/");
    assert_eq!(
        bridge.publish("relay/x", b"m", QoS::AtMostOnce),
        Err(MqttError::SendFailed)
    );
    assert!(agent.published_to("relay/x").is_empty());
}

#[test]
fn commands_after_terminate_fail_fast() {
    let (agent, bridge) = loopback_bridge();
    bridge.terminate().unwrap();
    wait_until("termination", || agent.is_terminated());

    let started = Instant::now();
    assert_eq!(bridge.publish("a/b", b"x", QoS::AtLeastOnce), Err(MqttError::IllegalState));
    assert!(started.elapsed() < bridge.timeout());
}

#[test]
fn concurrent_callers_each_get_their_completion() {
    let (agent, bridge) = loopback_bridge();
    let ok = Arc::new(AtomicUsize::new(0));

    thread::scope(|s| {
        for t in 0..4 {
            let bridge = Arc::clone(&bridge);
            let ok = Arc::clone(&ok);
            s.spawn(move || {
                for i in 0..10 {
                    let payload = format!("{t}-{i}");
                    if bridge.publish("load/test", payload.as_bytes(), QoS::AtLeastOnce).is_ok() {
                        ok.fetch_add(1, Ordering::Relaxed);
                    }
                }
            });
        }
    });

    assert_eq!(ok.load(Ordering::Relaxed), 40);
    assert_eq!(agent.published_to("load/test").len(), 40);
}
