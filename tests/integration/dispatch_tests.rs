//! Inbound dispatch wired into a real runtime whose engine is not running,
//! so signalled events stay queued and can be counted.

use std::sync::Arc;

use otabridge::app::ports::{OtaConnection, UpdateEngine};
use otabridge::dispatch::BridgeConnection;
use otabridge::error::OtaMqttError;
use otabridge::mqtt::agent::{PublishInfo, QoS};
use otabridge::mqtt::topic::{TopicCategory, classify};

use crate::harness::{Bench, THING, job_execution, test_config, topic, wait_until};

fn data_topic() -> String {
    topic("streams/s1/data/raw")
}

#[test]
fn slot_size_follows_configured_block_size() {
    let bench = Bench::new();
    let config = test_config();
    assert_eq!(bench.runtime.pool().slot_size(), config.max_block_size());
    assert_eq!(bench.runtime.pool().capacity(), usize::from(config.data_buffers));
    assert_eq!(bench.runtime.dispatch().max_payload(), config.max_block_size());
}

#[test]
fn largest_block_is_accepted() {
    let bench = Bench::new();
    let max = test_config().max_block_size();
    let payload = vec![0xA5; max];

    bench
        .runtime
        .dispatch()
        .on_data_block(&PublishInfo::new(&data_topic(), &payload, QoS::AtMostOnce));

    let stats = bench.engine().statistics();
    assert_eq!(stats.received, 1);
    assert_eq!(stats.queued, 1);
    assert_eq!(bench.runtime.pool().available(), usize::from(test_config().data_buffers) - 1);
}

#[test]
#[should_panic(expected = "exceeds")]
fn block_one_byte_too_large_is_a_fault() {
    let bench = Bench::new();
    let payload = vec![0; test_config().max_block_size() + 1];
    bench
        .runtime
        .dispatch()
        .on_data_block(&PublishInfo::new(&data_topic(), &payload, QoS::AtMostOnce));
}

#[test]
#[should_panic(expected = "exceeds")]
fn oversized_job_message_is_a_fault() {
    let bench = Bench::new();
    let payload = vec![b' '; test_config().max_block_size() + 1];
    bench.runtime.dispatch().on_job_message(&PublishInfo::new(
        &topic("jobs/notify-next"),
        &payload,
        QoS::AtLeastOnce,
    ));
}

#[test]
fn exhausted_pool_drops_and_counts() {
    let bench = Bench::new();
    let buffers = usize::from(test_config().data_buffers);
    for _ in 0..=buffers {
        bench
            .runtime
            .dispatch()
            .on_data_block(&PublishInfo::new(&data_topic(), b"\0\0\0\0x", QoS::AtMostOnce));
    }
    assert_eq!(bench.runtime.pool().available(), 0);
    assert_eq!(bench.runtime.dispatch().dropped(), 1);
    assert_eq!(bench.engine().statistics().queued as usize, buffers);
}

#[test]
fn update_job_takes_a_buffer_custom_job_does_not() {
    let bench = Bench::new();
    let dispatch = bench.runtime.dispatch();
    let before = bench.runtime.pool().available();

    let custom = job_execution("job-1", r#"{"action":"print","message":"hi"}"#);
    dispatch.on_job_message(&PublishInfo::new(&topic("jobs/notify-next"), &custom, QoS::AtLeastOnce));
    assert_eq!(bench.runtime.pool().available(), before);

    let update = job_execution(
        "AFR_OTA-1",
        r#"{"afr_ota":{"streamname":"s1","files":[{"filepath":"/f","filesize":1}]}}"#,
    );
    dispatch.on_job_message(&PublishInfo::new(
        &topic("jobs/$next/get/accepted"),
        &update,
        QoS::AtLeastOnce,
    ));
    assert_eq!(bench.runtime.pool().available(), before - 1);
    assert_eq!(dispatch.dropped(), 0);
}

#[test]
fn empty_next_job_response_is_ignored() {
    let bench = Bench::new();
    bench.runtime.dispatch().on_job_message(&PublishInfo::new(
        &topic("jobs/$next/get/accepted"),
        br#"{"timestamp":1}"#,
        QoS::AtLeastOnce,
    ));
    assert_eq!(bench.runtime.pool().available(), bench.runtime.pool().capacity());
    assert_eq!(bench.runtime.dispatch().dropped(), 0);
}

// ── Connection primitives ─────────────────────────────────────

#[test]
fn subscribe_picks_callback_by_category() {
    let bench = Bench::new();
    let connection = BridgeConnection::new(
        Arc::clone(bench.runtime.bridge()),
        Arc::clone(bench.runtime.dispatch()),
    );

    connection.subscribe(&data_topic(), QoS::AtMostOnce).unwrap();
    bench.agent.inject(&data_topic(), b"\0\0\0\0abc").unwrap();
    wait_until("block signalled", || bench.engine().statistics().received == 1);
}

#[test]
fn subscribe_to_foreign_topic_is_refused() {
    let bench = Bench::new();
    let connection = BridgeConnection::new(
        Arc::clone(bench.runtime.bridge()),
        Arc::clone(bench.runtime.dispatch()),
    );
    let foreign = "$aws/things/other-device/jobs/notify-next";
    assert_eq!(classify(foreign, THING), TopicCategory::Unrecognized);
    assert_eq!(
        connection.subscribe(foreign, QoS::AtLeastOnce),
        Err(OtaMqttError::SubscribeFailed)
    );
    assert!(!bench.agent.is_subscribed(foreign));
}

#[test]
fn publish_through_connection_reaches_broker() {
    let bench = Bench::new();
    let connection = BridgeConnection::new(
        Arc::clone(bench.runtime.bridge()),
        Arc::clone(bench.runtime.dispatch()),
    );
    let request = topic("streams/s1/get/raw");
    connection.publish(&request, b"{}", QoS::AtMostOnce).unwrap();
    assert_eq!(bench.agent.published_to(&request).len(), 1);
}
