//! Runtime construction, engine start-up, statistics, suspend/resume and
//! shutdown.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use otabridge::app::commands::AgentCommand;
use otabridge::app::events::AgentEvent;
use otabridge::config::AgentConfig;
use otabridge::error::{Error, OtaError};
use otabridge::app::ports::ImagePlatform;
use otabridge::mqtt::agent::{MqttAgent, PublishInfo, QoS};
use otabridge::mqtt::loopback::LoopbackAgent;
use otabridge::ota::pal::FlashPal;
use otabridge::ota::{ImageState, OtaEvent, OtaState, PlatformImageState};
use otabridge::runtime::OtaRuntime;

use crate::harness::{Bench, test_config, topic, wait_until};

fn describe_requests(bench: &Bench) -> usize {
    bench.agent.published_to(&topic("jobs/$next/get")).len()
}

// ── Construction ──────────────────────────────────────────────

#[test]
fn invalid_config_is_rejected() {
    let agent = LoopbackAgent::start().unwrap();
    let config = AgentConfig {
        log2_block_size: 20,
        ..test_config()
    };
    let result = OtaRuntime::new(config, agent as Arc<dyn MqttAgent>, FlashPal::new());
    assert!(matches!(result, Err(Error::Config(_))));
}

#[test]
fn empty_thing_name_is_derived_from_mac() {
    let config = AgentConfig {
        thing_name: Default::default(),
        ..test_config()
    };
    let bench = Bench::with(config, FlashPal::new());
    assert_eq!(bench.runtime.thing_name(), "ota-EFCAFE");
}

#[test]
fn engine_is_idle_until_run() {
    let bench = Bench::new();
    assert_eq!(bench.engine().state(), OtaState::Init);
    assert!(bench.agent.published().is_empty());
}

// ── Start-up ──────────────────────────────────────────────────

#[test]
fn start_subscribes_and_requests_next_job() {
    let bench = Bench::new();
    bench.run(|b| {
        b.wait_ready();
        assert!(b.agent.is_subscribed(&topic("jobs/notify-next")));
        assert!(b.agent.is_subscribed(&topic("jobs/$next/get/accepted")));
        assert!(b.agent.is_subscribed(&topic("jobs/+/update/+")));

        let request = &b.agent.published_to(&topic("jobs/$next/get"))[0];
        let body: serde_json::Value = serde_json::from_slice(&request.payload).unwrap();
        assert!(body["clientToken"].as_str().is_some_and(|t| t.ends_with(":bench-1")));
    });
}

#[test]
fn run_reports_start_statistics_and_stop() {
    let bench = Bench::new();
    bench.run(|b| {
        b.wait_ready();
        wait_until("a statistics report", || {
            b.sink.count(|e| matches!(e, AgentEvent::Statistics(_))) >= 2
        });
    });

    let events = bench.sink.events();
    assert!(matches!(events.first(), Some(AgentEvent::Started(v)) if *v == test_config().app_version));
    assert!(matches!(events.last(), Some(AgentEvent::Stopped(_))));
}

#[test]
fn shutdown_command_stops_and_unsubscribes() {
    let bench = Bench::new();
    let (summary, _) = bench.run(|b| {
        b.wait_ready();
        b.runtime.commands().send(AgentCommand::Shutdown).unwrap();
        wait_until("engine stopped", || b.engine().state() == OtaState::Stopped);
    });

    assert!(!summary.exit_requested);
    assert!(!bench.agent.is_subscribed(&topic("jobs/notify-next")));
    assert!(!bench.agent.is_subscribed(&topic("jobs/$next/get/accepted")));
    assert!(!bench.agent.is_terminated());
}

#[test]
fn events_after_stop_are_refused() {
    let bench = Bench::new();
    bench.run(|b| b.wait_ready());
    assert_eq!(bench.engine().state(), OtaState::Stopped);

    let pool = bench.runtime.pool();
    let available = pool.available();
    bench.runtime.dispatch().on_job_message(&PublishInfo::new(
        &topic("jobs/$next/get/accepted"),
        br#"{"execution":{"jobId":"AFR_OTA-late","jobDocument":{}}}"#,
        QoS::AtLeastOnce,
    ));
    assert_eq!(pool.available(), available);
    assert_eq!(bench.runtime.dispatch().dropped(), 1);
}

// ── Suspend / resume ──────────────────────────────────────────

#[test]
fn suspend_and_resume_through_service() {
    let bench = Bench::new();
    bench.run(|b| {
        b.wait_ready();
        let service = b.runtime.service();

        service.suspend().unwrap();
        assert_eq!(b.engine().state(), OtaState::Suspended);
        // Already suspended: no-op.
        service.suspend().unwrap();

        let before = describe_requests(b);
        service.resume().unwrap();
        assert_eq!(b.engine().state(), OtaState::WaitingForJob);
        wait_until("job re-requested", || describe_requests(b) > before);

        // Not suspended: no-op.
        service.resume().unwrap();
        assert_eq!(b.engine().state(), OtaState::WaitingForJob);
    });
}

#[test]
fn suspend_and_resume_commands_emit_events() {
    let bench = Bench::new();
    bench.run(|b| {
        b.wait_ready();
        let commands = b.runtime.commands();

        commands.send(AgentCommand::Suspend).unwrap();
        wait_until("suspended event", || b.sink.contains(&AgentEvent::Suspended));

        commands.send(AgentCommand::Resume).unwrap();
        wait_until("resumed event", || {
            b.sink.contains(&AgentEvent::Resumed(OtaState::WaitingForJob))
        });
    });
}

#[test]
fn suspend_before_start_is_refused_at_once() {
    let bench = Bench::new();
    let started = Instant::now();
    assert_eq!(bench.runtime.service().suspend(), Err(OtaError::InvalidState));
    assert!(started.elapsed() < Duration::from_millis(u64::from(test_config().mqtt_timeout_ms)));
    assert_eq!(bench.engine().state(), OtaState::Init);
}

#[test]
fn shutdown_with_full_event_queue_still_stops() {
    let bench = Bench::new();
    let engine = bench.engine();
    let mut queued = 0;
    while engine.signal_event(OtaEvent::RequestFileBlock).is_ok() {
        queued += 1;
    }
    assert!(queued > 0);

    engine.shutdown();
    thread::scope(|s| {
        s.spawn(|| engine.process_events());
    });
    assert_eq!(engine.state(), OtaState::Stopped);
}

#[test]
fn suspended_engine_still_shuts_down() {
    let bench = Bench::new();
    bench.run(|b| {
        b.wait_ready();
        b.runtime.service().suspend().unwrap();
    });
    assert_eq!(bench.engine().state(), OtaState::Stopped);
}

// ── Image self-test ───────────────────────────────────────────

#[test]
fn pending_image_is_accepted_at_start() {
    let bench = Bench::with(test_config(), FlashPal::with_platform_state(PlatformImageState::PendingCommit));
    bench.run(|b| b.wait_ready());

    assert_eq!(bench.engine().image_state(), ImageState::Accepted);
    assert_eq!(bench.runtime.engine().platform().image_state(), PlatformImageState::Valid);
}

#[test]
fn valid_image_needs_no_self_test() {
    let bench = Bench::new();
    bench.run(|b| {
        b.wait_ready();
        thread::sleep(Duration::from_millis(20));
    });
    assert_eq!(bench.engine().image_state(), ImageState::Testing);
}
