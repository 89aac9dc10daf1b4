//! Custom job actions: direct dispatch, then staged through a running
//! runtime from `notify-next` / `$next/get/accepted`.

use std::sync::Arc;
use std::time::Duration;

use otabridge::app::events::AgentEvent;
use otabridge::jobs::action::{JobAction, JobActionDispatcher, JobStatus};
use otabridge::mqtt::agent::{MqttAgent, QoS};
use otabridge::mqtt::bridge::CommandBridge;
use otabridge::mqtt::loopback::LoopbackAgent;
use otabridge::ota::OtaState;
use otabridge::ota::pal::FlashPal;

use crate::harness::{Bench, THING, job_execution, test_config, topic, wait_until};

const SUCCEEDED: &str = r#"{"status":"SUCCEEDED"}"#;
const FAILED: &str = r#"{"status":"FAILED"}"#;

fn make_dispatcher(report_unknown: bool) -> (Arc<LoopbackAgent>, JobActionDispatcher) {
    let agent = LoopbackAgent::start().unwrap();
    let bridge = Arc::new(CommandBridge::new(
        Arc::clone(&agent) as Arc<dyn MqttAgent>,
        Duration::from_millis(500),
    ));
    let dispatcher = JobActionDispatcher::new(bridge, THING.try_into().unwrap(), report_unknown);
    (agent, dispatcher)
}

fn statuses(agent: &LoopbackAgent, job_id: &str) -> Vec<String> {
    agent
        .published_to(&topic(&format!("jobs/{job_id}/update")))
        .iter()
        .map(|m| m.payload_str().to_owned())
        .collect()
}

// ── Direct dispatch ───────────────────────────────────────────

#[test]
fn print_reports_succeeded() {
    let (agent, dispatcher) = make_dispatcher(true);
    let outcome = dispatcher.dispatch_text("job-1", r#"{"action":"print","message":"hello"}"#);
    assert_eq!(outcome.action, JobAction::Print);
    assert_eq!(outcome.status, Some(JobStatus::Succeeded));
    assert_eq!(outcome.report, Ok(()));
    assert_eq!(statuses(&agent, "job-1"), vec![SUCCEEDED]);
}

#[test]
fn print_without_message_fails() {
    let (agent, dispatcher) = make_dispatcher(true);
    let outcome = dispatcher.dispatch_text("job-2", r#"{"action":"print"}"#);
    assert_eq!(outcome.status, Some(JobStatus::Failed));
    assert_eq!(statuses(&agent, "job-2"), vec![FAILED]);
}

#[test]
fn publish_relays_at_qos0_then_reports() {
    let (agent, dispatcher) = make_dispatcher(true);
    let outcome = dispatcher.dispatch_text(
        "job-3",
        r#"{"action":"publish","topic":"relay/out","message":"ping"}"#,
    );
    assert!(!outcome.relay_failed);

    let relayed = agent.published_to("relay/out");
    assert_eq!(relayed.len(), 1);
    assert_eq!(relayed[0].payload_str(), "ping");
    assert_eq!(relayed[0].qos, QoS::AtMostOnce);
    assert_eq!(statuses(&agent, "job-3"), vec![SUCCEEDED]);

    // Relay first, status second.
    let order: Vec<String> = agent.published().into_iter().map(|m| m.topic).collect();
    assert_eq!(order, vec!["relay/out".to_string(), topic("jobs/job-3/update")]);
}

#[test]
fn publish_missing_topic_fails_without_relay() {
    let (agent, dispatcher) = make_dispatcher(true);
    let outcome = dispatcher.dispatch_text("job-4", r#"{"action":"publish","message":"ping"}"#);
    assert_eq!(outcome.status, Some(JobStatus::Failed));
    assert_eq!(agent.published().len(), 1);
}

#[test]
fn failed_relay_still_reports_succeeded() {
    let (agent, dispatcher) = make_dispatcher(true);
    agent.fail_publishes_to("relay/");
    let outcome = dispatcher.dispatch_text(
        "job-5",
        r#"{"action":"publish","topic":"relay/out","message":"ping"}"#,
    );
    assert!(outcome.relay_failed);
    assert_eq!(outcome.status, Some(JobStatus::Succeeded));
    assert_eq!(statuses(&agent, "job-5"), vec![SUCCEEDED]);
}

#[test]
fn unknown_action_reporting_is_configurable() {
    let (agent, dispatcher) = make_dispatcher(true);
    let outcome = dispatcher.dispatch_text("job-6", r#"{"action":"reboot"}"#);
    assert_eq!(outcome.action, JobAction::Unknown);
    assert_eq!(statuses(&agent, "job-6"), vec![FAILED]);

    let (agent, dispatcher) = make_dispatcher(false);
    let outcome = dispatcher.dispatch_text("job-7", r#"{"action":"reboot"}"#);
    assert_eq!(outcome.status, None);
    assert!(agent.published().is_empty());
}

#[test]
fn action_keywords_are_case_sensitive() {
    let (agent, dispatcher) = make_dispatcher(true);
    let outcome = dispatcher.dispatch_text("job-8", r#"{"action":"Print","message":"x"}"#);
    assert_eq!(outcome.action, JobAction::Unknown);
    assert_eq!(statuses(&agent, "job-8"), vec![FAILED]);
}

#[test]
fn document_without_action_fails() {
    let (agent, dispatcher) = make_dispatcher(true);
    dispatcher.dispatch_text("job-9", r#"{"message":"x"}"#);
    assert_eq!(statuses(&agent, "job-9"), vec![FAILED]);
}

// ── Through the runtime ───────────────────────────────────────

#[test]
fn notify_next_job_runs_on_worker() {
    let bench = Bench::new();
    let (_, report) = bench.run(|b| {
        b.wait_ready();
        let job = job_execution("job-n1", r#"{"action":"print","message":"from notify"}"#);
        b.agent.inject(&topic("jobs/notify-next"), &job).unwrap();
        b.wait_report("job-n1")
    });
    assert_eq!(report, SUCCEEDED);
}

#[test]
fn describe_response_job_runs_on_worker() {
    let bench = Bench::new();
    let (_, report) = bench.run(|b| {
        b.wait_ready();
        let job = job_execution("job-d1", r#"{"action":"publish","topic":"relay/d","message":"m"}"#);
        b.agent.inject(&topic("jobs/$next/get/accepted"), &job).unwrap();
        b.wait_report("job-d1")
    });
    assert_eq!(report, SUCCEEDED);
    assert_eq!(bench.agent.published_to("relay/d").len(), 1);
}

#[test]
fn jobs_run_in_arrival_order() {
    let mut config = test_config();
    config.report_unknown_actions = false;
    let bench = Bench::with(config, FlashPal::new());
    bench.run(|b| {
        b.wait_ready();
        b.agent
            .inject(&topic("jobs/notify-next"), &job_execution("job-u", r#"{"action":"dance"}"#))
            .unwrap();
        b.agent
            .inject(
                &topic("jobs/notify-next"),
                &job_execution("job-p", r#"{"action":"print","message":"after"}"#),
            )
            .unwrap();
        b.wait_report("job-p");
    });
    assert!(bench.reports("job-u").is_empty());
}

#[test]
fn relay_failure_reaches_run_summary() {
    let bench = Bench::new();
    bench.agent.fail_publishes_to("relay/");
    let (summary, _) = bench.run(|b| {
        b.wait_ready();
        let job = job_execution("job-r1", r#"{"action":"publish","topic":"relay/x","message":"m"}"#);
        b.agent.inject(&topic("jobs/notify-next"), &job).unwrap();
        b.wait_report("job-r1");
        wait_until("relay failure event", || b.sink.contains(&AgentEvent::RelayFailed));
    });
    assert_eq!(summary.relay_failures, 1);
    assert!(summary.failed());
}

#[test]
fn exit_job_ends_run_in_order() {
    let bench = Bench::new();
    let (summary, _) = bench.run(|b| {
        b.wait_ready();
        let job = job_execution("job-x", r#"{"action":"exit"}"#);
        b.agent.inject(&topic("jobs/notify-next"), &job).unwrap();
        wait_until("engine stopped", || b.engine().state() == OtaState::Stopped);
    });

    assert!(summary.exit_requested);
    assert!(!summary.failed());
    assert_eq!(bench.reports("job-x"), vec![SUCCEEDED]);
    assert!(bench.agent.is_terminated());
    assert_eq!(bench.sink.count(|e| *e == AgentEvent::ExitRequested), 1);
    assert!(matches!(bench.sink.events().last(), Some(AgentEvent::Stopped(_))));
}
