//! Full update transfers: job document in, stream blocks in, image
//! verified, status reported, image activated.

use hmac_sha256::Hash;
use serde_json::Value;

use otabridge::ota::OtaState;
use otabridge::ota::pal::TransferState;

use crate::harness::{Bench, job_execution, test_config, topic, wait_until};

const JOB: &str = "AFR_OTA-e2e";
const SUCCEEDED: &str = r#"{"status":"SUCCEEDED"}"#;
const FAILED: &str = r#"{"status":"FAILED"}"#;

/// 600 bytes: two full 256-byte blocks and a short last one.
fn firmware() -> Vec<u8> {
    (0..600u32).map(|i| (i * 7 % 251) as u8).collect()
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn update_job(image: &[u8], sha256: Option<&str>) -> Vec<u8> {
    let sha = sha256.map(|s| format!(r#","sha256":"{s}""#)).unwrap_or_default();
    job_execution(
        JOB,
        &format!(
            r#"{{"afr_ota":{{"streamname":"s1","files":[{{"filepath":"/fw.bin","filesize":{},"fileid":0{sha}}}]}}}}"#,
            image.len()
        ),
    )
}

fn block(index: u32, image: &[u8]) -> Vec<u8> {
    let size = test_config().block_size();
    let start = index as usize * size;
    let end = (start + size).min(image.len());
    let mut payload = index.to_le_bytes().to_vec();
    payload.extend_from_slice(&image[start..end]);
    payload
}

/// `(offset, count)` of every block request sent so far.
fn block_requests(bench: &Bench) -> Vec<(u64, u64)> {
    bench
        .agent
        .published_to(&topic("streams/s1/get/raw"))
        .iter()
        .map(|m| {
            let body: Value = serde_json::from_slice(&m.payload).unwrap();
            (body["o"].as_u64().unwrap(), body["n"].as_u64().unwrap())
        })
        .collect()
}

fn start_transfer(b: &Bench, job: &[u8]) {
    b.wait_ready();
    b.agent.inject(&topic("jobs/$next/get/accepted"), job).unwrap();
    wait_until("transfer started", || {
        b.engine().state() == OtaState::WaitingForFileBlock && !block_requests(b).is_empty()
    });
}

fn send_block(b: &Bench, index: u32, image: &[u8]) {
    b.agent.inject(&topic("streams/s1/data/raw"), &block(index, image)).unwrap();
}

#[test]
fn verified_image_is_reported_and_activated() {
    let image = firmware();
    let sha = hex(&Hash::hash(&image));
    let bench = Bench::new();

    let (summary, _) = bench.run(|b| {
        start_transfer(b, &update_job(&image, Some(&sha)));
        for index in 0..3 {
            send_block(b, index, &image);
        }
        // Activation hands control to the new image: the engine stops.
        wait_until("engine stopped after activation", || b.engine().state() == OtaState::Stopped);
    });

    assert_eq!(bench.reports(JOB), vec![SUCCEEDED]);
    assert_eq!(block_requests(&bench), vec![(0, 2), (2, 1)]);
    assert_eq!(summary.statistics.processed, 3);
    assert_eq!(summary.statistics.dropped, 0);

    let platform = bench.runtime.engine().platform();
    assert_eq!(platform.image(), image.as_slice());
    assert_eq!(platform.activations(), 1);
    drop(platform);

    assert!(!bench.agent.is_subscribed(&topic("streams/s1/data/raw")));
    assert_eq!(bench.runtime.pool().available(), bench.runtime.pool().capacity());
}

#[test]
fn image_without_digest_is_accepted() {
    let image = firmware();
    let bench = Bench::new();
    bench.run(|b| {
        start_transfer(b, &update_job(&image, None));
        for index in 0..3 {
            send_block(b, index, &image);
        }
        wait_until("engine stopped after activation", || b.engine().state() == OtaState::Stopped);
    });
    assert_eq!(bench.reports(JOB), vec![SUCCEEDED]);
    assert_eq!(bench.runtime.engine().platform().activations(), 1);
}

#[test]
fn digest_mismatch_fails_job_and_discards_image() {
    let image = firmware();
    let wrong = "00".repeat(32);
    let bench = Bench::new();

    bench.run(|b| {
        start_transfer(b, &update_job(&image, Some(&wrong)));
        for index in 0..3 {
            send_block(b, index, &image);
        }
        b.wait_report(JOB);
        wait_until("back to waiting for a job", || b.engine().state() == OtaState::WaitingForJob);
    });

    assert_eq!(bench.reports(JOB), vec![FAILED]);
    let platform = bench.runtime.engine().platform();
    assert_eq!(platform.activations(), 0);
    assert_eq!(platform.transfer(), TransferState::Idle);
    assert!(platform.image().is_empty());
}

#[test]
fn out_of_order_block_is_dropped_and_rerequested() {
    let image = firmware();
    let bench = Bench::new();

    let (summary, _) = bench.run(|b| {
        start_transfer(b, &update_job(&image, None));
        send_block(b, 1, &image);
        wait_until("block dropped", || b.engine().statistics().dropped == 1);
        wait_until("window re-requested", || block_requests(b).len() == 2);

        for index in 0..3 {
            send_block(b, index, &image);
        }
        wait_until("engine stopped after activation", || b.engine().state() == OtaState::Stopped);
    });

    assert_eq!(block_requests(&bench)[..2], [(0, 2), (0, 2)]);
    assert_eq!(summary.statistics.dropped, 1);
    assert_eq!(summary.statistics.processed, 3);
    assert_eq!(bench.runtime.engine().platform().image(), image.as_slice());
}

#[test]
fn blocks_while_suspended_are_dropped_and_resume_rerequests() {
    let image = firmware();
    let bench = Bench::new();

    bench.run(|b| {
        start_transfer(b, &update_job(&image, None));
        b.runtime.service().suspend().unwrap();
        assert_eq!(b.engine().state(), OtaState::Suspended);

        send_block(b, 0, &image);
        wait_until("block dropped", || b.engine().statistics().dropped == 1);

        b.runtime.service().resume().unwrap();
        assert_eq!(b.engine().state(), OtaState::WaitingForFileBlock);
        wait_until("window re-requested", || block_requests(b).len() == 2);

        for index in 0..3 {
            send_block(b, index, &image);
        }
        wait_until("engine stopped after activation", || b.engine().state() == OtaState::Stopped);
    });

    assert_eq!(bench.reports(JOB), vec![SUCCEEDED]);
    assert_eq!(block_requests(&bench)[1], (0, 2));
}

#[test]
fn second_update_job_during_transfer_is_ignored() {
    let image = firmware();
    let bench = Bench::new();

    bench.run(|b| {
        start_transfer(b, &update_job(&image, None));
        let other = job_execution(
            "AFR_OTA-other",
            r#"{"afr_ota":{"streamname":"s2","files":[{"filepath":"/b","filesize":10}]}}"#,
        );
        b.agent.inject(&topic("jobs/notify-next"), &other).unwrap();
        // Events are handled in order: once this block is written the
        // second document has been seen.
        send_block(b, 0, &image);
        wait_until("first block written", || b.engine().statistics().processed == 1);
        assert_eq!(b.engine().state(), OtaState::WaitingForFileBlock);
        assert!(!b.agent.is_subscribed(&topic("streams/s2/data/raw")));
    });
    assert!(bench.reports("AFR_OTA-other").is_empty());
}

#[test]
fn empty_image_fails_job() {
    let bench = Bench::new();
    bench.run(|b| {
        b.wait_ready();
        b.agent
            .inject(&topic("jobs/$next/get/accepted"), &update_job(&[], None))
            .unwrap();
        b.wait_report(JOB);
    });
    assert_eq!(bench.reports(JOB), vec![FAILED]);
    assert!(block_requests(&bench).is_empty());
}

#[test]
fn update_job_without_stream_fails_job() {
    let bench = Bench::new();
    bench.run(|b| {
        b.wait_ready();
        let job = job_execution(
            JOB,
            r#"{"afr_ota":{"files":[{"filepath":"/fw.bin","filesize":600}]}}"#,
        );
        b.agent.inject(&topic("jobs/$next/get/accepted"), &job).unwrap();
        b.wait_report(JOB);
        assert_eq!(b.engine().state(), OtaState::WaitingForJob);
    });
    assert_eq!(bench.reports(JOB), vec![FAILED]);
    assert!(block_requests(&bench).is_empty());
    assert_eq!(bench.runtime.engine().platform().transfer(), TransferState::Idle);
}
