//! Fuzz target: `parse_update_job`
//!
//! Arbitrary job documents must either be rejected with a typed error or
//! yield a file description whose bounded fields hold.
//!
//! cargo fuzz run fuzz_update_job

#![no_main]

use libfuzzer_sys::fuzz_target;
use otabridge::config::OTA_JOB_PREFIX;
use otabridge::jobs::document::JsonDocument;
use otabridge::ota::agent::parse_update_job;

fuzz_target!(|data: &[u8]| {
    let Ok(doc) = JsonDocument::parse(data) else {
        return;
    };
    if let Ok(file) = parse_update_job(&doc) {
        assert!(file.job_id.starts_with(OTA_JOB_PREFIX));
        assert!(!file.stream_name.is_empty());
        assert!(!file.stream_name.contains(['/', '+', '#']));
    }
});
