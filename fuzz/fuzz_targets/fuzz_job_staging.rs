//! Fuzz target: `stage_next_job` / `execution_job_id`
//!
//! Feeds arbitrary bytes as a next-job payload and asserts that staging
//! never panics and that a staged request always fits its bounds.
//!
//! cargo fuzz run fuzz_job_staging

#![no_main]

use libfuzzer_sys::fuzz_target;
use otabridge::config::{MAX_JOB_DOC_LEN, MAX_JOB_ID_LEN};
use otabridge::jobs::action::JobAction;
use otabridge::jobs::document::JsonDocument;
use otabridge::jobs::worker::{execution_job_id, stage_next_job};

fuzz_target!(|data: &[u8]| {
    let _ = execution_job_id(data);

    if let Ok(Some(request)) = stage_next_job(data) {
        assert!(!request.job_id.is_empty());
        assert!(request.job_id.len() <= MAX_JOB_ID_LEN);
        assert!(request.document.len() <= MAX_JOB_DOC_LEN);

        // What the worker will parse again must still be valid JSON.
        let doc = JsonDocument::parse(request.document.as_bytes()).expect("staged document re-parses");
        if let Some(action) = doc.str_at("action") {
            let _ = JobAction::parse(action);
        }
    }
});
