//! Device-jobs service topic matching and construction.
//!
//! ```text
//! $aws/things/<thing>/jobs/notify                       JobsChanged
//! $aws/things/<thing>/jobs/notify-next                  NextJobChanged
//! $aws/things/<thing>/jobs/get/{accepted|rejected}      GetPending*
//! $aws/things/<thing>/jobs/start-next/{accepted|..}     StartNext*
//! $aws/things/<thing>/jobs/<id>/get/{accepted|..}       Describe*   (<id> may be $next)
//! $aws/things/<thing>/jobs/<id>/update/{accepted|..}    Update*
//! ```

use crate::config::{JOBS_KEYWORD, MAX_JOB_ID_LEN, TOPIC_PREFIX};
use crate::error::JobError;
use crate::mqtt::topic::{TopicBuf, compose};

/// Placeholder job id that addresses the next pending execution.
pub const NEXT_JOB_ID: &str = "$next";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobsTopic {
    JobsChanged,
    NextJobChanged,
    GetPendingSuccess,
    GetPendingFailed,
    StartNextSuccess,
    StartNextFailed,
    DescribeSuccess,
    DescribeFailed,
    UpdateSuccess,
    UpdateFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobsTopicMatch<'a> {
    pub kind: JobsTopic,
    /// Job id level of the topic, for the per-job APIs.
    pub job_id: Option<&'a str>,
}

impl JobsTopicMatch<'_> {
    /// Concrete job id named by the topic; `$next` does not count.
    pub fn concrete_job_id(&self) -> Option<&str> {
        self.job_id.filter(|id| *id != NEXT_JOB_ID)
    }
}

/// Match `topic` against the jobs service topics of `thing_name`.
///
/// Returns `None` for anything that is not a jobs service response or
/// notification for this device.
pub fn match_topic<'a>(topic: &'a str, thing_name: &str) -> Option<JobsTopicMatch<'a>> {
    if thing_name.is_empty() {
        return None;
    }
    let rest = topic
        .strip_prefix(TOPIC_PREFIX)?
        .strip_prefix(thing_name)?
        .strip_prefix('/')?
        .strip_prefix(JOBS_KEYWORD)?
        .strip_prefix('/')?;

    let mut levels = rest.split('/');
    let first = levels.next()?;
    let second = levels.next();
    let third = levels.next();
    if levels.next().is_some() {
        return None;
    }

    let (kind, job_id) = match (first, second, third) {
        ("notify", None, None) => (JobsTopic::JobsChanged, None),
        ("notify-next", None, None) => (JobsTopic::NextJobChanged, None),
        ("get", Some(outcome), None) => (
            accepted_or_rejected(outcome, JobsTopic::GetPendingSuccess, JobsTopic::GetPendingFailed)?,
            None,
        ),
        ("start-next", Some(outcome), None) => (
            accepted_or_rejected(outcome, JobsTopic::StartNextSuccess, JobsTopic::StartNextFailed)?,
            None,
        ),
        (id, Some("get"), Some(outcome)) if id == NEXT_JOB_ID || is_valid_job_id(id) => (
            accepted_or_rejected(outcome, JobsTopic::DescribeSuccess, JobsTopic::DescribeFailed)?,
            Some(id),
        ),
        (id, Some("update"), Some(outcome)) if is_valid_job_id(id) => (
            accepted_or_rejected(outcome, JobsTopic::UpdateSuccess, JobsTopic::UpdateFailed)?,
            Some(id),
        ),
        _ => return None,
    };
    Some(JobsTopicMatch { kind, job_id })
}

fn accepted_or_rejected(level: &str, accepted: JobsTopic, rejected: JobsTopic) -> Option<JobsTopic> {
    match level {
        "accepted" => Some(accepted),
        "rejected" => Some(rejected),
        _ => None,
    }
}

/// Job ids are 1..=64 characters of `[A-Za-z0-9_-]`.
pub fn is_valid_job_id(id: &str) -> bool {
    (1..=MAX_JOB_ID_LEN).contains(&id.len())
        && id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

// ── Topic builders ────────────────────────────────────────────

/// UpdateJobExecution request topic for `job_id`.
pub fn update_topic(thing_name: &str, job_id: &str) -> Result<TopicBuf, JobError> {
    if !is_valid_job_id(job_id) {
        return Err(if job_id.len() > MAX_JOB_ID_LEN {
            JobError::JobIdTooLong
        } else {
            JobError::MissingJobId
        });
    }
    compose(thing_name, JOBS_KEYWORD, format_args!("{job_id}/update")).ok_or(JobError::TopicTooLong)
}

pub fn next_job_notify_topic(thing_name: &str) -> Result<TopicBuf, JobError> {
    compose(thing_name, JOBS_KEYWORD, format_args!("notify-next")).ok_or(JobError::TopicTooLong)
}

/// DescribeJobExecution request for the next pending job.
pub fn describe_next_topic(thing_name: &str) -> Result<TopicBuf, JobError> {
    compose(thing_name, JOBS_KEYWORD, format_args!("{NEXT_JOB_ID}/get")).ok_or(JobError::TopicTooLong)
}

pub fn describe_next_accepted_topic(thing_name: &str) -> Result<TopicBuf, JobError> {
    compose(thing_name, JOBS_KEYWORD, format_args!("{NEXT_JOB_ID}/get/accepted"))
        .ok_or(JobError::TopicTooLong)
}

/// Filter covering the accepted/rejected responses of every status update.
pub fn update_response_filter(thing_name: &str) -> Result<TopicBuf, JobError> {
    compose(thing_name, JOBS_KEYWORD, format_args!("+/update/+")).ok_or(JobError::TopicTooLong)
}

#[cfg(test)]
mod tests {
    use super::*;

    const THING: &str = "ota-EFCAFE";

    fn kind(topic: &str) -> Option<JobsTopic> {
        match_topic(topic, THING).map(|m| m.kind)
    }

    #[test]
    fn notifications() {
        assert_eq!(kind("$aws/things/ota-EFCAFE/jobs/notify"), Some(JobsTopic::JobsChanged));
        assert_eq!(
            kind("$aws/things/ota-EFCAFE/jobs/notify-next"),
            Some(JobsTopic::NextJobChanged)
        );
    }

    #[test]
    fn per_job_responses_carry_job_id() {
        let m = match_topic("$aws/things/ota-EFCAFE/jobs/job-42/update/accepted", THING).unwrap();
        assert_eq!(m.kind, JobsTopic::UpdateSuccess);
        assert_eq!(m.job_id, Some("job-42"));

        let m = match_topic("$aws/things/ota-EFCAFE/jobs/job-42/update/rejected", THING).unwrap();
        assert_eq!(m.kind, JobsTopic::UpdateFailed);

        let m = match_topic("$aws/things/ota-EFCAFE/jobs/$next/get/accepted", THING).unwrap();
        assert_eq!(m.kind, JobsTopic::DescribeSuccess);
        assert_eq!(m.job_id, Some(NEXT_JOB_ID));
        assert_eq!(m.concrete_job_id(), None);
    }

    #[test]
    fn service_level_responses() {
        assert_eq!(
            kind("$aws/things/ota-EFCAFE/jobs/start-next/rejected"),
            Some(JobsTopic::StartNextFailed)
        );
        assert_eq!(
            kind("$aws/things/ota-EFCAFE/jobs/get/accepted"),
            Some(JobsTopic::GetPendingSuccess)
        );
    }

    #[test]
    fn non_jobs_topics() {
        for topic in [
            "$aws/things/ota-EFCAFE/streams/s1/data/raw",
            "$aws/things/ota-000000/jobs/notify-next",
            "$aws/things/ota-EFCAFE/jobs/job-42/update",
            "$aws/things/ota-EFCAFE/jobs/job-42/update/accepted/extra",
            "$aws/things/ota-EFCAFE/jobs/bad id/update/accepted",
            "$aws/things/ota-EFCAFE/jobs/$next/update/accepted",
            "$aws/things/ota-EFCAFE/jobs/get/maybe",
            "$aws/things/ota-EFCAFE/jobs",
        ] {
            assert_eq!(kind(topic), None, "{topic}");
        }
    }

    #[test]
    fn job_id_bounds() {
        assert!(is_valid_job_id("AFR_OTA-job_1"));
        assert!(!is_valid_job_id(""));
        assert!(is_valid_job_id(&"a".repeat(MAX_JOB_ID_LEN)));
        assert!(!is_valid_job_id(&"a".repeat(MAX_JOB_ID_LEN + 1)));
    }

    #[test]
    fn built_topics_match_back() {
        let t = update_topic(THING, "job-42").unwrap();
        assert_eq!(t.as_str(), "$aws/things/ota-EFCAFE/jobs/job-42/update");
        assert_eq!(
            describe_next_topic(THING).unwrap().as_str(),
            "$aws/things/ota-EFCAFE/jobs/$next/get"
        );
        let accepted = describe_next_accepted_topic(THING).unwrap();
        assert_eq!(kind(&accepted), Some(JobsTopic::DescribeSuccess));
        let notify = next_job_notify_topic(THING).unwrap();
        assert_eq!(kind(&notify), Some(JobsTopic::NextJobChanged));
    }

    #[test]
    fn update_topic_rejects_bad_ids() {
        assert_eq!(update_topic(THING, ""), Err(JobError::MissingJobId));
        assert_eq!(
            update_topic(THING, &"a".repeat(MAX_JOB_ID_LEN + 1)),
            Err(JobError::JobIdTooLong)
        );
    }
}
