//! Fuzz target: `classify` / `match_topic` / `topic_matches_filter`
//!
//! Splits the input into a topic and a thing name and asserts that the
//! classifiers never panic and agree with each other: anything the jobs
//! matcher accepts must classify as a jobs topic for the same device.
//!
//! cargo fuzz run fuzz_topic_classify

#![no_main]

use libfuzzer_sys::fuzz_target;
use otabridge::jobs::topics::match_topic;
use otabridge::mqtt::subscriptions::topic_matches_filter;
use otabridge::mqtt::topic::{TopicCategory, classify};

fuzz_target!(|data: &[u8]| {
    let Ok(text) = core::str::from_utf8(data) else {
        return;
    };
    let (topic, thing) = text.split_once('\n').unwrap_or((text, "dev"));

    let category = classify(topic, thing);
    // A thing name spanning several levels is never a valid identity.
    if !thing.contains('/') && match_topic(topic, thing).is_some() {
        assert_eq!(category, TopicCategory::Job, "jobs match outside jobs category");
    }

    // Every topic without wildcards matches itself as a filter.
    if !topic.is_empty() && !topic.contains(['+', '#']) {
        assert!(topic_matches_filter(topic, topic));
    }
    let _ = topic_matches_filter(topic, thing);
});
