//! Control-plane topic classification.
//!
//! Topic grammar:
//!
//! ```text
//! $aws/things/<thing name>/<category>/<category-specific sub-path>
//!             └── must equal this device's identity
//!                          └── "jobs" | "streams"
//! ```
//!
//! Works on topic filters as well as topics, since the wildcard levels (if
//! any) come after the category.

use core::fmt::{self, Write as _};

use crate::config::{JOBS_KEYWORD, MAX_TOPIC_LEN, STREAMS_KEYWORD, TOPIC_PREFIX};

/// A topic or topic filter built for this device.
pub type TopicBuf = heapless::String<MAX_TOPIC_LEN>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopicCategory {
    /// Device-jobs service (job notifications, updates, acknowledgements).
    Job,
    /// File-stream service (update image blocks).
    Stream,
    Unrecognized,
}

/// Classify `topic` for the device named `thing_name`.
///
/// Single pass, no allocation. Anything that does not follow the grammar
/// above, including empty levels, is `Unrecognized`.
pub fn classify(topic: &str, thing_name: &str) -> TopicCategory {
    let Some(rest) = topic.strip_prefix(TOPIC_PREFIX) else {
        return TopicCategory::Unrecognized;
    };
    let mut levels = rest.split('/');

    match levels.next() {
        Some(thing) if !thing.is_empty() && thing == thing_name => {}
        _ => return TopicCategory::Unrecognized,
    }

    match levels.next() {
        Some(JOBS_KEYWORD) => TopicCategory::Job,
        Some(STREAMS_KEYWORD) => TopicCategory::Stream,
        _ => TopicCategory::Unrecognized,
    }
}

/// Build `$aws/things/<thing_name>/<keyword>/<tail>`.
///
/// Returns `None` when the result does not fit in [`MAX_TOPIC_LEN`].
pub fn compose(thing_name: &str, keyword: &str, tail: fmt::Arguments<'_>) -> Option<TopicBuf> {
    let mut topic = TopicBuf::new();
    write!(topic, "{TOPIC_PREFIX}{thing_name}/{keyword}/{tail}").ok()?;
    Some(topic)
}
