//! Topic-filter → callback routing table.
//!
//! Entries are added and removed by the command bridge's completion
//! handler, on the agent's thread, once the broker has acknowledged the
//! SUBSCRIBE or UNSUBSCRIBE. Inbound PUBLISHes are routed to every entry
//! whose filter matches; callbacks run outside the table lock so they may
//! touch the table themselves.

use core::cell::RefCell;

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use log::{debug, warn};

use crate::config::{MAX_SUBSCRIPTIONS, MAX_TOPIC_LEN};

use super::agent::{IncomingPublishCallback, PublishInfo};

struct SubscriptionEntry {
    filter: heapless::String<MAX_TOPIC_LEN>,
    callback: IncomingPublishCallback,
}

pub struct SubscriptionRegistry {
    entries: Mutex<CriticalSectionRawMutex, RefCell<heapless::Vec<SubscriptionEntry, MAX_SUBSCRIPTIONS>>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(RefCell::new(heapless::Vec::new())),
        }
    }

    /// Register `callback` for `filter`.
    ///
    /// An existing entry for the same filter has its callback replaced.
    /// Returns `false` if the filter is too long or the table is full.
    pub fn add(&self, filter: &str, callback: IncomingPublishCallback) -> bool {
        let mut owned = heapless::String::new();
        if owned.push_str(filter).is_err() {
            warn!("Subs: filter too long ({} bytes)", filter.len());
            return false;
        }
        self.entries.lock(|cell| {
            let mut entries = cell.borrow_mut();
            if let Some(existing) = entries.iter_mut().find(|e| e.filter == filter) {
                existing.callback = callback;
                return true;
            }
            if entries
                .push(SubscriptionEntry {
                    filter: owned,
                    callback,
                })
                .is_err()
            {
                warn!("Subs: table full, cannot add '{}'", filter);
                return false;
            }
            debug!("Subs: added '{}'", filter);
            true
        })
    }

    pub fn remove(&self, filter: &str) {
        self.entries.lock(|cell| {
            let mut entries = cell.borrow_mut();
            if let Some(pos) = entries.iter().position(|e| e.filter == filter) {
                entries.swap_remove(pos);
                debug!("Subs: removed '{}'", filter);
            }
        });
    }

    pub fn contains(&self, filter: &str) -> bool {
        self.entries
            .lock(|cell| cell.borrow().iter().any(|e| e.filter == filter))
    }

    pub fn len(&self) -> usize {
        self.entries.lock(|cell| cell.borrow().len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Invoke every callback whose filter matches the PUBLISH topic.
    /// Returns `false` if nothing matched.
    pub fn dispatch(&self, publish: &PublishInfo<'_>) -> bool {
        let matched: heapless::Vec<IncomingPublishCallback, MAX_SUBSCRIPTIONS> =
            self.entries.lock(|cell| {
                cell.borrow()
                    .iter()
                    .filter(|e| topic_matches_filter(publish.topic, &e.filter))
                    .map(|e| e.callback.clone())
                    .collect()
            });
        if matched.is_empty() {
            warn!("Subs: no subscription for '{}'", publish.topic);
            return false;
        }
        for callback in &matched {
            callback(publish);
        }
        true
    }
}

impl Default for SubscriptionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// MQTT topic-filter matching (`+` one level, `#` remaining levels).
///
/// Topics starting with `$` are not matched by a leading wildcard.
pub fn topic_matches_filter(topic: &str, filter: &str) -> bool {
    if topic.is_empty() || filter.is_empty() {
        return false;
    }
    if topic.starts_with('$') && (filter.starts_with('+') || filter.starts_with('#')) {
        return false;
    }

    let mut topic_levels = topic.split('/');
    let mut filter_levels = filter.split('/');
    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return filter_levels.next().is_none(),
            (Some("+"), Some(_)) => {}
            (Some(f), Some(t)) if f == t => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}
