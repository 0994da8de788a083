// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Subscription table and message dispatch.
//!
//! ```text
//! inbound: node/relay0/command → "1"
//!                  ↓
//!       SubscriptionTable::handlers_for()
//!                  ↓
//!   every entry whose filter matches the topic
//!                  ↓
//!     handlers invoked after the lock is released
//! ```
//!
//! Entries are keyed by (topic filter, subscriber id). Several subscribers
//! may watch the same filter; the broker only needs to hear about each
//! distinct filter once.

use std::sync::Arc;

use parking_lot::RwLock;

use super::{Message, QoS};

/// Callback invoked with every message matching a subscription.
pub type MessageHandler = Arc<dyn Fn(&Message) + Send + Sync>;

struct Entry {
    topic: String,
    qos: QoS,
    subscriber: String,
    handler: MessageHandler,
}

impl std::fmt::Debug for Entry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Entry")
            .field("topic", &self.topic)
            .field("qos", &self.qos)
            .field("subscriber", &self.subscriber)
            .finish_non_exhaustive()
    }
}

/// Result of adding a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscribeOutcome {
    /// The (topic, subscriber) pair already existed; nothing changed.
    Duplicate,
    /// First entry for this topic; the broker must be told.
    NewTopic,
    /// Another subscriber already watches this topic.
    SharedTopic,
}

/// Table of topic interests.
#[derive(Debug, Default)]
pub struct SubscriptionTable {
    entries: RwLock<Vec<Entry>>,
}

impl SubscriptionTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a subscription unless the (topic, subscriber) pair exists.
    pub fn insert(
        &self,
        topic: &str,
        qos: QoS,
        subscriber: &str,
        handler: MessageHandler,
    ) -> SubscribeOutcome {
        let mut entries = self.entries.write();
        if entries
            .iter()
            .any(|e| e.topic == topic && e.subscriber == subscriber)
        {
            return SubscribeOutcome::Duplicate;
        }

        let outcome = if entries.iter().any(|e| e.topic == topic) {
            SubscribeOutcome::SharedTopic
        } else {
            SubscribeOutcome::NewTopic
        };
        entries.push(Entry {
            topic: topic.to_string(),
            qos,
            subscriber: subscriber.to_string(),
            handler,
        });
        outcome
    }

    /// Removes the entry for (topic, subscriber).
    ///
    /// Returns `true` if an entry was removed.
    pub fn remove(&self, topic: &str, subscriber: &str) -> bool {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|e| !(e.topic == topic && e.subscriber == subscriber));
        entries.len() != before
    }

    /// Returns every distinct topic with the highest QoS requested for it,
    /// in first-subscription order.
    #[must_use]
    pub fn distinct_topics(&self) -> Vec<(String, QoS)> {
        let entries = self.entries.read();
        let mut topics: Vec<(String, QoS)> = Vec::new();
        for entry in entries.iter() {
            match topics.iter_mut().find(|(t, _)| *t == entry.topic) {
                Some((_, qos)) => *qos = (*qos).max(entry.qos),
                None => topics.push((entry.topic.clone(), entry.qos)),
            }
        }
        topics
    }

    /// Returns the handlers of every entry whose filter matches `topic`.
    #[must_use]
    pub fn handlers_for(&self, topic: &str) -> Vec<MessageHandler> {
        self.entries
            .read()
            .iter()
            .filter(|e| topic_matches(&e.topic, topic))
            .map(|e| Arc::clone(&e.handler))
            .collect()
    }

    /// Delivers `message` to every matching handler.
    ///
    /// Returns the number of handlers invoked. Handlers run without the table
    /// lock held, so they may subscribe or unsubscribe.
    pub fn dispatch(&self, message: &Message) -> usize {
        let handlers = self.handlers_for(&message.topic);
        if handlers.is_empty() {
            tracing::trace!(topic = %message.topic, "No subscriber for topic");
        }
        for handler in &handlers {
            handler(message);
        }
        handlers.len()
    }

    /// Returns `true` if (topic, subscriber) is registered.
    #[must_use]
    pub fn contains(&self, topic: &str, subscriber: &str) -> bool {
        self.entries
            .read()
            .iter()
            .any(|e| e.topic == topic && e.subscriber == subscriber)
    }

    /// Returns the number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns `true` if the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

/// Returns `true` if `topic` matches the MQTT topic `filter`.
///
/// `+` matches exactly one level, a trailing `#` matches any number of levels
/// including none.
#[must_use]
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');

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
