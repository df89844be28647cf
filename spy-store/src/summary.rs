//! Per-topic aggregates kept in lock-step with a message list.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;

use tracing::{trace, warn};

use crate::format::{Formatter, truncate_chars};
use crate::record::{MessageRecord, SharedRecord};

#[derive(Debug, Clone)]
struct TopicStats {
    count: usize,
    last_message: SharedRecord,
    last_formatted: Arc<str>,
    visible: bool,
}

/// Copy of one topic's summary row, handed to readers.
#[derive(Debug, Clone)]
pub struct TopicSummaryEntry {
    /// Topic name.
    pub topic: String,
    /// Records currently held for the topic.
    pub count: usize,
    /// Most recently received record on the topic.
    pub last_message: SharedRecord,
    /// Last record's payload rendered with the active formatter.
    pub last_formatted_payload: Arc<str>,
    /// Whether the topic is shown in the browse view.
    pub visible: bool,
}

/// Mapping of topic to message count, last message and visibility.
///
/// Must only be mutated together with the list that owns it. A topic whose
/// count drops to zero keeps its entry so it stays listed as known.
#[derive(Debug)]
pub struct TopicSummary {
    name: String,
    topics: HashMap<String, TopicStats>,
    formatter: Formatter,
    max_payload_length: Option<NonZeroUsize>,
}

impl TopicSummary {
    /// Creates an empty summary.
    #[must_use]
    pub fn new(name: impl Into<String>, max_payload_length: Option<NonZeroUsize>) -> Self {
        Self {
            name: name.into(),
            topics: HashMap::new(),
            formatter: Formatter::default(),
            max_payload_length,
        }
    }

    /// Counts `record` against its topic and makes it the topic's last message.
    ///
    /// Returns `true` when this is the first time the topic is seen.
    pub fn increase(&mut self, record: &SharedRecord) -> bool {
        let text = self.render(record);
        match self.topics.get_mut(record.topic()) {
            Some(stats) => {
                stats.count += 1;
                stats.last_message = Arc::clone(record);
                stats.last_formatted = text;
                trace!(summary = %self.name, topic = record.topic(), count = stats.count, "topic count increased");
                false
            }
            None => {
                self.topics.insert(
                    record.topic().to_owned(),
                    TopicStats {
                        count: 1,
                        last_message: Arc::clone(record),
                        last_formatted: text,
                        visible: false,
                    },
                );
                true
            }
        }
    }

    /// Uncounts `record`. Never goes below zero.
    pub fn decrease(&mut self, record: &SharedRecord) {
        match self.topics.get_mut(record.topic()) {
            Some(stats) if stats.count > 0 => stats.count -= 1,
            Some(_) => {
                warn!(summary = %self.name, topic = record.topic(), "topic count already zero; ignoring decrease");
            }
            None => {
                warn!(summary = %self.name, topic = record.topic(), "decrease for unknown topic");
                let text = self.render(record);
                self.topics.insert(
                    record.topic().to_owned(),
                    TopicStats {
                        count: 0,
                        last_message: Arc::clone(record),
                        last_formatted: text,
                        visible: false,
                    },
                );
            }
        }
    }

    /// Returns the count for `topic`, or zero when unknown.
    #[must_use]
    pub fn count(&self, topic: &str) -> usize {
        self.topics.get(topic).map_or(0, |stats| stats.count)
    }

    /// Returns whether `topic` has ever been counted since the last clear.
    #[must_use]
    pub fn contains(&self, topic: &str) -> bool {
        self.topics.contains_key(topic)
    }

    /// Returns the number of known topics.
    #[must_use]
    pub fn topic_count(&self) -> usize {
        self.topics.len()
    }

    /// Iterates over every known topic.
    pub fn topics(&self) -> impl Iterator<Item = &str> {
        self.topics.keys().map(String::as_str)
    }

    /// Returns the most recent record on `topic`.
    #[must_use]
    pub fn last_message(&self, topic: &str) -> Option<SharedRecord> {
        self.topics.get(topic).map(|stats| Arc::clone(&stats.last_message))
    }

    /// Returns the formatted payload of the most recent record on `topic`.
    #[must_use]
    pub fn last_formatted_payload(&self, topic: &str) -> Option<Arc<str>> {
        self.topics.get(topic).map(|stats| Arc::clone(&stats.last_formatted))
    }

    /// Returns the formatter used for last-message text.
    #[must_use]
    pub fn formatter(&self) -> Formatter {
        self.formatter
    }

    /// Switches formatter and re-renders the last message of every topic.
    /// Other records are reformatted on demand by their readers.
    pub fn set_formatter(&mut self, formatter: Formatter) {
        self.formatter = formatter;
        let max = self.max_payload_length;
        for stats in self.topics.values_mut() {
            stats.last_formatted = render_with(formatter, max, &stats.last_message);
        }
    }

    /// Returns whether `topic` is flagged visible.
    #[must_use]
    pub fn is_visible(&self, topic: &str) -> bool {
        self.topics.get(topic).is_some_and(|stats| stats.visible)
    }

    /// Sets the visibility flag of one topic. Unknown topics are ignored.
    pub fn set_visible(&mut self, topic: &str, visible: bool) {
        if let Some(stats) = self.topics.get_mut(topic) {
            stats.visible = visible;
        }
    }

    /// Sets the visibility flag of every listed topic.
    pub fn set_visible_many<'a, I>(&mut self, topics: I, visible: bool)
    where
        I: IntoIterator<Item = &'a str>,
    {
        for topic in topics {
            self.set_visible(topic, visible);
        }
    }

    /// Sets the visibility flag of every known topic.
    pub fn set_all_visible(&mut self, visible: bool) {
        for stats in self.topics.values_mut() {
            stats.visible = visible;
        }
    }

    /// Flips the visibility flag of every listed topic.
    pub fn toggle_visible<'a, I>(&mut self, topics: I)
    where
        I: IntoIterator<Item = &'a str>,
    {
        for topic in topics {
            if let Some(stats) = self.topics.get_mut(topic) {
                stats.visible = !stats.visible;
            }
        }
    }

    /// Copies every row, sorted by topic.
    #[must_use]
    pub fn entries(&self) -> Vec<TopicSummaryEntry> {
        let mut entries: Vec<TopicSummaryEntry> = self
            .topics
            .iter()
            .map(|(topic, stats)| TopicSummaryEntry {
                topic: topic.clone(),
                count: stats.count,
                last_message: Arc::clone(&stats.last_message),
                last_formatted_payload: Arc::clone(&stats.last_formatted),
                visible: stats.visible,
            })
            .collect();
        entries.sort_by(|a, b| a.topic.cmp(&b.topic));
        entries
    }

    /// Forgets every topic.
    pub fn clear(&mut self) {
        self.topics.clear();
    }

    fn render(&self, record: &MessageRecord) -> Arc<str> {
        render_with(self.formatter, self.max_payload_length, record)
    }
}

fn render_with(
    formatter: Formatter,
    max_payload_length: Option<NonZeroUsize>,
    record: &MessageRecord,
) -> Arc<str> {
    let text = record.format(formatter).unwrap_or_else(|err| {
        trace!(%err, topic = record.topic(), "keeping last good payload text");
        record.formatted_payload()
    });

    match max_payload_length {
        Some(max) if text.chars().count() > max.get() => {
            Arc::from(truncate_chars(&text, max.get()))
        }
        _ => text,
    }
}
