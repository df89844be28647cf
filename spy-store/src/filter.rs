//! Exclusion filters applied to the browse view.

use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};

use crate::format::Formatter;
use crate::record::MessageRecord;
use crate::{StoreError, StoreResult};

/// Handle identifying a filter registered with a view.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FilterId(u64);

impl FilterId {
    pub(crate) const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Returns the raw identifier.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl Display for FilterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "filter-{}", self.0)
    }
}

/// Closed set of exclusion predicates.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FilterKind {
    /// Excludes records whose formatted payload contains `needle`.
    PayloadContains {
        /// Text searched for.
        needle: String,
        /// Whether letter case must match.
        case_sensitive: bool,
    },
    /// Excludes records whose topic matches a wildcard pattern.
    TopicPattern {
        /// Pattern using `+` for one level and `#` for the remaining levels.
        pattern: String,
    },
    /// Excludes retained messages.
    Retained,
}

/// Exclusion filter with an on/off switch.
///
/// A filter that matches a record hides it from the browse view. Inactive
/// filters are skipped entirely.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct MessageFilter {
    kind: FilterKind,
    active: bool,
}

impl MessageFilter {
    /// Creates an active filter.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidFilter`] for an empty payload needle or a
    /// malformed topic pattern.
    pub fn new(kind: FilterKind) -> StoreResult<Self> {
        match &kind {
            FilterKind::PayloadContains { needle, .. } if needle.is_empty() => {
                return Err(StoreError::InvalidFilter("payload needle must not be empty"));
            }
            FilterKind::TopicPattern { pattern } if !is_valid_pattern(pattern) => {
                return Err(StoreError::InvalidFilter("malformed topic pattern"));
            }
            _ => {}
        }
        Ok(Self { kind, active: true })
    }

    /// Excludes records whose payload contains `needle`, ignoring case.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidFilter`] when `needle` is empty.
    pub fn payload_contains(needle: impl Into<String>) -> StoreResult<Self> {
        Self::new(FilterKind::PayloadContains {
            needle: needle.into(),
            case_sensitive: false,
        })
    }

    /// Excludes records whose topic matches `pattern`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidFilter`] when the pattern is malformed.
    pub fn topic_pattern(pattern: impl Into<String>) -> StoreResult<Self> {
        Self::new(FilterKind::TopicPattern {
            pattern: pattern.into(),
        })
    }

    /// Excludes retained messages.
    #[must_use]
    pub fn retained() -> Self {
        Self {
            kind: FilterKind::Retained,
            active: true,
        }
    }

    /// Returns a copy with the active flag set to `active`.
    #[must_use]
    pub fn with_active(mut self, active: bool) -> Self {
        self.active = active;
        self
    }

    /// Returns the predicate.
    #[must_use]
    pub fn kind(&self) -> &FilterKind {
        &self.kind
    }

    /// Returns whether the filter participates in matching.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active
    }

    pub(crate) fn set_active(&mut self, active: bool) {
        self.active = active;
    }

    /// Returns whether the result depends on the active formatter.
    #[must_use]
    pub fn depends_on_formatter(&self) -> bool {
        matches!(self.kind, FilterKind::PayloadContains { .. })
    }

    /// Returns `true` when `record` should be hidden. Ignores the active flag.
    #[must_use]
    pub fn excludes(&self, record: &MessageRecord, formatter: Formatter) -> bool {
        match &self.kind {
            FilterKind::PayloadContains {
                needle,
                case_sensitive,
            } => {
                let text = record
                    .format(formatter)
                    .unwrap_or_else(|_| record.formatted_payload());
                if *case_sensitive {
                    text.contains(needle.as_str())
                } else {
                    text.to_lowercase().contains(&needle.to_lowercase())
                }
            }
            FilterKind::TopicPattern { pattern } => topic_matches(record.topic(), pattern),
            FilterKind::Retained => record.retained(),
        }
    }
}

/// Matches a topic name against a pattern with `+` and `#` wildcards.
#[must_use]
pub fn topic_matches(topic: &str, pattern: &str) -> bool {
    if topic.is_empty() || !is_valid_pattern(pattern) {
        return false;
    }
    if topic == pattern || pattern == "#" {
        return true;
    }

    let mut levels = topic.split('/');
    let mut parts = pattern.split('/');
    loop {
        match (levels.next(), parts.next()) {
            (_, Some("#")) | (None, None) => return true,
            (Some(level), Some(part)) if part == "+" || part == level => {}
            _ => return false,
        }
    }
}

fn is_valid_pattern(pattern: &str) -> bool {
    if pattern.is_empty() || pattern.contains('\0') {
        return false;
    }
    let parts: Vec<&str> = pattern.split('/').collect();
    parts.iter().enumerate().all(|(index, part)| {
        if part.contains('#') {
            *part == "#" && index == parts.len() - 1
        } else {
            !part.contains('+') || *part == "+"
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use spy_primitives::MessageId;

    fn record(topic: &str, payload: &'static str, retained: bool) -> MessageRecord {
        MessageRecord::builder(topic, Bytes::from_static(payload.as_bytes()))
            .retained(retained)
            .build(MessageId::new(1))
            .unwrap()
    }

    #[test]
    fn wildcard_matching() {
        assert!(topic_matches("sport/tennis", "sport/tennis"));
        assert!(topic_matches("sport/tennis", "sport/+"));
        assert!(topic_matches("sport/tennis/player1", "sport/#"));
        assert!(topic_matches("sport", "sport/#"));
        assert!(topic_matches("a/b", "#"));
        assert!(!topic_matches("sport/tennis", "sport/+/player1"));
        assert!(!topic_matches("sport/tennis/x", "sport/+"));
        assert!(!topic_matches("sport/tennis", "sport/ten#"));
    }

    #[test]
    fn malformed_patterns_are_rejected() {
        assert!(MessageFilter::topic_pattern("a/#/b").is_err());
        assert!(MessageFilter::topic_pattern("a/b+").is_err());
        assert!(MessageFilter::topic_pattern("").is_err());
        assert!(MessageFilter::payload_contains("").is_err());
    }

    #[test]
    fn payload_filter_ignores_case_by_default() {
        let filter = MessageFilter::payload_contains("IGNORE").unwrap();
        assert!(filter.excludes(&record("a", "please ignore me", false), Formatter::Plain));
        assert!(!filter.excludes(&record("a", "keep", false), Formatter::Plain));
        assert!(filter.depends_on_formatter());
    }

    #[test]
    fn case_sensitive_payload_filter() {
        let filter = MessageFilter::new(FilterKind::PayloadContains {
            needle: "Hi".into(),
            case_sensitive: true,
        })
        .unwrap();
        assert!(filter.excludes(&record("a", "Hi there", false), Formatter::Plain));
        assert!(!filter.excludes(&record("a", "hi there", false), Formatter::Plain));
    }

    #[test]
    fn payload_filter_sees_formatted_text() {
        let filter = MessageFilter::payload_contains("6869").unwrap();
        let message = record("a", "hi", false);
        assert!(!filter.excludes(&message, Formatter::Plain));
        assert!(filter.excludes(&message, Formatter::HexEncode));
    }

    #[test]
    fn retained_and_topic_filters() {
        assert!(MessageFilter::retained().excludes(&record("a", "x", true), Formatter::Plain));
        assert!(!MessageFilter::retained().excludes(&record("a", "x", false), Formatter::Plain));

        let filter = MessageFilter::topic_pattern("home/+/temp").unwrap();
        assert!(filter.excludes(&record("home/kitchen/temp", "x", false), Formatter::Plain));
        assert!(filter.is_active());
        assert!(!filter.with_active(false).is_active());
    }

    #[test]
    fn filter_serializes_with_tag() {
        let filter = MessageFilter::topic_pattern("a/#").unwrap();
        let json = serde_json::to_value(&filter).unwrap();
        assert_eq!(json["kind"]["kind"], "topic_pattern");
        assert_eq!(json["active"], true);
    }
}
