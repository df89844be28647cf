//! Store sizing and retention configuration.

use std::num::NonZeroUsize;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::collector::RetentionPolicy;
use crate::list::ListLimits;
use crate::{StoreError, StoreResult};

const DEFAULT_PREFERRED_SIZE: NonZeroUsize = NonZeroUsize::new(2500).expect("non-zero");
const DEFAULT_MIN_MESSAGES_PER_TOPIC: usize = 10;
const DEFAULT_COLLECTOR_INTERVAL_MS: u64 = 1000;

/// Sizing and retention settings for one [`ManagedStore`](crate::ManagedStore).
///
/// Missing fields deserialize to their defaults. When `max_size` is not set
/// it follows `2 × preferred_size`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    preferred_size: NonZeroUsize,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_size: Option<NonZeroUsize>,
    min_messages_per_topic: usize,
    collector_interval_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_payload_length: Option<NonZeroUsize>,
}

impl StoreConfig {
    /// Creates a configuration with the given preferred size and defaults for
    /// everything else.
    #[must_use]
    pub fn new(preferred_size: NonZeroUsize) -> Self {
        Self {
            preferred_size,
            ..Self::default()
        }
    }

    /// Sets an explicit hard cap.
    #[must_use]
    pub fn with_max_size(mut self, max_size: NonZeroUsize) -> Self {
        self.max_size = Some(max_size);
        self
    }

    /// Sets the per-topic floor the retention collector never trims below.
    #[must_use]
    pub fn with_min_messages_per_topic(mut self, min: usize) -> Self {
        self.min_messages_per_topic = min;
        self
    }

    /// Sets the retention collector tick interval.
    #[must_use]
    pub fn with_collector_interval(mut self, interval: Duration) -> Self {
        self.collector_interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Limits the length of the per-topic last-payload text.
    #[must_use]
    pub fn with_max_payload_length(mut self, max: NonZeroUsize) -> Self {
        self.max_payload_length = Some(max);
        self
    }

    /// Returns the soft size budget.
    #[must_use]
    pub const fn preferred_size(self) -> NonZeroUsize {
        self.preferred_size
    }

    /// Returns the hard cap.
    #[must_use]
    pub fn max_size(self) -> NonZeroUsize {
        self.max_size
            .unwrap_or_else(|| ListLimits::new(self.preferred_size).max())
    }

    /// Returns the per-topic floor.
    #[must_use]
    pub const fn min_messages_per_topic(self) -> usize {
        self.min_messages_per_topic
    }

    /// Returns the retention collector tick interval.
    #[must_use]
    pub const fn collector_interval(self) -> Duration {
        Duration::from_millis(self.collector_interval_ms)
    }

    /// Returns the last-payload text limit, if any.
    #[must_use]
    pub const fn max_payload_length(self) -> Option<NonZeroUsize> {
        self.max_payload_length
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidConfig`] when the hard cap is below the
    /// preferred size or the collector interval is zero.
    pub fn validate(self) -> StoreResult<()> {
        if self.max_size() < self.preferred_size {
            return Err(StoreError::InvalidConfig(
                "max size cannot be smaller than preferred size",
            ));
        }
        if self.collector_interval_ms == 0 {
            return Err(StoreError::InvalidConfig(
                "collector interval must be greater than zero",
            ));
        }
        Ok(())
    }

    /// Returns the list limits described by this configuration.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidConfig`] when the hard cap is below the
    /// preferred size.
    pub fn list_limits(self) -> StoreResult<ListLimits> {
        ListLimits::with_max(self.preferred_size, self.max_size())
    }

    /// Returns the retention policy applied by both collectors.
    #[must_use]
    pub fn retention_policy(self) -> RetentionPolicy {
        RetentionPolicy::new(self.min_messages_per_topic, self.collector_interval())
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            preferred_size: DEFAULT_PREFERRED_SIZE,
            max_size: None,
            min_messages_per_topic: DEFAULT_MIN_MESSAGES_PER_TOPIC,
            collector_interval_ms: DEFAULT_COLLECTOR_INTERVAL_MS,
            max_payload_length: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nz(value: usize) -> NonZeroUsize {
        NonZeroUsize::new(value).unwrap()
    }

    #[test]
    fn defaults() {
        let config = StoreConfig::default();
        assert_eq!(config.preferred_size().get(), 2500);
        assert_eq!(config.max_size().get(), 5000);
        assert_eq!(config.min_messages_per_topic(), 10);
        assert_eq!(config.collector_interval(), Duration::from_secs(1));
        assert!(config.max_payload_length().is_none());
        config.validate().unwrap();
    }

    #[test]
    fn max_follows_preferred_unless_set() {
        assert_eq!(StoreConfig::new(nz(7)).max_size().get(), 14);
        assert_eq!(StoreConfig::new(nz(7)).with_max_size(nz(9)).max_size().get(), 9);
    }

    #[test]
    fn validate_rejects_inconsistent_values() {
        let err = StoreConfig::new(nz(10)).with_max_size(nz(5)).validate();
        assert!(matches!(err, Err(StoreError::InvalidConfig(_))));

        let err = StoreConfig::default()
            .with_collector_interval(Duration::ZERO)
            .validate();
        assert!(matches!(err, Err(StoreError::InvalidConfig(_))));
    }

    #[test]
    fn deserializes_partial_json() {
        let config: StoreConfig =
            serde_json::from_str(r#"{"preferred_size": 100, "min_messages_per_topic": 2}"#).unwrap();
        assert_eq!(config.preferred_size().get(), 100);
        assert_eq!(config.max_size().get(), 200);
        assert_eq!(config.min_messages_per_topic(), 2);
        assert_eq!(config.collector_interval(), Duration::from_secs(1));
    }

    #[test]
    fn zero_preferred_size_is_rejected_by_serde() {
        assert!(serde_json::from_str::<StoreConfig>(r#"{"preferred_size": 0}"#).is_err());
    }
}
