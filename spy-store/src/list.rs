//! Bounded, newest-first message list with its own topic summary.

use std::collections::VecDeque;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{trace, warn};

use crate::record::SharedRecord;
use crate::summary::{TopicSummary, TopicSummaryEntry};
use crate::{StoreError, StoreResult};

/// Soft and hard size limits of a [`BoundedMessageList`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListLimits {
    preferred: NonZeroUsize,
    max: NonZeroUsize,
}

impl ListLimits {
    /// Creates limits with `max = 2 × preferred`.
    #[must_use]
    pub fn new(preferred: NonZeroUsize) -> Self {
        Self {
            preferred,
            max: NonZeroUsize::new(preferred.get().saturating_mul(2)).unwrap_or(preferred),
        }
    }

    /// Creates limits with an explicit hard cap.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidConfig`] when `max` is below `preferred`.
    pub fn with_max(preferred: NonZeroUsize, max: NonZeroUsize) -> StoreResult<Self> {
        if max < preferred {
            return Err(StoreError::InvalidConfig(
                "max size cannot be smaller than preferred size",
            ));
        }
        Ok(Self { preferred, max })
    }

    /// Returns the soft size budget the retention collector aims for.
    #[must_use]
    pub const fn preferred(self) -> NonZeroUsize {
        self.preferred
    }

    /// Returns the hard cap enforced on every insert.
    #[must_use]
    pub const fn max(self) -> NonZeroUsize {
        self.max
    }
}

/// Result of inserting one record.
#[derive(Debug, Clone)]
pub struct Insertion {
    /// Oldest record dropped to stay within the hard cap.
    pub evicted: Option<SharedRecord>,
    /// Whether the inserted record's topic was unknown to the summary.
    pub first_sighting: bool,
}

#[derive(Debug)]
struct ListState {
    records: VecDeque<SharedRecord>,
    summary: TopicSummary,
}

/// Ordered sequence of records, newest at index 0.
///
/// The records and the topic summary share one mutex. Use [`lock`](Self::lock)
/// when several steps must be atomic; the other methods lock for one call.
#[derive(Debug)]
pub struct BoundedMessageList {
    name: Arc<str>,
    limits: ListLimits,
    state: Mutex<ListState>,
}

impl BoundedMessageList {
    /// Creates an empty list.
    #[must_use]
    pub fn new(
        name: impl Into<Arc<str>>,
        limits: ListLimits,
        max_payload_length: Option<NonZeroUsize>,
    ) -> Self {
        let name = name.into();
        Self {
            state: Mutex::new(ListState {
                records: VecDeque::with_capacity(limits.max().get()),
                summary: TopicSummary::new(name.as_ref(), max_payload_length),
            }),
            name,
            limits,
        }
    }

    /// Returns the list name used in logs.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the configured limits.
    #[must_use]
    pub const fn limits(&self) -> ListLimits {
        self.limits
    }

    /// Acquires the list lock for a multi-step critical section.
    pub fn lock(&self) -> ListGuard<'_> {
        ListGuard {
            name: &self.name,
            limits: self.limits,
            state: self.state.lock().unwrap_or_else(PoisonError::into_inner),
        }
    }

    /// Inserts `record` at the head, evicting the oldest record when full.
    pub fn insert(&self, record: SharedRecord) -> Insertion {
        self.lock().insert(record)
    }

    /// Removes the record at `index`, if present.
    pub fn remove_at(&self, index: usize) -> Option<SharedRecord> {
        self.lock().remove_at(index)
    }

    /// Returns the current number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns `true` when the list holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns whether the list holds more than its preferred size.
    #[must_use]
    pub fn exceeds_preferred(&self) -> bool {
        self.lock().exceeds_preferred()
    }

    /// Returns the summary count for `topic`.
    #[must_use]
    pub fn count_for_topic(&self, topic: &str) -> usize {
        self.lock().summary().count(topic)
    }

    /// Copies the records, newest first, and releases the lock.
    #[must_use]
    pub fn snapshot(&self) -> Vec<SharedRecord> {
        self.lock().iter().cloned().collect()
    }

    /// Copies the topic summary rows and releases the lock.
    #[must_use]
    pub fn summary_entries(&self) -> Vec<TopicSummaryEntry> {
        self.lock().summary().entries()
    }

    /// Removes every record and forgets every topic.
    pub fn clear(&self) {
        self.lock().clear();
    }
}

/// Exclusive access to a [`BoundedMessageList`].
///
/// Every structural change also updates the summary, so the per-topic counts
/// always match the records once the guard is released.
#[derive(Debug)]
pub struct ListGuard<'a> {
    name: &'a str,
    limits: ListLimits,
    state: MutexGuard<'a, ListState>,
}

impl ListGuard<'_> {
    /// Inserts `record` at the head, evicting the oldest record when full.
    pub fn insert(&mut self, record: SharedRecord) -> Insertion {
        let mut evicted = None;
        if self.state.records.len() >= self.limits.max().get() {
            evicted = self.state.records.pop_back();
            if let Some(old) = &evicted {
                self.state.summary.decrease(old);
                trace!(list = self.name, id = %old.id(), topic = old.topic(), "evicted oldest record");
            }
        }

        let first_sighting = self.state.summary.increase(&record);
        self.state.records.push_front(record);

        Insertion {
            evicted,
            first_sighting,
        }
    }

    /// Removes the record at `index`, if present.
    pub fn remove_at(&mut self, index: usize) -> Option<SharedRecord> {
        let removed = self.state.records.remove(index);
        match &removed {
            Some(record) => self.state.summary.decrease(record),
            None => warn!(list = self.name, index, "remove of missing index ignored"),
        }
        removed
    }

    /// Removes `record` wherever it sits, returning its former index.
    /// Removing a record that is no longer present is a no-op.
    pub fn remove_record(&mut self, record: &SharedRecord) -> Option<usize> {
        let index = self.position(record)?;
        self.remove_at(index);
        Some(index)
    }

    /// Returns the index of `record`, matching by id.
    #[must_use]
    pub fn position(&self, record: &SharedRecord) -> Option<usize> {
        let id = record.id();
        self.state.records.iter().position(|candidate| candidate.id() == id)
    }

    /// Removes every record matching `predicate`, returning how many went.
    pub(crate) fn remove_where<F>(&mut self, mut predicate: F) -> usize
    where
        F: FnMut(&SharedRecord) -> bool,
    {
        let ListState { records, summary } = &mut *self.state;
        let before = records.len();
        records.retain(|record| {
            if predicate(record) {
                summary.decrease(record);
                false
            } else {
                true
            }
        });
        before - records.len()
    }

    /// Returns the record at `index`.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&SharedRecord> {
        self.state.records.get(index)
    }

    /// Iterates over the records, newest first.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &SharedRecord> + ExactSizeIterator {
        self.state.records.iter()
    }

    /// Returns the current number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.records.len()
    }

    /// Returns `true` when the list holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.records.is_empty()
    }

    /// Returns whether the list holds more than its preferred size.
    #[must_use]
    pub fn exceeds_preferred(&self) -> bool {
        self.state.records.len() > self.limits.preferred().get()
    }

    /// Returns the list limits.
    #[must_use]
    pub fn limits(&self) -> ListLimits {
        self.limits
    }

    /// Returns the topic summary.
    #[must_use]
    pub fn summary(&self) -> &TopicSummary {
        &self.state.summary
    }

    /// Returns the topic summary for flag and formatter updates.
    pub fn summary_mut(&mut self) -> &mut TopicSummary {
        &mut self.state.summary
    }

    /// Removes every record while keeping known topics at a zero count.
    pub(crate) fn clear_records(&mut self) {
        let ListState { records, summary } = &mut *self.state;
        for record in records.drain(..) {
            summary.decrease(&record);
        }
    }

    /// Removes every record and forgets every topic.
    pub fn clear(&mut self) {
        self.state.records.clear();
        self.state.summary.clear();
    }
}
