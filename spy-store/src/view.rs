//! Browse view: the subset of the all-messages list selected by topic
//! visibility and exclusion filters.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use spy_primitives::MessageId;
use tracing::{debug, trace};

use crate::events::{EventSink, StoreEvent};
use crate::filter::{FilterId, MessageFilter};
use crate::format::Formatter;
use crate::list::{BoundedMessageList, ListGuard, ListLimits};
use crate::record::{MessageRecord, SharedRecord};

/// Topic bookkeeping captured from the source list just before a record is
/// inserted into it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TopicSighting {
    known_topics: usize,
    topic_known: bool,
}

impl TopicSighting {
    /// Captures the state for `topic` from a locked source list.
    #[must_use]
    pub fn capture(source: &ListGuard<'_>, topic: &str) -> Self {
        Self {
            known_topics: source.summary().topic_count(),
            topic_known: source.summary().contains(topic),
        }
    }

    /// Returns whether the topic had been seen before.
    #[must_use]
    pub const fn topic_known(self) -> bool {
        self.topic_known
    }
}

/// What the view did with a newly received record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    /// Every known topic was shown before the record arrived.
    pub all_topics_shown: bool,
    /// The record was added to the browse view.
    pub browsed: bool,
    /// The record's topic was new and got shown automatically.
    pub implicitly_shown: bool,
}

#[derive(Debug)]
struct Selection {
    shown: HashSet<String>,
    filters: BTreeMap<FilterId, MessageFilter>,
    next_filter: u64,
    formatter: Formatter,
}

impl Selection {
    fn excludes(&self, record: &MessageRecord) -> bool {
        self.filters
            .values()
            .filter(|filter| filter.is_active())
            .any(|filter| filter.excludes(record, self.formatter))
    }

    fn admits(&self, record: &MessageRecord) -> bool {
        self.shown.contains(record.topic()) && !self.excludes(record)
    }

    fn formatter_sensitive(&self) -> bool {
        self.filters
            .values()
            .any(|filter| filter.is_active() && filter.depends_on_formatter())
    }
}

/// Live projection of a source list.
///
/// The derived list is a subsequence of the source list, newest first, and
/// holds only records whose topic is shown and that no active filter
/// excludes. Records trimmed by the view's own retention collector stay out
/// until the next [`reinitialise`](Self::reinitialise).
///
/// Lock order is source list, derived list, selection.
#[derive(Debug)]
pub struct FilteredView {
    source: Arc<BoundedMessageList>,
    list: Arc<BoundedMessageList>,
    selection: Mutex<Selection>,
    events: EventSink,
}

impl FilteredView {
    pub(crate) fn new(
        name: &str,
        source: Arc<BoundedMessageList>,
        limits: ListLimits,
        events: EventSink,
    ) -> Self {
        Self {
            list: Arc::new(BoundedMessageList::new(format!("{name}/browse"), limits, None)),
            source,
            selection: Mutex::new(Selection {
                shown: HashSet::new(),
                filters: BTreeMap::new(),
                next_filter: 1,
                formatter: Formatter::default(),
            }),
            events,
        }
    }

    /// Returns the derived list.
    #[must_use]
    pub fn list(&self) -> &Arc<BoundedMessageList> {
        &self.list
    }

    /// Copies the derived records, newest first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<SharedRecord> {
        self.list.snapshot()
    }

    /// Returns the number of records in the view.
    #[must_use]
    pub fn len(&self) -> usize {
        self.list.len()
    }

    /// Returns `true` when no record is browsable.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    /// Returns the shown topics, sorted.
    #[must_use]
    pub fn shown_topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.lock_selection().shown.iter().cloned().collect();
        topics.sort();
        topics
    }

    /// Returns the number of shown topics.
    #[must_use]
    pub fn shown_count(&self) -> usize {
        self.lock_selection().shown.len()
    }

    /// Returns whether `topic` is shown.
    #[must_use]
    pub fn is_shown(&self, topic: &str) -> bool {
        self.lock_selection().shown.contains(topic)
    }

    /// Returns `true` if any active filter excludes `record`.
    #[must_use]
    pub fn matches(&self, record: &MessageRecord) -> bool {
        self.lock_selection().excludes(record)
    }

    /// Returns whether any filter is active.
    #[must_use]
    pub fn message_filters_enabled(&self) -> bool {
        self.lock_selection()
            .filters
            .values()
            .any(MessageFilter::is_active)
    }

    /// Returns every registered filter in registration order.
    #[must_use]
    pub fn filters(&self) -> Vec<(FilterId, MessageFilter)> {
        self.lock_selection()
            .filters
            .iter()
            .map(|(id, filter)| (*id, filter.clone()))
            .collect()
    }

    /// Returns the formatter used by payload filters.
    #[must_use]
    pub fn formatter(&self) -> Formatter {
        self.lock_selection().formatter
    }

    /// Handles a record just inserted into the source list.
    ///
    /// `source` must be the guard used for that insert and `sighting` must
    /// have been captured before it. Adds the record when it passes the
    /// filters and its topic is shown or every topic is shown. A new topic
    /// seen while every topic is shown becomes shown.
    pub fn on_source_record_inserted(
        &self,
        source: &mut ListGuard<'_>,
        record: &SharedRecord,
        sighting: TopicSighting,
    ) -> Admission {
        let mut derived = self.list.lock();
        let mut selection = self.lock_selection();
        let topic = record.topic();

        let all_topics_shown = selection.shown.len() == sighting.known_topics;
        let browsed =
            (all_topics_shown || selection.shown.contains(topic)) && !selection.excludes(record);
        if browsed {
            let before = derived.len();
            let insertion = derived.insert(Arc::clone(record));
            if let Some(evicted) = insertion.evicted {
                self.events.emit(StoreEvent::BrowseRemovedMessage {
                    record: evicted,
                    previous_index: before.saturating_sub(1),
                });
            }
            self.events.emit(StoreEvent::BrowseNewMessage {
                record: Arc::clone(record),
            });
        }

        let implicitly_shown = all_topics_shown && !sighting.topic_known;
        if implicitly_shown {
            selection.shown.insert(topic.to_owned());
            source.summary_mut().set_visible(topic, true);
            debug!(view = self.list.name(), topic, "new topic shown");
        }

        Admission {
            all_topics_shown,
            browsed,
            implicitly_shown,
        }
    }

    /// Removes `record` from the view if present, returning its former index.
    pub fn remove_record(&self, record: &SharedRecord) -> Option<usize> {
        let index = self.list.lock().remove_record(record)?;
        self.events.emit(StoreEvent::BrowseRemovedMessage {
            record: Arc::clone(record),
            previous_index: index,
        });
        Some(index)
    }

    /// Shows or hides one topic. Returns whether anything changed.
    pub fn set_topic_shown(&self, topic: &str, show: bool) -> bool {
        self.set_topics_shown([topic], show, true)
    }

    /// Shows or hides several topics. With `rebuild == false` only the
    /// visibility set changes and the derived list is left alone.
    ///
    /// Unknown topics are ignored. Showing an already shown topic is a no-op.
    pub fn set_topics_shown<'a, I>(&self, topics: I, show: bool, rebuild: bool) -> bool
    where
        I: IntoIterator<Item = &'a str>,
    {
        let topics: Vec<&str> = topics.into_iter().collect();
        let (to_show, to_hide) = if show {
            (topics, Vec::new())
        } else {
            (Vec::new(), topics)
        };
        self.apply(&to_show, &to_hide, rebuild)
    }

    /// Flips the visibility of every listed topic.
    pub fn toggle_shown<'a, I>(&self, topics: I) -> bool
    where
        I: IntoIterator<Item = &'a str>,
    {
        let (to_hide, to_show): (Vec<&str>, Vec<&str>) = {
            let selection = self.lock_selection();
            topics
                .into_iter()
                .partition(|topic| selection.shown.contains(*topic))
        };
        self.apply(&to_show, &to_hide, true)
    }

    /// Shows every known topic.
    pub fn show_all(&self) -> bool {
        let topics: Vec<String> = self.source.lock().summary().topics().map(str::to_owned).collect();
        self.apply(
            &topics.iter().map(String::as_str).collect::<Vec<_>>(),
            &[],
            true,
        )
    }

    /// Hides every topic and empties the view.
    pub fn hide_all(&self) {
        let mut source = self.source.lock();
        let mut derived = self.list.lock();
        let mut selection = self.lock_selection();

        selection.shown.clear();
        source.summary_mut().set_all_visible(false);
        derived.clear_records();
        debug!(view = self.list.name(), "all topics hidden");
        self.events.emit(StoreEvent::BrowseRebuilt { visible: 0 });
    }

    /// Flips every known topic on its own: shown topics are hidden and
    /// hidden ones are shown.
    pub fn toggle_all_shown(&self) -> bool {
        let topics: Vec<String> = self.source.lock().summary().topics().map(str::to_owned).collect();
        self.toggle_shown(topics.iter().map(String::as_str))
    }

    /// Registers an exclusion filter and rebuilds the view.
    pub fn add_filter(&self, filter: MessageFilter) -> FilterId {
        let source = self.source.lock();
        let mut derived = self.list.lock();
        let mut selection = self.lock_selection();

        let id = FilterId::new(selection.next_filter);
        selection.next_filter += 1;
        debug!(view = self.list.name(), filter = %id, kind = ?filter.kind(), "filter added");
        selection.filters.insert(id, filter);
        self.rebuild(&source, &mut derived, &selection);
        id
    }

    /// Unregisters a filter and rebuilds the view.
    pub fn remove_filter(&self, id: FilterId) -> Option<MessageFilter> {
        let source = self.source.lock();
        let mut derived = self.list.lock();
        let mut selection = self.lock_selection();

        let removed = selection.filters.remove(&id)?;
        debug!(view = self.list.name(), filter = %id, "filter removed");
        self.rebuild(&source, &mut derived, &selection);
        Some(removed)
    }

    /// Switches a filter on or off. Rebuilds only when the flag changes.
    /// Returns `false` for an unknown filter.
    pub fn set_filter_active(&self, id: FilterId, active: bool) -> bool {
        let source = self.source.lock();
        let mut derived = self.list.lock();
        let mut selection = self.lock_selection();

        let Some(filter) = selection.filters.get_mut(&id) else {
            return false;
        };
        if filter.is_active() != active {
            filter.set_active(active);
            debug!(view = self.list.name(), filter = %id, active, "filter toggled");
            self.rebuild(&source, &mut derived, &selection);
        }
        true
    }

    /// Switches the formatter used by both summaries and by payload
    /// filters. Rebuilds when an active filter reads the formatted payload.
    pub fn set_formatter(&self, formatter: Formatter) {
        let mut source = self.source.lock();
        let mut derived = self.list.lock();
        let mut selection = self.lock_selection();

        source.summary_mut().set_formatter(formatter);
        derived.summary_mut().set_formatter(formatter);
        if selection.formatter == formatter {
            return;
        }
        selection.formatter = formatter;
        if selection.formatter_sensitive() {
            self.rebuild(&source, &mut derived, &selection);
        }
    }

    /// Re-derives the view from scratch by replaying the source list from
    /// oldest to newest.
    pub fn reinitialise(&self) {
        let source = self.source.lock();
        let mut derived = self.list.lock();
        let selection = self.lock_selection();
        self.rebuild(&source, &mut derived, &selection);
    }

    /// Empties the view and forgets the shown topics. Filters are kept.
    pub(crate) fn clear(&self) {
        let mut derived = self.list.lock();
        let mut selection = self.lock_selection();
        derived.clear();
        selection.shown.clear();
    }

    fn apply(&self, to_show: &[&str], to_hide: &[&str], rebuild: bool) -> bool {
        let mut source = self.source.lock();
        let mut derived = self.list.lock();
        let mut selection = self.lock_selection();

        let shown: Vec<&str> = to_show
            .iter()
            .copied()
            .filter(|topic| source.summary().contains(topic))
            .filter(|topic| selection.shown.insert((*topic).to_owned()))
            .collect();
        let hidden: Vec<&str> = to_hide
            .iter()
            .copied()
            .filter(|topic| selection.shown.remove(*topic))
            .collect();
        if shown.is_empty() && hidden.is_empty() {
            return false;
        }

        source.summary_mut().set_visible_many(shown.iter().copied(), true);
        source.summary_mut().set_visible_many(hidden.iter().copied(), false);
        debug!(view = self.list.name(), shown = ?shown, hidden = ?hidden, rebuild, "topic visibility changed");

        if rebuild {
            if !hidden.is_empty() {
                let hidden: HashSet<&str> = hidden.into_iter().collect();
                derived.remove_where(|record| hidden.contains(record.topic()));
            }
            if !shown.is_empty() {
                let shown: HashSet<&str> = shown.into_iter().collect();
                merge_topics(&source, &mut derived, &selection, &shown);
            }
            self.events.emit(StoreEvent::BrowseRebuilt {
                visible: derived.len(),
            });
        }
        true
    }

    fn rebuild(&self, source: &ListGuard<'_>, derived: &mut ListGuard<'_>, selection: &Selection) {
        derived.clear_records();
        for record in source.iter().rev() {
            if selection.admits(record) {
                derived.insert(Arc::clone(record));
            }
        }
        trace!(view = self.list.name(), visible = derived.len(), "view rebuilt");
        self.events.emit(StoreEvent::BrowseRebuilt {
            visible: derived.len(),
        });
    }

    fn lock_selection(&self) -> MutexGuard<'_, Selection> {
        self.selection.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Adds the admitted history of `topics` to the derived list, keeping the
/// source order and every record the view already holds.
fn merge_topics(
    source: &ListGuard<'_>,
    derived: &mut ListGuard<'_>,
    selection: &Selection,
    topics: &HashSet<&str>,
) {
    let held: HashSet<MessageId> = derived.iter().map(|record| record.id()).collect();
    let merged: Vec<SharedRecord> = source
        .iter()
        .filter(|record| {
            held.contains(&record.id())
                || (topics.contains(record.topic()) && !selection.excludes(record))
        })
        .cloned()
        .collect();

    derived.clear_records();
    for record in merged.into_iter().rev() {
        derived.insert(record);
    }
}
