//! Store facade owning the all-messages list, the browse view and their
//! retention collectors.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use spy_primitives::MessageIdGenerator;
use tokio::runtime::Handle;
use tracing::{info, trace, warn};

use crate::collector::{CollectorHandle, RemovalListener, RetentionCollector};
use crate::config::StoreConfig;
use crate::events::{EventQueue, EventSink, StoreEvent};
use crate::filter::{FilterId, MessageFilter};
use crate::format::Formatter;
use crate::list::{BoundedMessageList, ListGuard};
use crate::record::{MessageRecord, MessageRecordBuilder, SharedRecord};
use crate::summary::TopicSummaryEntry;
use crate::view::{FilteredView, TopicSighting};
use crate::{FormatError, StoreError, StoreResult};

const DEFAULT_STORE_NAME: &str = "messages";

/// Builder for [`ManagedStore`] instances.
#[derive(Debug)]
pub struct ManagedStoreBuilder {
    config: StoreConfig,
    name: Option<String>,
    events: Option<EventQueue>,
    ids: Option<Arc<MessageIdGenerator>>,
    manual_retention: bool,
}

impl ManagedStoreBuilder {
    /// Starts a new builder using the supplied configuration.
    #[must_use]
    pub fn new(config: StoreConfig) -> Self {
        Self {
            config,
            name: None,
            events: None,
            ids: None,
            manual_retention: false,
        }
    }

    /// Sets the name attached to logs and notifications.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Installs the outbound notification queue. This is required before
    /// calling [`build`](Self::build).
    #[must_use]
    pub fn with_event_queue(mut self, events: EventQueue) -> Self {
        self.events = Some(events);
        self
    }

    /// Shares a message id generator with other stores.
    #[must_use]
    pub fn with_id_generator(mut self, ids: Arc<MessageIdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    /// Disables the background collectors. The owner drives retention with
    /// [`ManagedStore::run_retention_pass`].
    #[must_use]
    pub fn with_manual_retention(mut self) -> Self {
        self.manual_retention = true;
        self
    }

    /// Builds the store and starts its collectors on the current tokio
    /// runtime.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidConfig`] for an inconsistent
    /// configuration, [`StoreError::MissingEventQueue`] when no queue was
    /// installed, and [`StoreError::RuntimeUnavailable`] when background
    /// retention is requested outside a tokio runtime.
    pub fn build(self) -> StoreResult<ManagedStore> {
        self.config.validate()?;
        let limits = self.config.list_limits()?;
        let queue = self.events.ok_or(StoreError::MissingEventQueue)?;
        let runtime = if self.manual_retention {
            None
        } else {
            Some(Handle::try_current().map_err(|_| StoreError::RuntimeUnavailable)?)
        };

        let name: Arc<str> = Arc::from(self.name.as_deref().unwrap_or(DEFAULT_STORE_NAME));
        let events = queue.sink(Arc::clone(&name));
        let source = Arc::new(BoundedMessageList::new(
            Arc::clone(&name),
            limits,
            self.config.max_payload_length(),
        ));
        let view = Arc::new(FilteredView::new(
            &name,
            Arc::clone(&source),
            limits,
            events.clone(),
        ));

        let policy = self.config.retention_policy();
        let source_collector = RetentionCollector::new(
            Arc::clone(&source),
            policy,
            Arc::new(SourceRemovals {
                events: events.clone(),
                view: Arc::clone(&view),
            }),
        );
        let browse_collector = RetentionCollector::new(
            Arc::clone(view.list()),
            policy,
            Arc::new(BrowseRemovals {
                events: events.clone(),
            }),
        );

        let handles = match &runtime {
            Some(runtime) => spawn_collectors(runtime, &source_collector, &browse_collector),
            None => Vec::new(),
        };
        info!(
            store = %name,
            preferred = limits.preferred().get(),
            max = limits.max().get(),
            background = !handles.is_empty(),
            "store created"
        );

        Ok(ManagedStore {
            name,
            config: self.config,
            ids: self.ids.unwrap_or_default(),
            source,
            view,
            events,
            source_collector,
            browse_collector,
            runtime,
            handles: Mutex::new(handles),
            formatter_warned: AtomicBool::new(false),
        })
    }
}

fn spawn_collectors(
    runtime: &Handle,
    source: &RetentionCollector,
    browse: &RetentionCollector,
) -> Vec<CollectorHandle> {
    vec![source.clone().spawn(runtime), browse.clone().spawn(runtime)]
}

/// Forwards all-messages removals to the event queue and the browse view.
#[derive(Debug)]
struct SourceRemovals {
    events: EventSink,
    view: Arc<FilteredView>,
}

impl RemovalListener for SourceRemovals {
    fn record_removed(&self, record: &SharedRecord, _previous_index: usize) {
        self.events.emit(StoreEvent::SummaryRemovedMessage {
            topic: record.topic().to_owned(),
            record: Arc::clone(record),
        });
        self.view.remove_record(record);
    }
}

/// Forwards browse-view removals to the event queue.
#[derive(Debug)]
struct BrowseRemovals {
    events: EventSink,
}

impl RemovalListener for BrowseRemovals {
    fn record_removed(&self, record: &SharedRecord, previous_index: usize) {
        self.events.emit(StoreEvent::BrowseRemovedMessage {
            record: Arc::clone(record),
            previous_index,
        });
    }
}

/// The only entry point the rest of an application talks to.
///
/// Owns the all-messages list with its topic summary, the browse view over
/// it and one retention collector for each. Ingestion and control calls are
/// synchronous; every change is reported on the event queue in order.
#[derive(Debug)]
pub struct ManagedStore {
    name: Arc<str>,
    config: StoreConfig,
    ids: Arc<MessageIdGenerator>,
    source: Arc<BoundedMessageList>,
    view: Arc<FilteredView>,
    events: EventSink,
    source_collector: RetentionCollector,
    browse_collector: RetentionCollector,
    runtime: Option<Handle>,
    handles: Mutex<Vec<CollectorHandle>>,
    formatter_warned: AtomicBool,
}

impl ManagedStore {
    /// Creates a builder for a store.
    #[must_use]
    pub fn builder(config: StoreConfig) -> ManagedStoreBuilder {
        ManagedStoreBuilder::new(config)
    }

    /// Assigns the next id to `message` and ingests it.
    ///
    /// The id is drawn under the all-messages lock, so records from
    /// concurrent producers land in id order. A rejected message consumes
    /// no id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidRecord`] when the message fails
    /// validation.
    pub fn on_message_received(&self, message: MessageRecordBuilder) -> StoreResult<SharedRecord> {
        message.validate()?;
        let mut source = self.source.lock();
        let record = Arc::new(message.build(self.ids.next_id())?);
        self.ingest(&mut source, &record);
        Ok(record)
    }

    /// Ingests an already built record.
    pub fn receive_record(&self, record: MessageRecord) -> SharedRecord {
        let record = Arc::new(record);
        let mut source = self.source.lock();
        self.ingest(&mut source, &record);
        record
    }

    /// Runs under the all-messages lock: insert with hard-cap eviction,
    /// browse admission, formatting, then the summary notification.
    fn ingest(&self, source: &mut ListGuard<'_>, record: &SharedRecord) {
        let sighting = TopicSighting::capture(source, record.topic());

        let insertion = source.insert(Arc::clone(record));
        if let Some(evicted) = insertion.evicted {
            self.events.emit(StoreEvent::SummaryRemovedMessage {
                topic: evicted.topic().to_owned(),
                record: Arc::clone(&evicted),
            });
            self.view.remove_record(&evicted);
        }

        let admission = self.view.on_source_record_inserted(source, record, sighting);

        let formatter = source.summary().formatter();
        if let Err(err) = record.format(formatter) {
            self.warn_formatter(&err);
        }

        self.events.emit(StoreEvent::SummaryNewMessage {
            topic: record.topic().to_owned(),
            record: Arc::clone(record),
            first_sighting: insertion.first_sighting,
        });
        trace!(
            store = %self.name,
            id = %record.id(),
            topic = record.topic(),
            browsed = admission.browsed,
            size = source.len(),
            "message stored"
        );
    }

    /// Shows or hides one topic in the browse view.
    pub fn set_topic_shown(&self, topic: &str, show: bool) -> bool {
        self.view.set_topic_shown(topic, show)
    }

    /// Shows or hides several topics; see [`FilteredView::set_topics_shown`].
    pub fn set_topics_shown<'a, I>(&self, topics: I, show: bool, rebuild: bool) -> bool
    where
        I: IntoIterator<Item = &'a str>,
    {
        self.view.set_topics_shown(topics, show, rebuild)
    }

    /// Shows or hides every known topic.
    pub fn set_all_shown(&self, show: bool) {
        if show {
            self.view.show_all();
        } else {
            self.view.hide_all();
        }
    }

    /// Flips the visibility of every listed topic.
    pub fn toggle_shown<'a, I>(&self, topics: I) -> bool
    where
        I: IntoIterator<Item = &'a str>,
    {
        self.view.toggle_shown(topics)
    }

    /// Flips the visibility of every known topic.
    pub fn toggle_all_shown(&self) -> bool {
        self.view.toggle_all_shown()
    }

    /// Registers an exclusion filter and rebuilds the browse view.
    pub fn add_filter(&self, filter: MessageFilter) -> FilterId {
        self.view.add_filter(filter)
    }

    /// Unregisters a filter and rebuilds the browse view.
    pub fn remove_filter(&self, id: FilterId) -> Option<MessageFilter> {
        self.view.remove_filter(id)
    }

    /// Switches a filter on or off.
    pub fn set_filter_active(&self, id: FilterId, active: bool) -> bool {
        self.view.set_filter_active(id, active)
    }

    /// Selects the payload formatter and re-arms the formatter warning.
    pub fn set_formatter(&self, formatter: Formatter) {
        self.view.set_formatter(formatter);
        self.formatter_warned.store(false, Ordering::Release);
        info!(store = %self.name, %formatter, "formatter selected");
    }

    /// Returns the selected payload formatter.
    #[must_use]
    pub fn formatter(&self) -> Formatter {
        self.source.lock().summary().formatter()
    }

    /// Empties both lists and forgets every topic.
    ///
    /// Running collectors are stopped before the lists are emptied and a
    /// fresh pair is started afterwards. A closed store stays closed.
    pub fn clear(&self) {
        let mut handles = self.handles.lock().unwrap_or_else(PoisonError::into_inner);
        let restart = !handles.is_empty();
        for handle in handles.iter_mut() {
            handle.stop();
        }
        handles.clear();

        {
            let mut source = self.source.lock();
            self.view.clear();
            source.clear();
        }
        self.events.emit(StoreEvent::Cleared);

        if let (true, Some(runtime)) = (restart, &self.runtime) {
            *handles = spawn_collectors(runtime, &self.source_collector, &self.browse_collector);
        }
        info!(store = %self.name, collectors = handles.len(), "store cleared");
    }

    /// Stops both retention collectors. Also done on drop.
    pub fn close(&self) {
        let mut handles = self.handles.lock().unwrap_or_else(PoisonError::into_inner);
        if handles.is_empty() {
            return;
        }
        for handle in handles.iter_mut() {
            handle.stop();
        }
        handles.clear();
        info!(store = %self.name, "store closed");
    }

    /// Runs one retention pass over the all-messages list, then the browse
    /// view. Returns the number of records removed from both.
    pub fn run_retention_pass(&self) -> usize {
        self.source_collector.sweep() + self.browse_collector.sweep()
    }

    /// Copies the browse view, newest first.
    #[must_use]
    pub fn browse_snapshot(&self) -> Vec<SharedRecord> {
        self.view.snapshot()
    }

    /// Copies the all-messages list, newest first.
    #[must_use]
    pub fn all_messages_snapshot(&self) -> Vec<SharedRecord> {
        self.source.snapshot()
    }

    /// Copies the topic summary rows, sorted by topic.
    #[must_use]
    pub fn topic_summary(&self) -> Vec<TopicSummaryEntry> {
        self.source.summary_entries()
    }

    /// Returns how many records of `topic` the all-messages list holds.
    #[must_use]
    pub fn count_for_topic(&self, topic: &str) -> usize {
        self.source.count_for_topic(topic)
    }

    /// Returns every topic seen since the last clear, sorted.
    #[must_use]
    pub fn all_topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self
            .source
            .lock()
            .summary()
            .topics()
            .map(str::to_owned)
            .collect();
        topics.sort();
        topics
    }

    /// Returns the shown topics, sorted.
    #[must_use]
    pub fn shown_topics(&self) -> Vec<String> {
        self.view.shown_topics()
    }

    /// Returns whether some known topic is hidden.
    #[must_use]
    pub fn browsing_filters_enabled(&self) -> bool {
        let source = self.source.lock();
        self.view.shown_count() != source.summary().topic_count()
    }

    /// Returns whether any exclusion filter is active.
    #[must_use]
    pub fn message_filters_enabled(&self) -> bool {
        self.view.message_filters_enabled()
    }

    /// Returns the browse view.
    #[must_use]
    pub fn view(&self) -> &FilteredView {
        &self.view
    }

    /// Returns the number of records in the all-messages list.
    #[must_use]
    pub fn len(&self) -> usize {
        self.source.len()
    }

    /// Returns `true` when no message is held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.source.is_empty()
    }

    /// Returns the number of records in the browse view.
    #[must_use]
    pub fn browse_len(&self) -> usize {
        self.view.len()
    }

    /// Returns the store name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the configuration the store was built with.
    #[must_use]
    pub fn config(&self) -> StoreConfig {
        self.config
    }

    fn warn_formatter(&self, err: &FormatError) {
        if self.formatter_warned.swap(true, Ordering::AcqRel) {
            return;
        }
        warn!(store = %self.name, formatter = %err.formatter(), %err, "payload formatting failed; showing last good text");
        self.events.emit(StoreEvent::FormatterWarning {
            formatter: err.formatter(),
            reason: err.to_string(),
        });
    }
}

impl Drop for ManagedStore {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::num::NonZeroUsize;

    use bytes::Bytes;

    use crate::events::{EventStream, StoreNotification};

    fn manual_store(preferred: usize, min: usize) -> (ManagedStore, EventStream) {
        let (queue, stream) = EventQueue::unbounded();
        let config = StoreConfig::new(NonZeroUsize::new(preferred).unwrap())
            .with_min_messages_per_topic(min);
        let store = ManagedStore::builder(config)
            .with_name("unit")
            .with_event_queue(queue)
            .with_manual_retention()
            .build()
            .unwrap();
        (store, stream)
    }

    fn receive(store: &ManagedStore, topic: &str, payload: &'static str) -> SharedRecord {
        store
            .on_message_received(MessageRecord::builder(topic, Bytes::from_static(payload.as_bytes())))
            .unwrap()
    }

    fn labels(events: &[StoreNotification]) -> Vec<&'static str> {
        events.iter().map(|n| n.event.label()).collect()
    }

    #[test]
    fn build_requires_event_queue() {
        let err = ManagedStore::builder(StoreConfig::default())
            .with_manual_retention()
            .build()
            .expect_err("queue missing");
        assert!(matches!(err, StoreError::MissingEventQueue));
    }

    #[test]
    fn build_outside_runtime_needs_manual_retention() {
        let (queue, _stream) = EventQueue::unbounded();
        let err = ManagedStore::builder(StoreConfig::default())
            .with_event_queue(queue)
            .build()
            .expect_err("no runtime");
        assert!(matches!(err, StoreError::RuntimeUnavailable));
    }

    #[test]
    fn ids_increase_and_events_are_ordered() {
        let (store, mut stream) = manual_store(2, 0);
        let first = receive(&store, "a", "1");
        let second = receive(&store, "a", "2");
        assert!(second.id() > first.id());

        let events = stream.drain();
        assert_eq!(
            labels(&events),
            vec!["browse-new", "summary-new", "browse-new", "summary-new"]
        );
        assert!(events.iter().all(|n| n.store.as_ref() == "unit"));
        assert!(matches!(
            events[1].event,
            StoreEvent::SummaryNewMessage { first_sighting: true, .. }
        ));
        assert!(matches!(
            events[3].event,
            StoreEvent::SummaryNewMessage { first_sighting: false, .. }
        ));
    }

    #[test]
    fn hard_cap_eviction_cascades_to_view() {
        let (store, mut stream) = manual_store(1, 0);
        receive(&store, "a", "1");
        receive(&store, "a", "2");
        stream.drain();

        receive(&store, "a", "3");
        assert_eq!(store.len(), 2);
        assert_eq!(store.browse_len(), 2);
        assert_eq!(
            labels(&stream.drain()),
            vec!["summary-removed", "browse-removed", "browse-new", "summary-new"]
        );
    }

    #[test]
    fn retention_pass_trims_both_lists() {
        let (store, mut stream) = manual_store(2, 0);
        for payload in ["1", "2", "3", "4"] {
            receive(&store, "a", payload);
        }
        stream.drain();

        assert_eq!(store.run_retention_pass(), 2);
        assert_eq!(store.len(), 2);
        assert_eq!(store.browse_len(), 2);
        assert_eq!(
            labels(&stream.drain()),
            vec!["summary-removed", "browse-removed", "summary-removed", "browse-removed"]
        );
    }

    #[test]
    fn browse_collector_trims_view_without_touching_source() {
        let (store, mut stream) = manual_store(2, 1);
        for payload in ["1", "2", "3", "4"] {
            receive(&store, "a", payload);
        }
        stream.drain();

        assert_eq!(store.browse_collector.sweep(), 2);
        let browse: Vec<u64> = store.browse_snapshot().iter().map(|r| r.id().get()).collect();
        assert_eq!(browse, vec![4, 3]);
        let source: Vec<u64> = store.all_messages_snapshot().iter().map(|r| r.id().get()).collect();
        assert_eq!(source, vec![4, 3, 2, 1]);
        assert_eq!(store.count_for_topic("a"), 4);

        let removed: Vec<(u64, usize)> = stream
            .drain()
            .into_iter()
            .map(|n| match n.event {
                StoreEvent::BrowseRemovedMessage { record, previous_index } => {
                    (record.id().get(), previous_index)
                }
                other => panic!("unexpected event {}", other.label()),
            })
            .collect();
        assert_eq!(removed, vec![(1, 3), (2, 2)]);
    }

    #[test]
    fn browse_collector_floor_uses_view_counts() {
        let (store, mut stream) = manual_store(2, 2);
        for (topic, payload) in [("a", "1"), ("a", "drop"), ("a", "3"), ("b", "4")] {
            receive(&store, topic, payload);
        }
        store.add_filter(MessageFilter::payload_contains("drop").unwrap());
        let browse = || -> Vec<u64> { store.browse_snapshot().iter().map(|r| r.id().get()).collect() };
        assert_eq!(browse(), vec![4, 3, 1]);
        stream.drain();

        // "a" has three records in the source but only two in the view.
        assert_eq!(store.browse_collector.sweep(), 0);
        assert_eq!(browse(), vec![4, 3, 1]);
        assert!(stream.drain().is_empty());
    }

    #[test]
    fn rejected_message_consumes_no_id() {
        let (store, _stream) = manual_store(10, 0);
        let err = store
            .on_message_received(MessageRecord::builder("", Bytes::from_static(b"x")))
            .expect_err("empty topic");
        assert!(matches!(err, StoreError::InvalidRecord(_)));
        assert!(store.is_empty());

        let record = receive(&store, "a", "1");
        assert_eq!(record.id().get(), 1);
    }

    #[test]
    fn formatter_warning_is_sent_once_per_selection() {
        let (store, mut stream) = manual_store(10, 0);
        store.set_formatter(Formatter::HexDecode);
        receive(&store, "a", "zz");
        receive(&store, "a", "yy");
        let warnings = stream
            .drain()
            .into_iter()
            .filter(|n| matches!(n.event, StoreEvent::FormatterWarning { .. }))
            .count();
        assert_eq!(warnings, 1);

        store.set_formatter(Formatter::Base64Decode);
        receive(&store, "a", "***");
        assert!(
            stream
                .drain()
                .iter()
                .any(|n| matches!(n.event, StoreEvent::FormatterWarning { formatter: Formatter::Base64Decode, .. }))
        );
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn clear_resets_everything_but_filters() {
        let (store, mut stream) = manual_store(10, 0);
        receive(&store, "a", "1");
        store.add_filter(MessageFilter::retained());
        store.clear();

        assert!(store.is_empty());
        assert_eq!(store.browse_len(), 0);
        assert!(store.all_topics().is_empty());
        assert!(store.shown_topics().is_empty());
        assert!(store.message_filters_enabled());
        assert!(!store.browsing_filters_enabled());
        assert!(matches!(stream.drain().last().unwrap().event, StoreEvent::Cleared));

        receive(&store, "b", "2");
        assert_eq!(store.shown_topics(), vec!["b".to_owned()]);
    }

    #[test]
    fn visibility_is_reflected_in_summary() {
        let (store, _stream) = manual_store(10, 0);
        receive(&store, "a", "1");
        receive(&store, "b", "2");
        store.set_topic_shown("b", false);

        assert!(store.browsing_filters_enabled());
        let summary = store.topic_summary();
        assert_eq!(summary.len(), 2);
        assert!(summary[0].visible);
        assert!(!summary[1].visible);

        store.set_all_shown(true);
        assert!(!store.browsing_filters_enabled());
        assert_eq!(store.browse_len(), 2);
    }

    #[tokio::test]
    async fn close_stops_background_collectors() {
        let (queue, _stream) = EventQueue::unbounded();
        let store = ManagedStore::builder(StoreConfig::default())
            .with_event_queue(queue)
            .build()
            .unwrap();
        assert_eq!(store.handles.lock().unwrap().len(), 2);
        store.close();
        assert!(store.handles.lock().unwrap().is_empty());
        store.close();
    }

    #[tokio::test]
    async fn clear_restarts_running_collectors() {
        let (queue, _stream) = EventQueue::unbounded();
        let store = ManagedStore::builder(StoreConfig::default())
            .with_event_queue(queue)
            .build()
            .unwrap();
        store.clear();
        {
            let handles = store.handles.lock().unwrap();
            assert_eq!(handles.len(), 2);
            assert!(handles.iter().all(|handle| !handle.is_stopped()));
        }

        store.close();
        store.clear();
        assert!(store.handles.lock().unwrap().is_empty());
    }
}
