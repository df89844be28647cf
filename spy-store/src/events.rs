//! Outbound change notifications.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::trace;

use crate::format::Formatter;
use crate::record::SharedRecord;

/// Change published by a store, in the order it happened.
#[derive(Debug, Clone)]
pub enum StoreEvent {
    /// A record entered the all-messages list.
    SummaryNewMessage {
        /// Topic of the record.
        topic: String,
        /// The record.
        record: SharedRecord,
        /// Whether the topic had never been seen before.
        first_sighting: bool,
    },
    /// A record left the all-messages list.
    SummaryRemovedMessage {
        /// Topic of the record.
        topic: String,
        /// The record.
        record: SharedRecord,
    },
    /// A record entered the browse view at index 0.
    BrowseNewMessage {
        /// The record.
        record: SharedRecord,
    },
    /// A record left the browse view.
    BrowseRemovedMessage {
        /// The record.
        record: SharedRecord,
        /// Index the record held just before removal.
        previous_index: usize,
    },
    /// The browse view changed in bulk; consumers should re-snapshot it.
    BrowseRebuilt {
        /// Number of records now in the view.
        visible: usize,
    },
    /// A payload could not be converted with the selected formatter.
    /// Sent once per formatter selection.
    FormatterWarning {
        /// Formatter that failed.
        formatter: Formatter,
        /// Conversion error.
        reason: String,
    },
    /// Every list, summary and topic was reset.
    Cleared,
}

impl StoreEvent {
    /// Returns a short label for logs.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::SummaryNewMessage { .. } => "summary-new",
            Self::SummaryRemovedMessage { .. } => "summary-removed",
            Self::BrowseNewMessage { .. } => "browse-new",
            Self::BrowseRemovedMessage { .. } => "browse-removed",
            Self::BrowseRebuilt { .. } => "browse-rebuilt",
            Self::FormatterWarning { .. } => "formatter-warning",
            Self::Cleared => "cleared",
        }
    }
}

/// Event tagged with the name of the store that produced it.
#[derive(Debug, Clone)]
pub struct StoreNotification {
    /// Producing store.
    pub store: Arc<str>,
    /// The change.
    pub event: StoreEvent,
}

/// Producer side of the FIFO notification queue. Cheap to clone and shareable
/// between stores.
#[derive(Debug, Clone)]
pub struct EventQueue {
    sender: mpsc::UnboundedSender<StoreNotification>,
}

impl EventQueue {
    /// Creates an unbounded queue and its consumer.
    #[must_use]
    pub fn unbounded() -> (Self, EventStream) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, EventStream { receiver })
    }

    /// Returns whether the consumer has been dropped.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    pub(crate) fn sink(&self, store: Arc<str>) -> EventSink {
        EventSink {
            queue: self.clone(),
            store,
        }
    }
}

/// Per-store emitter. Sending never blocks; a dropped consumer is ignored.
#[derive(Debug, Clone)]
pub(crate) struct EventSink {
    queue: EventQueue,
    store: Arc<str>,
}

impl EventSink {
    pub(crate) fn emit(&self, event: StoreEvent) {
        let label = event.label();
        let notification = StoreNotification {
            store: Arc::clone(&self.store),
            event,
        };
        if self.queue.sender.send(notification).is_err() {
            trace!(store = %self.store, event = label, "event consumer gone; dropping event");
        }
    }
}

/// Consumer side of the notification queue.
#[derive(Debug)]
pub struct EventStream {
    receiver: mpsc::UnboundedReceiver<StoreNotification>,
}

impl EventStream {
    /// Waits for the next notification. Returns `None` once every producer
    /// is gone and the queue is drained.
    pub async fn recv(&mut self) -> Option<StoreNotification> {
        self.receiver.recv().await
    }

    /// Returns the next notification if one is queued.
    pub fn try_recv(&mut self) -> Option<StoreNotification> {
        self.receiver.try_recv().ok()
    }

    /// Takes every queued notification without waiting.
    pub fn drain(&mut self) -> Vec<StoreNotification> {
        let mut drained = Vec::new();
        while let Some(notification) = self.try_recv() {
            drained.push(notification);
        }
        drained
    }
}
