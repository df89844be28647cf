//! In-memory retention and filtering engine for broker traffic.
//!
//! A [`ManagedStore`] keeps a bounded, newest-first window of received
//! messages with per-topic counts, a browse view selected by topic visibility
//! and exclusion filters, and two background collectors that trim both lists
//! toward their preferred size without touching the insert path. Every change
//! is published in order on an [`EventQueue`].

#![warn(missing_docs, clippy::pedantic)]

mod collector;
mod config;
mod error;
mod events;
mod filter;
mod format;
mod list;
mod record;
mod store;
mod summary;
mod view;

pub use collector::{CollectorHandle, RemovalListener, RetentionCollector, RetentionPolicy};
pub use config::StoreConfig;
pub use error::{FormatError, StoreError, StoreResult};
pub use events::{EventQueue, EventStream, StoreEvent, StoreNotification};
pub use filter::{FilterId, FilterKind, MessageFilter, topic_matches};
pub use format::Formatter;
pub use list::{BoundedMessageList, Insertion, ListGuard, ListLimits};
pub use record::{MessageRecord, MessageRecordBuilder, SharedRecord};
pub use store::{ManagedStore, ManagedStoreBuilder};
pub use summary::{TopicSummary, TopicSummaryEntry};
pub use view::{Admission, FilteredView, TopicSighting};
