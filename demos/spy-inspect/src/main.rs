//! Drives a store with synthetic broker traffic and prints what it retained.
//!
//! ```bash
//! RUST_LOG=spy_store=debug spy-inspect --topics 3 --messages 5000 --hide demo/sensor1
//! ```

use std::collections::BTreeMap;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use bytes::Bytes;
use clap::Parser;
use topic_spy::primitives::Qos;
use topic_spy::store::{
    EventQueue, EventStream, ManagedStore, MessageFilter, MessageRecord, StoreConfig,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Synthetic traffic generator for the retention engine
#[derive(Parser, Debug)]
#[command(name = "spy-inspect")]
#[command(about = "Feeds synthetic messages into a topic-spy store", long_about = None)]
struct Args {
    /// Number of distinct topics to publish on
    #[arg(long, default_value = "4")]
    topics: NonZeroUsize,

    /// Total number of messages to publish
    #[arg(long, default_value_t = 2000)]
    messages: usize,

    /// Preferred size of the all-messages list
    #[arg(long, default_value = "200")]
    preferred_size: NonZeroUsize,

    /// Records per topic the collectors never trim below
    #[arg(long, default_value_t = 10)]
    min_per_topic: usize,

    /// Collector tick interval in milliseconds
    #[arg(long, default_value_t = 250)]
    interval_ms: u64,

    /// Topic to hide from the browse view (repeatable)
    #[arg(long)]
    hide: Vec<String>,

    /// Hide messages whose payload contains this text
    #[arg(long)]
    exclude: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let interval = Duration::from_millis(args.interval_ms);
    let config = StoreConfig::new(args.preferred_size)
        .with_min_messages_per_topic(args.min_per_topic)
        .with_collector_interval(interval);

    let (queue, stream) = EventQueue::unbounded();
    let store = Arc::new(
        ManagedStore::builder(config)
            .with_name("inspect")
            .with_event_queue(queue)
            .build()
            .context("building store")?,
    );
    let consumer = tokio::spawn(count_events(stream));

    if let Some(needle) = &args.exclude {
        let id = store.add_filter(MessageFilter::payload_contains(needle.as_str())?);
        info!(filter = %id, needle = %needle, "exclusion filter installed");
    }

    let producer = {
        let store = Arc::clone(&store);
        let topics = args.topics.get();
        let messages = args.messages;
        tokio::task::spawn_blocking(move || publish(&store, topics, messages))
    };
    producer.await.context("producer panicked")??;

    store.set_topics_shown(args.hide.iter().map(String::as_str), false, true);
    tokio::time::sleep(interval * 2).await;

    report(&store);

    store.close();
    drop(store);
    let counts = consumer.await.context("event consumer panicked")?;
    for (event, count) in counts {
        info!(event, count, "events received");
    }
    Ok(())
}

fn publish(store: &ManagedStore, topics: usize, messages: usize) -> Result<()> {
    for n in 0..messages {
        let topic = format!("demo/sensor{}", n % topics);
        let payload = if n % 7 == 0 {
            format!("noise burst {n}")
        } else {
            format!("reading {n}")
        };
        store.on_message_received(
            MessageRecord::builder(topic, Bytes::from(payload))
                .qos(Qos::AtLeastOnce)
                .retained(n < topics),
        )?;
    }
    info!(messages, "producer finished");
    Ok(())
}

fn report(store: &ManagedStore) {
    info!(
        store = store.name(),
        held = store.len(),
        browsable = store.browse_len(),
        topics = store.all_topics().len(),
        hidden = store.browsing_filters_enabled(),
        "store state"
    );
    for entry in store.topic_summary() {
        info!(
            topic = %entry.topic,
            count = entry.count,
            visible = entry.visible,
            last = %entry.last_formatted_payload,
            "summary"
        );
    }
    for record in store.browse_snapshot().iter().take(5) {
        info!(id = %record.id(), topic = record.topic(), payload = %record.formatted_payload(), "browse");
    }
}

async fn count_events(mut stream: EventStream) -> BTreeMap<&'static str, usize> {
    let mut counts = BTreeMap::new();
    while let Some(notification) = stream.recv().await {
        *counts.entry(notification.event.label()).or_insert(0) += 1;
    }
    counts
}
