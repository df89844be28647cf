use std::collections::HashMap;
use std::num::NonZeroUsize;

use bytes::Bytes;
use proptest::prelude::*;
use spy_store::{EventQueue, ManagedStore, MessageFilter, MessageRecord, StoreConfig};

const TOPICS: [&str; 4] = ["home/kitchen", "home/garage", "plant/line1", "plant/line2"];
const PAYLOADS: [&str; 3] = ["ok", "alarm raised", "noise"];

#[derive(Debug, Clone)]
enum Op {
    Publish { topic: usize, payload: usize, retained: bool },
    Show { topic: usize, show: bool },
    Toggle { topic: usize },
    ShowAll(bool),
    AddFilter(usize),
    RemoveOldestFilter,
    Retention,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        8 => (0..TOPICS.len(), 0..PAYLOADS.len(), any::<bool>())
            .prop_map(|(topic, payload, retained)| Op::Publish { topic, payload, retained }),
        2 => (0..TOPICS.len(), any::<bool>()).prop_map(|(topic, show)| Op::Show { topic, show }),
        1 => (0..TOPICS.len()).prop_map(|topic| Op::Toggle { topic }),
        1 => any::<bool>().prop_map(Op::ShowAll),
        1 => (0..3usize).prop_map(Op::AddFilter),
        1 => Just(Op::RemoveOldestFilter),
        1 => Just(Op::Retention),
    ]
}

fn store(preferred: usize, min: usize) -> ManagedStore {
    let (queue, _stream) = EventQueue::unbounded();
    ManagedStore::builder(
        StoreConfig::new(NonZeroUsize::new(preferred).unwrap()).with_min_messages_per_topic(min),
    )
    .with_event_queue(queue)
    .with_manual_retention()
    .build()
    .unwrap()
}

fn filter(choice: usize) -> MessageFilter {
    match choice {
        0 => MessageFilter::payload_contains("ALARM").unwrap(),
        1 => MessageFilter::topic_pattern("plant/#").unwrap(),
        _ => MessageFilter::retained(),
    }
}

fn apply(store: &ManagedStore, op: &Op) {
    match *op {
        Op::Publish {
            topic,
            payload,
            retained,
        } => {
            store
                .on_message_received(
                    MessageRecord::builder(TOPICS[topic], Bytes::from_static(PAYLOADS[payload].as_bytes()))
                        .retained(retained),
                )
                .unwrap();
        }
        Op::Show { topic, show } => {
            store.set_topic_shown(TOPICS[topic], show);
        }
        Op::Toggle { topic } => {
            store.toggle_shown([TOPICS[topic]]);
        }
        Op::ShowAll(show) => store.set_all_shown(show),
        Op::AddFilter(choice) => {
            store.add_filter(filter(choice));
        }
        Op::RemoveOldestFilter => {
            if let Some((id, _)) = store.view().filters().first().cloned() {
                store.remove_filter(id);
            }
        }
        Op::Retention => {
            store.run_retention_pass();
        }
    }
}

fn ids(store: &ManagedStore, browse: bool) -> Vec<u64> {
    let records = if browse {
        store.browse_snapshot()
    } else {
        store.all_messages_snapshot()
    };
    records.iter().map(|record| record.id().get()).collect()
}

proptest! {
    /// The hard cap holds after every single operation.
    #[test]
    fn size_never_exceeds_max(ops in prop::collection::vec(op_strategy(), 1..120)) {
        let store = store(3, 1);
        let max = store.config().max_size().get();
        for op in &ops {
            apply(&store, op);
            prop_assert!(store.len() <= max);
            prop_assert!(store.browse_len() <= max);
        }
    }

    /// Per-topic counts always equal the records actually held.
    #[test]
    fn summary_matches_contents(ops in prop::collection::vec(op_strategy(), 1..120)) {
        let store = store(4, 1);
        for op in &ops {
            apply(&store, op);
            let mut held: HashMap<String, usize> = HashMap::new();
            for record in store.all_messages_snapshot() {
                *held.entry(record.topic().to_owned()).or_default() += 1;
            }
            for topic in store.all_topics() {
                prop_assert_eq!(store.count_for_topic(&topic), held.get(&topic).copied().unwrap_or(0));
            }
        }
    }

    /// After a pass the list is within its preferred size, or every topic is
    /// at or below the floor.
    #[test]
    fn retention_respects_floor(ops in prop::collection::vec(op_strategy(), 1..120)) {
        let store = store(3, 2);
        let preferred = store.config().preferred_size().get();
        for op in &ops {
            apply(&store, op);
        }
        store.run_retention_pass();
        let within = store.len() <= preferred;
        let floored = store.all_topics().iter().all(|topic| store.count_for_topic(topic) <= 2);
        prop_assert!(within || floored);
    }

    /// Both lists stay newest first and the view stays inside its source.
    #[test]
    fn order_is_newest_first(ops in prop::collection::vec(op_strategy(), 1..120)) {
        let store = store(3, 0);
        for op in &ops {
            apply(&store, op);
        }
        let source = ids(&store, false);
        let browse = ids(&store, true);
        prop_assert!(source.windows(2).all(|pair| pair[0] > pair[1]));
        prop_assert!(browse.windows(2).all(|pair| pair[0] > pair[1]));
        prop_assert!(browse.iter().all(|id| source.contains(id)));
    }

    /// Without view trimming, a forced rebuild reproduces the incremental view.
    #[test]
    fn rebuild_matches_incremental_view(ops in prop::collection::vec(op_strategy(), 1..150)) {
        let store = store(5, 1);
        for op in ops.iter().filter(|op| !matches!(op, Op::Retention)) {
            apply(&store, op);
        }
        let incremental = ids(&store, true);
        store.view().reinitialise();
        prop_assert_eq!(incremental, ids(&store, true));
    }

    /// Showing a topic that is already shown changes nothing.
    #[test]
    fn showing_twice_is_idempotent(
        ops in prop::collection::vec(op_strategy(), 1..60),
        topic in 0..TOPICS.len(),
    ) {
        let store = store(8, 1);
        for op in &ops {
            apply(&store, op);
        }
        store.set_topic_shown(TOPICS[topic], true);
        let once = ids(&store, true);
        prop_assert!(!store.set_topic_shown(TOPICS[topic], true));
        prop_assert_eq!(once, ids(&store, true));
    }
}
