//! Background trimming of a list toward its preferred size.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::list::BoundedMessageList;
use crate::record::SharedRecord;

/// How aggressively a collector trims.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    min_messages_per_topic: usize,
    interval: Duration,
}

impl RetentionPolicy {
    /// Creates a policy.
    #[must_use]
    pub const fn new(min_messages_per_topic: usize, interval: Duration) -> Self {
        Self {
            min_messages_per_topic,
            interval,
        }
    }

    /// Returns the per-topic floor.
    #[must_use]
    pub const fn min_messages_per_topic(self) -> usize {
        self.min_messages_per_topic
    }

    /// Returns the tick interval.
    #[must_use]
    pub const fn interval(self) -> Duration {
        self.interval
    }
}

/// Receives every record a collector removes.
///
/// Called while the swept list is still locked, so implementations may only
/// take locks that come after it in the store's lock order.
pub trait RemovalListener: Send + Sync {
    /// Handles one removal. `previous_index` is where the record sat.
    fn record_removed(&self, record: &SharedRecord, previous_index: usize);
}

/// Trims one [`BoundedMessageList`] while respecting a per-topic floor.
#[derive(Clone)]
pub struct RetentionCollector {
    list: Arc<BoundedMessageList>,
    policy: RetentionPolicy,
    listener: Arc<dyn RemovalListener>,
}

impl fmt::Debug for RetentionCollector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetentionCollector")
            .field("list", &self.list.name())
            .field("policy", &self.policy)
            .field("listener", &"dyn RemovalListener")
            .finish()
    }
}

impl RetentionCollector {
    /// Creates a collector over `list`.
    #[must_use]
    pub fn new(
        list: Arc<BoundedMessageList>,
        policy: RetentionPolicy,
        listener: Arc<dyn RemovalListener>,
    ) -> Self {
        Self {
            list,
            policy,
            listener,
        }
    }

    /// Returns the policy.
    #[must_use]
    pub fn policy(&self) -> RetentionPolicy {
        self.policy
    }

    /// Runs one trimming pass and returns how many records were removed.
    ///
    /// Does nothing unless the list exceeds its preferred size. Scans from
    /// the oldest record toward the newest, removing records whose topic is
    /// above the floor, and stops as soon as the list is back within its
    /// preferred size. The floor wins when every remaining topic is at it.
    pub fn sweep(&self) -> usize {
        let mut guard = self.list.lock();
        if !guard.exceeds_preferred() {
            return 0;
        }

        let floor = self.policy.min_messages_per_topic;
        let mut removed = 0;
        let mut index = guard.len();
        while index > 0 {
            index -= 1;
            let Some(record) = guard.get(index).cloned() else {
                warn!(list = self.list.name(), index, "record vanished during sweep");
                continue;
            };
            if guard.summary().count(record.topic()) <= floor {
                continue;
            }
            if guard.remove_at(index).is_some() {
                removed += 1;
                self.listener.record_removed(&record, index);
            }
            if !guard.exceeds_preferred() {
                break;
            }
        }

        if removed > 0 {
            debug!(list = self.list.name(), removed, size = guard.len(), "retention pass");
        }
        removed
    }

    /// Runs the collector on `runtime` until the returned handle is stopped
    /// or dropped.
    #[must_use = "dropping the handle stops the collector"]
    pub fn spawn(self, runtime: &Handle) -> CollectorHandle {
        let shutdown = Arc::new(AtomicBool::new(false));
        let name: Arc<str> = Arc::from(self.list.name());
        let worker = runtime.spawn(run_collector(self, Arc::clone(&shutdown)));
        CollectorHandle {
            name,
            shutdown,
            worker: Some(worker),
        }
    }
}

async fn run_collector(collector: RetentionCollector, shutdown: Arc<AtomicBool>) {
    let mut interval = tokio::time::interval(collector.policy.interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!(list = collector.list.name(), interval = ?collector.policy.interval, "retention collector started");

    while !shutdown.load(Ordering::Acquire) {
        interval.tick().await;
        if shutdown.load(Ordering::Acquire) {
            break;
        }
        collector.sweep();
    }

    info!(list = collector.list.name(), "retention collector stopped");
}

/// Owner of a running collector task.
#[derive(Debug)]
pub struct CollectorHandle {
    name: Arc<str>,
    shutdown: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl CollectorHandle {
    /// Signals the collector to stop and cancels its task.
    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(worker) = self.worker.take() {
            worker.abort();
            debug!(list = %self.name, "retention collector cancelled");
        }
    }

    /// Returns whether [`stop`](Self::stop) has been called.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }
}

impl Drop for CollectorHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::num::NonZeroUsize;
    use std::sync::Mutex;

    use bytes::Bytes;
    use spy_primitives::MessageId;

    use crate::list::ListLimits;
    use crate::record::MessageRecord;

    #[derive(Default)]
    struct Recorder {
        removed: Mutex<Vec<(u64, usize)>>,
    }

    impl RemovalListener for Recorder {
        fn record_removed(&self, record: &SharedRecord, previous_index: usize) {
            self.removed
                .lock()
                .unwrap()
                .push((record.id().get(), previous_index));
        }
    }

    fn list(preferred: usize, max: usize) -> Arc<BoundedMessageList> {
        let limits = ListLimits::with_max(
            NonZeroUsize::new(preferred).unwrap(),
            NonZeroUsize::new(max).unwrap(),
        )
        .unwrap();
        Arc::new(BoundedMessageList::new("test", limits, None))
    }

    fn insert(list: &BoundedMessageList, id: u64, topic: &str) {
        let record = MessageRecord::builder(topic, Bytes::from_static(b"x"))
            .build(MessageId::new(id))
            .unwrap();
        list.insert(Arc::new(record));
    }

    fn collector(list: &Arc<BoundedMessageList>, min: usize) -> (RetentionCollector, Arc<Recorder>) {
        let recorder = Arc::new(Recorder::default());
        let collector = RetentionCollector::new(
            Arc::clone(list),
            RetentionPolicy::new(min, Duration::from_millis(10)),
            Arc::clone(&recorder) as Arc<dyn RemovalListener>,
        );
        (collector, recorder)
    }

    #[test]
    fn trims_oldest_down_to_preferred() {
        let list = list(2, 4);
        for id in 1..=5 {
            insert(&list, id, "a");
        }
        let (collector, recorder) = collector(&list, 1);

        assert_eq!(collector.sweep(), 2);
        let ids: Vec<u64> = list.snapshot().iter().map(|r| r.id().get()).collect();
        assert_eq!(ids, vec![5, 4]);
        assert_eq!(list.count_for_topic("a"), 2);
        assert_eq!(*recorder.removed.lock().unwrap(), vec![(2, 3), (3, 2)]);
    }

    #[test]
    fn floor_wins_over_preferred_size() {
        let list = list(2, 8);
        for id in 1..=3 {
            insert(&list, id, "a");
        }
        insert(&list, 4, "b");
        let (collector, _) = collector(&list, 2);

        assert_eq!(collector.sweep(), 1);
        assert_eq!(list.len(), 3);
        assert_eq!(list.count_for_topic("a"), 2);
        assert_eq!(list.count_for_topic("b"), 1);
        assert_eq!(collector.sweep(), 0);
    }

    #[test]
    fn within_preferred_is_untouched() {
        let list = list(4, 8);
        insert(&list, 1, "a");
        let (collector, recorder) = collector(&list, 0);
        assert_eq!(collector.sweep(), 0);
        assert!(recorder.removed.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn spawned_collector_trims_and_stops() {
        let list = list(2, 8);
        for id in 1..=6 {
            insert(&list, id, "a");
        }
        let (collector, _) = collector(&list, 0);
        let mut handle = collector.spawn(&Handle::current());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(list.len(), 2);

        handle.stop();
        assert!(handle.is_stopped());
        for id in 7..=9 {
            insert(&list, id, "a");
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(list.len(), 5);
    }
}
