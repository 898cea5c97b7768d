use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chimera_protocol::Event;
use futures_util::future::join_all;
use tokio::sync::{broadcast, watch};
use tracing::debug;

use super::feed::EventFeed;
use super::store::{EventLog, Since};
use super::subscriber::{in_delivery, Mailbox, Subscriber};

/// Default number of events retained in the log.
pub const DEFAULT_LOG_CAPACITY: usize = 1000;

/// Event Bus
///
/// In-memory broker that:
/// 1. Appends every published event to a bounded log (cursor assigned)
/// 2. Fans the event out to every subscriber callback registered at that moment
/// 3. Broadcasts it to push-based watchers (best-effort)
///
/// Log append and mailbox enqueue happen in one critical section, so the log
/// order is also the delivery order seen by each subscriber.
pub struct EventBus {
    log: RwLock<EventLog>,
    /// module_id -> one mailbox per registered callback
    subscribers: RwLock<HashMap<String, Vec<Mailbox>>>,
    broadcaster: broadcast::Sender<Arc<Event>>,
    latest: watch::Sender<u64>,
    events_published: AtomicU64,
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_LOG_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        // Lagged watchers will be notified via RecvError::Lagged
        let (broadcaster, _) = broadcast::channel(1024);
        let (latest, _) = watch::channel(0);
        Self {
            log: RwLock::new(EventLog::with_capacity(capacity)),
            subscribers: RwLock::new(HashMap::new()),
            broadcaster,
            latest,
            events_published: AtomicU64::new(0),
        }
    }

    /// Publish an event
    ///
    /// Returns once every subscriber callback registered when the call began
    /// has been attempted. Subscriber failures are logged, never returned.
    ///
    /// When called from inside a subscriber callback, the event is logged and
    /// enqueued but the call does not wait for delivery: the calling
    /// callback's own mailbox cannot make progress until it returns.
    pub async fn publish(&self, event: Event) -> Arc<Event> {
        let event = Arc::new(event);

        let (cursor, pending) = {
            let mut log = write(&self.log);
            let cursor = log.append(event.clone());

            let subscribers = read(&self.subscribers);
            let pending: Vec<_> = subscribers
                .values()
                .flatten()
                .filter_map(|mailbox| mailbox.deliver(event.clone()))
                .collect();

            self.latest.send_replace(cursor);
            // Best-effort, ignore errors (no watchers)
            let _ = self.broadcaster.send(event.clone());

            (cursor, pending)
        };

        self.events_published.fetch_add(1, Ordering::Relaxed);

        debug!(
            event_id = %event.id(),
            kind = %event.kind(),
            source = %event.source_module(),
            cursor = cursor,
            receivers = pending.len(),
            "event published"
        );

        if !in_delivery() {
            join_all(pending).await;
        }

        event
    }

    /// Register a callback for all future events under `module_id`.
    ///
    /// Several callbacks may share one id. Must be called from within a Tokio
    /// runtime.
    pub fn subscribe(&self, module_id: impl Into<String>, subscriber: Arc<dyn Subscriber>) {
        let module_id = module_id.into();
        let mailbox = Mailbox::spawn(module_id.clone(), subscriber);

        let mut subscribers = write(&self.subscribers);
        let callbacks = subscribers.entry(module_id.clone()).or_default();
        callbacks.push(mailbox);

        debug!(subscriber = %module_id, callbacks = callbacks.len(), "subscription created");
    }

    /// Remove every callback registered under `module_id`.
    pub fn unsubscribe(&self, module_id: &str) {
        if let Some(callbacks) = write(&self.subscribers).remove(module_id) {
            debug!(subscriber = %module_id, callbacks = callbacks.len(), "subscription removed");
        }
    }

    /// Snapshot of the log, oldest first
    pub fn get_all_events(&self) -> Vec<Arc<Event>> {
        read(&self.log).snapshot()
    }

    /// The last `min(limit, log size)` events, oldest first
    pub fn get_recent_events(&self, limit: usize) -> Vec<Arc<Event>> {
        read(&self.log).recent(limit)
    }

    /// Empty the log. Subscriptions and cursors are unaffected.
    pub fn clear_log(&self) {
        write(&self.log).clear();
    }

    pub(crate) fn events_since(&self, cursor: u64, limit: usize) -> Since {
        read(&self.log).since(cursor, limit)
    }

    /// Cursor of the most recently published event (0 before the first)
    pub fn latest_cursor(&self) -> u64 {
        *self.latest.borrow()
    }

    /// Cursor-based feed starting after the latest published event
    pub fn feed(self: &Arc<Self>) -> EventFeed {
        EventFeed::new(self.clone(), self.latest.subscribe())
    }

    /// Cursor-based feed starting after `cursor`
    pub fn feed_from(self: &Arc<Self>, cursor: u64) -> EventFeed {
        EventFeed::starting_at(self.clone(), self.latest.subscribe(), cursor)
    }

    /// Push-based receiver of newly published events.
    /// Note: This does NOT replay the log. Use `feed()` for that.
    pub fn watch(&self) -> broadcast::Receiver<Arc<Event>> {
        self.broadcaster.subscribe()
    }

    /// Number of registered callbacks across all module ids
    pub fn subscriber_count(&self) -> usize {
        read(&self.subscribers).values().map(Vec::len).sum()
    }

    pub fn events_published(&self) -> u64 {
        self.events_published.load(Ordering::Relaxed)
    }

    pub fn capacity(&self) -> usize {
        read(&self.log).capacity()
    }

    pub fn len(&self) -> usize {
        read(&self.log).len()
    }

    pub fn is_empty(&self) -> bool {
        read(&self.log).is_empty()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_bus::subscriber::{from_fn, BlockingSubscriber};
    use chimera_protocol::{Completion, EventPayload};
    use std::collections::HashSet;
    use std::sync::atomic::AtomicBool;
    use std::sync::Mutex;
    use std::time::Duration;
    use uuid::Uuid;

    fn event(source: &str) -> Event {
        Event::new(source, EventPayload::ActionComplete(Completion::default())).unwrap()
    }

    /// Subscriber that records the ids it receives
    fn recorder() -> (Arc<dyn Subscriber>, Arc<Mutex<Vec<Uuid>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let subscriber: Arc<dyn Subscriber> = Arc::new(from_fn(move |event: Arc<Event>| {
            let sink = sink.clone();
            async move {
                sink.lock().unwrap().push(event.id());
                anyhow::Ok(())
            }
        }));
        (subscriber, seen)
    }

    #[tokio::test]
    async fn test_publish_stores_event_in_log() {
        let bus = EventBus::new();
        let published = bus.publish(event("eye")).await;

        let events = bus.get_all_events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].id(), published.id());
        assert_eq!(bus.latest_cursor(), 1);
        assert_eq!(bus.events_published(), 1);
    }

    #[tokio::test]
    async fn test_every_subscriber_receives_event_once() {
        let bus = EventBus::new();
        let (first, first_seen) = recorder();
        let (second, second_seen) = recorder();
        let (third, third_seen) = recorder();
        bus.subscribe("brain", first);
        bus.subscribe("brain", second);
        bus.subscribe("mouth", third);
        assert_eq!(bus.subscriber_count(), 3);

        let published = bus.publish(event("eye")).await;

        for seen in [first_seen, second_seen, third_seen] {
            assert_eq!(*seen.lock().unwrap(), vec![published.id()]);
        }
    }

    #[tokio::test]
    async fn test_subscription_is_not_retroactive() {
        let bus = EventBus::new();
        bus.publish(event("eye")).await;

        let (subscriber, seen) = recorder();
        bus.subscribe("late", subscriber);
        let published = bus.publish(event("eye")).await;

        assert_eq!(*seen.lock().unwrap(), vec![published.id()]);
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_delivery() {
        let bus = EventBus::new();
        let (first, first_seen) = recorder();
        let (second, second_seen) = recorder();
        bus.subscribe("brain", first);
        bus.subscribe("brain", second);

        bus.publish(event("eye")).await;
        bus.unsubscribe("brain");
        bus.publish(event("eye")).await;

        assert_eq!(first_seen.lock().unwrap().len(), 1);
        assert_eq!(second_seen.lock().unwrap().len(), 1);
        assert_eq!(bus.subscriber_count(), 0);

        // Unknown id is a no-op
        bus.unsubscribe("never-subscribed");
    }

    #[tokio::test]
    async fn test_log_capacity_keeps_most_recent() {
        let bus = EventBus::with_capacity(3);
        let mut ids = Vec::new();
        for _ in 0..7 {
            ids.push(bus.publish(event("eye")).await.id());
        }

        let logged: Vec<_> = bus.get_all_events().iter().map(|e| e.id()).collect();
        assert_eq!(logged, ids[4..].to_vec());
        assert_eq!(bus.len(), 3);
        assert_eq!(bus.capacity(), 3);
    }

    #[tokio::test]
    async fn test_get_recent_events() {
        let bus = EventBus::new();
        let mut ids = Vec::new();
        for _ in 0..5 {
            ids.push(bus.publish(event("eye")).await.id());
        }

        let recent: Vec<_> = bus.get_recent_events(2).iter().map(|e| e.id()).collect();
        assert_eq!(recent, ids[3..].to_vec());
        assert_eq!(bus.get_recent_events(100).len(), 5);
    }

    #[tokio::test]
    async fn test_clear_log_keeps_subscriptions() {
        let bus = EventBus::new();
        let (subscriber, seen) = recorder();
        bus.subscribe("brain", subscriber);

        bus.publish(event("eye")).await;
        bus.clear_log();
        assert!(bus.is_empty());

        bus.publish(event("eye")).await;
        assert_eq!(bus.len(), 1);
        assert_eq!(seen.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_failing_subscribers_are_isolated() {
        let bus = EventBus::new();
        bus.subscribe(
            "broken",
            Arc::new(from_fn(|_event: Arc<Event>| async move {
                Err::<(), _>(anyhow::anyhow!("subscriber exploded"))
            })),
        );
        bus.subscribe(
            "panicky",
            Arc::new(from_fn(|_event: Arc<Event>| async move {
                if true {
                    panic!("subscriber panicked");
                }
                anyhow::Ok(())
            })),
        );
        let (healthy, seen) = recorder();
        bus.subscribe("healthy", healthy);

        let first = bus.publish(event("eye")).await;
        let second = bus.publish(event("eye")).await;

        assert_eq!(*seen.lock().unwrap(), vec![first.id(), second.id()]);
        assert_eq!(bus.len(), 2);
    }

    #[tokio::test]
    async fn test_slow_subscriber_does_not_delay_others() {
        let bus = EventBus::new();
        let slow_done = Arc::new(AtomicBool::new(false));
        let observed_slow_done = Arc::new(Mutex::new(None));

        let flag = slow_done.clone();
        bus.subscribe(
            "slow",
            Arc::new(from_fn(move |_event: Arc<Event>| {
                let flag = flag.clone();
                async move {
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    flag.store(true, Ordering::SeqCst);
                    anyhow::Ok(())
                }
            })),
        );

        let flag = slow_done.clone();
        let observed = observed_slow_done.clone();
        bus.subscribe(
            "fast",
            Arc::new(from_fn(move |_event: Arc<Event>| {
                let flag = flag.clone();
                let observed = observed.clone();
                async move {
                    *observed.lock().unwrap() = Some(flag.load(Ordering::SeqCst));
                    anyhow::Ok(())
                }
            })),
        );

        bus.publish(event("eye")).await;

        // publish waited for the slow callback, the fast one ran before it finished
        assert!(slow_done.load(Ordering::SeqCst));
        assert_eq!(*observed_slow_done.lock().unwrap(), Some(false));
    }

    #[tokio::test]
    async fn test_per_subscriber_order_matches_log_under_concurrency() {
        let bus = Arc::new(EventBus::new());
        let (first, first_seen) = recorder();
        let (second, second_seen) = recorder();
        bus.subscribe("first", first);
        bus.subscribe("second", second);

        let publishers: Vec<_> = (0..8)
            .map(|n| {
                let bus = bus.clone();
                tokio::spawn(async move {
                    for _ in 0..10 {
                        bus.publish(event(&format!("publisher-{}", n))).await;
                    }
                })
            })
            .collect();
        for handle in publishers {
            handle.await.unwrap();
        }

        let logged: Vec<_> = bus.get_all_events().iter().map(|e| e.id()).collect();
        assert_eq!(logged.len(), 80);
        assert_eq!(logged.iter().collect::<HashSet<_>>().len(), 80);
        assert_eq!(*first_seen.lock().unwrap(), logged);
        assert_eq!(*second_seen.lock().unwrap(), logged);
    }

    #[tokio::test]
    async fn test_reentrant_publish_does_not_deadlock() {
        let bus = Arc::new(EventBus::new());
        let inner = bus.clone();
        bus.subscribe(
            "echo",
            Arc::new(from_fn(move |event: Arc<Event>| {
                let bus = inner.clone();
                async move {
                    if event.source_module() != "echo" {
                        bus.publish(self::event("echo")).await;
                    }
                    anyhow::Ok(())
                }
            })),
        );

        tokio::time::timeout(Duration::from_secs(2), bus.publish(event("eye")))
            .await
            .expect("re-entrant publish deadlocked");

        let sources: Vec<_> = bus
            .get_all_events()
            .iter()
            .map(|e| e.source_module().to_string())
            .collect();
        assert_eq!(sources, vec!["eye", "echo"]);
    }

    #[tokio::test]
    async fn test_blocking_subscriber() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        bus.subscribe(
            "sync",
            Arc::new(BlockingSubscriber::new(move |event: &Event| -> anyhow::Result<()> {
                std::thread::sleep(Duration::from_millis(10));
                sink.lock().unwrap().push(event.id());
                Ok(())
            })),
        );

        let published = bus.publish(event("eye")).await;
        assert_eq!(*seen.lock().unwrap(), vec![published.id()]);
    }

    #[tokio::test]
    async fn test_watch_receives_new_events() {
        let bus = EventBus::new();
        let mut rx = bus.watch();

        let published = bus.publish(event("eye")).await;
        let received = rx.recv().await.unwrap();
        assert_eq!(received.id(), published.id());
    }

    mod proptest_bus {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(32))]

            /// Every callback sees every published event exactly once, in log order
            #[test]
            fn delivery_matches_log(subscribers in 1usize..5, count in 0usize..40) {
                let runtime = tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .unwrap();

                runtime.block_on(async {
                    let bus = EventBus::with_capacity(1_000);
                    let mut sinks = Vec::new();
                    for i in 0..subscribers {
                        let (subscriber, seen) = recorder();
                        bus.subscribe(format!("module-{}", i % 2), subscriber);
                        sinks.push(seen);
                    }

                    for _ in 0..count {
                        bus.publish(event("frontend")).await;
                    }

                    let logged: Vec<Uuid> = bus.get_all_events().iter().map(|e| e.id()).collect();
                    let unique: HashSet<_> = logged.iter().collect();
                    prop_assert_eq!(unique.len(), count);
                    for seen in &sinks {
                        prop_assert_eq!(&*seen.lock().unwrap(), &logged);
                    }
                    Ok(())
                })?;
            }
        }
    }
}
