//! In-process reading bus.
//!
//! The bus has one topic: the reading stream. Producers push [`Batch`]es onto
//! an unbounded ingress queue through an [`Ingress`] handle; a single
//! [`Dispatcher`] task pulls each batch and pushes a clone of the same `Arc`
//! onto every queue currently in the [`SubscriberRegistry`].
//!
//! Subscriber queues are unbounded. A slow subscriber grows its own queue and
//! never stalls the dispatcher or any other subscriber. Queue depths are
//! tracked per subscriber so they can be reported by label.
//!
//! # Example
//!
//! ```
//! use brego_core::bus::Bus;
//! use brego_types::Reading;
//! use tokio_util::sync::CancellationToken;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> brego_core::Result<()> {
//! let (bus, dispatcher) = Bus::new();
//! let cancel = CancellationToken::new();
//! let task = tokio::spawn(dispatcher.run(cancel.clone()));
//!
//! let mut sub = bus.subscribe("printer");
//! bus.ingress().send_readings(vec![Reading::new(1.0, "28-0001", Some(21.5))])?;
//!
//! let batch = sub.recv().await.unwrap();
//! assert_eq!(batch[0].device, "28-0001");
//!
//! cancel.cancel();
//! task.await.unwrap();
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use brego_types::{Batch, Reading, batch};

use crate::error::{Error, Result};

/// Identifier of a subscriber queue, unique for the life of the process.
pub type SubscriberId = u64;

static NEXT_SUBSCRIBER_ID: AtomicU64 = AtomicU64::new(1);

/// Sending half of a subscriber queue.
///
/// This is what the registry stores and what the dispatcher pushes onto.
/// Cloning it yields another handle to the same queue.
#[derive(Debug, Clone)]
pub struct SubscriberQueue {
    id: SubscriberId,
    tx: mpsc::UnboundedSender<Batch>,
    depth: Arc<AtomicUsize>,
}

impl SubscriberQueue {
    /// The queue's identifier.
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Number of batches waiting to be received.
    pub fn len(&self) -> usize {
        self.depth.load(Ordering::Acquire)
    }

    /// Whether no batches are waiting.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the receiving half has been dropped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Enqueue a batch. Never blocks.
    ///
    /// Returns `false` if the receiving half is gone.
    pub fn push(&self, batch: Batch) -> bool {
        self.depth.fetch_add(1, Ordering::AcqRel);
        if self.tx.send(batch).is_err() {
            self.depth.fetch_sub(1, Ordering::AcqRel);
            return false;
        }
        true
    }
}

/// Receiving half of a subscriber queue.
#[derive(Debug)]
pub struct BatchReceiver {
    rx: mpsc::UnboundedReceiver<Batch>,
    depth: Arc<AtomicUsize>,
}

impl BatchReceiver {
    /// Wait for the next batch.
    ///
    /// Returns `None` once every [`SubscriberQueue`] handle has been dropped
    /// and the queue is drained.
    pub async fn recv(&mut self) -> Option<Batch> {
        let batch = self.rx.recv().await?;
        self.depth.fetch_sub(1, Ordering::AcqRel);
        Some(batch)
    }

    /// Take the next batch if one is already queued.
    pub fn try_recv(&mut self) -> Option<Batch> {
        let batch = self.rx.try_recv().ok()?;
        self.depth.fetch_sub(1, Ordering::AcqRel);
        Some(batch)
    }

    /// Number of batches waiting to be received.
    pub fn len(&self) -> usize {
        self.depth.load(Ordering::Acquire)
    }

    /// Whether no batches are waiting.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Create a new, unregistered subscriber queue.
pub fn subscriber_queue() -> (SubscriberQueue, BatchReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    let depth = Arc::new(AtomicUsize::new(0));
    let id = NEXT_SUBSCRIBER_ID.fetch_add(1, Ordering::Relaxed);
    (
        SubscriberQueue {
            id,
            tx,
            depth: Arc::clone(&depth),
        },
        BatchReceiver { rx, depth },
    )
}

#[derive(Debug)]
struct Entry {
    label: String,
    queue: SubscriberQueue,
}

/// The dynamic set of live subscriber queues.
///
/// The lock is held only for the duration of a map operation, never across
/// an `.await`.
#[derive(Debug, Default)]
pub struct SubscriberRegistry {
    entries: Mutex<HashMap<SubscriberId, Entry>>,
}

impl SubscriberRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<SubscriberId, Entry>> {
        // Every operation leaves the map consistent, so a poisoned lock is still usable
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a queue under a label.
    ///
    /// Returns `true` if the queue was newly added, `false` if it was already
    /// registered (the existing label is kept).
    pub fn register(&self, queue: &SubscriberQueue, label: impl Into<String>) -> bool {
        let mut entries = self.lock();
        if entries.contains_key(&queue.id) {
            return false;
        }
        let label = label.into();
        info!("Registered subscriber {}", label);
        entries.insert(
            queue.id,
            Entry {
                label,
                queue: queue.clone(),
            },
        );
        true
    }

    /// Remove a queue. Returns `false` if it was not registered.
    pub fn unregister(&self, id: SubscriberId) -> bool {
        match self.lock().remove(&id) {
            Some(entry) => {
                info!("Unregistered subscriber {}", entry.label);
                true
            }
            None => false,
        }
    }

    /// Whether a queue is currently registered.
    pub fn contains(&self, id: SubscriberId) -> bool {
        self.lock().contains_key(&id)
    }

    /// The queues registered right now, for one dispatch cycle.
    pub fn snapshot(&self) -> Vec<SubscriberQueue> {
        self.lock().values().map(|e| e.queue.clone()).collect()
    }

    /// Current depth of every registered queue, sorted by label.
    pub fn labeled_sizes(&self) -> Vec<(String, usize)> {
        let mut sizes: Vec<(String, usize)> = self
            .lock()
            .values()
            .map(|e| (e.label.clone(), e.queue.len()))
            .collect();
        sizes.sort();
        sizes
    }

    /// Number of registered queues.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether no queues are registered.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

/// A registered subscriber queue that unregisters itself when dropped.
///
/// Dropping happens on normal exit, on `?` early returns, on task
/// cancellation and during panic unwinding, so a sink holding a
/// `Subscription` can never leak its queue into the registry.
pub struct Subscription {
    id: SubscriberId,
    label: String,
    rx: BatchReceiver,
    registry: Arc<SubscriberRegistry>,
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("pending", &self.rx.len())
            .finish()
    }
}

impl Subscription {
    /// Wait for the next batch.
    pub async fn recv(&mut self) -> Option<Batch> {
        self.rx.recv().await
    }

    /// Take the next batch if one is already queued.
    pub fn try_recv(&mut self) -> Option<Batch> {
        self.rx.try_recv()
    }

    /// The queue's identifier in the registry.
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// The label the queue was registered under.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Number of batches waiting to be received.
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    /// Whether no batches are waiting.
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.registry.unregister(self.id);
    }
}

/// Handle producers use to push batches onto the bus.
///
/// Sending never blocks and is safe from blocking threads.
#[derive(Debug, Clone)]
pub struct Ingress {
    tx: mpsc::UnboundedSender<Batch>,
}

impl Ingress {
    /// Push a batch. Empty batches are dropped.
    pub fn send(&self, batch: Batch) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        self.tx.send(batch).map_err(|_| Error::IngressClosed)
    }

    /// Wrap readings in a batch and push it.
    pub fn send_readings(&self, readings: Vec<Reading>) -> Result<()> {
        self.send(batch(readings))
    }

    /// Whether the dispatcher has gone away.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Dispatch counters.
#[derive(Debug, Default)]
pub struct DispatchStats {
    batches: AtomicU64,
    readings: AtomicU64,
    deliveries: AtomicU64,
}

impl DispatchStats {
    /// Batches pulled from ingress.
    pub fn batches(&self) -> u64 {
        self.batches.load(Ordering::Relaxed)
    }

    /// Readings carried by those batches.
    pub fn readings(&self) -> u64 {
        self.readings.load(Ordering::Relaxed)
    }

    /// Batch pushes onto subscriber queues.
    pub fn deliveries(&self) -> u64 {
        self.deliveries.load(Ordering::Relaxed)
    }
}

/// Shared handle to the bus: subscribe, obtain ingress handles, inspect.
#[derive(Debug, Clone)]
pub struct Bus {
    registry: Arc<SubscriberRegistry>,
    ingress: Ingress,
    stats: Arc<DispatchStats>,
}

impl Bus {
    /// Create a bus and the dispatcher that drives it.
    ///
    /// The dispatcher must be run (usually spawned) for batches to flow.
    pub fn new() -> (Self, Dispatcher) {
        let (tx, rx) = mpsc::unbounded_channel();
        let registry = Arc::new(SubscriberRegistry::new());
        let stats = Arc::new(DispatchStats::default());

        let bus = Self {
            registry: Arc::clone(&registry),
            ingress: Ingress { tx },
            stats: Arc::clone(&stats),
        };
        let dispatcher = Dispatcher {
            ingress: rx,
            registry,
            stats,
        };
        (bus, dispatcher)
    }

    /// A new ingress handle.
    pub fn ingress(&self) -> Ingress {
        self.ingress.clone()
    }

    /// The subscriber registry.
    pub fn registry(&self) -> &Arc<SubscriberRegistry> {
        &self.registry
    }

    /// Dispatch counters.
    pub fn stats(&self) -> &DispatchStats {
        &self.stats
    }

    /// Create a queue, register it under `label` and return its guard.
    pub fn subscribe(&self, label: impl Into<String>) -> Subscription {
        let label = label.into();
        let (queue, rx) = subscriber_queue();
        self.registry.register(&queue, label.clone());
        Subscription {
            id: queue.id(),
            label,
            rx,
            registry: Arc::clone(&self.registry),
        }
    }
}

/// Single-writer fan-out task.
#[derive(Debug)]
pub struct Dispatcher {
    ingress: mpsc::UnboundedReceiver<Batch>,
    registry: Arc<SubscriberRegistry>,
    stats: Arc<DispatchStats>,
}

impl Dispatcher {
    /// Run until cancelled or until every ingress handle has been dropped.
    pub async fn run(mut self, cancel: CancellationToken) {
        debug!("Dispatcher started");

        loop {
            let batch = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!("Dispatcher cancelled");
                    break;
                }
                next = self.ingress.recv() => match next {
                    Some(batch) => batch,
                    None => {
                        debug!("Ingress closed, dispatcher exiting");
                        break;
                    }
                },
            };

            self.dispatch(&batch);
        }

        info!(
            "Dispatcher stopped after {} batches, {} deliveries",
            self.stats.batches(),
            self.stats.deliveries()
        );
    }

    /// Push one batch onto every currently registered queue.
    ///
    /// Returns the number of queues that accepted it.
    pub fn dispatch(&self, batch: &Batch) -> usize {
        let mut delivered = 0;
        for queue in self.registry.snapshot() {
            if queue.push(Arc::clone(batch)) {
                delivered += 1;
            }
        }

        self.stats.batches.fetch_add(1, Ordering::Relaxed);
        self.stats
            .readings
            .fetch_add(batch.len() as u64, Ordering::Relaxed);
        self.stats
            .deliveries
            .fetch_add(delivered as u64, Ordering::Relaxed);
        delivered
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn sample_batch() -> Batch {
        batch(vec![
            Reading::new(1.0, "28-0001", Some(21.0)),
            Reading::new(1.1, "28-0002", None),
            Reading::new(1.2, "Potentiometer", Some(0.25)),
        ])
    }

    #[test]
    fn test_register_is_idempotent() {
        let registry = SubscriberRegistry::new();
        let (queue, _rx) = subscriber_queue();

        assert!(registry.register(&queue, "a"));
        assert!(!registry.register(&queue, "b"));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.labeled_sizes(), vec![("a".to_string(), 0)]);
    }

    #[test]
    fn test_unregister_is_idempotent() {
        let registry = SubscriberRegistry::new();
        let (queue, _rx) = subscriber_queue();
        registry.register(&queue, "a");

        assert!(registry.unregister(queue.id()));
        assert!(!registry.unregister(queue.id()));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_dispatch_shares_one_allocation() {
        let (bus, dispatcher) = Bus::new();
        let mut subs: Vec<_> = (0..4).map(|i| bus.subscribe(format!("sub:{i}"))).collect();

        let sent = sample_batch();
        assert_eq!(dispatcher.dispatch(&sent), 4);

        for sub in &mut subs {
            let got = sub.try_recv().unwrap();
            assert!(Arc::ptr_eq(&got, &sent));
            assert_eq!(got[0].device, "28-0001");
            assert_eq!(got[2].device, "Potentiometer");
            assert!(sub.try_recv().is_none());
        }

        assert_eq!(bus.stats().batches(), 1);
        assert_eq!(bus.stats().readings(), 3);
        assert_eq!(bus.stats().deliveries(), 4);
    }

    #[test]
    fn test_dispatch_with_no_subscribers() {
        let (bus, dispatcher) = Bus::new();
        assert_eq!(dispatcher.dispatch(&sample_batch()), 0);
        assert_eq!(bus.stats().batches(), 1);
    }

    #[test]
    fn test_unregistered_queue_receives_nothing() {
        let (bus, dispatcher) = Bus::new();
        let mut kept = bus.subscribe("kept");
        let removed = bus.subscribe("removed");
        let (raw, mut raw_rx) = subscriber_queue();
        bus.registry().register(&raw, "raw");

        dispatcher.dispatch(&sample_batch());
        drop(removed);
        bus.registry().unregister(raw.id());
        dispatcher.dispatch(&sample_batch());

        assert_eq!(bus.registry().len(), 1);
        assert!(kept.try_recv().is_some());
        assert!(kept.try_recv().is_some());
        assert!(raw_rx.try_recv().is_some());
        assert!(raw_rx.try_recv().is_none());
    }

    #[test]
    fn test_labeled_sizes_track_depth() {
        let (bus, dispatcher) = Bus::new();
        let mut fast = bus.subscribe("fast");
        let _slow = bus.subscribe("slow");

        for _ in 0..3 {
            dispatcher.dispatch(&sample_batch());
        }
        fast.try_recv();
        fast.try_recv();

        assert_eq!(
            bus.registry().labeled_sizes(),
            vec![("fast".to_string(), 1), ("slow".to_string(), 3)]
        );
    }

    #[test]
    fn test_push_to_dropped_receiver() {
        let (queue, rx) = subscriber_queue();
        drop(rx);
        assert!(queue.is_closed());
        assert!(!queue.push(sample_batch()));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_ingress_drops_empty_batches() {
        let (bus, _dispatcher) = Bus::new();
        assert!(bus.ingress().send_readings(Vec::new()).is_ok());
    }

    #[test]
    fn test_ingress_closed_after_dispatcher_dropped() {
        let (bus, dispatcher) = Bus::new();
        drop(dispatcher);
        let ingress = bus.ingress();
        assert!(ingress.is_closed());
        assert!(matches!(
            ingress.send(sample_batch()),
            Err(Error::IngressClosed)
        ));
    }

    #[tokio::test]
    async fn test_round_trip_through_dispatcher() {
        let (bus, dispatcher) = Bus::new();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(dispatcher.run(cancel.clone()));

        let mut sub = bus.subscribe("reader");
        let readings = vec![
            Reading::new(5.0, "Tachometer", Some(1200.0)),
            Reading::new(5.5, "Tachometer", None),
        ];
        bus.ingress().send_readings(readings.clone()).unwrap();

        let got = tokio::time::timeout(Duration::from_secs(1), sub.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&got[..], &readings[..]);

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_order_preserved_per_subscriber() {
        let (bus, dispatcher) = Bus::new();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(dispatcher.run(cancel.clone()));

        let mut sub = bus.subscribe("ordered");
        let ingress = bus.ingress();
        for i in 0..50 {
            ingress
                .send_readings(vec![Reading::new(i as f64, "x", Some(i as f64))])
                .unwrap();
        }

        for i in 0..50 {
            let got = sub.recv().await.unwrap();
            assert_eq!(got[0].timestamp, i as f64);
        }

        cancel.cancel();
        task.await.unwrap();
    }

    async fn wait_for_batches(bus: &Bus, n: u64) {
        tokio::time::timeout(Duration::from_secs(10), async {
            while bus.stats().batches() < n {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_subscribe_and_drop_race_live_dispatcher() {
        const BATCHES: u64 = 2_000;

        let (bus, dispatcher) = Bus::new();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(dispatcher.run(cancel.clone()));
        let mut observer = bus.subscribe("observer");

        let ingress = bus.ingress();
        let producer = tokio::task::spawn_blocking(move || {
            for i in 0..BATCHES {
                ingress
                    .send_readings(vec![Reading::new(i as f64, "x", Some(0.0))])
                    .unwrap();
                if i % 64 == 0 {
                    std::thread::yield_now();
                }
            }
        });

        let churners: Vec<_> = (0..8)
            .map(|n| {
                let bus = bus.clone();
                tokio::spawn(async move {
                    for round in 0..50 {
                        let mut sub = bus.subscribe(format!("churn:{n}:{round}"));
                        let mut last: Option<f64> = None;
                        for _ in 0..3 {
                            match tokio::time::timeout(Duration::from_millis(20), sub.recv()).await {
                                Ok(Some(batch)) => {
                                    let t = batch[0].timestamp;
                                    // Registered queues see a contiguous run of batches
                                    if let Some(prev) = last {
                                        assert_eq!(t, prev + 1.0);
                                    }
                                    last = Some(t);
                                }
                                _ => break,
                            }
                        }
                        drop(sub);
                        tokio::task::yield_now().await;
                    }
                })
            })
            .collect();

        producer.await.unwrap();
        for churner in churners {
            churner.await.unwrap();
        }

        let labels: Vec<_> = bus
            .registry()
            .labeled_sizes()
            .into_iter()
            .map(|(label, _)| label)
            .collect();
        assert_eq!(labels, vec!["observer"]);

        for i in 0..BATCHES {
            let batch = observer.recv().await.unwrap();
            assert_eq!(batch[0].timestamp, i as f64);
        }
        wait_for_batches(&bus, BATCHES).await;

        // Dropped queues receive nothing once churn is over
        let before = bus.stats().deliveries();
        bus.ingress()
            .send_readings(vec![Reading::new(-1.0, "x", None)])
            .unwrap();
        assert_eq!(observer.recv().await.unwrap()[0].timestamp, -1.0);
        wait_for_batches(&bus, BATCHES + 1).await;
        assert_eq!(bus.stats().deliveries() - before, 1);

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_dispatcher_exits_when_senders_dropped() {
        let (bus, dispatcher) = Bus::new();
        let registry = Arc::clone(bus.registry());
        drop(bus);

        tokio::time::timeout(Duration::from_secs(1), dispatcher.run(CancellationToken::new()))
            .await
            .unwrap();
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_ingress_from_blocking_thread() {
        let (bus, dispatcher) = Bus::new();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(dispatcher.run(cancel.clone()));
        let mut sub = bus.subscribe("reader");

        let ingress = bus.ingress();
        std::thread::spawn(move || {
            ingress
                .send_readings(vec![Reading::new(1.0, "adc", Some(0.5))])
                .unwrap();
        })
        .join()
        .unwrap();

        let got = sub.recv().await.unwrap();
        assert_eq!(got[0].device, "adc");

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_subscription_released_on_panic() {
        let (bus, _dispatcher) = Bus::new();
        let registry = Arc::clone(bus.registry());

        let handle = tokio::spawn(async move {
            let _sub = bus.subscribe("doomed");
            panic!("sink failed");
        });

        assert!(handle.await.is_err());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_subscription_released_on_abort() {
        let (bus, _dispatcher) = Bus::new();
        let registry = Arc::clone(bus.registry());
        let task_bus = bus.clone();

        let handle = tokio::spawn(async move {
            let mut sub = task_bus.subscribe("waiting");
            sub.recv().await
        });
        tokio::task::yield_now().await;
        while registry.is_empty() {
            tokio::task::yield_now().await;
        }

        handle.abort();
        let _ = handle.await;
        assert!(registry.is_empty());
    }
}
