//! Writes every batch to the reading store.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use brego_core::{Batch, Bus};
use brego_store::ReadingStore;

use super::Sink;
use crate::config::StorageConfig;
use crate::error::SinkError;

/// Subscriber label used by the persistence sink.
pub const SUBSCRIBER_LABEL: &str = "database_writer";

/// Persists batches through a [`ReadingStore`], retrying failed writes.
///
/// The sink ends the store's session when it stops.
pub struct PersistenceSink<S> {
    store: Arc<Mutex<S>>,
    max_retries: u32,
    retry_delay: Duration,
}

impl<S> std::fmt::Debug for PersistenceSink<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistenceSink")
            .field("max_retries", &self.max_retries)
            .field("retry_delay", &self.retry_delay)
            .finish_non_exhaustive()
    }
}

impl<S: ReadingStore> PersistenceSink<S> {
    /// Sink writing to `store` with the retry policy from `config`.
    pub fn new(store: Arc<Mutex<S>>, config: &StorageConfig) -> Self {
        Self {
            store,
            max_retries: config.max_retries,
            retry_delay: config.retry_delay(),
        }
    }

    /// Override the retry policy.
    pub fn with_retries(mut self, max_retries: u32, retry_delay: Duration) -> Self {
        self.max_retries = max_retries;
        self.retry_delay = retry_delay;
        self
    }

    async fn try_write(&self, batch: &Batch) -> brego_store::Result<usize> {
        let mut store = self.store.lock().await;
        store.insert_readings(batch)
    }

    /// Write one batch, retrying up to `max_retries` times.
    ///
    /// Returns whether the batch was stored. A cancelled wait between
    /// attempts gives up early.
    async fn write(&self, batch: &Batch, cancel: &CancellationToken) -> bool {
        let mut attempt = 0u32;
        loop {
            match self.try_write(batch).await {
                Ok(n) => {
                    debug!("Stored {} reading(s)", n);
                    return true;
                }
                Err(e) if attempt < self.max_retries && !cancel.is_cancelled() => {
                    attempt += 1;
                    warn!(
                        "Failed to store batch: {} (retry {}/{})",
                        e, attempt, self.max_retries
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => {}
                        _ = tokio::time::sleep(self.retry_delay) => {}
                    }
                }
                Err(e) => {
                    error!(
                        "Dropping batch of {} reading(s) after {} attempt(s): {}",
                        batch.len(),
                        attempt + 1,
                        e
                    );
                    return false;
                }
            }
        }
    }
}

#[async_trait]
impl<S: ReadingStore + 'static> Sink for PersistenceSink<S> {
    fn name(&self) -> &str {
        SUBSCRIBER_LABEL
    }

    async fn run(&self, bus: Bus, cancel: CancellationToken) -> Result<(), SinkError> {
        let mut subscription = bus.subscribe(SUBSCRIBER_LABEL);
        info!("Persistence sink started");

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                batch = subscription.recv() => match batch {
                    Some(batch) => {
                        self.write(&batch, &cancel).await;
                    }
                    None => break,
                },
            }
        }

        // Batches already delivered get one attempt each
        let mut flushed = 0usize;
        while let Some(batch) = subscription.try_recv() {
            if self.write(&batch, &cancel).await {
                flushed += 1;
            }
        }
        if flushed > 0 {
            info!("Flushed {} queued batch(es) on shutdown", flushed);
        }

        // Nothing is written after this point
        if let Err(e) = self.store.lock().await.end_session() {
            error!("Failed to end session: {}", e);
        }

        info!("Persistence sink stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use brego_core::Reading;
    use brego_store::{Store, StoredReading};
    use brego_types::{Device, Session};

    use super::*;

    fn readings() -> Vec<Reading> {
        vec![
            Reading::new(1.0, "28-a", Some(20.5)),
            Reading::new(1.1, "28-b", None),
        ]
    }

    async fn wait_for(cond: impl Fn() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !cond() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_batches_reach_the_store() {
        let mut store = Store::open_in_memory().unwrap();
        store.register_device("28-a", "temperature").unwrap();
        store.register_device("28-b", "temperature").unwrap();
        store.start_session().unwrap();
        let store = Arc::new(Mutex::new(store));

        let (bus, dispatcher) = Bus::new();
        let cancel = CancellationToken::new();
        tokio::spawn(dispatcher.run(cancel.clone()));

        let sink = Arc::new(PersistenceSink::new(store.clone(), &StorageConfig::default()));
        let task = tokio::spawn({
            let (sink, bus, cancel) = (sink.clone(), bus.clone(), cancel.clone());
            async move { sink.run(bus, cancel).await }
        });

        wait_for(|| bus.registry().len() == 1).await;
        bus.ingress().send_readings(readings()).unwrap();

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let rows = store.lock().await.query_session_readings("28-a").unwrap();
            if rows.len() == 1 {
                assert_eq!(rows[0].value, Some(20.5));
                break;
            }
            assert!(tokio::time::Instant::now() < deadline, "batch never stored");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        cancel.cancel();
        task.await.unwrap().unwrap();
        assert!(bus.registry().is_empty());
    }

    /// Fails the first `failures` inserts.
    struct FlakyStore {
        failures: AtomicU32,
        inserted: Vec<Reading>,
        session: Option<Session>,
    }

    impl FlakyStore {
        fn new(failures: u32) -> Self {
            Self {
                failures: AtomicU32::new(failures),
                inserted: Vec::new(),
                session: Some(Session {
                    id: 1,
                    start: 0.0,
                    end: None,
                }),
            }
        }
    }

    impl ReadingStore for FlakyStore {
        fn register_device(&mut self, _name: &str, _kind: &str) -> brego_store::Result<i64> {
            Ok(1)
        }

        fn start_session(&mut self) -> brego_store::Result<Session> {
            Ok(Session {
                id: 1,
                start: 0.0,
                end: None,
            })
        }

        fn end_session(&mut self) -> brego_store::Result<Option<Session>> {
            Ok(self.session.take())
        }

        fn active_session(&self) -> Option<&Session> {
            self.session.as_ref()
        }

        fn insert_readings(&mut self, readings: &[Reading]) -> brego_store::Result<usize> {
            if self.failures.load(Ordering::SeqCst) > 0 {
                self.failures.fetch_sub(1, Ordering::SeqCst);
                return Err(brego_store::Error::NoActiveSession);
            }
            self.inserted.extend_from_slice(readings);
            Ok(readings.len())
        }

        fn query_session_readings(&self, _device: &str) -> brego_store::Result<Vec<StoredReading>> {
            Ok(Vec::new())
        }

        fn list_devices(&self) -> brego_store::Result<Vec<Device>> {
            Ok(Vec::new())
        }

        fn get_session(&self, _id: i64) -> brego_store::Result<Option<Session>> {
            Ok(None)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_retries_then_succeeds() {
        let store = Arc::new(Mutex::new(FlakyStore::new(2)));
        let sink = PersistenceSink::new(store.clone(), &StorageConfig::default())
            .with_retries(3, Duration::from_millis(100));
        let batch: Batch = readings().into();

        assert!(sink.write(&batch, &CancellationToken::new()).await);
        assert_eq!(store.lock().await.inserted.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_drops_batch_after_retries() {
        let store = Arc::new(Mutex::new(FlakyStore::new(10)));
        let sink = PersistenceSink::new(store.clone(), &StorageConfig::default())
            .with_retries(2, Duration::from_millis(100));
        let batch: Batch = readings().into();

        assert!(!sink.write(&batch, &CancellationToken::new()).await);
        let store = store.lock().await;
        assert!(store.inserted.is_empty());
        // One attempt plus two retries
        assert_eq!(store.failures.load(Ordering::SeqCst), 7);
    }

    #[tokio::test]
    async fn test_queued_batches_flushed_on_cancel() {
        let store = Arc::new(Mutex::new(FlakyStore::new(0)));
        let (bus, dispatcher) = Bus::new();
        tokio::spawn(dispatcher.run(CancellationToken::new()));

        let cancel = CancellationToken::new();
        let sink = Arc::new(PersistenceSink::new(store.clone(), &StorageConfig::default()));
        let guard = store.lock().await;
        let task = tokio::spawn({
            let (sink, bus, cancel) = (sink.clone(), bus.clone(), cancel.clone());
            async move { sink.run(bus, cancel).await }
        });
        wait_for(|| bus.registry().len() == 1).await;

        // The sink takes the first batch and blocks on the held store lock
        bus.ingress().send_readings(readings()).unwrap();
        wait_for(|| bus.stats().deliveries() == 1 && bus.registry().labeled_sizes()[0].1 == 0)
            .await;
        bus.ingress().send_readings(readings()).unwrap();
        bus.ingress().send_readings(readings()).unwrap();
        wait_for(|| bus.registry().labeled_sizes()[0].1 == 2).await;

        cancel.cancel();
        drop(guard);
        task.await.unwrap().unwrap();

        let store = store.lock().await;
        assert_eq!(store.inserted.len(), 6);
        assert!(store.active_session().is_none());
        assert!(bus.registry().is_empty());
    }
}
