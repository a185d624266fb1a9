//! Owns the bus, the sinks and the producers for one server run.
//!
//! [`SupervisorBuilder::build`] does everything that can fail at startup
//! (validating the configuration, registering devices, opening the session,
//! binding listeners). [`Supervisor::run`] then starts every task under one
//! cancellation scope and drives shutdown.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{Stream, StreamExt};
use tokio::sync::{Mutex, watch};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use brego_core::{Bus, Dispatcher, Ingress, Producer};
use brego_store::ReadingStore;

use crate::config::Config;
use crate::endpoint::Endpoint;
use crate::error::SupervisorError;
use crate::sinks::{BroadcastSink, PersistenceSink, Sink, WebSocketSink};
use crate::status;

/// How long shutdown waits for the store before leaving the session open.
const STORE_LOCK_TIMEOUT: Duration = Duration::from_secs(1);

/// Collects the parts of a [`Supervisor`].
pub struct SupervisorBuilder<S> {
    config: Config,
    store: Option<S>,
    producers: Vec<Arc<dyn Producer>>,
    sinks: Vec<Arc<dyn Sink>>,
}

impl<S> Default for SupervisorBuilder<S> {
    fn default() -> Self {
        Self {
            config: Config::default(),
            store: None,
            producers: Vec::new(),
            sinks: Vec::new(),
        }
    }
}

impl<S> std::fmt::Debug for SupervisorBuilder<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SupervisorBuilder")
            .field("has_store", &self.store.is_some())
            .field("producers", &self.producers.len())
            .field("sinks", &self.sinks.len())
            .finish()
    }
}

impl<S: ReadingStore + 'static> SupervisorBuilder<S> {
    /// Use `config` instead of the defaults.
    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Persist readings to `store`. Without a store nothing is persisted.
    pub fn store(mut self, store: S) -> Self {
        self.store = Some(store);
        self
    }

    /// Add a producer.
    pub fn producer(mut self, producer: impl Producer + 'static) -> Self {
        self.producers.push(Arc::new(producer));
        self
    }

    /// Add already shared producers.
    pub fn producers(mut self, producers: impl IntoIterator<Item = Arc<dyn Producer>>) -> Self {
        self.producers.extend(producers);
        self
    }

    /// Add a sink alongside the configured ones.
    pub fn sink(mut self, sink: impl Sink + 'static) -> Self {
        self.sinks.push(Arc::new(sink));
        self
    }

    /// Validate, register devices, open a session and bind listeners.
    pub async fn build(self) -> Result<Supervisor<S>, SupervisorError> {
        let SupervisorBuilder {
            config,
            store,
            producers,
            mut sinks,
        } = self;
        config.validate()?;

        let mut session_id = None;
        let store = match store {
            Some(mut store) => {
                for producer in &producers {
                    for device in producer.devices() {
                        store.register_device(&device.name, &device.kind)?;
                    }
                }
                store.log_devices()?;
                session_id = Some(store.start_session()?.id);
                Some(Arc::new(Mutex::new(store)))
            }
            None => {
                info!("Storage disabled; readings will not be persisted");
                None
            }
        };

        let (bus, dispatcher) = Bus::new();
        let (restart_tx, restart_rx) = watch::channel(0u64);

        if let Some(store) = &store {
            sinks.push(Arc::new(PersistenceSink::new(
                Arc::clone(store),
                &config.storage,
            )));
        }

        let mut broadcast_endpoint = None;
        if config.broadcast.enabled {
            let sink = BroadcastSink::bind(&config.broadcast, restart_rx).await?;
            broadcast_endpoint = Some(sink.endpoint().clone());
            sinks.push(Arc::new(sink));
        }

        let mut websocket_addr = None;
        if config.websocket.enabled {
            let sink = WebSocketSink::bind(&config.websocket, config.broadcast.format).await?;
            websocket_addr = Some(sink.local_addr());
            sinks.push(Arc::new(sink));
        }

        Ok(Supervisor {
            config,
            store,
            session_id,
            bus,
            dispatcher,
            producers,
            sinks,
            restart_tx,
            broadcast_endpoint,
            websocket_addr,
        })
    }
}

/// A fully started server, ready to run.
pub struct Supervisor<S> {
    config: Config,
    store: Option<Arc<Mutex<S>>>,
    session_id: Option<i64>,
    bus: Bus,
    dispatcher: Dispatcher,
    producers: Vec<Arc<dyn Producer>>,
    sinks: Vec<Arc<dyn Sink>>,
    restart_tx: watch::Sender<u64>,
    broadcast_endpoint: Option<Endpoint>,
    websocket_addr: Option<SocketAddr>,
}

impl<S> std::fmt::Debug for Supervisor<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("producers", &self.producers.len())
            .field("sinks", &self.sinks.len())
            .field("broadcast_endpoint", &self.broadcast_endpoint)
            .field("websocket_addr", &self.websocket_addr)
            .finish_non_exhaustive()
    }
}

impl<S: ReadingStore + 'static> Supervisor<S> {
    /// Start collecting parts.
    pub fn builder() -> SupervisorBuilder<S> {
        SupervisorBuilder::default()
    }

    /// The reading bus.
    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    /// The shared store, if persistence is enabled.
    pub fn store(&self) -> Option<&Arc<Mutex<S>>> {
        self.store.as_ref()
    }

    /// Where the broadcast sink listens.
    pub fn broadcast_endpoint(&self) -> Option<&Endpoint> {
        self.broadcast_endpoint.as_ref()
    }

    /// Where the WebSocket sink listens.
    pub fn websocket_addr(&self) -> Option<SocketAddr> {
        self.websocket_addr
    }

    /// Run until `shutdown` yields, then drain and close the session.
    ///
    /// Each item on `restart` restarts the broadcast listener. During the
    /// drain a second item on `shutdown` stops waiting immediately; the drain
    /// is otherwise bounded by the configured grace period.
    pub async fn run<Sd, Rs>(self, mut shutdown: Sd, restart: Rs) -> Result<(), SupervisorError>
    where
        Sd: Stream<Item = ()> + Unpin + Send,
        Rs: Stream<Item = ()> + Send + 'static,
    {
        let Supervisor {
            config,
            store,
            session_id,
            bus,
            dispatcher,
            producers,
            sinks,
            restart_tx,
            ..
        } = self;

        let cancel = CancellationToken::new();
        let tracker = TaskTracker::new();

        tracker.spawn(dispatcher.run(cancel.clone()));

        for sink in sinks {
            let (bus, cancel) = (bus.clone(), cancel.clone());
            tracker.spawn(async move {
                info!("Starting sink {}", sink.name());
                if let Err(e) = sink.run(bus, cancel).await {
                    error!("Sink {} failed: {}", sink.name(), e);
                }
            });
        }

        if config.status.enabled {
            tracker.spawn(status::report_queue_sizes(
                Arc::clone(bus.registry()),
                config.status.interval(),
                cancel.clone(),
            ));
        }

        for producer in producers {
            tracker.spawn(run_producer(producer, bus.ingress(), cancel.clone()));
        }

        tracker.spawn(forward_restarts(restart, restart_tx, cancel.clone()));

        info!("Server running; {} subscriber(s) registered", bus.registry().len());

        if shutdown.next().await.is_none() {
            debug!("Shutdown stream ended");
        }
        info!("Shutting down server...");

        cancel.cancel();
        tracker.close();
        let grace = config.server.shutdown_grace();
        tokio::select! {
            _ = tracker.wait() => info!("All tasks stopped"),
            _ = tokio::time::sleep(grace) => {
                warn!("Tasks still running after {:?}; giving up on drain", grace);
            }
            Some(()) = shutdown.next() => warn!("Second shutdown signal; aborting drain"),
        }

        if let Some(store) = store {
            match tokio::time::timeout(STORE_LOCK_TIMEOUT, store.lock()).await {
                Ok(mut store) => {
                    store.end_session()?;
                }
                // The persistence sink ends it once it gets the lock
                Err(_) => error!(
                    "Store still busy after {:?}; session {} not yet ended",
                    STORE_LOCK_TIMEOUT,
                    session_id.unwrap_or_default()
                ),
            }
        }

        info!("Server stopped");
        Ok(())
    }
}

/// Run one producer, logging instead of propagating its failure.
async fn run_producer(producer: Arc<dyn Producer>, ingress: Ingress, cancel: CancellationToken) {
    let name = producer.name().to_string();
    info!("Starting producer {}", name);

    let task = tokio::spawn(async move { producer.run(ingress, cancel).await });
    match task.await {
        Ok(Ok(())) => info!("Producer {} stopped", name),
        Ok(Err(e)) => error!("Producer {} failed: {}", name, e),
        Err(e) if e.is_panic() => error!("Producer {} panicked", name),
        Err(e) => error!("Producer {} task failed: {}", name, e),
    }
}

async fn forward_restarts<Rs>(restart: Rs, tx: watch::Sender<u64>, cancel: CancellationToken)
where
    Rs: Stream<Item = ()> + Send,
{
    let mut restart = std::pin::pin!(restart);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            signal = restart.next() => match signal {
                Some(()) => {
                    info!("Listener restart requested");
                    tx.send_modify(|generation| *generation += 1);
                }
                None => break,
            },
        }
    }
}
