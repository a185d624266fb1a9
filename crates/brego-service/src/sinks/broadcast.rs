//! Newline-delimited JSON broadcast over a Unix or TCP stream listener.
//!
//! Every accepted connection gets its own bus subscription and receives each
//! batch as one line (or one line per reading in the `records` format). The
//! listener can be restarted without dropping open connections.

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use brego_core::{Bus, Reading};
use brego_types::wire::{self, WireFormat};

use super::{Sink, accept_backoff};
use crate::config::BroadcastConfig;
use crate::endpoint::{Connection, Endpoint, Listener};
use crate::error::SinkError;

/// Span of reading timestamps over which the per-client rate is logged.
pub const RATE_WINDOW_SECS: f64 = 5.0;

/// Streams bus batches to every connected client.
#[derive(Debug)]
pub struct BroadcastSink {
    endpoint: Endpoint,
    format: WireFormat,
    write_timeout: Duration,
    listener: Mutex<Option<Listener>>,
    restart: watch::Receiver<u64>,
    next_client: Arc<AtomicU64>,
    binds: AtomicU64,
}

impl BroadcastSink {
    /// Bind the configured endpoint.
    ///
    /// Each change published on `restart` makes the running sink rebind its
    /// listener.
    pub async fn bind(
        config: &BroadcastConfig,
        restart: watch::Receiver<u64>,
    ) -> Result<Self, SinkError> {
        let endpoint: Endpoint = config.endpoint.parse()?;
        let listener = bind_listener(&endpoint).await?;
        let endpoint = listener.local_endpoint()?;

        Ok(Self {
            endpoint,
            format: config.format,
            write_timeout: config.write_timeout(),
            listener: Mutex::new(Some(listener)),
            restart,
            next_client: Arc::new(AtomicU64::new(1)),
            binds: AtomicU64::new(1),
        })
    }

    /// The endpoint the listener is bound to.
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// How many times a listener has been bound, including the first.
    pub fn binds(&self) -> u64 {
        self.binds.load(Ordering::Acquire)
    }

    fn client_context(&self, bus: Bus) -> ClientContext {
        ClientContext {
            bus,
            format: self.format,
            write_timeout: self.write_timeout,
            next_client: Arc::clone(&self.next_client),
        }
    }

    async fn rebind(&self) -> Option<Listener> {
        info!("Restarting broadcast listener on {}", self.endpoint);
        match bind_listener(&self.endpoint).await {
            Ok(listener) => {
                self.binds.fetch_add(1, Ordering::AcqRel);
                Some(listener)
            }
            Err(e) => {
                error!("{}; waiting for the next restart", e);
                None
            }
        }
    }
}

async fn bind_listener(endpoint: &Endpoint) -> Result<Listener, SinkError> {
    Listener::bind(endpoint).await.map_err(|e| SinkError::Bind {
        endpoint: endpoint.to_string(),
        source: e,
    })
}

#[async_trait]
impl Sink for BroadcastSink {
    fn name(&self) -> &str {
        "broadcast"
    }

    async fn run(&self, bus: Bus, cancel: CancellationToken) -> Result<(), SinkError> {
        let ctx = self.client_context(bus);
        let clients = TaskTracker::new();
        let mut restart = self.restart.clone();
        restart.mark_unchanged();

        let initial = self
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let mut listener = match initial {
            Some(listener) => Some(listener),
            None => Some(bind_listener(&self.endpoint).await?),
        };

        while !cancel.is_cancelled() {
            let listening = listener.take().map(|listener| {
                let token = cancel.child_token();
                let task = tokio::spawn(accept_loop(
                    listener,
                    ctx.clone(),
                    clients.clone(),
                    token.clone(),
                    cancel.clone(),
                ));
                (token, task)
            });

            let restarted = tokio::select! {
                _ = cancel.cancelled() => false,
                changed = restart.changed() => match changed {
                    Ok(()) => true,
                    Err(_) => {
                        // No more restarts can arrive
                        cancel.cancelled().await;
                        false
                    }
                },
            };

            if let Some((token, task)) = listening {
                token.cancel();
                if let Err(e) = task.await {
                    warn!("Broadcast listener task failed: {}", e);
                }
            }

            if !restarted {
                break;
            }
            listener = self.rebind().await;
        }

        clients.close();
        clients.wait().await;
        info!("Broadcast sink stopped");
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct ClientContext {
    bus: Bus,
    format: WireFormat,
    write_timeout: Duration,
    next_client: Arc<AtomicU64>,
}

async fn accept_loop(
    listener: Listener,
    ctx: ClientContext,
    clients: TaskTracker,
    token: CancellationToken,
    scope: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let id = ctx.next_client.fetch_add(1, Ordering::Relaxed);
                    clients.spawn(serve_client(stream, id, peer, ctx.clone(), scope.clone()));
                }
                Err(e) => {
                    if !accept_backoff("broadcast", &e, &token).await {
                        break;
                    }
                }
            },
        }
    }
    debug!("Broadcast listener stopped");
}

async fn serve_client(
    mut stream: Box<dyn Connection>,
    id: u64,
    peer: String,
    ctx: ClientContext,
    cancel: CancellationToken,
) {
    let label = format!("broadcast_client:{id}");
    let mut subscription = ctx.bus.subscribe(label.clone());
    let mut rate = RateMeter::new(RATE_WINDOW_SECS);
    info!("Client {} connected ({})", label, peer);

    let result: io::Result<()> = async {
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    let line = wire::end_of_stream(ctx.format);
                    return write_line(&mut stream, &line, ctx.write_timeout).await;
                }
                batch = subscription.recv() => {
                    let Some(batch) = batch else { return Ok(()) };
                    let line = match wire::encode_batch(ctx.format, &batch) {
                        Ok(line) => line,
                        Err(e) => {
                            warn!("Failed to encode batch for {}: {}", label, e);
                            continue;
                        }
                    };
                    write_line(&mut stream, &line, ctx.write_timeout).await?;
                    if let Some(per_sec) = rate.record(&batch) {
                        debug!("{}: {:.1} readings/s", label, per_sec);
                    }
                }
            }
        }
    }
    .await;

    drop(subscription);
    match result {
        Ok(()) => info!("Client {} disconnected", label),
        Err(e) => warn!("Dropping client {}: {}", label, e),
    }
}

/// Write `line` plus a newline, failing if it takes longer than `timeout`.
async fn write_line<W>(writer: &mut W, line: &str, timeout: Duration) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let write = async {
        writer.write_all(line.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await
    };
    match tokio::time::timeout(timeout, write).await {
        Ok(result) => result,
        Err(_) => Err(io::Error::new(
            io::ErrorKind::TimedOut,
            format!("write timed out after {:?}", timeout),
        )),
    }
}

/// Readings-per-second over windows of reading timestamps.
#[derive(Debug)]
struct RateMeter {
    window: f64,
    start: Option<f64>,
    count: usize,
}

impl RateMeter {
    fn new(window: f64) -> Self {
        Self {
            window,
            start: None,
            count: 0,
        }
    }

    /// Count a batch; returns the rate once a full window has been seen.
    fn record(&mut self, batch: &[Reading]) -> Option<f64> {
        let (first, last) = (batch.first()?, batch.last()?);
        let start = *self.start.get_or_insert(first.timestamp);
        self.count += batch.len();

        let elapsed = last.timestamp - start;
        if elapsed < self.window {
            return None;
        }
        let rate = self.count as f64 / elapsed;
        self.start = Some(last.timestamp);
        self.count = 0;
        Some(rate)
    }
}
