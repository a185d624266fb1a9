//! Producers: tasks that push batches of readings onto the bus.
//!
//! Two reference shapes are provided:
//!
//! - [`MultiplexedPoller`] reads a group of slow [`BlockingSensor`]s
//!   concurrently on the blocking thread pool once per interval and pushes one
//!   batch per cycle.
//! - [`WindowedSampler`] drives a fast [`Sample`] source from a dedicated OS
//!   thread, accumulating readings over a time window and handing each window
//!   to the bus through a bounded channel.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::FuturesUnordered;
use tokio::sync::{Semaphore, mpsc};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use brego_types::{Batch, DeviceSpec, Reading, batch, now};

use crate::bus::Ingress;
use crate::error::{Error, Result};

/// A source of reading batches.
///
/// Producers push batches, never single raw values, and stop only when
/// `cancel` fires. Returning an error ends this producer only.
#[async_trait]
pub trait Producer: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Devices this producer reports on, registered with storage at startup.
    fn devices(&self) -> Vec<DeviceSpec>;

    /// Push batches onto `ingress` until cancelled.
    async fn run(&self, ingress: Ingress, cancel: CancellationToken) -> Result<()>;
}

/// A slow sensor whose read blocks the calling thread.
pub trait BlockingSensor: Send + Sync + 'static {
    /// Device name.
    fn name(&self) -> &str;

    /// Device kind.
    fn kind(&self) -> &str;

    /// Take one measurement.
    fn read(&self) -> Result<f64>;
}

/// Polls a group of blocking sensors concurrently.
///
/// Every cycle each sensor is read on a blocking worker thread, with at most
/// `pool_size` reads in flight. Results are gathered in completion order,
/// each stamped with its own capture time, and pushed as one batch. A failed
/// read yields a reading with no value; the sensor stays in the group.
pub struct MultiplexedPoller<S> {
    name: String,
    sensors: Vec<Arc<S>>,
    interval: Duration,
    pool: Arc<Semaphore>,
}

impl<S> std::fmt::Debug for MultiplexedPoller<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultiplexedPoller")
            .field("name", &self.name)
            .field("sensors", &self.sensors.len())
            .field("interval", &self.interval)
            .field("pool_size", &self.pool.available_permits())
            .finish()
    }
}

impl<S: BlockingSensor> MultiplexedPoller<S> {
    /// Create a poller. The pool defaults to one thread per sensor.
    pub fn new(name: impl Into<String>, sensors: Vec<S>, interval: Duration) -> Self {
        let pool_size = sensors.len().max(1);
        Self {
            name: name.into(),
            sensors: sensors.into_iter().map(Arc::new).collect(),
            interval,
            pool: Arc::new(Semaphore::new(pool_size)),
        }
    }

    /// Limit the number of concurrent reads.
    pub fn with_pool_size(mut self, pool_size: usize) -> Self {
        self.pool = Arc::new(Semaphore::new(pool_size.max(1)));
        self
    }

    /// Number of sensors in the group.
    pub fn len(&self) -> usize {
        self.sensors.len()
    }

    /// Whether the group is empty.
    pub fn is_empty(&self) -> bool {
        self.sensors.is_empty()
    }

    /// Read every sensor once and return the readings in completion order.
    pub async fn poll_once(&self) -> Vec<Reading> {
        let mut pending = FuturesUnordered::new();

        for sensor in &self.sensors {
            let sensor = Arc::clone(sensor);
            let pool = Arc::clone(&self.pool);
            pending.push(async move {
                let name = sensor.name().to_string();
                // The semaphore is never closed
                let permit = pool.acquire_owned().await.ok();
                let joined = tokio::task::spawn_blocking(move || {
                    let _permit = permit;
                    let value = sensor.read();
                    (value, now())
                })
                .await;
                (name, joined)
            });
        }

        let mut readings = Vec::with_capacity(self.sensors.len());
        while let Some((name, joined)) = pending.next().await {
            let reading = match joined {
                Ok((Ok(value), at)) => Reading::new(at, name, Some(value)),
                Ok((Err(e), at)) => {
                    warn!("{}: {}", self.name, e);
                    Reading::new(at, name, None)
                }
                Err(e) => {
                    warn!("{}: read of {} did not complete: {}", self.name, name, e);
                    Reading::new(now(), name, None)
                }
            };
            readings.push(reading);
        }
        readings
    }
}

#[async_trait]
impl<S: BlockingSensor> Producer for MultiplexedPoller<S> {
    fn name(&self) -> &str {
        &self.name
    }

    fn devices(&self) -> Vec<DeviceSpec> {
        self.sensors
            .iter()
            .map(|s| DeviceSpec::new(s.name(), s.kind()))
            .collect()
    }

    async fn run(&self, ingress: Ingress, cancel: CancellationToken) -> Result<()> {
        if self.sensors.is_empty() {
            info!("{}: no sensors, nothing to poll", self.name);
            return Ok(());
        }

        info!(
            "{}: polling {} sensor(s) every {:?}",
            self.name,
            self.sensors.len(),
            self.interval
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let readings = tokio::select! {
                _ = cancel.cancelled() => break,
                readings = self.poll_once() => readings,
            };

            debug!("{}: cycle produced {} reading(s)", self.name, readings.len());
            ingress.send_readings(readings)?;
        }

        debug!("{}: stopped", self.name);
        Ok(())
    }
}

/// A fast source sampled in a tight loop.
pub trait Sample: Send + 'static {
    /// Devices this source reports on.
    fn devices(&self) -> Vec<DeviceSpec>;

    /// Take one sample of every channel.
    fn sample(&mut self) -> Result<Vec<Reading>>;
}

/// Samples a [`Sample`] source on a dedicated thread and forwards windows of
/// readings to the bus.
///
/// The thread hands each window to a bounded channel with a blocking send, so
/// a full channel stalls sampling rather than growing memory. On cancel the
/// partially filled window is still delivered.
pub struct WindowedSampler<S> {
    name: String,
    devices: Vec<DeviceSpec>,
    source: Mutex<Option<S>>,
    sample_interval: Duration,
    window: Duration,
    capacity: usize,
}

impl<S> std::fmt::Debug for WindowedSampler<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WindowedSampler")
            .field("name", &self.name)
            .field("devices", &self.devices)
            .field("sample_interval", &self.sample_interval)
            .field("window", &self.window)
            .field("capacity", &self.capacity)
            .finish()
    }
}

impl<S: Sample> WindowedSampler<S> {
    /// Default bound of the hand-off channel, in windows.
    pub const DEFAULT_CAPACITY: usize = 10;

    /// Create a sampler.
    pub fn new(
        name: impl Into<String>,
        source: S,
        sample_interval: Duration,
        window: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            devices: source.devices(),
            source: Mutex::new(Some(source)),
            sample_interval,
            window,
            capacity: Self::DEFAULT_CAPACITY,
        }
    }

    /// Set the hand-off channel bound.
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }
}

fn sample_loop<S: Sample>(
    name: &str,
    mut source: S,
    tx: mpsc::Sender<Batch>,
    stop: CancellationToken,
    sample_interval: Duration,
    window: Duration,
) {
    let mut pending = Vec::new();
    let mut window_start = Instant::now();

    while !stop.is_cancelled() {
        match source.sample() {
            Ok(readings) => pending.extend(readings),
            Err(e) => warn!("{}: {}", name, e),
        }

        if window_start.elapsed() >= window && !pending.is_empty() {
            if tx.blocking_send(batch(std::mem::take(&mut pending))).is_err() {
                break;
            }
            window_start = Instant::now();
        }

        std::thread::sleep(sample_interval);
    }

    if !pending.is_empty() {
        let count = pending.len();
        if tx.blocking_send(batch(pending)).is_err() {
            debug!("{}: dropped partial window of {} readings", name, count);
        }
    }

    debug!("{}: sampling thread exiting", name);
}

#[async_trait]
impl<S: Sample> Producer for WindowedSampler<S> {
    fn name(&self) -> &str {
        &self.name
    }

    fn devices(&self) -> Vec<DeviceSpec> {
        self.devices.clone()
    }

    async fn run(&self, ingress: Ingress, cancel: CancellationToken) -> Result<()> {
        let source = self
            .source
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or_else(|| Error::AlreadyRunning(self.name.clone()))?;

        info!(
            "{}: sampling every {:?}, window {:?}",
            self.name, self.sample_interval, self.window
        );

        let (tx, mut rx) = mpsc::channel(self.capacity);
        let stop = cancel.child_token();

        let thread = {
            let name = self.name.clone();
            let stop = stop.clone();
            let (sample_interval, window) = (self.sample_interval, self.window);
            std::thread::Builder::new()
                .name(format!("sampler-{}", self.name))
                .spawn(move || sample_loop(&name, source, tx, stop, sample_interval, window))?
        };

        let forwarded = loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => break Ok(()),
                next = rx.recv() => next,
            };
            match next {
                Some(batch) => {
                    if let Err(e) = ingress.send(batch) {
                        break Err(e);
                    }
                }
                None => break Ok(()),
            }
        };

        // The thread flushes its partial window before exiting
        stop.cancel();
        if forwarded.is_ok() {
            while let Some(batch) = rx.recv().await {
                if ingress.send(batch).is_err() {
                    break;
                }
            }
        }
        // Closing the channel unblocks a sampler stuck in blocking_send
        drop(rx);
        match tokio::task::spawn_blocking(move || thread.join()).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => warn!("{}: sampling thread panicked", self.name),
            Err(e) => warn!("{}: failed to join sampling thread: {}", self.name, e),
        }

        debug!("{}: stopped", self.name);
        forwarded
    }
}
