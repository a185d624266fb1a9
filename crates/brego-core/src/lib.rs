//! Reading bus and producers for the brego telemetry server.
//!
//! This crate holds everything between the sensors and the sinks:
//!
//! - **Bus**: a single-topic, in-process pub/sub dispatcher with a dynamic
//!   [`SubscriberRegistry`] and RAII [`Subscription`]s
//! - **Producers**: the [`Producer`] trait plus two reference shapes, a
//!   thread-pool [`MultiplexedPoller`] for slow sensors and a dedicated-thread
//!   [`WindowedSampler`] for fast ones
//! - **Sensors**: one-wire [`Ds18b20`] thermometers, simulated sources, and a
//!   [`MockSensor`] with failure injection
//!
//! # Quick Start
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use brego_core::{Bus, Ds18b20, MultiplexedPoller, Producer, w1};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let (bus, dispatcher) = Bus::new();
//!     let cancel = CancellationToken::new();
//!     tokio::spawn(dispatcher.run(cancel.clone()));
//!
//!     let sensors = Ds18b20::discover(w1::DEFAULT_W1_ROOT)?;
//!     let poller = MultiplexedPoller::new("onewire", sensors, Duration::from_secs(1));
//!     tokio::spawn({
//!         let (ingress, cancel) = (bus.ingress(), cancel.clone());
//!         async move { poller.run(ingress, cancel).await }
//!     });
//!
//!     let mut sub = bus.subscribe("printer");
//!     while let Some(batch) = sub.recv().await {
//!         for reading in batch.iter() {
//!             println!("{}", reading);
//!         }
//!     }
//!     Ok(())
//! }
//! ```

pub mod bus;
pub mod error;
pub mod mock;
pub mod producer;
pub mod simulated;
pub mod w1;

pub use brego_types::{Batch, DeviceSpec, Reading};

pub use bus::{
    BatchReceiver, Bus, DispatchStats, Dispatcher, Ingress, SubscriberId, SubscriberQueue,
    SubscriberRegistry, Subscription, subscriber_queue,
};
pub use error::{Error, Result};
pub use mock::MockSensor;
pub use producer::{BlockingSensor, MultiplexedPoller, Producer, Sample, WindowedSampler};
pub use simulated::{SimulatedSampler, SimulatedSensor};
pub use w1::{Ds18b20, find_onewire_devices};
