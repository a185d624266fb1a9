//! Telemetry server for slow and fast sensors.
//!
//! This crate wires the reading bus from `brego-core` to its consumers:
//! - Persists every batch to the local SQLite store, tagged with the session
//! - Streams batches as newline-delimited JSON over a Unix or TCP socket
//! - Streams the same payload to WebSocket clients
//! - Restarts the stream listener on `SIGHUP` without dropping clients
//!
//! # Wire formats
//!
//! `triples` (default) sends one line per batch:
//!
//! ```text
//! [[1718000000.25,"28-0000075565ad",21.437],[1718000000.31,"Tachometer",null]]
//! ```
//!
//! `records` sends one line per reading:
//!
//! ```text
//! {"device":"28-0000075565ad","data":{"time":1718000000.25,"value":21.437}}
//! ```
//!
//! # Configuration
//!
//! The server reads configuration from `~/.config/brego/server.toml`:
//!
//! ```toml
//! [broadcast]
//! endpoint = "unix:/tmp/brego.gpio.sock"
//! format = "triples"
//!
//! [websocket]
//! bind = "0.0.0.0:6565"
//!
//! [[producers]]
//! kind = "onewire"
//! interval_ms = 1000
//!
//! [[producers]]
//! kind = "sampler"
//! channels = ["Potentiometer", "Tachometer"]
//! window_ms = 250
//! ```

pub mod config;
pub mod endpoint;
pub mod error;
pub mod producers;
pub mod signals;
pub mod sinks;
pub mod status;
pub mod supervisor;
pub mod ws;

pub use config::{
    BroadcastConfig, Config, ConfigError, ProducerConfig, ServerConfig, StatusConfig,
    StorageConfig, ValidationError, WebSocketConfig,
};
pub use endpoint::{Endpoint, Listener, ParseEndpointError};
pub use error::{SinkError, SupervisorError};
pub use sinks::{BroadcastSink, PersistenceSink, Sink, WebSocketSink};
pub use supervisor::{Supervisor, SupervisorBuilder};
