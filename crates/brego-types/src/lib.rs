//! Shared types for the brego telemetry server.
//!
//! This crate holds the data that flows through every other part of the
//! workspace: [`Reading`]s grouped into shared [`Batch`]es, the [`Device`]
//! and [`Session`] records kept by the store, and the line-delimited JSON
//! [`wire`] format spoken by the broadcast and WebSocket sinks.
//!
//! # Example
//!
//! ```
//! use brego_types::{Reading, batch, wire::{self, WireFormat}};
//!
//! let readings = batch(vec![Reading::new(1.5, "28-0001", Some(21.0))]);
//! let line = wire::encode_batch(WireFormat::Triples, &readings).unwrap();
//! assert_eq!(line, r#"[[1.5,"28-0001",21.0]]"#);
//! ```

pub mod error;
pub mod types;
#[cfg(feature = "serde")]
pub mod wire;

pub use error::{ParseError, ParseResult};
pub use types::{Batch, Device, DeviceSpec, Reading, Session, batch, from_timestamp, now};
