//! Error types for the service.

use std::io;

use thiserror::Error;

use crate::config::ConfigError;
use crate::endpoint::ParseEndpointError;

/// Errors that abort startup or end the supervisor.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SupervisorError {
    /// Invalid configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A producer could not be built.
    #[error("producer error: {0}")]
    Producer(#[from] brego_core::Error),

    /// Storage could not be opened or written.
    #[error("storage error: {0}")]
    Store(#[from] brego_store::Error),

    /// A sink failed to start.
    #[error(transparent)]
    Sink(#[from] SinkError),
}

/// Errors that end a sink.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SinkError {
    /// Malformed endpoint string.
    #[error(transparent)]
    Endpoint(#[from] ParseEndpointError),

    /// A listener could not bind.
    #[error("failed to bind {endpoint}: {source}")]
    Bind {
        endpoint: String,
        #[source]
        source: io::Error,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}
