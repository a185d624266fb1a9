//! Consumers of the reading bus.

use std::io;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use brego_core::Bus;

use crate::error::SinkError;

pub mod broadcast;
pub mod persistence;
pub mod websocket;

pub use broadcast::BroadcastSink;
pub use persistence::PersistenceSink;
pub use websocket::WebSocketSink;

/// A long-running consumer of bus batches.
///
/// A sink subscribes itself in [`run`](Sink::run) and returns once `cancel`
/// fires. Its subscriptions must be released by then.
#[async_trait]
pub trait Sink: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Consume batches until cancelled.
    async fn run(&self, bus: Bus, cancel: CancellationToken) -> Result<(), SinkError>;
}

/// Pause after a failed accept.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Log an accept failure and wait before the next attempt, so persistent
/// errors such as `EMFILE` do not spin the accept loop.
///
/// Returns `false` if `cancel` fired during the pause.
pub(crate) async fn accept_backoff(kind: &str, error: &io::Error, cancel: &CancellationToken) -> bool {
    warn!("Failed to accept {} client: {}", kind, error);
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(ACCEPT_BACKOFF) => true,
    }
}
