//! Periodic subscriber queue depth reporting.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::info;

use brego_core::SubscriberRegistry;

/// Log every subscriber's queue depth each `interval` until cancelled.
pub async fn report_queue_sizes(
    registry: Arc<SubscriberRegistry>,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                info!("Subscriber queue sizes: {}", format_sizes(&registry.labeled_sizes()));
            }
        }
    }
}

fn format_sizes(sizes: &[(String, usize)]) -> String {
    if sizes.is_empty() {
        return "no subscribers".to_string();
    }
    sizes
        .iter()
        .map(|(label, size)| format!("{label}={size}"))
        .collect::<Vec<_>>()
        .join(", ")
}
