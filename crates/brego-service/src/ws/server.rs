//! Per-connection WebSocket serving.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use brego_core::Bus;
use brego_types::wire::{self, WireFormat};

use super::WsError;
use super::bridge::{Bridge, BridgeConfig, Inbound, Outbound};
use super::frame::Message;
use super::handshake::{HANDSHAKE_TIMEOUT, HandshakeError, Request};

/// Application side of a WebSocket connection.
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    /// Serve one upgraded connection until it ends.
    ///
    /// `inbound` yields `None` once the peer is gone. Returning signals the
    /// bridge to close the connection.
    async fn handle(
        &self,
        request: Request,
        peer: String,
        inbound: Inbound,
        outbound: Outbound,
        cancel: CancellationToken,
    );
}

/// Run the handshake, bridge and handler for one accepted socket.
///
/// Returns an error only if the handshake fails; in that case the handler
/// never runs.
pub async fn serve_ws<S, H>(
    stream: S,
    peer: String,
    handler: Arc<H>,
    config: &BridgeConfig,
    cancel: CancellationToken,
) -> Result<(), WsError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    H: Handler + ?Sized,
{
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    let (outbound_tx, outbound_rx) = mpsc::channel(config.outbound_capacity.max(1));

    let accept = Bridge::accept(stream, config, inbound_tx, outbound_rx, peer.clone());
    let (bridge, request) = match tokio::time::timeout(HANDSHAKE_TIMEOUT, accept).await {
        Ok(result) => result?,
        Err(_) => return Err(HandshakeError::Timeout.into()),
    };

    let bridge_task = tokio::spawn(bridge.run(cancel.clone()));

    handler
        .handle(request, peer.clone(), inbound_rx, outbound_tx.clone(), cancel)
        .await;

    // A full queue still ends in a close once the sender is dropped
    let _ = outbound_tx.try_send(None);
    drop(outbound_tx);

    match bridge_task.await {
        Ok(state) => debug!("{}: bridge finished in {:?}", peer, state),
        Err(e) => warn!("{}: bridge task failed: {}", peer, e),
    }
    Ok(())
}

/// Streams every bus batch to the peer as one text message.
#[derive(Debug, Clone)]
pub struct BusStreamHandler {
    bus: Bus,
    format: WireFormat,
}

impl BusStreamHandler {
    /// Stream batches from `bus` encoded as `format`.
    pub fn new(bus: Bus, format: WireFormat) -> Self {
        Self { bus, format }
    }
}

#[async_trait]
impl Handler for BusStreamHandler {
    async fn handle(
        &self,
        request: Request,
        peer: String,
        mut inbound: Inbound,
        outbound: Outbound,
        cancel: CancellationToken,
    ) {
        let mut subscription = self.bus.subscribe(format!("websocket_client:{peer}"));
        info!("WebSocket client {} connected on {}", peer, request.path);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                message = inbound.recv() => match message {
                    Some(Some(_)) => {}
                    Some(None) | None => break,
                },
                batch = subscription.recv() => {
                    let Some(batch) = batch else { break };
                    let text = match wire::encode_batch(self.format, &batch) {
                        Ok(text) => text,
                        Err(e) => {
                            warn!("Failed to encode batch for {}: {}", peer, e);
                            continue;
                        }
                    };
                    if outbound.send(Some(Message::Text(text))).await.is_err() {
                        break;
                    }
                }
            }
        }

        info!("WebSocket client {} disconnected", peer);
    }
}
