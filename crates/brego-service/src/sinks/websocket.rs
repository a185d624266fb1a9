//! Live reading stream over WebSocket.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use brego_core::Bus;
use brego_types::wire::WireFormat;

use super::{Sink, accept_backoff};
use crate::config::WebSocketConfig;
use crate::error::SinkError;
use crate::ws::{BridgeConfig, BusStreamHandler, WsError, serve_ws};

/// Accepts WebSocket clients and streams every batch to each of them.
#[derive(Debug)]
pub struct WebSocketSink {
    listener: Mutex<Option<TcpListener>>,
    local_addr: SocketAddr,
    bridge: BridgeConfig,
    format: WireFormat,
}

impl WebSocketSink {
    /// Bind the configured address. Batches are encoded as `format`.
    pub async fn bind(config: &WebSocketConfig, format: WireFormat) -> Result<Self, SinkError> {
        let bind_err = |e| SinkError::Bind {
            endpoint: config.bind.clone(),
            source: e,
        };
        let listener = TcpListener::bind(config.bind.as_str())
            .await
            .map_err(bind_err)?;
        let local_addr = listener.local_addr()?;
        info!("WebSocket server listening on {}", local_addr);

        Ok(Self {
            listener: Mutex::new(Some(listener)),
            local_addr,
            bridge: BridgeConfig::from(config),
            format,
        })
    }

    /// The bound address.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

#[async_trait]
impl Sink for WebSocketSink {
    fn name(&self) -> &str {
        "websocket"
    }

    async fn run(&self, bus: Bus, cancel: CancellationToken) -> Result<(), SinkError> {
        let taken = self
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let listener = match taken {
            Some(listener) => listener,
            None => TcpListener::bind(self.local_addr).await?,
        };

        let handler = Arc::new(BusStreamHandler::new(bus, self.format));
        let connections = TaskTracker::new();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                accepted = listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            if !accept_backoff("WebSocket", &e, &cancel).await {
                                break;
                            }
                            continue;
                        }
                    };
                    let handler = Arc::clone(&handler);
                    let bridge = self.bridge.clone();
                    let cancel = cancel.clone();
                    connections.spawn(async move {
                        let peer = peer.to_string();
                        match serve_ws(stream, peer.clone(), handler, &bridge, cancel).await {
                            Ok(()) => {}
                            Err(WsError::Handshake(e)) => debug!("Rejected WebSocket client {}: {}", peer, e),
                            Err(e) => warn!("WebSocket client {} failed: {}", peer, e),
                        }
                    });
                }
            }
        }

        drop(listener);
        connections.close();
        connections.wait().await;
        info!("WebSocket sink stopped");
        Ok(())
    }
}
