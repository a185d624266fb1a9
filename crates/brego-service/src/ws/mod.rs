//! Minimal WebSocket server.
//!
//! Only what the telemetry stream needs: the opening handshake, RFC 6455
//! framing via [`FrameCodec`], and a [`Bridge`] that exposes a socket as a
//! pair of message queues. Extensions and subprotocols are not negotiated.

pub mod bridge;
pub mod frame;
pub mod handshake;
pub mod server;

pub use bridge::{Bridge, BridgeConfig, Inbound, Outbound, State};
pub use frame::{Frame, FrameCodec, FrameError, Message, OpCode};
pub use handshake::{HandshakeError, Request};
pub use server::{BusStreamHandler, Handler, serve_ws};

/// Errors surfaced by [`serve_ws`].
#[derive(Debug, thiserror::Error)]
pub enum WsError {
    #[error("handshake failed: {0}")]
    Handshake(#[from] HandshakeError),
    #[error("framing error: {0}")]
    Frame(#[from] FrameError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
