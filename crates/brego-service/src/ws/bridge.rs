//! Byte socket to message queue bridge.
//!
//! A [`Bridge`] owns an upgraded socket and exposes it to the application as
//! two queues: `inbound` carries decoded messages from the peer, `outbound`
//! carries messages to send. `None` on either queue is the end-of-stream
//! sentinel. Exactly one sentinel is pushed onto `inbound` before the bridge
//! returns, whichever way the connection ends.

use std::time::Duration;

use bytes::BytesMut;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::codec::{Framed, FramedParts};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::frame::{
    CLOSE_GOING_AWAY, CLOSE_NORMAL, Frame, FrameCodec, FrameError, Message, OpCode, Reassembler,
};
use super::handshake::{self, HandshakeError, Request};
use crate::config::WebSocketConfig;

/// Messages from the peer; `None` marks the end of the stream.
pub type Inbound = mpsc::UnboundedReceiver<Option<Message>>;
/// Messages to the peer; `None` asks the bridge to close.
pub type Outbound = mpsc::Sender<Option<Message>>;

/// Connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Waiting for a valid upgrade request.
    Handshaking,
    /// Exchanging messages.
    Open,
    /// Our close frame is sent; waiting for the peer's.
    Closing,
    /// Done.
    Closed,
}

/// Per-connection limits.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Largest accepted frame payload and reassembled message.
    pub max_frame_size: usize,
    /// How long to wait for the peer to acknowledge our close frame.
    pub close_timeout: Duration,
    /// Capacity of the outbound queue.
    pub outbound_capacity: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self::from(&WebSocketConfig::default())
    }
}

impl From<&WebSocketConfig> for BridgeConfig {
    fn from(config: &WebSocketConfig) -> Self {
        Self {
            max_frame_size: config.max_frame_size,
            close_timeout: config.close_timeout(),
            outbound_capacity: config.outbound_capacity,
        }
    }
}

/// Drives RFC 6455 framing for one connection.
pub struct Bridge<S> {
    framed: Framed<S, FrameCodec>,
    reassembler: Reassembler,
    inbound: mpsc::UnboundedSender<Option<Message>>,
    outbound: mpsc::Receiver<Option<Message>>,
    close_timeout: Duration,
    state: State,
    sentinel_sent: bool,
    /// A write was cut off mid-frame; nothing more may be written.
    write_abandoned: bool,
    peer: String,
}

impl<S> std::fmt::Debug for Bridge<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bridge")
            .field("peer", &self.peer)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl<S> Bridge<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Run the opening handshake on `stream` and return an open bridge.
    pub async fn accept(
        mut stream: S,
        config: &BridgeConfig,
        inbound: mpsc::UnboundedSender<Option<Message>>,
        outbound: mpsc::Receiver<Option<Message>>,
        peer: impl Into<String>,
    ) -> Result<(Self, Request), HandshakeError> {
        let peer = peer.into();
        let mut buf = BytesMut::new();
        let request = handshake::accept(&mut stream, &mut buf).await?;
        debug!("{}: {:?} -> {:?}", peer, State::Handshaking, State::Open);
        let bridge = Self::from_upgraded(stream, buf, config, inbound, outbound, peer);
        Ok((bridge, request))
    }

    /// Wrap a socket whose handshake already completed.
    ///
    /// `leftover` holds bytes read past the request head.
    pub fn from_upgraded(
        stream: S,
        leftover: BytesMut,
        config: &BridgeConfig,
        inbound: mpsc::UnboundedSender<Option<Message>>,
        outbound: mpsc::Receiver<Option<Message>>,
        peer: impl Into<String>,
    ) -> Self {
        let mut parts = FramedParts::new::<Frame>(stream, FrameCodec::server(config.max_frame_size));
        parts.read_buf = leftover;

        Self {
            framed: Framed::from_parts(parts),
            reassembler: Reassembler::new(config.max_frame_size),
            inbound,
            outbound,
            close_timeout: config.close_timeout,
            state: State::Open,
            sentinel_sent: false,
            write_abandoned: false,
            peer: peer.into(),
        }
    }

    /// Current state.
    pub fn state(&self) -> State {
        self.state
    }

    /// Run until the connection is closed.
    ///
    /// Writes never outlive `cancel`, and close frames are bounded by the
    /// close timeout, so a peer that stops reading cannot hold the bridge
    /// open past shutdown.
    pub async fn run(mut self, cancel: CancellationToken) -> State {
        let mut deadline = Instant::now();

        loop {
            match self.state {
                State::Open => {
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => {
                            self.send_close(CLOSE_GOING_AWAY, "server shutting down").await;
                            self.set_state(State::Closed);
                        }
                        frame = self.framed.next() => self.on_frame(frame, &cancel).await,
                        message = self.outbound.recv() => match message {
                            Some(Some(message)) => {
                                if !self.write(message.into_frame(), &cancel).await {
                                    self.set_state(State::Closed);
                                }
                            }
                            Some(None) | None => {
                                if self.send_close(CLOSE_NORMAL, "").await {
                                    deadline = Instant::now() + self.close_timeout;
                                    self.set_state(State::Closing);
                                } else {
                                    self.set_state(State::Closed);
                                }
                            }
                        },
                    }
                }
                State::Closing => {
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => self.set_state(State::Closed),
                        _ = tokio::time::sleep_until(deadline) => {
                            debug!("{}: close not acknowledged within {:?}", self.peer, self.close_timeout);
                            self.set_state(State::Closed);
                        }
                        frame = self.framed.next() => self.on_frame(frame, &cancel).await,
                    }
                }
                State::Handshaking | State::Closed => break,
            }
        }

        self.push_sentinel();
        if !self.write_abandoned
            && tokio::time::timeout(self.close_timeout, self.framed.close())
                .await
                .is_err()
        {
            debug!("{}: socket shutdown timed out", self.peer);
        }
        State::Closed
    }

    async fn on_frame(
        &mut self,
        frame: Option<Result<Frame, FrameError>>,
        cancel: &CancellationToken,
    ) {
        let frame = match frame {
            None => {
                debug!("{}: peer hung up", self.peer);
                self.set_state(State::Closed);
                return;
            }
            Some(Err(FrameError::Io(e))) => {
                debug!("{}: read failed: {}", self.peer, e);
                self.set_state(State::Closed);
                return;
            }
            Some(Err(e)) => {
                self.fail(e).await;
                return;
            }
            Some(Ok(frame)) => frame,
        };

        match frame.opcode {
            OpCode::Close => {
                if self.state == State::Open {
                    self.push_sentinel();
                    let code = frame.close_code().unwrap_or(CLOSE_NORMAL);
                    self.send_close(code, "").await;
                }
                self.set_state(State::Closed);
            }
            OpCode::Ping => {
                if !self.write(Frame::pong(frame.payload), cancel).await {
                    self.set_state(State::Closed);
                }
            }
            OpCode::Pong => {}
            OpCode::Text | OpCode::Binary | OpCode::Continuation => {
                match self.reassembler.push(frame) {
                    Ok(Some(message)) => {
                        let _ = self.inbound.send(Some(message));
                    }
                    Ok(None) => {}
                    Err(e) => self.fail(e).await,
                }
            }
        }
    }

    async fn fail(&mut self, error: FrameError) {
        warn!("{}: closing connection: {}", self.peer, error);
        self.send_close(error.close_code(), "").await;
        self.set_state(State::Closed);
    }

    /// Write a data or control frame unless `cancel` fires first.
    async fn write(&mut self, frame: Frame, cancel: &CancellationToken) -> bool {
        if self.write_abandoned {
            return false;
        }
        let result = tokio::select! {
            result = self.framed.send(frame) => result,
            _ = cancel.cancelled() => {
                debug!("{}: write abandoned on shutdown", self.peer);
                self.write_abandoned = true;
                return false;
            }
        };
        match result {
            Ok(()) => true,
            Err(e) => {
                debug!("{}: write failed: {}", self.peer, e);
                false
            }
        }
    }

    /// Write a close frame within the close timeout; returns whether it
    /// reached the socket.
    async fn send_close(&mut self, code: u16, reason: &str) -> bool {
        if self.write_abandoned {
            return false;
        }
        match tokio::time::timeout(self.close_timeout, self.framed.send(Frame::close(code, reason)))
            .await
        {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                debug!("{}: failed to send close frame: {}", self.peer, e);
                false
            }
            Err(_) => {
                debug!("{}: close frame not written within {:?}", self.peer, self.close_timeout);
                self.write_abandoned = true;
                false
            }
        }
    }

    fn push_sentinel(&mut self) {
        if !self.sentinel_sent {
            self.sentinel_sent = true;
            let _ = self.inbound.send(None);
        }
    }

    fn set_state(&mut self, state: State) {
        if self.state != state {
            debug!("{}: {:?} -> {:?}", self.peer, self.state, state);
            self.state = state;
        }
    }
}
