//! RFC 6455 frame codec.
//!
//! [`FrameCodec`] turns a byte stream into [`Frame`]s and back. Header
//! parsing and formatting come from `tungstenite`'s frame primitives; this
//! module adds the rules that do not depend on connection state (masking
//! direction, reserved bits, control frame limits, the payload size cap).
//! Message-level rules (fragment sequencing, UTF-8 validity) are handled by
//! [`Reassembler`].

use std::io::Cursor;

use bytes::{BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tungstenite::error::ProtocolError;
use tungstenite::protocol::frame::coding::{Control, Data, OpCode as WireOpCode};
use tungstenite::protocol::frame::{Frame as WireFrame, FrameHeader};

/// Normal closure.
pub const CLOSE_NORMAL: u16 = 1000;
/// The endpoint is going away (server shutdown).
pub const CLOSE_GOING_AWAY: u16 = 1001;
/// Protocol violation.
pub const CLOSE_PROTOCOL_ERROR: u16 = 1002;
/// Text payload was not valid UTF-8.
pub const CLOSE_INVALID_PAYLOAD: u16 = 1007;
/// Message larger than the configured cap.
pub const CLOSE_TOO_BIG: u16 = 1009;

const MAX_CONTROL_PAYLOAD: usize = 125;

/// Frame opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpCode {
    /// Continuation of a fragmented message.
    Continuation,
    /// UTF-8 text.
    Text,
    /// Binary data.
    Binary,
    /// Connection close.
    Close,
    /// Ping.
    Ping,
    /// Pong.
    Pong,
}

impl OpCode {
    /// Whether this is a control opcode.
    pub fn is_control(self) -> bool {
        matches!(self, OpCode::Close | OpCode::Ping | OpCode::Pong)
    }
}

impl From<OpCode> for WireOpCode {
    fn from(opcode: OpCode) -> Self {
        match opcode {
            OpCode::Continuation => WireOpCode::Data(Data::Continue),
            OpCode::Text => WireOpCode::Data(Data::Text),
            OpCode::Binary => WireOpCode::Data(Data::Binary),
            OpCode::Close => WireOpCode::Control(Control::Close),
            OpCode::Ping => WireOpCode::Control(Control::Ping),
            OpCode::Pong => WireOpCode::Control(Control::Pong),
        }
    }
}

impl TryFrom<WireOpCode> for OpCode {
    type Error = FrameError;

    fn try_from(opcode: WireOpCode) -> Result<Self, FrameError> {
        match opcode {
            WireOpCode::Data(Data::Continue) => Ok(OpCode::Continuation),
            WireOpCode::Data(Data::Text) => Ok(OpCode::Text),
            WireOpCode::Data(Data::Binary) => Ok(OpCode::Binary),
            WireOpCode::Control(Control::Close) => Ok(OpCode::Close),
            WireOpCode::Control(Control::Ping) => Ok(OpCode::Ping),
            WireOpCode::Control(Control::Pong) => Ok(OpCode::Pong),
            WireOpCode::Data(Data::Reserved(bits)) | WireOpCode::Control(Control::Reserved(bits)) => {
                Err(FrameError::ReservedOpcode(bits))
            }
        }
    }
}

/// A single WebSocket frame with its payload unmasked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Final fragment of a message.
    pub fin: bool,
    /// Frame type.
    pub opcode: OpCode,
    /// Unmasked payload.
    pub payload: Bytes,
}

impl Frame {
    /// A complete text frame.
    pub fn text(text: impl Into<String>) -> Self {
        Self::new(OpCode::Text, Bytes::from(text.into()))
    }

    /// A complete binary frame.
    pub fn binary(data: impl Into<Bytes>) -> Self {
        Self::new(OpCode::Binary, data.into())
    }

    /// A ping frame.
    pub fn ping(data: impl Into<Bytes>) -> Self {
        Self::new(OpCode::Ping, data.into())
    }

    /// A pong frame.
    pub fn pong(data: impl Into<Bytes>) -> Self {
        Self::new(OpCode::Pong, data.into())
    }

    /// A close frame carrying a status code and reason.
    pub fn close(code: u16, reason: &str) -> Self {
        let mut payload = BytesMut::with_capacity(2 + reason.len());
        payload.put_u16(code);
        // Control payloads are capped at 125 bytes
        let reason = truncate_utf8(reason, MAX_CONTROL_PAYLOAD - 2);
        payload.put_slice(reason.as_bytes());
        Self::new(OpCode::Close, payload.freeze())
    }

    fn new(opcode: OpCode, payload: Bytes) -> Self {
        Self {
            fin: true,
            opcode,
            payload,
        }
    }

    /// The status code of a close frame, if it carries one.
    pub fn close_code(&self) -> Option<u16> {
        if self.opcode != OpCode::Close || self.payload.len() < 2 {
            return None;
        }
        Some(u16::from_be_bytes([self.payload[0], self.payload[1]]))
    }
}

fn truncate_utf8(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Framing and message errors.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum FrameError {
    #[error("client frame is not masked")]
    Unmasked,
    #[error("server frame is masked")]
    UnexpectedMask,
    #[error("reserved bits set")]
    ReservedBits,
    #[error("reserved opcode {0:#x}")]
    ReservedOpcode(u8),
    #[error("fragmented control frame")]
    FragmentedControl,
    #[error("control frame payload of {0} bytes exceeds 125")]
    ControlTooLong(usize),
    #[error("invalid close frame payload")]
    InvalidClosePayload,
    #[error("payload of {size} bytes exceeds limit of {max}")]
    TooLarge { size: u64, max: usize },
    #[error("continuation frame without a message in progress")]
    UnexpectedContinuation,
    #[error("new message started before the previous one finished")]
    ExpectedContinuation,
    #[error("text payload is not valid UTF-8")]
    InvalidUtf8,
    #[error("malformed frame: {0}")]
    Malformed(#[from] tungstenite::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl FrameError {
    /// The close code to send when failing the connection for this error.
    pub fn close_code(&self) -> u16 {
        match self {
            FrameError::TooLarge { .. } => CLOSE_TOO_BIG,
            FrameError::InvalidUtf8 => CLOSE_INVALID_PAYLOAD,
            _ => CLOSE_PROTOCOL_ERROR,
        }
    }
}

/// Which end of the connection the codec runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Expects masked frames, writes unmasked ones.
    Server,
    /// Expects unmasked frames, writes masked ones.
    Client,
}

/// Encoder/decoder for WebSocket frames.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    role: Role,
    max_frame_size: usize,
}

impl FrameCodec {
    /// Server-side codec.
    pub fn server(max_frame_size: usize) -> Self {
        Self {
            role: Role::Server,
            max_frame_size,
        }
    }

    /// Client-side codec.
    pub fn client(max_frame_size: usize) -> Self {
        Self {
            role: Role::Client,
            max_frame_size,
        }
    }

    /// Largest accepted payload.
    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    /// Check a parsed header against the codec's limits.
    fn check(&self, header: &FrameHeader, len: u64) -> Result<OpCode, FrameError> {
        let opcode = OpCode::try_from(header.opcode)?;
        if header.rsv1 || header.rsv2 || header.rsv3 {
            return Err(FrameError::ReservedBits);
        }
        match (self.role, header.mask.is_some()) {
            (Role::Server, false) => return Err(FrameError::Unmasked),
            (Role::Client, true) => return Err(FrameError::UnexpectedMask),
            _ => {}
        }
        if opcode.is_control() {
            if !header.is_final {
                return Err(FrameError::FragmentedControl);
            }
            if len > MAX_CONTROL_PAYLOAD as u64 {
                return Err(FrameError::ControlTooLong(len as usize));
            }
        }
        if len > self.max_frame_size as u64 {
            return Err(FrameError::TooLarge {
                size: len,
                max: self.max_frame_size,
            });
        }
        Ok(opcode)
    }
}

fn unmask(payload: &mut [u8], mask: [u8; 4]) {
    for (byte, key) in payload.iter_mut().zip(mask.iter().cycle()) {
        *byte ^= key;
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, FrameError> {
        let mut cursor = Cursor::new(&src[..]);
        let (header, len) = match FrameHeader::parse(&mut cursor) {
            Ok(Some(parsed)) => parsed,
            Ok(None) => return Ok(None),
            Err(tungstenite::Error::Protocol(ProtocolError::InvalidOpcode(bits))) => {
                return Err(FrameError::ReservedOpcode(bits));
            }
            Err(e) => return Err(e.into()),
        };
        let header_len = cursor.position() as usize;
        let opcode = self.check(&header, len)?;
        let len = len as usize;

        let total = header_len + len;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        let mut payload = src.split_to(total).split_off(header_len);
        if let Some(mask) = header.mask {
            unmask(&mut payload, mask);
        }

        if opcode == OpCode::Close {
            validate_close_payload(&payload)?;
        }

        Ok(Some(Frame {
            fin: header.is_final,
            opcode,
            payload: payload.freeze(),
        }))
    }
}

/// Status codes a peer may send: the registered ones plus the 3000-4999
/// application range.
fn is_valid_close_code(code: u16) -> bool {
    matches!(code, 1000..=1003 | 1007..=1014 | 3000..=4999)
}

fn validate_close_payload(payload: &[u8]) -> Result<(), FrameError> {
    match payload.len() {
        0 => Ok(()),
        1 => Err(FrameError::InvalidClosePayload),
        _ => {
            let code = u16::from_be_bytes([payload[0], payload[1]]);
            if !is_valid_close_code(code) || std::str::from_utf8(&payload[2..]).is_err() {
                return Err(FrameError::InvalidClosePayload);
            }
            Ok(())
        }
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = FrameError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), FrameError> {
        let header = FrameHeader {
            is_final: frame.fin,
            opcode: frame.opcode.into(),
            mask: match self.role {
                Role::Server => None,
                Role::Client => Some(rand::random()),
            },
            ..FrameHeader::default()
        };
        let len = frame.payload.len();
        dst.reserve(header.len(len as u64) + len);

        // Masks the payload when the header carries a key
        WireFrame::from_payload(header, frame.payload).format(&mut dst.writer())?;
        Ok(())
    }
}

/// A complete application message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// UTF-8 text.
    Text(String),
    /// Binary data.
    Binary(Bytes),
}

impl Message {
    /// The frame carrying this message unfragmented.
    pub fn into_frame(self) -> Frame {
        match self {
            Message::Text(text) => Frame::text(text),
            Message::Binary(data) => Frame::binary(data),
        }
    }

    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        match self {
            Message::Text(text) => text.len(),
            Message::Binary(data) => data.len(),
        }
    }

    /// Whether the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<String> for Message {
    fn from(text: String) -> Self {
        Message::Text(text)
    }
}

/// Joins data frames into complete messages.
#[derive(Debug)]
pub struct Reassembler {
    max_message_size: usize,
    partial: Option<(OpCode, BytesMut)>,
}

impl Reassembler {
    /// Reassembler rejecting messages above `max_message_size` bytes.
    pub fn new(max_message_size: usize) -> Self {
        Self {
            max_message_size,
            partial: None,
        }
    }

    /// Feed one data frame; returns a message once its final fragment arrives.
    pub fn push(&mut self, frame: Frame) -> Result<Option<Message>, FrameError> {
        let (opcode, mut buf) = match (frame.opcode, self.partial.take()) {
            (OpCode::Continuation, Some((opcode, buf))) => (opcode, buf),
            (OpCode::Continuation, None) => return Err(FrameError::UnexpectedContinuation),
            (_, Some(_)) => return Err(FrameError::ExpectedContinuation),
            (opcode, None) => (opcode, BytesMut::new()),
        };

        let size = buf.len() + frame.payload.len();
        if size > self.max_message_size {
            return Err(FrameError::TooLarge {
                size: size as u64,
                max: self.max_message_size,
            });
        }
        buf.extend_from_slice(&frame.payload);

        if !frame.fin {
            self.partial = Some((opcode, buf));
            return Ok(None);
        }

        match opcode {
            OpCode::Text => String::from_utf8(buf.to_vec())
                .map(|text| Some(Message::Text(text)))
                .map_err(|_| FrameError::InvalidUtf8),
            _ => Ok(Some(Message::Binary(buf.freeze()))),
        }
    }
}
