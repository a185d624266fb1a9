//! Server side of the HTTP/1.1 upgrade handshake.

use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

/// Largest request head accepted before the upgrade.
pub const MAX_HEADER_SIZE: usize = 8 * 1024;

/// How long a client may take to complete the handshake.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Handshake failures.
#[derive(Debug, thiserror::Error)]
pub enum HandshakeError {
    #[error("connection closed during handshake")]
    Closed,
    #[error("request head exceeds {MAX_HEADER_SIZE} bytes")]
    HeaderTooLarge,
    #[error("malformed request: {0}")]
    Malformed(&'static str),
    #[error("method {0} not allowed")]
    MethodNotAllowed(String),
    #[error("missing or invalid {0} header")]
    MissingHeader(&'static str),
    #[error("unsupported WebSocket version {0}")]
    UnsupportedVersion(String),
    #[error("invalid Sec-WebSocket-Key")]
    InvalidKey,
    #[error("handshake timed out")]
    Timeout,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl HandshakeError {
    /// Whether the peer is still there to receive a `400` response.
    fn peer_listening(&self) -> bool {
        !matches!(
            self,
            HandshakeError::Closed | HandshakeError::Io(_) | HandshakeError::Timeout
        )
    }
}

/// A validated upgrade request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// Request target.
    pub path: String,
    /// Client nonce from `Sec-WebSocket-Key`.
    pub key: String,
    /// All headers, names lowercased.
    pub headers: Vec<(String, String)>,
}

impl Request {
    /// First value of a header, matched case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// The `101 Switching Protocols` response for this request.
    pub fn response(&self) -> String {
        format!(
            "HTTP/1.1 101 Switching Protocols\r\n\
             Upgrade: websocket\r\n\
             Connection: Upgrade\r\n\
             Sec-WebSocket-Accept: {}\r\n\r\n",
            tungstenite::handshake::derive_accept_key(self.key.as_bytes())
        )
    }
}

fn has_token(value: &str, token: &str) -> bool {
    value
        .split(',')
        .any(|t| t.trim().eq_ignore_ascii_case(token))
}

fn is_valid_key(key: &str) -> bool {
    key.len() == 24
        && key.ends_with("==")
        && key[..22]
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'+' || b == b'/')
}

/// Parse a complete request head (without the trailing blank line).
pub fn parse_request(head: &str) -> Result<Request, HandshakeError> {
    let mut lines = head.split("\r\n");
    let request_line = lines
        .next()
        .ok_or(HandshakeError::Malformed("empty request"))?;

    let mut parts = request_line.split_whitespace();
    let (Some(method), Some(path), Some(version), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(HandshakeError::Malformed("bad request line"));
    };
    if method != "GET" {
        return Err(HandshakeError::MethodNotAllowed(method.to_string()));
    }
    if version != "HTTP/1.1" {
        return Err(HandshakeError::Malformed("HTTP/1.1 required"));
    }

    let mut headers = Vec::new();
    for line in lines.filter(|l| !l.is_empty()) {
        let (name, value) = line
            .split_once(':')
            .ok_or(HandshakeError::Malformed("bad header line"))?;
        headers.push((name.trim().to_ascii_lowercase(), value.trim().to_string()));
    }

    let mut request = Request {
        path: path.to_string(),
        key: String::new(),
        headers,
    };

    if request.header("host").is_none() {
        return Err(HandshakeError::MissingHeader("Host"));
    }
    if !request
        .header("upgrade")
        .is_some_and(|v| has_token(v, "websocket"))
    {
        return Err(HandshakeError::MissingHeader("Upgrade"));
    }
    if !request
        .header("connection")
        .is_some_and(|v| has_token(v, "upgrade"))
    {
        return Err(HandshakeError::MissingHeader("Connection"));
    }
    match request.header("sec-websocket-version") {
        Some("13") => {}
        Some(other) => return Err(HandshakeError::UnsupportedVersion(other.to_string())),
        None => return Err(HandshakeError::MissingHeader("Sec-WebSocket-Version")),
    }
    let key = request
        .header("sec-websocket-key")
        .ok_or(HandshakeError::MissingHeader("Sec-WebSocket-Key"))?;
    if !is_valid_key(key) {
        return Err(HandshakeError::InvalidKey);
    }
    request.key = key.to_string();

    Ok(request)
}

fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

async fn read_head<S>(stream: &mut S, buf: &mut BytesMut) -> Result<String, HandshakeError>
where
    S: AsyncRead + Unpin,
{
    loop {
        if let Some(end) = find_head_end(buf) {
            let head = buf.split_to(end + 4);
            return std::str::from_utf8(&head[..end])
                .map(str::to_string)
                .map_err(|_| HandshakeError::Malformed("request head is not UTF-8"));
        }
        if buf.len() > MAX_HEADER_SIZE {
            return Err(HandshakeError::HeaderTooLarge);
        }
        if stream.read_buf(buf).await? == 0 {
            return Err(HandshakeError::Closed);
        }
    }
}

/// Run the server handshake on `stream`.
///
/// Bytes the client sent after the request head stay in `buf` so the frame
/// decoder can pick them up. On a rejected request an HTTP error response is
/// written before returning the error.
pub async fn accept<S>(stream: &mut S, buf: &mut BytesMut) -> Result<Request, HandshakeError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let result = match read_head(stream, buf).await {
        Ok(head) => parse_request(&head),
        Err(e) => Err(e),
    };

    match result {
        Ok(request) => {
            stream.write_all(request.response().as_bytes()).await?;
            stream.flush().await?;
            debug!("Upgraded connection on {}", request.path);
            Ok(request)
        }
        Err(e) => {
            if e.peer_listening() {
                let mut response = String::from("HTTP/1.1 400 Bad Request\r\n");
                if matches!(e, HandshakeError::UnsupportedVersion(_)) {
                    response.push_str("Sec-WebSocket-Version: 13\r\n");
                }
                response.push_str("Content-Length: 0\r\nConnection: close\r\n\r\n");
                let _ = stream.write_all(response.as_bytes()).await;
                let _ = stream.shutdown().await;
            }
            Err(e)
        }
    }
}
