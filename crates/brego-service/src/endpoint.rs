//! Stream endpoints: `unix:<path>` or `tcp:<host:port>`.

use std::fmt;
use std::io;
use std::path::PathBuf;
use std::str::FromStr;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, UnixListener};
use tracing::{debug, info};

/// Where a stream listener binds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// A Unix domain socket path.
    Unix(PathBuf),
    /// A TCP `host:port` address.
    Tcp(String),
}

/// Error returned when an endpoint string is malformed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid endpoint '{input}': {reason}")]
pub struct ParseEndpointError {
    input: String,
    reason: &'static str,
}

impl FromStr for Endpoint {
    type Err = ParseEndpointError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = |reason| ParseEndpointError {
            input: s.to_string(),
            reason,
        };

        if let Some(path) = s.strip_prefix("unix:") {
            if path.is_empty() {
                return Err(err("socket path cannot be empty"));
            }
            return Ok(Endpoint::Unix(PathBuf::from(path)));
        }

        if let Some(addr) = s.strip_prefix("tcp:") {
            let (host, port) = addr
                .rsplit_once(':')
                .ok_or_else(|| err("expected format 'tcp:host:port'"))?;
            if host.is_empty() {
                return Err(err("host cannot be empty"));
            }
            port.parse::<u16>()
                .map_err(|_| err("port must be a number 0-65535"))?;
            return Ok(Endpoint::Tcp(addr.to_string()));
        }

        Err(err("expected 'unix:<path>' or 'tcp:<host:port>'"))
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Unix(path) => write!(f, "unix:{}", path.display()),
            Endpoint::Tcp(addr) => write!(f, "tcp:{}", addr),
        }
    }
}

/// A bidirectional byte stream accepted from a [`Listener`].
pub trait Connection: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> Connection for T {}

/// A bound stream listener.
#[derive(Debug)]
pub enum Listener {
    /// Listening on a Unix socket; the path is removed again on drop.
    Unix {
        /// The underlying listener.
        listener: UnixListener,
        /// Socket path.
        path: PathBuf,
    },
    /// Listening on TCP.
    Tcp(TcpListener),
}

impl Listener {
    /// Bind to an endpoint.
    ///
    /// A stale Unix socket file is removed first. If the path exists and
    /// cannot be removed, binding fails.
    pub async fn bind(endpoint: &Endpoint) -> io::Result<Self> {
        match endpoint {
            Endpoint::Unix(path) => {
                match std::fs::remove_file(path) {
                    Ok(()) => debug!("Removed stale socket {}", path.display()),
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                    Err(e) => return Err(e),
                }
                let listener = UnixListener::bind(path)?;
                info!("Listening on {}", endpoint);
                Ok(Listener::Unix {
                    listener,
                    path: path.clone(),
                })
            }
            Endpoint::Tcp(addr) => {
                let listener = TcpListener::bind(addr.as_str()).await?;
                info!("Listening on tcp:{}", listener.local_addr()?);
                Ok(Listener::Tcp(listener))
            }
        }
    }

    /// Accept the next connection, returning it with a peer description.
    pub async fn accept(&self) -> io::Result<(Box<dyn Connection>, String)> {
        match self {
            Listener::Unix { listener, .. } => {
                let (stream, _) = listener.accept().await?;
                Ok((Box::new(stream), "unix".to_string()))
            }
            Listener::Tcp(listener) => {
                let (stream, peer) = listener.accept().await?;
                Ok((Box::new(stream), peer.to_string()))
            }
        }
    }

    /// The endpoint actually bound (resolves TCP port 0).
    pub fn local_endpoint(&self) -> io::Result<Endpoint> {
        match self {
            Listener::Unix { path, .. } => Ok(Endpoint::Unix(path.clone())),
            Listener::Tcp(listener) => Ok(Endpoint::Tcp(listener.local_addr()?.to_string())),
        }
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        if let Listener::Unix { path, .. } = self {
            let _ = std::fs::remove_file(path);
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use super::*;

    #[test]
    fn test_parse_endpoints() {
        assert_eq!(
            "unix:/tmp/brego.sock".parse::<Endpoint>().unwrap(),
            Endpoint::Unix(PathBuf::from("/tmp/brego.sock"))
        );
        assert_eq!(
            "tcp:127.0.0.1:7000".parse::<Endpoint>().unwrap(),
            Endpoint::Tcp("127.0.0.1:7000".to_string())
        );
        assert_eq!(
            "tcp:[::1]:7000".parse::<Endpoint>().unwrap(),
            Endpoint::Tcp("[::1]:7000".to_string())
        );
    }

    #[test]
    fn test_parse_invalid_endpoints() {
        for bad in ["", "/tmp/x.sock", "unix:", "tcp:localhost", "tcp::80", "tcp:host:http"] {
            assert!(bad.parse::<Endpoint>().is_err(), "accepted {bad:?}");
        }
    }

    #[test]
    fn test_endpoint_display_round_trips() {
        for s in ["unix:/run/brego.sock", "tcp:0.0.0.0:7000"] {
            assert_eq!(s.parse::<Endpoint>().unwrap().to_string(), s);
        }
    }

    #[tokio::test]
    async fn test_bind_removes_stale_socket() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stale.sock");
        std::fs::write(&path, b"").unwrap();

        let listener = Listener::bind(&Endpoint::Unix(path.clone())).await.unwrap();
        let mut client = tokio::net::UnixStream::connect(&path).await.unwrap();
        let (mut server, peer) = listener.accept().await.unwrap();
        assert_eq!(peer, "unix");

        client.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        drop(listener);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_bind_fails_when_path_cannot_be_removed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("occupied");
        std::fs::create_dir(&path).unwrap();
        std::fs::write(path.join("file"), b"x").unwrap();

        assert!(Listener::bind(&Endpoint::Unix(path)).await.is_err());
    }

    #[tokio::test]
    async fn test_tcp_local_endpoint() {
        let listener = Listener::bind(&Endpoint::Tcp("127.0.0.1:0".to_string()))
            .await
            .unwrap();
        match listener.local_endpoint().unwrap() {
            Endpoint::Tcp(addr) => assert!(!addr.ends_with(":0")),
            other => panic!("unexpected endpoint {other}"),
        }
    }
}
