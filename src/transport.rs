//! Byte stream abstraction consumed by the connection.
//!
//! The connection only needs an ordered, bidirectional byte stream. Framing,
//! buffering and readiness are provided on top of it by `tokio_util`'s
//! `FramedRead`/`FramedWrite`. Where the stream comes from (plain TCP, TLS,
//! an in-memory pipe in tests) is decided by a [`Connector`].

use async_trait::async_trait;
use std::io;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

/// Any async byte stream the codec can run over.
pub trait Transport: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T> Transport for T where T: AsyncRead + AsyncWrite + Send + Unpin {}

pub type BoxedTransport = Box<dyn Transport>;

/// Opens a byte stream to `host:port`.
///
/// A TLS provider implements this trait by performing its handshake (and
/// any hostname verification) before returning the stream.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, host: &str, port: u16) -> io::Result<BoxedTransport>;
}

/// Plain TCP connector.
#[derive(Debug, Clone, Default)]
pub struct TcpConnector {
    nodelay: bool,
}

impl TcpConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Disable Nagle's algorithm on opened sockets.
    pub fn nodelay(mut self, nodelay: bool) -> Self {
        self.nodelay = nodelay;
        self
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, host: &str, port: u16) -> io::Result<BoxedTransport> {
        let stream = TcpStream::connect((host, port)).await?;
        stream.set_nodelay(self.nodelay)?;
        Ok(Box::new(stream))
    }
}
