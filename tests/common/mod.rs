//! In-memory broker plumbing shared by the integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use cobalt_stomp::{
    BoxedTransport, Command, ConnectOptions, Connection, Connector, Frame, StompCodec, Version,
};
use futures::{SinkExt, StreamExt};
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::io::DuplexStream;
use tokio::sync::mpsc;
use tokio_util::codec::Framed;

pub type BrokerSide = Framed<DuplexStream, StompCodec>;

/// Hands the broker end of every opened pipe to the test.
///
/// The first `refuse` connection attempts fail with `ConnectionRefused`.
pub struct MockConnector {
    streams: mpsc::UnboundedSender<DuplexStream>,
    refuse: AtomicUsize,
    buffer: usize,
    pub attempts: AtomicUsize,
}

impl MockConnector {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<DuplexStream>) {
        Self::refusing(0)
    }

    pub fn refusing(refuse: usize) -> (Arc<Self>, mpsc::UnboundedReceiver<DuplexStream>) {
        Self::build(refuse, 64 * 1024)
    }

    /// Pipes that hold only `buffer` bytes in flight, so writes park until
    /// the broker reads.
    pub fn with_buffer(buffer: usize) -> (Arc<Self>, mpsc::UnboundedReceiver<DuplexStream>) {
        Self::build(0, buffer)
    }

    fn build(refuse: usize, buffer: usize) -> (Arc<Self>, mpsc::UnboundedReceiver<DuplexStream>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let connector = Arc::new(Self {
            streams: tx,
            refuse: AtomicUsize::new(refuse),
            buffer,
            attempts: AtomicUsize::new(0),
        });
        (connector, rx)
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, _host: &str, _port: u16) -> io::Result<BoxedTransport> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let refused = self
            .refuse
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(io::Error::new(io::ErrorKind::ConnectionRefused, "refused"));
        }
        let (client, broker) = tokio::io::duplex(self.buffer);
        self.streams
            .send(broker)
            .map_err(|_| io::Error::new(io::ErrorKind::ConnectionRefused, "broker gone"))?;
        Ok(Box::new(client))
    }
}

/// A connection wired to a fresh mock connector.
pub fn connection(options: ConnectOptions) -> (Connection, mpsc::UnboundedReceiver<DuplexStream>) {
    let (connector, streams) = MockConnector::new();
    (Connection::with_connector(options, connector), streams)
}

/// Accept the next pipe, read CONNECT and answer with `connected`.
///
/// The broker codec switches to the version named in `connected`.
pub async fn handshake(
    streams: &mut mpsc::UnboundedReceiver<DuplexStream>,
    connected: Frame,
) -> (BrokerSide, Frame) {
    let stream = streams.recv().await.expect("client never connected");
    let mut broker = Framed::new(stream, StompCodec::new(Version::V1_0));
    let connect = next_frame(&mut broker).await;
    assert!(connect.is(Command::Connect), "expected CONNECT, got {}", connect);
    let version = connected
        .get_header("version")
        .and_then(|v| v.parse().ok())
        .unwrap_or(Version::V1_0);
    broker.send(connected).await.expect("send CONNECTED");
    broker.codec_mut().set_version(version);
    (broker, connect)
}

pub fn connected(version: &str) -> Frame {
    Frame::new(Command::Connected)
        .header("version", version)
        .header("session", "session-1")
        .header("heart-beat", "0,0")
}

/// Next non-heartbeat frame the client sent.
pub async fn next_frame(broker: &mut BrokerSide) -> Frame {
    loop {
        let frame = broker
            .next()
            .await
            .expect("client closed the stream")
            .expect("client sent a malformed frame");
        if !frame.is_heartbeat() {
            return frame;
        }
    }
}

pub fn message(destination: &str, body: &str) -> Frame {
    Frame::new(Command::Message)
        .header("destination", destination)
        .header("message-id", "m-1")
        .set_body(body)
}
