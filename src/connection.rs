use async_trait::async_trait;
use futures::{FutureExt, SinkExt, StreamExt};
use parking_lot::Mutex as SyncMutex;
use std::fmt;
use std::future::Future;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{ReadHalf, WriteHalf};
use tokio::sync::{Mutex, oneshot};
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::codec::StompCodec;
use crate::config::ConnectOptions;
use crate::error::{Result, StompError};
use crate::events::{EventRegistry, FrameEvent, Interceptor, LifecycleEvent};
use crate::frame::{Command, Frame};
use crate::headers::Headers;
use crate::heartbeat::HeartbeatMonitor;
use crate::ids::IdGenerator;
use crate::protocol::Version;
use crate::receipt::ReceiptRegistry;
use crate::receiver::Receive;
use crate::scope::Transmit;
use crate::subscription::SubscriptionRegistry;
use crate::transaction::Transaction;
use crate::transport::{BoxedTransport, Connector, TcpConnector};

type Reader = FramedRead<ReadHalf<BoxedTransport>, StompCodec>;
type Writer = FramedWrite<WriteHalf<BoxedTransport>, StompCodec>;

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Disconnected,
    Connecting,
    Connected,
    /// A heartbeat deadline was missed. The stream is still open.
    Dead,
    Closed,
}

struct Session {
    state: State,
    version: Version,
    heartbeat: HeartbeatMonitor,
    session_id: Option<String>,
    server: Option<String>,
    explicitly_closed: bool,
    /// Cancelled when the current stream is torn down, waking any read or
    /// write parked on it.
    teardown: CancellationToken,
}

struct Inner {
    options: ConnectOptions,
    connector: Arc<dyn Connector>,
    ids: Arc<IdGenerator>,
    reader: Mutex<Option<Reader>>,
    writer: Mutex<Option<Writer>>,
    session: SyncMutex<Session>,
    events: EventRegistry,
    receipts: Arc<ReceiptRegistry>,
    subscriptions: Arc<SubscriptionRegistry>,
    /// Handed every inbound frame before events fire: receipts, then
    /// subscriptions.
    interceptors: Vec<Arc<dyn Interceptor>>,
}

/// A STOMP connection.
///
/// Reads and writes each have their own lock, so a task parked in
/// [`Connection::receive`] never holds up a concurrent transmit. Clones share
/// the same stream and registries.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

fn command_name(frame: &Frame) -> &'static str {
    frame.command.map(|c| c.as_str()).unwrap_or("HEARTBEAT")
}

fn closed_error() -> StompError {
    io::Error::new(io::ErrorKind::ConnectionAborted, "connection closed").into()
}

impl Connection {
    /// A connection that opens plain TCP streams.
    pub fn new(options: ConnectOptions) -> Self {
        Self::with_connector(options, Arc::new(TcpConnector::new().nodelay(true)))
    }

    /// Parse a `stomp://` URI into options; see [`ConnectOptions::from_uri`].
    pub fn from_uri(uri: &str) -> Result<Self> {
        Ok(Self::new(ConnectOptions::from_uri(uri)?))
    }

    pub fn with_connector(options: ConnectOptions, connector: Arc<dyn Connector>) -> Self {
        Self::with_parts(options, connector, Arc::new(IdGenerator::new()))
    }

    /// Full constructor. Share `ids` between connections that must never
    /// reuse each other's subscription, receipt or transaction ids.
    pub fn with_parts(
        options: ConnectOptions,
        connector: Arc<dyn Connector>,
        ids: Arc<IdGenerator>,
    ) -> Self {
        let receipts = Arc::new(ReceiptRegistry::new());
        let subscriptions = Arc::new(SubscriptionRegistry::new());
        let interceptors: Vec<Arc<dyn Interceptor>> =
            vec![receipts.clone(), subscriptions.clone()];
        Self {
            inner: Arc::new(Inner {
                options,
                connector,
                ids,
                reader: Mutex::new(None),
                writer: Mutex::new(None),
                session: SyncMutex::new(Session {
                    state: State::Disconnected,
                    version: Version::V1_0,
                    heartbeat: HeartbeatMonitor::disabled(),
                    session_id: None,
                    server: None,
                    explicitly_closed: false,
                    teardown: CancellationToken::new(),
                }),
                events: EventRegistry::new(),
                receipts,
                subscriptions,
                interceptors,
            }),
        }
    }

    /// Build a connection and connect it.
    pub async fn open(options: ConnectOptions) -> Result<Self> {
        let conn = Self::new(options);
        conn.connect().await?;
        Ok(conn)
    }

    pub fn options(&self) -> &ConnectOptions {
        &self.inner.options
    }

    pub fn ids(&self) -> &IdGenerator {
        &self.inner.ids
    }

    pub fn events(&self) -> &EventRegistry {
        &self.inner.events
    }

    pub fn receipts(&self) -> &ReceiptRegistry {
        &self.inner.receipts
    }

    pub fn subscriptions(&self) -> &SubscriptionRegistry {
        &self.inner.subscriptions
    }

    pub fn state(&self) -> State {
        self.inner.session.lock().state
    }

    /// Negotiated protocol version; 1.0 until CONNECTED arrives.
    pub fn version(&self) -> Version {
        self.inner.session.lock().version
    }

    pub fn session_id(&self) -> Option<String> {
        self.inner.session.lock().session_id.clone()
    }

    /// The broker's `server` header, if it sent one.
    pub fn server(&self) -> Option<String> {
        self.inner.session.lock().server.clone()
    }

    /// Snapshot of the heartbeat intervals and timestamps.
    pub fn heartbeat(&self) -> HeartbeatMonitor {
        self.inner.session.lock().heartbeat.clone()
    }

    /// True while a stream is open, including after a missed heartbeat.
    pub fn is_connected(&self) -> bool {
        matches!(self.state(), State::Connected | State::Dead)
    }

    /// True when the client disconnected or closed on purpose.
    pub fn closed_by_client(&self) -> bool {
        self.inner.session.lock().explicitly_closed
    }

    pub fn client_alive(&self) -> bool {
        self.inner.session.lock().heartbeat.client_alive()
    }

    pub fn broker_alive(&self) -> bool {
        self.inner.session.lock().heartbeat.broker_alive()
    }

    /// Connected and both heartbeat directions within their deadlines.
    pub fn is_alive(&self) -> bool {
        let session = self.inner.session.lock();
        matches!(session.state, State::Connected | State::Dead)
            && session.heartbeat.client_alive()
            && session.heartbeat.broker_alive()
    }

    /// Open the stream and run the CONNECT/CONNECTED handshake.
    pub async fn connect(&self) -> Result<()> {
        {
            let mut session = self.inner.session.lock();
            if matches!(
                session.state,
                State::Connecting | State::Connected | State::Dead
            ) {
                return Err(StompError::AlreadyConnected);
            }
            session.state = State::Connecting;
            session.version = Version::V1_0;
            session.heartbeat = HeartbeatMonitor::disabled();
            session.session_id = None;
            session.server = None;
            session.explicitly_closed = false;
            session.teardown = CancellationToken::new();
        }

        let options = &self.inner.options;
        debug!(host = %options.host, port = options.port, "opening stream");
        let stream = match self.inner.connector.connect(&options.host, options.port).await {
            Ok(stream) => stream,
            Err(e) => {
                debug!(error = %e, "stream could not be opened");
                self.inner.session.lock().state = State::Closed;
                return Err(e.into());
            }
        };
        let (read_half, write_half) = tokio::io::split(stream);
        // Held until CONNECTED is read, so a concurrent receive cannot take
        // the handshake answer.
        let mut reader = self.inner.reader.lock().await;
        *reader = Some(FramedRead::new(read_half, StompCodec::new(Version::V1_0)));
        *self.inner.writer.lock().await =
            Some(FramedWrite::new(write_half, StompCodec::new(Version::V1_0)));

        let connected = match self.handshake(&mut reader).await {
            Ok(frame) => frame,
            Err(e) => {
                drop(reader);
                self.abandon().await;
                return Err(e);
            }
        };

        let raw_version = connected.get_header("version").unwrap_or("1.0");
        let version = match raw_version.parse::<Version>() {
            Ok(v) if options.accept_versions.contains(&v) => v,
            _ => {
                drop(reader);
                self.abandon().await;
                return Err(StompError::UnsupportedProtocolVersion(raw_version.to_string()));
            }
        };
        if let Some(reader) = reader.as_mut() {
            reader.decoder_mut().set_version(version);
        }
        if let Some(writer) = self.inner.writer.lock().await.as_mut() {
            writer.encoder_mut().set_version(version);
        }

        let heartbeat = HeartbeatMonitor::negotiate(
            version,
            &options.heartbeat.to_string(),
            connected.get_header("heart-beat"),
        );
        {
            let mut session = self.inner.session.lock();
            session.state = State::Connected;
            session.version = version;
            session.heartbeat = heartbeat;
            session.session_id = connected.get_header("session").map(str::to_string);
            session.server = connected.get_header("server").map(str::to_string);
        }
        drop(reader);
        info!(
            version = %version,
            session = ?connected.get_header("session"),
            "connection established"
        );
        self.inner.events.fire_lifecycle(LifecycleEvent::Established);
        Ok(())
    }

    /// Write CONNECT and read up to the broker's answer on the locked reader.
    async fn handshake(&self, reader: &mut Option<Reader>) -> Result<Frame> {
        self.write_frame(self.inner.options.connect_frame()).await?;
        let token = self.teardown_token();
        loop {
            let frame = self.next_from(reader, &token).await?;
            self.dispatch_inbound(&frame);
            match frame.command {
                None => continue,
                Some(Command::Connected) => return Ok(frame),
                Some(Command::Error) => {
                    let message = frame
                        .get_header("message")
                        .unwrap_or("connection refused by broker")
                        .to_string();
                    warn!(%message, "broker rejected CONNECT");
                    return Err(StompError::ServerRejected {
                        message,
                        body: frame.body_text().map(str::to_string),
                    });
                }
                Some(other) => {
                    return Err(StompError::Protocol(format!(
                        "expected CONNECTED, got {}",
                        other
                    )));
                }
            }
        }
    }

    /// Send DISCONNECT (carrying `headers`, e.g. a `receipt`) and close the
    /// stream.
    pub async fn disconnect(&self, headers: Headers) -> Result<()> {
        self.inner.session.lock().explicitly_closed = true;
        let sent = self
            .write_frame(Frame::disconnect().with_headers(headers))
            .await;
        self.shutdown_stream().await;
        self.mark_closed();
        sent
    }

    /// DISCONNECT with a generated receipt, waiting up to `timeout` for the
    /// broker to confirm before closing the stream.
    pub async fn disconnect_confirmed(&self, timeout: Duration) -> Result<()> {
        self.inner.session.lock().explicitly_closed = true;
        let receipt_id = self.inner.ids.receipt_id();
        let waiter = self.inner.receipts.wait_for(receipt_id.as_str());
        let sent = self
            .write_frame(Frame::disconnect().receipt(receipt_id.as_str()))
            .await;
        let confirmed = match sent {
            Ok(()) => self.await_receipt(&receipt_id, waiter, timeout).await.map(drop),
            Err(e) => {
                self.inner.receipts.cancel(&receipt_id);
                Err(e)
            }
        };
        self.shutdown_stream().await;
        self.mark_closed();
        confirmed
    }

    /// Close the stream without a DISCONNECT.
    pub async fn close(&self) {
        self.inner.session.lock().explicitly_closed = true;
        self.shutdown_stream().await;
        self.mark_closed();
    }

    /// Wait for the next frame, heartbeats included, and dispatch it.
    pub async fn receive(&self) -> Result<Frame> {
        self.check_liveness();
        self.read_frame().await
    }

    /// Return a frame only if one can be decoded without waiting.
    ///
    /// `Ok(None)` when no complete frame is buffered or readable, or while
    /// another task is reading.
    pub fn receive_nonblock(&self) -> Result<Option<Frame>> {
        self.check_liveness();
        let Ok(mut guard) = self.inner.reader.try_lock() else {
            return Ok(None);
        };
        let Some(reader) = guard.as_mut() else {
            return Err(StompError::NotConnected);
        };
        let Some(item) = reader.next().now_or_never() else {
            return Ok(None);
        };
        let result = self.settle_read(&mut guard, item);
        drop(guard);
        let frame = result?;
        self.dispatch_inbound(&frame);
        Ok(Some(frame))
    }

    /// Send a heartbeat. A no-op on 1.0, which has none.
    pub async fn beat(&self) -> Result<()> {
        match self.version().beat_frame() {
            Some(beat) => self.write_frame(beat).await,
            None => Ok(()),
        }
    }

    /// Transmit `frame` with a generated receipt and wait for the RECEIPT.
    ///
    /// Frames read while waiting are dispatched to callbacks as usual.
    pub async fn transmit_confirmed(&self, frame: Frame, timeout: Duration) -> Result<Frame> {
        let receipt_id = self.inner.ids.receipt_id();
        let waiter = self.inner.receipts.wait_for(receipt_id.as_str());
        if let Err(e) = self.write_frame(frame.receipt(receipt_id.as_str())).await {
            self.inner.receipts.cancel(&receipt_id);
            return Err(e);
        }
        self.await_receipt(&receipt_id, waiter, timeout).await
    }

    /// Re-send the SUBSCRIBE frame of every registered subscription.
    pub async fn resubscribe(&self) -> Result<usize> {
        let frames = self.inner.subscriptions.frames();
        let count = frames.len();
        for frame in frames {
            self.write_frame(frame).await?;
        }
        if count > 0 {
            info!(count, "resubscribed");
        }
        Ok(count)
    }

    pub fn on_frame<F>(&self, event: FrameEvent, callback: F)
    where
        F: Fn(&Frame) + Send + Sync + 'static,
    {
        self.inner.events.on_frame(event, callback);
    }

    pub fn on_lifecycle<F>(&self, event: LifecycleEvent, callback: F)
    where
        F: Fn(LifecycleEvent) + Send + Sync + 'static,
    {
        self.inner.events.on_lifecycle(event, callback);
    }

    /// Every MESSAGE, whether or not a subscription matched it.
    pub fn on_message<F>(&self, callback: F)
    where
        F: Fn(&Frame) + Send + Sync + 'static,
    {
        self.on_frame(FrameEvent::On(Command::Message), callback);
    }

    pub fn on_error<F>(&self, callback: F)
    where
        F: Fn(&Frame) + Send + Sync + 'static,
    {
        self.on_frame(FrameEvent::On(Command::Error), callback);
    }

    pub fn on_receipt<F>(&self, callback: F)
    where
        F: Fn(&Frame) + Send + Sync + 'static,
    {
        self.on_frame(FrameEvent::On(Command::Receipt), callback);
    }

    pub fn on_established<F>(&self, callback: F)
    where
        F: Fn(LifecycleEvent) + Send + Sync + 'static,
    {
        self.on_lifecycle(LifecycleEvent::Established, callback);
    }

    pub fn on_died<F>(&self, callback: F)
    where
        F: Fn(LifecycleEvent) + Send + Sync + 'static,
    {
        self.on_lifecycle(LifecycleEvent::Died, callback);
    }

    pub fn on_terminated<F>(&self, callback: F)
    where
        F: Fn(LifecycleEvent) + Send + Sync + 'static,
    {
        self.on_lifecycle(LifecycleEvent::Terminated, callback);
    }

    pub fn on_closed<F>(&self, callback: F)
    where
        F: Fn(LifecycleEvent) + Send + Sync + 'static,
    {
        self.on_lifecycle(LifecycleEvent::Closed, callback);
    }

    /// Run `body` in a transaction; see [`Transaction::run`].
    pub async fn with_transaction<F, Fut, R, E>(
        &self,
        headers: Headers,
        body: F,
    ) -> std::result::Result<R, E>
    where
        F: FnOnce(Transaction<Connection>) -> Fut,
        Fut: Future<Output = std::result::Result<R, E>>,
        E: From<StompError>,
    {
        Transaction::run(self.clone(), headers, body).await
    }

    fn teardown_token(&self) -> CancellationToken {
        self.inner.session.lock().teardown.clone()
    }

    async fn write_frame(&self, frame: Frame) -> Result<()> {
        self.check_liveness();
        self.inner.events.before_transmit(&frame);
        let token = self.teardown_token();
        let mut guard = self.inner.writer.lock().await;
        let Some(writer) = guard.as_mut() else {
            return Err(StompError::NotConnected);
        };
        debug!(command = command_name(&frame), "transmitting frame");
        let sent = tokio::select! {
            biased;
            _ = token.cancelled() => Err(closed_error()),
            sent = writer.send(frame.clone()) => sent,
        };
        if let Err(e) = sent {
            *guard = None;
            drop(guard);
            return Err(self.fail(e));
        }
        drop(guard);
        self.inner.session.lock().heartbeat.transmitted();
        self.inner
            .events
            .fire_frame(FrameEvent::AfterTransmitting, &frame);
        Ok(())
    }

    async fn read_frame(&self) -> Result<Frame> {
        let token = self.teardown_token();
        let mut guard = self.inner.reader.lock().await;
        let result = self.next_from(&mut guard, &token).await;
        drop(guard);
        let frame = result?;
        self.dispatch_inbound(&frame);
        Ok(frame)
    }

    async fn next_from(
        &self,
        reader: &mut Option<Reader>,
        token: &CancellationToken,
    ) -> Result<Frame> {
        let Some(stream) = reader.as_mut() else {
            return Err(StompError::NotConnected);
        };
        let item = tokio::select! {
            biased;
            _ = token.cancelled() => Some(Err(closed_error())),
            item = stream.next() => item,
        };
        self.settle_read(reader, item)
    }

    /// Turn a decoder result into a frame, tearing the stream down on any
    /// failure. End of stream counts as an I/O error.
    fn settle_read(&self, reader: &mut Option<Reader>, item: Option<Result<Frame>>) -> Result<Frame> {
        let err = match item {
            Some(Ok(frame)) => return Ok(frame),
            Some(Err(e)) => e,
            None => io::Error::new(io::ErrorKind::UnexpectedEof, "broker closed the stream").into(),
        };
        *reader = None;
        Err(self.fail(err))
    }

    fn dispatch_inbound(&self, frame: &Frame) {
        self.inner.session.lock().heartbeat.received();
        debug!(command = command_name(frame), "received frame");
        for interceptor in &self.inner.interceptors {
            interceptor.intercept(frame);
        }
        self.inner.events.after_receive(frame);
    }

    /// Mark the connection dead if a heartbeat deadline passed, and live
    /// again once both directions are back within their deadlines. Advisory:
    /// the stream stays open.
    fn check_liveness(&self) {
        let died = {
            let mut session = self.inner.session.lock();
            let missed = !session.heartbeat.client_alive() || !session.heartbeat.broker_alive();
            match (session.state, missed) {
                (State::Connected, true) => {
                    session.state = State::Dead;
                    true
                }
                (State::Dead, false) => {
                    session.state = State::Connected;
                    info!("heartbeats resumed");
                    false
                }
                _ => false,
            }
        };
        if died {
            warn!("heartbeat deadline missed; connection considered dead");
            self.inner.events.fire_lifecycle(LifecycleEvent::Died);
        }
    }

    /// The stream failed: drop both halves, close and report.
    ///
    /// The half the caller holds is cleared by the caller; the other one is
    /// cleared here when free, and otherwise woken through the teardown token.
    /// Any open stream, mid-handshake included, reports `Terminated`. A
    /// failure caused by the client's own close leaves the state to
    /// `mark_closed`.
    fn fail(&self, err: StompError) -> StompError {
        let was_open = {
            let mut session = self.inner.session.lock();
            session.teardown.cancel();
            if session.explicitly_closed {
                false
            } else {
                let was_open = matches!(
                    session.state,
                    State::Connecting | State::Connected | State::Dead
                );
                session.state = State::Closed;
                was_open
            }
        };
        if let Ok(mut reader) = self.inner.reader.try_lock() {
            reader.take();
        }
        if let Ok(mut writer) = self.inner.writer.try_lock() {
            writer.take();
        }
        if was_open {
            warn!(error = %err, "connection terminated");
            self.inner.events.fire_lifecycle(LifecycleEvent::Terminated);
        }
        err
    }

    async fn shutdown_stream(&self) {
        self.teardown_token().cancel();
        let writer = self.inner.writer.lock().await.take();
        if let Some(mut writer) = writer {
            if let Err(e) = writer.close().await {
                debug!(error = %e, "error while closing stream");
            }
        }
        self.inner.reader.lock().await.take();
    }

    /// Give up on a handshake: close the stream without lifecycle events.
    async fn abandon(&self) {
        self.shutdown_stream().await;
        self.inner.session.lock().state = State::Closed;
    }

    fn mark_closed(&self) {
        let was_open = {
            let mut session = self.inner.session.lock();
            let was_open = !matches!(session.state, State::Closed | State::Disconnected);
            session.state = State::Closed;
            was_open
        };
        if was_open {
            info!("connection closed");
            self.inner.events.fire_lifecycle(LifecycleEvent::Closed);
        }
    }

    /// Wait for a registered receipt, reading frames ourselves while no
    /// other task does.
    async fn await_receipt(
        &self,
        receipt_id: &str,
        mut waiter: oneshot::Receiver<Frame>,
        timeout: Duration,
    ) -> Result<Frame> {
        let wait = async {
            loop {
                tokio::select! {
                    biased;
                    receipt = &mut waiter => {
                        return receipt.map_err(|_| {
                            StompError::Protocol("receipt waiter dropped".into())
                        });
                    }
                    read = self.read_frame() => {
                        read?;
                    }
                }
            }
        };
        match tokio::time::timeout(timeout, wait).await {
            Ok(result) => {
                if result.is_err() {
                    self.inner.receipts.cancel(receipt_id);
                }
                result
            }
            Err(_) => {
                self.inner.receipts.cancel(receipt_id);
                Err(StompError::ReceiptTimeout(receipt_id.to_string()))
            }
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let session = self.inner.session.lock();
        f.debug_struct("Connection")
            .field("host", &self.inner.options.host)
            .field("port", &self.inner.options.port)
            .field("state", &session.state)
            .field("version", &session.version)
            .finish()
    }
}

#[async_trait]
impl Transmit for Connection {
    fn connection(&self) -> &Connection {
        self
    }

    async fn transmit(&self, frame: Frame) -> Result<()> {
        self.write_frame(frame).await
    }
}

#[async_trait]
impl Receive for Connection {
    async fn receive(&self) -> Result<Frame> {
        Connection::receive(self).await
    }

    fn closed_by_client(&self) -> bool {
        Connection::closed_by_client(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Heartbeat;
    use crate::frame::Body;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::DuplexStream;
    use tokio::sync::mpsc;
    use tokio_util::codec::Framed;

    struct PipeConnector {
        streams: mpsc::UnboundedSender<DuplexStream>,
    }

    #[async_trait]
    impl Connector for PipeConnector {
        async fn connect(&self, _host: &str, _port: u16) -> io::Result<BoxedTransport> {
            let (client, broker) = tokio::io::duplex(64 * 1024);
            self.streams
                .send(broker)
                .map_err(|_| io::Error::new(io::ErrorKind::ConnectionRefused, "no broker"))?;
            Ok(Box::new(client))
        }
    }

    fn pipe_connection(options: ConnectOptions) -> (Connection, mpsc::UnboundedReceiver<DuplexStream>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let conn = Connection::with_connector(options, Arc::new(PipeConnector { streams: tx }));
        (conn, rx)
    }

    async fn accept(
        streams: &mut mpsc::UnboundedReceiver<DuplexStream>,
        connected: Frame,
    ) -> Framed<DuplexStream, StompCodec> {
        let stream = streams.recv().await.expect("no stream opened");
        let mut broker = Framed::new(stream, StompCodec::new(Version::V1_0));
        let connect = broker.next().await.expect("eof").expect("bad frame");
        assert!(connect.is(Command::Connect));
        let version = connected
            .get_header("version")
            .and_then(|v| v.parse().ok())
            .unwrap_or(Version::V1_0);
        broker.send(connected).await.expect("send CONNECTED");
        broker.codec_mut().set_version(version);
        broker
    }

    #[tokio::test]
    async fn handshake_negotiates_version_and_session() {
        let options = ConnectOptions::default().heartbeat(Heartbeat::new(0, 0));
        let (conn, mut streams) = pipe_connection(options);
        let established = Arc::new(AtomicUsize::new(0));
        let e = established.clone();
        conn.on_established(move |_| {
            e.fetch_add(1, Ordering::SeqCst);
        });

        let connected = Frame::new(Command::Connected)
            .header("version", "1.1")
            .header("session", "s-42")
            .header("heart-beat", "0,0");
        let (result, _broker) = tokio::join!(conn.connect(), accept(&mut streams, connected));
        result.unwrap();

        assert_eq!(conn.state(), State::Connected);
        assert_eq!(conn.version(), Version::V1_1);
        assert_eq!(conn.session_id().as_deref(), Some("s-42"));
        assert!(conn.is_alive());
        assert_eq!(established.load(Ordering::SeqCst), 1);
        assert!(matches!(conn.connect().await, Err(StompError::AlreadyConnected)));
    }

    #[tokio::test]
    async fn missing_version_header_means_1_0() {
        let (conn, mut streams) = pipe_connection(ConnectOptions::default());
        let (result, _broker) = tokio::join!(
            conn.connect(),
            accept(&mut streams, Frame::new(Command::Connected))
        );
        result.unwrap();
        assert_eq!(conn.version(), Version::V1_0);
    }

    #[tokio::test]
    async fn nonblocking_receive_returns_none_until_data_arrives() {
        let (conn, mut streams) = pipe_connection(ConnectOptions::default());
        let connected = Frame::new(Command::Connected).header("version", "1.2");
        let (result, mut broker) = tokio::join!(conn.connect(), accept(&mut streams, connected));
        result.unwrap();

        assert!(conn.receive_nonblock().unwrap().is_none());
        broker
            .send(
                Frame::new(Command::Message)
                    .header("destination", "/q")
                    .header("message-id", "1")
                    .set_body(Body::text("ping")),
            )
            .await
            .unwrap();

        let mut frame = None;
        for _ in 0..100 {
            if let Some(f) = conn.receive_nonblock().unwrap() {
                frame = Some(f);
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(frame.and_then(|f| f.body_text().map(str::to_string)).as_deref(), Some("ping"));
    }

    #[tokio::test]
    async fn broker_eof_terminates_connection() {
        let (conn, mut streams) = pipe_connection(ConnectOptions::default());
        let terminated = Arc::new(AtomicUsize::new(0));
        let t = terminated.clone();
        conn.on_terminated(move |_| {
            t.fetch_add(1, Ordering::SeqCst);
        });
        let (result, broker) = tokio::join!(
            conn.connect(),
            accept(&mut streams, Frame::new(Command::Connected).header("version", "1.1"))
        );
        result.unwrap();
        drop(broker);

        let err = conn.receive().await.unwrap_err();
        assert!(err.is_io());
        assert_eq!(conn.state(), State::Closed);
        assert_eq!(terminated.load(Ordering::SeqCst), 1);
        assert!(matches!(
            conn.transmit(Frame::send("/q", "x")).await,
            Err(StompError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn close_wakes_a_parked_reader() {
        let (conn, mut streams) = pipe_connection(ConnectOptions::default());
        let (result, _broker) = tokio::join!(
            conn.connect(),
            accept(&mut streams, Frame::new(Command::Connected).header("version", "1.1"))
        );
        result.unwrap();
        let events = Arc::new(SyncMutex::new(Vec::new()));
        for event in [LifecycleEvent::Terminated, LifecycleEvent::Closed] {
            let events = events.clone();
            conn.on_lifecycle(event, move |e| events.lock().push(e));
        }

        let reader = {
            let conn = conn.clone();
            tokio::spawn(async move { conn.receive().await })
        };
        tokio::task::yield_now().await;
        conn.close().await;
        let err = reader.await.unwrap().unwrap_err();
        assert!(err.is_io());
        assert!(conn.closed_by_client());
        assert_eq!(conn.state(), State::Closed);
        assert_eq!(*events.lock(), [LifecycleEvent::Closed]);
    }
}
