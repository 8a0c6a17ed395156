use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::config::{ConnectOptions, ReconnectPolicy};
use crate::connection::Connection;
use crate::error::{Result, StompError};
use crate::frame::Frame;
use crate::headers::Headers;
use crate::receiver::Receive;
use crate::scope::Transmit;
use crate::transaction::Transaction;

struct Inner {
    conn: Connection,
    policy: ReconnectPolicy,
    /// Held for the whole of a reconnect so only one runs at a time
    reconnecting: Mutex<()>,
    /// Bumped after every successful reconnect
    generation: AtomicU64,
    disabled: AtomicBool,
}

/// A connection that reconnects and resubscribes when the stream fails.
///
/// `connect`, `transmit` and `receive` recover from I/O errors by
/// reconnecting under `policy` and retrying. An explicit `disconnect` or
/// `close` turns that off for good.
#[derive(Clone)]
pub struct ReliableConnection {
    inner: Arc<Inner>,
}

impl ReliableConnection {
    pub fn new(conn: Connection, policy: ReconnectPolicy) -> Self {
        Self {
            inner: Arc::new(Inner {
                conn,
                policy,
                reconnecting: Mutex::new(()),
                generation: AtomicU64::new(0),
                disabled: AtomicBool::new(false),
            }),
        }
    }

    pub fn from_options(options: ConnectOptions, policy: ReconnectPolicy) -> Self {
        Self::new(Connection::new(options), policy)
    }

    pub fn policy(&self) -> &ReconnectPolicy {
        &self.inner.policy
    }

    /// Whether auto-reconnect has been turned off by an explicit close.
    pub fn is_disabled(&self) -> bool {
        self.inner.disabled.load(Ordering::SeqCst)
    }

    /// Successful reconnects so far.
    pub fn reconnects(&self) -> u64 {
        self.inner.generation.load(Ordering::SeqCst)
    }

    fn recoverable(&self, err: &StompError) -> bool {
        !self.is_disabled() && (err.is_io() || matches!(err, StompError::NotConnected))
    }

    pub async fn connect(&self) -> Result<()> {
        let generation = self.reconnects();
        match self.inner.conn.connect().await {
            Err(e) if self.recoverable(&e) => {
                warn!(error = %e, "initial connect failed");
                self.reconnect(generation).await
            }
            other => other,
        }
    }

    pub async fn receive(&self) -> Result<Frame> {
        self.recovering(|| self.inner.conn.receive()).await
    }

    pub fn receive_nonblock(&self) -> Result<Option<Frame>> {
        self.inner.conn.receive_nonblock()
    }

    pub async fn disconnect(&self, headers: Headers) -> Result<()> {
        self.inner.disabled.store(true, Ordering::SeqCst);
        self.inner.conn.disconnect(headers).await
    }

    pub async fn close(&self) {
        self.inner.disabled.store(true, Ordering::SeqCst);
        self.inner.conn.close().await
    }

    pub fn is_connected(&self) -> bool {
        self.inner.conn.is_connected()
    }

    /// Run `body` in a transaction; see [`Transaction::run`].
    pub async fn with_transaction<F, Fut, R, E>(
        &self,
        headers: Headers,
        body: F,
    ) -> std::result::Result<R, E>
    where
        F: FnOnce(Transaction<ReliableConnection>) -> Fut,
        Fut: Future<Output = std::result::Result<R, E>>,
        E: From<StompError>,
    {
        Transaction::run(self.clone(), headers, body).await
    }

    async fn recovering<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        loop {
            let generation = self.reconnects();
            match op().await {
                Err(e) if self.recoverable(&e) => {
                    warn!(error = %e, "operation failed; reconnecting");
                    self.reconnect(generation).await?;
                }
                other => return other,
            }
        }
    }

    /// Reconnect unless another task already did since `observed`.
    async fn reconnect(&self, observed: u64) -> Result<()> {
        let _guard = self.inner.reconnecting.lock().await;
        if self.reconnects() != observed && self.inner.conn.is_connected() {
            return Ok(());
        }
        let policy = &self.inner.policy;
        let mut attempt: u32 = 0;
        loop {
            if self.is_disabled() {
                return Err(StompError::NotConnected);
            }
            attempt += 1;
            if let Some(max) = policy.max_retries {
                if attempt > max {
                    warn!(attempts = max, "giving up on reconnect");
                    return Err(StompError::RetriesExceeded(max));
                }
            }
            let delay = policy.delay_for(attempt);
            warn!(attempt, delay_ms = delay.as_millis() as u64, "reconnecting");
            tokio::time::sleep(delay).await;

            let conn = &self.inner.conn;
            let result = async {
                conn.connect().await?;
                conn.resubscribe().await
            }
            .await;
            match result {
                Ok(_) => {
                    self.inner.generation.fetch_add(1, Ordering::SeqCst);
                    info!(attempt, "reconnected");
                    return Ok(());
                }
                Err(e) if e.is_io() => continue,
                Err(e) => return Err(e),
            }
        }
    }
}

#[async_trait]
impl Transmit for ReliableConnection {
    fn connection(&self) -> &Connection {
        &self.inner.conn
    }

    async fn transmit(&self, frame: Frame) -> Result<()> {
        self.recovering(|| self.inner.conn.transmit(frame.clone()))
            .await
    }
}

#[async_trait]
impl Receive for ReliableConnection {
    async fn receive(&self) -> Result<Frame> {
        ReliableConnection::receive(self).await
    }

    fn closed_by_client(&self) -> bool {
        self.is_disabled()
    }
}
