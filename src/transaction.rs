use async_trait::async_trait;
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::connection::Connection;
use crate::error::{Result, StompError};
use crate::frame::{Command, Frame};
use crate::headers::Headers;
use crate::scope::Transmit;

/// Where a transaction is in its life. `Committed` and `Aborted` are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Pending,
    Started,
    Committed,
    Aborted,
}

impl TransactionState {
    pub fn is_finalized(&self) -> bool {
        matches!(self, TransactionState::Committed | TransactionState::Aborted)
    }
}

/// A transaction scope over any [`Transmit`] parent.
///
/// SEND, ACK and NACK frames issued through it are tagged with the
/// transaction id; the first of them sends BEGIN. SUBSCRIBE and UNSUBSCRIBE
/// pass through untagged. Clones share state.
#[derive(Clone)]
pub struct Transaction<T> {
    parent: T,
    id: String,
    headers: Headers,
    state: Arc<Mutex<TransactionState>>,
}

impl<T: Transmit> Transaction<T> {
    /// `headers` are applied to BEGIN, COMMIT and ABORT. A `transaction`
    /// header among them names the transaction; otherwise an id is generated.
    pub fn new(parent: T, mut headers: Headers) -> Self {
        let id = match headers.delete("transaction") {
            Some(values) if !values.is_empty() => values[0].clone(),
            _ => parent.connection().ids().transaction_id(),
        };
        Self {
            parent,
            id,
            headers,
            state: Arc::new(Mutex::new(TransactionState::Pending)),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub async fn state(&self) -> TransactionState {
        *self.state.lock().await
    }

    fn control_frame(&self, command: Command) -> Frame {
        Frame::new(command)
            .header("transaction", self.id.as_str())
            .with_headers(self.headers.clone())
    }

    async fn begin_locked(&self, state: &mut TransactionState) -> Result<()> {
        match *state {
            TransactionState::Pending => {}
            TransactionState::Started => return Err(StompError::TransactionStarted(self.id.clone())),
            _ => return Err(StompError::TransactionFinalized(self.id.clone())),
        }
        self.parent.transmit(self.control_frame(Command::Begin)).await?;
        debug!(transaction = %self.id, "transaction started");
        *state = TransactionState::Started;
        Ok(())
    }

    /// Send BEGIN.
    pub async fn begin(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        self.begin_locked(&mut state).await
    }

    /// Send COMMIT. A no-op once finalized; a transaction that never
    /// started is finalized without a frame.
    pub async fn commit(&self) -> Result<()> {
        self.finish(Command::Commit, TransactionState::Committed).await
    }

    /// Send ABORT. Same rules as [`Transaction::commit`].
    pub async fn abort(&self) -> Result<()> {
        self.finish(Command::Abort, TransactionState::Aborted).await
    }

    async fn finish(&self, command: Command, outcome: TransactionState) -> Result<()> {
        let mut state = self.state.lock().await;
        match *state {
            TransactionState::Committed | TransactionState::Aborted => Ok(()),
            TransactionState::Pending => {
                *state = outcome;
                Ok(())
            }
            TransactionState::Started => {
                self.parent.transmit(self.control_frame(command)).await?;
                debug!(transaction = %self.id, outcome = ?outcome, "transaction finished");
                *state = outcome;
                Ok(())
            }
        }
    }

    /// Run `body` inside a transaction on `parent`.
    ///
    /// `Ok` commits. `Err` aborts and returns the error. A panic aborts and
    /// then resumes unwinding.
    pub async fn run<F, Fut, R, E>(parent: T, headers: Headers, body: F) -> std::result::Result<R, E>
    where
        T: Clone,
        F: FnOnce(Transaction<T>) -> Fut,
        Fut: Future<Output = std::result::Result<R, E>>,
        E: From<StompError>,
    {
        let tx = Transaction::new(parent, headers);
        let outcome = AssertUnwindSafe(body(tx.clone())).catch_unwind().await;
        match outcome {
            Ok(Ok(value)) => {
                tx.commit().await?;
                Ok(value)
            }
            Ok(Err(e)) => {
                if let Err(abort_err) = tx.abort().await {
                    warn!(transaction = %tx.id, error = %abort_err, "abort after failure did not go through");
                }
                Err(e)
            }
            Err(panic) => {
                if let Err(abort_err) = tx.abort().await {
                    warn!(transaction = %tx.id, error = %abort_err, "abort after panic did not go through");
                }
                std::panic::resume_unwind(panic)
            }
        }
    }
}

#[async_trait]
impl<T: Transmit> Transmit for Transaction<T> {
    fn connection(&self) -> &Connection {
        self.parent.connection()
    }

    async fn transmit(&self, mut frame: Frame) -> Result<()> {
        let Some(command) = frame.command else {
            return self.parent.transmit(frame).await;
        };
        if command.is_transactional() {
            let mut state = self.state.lock().await;
            if *state == TransactionState::Pending {
                self.begin_locked(&mut state).await?;
            } else if state.is_finalized() {
                return Err(StompError::TransactionFinalized(self.id.clone()));
            }
            frame.headers.set("transaction", self.id.as_str());
            return self.parent.transmit(frame).await;
        }
        if matches!(command, Command::Begin | Command::Commit | Command::Abort)
            && self.state.lock().await.is_finalized()
        {
            return Err(StompError::TransactionFinalized(self.id.clone()));
        }
        self.parent.transmit(frame).await
    }
}
