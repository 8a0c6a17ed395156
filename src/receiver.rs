use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::error::{Result, StompError};
use crate::frame::Frame;

/// Something a receive loop can pull frames from.
#[async_trait]
pub trait Receive: Send + Sync + 'static {
    async fn receive(&self) -> Result<Frame>;

    /// True when the stream was closed on purpose, so an I/O error from
    /// the loop is expected.
    fn closed_by_client(&self) -> bool;
}

struct Running {
    shutdown_tx: broadcast::Sender<()>,
    handle: JoinHandle<Result<()>>,
}

/// Runs `receive()` in a background task so callbacks fire without the
/// caller polling.
pub struct Receiver<R> {
    source: R,
    running: Arc<AtomicBool>,
    task: Mutex<Option<Running>>,
}

impl<R: Receive + Clone> Receiver<R> {
    pub fn new(source: R) -> Self {
        Self {
            source,
            running: Arc::new(AtomicBool::new(false)),
            task: Mutex::new(None),
        }
    }

    pub fn source(&self) -> &R {
        &self.source
    }

    /// Whether the loop is still going.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
            && self
                .task
                .lock()
                .as_ref()
                .is_some_and(|t| !t.handle.is_finished())
    }

    /// Spawn the loop. Calling it while the loop runs does nothing.
    pub fn start(&self) {
        let mut task = self.task.lock();
        if task.as_ref().is_some_and(|t| !t.handle.is_finished()) {
            return;
        }
        let (shutdown_tx, mut shutdown_rx) = broadcast::channel::<()>(1);
        let source = self.source.clone();
        let running = self.running.clone();
        running.store(true, Ordering::SeqCst);
        let handle = tokio::spawn(async move {
            while running.load(Ordering::SeqCst) {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    received = source.receive() => {
                        if let Err(e) = received {
                            running.store(false, Ordering::SeqCst);
                            return Err(e);
                        }
                    }
                }
            }
            debug!("receive loop stopped");
            Ok(())
        });
        *task = Some(Running {
            shutdown_tx,
            handle,
        });
    }

    /// Stop the loop and wait for it.
    ///
    /// Returns the error that ended the loop, except the I/O or
    /// not-connected error that follows the client closing the connection
    /// itself. A panic in the loop is resumed.
    pub async fn stop(&self) -> Result<()> {
        self.running.store(false, Ordering::SeqCst);
        let running = self.task.lock().take();
        let Some(running) = running else {
            return Ok(());
        };
        let _ = running.shutdown_tx.send(());
        match running.handle.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) if self.source.closed_by_client() && ended_by_close(&e) => Ok(()),
            Ok(Err(e)) => Err(e),
            Err(join_err) if join_err.is_panic() => std::panic::resume_unwind(join_err.into_panic()),
            Err(_) => Ok(()),
        }
    }
}

fn ended_by_close(err: &StompError) -> bool {
    err.is_io() || matches!(err, StompError::NotConnected)
}

impl<R> Drop for Receiver<R> {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(running) = self.task.get_mut().take() {
            running.handle.abort();
        }
    }
}
