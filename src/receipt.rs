use parking_lot::Mutex;
use std::collections::HashMap;
use tokio::sync::oneshot;

use crate::events::Interceptor;
use crate::frame::{Command, Frame};

/// One-shot callback run when the matching RECEIPT arrives.
pub type ReceiptCallback = Box<dyn FnOnce(&Frame) + Send>;

enum Pending {
    Callback(ReceiptCallback),
    Waiter(oneshot::Sender<Frame>),
}

/// Outstanding receipt ids and what to do when each one is confirmed.
///
/// Every entry fires at most once: it is removed under the lock before it
/// runs, so two receivers racing on duplicate RECEIPT frames cannot both
/// claim it.
#[derive(Default)]
pub struct ReceiptRegistry {
    pending: Mutex<HashMap<String, Pending>>,
}

impl ReceiptRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&self, receipt_id: impl Into<String>, callback: F)
    where
        F: FnOnce(&Frame) + Send + 'static,
    {
        self.pending
            .lock()
            .insert(receipt_id.into(), Pending::Callback(Box::new(callback)));
    }

    /// Register a waiter that resolves with the RECEIPT frame.
    pub fn wait_for(&self, receipt_id: impl Into<String>) -> oneshot::Receiver<Frame> {
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .insert(receipt_id.into(), Pending::Waiter(tx));
        rx
    }

    /// Forget a receipt id, e.g. after a timeout.
    pub fn cancel(&self, receipt_id: &str) -> bool {
        self.pending.lock().remove(receipt_id).is_some()
    }

    pub fn is_pending(&self, receipt_id: &str) -> bool {
        self.pending.lock().contains_key(receipt_id)
    }

    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }

    /// Run and remove the entry matching a RECEIPT frame's `receipt-id`.
    pub fn dispatch(&self, frame: &Frame) -> bool {
        if !frame.is(Command::Receipt) {
            return false;
        }
        let Some(receipt_id) = frame.get_header("receipt-id") else {
            return false;
        };
        let entry = self.pending.lock().remove(receipt_id);
        match entry {
            Some(Pending::Callback(callback)) => {
                callback(frame);
                true
            }
            Some(Pending::Waiter(tx)) => {
                let _ = tx.send(frame.clone());
                true
            }
            None => false,
        }
    }
}

impl Interceptor for ReceiptRegistry {
    fn intercept(&self, frame: &Frame) {
        self.dispatch(frame);
    }
}
