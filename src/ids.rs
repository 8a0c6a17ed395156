use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic generator for subscription, receipt and transaction ids.
///
/// A connection owns one behind an `Arc`; pass the same instance to several
/// connections when ids must be unique across all of them.
#[derive(Debug)]
pub struct IdGenerator {
    counter: AtomicU64,
}

impl IdGenerator {
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    pub fn starting_at(first: u64) -> Self {
        Self {
            counter: AtomicU64::new(first),
        }
    }

    /// Next raw serial number.
    pub fn next_serial(&self) -> u64 {
        self.counter.fetch_add(1, Ordering::SeqCst)
    }

    pub fn subscription_id(&self) -> String {
        format!("sub-{}", self.next_serial())
    }

    pub fn receipt_id(&self) -> String {
        format!("rcpt-{}", self.next_serial())
    }

    pub fn transaction_id(&self) -> String {
        format!("tx-{}", self.next_serial())
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}
