//! Memo of submitted orders.
//!
//! Insertion-ordered record of every order the executor has submitted.
//! Terminal entries accumulate here until the cleaner evicts them; live
//! entries are never evicted.

use parking_lot::Mutex;
use sqgrid_core::{ClientOrderId, OrderResult, OrderStatus};
use std::collections::VecDeque;

/// One remembered order.
#[derive(Debug, Clone)]
pub struct MemoEntry {
    pub order_id: String,
    pub client_id: Option<ClientOrderId>,
    pub status: OrderStatus,
    pub recorded_at_ms: i64,
}

/// Insertion-ordered order memo.
#[derive(Debug, Default)]
pub struct OrderMemo {
    entries: Mutex<VecDeque<MemoEntry>>,
}

impl OrderMemo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a newly submitted order.
    pub fn record(&self, order: &OrderResult) {
        let mut entries = self.entries.lock();
        entries.push_back(MemoEntry {
            order_id: order.order_id.clone(),
            client_id: order.client_id.clone(),
            status: order.status,
            recorded_at_ms: chrono::Utc::now().timestamp_millis(),
        });
    }

    /// Update the remembered status of an order, if present.
    pub fn update_status(&self, order_id: &str, status: OrderStatus) {
        let mut entries = self.entries.lock();
        if let Some(entry) = entries.iter_mut().find(|e| e.order_id == order_id) {
            entry.status = status;
        }
    }

    /// Number of entries in a terminal state.
    pub fn terminal_count(&self) -> usize {
        self.entries.lock().iter().filter(|e| e.status.is_terminal()).count()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Evict up to `batch` terminal entries in insertion order.
    ///
    /// Returns the number actually evicted. Live entries are skipped and
    /// keep their position.
    pub fn evict_terminal_batch(&self, batch: usize) -> usize {
        let mut entries = self.entries.lock();
        let mut evicted = 0;
        let mut kept = VecDeque::with_capacity(entries.len());
        while let Some(entry) = entries.pop_front() {
            if evicted < batch && entry.status.is_terminal() {
                evicted += 1;
            } else {
                kept.push_back(entry);
            }
        }
        *entries = kept;
        evicted
    }

    /// Snapshot of the memo for diagnostics.
    pub fn snapshot(&self) -> Vec<MemoEntry> {
        self.entries.lock().iter().cloned().collect()
    }
}
