//! Terminal-order cleanup.
//!
//! Bounds the memory held by the executor's order memo: once the number
//! of terminal records exceeds the configured threshold, the oldest are
//! evicted in fixed-size batches. Slot state is untouched.

use crate::memo::OrderMemo;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub struct OrderCleaner {
    memo: Arc<OrderMemo>,
    threshold: usize,
    batch_size: usize,
    interval: Duration,
}

impl OrderCleaner {
    pub fn new(
        memo: Arc<OrderMemo>,
        threshold: usize,
        batch_size: usize,
        interval: Duration,
    ) -> Self {
        Self { memo, threshold, batch_size, interval }
    }

    /// One cleanup pass. Returns the number of evicted records.
    pub fn sweep(&self) -> usize {
        let mut evicted = 0;
        while self.memo.terminal_count() > self.threshold {
            let n = self.memo.evict_terminal_batch(self.batch_size);
            if n == 0 {
                break;
            }
            evicted += n;
        }
        evicted
    }

    /// Timer loop until cancellation.
    pub async fn run(self, token: CancellationToken) {
        info!(
            threshold = self.threshold,
            batch = self.batch_size,
            "order cleaner started"
        );
        let mut timer = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                () = token.cancelled() => {
                    debug!("order cleaner stopped");
                    return;
                }
                _ = timer.tick() => {
                    let evicted = self.sweep();
                    if evicted > 0 {
                        info!(evicted, remaining = self.memo.len(), "evicted terminal orders");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use sqgrid_core::{OrderResult, OrderSide, OrderStatus, Px, Qty};

    fn terminal_order(id: usize) -> OrderResult {
        OrderResult {
            order_id: id.to_string(),
            client_id: None,
            symbol: "ETHUSDT".to_string(),
            side: OrderSide::Buy,
            price: Px::new(dec!(2999)),
            qty: Qty::new(dec!(0.01)),
            filled_qty: Qty::ZERO,
            avg_price: Px::ZERO,
            status: OrderStatus::Filled,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_sweep_noop_under_threshold() {
        let memo = Arc::new(OrderMemo::new());
        for i in 0..5 {
            memo.record(&terminal_order(i));
        }
        let cleaner = OrderCleaner::new(memo.clone(), 10, 3, Duration::from_secs(60));
        assert_eq!(cleaner.sweep(), 0);
        assert_eq!(memo.len(), 5);
    }

    #[test]
    fn test_sweep_evicts_down_to_threshold_in_batches() {
        let memo = Arc::new(OrderMemo::new());
        for i in 0..17 {
            memo.record(&terminal_order(i));
        }
        let cleaner = OrderCleaner::new(memo.clone(), 10, 3, Duration::from_secs(60));
        // 17 terminal, threshold 10: two batches of 3 bring it to 11, one
        // more brings it to 8.
        assert_eq!(cleaner.sweep(), 9);
        assert_eq!(memo.terminal_count(), 8);
        // Oldest went first.
        let oldest_left = memo.snapshot().first().unwrap().order_id.clone();
        assert_eq!(oldest_left, "9");
    }
}
