//! The retrying order executor.

use crate::error::{ExecError, ExecResult};
use crate::memo::OrderMemo;
use async_trait::async_trait;
use sqgrid_core::{ClientOrderId, OrderRequest, OrderResult};
use sqgrid_venue::{Venue, VenueError};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Retry spacing for the two retriable failure classes.
#[derive(Debug, Clone, Copy)]
pub struct RetryDelays {
    /// Wait after a rate-limit rejection.
    pub rate_limit: Duration,
    /// Wait after any other transient failure.
    pub transient: Duration,
}

/// Outcome of a batch placement.
#[derive(Debug, Clone, Default)]
pub struct BatchOutcome {
    /// Orders the venue accepted.
    pub accepted: Vec<OrderResult>,
    /// Client ids rejected for insufficient margin. The engine puts the
    /// owning slots into cooldown instead of retrying.
    pub margin_failed: Vec<ClientOrderId>,
    /// Client ids rejected for any other reason, with the message.
    pub other_failed: Vec<(ClientOrderId, String)>,
}

impl BatchOutcome {
    /// True when at least one order in the batch hit insufficient margin.
    pub fn margin_insufficient(&self) -> bool {
        !self.margin_failed.is_empty()
    }
}

/// Slot-intent-to-venue translation layer.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn place_one(&self, req: OrderRequest) -> ExecResult<OrderResult>;
    async fn place_batch(&self, reqs: Vec<OrderRequest>) -> ExecResult<BatchOutcome>;
    async fn cancel_batch(&self, order_ids: Vec<String>) -> ExecResult<()>;
}

/// Executor backed by a real venue.
pub struct OrderExecutor {
    venue: Arc<dyn Venue>,
    symbol: String,
    delays: RetryDelays,
    memo: Arc<OrderMemo>,
}

impl OrderExecutor {
    pub fn new(venue: Arc<dyn Venue>, symbol: impl Into<String>, delays: RetryDelays) -> Self {
        Self {
            venue,
            symbol: symbol.into(),
            delays,
            memo: Arc::new(OrderMemo::new()),
        }
    }

    /// The executor's memo of submitted orders, shared with the cleaner.
    pub fn memo(&self) -> Arc<OrderMemo> {
        self.memo.clone()
    }

    /// Decide whether (and after how long) a failed call may be retried.
    ///
    /// Margin-insufficient is deliberately absent: it is not retriable
    /// within the same call.
    fn retry_delay(&self, error: &VenueError) -> Option<Duration> {
        if error.is_rate_limited() {
            Some(self.delays.rate_limit)
        } else if error.is_transient() {
            Some(self.delays.transient)
        } else {
            None
        }
    }
}

#[async_trait]
impl Executor for OrderExecutor {
    async fn place_one(&self, req: OrderRequest) -> ExecResult<OrderResult> {
        let first = match self.venue.place_order(&req).await {
            Ok(order) => {
                self.memo.record(&order);
                return Ok(order);
            }
            Err(e) => e,
        };

        let Some(delay) = self.retry_delay(&first) else {
            return Err(ExecError::Venue(first));
        };
        warn!(client_id = %req.client_id, ?first, ?delay, "placement failed, retrying once");
        tokio::time::sleep(delay).await;

        match self.venue.place_order(&req).await {
            Ok(order) => {
                self.memo.record(&order);
                Ok(order)
            }
            Err(e) => Err(ExecError::Exhausted(e)),
        }
    }

    async fn place_batch(&self, reqs: Vec<OrderRequest>) -> ExecResult<BatchOutcome> {
        if reqs.is_empty() {
            return Ok(BatchOutcome::default());
        }

        let raw = match self.venue.place_orders(&reqs).await {
            Ok(outcome) => outcome,
            Err(first) => {
                let Some(delay) = self.retry_delay(&first) else {
                    return Err(ExecError::Venue(first));
                };
                warn!(count = reqs.len(), ?first, ?delay, "batch placement failed, retrying once");
                tokio::time::sleep(delay).await;
                self.venue
                    .place_orders(&reqs)
                    .await
                    .map_err(ExecError::Exhausted)?
            }
        };

        let mut outcome = BatchOutcome {
            accepted: raw.accepted,
            ..Default::default()
        };
        for order in &outcome.accepted {
            self.memo.record(order);
        }
        for (client_oid, error) in raw.failed {
            let client_id = ClientOrderId::from_string(client_oid);
            if error.is_margin_insufficient() {
                outcome.margin_failed.push(client_id);
            } else {
                outcome.other_failed.push((client_id, error.to_string()));
            }
        }
        if outcome.margin_insufficient() {
            warn!(
                failed = outcome.margin_failed.len(),
                "batch placement hit insufficient margin"
            );
        }
        Ok(outcome)
    }

    async fn cancel_batch(&self, order_ids: Vec<String>) -> ExecResult<()> {
        if order_ids.is_empty() {
            return Ok(());
        }

        let first = match self.venue.cancel_orders(&self.symbol, &order_ids).await {
            Ok(()) => return Ok(()),
            // An order the venue no longer knows is already gone; that is
            // what the cancel wanted.
            Err(VenueError::OrderNotFound(_)) => {
                debug!("cancel target already absent");
                return Ok(());
            }
            Err(e) => e,
        };

        let Some(delay) = self.retry_delay(&first) else {
            return Err(ExecError::Venue(first));
        };
        warn!(count = order_ids.len(), ?first, ?delay, "cancel failed, retrying once");
        tokio::time::sleep(delay).await;

        match self.venue.cancel_orders(&self.symbol, &order_ids).await {
            Ok(()) => Ok(()),
            Err(VenueError::OrderNotFound(_)) => Ok(()),
            Err(e) => Err(ExecError::Exhausted(e)),
        }
    }
}
