//! Periodic repair of divergence between local slots and venue truth.
//!
//! The order stream is allowed to drop or outrun the local state machine;
//! this loop closes the gap: dead pending orders are resolved from their
//! terminal status, venue orders nobody owns are cancelled, and position
//! divergence beyond one grid quantity marks the manager degraded for the
//! operator (never auto-traded away).

use crate::error::EngineResult;
use crate::manager::SuperPositionManager;
use crate::slot::SlotState;
use sqgrid_core::{OrderStatus, OrderUpdate};
use sqgrid_venue::{Venue, VenueError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Summary of one reconcile pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Local pending slots resolved from terminal venue status.
    pub repaired: usize,
    /// Venue orders cancelled because no slot owns them.
    pub orphans_cancelled: usize,
    /// True when venue position diverged beyond tolerance.
    pub diverged: bool,
}

pub struct Reconciler {
    venue: Arc<dyn Venue>,
    manager: Arc<SuperPositionManager>,
    symbol: String,
    interval: Duration,
    /// Risk-monitor pause flag; reconciliation is suppressed while
    /// triggered to avoid log noise during known pauses.
    paused: Arc<AtomicBool>,
}

impl Reconciler {
    pub fn new(
        venue: Arc<dyn Venue>,
        manager: Arc<SuperPositionManager>,
        symbol: impl Into<String>,
        interval: Duration,
        paused: Arc<AtomicBool>,
    ) -> Self {
        Self {
            venue,
            manager,
            symbol: symbol.into(),
            interval,
            paused,
        }
    }

    /// Timer loop until cancellation.
    pub async fn run(self, token: CancellationToken) {
        info!(interval_secs = self.interval.as_secs(), "reconciler started");
        let mut timer = tokio::time::interval(self.interval);
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                () = token.cancelled() => {
                    debug!("reconciler stopped");
                    return;
                }
                _ = timer.tick() => {
                    if self.paused.load(Ordering::SeqCst) {
                        continue;
                    }
                    match self.reconcile_once().await {
                        Ok(report) => {
                            if report.repaired > 0 || report.orphans_cancelled > 0 {
                                info!(
                                    repaired = report.repaired,
                                    orphans = report.orphans_cancelled,
                                    "reconcile pass applied repairs"
                                );
                            }
                        }
                        Err(e) => warn!(?e, "reconcile pass failed"),
                    }
                }
            }
        }
    }

    /// One full diff against the venue. Running this twice with no
    /// intervening events is a no-op.
    pub async fn reconcile_once(&self) -> EngineResult<ReconcileReport> {
        let mut report = ReconcileReport::default();

        let open = self.venue.open_orders(&self.symbol).await?;

        // Local pendings the venue no longer lists: resolve from their
        // terminal status as if the stream had delivered it.
        for pending in self.manager.pending_orders() {
            let Some(order_id) = pending.order_id else {
                // Placement not yet acknowledged; nothing to compare.
                continue;
            };
            if open.iter().any(|o| o.order_id == order_id) {
                continue;
            }

            let detail = match self.venue.get_order(&self.symbol, &order_id).await {
                Ok(detail) => detail,
                Err(VenueError::OrderNotFound(_)) => {
                    debug!(index = pending.index, %order_id, "pending order unknown to venue, freeing");
                    self.apply_terminal(&order_id, pending.index, OrderStatus::Canceled, None)
                        .await;
                    report.repaired += 1;
                    continue;
                }
                Err(e) => {
                    warn!(?e, %order_id, "terminal status lookup failed");
                    continue;
                }
            };

            if detail.status.is_terminal() {
                debug!(
                    index = pending.index,
                    %order_id,
                    status = %detail.status,
                    "resolving dead pending order"
                );
                self.apply_terminal(&order_id, pending.index, detail.status, Some(&detail))
                    .await;
                report.repaired += 1;
            }
        }

        // Venue orders with no owning slot are orphans (typically left
        // over from a previous run): cancel them.
        let known = self.manager.known_client_ids();
        for order in &open {
            let owned = order
                .client_id
                .as_ref()
                .is_some_and(|c| known.contains(c.as_str()));
            if owned {
                continue;
            }
            warn!(
                order_id = %order.order_id,
                client_id = ?order.client_id,
                "cancelling orphan venue order"
            );
            match self.venue.cancel_order(&self.symbol, &order.order_id).await {
                Ok(()) | Err(VenueError::OrderNotFound(_)) => report.orphans_cancelled += 1,
                Err(e) => warn!(?e, order_id = %order.order_id, "orphan cancel failed"),
            }
        }

        // Position sync: divergence beyond one grid quantity is reported,
        // not auto-traded; corrective action belongs to the operator.
        let positions = self.venue.positions(&self.symbol).await?;
        let venue_size: rust_decimal::Decimal = positions.iter().map(|p| p.size).sum();
        let local = self.manager.holdings_qty();
        let tolerance = self.manager.grid_tolerance();
        let divergence = (venue_size - local).abs();
        if divergence > tolerance {
            warn!(
                %venue_size,
                %local,
                %tolerance,
                "position divergence beyond tolerance, marking degraded"
            );
            self.manager.set_degraded(true);
            report.diverged = true;
        } else if self.manager.is_degraded() {
            info!(%venue_size, %local, "position divergence cleared");
            self.manager.set_degraded(false);
        }

        Ok(report)
    }

    /// Feed a terminal resolution through the same path stream updates
    /// take, so fills pair their sells and cancels free their slots.
    async fn apply_terminal(
        &self,
        order_id: &str,
        index: i64,
        status: OrderStatus,
        detail: Option<&sqgrid_core::OrderResult>,
    ) {
        let Some(pending) = self
            .manager
            .pending_orders()
            .into_iter()
            .find(|p| p.index == index)
        else {
            return;
        };
        let side = match pending.state {
            SlotState::SellPending => sqgrid_core::OrderSide::Sell,
            _ => sqgrid_core::OrderSide::Buy,
        };
        let (executed_qty, price, avg_price) = match detail {
            Some(d) => {
                let filled = if status == OrderStatus::Filled && !d.filled_qty.is_positive() {
                    d.qty
                } else {
                    d.filled_qty
                };
                let avg = if d.avg_price.is_positive() { d.avg_price } else { d.price };
                (filled, d.price, avg)
            }
            None => (sqgrid_core::Qty::ZERO, sqgrid_core::Px::ZERO, sqgrid_core::Px::ZERO),
        };
        let update = OrderUpdate {
            order_id: order_id.to_string(),
            client_id: Some(pending.client_id),
            symbol: self.symbol.clone(),
            status,
            executed_qty,
            price,
            avg_price,
            side,
            order_type: sqgrid_core::OrderType::Limit,
            update_time_ms: chrono::Utc::now().timestamp_millis(),
        };
        self.manager.on_order_update(update).await;
    }
}
