//! The super position manager.
//!
//! Binds each grid price point to the lifecycle of at most one buy/sell
//! order pair and keeps the active window sliding with the market:
//!
//! ```text
//! free ─ place_buy(ok) ──────────► buy-pending
//! buy-pending ─ fill ────────────► holding
//! buy-pending ─ cancel/expire ──► free
//! holding ─ place_sell(ok) ─────► sell-pending
//! sell-pending ─ fill ───────────► free
//! sell-pending ─ cancel/expire ─► holding
//! ```
//!
//! Venue calls are never made under a slot lock: each intent is prepared
//! under the lock together with the slot's generation, issued outside it,
//! and reapplied under the lock only if the generation is unchanged. A
//! result that lost the race (e.g. a fill arrived during placement) is
//! reconciled by cancelling the placed order.

use crate::error::{EngineError, EngineResult};
use crate::grid::GridSpec;
use crate::slot::{Slot, SlotCounts, SlotState};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use rust_decimal::Decimal;
use sqgrid_core::{ClientOrderId, OrderRequest, OrderSide, OrderStatus, OrderUpdate, Px, Qty, SlotRole};
use sqgrid_exec::{BatchOutcome, Executor};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Engine parameters, immutable after start.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub symbol: String,
    /// Price distance between adjacent slots.
    pub step: Decimal,
    /// Quote notional per order.
    pub order_notional: Decimal,
    /// Minimum viable order notional.
    pub min_order_value: Decimal,
    pub buy_window: i64,
    pub sell_window: i64,
    /// Per-slot embargo after a margin-insufficient placement.
    pub margin_lock: Duration,
}

/// How many order-update keys the dedup window remembers.
const UPDATE_DEDUP_CAPACITY: usize = 2048;

#[derive(Default)]
struct UpdateDedup {
    last: HashMap<String, (i64, OrderStatus)>,
    order: VecDeque<String>,
}

impl UpdateDedup {
    /// Returns false for duplicates and stale (older-timestamp) updates.
    fn admit(&mut self, update: &OrderUpdate) -> bool {
        if let Some((ts, status)) = self.last.get(&update.order_id) {
            if update.update_time_ms < *ts
                || (update.update_time_ms == *ts && update.status == *status)
            {
                return false;
            }
        } else {
            self.order.push_back(update.order_id.clone());
            if self.order.len() > UPDATE_DEDUP_CAPACITY {
                if let Some(evicted) = self.order.pop_front() {
                    self.last.remove(&evicted);
                }
            }
        }
        self.last
            .insert(update.order_id.clone(), (update.update_time_ms, update.status));
        true
    }
}

struct PlannedPlacement {
    index: i64,
    role: SlotRole,
    price: Px,
    qty: Qty,
    generation: u64,
}

struct PlannedCancel {
    index: i64,
    order_id: String,
    generation: u64,
}

struct AdjustPlan {
    center: i64,
    cancels: Vec<PlannedCancel>,
    placements: Vec<PlannedPlacement>,
}

/// A live pending order owned by a slot, as seen by the reconciler.
#[derive(Debug, Clone)]
pub struct PendingOrderRef {
    pub index: i64,
    pub state: SlotState,
    pub client_id: ClientOrderId,
    pub order_id: Option<String>,
}

/// Slot-based grid position manager.
pub struct SuperPositionManager {
    config: EngineConfig,
    price_decimals: u32,
    qty_decimals: u32,
    executor: Arc<dyn Executor>,
    spec: RwLock<Option<GridSpec>>,
    slots: DashMap<i64, Arc<Mutex<Slot>>>,
    dedup: Mutex<UpdateDedup>,
    /// Set by the reconciler on untolerated position divergence.
    degraded: AtomicBool,
}

impl SuperPositionManager {
    pub fn new(
        config: EngineConfig,
        executor: Arc<dyn Executor>,
        price_decimals: u32,
        qty_decimals: u32,
    ) -> Self {
        Self {
            config,
            price_decimals,
            qty_decimals,
            executor,
            spec: RwLock::new(None),
            slots: DashMap::new(),
            dedup: Mutex::new(UpdateDedup::default()),
            degraded: AtomicBool::new(false),
        }
    }

    /// Anchor the grid and place the initial buy window as one batch.
    ///
    /// `existing_position` is the venue position observed at startup;
    /// divergence beyond one grid quantity is refused unless the safety
    /// check already decided to continue (`divergence_accepted`).
    pub async fn initialize(
        &self,
        price_str: &str,
        existing_position: Decimal,
        divergence_accepted: bool,
    ) -> EngineResult<()> {
        let anchor: Px = price_str
            .parse()
            .map_err(|_| EngineError::BadAnchor(price_str.to_string()))?;
        if !anchor.is_positive() {
            return Err(EngineError::BadAnchor(price_str.to_string()));
        }

        let spec = GridSpec {
            anchor,
            step: self.config.step,
            price_decimals: self.price_decimals,
            qty_decimals: self.qty_decimals,
            order_notional: self.config.order_notional,
            min_order_value: self.config.min_order_value,
            buy_window: self.config.buy_window,
            sell_window: self.config.sell_window,
        };

        let tolerance = spec.qty_at(anchor).inner();
        if !divergence_accepted && existing_position.abs() > tolerance {
            return Err(EngineError::PositionDivergence {
                venue: existing_position,
                tolerance,
            });
        }

        {
            let mut slot = self.spec.write();
            if slot.is_some() {
                return Err(EngineError::AlreadyInitialized);
            }
            *slot = Some(spec);
        }

        info!(
            symbol = %self.config.symbol,
            anchor = %price_str,
            buy_window = self.config.buy_window,
            "grid anchored"
        );

        // Initial window: buys only, one batch. No sells exist yet.
        self.adjust(anchor).await
    }

    /// Recenter the window around `price`, cancelling strays and placing
    /// missing buys plus any sell retries, cancels first.
    pub async fn adjust(&self, price: Px) -> EngineResult<()> {
        let spec = self.grid_spec().ok_or(EngineError::NotInitialized)?;
        let plan = self.plan_adjust(&spec, price);
        self.execute_plan(plan).await
    }

    /// The anchored grid spec, if initialized.
    pub fn grid_spec(&self) -> Option<GridSpec> {
        self.spec.read().clone()
    }

    fn slot_cell(&self, index: i64, spec: &GridSpec) -> Arc<Mutex<Slot>> {
        self.slots
            .entry(index)
            .or_insert_with(|| {
                let price = spec.price_at(index);
                Arc::new(Mutex::new(Slot::new(index, price, spec.qty_at(price))))
            })
            .clone()
    }

    fn plan_adjust(&self, spec: &GridSpec, price: Px) -> AdjustPlan {
        let center = spec.center(price);
        let mut placements = Vec::new();
        let mut cancels = Vec::new();

        // Sell retries: holdings whose paired sell is not resting yet.
        for entry in self.slots.iter() {
            let slot = entry.value().lock();
            if slot.state == SlotState::Holding && slot.filled_qty.is_positive() {
                let basis = if slot.avg_fill_price.is_positive() {
                    slot.avg_fill_price
                } else {
                    slot.price
                };
                placements.push(PlannedPlacement {
                    index: slot.index,
                    role: SlotRole::Sell,
                    price: spec.paired_sell_price(basis),
                    qty: slot.filled_qty,
                    generation: slot.generation,
                });
            }
        }

        // Busy slots below center hold inventory and cannot host a buy;
        // the walk skips them and extends further down instead.
        let busy_below = self
            .slots
            .iter()
            .filter(|e| {
                let slot = e.value().lock();
                slot.index < center
                    && matches!(slot.state, SlotState::Holding | SlotState::SellPending)
            })
            .count() as i64;

        let mut have = 0i64;
        let mut scanned = 0i64;
        let mut k = center - 1;
        let mut lowest_scanned = center;
        while have < spec.buy_window && scanned <= spec.buy_window + busy_below {
            lowest_scanned = k;
            let cell = self.slot_cell(k, spec);
            let mut slot = cell.lock();
            match slot.state {
                SlotState::BuyPending => have += 1,
                SlotState::Free => {
                    // Cooldown and dust both hold their rung without an
                    // order, so the window does not chase deeper rungs.
                    if slot.in_cooldown() {
                        have += 1;
                    } else if spec.is_dust(slot.price) {
                        debug!(index = k, price = %slot.price, "skipping dust slot");
                        have += 1;
                    } else {
                        placements.push(PlannedPlacement {
                            index: k,
                            role: SlotRole::Buy,
                            price: slot.price,
                            qty: slot.qty,
                            generation: slot.generation,
                        });
                        have += 1;
                    }
                }
                SlotState::Holding | SlotState::SellPending => {}
            }
            drop(slot);
            scanned += 1;
            k -= 1;
        }

        // Cancel buys that slid out of the window by more than one step,
        // on either side. Sell-pendings are never chased: they complete.
        for entry in self.slots.iter() {
            let slot = entry.value().lock();
            if slot.state != SlotState::BuyPending {
                continue;
            }
            let Some(order_id) = slot.order_id.clone() else {
                continue;
            };
            let above = slot.index >= center + 1;
            let below = slot.index < lowest_scanned - 1;
            if above || below {
                cancels.push(PlannedCancel {
                    index: slot.index,
                    order_id,
                    generation: slot.generation,
                });
            }
        }

        // Most likely to fill first: closest to center outward.
        placements.sort_by_key(|p| (p.index - center).abs());

        self.prune_free_slots(center, spec, busy_below);

        AdjustPlan { center, cancels, placements }
    }

    /// Destroy free slots the window has slid away from. Non-free slots
    /// are retained: their sells must still complete.
    fn prune_free_slots(&self, center: i64, spec: &GridSpec, busy_below: i64) {
        let low = center - spec.buy_window - busy_below - 2;
        let high = center + spec.sell_window + 2;
        let stale: Vec<i64> = self
            .slots
            .iter()
            .filter(|e| {
                let slot = e.value().lock();
                slot.state == SlotState::Free
                    && !slot.in_cooldown()
                    && (slot.index < low || slot.index > high)
            })
            .map(|e| *e.key())
            .collect();
        for index in stale {
            self.slots.remove(&index);
        }
    }

    async fn execute_plan(&self, plan: AdjustPlan) -> EngineResult<()> {
        // Cancels go first so their margin is free for the placements.
        if !plan.cancels.is_empty() {
            let ids: Vec<String> = plan.cancels.iter().map(|c| c.order_id.clone()).collect();
            match self.executor.cancel_batch(ids).await {
                Ok(()) => {
                    for cancel in &plan.cancels {
                        self.apply_cancel(cancel);
                    }
                }
                Err(e) => {
                    // Slots keep their last known good state; the stream
                    // or the reconciler will deliver the truth.
                    warn!(?e, count = plan.cancels.len(), "window cancel batch failed");
                }
            }
        }

        if plan.placements.is_empty() {
            return Ok(());
        }

        let requests: Vec<OrderRequest> = plan
            .placements
            .iter()
            .map(|p| {
                let side = match p.role {
                    SlotRole::Buy => OrderSide::Buy,
                    SlotRole::Sell => OrderSide::Sell,
                };
                OrderRequest::grid_limit(
                    self.config.symbol.clone(),
                    side,
                    p.price,
                    p.qty,
                    ClientOrderId::for_slot(p.index, p.role),
                )
            })
            .collect();

        let outcome = match self.executor.place_batch(requests).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(?e, count = plan.placements.len(), "placement batch failed");
                return Ok(());
            }
        };
        self.apply_batch_outcome(&plan, outcome).await;
        Ok(())
    }

    fn apply_cancel(&self, cancel: &PlannedCancel) {
        let Some(cell) = self.slots.get(&cancel.index).map(|e| e.value().clone()) else {
            return;
        };
        let mut slot = cell.lock();
        if slot.generation != cancel.generation || slot.state != SlotState::BuyPending {
            // A fill or repair won the race; leave the slot to the truth.
            debug!(index = cancel.index, "cancel result outdated, skipping");
            return;
        }
        slot.state = SlotState::Free;
        slot.clear_order();
        slot.bump();
    }

    async fn apply_batch_outcome(&self, plan: &AdjustPlan, outcome: BatchOutcome) {
        let mut losers: Vec<String> = Vec::new();

        for order in &outcome.accepted {
            let Some(client_id) = &order.client_id else { continue };
            let Some((index, role)) = client_id.slot() else { continue };
            let Some(planned) = plan
                .placements
                .iter()
                .find(|p| p.index == index && p.role == role)
            else {
                continue;
            };
            let Some(cell) = self.slots.get(&index).map(|e| e.value().clone()) else {
                continue;
            };
            let mut slot = cell.lock();
            if slot.generation != planned.generation {
                // The slot moved while the order was in flight; take the
                // placement back.
                warn!(index, "slot changed during placement, cancelling order");
                losers.push(order.order_id.clone());
                continue;
            }
            slot.state = match role {
                SlotRole::Buy => SlotState::BuyPending,
                SlotRole::Sell => SlotState::SellPending,
            };
            slot.client_id = Some(client_id.clone());
            slot.order_id = Some(order.order_id.clone());
            slot.bump();
        }

        for client_id in &outcome.margin_failed {
            let Some((index, SlotRole::Buy)) = client_id.slot() else { continue };
            let Some(cell) = self.slots.get(&index).map(|e| e.value().clone()) else {
                continue;
            };
            let mut slot = cell.lock();
            if slot.state == SlotState::Free {
                slot.start_cooldown(self.config.margin_lock);
                info!(
                    index,
                    lock_secs = self.config.margin_lock.as_secs(),
                    "margin insufficient, slot entering cooldown"
                );
            }
        }

        for (client_id, reason) in &outcome.other_failed {
            warn!(client_id = %client_id, %reason, "order placement rejected");
        }

        if !losers.is_empty() {
            if let Err(e) = self.executor.cancel_batch(losers).await {
                error!(?e, "failed to cancel raced placements");
            }
        }
    }

    /// Apply one order-stream update. Duplicates (same venue id and
    /// timestamp) and stale updates are ignored; unknown client ids are
    /// deferred to the reconciler's orphan handling.
    pub async fn on_order_update(&self, update: OrderUpdate) {
        if !self.dedup.lock().admit(&update) {
            debug!(order_id = %update.order_id, "duplicate order update ignored");
            return;
        }

        let Some((index, role)) = update.client_id.as_ref().and_then(|c| c.slot()) else {
            debug!(
                order_id = %update.order_id,
                client_id = ?update.client_id,
                "update without known client id, deferring to reconciler"
            );
            return;
        };
        let Some(cell) = self.slots.get(&index).map(|e| e.value().clone()) else {
            debug!(index, "update for absent slot, deferring to reconciler");
            return;
        };

        let sell_intent = {
            let mut slot = cell.lock();
            let owns_order = slot.client_id.as_ref() == update.client_id.as_ref()
                || slot.order_id.as_deref() == Some(update.order_id.as_str());
            if !owns_order {
                debug!(index, order_id = %update.order_id, "update for stale order ignored");
                return;
            }
            slot.last_update_ms = update.update_time_ms;

            match (slot.state, role) {
                (SlotState::BuyPending, SlotRole::Buy) => {
                    self.apply_buy_update(&mut slot, &update)
                }
                (SlotState::SellPending, SlotRole::Sell) => {
                    self.apply_sell_update(&mut slot, &update);
                    None
                }
                (state, _) => {
                    debug!(index, %state, status = %update.status, "update does not fit slot state");
                    None
                }
            }
        };

        if let Some((price, qty, generation)) = sell_intent {
            self.place_paired_sell(index, price, qty, generation).await;
        }
    }

    /// Handle an update for the slot's buy order. Returns the paired-sell
    /// intent on a full fill.
    fn apply_buy_update(&self, slot: &mut Slot, update: &OrderUpdate) -> Option<(Px, Qty, u64)> {
        match update.status {
            OrderStatus::New => None,
            OrderStatus::PartiallyFilled => {
                slot.filled_qty = update.executed_qty;
                if update.avg_price.is_positive() {
                    slot.avg_fill_price = update.avg_price;
                }
                None
            }
            OrderStatus::Filled => {
                let spec = self.grid_spec()?;
                slot.filled_qty = if update.executed_qty.is_positive() {
                    update.executed_qty
                } else {
                    slot.qty
                };
                slot.avg_fill_price = if update.avg_price.is_positive() {
                    update.avg_price
                } else {
                    slot.price
                };
                slot.state = SlotState::Holding;
                slot.clear_order();
                slot.bump();
                info!(
                    index = slot.index,
                    qty = %slot.filled_qty,
                    avg = %slot.avg_fill_price,
                    "buy filled, pairing sell"
                );
                Some((
                    spec.paired_sell_price(slot.avg_fill_price),
                    slot.filled_qty,
                    slot.generation,
                ))
            }
            OrderStatus::Canceled | OrderStatus::Expired | OrderStatus::Rejected => {
                // A partially filled buy that dies leaves inventory; the
                // next adjust cycle pairs a sell for it.
                if update.executed_qty.is_positive() {
                    slot.filled_qty = update.executed_qty;
                    slot.avg_fill_price = if update.avg_price.is_positive() {
                        update.avg_price
                    } else {
                        slot.price
                    };
                    slot.state = SlotState::Holding;
                } else {
                    slot.state = SlotState::Free;
                    slot.filled_qty = Qty::ZERO;
                    slot.avg_fill_price = Px::ZERO;
                }
                slot.clear_order();
                slot.bump();
                None
            }
        }
    }

    fn apply_sell_update(&self, slot: &mut Slot, update: &OrderUpdate) {
        match update.status {
            OrderStatus::New | OrderStatus::PartiallyFilled => {}
            OrderStatus::Filled => {
                info!(index = slot.index, qty = %slot.filled_qty, "paired sell filled, cycle complete");
                slot.state = SlotState::Free;
                slot.filled_qty = Qty::ZERO;
                slot.avg_fill_price = Px::ZERO;
                slot.clear_order();
                slot.bump();
            }
            OrderStatus::Canceled | OrderStatus::Expired | OrderStatus::Rejected => {
                // Keep whatever inventory the sell did not move.
                let remaining = slot.filled_qty - update.executed_qty;
                if remaining.is_positive() {
                    slot.filled_qty = remaining;
                    slot.state = SlotState::Holding;
                } else {
                    slot.state = SlotState::Free;
                    slot.filled_qty = Qty::ZERO;
                    slot.avg_fill_price = Px::ZERO;
                }
                slot.clear_order();
                slot.bump();
            }
        }
    }

    /// Place the paired sell scheduled by a buy fill.
    async fn place_paired_sell(&self, index: i64, price: Px, qty: Qty, generation: u64) {
        let request = OrderRequest::grid_limit(
            self.config.symbol.clone(),
            OrderSide::Sell,
            price,
            qty,
            ClientOrderId::for_slot(index, SlotRole::Sell),
        );
        match self.executor.place_one(request).await {
            Ok(order) => {
                let Some(cell) = self.slots.get(&index).map(|e| e.value().clone()) else {
                    return;
                };
                let raced = {
                    let mut slot = cell.lock();
                    if slot.generation != generation || slot.state != SlotState::Holding {
                        true
                    } else {
                        slot.state = SlotState::SellPending;
                        slot.client_id = order.client_id.clone();
                        slot.order_id = Some(order.order_id.clone());
                        slot.bump();
                        false
                    }
                };
                if raced {
                    warn!(index, "slot changed during sell placement, cancelling order");
                    if let Err(e) = self.executor.cancel_batch(vec![order.order_id]).await {
                        error!(?e, index, "failed to cancel raced sell");
                    }
                    return;
                }
            }
            Err(e) => {
                // Slot remains holding; the next adjust cycle retries.
                warn!(index, ?e, "paired sell placement failed");
            }
        }
    }

    /// Cancel every resting buy, leaving sells untouched. Used on risk
    /// trigger; the normal adjust cycle rebuilds buys after recovery.
    pub async fn cancel_all_buys(&self) {
        let mut cancels = Vec::new();
        for entry in self.slots.iter() {
            let slot = entry.value().lock();
            if slot.state == SlotState::BuyPending {
                if let Some(order_id) = slot.order_id.clone() {
                    cancels.push(PlannedCancel {
                        index: slot.index,
                        order_id,
                        generation: slot.generation,
                    });
                }
            }
        }
        if cancels.is_empty() {
            return;
        }
        info!(count = cancels.len(), "cancelling all resting buys");
        let ids: Vec<String> = cancels.iter().map(|c| c.order_id.clone()).collect();
        match self.executor.cancel_batch(ids).await {
            Ok(()) => {
                for cancel in &cancels {
                    self.apply_cancel(cancel);
                }
            }
            Err(e) => warn!(?e, "cancel-all-buys batch failed"),
        }
    }

    /// Slot totals by state.
    pub fn counts(&self) -> SlotCounts {
        let mut counts = SlotCounts::default();
        for entry in self.slots.iter() {
            match entry.value().lock().state {
                SlotState::Free => counts.free += 1,
                SlotState::BuyPending => counts.buy_pending += 1,
                SlotState::Holding => counts.holding += 1,
                SlotState::SellPending => counts.sell_pending += 1,
            }
        }
        counts
    }

    /// Total held inventory across holding and sell-pending slots.
    pub fn holdings_qty(&self) -> Decimal {
        self.slots
            .iter()
            .map(|e| {
                let slot = e.value().lock();
                match slot.state {
                    SlotState::Holding | SlotState::SellPending => slot.filled_qty.inner(),
                    _ => Decimal::ZERO,
                }
            })
            .sum()
    }

    /// One grid quantity at the anchor: the reconciliation tolerance.
    pub fn grid_tolerance(&self) -> Decimal {
        self.grid_spec()
            .map(|s| s.qty_at(s.anchor).inner())
            .unwrap_or(Decimal::ZERO)
    }

    /// Client ids currently attached to slots.
    pub fn known_client_ids(&self) -> HashSet<String> {
        self.slots
            .iter()
            .filter_map(|e| e.value().lock().client_id.as_ref().map(|c| c.as_str().to_string()))
            .collect()
    }

    /// Live pending orders for the reconciler's venue diff.
    pub fn pending_orders(&self) -> Vec<PendingOrderRef> {
        self.slots
            .iter()
            .filter_map(|e| {
                let slot = e.value().lock();
                if !matches!(slot.state, SlotState::BuyPending | SlotState::SellPending) {
                    return None;
                }
                slot.client_id.as_ref().map(|client_id| PendingOrderRef {
                    index: slot.index,
                    state: slot.state,
                    client_id: client_id.clone(),
                    order_id: slot.order_id.clone(),
                })
            })
            .collect()
    }

    pub fn set_degraded(&self, degraded: bool) {
        self.degraded.store(degraded, Ordering::SeqCst);
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::SeqCst)
    }

    /// One status line summarizing the grid.
    pub fn log_status(&self) {
        let counts = self.counts();
        info!(
            symbol = %self.config.symbol,
            buy_pending = counts.buy_pending,
            holding = counts.holding,
            sell_pending = counts.sell_pending,
            free = counts.free,
            held_qty = %self.holdings_qty(),
            degraded = self.is_degraded(),
            "grid status"
        );
    }
}
