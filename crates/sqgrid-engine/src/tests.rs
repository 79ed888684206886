//! Engine behavior tests against stub executor and venue implementations.

use crate::manager::{EngineConfig, SuperPositionManager};
use crate::reconciler::Reconciler;
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sqgrid_core::{
    AccountSnapshot, Candle, ClientOrderId, OrderRequest, OrderResult, OrderSide, OrderStatus,
    OrderType, OrderUpdate, PositionInfo, Px, Qty, SlotRole, TradeTick,
};
use sqgrid_exec::{BatchOutcome, ExecResult, Executor};
use sqgrid_venue::venue::BatchPlaceOutcome;
use sqgrid_venue::{Venue, VenueError, VenueResult};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Default)]
struct StubExecutor {
    /// Every request handed to the executor, accepted or not.
    attempted: Mutex<Vec<OrderRequest>>,
    /// Accepted placements in acceptance order.
    placed: Mutex<Vec<OrderResult>>,
    cancelled: Mutex<Vec<String>>,
    /// Client ids that fail with margin-insufficient.
    margin_fail: Mutex<HashSet<String>>,
    next_id: Mutex<u64>,
}

impl StubExecutor {
    fn accept(&self, req: &OrderRequest) -> OrderResult {
        let mut next = self.next_id.lock();
        *next += 1;
        let order = OrderResult {
            order_id: format!("v{}", *next),
            client_id: Some(req.client_id.clone()),
            symbol: req.symbol.clone(),
            side: req.side,
            price: req.price.unwrap_or(Px::ZERO),
            qty: req.qty,
            filled_qty: Qty::ZERO,
            avg_price: Px::ZERO,
            status: OrderStatus::New,
            created_at: Utc::now(),
        };
        self.placed.lock().push(order.clone());
        order
    }

    fn fail_margin_for(&self, client_id: &str) {
        self.margin_fail.lock().insert(client_id.to_string());
    }

    fn placed_buys(&self) -> Vec<(Decimal, Decimal)> {
        self.placed
            .lock()
            .iter()
            .filter(|o| o.side == OrderSide::Buy)
            .map(|o| (o.price.inner(), o.qty.inner()))
            .collect()
    }

    fn placed_sells(&self) -> Vec<(Decimal, Decimal)> {
        self.placed
            .lock()
            .iter()
            .filter(|o| o.side == OrderSide::Sell)
            .map(|o| (o.price.inner(), o.qty.inner()))
            .collect()
    }

    fn order_id_for(&self, client_id: &str) -> Option<String> {
        self.placed
            .lock()
            .iter()
            .find(|o| o.client_id.as_ref().is_some_and(|c| c.as_str() == client_id))
            .map(|o| o.order_id.clone())
    }

    fn attempts_for(&self, client_id: &str) -> usize {
        self.attempted
            .lock()
            .iter()
            .filter(|r| r.client_id.as_str() == client_id)
            .count()
    }
}

#[async_trait]
impl Executor for StubExecutor {
    async fn place_one(&self, req: OrderRequest) -> ExecResult<OrderResult> {
        self.attempted.lock().push(req.clone());
        if self.margin_fail.lock().contains(req.client_id.as_str()) {
            return Err(sqgrid_exec::ExecError::Venue(VenueError::MarginInsufficient(
                "stub".to_string(),
            )));
        }
        Ok(self.accept(&req))
    }

    async fn place_batch(&self, reqs: Vec<OrderRequest>) -> ExecResult<BatchOutcome> {
        let mut outcome = BatchOutcome::default();
        for req in reqs {
            self.attempted.lock().push(req.clone());
            if self.margin_fail.lock().contains(req.client_id.as_str()) {
                outcome.margin_failed.push(req.client_id.clone());
            } else {
                outcome.accepted.push(self.accept(&req));
            }
        }
        Ok(outcome)
    }

    async fn cancel_batch(&self, order_ids: Vec<String>) -> ExecResult<()> {
        self.cancelled.lock().extend(order_ids);
        Ok(())
    }
}

fn engine_config() -> EngineConfig {
    EngineConfig {
        symbol: "ETHUSDT".to_string(),
        step: dec!(1.0),
        order_notional: dec!(30),
        min_order_value: dec!(20),
        buy_window: 3,
        sell_window: 3,
        margin_lock: Duration::from_secs(10),
    }
}

async fn started_manager() -> (Arc<SuperPositionManager>, Arc<StubExecutor>) {
    let executor = Arc::new(StubExecutor::default());
    let manager = Arc::new(SuperPositionManager::new(
        engine_config(),
        executor.clone(),
        2,
        3,
    ));
    manager
        .initialize("3000.00", Decimal::ZERO, false)
        .await
        .unwrap();
    (manager, executor)
}

fn buy_fill(index: i64, order_id: &str, avg: Decimal, qty: Decimal, ts: i64) -> OrderUpdate {
    OrderUpdate {
        order_id: order_id.to_string(),
        client_id: Some(ClientOrderId::for_slot(index, SlotRole::Buy)),
        symbol: "ETHUSDT".to_string(),
        status: OrderStatus::Filled,
        executed_qty: Qty::new(qty),
        price: Px::new(avg),
        avg_price: Px::new(avg),
        side: OrderSide::Buy,
        order_type: OrderType::Limit,
        update_time_ms: ts,
    }
}

// === Cold start ===

#[tokio::test]
async fn test_cold_start_places_buy_window_only() {
    let (manager, executor) = started_manager().await;

    let buys = executor.placed_buys();
    assert_eq!(
        buys,
        vec![
            (dec!(2999.0), dec!(0.010)),
            (dec!(2998.0), dec!(0.010)),
            (dec!(2997.0), dec!(0.010)),
        ],
        "three buys, closest to center first"
    );
    assert!(executor.placed_sells().is_empty());

    let counts = manager.counts();
    assert_eq!(counts.buy_pending, 3);
    assert_eq!(counts.sell_pending, 0);
    assert_eq!(counts.holding, 0);
}

#[tokio::test]
async fn test_initialize_twice_rejected() {
    let (manager, _) = started_manager().await;
    assert!(matches!(
        manager.initialize("3000.00", Decimal::ZERO, false).await,
        Err(crate::EngineError::AlreadyInitialized)
    ));
}

#[tokio::test]
async fn test_initialize_refuses_position_divergence() {
    let executor = Arc::new(StubExecutor::default());
    let manager = SuperPositionManager::new(engine_config(), executor, 2, 3);
    let result = manager.initialize("3000.00", dec!(5), false).await;
    assert!(matches!(
        result,
        Err(crate::EngineError::PositionDivergence { .. })
    ));

    // With the safety check's blessing the same position is accepted.
    let executor = Arc::new(StubExecutor::default());
    let manager = SuperPositionManager::new(engine_config(), executor, 2, 3);
    manager.initialize("3000.00", dec!(5), true).await.unwrap();
}

// === Fill handling ===

#[tokio::test]
async fn test_buy_fill_pairs_sell_one_step_up() {
    let (manager, executor) = started_manager().await;
    let buy_oid = executor.order_id_for("sqgbn1").unwrap();

    manager
        .on_order_update(buy_fill(-1, &buy_oid, dec!(2999.0), dec!(0.010), 1))
        .await;

    assert_eq!(executor.placed_sells(), vec![(dec!(3000.0), dec!(0.010))]);
    let counts = manager.counts();
    assert_eq!(counts.sell_pending, 1);
    assert_eq!(counts.buy_pending, 2);
    assert_eq!(manager.holdings_qty(), dec!(0.010));
}

#[tokio::test]
async fn test_sell_price_derived_from_off_grid_fill() {
    let (manager, executor) = started_manager().await;
    let buy_oid = executor.order_id_for("sqgbn1").unwrap();

    // Fill came in better than the grid price; the sell still asks for a
    // full step over the true fill.
    manager
        .on_order_update(buy_fill(-1, &buy_oid, dec!(2998.73), dec!(0.010), 1))
        .await;

    assert_eq!(executor.placed_sells(), vec![(dec!(2999.73), dec!(0.010))]);
}

#[tokio::test]
async fn test_window_extends_below_occupied_slot() {
    let (manager, executor) = started_manager().await;
    let buy_oid = executor.order_id_for("sqgbn1").unwrap();
    manager
        .on_order_update(buy_fill(-1, &buy_oid, dec!(2999.0), dec!(0.010), 1))
        .await;

    // Price unchanged: slot -1 is busy with its sell, so the third buy
    // goes one rung deeper.
    manager.adjust(Px::new(dec!(3000.00))).await.unwrap();

    let buys = executor.placed_buys();
    assert!(buys.contains(&(dec!(2996.0), dec!(0.010))), "buys: {buys:?}");
    assert_eq!(manager.counts().buy_pending, 3);
}

#[tokio::test]
async fn test_sell_fill_completes_cycle() {
    let (manager, executor) = started_manager().await;
    let buy_oid = executor.order_id_for("sqgbn1").unwrap();
    manager
        .on_order_update(buy_fill(-1, &buy_oid, dec!(2999.0), dec!(0.010), 1))
        .await;
    let sell_oid = executor.order_id_for("sqgsn1").unwrap();

    manager
        .on_order_update(OrderUpdate {
            order_id: sell_oid,
            client_id: Some(ClientOrderId::for_slot(-1, SlotRole::Sell)),
            symbol: "ETHUSDT".to_string(),
            status: OrderStatus::Filled,
            executed_qty: Qty::new(dec!(0.010)),
            price: Px::new(dec!(3000.0)),
            avg_price: Px::new(dec!(3000.0)),
            side: OrderSide::Sell,
            order_type: OrderType::Limit,
            update_time_ms: 2,
        })
        .await;

    let counts = manager.counts();
    assert_eq!(counts.sell_pending, 0);
    assert_eq!(counts.holding, 0);
    assert_eq!(manager.holdings_qty(), Decimal::ZERO);
}

// === Window slide ===

#[tokio::test]
async fn test_price_drop_slides_window() {
    let (manager, executor) = started_manager().await;
    let top_buy = executor.order_id_for("sqgbn1").unwrap();

    manager.adjust(Px::new(dec!(2998.40))).await.unwrap();

    // 2999 is out of the new window by more than one step: cancelled.
    assert_eq!(*executor.cancelled.lock(), vec![top_buy]);
    // 2998 (at the new center) survives on hysteresis, 2997 stays in
    // window, and the band is completed downward.
    let buys = executor.placed_buys();
    assert!(buys.contains(&(dec!(2996.0), dec!(0.010))), "buys: {buys:?}");
    assert!(buys.contains(&(dec!(2995.0), dec!(0.010))), "buys: {buys:?}");
    // No second placement for retained rungs.
    assert_eq!(executor.attempts_for("sqgbn2"), 1);
    assert_eq!(executor.attempts_for("sqgbn3"), 1);
}

#[tokio::test]
async fn test_dust_slots_never_placed() {
    let executor = Arc::new(StubExecutor::default());
    let mut config = engine_config();
    // Every order would rest below the venue minimum.
    config.min_order_value = dec!(1000);
    let manager = SuperPositionManager::new(config, executor.clone(), 2, 3);
    manager
        .initialize("3000.00", Decimal::ZERO, false)
        .await
        .unwrap();

    assert!(executor.placed.lock().is_empty());
    assert_eq!(manager.counts().buy_pending, 0);
}

// === Margin cooldown ===

#[tokio::test]
async fn test_margin_insufficient_enters_cooldown() {
    let executor = Arc::new(StubExecutor::default());
    executor.fail_margin_for("sqgbn3");
    let manager = Arc::new(SuperPositionManager::new(
        engine_config(),
        executor.clone(),
        2,
        3,
    ));
    manager
        .initialize("3000.00", Decimal::ZERO, false)
        .await
        .unwrap();

    // The farthest rung failed on margin and is not buy-pending.
    let counts = manager.counts();
    assert_eq!(counts.buy_pending, 2);
    assert_eq!(executor.attempts_for("sqgbn3"), 1);

    // Within the lock window the slot is not retried.
    manager.adjust(Px::new(dec!(3000.00))).await.unwrap();
    assert_eq!(executor.attempts_for("sqgbn3"), 1);
    // And the window did not chase a deeper rung in its place.
    assert_eq!(executor.attempts_for("sqgbn4"), 0);
}

// === Risk suspension ===

#[tokio::test]
async fn test_cancel_all_buys_spares_sells() {
    let (manager, executor) = started_manager().await;
    let buy_oid = executor.order_id_for("sqgbn1").unwrap();
    manager
        .on_order_update(buy_fill(-1, &buy_oid, dec!(2999.0), dec!(0.010), 1))
        .await;
    let sell_oid = executor.order_id_for("sqgsn1").unwrap();

    manager.cancel_all_buys().await;

    let counts = manager.counts();
    assert_eq!(counts.buy_pending, 0);
    assert_eq!(counts.sell_pending, 1, "sells must complete");
    assert!(!executor.cancelled.lock().contains(&sell_oid));
}

// === Idempotence ===

#[tokio::test]
async fn test_duplicate_update_is_ignored() {
    let (manager, executor) = started_manager().await;
    let buy_oid = executor.order_id_for("sqgbn1").unwrap();

    let update = buy_fill(-1, &buy_oid, dec!(2999.0), dec!(0.010), 7);
    manager.on_order_update(update.clone()).await;
    manager.on_order_update(update).await;

    // One fill, one paired sell.
    assert_eq!(executor.placed_sells().len(), 1);
    assert_eq!(manager.counts().sell_pending, 1);
}

#[tokio::test]
async fn test_unknown_client_id_is_deferred() {
    let (manager, executor) = started_manager().await;
    let before = manager.counts();

    manager
        .on_order_update(OrderUpdate {
            order_id: "x9".to_string(),
            client_id: Some(ClientOrderId::from_string("web_1234".to_string())),
            symbol: "ETHUSDT".to_string(),
            status: OrderStatus::Filled,
            executed_qty: Qty::new(dec!(1)),
            price: Px::new(dec!(2999.0)),
            avg_price: Px::new(dec!(2999.0)),
            side: OrderSide::Buy,
            order_type: OrderType::Limit,
            update_time_ms: 1,
        })
        .await;

    assert_eq!(manager.counts(), before);
    assert!(executor.placed_sells().is_empty());
}

// === Reconciler ===

#[derive(Default)]
struct StubVenue {
    open: Mutex<Vec<OrderResult>>,
    details: Mutex<HashMap<String, OrderResult>>,
    cancelled: Mutex<Vec<String>>,
    positions: Mutex<Vec<PositionInfo>>,
}

impl StubVenue {
    fn venue_order(
        order_id: &str,
        client_id: Option<&str>,
        status: OrderStatus,
        filled: Decimal,
        avg: Decimal,
    ) -> OrderResult {
        OrderResult {
            order_id: order_id.to_string(),
            client_id: client_id.map(|c| ClientOrderId::from_string(c.to_string())),
            symbol: "ETHUSDT".to_string(),
            side: OrderSide::Buy,
            price: Px::new(dec!(2999.0)),
            qty: Qty::new(dec!(0.010)),
            filled_qty: Qty::new(filled),
            avg_price: Px::new(avg),
            status,
            created_at: Utc::now(),
        }
    }
}

#[async_trait]
impl Venue for StubVenue {
    fn name(&self) -> &str {
        "stub"
    }
    fn base_asset(&self) -> &str {
        "ETH"
    }
    fn quote_asset(&self) -> &str {
        "USDT"
    }
    fn price_decimals(&self) -> u32 {
        2
    }
    fn qty_decimals(&self) -> u32 {
        3
    }
    async fn account(&self) -> VenueResult<AccountSnapshot> {
        unimplemented!()
    }
    async fn positions(&self, _: &str) -> VenueResult<Vec<PositionInfo>> {
        Ok(self.positions.lock().clone())
    }
    async fn place_order(&self, _: &OrderRequest) -> VenueResult<OrderResult> {
        unimplemented!()
    }
    async fn place_orders(&self, _: &[OrderRequest]) -> VenueResult<BatchPlaceOutcome> {
        unimplemented!()
    }
    async fn cancel_order(&self, _: &str, order_id: &str) -> VenueResult<()> {
        self.cancelled.lock().push(order_id.to_string());
        Ok(())
    }
    async fn cancel_orders(&self, _: &str, _: &[String]) -> VenueResult<()> {
        unimplemented!()
    }
    async fn cancel_all(&self, _: &str) -> VenueResult<()> {
        unimplemented!()
    }
    async fn open_orders(&self, _: &str) -> VenueResult<Vec<OrderResult>> {
        Ok(self.open.lock().clone())
    }
    async fn get_order(&self, _: &str, order_id: &str) -> VenueResult<OrderResult> {
        self.details
            .lock()
            .get(order_id)
            .cloned()
            .ok_or_else(|| VenueError::OrderNotFound(order_id.to_string()))
    }
    async fn start_trade_stream(&self, _: &str) -> VenueResult<mpsc::Receiver<TradeTick>> {
        unimplemented!()
    }
    async fn start_order_stream(&self, _: mpsc::Sender<OrderUpdate>) -> VenueResult<()> {
        unimplemented!()
    }
    fn stop_order_stream(&self) {}
    async fn start_candle_stream(
        &self,
        _: &[String],
        _: &str,
    ) -> VenueResult<mpsc::Receiver<Candle>> {
        unimplemented!()
    }
}

fn reconciler_for(
    venue: Arc<StubVenue>,
    manager: Arc<SuperPositionManager>,
) -> Reconciler {
    Reconciler::new(
        venue,
        manager,
        "ETHUSDT",
        Duration::from_secs(30),
        Arc::new(AtomicBool::new(false)),
    )
}

/// Populate the stub venue so it exactly mirrors the manager's orders.
fn mirror_open_orders(venue: &StubVenue, executor: &StubExecutor) {
    let placed = executor.placed.lock().clone();
    for order in &placed {
        let entry = StubVenue::venue_order(
            &order.order_id,
            order.client_id.as_ref().map(|c| c.as_str()),
            OrderStatus::New,
            Decimal::ZERO,
            Decimal::ZERO,
        );
        venue.open.lock().push(entry.clone());
        venue.details.lock().insert(order.order_id.clone(), entry);
    }
}

#[tokio::test]
async fn test_reconciler_cancels_orphans() {
    let (manager, executor) = started_manager().await;
    let venue = Arc::new(StubVenue::default());
    mirror_open_orders(&venue, &executor);
    // A survivor from a previous run: our id format, but no slot owns it.
    venue.open.lock().push(StubVenue::venue_order(
        "x9",
        Some("sqgbn42"),
        OrderStatus::New,
        Decimal::ZERO,
        Decimal::ZERO,
    ));

    let before = manager.counts();
    let report = reconciler_for(venue.clone(), manager.clone())
        .reconcile_once()
        .await
        .unwrap();

    assert_eq!(report.orphans_cancelled, 1);
    assert_eq!(*venue.cancelled.lock(), vec!["x9".to_string()]);
    assert_eq!(manager.counts(), before, "local state untouched");
}

#[tokio::test]
async fn test_reconciler_applies_missed_fill() {
    let (manager, executor) = started_manager().await;
    let venue = Arc::new(StubVenue::default());
    mirror_open_orders(&venue, &executor);

    // The buy at -1 filled, but the stream never told us: the venue no
    // longer lists it as open and its terminal status is filled.
    let buy_oid = executor.order_id_for("sqgbn1").unwrap();
    venue.open.lock().retain(|o| o.order_id != buy_oid);
    venue.details.lock().insert(
        buy_oid.clone(),
        StubVenue::venue_order(
            &buy_oid,
            Some("sqgbn1"),
            OrderStatus::Filled,
            dec!(0.010),
            dec!(2999.0),
        ),
    );

    let report = reconciler_for(venue, manager.clone())
        .reconcile_once()
        .await
        .unwrap();

    assert_eq!(report.repaired, 1);
    // The fill took the normal path: holding, then paired sell.
    assert_eq!(manager.counts().sell_pending, 1);
    assert_eq!(executor.placed_sells(), vec![(dec!(3000.0), dec!(0.010))]);
}

#[tokio::test]
async fn test_reconciler_frees_vanished_order() {
    let (manager, executor) = started_manager().await;
    let venue = Arc::new(StubVenue::default());
    mirror_open_orders(&venue, &executor);

    // Venue has no trace of the buy at -2: not open, no terminal record.
    let buy_oid = executor.order_id_for("sqgbn2").unwrap();
    venue.open.lock().retain(|o| o.order_id != buy_oid);
    venue.details.lock().remove(&buy_oid);

    let report = reconciler_for(venue, manager.clone())
        .reconcile_once()
        .await
        .unwrap();

    assert_eq!(report.repaired, 1);
    assert_eq!(manager.counts().buy_pending, 2);
}

#[tokio::test]
async fn test_reconciler_twice_is_noop() {
    let (manager, executor) = started_manager().await;
    let venue = Arc::new(StubVenue::default());
    mirror_open_orders(&venue, &executor);

    let reconciler = reconciler_for(venue.clone(), manager.clone());
    let first = reconciler.reconcile_once().await.unwrap();
    let counts = manager.counts();
    let second = reconciler.reconcile_once().await.unwrap();

    assert_eq!(first, second);
    assert_eq!(second.repaired, 0);
    assert_eq!(second.orphans_cancelled, 0);
    assert_eq!(manager.counts(), counts);
    assert!(venue.cancelled.lock().is_empty());
}

#[tokio::test]
async fn test_position_divergence_marks_degraded() {
    let (manager, executor) = started_manager().await;
    let venue = Arc::new(StubVenue::default());
    mirror_open_orders(&venue, &executor);
    venue.positions.lock().push(PositionInfo {
        symbol: "ETHUSDT".to_string(),
        size: dec!(5),
        leverage: 10,
    });

    let reconciler = reconciler_for(venue.clone(), manager.clone());
    let report = reconciler.reconcile_once().await.unwrap();
    assert!(report.diverged);
    assert!(manager.is_degraded());

    // Divergence resolved by the operator: the flag clears.
    venue.positions.lock().clear();
    let report = reconciler.reconcile_once().await.unwrap();
    assert!(!report.diverged);
    assert!(!manager.is_degraded());
}
