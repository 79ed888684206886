//! Application orchestration.
//!
//! Wires the venue, price monitor, executor, position manager, risk
//! monitor, reconciler, cleaner, and take-profit into one daemon:
//! startup order matters (order stream before the first placement, so no
//! fill push is missed), and shutdown issues cancels before anything else
//! stops.

use crate::config::Config;
use crate::error::{AppError, AppResult};
use sqgrid_core::{ClientOrderId, OrderRequest, Qty};
use sqgrid_engine::{EngineConfig, Reconciler, SuperPositionManager};
use sqgrid_exec::{OrderCleaner, OrderExecutor, RetryDelays};
use sqgrid_feed::PriceMonitor;
use sqgrid_safety::{
    check_account_safety, BalanceMode, RiskConfig, RiskMonitor, SafetyParams, TakeProfitConfig,
    TakeProfitMonitor, TakeProfitOutcome,
};
use sqgrid_venue::bitget::StreamConfig;
use sqgrid_venue::{BitgetVenue, Venue, VenueCredentials};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Hard deadline for the final cancel-all, independent of the root
/// cancellation.
const CANCEL_ALL_DEADLINE: Duration = Duration::from_secs(10);

/// How long a first price tick may take, in price-poll intervals.
const FIRST_PRICE_POLLS: u64 = 10;

pub struct Application {
    config: Config,
}

impl Application {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    pub async fn run(self) -> AppResult<()> {
        let config = self.config;
        let symbol = config.trading.symbol.clone();
        let exchange = config.current_exchange().clone();

        // --- Venue ---
        let stream_config = StreamConfig {
            reconnect_delay: Duration::from_secs(config.timing.websocket_reconnect_delay),
            ping_interval: Duration::from_secs(config.timing.websocket_ping_interval),
            pong_wait: Duration::from_secs(config.timing.websocket_pong_wait),
        };
        let venue = match config.app.current_exchange.as_str() {
            "bitget" => Arc::new(
                BitgetVenue::connect(
                    VenueCredentials {
                        api_key: exchange.api_key.clone(),
                        secret_key: exchange.secret_key.clone(),
                        passphrase: exchange.passphrase.clone(),
                    },
                    symbol.clone(),
                    stream_config,
                )
                .await?,
            ),
            other => {
                return Err(AppError::Config(format!("unsupported exchange {other:?}")));
            }
        };
        let venue_dyn: Arc<dyn Venue> = venue.clone();
        info!(venue = venue_dyn.name(), %symbol, "venue ready");

        let root = CancellationToken::new();

        // --- Price monitor: the only price source in the system ---
        let price_monitor = Arc::new(PriceMonitor::new(
            venue_dyn.clone(),
            symbol.clone(),
            Duration::from_millis(config.timing.price_send_interval),
            Duration::from_millis(config.timing.price_poll_interval * FIRST_PRICE_POLLS),
            root.child_token(),
        ));
        price_monitor.start().await?;
        let (price, price_str) = price_monitor.last_price();
        info!(price = %price_str, "initial price acquired");

        // --- Pre-trade safety: any failure here is fatal ---
        let report = check_account_safety(
            venue_dyn.as_ref(),
            &SafetyParams {
                symbol: symbol.clone(),
                current_price: price.inner(),
                order_notional: config.trading.order_quantity,
                price_step: config.trading.price_interval,
                fee_rate: exchange.fee_rate,
                required_positions: config.trading.position_safety_check,
                max_leverage: config.trading.max_leverage,
            },
        )
        .await?;

        // --- Executor and position manager ---
        let executor = Arc::new(OrderExecutor::new(
            venue_dyn.clone(),
            symbol.clone(),
            RetryDelays {
                rate_limit: Duration::from_secs(config.timing.rate_limit_retry_delay),
                transient: Duration::from_millis(config.timing.order_retry_delay),
            },
        ));
        let memo = executor.memo();
        let manager = Arc::new(SuperPositionManager::new(
            EngineConfig {
                symbol: symbol.clone(),
                step: config.trading.price_interval,
                order_notional: config.trading.order_quantity,
                min_order_value: config.trading.min_order_value,
                buy_window: config.trading.buy_window_size,
                sell_window: config.trading.sell_window_size,
                margin_lock: Duration::from_secs(config.trading.margin_lock_duration_seconds),
            },
            executor.clone(),
            venue_dyn.price_decimals(),
            venue_dyn.qty_decimals(),
        ));

        // --- Risk monitor ---
        let risk = Arc::new(RiskMonitor::new(
            RiskConfig {
                enabled: config.risk_control.enabled,
                symbols: config.risk_control.monitor_symbols.clone(),
                interval: config.risk_control.interval.clone(),
                volume_multiplier: config.risk_control.volume_multiplier,
                average_window: config.risk_control.average_window,
                recovery_threshold: config.risk_control.recovery_threshold,
            },
            venue_dyn.clone(),
        ));
        tokio::spawn(risk.clone().run(root.child_token()));

        // --- Order stream, started before the first placement so no
        // fill push is missed ---
        let (order_tx, mut order_rx) = mpsc::channel(1024);
        if let Err(e) = venue_dyn.start_order_stream(order_tx).await {
            warn!(?e, "order stream failed to start; updates will arrive via reconciler");
        }
        {
            let manager = manager.clone();
            let memo = memo.clone();
            let token = root.child_token();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        () = token.cancelled() => return,
                        update = order_rx.recv() => {
                            let Some(update) = update else { return };
                            if update.status.is_terminal() {
                                memo.update_status(&update.order_id, update.status);
                            }
                            manager.on_order_update(update).await;
                        }
                    }
                }
            });
        }

        // --- Anchor the grid and place the initial window ---
        manager
            .initialize(&price_str, report.position, report.skipped)
            .await?;

        // --- Take-profit ---
        let take_profit = if config.trading.take_profit.enabled {
            let mode = if config.trading.take_profit.balance_mode == "precise" {
                BalanceMode::Precise
            } else {
                BalanceMode::Auto
            };
            let monitor = Arc::new(TakeProfitMonitor::new(
                TakeProfitConfig {
                    enabled: true,
                    target_profit: config.trading.take_profit.target_profit,
                    check_interval: Duration::from_secs(config.trading.take_profit.check_interval),
                    balance_mode: mode,
                },
                venue_dyn.clone(),
            ));
            monitor.set_initial_balance().await?;
            {
                let monitor = monitor.clone();
                let venue_dyn = venue_dyn.clone();
                let venue = venue.clone();
                let manager = manager.clone();
                let symbol = symbol.clone();
                let root = root.clone();
                tokio::spawn(async move {
                    if monitor.run(root.child_token()).await == TakeProfitOutcome::Triggered {
                        take_profit_exit(venue_dyn, venue, manager, monitor, &symbol, root).await;
                    }
                });
            }
            Some(monitor)
        } else {
            None
        };

        // --- Reconciler ---
        let reconciler = Reconciler::new(
            venue_dyn.clone(),
            manager.clone(),
            symbol.clone(),
            Duration::from_secs(config.trading.reconcile_interval),
            risk.pause_flag(),
        );
        tokio::spawn(reconciler.run(root.child_token()));

        // --- Order cleaner ---
        tokio::spawn(
            OrderCleaner::new(
                memo,
                config.trading.order_cleanup_threshold,
                config.trading.cleanup_batch_size,
                Duration::from_secs(config.timing.order_cleanup_interval),
            )
            .run(root.child_token()),
        );

        // --- Status printer ---
        {
            let manager = manager.clone();
            let risk = risk.clone();
            let take_profit = take_profit.clone();
            let token = root.child_token();
            let period = Duration::from_secs(config.timing.status_print_interval * 60);
            tokio::spawn(async move {
                let mut timer = tokio::time::interval(period);
                timer.tick().await; // skip the immediate first tick
                loop {
                    tokio::select! {
                        () = token.cancelled() => return,
                        _ = timer.tick() => {
                            if !risk.is_triggered() {
                                manager.log_status();
                            }
                            if let Some(tp) = &take_profit {
                                let (initial, current, profit) = tp.current_profit();
                                info!(%initial, %current, %profit, "take-profit progress");
                            }
                        }
                    }
                }
            });
        }

        // --- Adjust loop: consumes price changes, honors the risk flag ---
        {
            let manager = manager.clone();
            let risk = risk.clone();
            let mut price_rx = price_monitor.subscribe();
            let token = root.child_token();
            tokio::spawn(async move {
                let mut was_triggered = false;
                loop {
                    tokio::select! {
                        () = token.cancelled() => return,
                        changed = price_rx.changed() => {
                            if changed.is_err() {
                                return;
                            }
                            let change = price_rx.borrow_and_update().clone();

                            if risk.is_triggered() {
                                if !was_triggered {
                                    warn!("risk triggered: cancelling buys, pausing new placements");
                                    manager.cancel_all_buys().await;
                                    was_triggered = true;
                                }
                                continue;
                            }
                            if was_triggered {
                                info!("risk cleared: resuming placements");
                                was_triggered = false;
                            }

                            if let Err(e) = manager.adjust(change.price).await {
                                error!(?e, "order adjustment failed");
                            }
                        }
                    }
                }
            });
        }

        // --- Wait for shutdown ---
        wait_for_signal().await;
        info!("shutdown signal received, closing down");

        // Cancels first, on their own deadline: resting orders are the
        // risk, everything else can wait.
        if config.system.cancel_on_exit {
            match tokio::time::timeout(CANCEL_ALL_DEADLINE, venue_dyn.cancel_all(&symbol)).await {
                Ok(Ok(())) => info!("all orders cancelled"),
                Ok(Err(e)) => error!(?e, "final cancel-all failed"),
                Err(_) => error!("final cancel-all timed out"),
            }
        }

        root.cancel();
        venue_dyn.stop_order_stream();
        price_monitor.stop();
        venue.shutdown();
        tokio::time::sleep(Duration::from_millis(500)).await;

        manager.log_status();
        info!("shutdown complete");
        Ok(())
    }
}

/// Full take-profit exit: cancel everything, close longs at market,
/// stop the workers, report, and leave with exit code 0.
async fn take_profit_exit(
    venue_dyn: Arc<dyn Venue>,
    venue: Arc<BitgetVenue>,
    manager: Arc<SuperPositionManager>,
    monitor: Arc<TakeProfitMonitor>,
    symbol: &str,
    root: CancellationToken,
) {
    warn!("take-profit triggered, exiting safely");

    match tokio::time::timeout(CANCEL_ALL_DEADLINE, venue_dyn.cancel_all(symbol)).await {
        Ok(Ok(())) => info!("all orders cancelled"),
        Ok(Err(e)) => error!(?e, "cancel-all failed during take-profit exit"),
        Err(_) => error!("cancel-all timed out during take-profit exit"),
    }

    if let Err(e) = close_positions_market(venue_dyn.as_ref(), symbol).await {
        error!(?e, "market close failed during take-profit exit");
    }

    root.cancel();
    venue_dyn.stop_order_stream();
    venue.shutdown();

    let (initial, current, profit) = monitor.current_profit();
    let pct = if initial.is_zero() {
        rust_decimal::Decimal::ZERO
    } else {
        profit / initial * rust_decimal::Decimal::from(100)
    };
    info!(%initial, %current, %profit, %pct, "take-profit summary");
    manager.log_status();
    info!("take-profit exit complete; restart manually to resume");

    std::process::exit(0);
}

/// Close every long with a reduce-only IOC market sell.
async fn close_positions_market(venue: &dyn Venue, symbol: &str) -> AppResult<()> {
    let positions = venue.positions(symbol).await?;
    let longs: Vec<_> = positions
        .into_iter()
        .filter(|p| p.size > rust_decimal::Decimal::ZERO)
        .collect();
    if longs.is_empty() {
        info!("no positions to close");
        return Ok(());
    }
    for position in longs {
        let qty = Qty::new(position.size).trunc_dp(venue.qty_decimals());
        let ts = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or(0);
        let request = OrderRequest::market_close(
            symbol,
            qty,
            ClientOrderId::from_string(format!("sqgx{ts}")),
        );
        match venue.place_order(&request).await {
            Ok(order) => info!(order_id = %order.order_id, %qty, "market close placed"),
            Err(e) => error!(?e, %qty, "market close placement failed"),
        }
    }
    // Give the venue a moment to report the closes before stats print.
    tokio::time::sleep(Duration::from_secs(2)).await;
    Ok(())
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(sig) => sig,
            Err(e) => {
                error!(?e, "cannot install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
