//! The price monitor pump.

use crate::error::{FeedError, FeedResult};
use parking_lot::RwLock;
use sqgrid_core::Px;
use sqgrid_venue::Venue;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// A price-change event delivered to subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriceChange {
    pub price: Px,
    /// The venue's exact string rendering of the price.
    pub price_str: String,
    pub time_ms: i64,
}

#[derive(Debug, Clone)]
struct PriceCell {
    price: Px,
    price_str: String,
}

/// Maintains the most recent trade price and fans out change events.
pub struct PriceMonitor {
    venue: Arc<dyn Venue>,
    symbol: String,
    /// Minimum spacing between fan-out events. The cell itself updates on
    /// every tick regardless.
    send_interval: Duration,
    startup_deadline: Duration,
    cell: Arc<RwLock<PriceCell>>,
    watch_tx: watch::Sender<PriceChange>,
    token: CancellationToken,
    started: AtomicBool,
}

impl PriceMonitor {
    pub fn new(
        venue: Arc<dyn Venue>,
        symbol: impl Into<String>,
        send_interval: Duration,
        startup_deadline: Duration,
        token: CancellationToken,
    ) -> Self {
        let (watch_tx, _) = watch::channel(PriceChange {
            price: Px::ZERO,
            price_str: String::new(),
            time_ms: 0,
        });
        Self {
            venue,
            symbol: symbol.into(),
            send_interval,
            startup_deadline,
            cell: Arc::new(RwLock::new(PriceCell {
                price: Px::ZERO,
                price_str: String::new(),
            })),
            watch_tx,
            token,
            started: AtomicBool::new(false),
        }
    }

    /// Open the trade stream and block until the first tick arrives.
    ///
    /// Failing to observe a tick within the startup deadline is fatal to
    /// the caller; there is no REST fallback.
    pub async fn start(&self) -> FeedResult<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(FeedError::AlreadyRunning);
        }

        let mut stream = self.venue.start_trade_stream(&self.symbol).await?;

        let first = tokio::time::timeout(self.startup_deadline, stream.recv())
            .await
            .map_err(|_| FeedError::StartupTimeout(self.startup_deadline))?
            .ok_or(FeedError::Venue(sqgrid_venue::VenueError::Closed))?;

        info!(symbol = %self.symbol, price = %first.price, "first price received");
        *self.cell.write() = PriceCell {
            price: first.price,
            price_str: first.price_str.clone(),
        };
        // send_replace stores the value even before anyone subscribes.
        let _ = self.watch_tx.send_replace(PriceChange {
            price: first.price,
            price_str: first.price_str,
            time_ms: first.time_ms,
        });

        let cell = self.cell.clone();
        let watch_tx = self.watch_tx.clone();
        let token = self.token.clone();
        let send_interval = self.send_interval;
        let symbol = self.symbol.clone();

        tokio::spawn(async move {
            let mut last_sent = Instant::now();
            loop {
                tokio::select! {
                    () = token.cancelled() => {
                        debug!(%symbol, "price pump stopped");
                        return;
                    }
                    tick = stream.recv() => {
                        let Some(tick) = tick else {
                            // The adapter reconnects internally; a closed
                            // channel means the venue adapter shut down.
                            warn!(%symbol, "trade stream ended");
                            return;
                        };
                        {
                            let mut cell = cell.write();
                            cell.price = tick.price;
                            cell.price_str = tick.price_str.clone();
                        }
                        if last_sent.elapsed() >= send_interval {
                            last_sent = Instant::now();
                            let _ = watch_tx.send_replace(PriceChange {
                                price: tick.price,
                                price_str: tick.price_str,
                                time_ms: tick.time_ms,
                            });
                        }
                    }
                }
            }
        });

        Ok(())
    }

    /// Stop the pump. Subsequent `last_price` reads return the stale value.
    pub fn stop(&self) {
        self.token.cancel();
    }

    /// The most recent trade price with its venue string form.
    pub fn last_price(&self) -> (Px, String) {
        let cell = self.cell.read();
        (cell.price, cell.price_str.clone())
    }

    /// Subscribe to price changes. The channel keeps only the newest value.
    pub fn subscribe(&self) -> watch::Receiver<PriceChange> {
        self.watch_tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use sqgrid_core::{
        AccountSnapshot, Candle, OrderRequest, OrderResult, OrderUpdate, PositionInfo, Qty,
        TradeTick,
    };
    use sqgrid_venue::venue::BatchPlaceOutcome;
    use sqgrid_venue::{VenueError, VenueResult};
    use tokio::sync::mpsc;

    struct StreamOnlyVenue {
        ticks: parking_lot::Mutex<Option<mpsc::Receiver<TradeTick>>>,
    }

    impl StreamOnlyVenue {
        fn with_ticks() -> (Arc<Self>, mpsc::Sender<TradeTick>) {
            let (tx, rx) = mpsc::channel(16);
            (
                Arc::new(Self { ticks: parking_lot::Mutex::new(Some(rx)) }),
                tx,
            )
        }
    }

    #[async_trait]
    impl Venue for StreamOnlyVenue {
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
            unimplemented!()
        }
        async fn place_order(&self, _: &OrderRequest) -> VenueResult<OrderResult> {
            unimplemented!()
        }
        async fn place_orders(&self, _: &[OrderRequest]) -> VenueResult<BatchPlaceOutcome> {
            unimplemented!()
        }
        async fn cancel_order(&self, _: &str, _: &str) -> VenueResult<()> {
            unimplemented!()
        }
        async fn cancel_orders(&self, _: &str, _: &[String]) -> VenueResult<()> {
            unimplemented!()
        }
        async fn cancel_all(&self, _: &str) -> VenueResult<()> {
            unimplemented!()
        }
        async fn open_orders(&self, _: &str) -> VenueResult<Vec<OrderResult>> {
            unimplemented!()
        }
        async fn get_order(&self, _: &str, _: &str) -> VenueResult<OrderResult> {
            unimplemented!()
        }
        async fn start_trade_stream(&self, _: &str) -> VenueResult<mpsc::Receiver<TradeTick>> {
            self.ticks.lock().take().ok_or(VenueError::Closed)
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

    fn tick(price: &str, time_ms: i64) -> TradeTick {
        TradeTick {
            symbol: "ETHUSDT".to_string(),
            price: price.parse().unwrap(),
            price_str: price.to_string(),
            qty: Qty::new(dec!(1)),
            time_ms,
        }
    }

    fn monitor(venue: Arc<StreamOnlyVenue>) -> PriceMonitor {
        PriceMonitor::new(
            venue,
            "ETHUSDT",
            Duration::from_millis(0),
            Duration::from_millis(200),
            CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn test_start_waits_for_first_tick() {
        let (venue, tx) = StreamOnlyVenue::with_ticks();
        let monitor = monitor(venue);
        tx.send(tick("3000.00", 1)).await.unwrap();

        monitor.start().await.unwrap();
        let (price, raw) = monitor.last_price();
        assert_eq!(price, Px::new(dec!(3000.00)));
        assert_eq!(raw, "3000.00");
    }

    #[tokio::test]
    async fn test_start_times_out_without_tick() {
        let (venue, _tx) = StreamOnlyVenue::with_ticks();
        let monitor = monitor(venue);
        assert!(matches!(
            monitor.start().await,
            Err(FeedError::StartupTimeout(_))
        ));
    }

    #[tokio::test]
    async fn test_second_start_rejected() {
        let (venue, tx) = StreamOnlyVenue::with_ticks();
        let monitor = monitor(venue);
        tx.send(tick("3000.00", 1)).await.unwrap();
        monitor.start().await.unwrap();
        assert!(matches!(monitor.start().await, Err(FeedError::AlreadyRunning)));
    }

    #[tokio::test]
    async fn test_subscriber_sees_newest_price() {
        let (venue, tx) = StreamOnlyVenue::with_ticks();
        let monitor = monitor(venue);
        tx.send(tick("3000.00", 1)).await.unwrap();
        monitor.start().await.unwrap();

        let mut rx = monitor.subscribe();
        // Burst of ticks; the watch channel keeps only the newest.
        for (i, price) in ["2999.50", "2999.00", "2998.40"].iter().enumerate() {
            tx.send(tick(price, 2 + i as i64)).await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(50)).await;

        rx.changed().await.unwrap();
        let newest = rx.borrow_and_update().clone();
        assert_eq!(newest.price_str, "2998.40");
        let (price, _) = monitor.last_price();
        assert_eq!(price, Px::new(dec!(2998.40)));
    }
}
