//! Volume-anomaly risk monitor.
//!
//! Watches closed candles for a basket of symbols and compares each bar's
//! volume against a rolling mean. One abnormal bar anywhere trips the
//! global pause; trading resumes only once enough symbols look normal
//! again on a bar newer than the trigger. The flag gates new buys only;
//! resting sells always complete.

use parking_lot::Mutex;
use rust_decimal::Decimal;
use sqgrid_core::Candle;
use sqgrid_venue::Venue;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct RiskConfig {
    pub enabled: bool,
    pub symbols: Vec<String>,
    /// Candle interval, venue notation (e.g. "1m").
    pub interval: String,
    /// A bar is abnormal when volume >= multiplier * rolling mean.
    pub volume_multiplier: Decimal,
    /// Bars in the rolling mean.
    pub average_window: usize,
    /// Symbols that must be normal on a fresh bar to clear the trigger.
    pub recovery_threshold: usize,
}

impl RiskConfig {
    /// Recovery threshold clamped to `[1, |symbols|]`.
    fn effective_recovery_threshold(&self) -> usize {
        self.recovery_threshold.clamp(1, self.symbols.len().max(1))
    }
}

#[derive(Debug, Default)]
struct SymbolVolume {
    window: VecDeque<Decimal>,
    abnormal: bool,
}

/// Basket-wide volume spike detector with a global pause flag.
pub struct RiskMonitor {
    config: RiskConfig,
    venue: Arc<dyn Venue>,
    triggered: Arc<AtomicBool>,
    states: Mutex<HashMap<String, SymbolVolume>>,
    /// Bar time of the trigger; recovery needs a strictly newer bar.
    triggered_at_ms: Mutex<i64>,
}

impl RiskMonitor {
    pub fn new(config: RiskConfig, venue: Arc<dyn Venue>) -> Self {
        Self {
            config,
            venue,
            triggered: Arc::new(AtomicBool::new(false)),
            states: Mutex::new(HashMap::new()),
            triggered_at_ms: Mutex::new(0),
        }
    }

    pub fn is_triggered(&self) -> bool {
        self.triggered.load(Ordering::SeqCst)
    }

    /// Read-only handle to the pause flag for other components.
    pub fn pause_flag(&self) -> Arc<AtomicBool> {
        self.triggered.clone()
    }

    /// Candle-consuming loop until cancellation.
    pub async fn run(self: Arc<Self>, token: CancellationToken) {
        if !self.config.enabled {
            info!("risk monitor disabled");
            return;
        }
        info!(
            symbols = ?self.config.symbols,
            interval = %self.config.interval,
            multiplier = %self.config.volume_multiplier,
            window = self.config.average_window,
            "risk monitor started"
        );

        let mut stream = match self
            .venue
            .start_candle_stream(&self.config.symbols, &self.config.interval)
            .await
        {
            Ok(stream) => stream,
            Err(e) => {
                error!(?e, "failed to start candle stream, risk monitor inactive");
                return;
            }
        };

        loop {
            tokio::select! {
                () = token.cancelled() => {
                    debug!("risk monitor stopped");
                    return;
                }
                candle = stream.recv() => {
                    let Some(candle) = candle else {
                        warn!("candle stream ended, risk monitor inactive");
                        return;
                    };
                    if candle.closed {
                        self.on_closed_bar(&candle);
                    }
                }
            }
        }
    }

    /// Evaluate one closed bar; flips the pause flag on both edges.
    pub fn on_closed_bar(&self, candle: &Candle) {
        let mut states = self.states.lock();
        let state = states.entry(candle.symbol.clone()).or_default();

        // A full window of *previous* bars is required before judging, so
        // the first bars of a session can never trip the pause.
        let abnormal = if state.window.len() >= self.config.average_window {
            let sum: Decimal = state.window.iter().copied().sum();
            let mean = sum / Decimal::from(state.window.len() as u64);
            mean > Decimal::ZERO && candle.volume >= self.config.volume_multiplier * mean
        } else {
            false
        };

        state.window.push_back(candle.volume);
        while state.window.len() > self.config.average_window {
            state.window.pop_front();
        }
        state.abnormal = abnormal;

        if abnormal {
            // Every abnormal bar extends the trigger: recovery is only
            // judged on bars after the latest abnormality.
            *self.triggered_at_ms.lock() = candle.open_time_ms;
            if !self.triggered.swap(true, Ordering::SeqCst) {
                warn!(
                    symbol = %candle.symbol,
                    volume = %candle.volume,
                    "abnormal volume, pausing new buys"
                );
            }
            return;
        }

        if self.triggered.load(Ordering::SeqCst) {
            let triggered_at = *self.triggered_at_ms.lock();
            if candle.open_time_ms <= triggered_at {
                return;
            }
            let normal = states.values().filter(|s| !s.abnormal).count();
            if normal >= self.config.effective_recovery_threshold() {
                self.triggered.store(false, Ordering::SeqCst);
                info!(normal, "volume back to normal, resuming trading");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use sqgrid_core::Px;

    // Bar evaluation is exercised directly through `on_closed_bar`; the
    // stream plumbing is the venue adapter's concern.

    fn bar(symbol: &str, volume: Decimal, open_time_ms: i64) -> Candle {
        Candle {
            symbol: symbol.to_string(),
            open_time_ms,
            open: Px::new(dec!(100)),
            high: Px::new(dec!(101)),
            low: Px::new(dec!(99)),
            close: Px::new(dec!(100)),
            volume,
            closed: true,
        }
    }

    fn monitor(symbols: &[&str], recovery: usize) -> RiskMonitor {
        struct NoVenue;
        #[async_trait::async_trait]
        impl Venue for NoVenue {
            fn name(&self) -> &str {
                "none"
            }
            fn base_asset(&self) -> &str {
                ""
            }
            fn quote_asset(&self) -> &str {
                ""
            }
            fn price_decimals(&self) -> u32 {
                0
            }
            fn qty_decimals(&self) -> u32 {
                0
            }
            async fn account(&self) -> sqgrid_venue::VenueResult<sqgrid_core::AccountSnapshot> {
                unimplemented!()
            }
            async fn positions(
                &self,
                _: &str,
            ) -> sqgrid_venue::VenueResult<Vec<sqgrid_core::PositionInfo>> {
                unimplemented!()
            }
            async fn place_order(
                &self,
                _: &sqgrid_core::OrderRequest,
            ) -> sqgrid_venue::VenueResult<sqgrid_core::OrderResult> {
                unimplemented!()
            }
            async fn place_orders(
                &self,
                _: &[sqgrid_core::OrderRequest],
            ) -> sqgrid_venue::VenueResult<sqgrid_venue::venue::BatchPlaceOutcome> {
                unimplemented!()
            }
            async fn cancel_order(&self, _: &str, _: &str) -> sqgrid_venue::VenueResult<()> {
                unimplemented!()
            }
            async fn cancel_orders(&self, _: &str, _: &[String]) -> sqgrid_venue::VenueResult<()> {
                unimplemented!()
            }
            async fn cancel_all(&self, _: &str) -> sqgrid_venue::VenueResult<()> {
                unimplemented!()
            }
            async fn open_orders(
                &self,
                _: &str,
            ) -> sqgrid_venue::VenueResult<Vec<sqgrid_core::OrderResult>> {
                unimplemented!()
            }
            async fn get_order(
                &self,
                _: &str,
                _: &str,
            ) -> sqgrid_venue::VenueResult<sqgrid_core::OrderResult> {
                unimplemented!()
            }
            async fn start_trade_stream(
                &self,
                _: &str,
            ) -> sqgrid_venue::VenueResult<tokio::sync::mpsc::Receiver<sqgrid_core::TradeTick>>
            {
                unimplemented!()
            }
            async fn start_order_stream(
                &self,
                _: tokio::sync::mpsc::Sender<sqgrid_core::OrderUpdate>,
            ) -> sqgrid_venue::VenueResult<()> {
                unimplemented!()
            }
            fn stop_order_stream(&self) {}
            async fn start_candle_stream(
                &self,
                _: &[String],
                _: &str,
            ) -> sqgrid_venue::VenueResult<tokio::sync::mpsc::Receiver<Candle>> {
                unimplemented!()
            }
        }

        RiskMonitor::new(
            RiskConfig {
                enabled: true,
                symbols: symbols.iter().map(|s| s.to_string()).collect(),
                interval: "1m".to_string(),
                volume_multiplier: dec!(3.0),
                average_window: 3,
                recovery_threshold: recovery,
            },
            Arc::new(NoVenue),
        )
    }

    fn warm_up(monitor: &RiskMonitor, symbol: &str, bars: usize, start_ms: i64) {
        for i in 0..bars {
            monitor.on_closed_bar(&bar(symbol, dec!(100), start_ms + i as i64 * 60_000));
        }
    }

    #[test]
    fn test_no_trigger_before_window_full() {
        let monitor = monitor(&["BTCUSDT"], 1);
        monitor.on_closed_bar(&bar("BTCUSDT", dec!(100), 0));
        // Enormous volume, but only one prior bar: not judged.
        monitor.on_closed_bar(&bar("BTCUSDT", dec!(100000), 60_000));
        assert!(!monitor.is_triggered());
    }

    #[test]
    fn test_spike_triggers_pause() {
        let monitor = monitor(&["BTCUSDT"], 1);
        warm_up(&monitor, "BTCUSDT", 3, 0);
        // Mean is 100; 3x multiplier: 300 trips it.
        monitor.on_closed_bar(&bar("BTCUSDT", dec!(300), 180_000));
        assert!(monitor.is_triggered());
    }

    #[test]
    fn test_below_multiplier_does_not_trigger() {
        let monitor = monitor(&["BTCUSDT"], 1);
        warm_up(&monitor, "BTCUSDT", 3, 0);
        monitor.on_closed_bar(&bar("BTCUSDT", dec!(299), 180_000));
        assert!(!monitor.is_triggered());
    }

    #[test]
    fn test_recovery_needs_fresh_bar() {
        let monitor = monitor(&["BTCUSDT"], 1);
        warm_up(&monitor, "BTCUSDT", 3, 0);
        monitor.on_closed_bar(&bar("BTCUSDT", dec!(300), 180_000));
        assert!(monitor.is_triggered());

        // A normal bar strictly after the trigger clears it.
        monitor.on_closed_bar(&bar("BTCUSDT", dec!(100), 240_000));
        assert!(!monitor.is_triggered());
    }

    #[test]
    fn test_recovery_waits_for_threshold() {
        let monitor = monitor(&["BTCUSDT", "ETHUSDT"], 2);
        warm_up(&monitor, "BTCUSDT", 3, 0);
        warm_up(&monitor, "ETHUSDT", 3, 0);

        monitor.on_closed_bar(&bar("BTCUSDT", dec!(300), 180_000));
        assert!(monitor.is_triggered());

        // Only one of two symbols has produced a normal fresh bar, and
        // BTC itself is still marked abnormal: stay paused.
        monitor.on_closed_bar(&bar("ETHUSDT", dec!(100), 240_000));
        assert!(monitor.is_triggered());

        // BTC prints a normal bar too: both normal, threshold met.
        monitor.on_closed_bar(&bar("BTCUSDT", dec!(100), 240_000));
        assert!(!monitor.is_triggered());
    }

    #[test]
    fn test_recovery_threshold_clamped_to_basket() {
        let monitor = monitor(&["BTCUSDT"], 99);
        warm_up(&monitor, "BTCUSDT", 3, 0);
        monitor.on_closed_bar(&bar("BTCUSDT", dec!(300), 180_000));
        assert!(monitor.is_triggered());
        // Threshold 99 clamps to 1: one normal symbol is enough.
        monitor.on_closed_bar(&bar("BTCUSDT", dec!(100), 240_000));
        assert!(!monitor.is_triggered());
    }
}
