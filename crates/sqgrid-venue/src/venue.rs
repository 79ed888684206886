//! The abstract venue every component trades against.

use crate::error::VenueResult;
use async_trait::async_trait;
use sqgrid_core::{
    AccountSnapshot, Candle, OrderRequest, OrderResult, OrderUpdate, PositionInfo, TradeTick,
};
use tokio::sync::mpsc;

/// API credentials for a venue.
#[derive(Debug, Clone)]
pub struct VenueCredentials {
    pub api_key: String,
    pub secret_key: String,
    /// Required by some venues (Bitget), empty elsewhere.
    pub passphrase: String,
}

/// Outcome of a batch placement, reported per order.
#[derive(Debug, Clone)]
pub struct BatchPlaceOutcome {
    /// Orders the venue accepted.
    pub accepted: Vec<OrderResult>,
    /// Per-order failures, as (client id string, classified error).
    pub failed: Vec<(String, crate::error::VenueError)>,
}

/// Uniform capability surface over heterogeneous exchanges.
///
/// Adapters translate to and from the neutral records in `sqgrid-core`
/// at this boundary; no venue wire shape crosses it.
#[async_trait]
pub trait Venue: Send + Sync {
    /// Human-readable venue name for logs.
    fn name(&self) -> &str;

    /// Base asset of the configured symbol (e.g. "ETH").
    fn base_asset(&self) -> &str;

    /// Quote asset of the configured symbol (e.g. "USDT").
    fn quote_asset(&self) -> &str;

    /// Price decimals for the configured symbol.
    fn price_decimals(&self) -> u32;

    /// Quantity decimals for the configured symbol.
    fn qty_decimals(&self) -> u32;

    /// Current account balances and leverage.
    async fn account(&self) -> VenueResult<AccountSnapshot>;

    /// Open positions for a symbol.
    async fn positions(&self, symbol: &str) -> VenueResult<Vec<PositionInfo>>;

    /// Place a single order.
    async fn place_order(&self, req: &OrderRequest) -> VenueResult<OrderResult>;

    /// Place a batch of orders, reporting per-order outcomes.
    async fn place_orders(&self, reqs: &[OrderRequest]) -> VenueResult<BatchPlaceOutcome>;

    /// Cancel one order by venue id.
    async fn cancel_order(&self, symbol: &str, order_id: &str) -> VenueResult<()>;

    /// Cancel a batch of orders by venue id.
    async fn cancel_orders(&self, symbol: &str, order_ids: &[String]) -> VenueResult<()>;

    /// Cancel every open order for a symbol.
    async fn cancel_all(&self, symbol: &str) -> VenueResult<()>;

    /// All currently open orders for a symbol.
    async fn open_orders(&self, symbol: &str) -> VenueResult<Vec<OrderResult>>;

    /// Look up one order, including terminal ones.
    async fn get_order(&self, symbol: &str, order_id: &str) -> VenueResult<OrderResult>;

    /// Start the last-trade stream for a symbol.
    ///
    /// The returned channel stays open across venue disconnects; the
    /// adapter reconnects internally with a bounded delay. Ticks are
    /// simply absent during the gap.
    async fn start_trade_stream(&self, symbol: &str) -> VenueResult<mpsc::Receiver<TradeTick>>;

    /// Start the private order-update stream.
    ///
    /// Updates are delivered in venue timestamp order per order; ordering
    /// across different orders is not guaranteed.
    async fn start_order_stream(&self, tx: mpsc::Sender<OrderUpdate>) -> VenueResult<()>;

    /// Stop the private order-update stream.
    fn stop_order_stream(&self);

    /// Start a candle stream for a basket of symbols at the given
    /// interval (e.g. "1m"). Used by the risk monitor.
    async fn start_candle_stream(
        &self,
        symbols: &[String],
        interval: &str,
    ) -> VenueResult<mpsc::Receiver<Candle>>;
}
