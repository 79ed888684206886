//! Neutral value records exchanged between components.
//!
//! Every component consumes these shapes, never venue-specific ones;
//! adapters translate at their boundary.

use crate::ids::ClientOrderId;
use crate::order::{OrderSide, OrderStatus, OrderType, TimeInForce};
use crate::{Px, Qty};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A request to place a single order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub tif: TimeInForce,
    /// Limit price. `None` for market orders.
    pub price: Option<Px>,
    pub qty: Qty,
    /// Maker-only flag: the order must never cross the book.
    pub post_only: bool,
    /// The order may only decrease position size.
    pub reduce_only: bool,
    pub client_id: ClientOrderId,
}

impl OrderRequest {
    /// A post-only resting limit order, the only kind the grid places.
    pub fn grid_limit(
        symbol: impl Into<String>,
        side: OrderSide,
        price: Px,
        qty: Qty,
        client_id: ClientOrderId,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            order_type: OrderType::Limit,
            tif: TimeInForce::GoodTilCancelled,
            price: Some(price),
            qty,
            post_only: true,
            reduce_only: false,
            client_id,
        }
    }

    /// A reduce-only IOC market sell, used to close a long on exit.
    pub fn market_close(symbol: impl Into<String>, qty: Qty, client_id: ClientOrderId) -> Self {
        Self {
            symbol: symbol.into(),
            side: OrderSide::Sell,
            order_type: OrderType::Market,
            tif: TimeInForce::ImmediateOrCancel,
            price: None,
            qty,
            post_only: false,
            reduce_only: true,
            client_id,
        }
    }
}

/// An order as acknowledged or reported by the venue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderResult {
    /// Venue-assigned order id.
    pub order_id: String,
    pub client_id: Option<ClientOrderId>,
    pub symbol: String,
    pub side: OrderSide,
    pub price: Px,
    pub qty: Qty,
    /// Cumulative filled quantity. Zero on fresh acknowledgements.
    pub filled_qty: Qty,
    /// Average fill price. Zero while nothing has filled.
    pub avg_price: Px,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
}

/// A per-symbol position snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionInfo {
    pub symbol: String,
    /// Signed size: positive long, negative short.
    pub size: Decimal,
    /// Position leverage as reported by the venue. Zero when unknown.
    pub leverage: u32,
}

/// Account balances and leverage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountSnapshot {
    pub wallet_balance: Decimal,
    pub margin_balance: Decimal,
    pub available_balance: Decimal,
    /// Account-level leverage. Zero when the venue does not report one.
    pub account_leverage: u32,
}

/// A single update from the venue's order stream.
///
/// One explicit record type at the adapter boundary; adapters must fill
/// every field they can and leave the rest zeroed rather than inventing
/// their own shapes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderUpdate {
    pub order_id: String,
    pub client_id: Option<ClientOrderId>,
    pub symbol: String,
    pub status: OrderStatus,
    pub executed_qty: Qty,
    pub price: Px,
    pub avg_price: Px,
    pub side: OrderSide,
    pub order_type: OrderType,
    /// Venue-assigned update time in Unix milliseconds.
    pub update_time_ms: i64,
}

/// A last-trade tick from the venue's trade stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeTick {
    pub symbol: String,
    pub price: Px,
    /// The venue's own string rendering of the price. Preserved so the
    /// grid anchor keeps exact venue precision.
    pub price_str: String,
    pub qty: Qty,
    pub time_ms: i64,
}

/// A candlestick bar from the venue's kline stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candle {
    pub symbol: String,
    pub open_time_ms: i64,
    pub open: Px,
    pub high: Px,
    pub low: Px,
    pub close: Px,
    pub volume: Decimal,
    /// True once the bar will receive no further trades.
    pub closed: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::SlotRole;
    use rust_decimal_macros::dec;

    #[test]
    fn test_grid_limit_is_post_only_gtc() {
        let req = OrderRequest::grid_limit(
            "ETHUSDT",
            OrderSide::Buy,
            Px::new(dec!(2999)),
            Qty::new(dec!(0.01)),
            ClientOrderId::for_slot(-1, SlotRole::Buy),
        );
        assert!(req.post_only);
        assert!(!req.reduce_only);
        assert_eq!(req.tif, TimeInForce::GoodTilCancelled);
        assert_eq!(req.order_type, OrderType::Limit);
    }

    #[test]
    fn test_market_close_is_reduce_only_ioc() {
        let req = OrderRequest::market_close(
            "ETHUSDT",
            Qty::new(dec!(0.05)),
            ClientOrderId::from_string("sqgclose1".into()),
        );
        assert!(req.reduce_only);
        assert!(!req.post_only);
        assert_eq!(req.tif, TimeInForce::ImmediateOrCancel);
        assert_eq!(req.price, None);
        assert_eq!(req.side, OrderSide::Sell);
    }
}
