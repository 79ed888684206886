//! Grid geometry.
//!
//! Converts between prices and signed grid indices around an anchor price
//! fixed at initialization. All price rounding is half-to-even to the
//! venue's price decimals; quantities truncate so the rounded order never
//! exceeds the configured notional.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use sqgrid_core::{Px, Qty};

/// Immutable grid parameters, anchored at initialization.
#[derive(Debug, Clone)]
pub struct GridSpec {
    /// Anchor price, kept at exact venue precision.
    pub anchor: Px,
    /// Price distance between adjacent slots.
    pub step: Decimal,
    pub price_decimals: u32,
    pub qty_decimals: u32,
    /// Quote-currency notional per order.
    pub order_notional: Decimal,
    /// Minimum viable order notional; anything below is dust.
    pub min_order_value: Decimal,
    /// Number of resting buys maintained below the market.
    pub buy_window: i64,
    /// Depth of the sell side of the active window.
    pub sell_window: i64,
}

impl GridSpec {
    /// Grid index nearest to `price`.
    pub fn center(&self, price: Px) -> i64 {
        let steps = (price.inner() - self.anchor.inner()) / self.step;
        steps
            .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
            .to_i64()
            .unwrap_or(0)
    }

    /// Intended price of the slot at `index`.
    pub fn price_at(&self, index: i64) -> Px {
        Px::new(self.anchor.inner() + self.step * Decimal::from(index))
            .round_dp(self.price_decimals)
    }

    /// Intended quantity for an order at `price`.
    pub fn qty_at(&self, price: Px) -> Qty {
        price.qty_for_notional(self.order_notional, self.qty_decimals)
    }

    /// True when an order at `price` would fall below the venue minimum.
    pub fn is_dust(&self, price: Px) -> bool {
        self.qty_at(price).notional(price) < self.min_order_value
    }

    /// The paired-sell price for a buy filled at `avg_fill`.
    ///
    /// Derived from the true fill price rather than the grid so off-grid
    /// fills still earn a full step.
    pub fn paired_sell_price(&self, avg_fill: Px) -> Px {
        Px::new(avg_fill.inner() + self.step).round_dp(self.price_decimals)
    }
}
