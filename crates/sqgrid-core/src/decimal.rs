//! Precision-safe decimal types for trading.
//!
//! Uses `rust_decimal` for exact decimal arithmetic. Prices round
//! half-to-even to the venue's price decimals; quantities always truncate
//! toward zero so a rounded order never exceeds its configured notional.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Div, Mul, Sub};
use std::str::FromStr;

/// Price with exact decimal precision.
///
/// Wraps `Decimal` to provide type safety and prevent mixing
/// prices with quantities in calculations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Px(pub Decimal);

impl Px {
    pub const ZERO: Self = Self(Decimal::ZERO);

    #[inline]
    pub fn new(value: Decimal) -> Self {
        Self(value)
    }

    #[inline]
    pub fn inner(&self) -> Decimal {
        self.0
    }

    #[inline]
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    #[inline]
    pub fn is_positive(&self) -> bool {
        self.0.is_sign_positive() && !self.0.is_zero()
    }

    /// Round to the venue's price decimals using banker's rounding.
    #[inline]
    pub fn round_dp(&self, decimals: u32) -> Self {
        Self(
            self.0
                .round_dp_with_strategy(decimals, RoundingStrategy::MidpointNearestEven),
        )
    }

    /// Quantity purchasable for `notional` at this price, truncated to
    /// `qty_decimals`. Returns zero for a zero price.
    #[inline]
    pub fn qty_for_notional(&self, notional: Decimal, qty_decimals: u32) -> Qty {
        if self.0.is_zero() {
            return Qty::ZERO;
        }
        Qty::new(notional / self.0).trunc_dp(qty_decimals)
    }
}

impl fmt::Display for Px {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Px {
    type Err = rust_decimal::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

impl From<Decimal> for Px {
    fn from(d: Decimal) -> Self {
        Self(d)
    }
}

impl Add for Px {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0 + rhs.0)
    }
}

impl Sub for Px {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Self(self.0 - rhs.0)
    }
}

impl Mul<Decimal> for Px {
    type Output = Self;

    fn mul(self, rhs: Decimal) -> Self::Output {
        Self(self.0 * rhs)
    }
}

impl Div<Decimal> for Px {
    type Output = Self;

    fn div(self, rhs: Decimal) -> Self::Output {
        Self(self.0 / rhs)
    }
}

/// Quantity with exact decimal precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Qty(pub Decimal);

impl Qty {
    pub const ZERO: Self = Self(Decimal::ZERO);

    #[inline]
    pub fn new(value: Decimal) -> Self {
        Self(value)
    }

    #[inline]
    pub fn inner(&self) -> Decimal {
        self.0
    }

    #[inline]
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    #[inline]
    pub fn is_positive(&self) -> bool {
        self.0.is_sign_positive() && !self.0.is_zero()
    }

    /// Truncate to the venue's quantity decimals. Never rounds up.
    #[inline]
    pub fn trunc_dp(&self, decimals: u32) -> Self {
        Self(
            self.0
                .round_dp_with_strategy(decimals, RoundingStrategy::ToZero),
        )
    }

    /// Notional value: quantity times price.
    #[inline]
    pub fn notional(&self, price: Px) -> Decimal {
        self.0 * price.0
    }
}

impl fmt::Display for Qty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Qty {
    type Err = rust_decimal::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

impl From<Decimal> for Qty {
    fn from(d: Decimal) -> Self {
        Self(d)
    }
}

impl Add for Qty {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0 + rhs.0)
    }
}

impl Sub for Qty {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Self(self.0 - rhs.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_price_rounds_half_to_even() {
        assert_eq!(Px::new(dec!(2999.125)).round_dp(2).inner(), dec!(2999.12));
        assert_eq!(Px::new(dec!(2999.135)).round_dp(2).inner(), dec!(2999.14));
        assert_eq!(Px::new(dec!(2999.131)).round_dp(2).inner(), dec!(2999.13));
    }

    #[test]
    fn test_qty_truncates_toward_zero() {
        assert_eq!(Qty::new(dec!(0.019999)).trunc_dp(3).inner(), dec!(0.019));
        assert_eq!(Qty::new(dec!(1.2345)).trunc_dp(2).inner(), dec!(1.23));
    }

    #[test]
    fn test_qty_for_notional_never_exceeds_notional() {
        let price = Px::new(dec!(2997));
        let qty = price.qty_for_notional(dec!(30), 3);
        assert!(qty.notional(price) <= dec!(30));
        assert_eq!(qty.inner(), dec!(0.010));
    }

    #[test]
    fn test_qty_for_notional_zero_price() {
        assert_eq!(Px::ZERO.qty_for_notional(dec!(30), 3), Qty::ZERO);
    }

    #[test]
    fn test_notional() {
        let qty = Qty::new(dec!(0.5));
        assert_eq!(qty.notional(Px::new(dec!(50000))), dec!(25000));
    }
}
