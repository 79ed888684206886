//! Pre-trade account safety check.
//!
//! Runs once before any order is placed and refuses startup when the
//! configuration cannot survive: too much leverage, no balance, a grid
//! that runs out of margin too early, or a cycle whose fees eat the step.
//! A pre-existing position skips the check entirely: the operator kept a
//! position on purpose and is assumed to know the risk.

use crate::error::{SafetyError, SafetyResult};
use rust_decimal::Decimal;
use sqgrid_venue::Venue;
use tracing::{info, warn};

/// Inputs to the safety check.
#[derive(Debug, Clone)]
pub struct SafetyParams {
    pub symbol: String,
    pub current_price: Decimal,
    /// Quote notional per order.
    pub order_notional: Decimal,
    /// Grid price step.
    pub price_step: Decimal,
    /// Per-side fee rate (0.0002 = 0.02%). Zero is valid.
    pub fee_rate: Decimal,
    /// Minimum number of downward fills the margin must absorb.
    pub required_positions: u32,
    pub max_leverage: u32,
}

/// What the check concluded.
#[derive(Debug, Clone)]
pub struct SafetyReport {
    /// True when a pre-existing position made the check skip.
    pub skipped: bool,
    /// Venue position at check time.
    pub position: Decimal,
    /// Leverage used for the margin math.
    pub leverage: u32,
    /// Downward fills the balance can absorb.
    pub max_positions: Decimal,
    /// Net quote profit of one buy/sell cycle after fees.
    pub net_profit_per_cycle: Decimal,
}

/// Validate the account against the grid economics. Any error is fatal.
pub async fn check_account_safety(
    venue: &dyn Venue,
    params: &SafetyParams,
) -> SafetyResult<SafetyReport> {
    info!(symbol = %params.symbol, "running pre-trade safety check");
    let quote = venue.quote_asset().to_string();

    let account = venue.account().await?;

    let mut leverage = 1u32;
    let mut position = Decimal::ZERO;
    for p in venue.positions(&params.symbol).await? {
        position = p.size;
        if p.leverage > 0 {
            leverage = p.leverage;
        }
    }
    if leverage == 1 && account.account_leverage > 0 {
        leverage = account.account_leverage;
        info!(leverage, "using account-level leverage");
    }

    // A held position means the operator is resuming deliberately.
    if !position.is_zero() {
        warn!(%position, "existing position found, skipping safety check");
        return Ok(SafetyReport {
            skipped: true,
            position,
            leverage,
            max_positions: Decimal::ZERO,
            net_profit_per_cycle: Decimal::ZERO,
        });
    }

    if leverage > params.max_leverage {
        return Err(SafetyError::LeverageTooHigh {
            leverage,
            max_leverage: params.max_leverage,
        });
    }

    let balance = account.available_balance;
    if balance <= Decimal::ZERO {
        return Err(SafetyError::InsufficientBalance { balance, quote });
    }
    info!(%balance, %quote, leverage, "account balance");

    // Fixed-notional mode: every rung costs the same quote amount, so the
    // depth the margin can absorb is balance * leverage / notional.
    let max_positions = balance * Decimal::from(leverage) / params.order_notional;
    info!(
        %max_positions,
        required = params.required_positions,
        "downward fill capacity"
    );
    if max_positions < Decimal::from(params.required_positions) {
        return Err(SafetyError::InsufficientDepth {
            max_positions,
            required: params.required_positions,
        });
    }

    // One cycle: buy the notional at P, sell the same quantity at P + step.
    let buy_amount = params.order_notional;
    let buy_qty = buy_amount / params.current_price;
    let sell_amount = (params.current_price + params.price_step) * buy_qty;
    let gross_profit = sell_amount - buy_amount;
    let fees = buy_amount * params.fee_rate + sell_amount * params.fee_rate;
    let net_profit = gross_profit - fees;
    info!(
        %gross_profit,
        %fees,
        %net_profit,
        %quote,
        "per-cycle economics"
    );
    if net_profit <= Decimal::ZERO {
        return Err(SafetyError::UnprofitableCycle { net_profit, quote });
    }

    info!("safety check passed");
    Ok(SafetyReport {
        skipped: false,
        position,
        leverage,
        max_positions,
        net_profit_per_cycle: net_profit,
    })
}
