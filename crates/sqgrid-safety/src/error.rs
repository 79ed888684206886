//! Error types for sqgrid-safety. Every variant here is fatal to startup.

use rust_decimal::Decimal;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SafetyError {
    #[error("account leverage {leverage}x exceeds the allowed maximum {max_leverage}x; refusing to trade")]
    LeverageTooHigh { leverage: u32, max_leverage: u32 },

    #[error("available balance {balance} {quote} is not positive")]
    InsufficientBalance { balance: Decimal, quote: String },

    #[error(
        "balance can absorb only {max_positions} downward fills, {required} required; \
         add margin or adjust the grid"
    )]
    InsufficientDepth { max_positions: Decimal, required: u32 },

    #[error(
        "net profit per cycle is {net_profit} {quote}; widen the price step or lower fees"
    )]
    UnprofitableCycle { net_profit: Decimal, quote: String },

    #[error("balance mode 'precise' is not supported; use 'auto'")]
    UnsupportedBalanceMode,

    #[error("account balance {0} is invalid for take-profit tracking")]
    InvalidInitialBalance(Decimal),

    #[error(transparent)]
    Venue(#[from] sqgrid_venue::VenueError),
}

pub type SafetyResult<T> = std::result::Result<T, SafetyError>;
