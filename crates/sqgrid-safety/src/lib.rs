//! Safety components around the grid engine.
//!
//! - Pre-trade safety check: refuses to start an unsafe configuration
//! - Risk monitor: pauses new buys during abnormal volume across a basket
//! - Take-profit monitor: triggers the exit flow at a profit target

pub mod error;
pub mod preflight;
pub mod risk;
pub mod take_profit;

pub use error::{SafetyError, SafetyResult};
pub use preflight::{check_account_safety, SafetyParams, SafetyReport};
pub use risk::{RiskConfig, RiskMonitor};
pub use take_profit::{BalanceMode, TakeProfitConfig, TakeProfitMonitor, TakeProfitOutcome};
