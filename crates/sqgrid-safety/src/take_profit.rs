//! Take-profit monitor.
//!
//! Records the account balance before the first trade and polls it on an
//! interval; once the gain reaches the target, the caller runs the exit
//! flow (cancel everything, close longs, stop, report).

use crate::error::{SafetyError, SafetyResult};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use sqgrid_core::AccountSnapshot;
use sqgrid_venue::Venue;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Which balance figure profit is measured on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BalanceMode {
    /// Margin balance, falling back to wallet, then available.
    Auto,
    /// Reserved; not yet specified. Configuring it is a startup error.
    Precise,
}

#[derive(Debug, Clone)]
pub struct TakeProfitConfig {
    pub enabled: bool,
    /// Quote-currency gain that triggers the exit.
    pub target_profit: Decimal,
    pub check_interval: Duration,
    pub balance_mode: BalanceMode,
}

/// Why the monitor loop returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TakeProfitOutcome {
    /// Profit target reached; run the exit flow.
    Triggered,
    /// Shutdown before the target.
    Cancelled,
}

pub struct TakeProfitMonitor {
    config: TakeProfitConfig,
    venue: Arc<dyn Venue>,
    initial: RwLock<Option<Decimal>>,
    last: RwLock<Decimal>,
    triggered: AtomicBool,
}

impl TakeProfitMonitor {
    pub fn new(config: TakeProfitConfig, venue: Arc<dyn Venue>) -> Self {
        Self {
            config,
            venue,
            initial: RwLock::new(None),
            last: RwLock::new(Decimal::ZERO),
            triggered: AtomicBool::new(false),
        }
    }

    /// The balance figure the configured mode measures.
    fn effective_balance(mode: BalanceMode, account: &AccountSnapshot) -> SafetyResult<Decimal> {
        match mode {
            BalanceMode::Auto => {
                if account.margin_balance > Decimal::ZERO {
                    Ok(account.margin_balance)
                } else if account.wallet_balance > Decimal::ZERO {
                    Ok(account.wallet_balance)
                } else {
                    Ok(account.available_balance)
                }
            }
            BalanceMode::Precise => Err(SafetyError::UnsupportedBalanceMode),
        }
    }

    /// Record the baseline balance. Must run before the first trade.
    pub async fn set_initial_balance(&self) -> SafetyResult<()> {
        let account = self.venue.account().await?;
        let balance = Self::effective_balance(self.config.balance_mode, &account)?;
        if balance <= Decimal::ZERO {
            return Err(SafetyError::InvalidInitialBalance(balance));
        }
        *self.initial.write() = Some(balance);
        *self.last.write() = balance;
        info!(%balance, "initial balance recorded for take-profit");
        Ok(())
    }

    /// `(initial, current, profit)` as last observed.
    pub fn current_profit(&self) -> (Decimal, Decimal, Decimal) {
        let initial = self.initial.read().unwrap_or(Decimal::ZERO);
        let current = *self.last.read();
        (initial, current, current - initial)
    }

    pub fn is_triggered(&self) -> bool {
        self.triggered.load(Ordering::SeqCst)
    }

    /// Poll until the target is reached or shutdown wins.
    pub async fn run(&self, token: CancellationToken) -> TakeProfitOutcome {
        info!(
            target = %self.config.target_profit,
            interval_secs = self.config.check_interval.as_secs(),
            "take-profit monitor started"
        );
        let mut timer = tokio::time::interval(self.config.check_interval);
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                () = token.cancelled() => {
                    debug!("take-profit monitor stopped");
                    return TakeProfitOutcome::Cancelled;
                }
                _ = timer.tick() => {
                    if self.check_once().await {
                        return TakeProfitOutcome::Triggered;
                    }
                }
            }
        }
    }

    /// One balance poll. Returns true when the target is reached.
    async fn check_once(&self) -> bool {
        let Some(initial) = *self.initial.read() else {
            return false;
        };
        let account = match self.venue.account().await {
            Ok(account) => account,
            Err(e) => {
                error!(?e, "balance poll failed");
                return false;
            }
        };
        let Ok(current) = Self::effective_balance(self.config.balance_mode, &account) else {
            return false;
        };
        *self.last.write() = current;

        let profit = current - initial;
        debug!(%initial, %current, %profit, target = %self.config.target_profit, "take-profit check");
        if profit >= self.config.target_profit {
            self.triggered.store(true, Ordering::SeqCst);
            info!(%initial, %current, %profit, "take-profit target reached");
            return true;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn account(margin: Decimal, wallet: Decimal, available: Decimal) -> AccountSnapshot {
        AccountSnapshot {
            wallet_balance: wallet,
            margin_balance: margin,
            available_balance: available,
            account_leverage: 0,
        }
    }

    #[test]
    fn test_auto_mode_prefers_margin_balance() {
        let a = account(dec!(1000), dec!(900), dec!(800));
        assert_eq!(
            TakeProfitMonitor::effective_balance(BalanceMode::Auto, &a).unwrap(),
            dec!(1000)
        );
    }

    #[test]
    fn test_auto_mode_falls_back_wallet_then_available() {
        let a = account(Decimal::ZERO, dec!(900), dec!(800));
        assert_eq!(
            TakeProfitMonitor::effective_balance(BalanceMode::Auto, &a).unwrap(),
            dec!(900)
        );
        let a = account(Decimal::ZERO, Decimal::ZERO, dec!(800));
        assert_eq!(
            TakeProfitMonitor::effective_balance(BalanceMode::Auto, &a).unwrap(),
            dec!(800)
        );
    }

    #[test]
    fn test_precise_mode_is_unsupported() {
        let a = account(dec!(1000), dec!(900), dec!(800));
        assert!(matches!(
            TakeProfitMonitor::effective_balance(BalanceMode::Precise, &a),
            Err(SafetyError::UnsupportedBalanceMode)
        ));
    }
}
