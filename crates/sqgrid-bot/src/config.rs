//! YAML configuration.
//!
//! Unknown fields are ignored; unset numeric fields receive the defaults
//! applied in [`Config::validate`]. Missing required fields (exchange
//! selection, credentials, symbol, order notional, buy window) are
//! startup errors.

use crate::error::{AppError, AppResult};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub app: AppSection,
    #[serde(default)]
    pub exchanges: HashMap<String, ExchangeConfig>,
    pub trading: TradingConfig,
    #[serde(default)]
    pub system: SystemConfig,
    #[serde(default)]
    pub risk_control: RiskControlConfig,
    #[serde(default)]
    pub timing: TimingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppSection {
    /// Which entry of `exchanges` to trade on.
    pub current_exchange: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExchangeConfig {
    pub api_key: String,
    pub secret_key: String,
    #[serde(default)]
    pub passphrase: String,
    /// Per-side fee rate (0.0002 = 0.02%). Zero is a valid maker rate.
    #[serde(default)]
    pub fee_rate: Decimal,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TradingConfig {
    pub symbol: String,
    /// Grid price step.
    pub price_interval: Decimal,
    /// Quote notional per order.
    pub order_quantity: Decimal,
    #[serde(default)]
    pub min_order_value: Decimal,
    pub buy_window_size: i64,
    #[serde(default)]
    pub sell_window_size: i64,
    #[serde(default)]
    pub reconcile_interval: u64,
    #[serde(default)]
    pub order_cleanup_threshold: usize,
    #[serde(default)]
    pub cleanup_batch_size: usize,
    #[serde(default)]
    pub margin_lock_duration_seconds: u64,
    #[serde(default)]
    pub position_safety_check: u32,
    #[serde(default)]
    pub max_leverage: u32,
    #[serde(default)]
    pub take_profit: TakeProfitSection,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TakeProfitSection {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub target_profit: Decimal,
    #[serde(default)]
    pub check_interval: u64,
    #[serde(default)]
    pub balance_mode: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SystemConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub cancel_on_exit: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self { log_level: default_log_level(), cancel_on_exit: false }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RiskControlConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub monitor_symbols: Vec<String>,
    #[serde(default)]
    pub interval: String,
    #[serde(default)]
    pub volume_multiplier: Decimal,
    #[serde(default)]
    pub average_window: usize,
    #[serde(default)]
    pub recovery_threshold: usize,
}

/// Timing knobs. Units follow the field names; everything unset falls
/// back in [`Config::validate`].
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TimingConfig {
    /// Seconds between stream reconnect attempts.
    #[serde(default)]
    pub websocket_reconnect_delay: u64,
    /// Seconds allowed for a stream write.
    #[serde(default)]
    pub websocket_write_wait: u64,
    /// Seconds without a pong before the stream is considered dead.
    #[serde(default)]
    pub websocket_pong_wait: u64,
    /// Seconds between pings.
    #[serde(default)]
    pub websocket_ping_interval: u64,
    /// Minutes between listen-key keepalives (venues that need one).
    #[serde(default)]
    pub listen_key_keepalive_interval: u64,
    /// Milliseconds between fan-outs of the newest price.
    #[serde(default)]
    pub price_send_interval: u64,
    /// Seconds to wait before retrying after a rate limit.
    #[serde(default)]
    pub rate_limit_retry_delay: u64,
    /// Milliseconds to wait before retrying other transient errors.
    #[serde(default)]
    pub order_retry_delay: u64,
    /// Milliseconds between polls while waiting for the first price.
    #[serde(default)]
    pub price_poll_interval: u64,
    /// Minutes between status lines.
    #[serde(default)]
    pub status_print_interval: u64,
    /// Seconds between order-memo cleanup sweeps.
    #[serde(default)]
    pub order_cleanup_interval: u64,
}

impl Config {
    /// Load and validate a configuration file.
    pub fn load(path: impl AsRef<Path>) -> AppResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| AppError::Config(format!("cannot read {}: {e}", path.display())))?;
        let mut config: Config = serde_yaml::from_str(&raw)
            .map_err(|e| AppError::Config(format!("cannot parse {}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// The credentials block selected by `app.current_exchange`.
    pub fn current_exchange(&self) -> &ExchangeConfig {
        &self.exchanges[&self.app.current_exchange]
    }

    /// Apply defaults and reject invalid combinations.
    pub fn validate(&mut self) -> AppResult<()> {
        if self.app.current_exchange.is_empty() {
            return Err(AppError::Config(
                "app.current_exchange must name an exchange".to_string(),
            ));
        }
        if self.exchanges.is_empty() {
            return Err(AppError::Config("no exchanges configured".to_string()));
        }
        let Some(exchange) = self.exchanges.get(&self.app.current_exchange) else {
            return Err(AppError::Config(format!(
                "exchange {:?} is not configured",
                self.app.current_exchange
            )));
        };
        if exchange.api_key.is_empty() || exchange.secret_key.is_empty() {
            return Err(AppError::Config(format!(
                "exchange {:?} credentials are incomplete",
                self.app.current_exchange
            )));
        }
        if exchange.fee_rate < Decimal::ZERO {
            return Err(AppError::Config("fee_rate must not be negative".to_string()));
        }

        let trading = &mut self.trading;
        if trading.symbol.is_empty() {
            return Err(AppError::Config("trading.symbol must be set".to_string()));
        }
        if trading.price_interval <= Decimal::ZERO {
            return Err(AppError::Config("trading.price_interval must be positive".to_string()));
        }
        if trading.order_quantity <= Decimal::ZERO {
            return Err(AppError::Config("trading.order_quantity must be positive".to_string()));
        }
        if trading.buy_window_size <= 0 {
            return Err(AppError::Config("trading.buy_window_size must be positive".to_string()));
        }
        if trading.sell_window_size <= 0 {
            trading.sell_window_size = trading.buy_window_size;
        }
        if trading.min_order_value <= Decimal::ZERO {
            trading.min_order_value = Decimal::from(20);
        }
        if trading.reconcile_interval == 0 {
            trading.reconcile_interval = 30;
        }
        if trading.order_cleanup_threshold == 0 {
            trading.order_cleanup_threshold = 100;
        }
        if trading.cleanup_batch_size == 0 {
            trading.cleanup_batch_size = 10;
        }
        if trading.margin_lock_duration_seconds == 0 {
            trading.margin_lock_duration_seconds = 10;
        }
        if trading.position_safety_check == 0 {
            trading.position_safety_check = 100;
        }
        if trading.max_leverage == 0 {
            trading.max_leverage = 10;
        }

        let take_profit = &mut trading.take_profit;
        if take_profit.enabled {
            if take_profit.target_profit <= Decimal::ZERO {
                return Err(AppError::Config(
                    "take_profit.target_profit must be positive".to_string(),
                ));
            }
            if take_profit.check_interval < 10 || take_profit.check_interval > 300 {
                return Err(AppError::Config(
                    "take_profit.check_interval must be within 10..=300 seconds".to_string(),
                ));
            }
            if take_profit.balance_mode.is_empty() {
                take_profit.balance_mode = "auto".to_string();
            }
            if take_profit.balance_mode != "auto" && take_profit.balance_mode != "precise" {
                return Err(AppError::Config(
                    "take_profit.balance_mode must be 'auto' or 'precise'".to_string(),
                ));
            }
        }

        let risk = &mut self.risk_control;
        if risk.interval.is_empty() {
            risk.interval = "1m".to_string();
        }
        if risk.volume_multiplier <= Decimal::ZERO {
            risk.volume_multiplier = Decimal::from(3);
        }
        if risk.average_window == 0 {
            risk.average_window = 20;
        }
        if risk.monitor_symbols.is_empty() {
            risk.monitor_symbols = ["BTCUSDT", "ETHUSDT", "SOLUSDT", "XRPUSDT", "DOGEUSDT"]
                .into_iter()
                .map(String::from)
                .collect();
        }
        if risk.recovery_threshold == 0 {
            risk.recovery_threshold = 3;
        }
        risk.recovery_threshold = risk.recovery_threshold.clamp(1, risk.monitor_symbols.len());

        let timing = &mut self.timing;
        if timing.websocket_reconnect_delay == 0 {
            timing.websocket_reconnect_delay = 5;
        }
        if timing.websocket_write_wait == 0 {
            timing.websocket_write_wait = 10;
        }
        if timing.websocket_pong_wait == 0 {
            timing.websocket_pong_wait = 60;
        }
        if timing.websocket_ping_interval == 0 {
            timing.websocket_ping_interval = 20;
        }
        if timing.listen_key_keepalive_interval == 0 {
            timing.listen_key_keepalive_interval = 30;
        }
        if timing.price_send_interval == 0 {
            timing.price_send_interval = 50;
        }
        if timing.rate_limit_retry_delay == 0 {
            timing.rate_limit_retry_delay = 1;
        }
        if timing.order_retry_delay == 0 {
            timing.order_retry_delay = 500;
        }
        if timing.price_poll_interval == 0 {
            timing.price_poll_interval = 500;
        }
        if timing.status_print_interval == 0 {
            timing.status_print_interval = 1;
        }
        if timing.order_cleanup_interval == 0 {
            timing.order_cleanup_interval = 60;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    const MINIMAL: &str = r#"
app:
  current_exchange: bitget
exchanges:
  bitget:
    api_key: key
    secret_key: secret
    passphrase: phrase
    fee_rate: 0.0002
trading:
  symbol: ETHUSDT
  price_interval: 1.0
  order_quantity: 30
  buy_window_size: 3
"#;

    fn parse(yaml: &str) -> AppResult<Config> {
        let mut config: Config = serde_yaml::from_str(yaml).expect("yaml parses");
        config.validate()?;
        Ok(config)
    }

    #[test]
    fn test_minimal_config_gets_defaults() {
        let config = parse(MINIMAL).unwrap();
        assert_eq!(config.trading.sell_window_size, 3);
        assert_eq!(config.trading.min_order_value, dec!(20));
        assert_eq!(config.trading.order_cleanup_threshold, 100);
        assert_eq!(config.trading.cleanup_batch_size, 10);
        assert_eq!(config.trading.margin_lock_duration_seconds, 10);
        assert_eq!(config.trading.position_safety_check, 100);
        assert_eq!(config.trading.max_leverage, 10);
        assert_eq!(config.timing.websocket_reconnect_delay, 5);
        assert_eq!(config.timing.price_send_interval, 50);
        assert_eq!(config.timing.rate_limit_retry_delay, 1);
        assert_eq!(config.timing.order_retry_delay, 500);
        assert_eq!(config.timing.status_print_interval, 1);
        assert_eq!(config.timing.order_cleanup_interval, 60);
        assert_eq!(config.risk_control.interval, "1m");
        assert_eq!(config.risk_control.volume_multiplier, dec!(3));
        assert_eq!(config.risk_control.average_window, 20);
        assert_eq!(config.risk_control.monitor_symbols.len(), 5);
        assert_eq!(config.risk_control.recovery_threshold, 3);
        assert_eq!(config.system.log_level, "info");
        assert!(!config.system.cancel_on_exit);
    }

    #[test]
    fn test_unknown_fields_are_ignored() {
        let yaml = format!("{MINIMAL}\nfuture_section:\n  knob: 1\n");
        assert!(parse(&yaml).is_ok());
    }

    #[test]
    fn test_missing_credentials_rejected() {
        let yaml = MINIMAL.replace("api_key: key", "api_key: \"\"");
        assert!(parse(&yaml).is_err());
    }

    #[test]
    fn test_unconfigured_exchange_rejected() {
        let yaml = MINIMAL.replace("current_exchange: bitget", "current_exchange: hyperliquid");
        assert!(parse(&yaml).is_err());
    }

    #[test]
    fn test_zero_window_rejected() {
        let yaml = MINIMAL.replace("buy_window_size: 3", "buy_window_size: 0");
        assert!(parse(&yaml).is_err());
    }

    #[test]
    fn test_take_profit_validation() {
        let enabled = format!(
            "{MINIMAL}  take_profit:\n    enabled: true\n    target_profit: 50\n    check_interval: 30\n"
        );
        let config = parse(&enabled).unwrap();
        assert_eq!(config.trading.take_profit.balance_mode, "auto");

        let bad_interval = enabled.replace("check_interval: 30", "check_interval: 5");
        assert!(parse(&bad_interval).is_err());

        let bad_mode = format!(
            "{MINIMAL}  take_profit:\n    enabled: true\n    target_profit: 50\n    check_interval: 30\n    balance_mode: exact\n"
        );
        assert!(parse(&bad_mode).is_err());
    }

    #[test]
    fn test_recovery_threshold_clamped() {
        let yaml = format!(
            "{MINIMAL}risk_control:\n  enabled: true\n  monitor_symbols: [BTCUSDT, ETHUSDT]\n  recovery_threshold: 10\n"
        );
        let config = parse(&yaml).unwrap();
        assert_eq!(config.risk_control.recovery_threshold, 2);
    }
}
