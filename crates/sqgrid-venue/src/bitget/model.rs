//! Bitget v2 wire shapes and mapping onto the neutral records.

use crate::error::{VenueError, VenueResult};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use sqgrid_core::{
    Candle, ClientOrderId, OrderResult, OrderSide, OrderStatus, OrderType, OrderUpdate, Px, Qty,
    TradeTick,
};
use std::str::FromStr;

pub const PRODUCT_TYPE: &str = "USDT-FUTURES";
pub const MARGIN_COIN: &str = "USDT";

/// Envelope every REST response arrives in.
#[derive(Debug, Deserialize)]
pub struct ApiResponse<T> {
    pub code: String,
    pub msg: String,
    pub data: Option<T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawContract {
    pub symbol: String,
    pub base_coin: String,
    pub quote_coin: String,
    /// Price decimals, as a string.
    pub price_place: String,
    /// Quantity decimals, as a string.
    pub volume_place: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawAccount {
    #[serde(default)]
    pub usdt_equity: Option<String>,
    #[serde(default)]
    pub account_equity: Option<String>,
    #[serde(default)]
    pub available: Option<String>,
    #[serde(default)]
    pub crossed_margin_leverage: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawPosition {
    pub symbol: String,
    pub hold_side: String,
    pub total: String,
    #[serde(default)]
    pub leverage: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawOrderAck {
    pub order_id: String,
    #[serde(default)]
    pub client_oid: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawBatchAck {
    #[serde(default)]
    pub success_list: Vec<RawOrderAck>,
    #[serde(default)]
    pub failure_list: Vec<RawBatchFailure>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawBatchFailure {
    #[serde(default)]
    pub client_oid: Option<String>,
    pub error_code: String,
    pub error_msg: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawPendingList {
    #[serde(default)]
    pub entrusted_list: Option<Vec<RawOrderDetail>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawOrderDetail {
    pub symbol: String,
    pub order_id: String,
    #[serde(default)]
    pub client_oid: Option<String>,
    pub size: String,
    #[serde(default)]
    pub price: Option<String>,
    #[serde(default)]
    pub price_avg: Option<String>,
    /// Cumulative filled base volume.
    #[serde(default)]
    pub base_volume: Option<String>,
    pub side: String,
    /// `status` on stream/pending payloads, `state` on the detail endpoint.
    #[serde(alias = "state")]
    pub status: String,
    #[serde(default)]
    pub c_time: Option<String>,
}

/// Order push on the private `orders` channel.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawOrderPush {
    pub inst_id: String,
    pub order_id: String,
    #[serde(default)]
    pub client_oid: Option<String>,
    pub status: String,
    #[serde(default)]
    pub price: Option<String>,
    #[serde(default)]
    pub price_avg: Option<String>,
    /// Cumulative filled base volume.
    #[serde(default)]
    pub acc_base_volume: Option<String>,
    pub side: String,
    pub order_type: String,
    pub u_time: String,
}

/// Trade push row on the public `trade` channel.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawTradePush {
    pub ts: String,
    pub price: String,
    pub size: String,
}

/// Generic WS frame: `{"action": ..., "arg": {...}, "data": [...]}`.
#[derive(Debug, Deserialize)]
pub struct WsFrame {
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub arg: Option<WsArg>,
    #[serde(default)]
    pub event: Option<String>,
    #[serde(default)]
    pub code: Option<serde_json::Value>,
    #[serde(default)]
    pub msg: Option<String>,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub struct WsArg {
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default, rename = "instId")]
    pub inst_id: Option<String>,
}

/// Map Bitget's order state vocabulary onto the neutral taxonomy.
pub fn map_status(raw: &str) -> VenueResult<OrderStatus> {
    match raw {
        "init" | "new" | "live" => Ok(OrderStatus::New),
        "partially_filled" | "partial_fill" => Ok(OrderStatus::PartiallyFilled),
        "filled" | "full_fill" => Ok(OrderStatus::Filled),
        "canceled" | "cancelled" => Ok(OrderStatus::Canceled),
        "rejected" => Ok(OrderStatus::Rejected),
        "expired" => Ok(OrderStatus::Expired),
        other => Err(VenueError::Malformed(format!("unknown order status {other:?}"))),
    }
}

pub fn map_side(raw: &str) -> VenueResult<OrderSide> {
    match raw {
        "buy" => Ok(OrderSide::Buy),
        "sell" => Ok(OrderSide::Sell),
        other => Err(VenueError::Malformed(format!("unknown order side {other:?}"))),
    }
}

fn map_order_type(raw: &str) -> OrderType {
    if raw == "market" {
        OrderType::Market
    } else {
        OrderType::Limit
    }
}

pub fn parse_decimal(raw: &str, what: &str) -> VenueResult<Decimal> {
    Decimal::from_str(raw)
        .map_err(|e| VenueError::Malformed(format!("bad {what} {raw:?}: {e}")))
}

fn parse_decimal_opt(raw: Option<&str>, what: &str) -> VenueResult<Decimal> {
    match raw {
        Some(s) if !s.is_empty() => parse_decimal(s, what),
        _ => Ok(Decimal::ZERO),
    }
}

fn parse_millis(raw: Option<&str>) -> i64 {
    raw.and_then(|s| s.parse().ok()).unwrap_or(0)
}

impl RawOrderDetail {
    pub fn into_order_result(self) -> VenueResult<OrderResult> {
        let created_ms = parse_millis(self.c_time.as_deref());
        Ok(OrderResult {
            order_id: self.order_id,
            client_id: self.client_oid.map(ClientOrderId::from_string),
            symbol: self.symbol,
            side: map_side(&self.side)?,
            price: Px::new(parse_decimal_opt(self.price.as_deref(), "price")?),
            qty: Qty::new(parse_decimal(&self.size, "size")?),
            filled_qty: Qty::new(parse_decimal_opt(self.base_volume.as_deref(), "volume")?),
            avg_price: Px::new(parse_decimal_opt(self.price_avg.as_deref(), "avg price")?),
            status: map_status(&self.status)?,
            created_at: DateTime::<Utc>::from_timestamp_millis(created_ms).unwrap_or_else(Utc::now),
        })
    }
}

impl RawOrderPush {
    pub fn into_order_update(self) -> VenueResult<OrderUpdate> {
        Ok(OrderUpdate {
            order_id: self.order_id,
            client_id: self.client_oid.map(ClientOrderId::from_string),
            symbol: self.inst_id,
            status: map_status(&self.status)?,
            executed_qty: Qty::new(parse_decimal_opt(self.acc_base_volume.as_deref(), "volume")?),
            price: Px::new(parse_decimal_opt(self.price.as_deref(), "price")?),
            avg_price: Px::new(parse_decimal_opt(self.price_avg.as_deref(), "avg price")?),
            side: map_side(&self.side)?,
            order_type: map_order_type(&self.order_type),
            update_time_ms: self.u_time.parse().unwrap_or(0),
        })
    }
}

impl RawTradePush {
    pub fn into_trade_tick(self, symbol: &str) -> VenueResult<TradeTick> {
        Ok(TradeTick {
            symbol: symbol.to_string(),
            price: Px::new(parse_decimal(&self.price, "trade price")?),
            price_str: self.price,
            qty: Qty::new(parse_decimal(&self.size, "trade size")?),
            time_ms: self.ts.parse().unwrap_or(0),
        })
    }
}

/// Candle rows arrive as arrays:
/// `[ts, open, high, low, close, baseVolume, quoteVolume, usdtVolume]`.
pub fn candle_from_row(symbol: &str, row: &[serde_json::Value], closed: bool) -> VenueResult<Candle> {
    fn field<'a>(row: &'a [serde_json::Value], idx: usize) -> VenueResult<&'a str> {
        row.get(idx)
            .and_then(|v| v.as_str())
            .ok_or_else(|| VenueError::Malformed(format!("candle row missing field {idx}")))
    }
    Ok(Candle {
        symbol: symbol.to_string(),
        open_time_ms: field(row, 0)?.parse().unwrap_or(0),
        open: Px::new(parse_decimal(field(row, 1)?, "open")?),
        high: Px::new(parse_decimal(field(row, 2)?, "high")?),
        low: Px::new(parse_decimal(field(row, 3)?, "low")?),
        close: Px::new(parse_decimal(field(row, 4)?, "close")?),
        volume: parse_decimal(field(row, 5)?, "volume")?,
        closed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping_covers_taxonomy() {
        assert_eq!(map_status("live").unwrap(), OrderStatus::New);
        assert_eq!(map_status("partially_filled").unwrap(), OrderStatus::PartiallyFilled);
        assert_eq!(map_status("filled").unwrap(), OrderStatus::Filled);
        assert_eq!(map_status("canceled").unwrap(), OrderStatus::Canceled);
        assert_eq!(map_status("rejected").unwrap(), OrderStatus::Rejected);
        assert_eq!(map_status("expired").unwrap(), OrderStatus::Expired);
        assert!(map_status("wedged").is_err());
    }

    #[test]
    fn test_order_push_maps_to_update() {
        let raw: RawOrderPush = serde_json::from_value(serde_json::json!({
            "instId": "ETHUSDT",
            "orderId": "123",
            "clientOid": "sqgbn1",
            "status": "filled",
            "price": "2999.0",
            "priceAvg": "2999.0",
            "accBaseVolume": "0.01",
            "side": "buy",
            "orderType": "limit",
            "uTime": "1700000000000"
        }))
        .unwrap();
        let update = raw.into_order_update().unwrap();
        assert_eq!(update.status, OrderStatus::Filled);
        assert_eq!(update.client_id.unwrap().as_str(), "sqgbn1");
        assert_eq!(update.update_time_ms, 1_700_000_000_000);
    }

    #[test]
    fn test_candle_row_parses() {
        let row: Vec<serde_json::Value> =
            serde_json::from_str(r#"["1700000000000","1","2","0.5","1.5","100","150","150"]"#)
                .unwrap();
        let candle = candle_from_row("BTCUSDT", &row, true).unwrap();
        assert_eq!(candle.open_time_ms, 1_700_000_000_000);
        assert_eq!(candle.volume, Decimal::from(100));
        assert!(candle.closed);
    }
}
