//! Bitget USDT-margined perpetuals adapter.

mod model;
mod rest;
mod stream;

use crate::error::{VenueError, VenueResult};
use crate::signer::Signer;
use crate::venue::{BatchPlaceOutcome, Venue, VenueCredentials};
use async_trait::async_trait;
use chrono::Utc;
use model::{
    RawAccount, RawBatchAck, RawContract, RawOrderAck, RawOrderDetail, RawPendingList, RawPosition,
    MARGIN_COIN, PRODUCT_TYPE,
};
use parking_lot::Mutex;
use rest::RestClient;
use rust_decimal::Decimal;
use sqgrid_core::{
    AccountSnapshot, Candle, OrderRequest, OrderResult, OrderStatus, OrderType, OrderUpdate,
    PositionInfo, TimeInForce, TradeTick,
};
use std::str::FromStr;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub use stream::StreamConfig;

const REST_URL: &str = "https://api.bitget.com";
const PUBLIC_WS_URL: &str = "wss://ws.bitget.com/v2/ws/public";
const PRIVATE_WS_URL: &str = "wss://ws.bitget.com/v2/ws/private";

const STREAM_CHANNEL_CAPACITY: usize = 1024;

/// Bitget venue adapter.
pub struct BitgetVenue {
    rest: RestClient,
    signer: Signer,
    symbol: String,
    base_asset: String,
    quote_asset: String,
    price_decimals: u32,
    qty_decimals: u32,
    stream_config: StreamConfig,
    public_ws_url: String,
    private_ws_url: String,
    /// Cancels every stream this adapter spawned.
    root_token: CancellationToken,
    /// Cancels only the private order stream.
    order_stream_token: Mutex<Option<CancellationToken>>,
}

impl BitgetVenue {
    /// Connect to the venue: builds the signed REST client and fetches the
    /// contract metadata (decimals, assets) for `symbol`.
    pub async fn connect(
        credentials: VenueCredentials,
        symbol: impl Into<String>,
        stream_config: StreamConfig,
    ) -> VenueResult<Self> {
        let symbol = symbol.into();
        let signer = Signer::new(
            credentials.api_key,
            credentials.secret_key,
            credentials.passphrase,
        );
        let rest = RestClient::new(REST_URL, signer.clone())?;

        let contracts: Vec<RawContract> = rest
            .get_public(&format!(
                "/api/v2/mix/market/contracts?productType={PRODUCT_TYPE}&symbol={symbol}"
            ))
            .await?;
        let contract = contracts
            .into_iter()
            .find(|c| c.symbol == symbol)
            .ok_or_else(|| VenueError::Rejected {
                code: "unknown-symbol".to_string(),
                message: format!("contract {symbol} not listed"),
            })?;

        let price_decimals = contract
            .price_place
            .parse()
            .map_err(|_| VenueError::Malformed("bad pricePlace".to_string()))?;
        let qty_decimals = contract
            .volume_place
            .parse()
            .map_err(|_| VenueError::Malformed("bad volumePlace".to_string()))?;

        info!(
            %symbol,
            price_decimals,
            qty_decimals,
            "connected to Bitget"
        );

        Ok(Self {
            rest,
            signer,
            symbol,
            base_asset: contract.base_coin,
            quote_asset: contract.quote_coin,
            price_decimals,
            qty_decimals,
            stream_config,
            public_ws_url: PUBLIC_WS_URL.to_string(),
            private_ws_url: PRIVATE_WS_URL.to_string(),
            root_token: CancellationToken::new(),
            order_stream_token: Mutex::new(None),
        })
    }

    /// Stop every stream the adapter owns.
    pub fn shutdown(&self) {
        self.root_token.cancel();
    }

    fn order_body(req: &OrderRequest) -> serde_json::Value {
        let force = match (req.post_only, req.tif) {
            (true, _) => "post_only",
            (false, TimeInForce::GoodTilCancelled) => "gtc",
            (false, TimeInForce::ImmediateOrCancel) => "ioc",
        };
        let mut body = serde_json::json!({
            "symbol": req.symbol,
            "productType": PRODUCT_TYPE,
            "marginMode": "crossed",
            "marginCoin": MARGIN_COIN,
            "size": req.qty.to_string(),
            "side": req.side.to_string(),
            "orderType": req.order_type.to_string(),
            "force": force,
            "clientOid": req.client_id.as_str(),
            "reduceOnly": if req.reduce_only { "YES" } else { "NO" },
        });
        if let (OrderType::Limit, Some(price)) = (req.order_type, req.price) {
            body["price"] = serde_json::Value::String(price.to_string());
        }
        body
    }

    fn ack_to_result(req: &OrderRequest, ack: RawOrderAck) -> OrderResult {
        OrderResult {
            order_id: ack.order_id,
            client_id: Some(req.client_id.clone()),
            symbol: req.symbol.clone(),
            side: req.side,
            price: req.price.unwrap_or(sqgrid_core::Px::ZERO),
            qty: req.qty,
            filled_qty: sqgrid_core::Qty::ZERO,
            avg_price: sqgrid_core::Px::ZERO,
            status: OrderStatus::New,
            created_at: Utc::now(),
        }
    }
}

#[async_trait]
impl Venue for BitgetVenue {
    fn name(&self) -> &str {
        "Bitget"
    }

    fn base_asset(&self) -> &str {
        &self.base_asset
    }

    fn quote_asset(&self) -> &str {
        &self.quote_asset
    }

    fn price_decimals(&self) -> u32 {
        self.price_decimals
    }

    fn qty_decimals(&self) -> u32 {
        self.qty_decimals
    }

    async fn account(&self) -> VenueResult<AccountSnapshot> {
        let raw: RawAccount = self
            .rest
            .get(&format!(
                "/api/v2/mix/account/account?symbol={}&productType={PRODUCT_TYPE}&marginCoin={MARGIN_COIN}",
                self.symbol
            ))
            .await?;

        fn dec(raw: &Option<String>) -> Decimal {
            raw.as_deref()
                .and_then(|s| Decimal::from_str(s).ok())
                .unwrap_or(Decimal::ZERO)
        }

        Ok(AccountSnapshot {
            wallet_balance: dec(&raw.usdt_equity),
            margin_balance: dec(&raw.account_equity),
            available_balance: dec(&raw.available),
            account_leverage: raw
                .crossed_margin_leverage
                .as_deref()
                .and_then(|s| s.parse().ok())
                .unwrap_or(0),
        })
    }

    async fn positions(&self, symbol: &str) -> VenueResult<Vec<PositionInfo>> {
        let raw: Vec<RawPosition> = self
            .rest
            .get(&format!(
                "/api/v2/mix/position/all-position?productType={PRODUCT_TYPE}&marginCoin={MARGIN_COIN}"
            ))
            .await?;

        raw.into_iter()
            .filter(|p| p.symbol == symbol)
            .map(|p| {
                let size = model::parse_decimal(&p.total, "position size")?;
                let signed = if p.hold_side == "short" { -size } else { size };
                Ok(PositionInfo {
                    symbol: p.symbol,
                    size: signed,
                    leverage: p.leverage.as_deref().and_then(|s| s.parse().ok()).unwrap_or(0),
                })
            })
            .collect()
    }

    async fn place_order(&self, req: &OrderRequest) -> VenueResult<OrderResult> {
        let ack: RawOrderAck = self
            .rest
            .post("/api/v2/mix/order/place-order", &Self::order_body(req))
            .await?;
        Ok(Self::ack_to_result(req, ack))
    }

    async fn place_orders(&self, reqs: &[OrderRequest]) -> VenueResult<BatchPlaceOutcome> {
        let order_list: Vec<serde_json::Value> = reqs.iter().map(Self::order_body).collect();
        let body = serde_json::json!({
            "symbol": self.symbol,
            "productType": PRODUCT_TYPE,
            "marginCoin": MARGIN_COIN,
            "marginMode": "crossed",
            "orderList": order_list,
        });
        let ack: RawBatchAck = self
            .rest
            .post("/api/v2/mix/order/batch-place-order", &body)
            .await?;

        let mut accepted = Vec::new();
        for item in ack.success_list {
            let Some(client_oid) = item.client_oid.as_deref() else { continue };
            if let Some(req) = reqs.iter().find(|r| r.client_id.as_str() == client_oid) {
                accepted.push(Self::ack_to_result(req, item));
            }
        }

        let failed = ack
            .failure_list
            .into_iter()
            .map(|f| {
                (
                    f.client_oid.unwrap_or_default(),
                    rest::classify_code(&f.error_code, &f.error_msg),
                )
            })
            .collect();

        Ok(BatchPlaceOutcome { accepted, failed })
    }

    async fn cancel_order(&self, symbol: &str, order_id: &str) -> VenueResult<()> {
        let body = serde_json::json!({
            "symbol": symbol,
            "productType": PRODUCT_TYPE,
            "orderId": order_id,
        });
        let _ack: serde_json::Value =
            self.rest.post("/api/v2/mix/order/cancel-order", &body).await?;
        Ok(())
    }

    async fn cancel_orders(&self, symbol: &str, order_ids: &[String]) -> VenueResult<()> {
        if order_ids.is_empty() {
            return Ok(());
        }
        let id_list: Vec<serde_json::Value> = order_ids
            .iter()
            .map(|id| serde_json::json!({ "orderId": id }))
            .collect();
        let body = serde_json::json!({
            "symbol": symbol,
            "productType": PRODUCT_TYPE,
            "orderIdList": id_list,
        });
        let _ack: serde_json::Value = self
            .rest
            .post("/api/v2/mix/order/batch-cancel-orders", &body)
            .await?;
        Ok(())
    }

    async fn cancel_all(&self, symbol: &str) -> VenueResult<()> {
        let body = serde_json::json!({
            "symbol": symbol,
            "productType": PRODUCT_TYPE,
            "marginCoin": MARGIN_COIN,
        });
        let _ack: serde_json::Value = self
            .rest
            .post("/api/v2/mix/order/cancel-all-orders", &body)
            .await?;
        Ok(())
    }

    async fn open_orders(&self, symbol: &str) -> VenueResult<Vec<OrderResult>> {
        let raw: RawPendingList = self
            .rest
            .get(&format!(
                "/api/v2/mix/order/orders-pending?symbol={symbol}&productType={PRODUCT_TYPE}"
            ))
            .await?;
        raw.entrusted_list
            .unwrap_or_default()
            .into_iter()
            .map(RawOrderDetail::into_order_result)
            .collect()
    }

    async fn get_order(&self, symbol: &str, order_id: &str) -> VenueResult<OrderResult> {
        let raw: RawOrderDetail = self
            .rest
            .get(&format!(
                "/api/v2/mix/order/detail?symbol={symbol}&productType={PRODUCT_TYPE}&orderId={order_id}"
            ))
            .await?;
        raw.into_order_result()
    }

    async fn start_trade_stream(&self, symbol: &str) -> VenueResult<mpsc::Receiver<TradeTick>> {
        let (tx, rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);
        let sink = stream::StreamSink::Trade { symbol: symbol.to_string(), tx };
        tokio::spawn(stream::run_stream(
            self.public_ws_url.clone(),
            self.stream_config.clone(),
            self.root_token.child_token(),
            sink,
        ));
        Ok(rx)
    }

    async fn start_order_stream(&self, tx: mpsc::Sender<OrderUpdate>) -> VenueResult<()> {
        let token = self.root_token.child_token();
        {
            let mut slot = self.order_stream_token.lock();
            if let Some(existing) = slot.take() {
                existing.cancel();
            }
            *slot = Some(token.clone());
        }
        let sink = stream::StreamSink::Orders { signer: self.signer.clone(), tx };
        tokio::spawn(stream::run_stream(
            self.private_ws_url.clone(),
            self.stream_config.clone(),
            token,
            sink,
        ));
        Ok(())
    }

    fn stop_order_stream(&self) {
        if let Some(token) = self.order_stream_token.lock().take() {
            token.cancel();
        }
    }

    async fn start_candle_stream(
        &self,
        symbols: &[String],
        interval: &str,
    ) -> VenueResult<mpsc::Receiver<Candle>> {
        let (tx, rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);
        let sink = stream::StreamSink::Candle {
            symbols: symbols.to_vec(),
            channel: format!("candle{interval}"),
            tx,
            pending: std::collections::HashMap::new(),
        };
        tokio::spawn(stream::run_stream(
            self.public_ws_url.clone(),
            self.stream_config.clone(),
            self.root_token.child_token(),
            sink,
        ));
        Ok(rx)
    }
}
