//! WebSocket pumps for the Bitget public and private streams.
//!
//! Each stream runs as one task owning its connection. On any failure the
//! task reconnects after a bounded delay and re-subscribes; the outbound
//! channel stays open across the gap. Keepalive follows the venue rule:
//! a literal `ping` text frame, answered by a literal `pong`.

use crate::bitget::model::{self, WsFrame};
use crate::error::{VenueError, VenueResult};
use crate::signer::Signer;
use futures_util::{SinkExt, StreamExt};
use sqgrid_core::{Candle, OrderUpdate, TradeTick};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Stream keepalive and reconnect timing.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    pub reconnect_delay: Duration,
    pub ping_interval: Duration,
    pub pong_wait: Duration,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            reconnect_delay: Duration::from_secs(5),
            ping_interval: Duration::from_secs(20),
            pong_wait: Duration::from_secs(60),
        }
    }
}

/// What a stream task subscribes to and where its events go.
pub enum StreamSink {
    Trade {
        symbol: String,
        tx: mpsc::Sender<TradeTick>,
    },
    Candle {
        symbols: Vec<String>,
        /// Venue channel name, e.g. `candle1m`.
        channel: String,
        tx: mpsc::Sender<Candle>,
        /// Last unclosed bar per symbol; emitted as closed when superseded.
        pending: HashMap<String, Candle>,
    },
    Orders {
        signer: Signer,
        tx: mpsc::Sender<OrderUpdate>,
    },
}

impl StreamSink {
    fn subscribe_args(&self) -> Vec<serde_json::Value> {
        match self {
            Self::Trade { symbol, .. } => vec![serde_json::json!({
                "instType": model::PRODUCT_TYPE,
                "channel": "trade",
                "instId": symbol,
            })],
            Self::Candle { symbols, channel, .. } => symbols
                .iter()
                .map(|s| {
                    serde_json::json!({
                        "instType": model::PRODUCT_TYPE,
                        "channel": channel,
                        "instId": s,
                    })
                })
                .collect(),
            Self::Orders { .. } => vec![serde_json::json!({
                "instType": model::PRODUCT_TYPE,
                "channel": "orders",
                "instId": "default",
            })],
        }
    }

    fn signer(&self) -> Option<&Signer> {
        match self {
            Self::Orders { signer, .. } => Some(signer),
            _ => None,
        }
    }

    /// True while the receiving side still exists.
    fn is_open(&self) -> bool {
        match self {
            Self::Trade { tx, .. } => !tx.is_closed(),
            Self::Candle { tx, .. } => !tx.is_closed(),
            Self::Orders { tx, .. } => !tx.is_closed(),
        }
    }

    async fn dispatch(&mut self, frame: WsFrame) {
        let Some(arg) = &frame.arg else { return };
        let Some(channel) = arg.channel.as_deref() else { return };
        let Some(data) = &frame.data else { return };

        match self {
            Self::Trade { symbol, tx } => {
                if channel != "trade" {
                    return;
                }
                let Ok(rows) =
                    serde_json::from_value::<Vec<model::RawTradePush>>(data.clone())
                else {
                    warn!("undecodable trade push");
                    return;
                };
                for row in rows {
                    match row.into_trade_tick(symbol) {
                        Ok(tick) => {
                            if tx.send(tick).await.is_err() {
                                return;
                            }
                        }
                        Err(e) => warn!(?e, "dropping bad trade tick"),
                    }
                }
            }
            Self::Candle { tx, pending, .. } => {
                if !channel.starts_with("candle") {
                    return;
                }
                let Some(symbol) = arg.inst_id.as_deref() else { return };
                let Ok(rows) = serde_json::from_value::<Vec<Vec<serde_json::Value>>>(data.clone())
                else {
                    warn!("undecodable candle push");
                    return;
                };
                // The venue re-pushes the current bar on every trade and
                // never flags closure; a bar is closed once a newer bar
                // for the same symbol appears.
                for row in &rows {
                    let candle = match model::candle_from_row(symbol, row, false) {
                        Ok(c) => c,
                        Err(e) => {
                            warn!(?e, "dropping bad candle row");
                            continue;
                        }
                    };
                    if let Some(prev) = pending.get(symbol) {
                        if candle.open_time_ms > prev.open_time_ms {
                            let mut closed = prev.clone();
                            closed.closed = true;
                            if tx.send(closed).await.is_err() {
                                return;
                            }
                        }
                    }
                    pending.insert(symbol.to_string(), candle);
                }
            }
            Self::Orders { tx, .. } => {
                if channel != "orders" {
                    return;
                }
                let Ok(rows) = serde_json::from_value::<Vec<model::RawOrderPush>>(data.clone())
                else {
                    warn!("undecodable order push");
                    return;
                };
                for row in rows {
                    match row.into_order_update() {
                        Ok(update) => {
                            if tx.send(update).await.is_err() {
                                return;
                            }
                        }
                        Err(e) => warn!(?e, "dropping bad order update"),
                    }
                }
            }
        }
    }
}

/// Run one stream until cancellation or until the consumer goes away.
pub async fn run_stream(
    url: String,
    config: StreamConfig,
    token: CancellationToken,
    mut sink: StreamSink,
) {
    loop {
        if token.is_cancelled() || !sink.is_open() {
            return;
        }

        match connect_once(&url, &config, &token, &mut sink).await {
            Ok(()) => {
                info!(%url, "stream closed");
            }
            Err(e) => {
                error!(%url, ?e, "stream error");
            }
        }

        if token.is_cancelled() {
            return;
        }
        tokio::select! {
            () = tokio::time::sleep(config.reconnect_delay) => {}
            () = token.cancelled() => return,
        }
    }
}

async fn connect_once(
    url: &str,
    config: &StreamConfig,
    token: &CancellationToken,
    sink: &mut StreamSink,
) -> VenueResult<()> {
    info!(%url, "connecting stream");
    let (ws, _) = connect_async(url)
        .await
        .map_err(|e| VenueError::Transient(format!("connect failed: {e}")))?;
    let (mut write, mut read) = ws.split();

    if let Some(signer) = sink.signer() {
        login(&mut write, &mut read, signer).await?;
    }

    let subscribe = serde_json::json!({ "op": "subscribe", "args": sink.subscribe_args() });
    write
        .send(Message::Text(subscribe.to_string()))
        .await
        .map_err(|e| VenueError::Transient(format!("subscribe failed: {e}")))?;

    let mut ping_timer = tokio::time::interval(config.ping_interval);
    let mut last_pong = Instant::now();

    loop {
        tokio::select! {
            () = token.cancelled() => {
                let _ = write.send(Message::Close(None)).await;
                return Ok(());
            }
            _ = ping_timer.tick() => {
                if last_pong.elapsed() > config.pong_wait {
                    return Err(VenueError::Transient("pong timeout".to_string()));
                }
                write
                    .send(Message::Text("ping".to_string()))
                    .await
                    .map_err(|e| VenueError::Transient(format!("ping failed: {e}")))?;
            }
            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if text == "pong" {
                            last_pong = Instant::now();
                            continue;
                        }
                        let frame: WsFrame = match serde_json::from_str(&text) {
                            Ok(f) => f,
                            Err(e) => {
                                warn!(?e, "undecodable stream frame");
                                continue;
                            }
                        };
                        if let Some(event) = frame.event.as_deref() {
                            if event == "error" {
                                warn!(code = ?frame.code, msg = ?frame.msg, "stream error event");
                            } else {
                                debug!(event, "stream event");
                            }
                            continue;
                        }
                        sink.dispatch(frame).await;
                        if !sink.is_open() {
                            return Ok(());
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        write
                            .send(Message::Pong(data))
                            .await
                            .map_err(|e| VenueError::Transient(format!("pong failed: {e}")))?;
                    }
                    Some(Ok(Message::Pong(_))) => {
                        last_pong = Instant::now();
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        return Err(VenueError::Transient("stream closed by venue".to_string()));
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        return Err(VenueError::Transient(format!("stream read error: {e}")));
                    }
                }
            }
        }
    }
}

/// Authenticate the private stream.
///
/// Login signature signs `timestamp + "GET" + "/user/verify"` with the
/// timestamp in Unix seconds.
async fn login<W, R>(write: &mut W, read: &mut R, signer: &Signer) -> VenueResult<()>
where
    W: futures_util::Sink<Message> + Unpin,
    W::Error: std::fmt::Display,
    R: StreamExt<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    let timestamp = chrono::Utc::now().timestamp().to_string();
    let signature = signer.sign(&timestamp, "GET", "/user/verify", "");
    let payload = serde_json::json!({
        "op": "login",
        "args": [{
            "apiKey": signer.api_key(),
            "passphrase": signer.passphrase(),
            "timestamp": timestamp,
            "sign": signature,
        }],
    });
    write
        .send(Message::Text(payload.to_string()))
        .await
        .map_err(|e| VenueError::Transient(format!("login send failed: {e}")))?;

    let deadline = tokio::time::sleep(Duration::from_secs(10));
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            () = &mut deadline => {
                return Err(VenueError::Auth("login timed out".to_string()));
            }
            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if text == "pong" {
                            continue;
                        }
                        let frame: WsFrame = serde_json::from_str(&text)
                            .map_err(|e| VenueError::Malformed(format!("bad login reply: {e}")))?;
                        match frame.event.as_deref() {
                            Some("login") => {
                                info!("private stream authenticated");
                                return Ok(());
                            }
                            Some("error") => {
                                return Err(VenueError::Auth(format!(
                                    "login rejected: {:?} {:?}",
                                    frame.code, frame.msg
                                )));
                            }
                            _ => continue,
                        }
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        return Err(VenueError::Transient(format!("login read error: {e}")));
                    }
                    None => {
                        return Err(VenueError::Transient("stream closed during login".to_string()));
                    }
                }
            }
        }
    }
}
