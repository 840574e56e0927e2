//! Coinbase market-data clients
//!
//! Stream: ticker channel for trades, level2_batch for order book updates.
//! REST: `/products/{id}/candles` for OHLCV (no trade counts, quote volume
//! approximated from volume x close).

use crate::error::{Error, Result};
use crate::rest::{ExchangeRestApi, RateGate, RestConfig, drop_open_intervals};
use crate::stream::{ConnectionState, ExchangeStream, StreamConfig, StreamRouter};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::{SinkExt, StreamExt};
use marketflow_core::{Candle, OrderBook, Side, Timeframe, Trade};
use parking_lot::Mutex as SyncMutex;
use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;
use serde_json::{Value, json};
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tokio::sync::Notify;
use tokio_tungstenite::connect_async_with_config;
use tokio_tungstenite::tungstenite::protocol::{Message as WsMessage, WebSocketConfig};
use tracing::{debug, error, info, warn};

const COINBASE_REST_URL: &str = "https://api.exchange.coinbase.com";
const BOOK_DEPTH: usize = 10;

/// Coinbase WebSocket client
pub struct CoinbaseStream {
    symbols: Vec<String>,
    url: String,
    router: Arc<StreamRouter>,
    running: AtomicBool,
    shutdown: Notify,
    state: SyncMutex<ConnectionState>,
}

impl CoinbaseStream {
    pub fn new(symbols: Vec<String>, url: impl Into<String>, config: StreamConfig) -> Self {
        Self {
            symbols,
            url: url.into(),
            router: Arc::new(StreamRouter::new(config)),
            running: AtomicBool::new(false),
            shutdown: Notify::new(),
            state: SyncMutex::new(ConnectionState::Disconnected),
        }
    }

    fn set_state(&self, state: ConnectionState) {
        *self.state.lock() = state;
    }

    fn subscribe_message(&self) -> String {
        json!({
            "type": "subscribe",
            "product_ids": self.symbols,
            "channels": ["ticker", "level2_batch"],
        })
        .to_string()
    }

    fn handle_message(&self, text: &str) -> Result<()> {
        let data: Value = serde_json::from_str(text)?;

        match data.get("type").and_then(Value::as_str) {
            Some("ticker") => {
                let trade = parse_trade(&data)?;
                self.router.publish_trade(trade);
            }
            Some("snapshot") | Some("l2update") => {
                let book = parse_orderbook(&data)?;
                self.router.publish_orderbook(book);
            }
            Some("subscriptions") | Some("heartbeat") => {}
            other => {
                debug!(message_type = ?other, "unknown coinbase message type");
            }
        }

        Ok(())
    }
}

#[async_trait]
impl ExchangeStream for CoinbaseStream {
    fn exchange(&self) -> &'static str {
        "coinbase"
    }

    fn router(&self) -> &StreamRouter {
        &self.router
    }

    async fn connect(&self) -> Result<()> {
        info!(symbols = self.symbols.len(), "connecting to Coinbase WebSocket");
        Ok(())
    }

    async fn start(&self) -> Result<()> {
        self.running.store(true, Ordering::SeqCst);

        let config = self.router.config().clone();

        while self.running.load(Ordering::SeqCst) {
            self.set_state(ConnectionState::Connecting);

            let ws_config =
                WebSocketConfig::default().max_message_size(Some(config.max_message_size));
            match connect_async_with_config(self.url.as_str(), Some(ws_config), false).await {
                Ok((ws, _)) => {
                    let (mut write, mut read) = ws.split();

                    if let Err(e) = write
                        .send(WsMessage::Text(self.subscribe_message().into()))
                        .await
                    {
                        error!("coinbase subscribe failed: {e}");
                    } else {
                        self.set_state(ConnectionState::Connected);
                        info!(symbols = self.symbols.len(), "connected to Coinbase WebSocket");

                        let mut ping = tokio::time::interval(config.ping_interval);
                        ping.reset();
                        let mut last_pong = Instant::now();

                        loop {
                            tokio::select! {
                                _ = self.shutdown.notified() => {
                                    let _ = write.send(WsMessage::Close(None)).await;
                                    break;
                                }
                                _ = ping.tick() => {
                                    if last_pong.elapsed() > config.ping_timeout {
                                        error!("coinbase pong timeout, reconnecting");
                                        break;
                                    }
                                    if write.send(WsMessage::Ping(Vec::new().into())).await.is_err() {
                                        break;
                                    }
                                }
                                msg = read.next() => match msg {
                                    Some(Ok(WsMessage::Text(text))) => {
                                        if let Err(e) = self.handle_message(&text) {
                                            error!("error processing coinbase message: {e}");
                                        }
                                    }
                                    Some(Ok(WsMessage::Ping(payload))) => {
                                        let _ = write.send(WsMessage::Pong(payload)).await;
                                    }
                                    Some(Ok(WsMessage::Pong(_))) => {
                                        last_pong = Instant::now();
                                    }
                                    Some(Ok(WsMessage::Close(_))) => {
                                        warn!("coinbase closed the connection");
                                        break;
                                    }
                                    Some(Ok(_)) => {}
                                    Some(Err(e)) => {
                                        error!("coinbase websocket error: {e}");
                                        break;
                                    }
                                    None => {
                                        warn!("coinbase websocket stream ended");
                                        break;
                                    }
                                }
                            }
                        }
                    }
                }
                Err(e) => {
                    error!("coinbase websocket connection error: {e}");
                }
            }

            if self.running.load(Ordering::SeqCst) {
                self.set_state(ConnectionState::Disconnected);
                let backoff = config.reconnect_backoff;
                info!("reconnecting to coinbase in {}s", backoff.as_secs());
                tokio::time::sleep(backoff).await;
            }
        }

        self.set_state(ConnectionState::Stopped);
        info!("coinbase websocket client stopped");
        Ok(())
    }

    async fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.shutdown.notify_waiters();
    }

    fn state(&self) -> ConnectionState {
        *self.state.lock()
    }
}

/// Parse a Coinbase ticker message into a trade.
pub(crate) fn parse_trade(data: &Value) -> Result<Trade> {
    let symbol = data
        .get("product_id")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::Parse("coinbase ticker missing product_id".to_string()))?;
    let time = data
        .get("time")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::Parse("coinbase ticker missing time".to_string()))?;
    let timestamp = DateTime::parse_from_rfc3339(time)
        .map_err(|e| Error::Parse(format!("invalid coinbase time '{time}': {e}")))?
        .with_timezone(&Utc);

    let side = match data.get("side").and_then(Value::as_str) {
        Some("sell") => Side::Sell,
        _ => Side::Buy,
    };

    Ok(Trade {
        timestamp,
        exchange: "coinbase".to_string(),
        symbol: symbol.to_string(),
        trade_id: data
            .get("trade_id")
            .and_then(Value::as_i64)
            .unwrap_or(0)
            .to_string(),
        price: decimal_field(data, "price")?,
        quantity: data
            .get("last_size")
            .and_then(Value::as_str)
            .map(parse_decimal)
            .transpose()?
            .unwrap_or(Decimal::ZERO),
        side,
        // Seller is the maker when the taker side is sell
        is_buyer_maker: side == Side::Sell,
    })
}

/// Parse a Coinbase level2 snapshot or l2update into an order book view.
pub(crate) fn parse_orderbook(data: &Value) -> Result<OrderBook> {
    let symbol = data
        .get("product_id")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::Parse("coinbase level2 missing product_id".to_string()))?;

    let (timestamp, mut bids, mut asks) = if data.get("type").and_then(Value::as_str)
        == Some("snapshot")
    {
        (
            Utc::now(),
            parse_levels(data.get("bids"))?,
            parse_levels(data.get("asks"))?,
        )
    } else {
        let timestamp = data
            .get("time")
            .and_then(Value::as_str)
            .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);

        let mut bids = Vec::new();
        let mut asks = Vec::new();
        for change in data
            .get("changes")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
        {
            let side = change.get(0).and_then(Value::as_str);
            let price = change
                .get(1)
                .and_then(Value::as_str)
                .ok_or_else(|| Error::Parse("coinbase change missing price".to_string()))?;
            let size = change
                .get(2)
                .and_then(Value::as_str)
                .ok_or_else(|| Error::Parse("coinbase change missing size".to_string()))?;
            let level = (parse_decimal(price)?, parse_decimal(size)?);
            match side {
                Some("buy") => bids.push(level),
                _ => asks.push(level),
            }
        }
        (timestamp, bids, asks)
    };

    bids.sort_by(|a, b| b.0.cmp(&a.0));
    asks.sort_by(|a, b| a.0.cmp(&b.0));
    bids.truncate(BOOK_DEPTH);
    asks.truncate(BOOK_DEPTH);

    Ok(OrderBook {
        timestamp,
        exchange: "coinbase".to_string(),
        symbol: symbol.to_string(),
        bids,
        asks,
        checksum: 0,
    })
}

fn parse_levels(levels: Option<&Value>) -> Result<Vec<(Decimal, Decimal)>> {
    let Some(rows) = levels.and_then(Value::as_array) else {
        return Ok(Vec::new());
    };

    rows.iter()
        .take(BOOK_DEPTH)
        .map(|row| {
            let price = row
                .get(0)
                .and_then(Value::as_str)
                .ok_or_else(|| Error::Parse("level missing price".to_string()))?;
            let size = row
                .get(1)
                .and_then(Value::as_str)
                .ok_or_else(|| Error::Parse("level missing size".to_string()))?;
            Ok((parse_decimal(price)?, parse_decimal(size)?))
        })
        .collect()
}

fn decimal_field(data: &Value, key: &str) -> Result<Decimal> {
    let raw = data
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| Error::Parse(format!("coinbase message missing {key}")))?;
    parse_decimal(raw)
}

fn parse_decimal(raw: &str) -> Result<Decimal> {
    Decimal::from_str(raw).map_err(|e| Error::Parse(format!("invalid decimal '{raw}': {e}")))
}

/// Coinbase REST API client for candles
pub struct CoinbaseRest {
    client: reqwest::Client,
    gate: RateGate,
}

impl CoinbaseRest {
    pub fn new(config: RestConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent("marketflow/0.1")
            .build()?;
        Ok(Self {
            gate: RateGate::new(&config),
            client,
        })
    }

    fn granularity(timeframe: Timeframe) -> Result<u32> {
        match timeframe {
            Timeframe::M1 => Ok(60),
            Timeframe::M5 => Ok(300),
            Timeframe::M15 => Ok(900),
            Timeframe::H1 => Ok(3600),
            Timeframe::D1 => Ok(86400),
            other => Err(Error::Api(format!(
                "coinbase does not serve {other} candles"
            ))),
        }
    }

    async fn fetch(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<Candle>> {
        self.gate.wait().await;

        let granularity = Self::granularity(timeframe)?;
        let mut request = self
            .client
            .get(format!("{COINBASE_REST_URL}/products/{symbol}/candles"))
            .query(&[("granularity", granularity.to_string())]);
        if let Some(start) = start {
            request = request.query(&[("start", start.to_rfc3339())]);
        }
        if let Some(end) = end {
            request = request.query(&[("end", end.to_rfc3339())]);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(Error::Api(format!(
                "coinbase candles for {symbol}: HTTP {}",
                response.status()
            )));
        }

        let rows: Vec<Value> = response.json().await?;
        let mut candles = rows
            .iter()
            .map(|row| parse_candle_row(row, symbol, timeframe))
            .collect::<Result<Vec<_>>>()?;

        // Coinbase returns newest first
        candles.sort_by_key(|c| c.timestamp);
        if candles.len() > limit {
            candles.drain(..candles.len() - limit);
        }

        debug!(symbol, timeframe = %timeframe, fetched = candles.len(), "coinbase candles fetched");
        Ok(drop_open_intervals(candles, timeframe, Utc::now()))
    }
}

/// Parse one candle row: `[time, low, high, open, close, volume]` (numbers)
pub(crate) fn parse_candle_row(row: &Value, symbol: &str, timeframe: Timeframe) -> Result<Candle> {
    let arr = row
        .as_array()
        .ok_or_else(|| Error::Parse("coinbase candle row is not an array".to_string()))?;
    if arr.len() < 6 {
        return Err(Error::Parse(format!(
            "coinbase candle row too short: {} fields",
            arr.len()
        )));
    }

    let secs = arr[0]
        .as_i64()
        .ok_or_else(|| Error::Parse("coinbase candle missing time".to_string()))?;
    let timestamp = DateTime::<Utc>::from_timestamp(secs, 0)
        .ok_or_else(|| Error::Parse(format!("invalid coinbase candle time {secs}")))?;

    let field = |idx: usize| -> Result<Decimal> {
        let num = arr[idx]
            .as_f64()
            .ok_or_else(|| Error::Parse(format!("coinbase candle field {idx} not a number")))?;
        Decimal::from_f64(num)
            .ok_or_else(|| Error::Parse(format!("coinbase candle field {idx} out of range")))
    };

    let close = field(4)?;
    let volume = field(5)?;

    Ok(Candle {
        timestamp,
        exchange: "coinbase".to_string(),
        symbol: symbol.to_string(),
        timeframe,
        open: field(3)?,
        high: field(2)?,
        low: field(1)?,
        close,
        volume,
        // Endpoint reports base volume only
        quote_volume: volume * close,
        trades_count: 0,
        is_synthetic: false,
    })
}

#[async_trait]
impl ExchangeRestApi for CoinbaseRest {
    fn exchange(&self) -> &'static str {
        "coinbase"
    }

    fn supported_timeframes(&self) -> Vec<Timeframe> {
        vec![
            Timeframe::M1,
            Timeframe::M5,
            Timeframe::M15,
            Timeframe::H1,
            Timeframe::D1,
        ]
    }

    async fn fetch_klines(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Candle>> {
        self.fetch(symbol, timeframe, Some(start), Some(end), limit).await
    }

    async fn fetch_latest_klines(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: usize,
    ) -> Result<Vec<Candle>> {
        self.fetch(symbol, timeframe, None, None, limit).await
    }

    async fn close(&self) {
        debug!("coinbase rest client closed");
    }
}
