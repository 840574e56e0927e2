//! Binance market-data clients
//!
//! Stream: combined raw streams (`{symbol}@trade` + `{symbol}@depth@100ms`)
//! normalized into [`Trade`] and [`OrderBook`].
//! REST: `/api/v3/klines` for authoritative OHLCV.

use crate::error::{Error, Result};
use crate::rest::{ExchangeRestApi, RateGate, RestConfig, drop_open_intervals};
use crate::stream::{ConnectionState, ExchangeStream, StreamConfig, StreamRouter};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::{SinkExt, StreamExt};
use marketflow_core::{Candle, OrderBook, Side, Timeframe, Trade};
use parking_lot::Mutex as SyncMutex;
use rust_decimal::Decimal;
use serde_json::Value;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tokio::sync::Notify;
use tokio_tungstenite::connect_async_with_config;
use tokio_tungstenite::tungstenite::protocol::{Message as WsMessage, WebSocketConfig};
use tracing::{debug, error, info, warn};

const BINANCE_REST_URL: &str = "https://api.binance.com";
/// Depth levels kept from each update
const BOOK_DEPTH: usize = 10;

/// Binance WebSocket client
pub struct BinanceStream {
    symbols: Vec<String>,
    base_url: String,
    router: Arc<StreamRouter>,
    url: SyncMutex<Option<String>>,
    running: AtomicBool,
    shutdown: Notify,
    state: SyncMutex<ConnectionState>,
}

impl BinanceStream {
    pub fn new(symbols: Vec<String>, base_url: impl Into<String>, config: StreamConfig) -> Self {
        Self {
            symbols,
            base_url: base_url.into(),
            router: Arc::new(StreamRouter::new(config)),
            url: SyncMutex::new(None),
            running: AtomicBool::new(false),
            shutdown: Notify::new(),
            state: SyncMutex::new(ConnectionState::Disconnected),
        }
    }

    fn set_state(&self, state: ConnectionState) {
        *self.state.lock() = state;
    }

    fn handle_message(&self, text: &str) -> Result<()> {
        let data: Value = serde_json::from_str(text)?;

        match data.get("e").and_then(Value::as_str) {
            Some("trade") => {
                let trade = parse_trade(&data)?;
                self.router.publish_trade(trade);
            }
            Some("depthUpdate") => {
                let book = parse_orderbook(&data)?;
                self.router.publish_orderbook(book);
            }
            other => {
                debug!(event = ?other, "unknown binance event type");
            }
        }

        Ok(())
    }
}

#[async_trait]
impl ExchangeStream for BinanceStream {
    fn exchange(&self) -> &'static str {
        "binance"
    }

    fn router(&self) -> &StreamRouter {
        &self.router
    }

    /// Build the combined stream URL:
    /// `wss://stream.binance.com:9443/ws/btcusdt@trade/btcusdt@depth@100ms/...`
    async fn connect(&self) -> Result<()> {
        let mut streams = Vec::with_capacity(self.symbols.len() * 2);
        for symbol in &self.symbols {
            let lower = symbol.to_lowercase();
            streams.push(format!("{lower}@trade"));
            streams.push(format!("{lower}@depth@100ms"));
        }
        let url = format!("{}/{}", self.base_url.trim_end_matches('/'), streams.join("/"));

        info!(symbols = self.symbols.len(), "connecting to Binance WebSocket");
        *self.url.lock() = Some(url);
        Ok(())
    }

    async fn start(&self) -> Result<()> {
        let url = self.url.lock().clone().ok_or_else(|| {
            Error::WebSocketConnection("connect() must be called before start()".to_string())
        })?;
        self.running.store(true, Ordering::SeqCst);

        let config = self.router.config().clone();

        while self.running.load(Ordering::SeqCst) {
            self.set_state(ConnectionState::Connecting);

            let ws_config =
                WebSocketConfig::default().max_message_size(Some(config.max_message_size));
            match connect_async_with_config(url.as_str(), Some(ws_config), false).await {
                Ok((ws, _)) => {
                    self.set_state(ConnectionState::Connected);
                    info!(symbols = self.symbols.len(), "connected to Binance WebSocket");

                    let (mut write, mut read) = ws.split();
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
                                    error!("binance pong timeout, reconnecting");
                                    break;
                                }
                                if write.send(WsMessage::Ping(Vec::new().into())).await.is_err() {
                                    break;
                                }
                            }
                            msg = read.next() => match msg {
                                Some(Ok(WsMessage::Text(text))) => {
                                    if let Err(e) = self.handle_message(&text) {
                                        error!("error processing binance message: {e}");
                                    }
                                }
                                Some(Ok(WsMessage::Ping(payload))) => {
                                    let _ = write.send(WsMessage::Pong(payload)).await;
                                }
                                Some(Ok(WsMessage::Pong(_))) => {
                                    last_pong = Instant::now();
                                }
                                Some(Ok(WsMessage::Close(_))) => {
                                    warn!("binance closed the connection");
                                    break;
                                }
                                Some(Ok(_)) => {}
                                Some(Err(e)) => {
                                    error!("binance websocket error: {e}");
                                    break;
                                }
                                None => {
                                    warn!("binance websocket stream ended");
                                    break;
                                }
                            }
                        }
                    }
                }
                Err(e) => {
                    error!("binance websocket connection error: {e}");
                }
            }

            if self.running.load(Ordering::SeqCst) {
                self.set_state(ConnectionState::Disconnected);
                let backoff = config.reconnect_backoff;
                info!("reconnecting to binance in {}s", backoff.as_secs());
                tokio::time::sleep(backoff).await;
            }
        }

        self.set_state(ConnectionState::Stopped);
        info!("binance websocket client stopped");
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

/// Parse a Binance trade event.
///
/// ```json
/// {"e":"trade","E":1234567890000,"s":"BTCUSDT","t":12345,
///  "p":"50000.00","q":"0.1","T":1234567890000,"m":true}
/// ```
/// `m = true` means the buyer was the maker, so the taker side is sell.
pub(crate) fn parse_trade(data: &Value) -> Result<Trade> {
    let timestamp_ms = data
        .get("T")
        .and_then(Value::as_i64)
        .ok_or_else(|| Error::Parse("binance trade missing T".to_string()))?;
    let timestamp = DateTime::<Utc>::from_timestamp_millis(timestamp_ms)
        .ok_or_else(|| Error::Parse(format!("invalid binance timestamp {timestamp_ms}")))?;

    let symbol = data
        .get("s")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::Parse("binance trade missing s".to_string()))?;
    let is_buyer_maker = data.get("m").and_then(Value::as_bool).unwrap_or(false);

    Ok(Trade {
        timestamp,
        exchange: "binance".to_string(),
        symbol: symbol.to_string(),
        trade_id: data
            .get("t")
            .and_then(Value::as_i64)
            .map(|id| id.to_string())
            .unwrap_or_default(),
        price: decimal_field(data, "p")?,
        quantity: decimal_field(data, "q")?,
        side: if is_buyer_maker { Side::Sell } else { Side::Buy },
        is_buyer_maker,
    })
}

/// Parse a Binance depth update into an order book view (top 10 levels).
pub(crate) fn parse_orderbook(data: &Value) -> Result<OrderBook> {
    let timestamp_ms = data
        .get("E")
        .and_then(Value::as_i64)
        .ok_or_else(|| Error::Parse("binance depth missing E".to_string()))?;
    let timestamp = DateTime::<Utc>::from_timestamp_millis(timestamp_ms)
        .ok_or_else(|| Error::Parse(format!("invalid binance timestamp {timestamp_ms}")))?;

    let symbol = data
        .get("s")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::Parse("binance depth missing s".to_string()))?;

    Ok(OrderBook {
        timestamp,
        exchange: "binance".to_string(),
        symbol: symbol.to_string(),
        bids: parse_levels(data.get("b"))?,
        asks: parse_levels(data.get("a"))?,
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
                .ok_or_else(|| Error::Parse("depth level missing price".to_string()))?;
            let qty = row
                .get(1)
                .and_then(Value::as_str)
                .ok_or_else(|| Error::Parse("depth level missing quantity".to_string()))?;
            Ok((parse_decimal(price)?, parse_decimal(qty)?))
        })
        .collect()
}

fn decimal_field(data: &Value, key: &str) -> Result<Decimal> {
    let raw = data
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| Error::Parse(format!("binance message missing {key}")))?;
    parse_decimal(raw)
}

fn parse_decimal(raw: &str) -> Result<Decimal> {
    Decimal::from_str(raw).map_err(|e| Error::Parse(format!("invalid decimal '{raw}': {e}")))
}

/// Binance REST API client for klines
pub struct BinanceRest {
    client: reqwest::Client,
    gate: RateGate,
}

impl BinanceRest {
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

    async fn fetch(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<Candle>> {
        self.gate.wait().await;

        let mut request = self
            .client
            .get(format!("{BINANCE_REST_URL}/api/v3/klines"))
            .query(&[
                ("symbol", symbol.to_string()),
                ("interval", timeframe.as_str().to_string()),
                ("limit", limit.to_string()),
            ]);
        if let Some(start) = start {
            request = request.query(&[("startTime", start.timestamp_millis().to_string())]);
        }
        if let Some(end) = end {
            request = request.query(&[("endTime", end.timestamp_millis().to_string())]);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(Error::Api(format!(
                "binance klines for {symbol}: HTTP {}",
                response.status()
            )));
        }

        let rows: Vec<Value> = response.json().await?;
        let candles = rows
            .iter()
            .map(|row| parse_kline_row(row, symbol, timeframe))
            .collect::<Result<Vec<_>>>()?;

        debug!(symbol, timeframe = %timeframe, fetched = candles.len(), "binance klines fetched");
        Ok(drop_open_intervals(candles, timeframe, Utc::now()))
    }
}

/// Parse one `/api/v3/klines` row:
/// `[openTime, open, high, low, close, volume, closeTime, quoteVolume, trades, ...]`
pub(crate) fn parse_kline_row(row: &Value, symbol: &str, timeframe: Timeframe) -> Result<Candle> {
    let arr = row
        .as_array()
        .ok_or_else(|| Error::Parse("binance kline row is not an array".to_string()))?;
    if arr.len() < 9 {
        return Err(Error::Parse(format!(
            "binance kline row too short: {} fields",
            arr.len()
        )));
    }

    let open_ms = arr[0]
        .as_i64()
        .ok_or_else(|| Error::Parse("binance kline missing open time".to_string()))?;
    let timestamp = DateTime::<Utc>::from_timestamp_millis(open_ms)
        .ok_or_else(|| Error::Parse(format!("invalid binance kline time {open_ms}")))?;

    let field = |idx: usize| -> Result<Decimal> {
        let raw = arr[idx]
            .as_str()
            .ok_or_else(|| Error::Parse(format!("binance kline field {idx} not a string")))?;
        parse_decimal(raw)
    };

    Ok(Candle {
        timestamp,
        exchange: "binance".to_string(),
        symbol: symbol.to_string(),
        timeframe,
        open: field(1)?,
        high: field(2)?,
        low: field(3)?,
        close: field(4)?,
        volume: field(5)?,
        quote_volume: field(7)?,
        trades_count: arr[8].as_i64().unwrap_or(0),
        is_synthetic: false,
    })
}

#[async_trait]
impl ExchangeRestApi for BinanceRest {
    fn exchange(&self) -> &'static str {
        "binance"
    }

    fn supported_timeframes(&self) -> Vec<Timeframe> {
        Timeframe::ALL.to_vec()
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
        debug!("binance rest client closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_parse_trade() {
        let data: Value = serde_json::from_str(
            r#"{"e":"trade","E":1700000000500,"s":"BTCUSDT","t":12345,
                "p":"50000.00","q":"0.1","T":1700000000123,"m":true}"#,
        )
        .unwrap();

        let trade = parse_trade(&data).unwrap();
        assert_eq!(trade.exchange, "binance");
        assert_eq!(trade.symbol, "BTCUSDT");
        assert_eq!(trade.trade_id, "12345");
        assert_eq!(trade.price, dec!(50000.00));
        assert_eq!(trade.quantity, dec!(0.1));
        assert_eq!(trade.timestamp.timestamp_millis(), 1700000000123);
        // Buyer is maker, so the taker sold
        assert_eq!(trade.side, Side::Sell);
        assert!(trade.is_buyer_maker);
    }

    #[test]
    fn test_parse_trade_taker_buy() {
        let data: Value = serde_json::from_str(
            r#"{"e":"trade","s":"ETHUSDT","t":7,"p":"3000","q":"1.5","T":1700000000123,"m":false}"#,
        )
        .unwrap();

        let trade = parse_trade(&data).unwrap();
        assert_eq!(trade.side, Side::Buy);
        assert!(!trade.is_buyer_maker);
    }

    #[test]
    fn test_parse_trade_missing_price() {
        let data: Value =
            serde_json::from_str(r#"{"e":"trade","s":"BTCUSDT","T":1700000000123}"#).unwrap();
        assert!(parse_trade(&data).is_err());
    }

    #[test]
    fn test_parse_orderbook() {
        let data: Value = serde_json::from_str(
            r#"{"e":"depthUpdate","E":1700000000123,"s":"BTCUSDT",
                "b":[["50000.00","0.1"],["49999.00","0.2"]],
                "a":[["50001.00","0.15"],["50002.00","0.25"]]}"#,
        )
        .unwrap();

        let book = parse_orderbook(&data).unwrap();
        assert_eq!(book.exchange, "binance");
        assert_eq!(book.bids.len(), 2);
        assert_eq!(book.asks.len(), 2);
        assert_eq!(book.bids[0], (dec!(50000.00), dec!(0.1)));
        assert_eq!(book.asks[0], (dec!(50001.00), dec!(0.15)));
        assert_eq!(book.checksum, 0);
    }

    #[test]
    fn test_parse_orderbook_truncates_depth() {
        let levels: Vec<Vec<String>> = (0..20)
            .map(|i| vec![format!("{}", 50000 - i), "0.1".to_string()])
            .collect();
        let data = serde_json::json!({
            "e": "depthUpdate",
            "E": 1700000000123i64,
            "s": "BTCUSDT",
            "b": levels,
            "a": [["50001.00", "0.1"]],
        });

        let book = parse_orderbook(&data).unwrap();
        assert_eq!(book.bids.len(), BOOK_DEPTH);
    }

    #[test]
    fn test_parse_kline_row() {
        let row = serde_json::json!([
            1704067200000i64,
            "50000.0",
            "50100.0",
            "49900.0",
            "50050.0",
            "10.5",
            1704067259999i64,
            "525000.0",
            150,
            "5.2",
            "260000.0",
            "0"
        ]);

        let candle = parse_kline_row(&row, "BTCUSDT", Timeframe::M1).unwrap();
        assert_eq!(candle.open, dec!(50000.0));
        assert_eq!(candle.high, dec!(50100.0));
        assert_eq!(candle.low, dec!(49900.0));
        assert_eq!(candle.close, dec!(50050.0));
        assert_eq!(candle.volume, dec!(10.5));
        assert_eq!(candle.quote_volume, dec!(525000.0));
        assert_eq!(candle.trades_count, 150);
        assert!(!candle.is_synthetic);
        assert!(candle.validate().is_ok());
    }

    #[test]
    fn test_parse_kline_row_too_short() {
        let row = serde_json::json!([1704067200000i64, "50000.0"]);
        assert!(parse_kline_row(&row, "BTCUSDT", Timeframe::M1).is_err());
    }

    #[test]
    fn test_stream_url_building() {
        let stream = BinanceStream::new(
            vec!["BTCUSDT".to_string(), "ETHUSDT".to_string()],
            "wss://stream.binance.com:9443/ws",
            StreamConfig::default(),
        );

        tokio_test::block_on(stream.connect()).unwrap();
        let url = stream.url.lock().clone().unwrap();
        assert_eq!(
            url,
            "wss://stream.binance.com:9443/ws/btcusdt@trade/btcusdt@depth@100ms/ethusdt@trade/ethusdt@depth@100ms"
        );
    }
}
