//! Kraken market-data clients
//!
//! Stream: trade channel plus book channel at depth 10. Kraken data frames
//! are arrays, status frames are objects.
//! REST: `/0/public/OHLC`. Kraken echoes a normalized pair key in the result
//! (XBT/USD becomes XXBTZUSD), so the client takes the first non-`last`
//! entry rather than matching the request string.

use crate::error::{Error, Result};
use crate::rest::{ExchangeRestApi, RateGate, RestConfig, drop_open_intervals};
use crate::stream::{ConnectionState, ExchangeStream, StreamConfig, StreamRouter};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::{SinkExt, StreamExt};
use marketflow_core::{Candle, OrderBook, Side, Timeframe, Trade};
use parking_lot::Mutex as SyncMutex;
use rust_decimal::Decimal;
use serde_json::{Value, json};
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tokio::sync::Notify;
use tokio_tungstenite::connect_async_with_config;
use tokio_tungstenite::tungstenite::protocol::{Message as WsMessage, WebSocketConfig};
use tracing::{debug, error, info, warn};

const KRAKEN_REST_URL: &str = "https://api.kraken.com";
const BOOK_DEPTH: usize = 10;

/// Kraken WebSocket client
pub struct KrakenStream {
    symbols: Vec<String>,
    url: String,
    router: Arc<StreamRouter>,
    running: AtomicBool,
    shutdown: Notify,
    state: SyncMutex<ConnectionState>,
}

impl KrakenStream {
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

    fn subscribe_messages(&self) -> Vec<String> {
        vec![
            json!({
                "event": "subscribe",
                "pair": self.symbols,
                "subscription": {"name": "trade"},
            })
            .to_string(),
            json!({
                "event": "subscribe",
                "pair": self.symbols,
                "subscription": {"name": "book", "depth": BOOK_DEPTH},
            })
            .to_string(),
        ]
    }

    fn handle_message(&self, text: &str) -> Result<()> {
        let data: Value = serde_json::from_str(text)?;

        // Object frames are status/heartbeat/subscription acks
        if data.is_object() {
            return Ok(());
        }

        let Some(frame) = data.as_array() else {
            return Ok(());
        };
        if frame.len() < 4 {
            return Ok(());
        }

        // Book updates with a checksum are 5-element frames where frame[2]
        // is an object: [channelID, data, {"c": checksum}, name, pair]
        let (channel, pair) = if frame[2].is_object() && frame.len() >= 5 {
            (
                frame[3].as_str().unwrap_or_default(),
                frame[4].as_str().unwrap_or_default(),
            )
        } else {
            (
                frame[2].as_str().unwrap_or_default(),
                frame[3].as_str().unwrap_or_default(),
            )
        };

        if channel == "trade" {
            for row in frame[1].as_array().into_iter().flatten() {
                let trade = parse_trade(row, pair)?;
                self.router.publish_trade(trade);
            }
        } else if channel.starts_with("book") {
            let book = parse_orderbook(&frame[1], pair)?;
            self.router.publish_orderbook(book);
        }

        Ok(())
    }
}

#[async_trait]
impl ExchangeStream for KrakenStream {
    fn exchange(&self) -> &'static str {
        "kraken"
    }

    fn router(&self) -> &StreamRouter {
        &self.router
    }

    async fn connect(&self) -> Result<()> {
        info!(symbols = self.symbols.len(), "connecting to Kraken WebSocket");
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

                    let mut subscribed = true;
                    for msg in self.subscribe_messages() {
                        if let Err(e) = write.send(WsMessage::Text(msg.into())).await {
                            error!("kraken subscribe failed: {e}");
                            subscribed = false;
                            break;
                        }
                    }

                    if subscribed {
                        self.set_state(ConnectionState::Connected);
                        info!(symbols = self.symbols.len(), "connected to Kraken WebSocket");

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
                                        error!("kraken pong timeout, reconnecting");
                                        break;
                                    }
                                    if write.send(WsMessage::Ping(Vec::new().into())).await.is_err() {
                                        break;
                                    }
                                }
                                msg = read.next() => match msg {
                                    Some(Ok(WsMessage::Text(text))) => {
                                        if let Err(e) = self.handle_message(&text) {
                                            error!("error processing kraken message: {e}");
                                        }
                                    }
                                    Some(Ok(WsMessage::Ping(payload))) => {
                                        let _ = write.send(WsMessage::Pong(payload)).await;
                                    }
                                    Some(Ok(WsMessage::Pong(_))) => {
                                        last_pong = Instant::now();
                                    }
                                    Some(Ok(WsMessage::Close(_))) => {
                                        warn!("kraken closed the connection");
                                        break;
                                    }
                                    Some(Ok(_)) => {}
                                    Some(Err(e)) => {
                                        error!("kraken websocket error: {e}");
                                        break;
                                    }
                                    None => {
                                        warn!("kraken websocket stream ended");
                                        break;
                                    }
                                }
                            }
                        }
                    }
                }
                Err(e) => {
                    error!("kraken websocket connection error: {e}");
                }
            }

            if self.running.load(Ordering::SeqCst) {
                self.set_state(ConnectionState::Disconnected);
                let backoff = config.reconnect_backoff;
                info!("reconnecting to kraken in {}s", backoff.as_secs());
                tokio::time::sleep(backoff).await;
            }
        }

        self.set_state(ConnectionState::Stopped);
        info!("kraken websocket client stopped");
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

/// Parse one Kraken trade row:
/// `["50000.0","0.1","1640000000.123456","b","l",""]`
/// Kraken provides no trade ID; the timestamp string stands in for one.
pub(crate) fn parse_trade(row: &Value, pair: &str) -> Result<Trade> {
    let arr = row
        .as_array()
        .ok_or_else(|| Error::Parse("kraken trade row is not an array".to_string()))?;
    if arr.len() < 4 {
        return Err(Error::Parse(format!(
            "kraken trade row too short: {} fields",
            arr.len()
        )));
    }

    let time_str = arr[2]
        .as_str()
        .ok_or_else(|| Error::Parse("kraken trade missing time".to_string()))?;
    let timestamp = parse_unix_seconds(time_str)?;

    let side_char = arr[3].as_str().unwrap_or("b");
    let side = if side_char == "b" { Side::Buy } else { Side::Sell };

    Ok(Trade {
        timestamp,
        exchange: "kraken".to_string(),
        symbol: pair.to_string(),
        trade_id: time_str.to_string(),
        price: decimal_at(arr, 0)?,
        quantity: decimal_at(arr, 1)?,
        side,
        // Seller is the maker when the taker bought, and vice versa; Kraken
        // reports the taker side, so maker-buyer means taker sold
        is_buyer_maker: side == Side::Sell,
    })
}

/// Parse Kraken book data (snapshot keys `a`/`b`, update keys `as`/`bs`).
pub(crate) fn parse_orderbook(data: &Value, pair: &str) -> Result<OrderBook> {
    let asks_key = if data.get("as").is_some() { "as" } else { "a" };
    let bids_key = if data.get("bs").is_some() { "bs" } else { "b" };

    Ok(OrderBook {
        timestamp: Utc::now(),
        exchange: "kraken".to_string(),
        symbol: pair.to_string(),
        bids: parse_levels(data.get(bids_key))?,
        asks: parse_levels(data.get(asks_key))?,
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
            let arr = row
                .as_array()
                .ok_or_else(|| Error::Parse("kraken level is not an array".to_string()))?;
            Ok((decimal_at(arr, 0)?, decimal_at(arr, 1)?))
        })
        .collect()
}

fn decimal_at(arr: &[Value], idx: usize) -> Result<Decimal> {
    let raw = arr
        .get(idx)
        .and_then(Value::as_str)
        .ok_or_else(|| Error::Parse(format!("kraken field {idx} missing")))?;
    Decimal::from_str(raw).map_err(|e| Error::Parse(format!("invalid decimal '{raw}': {e}")))
}

/// Parse a "seconds.micros" timestamp string
fn parse_unix_seconds(raw: &str) -> Result<DateTime<Utc>> {
    let seconds: f64 = raw
        .parse()
        .map_err(|e| Error::Parse(format!("invalid kraken time '{raw}': {e}")))?;
    let secs = seconds.trunc() as i64;
    let nanos = (seconds.fract() * 1e9).round() as u32;
    DateTime::<Utc>::from_timestamp(secs, nanos)
        .ok_or_else(|| Error::Parse(format!("kraken time out of range: {raw}")))
}

/// Kraken REST API client for OHLC
pub struct KrakenRest {
    client: reqwest::Client,
    gate: RateGate,
}

impl KrakenRest {
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
        since: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<Candle>> {
        self.gate.wait().await;

        let mut request = self
            .client
            .get(format!("{KRAKEN_REST_URL}/0/public/OHLC"))
            .query(&[
                ("pair", symbol.to_string()),
                ("interval", timeframe.minutes().to_string()),
            ]);
        if let Some(since) = since {
            request = request.query(&[("since", since.timestamp().to_string())]);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(Error::Api(format!(
                "kraken OHLC for {symbol}: HTTP {}",
                response.status()
            )));
        }

        let body: Value = response.json().await?;
        if let Some(errors) = body.get("error").and_then(Value::as_array)
            && !errors.is_empty()
        {
            return Err(Error::Api(format!("kraken OHLC for {symbol}: {errors:?}")));
        }

        let result = body
            .get("result")
            .and_then(Value::as_object)
            .ok_or_else(|| Error::Parse("kraken OHLC missing result".to_string()))?;
        let rows = result
            .iter()
            .find(|(key, _)| key.as_str() != "last")
            .and_then(|(_, v)| v.as_array())
            .ok_or_else(|| Error::Parse(format!("kraken OHLC has no rows for {symbol}")))?;

        let mut candles = rows
            .iter()
            .map(|row| parse_ohlc_row(row, symbol, timeframe))
            .collect::<Result<Vec<_>>>()?;

        candles.sort_by_key(|c| c.timestamp);
        if candles.len() > limit {
            candles.drain(..candles.len() - limit);
        }

        debug!(symbol, timeframe = %timeframe, fetched = candles.len(), "kraken OHLC fetched");
        Ok(drop_open_intervals(candles, timeframe, Utc::now()))
    }
}

/// Parse one OHLC row:
/// `[time, "open", "high", "low", "close", "vwap", "volume", count]`
pub(crate) fn parse_ohlc_row(row: &Value, symbol: &str, timeframe: Timeframe) -> Result<Candle> {
    let arr = row
        .as_array()
        .ok_or_else(|| Error::Parse("kraken OHLC row is not an array".to_string()))?;
    if arr.len() < 8 {
        return Err(Error::Parse(format!(
            "kraken OHLC row too short: {} fields",
            arr.len()
        )));
    }

    let secs = arr[0]
        .as_i64()
        .ok_or_else(|| Error::Parse("kraken OHLC missing time".to_string()))?;
    let timestamp = DateTime::<Utc>::from_timestamp(secs, 0)
        .ok_or_else(|| Error::Parse(format!("invalid kraken OHLC time {secs}")))?;

    let close = decimal_at(arr, 4)?;
    let volume = decimal_at(arr, 6)?;

    Ok(Candle {
        timestamp,
        exchange: "kraken".to_string(),
        symbol: symbol.to_string(),
        timeframe,
        open: decimal_at(arr, 1)?,
        high: decimal_at(arr, 2)?,
        low: decimal_at(arr, 3)?,
        close,
        volume,
        quote_volume: volume * close,
        trades_count: arr[7].as_i64().unwrap_or(0),
        is_synthetic: false,
    })
}

#[async_trait]
impl ExchangeRestApi for KrakenRest {
    fn exchange(&self) -> &'static str {
        "kraken"
    }

    fn supported_timeframes(&self) -> Vec<Timeframe> {
        Timeframe::ALL.to_vec()
    }

    async fn fetch_klines(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        start: DateTime<Utc>,
        _end: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Candle>> {
        self.fetch(symbol, timeframe, Some(start), limit).await
    }

    async fn fetch_latest_klines(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: usize,
    ) -> Result<Vec<Candle>> {
        self.fetch(symbol, timeframe, None, limit).await
    }

    async fn close(&self) {
        debug!("kraken rest client closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_parse_trade_row() {
        let row = serde_json::json!(["50000.00000", "0.10000000", "1640000000.123456", "b", "l", ""]);
        let trade = parse_trade(&row, "XBT/USD").unwrap();

        assert_eq!(trade.exchange, "kraken");
        assert_eq!(trade.symbol, "XBT/USD");
        assert_eq!(trade.price, dec!(50000.00000));
        assert_eq!(trade.quantity, dec!(0.10000000));
        assert_eq!(trade.side, Side::Buy);
        assert!(!trade.is_buyer_maker);
        assert_eq!(trade.trade_id, "1640000000.123456");
        assert_eq!(trade.timestamp.timestamp(), 1640000000);
    }

    #[test]
    fn test_parse_trade_sell_side() {
        let row = serde_json::json!(["50000.0", "0.1", "1640000000.000000", "s", "m", ""]);
        let trade = parse_trade(&row, "XBT/USD").unwrap();
        assert_eq!(trade.side, Side::Sell);
        assert!(trade.is_buyer_maker);
    }

    #[test]
    fn test_parse_book_update_keys() {
        let data = serde_json::json!({
            "bs": [["50000.0", "0.1", "1640000000.1"], ["49999.0", "0.2", "1640000000.2"]],
            "as": [["50001.0", "0.15", "1640000000.3"]]
        });
        let book = parse_orderbook(&data, "XBT/USD").unwrap();

        assert_eq!(book.bids.len(), 2);
        assert_eq!(book.asks.len(), 1);
        assert_eq!(book.bids[0], (dec!(50000.0), dec!(0.1)));
        assert_eq!(book.checksum, 0);
    }

    #[test]
    fn test_parse_book_snapshot_keys() {
        let data = serde_json::json!({
            "b": [["50000.0", "0.1", "1640000000.1"]],
            "a": [["50001.0", "0.15", "1640000000.3"]]
        });
        let book = parse_orderbook(&data, "XBT/USD").unwrap();
        assert_eq!(book.bids.len(), 1);
        assert_eq!(book.asks.len(), 1);
    }

    #[test]
    fn test_message_routing_trade_frame() {
        let stream = KrakenStream::new(
            vec!["XBT/USD".to_string()],
            "wss://ws.kraken.com/",
            StreamConfig::default(),
        );
        // No consumers started: routing must still parse without error
        let frame = r#"[42,[["50000.0","0.1","1640000000.123456","b","l",""]],"trade","XBT/USD"]"#;
        assert!(stream.handle_message(frame).is_ok());

        // Heartbeats are ignored
        assert!(stream.handle_message(r#"{"event":"heartbeat"}"#).is_ok());
    }

    #[test]
    fn test_message_routing_book_frame_with_checksum() {
        let stream = KrakenStream::new(
            vec!["XBT/USD".to_string()],
            "wss://ws.kraken.com/",
            StreamConfig::default(),
        );
        let frame = r#"[42,{"as":[["50001.0","0.1","1640000000.1"]],"bs":[["50000.0","0.1","1640000000.2"]]},{"c":"12345"},"book-10","XBT/USD"]"#;
        assert!(stream.handle_message(frame).is_ok());
    }

    #[test]
    fn test_parse_ohlc_row() {
        let row = serde_json::json!([
            1704067200i64,
            "50000.0",
            "50100.0",
            "49900.0",
            "50050.0",
            "50020.0",
            "10.5",
            150
        ]);
        let candle = parse_ohlc_row(&row, "XBT/USD", Timeframe::M1).unwrap();

        assert_eq!(candle.open, dec!(50000.0));
        assert_eq!(candle.close, dec!(50050.0));
        assert_eq!(candle.volume, dec!(10.5));
        assert_eq!(candle.quote_volume, dec!(10.5) * dec!(50050.0));
        assert_eq!(candle.trades_count, 150);
        assert!(candle.validate().is_ok());
    }

    #[test]
    fn test_parse_unix_seconds_with_micros() {
        let ts = parse_unix_seconds("1640000000.500000").unwrap();
        assert_eq!(ts.timestamp(), 1640000000);
        assert_eq!(ts.timestamp_subsec_millis(), 500);
    }
}
