//! Trade, order book and candle records

use crate::error::{Error, Result};
use crate::types::Timeframe;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Taker side of a trade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "buy",
            Side::Sell => "sell",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Raw market trade event
///
/// A single trade execution on an exchange. Created by the stream clients,
/// consumed within the same process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    /// Trade timestamp (UTC)
    pub timestamp: DateTime<Utc>,
    /// Exchange name (binance, coinbase, kraken)
    pub exchange: String,
    /// Trading pair in the exchange's native format
    pub symbol: String,
    /// Exchange-specific trade ID
    pub trade_id: String,
    pub price: Decimal,
    pub quantity: Decimal,
    /// Taker side
    pub side: Side,
    /// Was the buyer the maker? (true = buyer posted the limit order)
    pub is_buyer_maker: bool,
}

impl Trade {
    /// Structural validation: price and quantity strictly positive.
    ///
    /// Time-dependent checks (clock skew, spikes) live in
    /// [`crate::validate::DataValidator`].
    pub fn validate(&self) -> Result<()> {
        if self.price <= Decimal::ZERO {
            return Err(Error::Validation(format!(
                "Invalid trade price: {} (must be > 0)",
                self.price
            )));
        }
        if self.quantity <= Decimal::ZERO {
            return Err(Error::Validation(format!(
                "Invalid trade quantity: {} (must be > 0)",
                self.quantity
            )));
        }
        Ok(())
    }
}

/// Order book snapshot
///
/// Bids are sorted descending by price, asks ascending; a valid book is
/// never crossed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderBook {
    /// Snapshot timestamp (UTC)
    pub timestamp: DateTime<Utc>,
    pub exchange: String,
    pub symbol: String,
    /// Bid levels as (price, quantity), best first
    pub bids: Vec<(Decimal, Decimal)>,
    /// Ask levels as (price, quantity), best first
    pub asks: Vec<(Decimal, Decimal)>,
    /// Integrity checksum; 0 when the exchange does not provide one
    pub checksum: i64,
}

impl OrderBook {
    /// Best bid (highest buy price), if any
    pub fn best_bid(&self) -> Option<(Decimal, Decimal)> {
        self.bids.first().copied()
    }

    /// Best ask (lowest sell price), if any
    pub fn best_ask(&self) -> Option<(Decimal, Decimal)> {
        self.asks.first().copied()
    }

    /// Bid-ask spread; zero when either side is empty
    pub fn spread(&self) -> Decimal {
        match (self.best_bid(), self.best_ask()) {
            (Some((bid, _)), Some((ask, _))) => ask - bid,
            _ => Decimal::ZERO,
        }
    }

    /// Mid price (average of best bid and ask); zero when either side is empty
    pub fn mid_price(&self) -> Decimal {
        match (self.best_bid(), self.best_ask()) {
            (Some((bid, _)), Some((ask, _))) => (bid + ask) / Decimal::TWO,
            _ => Decimal::ZERO,
        }
    }
}

/// OHLCV candlestick
///
/// Aggregated price data for one timeframe interval. Identity key is
/// (exchange, symbol, timeframe, timestamp); the store deduplicates on merge
/// so re-submitting a candle is always safe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    /// Interval open timestamp (UTC), aligned to the timeframe boundary
    pub timestamp: DateTime<Utc>,
    pub exchange: String,
    pub symbol: String,
    pub timeframe: Timeframe,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    /// Base-asset volume traded in the interval
    pub volume: Decimal,
    /// Quote-asset volume (base volume x representative price)
    pub quote_volume: Decimal,
    /// Number of trades in the interval
    pub trades_count: i64,
    /// Forward-filled placeholder? Synthetic candles are never persisted.
    pub is_synthetic: bool,
}

impl Candle {
    /// OHLCV invariants: positive prices, high/low envelope, non-negative
    /// volume.
    pub fn validate(&self) -> Result<()> {
        if self.open <= Decimal::ZERO
            || self.high <= Decimal::ZERO
            || self.low <= Decimal::ZERO
            || self.close <= Decimal::ZERO
        {
            return Err(Error::Validation(format!(
                "Candle {}/{} @ {} has non-positive price",
                self.exchange, self.symbol, self.timestamp
            )));
        }
        if self.high < self.open.max(self.close).max(self.low) {
            return Err(Error::Validation(format!(
                "Candle {}/{} @ {}: high {} below open/close/low",
                self.exchange, self.symbol, self.timestamp, self.high
            )));
        }
        if self.low > self.open.min(self.close).min(self.high) {
            return Err(Error::Validation(format!(
                "Candle {}/{} @ {}: low {} above open/close/high",
                self.exchange, self.symbol, self.timestamp, self.low
            )));
        }
        if self.volume < Decimal::ZERO {
            return Err(Error::Validation(format!(
                "Candle {}/{} @ {} has negative volume {}",
                self.exchange, self.symbol, self.timestamp, self.volume
            )));
        }
        Ok(())
    }
}

/// A detected hole in a candle series (transient, indicator path only)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GapInfo {
    /// First missing interval
    pub start_time: DateTime<Utc>,
    /// Last missing interval
    pub end_time: DateTime<Utc>,
    /// Number of missing candles
    pub missing_count: usize,
    /// Expected spacing in minutes
    pub expected_interval_minutes: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn candle(open: Decimal, high: Decimal, low: Decimal, close: Decimal) -> Candle {
        Candle {
            timestamp: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            exchange: "binance".to_string(),
            symbol: "BTCUSDT".to_string(),
            timeframe: Timeframe::M1,
            open,
            high,
            low,
            close,
            volume: dec!(10),
            quote_volume: dec!(500000),
            trades_count: 100,
            is_synthetic: false,
        }
    }

    #[test]
    fn test_candle_valid() {
        let c = candle(dec!(50000), dec!(50100), dec!(49900), dec!(50050));
        assert!(c.validate().is_ok());
    }

    #[test]
    fn test_candle_high_below_close() {
        let c = candle(dec!(50000), dec!(50010), dec!(49900), dec!(50050));
        assert!(c.validate().is_err());
    }

    #[test]
    fn test_candle_low_above_open() {
        let c = candle(dec!(50000), dec!(50100), dec!(50010), dec!(50050));
        assert!(c.validate().is_err());
    }

    #[test]
    fn test_candle_negative_volume() {
        let mut c = candle(dec!(50000), dec!(50100), dec!(49900), dec!(50050));
        c.volume = dec!(-1);
        assert!(c.validate().is_err());
    }

    #[test]
    fn test_candle_zero_price() {
        let c = candle(dec!(0), dec!(50100), dec!(49900), dec!(50050));
        assert!(c.validate().is_err());
    }

    #[test]
    fn test_trade_validate() {
        let trade = Trade {
            timestamp: Utc::now(),
            exchange: "binance".to_string(),
            symbol: "BTCUSDT".to_string(),
            trade_id: "1".to_string(),
            price: dec!(50000),
            quantity: dec!(0.5),
            side: Side::Buy,
            is_buyer_maker: false,
        };
        assert!(trade.validate().is_ok());

        let mut bad = trade.clone();
        bad.price = Decimal::ZERO;
        assert!(bad.validate().is_err());

        let mut bad = trade;
        bad.quantity = dec!(-1);
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_orderbook_summary_math() {
        let book = OrderBook {
            timestamp: Utc::now(),
            exchange: "binance".to_string(),
            symbol: "BTCUSDT".to_string(),
            bids: vec![(dec!(50000), dec!(0.1)), (dec!(49999), dec!(0.2))],
            asks: vec![(dec!(50001), dec!(0.15)), (dec!(50002), dec!(0.25))],
            checksum: 0,
        };

        assert_eq!(book.best_bid(), Some((dec!(50000), dec!(0.1))));
        assert_eq!(book.best_ask(), Some((dec!(50001), dec!(0.15))));
        assert_eq!(book.spread(), dec!(1));
        assert_eq!(book.mid_price(), dec!(50000.5));
    }

    #[test]
    fn test_orderbook_empty_side() {
        let book = OrderBook {
            timestamp: Utc::now(),
            exchange: "kraken".to_string(),
            symbol: "XBT/USD".to_string(),
            bids: vec![],
            asks: vec![(dec!(50001), dec!(0.15))],
            checksum: 0,
        };
        assert_eq!(book.best_bid(), None);
        assert_eq!(book.spread(), Decimal::ZERO);
        assert_eq!(book.mid_price(), Decimal::ZERO);
    }

    #[test]
    fn test_side_serde() {
        assert_eq!(serde_json::to_string(&Side::Buy).unwrap(), "\"buy\"");
        let side: Side = serde_json::from_str("\"sell\"").unwrap();
        assert_eq!(side, Side::Sell);
    }
}
