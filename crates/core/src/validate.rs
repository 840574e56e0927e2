//! Real-time data quality validation
//!
//! Validates trades and order books as they come off the stream consumers:
//! - Price and quantity sanity checks
//! - Timestamp validation with clock-skew tolerance
//! - Price spike detection (warn only, never drop)
//! - Order book integrity (sorted sides, no crossed book)

use crate::error::{Error, Result};
use crate::models::{OrderBook, Trade};
use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use std::collections::HashMap;
use tracing::warn;

/// Clock-skew tolerance for trade timestamps
const FUTURE_TOLERANCE_SECS: i64 = 5;

/// Validation statistics
#[derive(Debug, Default, Clone)]
pub struct ValidatorStats {
    /// Price spikes observed (logged, not dropped)
    pub spike_count: u64,
    /// Records rejected as invalid
    pub invalid_count: u64,
    /// Unique (exchange, symbol) keys tracked
    pub symbols_tracked: usize,
}

/// Real-time data quality validator.
///
/// Consumer workers of a single stream client share one validator; races on
/// the spike-detection map are acceptable because spike warnings are
/// advisory.
pub struct DataValidator {
    /// Spike threshold as a percentage (10 = 10%)
    spike_threshold_pct: Decimal,

    /// Last accepted price per "{exchange}:{symbol}"
    last_prices: RwLock<HashMap<String, (Decimal, DateTime<Utc>)>>,

    spike_count: RwLock<u64>,
    invalid_count: RwLock<u64>,
}

impl DataValidator {
    pub fn new(spike_threshold_pct: Decimal) -> Self {
        Self {
            spike_threshold_pct,
            last_prices: RwLock::new(HashMap::new()),
            spike_count: RwLock::new(0),
            invalid_count: RwLock::new(0),
        }
    }

    /// Validate a trade.
    ///
    /// Checks price > 0, quantity > 0 and timestamp within clock-skew
    /// tolerance. A price move above the spike threshold within one second
    /// of the previous same-symbol trade logs a warning but does NOT fail
    /// validation (flash events are real market data).
    pub fn validate_trade(&self, trade: &Trade) -> Result<()> {
        if let Err(e) = trade.validate() {
            *self.invalid_count.write() += 1;
            return Err(e);
        }

        let now = Utc::now();
        if trade.timestamp > now + Duration::seconds(FUTURE_TOLERANCE_SECS) {
            *self.invalid_count.write() += 1;
            return Err(Error::Validation(format!(
                "Future timestamp: {} (now: {})",
                trade.timestamp, now
            )));
        }

        let symbol_key = format!("{}:{}", trade.exchange, trade.symbol);
        if let Some((last_price, last_time)) = self.last_prices.read().get(&symbol_key).copied() {
            let elapsed = trade.timestamp - last_time;
            if elapsed > Duration::zero() && elapsed < Duration::seconds(1) && last_price > Decimal::ZERO {
                let change_pct =
                    ((trade.price - last_price) / last_price * Decimal::ONE_HUNDRED).abs();
                if change_pct > self.spike_threshold_pct {
                    *self.spike_count.write() += 1;
                    warn!(
                        symbol = %trade.symbol,
                        change_pct = %change_pct,
                        from = %last_price,
                        to = %trade.price,
                        "price spike detected"
                    );
                }
            }
        }

        self.last_prices
            .write()
            .insert(symbol_key, (trade.price, trade.timestamp));

        Ok(())
    }

    /// Validate an order book snapshot.
    ///
    /// Checks: both sides non-empty, best bid strictly below best ask, bids
    /// sorted descending, asks sorted ascending, all prices and quantities
    /// strictly positive.
    pub fn validate_orderbook(&self, book: &OrderBook) -> Result<()> {
        if book.bids.is_empty() || book.asks.is_empty() {
            *self.invalid_count.write() += 1;
            return Err(Error::Validation(
                "Empty order book (no bids or asks)".to_string(),
            ));
        }

        let best_bid = book.bids[0].0;
        let best_ask = book.asks[0].0;
        if best_bid >= best_ask {
            *self.invalid_count.write() += 1;
            return Err(Error::Validation(format!(
                "Crossed book: bid={} >= ask={}",
                best_bid, best_ask
            )));
        }

        for (price, qty) in book.bids.iter().chain(book.asks.iter()) {
            if *price <= Decimal::ZERO || *qty <= Decimal::ZERO {
                *self.invalid_count.write() += 1;
                return Err(Error::Validation(format!(
                    "Invalid price/quantity: {}/{}",
                    price, qty
                )));
            }
        }

        for pair in book.bids.windows(2) {
            if pair[0].0 < pair[1].0 {
                *self.invalid_count.write() += 1;
                return Err(Error::Validation(format!(
                    "Bids not sorted descending: {} < {}",
                    pair[0].0, pair[1].0
                )));
            }
        }

        for pair in book.asks.windows(2) {
            if pair[0].0 > pair[1].0 {
                *self.invalid_count.write() += 1;
                return Err(Error::Validation(format!(
                    "Asks not sorted ascending: {} > {}",
                    pair[0].0, pair[1].0
                )));
            }
        }

        Ok(())
    }

    pub fn stats(&self) -> ValidatorStats {
        ValidatorStats {
            spike_count: *self.spike_count.read(),
            invalid_count: *self.invalid_count.read(),
            symbols_tracked: self.last_prices.read().len(),
        }
    }

    pub fn reset_stats(&self) {
        *self.spike_count.write() = 0;
        *self.invalid_count.write() = 0;
    }
}

impl Default for DataValidator {
    fn default() -> Self {
        Self::new(Decimal::TEN)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Side;
    use rust_decimal_macros::dec;

    fn trade(price: Decimal, quantity: Decimal, timestamp: DateTime<Utc>) -> Trade {
        Trade {
            timestamp,
            exchange: "binance".to_string(),
            symbol: "BTCUSDT".to_string(),
            trade_id: "1".to_string(),
            price,
            quantity,
            side: Side::Buy,
            is_buyer_maker: false,
        }
    }

    #[test]
    fn test_valid_trade() {
        let v = DataValidator::default();
        assert!(v.validate_trade(&trade(dec!(50000), dec!(0.1), Utc::now())).is_ok());
        assert_eq!(v.stats().invalid_count, 0);
        assert_eq!(v.stats().symbols_tracked, 1);
    }

    #[test]
    fn test_invalid_price_rejected() {
        let v = DataValidator::default();
        assert!(v.validate_trade(&trade(dec!(0), dec!(0.1), Utc::now())).is_err());
        assert_eq!(v.stats().invalid_count, 1);
    }

    #[test]
    fn test_invalid_quantity_rejected() {
        let v = DataValidator::default();
        assert!(v.validate_trade(&trade(dec!(50000), dec!(0), Utc::now())).is_err());
        assert_eq!(v.stats().invalid_count, 1);
    }

    #[test]
    fn test_future_timestamp_rejected() {
        let v = DataValidator::default();
        let future = Utc::now() + Duration::seconds(30);
        assert!(v.validate_trade(&trade(dec!(50000), dec!(0.1), future)).is_err());
    }

    #[test]
    fn test_clock_skew_tolerated() {
        let v = DataValidator::default();
        let slightly_ahead = Utc::now() + Duration::seconds(2);
        assert!(v.validate_trade(&trade(dec!(50000), dec!(0.1), slightly_ahead)).is_ok());
    }

    #[test]
    fn test_spike_warns_but_passes() {
        let v = DataValidator::default();
        let t0 = Utc::now();

        // 20% jump half a second later: warned, not rejected
        assert!(v.validate_trade(&trade(dec!(50000), dec!(0.1), t0)).is_ok());
        let t1 = t0 + Duration::milliseconds(500);
        assert!(v.validate_trade(&trade(dec!(60000), dec!(0.1), t1)).is_ok());

        let stats = v.stats();
        assert_eq!(stats.spike_count, 1);
        assert_eq!(stats.invalid_count, 0);
    }

    #[test]
    fn test_slow_move_not_a_spike() {
        let v = DataValidator::default();
        let t0 = Utc::now();

        assert!(v.validate_trade(&trade(dec!(50000), dec!(0.1), t0)).is_ok());
        // Same 20% move but 10 seconds later
        let t1 = t0 + Duration::seconds(10);
        assert!(v.validate_trade(&trade(dec!(60000), dec!(0.1), t1)).is_ok());
        assert_eq!(v.stats().spike_count, 0);
    }

    fn book(bids: Vec<(Decimal, Decimal)>, asks: Vec<(Decimal, Decimal)>) -> OrderBook {
        OrderBook {
            timestamp: Utc::now(),
            exchange: "binance".to_string(),
            symbol: "BTCUSDT".to_string(),
            bids,
            asks,
            checksum: 0,
        }
    }

    #[test]
    fn test_valid_orderbook() {
        let v = DataValidator::default();
        let b = book(
            vec![(dec!(50000), dec!(0.1)), (dec!(49999), dec!(0.2))],
            vec![(dec!(50001), dec!(0.1)), (dec!(50002), dec!(0.2))],
        );
        assert!(v.validate_orderbook(&b).is_ok());
    }

    #[test]
    fn test_empty_orderbook_rejected() {
        let v = DataValidator::default();
        assert!(v.validate_orderbook(&book(vec![], vec![(dec!(1), dec!(1))])).is_err());
    }

    #[test]
    fn test_crossed_book_rejected() {
        let v = DataValidator::default();
        let b = book(vec![(dec!(50002), dec!(0.1))], vec![(dec!(50001), dec!(0.1))]);
        assert!(v.validate_orderbook(&b).is_err());
    }

    #[test]
    fn test_unsorted_bids_rejected() {
        let v = DataValidator::default();
        let b = book(
            vec![(dec!(49999), dec!(0.1)), (dec!(50000), dec!(0.2))],
            vec![(dec!(50001), dec!(0.1))],
        );
        assert!(v.validate_orderbook(&b).is_err());
    }

    #[test]
    fn test_unsorted_asks_rejected() {
        let v = DataValidator::default();
        let b = book(
            vec![(dec!(50000), dec!(0.1))],
            vec![(dec!(50002), dec!(0.1)), (dec!(50001), dec!(0.2))],
        );
        assert!(v.validate_orderbook(&b).is_err());
    }

    #[test]
    fn test_non_positive_level_rejected() {
        let v = DataValidator::default();
        let b = book(
            vec![(dec!(50000), dec!(0))],
            vec![(dec!(50001), dec!(0.1))],
        );
        assert!(v.validate_orderbook(&b).is_err());
    }
}
