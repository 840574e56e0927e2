//! Stream processor: validated events to the signal cache
//!
//! WebSocket trades are a sampled view of the market, so nothing here goes
//! near the candle tables — the REST sync owns those. This path exists for
//! one thing: sub-second price signals. Validated trades become
//! `latest_price:` keys, validated order books become `orderbook:` summary
//! keys, both with a short TTL.

use marketflow_core::validate::ValidatorStats;
use marketflow_core::{DataValidator, OrderBook, Trade};
use marketflow_store::CacheSink;
use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;
use std::sync::Arc;
use tracing::{debug, warn};

pub struct StreamProcessor {
    cache: Arc<CacheSink>,
    validator: DataValidator,
}

impl StreamProcessor {
    pub fn new(cache: Arc<CacheSink>, spike_threshold_pct: f64) -> Self {
        let threshold = Decimal::from_f64(spike_threshold_pct).unwrap_or(Decimal::TEN);
        Self {
            cache,
            validator: DataValidator::new(threshold),
        }
    }

    /// Validate a trade and publish its price. Invalid trades are dropped
    /// and counted; spikes are warned about inside the validator but still
    /// published (flash events are real prices).
    pub async fn process_trade(&self, trade: Trade) {
        if let Err(e) = self.validator.validate_trade(&trade) {
            warn!(
                exchange = %trade.exchange,
                symbol = %trade.symbol,
                "dropping invalid trade: {e}"
            );
            return;
        }

        let _ = self
            .cache
            .publish_latest_price(&trade.exchange, &trade.symbol, trade.price);
        debug!(
            exchange = %trade.exchange,
            symbol = %trade.symbol,
            price = %trade.price,
            "latest price updated"
        );
    }

    /// Validate an order book and publish its best-bid/ask summary.
    pub async fn process_orderbook(&self, book: OrderBook) {
        if let Err(e) = self.validator.validate_orderbook(&book) {
            warn!(
                exchange = %book.exchange,
                symbol = %book.symbol,
                "dropping invalid orderbook: {e}"
            );
            return;
        }

        let _ = self.cache.publish_orderbook_summary(&book);
        debug!(
            exchange = %book.exchange,
            symbol = %book.symbol,
            "orderbook summary updated"
        );
    }

    /// Validation statistics (spikes observed, events rejected)
    pub fn stats(&self) -> ValidatorStats {
        self.validator.stats()
    }
}
