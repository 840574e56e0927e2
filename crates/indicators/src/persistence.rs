//! Indicator persistence: cache (hot) + store (cold)
//!
//! Cache first — the bundle feeds strategy consumers and the enqueue is
//! non-blocking anyway — then the normalized rows into the store. A failed
//! store write is logged and the cycle moves on; the next cycle recomputes
//! and re-upserts the same identity keys.

use chrono::{DateTime, Utc};
use marketflow_core::Timeframe;
use marketflow_store::{CacheSink, ColumnarSink};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error, warn};

pub struct IndicatorPersistence {
    store: Arc<ColumnarSink>,
    cache: Arc<CacheSink>,
}

impl IndicatorPersistence {
    pub fn new(store: Arc<ColumnarSink>, cache: Arc<CacheSink>) -> Self {
        Self { store, cache }
    }

    /// Save a combined indicator map for one (exchange, symbol, timeframe)
    /// at one candle timestamp.
    pub async fn save(
        &self,
        exchange: &str,
        symbol: &str,
        timeframe: Timeframe,
        timestamp: DateTime<Utc>,
        indicators: &BTreeMap<String, f64>,
    ) {
        if indicators.is_empty() {
            warn!(exchange, symbol, "no indicators to save");
            return;
        }

        let _ = self
            .cache
            .publish_indicators(exchange, symbol, timeframe, timestamp, indicators);

        match self
            .store
            .insert_indicators(exchange, symbol, timeframe, timestamp, indicators)
            .await
        {
            Ok(count) => {
                debug!(exchange, symbol, count, "indicators persisted");
            }
            Err(e) => {
                error!(exchange, symbol, "indicator store write failed: {e}");
            }
        }
    }
}
