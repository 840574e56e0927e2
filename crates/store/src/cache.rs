//! Cache sink for sub-second price signals
//!
//! Publishes latest price, latest order book summary and the freshest
//! indicator bundle under TTL-bounded keys for strategy consumers. The write
//! path is queue-backed and non-blocking; losing cache writes is explicitly
//! acceptable (this is a cache, not a log), so the queue only complains when
//! the drop rate gets very high.

use crate::error::Result;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use marketflow_core::{OrderBook, Settings, Timeframe};
use marketflow_queue::{DropPolicy, Enqueue, Handler, WorkerQueue};
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use rust_decimal::Decimal;
use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// TTL for every signal key
pub const SIGNAL_TTL_SECONDS: u64 = 60;

/// Cache queue close timeout
const CACHE_CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// One queued cache write
struct CacheCommand {
    key: String,
    value: String,
    ttl_seconds: Option<u64>,
}

/// Queue-backed cache writer with direct read operations
pub struct CacheSink {
    manager: ConnectionManager,
    queue: WorkerQueue<CacheCommand>,
}

impl CacheSink {
    /// Connect to the cache and start the worker pool.
    pub async fn connect(settings: &Settings) -> Result<Self> {
        let client = redis::Client::open(settings.cache.url())?;
        let manager = ConnectionManager::new(client).await?;

        let handler: Handler<CacheCommand> = {
            let manager = manager.clone();
            Arc::new(move |command: CacheCommand| {
                let mut manager = manager.clone();
                async move {
                    match command.ttl_seconds {
                        Some(ttl) => {
                            let _: () = manager
                                .set_ex(&command.key, &command.value, ttl as u64)
                                .await?;
                        }
                        None => {
                            let _: () = manager.set(&command.key, &command.value).await?;
                        }
                    }
                    Ok(())
                }
                .boxed()
            })
        };

        let policy = DropPolicy {
            warn_per_sec: Some(settings.cache_queue.warn_drops_per_sec),
            panic_per_sec: None,
        };
        let queue = WorkerQueue::new(
            "cache",
            settings.cache_queue.queue_size,
            settings.cache_queue.workers,
            policy,
            CACHE_CLOSE_TIMEOUT,
            handler,
        );

        info!(
            workers = settings.cache_queue.workers,
            queue_size = settings.cache_queue.queue_size,
            "cache sink started"
        );

        Ok(Self { manager, queue })
    }

    /// Queue a SET with TTL. Non-blocking; a full queue drops the write.
    pub fn enqueue_set(&self, key: String, value: String, ttl_seconds: Option<u64>) -> Enqueue {
        self.queue.enqueue(CacheCommand {
            key,
            value,
            ttl_seconds,
        })
    }

    /// Publish the latest trade price for a symbol
    pub fn publish_latest_price(&self, exchange: &str, symbol: &str, price: Decimal) -> Enqueue {
        self.enqueue_set(
            latest_price_key(exchange, symbol),
            price.to_string(),
            Some(SIGNAL_TTL_SECONDS),
        )
    }

    /// Publish a best-bid/best-ask summary of an order book
    pub fn publish_orderbook_summary(&self, book: &OrderBook) -> Enqueue {
        let Some(payload) = orderbook_payload(book) else {
            // One-sided books carry no spread signal
            return Enqueue::Queued;
        };
        self.enqueue_set(
            orderbook_key(&book.exchange, &book.symbol),
            payload.to_string(),
            Some(SIGNAL_TTL_SECONDS),
        )
    }

    /// Publish the freshest indicator bundle for a series
    pub fn publish_indicators(
        &self,
        exchange: &str,
        symbol: &str,
        timeframe: Timeframe,
        timestamp: DateTime<Utc>,
        indicators: &BTreeMap<String, f64>,
    ) -> Enqueue {
        self.enqueue_set(
            indicators_key(exchange, symbol, timeframe),
            indicators_payload(timestamp, indicators).to_string(),
            Some(SIGNAL_TTL_SECONDS),
        )
    }

    /// Get a value by key
    pub async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut manager = self.manager.clone();
        Ok(manager.get(key).await?)
    }

    /// Set a hash field
    pub async fn hset(&self, name: &str, key: &str, value: &str) -> Result<i64> {
        let mut manager = self.manager.clone();
        Ok(manager.hset(name, key, value).await?)
    }

    /// Get all fields of a hash
    pub async fn hgetall(&self, name: &str) -> Result<HashMap<String, String>> {
        let mut manager = self.manager.clone();
        Ok(manager.hgetall(name).await?)
    }

    /// Delete keys, returning how many existed
    pub async fn delete(&self, keys: &[&str]) -> Result<i64> {
        let mut manager = self.manager.clone();
        Ok(manager.del(keys).await?)
    }

    /// Writes dropped at the queue
    pub fn dropped_count(&self) -> u64 {
        self.queue.dropped_count()
    }

    /// Stop the workers, draining queued writes first
    pub async fn close(&self) {
        self.queue.close().await;
        debug!("cache sink closed");
    }
}

/// `latest_price:{exchange}:{symbol}` -> decimal price as text
pub fn latest_price_key(exchange: &str, symbol: &str) -> String {
    format!("latest_price:{exchange}:{symbol}")
}

/// `orderbook:{exchange}:{symbol}` -> JSON summary
pub fn orderbook_key(exchange: &str, symbol: &str) -> String {
    format!("orderbook:{exchange}:{symbol}")
}

/// `indicators:{exchange}:{symbol}:{timeframe}` -> JSON bundle
pub fn indicators_key(exchange: &str, symbol: &str, timeframe: Timeframe) -> String {
    format!("indicators:{exchange}:{symbol}:{timeframe}")
}

/// Best-bid/ask summary payload; None when either side is empty
pub fn orderbook_payload(book: &OrderBook) -> Option<serde_json::Value> {
    let (bid_price, bid_qty) = book.best_bid()?;
    let (ask_price, ask_qty) = book.best_ask()?;

    Some(json!({
        "best_bid_price": bid_price.to_string(),
        "best_bid_qty": bid_qty.to_string(),
        "best_ask_price": ask_price.to_string(),
        "best_ask_qty": ask_qty.to_string(),
        "spread": (ask_price - bid_price).to_string(),
        "mid_price": ((ask_price + bid_price) / Decimal::TWO).to_string(),
        "timestamp": book.timestamp.to_rfc3339(),
    }))
}

/// Indicator bundle payload: `{timestamp, indicators: {name: value}}`
pub fn indicators_payload(
    timestamp: DateTime<Utc>,
    indicators: &BTreeMap<String, f64>,
) -> serde_json::Value {
    json!({
        "timestamp": timestamp.to_rfc3339(),
        "indicators": indicators,
    })
}
