//! Stream client plumbing shared by all exchanges
//!
//! Every exchange WebSocket client is composed from a [`StreamRouter`]: a
//! callback registry plus a per-client bounded work queue. The reader loop
//! never invokes user callbacks directly — a stalled callback (cache write,
//! validation) would block the reader, miss keepalives and get the session
//! disconnected by the exchange. Instead the reader enqueues normalized
//! events and a pool of consumer workers drains them; bursts are absorbed by
//! the queue and drops are preferred over disconnects.

use crate::error::Result;
use async_trait::async_trait;
use futures::FutureExt;
use futures::future::BoxFuture;
use marketflow_core::config::{StreamQueueSettings, WebSocketSettings};
use marketflow_core::{OrderBook, Trade};
use marketflow_queue::{DropPolicy, Handler, WorkerQueue};
use parking_lot::Mutex as SyncMutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Per-client queue close timeout
const STREAM_CLOSE_TIMEOUT: Duration = Duration::from_secs(10);

/// Connection state of a stream client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Stopped,
}

/// Per-client WebSocket configuration
#[derive(Debug, Clone)]
pub struct StreamConfig {
    pub queue_max_size: usize,
    pub consumer_workers: usize,
    pub ping_interval: Duration,
    pub ping_timeout: Duration,
    pub max_message_size: usize,
    pub orderbook_sample_interval: Duration,
    pub reconnect_backoff: Duration,
    /// Drop rate at which queue-full escalates to panic-grade logging
    pub panic_drops_per_sec: f64,
}

impl StreamConfig {
    pub fn from_settings(ws: &WebSocketSettings, queue: &StreamQueueSettings) -> Self {
        Self {
            queue_max_size: ws.queue_max_size,
            consumer_workers: ws.consumer_workers,
            ping_interval: Duration::from_secs(ws.ping_interval_s),
            ping_timeout: Duration::from_secs(ws.ping_timeout_s),
            max_message_size: ws.max_message_size_mb * 1024 * 1024,
            orderbook_sample_interval: Duration::from_millis(ws.orderbook_sample_interval_ms),
            reconnect_backoff: Duration::from_secs(ws.reconnect_backoff_s),
            panic_drops_per_sec: queue.panic_drops_per_sec,
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self::from_settings(
            &WebSocketSettings::default(),
            &StreamQueueSettings::default(),
        )
    }
}

/// Registered trade callback
pub type TradeCallback = Arc<dyn Fn(Trade) -> BoxFuture<'static, ()> + Send + Sync>;
/// Registered order book callback
pub type OrderBookCallback = Arc<dyn Fn(OrderBook) -> BoxFuture<'static, ()> + Send + Sync>;

/// Normalized event crossing the reader/consumer boundary
pub enum StreamEvent {
    Trade(Trade),
    OrderBook(OrderBook),
}

/// Callback registry + bounded queue + orderbook sample filter.
///
/// Callbacks must be registered before [`StreamRouter::start_consumers`];
/// the consumer pool snapshots the registry when it starts.
pub struct StreamRouter {
    config: StreamConfig,
    trade_callbacks: SyncMutex<Vec<TradeCallback>>,
    book_callbacks: SyncMutex<Vec<OrderBookCallback>>,
    queue: SyncMutex<Option<Arc<WorkerQueue<StreamEvent>>>>,
    /// "{exchange}:{symbol}" -> last accepted orderbook time.
    /// Written only by the single reader loop of the owning client.
    last_book: SyncMutex<HashMap<String, Instant>>,
}

impl StreamRouter {
    pub fn new(config: StreamConfig) -> Self {
        Self {
            config,
            trade_callbacks: SyncMutex::new(Vec::new()),
            book_callbacks: SyncMutex::new(Vec::new()),
            queue: SyncMutex::new(None),
            last_book: SyncMutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// Register a trade callback
    pub fn on_trade(&self, callback: TradeCallback) {
        self.trade_callbacks.lock().push(callback);
    }

    /// Register an order book callback
    pub fn on_orderbook(&self, callback: OrderBookCallback) {
        self.book_callbacks.lock().push(callback);
    }

    /// Start the consumer worker pool.
    ///
    /// Must be called after callbacks are registered and before the reader
    /// loop starts producing.
    pub async fn start_consumers(&self, name: &str) {
        let trades: Arc<Vec<TradeCallback>> = Arc::new(self.trade_callbacks.lock().clone());
        let books: Arc<Vec<OrderBookCallback>> = Arc::new(self.book_callbacks.lock().clone());

        let handler: Handler<StreamEvent> = Arc::new(move |event| {
            let trades = trades.clone();
            let books = books.clone();
            async move {
                match event {
                    StreamEvent::Trade(trade) => {
                        for callback in trades.iter() {
                            callback(trade.clone()).await;
                        }
                    }
                    StreamEvent::OrderBook(book) => {
                        for callback in books.iter() {
                            callback(book.clone()).await;
                        }
                    }
                }
                Ok(())
            }
            .boxed()
        });

        let policy = DropPolicy {
            warn_per_sec: Some(0.0),
            panic_per_sec: Some(self.config.panic_drops_per_sec),
        };
        let queue = WorkerQueue::new(
            format!("stream-{name}"),
            self.config.queue_max_size,
            self.config.consumer_workers,
            policy,
            STREAM_CLOSE_TIMEOUT,
            handler,
        );

        *self.queue.lock() = Some(Arc::new(queue));
        debug!(client = %name, workers = self.config.consumer_workers, "stream consumers started");
    }

    /// Stop the consumer pool, draining queued events first
    pub async fn stop_consumers(&self) {
        let queue = self.queue.lock().take();
        if let Some(queue) = queue {
            queue.close().await;
        }
    }

    /// Enqueue a trade from the reader loop. No pre-filter; drops at
    /// capacity are counted by the queue.
    pub fn publish_trade(&self, trade: Trade) {
        let queue = self.queue.lock().clone();
        if let Some(queue) = queue {
            let _ = queue.enqueue(StreamEvent::Trade(trade));
        }
    }

    /// Enqueue an order book from the reader loop.
    ///
    /// Sample filter: per (exchange, symbol), at most one update per
    /// configured interval; earlier updates inside the window are dropped
    /// silently before ever touching the queue.
    pub fn publish_orderbook(&self, book: OrderBook) {
        if !self.should_sample(&book.exchange, &book.symbol) {
            return;
        }
        let queue = self.queue.lock().clone();
        if let Some(queue) = queue {
            let _ = queue.enqueue(StreamEvent::OrderBook(book));
        }
    }

    fn should_sample(&self, exchange: &str, symbol: &str) -> bool {
        let key = format!("{exchange}:{symbol}");
        let now = Instant::now();
        let mut last = self.last_book.lock();
        match last.get(&key) {
            Some(prev) if now.duration_since(*prev) < self.config.orderbook_sample_interval => {
                false
            }
            _ => {
                last.insert(key, now);
                true
            }
        }
    }

    /// Total events dropped by the consumer queue
    pub fn dropped_count(&self) -> u64 {
        match &*self.queue.lock() {
            Some(queue) => queue.dropped_count(),
            None => 0,
        }
    }
}

/// A persistent WebSocket session against one exchange.
///
/// Implementations own the exchange-specific wire format and normalize it
/// into [`Trade`] and [`OrderBook`] before handing events to their router.
#[async_trait]
pub trait ExchangeStream: Send + Sync {
    /// Exchange identifier ("binance", "coinbase", "kraken")
    fn exchange(&self) -> &'static str;

    /// The router carrying callback registration and the consumer pool
    fn router(&self) -> &StreamRouter;

    /// Build URLs and the subscription plan; does not block on messages
    async fn connect(&self) -> Result<()>;

    /// Reader loop. Runs until `stop()`; on disconnect sleeps the reconnect
    /// backoff and reconnects.
    async fn start(&self) -> Result<()>;

    /// End the reader loop and close the session
    async fn stop(&self);

    /// Current connection state
    fn state(&self) -> ConnectionState;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use marketflow_core::Side;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn trade() -> Trade {
        Trade {
            timestamp: Utc::now(),
            exchange: "binance".to_string(),
            symbol: "BTCUSDT".to_string(),
            trade_id: "1".to_string(),
            price: dec!(50000),
            quantity: dec!(0.1),
            side: Side::Buy,
            is_buyer_maker: false,
        }
    }

    fn book(symbol: &str) -> OrderBook {
        OrderBook {
            timestamp: Utc::now(),
            exchange: "binance".to_string(),
            symbol: symbol.to_string(),
            bids: vec![(dec!(50000), dec!(0.1))],
            asks: vec![(dec!(50001), dec!(0.1))],
            checksum: 0,
        }
    }

    #[tokio::test]
    async fn test_callbacks_receive_published_trades() {
        let router = StreamRouter::new(StreamConfig::default());
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();

        router.on_trade(Arc::new(move |_trade| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
            .boxed()
        }));

        router.start_consumers("test").await;
        for _ in 0..5 {
            router.publish_trade(trade());
        }
        router.stop_consumers().await;

        assert_eq!(seen.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_orderbook_sampling_keeps_one_per_window() {
        let router = StreamRouter::new(StreamConfig::default());
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();

        router.on_orderbook(Arc::new(move |_book| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
            .boxed()
        }));

        router.start_consumers("test").await;
        // 10 rapid updates for the same symbol collapse into 1
        for _ in 0..10 {
            router.publish_orderbook(book("BTCUSDT"));
        }
        // A different symbol has its own window
        router.publish_orderbook(book("ETHUSDT"));
        router.stop_consumers().await;

        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_publish_before_consumers_is_silent() {
        let router = StreamRouter::new(StreamConfig::default());
        router.publish_trade(trade());
        assert_eq!(router.dropped_count(), 0);
    }

    #[test]
    fn test_stream_config_from_settings() {
        let config = StreamConfig::default();
        assert_eq!(config.queue_max_size, 10_000);
        assert_eq!(config.consumer_workers, 3);
        assert_eq!(config.ping_interval, Duration::from_secs(60));
        assert_eq!(config.orderbook_sample_interval, Duration::from_millis(1000));
        assert_eq!(config.reconnect_backoff, Duration::from_secs(5));
        assert_eq!(config.max_message_size, 10 * 1024 * 1024);
    }
}
