//! Scheduled candle synchronization
//!
//! Turns exchange REST kline endpoints into complete, gap-minimized series
//! in the columnar store: an initial backfill on startup (enough history
//! for indicator warm-up), then a cyclic sync of the latest closed candles
//! every `sync_interval_s`.
//!
//! Exchanges run concurrently, symbols sequentially within one exchange:
//! one REST client per exchange per cycle means the exchange's rate limiter
//! is shared across all of its symbols.

pub mod error;

pub use error::{Error, Result};

use futures::future::join_all;
use marketflow_core::config::ExchangeConfig;
use marketflow_core::{Candle, Settings, Timeframe};
use marketflow_exchange::rest::{ExchangeRestApi, RestConfig};
use marketflow_exchange::factory::create_rest_client;
use marketflow_store::ColumnarSink;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

/// Scheduled REST synchronization service
pub struct CandleSync {
    settings: Settings,
    store: Arc<ColumnarSink>,
    running: AtomicBool,
    shutdown: Notify,
}

impl CandleSync {
    pub fn new(settings: Settings, store: Arc<ColumnarSink>) -> Self {
        Self {
            settings,
            store,
            running: AtomicBool::new(false),
            shutdown: Notify::new(),
        }
    }

    /// Run the lifecycle: symbol mappings, initial backfill, then cyclic
    /// sync until `stop()`.
    pub async fn start(&self) {
        let interval = Duration::from_secs(self.settings.sync.interval_s);

        info!(
            interval_s = self.settings.sync.interval_s,
            timeframes = ?self.settings.sync.timeframes,
            fetch_limit = self.settings.sync.fetch_limit,
            "candle sync started"
        );

        self.running.store(true, Ordering::SeqCst);

        self.load_symbol_mappings().await;
        self.backfill_once().await;

        while self.running.load(Ordering::SeqCst) {
            let started = Instant::now();

            self.sync_all_once().await;

            let elapsed = started.elapsed();
            info!(elapsed_s = format!("{:.2}", elapsed.as_secs_f64()), "sync cycle complete");

            // A cycle that overran its interval rolls straight into the next
            if let Some(remaining) = interval.checked_sub(elapsed) {
                self.sleep_interruptible(remaining).await;
            }
        }

        info!("candle sync stopped");
    }

    /// Cooperative stop; the current cycle completes first.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.shutdown.notify_waiters();
    }

    async fn sleep_interruptible(&self, duration: Duration) {
        tokio::select! {
            _ = tokio::time::sleep(duration) => {}
            _ = self.shutdown.notified() => {}
        }
    }

    /// Refresh symbol_mappings from configuration. Failures are logged and
    /// tolerated; the mapping table is advisory metadata.
    async fn load_symbol_mappings(&self) {
        for (key, config) in self.settings.enabled_exchanges() {
            if let Err(e) = self.store.load_symbol_mappings(key, &config.symbols).await {
                error!(exchange = %key, "failed to load symbol mappings: {e}");
            }
        }
    }

    /// Startup backfill: fetch `initial_backfill_limit` candles per
    /// (symbol, timeframe), enough history for indicator warm-up.
    pub async fn backfill_once(&self) {
        let limit = self.settings.sync.initial_backfill_limit;
        info!(limit, "starting initial backfill");

        let (ok, failed) = self.run_pass(limit).await;
        info!(ok, failed, "initial backfill complete");
    }

    /// One sync pass over every enabled (exchange, symbol, timeframe) with
    /// the regular fetch limit.
    pub async fn sync_all_once(&self) {
        let (ok, failed) = self.run_pass(self.settings.sync.fetch_limit).await;
        info!(ok, failed, "sync pass complete");
    }

    /// Exchanges concurrent, symbols sequential within an exchange.
    async fn run_pass(&self, limit: usize) -> (usize, usize) {
        let passes = self
            .settings
            .enabled_exchanges()
            .map(|(key, config)| self.sync_exchange(key, config, limit));

        let results = join_all(passes).await;
        results
            .into_iter()
            .fold((0, 0), |(ok, failed), (o, f)| (ok + o, failed + f))
    }

    /// Sync every symbol of one exchange through a single shared client.
    async fn sync_exchange(
        &self,
        key: &str,
        config: &ExchangeConfig,
        limit: usize,
    ) -> (usize, usize) {
        let rest_config = RestConfig::from_settings(&self.settings.sync, &config.rate_limits);
        let api = match create_rest_client(key, rest_config) {
            Ok(api) => api,
            Err(e) => {
                error!(exchange = %key, "failed to create REST client: {e}");
                return (0, config.symbols.len() * self.settings.sync.timeframes.len());
            }
        };

        let mut ok = 0;
        let mut failed = 0;
        for symbol in &config.symbols {
            if !self.running.load(Ordering::SeqCst) {
                break;
            }
            let (o, f) = self.sync_symbol(api.as_ref(), key, &symbol.native, limit).await;
            ok += o;
            failed += f;
        }

        api.close().await;
        (ok, failed)
    }

    /// Sync one symbol across all configured timeframes. Per-pair failures
    /// are logged and counted; they never abort the pass.
    async fn sync_symbol(
        &self,
        api: &dyn ExchangeRestApi,
        exchange: &str,
        symbol: &str,
        limit: usize,
    ) -> (usize, usize) {
        let supported = api.supported_timeframes();
        let mut ok = 0;
        let mut failed = 0;

        for timeframe in &self.settings.sync.timeframes {
            if !supported.contains(timeframe) {
                debug!(exchange, symbol, timeframe = %timeframe, "timeframe unsupported, skipping");
                continue;
            }

            match api.fetch_latest_klines(symbol, *timeframe, limit).await {
                Ok(candles) if candles.is_empty() => {
                    warn!(exchange, symbol, timeframe = %timeframe, "no candles fetched");
                }
                Ok(candles) => {
                    let rows = sanitize_candles(candles);
                    match self.store.insert_candles(&rows, *timeframe).await {
                        Ok(count) => {
                            debug!(exchange, symbol, timeframe = %timeframe, count, "candles synced");
                            ok += 1;
                        }
                        Err(e) => {
                            error!(exchange, symbol, timeframe = %timeframe, "insert failed: {e}");
                            failed += 1;
                        }
                    }
                }
                Err(e) => {
                    error!(exchange, symbol, timeframe = %timeframe, "fetch failed: {e}");
                    failed += 1;
                }
            }
        }

        (ok, failed)
    }
}

/// Drop rows violating OHLCV invariants and force `is_synthetic = false`:
/// everything this service writes came from an authoritative endpoint.
fn sanitize_candles(candles: Vec<Candle>) -> Vec<Candle> {
    candles
        .into_iter()
        .filter_map(|mut candle| match candle.validate() {
            Ok(()) => {
                candle.is_synthetic = false;
                Some(candle)
            }
            Err(e) => {
                warn!(
                    exchange = %candle.exchange,
                    symbol = %candle.symbol,
                    "dropping invalid candle: {e}"
                );
                None
            }
        })
        .collect()
}
