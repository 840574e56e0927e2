//! Batching writer over the columnar time-series store
//!
//! Two write paths share one connection pool:
//!
//! - The trade path is queue-backed: `enqueue_trades` returns immediately,
//!   workers accumulate envelopes and flush when the accumulated row count
//!   reaches the batch size or a shutdown sentinel arrives. Insert errors on
//!   this path are logged and counted, never surfaced — the caller already
//!   got its answer at enqueue time.
//! - Candle, indicator and query operations are synchronous and surface
//!   errors to the caller.
//!
//! All tables deduplicate on their identity key, so re-submitting the same
//! rows never produces logical duplicates after merge.

use crate::error::Result;
use crate::pool::ConnectionPool;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use marketflow_core::{Candle, IndicatorPoint, Settings, SymbolSpec, Timeframe, Trade};
use marketflow_queue::{DrainHook, DropPolicy, Enqueue, Handler, WorkerQueue};
use rust_decimal::Decimal;
use sqlx::postgres::PgRow;
use sqlx::{FromRow, PgConnection};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info};

/// DB queue close timeout
const DB_CLOSE_TIMEOUT: Duration = Duration::from_secs(15);

/// Database row for OHLCV data
#[derive(Debug, FromRow)]
struct CandleRow {
    timestamp: DateTime<Utc>,
    exchange: String,
    symbol: String,
    open: Decimal,
    high: Decimal,
    low: Decimal,
    close: Decimal,
    volume: Decimal,
    quote_volume: Decimal,
    trades_count: i64,
    is_synthetic: bool,
}

impl CandleRow {
    fn into_candle(self, timeframe: Timeframe) -> Candle {
        Candle {
            timestamp: self.timestamp,
            exchange: self.exchange,
            symbol: self.symbol,
            timeframe,
            open: self.open,
            high: self.high,
            low: self.low,
            close: self.close,
            volume: self.volume,
            quote_volume: self.quote_volume,
            trades_count: self.trades_count,
            is_synthetic: self.is_synthetic,
        }
    }
}

/// Connection-pooled, batching sink over the time-series store
pub struct ColumnarSink {
    pool: Arc<ConnectionPool>,
    queue: WorkerQueue<Vec<Trade>>,
    /// Trades accumulated by the DB workers, flushed at batch size
    pending: Arc<Mutex<Vec<Trade>>>,
    /// Rows lost to failed batch writes (counted against DB drop metrics)
    write_failures: Arc<AtomicU64>,
}

impl ColumnarSink {
    /// Connect the pool and start the DB worker queue.
    pub async fn connect(settings: &Settings) -> Result<Self> {
        let pool = Arc::new(
            ConnectionPool::connect(&settings.store.dsn(), settings.store_pool_size()).await?,
        );
        let pending: Arc<Mutex<Vec<Trade>>> = Arc::new(Mutex::new(Vec::new()));
        let write_failures = Arc::new(AtomicU64::new(0));
        let batch_size = settings.db_queue.batch_size;

        let handler: Handler<Vec<Trade>> = {
            let pool = pool.clone();
            let pending = pending.clone();
            let write_failures = write_failures.clone();
            Arc::new(move |trades| {
                let pool = pool.clone();
                let pending = pending.clone();
                let write_failures = write_failures.clone();
                async move {
                    let batch = {
                        let mut pending = pending.lock().await;
                        pending.extend(trades);
                        if pending.len() >= batch_size {
                            Some(std::mem::take(&mut *pending))
                        } else {
                            None
                        }
                    };
                    if let Some(batch) = batch {
                        flush_trades(&pool, batch, &write_failures).await;
                    }
                    Ok(())
                }
                .boxed()
            })
        };

        let drain: DrainHook = {
            let pool = pool.clone();
            let pending = pending.clone();
            let write_failures = write_failures.clone();
            Arc::new(move || {
                let pool = pool.clone();
                let pending = pending.clone();
                let write_failures = write_failures.clone();
                async move {
                    let batch = std::mem::take(&mut *pending.lock().await);
                    if !batch.is_empty() {
                        flush_trades(&pool, batch, &write_failures).await;
                    }
                }
                .boxed()
            })
        };

        let policy = DropPolicy {
            warn_per_sec: Some(0.0),
            panic_per_sec: Some(settings.db_queue.panic_drops_per_sec),
        };
        let queue = WorkerQueue::with_drain(
            "db",
            settings.db_queue.queue_size,
            settings.db_queue.workers,
            policy,
            DB_CLOSE_TIMEOUT,
            handler,
            Some(drain),
        );

        info!(
            workers = settings.db_queue.workers,
            queue_size = settings.db_queue.queue_size,
            batch_size,
            "columnar sink started"
        );

        Ok(Self {
            pool,
            queue,
            pending,
            write_failures,
        })
    }

    /// Queue a batch envelope of trades for background insertion.
    ///
    /// Non-blocking; returns the number queued, 0 when the envelope was
    /// dropped at capacity.
    pub fn enqueue_trades(&self, trades: Vec<Trade>) -> usize {
        if trades.is_empty() {
            return 0;
        }
        let count = trades.len();
        match self.queue.enqueue(trades) {
            Enqueue::Queued => count,
            Enqueue::Dropped => 0,
        }
    }

    /// Upsert candles into the timeframe's table. Synchronous; errors
    /// surface to the caller.
    pub async fn insert_candles(&self, candles: &[Candle], timeframe: Timeframe) -> Result<u64> {
        if candles.is_empty() {
            return Ok(0);
        }

        let mut conn = self.pool.acquire().await?;
        match insert_candles_on(&mut conn, candles, timeframe).await {
            Ok(count) => {
                self.pool.release(conn);
                debug!(count, table = timeframe.table(), "candles upserted");
                Ok(count)
            }
            Err(e) => {
                self.pool.poison(conn).await;
                Err(e)
            }
        }
    }

    /// Expand an indicator map into normalized rows and upsert them.
    pub async fn insert_indicators(
        &self,
        exchange: &str,
        symbol: &str,
        timeframe: Timeframe,
        timestamp: DateTime<Utc>,
        indicators: &BTreeMap<String, f64>,
    ) -> Result<u64> {
        if indicators.is_empty() {
            return Ok(0);
        }

        let mut conn = self.pool.acquire().await?;
        match insert_indicators_on(&mut conn, exchange, symbol, timeframe, timestamp, indicators)
            .await
        {
            Ok(count) => {
                self.pool.release(conn);
                debug!(count, exchange, symbol, "indicators upserted");
                Ok(count)
            }
            Err(e) => {
                self.pool.poison(conn).await;
                Err(e)
            }
        }
    }

    /// Query candles in ascending timestamp order.
    ///
    /// The open (current) interval is always excluded: only rows strictly
    /// before the start of the interval open at `now` are returned.
    pub async fn query_candles(
        &self,
        exchange: &str,
        symbol: &str,
        timeframe: Timeframe,
        limit: usize,
        range: Option<(DateTime<Utc>, DateTime<Utc>)>,
    ) -> Result<Vec<Candle>> {
        let cutoff = timeframe.start_of_current_interval(Utc::now());
        let sql = candle_query_sql(timeframe.table(), range.is_some());

        let mut conn = self.pool.acquire().await?;
        let rows: std::result::Result<Vec<CandleRow>, sqlx::Error> = {
            let query = sqlx::query_as::<_, CandleRow>(&sql)
                .bind(exchange)
                .bind(symbol)
                .bind(cutoff);
            let query = match range {
                Some((start, end)) => query.bind(start).bind(end).bind(limit as i64),
                None => query.bind(limit as i64),
            };
            query.fetch_all(&mut conn).await
        };

        match rows {
            Ok(rows) => {
                self.pool.release(conn);
                // Newest-first limit, oldest-first result
                let mut candles: Vec<Candle> = rows
                    .into_iter()
                    .map(|row| row.into_candle(timeframe))
                    .collect();
                candles.reverse();
                Ok(candles)
            }
            Err(e) => {
                self.pool.poison(conn).await;
                Err(e.into())
            }
        }
    }

    /// Generic escape hatch: run raw SQL through the pool.
    pub async fn query(&self, sql: &str) -> Result<Vec<PgRow>> {
        let mut conn = self.pool.acquire().await?;
        match sqlx::query(sql).fetch_all(&mut conn).await {
            Ok(rows) => {
                self.pool.release(conn);
                Ok(rows)
            }
            Err(e) => {
                self.pool.poison(conn).await;
                Err(e.into())
            }
        }
    }

    /// Refresh the symbol_mappings table from configuration.
    pub async fn load_symbol_mappings(
        &self,
        exchange: &str,
        specs: &[SymbolSpec],
    ) -> Result<u64> {
        if specs.is_empty() {
            return Ok(0);
        }

        let mut conn = self.pool.acquire().await?;
        match insert_mappings_on(&mut conn, exchange, specs).await {
            Ok(count) => {
                self.pool.release(conn);
                info!(exchange, count, "symbol mappings loaded");
                Ok(count)
            }
            Err(e) => {
                self.pool.poison(conn).await;
                Err(e)
            }
        }
    }

    /// Envelopes dropped at the queue
    pub fn dropped_count(&self) -> u64 {
        self.queue.dropped_count()
    }

    /// Trade rows lost to failed batch writes
    pub fn write_failures(&self) -> u64 {
        self.write_failures.load(Ordering::Relaxed)
    }

    /// Live pool capacity
    pub fn pool_capacity(&self) -> usize {
        self.pool.capacity()
    }

    /// Stop the workers (flushing batch tails), then drain and close the
    /// pooled connections.
    pub async fn close(&self) {
        self.queue.close().await;

        let leftover = self.pending.lock().await.len();
        if leftover > 0 {
            error!(leftover, "trades still pending after drain");
        }

        self.pool.close().await;
        info!("columnar sink closed");
    }
}

/// Batch-insert trades, swallowing errors into the failure counter.
async fn flush_trades(pool: &ConnectionPool, batch: Vec<Trade>, failures: &AtomicU64) {
    let count = batch.len();
    let mut conn = match pool.acquire().await {
        Ok(conn) => conn,
        Err(e) => {
            failures.fetch_add(count as u64, Ordering::Relaxed);
            error!(count, "trade batch lost, no store connection: {e}");
            return;
        }
    };

    match insert_trades_on(&mut conn, &batch).await {
        Ok(inserted) => {
            pool.release(conn);
            debug!(inserted, "trade batch flushed");
        }
        Err(e) => {
            failures.fetch_add(count as u64, Ordering::Relaxed);
            error!(count, "trade batch insert failed: {e}");
            pool.poison(conn).await;
        }
    }
}

async fn insert_trades_on(conn: &mut PgConnection, trades: &[Trade]) -> Result<u64> {
    for trade in trades {
        sqlx::query(
            r#"
            INSERT INTO market_trades (
                timestamp, exchange, symbol, trade_id, price, quantity, side, is_buyer_maker
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(trade.timestamp)
        .bind(&trade.exchange)
        .bind(&trade.symbol)
        .bind(&trade.trade_id)
        .bind(trade.price)
        .bind(trade.quantity)
        .bind(trade.side.as_str())
        .bind(trade.is_buyer_maker)
        .execute(&mut *conn)
        .await?;
    }
    Ok(trades.len() as u64)
}

async fn insert_candles_on(
    conn: &mut PgConnection,
    candles: &[Candle],
    timeframe: Timeframe,
) -> Result<u64> {
    let sql = candle_upsert_sql(timeframe.table());
    for candle in candles {
        sqlx::query(&sql)
            .bind(candle.timestamp)
            .bind(&candle.exchange)
            .bind(&candle.symbol)
            .bind(candle.open)
            .bind(candle.high)
            .bind(candle.low)
            .bind(candle.close)
            .bind(candle.volume)
            .bind(candle.quote_volume)
            .bind(candle.trades_count)
            .bind(candle.is_synthetic)
            .execute(&mut *conn)
            .await?;
    }
    Ok(candles.len() as u64)
}

/// Expand an indicator map into one normalized row per output name
fn expand_indicator_rows(
    exchange: &str,
    symbol: &str,
    timeframe: Timeframe,
    timestamp: DateTime<Utc>,
    indicators: &BTreeMap<String, f64>,
) -> Vec<IndicatorPoint> {
    indicators
        .iter()
        .map(|(name, value)| IndicatorPoint {
            timestamp,
            exchange: exchange.to_string(),
            symbol: symbol.to_string(),
            timeframe,
            indicator_name: name.clone(),
            indicator_value: *value,
        })
        .collect()
}

async fn insert_indicators_on(
    conn: &mut PgConnection,
    exchange: &str,
    symbol: &str,
    timeframe: Timeframe,
    timestamp: DateTime<Utc>,
    indicators: &BTreeMap<String, f64>,
) -> Result<u64> {
    let rows = expand_indicator_rows(exchange, symbol, timeframe, timestamp, indicators);
    for row in &rows {
        sqlx::query(
            r#"
            INSERT INTO indicators (
                timestamp, exchange, symbol, timeframe, indicator_name, indicator_value
            )
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (exchange, symbol, timeframe, indicator_name, timestamp)
            DO UPDATE SET indicator_value = EXCLUDED.indicator_value
            "#,
        )
        .bind(row.timestamp)
        .bind(&row.exchange)
        .bind(&row.symbol)
        .bind(row.timeframe.as_str())
        .bind(&row.indicator_name)
        .bind(row.indicator_value)
        .execute(&mut *conn)
        .await?;
    }
    Ok(rows.len() as u64)
}

async fn insert_mappings_on(
    conn: &mut PgConnection,
    exchange: &str,
    specs: &[SymbolSpec],
) -> Result<u64> {
    for spec in specs {
        sqlx::query(
            r#"
            INSERT INTO symbol_mappings (base_asset, quote_asset, exchange, symbol)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(&spec.base)
        .bind(&spec.quote)
        .bind(exchange)
        .bind(&spec.native)
        .execute(&mut *conn)
        .await?;
    }
    Ok(specs.len() as u64)
}

fn candle_upsert_sql(table: &str) -> String {
    format!(
        r#"
        INSERT INTO {table} (
            timestamp, exchange, symbol, open, high, low, close,
            volume, quote_volume, trades_count, is_synthetic
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        ON CONFLICT (exchange, symbol, timestamp) DO UPDATE
        SET open = EXCLUDED.open,
            high = EXCLUDED.high,
            low = EXCLUDED.low,
            close = EXCLUDED.close,
            volume = EXCLUDED.volume,
            quote_volume = EXCLUDED.quote_volume,
            trades_count = EXCLUDED.trades_count,
            is_synthetic = EXCLUDED.is_synthetic
        "#
    )
}

fn candle_query_sql(table: &str, with_range: bool) -> String {
    let range_clause = if with_range {
        " AND timestamp >= $4 AND timestamp <= $5 ORDER BY timestamp DESC LIMIT $6"
    } else {
        " ORDER BY timestamp DESC LIMIT $4"
    };
    format!(
        "SELECT timestamp, exchange, symbol, open, high, low, close, \
         volume, quote_volume, trades_count, is_synthetic \
         FROM {table} WHERE exchange = $1 AND symbol = $2 AND timestamp < $3{range_clause}"
    )
}
