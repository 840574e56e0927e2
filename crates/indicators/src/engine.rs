//! Scheduled indicator computation
//!
//! Every `indicator_interval_s` the engine walks each enabled
//! (exchange, symbol, timeframe), loads the recent closed candles from the
//! store, optionally repairs gaps for computation, runs the configured
//! indicator set and persists the combined result to the store and cache.
//! An initial delay lets CandleSync populate first; an optional catch-up
//! pass walks existing history so backfilled candles get indicators too.

use crate::loader::IndicatorSet;
use crate::persistence::IndicatorPersistence;
use marketflow_core::config::IndicatorSettings;
use marketflow_core::{Candle, Settings, Timeframe, gaps};
use marketflow_store::{CacheSink, ColumnarSink};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

/// Catch-up trailing window: each candle is processed with up to 100
/// candles of history, matching the cyclic lookback shape.
const CATCH_UP_WINDOW: usize = 100;

pub struct IndicatorEngine {
    settings: Settings,
    indicators: IndicatorSet,
    persistence: IndicatorPersistence,
    store: Arc<ColumnarSink>,
    running: AtomicBool,
    shutdown: Notify,
}

impl IndicatorEngine {
    pub fn new(settings: Settings, store: Arc<ColumnarSink>, cache: Arc<CacheSink>) -> Self {
        let indicators = IndicatorSet::from_settings(&settings.indicators);
        let persistence = IndicatorPersistence::new(store.clone(), cache);

        Self {
            settings,
            indicators,
            persistence,
            store,
            running: AtomicBool::new(false),
            shutdown: Notify::new(),
        }
    }

    /// Run the engine lifecycle: initial delay, optional catch-up, then the
    /// cyclic compute loop until `stop()`.
    pub async fn start(&self) {
        let interval = Duration::from_secs(self.settings.indicators.interval_s);
        let initial_delay = Duration::from_secs(self.settings.indicators.initial_delay_s);

        info!(
            interval_s = self.settings.indicators.interval_s,
            initial_delay_s = self.settings.indicators.initial_delay_s,
            indicators = self.indicators.len(),
            "indicator engine started"
        );

        self.running.store(true, Ordering::SeqCst);

        // Let CandleSync backfill before the first pass
        self.sleep_interruptible(initial_delay).await;

        if self.settings.indicators.catch_up_enabled && self.running.load(Ordering::SeqCst) {
            self.catch_up().await;
        }

        while self.running.load(Ordering::SeqCst) {
            let started = Instant::now();

            self.compute_cycle().await;

            let elapsed = started.elapsed();
            info!(elapsed_s = format!("{:.2}", elapsed.as_secs_f64()), "indicator cycle complete");

            if let Some(remaining) = interval.checked_sub(elapsed) {
                self.sleep_interruptible(remaining).await;
            }
        }

        info!("indicator engine stopped");
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

    /// One pass over every enabled (exchange, symbol, timeframe)
    async fn compute_cycle(&self) {
        for (exchange_key, config) in self.settings.enabled_exchanges() {
            for symbol in &config.symbols {
                for timeframe in &self.settings.sync.timeframes {
                    if !self.running.load(Ordering::SeqCst) {
                        return;
                    }
                    if let Err(e) = self
                        .process_series(exchange_key, &symbol.native, *timeframe)
                        .await
                    {
                        error!(
                            exchange = %exchange_key,
                            symbol = %symbol.native,
                            timeframe = %timeframe,
                            "failed to process series: {e}"
                        );
                    }
                }
            }
        }
    }

    async fn process_series(
        &self,
        exchange: &str,
        symbol: &str,
        timeframe: Timeframe,
    ) -> marketflow_store::Result<()> {
        let candles = self
            .store
            .query_candles(
                exchange,
                symbol,
                timeframe,
                self.settings.indicators.candle_lookback,
                None,
            )
            .await?;

        if candles.len() < self.settings.indicators.min_candles {
            debug!(
                exchange,
                symbol,
                got = candles.len(),
                needed = self.settings.indicators.min_candles,
                "insufficient candles, skipping"
            );
            return Ok(());
        }

        let Some(candles) =
            prepare_series(candles, timeframe, &self.settings.indicators, exchange, symbol)
        else {
            return Ok(());
        };
        let Some(latest) = candles.last() else {
            return Ok(());
        };
        let latest_timestamp = latest.timestamp;

        let results = self.indicators.compute(&candles);
        if results.is_empty() {
            return Ok(());
        }

        self.persistence
            .save(exchange, symbol, timeframe, latest_timestamp, &results)
            .await;
        Ok(())
    }

    /// Walk existing history so backfilled candles get indicator rows.
    async fn catch_up(&self) {
        info!("starting indicator catch-up over existing candles");
        let min_candles = self.settings.indicators.min_candles;
        let mut processed = 0usize;

        for (exchange_key, config) in self.settings.enabled_exchanges() {
            for symbol in &config.symbols {
                for timeframe in &self.settings.sync.timeframes {
                    if !self.running.load(Ordering::SeqCst) {
                        return;
                    }

                    let candles = match self
                        .store
                        .query_candles(
                            exchange_key,
                            &symbol.native,
                            *timeframe,
                            self.settings.indicators.catch_up_limit,
                            None,
                        )
                        .await
                    {
                        Ok(candles) => candles,
                        Err(e) => {
                            error!(
                                exchange = %exchange_key,
                                symbol = %symbol.native,
                                "catch-up query failed: {e}"
                            );
                            continue;
                        }
                    };

                    if candles.len() < min_candles {
                        continue;
                    }

                    for i in (min_candles - 1)..candles.len() {
                        let window = &candles[i.saturating_sub(CATCH_UP_WINDOW - 1)..=i];
                        let results = self.indicators.compute(window);
                        if results.is_empty() {
                            continue;
                        }

                        self.persistence
                            .save(
                                exchange_key,
                                &symbol.native,
                                *timeframe,
                                candles[i].timestamp,
                                &results,
                            )
                            .await;
                        processed += 1;
                    }

                    info!(
                        exchange = %exchange_key,
                        symbol = %symbol.native,
                        timeframe = %timeframe,
                        candles = candles.len(),
                        "catch-up series complete"
                    );
                }
            }
        }

        info!(processed, "indicator catch-up complete");
    }
}

/// Gap-gate a candle series for computation.
///
/// Returns the series untouched when it is unbroken, forward-filled when
/// gap filling is enabled and the synthetic ratio stays under the
/// threshold, and None when the series should be skipped this cycle.
/// Synthetic candles exist only for computation; they are never persisted.
fn prepare_series(
    candles: Vec<Candle>,
    timeframe: Timeframe,
    settings: &IndicatorSettings,
    exchange: &str,
    symbol: &str,
) -> Option<Vec<Candle>> {
    let detected = gaps::detect_gaps(&candles, timeframe.minutes());
    if detected.is_empty() {
        return Some(candles);
    }

    let missing: usize = detected.iter().map(|g| g.missing_count).sum();
    warn!(
        exchange,
        symbol,
        timeframe = %timeframe,
        gaps = detected.len(),
        missing,
        "gaps detected in candle series"
    );

    if !settings.enable_gap_filling {
        warn!(exchange, symbol, "gap filling disabled, skipping series");
        return None;
    }

    let filled = gaps::fill_gaps(candles, &detected);
    let ratio = gaps::synthetic_ratio(&filled);
    if ratio > settings.max_gap_ratio {
        error!(
            exchange,
            symbol,
            ratio = format!("{ratio:.2}"),
            threshold = settings.max_gap_ratio,
            "gap ratio too high, skipping series"
        );
        return None;
    }

    Some(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::candle_at;
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;

    fn minute(n: u32) -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 9, n, 0).unwrap()
    }

    #[test]
    fn test_prepare_unbroken_series_passthrough() {
        let candles: Vec<Candle> = (0..10).map(|i| candle_at(minute(i), dec!(100))).collect();
        let settings = IndicatorSettings::default();

        let prepared =
            prepare_series(candles.clone(), Timeframe::M1, &settings, "binance", "BTCUSDT")
                .unwrap();
        assert_eq!(prepared, candles);
    }

    #[test]
    fn test_prepare_fills_small_gap() {
        let mut candles: Vec<Candle> = (0..20).map(|i| candle_at(minute(i), dec!(100))).collect();
        // Remove one candle in the middle
        candles.remove(10);
        let settings = IndicatorSettings::default();

        let prepared =
            prepare_series(candles, Timeframe::M1, &settings, "binance", "BTCUSDT").unwrap();
        assert_eq!(prepared.len(), 20);
        assert!(prepared[10].is_synthetic);
        assert_eq!(prepared[10].close, dec!(100));
        assert_eq!(prepared[10].volume, dec!(0));
    }

    #[test]
    fn test_prepare_skips_gappy_series() {
        // Two real candles, 18 missing between them: ratio far over 0.1
        let candles = vec![
            candle_at(minute(0), dec!(100)),
            candle_at(minute(19), dec!(101)),
        ];
        let settings = IndicatorSettings::default();

        assert!(prepare_series(candles, Timeframe::M1, &settings, "binance", "BTCUSDT").is_none());
    }

    #[test]
    fn test_prepare_respects_gap_filling_switch() {
        let mut candles: Vec<Candle> = (0..20).map(|i| candle_at(minute(i), dec!(100))).collect();
        candles.remove(10);

        let mut settings = IndicatorSettings::default();
        settings.enable_gap_filling = false;

        assert!(prepare_series(candles, Timeframe::M1, &settings, "binance", "BTCUSDT").is_none());
    }
}
