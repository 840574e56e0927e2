//! Exchange REST API surface
//!
//! The REST path is the authoritative candle source: WebSocket trades are a
//! sampled signal, kline endpoints are complete. Each client carries its own
//! rate limiter; CandleSync shares one client per exchange per cycle so the
//! limiter covers every symbol on that exchange.

use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use marketflow_core::config::{ExchangeRateLimits, SyncSettings};
use marketflow_core::{Candle, Timeframe};
use nonzero_ext::nonzero;
use std::num::NonZeroU32;
use std::time::Duration;

/// REST client configuration
#[derive(Debug, Clone)]
pub struct RestConfig {
    pub timeout: Duration,
    pub enable_rate_limit: bool,
    pub requests_per_second: u32,
}

impl RestConfig {
    pub fn from_settings(sync: &SyncSettings, limits: &ExchangeRateLimits) -> Self {
        Self {
            timeout: Duration::from_millis(sync.rest_api_timeout_ms),
            enable_rate_limit: sync.rest_api_enable_rate_limit,
            requests_per_second: limits.requests_per_second,
        }
    }
}

impl Default for RestConfig {
    fn default() -> Self {
        Self::from_settings(&SyncSettings::default(), &ExchangeRateLimits::default())
    }
}

/// Optional request pacing shared by all calls on one client
pub(crate) struct RateGate {
    limiter: Option<DefaultDirectRateLimiter>,
}

impl RateGate {
    pub(crate) fn new(config: &RestConfig) -> Self {
        let limiter = config.enable_rate_limit.then(|| {
            let per_second =
                NonZeroU32::new(config.requests_per_second).unwrap_or(nonzero!(10u32));
            RateLimiter::direct(Quota::per_second(per_second))
        });
        Self { limiter }
    }

    pub(crate) async fn wait(&self) {
        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }
    }
}

/// REST API client for one exchange.
///
/// Both fetch operations return CLOSED intervals only, sorted ascending by
/// timestamp; the current open interval never leaves the client.
#[async_trait]
pub trait ExchangeRestApi: Send + Sync {
    /// Exchange identifier ("binance", "coinbase", "kraken")
    fn exchange(&self) -> &'static str;

    /// Timeframes this exchange can serve
    fn supported_timeframes(&self) -> Vec<Timeframe>;

    /// Fetch candles inside [start, end]
    async fn fetch_klines(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Candle>>;

    /// Fetch the latest `limit` closed candles
    async fn fetch_latest_klines(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: usize,
    ) -> Result<Vec<Candle>>;

    /// Release client resources
    async fn close(&self);
}

/// Drop candles whose interval has not fully elapsed at `now`.
///
/// Kline endpoints include the currently accumulating candle as their last
/// row; only candles with `timestamp + timeframe <= now` are final.
pub(crate) fn drop_open_intervals(
    candles: Vec<Candle>,
    timeframe: Timeframe,
    now: DateTime<Utc>,
) -> Vec<Candle> {
    candles
        .into_iter()
        .filter(|c| c.timestamp + timeframe.chrono_duration() <= now)
        .collect()
}
