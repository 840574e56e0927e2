//! Technical indicator library and scheduled engine
//!
//! Closed-form indicator computations over fixed-length candle windows
//! (SMA, EMA, WMA, RSI, MACD, Stochastic), a registry + loader that builds
//! the configured set, and the [`IndicatorEngine`] that computes and
//! persists results on a schedule.
//!
//! Candle windows are always ASCENDING by timestamp.
//!
//! # Examples
//!
//! ```
//! use marketflow_indicators::moving_averages::Sma;
//! use marketflow_indicators::indicator::Indicator;
//!
//! let sma = Sma::new("SMA_20", 20);
//! assert_eq!(sma.period(), 20);
//! ```

pub mod engine;
pub mod error;
pub mod indicator;
pub mod loader;
pub mod momentum;
pub mod moving_averages;
pub mod persistence;
pub mod registry;

pub use engine::IndicatorEngine;
pub use error::{Error, Result};
pub use indicator::Indicator;
pub use loader::IndicatorSet;
pub use persistence::IndicatorPersistence;

#[cfg(test)]
pub(crate) mod testutil {
    use chrono::{DateTime, TimeZone, Utc};
    use marketflow_core::{Candle, Timeframe};
    use rust_decimal::Decimal;
    use rust_decimal::prelude::FromPrimitive;

    /// One flat candle at a given timestamp
    pub(crate) fn candle_at(timestamp: DateTime<Utc>, close: Decimal) -> Candle {
        Candle {
            timestamp,
            exchange: "binance".to_string(),
            symbol: "BTCUSDT".to_string(),
            timeframe: Timeframe::M1,
            open: close,
            high: close,
            low: close,
            close,
            volume: Decimal::ONE,
            quote_volume: close,
            trades_count: 1,
            is_synthetic: false,
        }
    }

    /// A 1-minute series of flat candles from a list of closes
    pub(crate) fn series(closes: &[f64]) -> Vec<Candle> {
        closes
            .iter()
            .enumerate()
            .map(|(i, &close)| {
                let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
                candle_at(
                    start + chrono::Duration::minutes(i as i64),
                    Decimal::from_f64(close).unwrap_or(Decimal::ZERO),
                )
            })
            .collect()
    }
}
