//! The indicator contract and shared numeric helpers
//!
//! Indicators are pure computations over a window of closed candles. The
//! input convention everywhere is ASCENDING timestamp order (oldest first);
//! every call site and implementation relies on it.

use crate::error::{Error, Result};
use marketflow_core::Candle;
use rust_decimal::prelude::ToPrimitive;
use std::collections::BTreeMap;

/// A technical indicator with parameters frozen at construction.
pub trait Indicator: Send + Sync {
    /// Configured output name (e.g. "SMA_20")
    fn name(&self) -> &str;

    /// Minimum window length for a defined value
    fn period(&self) -> usize;

    /// Reject empty or too-short input.
    fn validate_input(&self, candles: &[Candle]) -> Result<()> {
        if candles.is_empty() {
            return Err(Error::EmptyInput {
                name: self.name().to_string(),
            });
        }
        if candles.len() < self.period() {
            return Err(Error::NotEnoughData {
                name: self.name().to_string(),
                needed: self.period(),
                got: candles.len(),
            });
        }
        Ok(())
    }

    /// Latest single value; None while the computation cannot produce a
    /// finite value yet (warm-up).
    fn calculate(&self, candles: &[Candle]) -> Result<Option<f64>>;

    /// Normalized multi-output surface.
    ///
    /// Single-output indicators return one entry under their configured
    /// name; multi-output indicators (MACD, Stochastic) override this.
    fn results(&self, candles: &[Candle]) -> Result<BTreeMap<String, f64>> {
        let mut map = BTreeMap::new();
        if let Some(value) = self.calculate(candles)? {
            map.insert(self.name().to_string(), value);
        }
        Ok(map)
    }
}

/// Close prices as f64, in input order
pub(crate) fn closes(candles: &[Candle]) -> Vec<f64> {
    candles
        .iter()
        .map(|c| c.close.to_f64().unwrap_or(0.0))
        .collect()
}

/// High prices as f64, in input order
pub(crate) fn highs(candles: &[Candle]) -> Vec<f64> {
    candles
        .iter()
        .map(|c| c.high.to_f64().unwrap_or(0.0))
        .collect()
}

/// Low prices as f64, in input order
pub(crate) fn lows(candles: &[Candle]) -> Vec<f64> {
    candles
        .iter()
        .map(|c| c.low.to_f64().unwrap_or(0.0))
        .collect()
}

/// Mean of the trailing `period` values
pub(crate) fn trailing_mean(values: &[f64], period: usize) -> Option<f64> {
    if period == 0 || values.len() < period {
        return None;
    }
    let window = &values[values.len() - period..];
    Some(window.iter().sum::<f64>() / period as f64)
}

/// Full EMA series seeded with the mean of the first `period` values.
/// Entries before the seed index are None.
pub(crate) fn ema_series(values: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; values.len()];
    if period == 0 || values.len() < period {
        return out;
    }

    let alpha = 2.0 / (period as f64 + 1.0);
    let seed = values[..period].iter().sum::<f64>() / period as f64;
    out[period - 1] = Some(seed);

    let mut prev = seed;
    for i in period..values.len() {
        prev = alpha * values[i] + (1.0 - alpha) * prev;
        out[i] = Some(prev);
    }

    out
}
