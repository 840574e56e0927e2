//! Moving average indicators: SMA, EMA, WMA

use crate::error::Result;
use crate::indicator::{Indicator, closes, ema_series, trailing_mean};
use marketflow_core::Candle;
use tracing::warn;

/// Simple Moving Average: mean of the last `period` closes
pub struct Sma {
    name: String,
    period: usize,
}

impl Sma {
    pub fn new(name: impl Into<String>, period: usize) -> Self {
        Self {
            name: name.into(),
            period,
        }
    }
}

impl Indicator for Sma {
    fn name(&self) -> &str {
        &self.name
    }

    fn period(&self) -> usize {
        self.period
    }

    fn calculate(&self, candles: &[Candle]) -> Result<Option<f64>> {
        self.validate_input(candles)?;
        Ok(trailing_mean(&closes(candles), self.period).filter(|v| v.is_finite()))
    }
}

/// Exponential Moving Average, seeded with the SMA of the first period.
///
/// EMA converges from its seed; ~4x the period of history gives accurate
/// values, shorter windows are still defined but biased toward the seed.
pub struct Ema {
    name: String,
    period: usize,
}

impl Ema {
    pub fn new(name: impl Into<String>, period: usize) -> Self {
        Self {
            name: name.into(),
            period,
        }
    }
}

impl Indicator for Ema {
    fn name(&self) -> &str {
        &self.name
    }

    fn period(&self) -> usize {
        self.period
    }

    fn calculate(&self, candles: &[Candle]) -> Result<Option<f64>> {
        self.validate_input(candles)?;

        if candles.len() < self.period * 4 {
            warn!(
                indicator = %self.name,
                got = candles.len(),
                recommended = self.period * 4,
                "short EMA warm-up window"
            );
        }

        let series = ema_series(&closes(candles), self.period);
        Ok(series.last().copied().flatten().filter(|v| v.is_finite()))
    }
}

/// Weighted Moving Average: linear weights, newest close weighted highest
pub struct Wma {
    name: String,
    period: usize,
}

impl Wma {
    pub fn new(name: impl Into<String>, period: usize) -> Self {
        Self {
            name: name.into(),
            period,
        }
    }
}

impl Indicator for Wma {
    fn name(&self) -> &str {
        &self.name
    }

    fn period(&self) -> usize {
        self.period
    }

    fn calculate(&self, candles: &[Candle]) -> Result<Option<f64>> {
        self.validate_input(candles)?;

        let closes = closes(candles);
        let window = &closes[closes.len() - self.period..];
        let weight_sum = (self.period * (self.period + 1)) as f64 / 2.0;
        let weighted: f64 = window
            .iter()
            .enumerate()
            .map(|(i, value)| value * (i + 1) as f64)
            .sum();

        let value = weighted / weight_sum;
        Ok(value.is_finite().then_some(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::series;

    #[test]
    fn test_sma_exact_mean() {
        let candles = series(&[10.0, 20.0, 30.0, 40.0, 50.0]);
        let sma = Sma::new("SMA_5", 5);
        assert_eq!(sma.calculate(&candles).unwrap(), Some(30.0));
    }

    #[test]
    fn test_sma_uses_trailing_window() {
        let candles = series(&[100.0, 10.0, 20.0, 30.0]);
        let sma = Sma::new("SMA_3", 3);
        assert_eq!(sma.calculate(&candles).unwrap(), Some(20.0));
    }

    #[test]
    fn test_sma_not_enough_data() {
        let candles = series(&[10.0, 20.0]);
        let sma = Sma::new("SMA_5", 5);
        let err = sma.calculate(&candles).unwrap_err();
        assert!(err.is_insufficient());
    }

    #[test]
    fn test_sma_empty_input() {
        let sma = Sma::new("SMA_5", 5);
        assert!(sma.calculate(&[]).unwrap_err().is_insufficient());
    }

    #[test]
    fn test_ema_constant_series_equals_constant() {
        let candles = series(&[42.0; 50]);
        let ema = Ema::new("EMA_12", 12);
        let value = ema.calculate(&candles).unwrap().unwrap();
        assert!((value - 42.0).abs() < 1e-9);
    }

    #[test]
    fn test_ema_tracks_rising_series() {
        let closes: Vec<f64> = (0..60).map(|i| 100.0 + i as f64).collect();
        let candles = series(&closes);
        let ema = Ema::new("EMA_12", 12);
        let value = ema.calculate(&candles).unwrap().unwrap();
        // EMA lags the last close but sits inside the recent range
        assert!(value < 159.0);
        assert!(value > 140.0);
    }

    #[test]
    fn test_wma_weights_recent_values() {
        let candles = series(&[10.0, 20.0, 30.0]);
        let wma = Wma::new("WMA_3", 3);
        // (10*1 + 20*2 + 30*3) / 6 = 140/6
        let value = wma.calculate(&candles).unwrap().unwrap();
        assert!((value - 140.0 / 6.0).abs() < 1e-9);
    }

    #[test]
    fn test_results_single_entry() {
        let candles = series(&[10.0, 20.0, 30.0, 40.0, 50.0]);
        let sma = Sma::new("SMA_5", 5);
        let results = sma.results(&candles).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results["SMA_5"], 30.0);
    }
}
