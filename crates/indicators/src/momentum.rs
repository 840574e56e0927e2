//! Momentum indicators: RSI, MACD, Stochastic

use crate::error::Result;
use crate::indicator::{Indicator, closes, ema_series, highs, lows};
use marketflow_core::Candle;
use std::collections::BTreeMap;

/// Relative Strength Index with Wilder smoothing.
///
/// RS = average gain / average loss over the period,
/// RSI = 100 - 100 / (1 + RS). A series with no losses pins at 100.
pub struct Rsi {
    name: String,
    period: usize,
}

impl Rsi {
    pub fn new(name: impl Into<String>, period: usize) -> Self {
        Self {
            name: name.into(),
            period,
        }
    }
}

impl Indicator for Rsi {
    fn name(&self) -> &str {
        &self.name
    }

    fn period(&self) -> usize {
        self.period
    }

    fn calculate(&self, candles: &[Candle]) -> Result<Option<f64>> {
        self.validate_input(candles)?;

        let closes = closes(candles);
        // Wilder smoothing needs period deltas, hence period + 1 closes
        if closes.len() < self.period + 1 {
            return Ok(None);
        }

        let deltas: Vec<f64> = closes.windows(2).map(|w| w[1] - w[0]).collect();

        let mut avg_gain = deltas[..self.period]
            .iter()
            .map(|d| d.max(0.0))
            .sum::<f64>()
            / self.period as f64;
        let mut avg_loss = deltas[..self.period]
            .iter()
            .map(|d| (-d).max(0.0))
            .sum::<f64>()
            / self.period as f64;

        for delta in &deltas[self.period..] {
            let gain = delta.max(0.0);
            let loss = (-delta).max(0.0);
            avg_gain = (avg_gain * (self.period as f64 - 1.0) + gain) / self.period as f64;
            avg_loss = (avg_loss * (self.period as f64 - 1.0) + loss) / self.period as f64;
        }

        let rsi = if avg_loss == 0.0 {
            100.0
        } else {
            100.0 - 100.0 / (1.0 + avg_gain / avg_loss)
        };

        Ok(rsi.is_finite().then_some(rsi))
    }
}

/// Moving Average Convergence Divergence.
///
/// Line = EMA(fast) - EMA(slow), signal = EMA(signal) of the line,
/// histogram = line - signal.
pub struct Macd {
    name: String,
    fast_period: usize,
    slow_period: usize,
    signal_period: usize,
}

impl Macd {
    pub fn new(
        name: impl Into<String>,
        fast_period: usize,
        slow_period: usize,
        signal_period: usize,
    ) -> Self {
        Self {
            name: name.into(),
            fast_period,
            slow_period,
            signal_period,
        }
    }

    /// All three components, or None during warm-up
    pub fn calculate_full(&self, candles: &[Candle]) -> Result<Option<(f64, f64, f64)>> {
        self.validate_input(candles)?;

        let closes = closes(candles);
        let fast = ema_series(&closes, self.fast_period);
        let slow = ema_series(&closes, self.slow_period);

        // MACD line is defined wherever both EMAs are
        let line: Vec<f64> = fast
            .iter()
            .zip(slow.iter())
            .filter_map(|(f, s)| match (f, s) {
                (Some(f), Some(s)) => Some(f - s),
                _ => None,
            })
            .collect();
        if line.len() < self.signal_period {
            return Ok(None);
        }

        let signal_series = ema_series(&line, self.signal_period);
        let Some(signal) = signal_series.last().copied().flatten() else {
            return Ok(None);
        };
        let macd = line[line.len() - 1];
        let histogram = macd - signal;

        if !macd.is_finite() || !signal.is_finite() {
            return Ok(None);
        }
        Ok(Some((macd, signal, histogram)))
    }
}

impl Indicator for Macd {
    fn name(&self) -> &str {
        &self.name
    }

    fn period(&self) -> usize {
        self.slow_period
    }

    /// Latest histogram value
    fn calculate(&self, candles: &[Candle]) -> Result<Option<f64>> {
        Ok(self.calculate_full(candles)?.map(|(_, _, histogram)| histogram))
    }

    fn results(&self, candles: &[Candle]) -> Result<BTreeMap<String, f64>> {
        let mut map = BTreeMap::new();
        if let Some((macd, signal, histogram)) = self.calculate_full(candles)? {
            map.insert("MACD".to_string(), macd);
            map.insert("MACD_signal".to_string(), signal);
            map.insert("MACD_histogram".to_string(), histogram);
        }
        Ok(map)
    }
}

/// Stochastic Oscillator.
///
/// Fast %K = (close - lowest low) / (highest high - lowest low) x 100 over
/// the %K period, slowed by an SMA; %D is an SMA of the slowed %K.
pub struct Stochastic {
    name: String,
    k_period: usize,
    k_slow_period: usize,
    d_period: usize,
}

impl Stochastic {
    pub fn new(
        name: impl Into<String>,
        k_period: usize,
        k_slow_period: usize,
        d_period: usize,
    ) -> Self {
        Self {
            name: name.into(),
            k_period,
            k_slow_period,
            d_period,
        }
    }

    /// (%K, %D), or None during warm-up
    pub fn calculate_full(&self, candles: &[Candle]) -> Result<Option<(f64, f64)>> {
        self.validate_input(candles)?;

        let highs = highs(candles);
        let lows = lows(candles);
        let closes = closes(candles);

        if closes.len() < self.k_period {
            return Ok(None);
        }

        // Fast %K over each full k-window
        let mut fast_k = Vec::with_capacity(closes.len() - self.k_period + 1);
        for i in (self.k_period - 1)..closes.len() {
            let lo = lows[i + 1 - self.k_period..=i]
                .iter()
                .fold(f64::INFINITY, |a, &b| a.min(b));
            let hi = highs[i + 1 - self.k_period..=i]
                .iter()
                .fold(f64::NEG_INFINITY, |a, &b| a.max(b));
            let range = hi - lo;
            fast_k.push(if range > 0.0 {
                (closes[i] - lo) / range * 100.0
            } else {
                0.0
            });
        }

        let slow_k = sma_over(&fast_k, self.k_slow_period);
        if slow_k.is_empty() {
            return Ok(None);
        }
        let d = sma_over(&slow_k, self.d_period);
        let (Some(&k), Some(&d)) = (slow_k.last(), d.last()) else {
            return Ok(None);
        };

        if !k.is_finite() || !d.is_finite() {
            return Ok(None);
        }
        Ok(Some((k, d)))
    }
}

/// Rolling SMA of `values`; output starts once a full window exists
fn sma_over(values: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || values.len() < period {
        return Vec::new();
    }
    values
        .windows(period)
        .map(|w| w.iter().sum::<f64>() / period as f64)
        .collect()
}

impl Indicator for Stochastic {
    fn name(&self) -> &str {
        &self.name
    }

    fn period(&self) -> usize {
        self.k_period
    }

    /// Latest slowed %K
    fn calculate(&self, candles: &[Candle]) -> Result<Option<f64>> {
        Ok(self.calculate_full(candles)?.map(|(k, _)| k))
    }

    fn results(&self, candles: &[Candle]) -> Result<BTreeMap<String, f64>> {
        let mut map = BTreeMap::new();
        if let Some((k, d)) = self.calculate_full(candles)? {
            map.insert("Stochastic_K".to_string(), k);
            map.insert("Stochastic_D".to_string(), d);
        }
        Ok(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::series;

    #[test]
    fn test_rsi_all_gains_is_100() {
        let closes: Vec<f64> = (0..50).map(|i| 100.0 + i as f64).collect();
        let rsi = Rsi::new("RSI_14", 14);
        let value = rsi.calculate(&series(&closes)).unwrap().unwrap();
        assert!((value - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_rsi_all_losses_is_0() {
        let closes: Vec<f64> = (0..50).map(|i| 200.0 - i as f64).collect();
        let rsi = Rsi::new("RSI_14", 14);
        let value = rsi.calculate(&series(&closes)).unwrap().unwrap();
        assert!(value.abs() < 1e-9);
    }

    #[test]
    fn test_rsi_bounded() {
        // Alternating moves keep RSI strictly inside (0, 100)
        let closes: Vec<f64> = (0..60)
            .map(|i| if i % 2 == 0 { 100.0 } else { 103.0 })
            .collect();
        let rsi = Rsi::new("RSI_14", 14);
        let value = rsi.calculate(&series(&closes)).unwrap().unwrap();
        assert!(value > 0.0 && value < 100.0);
    }

    #[test]
    fn test_rsi_exactly_period_closes_is_warmup() {
        let closes: Vec<f64> = (0..14).map(|i| 100.0 + i as f64).collect();
        let rsi = Rsi::new("RSI_14", 14);
        assert_eq!(rsi.calculate(&series(&closes)).unwrap(), None);
    }

    #[test]
    fn test_macd_constant_series_is_zero() {
        let candles = series(&[100.0; 80]);
        let macd = Macd::new("MACD", 12, 26, 9);
        let (line, signal, histogram) = macd.calculate_full(&candles).unwrap().unwrap();
        assert!(line.abs() < 1e-9);
        assert!(signal.abs() < 1e-9);
        assert!(histogram.abs() < 1e-9);
    }

    #[test]
    fn test_macd_positive_in_uptrend() {
        let closes: Vec<f64> = (0..80).map(|i| 100.0 + i as f64).collect();
        let macd = Macd::new("MACD", 12, 26, 9);
        let (line, _, _) = macd.calculate_full(&series(&closes)).unwrap().unwrap();
        // Fast EMA sits above slow EMA while rising
        assert!(line > 0.0);
    }

    #[test]
    fn test_macd_results_keys() {
        let closes: Vec<f64> = (0..80).map(|i| 100.0 + i as f64).collect();
        let macd = Macd::new("MACD", 12, 26, 9);
        let results = macd.results(&series(&closes)).unwrap();

        assert_eq!(results.len(), 3);
        assert!(results.contains_key("MACD"));
        assert!(results.contains_key("MACD_signal"));
        assert!(results.contains_key("MACD_histogram"));
        let histogram = results["MACD"] - results["MACD_signal"];
        assert!((results["MACD_histogram"] - histogram).abs() < 1e-9);
    }

    #[test]
    fn test_macd_warmup_returns_empty() {
        let candles = series(&[100.0; 30]);
        let macd = Macd::new("MACD", 12, 26, 9);
        // 30 candles give only 5 MACD points, signal needs 9
        assert!(macd.results(&candles).unwrap().is_empty());
    }

    #[test]
    fn test_stochastic_top_of_range() {
        // Close pinned at the running high keeps %K at 100
        let closes: Vec<f64> = (0..40).map(|i| 100.0 + i as f64).collect();
        let stoch = Stochastic::new("Stochastic", 14, 3, 3);
        let (k, d) = stoch.calculate_full(&series(&closes)).unwrap().unwrap();
        assert!((k - 100.0).abs() < 1e-9);
        assert!((d - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_stochastic_flat_range_is_zero() {
        let candles = series(&[100.0; 40]);
        let stoch = Stochastic::new("Stochastic", 14, 3, 3);
        let (k, d) = stoch.calculate_full(&candles).unwrap().unwrap();
        assert_eq!(k, 0.0);
        assert_eq!(d, 0.0);
    }

    #[test]
    fn test_stochastic_results_keys() {
        let closes: Vec<f64> = (0..40).map(|i| 100.0 + i as f64).collect();
        let stoch = Stochastic::new("Stochastic", 14, 3, 3);
        let results = stoch.results(&series(&closes)).unwrap();
        assert!(results.contains_key("Stochastic_K"));
        assert!(results.contains_key("Stochastic_D"));
    }
}
