//! Gap detection and forward-filling for candle series
//!
//! Exchange downtime, network issues and maintenance windows leave holes in
//! otherwise regular series. The indicator path detects those holes and,
//! when enabled, forward-fills synthetic candles so the spacing stays
//! uniform for computation. Synthetic candles are never persisted.

use crate::models::{Candle, GapInfo};
use chrono::Duration;
use rust_decimal::Decimal;
use std::collections::BTreeMap;

/// Detect missing candles in a series sorted ascending by timestamp.
///
/// Returns an empty list for fewer than two candles or an unbroken series.
pub fn detect_gaps(candles: &[Candle], expected_interval_minutes: i64) -> Vec<GapInfo> {
    if candles.len() < 2 {
        return Vec::new();
    }

    let expected = Duration::minutes(expected_interval_minutes);
    let mut gaps = Vec::new();

    for pair in candles.windows(2) {
        let actual = pair[1].timestamp - pair[0].timestamp;
        if actual > expected {
            let missing =
                (actual.num_minutes() / expected_interval_minutes).saturating_sub(1) as usize;
            gaps.push(GapInfo {
                start_time: pair[0].timestamp + expected,
                end_time: pair[1].timestamp - expected,
                missing_count: missing,
                expected_interval_minutes,
            });
        }
    }

    gaps
}

/// Forward-fill the detected gaps with synthetic candles.
///
/// Each synthetic candle takes open = high = low = close = the previous
/// close, zero volume, zero trades, `is_synthetic = true`. The input must be
/// sorted ascending; the result is the complete, still-ascending series.
pub fn fill_gaps(candles: Vec<Candle>, gaps: &[GapInfo]) -> Vec<Candle> {
    if gaps.is_empty() {
        return candles;
    }

    let mut by_time: BTreeMap<_, Candle> =
        candles.into_iter().map(|c| (c.timestamp, c)).collect();

    for gap in gaps {
        let interval = Duration::minutes(gap.expected_interval_minutes);
        let Some(last) = by_time.get(&(gap.start_time - interval)).cloned() else {
            continue;
        };
        let last_close = last.close;

        let mut current = gap.start_time;
        while current <= gap.end_time {
            by_time.entry(current).or_insert_with(|| Candle {
                timestamp: current,
                exchange: last.exchange.clone(),
                symbol: last.symbol.clone(),
                timeframe: last.timeframe,
                open: last_close,
                high: last_close,
                low: last_close,
                close: last_close,
                volume: Decimal::ZERO,
                quote_volume: Decimal::ZERO,
                trades_count: 0,
                is_synthetic: true,
            });
            current += interval;
        }
    }

    by_time.into_values().collect()
}

/// Fraction of synthetic candles in a (filled) series
pub fn synthetic_ratio(candles: &[Candle]) -> f64 {
    if candles.is_empty() {
        return 0.0;
    }
    let synthetic = candles.iter().filter(|c| c.is_synthetic).count();
    synthetic as f64 / candles.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Timeframe;
    use chrono::{DateTime, TimeZone, Utc};
    use rust_decimal_macros::dec;

    fn candle_at(ts: DateTime<Utc>, close: Decimal) -> Candle {
        Candle {
            timestamp: ts,
            exchange: "binance".to_string(),
            symbol: "BTCUSDT".to_string(),
            timeframe: Timeframe::M1,
            open: close,
            high: close,
            low: close,
            close,
            volume: dec!(1),
            quote_volume: close,
            trades_count: 10,
            is_synthetic: false,
        }
    }

    fn minute(n: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 9, n, 0).unwrap()
    }

    #[test]
    fn test_no_gaps_in_contiguous_series() {
        let candles: Vec<_> = (0..5).map(|i| candle_at(minute(i), dec!(100))).collect();
        assert!(detect_gaps(&candles, 1).is_empty());
    }

    #[test]
    fn test_detect_single_gap() {
        // 09:00 and 09:05 present, 09:01-09:04 missing
        let candles = vec![candle_at(minute(0), dec!(100)), candle_at(minute(5), dec!(101))];
        let gaps = detect_gaps(&candles, 1);

        assert_eq!(gaps.len(), 1);
        assert_eq!(gaps[0].missing_count, 4);
        assert_eq!(gaps[0].start_time, minute(1));
        assert_eq!(gaps[0].end_time, minute(4));
    }

    #[test]
    fn test_detect_respects_timeframe_spacing() {
        // 5m spacing: 09:00 → 09:05 is NOT a gap
        let candles = vec![candle_at(minute(0), dec!(100)), candle_at(minute(5), dec!(101))];
        assert!(detect_gaps(&candles, 5).is_empty());
    }

    #[test]
    fn test_fill_gaps_forward_fills_previous_close() {
        let candles = vec![candle_at(minute(0), dec!(100)), candle_at(minute(5), dec!(101))];
        let gaps = detect_gaps(&candles, 1);
        let filled = fill_gaps(candles, &gaps);

        assert_eq!(filled.len(), 6);
        for synthetic in &filled[1..5] {
            assert!(synthetic.is_synthetic);
            assert_eq!(synthetic.open, dec!(100));
            assert_eq!(synthetic.high, dec!(100));
            assert_eq!(synthetic.low, dec!(100));
            assert_eq!(synthetic.close, dec!(100));
            assert_eq!(synthetic.volume, Decimal::ZERO);
            assert_eq!(synthetic.trades_count, 0);
        }
        // Originals untouched, order preserved
        assert!(!filled[0].is_synthetic);
        assert!(!filled[5].is_synthetic);
        assert!(filled.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
    }

    #[test]
    fn test_synthetic_ratio() {
        let candles = vec![candle_at(minute(0), dec!(100)), candle_at(minute(5), dec!(101))];
        let gaps = detect_gaps(&candles, 1);
        let filled = fill_gaps(candles, &gaps);

        let ratio = synthetic_ratio(&filled);
        assert!((ratio - 4.0 / 6.0).abs() < 1e-9);
        assert_eq!(synthetic_ratio(&[]), 0.0);
    }

    #[test]
    fn test_fill_gaps_empty_gap_list_is_identity() {
        let candles: Vec<_> = (0..3).map(|i| candle_at(minute(i), dec!(100))).collect();
        let filled = fill_gaps(candles.clone(), &[]);
        assert_eq!(filled, candles);
    }
}
