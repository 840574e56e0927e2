//! Normalized indicator rows

use crate::types::Timeframe;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One indicator value in the normalized ("long") layout.
///
/// Identity key is (exchange, symbol, timeframe, indicator_name, timestamp);
/// the store deduplicates on merge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorPoint {
    /// Timestamp of the candle the value was computed for
    pub timestamp: DateTime<Utc>,
    pub exchange: String,
    pub symbol: String,
    pub timeframe: Timeframe,
    /// Output name, e.g. "SMA_20", "RSI_14", "MACD_signal"
    pub indicator_name: String,
    pub indicator_value: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_indicator_point_serde_roundtrip() {
        let point = IndicatorPoint {
            timestamp: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            exchange: "binance".to_string(),
            symbol: "BTCUSDT".to_string(),
            timeframe: Timeframe::M1,
            indicator_name: "RSI_14".to_string(),
            indicator_value: 65.2,
        };

        let json = serde_json::to_string(&point).unwrap();
        let back: IndicatorPoint = serde_json::from_str(&json).unwrap();
        assert_eq!(back, point);
    }
}
