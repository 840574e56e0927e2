//! Indicator registry
//!
//! Maps a configured kind string to a constructor over the typed parameter
//! record. Unknown kinds fail construction; the loader decides whether that
//! skips the entry or aborts.

use crate::error::{Error, Result};
use crate::indicator::Indicator;
use crate::momentum::{Macd, Rsi, Stochastic};
use crate::moving_averages::{Ema, Sma, Wma};
use marketflow_core::config::IndicatorSpec;

/// Available indicator kinds
pub fn available() -> Vec<&'static str> {
    vec!["sma", "ema", "wma", "rsi", "macd", "stochastic"]
}

/// Construct one indicator from its configured spec.
pub fn create(spec: &IndicatorSpec) -> Result<Box<dyn Indicator>> {
    let params = &spec.params;
    let name = spec.name.clone();

    let indicator: Box<dyn Indicator> = match spec.kind.to_lowercase().as_str() {
        "sma" => Box::new(Sma::new(name, params.period.unwrap_or(20))),
        "ema" => Box::new(Ema::new(name, params.period.unwrap_or(20))),
        "wma" => Box::new(Wma::new(name, params.period.unwrap_or(20))),
        "rsi" => Box::new(Rsi::new(name, params.period.unwrap_or(14))),
        "macd" => Box::new(Macd::new(
            name,
            params.fast_period.unwrap_or(12),
            params.slow_period.unwrap_or(26),
            params.signal_period.unwrap_or(9),
        )),
        "stochastic" => Box::new(Stochastic::new(
            name,
            params.k_period.unwrap_or(14),
            params.k_slow_period.unwrap_or(3),
            params.d_period.unwrap_or(3),
        )),
        other => return Err(Error::UnknownIndicator(other.to_string())),
    };

    if indicator.period() == 0 {
        return Err(Error::InvalidParams {
            name: spec.name.clone(),
            reason: "period must be positive".to_string(),
        });
    }

    Ok(indicator)
}

#[cfg(test)]
mod tests {
    use super::*;
    use marketflow_core::config::IndicatorParams;

    fn spec(name: &str, kind: &str, period: Option<usize>) -> IndicatorSpec {
        IndicatorSpec {
            name: name.to_string(),
            kind: kind.to_string(),
            params: IndicatorParams {
                period,
                ..Default::default()
            },
        }
    }

    #[test]
    fn test_create_all_kinds() {
        for kind in available() {
            let indicator = create(&spec("X", kind, Some(10))).unwrap();
            assert_eq!(indicator.name(), "X");
        }
    }

    #[test]
    fn test_kind_is_case_insensitive() {
        let indicator = create(&spec("SMA_20", "SMA", Some(20))).unwrap();
        assert_eq!(indicator.period(), 20);
    }

    #[test]
    fn test_unknown_kind() {
        let result = create(&spec("X", "supertrend", None));
        assert!(matches!(result, Err(Error::UnknownIndicator(_))));
    }

    #[test]
    fn test_zero_period_rejected() {
        let result = create(&spec("SMA_0", "sma", Some(0)));
        assert!(matches!(result, Err(Error::InvalidParams { .. })));
    }

    #[test]
    fn test_macd_defaults() {
        let indicator = create(&spec("MACD", "macd", None)).unwrap();
        // Validation period is the slow period
        assert_eq!(indicator.period(), 26);
    }
}
