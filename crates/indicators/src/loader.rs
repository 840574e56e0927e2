//! Load the configured indicator set
//!
//! Bridges the config layer to the indicator library: each configured spec
//! goes through the registry; entries that fail construction are skipped
//! with a warning so one typo does not take the whole engine down.

use crate::error::Error;
use crate::indicator::Indicator;
use crate::registry;
use marketflow_core::Candle;
use marketflow_core::config::IndicatorSettings;
use std::collections::BTreeMap;
use tracing::{debug, error, info, warn};

/// The loaded, ready-to-run indicator set
pub struct IndicatorSet {
    indicators: BTreeMap<String, Box<dyn Indicator>>,
}

impl IndicatorSet {
    /// Build the set from configuration, skipping invalid entries.
    pub fn from_settings(settings: &IndicatorSettings) -> Self {
        let mut indicators: BTreeMap<String, Box<dyn Indicator>> = BTreeMap::new();

        for spec in &settings.indicators {
            match registry::create(spec) {
                Ok(indicator) => {
                    debug!(name = %spec.name, kind = %spec.kind, "indicator loaded");
                    indicators.insert(spec.name.clone(), indicator);
                }
                Err(e) => {
                    warn!(name = %spec.name, "skipping indicator: {e}");
                }
            }
        }

        info!(
            count = indicators.len(),
            names = ?indicators.keys().collect::<Vec<_>>(),
            "indicator set loaded"
        );
        Self { indicators }
    }

    pub fn len(&self) -> usize {
        self.indicators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indicators.is_empty()
    }

    /// Run every indicator over the (ascending) window and merge the maps.
    ///
    /// Insufficient data is an expected per-indicator outcome logged at
    /// debug; real faults log at error. Either way the remaining indicators
    /// still run.
    pub fn compute(&self, candles: &[Candle]) -> BTreeMap<String, f64> {
        let mut combined = BTreeMap::new();

        for (name, indicator) in &self.indicators {
            match indicator.results(candles) {
                Ok(results) => combined.extend(results),
                Err(e) if Error::is_insufficient(&e) => {
                    debug!(indicator = %name, "skipped: {e}");
                }
                Err(e) => {
                    error!(indicator = %name, "calculation failed: {e}");
                }
            }
        }

        combined
    }
}
