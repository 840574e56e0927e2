//! Symbol mapping configuration

use serde::{Deserialize, Serialize};

/// One trading pair as configured for an exchange.
///
/// Read-only configuration loaded at startup; `native` is the symbol in the
/// exchange's own format (BTCUSDT, BTC-USD, XBT/USD), `base`/`quote` the
/// normalized assets used for cross-exchange joins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolSpec {
    /// Exchange-native symbol
    pub native: String,
    /// Normalized base asset (e.g. BTC)
    pub base: String,
    /// Quote currency (e.g. USDT, USD)
    pub quote: String,
}

impl SymbolSpec {
    pub fn new(
        native: impl Into<String>,
        base: impl Into<String>,
        quote: impl Into<String>,
    ) -> Self {
        Self {
            native: native.into(),
            base: base.into(),
            quote: quote.into(),
        }
    }
}
