//! Client factories
//!
//! Construction dispatches on the configured exchange name; callers hold the
//! trait objects and never see concrete client types.

use crate::binance::{BinanceRest, BinanceStream};
use crate::coinbase::{CoinbaseRest, CoinbaseStream};
use crate::error::{Error, Result};
use crate::kraken::{KrakenRest, KrakenStream};
use crate::rest::{ExchangeRestApi, RestConfig};
use crate::stream::{ExchangeStream, StreamConfig};
use marketflow_core::Settings;
use marketflow_core::config::ExchangeConfig;
use std::sync::Arc;
use tracing::info;

/// Create a WebSocket stream client for one configured exchange
pub fn create_stream_client(
    key: &str,
    config: &ExchangeConfig,
    stream_config: StreamConfig,
) -> Result<Arc<dyn ExchangeStream>> {
    let symbols = config.symbol_list();
    let url = config.websocket_url.clone();

    match key {
        "binance" => Ok(Arc::new(BinanceStream::new(symbols, url, stream_config))),
        "coinbase" => Ok(Arc::new(CoinbaseStream::new(symbols, url, stream_config))),
        "kraken" => Ok(Arc::new(KrakenStream::new(symbols, url, stream_config))),
        other => Err(Error::UnknownExchange(other.to_string())),
    }
}

/// Create stream clients for every enabled exchange
pub fn create_enabled_streams(settings: &Settings) -> Result<Vec<Arc<dyn ExchangeStream>>> {
    let stream_config = StreamConfig::from_settings(&settings.websocket, &settings.stream_queue);

    let mut clients = Vec::new();
    for (key, config) in settings.enabled_exchanges() {
        info!(exchange = %config.name, symbols = config.symbols.len(), "creating stream client");
        clients.push(create_stream_client(key, config, stream_config.clone())?);
    }

    if clients.is_empty() {
        return Err(Error::UnknownExchange(
            "no enabled exchanges in configuration".to_string(),
        ));
    }

    Ok(clients)
}

/// Create a REST API client for one exchange.
///
/// CandleSync calls this once per exchange per cycle so every symbol on the
/// exchange shares the client's rate limiter.
pub fn create_rest_client(key: &str, config: RestConfig) -> Result<Arc<dyn ExchangeRestApi>> {
    match key {
        "binance" => Ok(Arc::new(BinanceRest::new(config)?)),
        "coinbase" => Ok(Arc::new(CoinbaseRest::new(config)?)),
        "kraken" => Ok(Arc::new(KrakenRest::new(config)?)),
        other => Err(Error::UnknownExchange(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use marketflow_core::SymbolSpec;
    use marketflow_core::config::{ExchangeFeatures, ExchangeRateLimits};

    fn config(url: &str) -> ExchangeConfig {
        ExchangeConfig {
            enabled: true,
            name: "Test".to_string(),
            websocket_url: url.to_string(),
            symbols: vec![SymbolSpec::new("BTCUSDT", "BTC", "USDT")],
            features: ExchangeFeatures::default(),
            rate_limits: ExchangeRateLimits::default(),
        }
    }

    #[test]
    fn test_known_stream_clients() {
        for key in ["binance", "coinbase", "kraken"] {
            let client =
                create_stream_client(key, &config("wss://example.com/ws"), StreamConfig::default())
                    .unwrap();
            assert_eq!(client.exchange(), key);
        }
    }

    #[test]
    fn test_unknown_stream_client() {
        let result =
            create_stream_client("bitmex", &config("wss://example.com/ws"), StreamConfig::default());
        assert!(matches!(result, Err(Error::UnknownExchange(_))));
    }

    #[test]
    fn test_known_rest_clients() {
        for key in ["binance", "coinbase", "kraken"] {
            let client = create_rest_client(key, RestConfig::default()).unwrap();
            assert_eq!(client.exchange(), key);
        }
    }

    #[test]
    fn test_unknown_rest_client() {
        assert!(matches!(
            create_rest_client("bitmex", RestConfig::default()),
            Err(Error::UnknownExchange(_))
        ));
    }

    #[test]
    fn test_enabled_streams_from_settings() {
        let mut settings = Settings::default();
        settings
            .exchanges
            .insert("binance".to_string(), config("wss://stream.binance.com/ws"));
        let mut disabled = config("wss://ws.kraken.com/");
        disabled.enabled = false;
        settings.exchanges.insert("kraken".to_string(), disabled);

        let clients = create_enabled_streams(&settings).unwrap();
        assert_eq!(clients.len(), 1);
        assert_eq!(clients[0].exchange(), "binance");
    }

    #[test]
    fn test_enabled_streams_requires_one() {
        let settings = Settings::default();
        assert!(create_enabled_streams(&settings).is_err());
    }
}
