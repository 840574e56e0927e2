//! Exchange client library for the marketflow data platform
//!
//! This crate provides the market-facing edge of the system:
//!
//! - WebSocket stream clients (Binance, Coinbase, Kraken) that normalize
//!   exchange-specific wire formats into [`marketflow_core::Trade`] and
//!   [`marketflow_core::OrderBook`]
//! - REST kline clients for authoritative OHLCV candles
//! - The reader/consumer split: readers enqueue into a per-client bounded
//!   queue, consumer workers invoke registered callbacks
//! - Factories that construct clients from configuration
//!
//! # Examples
//!
//! ```no_run
//! use marketflow_exchange::rest::{ExchangeRestApi, RestConfig};
//! use marketflow_exchange::factory::create_rest_client;
//! use marketflow_core::Timeframe;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let api = create_rest_client("binance", RestConfig::default())?;
//! let candles = api.fetch_latest_klines("BTCUSDT", Timeframe::M1, 100).await?;
//! println!("fetched {} candles", candles.len());
//! # Ok(())
//! # }
//! ```

pub mod binance;
pub mod coinbase;
pub mod error;
pub mod factory;
pub mod kraken;
pub mod rest;
pub mod stream;

pub use error::{Error, Result};
pub use factory::{create_enabled_streams, create_rest_client, create_stream_client};
pub use rest::{ExchangeRestApi, RestConfig};
pub use stream::{ConnectionState, ExchangeStream, StreamConfig, StreamRouter};
