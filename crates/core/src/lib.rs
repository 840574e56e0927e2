//! Core domain models and types for the marketflow data platform.
//!
//! This crate provides the fundamental building blocks used across the
//! whole system:
//! - Normalized market-data entities (trades, order books, candles)
//! - Timeframe arithmetic with interval-boundary math
//! - Real-time data quality validation
//! - Gap detection and synthetic forward-filling for candle series
//! - The typed configuration tree loaded at startup
//!
//! # Examples
//!
//! ```
//! use marketflow_core::types::Timeframe;
//!
//! let tf: Timeframe = "5m".parse().unwrap();
//! assert_eq!(tf.minutes(), 5);
//! ```

pub mod config;
pub mod error;
pub mod gaps;
pub mod models;
pub mod types;
pub mod validate;

// Re-export common types for convenience
pub use config::Settings;
pub use error::{Error, Result};
pub use models::{Candle, GapInfo, IndicatorPoint, OrderBook, Side, SymbolSpec, Trade};
pub use types::Timeframe;
pub use validate::DataValidator;
