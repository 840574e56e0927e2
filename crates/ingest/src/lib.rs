//! Real-time market data ingestion for the marketflow platform
//!
//! WebSocket streams from every enabled exchange feed a shared processor
//! that validates events and publishes sub-second price signals to the
//! cache. Candles are deliberately NOT built here — WebSocket trades are
//! sampled and incomplete; the REST sync service owns the authoritative
//! candle series.

pub mod error;
pub mod processor;
pub mod service;

pub use error::{Error, Result};
pub use processor::StreamProcessor;
pub use service::IngestService;
