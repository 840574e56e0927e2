//! Storage layer for the marketflow data platform
//!
//! Two sinks share the platform's bounded-queue worker primitive:
//!
//! - [`ColumnarSink`]: durable batched writes into the columnar time-series
//!   store through a hand-rolled connection pool with poison recovery
//! - [`CacheSink`]: TTL-bounded latest-price / orderbook / indicator signal
//!   keys in the cache
//!
//! Both expose non-blocking enqueue operations for hot paths and
//! error-surfacing synchronous operations for paced callers.

pub mod cache;
pub mod columnar;
pub mod error;
pub mod pool;

pub use cache::CacheSink;
pub use columnar::ColumnarSink;
pub use error::{Error, Result};
pub use pool::ConnectionPool;
