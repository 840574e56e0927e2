//! Error types for the indicator library
//!
//! Input insufficiency is an expected outcome, not a fault: series with too
//! little history show up constantly for freshly listed or low-volume
//! symbols. Callers branch on [`Error::is_insufficient`] to log those at
//! debug while real faults stay errors.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("{name}: empty candle series")]
    EmptyInput { name: String },

    #[error("{name}: need {needed} candles, got {got}")]
    NotEnoughData {
        name: String,
        needed: usize,
        got: usize,
    },

    #[error("unknown indicator kind: {0}")]
    UnknownIndicator(String),

    #[error("{name}: invalid parameters: {reason}")]
    InvalidParams { name: String, reason: String },
}

impl Error {
    /// Expected data-insufficiency signal (as opposed to a real fault)
    pub fn is_insufficient(&self) -> bool {
        matches!(self, Error::EmptyInput { .. } | Error::NotEnoughData { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;
