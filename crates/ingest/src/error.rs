//! Error types for the ingestion service

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Exchange error: {0}")]
    Exchange(#[from] marketflow_exchange::Error),

    #[error("Store error: {0}")]
    Store(#[from] marketflow_store::Error),

    #[error("Core error: {0}")]
    Core(#[from] marketflow_core::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
