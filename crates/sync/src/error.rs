//! Error types for the sync service

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Exchange error: {0}")]
    Exchange(#[from] marketflow_exchange::Error),

    #[error("Store error: {0}")]
    Store(#[from] marketflow_store::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
