//! Error types for exchange clients

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("WebSocket connection error: {0}")]
    WebSocketConnection(String),

    #[error("WebSocket send error: {0}")]
    WebSocketSend(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Exchange API error: {0}")]
    Api(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Unknown exchange: {0}")]
    UnknownExchange(String),

    #[error("Core error: {0}")]
    Core(#[from] marketflow_core::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
