//! Error types for the signal engine

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Malformed, out-of-order or duplicate candle. The candle is dropped and
    /// the symbol pipeline keeps running.
    #[error("Data error for {symbol}: {message}")]
    Data { symbol: String, message: String },

    /// Not enough history for an indicator yet.
    #[error("Computation error: {indicator} warming up ({available}/{required} candles)")]
    Computation {
        indicator: &'static str,
        available: usize,
        required: usize,
    },

    /// Invalid parameters at startup. Fatal.
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// A transition was requested that the state machine is already in.
    #[error("State conflict: {message}")]
    StateConflict { message: String },

    #[error("Relay connection error: {message}")]
    RelayConnection { message: String },

    #[error("Channel closed: {0}")]
    ChannelClosed(&'static str),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl EngineError {
    pub fn data(symbol: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Data {
            symbol: symbol.into(),
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
