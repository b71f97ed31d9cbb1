//! Crate-wide error type.
//!
//! Library code returns `Result<_, Error>`. The binaries wrap these in
//! `anyhow` with context at the edges.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Settings failed to load or validate. Fatal at startup.
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Candle store error: {0}")]
    Store(#[from] redis::RedisError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The exchange answered but refused or garbled the request.
    #[error("Exchange error: {0}")]
    Exchange(String),

    /// Order size came out NaN, infinite or non-positive.
    #[error("Invalid order size: {0}")]
    InvalidSize(f64),

    #[error("Invalid position transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Invalid ticker: {0}")]
    InvalidTicker(String),

    /// A value could not be represented as NUMERIC (or read back as f64).
    #[error("Invalid numeric value: {0}")]
    InvalidNumber(String),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// In-memory state lock was poisoned by a panicking writer.
    #[error("Lock poisoned: {0}")]
    Poisoned(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl<T> From<std::sync::PoisonError<T>> for Error {
    fn from(e: std::sync::PoisonError<T>) -> Self {
        Error::Poisoned(e.to_string())
    }
}

impl From<config::ConfigError> for Error {
    fn from(e: config::ConfigError) -> Self {
        Error::Config(e.to_string())
    }
}
