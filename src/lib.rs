// Core modules
pub mod api;
pub mod backtest;
pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod execution;
pub mod indicators;
pub mod ledger;
pub mod market;
pub mod models;
pub mod persistence;
pub mod risk;
pub mod strategy;

// Re-export commonly used types
pub use error::{Error, Result};
pub use models::*;
