//! Durable candle storage.
//!
//! Rows are keyed by (product, granularity, bucket start). The aggregator is
//! the only writer; the engine, optimizer and backtest runner read windows of
//! the most recent candles.

pub mod memory;
pub mod redis_store;

pub use memory::MemoryCandleStore;
pub use redis_store::RedisCandleStore;

use crate::models::{Candle, Granularity};
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

#[async_trait]
pub trait CandleStore: Send + Sync {
    /// Candle for one exact bucket, if it was ever written
    async fn find(
        &self,
        product_code: &str,
        granularity: Granularity,
        time: DateTime<Utc>,
    ) -> Result<Option<Candle>>;

    /// Insert or replace the row for the candle's bucket
    async fn save(&self, candle: &Candle) -> Result<()>;

    /// Up to `limit` most recent candles, oldest first
    async fn latest(
        &self,
        product_code: &str,
        granularity: Granularity,
        limit: usize,
    ) -> Result<Vec<Candle>>;

    /// Drop all but the newest `keep` rows; returns how many were removed
    async fn trim(&self, product_code: &str, granularity: Granularity, keep: usize)
        -> Result<usize>;

    async fn count(&self, product_code: &str, granularity: Granularity) -> Result<usize>;
}
