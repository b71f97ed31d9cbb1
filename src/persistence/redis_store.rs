use super::CandleStore;
use crate::models::{Candle, Granularity};
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, ErrorKind, RedisError};
use tokio::time::{timeout, Duration};

/// Redis candle store
///
/// One sorted set per (product, granularity): `candles:{product}:{granularity}`.
/// Members are JSON candles scored by bucket start (unix seconds), so a bucket
/// is replaced by removing its score and re-adding in one MULTI/EXEC.
///
/// The connection manager is cheap to clone; every call works on its own clone
/// so the store can be shared behind an `Arc` by the aggregator and the engine.
#[derive(Clone)]
pub struct RedisCandleStore {
    conn: ConnectionManager,
}

fn key(product_code: &str, granularity: Granularity) -> String {
    format!("candles:{}:{}", product_code, granularity.label())
}

fn score(time: DateTime<Utc>) -> f64 {
    time.timestamp() as f64
}

impl RedisCandleStore {
    /// Connect to Redis
    ///
    /// # Arguments
    /// * `redis_url` - Redis connection URL (e.g., "redis://127.0.0.1:6379")
    pub async fn new(redis_url: &str) -> Result<Self> {
        let client = Client::open(redis_url)?;

        // Add 5 second timeout to connection attempt
        let conn = timeout(Duration::from_secs(5), ConnectionManager::new(client))
            .await
            .map_err(|_| {
                RedisError::from((ErrorKind::IoError, "Redis connection timeout after 5 seconds"))
            })??;

        tracing::info!("Connected to Redis at {}", redis_url);

        Ok(Self { conn })
    }

    fn decode(raw: Vec<String>) -> Result<Vec<Candle>> {
        raw.iter()
            .map(|json| serde_json::from_str(json).map_err(Into::into))
            .collect()
    }
}

#[async_trait]
impl CandleStore for RedisCandleStore {
    async fn find(
        &self,
        product_code: &str,
        granularity: Granularity,
        time: DateTime<Utc>,
    ) -> Result<Option<Candle>> {
        let mut conn = self.conn.clone();
        let s = score(time);
        let raw: Vec<String> = conn
            .zrangebyscore(key(product_code, granularity), s, s)
            .await?;
        Ok(Self::decode(raw)?.pop())
    }

    async fn save(&self, candle: &Candle) -> Result<()> {
        let mut conn = self.conn.clone();
        let key = key(&candle.product_code, candle.granularity);
        let s = score(candle.time);
        let value = serde_json::to_string(candle)?;

        let _: () = redis::pipe()
            .atomic()
            .zrembyscore(&key, s, s)
            .ignore()
            .zadd(&key, value, s)
            .ignore()
            .query_async(&mut conn)
            .await?;

        tracing::trace!(key = %key, time = %candle.time, close = candle.close, "Saved candle");
        Ok(())
    }

    async fn latest(
        &self,
        product_code: &str,
        granularity: Granularity,
        limit: usize,
    ) -> Result<Vec<Candle>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let mut conn = self.conn.clone();
        let raw: Vec<String> = conn
            .zrevrange(key(product_code, granularity), 0, limit as isize - 1)
            .await?;

        let mut candles = Self::decode(raw)?;
        candles.reverse();
        Ok(candles)
    }

    async fn trim(
        &self,
        product_code: &str,
        granularity: Granularity,
        keep: usize,
    ) -> Result<usize> {
        let mut conn = self.conn.clone();
        let key = key(product_code, granularity);
        let removed: usize = conn
            .zremrangebyrank(&key, 0, -(keep as isize) - 1)
            .await?;

        if removed > 0 {
            tracing::debug!("Trimmed {} old candles from {}", removed, key);
        }

        Ok(removed)
    }

    async fn count(&self, product_code: &str, granularity: Granularity) -> Result<usize> {
        let mut conn = self.conn.clone();
        let count: usize = conn.zcard(key(product_code, granularity)).await?;
        Ok(count)
    }
}
