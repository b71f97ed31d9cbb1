use super::CandleStore;
use crate::models::{Candle, Granularity};
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

type SeriesKey = (String, Granularity);

/// Thread-safe in-memory candle store
///
/// Keeps every bucket per (product, granularity) ordered by time. Used by
/// backtest replays and tests; clones share the same data.
#[derive(Clone, Default)]
pub struct MemoryCandleStore {
    data: Arc<RwLock<HashMap<SeriesKey, BTreeMap<DateTime<Utc>, Candle>>>>,
}

impl MemoryCandleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bulk-load candles (e.g. a historical series before a replay)
    pub fn extend(&self, candles: impl IntoIterator<Item = Candle>) -> Result<()> {
        let mut data = self.data.write()?;
        for candle in candles {
            data.entry((candle.product_code.clone(), candle.granularity))
                .or_default()
                .insert(candle.time, candle);
        }
        Ok(())
    }
}

#[async_trait]
impl CandleStore for MemoryCandleStore {
    async fn find(
        &self,
        product_code: &str,
        granularity: Granularity,
        time: DateTime<Utc>,
    ) -> Result<Option<Candle>> {
        let data = self.data.read()?;
        Ok(data
            .get(&(product_code.to_string(), granularity))
            .and_then(|series| series.get(&time))
            .cloned())
    }

    async fn save(&self, candle: &Candle) -> Result<()> {
        let mut data = self.data.write()?;
        data.entry((candle.product_code.clone(), candle.granularity))
            .or_default()
            .insert(candle.time, candle.clone());
        Ok(())
    }

    async fn latest(
        &self,
        product_code: &str,
        granularity: Granularity,
        limit: usize,
    ) -> Result<Vec<Candle>> {
        let data = self.data.read()?;
        let mut candles: Vec<Candle> = data
            .get(&(product_code.to_string(), granularity))
            .map(|series| series.values().rev().take(limit).cloned().collect())
            .unwrap_or_default();
        candles.reverse();
        Ok(candles)
    }

    async fn trim(
        &self,
        product_code: &str,
        granularity: Granularity,
        keep: usize,
    ) -> Result<usize> {
        let mut data = self.data.write()?;
        let Some(series) = data.get_mut(&(product_code.to_string(), granularity)) else {
            return Ok(0);
        };

        let excess = series.len().saturating_sub(keep);
        let doomed: Vec<DateTime<Utc>> = series.keys().take(excess).cloned().collect();
        for time in &doomed {
            series.remove(time);
        }
        Ok(doomed.len())
    }

    async fn count(&self, product_code: &str, granularity: Granularity) -> Result<usize> {
        let data = self.data.read()?;
        Ok(data
            .get(&(product_code.to_string(), granularity))
            .map(|series| series.len())
            .unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn create_test_candle(product: &str, minute: i64, price: f64) -> Candle {
        Candle {
            product_code: product.to_string(),
            granularity: Granularity::MINUTE,
            time: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
                + chrono::Duration::minutes(minute),
            open: price,
            high: price,
            low: price,
            close: price,
            volume: 1000.0,
        }
    }

    #[tokio::test]
    async fn test_save_and_find() {
        let store = MemoryCandleStore::new();
        let candle = create_test_candle("BTC", 0, 100.0);

        store.save(&candle).await.unwrap();

        let found = store
            .find("BTC", Granularity::MINUTE, candle.time)
            .await
            .unwrap();
        assert_eq!(found, Some(candle.clone()));

        let missing = store
            .find("BTC", Granularity::HOUR, candle.time)
            .await
            .unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_save_overwrites_bucket() {
        let store = MemoryCandleStore::new();
        let mut candle = create_test_candle("BTC", 0, 100.0);
        store.save(&candle).await.unwrap();

        candle.close = 101.0;
        store.save(&candle).await.unwrap();

        assert_eq!(store.count("BTC", Granularity::MINUTE).await.unwrap(), 1);
        let latest = store.latest("BTC", Granularity::MINUTE, 10).await.unwrap();
        assert_eq!(latest[0].close, 101.0);
    }

    #[tokio::test]
    async fn test_latest_returns_most_recent_oldest_first() {
        let store = MemoryCandleStore::new();

        // Insert out of order
        for i in [3, 0, 4, 1, 2] {
            store
                .save(&create_test_candle("BTC", i, 100.0 + i as f64))
                .await
                .unwrap();
        }

        let latest = store.latest("BTC", Granularity::MINUTE, 3).await.unwrap();
        assert_eq!(latest.len(), 3);
        assert_eq!(latest[0].close, 102.0);
        assert_eq!(latest[1].close, 103.0);
        assert_eq!(latest[2].close, 104.0);
    }

    #[tokio::test]
    async fn test_trim_keeps_newest() {
        let store = MemoryCandleStore::new();
        store
            .extend((0..10).map(|i| create_test_candle("BTC", i, 100.0 + i as f64)))
            .unwrap();

        let removed = store.trim("BTC", Granularity::MINUTE, 4).await.unwrap();
        assert_eq!(removed, 6);

        let left = store.latest("BTC", Granularity::MINUTE, 100).await.unwrap();
        assert_eq!(left.len(), 4);
        assert_eq!(left[0].close, 106.0);

        // Trimming an unknown series is a no-op
        assert_eq!(store.trim("ETH", Granularity::MINUTE, 4).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_thread_safety() {
        let store = MemoryCandleStore::new();

        let handles: Vec<_> = (0..10)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move {
                    store
                        .save(&create_test_candle("BTC", i, 100.0 + i as f64))
                        .await
                        .unwrap();
                })
            })
            .collect();

        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(store.count("BTC", Granularity::MINUTE).await.unwrap(), 10);
    }
}
