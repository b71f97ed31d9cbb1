use crate::models::{Candle, Granularity};
use crate::persistence::CandleStore;
use crate::Result;
use chrono::{DateTime, Utc};

/// Rolling window of the most recent candles for one (product, granularity)
///
/// Candles are kept oldest first. Indicators read the column accessors
/// (`closes`, `highs`, ...) which are rebuilt on every call; nothing derived
/// is cached here.
#[derive(Debug, Clone)]
pub struct CandleSeries {
    product_code: String,
    granularity: Granularity,
    capacity: usize,
    candles: Vec<Candle>,
}

impl CandleSeries {
    /// Create an empty series
    ///
    /// # Arguments
    /// * `capacity` - Maximum number of candles kept; the oldest are evicted first
    pub fn new(product_code: impl Into<String>, granularity: Granularity, capacity: usize) -> Self {
        Self {
            product_code: product_code.into(),
            granularity,
            capacity,
            candles: Vec::new(),
        }
    }

    /// Build a series from candles already ordered oldest first
    pub fn from_candles(
        product_code: impl Into<String>,
        granularity: Granularity,
        capacity: usize,
        candles: Vec<Candle>,
    ) -> Self {
        let mut series = Self::new(product_code, granularity, capacity);
        for candle in candles {
            series.push(candle);
        }
        series
    }

    /// Load the most recent `capacity` candles from a store
    pub async fn load(
        store: &dyn CandleStore,
        product_code: &str,
        granularity: Granularity,
        capacity: usize,
    ) -> Result<Self> {
        let candles = store.latest(product_code, granularity, capacity).await?;
        Ok(Self::from_candles(product_code, granularity, capacity, candles))
    }

    /// Append a candle, or replace the last one if it covers the same bucket
    ///
    /// If the window is full, removes the oldest candle
    pub fn push(&mut self, candle: Candle) {
        if let Some(last) = self.candles.last_mut() {
            if last.time == candle.time {
                *last = candle;
                return;
            }
        }

        self.candles.push(candle);

        if self.candles.len() > self.capacity {
            let excess = self.candles.len() - self.capacity;
            self.candles.drain(..excess);
        }
    }

    pub fn product_code(&self) -> &str {
        &self.product_code
    }

    pub fn granularity(&self) -> Granularity {
        self.granularity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    pub fn candles(&self) -> &[Candle] {
        &self.candles
    }

    pub fn last(&self) -> Option<&Candle> {
        self.candles.last()
    }

    pub fn times(&self) -> Vec<DateTime<Utc>> {
        self.candles.iter().map(|c| c.time).collect()
    }

    pub fn opens(&self) -> Vec<f64> {
        self.candles.iter().map(|c| c.open).collect()
    }

    pub fn closes(&self) -> Vec<f64> {
        self.candles.iter().map(|c| c.close).collect()
    }

    pub fn highs(&self) -> Vec<f64> {
        self.candles.iter().map(|c| c.high).collect()
    }

    pub fn lows(&self) -> Vec<f64> {
        self.candles.iter().map(|c| c.low).collect()
    }

    pub fn volumes(&self) -> Vec<f64> {
        self.candles.iter().map(|c| c.volume).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::MemoryCandleStore;
    use chrono::TimeZone;

    fn create_test_candle(minute: i64, price: f64) -> Candle {
        Candle {
            product_code: "BTC".to_string(),
            granularity: Granularity::MINUTE,
            time: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
                + chrono::Duration::minutes(minute),
            open: price,
            high: price + 1.0,
            low: price - 1.0,
            close: price,
            volume: 1000.0,
        }
    }

    #[test]
    fn test_new_series() {
        let series = CandleSeries::new("BTC", Granularity::MINUTE, 100);
        assert_eq!(series.capacity(), 100);
        assert!(series.is_empty());
        assert!(series.last().is_none());
    }

    #[test]
    fn test_push_and_columns() {
        let mut series = CandleSeries::new("BTC", Granularity::MINUTE, 100);
        series.push(create_test_candle(0, 100.0));
        series.push(create_test_candle(1, 101.0));
        series.push(create_test_candle(2, 102.0));

        assert_eq!(series.len(), 3);
        assert_eq!(series.closes(), vec![100.0, 101.0, 102.0]);
        assert_eq!(series.highs(), vec![101.0, 102.0, 103.0]);
        assert_eq!(series.lows(), vec![99.0, 100.0, 101.0]);
        assert_eq!(series.volumes(), vec![1000.0; 3]);
        assert_eq!(series.times()[0], create_test_candle(0, 0.0).time);
    }

    #[test]
    fn test_capacity_limit() {
        let mut series = CandleSeries::new("BTC", Granularity::MINUTE, 5);

        // Add 10 candles
        for i in 0..10 {
            series.push(create_test_candle(i, 100.0 + i as f64));
        }

        assert_eq!(series.len(), 5);
        // Should have the last 5 candles (105-109)
        assert_eq!(series.closes(), vec![105.0, 106.0, 107.0, 108.0, 109.0]);
    }

    #[test]
    fn test_push_same_bucket_replaces_last() {
        let mut series = CandleSeries::new("BTC", Granularity::MINUTE, 5);
        series.push(create_test_candle(0, 100.0));
        series.push(create_test_candle(0, 105.0));

        assert_eq!(series.len(), 1);
        assert_eq!(series.last().unwrap().close, 105.0);
    }

    #[tokio::test]
    async fn test_load_from_store() {
        let store = MemoryCandleStore::new();
        store
            .extend((0..20).map(|i| create_test_candle(i, 100.0 + i as f64)))
            .unwrap();

        let series = CandleSeries::load(&store, "BTC", Granularity::MINUTE, 8)
            .await
            .unwrap();

        assert_eq!(series.len(), 8);
        assert_eq!(series.closes()[0], 112.0);
        assert_eq!(series.last().unwrap().close, 119.0);
    }
}
