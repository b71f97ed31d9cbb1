use super::CandleAggregator;
use crate::api::TickerSource;
use crate::models::{Granularity, Ticker};
use crate::persistence::CandleStore;
use crate::Result;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};

/// What one accepted tick did
#[derive(Debug, Clone, PartialEq)]
pub struct TickReport {
    pub ticker: Ticker,
    /// Granularities whose bucket rolled on this tick
    pub new_buckets: Vec<Granularity>,
    /// Rows removed by the retention trim, when one ran
    pub trimmed: Option<usize>,
}

/// Ingestion loop: ticker source -> aggregator -> latest-ticker channel
///
/// Never waits on the engine. Consumers read the latest ticker through
/// `subscribe()`.
pub struct TickerFeed {
    source: Arc<dyn TickerSource>,
    store: Arc<dyn CandleStore>,
    aggregator: CandleAggregator,
    product_code: String,
    sender: watch::Sender<Option<Ticker>>,
    last_timestamp: Option<DateTime<Utc>>,
    ticks: u64,
    retention: usize,
    trim_every: u64,
}

impl TickerFeed {
    pub fn new(
        source: Arc<dyn TickerSource>,
        store: Arc<dyn CandleStore>,
        product_code: impl Into<String>,
        granularities: Vec<Granularity>,
    ) -> Self {
        let product_code = product_code.into();
        let (sender, _) = watch::channel(None);
        Self {
            source,
            aggregator: CandleAggregator::new(store.clone(), product_code.clone(), granularities),
            store,
            product_code,
            sender,
            last_timestamp: None,
            ticks: 0,
            retention: 0,
            trim_every: 0,
        }
    }

    /// Keep `keep` candles per granularity, trimming every `every` ticks (0 disables)
    pub fn with_retention(mut self, keep: usize, every: u64) -> Self {
        self.retention = keep;
        self.trim_every = every;
        self
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<Ticker>> {
        self.sender.subscribe()
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Fetch one ticker; None when it repeats the previous timestamp
    pub async fn poll_once(&mut self) -> Result<Option<TickReport>> {
        let ticker = self.source.get_ticker(&self.product_code).await?;
        if self.last_timestamp == Some(ticker.timestamp) {
            return Ok(None);
        }
        self.process(ticker).await.map(Some)
    }

    /// Fold a ticker into the candles and publish it
    pub async fn process(&mut self, ticker: Ticker) -> Result<TickReport> {
        let new_buckets = self.aggregator.ingest(&ticker).await?;
        self.last_timestamp = Some(ticker.timestamp);
        self.sender.send_replace(Some(ticker.clone()));
        self.ticks += 1;

        let trimmed = if self.trim_every > 0 && self.ticks % self.trim_every == 0 {
            Some(self.trim().await)
        } else {
            None
        };

        Ok(TickReport {
            ticker,
            new_buckets,
            trimmed,
        })
    }

    async fn trim(&self) -> usize {
        let mut removed = 0;
        for &granularity in self.aggregator.granularities() {
            match self
                .store
                .trim(&self.product_code, granularity, self.retention)
                .await
            {
                Ok(n) => removed += n,
                Err(e) => tracing::error!(
                    granularity = %granularity,
                    "Candle retention trim failed: {}",
                    e
                ),
            }
        }
        if removed > 0 {
            tracing::debug!(removed, keep = self.retention, "Trimmed old candles");
        }
        removed
    }

    /// Poll until `shutdown` flips to true, then flush unsaved candles
    pub async fn run(mut self, every: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tracing::info!(product = %self.product_code, "Ticker feed started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.poll_once().await {
                        Ok(Some(report)) if !report.new_buckets.is_empty() => {
                            tracing::debug!(
                                price = report.ticker.mid_price(),
                                buckets = ?report.new_buckets,
                                "New candle buckets"
                            );
                        }
                        Ok(_) => {}
                        Err(e) => tracing::warn!("Ticker poll failed: {}", e),
                    }
                }
                _ = shutdown.changed() => break,
            }
        }

        self.aggregator.flush().await;
        tracing::info!(ticks = self.ticks, "Ticker feed stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::MemoryCandleStore;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::sync::Mutex;

    /// Replays a fixed list of tickers, repeating the last one
    struct ScriptedSource {
        tickers: Mutex<Vec<Ticker>>,
    }

    #[async_trait]
    impl TickerSource for ScriptedSource {
        async fn get_ticker(&self, _product_code: &str) -> Result<Ticker> {
            let mut tickers = self.tickers.lock()?;
            let next = if tickers.len() > 1 {
                tickers.remove(0)
            } else {
                tickers[0].clone()
            };
            Ok(next)
        }
    }

    fn ticker_at(second: i64, price: f64) -> Ticker {
        Ticker {
            product_code: "FX_BTC_JPY".to_string(),
            timestamp: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
                + chrono::Duration::seconds(second),
            best_bid: price - 1.0,
            best_ask: price + 1.0,
            volume: 1.0,
        }
    }

    fn feed(tickers: Vec<Ticker>, store: Arc<MemoryCandleStore>) -> TickerFeed {
        TickerFeed::new(
            Arc::new(ScriptedSource {
                tickers: Mutex::new(tickers),
            }),
            store,
            "FX_BTC_JPY",
            vec![Granularity::MINUTE],
        )
    }

    #[tokio::test]
    async fn test_duplicate_timestamp_ignored() {
        let store = Arc::new(MemoryCandleStore::new());
        let mut feed = feed(vec![ticker_at(0, 100.0)], store);
        let rx = feed.subscribe();

        let first = feed.poll_once().await.unwrap().unwrap();
        assert_eq!(first.new_buckets, vec![Granularity::MINUTE]);
        assert!(feed.poll_once().await.unwrap().is_none());
        assert_eq!(feed.ticks(), 1);
        assert_eq!(rx.borrow().as_ref().unwrap().mid_price(), 100.0);
    }

    #[tokio::test]
    async fn test_retention_trim_runs_periodically() {
        let store = Arc::new(MemoryCandleStore::new());
        let tickers: Vec<Ticker> = (0..6).map(|m| ticker_at(m * 60, 100.0 + m as f64)).collect();
        let mut feed = feed(tickers, store.clone()).with_retention(2, 3);

        let mut trims = Vec::new();
        for _ in 0..6 {
            let report = feed.poll_once().await.unwrap().unwrap();
            trims.push(report.trimmed);
        }

        assert_eq!(trims, vec![None, None, Some(1), None, None, Some(3)]);
        assert_eq!(
            store.count("FX_BTC_JPY", Granularity::MINUTE).await.unwrap(),
            2
        );
    }

    #[tokio::test]
    async fn test_invalid_ticker_is_an_error() {
        let store = Arc::new(MemoryCandleStore::new());
        let mut feed = feed(vec![ticker_at(0, 0.0)], store);
        let broken = Ticker {
            best_bid: 0.0,
            best_ask: 0.0,
            ..ticker_at(0, 0.0)
        };
        assert!(feed.process(broken).await.is_err());
        assert_eq!(feed.ticks(), 0);
    }
}
