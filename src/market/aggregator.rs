use crate::error::Error;
use crate::models::{Candle, Granularity, Ticker};
use crate::persistence::CandleStore;
use crate::Result;
use std::collections::HashMap;
use std::sync::Arc;

/// In-memory copy of the open bucket for one granularity
#[derive(Debug, Clone)]
struct WorkingCandle {
    candle: Candle,
    /// In-memory state differs from the last acknowledged write
    unsaved: bool,
    /// The last write attempt failed and must be retried on the next tick
    retry: bool,
}

/// Folds ticks into the current candle of every configured granularity
///
/// The store is the source of truth across restarts; the working copy only
/// avoids a read per tick. A write that fails leaves the working copy marked
/// for retry, so the bucket converges once the store is reachable again.
pub struct CandleAggregator {
    store: Arc<dyn CandleStore>,
    product_code: String,
    granularities: Vec<Granularity>,
    current: HashMap<Granularity, WorkingCandle>,
}

async fn persist(store: &dyn CandleStore, candle: &Candle) -> bool {
    match store.save(candle).await {
        Ok(()) => true,
        Err(e) => {
            tracing::error!(
                product = %candle.product_code,
                granularity = %candle.granularity,
                time = %candle.time,
                error = %e,
                "Failed to persist candle, will retry on next tick"
            );
            false
        }
    }
}

impl CandleAggregator {
    pub fn new(
        store: Arc<dyn CandleStore>,
        product_code: impl Into<String>,
        granularities: Vec<Granularity>,
    ) -> Self {
        Self {
            store,
            product_code: product_code.into(),
            granularities,
            current: HashMap::new(),
        }
    }

    pub fn granularities(&self) -> &[Granularity] {
        &self.granularities
    }

    /// Current (possibly unsaved) candle for a granularity
    pub fn current(&self, granularity: Granularity) -> Option<&Candle> {
        self.current.get(&granularity).map(|w| &w.candle)
    }

    /// Ingest one tick into every granularity
    ///
    /// Returns the granularities for which this tick opened a new bucket.
    /// Store failures are logged and retried, never returned; only a
    /// malformed ticker is an error.
    pub async fn ingest(&mut self, ticker: &Ticker) -> Result<Vec<Granularity>> {
        if !ticker.is_valid() {
            return Err(Error::InvalidTicker(format!(
                "bid={} ask={} volume={}",
                ticker.best_bid, ticker.best_ask, ticker.volume
            )));
        }
        if ticker.product_code != self.product_code {
            return Err(Error::InvalidTicker(format!(
                "unexpected product {} (aggregating {})",
                ticker.product_code, self.product_code
            )));
        }

        let mut created = Vec::new();
        for granularity in self.granularities.clone() {
            if self.ingest_one(ticker, granularity).await {
                created.push(granularity);
            }
        }
        Ok(created)
    }

    /// Ingest one tick into a single granularity; true if a new bucket was created
    pub async fn ingest_one(&mut self, ticker: &Ticker, granularity: Granularity) -> bool {
        let bucket = granularity.truncate(ticker.timestamp);
        let price = ticker.mid_price();
        let store = self.store.as_ref();

        let in_memory = self.current.get(&granularity).map(|w| w.candle.time);
        match in_memory {
            Some(time) if time == bucket => {}
            Some(time) if time > bucket => {
                tracing::debug!(
                    granularity = %granularity,
                    tick = %ticker.timestamp,
                    "Ignoring tick older than the open bucket"
                );
                return false;
            }
            _ => {
                // Bucket rolled: flush whatever the previous bucket still holds
                if let Some(previous) = self.current.get_mut(&granularity) {
                    if previous.unsaved && persist(store, &previous.candle).await {
                        previous.unsaved = false;
                    }
                }

                match store.find(&self.product_code, granularity, bucket).await {
                    Ok(Some(candle)) => {
                        self.current.insert(
                            granularity,
                            WorkingCandle {
                                candle,
                                unsaved: false,
                                retry: false,
                            },
                        );
                    }
                    Err(e) => {
                        // The bucket may already be stored; retry the lookup next tick
                        tracing::error!(
                            granularity = %granularity,
                            error = %e,
                            "Candle lookup failed, dropping tick"
                        );
                        return false;
                    }
                    Ok(None) => {
                        let candle = Candle::open_with(ticker, granularity);
                        let saved = persist(store, &candle).await;
                        self.current.insert(
                            granularity,
                            WorkingCandle {
                                candle,
                                unsaved: !saved,
                                retry: !saved,
                            },
                        );
                        return true;
                    }
                }
            }
        }

        let Some(working) = self.current.get_mut(&granularity) else {
            return false;
        };

        let mut extremes_changed = false;
        if price > working.candle.high {
            working.candle.high = price;
            extremes_changed = true;
        }
        if price < working.candle.low {
            working.candle.low = price;
            extremes_changed = true;
        }
        working.candle.close = price;
        working.candle.volume += ticker.volume;
        working.unsaved = true;

        if extremes_changed || working.retry || granularity.is_last_second(ticker.timestamp) {
            let saved = persist(store, &working.candle).await;
            working.unsaved = !saved;
            working.retry = !saved;
        }

        false
    }

    /// Write any unsaved working candles (called on shutdown)
    pub async fn flush(&mut self) {
        let store = self.store.as_ref();
        for working in self.current.values_mut() {
            if working.unsaved && persist(store, &working.candle).await {
                working.unsaved = false;
                working.retry = false;
            }
        }
    }
}
