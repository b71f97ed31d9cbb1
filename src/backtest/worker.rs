use super::optimizer::{optimize, SearchRanges};
use crate::clock::Clock;
use crate::market::CandleSeries;
use crate::models::Granularity;
use crate::persistence::CandleStore;
use crate::strategy::TradeParams;
use crate::Result;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;

/// When the next optimizer run may start after runs that found nothing
#[derive(Debug, Clone)]
pub struct RetryBackoff {
    base: Duration,
    max: Duration,
    retry: bool,
    failures: u32,
    not_before: Option<DateTime<Utc>>,
    exhausted: bool,
}

impl RetryBackoff {
    /// # Arguments
    /// * `base` - Delay after the first empty run; doubles with each further one
    /// * `max` - Upper bound on the delay
    /// * `retry` - When false, the first empty run stops all retries until reset
    pub fn new(base: Duration, max: Duration, retry: bool) -> Self {
        Self {
            base,
            max,
            retry,
            failures: 0,
            not_before: None,
            exhausted: false,
        }
    }

    pub fn is_ready(&self, now: DateTime<Utc>) -> bool {
        !self.exhausted && self.not_before.map_or(true, |t| now >= t)
    }

    /// Register an empty run; returns the delay before the next attempt
    pub fn record_failure(&mut self, now: DateTime<Utc>) -> Option<Duration> {
        if !self.retry {
            self.exhausted = true;
            return None;
        }

        let factor = 2u32.saturating_pow(self.failures);
        let delay = self.base.saturating_mul(factor).min(self.max);
        self.failures = self.failures.saturating_add(1);
        self.not_before = Some(now + chrono::Duration::from_std(delay).unwrap_or_default());
        Some(delay)
    }

    /// Successful run (or an explicit request after a close) clears the backoff
    pub fn reset(&mut self) {
        self.failures = 0;
        self.not_before = None;
        self.exhausted = false;
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }
}

/// Clears the in-flight flag when a run ends, however it ends
struct RunningGuard(Arc<AtomicBool>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Owns the shared `TradeParams` and re-fits them in the background
///
/// Clones share params, backoff and the in-flight flag.
#[derive(Clone)]
pub struct OptimizerWorker {
    store: Arc<dyn CandleStore>,
    clock: Arc<dyn Clock>,
    product_code: String,
    granularity: Granularity,
    data_limit: usize,
    num_ranking: usize,
    ranges: SearchRanges,
    params: Arc<RwLock<Option<Arc<TradeParams>>>>,
    backoff: Arc<Mutex<RetryBackoff>>,
    running: Arc<AtomicBool>,
}

impl OptimizerWorker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn CandleStore>,
        clock: Arc<dyn Clock>,
        product_code: impl Into<String>,
        granularity: Granularity,
        data_limit: usize,
        num_ranking: usize,
        backoff: RetryBackoff,
    ) -> Self {
        Self {
            store,
            clock,
            product_code: product_code.into(),
            granularity,
            data_limit,
            num_ranking,
            ranges: SearchRanges::default(),
            params: Arc::new(RwLock::new(None)),
            backoff: Arc::new(Mutex::new(backoff)),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_ranges(mut self, ranges: SearchRanges) -> Self {
        self.ranges = ranges;
        self
    }

    /// Current parameters (None until a run finds something profitable)
    pub fn params(&self) -> Option<Arc<TradeParams>> {
        self.params.read().ok().and_then(|p| p.clone())
    }

    /// Replace the parameters directly (manual override, tests)
    pub fn set_params(&self, params: Option<TradeParams>) -> Result<()> {
        *self.params.write()? = params.map(Arc::new);
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn is_ready(&self) -> bool {
        let now = self.clock.now();
        self.backoff
            .lock()
            .map(|b| b.is_ready(now))
            .unwrap_or(false)
    }

    /// Clear any backoff so the next request runs immediately
    pub fn reset_backoff(&self) -> Result<()> {
        self.backoff.lock()?.reset();
        Ok(())
    }

    pub fn backoff(&self) -> Option<RetryBackoff> {
        self.backoff.lock().ok().map(|b| b.clone())
    }

    fn try_start(&self) -> Option<RunningGuard> {
        if !self.is_ready() {
            return None;
        }
        self.running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| RunningGuard(self.running.clone()))
    }

    /// Start a background run if none is in flight and the backoff allows it
    pub fn spawn_if_ready(&self) -> Option<JoinHandle<()>> {
        let guard = self.try_start()?;
        let worker = self.clone();
        Some(tokio::spawn(async move {
            let _guard = guard;
            if let Err(e) = worker.run().await {
                tracing::error!("Optimizer run failed for {}: {}", worker.product_code, e);
            }
        }))
    }

    /// Run inline (backtest replays); no-op when not ready or already running
    pub async fn run_if_ready(&self) -> Result<Option<Arc<TradeParams>>> {
        let Some(_guard) = self.try_start() else {
            return Ok(self.params());
        };
        self.run().await
    }

    /// Load the series, search on the blocking pool and swap the result in
    async fn run(&self) -> Result<Option<Arc<TradeParams>>> {
        let series = CandleSeries::load(
            self.store.as_ref(),
            &self.product_code,
            self.granularity,
            self.data_limit,
        )
        .await?;

        let candles = series.len();
        let ranges = self.ranges.clone();
        let num_ranking = self.num_ranking;
        let result =
            tokio::task::spawn_blocking(move || optimize(&series, &ranges, num_ranking)).await?;

        match result {
            Some(params) => {
                let params = Arc::new(params);
                *self.params.write()? = Some(params.clone());
                self.backoff.lock()?.reset();
                tracing::info!(
                    product = %self.product_code,
                    candles,
                    enabled = ?params.enabled_kinds(),
                    "Trade params updated"
                );
                Ok(Some(params))
            }
            None => {
                *self.params.write()? = None;
                let delay = self.backoff.lock()?.record_failure(self.clock.now());
                match delay {
                    Some(delay) => tracing::info!(
                        product = %self.product_code,
                        candles,
                        "No profitable indicator; retrying in {:?}",
                        delay
                    ),
                    None => tracing::info!(
                        product = %self.product_code,
                        candles,
                        "No profitable indicator; retries disabled"
                    ),
                }
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::indicators::create_test_candles;
    use crate::persistence::MemoryCandleStore;
    use chrono::TimeZone;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let mut backoff =
            RetryBackoff::new(Duration::from_secs(10), Duration::from_secs(25), true);
        let now = start();

        assert!(backoff.is_ready(now));
        assert_eq!(backoff.record_failure(now), Some(Duration::from_secs(10)));
        assert!(!backoff.is_ready(now + chrono::Duration::seconds(9)));
        assert!(backoff.is_ready(now + chrono::Duration::seconds(10)));
        assert_eq!(backoff.record_failure(now), Some(Duration::from_secs(20)));
        assert_eq!(backoff.record_failure(now), Some(Duration::from_secs(25)));
        assert_eq!(backoff.failures(), 3);

        backoff.reset();
        assert!(backoff.is_ready(now));
        assert_eq!(backoff.failures(), 0);
    }

    #[test]
    fn test_backoff_without_retry_stops() {
        let mut backoff =
            RetryBackoff::new(Duration::from_secs(10), Duration::from_secs(60), false);
        assert_eq!(backoff.record_failure(start()), None);
        assert!(backoff.is_exhausted());
        assert!(!backoff.is_ready(start() + chrono::Duration::days(1)));
    }

    fn worker_with(store: MemoryCandleStore, clock: Arc<ManualClock>) -> OptimizerWorker {
        OptimizerWorker::new(
            Arc::new(store),
            clock,
            "TEST",
            Granularity::MINUTE,
            500,
            2,
            RetryBackoff::new(Duration::from_secs(600), Duration::from_secs(3600), true),
        )
    }

    #[tokio::test]
    async fn test_flat_series_backs_off() {
        let store = MemoryCandleStore::new();
        store
            .extend(create_test_candles(&vec![(100.0, 100.0, 100.0, 100.0); 120]))
            .unwrap();
        let clock = Arc::new(ManualClock::new(start()));
        let worker = worker_with(store, clock.clone());

        assert!(worker.run_if_ready().await.unwrap().is_none());
        assert!(!worker.is_ready());
        assert!(!worker.is_running());

        // Still inside the backoff window: nothing runs
        assert!(worker.spawn_if_ready().is_none());

        clock.advance(Duration::from_secs(600));
        assert!(worker.is_ready());
    }

    #[tokio::test]
    async fn test_profitable_series_sets_params() {
        let ohlc: Vec<(f64, f64, f64, f64)> = (0..300)
            .map(|i| {
                let c = 1000.0 + 50.0 * (i as f64 / 8.0).sin();
                (c, c + 0.5, c - 0.5, c)
            })
            .collect();
        let store = MemoryCandleStore::new();
        store.extend(create_test_candles(&ohlc)).unwrap();
        let worker = worker_with(store, Arc::new(ManualClock::new(start())));

        let handle = worker.spawn_if_ready().unwrap();
        handle.await.unwrap();

        let params = worker.params().unwrap();
        assert!(!params.enabled_kinds().is_empty());
        assert!(worker.is_ready());
    }
}
