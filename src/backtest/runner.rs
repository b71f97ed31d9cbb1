use super::metrics::BacktestMetrics;
use super::worker::{OptimizerWorker, RetryBackoff};
use crate::clock::ManualClock;
use crate::config::Settings;
use crate::execution::{CycleOutcome, Engine, EngineConfig, PositionState, SimulatedGateway, SkipReason};
use crate::ledger::{MemoryLedger, SignalLedger};
use crate::models::Candle;
use crate::persistence::{CandleStore, MemoryCandleStore};
use crate::strategy::TradeParams;
use crate::Result;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

/// Result of replaying one series through the engine
#[derive(Debug, Clone, Serialize)]
pub struct BacktestReport {
    /// Realized profit from the ledger
    pub profit: f64,
    /// Notional of a position still open at the end
    pub open_mark: f64,
    pub cycles: usize,
    pub opened: usize,
    pub closed: usize,
    pub aborted: usize,
    pub skipped: HashMap<SkipReason, usize>,
    pub final_state: PositionState,
    pub params: Option<TradeParams>,
    pub metrics: BacktestMetrics,
}

/// Replays candles bar by bar through a back-test `Engine`
///
/// Each bar is written to an in-memory store, the clock is moved to the
/// bar's last second and one cycle runs. The optimizer only ever sees bars
/// up to the one being evaluated.
pub struct BacktestRunner {
    settings: Settings,
}

impl BacktestRunner {
    pub fn new(settings: Settings) -> Self {
        Self { settings }
    }

    fn engine_config(&self) -> EngineConfig {
        let mut config = EngineConfig::from_settings(&self.settings);
        config.back_test = true;
        // Replays carry a single granularity: ATR comes from the trade bars
        config.atr_granularity = self.settings.trade_granularity;
        config.gates.min_hourly_volume = None;
        config
    }

    /// Run a backtest over candles of the trade granularity, oldest first
    pub async fn run(&self, candles: Vec<Candle>) -> Result<BacktestReport> {
        let granularity = self.settings.trade_granularity;
        let product = self.settings.product_code.clone();
        let mut candles: Vec<Candle> = candles
            .into_iter()
            .filter(|c| c.granularity == granularity && c.product_code == product)
            .collect();
        candles.sort_by_key(|c| c.time);

        let store = Arc::new(MemoryCandleStore::new());
        let ledger = Arc::new(MemoryLedger::new());
        let start = candles
            .first()
            .map(|c| c.time - chrono::Duration::seconds(1))
            .unwrap_or_default();
        let clock = Arc::new(ManualClock::new(start));

        let optimizer = OptimizerWorker::new(
            store.clone(),
            clock.clone(),
            product.clone(),
            granularity,
            self.settings.data_limit,
            self.settings.num_ranking,
            RetryBackoff::new(
                self.settings.optimizer_backoff_base(),
                self.settings.optimizer_backoff_max(),
                self.settings.continue_optimizing,
            ),
        );
        let executor = Arc::new(SimulatedGateway::new(ledger.clone(), clock.clone()));
        let engine = Engine::new(
            self.engine_config(),
            store.clone(),
            ledger.clone(),
            executor,
            clock.clone(),
            optimizer,
        );

        tracing::info!(
            product = %product,
            granularity = %granularity,
            candles = candles.len(),
            "Starting backtest replay"
        );

        let mut report_counts = Counts::default();
        let bar_end = granularity.duration() - chrono::Duration::seconds(1);

        for candle in &candles {
            store.save(candle).await?;
            clock.set(candle.time + bar_end);
            report_counts.add(&engine.run_cycle().await);
        }

        let events = ledger.snapshot(&product).await?;
        let metrics = BacktestMetrics::from_round_trips(&events.round_trips());

        tracing::info!(
            profit = events.profit(),
            trades = metrics.total_trades,
            state = engine.state().name(),
            "Backtest finished"
        );

        Ok(BacktestReport {
            profit: events.profit(),
            open_mark: events.open_mark(),
            cycles: candles.len(),
            opened: report_counts.opened,
            closed: report_counts.closed,
            aborted: report_counts.aborted,
            skipped: report_counts.skipped,
            final_state: engine.state(),
            params: engine.optimizer().params().map(|p| (*p).clone()),
            metrics,
        })
    }

    /// Replay the most recent candles held in a store
    pub async fn run_from_store(&self, store: &dyn CandleStore, limit: usize) -> Result<BacktestReport> {
        let candles = store
            .latest(&self.settings.product_code, self.settings.trade_granularity, limit)
            .await?;
        self.run(candles).await
    }
}

#[derive(Default)]
struct Counts {
    opened: usize,
    closed: usize,
    aborted: usize,
    skipped: HashMap<SkipReason, usize>,
}

impl Counts {
    fn add(&mut self, outcome: &CycleOutcome) {
        match outcome {
            CycleOutcome::Opened { .. } => self.opened += 1,
            CycleOutcome::Closed(_) => self.closed += 1,
            CycleOutcome::Aborted(_) | CycleOutcome::Flattened { .. } => self.aborted += 1,
            CycleOutcome::Skipped(reason) => *self.skipped.entry(*reason).or_default() += 1,
        }
    }
}
