//! The position engine: one evaluation cycle per timer tick.
//!
//! Each cycle holds the trade lock for its whole duration, reads the candle
//! store and the active `TradeParams`, tallies indicator votes on the latest
//! trade-granularity bar and decides whether to open, close or do nothing.
//! Orders go through an `OrderExecutor`; the position state only changes
//! after a confirmed fill.

use super::executor::{ClosingLeg, ExecutionRequest, OrderExecutor};
use super::position_manager::{
    reopen_after_close, CloseSummary, ExitLevels, ExitReason, LevelConfig, OpenPosition,
    PositionState,
};
use crate::backtest::OptimizerWorker;
use crate::clock::Clock;
use crate::config::Settings;
use crate::indicators::latest_atr;
use crate::ledger::SignalLedger;
use crate::market::CandleSeries;
use crate::models::{Direction, Granularity, Side, Ticker};
use crate::persistence::CandleStore;
use crate::risk::{GateTrip, OpenGates};
use crate::strategy::{IndicatorFrame, TradeParams, Votes};
use crate::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::{Arc, RwLock};
use tokio::sync::{watch, Semaphore};

/// Engine knobs, fixed at startup
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub product_code: String,
    pub trade_granularity: Granularity,
    pub data_limit: usize,
    pub min_candles: usize,
    /// Candles the ATR is computed over (1m live)
    pub atr_granularity: Granularity,
    pub atr_candles: usize,
    /// Run optimizations inline instead of on a background task
    pub back_test: bool,
    pub gates: OpenGates,
    pub levels: LevelConfig,
}

impl EngineConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            product_code: settings.product_code.clone(),
            trade_granularity: settings.trade_granularity,
            data_limit: settings.data_limit,
            min_candles: settings.min_candles,
            atr_granularity: Granularity::MINUTE,
            atr_candles: settings.atr_candles,
            back_test: settings.back_test,
            gates: OpenGates::from_settings(settings),
            levels: LevelConfig {
                profit_target_buffer: settings.profit_target_buffer,
                profit_fallback_percent: settings.profit_fallback_percent,
                stop_limit_percent: settings.stop_limit_percent,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SkipReason {
    /// Another cycle holds the trade lock
    Busy,
    InsufficientData,
    LowVolatility,
    NoParams,
    NoSignal,
    BandFilter,
    LowVolume,
    /// The latest bar predates the engine start or the last fill
    StaleBar,
}

impl From<GateTrip> for SkipReason {
    fn from(trip: GateTrip) -> Self {
        match trip {
            GateTrip::LowVolatility => SkipReason::LowVolatility,
            GateTrip::BandFilter => SkipReason::BandFilter,
            GateTrip::LowVolume => SkipReason::LowVolume,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum CycleOutcome {
    Skipped(SkipReason),
    Opened {
        direction: Direction,
        price: f64,
        size: f64,
        profit_target: f64,
        stop_limit: f64,
    },
    Closed(CloseSummary),
    /// A residual exchange position was closed instead of opening one
    Flattened { size: f64, pnl: Option<f64> },
    Aborted(String),
}

impl CycleOutcome {
    pub fn is_skipped(&self) -> bool {
        matches!(self, CycleOutcome::Skipped(_))
    }
}

impl fmt::Display for CycleOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CycleOutcome::Skipped(reason) => write!(f, "skipped ({:?})", reason),
            CycleOutcome::Opened {
                direction,
                price,
                size,
                ..
            } => write!(f, "opened {} {} @ {:.2}", direction, size, price),
            CycleOutcome::Closed(summary) => write!(
                f,
                "closed {} @ {:.2} ({:?}, pnl {:.2})",
                summary.direction, summary.exit_price, summary.reason, summary.pnl
            ),
            CycleOutcome::Flattened { size, .. } => write!(f, "flattened residual {}", size),
            CycleOutcome::Aborted(reason) => write!(f, "aborted: {}", reason),
        }
    }
}

/// Read-only view for reporting; may lag a cycle that is in progress
#[derive(Debug, Clone, Serialize)]
pub struct EngineSnapshot {
    pub product_code: String,
    pub position: PositionState,
    pub last_close: Option<CloseSummary>,
    pub params: Option<TradeParams>,
    pub profit: f64,
    pub started_at: DateTime<Utc>,
}

/// Market inputs gathered at the start of a cycle
struct Market {
    series: CandleSeries,
    ticker: Option<Ticker>,
    mid: f64,
    atr: f64,
    atr_rate: f64,
}

impl Market {
    /// Best quote on `side`, or the mid when no live ticker is available
    fn best_price(&self, side: Side) -> f64 {
        self.ticker
            .as_ref()
            .map(|t| t.best_price(side))
            .unwrap_or(self.mid)
    }
}

pub struct Engine {
    config: EngineConfig,
    store: Arc<dyn CandleStore>,
    ledger: Arc<dyn SignalLedger>,
    executor: Arc<dyn OrderExecutor>,
    clock: Arc<dyn Clock>,
    optimizer: OptimizerWorker,
    ticker: Option<watch::Receiver<Option<Ticker>>>,
    trade_lock: Semaphore,
    state: RwLock<PositionState>,
    last_close: RwLock<Option<CloseSummary>>,
    started_at: DateTime<Utc>,
}

impl Engine {
    pub fn new(
        config: EngineConfig,
        store: Arc<dyn CandleStore>,
        ledger: Arc<dyn SignalLedger>,
        executor: Arc<dyn OrderExecutor>,
        clock: Arc<dyn Clock>,
        optimizer: OptimizerWorker,
    ) -> Self {
        let started_at = clock.now();
        Self {
            config,
            store,
            ledger,
            executor,
            clock,
            optimizer,
            ticker: None,
            trade_lock: Semaphore::new(1),
            state: RwLock::new(PositionState::default()),
            last_close: RwLock::new(None),
            started_at,
        }
    }

    /// Price from the live ticker instead of the last candle close
    pub fn with_ticker(mut self, ticker: watch::Receiver<Option<Ticker>>) -> Self {
        self.ticker = Some(ticker);
        self
    }

    /// Treat bars from `time` onwards as live
    pub fn with_start_time(mut self, time: DateTime<Utc>) -> Self {
        self.started_at = time;
        self
    }

    pub fn state(&self) -> PositionState {
        self.state.read().map(|s| *s).unwrap_or_else(|e| *e.into_inner())
    }

    pub fn last_close(&self) -> Option<CloseSummary> {
        self.last_close
            .read()
            .map(|c| *c)
            .unwrap_or_else(|e| *e.into_inner())
    }

    pub fn optimizer(&self) -> &OptimizerWorker {
        &self.optimizer
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub async fn snapshot(&self) -> Result<EngineSnapshot> {
        let events = self.ledger.snapshot(&self.config.product_code).await?;
        Ok(EngineSnapshot {
            product_code: self.config.product_code.clone(),
            position: self.state(),
            last_close: self.last_close(),
            params: self.optimizer.params().map(|p| (*p).clone()),
            profit: events.profit(),
            started_at: self.started_at,
        })
    }

    /// Pick up a position left open by a previous run
    ///
    /// Exit levels fall back to fixed percentages of the entry because the
    /// bands at entry time are not recorded.
    pub async fn restore(&self) -> Result<PositionState> {
        let events = self.ledger.snapshot(&self.config.product_code).await?;
        let Some(leg) = events.open_leg() else {
            return Ok(self.state());
        };

        let levels = ExitLevels::compute(leg.direction, leg.price, None, &self.config.levels);
        let position = OpenPosition {
            entry_price: leg.price,
            size: leg.size,
            opened_at: leg.opened_at,
            profit_target: levels.profit_target,
            stop_limit: levels.stop_limit,
        };

        let mut state = self.state.write()?;
        if state.is_flat() {
            state.open(leg.direction, position)?;
            tracing::info!(
                product = %self.config.product_code,
                direction = %leg.direction,
                entry = leg.price,
                size = leg.size,
                "Restored open position from ledger"
            );
        }
        Ok(*state)
    }

    /// One evaluation; never blocks on the trade lock
    pub async fn run_cycle(&self) -> CycleOutcome {
        let Ok(_permit) = self.trade_lock.try_acquire() else {
            tracing::debug!("Evaluation skipped: previous cycle still running");
            return CycleOutcome::Skipped(SkipReason::Busy);
        };

        let outcome = match self.evaluate().await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(product = %self.config.product_code, "Cycle aborted: {}", e);
                CycleOutcome::Aborted(e.to_string())
            }
        };

        match &outcome {
            CycleOutcome::Skipped(reason) => {
                tracing::debug!(state = self.state().name(), "Cycle skipped: {:?}", reason)
            }
            CycleOutcome::Aborted(_) => {}
            other => tracing::info!(product = %self.config.product_code, "Cycle {}", other),
        }
        outcome
    }

    async fn evaluate(&self) -> Result<CycleOutcome> {
        let Some(market) = self.load_market().await? else {
            return Ok(CycleOutcome::Skipped(SkipReason::InsufficientData));
        };

        let state = self.state();
        let params = self.optimizer.params();

        if state.is_flat() {
            if let Err(trip) = self.config.gates.check_volatility(market.atr_rate) {
                return Ok(CycleOutcome::Skipped(trip.into()));
            }
            if params.is_none() {
                self.request_optimization().await;
                return Ok(CycleOutcome::Skipped(SkipReason::NoParams));
            }
        }

        let default_params = TradeParams::default();
        let frame = IndicatorFrame::compute(
            &market.series,
            params.as_deref().unwrap_or(&default_params),
        );
        let fresh = self.is_fresh_bar(&market.series).await?;
        let votes = if fresh {
            frame.latest_votes()
        } else {
            Votes::default()
        };

        match state {
            PositionState::Flat { reopen } => {
                self.try_open(&market, &frame, votes, reopen, fresh).await
            }
            PositionState::Long(position) | PositionState::Short(position) => {
                let Some(direction) = state.direction() else {
                    return Ok(CycleOutcome::Skipped(SkipReason::NoSignal));
                };
                let opposing = match direction {
                    Direction::Long => votes.sell,
                    Direction::Short => votes.buy,
                };
                let reason = if opposing > 0 {
                    Some(ExitReason::Signal)
                } else {
                    state.price_exit(market.mid)
                };
                match reason {
                    Some(reason) => self.close(&market, direction, position, reason).await,
                    None => Ok(CycleOutcome::Skipped(SkipReason::NoSignal)),
                }
            }
        }
    }

    async fn load_market(&self) -> Result<Option<Market>> {
        let product = &self.config.product_code;
        let series = CandleSeries::load(
            self.store.as_ref(),
            product,
            self.config.trade_granularity,
            self.config.data_limit,
        )
        .await?;
        if series.len() < self.config.min_candles.max(1) {
            return Ok(None);
        }

        let last_close = series.last().map(|c| c.close).unwrap_or_default();
        let ticker = self
            .ticker
            .as_ref()
            .and_then(|rx| rx.borrow().clone())
            .filter(|t| t.product_code == *product && t.is_valid());
        let mid = ticker.as_ref().map(|t| t.mid_price()).unwrap_or(last_close);

        let minutes = self
            .store
            .latest(product, self.config.atr_granularity, self.config.atr_candles)
            .await?;
        let atr = latest_atr(&minutes, self.config.atr_candles.saturating_sub(1));
        let atr_rate = OpenGates::atr_rate(atr, mid);

        Ok(Some(Market {
            series,
            ticker,
            mid,
            atr: atr.unwrap_or(0.0),
            atr_rate,
        }))
    }

    /// The latest bar may vote only once, and only if it began after startup
    async fn is_fresh_bar(&self, series: &CandleSeries) -> Result<bool> {
        let Some(bar) = series.last() else {
            return Ok(false);
        };
        if bar.time <= self.started_at {
            return Ok(false);
        }
        let last_fill = self
            .ledger
            .events(&self.config.product_code, 1)
            .await?
            .last()
            .map(|e| e.time);
        Ok(last_fill.map_or(true, |t| bar.time > t))
    }

    async fn try_open(
        &self,
        market: &Market,
        frame: &IndicatorFrame,
        votes: Votes,
        reopen: Option<Direction>,
        fresh: bool,
    ) -> Result<CycleOutcome> {
        let direction = if votes.sell > votes.buy || reopen == Some(Direction::Short) {
            Direction::Short
        } else if votes.buy > votes.sell || reopen == Some(Direction::Long) {
            Direction::Long
        } else if fresh {
            return Ok(CycleOutcome::Skipped(SkipReason::NoSignal));
        } else {
            return Ok(CycleOutcome::Skipped(SkipReason::StaleBar));
        };

        if let Err(trip) = self
            .config
            .gates
            .check_bands(frame.latest_band_width(), market.mid)
        {
            return Ok(CycleOutcome::Skipped(trip.into()));
        }

        if self.config.gates.min_hourly_volume.is_some() {
            let hourly = self
                .store
                .latest(&self.config.product_code, Granularity::HOUR, 2)
                .await?;
            if let Err(trip) = self.config.gates.check_volume(&hourly) {
                return Ok(CycleOutcome::Skipped(trip.into()));
            }
        }

        tracing::info!(
            product = %self.config.product_code,
            %direction,
            buy = votes.buy,
            sell = votes.sell,
            reopen = reopen.is_some(),
            mid = market.mid,
            hv = frame.latest_hv().unwrap_or_default(),
            "Opening position"
        );

        let side = direction.open_side();
        let request = ExecutionRequest {
            product_code: self.config.product_code.clone(),
            side,
            reference_price: market.mid,
            sizing_price: market.best_price(side),
            closing: None,
            atr: market.atr,
            atr_rate: market.atr_rate,
            reopen: reopen.is_some(),
        };
        let outcome = self.executor.execute(&request).await?;

        if !outcome.filled {
            return Ok(CycleOutcome::Aborted(format!(
                "{} order {} not filled",
                request.side, outcome.order_id
            )));
        }
        if outcome.flattened {
            return Ok(CycleOutcome::Flattened {
                size: outcome.size,
                pnl: outcome.pnl,
            });
        }

        let levels = ExitLevels::compute(
            direction,
            outcome.fill_price,
            frame.latest_bands(),
            &self.config.levels,
        );
        let position = OpenPosition {
            entry_price: outcome.fill_price,
            size: outcome.size,
            opened_at: self.clock.now(),
            profit_target: levels.profit_target,
            stop_limit: levels.stop_limit,
        };
        self.state.write()?.open(direction, position)?;

        Ok(CycleOutcome::Opened {
            direction,
            price: outcome.fill_price,
            size: outcome.size,
            profit_target: levels.profit_target,
            stop_limit: levels.stop_limit,
        })
    }

    async fn close(
        &self,
        market: &Market,
        direction: Direction,
        position: OpenPosition,
        reason: ExitReason,
    ) -> Result<CycleOutcome> {
        tracing::info!(
            product = %self.config.product_code,
            %direction,
            ?reason,
            mid = market.mid,
            target = position.profit_target,
            stop = position.stop_limit,
            "Closing position"
        );

        let side = direction.close_side();
        let request = ExecutionRequest {
            product_code: self.config.product_code.clone(),
            side,
            reference_price: market.mid,
            sizing_price: market.best_price(side),
            closing: Some(ClosingLeg {
                direction,
                entry_price: position.entry_price,
                size: position.size,
            }),
            atr: market.atr,
            atr_rate: market.atr_rate,
            reopen: false,
        };
        let outcome = self.executor.execute(&request).await?;

        if !outcome.filled {
            return Ok(CycleOutcome::Aborted(format!(
                "{} order {} not filled",
                request.side, outcome.order_id
            )));
        }

        let pnl = outcome.pnl.unwrap_or_else(|| {
            (outcome.fill_price - position.entry_price) * position.size * direction.sign()
        });
        let reopen = reopen_after_close(
            direction,
            pnl,
            self.config.gates.is_volatile(market.atr_rate),
        );

        let summary = self.state.write()?.close(
            outcome.fill_price,
            Some(pnl),
            reason,
            self.clock.now(),
            reopen,
        )?;
        *self.last_close.write()? = Some(summary);

        if let Some(intent) = reopen {
            tracing::info!(%intent, pnl, "Losing close in a moving market; re-entering next cycle");
        }

        self.optimizer.reset_backoff()?;
        self.request_optimization().await;

        Ok(CycleOutcome::Closed(summary))
    }

    async fn request_optimization(&self) {
        if self.config.back_test {
            if let Err(e) = self.optimizer.run_if_ready().await {
                tracing::error!("Inline optimization failed: {}", e);
            }
        } else if self.optimizer.spawn_if_ready().is_some() {
            tracing::debug!(product = %self.config.product_code, "Optimization started");
        }
    }
}
