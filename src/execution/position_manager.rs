use crate::error::Error;
use crate::models::Direction;
use crate::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ExitReason {
    /// Opposing indicator vote
    Signal,
    ProfitTarget,
    StopLimit,
}

/// A position the engine holds on the exchange
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct OpenPosition {
    pub entry_price: f64,
    pub size: f64,
    pub opened_at: DateTime<Utc>,
    pub profit_target: f64,
    pub stop_limit: f64,
}

/// What happened to the last position that was closed
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CloseSummary {
    pub direction: Direction,
    pub entry_price: f64,
    pub exit_price: f64,
    pub size: f64,
    pub pnl: f64,
    pub reason: ExitReason,
    pub closed_at: DateTime<Utc>,
}

impl CloseSummary {
    pub fn is_profit(&self) -> bool {
        self.pnl > 0.0
    }
}

/// Engine position lifecycle
///
/// Flat -> Long -> Flat and Flat -> Short -> Flat. The re-open intent on
/// `Flat` forces the next entry onto the given side regardless of votes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum PositionState {
    Flat { reopen: Option<Direction> },
    Long(OpenPosition),
    Short(OpenPosition),
}

impl Default for PositionState {
    fn default() -> Self {
        PositionState::Flat { reopen: None }
    }
}

impl PositionState {
    pub fn name(&self) -> &'static str {
        match self {
            PositionState::Flat { .. } => "flat",
            PositionState::Long(_) => "long",
            PositionState::Short(_) => "short",
        }
    }

    pub fn is_flat(&self) -> bool {
        matches!(self, PositionState::Flat { .. })
    }

    pub fn direction(&self) -> Option<Direction> {
        match self {
            PositionState::Flat { .. } => None,
            PositionState::Long(_) => Some(Direction::Long),
            PositionState::Short(_) => Some(Direction::Short),
        }
    }

    pub fn position(&self) -> Option<&OpenPosition> {
        match self {
            PositionState::Flat { .. } => None,
            PositionState::Long(p) | PositionState::Short(p) => Some(p),
        }
    }

    pub fn reopen_intent(&self) -> Option<Direction> {
        match self {
            PositionState::Flat { reopen } => *reopen,
            _ => None,
        }
    }

    /// Flat -> Long/Short; the consumed re-open intent is dropped
    pub fn open(&mut self, direction: Direction, position: OpenPosition) -> Result<()> {
        if !self.is_flat() {
            return Err(Error::InvalidTransition {
                from: self.name().to_string(),
                to: direction.to_string(),
            });
        }
        *self = match direction {
            Direction::Long => PositionState::Long(position),
            Direction::Short => PositionState::Short(position),
        };
        Ok(())
    }

    /// Long/Short -> Flat
    ///
    /// `pnl` is the exchange-reported figure when available; otherwise it is
    /// derived from entry and exit prices.
    pub fn close(
        &mut self,
        exit_price: f64,
        pnl: Option<f64>,
        reason: ExitReason,
        closed_at: DateTime<Utc>,
        reopen: Option<Direction>,
    ) -> Result<CloseSummary> {
        let (Some(direction), Some(position)) = (self.direction(), self.position().copied()) else {
            return Err(Error::InvalidTransition {
                from: self.name().to_string(),
                to: "flat".to_string(),
            });
        };

        let pnl = pnl.unwrap_or_else(|| {
            (exit_price - position.entry_price) * position.size * direction.sign()
        });

        *self = PositionState::Flat { reopen };

        Ok(CloseSummary {
            direction,
            entry_price: position.entry_price,
            exit_price,
            size: position.size,
            pnl,
            reason,
            closed_at,
        })
    }

    /// Set or clear the re-open intent while flat
    pub fn set_reopen(&mut self, intent: Option<Direction>) {
        if let PositionState::Flat { reopen } = self {
            *reopen = intent;
        }
    }

    /// Price-based exit for the held position, if `mid` crossed a level
    pub fn price_exit(&self, mid: f64) -> Option<ExitReason> {
        match self {
            PositionState::Flat { .. } => None,
            PositionState::Long(p) => {
                if mid >= p.profit_target {
                    Some(ExitReason::ProfitTarget)
                } else if mid <= p.stop_limit {
                    Some(ExitReason::StopLimit)
                } else {
                    None
                }
            }
            PositionState::Short(p) => {
                if mid <= p.profit_target {
                    Some(ExitReason::ProfitTarget)
                } else if mid >= p.stop_limit {
                    Some(ExitReason::StopLimit)
                } else {
                    None
                }
            }
        }
    }
}

/// Profit target and stop limit for a fresh position
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExitLevels {
    pub profit_target: f64,
    pub stop_limit: f64,
}

/// Inputs that shape exit levels, taken from settings
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LevelConfig {
    pub profit_target_buffer: f64,
    pub profit_fallback_percent: f64,
    pub stop_limit_percent: f64,
}

impl ExitLevels {
    /// Targets sit just beyond the Bollinger band on the profitable side
    ///
    /// Falls back to a fixed percentage of the fill when the band is missing
    /// or the fill already went past it.
    pub fn compute(
        direction: Direction,
        fill_price: f64,
        bands: Option<(f64, f64)>,
        config: &LevelConfig,
    ) -> Self {
        let usable = |band: f64| band.is_finite() && band > 0.0;

        let profit_target = match direction {
            Direction::Long => bands
                .map(|(upper, _)| upper)
                .filter(|upper| usable(*upper))
                .map(|upper| upper * (1.0 + config.profit_target_buffer))
                .filter(|target| *target > fill_price)
                .unwrap_or(fill_price * (1.0 + config.profit_fallback_percent)),
            Direction::Short => bands
                .map(|(_, lower)| lower)
                .filter(|lower| usable(*lower))
                .map(|lower| lower * (1.0 - config.profit_target_buffer))
                .filter(|target| *target < fill_price)
                .unwrap_or(fill_price * (1.0 - config.profit_fallback_percent)),
        };

        let stop_limit = match direction {
            Direction::Long => fill_price * config.stop_limit_percent,
            Direction::Short => fill_price * (2.0 - config.stop_limit_percent),
        };

        Self {
            profit_target,
            stop_limit,
        }
    }
}

/// Intent to carry into the next Flat period after a close
///
/// A losing close in a market that is still moving re-enters the same side.
pub fn reopen_after_close(direction: Direction, pnl: f64, volatile_enough: bool) -> Option<Direction> {
    (pnl < 0.0 && volatile_enough).then_some(direction)
}
