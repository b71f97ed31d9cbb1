use crate::api::ExchangeClient;
use crate::clock::Clock;
use crate::config::Settings;
use crate::error::Error;
use crate::ledger::{SignalEvent, SignalLedger};
use crate::models::{Direction, MarketOrder, OrderState, Side};
use crate::Result;
use async_trait::async_trait;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::{Decimal, RoundingStrategy};
use std::sync::Arc;
use std::time::Duration;

/// The engine position an order is meant to close
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClosingLeg {
    pub direction: Direction,
    pub entry_price: f64,
    pub size: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionRequest {
    pub product_code: String,
    pub side: Side,
    /// Mid price (the simulated fill)
    pub reference_price: f64,
    /// Best price on the order's side, used to size an open from collateral
    pub sizing_price: f64,
    /// Set when closing; None when opening
    pub closing: Option<ClosingLeg>,
    pub atr: f64,
    pub atr_rate: f64,
    pub reopen: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionOutcome {
    pub order_id: String,
    pub filled: bool,
    pub fill_price: f64,
    pub size: f64,
    /// Realized pnl of a close (reported by the exchange or derived)
    pub pnl: Option<f64>,
    /// The order flattened a residual exchange position instead of opening one
    pub flattened: bool,
}

impl ExecutionOutcome {
    fn not_filled(order_id: impl Into<String>, size: f64) -> Self {
        Self {
            order_id: order_id.into(),
            filled: false,
            fill_price: 0.0,
            size,
            pnl: None,
            flattened: false,
        }
    }
}

/// Turns an engine decision into a confirmed fill (or a clean failure)
#[async_trait]
pub trait OrderExecutor: Send + Sync {
    async fn execute(&self, request: &ExecutionRequest) -> Result<ExecutionOutcome>;
}

/// Order submission and fill polling knobs
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayConfig {
    pub use_percent: f64,
    pub size_decimals: u32,
    pub minute_to_expire: u32,
    pub time_in_force: String,
    pub poll_interval: Duration,
    pub fill_timeout: Duration,
}

impl GatewayConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            use_percent: settings.use_percent,
            size_decimals: settings.size_decimals,
            minute_to_expire: settings.minute_to_expire,
            time_in_force: settings.time_in_force.clone(),
            poll_interval: settings.fill_poll_interval(),
            fill_timeout: settings.fill_timeout(),
        }
    }

    /// ⌈timeout / interval⌉, at least one
    pub fn max_polls(&self) -> u32 {
        let interval = self.poll_interval.as_millis().max(1);
        let polls = self.fill_timeout.as_millis().div_ceil(interval);
        polls.clamp(1, u32::MAX as u128) as u32
    }
}

/// Round an order size down to `decimals` places
///
/// Rejects NaN, infinite, and anything that is not positive after rounding.
pub fn floor_size(raw: f64, decimals: u32) -> Result<Decimal> {
    if !raw.is_finite() || raw <= 0.0 {
        return Err(Error::InvalidSize(raw));
    }
    let size = Decimal::from_f64(raw)
        .ok_or(Error::InvalidSize(raw))?
        .round_dp_with_strategy(decimals, RoundingStrategy::ToZero);
    if size <= Decimal::ZERO {
        return Err(Error::InvalidSize(size.to_f64().unwrap_or(0.0)));
    }
    Ok(size)
}

/// Live gateway: market orders against an `ExchangeClient`
pub struct OrderGateway {
    exchange: Arc<dyn ExchangeClient>,
    ledger: Arc<dyn SignalLedger>,
    clock: Arc<dyn Clock>,
    config: GatewayConfig,
}

impl OrderGateway {
    pub fn new(
        exchange: Arc<dyn ExchangeClient>,
        ledger: Arc<dyn SignalLedger>,
        clock: Arc<dyn Clock>,
        config: GatewayConfig,
    ) -> Self {
        Self {
            exchange,
            ledger,
            clock,
            config,
        }
    }

    /// Size from collateral, or the residual legs the order would flatten
    async fn size_order(&self, request: &ExecutionRequest) -> Result<(f64, Option<f64>, bool)> {
        let legs = self.exchange.get_positions(&request.product_code).await?;
        let opposing: Vec<_> = legs
            .iter()
            .filter(|leg| leg.side == request.side.opposite())
            .collect();

        if !opposing.is_empty() {
            let size: f64 = opposing.iter().map(|leg| leg.size).sum();
            let pnl: f64 = opposing.iter().map(|leg| leg.pnl).sum();
            let flattened = request.closing.is_none();
            if flattened {
                tracing::warn!(
                    product = %request.product_code,
                    size,
                    "Residual {} position found; flattening instead of opening",
                    request.side.opposite()
                );
            }
            return Ok((size, Some(pnl), flattened));
        }

        if let Some(closing) = request.closing {
            return Ok((closing.size, None, false));
        }

        let collateral = self.exchange.get_collateral().await?;
        Ok((collateral * self.config.use_percent / request.sizing_price, None, false))
    }

    /// Poll until the order completes, is refused, or the timeout runs out
    async fn wait_for_fill(
        &self,
        request: &ExecutionRequest,
        order_id: &str,
    ) -> Option<(f64, f64)> {
        let max_polls = self.config.max_polls();

        for attempt in 1..=max_polls {
            self.clock.sleep(self.config.poll_interval).await;

            let orders = match self
                .exchange
                .list_orders(&request.product_code, order_id)
                .await
            {
                Ok(orders) => orders,
                Err(e) => {
                    tracing::warn!(order_id, "Order status poll failed: {}", e);
                    return None;
                }
            };

            let Some(order) = orders.first() else {
                tracing::debug!(order_id, attempt, "Order not visible yet");
                continue;
            };

            match order.state {
                OrderState::Completed if order.side == request.side => {
                    return Some((order.average_price, order.size));
                }
                OrderState::Completed => {
                    tracing::warn!(
                        order_id,
                        "Order completed on {} but {} was sent",
                        order.side,
                        request.side
                    );
                    return None;
                }
                OrderState::Active => {
                    tracing::debug!(order_id, attempt, "Order still active");
                }
                OrderState::Canceled | OrderState::Expired | OrderState::Rejected => {
                    tracing::warn!(order_id, state = ?order.state, "Order did not fill");
                    return None;
                }
            }
        }

        tracing::warn!(
            order_id,
            "No fill after {:?}; the order may still be live",
            self.config.fill_timeout
        );
        None
    }
}

#[async_trait]
impl OrderExecutor for OrderGateway {
    async fn execute(&self, request: &ExecutionRequest) -> Result<ExecutionOutcome> {
        let (raw_size, reported_pnl, flattened) = self.size_order(request).await?;
        let size = floor_size(raw_size, self.config.size_decimals)?;
        let size_f64 = size.to_f64().unwrap_or(raw_size);

        let order = MarketOrder {
            product_code: request.product_code.clone(),
            side: request.side,
            size,
            minute_to_expire: self.config.minute_to_expire,
            time_in_force: self.config.time_in_force.clone(),
        };
        tracing::info!(
            product = %order.product_code,
            side = %order.side,
            size = %order.size,
            reference = request.reference_price,
            sizing = request.sizing_price,
            "Submitting market order"
        );

        let order_id = match self.exchange.send_order(&order).await {
            Ok(id) if id.is_empty() => {
                tracing::warn!(side = %order.side, "Order refused without acceptance id");
                return Ok(ExecutionOutcome::not_filled("", size_f64));
            }
            Ok(id) => id,
            Err(e) => {
                tracing::error!(side = %order.side, "Order submission failed: {}", e);
                return Ok(ExecutionOutcome::not_filled("", size_f64));
            }
        };

        let Some((fill_price, filled_size)) = self.wait_for_fill(request, &order_id).await else {
            return Ok(ExecutionOutcome::not_filled(order_id, size_f64));
        };

        let pnl = reported_pnl.or_else(|| {
            request
                .closing
                .map(|leg| (fill_price - leg.entry_price) * filled_size * leg.direction.sign())
        });

        let event = SignalEvent {
            time: self.clock.now(),
            product_code: request.product_code.clone(),
            side: request.side,
            price: fill_price,
            size: filled_size,
            atr: request.atr,
            atr_rate: request.atr_rate,
            pnl: pnl.unwrap_or(0.0),
            reopen: request.reopen,
        };
        if let Err(e) = self.ledger.record(&event).await {
            tracing::error!(order_id = %order_id, "Fill not recorded in ledger: {}", e);
        }

        tracing::info!(
            order_id = %order_id,
            side = %request.side,
            price = fill_price,
            size = filled_size,
            "Order filled"
        );

        Ok(ExecutionOutcome {
            order_id,
            filled: true,
            fill_price,
            size: filled_size,
            pnl,
            flattened,
        })
    }
}

/// Backtest gateway: instant fill of 1.0 at the reference price
pub struct SimulatedGateway {
    ledger: Arc<dyn SignalLedger>,
    clock: Arc<dyn Clock>,
}

impl SimulatedGateway {
    pub const FILL_SIZE: f64 = 1.0;

    pub fn new(ledger: Arc<dyn SignalLedger>, clock: Arc<dyn Clock>) -> Self {
        Self { ledger, clock }
    }
}

#[async_trait]
impl OrderExecutor for SimulatedGateway {
    async fn execute(&self, request: &ExecutionRequest) -> Result<ExecutionOutcome> {
        let price = request.reference_price;
        if !price.is_finite() || price <= 0.0 {
            return Err(Error::InvalidSize(price));
        }

        let size = request.closing.map(|leg| leg.size).unwrap_or(Self::FILL_SIZE);
        let pnl = request
            .closing
            .map(|leg| (price - leg.entry_price) * size * leg.direction.sign());

        let event = SignalEvent {
            time: self.clock.now(),
            product_code: request.product_code.clone(),
            side: request.side,
            price,
            size,
            atr: request.atr,
            atr_rate: request.atr_rate,
            pnl: pnl.unwrap_or(0.0),
            reopen: request.reopen,
        };
        self.ledger.record(&event).await?;

        Ok(ExecutionOutcome {
            order_id: format!("SIM-{}", uuid::Uuid::new_v4()),
            filled: true,
            fill_price: price,
            size,
            pnl,
            flattened: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::ledger::MemoryLedger;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_floor_size() {
        assert_eq!(floor_size(0.123_456, 4).unwrap(), Decimal::new(1234, 4));
        assert_eq!(floor_size(1.999_99, 4).unwrap(), Decimal::new(19999, 4));
        assert!(matches!(floor_size(f64::NAN, 4), Err(Error::InvalidSize(_))));
        assert!(matches!(floor_size(-1.0, 4), Err(Error::InvalidSize(_))));
        assert!(matches!(floor_size(0.000_01, 4), Err(Error::InvalidSize(_))));
    }

    #[test]
    fn test_max_polls_rounds_up() {
        let mut config = GatewayConfig {
            use_percent: 0.9,
            size_decimals: 4,
            minute_to_expire: 1,
            time_in_force: "GTC".to_string(),
            poll_interval: Duration::from_secs(15),
            fill_timeout: Duration::from_secs(60),
        };
        assert_eq!(config.max_polls(), 4);

        config.fill_timeout = Duration::from_secs(61);
        assert_eq!(config.max_polls(), 5);

        config.fill_timeout = Duration::ZERO;
        assert_eq!(config.max_polls(), 1);
    }

    #[tokio::test]
    async fn test_simulated_gateway_fills_and_records() {
        let ledger = Arc::new(MemoryLedger::new());
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        ));
        let gateway = SimulatedGateway::new(ledger.clone(), clock);

        let open = ExecutionRequest {
            product_code: "FX_BTC_JPY".to_string(),
            side: Side::Buy,
            reference_price: 100.0,
            sizing_price: 100.5,
            closing: None,
            atr: 1.0,
            atr_rate: 0.01,
            reopen: false,
        };
        let outcome = gateway.execute(&open).await.unwrap();
        assert!(outcome.filled);
        assert_eq!(outcome.size, 1.0);
        assert_eq!(outcome.pnl, None);

        let events = ledger.events("FX_BTC_JPY", 10).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events.signals[0].atr, 1.0);
    }
}
