//! Exchange-facing interfaces.
//!
//! The engine only talks to the exchange through these two traits, so the
//! live REST client, the paper exchange and test doubles are interchangeable.

pub mod bitflyer;
pub mod paper;

pub use bitflyer::BitflyerClient;
pub use paper::PaperExchange;

use crate::models::{MarketOrder, OrderStatus, PositionLeg, Ticker};
use crate::Result;
use async_trait::async_trait;

/// Source of best bid/ask snapshots
#[async_trait]
pub trait TickerSource: Send + Sync {
    async fn get_ticker(&self, product_code: &str) -> Result<Ticker>;
}

/// Order, position and balance operations the engine needs
#[async_trait]
pub trait ExchangeClient: Send + Sync {
    /// Submit a market order; returns the acceptance id (may be empty when
    /// the exchange refuses, e.g. insufficient margin)
    async fn send_order(&self, order: &MarketOrder) -> Result<String>;

    /// Status entries for one acceptance id (empty while not yet visible)
    async fn list_orders(&self, product_code: &str, acceptance_id: &str) -> Result<Vec<OrderStatus>>;

    /// Open position legs for the product
    async fn get_positions(&self, product_code: &str) -> Result<Vec<PositionLeg>>;

    /// Collateral available for new orders
    async fn get_collateral(&self) -> Result<f64>;
}
