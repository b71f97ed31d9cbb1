use super::ExchangeClient;
use crate::error::Error;
use crate::ledger::OpenLeg;
use crate::models::{MarketOrder, OrderState, OrderStatus, PositionLeg, Side, Ticker};
use crate::Result;
use async_trait::async_trait;
use rust_decimal::prelude::ToPrimitive;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;

#[derive(Debug, Default)]
struct PaperBook {
    /// Cash plus realized pnl
    balance: f64,
    /// Signed net size (positive long)
    net_size: f64,
    average_price: f64,
    orders: HashMap<String, OrderStatus>,
}

/// Simulated exchange filled against the live ticker
///
/// Market orders fill immediately at the best ask (buy) or best bid (sell).
/// One net position is tracked; collateral is the balance minus the margin
/// held by that position.
#[derive(Clone)]
pub struct PaperExchange {
    ticker: watch::Receiver<Option<Ticker>>,
    book: Arc<Mutex<PaperBook>>,
}

impl PaperExchange {
    pub fn new(ticker: watch::Receiver<Option<Ticker>>, initial_balance: f64) -> Self {
        Self {
            ticker,
            book: Arc::new(Mutex::new(PaperBook {
                balance: initial_balance,
                ..PaperBook::default()
            })),
        }
    }

    fn latest_ticker(&self) -> Result<Ticker> {
        self.ticker
            .borrow()
            .clone()
            .ok_or_else(|| Error::Exchange("no ticker received yet".into()))
    }

    /// Realized balance (excludes open pnl)
    pub fn balance(&self) -> Result<f64> {
        Ok(self.book.lock()?.balance)
    }

    /// Signed net position size
    pub fn net_size(&self) -> Result<f64> {
        Ok(self.book.lock()?.net_size)
    }

    /// Put a position left open by a previous run back on the book
    ///
    /// The engine restores its state from the ledger; without this the first
    /// close would open a fresh position on an empty book instead.
    pub fn seed_open_leg(&self, leg: &OpenLeg) -> Result<()> {
        let mut book = self.book.lock()?;
        if book.net_size != 0.0 {
            return Err(Error::Exchange("paper book already holds a position".into()));
        }
        book.apply_fill(leg.direction.open_side(), leg.price, leg.size);
        tracing::info!(
            direction = %leg.direction,
            price = leg.price,
            size = leg.size,
            "Seeded paper book from ledger"
        );
        Ok(())
    }
}

impl PaperBook {
    fn margin(&self) -> f64 {
        self.net_size.abs() * self.average_price
    }

    /// Apply a fill to the net position, realizing pnl on any reduced part
    fn apply_fill(&mut self, side: Side, price: f64, size: f64) {
        let signed = size * side_sign(side);

        if self.net_size == 0.0 || self.net_size.signum() == signed.signum() {
            let total = self.net_size.abs() + size;
            self.average_price = (self.average_price * self.net_size.abs() + price * size) / total;
            self.net_size += signed;
            return;
        }

        let closed = size.min(self.net_size.abs());
        self.balance += (price - self.average_price) * closed * self.net_size.signum();

        let remaining = self.net_size + signed;
        if remaining.abs() < 1e-12 {
            self.net_size = 0.0;
            self.average_price = 0.0;
        } else if remaining.signum() != self.net_size.signum() {
            // Flipped through zero; the excess opens at this price
            self.net_size = remaining;
            self.average_price = price;
        } else {
            self.net_size = remaining;
        }
    }
}

#[async_trait]
impl ExchangeClient for PaperExchange {
    async fn send_order(&self, order: &MarketOrder) -> Result<String> {
        let ticker = self.latest_ticker()?;
        if ticker.product_code != order.product_code {
            return Err(Error::Exchange(format!(
                "paper exchange quotes {} only",
                ticker.product_code
            )));
        }

        let size = order
            .size
            .to_f64()
            .ok_or_else(|| Error::InvalidNumber(order.size.to_string()))?;
        let price = match order.side {
            Side::Buy => ticker.best_ask,
            Side::Sell => ticker.best_bid,
        };

        let mut book = self.book.lock()?;

        // Only orders that grow the position need margin
        let reduces = book.net_size != 0.0
            && book.net_size.signum() != side_sign(order.side)
            && size <= book.net_size.abs() + 1e-12;
        if !reduces && size * price > book.balance - book.margin() {
            tracing::warn!(size, price, "Paper order refused: insufficient collateral");
            return Ok(String::new());
        }

        book.apply_fill(order.side, price, size);

        let id = format!("PAPER-{}", uuid::Uuid::new_v4().simple());
        book.orders.insert(
            id.clone(),
            OrderStatus {
                acceptance_id: id.clone(),
                state: OrderState::Completed,
                side: order.side,
                average_price: price,
                size,
            },
        );
        tracing::debug!(order_id = %id, side = %order.side, size, price, "Paper fill");
        Ok(id)
    }

    async fn list_orders(&self, _product_code: &str, acceptance_id: &str) -> Result<Vec<OrderStatus>> {
        let book = self.book.lock()?;
        Ok(book.orders.get(acceptance_id).cloned().into_iter().collect())
    }

    async fn get_positions(&self, _product_code: &str) -> Result<Vec<PositionLeg>> {
        let mid = self.ticker.borrow().as_ref().map(|t| t.mid_price());
        let book = self.book.lock()?;
        if book.net_size == 0.0 {
            return Ok(Vec::new());
        }

        let side = if book.net_size > 0.0 { Side::Buy } else { Side::Sell };
        let mark = mid.unwrap_or(book.average_price);
        Ok(vec![PositionLeg {
            side,
            size: book.net_size.abs(),
            price: book.average_price,
            pnl: (mark - book.average_price) * book.net_size,
        }])
    }

    async fn get_collateral(&self) -> Result<f64> {
        let book = self.book.lock()?;
        Ok((book.balance - book.margin()).max(0.0))
    }
}

fn side_sign(side: Side) -> f64 {
    match side {
        Side::Buy => 1.0,
        Side::Sell => -1.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Direction;
    use chrono::Utc;
    use rust_decimal::Decimal;

    fn ticker(bid: f64, ask: f64) -> Ticker {
        Ticker {
            product_code: "FX_BTC_JPY".to_string(),
            timestamp: Utc::now(),
            best_bid: bid,
            best_ask: ask,
            volume: 1.0,
        }
    }

    fn order(side: Side, size: Decimal) -> MarketOrder {
        MarketOrder {
            product_code: "FX_BTC_JPY".to_string(),
            side,
            size,
            minute_to_expire: 1,
            time_in_force: "GTC".to_string(),
        }
    }

    #[tokio::test]
    async fn test_round_trip_realizes_pnl() {
        let (tx, rx) = watch::channel(Some(ticker(99.0, 101.0)));
        let exchange = PaperExchange::new(rx, 1000.0);

        let id = exchange.send_order(&order(Side::Buy, Decimal::new(2, 0))).await.unwrap();
        let statuses = exchange.list_orders("FX_BTC_JPY", &id).await.unwrap();
        assert_eq!(statuses[0].state, OrderState::Completed);
        assert_eq!(statuses[0].average_price, 101.0);

        // 2 held at 101, collateral reduced by the margin
        assert_eq!(exchange.get_collateral().await.unwrap(), 798.0);

        tx.send(Some(ticker(111.0, 113.0))).unwrap();
        let legs = exchange.get_positions("FX_BTC_JPY").await.unwrap();
        assert_eq!(legs.len(), 1);
        assert_eq!(legs[0].side, Side::Buy);
        assert_eq!(legs[0].pnl, 22.0);

        exchange.send_order(&order(Side::Sell, Decimal::new(2, 0))).await.unwrap();
        assert_eq!(exchange.balance().unwrap(), 1020.0);
        assert!(exchange.get_positions("FX_BTC_JPY").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_insufficient_collateral_returns_empty_id() {
        let (_tx, rx) = watch::channel(Some(ticker(99.0, 101.0)));
        let exchange = PaperExchange::new(rx, 100.0);

        let id = exchange.send_order(&order(Side::Buy, Decimal::new(5, 0))).await.unwrap();
        assert!(id.is_empty());
        assert_eq!(exchange.net_size().unwrap(), 0.0);
    }

    #[tokio::test]
    async fn test_no_ticker_is_an_error() {
        let (_tx, rx) = watch::channel(None);
        let exchange = PaperExchange::new(rx, 100.0);
        assert!(exchange.send_order(&order(Side::Buy, Decimal::ONE)).await.is_err());
    }

    #[tokio::test]
    async fn test_seeded_leg_is_reported_and_closable() {
        let (_tx, rx) = watch::channel(Some(ticker(9_000.0, 9_001.0)));
        let exchange = PaperExchange::new(rx, 10_000.0);
        let leg = OpenLeg {
            direction: Direction::Long,
            opened_at: Utc::now(),
            price: 10_000.0,
            size: 0.5,
        };
        exchange.seed_open_leg(&leg).unwrap();
        assert!(exchange.seed_open_leg(&leg).is_err());

        let legs = exchange.get_positions("FX_BTC_JPY").await.unwrap();
        assert_eq!(legs.len(), 1);
        assert_eq!(legs[0].side, Side::Buy);
        assert_eq!(legs[0].size, 0.5);
        assert_eq!(exchange.get_collateral().await.unwrap(), 5_000.0);

        exchange.send_order(&order(Side::Sell, Decimal::new(5, 1))).await.unwrap();
        assert_eq!(exchange.net_size().unwrap(), 0.0);
        assert_eq!(exchange.balance().unwrap(), 9_500.0);
    }

    #[test]
    fn test_oversized_sell_flips_short() {
        let mut book = PaperBook {
            balance: 1000.0,
            ..PaperBook::default()
        };
        book.apply_fill(Side::Buy, 100.0, 1.0);
        book.apply_fill(Side::Sell, 110.0, 3.0);

        assert_eq!(book.balance, 1010.0);
        assert_eq!(book.net_size, -2.0);
        assert_eq!(book.average_price, 110.0);
    }
}
