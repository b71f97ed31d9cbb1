//! Signal ledger: the append-only record of executed BUY/SELL fills.
//!
//! `SignalEvents` is the in-memory view used both for the persisted ledger
//! (loaded from a `SignalLedger`) and for scratch ledgers during backtests.

pub mod memory;

pub use memory::MemoryLedger;

use crate::models::{Direction, Side};
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Size below which a leg is considered fully closed
const SIZE_EPSILON: f64 = 1e-9;

/// One executed fill
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SignalEvent {
    pub time: DateTime<Utc>,
    pub product_code: String,
    pub side: Side,
    pub price: f64,
    pub size: f64,
    pub atr: f64,
    pub atr_rate: f64,
    pub pnl: f64,
    pub reopen: bool,
}

impl SignalEvent {
    /// Bare fill without volatility context (backtests)
    pub fn fill(
        product_code: impl Into<String>,
        time: DateTime<Utc>,
        side: Side,
        price: f64,
        size: f64,
    ) -> Self {
        Self {
            time,
            product_code: product_code.into(),
            side,
            price,
            size,
            atr: 0.0,
            atr_rate: 0.0,
            pnl: 0.0,
            reopen: false,
        }
    }
}

/// Position still open at the end of the ledger
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct OpenLeg {
    pub direction: Direction,
    pub opened_at: DateTime<Utc>,
    pub price: f64,
    pub size: f64,
}

/// A matched open/close pair
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RoundTrip {
    pub direction: Direction,
    pub opened_at: DateTime<Utc>,
    pub closed_at: DateTime<Utc>,
    pub entry_price: f64,
    pub exit_price: f64,
    pub size: f64,
    pub pnl: f64,
}

/// Time-ordered view of a product's fills
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SignalEvents {
    pub signals: Vec<SignalEvent>,
}

impl SignalEvents {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_events(mut signals: Vec<SignalEvent>) -> Self {
        signals.sort_by_key(|s| s.time);
        Self { signals }
    }

    pub fn len(&self) -> usize {
        self.signals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signals.is_empty()
    }

    pub fn last(&self) -> Option<&SignalEvent> {
        self.signals.last()
    }

    /// A long entry is allowed on an empty ledger or after a SELL that happened earlier
    pub fn can_buy(&self, time: DateTime<Utc>) -> bool {
        match self.last() {
            None => true,
            Some(last) => last.side == Side::Sell && last.time < time,
        }
    }

    /// A long exit is allowed only after a BUY that happened earlier
    pub fn can_sell(&self, time: DateTime<Utc>) -> bool {
        match self.last() {
            None => false,
            Some(last) => last.side == Side::Buy && last.time < time,
        }
    }

    /// Append a BUY if `can_buy`; returns whether it was recorded
    pub fn buy(&mut self, product_code: &str, time: DateTime<Utc>, price: f64, size: f64) -> bool {
        if !self.can_buy(time) {
            return false;
        }
        self.signals
            .push(SignalEvent::fill(product_code, time, Side::Buy, price, size));
        true
    }

    /// Append a SELL if `can_sell`; returns whether it was recorded
    pub fn sell(&mut self, product_code: &str, time: DateTime<Utc>, price: f64, size: f64) -> bool {
        if !self.can_sell(time) {
            return false;
        }
        self.signals
            .push(SignalEvent::fill(product_code, time, Side::Sell, price, size));
        true
    }

    /// Append without side checks (events already confirmed by the exchange)
    pub fn push(&mut self, event: SignalEvent) {
        self.signals.push(event);
    }

    /// Events at or after `time`
    pub fn collect_after(&self, time: DateTime<Utc>) -> SignalEvents {
        SignalEvents {
            signals: self
                .signals
                .iter()
                .filter(|s| s.time >= time)
                .cloned()
                .collect(),
        }
    }

    /// Pair opens with closes in time order
    ///
    /// A fill on the open leg's side adds to it (size-weighted price), an
    /// opposite fill closes up to the open size and any excess opens a new
    /// leg the other way. This keeps consecutive same-side fills (forced
    /// re-entries) from shifting every later pair.
    fn walk(&self) -> (Vec<RoundTrip>, Option<OpenLeg>) {
        let mut trips = Vec::new();
        let mut open: Option<OpenLeg> = None;

        for event in &self.signals {
            if event.size <= 0.0 {
                continue;
            }
            match open.as_mut() {
                None => {
                    open = Some(OpenLeg {
                        direction: direction_of(event.side),
                        opened_at: event.time,
                        price: event.price,
                        size: event.size,
                    });
                }
                Some(leg) if event.side == leg.direction.open_side() => {
                    let total = leg.size + event.size;
                    leg.price = (leg.price * leg.size + event.price * event.size) / total;
                    leg.size = total;
                }
                Some(leg) => {
                    let closed = event.size.min(leg.size);
                    trips.push(RoundTrip {
                        direction: leg.direction,
                        opened_at: leg.opened_at,
                        closed_at: event.time,
                        entry_price: leg.price,
                        exit_price: event.price,
                        size: closed,
                        pnl: (event.price - leg.price) * closed * leg.direction.sign(),
                    });

                    let remaining = leg.size - closed;
                    let excess = event.size - closed;
                    if remaining > SIZE_EPSILON {
                        leg.size = remaining;
                    } else if excess > SIZE_EPSILON {
                        open = Some(OpenLeg {
                            direction: direction_of(event.side),
                            opened_at: event.time,
                            price: event.price,
                            size: excess,
                        });
                    } else {
                        open = None;
                    }
                }
            }
        }

        (trips, open)
    }

    pub fn round_trips(&self) -> Vec<RoundTrip> {
        self.walk().0
    }

    pub fn open_leg(&self) -> Option<OpenLeg> {
        self.walk().1
    }

    /// True when every open has been matched by a close
    pub fn is_flat(&self) -> bool {
        self.open_leg().is_none()
    }

    /// Realized P&L over closed round trips; an open leg contributes nothing
    ///
    /// A ledger holding only an open BUY scores 0 here. Callers valuing a held
    /// position should add [`SignalEvents::open_mark`].
    pub fn profit(&self) -> f64 {
        self.round_trips().iter().map(|t| t.pnl).sum()
    }

    /// Notional of the open leg at its entry price (price × size), 0 when flat
    pub fn open_mark(&self) -> f64 {
        self.open_leg().map(|leg| leg.price * leg.size).unwrap_or(0.0)
    }
}

fn direction_of(side: Side) -> Direction {
    match side {
        Side::Buy => Direction::Long,
        Side::Sell => Direction::Short,
    }
}

/// Durable, append-only storage of fills
#[async_trait]
pub trait SignalLedger: Send + Sync {
    /// Append a fill. Returns false when (product, time) already exists, which
    /// is still a success: the fill was recorded earlier.
    async fn record(&self, event: &SignalEvent) -> Result<bool>;

    /// Most recent `limit` fills, oldest first
    async fn events(&self, product_code: &str, limit: usize) -> Result<SignalEvents>;

    /// Fills at or after `time`, oldest first
    async fn events_after(&self, product_code: &str, time: DateTime<Utc>) -> Result<SignalEvents>;

    /// Every fill recorded for the product
    async fn snapshot(&self, product_code: &str) -> Result<SignalEvents> {
        self.events_after(product_code, DateTime::UNIX_EPOCH).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(minute: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + chrono::Duration::minutes(minute)
    }

    fn event(minute: i64, side: Side, price: f64, size: f64) -> SignalEvent {
        SignalEvent::fill("FX_BTC_JPY", at(minute), side, price, size)
    }

    #[test]
    fn test_empty_ledger_profit_is_zero() {
        let events = SignalEvents::new();
        assert_eq!(events.profit(), 0.0);
        assert!(events.is_flat());
        assert_eq!(events.open_mark(), 0.0);
    }

    #[test]
    fn test_single_buy_is_held() {
        let events = SignalEvents::from_events(vec![event(0, Side::Buy, 100.0, 2.0)]);
        assert_eq!(events.profit(), 0.0);
        assert!(!events.is_flat());
        assert_eq!(events.open_mark(), 200.0);
        assert_eq!(events.open_leg().unwrap().direction, Direction::Long);
    }

    #[test]
    fn test_long_round_trip() {
        let events = SignalEvents::from_events(vec![
            event(0, Side::Buy, 100.0, 2.0),
            event(5, Side::Sell, 110.0, 2.0),
        ]);
        assert_eq!(events.profit(), 20.0);
        assert!(events.is_flat());
    }

    #[test]
    fn test_short_round_trip() {
        let events = SignalEvents::from_events(vec![
            event(0, Side::Sell, 110.0, 1.0),
            event(5, Side::Buy, 100.0, 1.0),
        ]);
        assert_eq!(events.profit(), 10.0);
        let trips = events.round_trips();
        assert_eq!(trips.len(), 1);
        assert_eq!(trips[0].direction, Direction::Short);
    }

    #[test]
    fn test_profit_excludes_open_leg() {
        let events = SignalEvents::from_events(vec![
            event(0, Side::Buy, 100.0, 1.0),
            event(1, Side::Sell, 105.0, 1.0),
            event(2, Side::Buy, 90.0, 1.0),
        ]);
        assert_eq!(events.profit(), 5.0);
        assert_eq!(events.open_mark(), 90.0);
    }

    #[test]
    fn test_consecutive_same_side_fills_scale_in() {
        // Re-entry on the same side before the close: pairs by position, not parity
        let events = SignalEvents::from_events(vec![
            event(0, Side::Buy, 100.0, 1.0),
            event(1, Side::Buy, 110.0, 1.0),
            event(2, Side::Sell, 120.0, 2.0),
        ]);
        // average entry 105, exit 120 on size 2
        assert_eq!(events.profit(), 30.0);
        assert!(events.is_flat());
    }

    #[test]
    fn test_oversized_close_flips_position() {
        let events = SignalEvents::from_events(vec![
            event(0, Side::Buy, 100.0, 1.0),
            event(1, Side::Sell, 110.0, 3.0),
        ]);
        assert_eq!(events.profit(), 10.0);
        let leg = events.open_leg().unwrap();
        assert_eq!(leg.direction, Direction::Short);
        assert_eq!(leg.size, 2.0);
    }

    #[test]
    fn test_can_buy_and_sell_alternate_in_time() {
        let mut events = SignalEvents::new();
        assert!(!events.can_sell(at(0)));
        assert!(events.buy("FX_BTC_JPY", at(0), 100.0, 1.0));
        assert!(!events.buy("FX_BTC_JPY", at(1), 100.0, 1.0));
        // Same timestamp as the open is rejected
        assert!(!events.sell("FX_BTC_JPY", at(0), 101.0, 1.0));
        assert!(events.sell("FX_BTC_JPY", at(1), 101.0, 1.0));
        assert!(!events.sell("FX_BTC_JPY", at(2), 101.0, 1.0));
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn test_collect_after() {
        let events = SignalEvents::from_events(vec![
            event(0, Side::Buy, 100.0, 1.0),
            event(5, Side::Sell, 101.0, 1.0),
            event(10, Side::Buy, 102.0, 1.0),
        ]);
        let recent = events.collect_after(at(5));
        assert_eq!(recent.len(), 2);
        assert_eq!(recent.signals[0].side, Side::Sell);
    }
}
