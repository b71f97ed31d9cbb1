use super::{SignalEvent, SignalEvents, SignalLedger};
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

/// In-memory ledger keyed by (product, time)
///
/// Used for backtest mode and tests. Clones share the same events.
#[derive(Clone, Default)]
pub struct MemoryLedger {
    events: Arc<RwLock<HashMap<String, BTreeMap<DateTime<Utc>, SignalEvent>>>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SignalLedger for MemoryLedger {
    async fn record(&self, event: &SignalEvent) -> Result<bool> {
        let mut events = self.events.write()?;
        let product = events.entry(event.product_code.clone()).or_default();
        if product.contains_key(&event.time) {
            tracing::debug!(
                "Signal for {} at {} already recorded",
                event.product_code,
                event.time
            );
            return Ok(false);
        }
        product.insert(event.time, event.clone());
        Ok(true)
    }

    async fn events(&self, product_code: &str, limit: usize) -> Result<SignalEvents> {
        let events = self.events.read()?;
        let mut recent: Vec<SignalEvent> = events
            .get(product_code)
            .map(|product| product.values().rev().take(limit).cloned().collect())
            .unwrap_or_default();
        recent.reverse();
        Ok(SignalEvents { signals: recent })
    }

    async fn events_after(&self, product_code: &str, time: DateTime<Utc>) -> Result<SignalEvents> {
        let events = self.events.read()?;
        let signals = events
            .get(product_code)
            .map(|product| product.range(time..).map(|(_, e)| e.clone()).collect())
            .unwrap_or_default();
        Ok(SignalEvents { signals })
    }
}
