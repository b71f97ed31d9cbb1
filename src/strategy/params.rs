use serde::{Deserialize, Serialize};
use std::fmt;

/// Indicator families, in ranking tie-break order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IndicatorKind {
    Ema,
    BollingerBands,
    Macd,
    Ichimoku,
    Rsi,
}

impl IndicatorKind {
    pub const ALL: [IndicatorKind; 5] = [
        IndicatorKind::Ema,
        IndicatorKind::BollingerBands,
        IndicatorKind::Macd,
        IndicatorKind::Ichimoku,
        IndicatorKind::Rsi,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            IndicatorKind::Ema => "ema",
            IndicatorKind::BollingerBands => "bbands",
            IndicatorKind::Macd => "macd",
            IndicatorKind::Ichimoku => "ichimoku",
            IndicatorKind::Rsi => "rsi",
        }
    }
}

impl fmt::Display for IndicatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EmaParams {
    pub fast: usize,
    pub slow: usize,
}

impl Default for EmaParams {
    fn default() -> Self {
        Self { fast: 7, slow: 14 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BollingerParams {
    pub n: usize,
    pub k: f64,
}

impl Default for BollingerParams {
    fn default() -> Self {
        Self { n: 20, k: 2.0 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MacdParams {
    pub fast: usize,
    pub slow: usize,
    pub signal: usize,
}

impl Default for MacdParams {
    fn default() -> Self {
        Self {
            fast: 12,
            slow: 26,
            signal: 9,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RsiParams {
    pub period: usize,
    pub buy_threshold: f64,
    pub sell_threshold: f64,
}

impl Default for RsiParams {
    fn default() -> Self {
        Self {
            period: 14,
            buy_threshold: 30.0,
            sell_threshold: 70.0,
        }
    }
}

/// Best parameters found for one family, with their backtest profit
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Fitted<P> {
    pub enabled: bool,
    pub params: P,
    pub score: f64,
}

impl<P> Fitted<P> {
    pub fn new(params: P, score: f64) -> Self {
        Self {
            enabled: false,
            params,
            score,
        }
    }
}

/// Which indicators trade, and with which parameters
///
/// Produced wholesale by the optimizer; the engine only reads it.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TradeParams {
    pub ema: Fitted<EmaParams>,
    pub bbands: Fitted<BollingerParams>,
    pub macd: Fitted<MacdParams>,
    pub ichimoku: Fitted<()>,
    pub rsi: Fitted<RsiParams>,
}

impl TradeParams {
    pub fn is_enabled(&self, kind: IndicatorKind) -> bool {
        match kind {
            IndicatorKind::Ema => self.ema.enabled,
            IndicatorKind::BollingerBands => self.bbands.enabled,
            IndicatorKind::Macd => self.macd.enabled,
            IndicatorKind::Ichimoku => self.ichimoku.enabled,
            IndicatorKind::Rsi => self.rsi.enabled,
        }
    }

    pub fn score(&self, kind: IndicatorKind) -> f64 {
        match kind {
            IndicatorKind::Ema => self.ema.score,
            IndicatorKind::BollingerBands => self.bbands.score,
            IndicatorKind::Macd => self.macd.score,
            IndicatorKind::Ichimoku => self.ichimoku.score,
            IndicatorKind::Rsi => self.rsi.score,
        }
    }

    pub fn set_enabled(&mut self, kind: IndicatorKind, enabled: bool) {
        match kind {
            IndicatorKind::Ema => self.ema.enabled = enabled,
            IndicatorKind::BollingerBands => self.bbands.enabled = enabled,
            IndicatorKind::Macd => self.macd.enabled = enabled,
            IndicatorKind::Ichimoku => self.ichimoku.enabled = enabled,
            IndicatorKind::Rsi => self.rsi.enabled = enabled,
        }
    }

    pub fn enabled_kinds(&self) -> Vec<IndicatorKind> {
        IndicatorKind::ALL
            .into_iter()
            .filter(|kind| self.is_enabled(*kind))
            .collect()
    }

    /// Convenience for tests and manual runs: defaults with the given families on
    pub fn with_enabled(kinds: &[IndicatorKind]) -> Self {
        let mut params = Self::default();
        for kind in kinds {
            params.set_enabled(*kind, true);
        }
        params
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let params = TradeParams::default();
        assert_eq!(params.ema.params, EmaParams { fast: 7, slow: 14 });
        assert_eq!(params.bbands.params.n, 20);
        assert_eq!(params.macd.params.signal, 9);
        assert_eq!(params.rsi.params.period, 14);
        assert!(params.enabled_kinds().is_empty());
    }

    #[test]
    fn test_enabled_kinds_follow_declaration_order() {
        let params = TradeParams::with_enabled(&[IndicatorKind::Rsi, IndicatorKind::Ema]);
        assert_eq!(
            params.enabled_kinds(),
            vec![IndicatorKind::Ema, IndicatorKind::Rsi]
        );
        assert!(!params.is_enabled(IndicatorKind::Macd));
    }
}
