//! Brute-force parameter search over every indicator family.
//!
//! Each combination replays its crossover rule over the whole series into a
//! scratch ledger (long-only, size 1.0) and is scored by that ledger's
//! realized profit. The search is pure: the same series always yields the
//! same `TradeParams`.

use crate::indicators::{bollinger_bands, ema, ichimoku_cloud, macd, rsi};
use crate::ledger::SignalEvents;
use crate::market::CandleSeries;
use crate::models::Side;
use crate::strategy::signals::{bbands_cross, ema_cross, ichimoku_cross, macd_cross, rsi_cross};
use crate::strategy::{
    BollingerParams, EmaParams, Fitted, IndicatorKind, MacdParams, RsiParams, TradeParams,
};
use chrono::{DateTime, Utc};
use std::ops::Range;

/// Half-open search ranges for each family
#[derive(Debug, Clone, PartialEq)]
pub struct SearchRanges {
    pub ema_fast: Range<usize>,
    pub ema_slow: Range<usize>,
    pub bb_n: Range<usize>,
    /// k values to try
    pub bb_k: Vec<f64>,
    pub macd_fast: Range<usize>,
    pub macd_slow: Range<usize>,
    pub macd_signal: Range<usize>,
    pub rsi_period: Range<usize>,
    pub rsi_buy_threshold: f64,
    pub rsi_sell_threshold: f64,
}

impl Default for SearchRanges {
    fn default() -> Self {
        Self {
            ema_fast: 5..50,
            ema_slow: 12..50,
            bb_n: 10..20,
            // 1.9 and 2.0, built from integers so the values are exact
            bb_k: (0..2).map(|j| (19 + j) as f64 / 10.0).collect(),
            macd_fast: 10..25,
            macd_slow: 20..33,
            macd_signal: 5..18,
            rsi_period: 5..30,
            rsi_buy_threshold: 30.0,
            rsi_sell_threshold: 70.0,
        }
    }
}

/// Read-only view of the series columns shared by every replay
struct Replay<'a> {
    product_code: &'a str,
    times: Vec<DateTime<Utc>>,
    closes: Vec<f64>,
    highs: Vec<f64>,
    lows: Vec<f64>,
}

impl<'a> Replay<'a> {
    fn new(series: &'a CandleSeries) -> Self {
        Self {
            product_code: series.product_code(),
            times: series.times(),
            closes: series.closes(),
            highs: series.highs(),
            lows: series.lows(),
        }
    }

    fn len(&self) -> usize {
        self.closes.len()
    }

    /// Run a rule over every bar and return the scratch ledger's profit
    fn score(&self, rule: impl Fn(usize) -> Option<Side>) -> f64 {
        let mut events = SignalEvents::new();
        for i in 1..self.len() {
            match rule(i) {
                Some(Side::Buy) => {
                    events.buy(self.product_code, self.times[i], self.closes[i], 1.0);
                }
                Some(Side::Sell) => {
                    events.sell(self.product_code, self.times[i], self.closes[i], 1.0);
                }
                None => {}
            }
        }
        events.profit()
    }
}

/// Keep `candidate` only if it strictly beats the current best
fn keep_best<P>(best: &mut Fitted<P>, params: P, score: f64) {
    if score > best.score {
        best.params = params;
        best.score = score;
    }
}

fn optimize_ema(replay: &Replay, ranges: &SearchRanges) -> Fitted<EmaParams> {
    let mut best = Fitted::new(EmaParams::default(), 0.0);

    // Every period is used many times; compute each line once
    let max_period = ranges.ema_fast.end.max(ranges.ema_slow.end);
    let lines: Vec<Vec<f64>> = (0..max_period).map(|p| ema(&replay.closes, p)).collect();

    for fast in ranges.ema_fast.clone() {
        for slow in ranges.ema_slow.clone() {
            if replay.len() <= fast.max(slow) {
                continue;
            }
            let params = EmaParams { fast, slow };
            let score = replay.score(|i| ema_cross(&lines[fast], &lines[slow], i, &params));
            keep_best(&mut best, params, score);
        }
    }
    best
}

fn optimize_bbands(replay: &Replay, ranges: &SearchRanges) -> Fitted<BollingerParams> {
    let mut best = Fitted::new(BollingerParams::default(), 0.0);

    for n in ranges.bb_n.clone() {
        if replay.len() <= n {
            continue;
        }
        for &k in &ranges.bb_k {
            let params = BollingerParams { n, k };
            let bands = bollinger_bands(&replay.closes, n, k);
            let score = replay.score(|i| bbands_cross(&bands, &replay.closes, i, &params));
            keep_best(&mut best, params, score);
        }
    }
    best
}

fn optimize_macd(replay: &Replay, ranges: &SearchRanges) -> Fitted<MacdParams> {
    let mut best = Fitted::new(MacdParams::default(), 0.0);

    for fast in ranges.macd_fast.clone() {
        for slow in ranges.macd_slow.clone() {
            if fast >= slow {
                continue;
            }
            for signal in ranges.macd_signal.clone() {
                if replay.len() <= slow + signal {
                    continue;
                }
                let params = MacdParams { fast, slow, signal };
                let lines = macd(&replay.closes, fast, slow, signal);
                let score = replay.score(|i| macd_cross(&lines, i, &params));
                keep_best(&mut best, params, score);
            }
        }
    }
    best
}

fn optimize_ichimoku(replay: &Replay) -> Fitted<()> {
    let mut best = Fitted::new((), 0.0);
    if replay.len() <= crate::indicators::ichimoku::SENKOU_B_PERIOD {
        return best;
    }

    let cloud = ichimoku_cloud(&replay.highs, &replay.lows, &replay.closes);
    let score = replay.score(|i| ichimoku_cross(&cloud, &replay.highs, &replay.lows, i));
    keep_best(&mut best, (), score);
    best
}

fn optimize_rsi(replay: &Replay, ranges: &SearchRanges) -> Fitted<RsiParams> {
    let mut best = Fitted::new(RsiParams::default(), 0.0);

    for period in ranges.rsi_period.clone() {
        if replay.len() <= period {
            continue;
        }
        let params = RsiParams {
            period,
            buy_threshold: ranges.rsi_buy_threshold,
            sell_threshold: ranges.rsi_sell_threshold,
        };
        let values = rsi(&replay.closes, period);
        let score = replay.score(|i| rsi_cross(&values, i, &params));
        keep_best(&mut best, params, score);
    }
    best
}

/// Fit every family, then enable the `num_ranking` best profitable ones
///
/// Returns None when no family made a profit.
pub fn optimize(
    series: &CandleSeries,
    ranges: &SearchRanges,
    num_ranking: usize,
) -> Option<TradeParams> {
    let replay = Replay::new(series);

    let mut params = TradeParams {
        ema: optimize_ema(&replay, ranges),
        bbands: optimize_bbands(&replay, ranges),
        macd: optimize_macd(&replay, ranges),
        ichimoku: optimize_ichimoku(&replay),
        rsi: optimize_rsi(&replay, ranges),
    };

    let mut ranking: Vec<(IndicatorKind, f64)> = IndicatorKind::ALL
        .into_iter()
        .map(|kind| (kind, params.score(kind)))
        .collect();
    // Stable: equal scores keep declaration order
    ranking.sort_by(|a, b| b.1.total_cmp(&a.1));

    let mut any_enabled = false;
    for (kind, score) in ranking.into_iter().take(num_ranking) {
        if score > 0.0 {
            params.set_enabled(kind, true);
            any_enabled = true;
        }
    }

    tracing::debug!(
        "Optimized {} over {} candles: ema={:.2} bb={:.2} macd={:.2} ichimoku={:.2} rsi={:.2}",
        series.product_code(),
        series.len(),
        params.ema.score,
        params.bbands.score,
        params.macd.score,
        params.ichimoku.score,
        params.rsi.score
    );

    any_enabled.then_some(params)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::create_test_candles;
    use crate::models::Granularity;

    fn series_from_closes(closes: &[f64]) -> CandleSeries {
        let ohlc: Vec<(f64, f64, f64, f64)> = closes
            .iter()
            .map(|&c| (c, c + 0.5, c - 0.5, c))
            .collect();
        CandleSeries::from_candles("TEST", Granularity::MINUTE, 1000, create_test_candles(&ohlc))
    }

    fn wave(len: usize) -> Vec<f64> {
        (0..len)
            .map(|i| 1000.0 + 50.0 * (i as f64 / 8.0).sin() + i as f64 * 0.2)
            .collect()
    }

    #[test]
    fn test_flat_series_yields_none() {
        let series = series_from_closes(&vec![100.0; 200]);
        assert!(optimize(&series, &SearchRanges::default(), 3).is_none());
    }

    #[test]
    fn test_too_short_series_yields_none() {
        let series = series_from_closes(&wave(8));
        assert!(optimize(&series, &SearchRanges::default(), 3).is_none());
    }

    #[test]
    fn test_oscillating_series_enables_profitable_indicators() {
        let series = series_from_closes(&wave(300));
        let params = optimize(&series, &SearchRanges::default(), 2).unwrap();

        let enabled = params.enabled_kinds();
        assert!(!enabled.is_empty());
        assert!(enabled.len() <= 2);
        for kind in enabled {
            assert!(params.score(kind) > 0.0, "{} enabled without profit", kind);
        }
    }

    #[test]
    fn test_enabled_are_the_top_scores() {
        let series = series_from_closes(&wave(300));
        let params = optimize(&series, &SearchRanges::default(), 1).unwrap();

        let enabled = params.enabled_kinds();
        assert_eq!(enabled.len(), 1);
        let top = params.score(enabled[0]);
        for kind in IndicatorKind::ALL {
            assert!(params.score(kind) <= top);
        }
    }

    #[test]
    fn test_optimizer_is_deterministic() {
        let series = series_from_closes(&wave(250));
        let first = optimize(&series, &SearchRanges::default(), 3);
        let second = optimize(&series, &SearchRanges::default(), 3);
        assert_eq!(first, second);
    }

    #[test]
    fn test_defaults_kept_without_improvement() {
        let series = series_from_closes(&vec![100.0; 100]);
        let replay = Replay::new(&series);
        let fitted = optimize_ema(&replay, &SearchRanges::default());
        assert_eq!(fitted.params, EmaParams::default());
        assert_eq!(fitted.score, 0.0);
        assert!(!fitted.enabled);
    }

    #[test]
    fn test_ema_grid_includes_fast_above_slow() {
        // EMA(3) crossing above EMA(2) buys the dip at 90, the reverse sells at 120
        let series = series_from_closes(&[100.0, 100.0, 100.0, 110.0, 110.0, 90.0, 90.0, 120.0, 120.0]);
        let replay = Replay::new(&series);
        let ranges = SearchRanges {
            ema_fast: 3..4,
            ema_slow: 2..3,
            ..SearchRanges::default()
        };

        let fitted = optimize_ema(&replay, &ranges);
        assert_eq!(fitted.params, EmaParams { fast: 3, slow: 2 });
        assert_eq!(fitted.score, 30.0);
    }

    #[test]
    fn test_scratch_ledger_is_long_only() {
        let series = series_from_closes(&[100.0, 100.0, 110.0, 120.0]);
        let replay = Replay::new(&series);

        // A sell before any buy is ignored, then buy at 110 and sell at 120
        let score = replay.score(|i| match i {
            1 => Some(Side::Sell),
            2 => Some(Side::Buy),
            3 => Some(Side::Sell),
            _ => None,
        });
        assert_eq!(score, 10.0);
    }
}
