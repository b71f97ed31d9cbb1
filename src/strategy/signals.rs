//! Crossover rules and the per-cycle indicator frame.
//!
//! Each rule looks at bar `i` and `i - 1` and answers with the side it votes
//! for, if any. The same rules drive both live voting and the optimizer's
//! replays so the two can never disagree.

use super::params::{BollingerParams, EmaParams, IndicatorKind, MacdParams, RsiParams, TradeParams};
use crate::indicators::{
    bollinger_bands, ema, historical_volatility, ichimoku_cloud, macd, rsi, BollingerBands,
    IchimokuCloud, Macd,
};
use crate::indicators::ichimoku::SENKOU_B_PERIOD;
use crate::market::CandleSeries;
use crate::models::Side;

/// Lookback for the diagnostic historical volatility line
pub const HV_PERIOD: usize = 21;

/// Golden cross buys, dead cross sells
pub fn ema_cross(fast: &[f64], slow: &[f64], i: usize, params: &EmaParams) -> Option<Side> {
    if i == 0 || i < params.fast.max(params.slow) || i >= fast.len().min(slow.len()) {
        return None;
    }
    if fast[i - 1] < slow[i - 1] && fast[i] >= slow[i] {
        Some(Side::Buy)
    } else if fast[i - 1] > slow[i - 1] && fast[i] <= slow[i] {
        Some(Side::Sell)
    } else {
        None
    }
}

/// Close re-entering the band from below buys, from above sells
pub fn bbands_cross(
    bands: &BollingerBands,
    closes: &[f64],
    i: usize,
    params: &BollingerParams,
) -> Option<Side> {
    if i == 0 || i < params.n || i >= closes.len().min(bands.upper.len()) {
        return None;
    }
    if bands.lower[i - 1] > closes[i - 1] && bands.lower[i] <= closes[i] {
        Some(Side::Buy)
    } else if bands.upper[i - 1] < closes[i - 1] && bands.upper[i] >= closes[i] {
        Some(Side::Sell)
    } else {
        None
    }
}

/// MACD crossing its signal line below zero buys, above zero sells
pub fn macd_cross(m: &Macd, i: usize, params: &MacdParams) -> Option<Side> {
    let slow = params.fast.max(params.slow);
    if i == 0 || i < (slow + params.signal).saturating_sub(1) || i >= m.macd.len() {
        return None;
    }
    let (line, signal) = (&m.macd, &m.signal);
    if line[i] < 0.0 && signal[i] < 0.0 && line[i - 1] < signal[i - 1] && line[i] >= signal[i] {
        Some(Side::Buy)
    } else if line[i] > 0.0
        && signal[i] > 0.0
        && line[i - 1] > signal[i - 1]
        && line[i] <= signal[i]
    {
        Some(Side::Sell)
    } else {
        None
    }
}

/// Three-signal confirmation: chikou breaks the bar, price clears the cloud,
/// tenkan sits on the right side of kijun
pub fn ichimoku_cross(cloud: &IchimokuCloud, highs: &[f64], lows: &[f64], i: usize) -> Option<Side> {
    if i < SENKOU_B_PERIOD || i >= cloud.chikou.len().min(highs.len()).min(lows.len()) {
        return None;
    }
    let c = cloud;
    if c.chikou[i - 1] < highs[i - 1]
        && c.chikou[i] >= highs[i]
        && c.senkou_a[i] < lows[i]
        && c.senkou_b[i] < lows[i]
        && c.tenkan[i] > c.kijun[i]
    {
        Some(Side::Buy)
    } else if c.chikou[i - 1] > lows[i - 1]
        && c.chikou[i] <= lows[i]
        && c.senkou_a[i] > highs[i]
        && c.senkou_b[i] > highs[i]
        && c.tenkan[i] < c.kijun[i]
    {
        Some(Side::Sell)
    } else {
        None
    }
}

/// RSI leaving oversold buys, leaving overbought sells
pub fn rsi_cross(values: &[f64], i: usize, params: &RsiParams) -> Option<Side> {
    if i == 0 || i >= values.len() {
        return None;
    }
    let (prev, curr) = (values[i - 1], values[i]);
    // 0 and 100 mean warm-up or a one-sided window
    if prev == 0.0 || prev == 100.0 {
        return None;
    }
    if prev < params.buy_threshold && curr >= params.buy_threshold {
        Some(Side::Buy)
    } else if prev > params.sell_threshold && curr <= params.sell_threshold {
        Some(Side::Sell)
    } else {
        None
    }
}

/// Buy and sell tallies at one bar
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Votes {
    pub buy: usize,
    pub sell: usize,
}

impl Votes {
    fn add(&mut self, side: Option<Side>) {
        match side {
            Some(Side::Buy) => self.buy += 1,
            Some(Side::Sell) => self.sell += 1,
            None => {}
        }
    }

    pub fn is_empty(&self) -> bool {
        self.buy == 0 && self.sell == 0
    }
}

/// Indicator lines for one evaluation, computed from scratch each time
#[derive(Debug, Clone)]
pub struct IndicatorFrame {
    closes: Vec<f64>,
    highs: Vec<f64>,
    lows: Vec<f64>,
    ema: Option<(EmaParams, Vec<f64>, Vec<f64>)>,
    bbands: Option<(BollingerParams, BollingerBands)>,
    macd: Option<(MacdParams, Macd)>,
    ichimoku: Option<IchimokuCloud>,
    rsi: Option<(RsiParams, Vec<f64>)>,
    /// Bands used by the open filter and profit target, always computed
    pub filter_bands: BollingerBands,
    pub hv: Vec<f64>,
}

impl IndicatorFrame {
    pub fn compute(series: &CandleSeries, params: &TradeParams) -> Self {
        let closes = series.closes();
        let highs = series.highs();
        let lows = series.lows();

        let ema_lines = params.ema.enabled.then(|| {
            let p = params.ema.params;
            (p, ema(&closes, p.fast), ema(&closes, p.slow))
        });
        let bb = params.bbands.params;
        let filter_bands = bollinger_bands(&closes, bb.n, bb.k);
        let bbands = params.bbands.enabled.then(|| (bb, filter_bands.clone()));
        let macd_lines = params.macd.enabled.then(|| {
            let p = params.macd.params;
            (p, macd(&closes, p.fast, p.slow, p.signal))
        });
        let ichimoku = params
            .ichimoku
            .enabled
            .then(|| ichimoku_cloud(&highs, &lows, &closes));
        let rsi_line = params.rsi.enabled.then(|| {
            let p = params.rsi.params;
            (p, rsi(&closes, p.period))
        });
        let hv = historical_volatility(
            &closes,
            HV_PERIOD,
            series.granularity().periods_per_year(),
        );

        Self {
            closes,
            highs,
            lows,
            ema: ema_lines,
            bbands,
            macd: macd_lines,
            ichimoku,
            rsi: rsi_line,
            filter_bands,
            hv,
        }
    }

    pub fn len(&self) -> usize {
        self.closes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.closes.is_empty()
    }

    /// Side voted by one family at bar `i` (None when the family is disabled)
    pub fn vote(&self, kind: IndicatorKind, i: usize) -> Option<Side> {
        match kind {
            IndicatorKind::Ema => self
                .ema
                .as_ref()
                .and_then(|(p, fast, slow)| ema_cross(fast, slow, i, p)),
            IndicatorKind::BollingerBands => self
                .bbands
                .as_ref()
                .and_then(|(p, bands)| bbands_cross(bands, &self.closes, i, p)),
            IndicatorKind::Macd => self.macd.as_ref().and_then(|(p, m)| macd_cross(m, i, p)),
            IndicatorKind::Ichimoku => self
                .ichimoku
                .as_ref()
                .and_then(|cloud| ichimoku_cross(cloud, &self.highs, &self.lows, i)),
            IndicatorKind::Rsi => self
                .rsi
                .as_ref()
                .and_then(|(p, values)| rsi_cross(values, i, p)),
        }
    }

    pub fn votes_at(&self, i: usize) -> Votes {
        let mut votes = Votes::default();
        for kind in IndicatorKind::ALL {
            votes.add(self.vote(kind, i));
        }
        votes
    }

    pub fn latest_votes(&self) -> Votes {
        match self.len() {
            0 => Votes::default(),
            len => self.votes_at(len - 1),
        }
    }

    /// (upper, lower) of the filter bands at the last bar
    pub fn latest_bands(&self) -> Option<(f64, f64)> {
        let i = self.len().checked_sub(1)?;
        let upper = *self.filter_bands.upper.get(i)?;
        let lower = *self.filter_bands.lower.get(i)?;
        Some((upper, lower))
    }

    pub fn latest_band_width(&self) -> Option<f64> {
        self.filter_bands.width_at(self.len().checked_sub(1)?)
    }

    pub fn latest_hv(&self) -> Option<f64> {
        self.hv.last().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::create_test_candles;
    use crate::models::Granularity;

    fn series_from_closes(closes: &[f64]) -> CandleSeries {
        let ohlc: Vec<(f64, f64, f64, f64)> =
            closes.iter().map(|&c| (c, c + 1.0, c - 1.0, c)).collect();
        CandleSeries::from_candles("TEST", Granularity::MINUTE, 500, create_test_candles(&ohlc))
    }

    /// Falls for 30 bars then jumps so EMA(7) crosses EMA(14) on the last bar
    fn golden_cross_closes() -> Vec<f64> {
        let mut closes: Vec<f64> = (0..30).map(|i| 200.0 - i as f64).collect();
        closes.push(260.0);
        closes
    }

    #[test]
    fn test_ema_golden_and_dead_cross() {
        let params = EmaParams { fast: 2, slow: 3 };
        let fast = vec![0.0, 0.0, 0.0, 9.0, 11.0, 9.0];
        let slow = vec![0.0, 0.0, 0.0, 10.0, 10.0, 10.0];

        assert_eq!(ema_cross(&fast, &slow, 4, &params), Some(Side::Buy));
        assert_eq!(ema_cross(&fast, &slow, 5, &params), Some(Side::Sell));
        // Before the slow line exists
        assert_eq!(ema_cross(&fast, &slow, 2, &params), None);
        assert_eq!(ema_cross(&fast, &slow, 99, &params), None);
    }

    #[test]
    fn test_bbands_reentry() {
        let params = BollingerParams { n: 1, k: 2.0 };
        let bands = BollingerBands {
            upper: vec![110.0, 110.0, 110.0, 110.0],
            middle: vec![100.0; 4],
            lower: vec![90.0, 90.0, 90.0, 90.0],
        };
        let closes = vec![100.0, 85.0, 95.0, 115.0];

        assert_eq!(bbands_cross(&bands, &closes, 2, &params), Some(Side::Buy));
        assert_eq!(bbands_cross(&bands, &closes, 3, &params), None);

        let closes = vec![100.0, 115.0, 105.0];
        assert_eq!(bbands_cross(&bands, &closes, 2, &params), Some(Side::Sell));
    }

    #[test]
    fn test_macd_requires_sign() {
        let params = MacdParams {
            fast: 1,
            slow: 2,
            signal: 1,
        };
        let below = Macd {
            macd: vec![0.0, 0.0, -3.0, -1.0],
            signal: vec![0.0, 0.0, -2.0, -2.0],
            histogram: vec![0.0; 4],
        };
        assert_eq!(macd_cross(&below, 3, &params), Some(Side::Buy));

        let above = Macd {
            macd: vec![0.0, 0.0, 3.0, 1.0],
            signal: vec![0.0, 0.0, 2.0, 2.0],
            histogram: vec![0.0; 4],
        };
        assert_eq!(macd_cross(&above, 3, &params), Some(Side::Sell));

        // Crossing up while above zero is not a buy
        let wrong_side = Macd {
            macd: vec![0.0, 0.0, 1.0, 3.0],
            signal: vec![0.0, 0.0, 2.0, 2.0],
            histogram: vec![0.0; 4],
        };
        assert_eq!(macd_cross(&wrong_side, 3, &params), None);
    }

    #[test]
    fn test_rsi_skips_saturated_previous() {
        let params = RsiParams::default();
        assert_eq!(rsi_cross(&[25.0, 35.0], 1, &params), Some(Side::Buy));
        assert_eq!(rsi_cross(&[75.0, 65.0], 1, &params), Some(Side::Sell));
        assert_eq!(rsi_cross(&[0.0, 35.0], 1, &params), None);
        assert_eq!(rsi_cross(&[100.0, 65.0], 1, &params), None);
        assert_eq!(rsi_cross(&[50.0, 55.0], 1, &params), None);
    }

    #[test]
    fn test_ichimoku_needs_full_window() {
        let closes: Vec<f64> = (0..40).map(|i| 100.0 + i as f64).collect();
        let highs: Vec<f64> = closes.iter().map(|c| c + 1.0).collect();
        let lows: Vec<f64> = closes.iter().map(|c| c - 1.0).collect();
        let cloud = ichimoku_cloud(&highs, &lows, &closes);

        for i in 0..40 {
            assert_eq!(ichimoku_cross(&cloud, &highs, &lows, i), None);
        }
    }

    #[test]
    fn test_frame_votes_only_for_enabled_families() {
        let series = series_from_closes(&golden_cross_closes());

        let enabled = IndicatorFrame::compute(&series, &TradeParams::with_enabled(&[IndicatorKind::Ema]));
        assert_eq!(enabled.latest_votes(), Votes { buy: 1, sell: 0 });

        let disabled = IndicatorFrame::compute(&series, &TradeParams::default());
        assert!(disabled.latest_votes().is_empty());
    }

    #[test]
    fn test_frame_filter_bands_always_present() {
        let series = series_from_closes(&golden_cross_closes());
        let frame = IndicatorFrame::compute(&series, &TradeParams::default());

        let (upper, lower) = frame.latest_bands().unwrap();
        assert!(upper > lower);
        assert!(frame.latest_band_width().unwrap() > 0.0);
        assert_eq!(frame.len(), 31);
    }
}
