//! Average True Range (ATR) indicator
//!
//! Measures market volatility by calculating the average of true ranges over a period.
//! True Range is the greatest of:
//! - Current High - Current Low
//! - Abs(Current High - Previous Close)
//! - Abs(Current Low - Previous Close)
//!
//! Uses Wilder's smoothing (same as RSI) for the moving average.

use crate::models::Candle;

fn true_range(high: f64, low: f64, prev_close: f64) -> f64 {
    (high - low)
        .max((high - prev_close).abs())
        .max((low - prev_close).abs())
}

/// ATR series aligned with the input bars
///
/// The first value sits at index `period` and is the simple average of the
/// first `period` true ranges; earlier entries are 0.0.
pub fn atr(highs: &[f64], lows: &[f64], closes: &[f64], period: usize) -> Vec<f64> {
    let len = closes.len().min(highs.len()).min(lows.len());
    let mut out = vec![0.0; len];
    if period == 0 || len < period + 1 {
        return out;
    }

    let true_ranges: Vec<f64> = (1..len)
        .map(|i| true_range(highs[i], lows[i], closes[i - 1]))
        .collect();

    let mut atr = true_ranges[..period].iter().sum::<f64>() / period as f64;
    out[period] = atr;

    for i in (period + 1)..len {
        atr = (atr * (period as f64 - 1.0) + true_ranges[i - 1]) / period as f64;
        out[i] = atr;
    }

    out
}

/// Current ATR for the given candles
///
/// Returns None if there are not at least `period + 1` candles.
pub fn latest_atr(candles: &[Candle], period: usize) -> Option<f64> {
    if period == 0 || candles.len() < period + 1 {
        return None;
    }

    let highs: Vec<f64> = candles.iter().map(|c| c.high).collect();
    let lows: Vec<f64> = candles.iter().map(|c| c.low).collect();
    let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();

    atr(&highs, &lows, &closes, period).last().copied()
}
