/// Simple Moving Average series
///
/// Output has the same length as `values`; entries before index `period - 1` are 0.0.
pub fn sma(values: &[f64], period: usize) -> Vec<f64> {
    let mut out = vec![0.0; values.len()];
    if period == 0 || values.len() < period {
        return out;
    }

    let mut sum: f64 = values[..period].iter().sum();
    out[period - 1] = sum / period as f64;
    for i in period..values.len() {
        sum += values[i] - values[i - period];
        out[i] = sum / period as f64;
    }
    out
}

/// Exponential Moving Average series
///
/// Seeded with the SMA of the first `period` values, then smoothed with
/// multiplier 2 / (period + 1). Entries before index `period - 1` are 0.0.
pub fn ema(values: &[f64], period: usize) -> Vec<f64> {
    ema_from(values, period, 0)
}

/// EMA that ignores everything before `start` (used when the input itself
/// has a warm-up prefix, e.g. the MACD line)
pub(crate) fn ema_from(values: &[f64], period: usize, start: usize) -> Vec<f64> {
    let mut out = vec![0.0; values.len()];
    if period == 0 || values.len() < start + period {
        return out;
    }

    let multiplier = 2.0 / (period as f64 + 1.0);
    let seed_end = start + period;
    let mut ema = values[start..seed_end].iter().sum::<f64>() / period as f64;
    out[seed_end - 1] = ema;

    for i in seed_end..values.len() {
        ema = (values[i] - ema) * multiplier + ema;
        out[i] = ema;
    }
    out
}
