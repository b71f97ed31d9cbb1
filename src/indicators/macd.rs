use super::moving_average::{ema, ema_from};

/// MACD line, signal line and histogram, aligned with the input
#[derive(Debug, Clone, PartialEq)]
pub struct Macd {
    pub macd: Vec<f64>,
    pub signal: Vec<f64>,
    pub histogram: Vec<f64>,
}

impl Macd {
    /// First index at which all three series are defined
    pub fn first_valid(slow: usize, signal: usize) -> usize {
        slow + signal - 2
    }
}

/// Moving Average Convergence Divergence
///
/// macd = EMA(fast) - EMA(slow), signal = EMA(macd, signal), histogram = macd - signal.
/// Periods are swapped when `fast > slow`. Entries before `slow + signal - 2` are 0.0.
pub fn macd(values: &[f64], fast: usize, slow: usize, signal: usize) -> Macd {
    let len = values.len();
    let (fast, slow) = if fast > slow { (slow, fast) } else { (fast, slow) };
    let mut out = Macd {
        macd: vec![0.0; len],
        signal: vec![0.0; len],
        histogram: vec![0.0; len],
    };
    if fast == 0 || signal == 0 || len < Macd::first_valid(slow, signal) + 1 {
        return out;
    }

    let fast_ema = ema(values, fast);
    let slow_ema = ema(values, slow);

    let mut line = vec![0.0; len];
    for i in (slow - 1)..len {
        line[i] = fast_ema[i] - slow_ema[i];
    }
    let signal_line = ema_from(&line, signal, slow - 1);

    for i in Macd::first_valid(slow, signal)..len {
        out.macd[i] = line[i];
        out.signal[i] = signal_line[i];
        out.histogram[i] = line[i] - signal_line[i];
    }
    out
}
