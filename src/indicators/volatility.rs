/// Historical volatility series
///
/// Rolling population standard deviation of log returns over `period`
/// returns, annualized by `sqrt(periods_per_year)` and expressed in percent.
/// `out[i]` covers the returns ending at bar `i`; entries before index
/// `period` are 0.0.
pub fn historical_volatility(closes: &[f64], period: usize, periods_per_year: f64) -> Vec<f64> {
    let mut out = vec![0.0; closes.len()];
    if period == 0 || closes.len() < period + 1 {
        return out;
    }

    let returns: Vec<f64> = closes
        .windows(2)
        .map(|w| {
            if w[0] > 0.0 && w[1] > 0.0 {
                (w[1] / w[0]).ln()
            } else {
                0.0
            }
        })
        .collect();

    let annualize = periods_per_year.max(0.0).sqrt() * 100.0;
    for i in period..closes.len() {
        // returns[k] is the change from bar k to k + 1
        let window = &returns[i - period..i];
        let mean = window.iter().sum::<f64>() / period as f64;
        let variance = window.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / period as f64;
        out[i] = variance.sqrt() * annualize;
    }

    out
}
