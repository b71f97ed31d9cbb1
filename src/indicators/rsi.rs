/// Relative Strength Index (RSI) series
///
/// RSI measures the magnitude of recent price changes to evaluate
/// overbought or oversold conditions.
///
/// Values:
/// - RSI > 70: Overbought
/// - RSI < 30: Oversold
///
/// Uses Wilder's smoothing. The first value sits at index `period`; earlier
/// entries are 0.0. A window with no price movement at all also yields 0.0,
/// which the crossover rule treats as "no reading".
pub fn rsi(prices: &[f64], period: usize) -> Vec<f64> {
    let mut out = vec![0.0; prices.len()];
    if period == 0 || prices.len() < period + 1 {
        return out;
    }

    let mut avg_gain = 0.0;
    let mut avg_loss = 0.0;
    for i in 1..=period {
        let change = prices[i] - prices[i - 1];
        if change > 0.0 {
            avg_gain += change;
        } else {
            avg_loss -= change;
        }
    }
    avg_gain /= period as f64;
    avg_loss /= period as f64;
    out[period] = to_rsi(avg_gain, avg_loss);

    let p = period as f64;
    for i in (period + 1)..prices.len() {
        let change = prices[i] - prices[i - 1];
        let (gain, loss) = if change > 0.0 { (change, 0.0) } else { (0.0, -change) };
        avg_gain = (avg_gain * (p - 1.0) + gain) / p;
        avg_loss = (avg_loss * (p - 1.0) + loss) / p;
        out[i] = to_rsi(avg_gain, avg_loss);
    }

    out
}

fn to_rsi(avg_gain: f64, avg_loss: f64) -> f64 {
    let total = avg_gain + avg_loss;
    if total == 0.0 {
        return 0.0;
    }
    100.0 * avg_gain / total
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rsi_calculation() {
        // Test with known values
        let prices = vec![
            44.0, 44.25, 44.5, 43.75, 44.0, 44.5, 45.0, 45.5, 45.25, 45.5, 46.0, 46.5, 46.25,
            46.0, 46.5,
        ];

        let rsi = rsi(&prices, 14);
        assert_eq!(rsi.len(), prices.len());
        let value = rsi[14];
        // gains 4.0, losses 1.5 over the first 14 changes
        assert!((value - 100.0 * 4.0 / 5.5).abs() < 1e-9);
        assert!(rsi[..14].iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_rsi_insufficient_data() {
        let prices = vec![44.0, 44.25, 44.5];
        let rsi = rsi(&prices, 14);
        assert_eq!(rsi, vec![0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_rsi_all_gains() {
        let prices: Vec<f64> = (0..20).map(|i| 100.0 + i as f64).collect();
        let rsi = rsi(&prices, 14);
        assert_eq!(rsi[19], 100.0);
    }

    #[test]
    fn test_rsi_flat_prices_read_zero() {
        let prices = vec![100.0; 20];
        let rsi = rsi(&prices, 5);
        assert!(rsi.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_rsi_stays_in_range() {
        let prices: Vec<f64> = (0..100)
            .map(|i| 100.0 + (i as f64 * 0.7).sin() * 10.0)
            .collect();
        let rsi = rsi(&prices, 14);
        assert!(rsi.iter().all(|v| (0.0..=100.0).contains(v)));
    }
}
