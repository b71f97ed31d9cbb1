//! Ichimoku Kinko Hyo lines (9/26/52)
//!
//! Lines are not shifted forward/backward in time; instead `chikou[i]` holds
//! the close 26 bars back so every line can be compared at the same index.
//! Entries before each line's warm-up are 0.0.

pub const TENKAN_PERIOD: usize = 9;
pub const KIJUN_PERIOD: usize = 26;
pub const SENKOU_B_PERIOD: usize = 52;

#[derive(Debug, Clone, PartialEq)]
pub struct IchimokuCloud {
    pub tenkan: Vec<f64>,
    pub kijun: Vec<f64>,
    pub senkou_a: Vec<f64>,
    pub senkou_b: Vec<f64>,
    pub chikou: Vec<f64>,
}

/// Midpoint of the highest high and lowest low over the window ending at `end`
fn midpoint(highs: &[f64], lows: &[f64], end: usize, period: usize) -> f64 {
    let start = end + 1 - period;
    let high = highs[start..=end].iter().cloned().fold(f64::MIN, f64::max);
    let low = lows[start..=end].iter().cloned().fold(f64::MAX, f64::min);
    (high + low) / 2.0
}

pub fn ichimoku_cloud(highs: &[f64], lows: &[f64], closes: &[f64]) -> IchimokuCloud {
    let len = closes.len().min(highs.len()).min(lows.len());
    let mut cloud = IchimokuCloud {
        tenkan: vec![0.0; len],
        kijun: vec![0.0; len],
        senkou_a: vec![0.0; len],
        senkou_b: vec![0.0; len],
        chikou: vec![0.0; len],
    };

    for i in 0..len {
        if i + 1 >= TENKAN_PERIOD {
            cloud.tenkan[i] = midpoint(highs, lows, i, TENKAN_PERIOD);
        }
        if i + 1 >= KIJUN_PERIOD {
            cloud.kijun[i] = midpoint(highs, lows, i, KIJUN_PERIOD);
            cloud.senkou_a[i] = (cloud.tenkan[i] + cloud.kijun[i]) / 2.0;
        }
        if i >= KIJUN_PERIOD {
            cloud.chikou[i] = closes[i - KIJUN_PERIOD];
        }
        if i + 1 >= SENKOU_B_PERIOD {
            cloud.senkou_b[i] = midpoint(highs, lows, i, SENKOU_B_PERIOD);
        }
    }

    cloud
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ichimoku_warmups() {
        let closes: Vec<f64> = (0..60).map(|i| 100.0 + i as f64).collect();
        let highs: Vec<f64> = closes.iter().map(|c| c + 1.0).collect();
        let lows: Vec<f64> = closes.iter().map(|c| c - 1.0).collect();
        let cloud = ichimoku_cloud(&highs, &lows, &closes);

        assert_eq!(cloud.tenkan[7], 0.0);
        assert!(cloud.tenkan[8] > 0.0);
        assert_eq!(cloud.kijun[24], 0.0);
        assert!(cloud.kijun[25] > 0.0);
        assert_eq!(cloud.senkou_b[50], 0.0);
        assert!(cloud.senkou_b[51] > 0.0);
        assert_eq!(cloud.chikou[26], closes[0]);
    }

    #[test]
    fn test_ichimoku_midpoints() {
        let closes: Vec<f64> = (0..60).map(|i| 100.0 + i as f64).collect();
        let highs: Vec<f64> = closes.iter().map(|c| c + 1.0).collect();
        let lows: Vec<f64> = closes.iter().map(|c| c - 1.0).collect();
        let cloud = ichimoku_cloud(&highs, &lows, &closes);

        // window 51..=59: high 160, low 150
        assert_eq!(cloud.tenkan[59], 155.0);
        // window 34..=59: high 160, low 133
        assert_eq!(cloud.kijun[59], 146.5);
        assert_eq!(cloud.senkou_a[59], (155.0 + 146.5) / 2.0);
        // window 8..=59: high 160, low 107
        assert_eq!(cloud.senkou_b[59], 133.5);
    }
}
