//! Bollinger Bands
//!
//! Middle band is the SMA over `n`; upper/lower are offset by `k` population
//! standard deviations over the same window. All three series have the input
//! length with 0.0 before index `n - 1`.

#[derive(Debug, Clone, PartialEq)]
pub struct BollingerBands {
    pub upper: Vec<f64>,
    pub middle: Vec<f64>,
    pub lower: Vec<f64>,
}

impl BollingerBands {
    /// Band width (upper - lower) at index `i`, if the bands exist there
    pub fn width_at(&self, i: usize) -> Option<f64> {
        let up = *self.upper.get(i)?;
        let down = *self.lower.get(i)?;
        (up > 0.0 && down > 0.0).then_some(up - down)
    }
}

pub fn bollinger_bands(values: &[f64], n: usize, k: f64) -> BollingerBands {
    let len = values.len();
    let mut bands = BollingerBands {
        upper: vec![0.0; len],
        middle: vec![0.0; len],
        lower: vec![0.0; len],
    };
    if n == 0 || len < n {
        return bands;
    }

    for i in (n - 1)..len {
        let window = &values[i + 1 - n..=i];
        let mean = window.iter().sum::<f64>() / n as f64;
        let variance = window.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n as f64;
        let std_dev = variance.sqrt();

        bands.middle[i] = mean;
        bands.upper[i] = mean + k * std_dev;
        bands.lower[i] = mean - k * std_dev;
    }

    bands
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bands_on_known_window() {
        // mean 5, population std 2
        let values = vec![2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        let bands = bollinger_bands(&values, 8, 2.0);

        assert_eq!(bands.middle[7], 5.0);
        assert!((bands.upper[7] - 9.0).abs() < 1e-12);
        assert!((bands.lower[7] - 1.0).abs() < 1e-12);
        assert_eq!(bands.upper[6], 0.0);
        assert_eq!(bands.width_at(7), Some(8.0));
        assert_eq!(bands.width_at(6), None);
    }

    #[test]
    fn test_flat_series_collapses_bands() {
        let values = vec![100.0; 25];
        let bands = bollinger_bands(&values, 20, 2.0);
        assert_eq!(bands.upper[24], 100.0);
        assert_eq!(bands.lower[24], 100.0);
    }

    #[test]
    fn test_insufficient_data() {
        let bands = bollinger_bands(&[1.0, 2.0], 20, 2.0);
        assert_eq!(bands.middle, vec![0.0, 0.0]);
    }
}
