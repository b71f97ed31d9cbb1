use crate::config::Settings;
use crate::models::{Candle, Granularity};
use serde::{Deserialize, Serialize};

/// Market conditions a new position must meet before the engine opens it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenGates {
    /// Minimum ATR / price
    pub volatility_floor: f64,
    /// Minimum Bollinger width / price
    pub openable_bb_rate: f64,
    /// Minimum absolute Bollinger width
    pub openable_bb_width: f64,
    /// Required volume of the last complete hourly candle (None disables the check)
    pub min_hourly_volume: Option<f64>,
}

impl Default for OpenGates {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GateTrip {
    LowVolatility,
    BandFilter,
    LowVolume,
}

impl OpenGates {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            volatility_floor: settings.volatility_floor,
            openable_bb_rate: settings.openable_bb_rate,
            openable_bb_width: settings.openable_bb_width,
            min_hourly_volume: (settings.volume_check
                && settings.granularities.contains(&Granularity::HOUR))
            .then_some(settings.min_hourly_volume),
        }
    }

    /// ATR relative to price; 0.0 when either is unusable
    pub fn atr_rate(atr: Option<f64>, price: f64) -> f64 {
        match atr {
            Some(atr) if atr.is_finite() && price.is_finite() && price > 0.0 => atr / price,
            _ => 0.0,
        }
    }

    pub fn is_volatile(&self, atr_rate: f64) -> bool {
        atr_rate >= self.volatility_floor
    }

    pub fn check_volatility(&self, atr_rate: f64) -> Result<(), GateTrip> {
        if !self.is_volatile(atr_rate) {
            return Err(GateTrip::LowVolatility);
        }
        Ok(())
    }

    /// Band must be wide enough both relative to price and in absolute terms
    pub fn check_bands(&self, width: Option<f64>, price: f64) -> Result<(), GateTrip> {
        let Some(width) = width.filter(|w| w.is_finite()) else {
            return Err(GateTrip::BandFilter);
        };
        if price <= 0.0 || width / price < self.openable_bb_rate || width < self.openable_bb_width {
            return Err(GateTrip::BandFilter);
        }
        Ok(())
    }

    /// Hourly candles oldest first; the newest one is still forming, so the
    /// one before it is checked
    pub fn check_volume(&self, hourly: &[Candle]) -> Result<(), GateTrip> {
        let Some(min) = self.min_hourly_volume else {
            return Ok(());
        };
        let Some(previous) = hourly.len().checked_sub(2).and_then(|i| hourly.get(i)) else {
            return Err(GateTrip::LowVolume);
        };
        if previous.volume <= min {
            return Err(GateTrip::LowVolume);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn gates() -> OpenGates {
        OpenGates {
            volatility_floor: 0.001,
            openable_bb_rate: 0.004,
            openable_bb_width: 10.0,
            min_hourly_volume: Some(1000.0),
        }
    }

    fn hourly(volumes: &[f64]) -> Vec<Candle> {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        volumes
            .iter()
            .enumerate()
            .map(|(i, &volume)| Candle {
                product_code: "FX_BTC_JPY".to_string(),
                granularity: Granularity::HOUR,
                time: start + chrono::Duration::hours(i as i64),
                open: 100.0,
                high: 100.0,
                low: 100.0,
                close: 100.0,
                volume,
            })
            .collect()
    }

    #[test]
    fn test_volatility_gate() {
        let gates = gates();
        assert_eq!(OpenGates::atr_rate(Some(2.0), 1000.0), 0.002);
        assert_eq!(OpenGates::atr_rate(None, 1000.0), 0.0);
        assert_eq!(OpenGates::atr_rate(Some(2.0), 0.0), 0.0);

        assert!(gates.check_volatility(0.002).is_ok());
        assert_eq!(gates.check_volatility(0.0005), Err(GateTrip::LowVolatility));
    }

    #[test]
    fn test_band_filter() {
        let gates = gates();
        // 5 / 1000 passes the rate but not the absolute width
        assert_eq!(gates.check_bands(Some(5.0), 1000.0), Err(GateTrip::BandFilter));
        assert!(gates.check_bands(Some(20.0), 1000.0).is_ok());
        // 20 / 10000 is too narrow relative to price
        assert_eq!(gates.check_bands(Some(20.0), 10_000.0), Err(GateTrip::BandFilter));
        assert_eq!(gates.check_bands(None, 1000.0), Err(GateTrip::BandFilter));
        assert_eq!(gates.check_bands(Some(f64::NAN), 1000.0), Err(GateTrip::BandFilter));
    }

    #[test]
    fn test_volume_uses_previous_hour() {
        let gates = gates();
        assert!(gates.check_volume(&hourly(&[1500.0, 10.0])).is_ok());
        assert_eq!(gates.check_volume(&hourly(&[900.0, 5000.0])), Err(GateTrip::LowVolume));
        assert_eq!(gates.check_volume(&hourly(&[5000.0])), Err(GateTrip::LowVolume));
    }

    #[test]
    fn test_volume_check_disabled() {
        let gates = OpenGates {
            min_hourly_volume: None,
            ..gates()
        };
        assert!(gates.check_volume(&[]).is_ok());
    }
}
