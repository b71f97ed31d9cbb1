use crate::models::{Candle, Granularity};
use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Market scenario types for synthetic data generation
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum MarketScenario {
    /// Steady uptrend with noise (+2% daily average)
    Uptrend,
    /// Steady downtrend with noise (-2% daily average)
    Downtrend,
    /// Mean-reverting chop (±1% around the mean)
    Sideways,
    /// Large random swings (±5% per candle)
    Volatile,
    /// Slow sine wave with noise; crossover rules should find profit here
    Oscillating,
    /// Random walk with every 50th candle missing
    WithGaps,
}

impl MarketScenario {
    pub const ALL: [MarketScenario; 6] = [
        MarketScenario::Uptrend,
        MarketScenario::Downtrend,
        MarketScenario::Sideways,
        MarketScenario::Volatile,
        MarketScenario::Oscillating,
        MarketScenario::WithGaps,
    ];
}

/// Generates seeded synthetic candles for backtests
pub struct SyntheticDataGenerator {
    rng: StdRng,
    product_code: String,
    base_price: f64,
    base_volume: f64,
}

impl SyntheticDataGenerator {
    /// Create a new generator with a seed for reproducibility
    pub fn new(seed: u64, product_code: impl Into<String>) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            product_code: product_code.into(),
            base_price: 5_000_000.0,
            base_volume: 50.0,
        }
    }

    pub fn with_base_price(mut self, base_price: f64) -> Self {
        self.base_price = base_price;
        self
    }

    /// Generate candles for a scenario
    ///
    /// # Arguments
    /// * `start` - Bucket start of the first candle (truncated to the granularity)
    /// * `num_candles` - Number of bucket slots; `WithGaps` leaves some empty
    pub fn generate(
        &mut self,
        scenario: MarketScenario,
        granularity: Granularity,
        start: DateTime<Utc>,
        num_candles: usize,
    ) -> Vec<Candle> {
        let start = granularity.truncate(start);
        let periods_per_day = 86_400.0 / granularity.as_secs() as f64;
        let mut candles = Vec::with_capacity(num_candles);
        let mut price = self.base_price;

        for i in 0..num_candles {
            price = match scenario {
                MarketScenario::Uptrend => {
                    let drift = price * 0.02 / periods_per_day;
                    price + drift + price * self.rng.gen_range(-0.001..0.001)
                }
                MarketScenario::Downtrend => {
                    let drift = -price * 0.02 / periods_per_day;
                    price + drift + price * self.rng.gen_range(-0.001..0.001)
                }
                MarketScenario::Sideways => {
                    let reversion = (self.base_price - price) * 0.1;
                    price + reversion + price * self.rng.gen_range(-0.01..0.01)
                }
                MarketScenario::Volatile => {
                    let next = price + price * self.rng.gen_range(-0.05..0.05);
                    next.max(self.base_price * 0.5)
                }
                MarketScenario::Oscillating => {
                    let wave = 0.03 * (i as f64 / 12.0).sin();
                    self.base_price * (1.0 + wave) * (1.0 + self.rng.gen_range(-0.001..0.001))
                }
                MarketScenario::WithGaps => price + price * self.rng.gen_range(-0.01..0.01),
            };

            if scenario == MarketScenario::WithGaps && i % 50 == 49 {
                continue;
            }

            let time = start + granularity.duration() * i as i32;
            candles.push(self.create_candle(price, granularity, time));
        }

        candles
    }

    /// Realistic OHLC around a close price
    fn create_candle(&mut self, price: f64, granularity: Granularity, time: DateTime<Utc>) -> Candle {
        let noise_pct = 0.002;

        let high = price * (1.0 + self.rng.gen_range(0.0..noise_pct));
        let low = price * (1.0 - self.rng.gen_range(0.0..noise_pct));
        let open = (price * (1.0 + self.rng.gen_range(-noise_pct..noise_pct))).clamp(low, high);
        let volume = self.base_volume * self.rng.gen_range(0.7..1.3);

        Candle {
            product_code: self.product_code.clone(),
            granularity,
            time,
            open,
            high,
            low,
            close: price,
            volume,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn generate(scenario: MarketScenario, n: usize) -> Vec<Candle> {
        SyntheticDataGenerator::new(42, "FX_BTC_JPY").generate(
            scenario,
            Granularity::FIVE_MINUTES,
            start(),
            n,
        )
    }

    #[test]
    fn test_generate_uptrend() {
        let candles = generate(MarketScenario::Uptrend, 500);

        assert_eq!(candles.len(), 500);
        let first = candles.first().unwrap().close;
        let last = candles.last().unwrap().close;
        assert!(last > first, "Uptrend should end higher: {} -> {}", first, last);
    }

    #[test]
    fn test_generate_downtrend() {
        let candles = generate(MarketScenario::Downtrend, 500);

        let first = candles.first().unwrap().close;
        let last = candles.last().unwrap().close;
        assert!(last < first, "Downtrend should end lower: {} -> {}", first, last);
    }

    #[test]
    fn test_generate_sideways() {
        let candles = generate(MarketScenario::Sideways, 500);

        for candle in &candles {
            assert!(
                candle.close > 4_500_000.0 && candle.close < 5_500_000.0,
                "Sideways should stay near base: {}",
                candle.close
            );
        }
    }

    #[test]
    fn test_generate_with_gaps() {
        let candles = generate(MarketScenario::WithGaps, 100);

        assert_eq!(candles.len(), 98);
        let has_gap = candles
            .windows(2)
            .any(|w| (w[1].time - w[0].time).num_minutes() > 5);
        assert!(has_gap, "Should contain time gaps");
    }

    #[test]
    fn test_buckets_are_aligned_and_sequential() {
        let candles = generate(MarketScenario::Oscillating, 100);

        for pair in candles.windows(2) {
            assert!(pair[1].time > pair[0].time);
        }
        for candle in &candles {
            assert_eq!(Granularity::FIVE_MINUTES.truncate(candle.time), candle.time);
            assert_eq!(candle.product_code, "FX_BTC_JPY");
        }
    }

    #[test]
    fn test_ohlc_consistency() {
        for scenario in MarketScenario::ALL {
            for candle in generate(scenario, 100) {
                assert!(candle.high >= candle.close && candle.high >= candle.open);
                assert!(candle.low <= candle.close && candle.low <= candle.open);
            }
        }
    }

    #[test]
    fn test_same_seed_same_candles() {
        assert_eq!(
            generate(MarketScenario::Volatile, 50),
            generate(MarketScenario::Volatile, 50)
        );
    }
}
