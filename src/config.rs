//! Runtime settings.
//!
//! Loaded once at startup from compiled defaults, an optional `fxbot.toml`
//! and `FXBOT_*` environment variables (a `.env` file is read by the binary
//! before this runs). Nothing here is reloaded while the engine runs.

use crate::error::{Error, Result};
use crate::models::Granularity;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Instrument traded by this engine instance
    pub product_code: String,
    /// Every granularity the aggregator maintains. Must include 1m (ATR source).
    pub granularities: Vec<Granularity>,
    /// Granularity the position engine evaluates
    pub trade_granularity: Granularity,

    /// Simulate fills against the ledger instead of sending orders
    pub back_test: bool,
    /// Fraction of available collateral committed per order
    pub use_percent: f64,
    /// Long stop = fill * stop_limit_percent, short stop mirrored
    pub stop_limit_percent: f64,
    /// Maximum number of indicators enabled at once
    pub num_ranking: usize,
    /// Keep retrying the optimizer after it finds nothing profitable
    pub continue_optimizing: bool,
    /// Candles loaded per evaluation and per optimization
    pub data_limit: usize,
    /// Minimum candles before the engine trades at all
    pub min_candles: usize,

    /// ATR / price below this suppresses opening
    pub volatility_floor: f64,
    /// One-minute candles used for ATR
    pub atr_candles: usize,
    /// Bollinger band width / price required to open
    pub openable_bb_rate: f64,
    /// Absolute Bollinger band width required to open
    pub openable_bb_width: f64,
    /// Profit target distance beyond the band
    pub profit_target_buffer: f64,
    /// Profit target distance from the fill when the band is unusable
    pub profit_fallback_percent: f64,

    /// Order size decimal places (size granularity of the instrument)
    pub size_decimals: u32,
    pub minute_to_expire: u32,
    pub time_in_force: String,
    pub fill_poll_interval_secs: u64,
    pub fill_timeout_secs: u64,
    pub evaluation_interval_ms: u64,

    /// Require hourly volume above `min_hourly_volume` before opening
    pub volume_check: bool,
    pub min_hourly_volume: f64,
    /// Candles kept per granularity by the retention trim
    pub candle_retention: usize,
    /// Ticks between retention trims
    pub retention_trim_every: u64,
    pub ticker_poll_ms: u64,

    pub optimizer_backoff_max_secs: u64,
    /// Starting collateral of the paper exchange
    pub paper_collateral: f64,

    pub redis_url: Option<String>,
    pub database_url: Option<String>,
    pub api_base_url: String,
    pub log_json: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            product_code: "FX_BTC_JPY".to_string(),
            granularities: vec![
                Granularity::MINUTE,
                Granularity::FIFTEEN_MINUTES,
                Granularity::THIRTY_MINUTES,
                Granularity::HOUR,
            ],
            trade_granularity: Granularity::FIFTEEN_MINUTES,
            back_test: false,
            use_percent: 0.9,
            stop_limit_percent: 0.98,
            num_ranking: 2,
            continue_optimizing: true,
            data_limit: 365,
            min_candles: 60,
            volatility_floor: 0.0005,
            atr_candles: 15,
            openable_bb_rate: 0.004,
            openable_bb_width: 0.0,
            profit_target_buffer: 0.01,
            profit_fallback_percent: 0.01,
            size_decimals: 4,
            minute_to_expire: 1,
            time_in_force: "GTC".to_string(),
            fill_poll_interval_secs: 15,
            fill_timeout_secs: 60,
            evaluation_interval_ms: 1000,
            volume_check: false,
            min_hourly_volume: 10_000_000.0,
            candle_retention: 1000,
            retention_trim_every: 600,
            ticker_poll_ms: 500,
            optimizer_backoff_max_secs: 6 * 3600,
            paper_collateral: 1_000_000.0,
            redis_url: None,
            database_url: None,
            api_base_url: "https://api.bitflyer.com".to_string(),
            log_json: false,
        }
    }
}

impl Settings {
    /// Load and validate settings from `fxbot.toml` (optional) and the environment
    pub fn load() -> Result<Self> {
        let settings: Settings = config::Config::builder()
            .add_source(config::File::with_name("fxbot").required(false))
            .add_source(
                config::Environment::with_prefix("FXBOT")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("granularities"),
            )
            .build()?
            .try_deserialize()?;

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.product_code.trim().is_empty() {
            return Err(Error::Config("product_code is required".into()));
        }
        if !self.granularities.contains(&Granularity::MINUTE) {
            return Err(Error::Config("granularities must include 1m for ATR".into()));
        }
        if !self.granularities.contains(&self.trade_granularity) {
            return Err(Error::Config(format!(
                "trade_granularity {} is not in granularities",
                self.trade_granularity
            )));
        }
        if !(self.use_percent > 0.0 && self.use_percent <= 1.0) {
            return Err(Error::Config(format!(
                "use_percent must be in (0, 1], got {}",
                self.use_percent
            )));
        }
        if !(self.stop_limit_percent > 0.0 && self.stop_limit_percent < 1.0) {
            return Err(Error::Config(format!(
                "stop_limit_percent must be in (0, 1), got {}",
                self.stop_limit_percent
            )));
        }
        if self.num_ranking == 0 {
            return Err(Error::Config("num_ranking must be at least 1".into()));
        }
        if self.atr_candles < 2 {
            return Err(Error::Config("atr_candles must be at least 2".into()));
        }
        if self.fill_poll_interval_secs == 0 || self.fill_timeout_secs == 0 {
            return Err(Error::Config("fill polling interval and timeout must be positive".into()));
        }
        if self.min_candles > self.data_limit {
            return Err(Error::Config(format!(
                "min_candles ({}) exceeds data_limit ({})",
                self.min_candles, self.data_limit
            )));
        }
        Ok(())
    }

    pub fn fill_poll_interval(&self) -> Duration {
        Duration::from_secs(self.fill_poll_interval_secs)
    }

    pub fn fill_timeout(&self) -> Duration {
        Duration::from_secs(self.fill_timeout_secs)
    }

    pub fn evaluation_interval(&self) -> Duration {
        Duration::from_millis(self.evaluation_interval_ms)
    }

    pub fn ticker_poll_interval(&self) -> Duration {
        Duration::from_millis(self.ticker_poll_ms)
    }

    /// First optimizer retry waits ten trade candles
    pub fn optimizer_backoff_base(&self) -> Duration {
        Duration::from_secs(self.trade_granularity.as_secs() as u64 * 10)
    }

    pub fn optimizer_backoff_max(&self) -> Duration {
        Duration::from_secs(self.optimizer_backoff_max_secs)
    }
}
