// Technical indicators module
// Pure series functions: output length equals input length, warm-up entries are 0.0

pub mod atr;
pub mod bollinger;
pub mod ichimoku;
pub mod macd;
pub mod moving_average;
pub mod rsi;
pub mod volatility;

pub use atr::{atr, latest_atr};
pub use bollinger::{bollinger_bands, BollingerBands};
pub use ichimoku::{ichimoku_cloud, IchimokuCloud};
pub use macd::{macd, Macd};
pub use moving_average::{ema, sma};
pub use rsi::rsi;
pub use volatility::historical_volatility;

#[cfg(test)]
pub(crate) fn create_test_candles(prices: &[(f64, f64, f64, f64)]) -> Vec<crate::models::Candle> {
    use crate::models::{Candle, Granularity};
    use chrono::TimeZone;

    let start = chrono::Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    prices
        .iter()
        .enumerate()
        .map(|(i, &(open, high, low, close))| Candle {
            product_code: "TEST".to_string(),
            granularity: Granularity::MINUTE,
            time: start + chrono::Duration::minutes(i as i64),
            open,
            high,
            low,
            close,
            volume: 1000.0,
        })
        .collect()
}
