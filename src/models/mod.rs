use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Best bid/ask snapshot for one instrument
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Ticker {
    pub product_code: String,
    pub timestamp: DateTime<Utc>,
    pub best_bid: f64,
    pub best_ask: f64,
    pub volume: f64,
}

impl Ticker {
    pub fn mid_price(&self) -> f64 {
        (self.best_bid + self.best_ask) / 2.0
    }

    /// Price a market order on `side` would take: the ask for buys, the bid for sells
    pub fn best_price(&self, side: Side) -> f64 {
        match side {
            Side::Buy => self.best_ask,
            Side::Sell => self.best_bid,
        }
    }

    /// A ticker is usable only when both sides are quoted with finite, positive prices
    pub fn is_valid(&self) -> bool {
        let mid = self.mid_price();
        mid.is_finite() && mid > 0.0 && self.volume.is_finite() && self.volume >= 0.0
    }
}

/// Fixed candle width, stored as whole seconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Granularity(i64);

impl Granularity {
    pub const MINUTE: Self = Self(60);
    pub const FIVE_MINUTES: Self = Self(300);
    pub const FIFTEEN_MINUTES: Self = Self(900);
    pub const THIRTY_MINUTES: Self = Self(1800);
    pub const HOUR: Self = Self(3600);

    pub fn from_secs(secs: i64) -> Option<Self> {
        (secs > 0).then_some(Self(secs))
    }

    pub fn as_secs(&self) -> i64 {
        self.0
    }

    pub fn duration(&self) -> Duration {
        Duration::seconds(self.0)
    }

    /// Start of the bucket containing `time`
    pub fn truncate(&self, time: DateTime<Utc>) -> DateTime<Utc> {
        let ts = time.timestamp();
        let start = ts - ts.rem_euclid(self.0);
        DateTime::from_timestamp(start, 0).unwrap_or(time)
    }

    /// True when `time` falls in the final second of its bucket
    pub fn is_last_second(&self, time: DateTime<Utc>) -> bool {
        (time - self.truncate(time)).num_seconds() >= self.0 - 1
    }

    /// Number of buckets in a 365-day year, used to annualize volatility
    pub fn periods_per_year(&self) -> f64 {
        (365 * 24 * 3600) as f64 / self.0 as f64
    }

    pub fn label(&self) -> String {
        match self.0 {
            s if s % 3600 == 0 => format!("{}h", s / 3600),
            s if s % 60 == 0 => format!("{}m", s / 60),
            s => format!("{}s", s),
        }
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

impl FromStr for Granularity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.len() < 2 {
            return Err(format!("invalid granularity '{}'", s));
        }
        let Some((split, _)) = s.char_indices().last() else {
            return Err(format!("invalid granularity '{}'", s));
        };
        let (amount, unit) = s.split_at(split);
        let amount: i64 = amount
            .parse()
            .map_err(|_| format!("invalid granularity '{}'", s))?;
        let secs = match unit {
            "s" => amount,
            "m" => amount * 60,
            "h" => amount * 3600,
            "d" => amount * 86_400,
            _ => return Err(format!("unknown granularity unit in '{}'", s)),
        };
        Granularity::from_secs(secs).ok_or_else(|| format!("granularity must be positive: '{}'", s))
    }
}

impl TryFrom<String> for Granularity {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Granularity> for String {
    fn from(g: Granularity) -> Self {
        g.label()
    }
}

/// OHLCV candle for one (product, granularity, bucket)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Candle {
    pub product_code: String,
    pub granularity: Granularity,
    pub time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    /// First tick of a bucket opens the candle at the tick's mid price
    pub fn open_with(ticker: &Ticker, granularity: Granularity) -> Self {
        let price = ticker.mid_price();
        Self {
            product_code: ticker.product_code.clone(),
            granularity,
            time: granularity.truncate(ticker.timestamp),
            open: price,
            high: price,
            low: price,
            close: price,
            volume: ticker.volume,
        }
    }
}

/// Order side as the exchange names it
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        }
    }

    pub fn opposite(&self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Side {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "BUY" => Ok(Side::Buy),
            "SELL" => Ok(Side::Sell),
            other => Err(format!("unknown side '{}'", other)),
        }
    }
}

/// Direction of a held position
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    pub fn open_side(&self) -> Side {
        match self {
            Direction::Long => Side::Buy,
            Direction::Short => Side::Sell,
        }
    }

    pub fn close_side(&self) -> Side {
        self.open_side().opposite()
    }

    /// Signed multiplier applied to (exit - entry)
    pub fn sign(&self) -> f64 {
        match self {
            Direction::Long => 1.0,
            Direction::Short => -1.0,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Long => f.write_str("long"),
            Direction::Short => f.write_str("short"),
        }
    }
}

/// Child order lifecycle state reported by the exchange
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderState {
    Active,
    Completed,
    Canceled,
    Expired,
    Rejected,
}

/// Market order as submitted to the exchange
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MarketOrder {
    pub product_code: String,
    pub side: Side,
    pub size: Decimal,
    pub minute_to_expire: u32,
    pub time_in_force: String,
}

/// One entry of an order status query
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrderStatus {
    pub acceptance_id: String,
    pub state: OrderState,
    pub side: Side,
    pub average_price: f64,
    pub size: f64,
}

/// One open leg of the account's position
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PositionLeg {
    pub side: Side,
    pub size: f64,
    pub price: f64,
    pub pnl: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_granularity_parse_and_label() {
        assert_eq!("1m".parse::<Granularity>().unwrap(), Granularity::MINUTE);
        assert_eq!("15m".parse::<Granularity>().unwrap(), Granularity::FIFTEEN_MINUTES);
        assert_eq!("1h".parse::<Granularity>().unwrap(), Granularity::HOUR);
        assert_eq!(Granularity::THIRTY_MINUTES.label(), "30m");
        assert_eq!(Granularity::HOUR.to_string(), "1h");
        assert!("0m".parse::<Granularity>().is_err());
        assert!("5x".parse::<Granularity>().is_err());
        assert!("m".parse::<Granularity>().is_err());
        assert!("1é".parse::<Granularity>().is_err());
        assert!("é".parse::<Granularity>().is_err());
    }

    #[test]
    fn test_granularity_truncate() {
        let t = Utc.with_ymd_and_hms(2024, 3, 1, 10, 47, 31).unwrap();

        assert_eq!(
            Granularity::MINUTE.truncate(t),
            Utc.with_ymd_and_hms(2024, 3, 1, 10, 47, 0).unwrap()
        );
        assert_eq!(
            Granularity::FIFTEEN_MINUTES.truncate(t),
            Utc.with_ymd_and_hms(2024, 3, 1, 10, 45, 0).unwrap()
        );
        assert_eq!(
            Granularity::HOUR.truncate(t),
            Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_granularity_last_second() {
        let g = Granularity::MINUTE;
        assert!(g.is_last_second(Utc.with_ymd_and_hms(2024, 3, 1, 10, 47, 59).unwrap()));
        assert!(!g.is_last_second(Utc.with_ymd_and_hms(2024, 3, 1, 10, 47, 58).unwrap()));
    }

    #[test]
    fn test_granularity_serde_as_label() {
        let json = serde_json::to_string(&Granularity::FIVE_MINUTES).unwrap();
        assert_eq!(json, "\"5m\"");
        let back: Granularity = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Granularity::FIVE_MINUTES);
    }

    #[test]
    fn test_ticker_mid_price_and_validity() {
        let ticker = Ticker {
            product_code: "FX_BTC_JPY".to_string(),
            timestamp: Utc::now(),
            best_bid: 100.0,
            best_ask: 102.0,
            volume: 1.5,
        };
        assert_eq!(ticker.mid_price(), 101.0);
        assert_eq!(ticker.best_price(Side::Buy), 102.0);
        assert_eq!(ticker.best_price(Side::Sell), 100.0);
        assert!(ticker.is_valid());

        let broken = Ticker {
            best_bid: 0.0,
            best_ask: 0.0,
            ..ticker
        };
        assert!(!broken.is_valid());
    }

    #[test]
    fn test_direction_sides() {
        assert_eq!(Direction::Long.open_side(), Side::Buy);
        assert_eq!(Direction::Long.close_side(), Side::Sell);
        assert_eq!(Direction::Short.open_side(), Side::Sell);
        assert_eq!(Direction::Short.close_side(), Side::Buy);
        assert_eq!("sell".parse::<Side>().unwrap(), Side::Sell);
        assert_eq!(serde_json::to_string(&Side::Buy).unwrap(), "\"BUY\"");
    }
}
