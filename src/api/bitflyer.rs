use super::TickerSource;
use crate::error::Error;
use crate::models::Ticker;
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use governor::{Quota, RateLimiter};
use reqwest::Client;
use serde::Deserialize;
use std::num::NonZeroU32;
use std::sync::Arc;
use tokio::time::{sleep, Duration};

const RATE_LIMIT_PER_SEC: u32 = 4;
const MAX_RETRIES: u32 = 3;
const INITIAL_BACKOFF_MS: u64 = 500;

type BitflyerRateLimiter = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Public bitFlyer Lightning REST client (ticker only)
///
/// Cloneable; all clones share the same rate limiter.
#[derive(Clone)]
pub struct BitflyerClient {
    client: Client,
    base_url: String,
    rate_limiter: Arc<BitflyerRateLimiter>,
    initial_backoff: Duration,
}

/// Response from /v1/ticker
#[derive(Debug, Deserialize)]
struct TickerResponse {
    product_code: String,
    timestamp: String,
    best_bid: f64,
    best_ask: f64,
    volume: f64,
}

/// bitFlyer timestamps are UTC but usually carry no offset
fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(|e| Error::InvalidTicker(format!("bad timestamp '{}': {}", raw, e)))
}

impl BitflyerClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(10)).build()?;

        let quota = Quota::per_second(NonZeroU32::new(RATE_LIMIT_PER_SEC).unwrap_or(NonZeroU32::MIN));

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            rate_limiter: Arc::new(RateLimiter::direct(quota)),
            initial_backoff: Duration::from_millis(INITIAL_BACKOFF_MS),
        })
    }

    /// Override the first retry delay (doubles per attempt)
    pub fn with_backoff(mut self, initial_backoff: Duration) -> Self {
        self.initial_backoff = initial_backoff;
        self
    }

    /// Fetch the ticker with retry and exponential backoff on transient failures
    pub async fn fetch_ticker(&self, product_code: &str) -> Result<Ticker> {
        let mut last_error = None;

        for attempt in 1..=MAX_RETRIES {
            match self.fetch_ticker_once(product_code).await {
                Ok(ticker) => return Ok(ticker),
                Err(e) if is_transient(&e) && attempt < MAX_RETRIES => {
                    let backoff = self.initial_backoff * 2u32.pow(attempt - 1);
                    tracing::warn!(
                        "Ticker attempt {}/{} failed: {}. Retrying in {:?}",
                        attempt,
                        MAX_RETRIES,
                        e,
                        backoff
                    );
                    last_error = Some(e);
                    sleep(backoff).await;
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or_else(|| Error::Exchange("all ticker retries failed".into())))
    }

    async fn fetch_ticker_once(&self, product_code: &str) -> Result<Ticker> {
        self.rate_limiter.until_ready().await;

        let url = format!("{}/v1/ticker", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[("product_code", product_code)])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(Error::Exchange(format!("bitFlyer API error ({}): {}", status, body)));
        }

        let raw: TickerResponse = response.json().await?;
        let ticker = Ticker {
            product_code: raw.product_code,
            timestamp: parse_timestamp(&raw.timestamp)?,
            best_bid: raw.best_bid,
            best_ask: raw.best_ask,
            volume: raw.volume,
        };

        if !ticker.is_valid() {
            return Err(Error::InvalidTicker(format!(
                "bid={} ask={}",
                ticker.best_bid, ticker.best_ask
            )));
        }

        Ok(ticker)
    }
}

/// Network failures, 429 and 5xx are worth retrying; 4xx and bad payloads are not
fn is_transient(error: &Error) -> bool {
    match error {
        Error::Http(_) => true,
        Error::Exchange(msg) => msg.contains("(429") || msg.contains("(5"),
        _ => false,
    }
}

#[async_trait]
impl TickerSource for BitflyerClient {
    async fn get_ticker(&self, product_code: &str) -> Result<Ticker> {
        self.fetch_ticker(product_code).await
    }
}
