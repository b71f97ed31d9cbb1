use crate::error::Error;
use crate::ledger::{SignalEvent, SignalEvents, SignalLedger};
use crate::models::Side;
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};

/// Postgres-backed signal ledger
pub struct PostgresLedger {
    pool: PgPool,
}

fn to_decimal(field: &str, value: f64) -> Result<Decimal> {
    Decimal::from_f64(value)
        .ok_or_else(|| Error::InvalidNumber(format!("{} = {}", field, value)))
}

fn to_f64(field: &str, value: Decimal) -> Result<f64> {
    value
        .to_f64()
        .ok_or_else(|| Error::InvalidNumber(format!("{} = {}", field, value)))
}

fn event_from_row(row: &PgRow) -> Result<SignalEvent> {
    let side: String = row.get("side");
    let side: Side = side
        .parse()
        .map_err(|_| Error::InvalidNumber(format!("side = {}", side)))?;

    Ok(SignalEvent {
        time: row.get("time"),
        product_code: row.get("product_code"),
        side,
        price: to_f64("price", row.get("price"))?,
        size: to_f64("size", row.get("size"))?,
        atr: to_f64("atr", row.get("atr"))?,
        atr_rate: to_f64("atr_rate", row.get("atr_rate"))?,
        pnl: to_f64("pnl", row.get("pnl"))?,
        reopen: row.get("reopen"),
    })
}

impl PostgresLedger {
    /// Connect to Postgres and apply pending migrations
    ///
    /// # Arguments
    /// * `database_url` - Postgres connection URL
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        tracing::info!("Signal ledger connected to Postgres");

        Ok(Self { pool })
    }

    /// Total realized pnl recorded on closing fills
    pub async fn total_pnl(&self, product_code: &str) -> Result<f64> {
        let row = sqlx::query(
            r#"
            SELECT COALESCE(SUM(pnl), 0) AS total_pnl
            FROM signal_events
            WHERE product_code = $1
            "#,
        )
        .bind(product_code)
        .fetch_one(&self.pool)
        .await?;

        to_f64("total_pnl", row.get("total_pnl"))
    }

    /// Delete every fill for a product (testing only)
    #[cfg(test)]
    pub async fn clear_product(&self, product_code: &str) -> Result<()> {
        sqlx::query("DELETE FROM signal_events WHERE product_code = $1")
            .bind(product_code)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

#[async_trait]
impl SignalLedger for PostgresLedger {
    async fn record(&self, event: &SignalEvent) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO signal_events (
                product_code, time, side, price, size, atr, atr_rate, pnl, reopen
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (product_code, time) DO NOTHING
            "#,
        )
        .bind(&event.product_code)
        .bind(event.time)
        .bind(event.side.as_str())
        .bind(to_decimal("price", event.price)?)
        .bind(to_decimal("size", event.size)?)
        .bind(to_decimal("atr", event.atr)?)
        .bind(to_decimal("atr_rate", event.atr_rate)?)
        .bind(to_decimal("pnl", event.pnl)?)
        .bind(event.reopen)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            tracing::debug!(
                "Signal for {} at {} already recorded",
                event.product_code,
                event.time
            );
            return Ok(false);
        }

        tracing::debug!(
            "Recorded {} {} @ {} for {}",
            event.side,
            event.size,
            event.price,
            event.product_code
        );
        Ok(true)
    }

    async fn events(&self, product_code: &str, limit: usize) -> Result<SignalEvents> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM (
                SELECT product_code, time, side, price, size, atr, atr_rate, pnl, reopen
                FROM signal_events
                WHERE product_code = $1
                ORDER BY time DESC
                LIMIT $2
            ) recent
            ORDER BY time ASC
            "#,
        )
        .bind(product_code)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let signals = rows.iter().map(event_from_row).collect::<Result<Vec<_>>>()?;
        Ok(SignalEvents { signals })
    }

    async fn events_after(&self, product_code: &str, time: DateTime<Utc>) -> Result<SignalEvents> {
        let rows = sqlx::query(
            r#"
            SELECT product_code, time, side, price, size, atr, atr_rate, pnl, reopen
            FROM signal_events
            WHERE product_code = $1 AND time >= $2
            ORDER BY time ASC
            "#,
        )
        .bind(product_code)
        .bind(time)
        .fetch_all(&self.pool)
        .await?;

        let signals = rows.iter().map(event_from_row).collect::<Result<Vec<_>>>()?;
        Ok(SignalEvents { signals })
    }
}
