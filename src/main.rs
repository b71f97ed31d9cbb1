use anyhow::{Context, Result};
use fxbot::api::{BitflyerClient, PaperExchange};
use fxbot::backtest::{OptimizerWorker, RetryBackoff};
use fxbot::clock::{Clock, SystemClock};
use fxbot::config::Settings;
use fxbot::db::PostgresLedger;
use fxbot::execution::{
    Engine, EngineConfig, GatewayConfig, OrderExecutor, OrderGateway, SimulatedGateway,
};
use fxbot::ledger::{MemoryLedger, SignalLedger};
use fxbot::market::TickerFeed;
use fxbot::persistence::{CandleStore, MemoryCandleStore, RedisCandleStore};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{interval_at, Duration, Instant, MissedTickBehavior};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let settings = Settings::load().context("Invalid configuration")?;
    setup_logging(settings.log_json);

    tracing::info!(
        product = %settings.product_code,
        trade_granularity = %settings.trade_granularity,
        back_test = settings.back_test,
        "fxbot starting"
    );

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store = connect_store(&settings).await?;
    let ledger = connect_ledger(&settings).await?;

    let source = Arc::new(
        BitflyerClient::new(settings.api_base_url.clone()).context("Failed to build HTTP client")?,
    );
    let feed = TickerFeed::new(
        source,
        store.clone(),
        settings.product_code.clone(),
        settings.granularities.clone(),
    )
    .with_retention(settings.candle_retention, settings.retention_trim_every);
    let ticker_rx = feed.subscribe();

    let executor: Arc<dyn OrderExecutor> = if settings.back_test {
        Arc::new(SimulatedGateway::new(ledger.clone(), clock.clone()))
    } else {
        let exchange = Arc::new(PaperExchange::new(
            ticker_rx.clone(),
            settings.paper_collateral,
        ));
        let events = ledger
            .snapshot(&settings.product_code)
            .await
            .context("Failed to read the signal ledger")?;
        if let Some(leg) = events.open_leg() {
            exchange
                .seed_open_leg(&leg)
                .context("Failed to seed the paper book")?;
        }
        Arc::new(OrderGateway::new(
            exchange,
            ledger.clone(),
            clock.clone(),
            GatewayConfig::from_settings(&settings),
        ))
    };

    let optimizer = OptimizerWorker::new(
        store.clone(),
        clock.clone(),
        settings.product_code.clone(),
        settings.trade_granularity,
        settings.data_limit,
        settings.num_ranking,
        RetryBackoff::new(
            settings.optimizer_backoff_base(),
            settings.optimizer_backoff_max(),
            settings.continue_optimizing,
        ),
    );

    let engine = Arc::new(
        Engine::new(
            EngineConfig::from_settings(&settings),
            store,
            ledger,
            executor,
            clock,
            optimizer,
        )
        .with_ticker(ticker_rx),
    );

    let restored = engine
        .restore()
        .await
        .context("Failed to restore position from ledger")?;
    tracing::info!(state = restored.name(), "Position state at startup");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut feed_task = tokio::spawn(feed.run(settings.ticker_poll_interval(), shutdown_rx.clone()));
    let mut evaluation_task = tokio::spawn(evaluation_loop(
        engine.clone(),
        settings.evaluation_interval(),
        shutdown_rx,
    ));

    tracing::info!(
        ticker_every = ?settings.ticker_poll_interval(),
        evaluate_every = ?settings.evaluation_interval(),
        "Loops running; press Ctrl+C to stop"
    );

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received Ctrl+C, shutting down");
        }
        result = &mut feed_task => {
            tracing::error!("Ticker feed exited: {:?}", result);
        }
        result = &mut evaluation_task => {
            tracing::error!("Evaluation loop exited: {:?}", result);
        }
    }

    shutdown_tx.send(true).ok();
    let _ = tokio::time::timeout(Duration::from_secs(5), async {
        let _ = feed_task.await;
        let _ = evaluation_task.await;
    })
    .await;

    match engine.snapshot().await {
        Ok(snapshot) => tracing::info!(
            snapshot = %serde_json::to_string(&snapshot).unwrap_or_default(),
            "Final engine state"
        ),
        Err(e) => tracing::warn!("Could not read final snapshot: {}", e),
    }

    tracing::info!("fxbot stopped");
    Ok(())
}

/// One cycle per tick; a cycle still holding the trade lock makes the next one skip
async fn evaluation_loop(engine: Arc<Engine>, every: Duration, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = interval_at(Instant::now() + every, every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let engine = engine.clone();
                tokio::spawn(async move {
                    engine.run_cycle().await;
                });
            }
            _ = shutdown.changed() => break,
        }
    }
}

fn setup_logging(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("fxbot=info"));

    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn connect_store(settings: &Settings) -> Result<Arc<dyn CandleStore>> {
    match &settings.redis_url {
        Some(url) => {
            let store = RedisCandleStore::new(url)
                .await
                .with_context(|| format!("Failed to connect to Redis at {}", url))?;
            tracing::info!("Candle store: Redis");
            Ok(Arc::new(store))
        }
        None => {
            tracing::warn!("No redis_url configured; candles are kept in memory only");
            Ok(Arc::new(MemoryCandleStore::new()))
        }
    }
}

async fn connect_ledger(settings: &Settings) -> Result<Arc<dyn SignalLedger>> {
    if settings.back_test {
        tracing::info!("Back-test mode: signal ledger kept in memory");
        return Ok(Arc::new(MemoryLedger::new()));
    }

    match &settings.database_url {
        Some(url) => {
            let ledger = PostgresLedger::new(url)
                .await
                .context("Failed to open the Postgres signal ledger")?;
            Ok(Arc::new(ledger))
        }
        None => {
            tracing::warn!("No database_url configured; fills are not persisted");
            Ok(Arc::new(MemoryLedger::new()))
        }
    }
}
