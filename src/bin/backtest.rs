use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use clap::Parser;
use fxbot::backtest::{BacktestReport, BacktestRunner, MarketScenario, SyntheticDataGenerator};
use fxbot::config::Settings;
use fxbot::persistence::RedisCandleStore;

/// Replay candles through the trading engine with simulated fills
#[derive(Parser)]
#[command(name = "backtest", about = "fxbot backtesting suite")]
struct Cli {
    /// Synthetic scenario to run (all scenarios when omitted)
    #[arg(long, value_enum)]
    scenario: Option<MarketScenario>,

    /// Replay the latest candles from Redis instead of synthetic data
    #[arg(long, default_value_t = false)]
    redis: bool,

    /// Number of trade-granularity candles to replay
    #[arg(long, default_value_t = 1000)]
    candles: usize,

    /// Seed for synthetic data
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Print the report as JSON
    #[arg(long, default_value_t = false)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("fxbot=warn")),
        )
        .init();

    let cli = Cli::parse();
    let settings = Settings {
        back_test: true,
        ..Settings::load().context("Invalid configuration")?
    };
    let runner = BacktestRunner::new(settings.clone());

    if cli.redis {
        let url = settings
            .redis_url
            .as_deref()
            .context("--redis needs redis_url (FXBOT_REDIS_URL)")?;
        let store = RedisCandleStore::new(url)
            .await
            .with_context(|| format!("Failed to connect to Redis at {}", url))?;
        let report = runner.run_from_store(&store, cli.candles).await?;
        print_report("redis", &report, cli.json)?;
        return Ok(());
    }

    let scenarios = match cli.scenario {
        Some(scenario) => vec![scenario],
        None => MarketScenario::ALL.to_vec(),
    };

    let start = Utc::now() - Duration::seconds(settings.trade_granularity.as_secs() * cli.candles as i64);
    let mut results = Vec::new();

    for scenario in scenarios {
        let candles = SyntheticDataGenerator::new(cli.seed, settings.product_code.clone())
            .generate(scenario, settings.trade_granularity, start, cli.candles);

        let report = runner
            .run(candles)
            .await
            .with_context(|| format!("Backtest failed for {:?}", scenario))?;
        print_report(&format!("{:?}", scenario), &report, cli.json)?;
        results.push((scenario, report));
    }

    if !cli.json && results.len() > 1 {
        println!("=== SCENARIO COMPARISON ===\n");
        println!(
            "{:<12} {:>14} {:>8} {:>9} {:>14}",
            "Scenario", "Profit", "Trades", "Win %", "Max DD"
        );
        for (scenario, report) in &results {
            println!(
                "{:<12} {:>14.2} {:>8} {:>8.1}% {:>14.2}",
                format!("{:?}", scenario),
                report.profit,
                report.metrics.total_trades,
                report.metrics.win_rate,
                report.metrics.max_drawdown
            );
        }
        println!();
    }

    Ok(())
}

fn print_report(name: &str, report: &BacktestReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    println!("\n--- {} ---", name);
    println!("Final state:      {}", report.final_state.name());
    println!("Open mark:        {:.2}", report.open_mark);
    match &report.params {
        Some(params) => println!("Enabled:          {:?}", params.enabled_kinds()),
        None => println!("Enabled:          none"),
    }
    report.metrics.print_report();
    Ok(())
}
