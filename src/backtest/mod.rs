// Parameter search, background optimization and historical replay
pub mod metrics;
pub mod optimizer;
pub mod runner;
pub mod synthetic;
pub mod worker;

pub use metrics::BacktestMetrics;
pub use optimizer::{optimize, SearchRanges};
pub use runner::{BacktestReport, BacktestRunner};
pub use synthetic::{MarketScenario, SyntheticDataGenerator};
pub use worker::{OptimizerWorker, RetryBackoff};
