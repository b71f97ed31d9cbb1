// Market data: tick ingestion, candle aggregation and candle windows

pub mod aggregator;
pub mod feed;
pub mod series;

pub use aggregator::CandleAggregator;
pub use feed::{TickReport, TickerFeed};
pub use series::CandleSeries;
