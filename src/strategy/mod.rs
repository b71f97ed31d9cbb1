// Indicator parameters and the crossover rules that turn them into votes
pub mod params;
pub mod signals;

pub use params::{
    BollingerParams, EmaParams, Fitted, IndicatorKind, MacdParams, RsiParams, TradeParams,
};
pub use signals::{IndicatorFrame, Votes};
