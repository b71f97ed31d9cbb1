// Position lifecycle, order execution and the evaluation loop
pub mod engine;
pub mod executor;
pub mod position_manager;

pub use engine::{CycleOutcome, Engine, EngineConfig, EngineSnapshot, SkipReason};
pub use executor::{
    floor_size, ClosingLeg, ExecutionOutcome, ExecutionRequest, GatewayConfig, OrderExecutor,
    OrderGateway, SimulatedGateway,
};
pub use position_manager::{
    reopen_after_close, CloseSummary, ExitLevels, ExitReason, LevelConfig, OpenPosition,
    PositionState,
};
