//! # Meridian Backtester
//!
//! The daily simulation loop. A `Backtester` owns one run's strategy, sizer,
//! constraint pipeline, broker and portfolio, and walks a `PriceFrame` one
//! trading day at a time.
//!
//! ## Architectural Principles
//!
//! - **Strict day ordering:** execute at Open(T), mark at Close(T), decide at
//!   Close(T). The decision only ever sees a `MarketView` positioned at T, so
//!   it cannot read Open(T+1) or anything later.
//! - **Explicit liquidation:** an empty weight target is executed like any
//!   other target; only `StrategyDecision::None` means "do nothing".
//! - **Synchronous:** `run` is plain blocking code. The job manager
//!   runs it on a blocking worker and stops it through a `watch` flag that is
//!   checked between days, never in the middle of one.
//!
//! ## Public API
//!
//! - `Backtester`, `BacktestResult`
//! - `run_backtest`: load data and simulate in one call.
//! - `load_market_data`, `RebalanceSchedule`, `BacktestError`

pub mod engine;
pub mod error;
pub mod loader;
pub mod schedule;

pub use engine::{BacktestResult, Backtester};
pub use error::BacktestError;
pub use loader::load_market_data;
pub use schedule::RebalanceSchedule;

use configuration::BacktestConfig;
use market_data::DataAccess;
use tokio::sync::watch;

/// Loads the run's data from `data` and simulates it to the end date.
pub fn run_backtest(
    config: &BacktestConfig,
    data: &dyn DataAccess,
    cancel: Option<watch::Receiver<bool>>,
) -> Result<BacktestResult, BacktestError> {
    let (prices, signals) = load_market_data(config, data)?;
    let mut engine = Backtester::new(config.clone())?;
    if let Some(cancel) = cancel {
        engine = engine.with_cancellation(cancel);
    }
    engine.run(&prices, &signals)
}
