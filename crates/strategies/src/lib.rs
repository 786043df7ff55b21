//! # Meridian Strategy Library
//!
//! This crate contains the decision logic of the simulation. It defines a
//! universal `Strategy` trait and provides the concrete variants a run
//! document can name.
//!
//! ## Architectural Principles
//!
//! - **Pure logic:** strategies have no knowledge of orders, cash or storage.
//!   They read a `MarketView` and a `PortfolioSnapshot` and return a
//!   `StrategyDecision`.
//! - **Strategy agnostic engine:** the backtester drives any `Box<dyn Strategy>`.
//!   Hooks the engine calls on every strategy (`after_constraints`,
//!   `on_execution`) have no-op defaults, so only the composite overrides them.
//! - **Closed set of variants:** `create_strategy` matches on the tagged
//!   `StrategyConfig` enum, so an unknown kind is a parse error, never a
//!   runtime surprise.
//!
//! ## Public API
//!
//! - `Strategy` and `StrategyContext`.
//! - `create_strategy`: the factory.
//! - The variants: `StaticUniverse`, `SignalTopN`, `LongShortTopN`,
//!   `ConfiguredStrategy` and `CompositeStrategy`.

use chrono::NaiveDate;
use core_types::{DecisionTrace, ExecutionReport, LegWeights, PortfolioSnapshot, StrategyDecision, Weights};
use market_data::MarketView;

pub mod composite;
pub mod configured;
pub mod error;
pub mod factory;
pub mod long_short;
pub mod ranking;
pub mod signal_top_n;
pub mod static_universe;

pub use composite::CompositeStrategy;
pub use configured::ConfiguredStrategy;
pub use error::StrategyError;
pub use factory::create_strategy;
pub use long_short::LongShortTopN;
pub use signal_top_n::SignalTopN;
pub use static_universe::StaticUniverse;

/// Everything a strategy may look at when it decides at Close(T).
#[derive(Debug, Clone, Copy)]
pub struct StrategyContext<'a> {
    pub date: NaiveDate,
    pub is_rebalance_day: bool,
    pub market: &'a MarketView<'a>,
    /// The book the strategy is responsible for: the whole portfolio, or a
    /// composite leg's sleeve.
    pub portfolio: &'a PortfolioSnapshot,
}

/// The core trait that all strategies implement.
///
/// The `&mut self` in `decide` lets strategies keep state between days (exit
/// bookkeeping, sleeves). `Send` lets a run move to a blocking worker thread.
pub trait Strategy: Send {
    fn name(&self) -> &str;

    /// Whether `decide` must be called on non-rebalance days too, e.g. for exits.
    fn evaluates_daily(&self) -> bool {
        false
    }

    /// Produces the decision for Close(T).
    ///
    /// * `StrategyDecision::None` - nothing to do; no trade will happen.
    /// * `StrategyDecision::Target` - rebalance to the target at the next open.
    ///   An empty weight map liquidates the book.
    /// * `StrategyDecision::Scale` - multiply the listed positions only.
    fn decide(&mut self, ctx: &StrategyContext<'_>) -> Result<StrategyDecision, StrategyError>;

    /// Called with the sized (`pre`) and constrained (`post`) weights of a
    /// `Target` decision before it is scheduled.
    fn after_constraints(&mut self, _pre: &Weights, _post: &Weights) -> Result<(), StrategyError> {
        Ok(())
    }

    /// Called after the broker has executed this strategy's previous decision.
    fn on_execution(&mut self, _report: &ExecutionReport) {}

    /// Debug traces recorded since the last call.
    fn drain_traces(&mut self) -> Vec<DecisionTrace> {
        Vec::new()
    }

    /// Per-leg weights of the most recent `Target` decision, for blended strategies.
    fn leg_weights(&self) -> Option<Vec<LegWeights>> {
        None
    }
}
