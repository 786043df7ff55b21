//! # Meridian Core Types
//!
//! The shared vocabulary of the simulation engine and the run orchestration
//! layer. This is a Layer 0 crate: it depends on nothing else in the workspace
//! and every other crate speaks in its terms.
//!
//! ## Public API
//!
//! - Market and portfolio state: `Bar`, `Position`, `Holding`, `PortfolioSnapshot`.
//! - Decisions: `StrategyDecision`, `Target`, `ScoredSelection`, `Weights`, `Scales`.
//! - Execution: `Fill`, `ExecutionReport`.
//! - Per-day engine output: `DailyRecord`, `DecisionRecord`, `DecisionTrace`.
//! - Run lifecycle vocabulary: `RunStatus`.

pub mod enums;
pub mod error;
pub mod records;
pub mod structs;

// Re-export the core types to provide a clean public API.
pub use enums::{OrderSide, RunStatus, Side};
pub use error::CoreError;
pub use records::{
    ConstraintAdjustment, DailyRecord, DecisionKind, DecisionRecord, DecisionTrace, ExitEvent,
    LegWeights,
};
pub use structs::{
    Bar, ExecutionReport, Fill, Holding, PortfolioSnapshot, Position, Scales, ScoredSelection,
    StrategyDecision, Target, Weights, gross_exposure, net_exposure,
};
