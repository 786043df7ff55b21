//! # Meridian Executor Crate
//!
//! This crate provides trade execution and portfolio state management for the
//! simulation. `SimulatedBroker` turns a target (weights, or per-position scale
//! factors) into fills at the open of day T, and `Portfolio` is the account
//! those fills are booked against.
//!
//! ## Architectural Principles
//!
//! - **Single mutation path:** the only way to change a `Portfolio` is
//!   `Portfolio::apply_fill`, and the only caller of that in a run is the
//!   broker. Strategies read `PortfolioSnapshot`s, never the portfolio itself.
//! - **Deterministic ordering:** orders are generated from `BTreeMap`s, reducing
//!   trades before opening trades, so two runs over the same inputs produce
//!   byte-identical trade logs.
//!
//! ## Public API
//!
//! - `SimulatedBroker`: the "virtual exchange" for backtesting.
//! - `Portfolio`: the in-memory state manager for a simulated account.
//! - `ExecutorError`: the specific error types that can be returned from this crate.

pub mod broker;
pub mod error;
pub mod portfolio;

pub use broker::SimulatedBroker;
pub use error::ExecutorError;
pub use portfolio::Portfolio;
