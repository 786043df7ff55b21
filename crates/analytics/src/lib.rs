//! # Meridian Analytics
//!
//! Turns a finished `BacktestResult` into the run's artifacts: the summary
//! metrics, the daily and monthly tables, the trade log, and (for pipeline and
//! composite strategies) the weight and trace detail.
//!
//! ## Architectural Principles
//!
//! - **Stateless Calculation:** `AnalyticsEngine` is a pure function of the
//!   daily records. It never looks at market data.
//! - **Atomic Publication:** `ArtifactStore` writes a run into a `.partial`
//!   directory and renames it into place, so a reader sees all of a run's
//!   artifacts or none of them.
//! - **Stable Names:** artifacts are addressed by the fixed names in
//!   `ARTIFACT_NAMES`; anything else is rejected before touching the disk.
//!
//! ## Public API
//!
//! - `AnalyticsEngine`: summary, daily metrics and monthly returns.
//! - `ArtifactStore`: publish, list, read and page through run artifacts.
//! - `PerformanceReport` and the CSV row types.
//! - `AnalyticsError`

pub mod artifacts;
pub mod engine;
pub mod error;
pub mod report;

pub use artifacts::{ARTIFACT_NAMES, ArtifactInfo, ArtifactStore, DataSource, Page};
pub use engine::AnalyticsEngine;
pub use error::AnalyticsError;
pub use report::{
    BlendedWeightRow, DailyMetric, LegWeightRow, MonthlyReturnRow, PerformanceReport, TradeRow,
};
