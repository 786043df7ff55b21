use core_types::RunStatus;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum JobError {
    /// The document was rejected; no run was created.
    #[error("Invalid run configuration: {0}")]
    Config(#[from] configuration::ConfigError),

    #[error("Run store error: {0}")]
    Store(#[from] database::StoreError),

    #[error("Backtest failed: {0}")]
    Execution(#[from] backtester::BacktestError),

    #[error("Artifact error: {0}")]
    Artifacts(#[from] analytics::AnalyticsError),

    #[error("Run {0} was not found")]
    NotFound(String),

    #[error("Artifacts for run {run_id} are not yet available (status {status})")]
    NotYetAvailable { run_id: String, status: RunStatus },

    #[error("Run {0} was cancelled before it started")]
    CancelledBeforeStart(String),

    #[error("Timed out waiting for run {0}")]
    Timeout(String),

    #[error("Worker for run {run_id} stopped unexpectedly: {message}")]
    Worker { run_id: String, message: String },
}
