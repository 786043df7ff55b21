use core_types::RunStatus;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Run store is unavailable: {0}")]
    Unavailable(String),

    #[error("Run {0} was not found")]
    NotFound(String),

    #[error("Run {0} already exists")]
    AlreadyExists(String),

    #[error("Run {run_id} cannot move from {from} to {to}")]
    InvalidTransition {
        run_id: String,
        from: RunStatus,
        to: RunStatus,
    },

    #[error("Concurrent modification of {0}; retry limit reached")]
    Conflict(String),

    #[error("Precondition failed on object {0}")]
    PreconditionFailed(String),

    #[error("Lease on run {run_id} is held by {owner}")]
    LeaseHeld { run_id: String, owner: String },

    #[error("Lease on run {0} was lost")]
    LeaseLost(String),

    #[error("Corrupt run record: {0}")]
    Corrupt(String),

    #[error("Database error: {0}")]
    Sql(#[from] sqlx::Error),

    #[error("Database migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("An error occurred during JSON serialization/deserialization: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.into();
        move |source| StoreError::Io { path, source }
    }
}
