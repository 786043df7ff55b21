use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AnalyticsError {
    #[error("Not enough data to perform calculation: {0}")]
    NotEnoughData(String),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Artifact '{0}' is not a known artifact name")]
    UnknownArtifact(String),

    #[error("Artifact not found: {0}")]
    NotFound(String),

    #[error("Artifacts for run {0} are already published")]
    AlreadyPublished(String),

    #[error("No remote artifact root is configured")]
    NoRemote,

    #[error("Remote mirror failed: {0}")]
    Mirror(String),
}

impl AnalyticsError {
    pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.into();
        move |source| AnalyticsError::Io { path, source }
    }
}
