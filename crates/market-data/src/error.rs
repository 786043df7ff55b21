use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DataError {
    #[error("Market data unavailable: {0}")]
    Unavailable(String),

    #[error("Signal column '{0}' is not available")]
    MissingColumn(String),

    #[error("Malformed data in {path}: {message}")]
    Malformed { path: PathBuf, message: String },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}
