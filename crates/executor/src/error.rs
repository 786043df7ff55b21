use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExecutorError {
    #[error("Short selling is disabled but the target holds {symbol} at weight {weight}")]
    ShortingDisabled { symbol: String, weight: String },

    #[error("Invalid fill for {symbol}: {reason}")]
    InvalidFill { symbol: String, reason: String },

    #[error("Cannot value the portfolio: {0}")]
    Valuation(String),
}
