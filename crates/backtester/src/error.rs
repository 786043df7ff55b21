use thiserror::Error;

#[derive(Error, Debug)]
pub enum BacktestError {
    #[error("Market data error: {0}")]
    Data(#[from] market_data::DataError),

    #[error("Strategy execution error: {0}")]
    Strategy(#[from] strategies::StrategyError),

    #[error("Risk management error: {0}")]
    Risk(#[from] risk::RiskError),

    #[error("Execution simulation error: {0}")]
    Executor(#[from] executor::ExecutorError),

    #[error("Progress bar template error: {0}")]
    ProgressBarTemplate(String),

    #[error("No trading days between {start} and {end}")]
    NoTradingDays { start: String, end: String },

    #[error("Run cancelled before {0}")]
    Cancelled(String),
}

impl From<indicatif::style::TemplateError> for BacktestError {
    fn from(error: indicatif::style::TemplateError) -> Self {
        BacktestError::ProgressBarTemplate(error.to_string())
    }
}
