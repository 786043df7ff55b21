use market_data::DataError;
use risk::RiskError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StrategyError {
    #[error("Strategy received invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("Data error: {0}")]
    Data(#[from] DataError),

    #[error("Sizing error: {0}")]
    Risk(#[from] RiskError),

    #[error(
        "Composite legs disagree on the direction of {symbol}: long in [{}], short in [{}]; opposing exposures are not netted",
        .long_legs.join(", "),
        .short_legs.join(", ")
    )]
    CompositeOverlap {
        symbol: String,
        long_legs: Vec<String>,
        short_legs: Vec<String>,
    },
}
