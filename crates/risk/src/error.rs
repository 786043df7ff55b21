use rust_decimal::Decimal;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RiskError {
    #[error("Invalid sizer parameters: {0}")]
    InvalidParameters(String),

    /// Exposure budgets are magnitudes; the sign comes from the side.
    #[error("Exposure budgets must be non-negative (long {long}, short {short})")]
    NegativeBudget { long: Decimal, short: Decimal },
}
