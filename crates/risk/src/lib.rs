//! # Meridian Risk
//!
//! Turns what a strategy wants into weights the broker may trade.
//!
//! ## Architectural Principles
//!
//! - **Sizing and limits are separate:** a `Sizer` only converts scores into
//!   weights; the `ConstraintPipeline` only restricts weights. Neither knows
//!   about orders or cash.
//! - **Deterministic:** every map is ordered and every tie has a fixed break,
//!   so the same inputs always give the same weights.
//!
//! ## Public API
//!
//! - `Sizer` and `create_sizer`: score-to-weight conversion.
//! - `resolve_target`: runs a `Target` through a sizer when it holds scores.
//! - `ConstraintPipeline`: max position weight, max positions, max gross,
//!   max net and max turnover, applied to a fixed point.

use configuration::SizerConfig;
use core_types::{Scales, ScoredSelection, Target, Weights};
use market_data::MarketView;

pub mod constraints;
pub mod error;
pub mod sizer;

pub use constraints::{ConstraintOutcome, ConstraintPipeline, turnover};
pub use error::RiskError;
pub use sizer::{EqualWeightSizer, InverseVolatilitySizer, ScoreWeightedSizer};

/// Converts a scored selection into signed weights.
///
/// Implementations must hand each side exactly its exposure budget: longs
/// positive, shorts negative.
pub trait Sizer: Send + Sync {
    fn size(
        &self,
        selection: &ScoredSelection,
        market: &MarketView<'_>,
    ) -> Result<Weights, RiskError>;
}

/// A factory function that creates a sizer instance from its configuration.
pub fn create_sizer(config: &SizerConfig) -> Result<Box<dyn Sizer>, RiskError> {
    match config {
        SizerConfig::EqualWeight => Ok(Box::new(EqualWeightSizer)),
        SizerConfig::ScoreWeighted => Ok(Box::new(ScoreWeightedSizer)),
        SizerConfig::InverseVolatility { lookback } => {
            Ok(Box::new(InverseVolatilitySizer::new(*lookback)?))
        }
    }
}

/// Explicit weights pass through untouched; scores go through the sizer.
pub fn resolve_target(
    target: &Target,
    sizer: &dyn Sizer,
    market: &MarketView<'_>,
) -> Result<Weights, RiskError> {
    match target {
        Target::Weights(weights) => Ok(weights.clone()),
        Target::Scores(selection) => {
            if selection.long_exposure.is_sign_negative() || selection.short_exposure.is_sign_negative() {
                return Err(RiskError::NegativeBudget {
                    long: selection.long_exposure,
                    short: selection.short_exposure,
                });
            }
            sizer.size(selection, market)
        }
    }
}

/// Multiplies each listed weight by its factor. A factor of zero removes the name.
pub fn apply_scales(mut weights: Weights, scales: &Scales) -> Weights {
    for (symbol, factor) in scales {
        if let Some(weight) = weights.get_mut(symbol) {
            *weight *= *factor;
        }
    }
    weights.retain(|_, w| !w.is_zero());
    weights
}
