use crate::error::StrategyError;
use crate::{Strategy, StrategyContext};
use configuration::StaticUniverseParams;
use core_types::{ScoredSelection, StrategyDecision, Weights};
use rust_decimal::Decimal;
use std::collections::BTreeMap;

/// Holds a fixed list of symbols.
///
/// With explicit weights the target is exactly those weights. Otherwise every
/// symbol with a close on the decision date gets an equal score and the sizer
/// decides the split.
#[derive(Debug, Clone)]
pub struct StaticUniverse {
    symbols: Vec<String>,
    weights: Option<Weights>,
}

impl StaticUniverse {
    pub fn new(params: StaticUniverseParams) -> Result<Self, StrategyError> {
        if params.symbols.is_empty() {
            return Err(StrategyError::InvalidParameters(
                "static universe needs at least one symbol".to_string(),
            ));
        }
        Ok(Self {
            symbols: params.symbols,
            weights: params.weights,
        })
    }
}

impl Strategy for StaticUniverse {
    fn name(&self) -> &str {
        "static_universe"
    }

    fn decide(&mut self, ctx: &StrategyContext<'_>) -> Result<StrategyDecision, StrategyError> {
        if !ctx.is_rebalance_day {
            return Ok(StrategyDecision::None);
        }
        if let Some(weights) = &self.weights {
            return Ok(StrategyDecision::weights(weights.clone()));
        }

        let scores: BTreeMap<String, Decimal> = self
            .symbols
            .iter()
            .filter(|s| ctx.market.close(s).is_some())
            .map(|s| (s.clone(), Decimal::ONE))
            .collect();
        Ok(StrategyDecision::scores(ScoredSelection::long_only(
            scores,
            Decimal::ONE,
        )))
    }
}
