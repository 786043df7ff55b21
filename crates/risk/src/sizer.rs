use crate::Sizer;
use crate::error::RiskError;
use core_types::{ScoredSelection, Weights};
use market_data::MarketView;
use rust_decimal::{Decimal, MathematicalOps};
use std::collections::BTreeMap;

/// Splits each side's exposure budget evenly across its names.
#[derive(Debug, Clone, Default)]
pub struct EqualWeightSizer;

impl Sizer for EqualWeightSizer {
    fn size(
        &self,
        selection: &ScoredSelection,
        _market: &MarketView<'_>,
    ) -> Result<Weights, RiskError> {
        let mut weights = Weights::new();
        distribute(&mut weights, &equal_shares(&selection.long), selection.long_exposure);
        distribute(&mut weights, &equal_shares(&selection.short), -selection.short_exposure);
        Ok(weights)
    }
}

/// Weights each name by the magnitude of its score within its side.
#[derive(Debug, Clone, Default)]
pub struct ScoreWeightedSizer;

impl Sizer for ScoreWeightedSizer {
    fn size(
        &self,
        selection: &ScoredSelection,
        _market: &MarketView<'_>,
    ) -> Result<Weights, RiskError> {
        let mut weights = Weights::new();
        distribute(&mut weights, &score_shares(&selection.long), selection.long_exposure);
        distribute(&mut weights, &score_shares(&selection.short), -selection.short_exposure);
        Ok(weights)
    }
}

/// Weights each name by the inverse of its trailing return volatility.
///
/// A side where any name lacks `lookback` returns (or has zero volatility)
/// falls back to equal weights.
#[derive(Debug, Clone)]
pub struct InverseVolatilitySizer {
    lookback: usize,
}

impl InverseVolatilitySizer {
    pub fn new(lookback: usize) -> Result<Self, RiskError> {
        if lookback < 2 {
            return Err(RiskError::InvalidParameters(
                "inverse volatility needs a lookback of at least 2".to_string(),
            ));
        }
        Ok(Self { lookback })
    }

    fn side_shares(
        &self,
        scores: &BTreeMap<String, Decimal>,
        market: &MarketView<'_>,
    ) -> BTreeMap<String, Decimal> {
        let mut inverse = BTreeMap::new();
        for symbol in scores.keys() {
            let vol = market
                .returns(symbol, self.lookback)
                .and_then(|r| sample_std_dev(&r));
            match vol {
                Some(v) if v > Decimal::ZERO => {
                    inverse.insert(symbol.clone(), Decimal::ONE / v);
                }
                _ => {
                    tracing::debug!(
                        symbol = %symbol,
                        lookback = self.lookback,
                        "Volatility unavailable, falling back to equal weights for this side"
                    );
                    return equal_shares(scores);
                }
            }
        }
        normalise(inverse)
    }
}

impl Sizer for InverseVolatilitySizer {
    fn size(
        &self,
        selection: &ScoredSelection,
        market: &MarketView<'_>,
    ) -> Result<Weights, RiskError> {
        let mut weights = Weights::new();
        let long = self.side_shares(&selection.long, market);
        let short = self.side_shares(&selection.short, market);
        distribute(&mut weights, &long, selection.long_exposure);
        distribute(&mut weights, &short, -selection.short_exposure);
        Ok(weights)
    }
}

/// Sample standard deviation (n - 1 denominator).
pub fn sample_std_dev(values: &[Decimal]) -> Option<Decimal> {
    if values.len() < 2 {
        return None;
    }
    let n = Decimal::from(values.len());
    let mean = values.iter().copied().sum::<Decimal>() / n;
    let variance = values
        .iter()
        .map(|v| (*v - mean) * (*v - mean))
        .sum::<Decimal>()
        / (n - Decimal::ONE);
    variance.sqrt()
}

fn equal_shares(scores: &BTreeMap<String, Decimal>) -> BTreeMap<String, Decimal> {
    if scores.is_empty() {
        return BTreeMap::new();
    }
    let share = Decimal::ONE / Decimal::from(scores.len());
    scores.keys().map(|s| (s.clone(), share)).collect()
}

fn score_shares(scores: &BTreeMap<String, Decimal>) -> BTreeMap<String, Decimal> {
    let total: Decimal = scores.values().map(|s| s.abs()).sum();
    if total.is_zero() {
        return equal_shares(scores);
    }
    scores
        .iter()
        .map(|(s, score)| (s.clone(), score.abs() / total))
        .collect()
}

fn normalise(raw: BTreeMap<String, Decimal>) -> BTreeMap<String, Decimal> {
    let total: Decimal = raw.values().copied().sum();
    if total.is_zero() {
        return BTreeMap::new();
    }
    raw.into_iter().map(|(s, v)| (s, v / total)).collect()
}

fn distribute(weights: &mut Weights, shares: &BTreeMap<String, Decimal>, budget: Decimal) {
    if budget.is_zero() {
        return;
    }
    for (symbol, share) in shares {
        *weights.entry(symbol.clone()).or_insert(Decimal::ZERO) += share * budget;
    }
}
