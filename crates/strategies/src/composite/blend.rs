use crate::error::StrategyError;
use core_types::{Weights, gross_exposure};
use rust_decimal::Decimal;
use std::collections::BTreeSet;

/// One leg's contribution to a blend.
#[derive(Debug, Clone, PartialEq)]
pub struct LegTarget {
    pub name: String,
    pub weight: Decimal,
    pub pre: Weights,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Blend {
    /// Each leg's weights after the optional per-leg gross normalisation.
    pub leg_pre: Vec<Weights>,
    /// `leg weight x leg_pre`, scaled with the blended result.
    pub contributions: Vec<Weights>,
    pub blended: Weights,
}

/// Weighted sum of leg targets, aligned on the symbol union.
///
/// Fails with `CompositeOverlap` when legs hold a symbol in opposite directions.
pub fn blend(
    legs: &[LegTarget],
    leg_gross: Option<Decimal>,
    target_gross: Option<Decimal>,
) -> Result<Blend, StrategyError> {
    // --- 1. Optional per-leg normalisation ---
    let leg_pre: Vec<Weights> = legs
        .iter()
        .map(|leg| match leg_gross {
            Some(gross) => scale_to_gross(&leg.pre, gross),
            None => leg.pre.clone(),
        })
        .collect();

    // --- 2. Weighted contributions and the opposite-sign check ---
    let mut contributions: Vec<Weights> = legs
        .iter()
        .zip(&leg_pre)
        .map(|(leg, pre)| {
            pre.iter()
                .map(|(symbol, w)| (symbol.clone(), leg.weight * *w))
                .filter(|(_, w)| !w.is_zero())
                .collect()
        })
        .collect();

    let symbols: BTreeSet<&String> = contributions.iter().flat_map(|c| c.keys()).collect();
    for symbol in &symbols {
        let mut long_legs = Vec::new();
        let mut short_legs = Vec::new();
        for (leg, contribution) in legs.iter().zip(&contributions) {
            match contribution.get(*symbol) {
                Some(w) if *w > Decimal::ZERO => long_legs.push(leg.name.clone()),
                Some(w) if *w < Decimal::ZERO => short_legs.push(leg.name.clone()),
                _ => {}
            }
        }
        if !long_legs.is_empty() && !short_legs.is_empty() {
            return Err(StrategyError::CompositeOverlap {
                symbol: (*symbol).clone(),
                long_legs,
                short_legs,
            });
        }
    }

    let mut blended = Weights::new();
    for contribution in &contributions {
        for (symbol, w) in contribution {
            *blended.entry(symbol.clone()).or_insert(Decimal::ZERO) += *w;
        }
    }
    blended.retain(|_, w| !w.is_zero());

    // --- 3. Optional final normalisation ---
    if let Some(gross) = target_gross {
        let current = gross_exposure(&blended);
        if !current.is_zero() && current != gross {
            let factor = gross / current;
            blended = blended.into_iter().map(|(s, w)| (s, w * factor)).collect();
            for contribution in &mut contributions {
                for w in contribution.values_mut() {
                    *w *= factor;
                }
            }
        }
    }

    Ok(Blend {
        leg_pre,
        contributions,
        blended,
    })
}

fn scale_to_gross(weights: &Weights, gross: Decimal) -> Weights {
    let current = gross_exposure(weights);
    if current.is_zero() || current == gross {
        return weights.clone();
    }
    let factor = gross / current;
    weights
        .iter()
        .map(|(s, w)| (s.clone(), *w * factor))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn leg(name: &str, weight: Decimal, pre: &[(&str, Decimal)]) -> LegTarget {
        LegTarget {
            name: name.to_string(),
            weight,
            pre: pre.iter().map(|(s, w)| (s.to_string(), *w)).collect(),
        }
    }

    #[test]
    fn weighted_sum_over_the_symbol_union() {
        let legs = vec![
            leg("a", dec!(0.5), &[("AAA", dec!(1))]),
            leg("b", dec!(0.5), &[("AAA", dec!(0.5)), ("BBB", dec!(0.5))]),
        ];
        let blend = blend(&legs, None, None).unwrap();
        assert_eq!(blend.blended["AAA"], dec!(0.75));
        assert_eq!(blend.blended["BBB"], dec!(0.25));
        assert_eq!(blend.contributions[1]["BBB"], dec!(0.25));
    }

    #[test]
    fn opposite_signs_are_rejected_not_netted() {
        let legs = vec![
            leg("momentum", dec!(0.5), &[("AAA", dec!(1))]),
            leg("reversal", dec!(0.5), &[("AAA", dec!(-1))]),
        ];
        match blend(&legs, None, None) {
            Err(StrategyError::CompositeOverlap {
                symbol,
                long_legs,
                short_legs,
            }) => {
                assert_eq!(symbol, "AAA");
                assert_eq!(long_legs, vec!["momentum"]);
                assert_eq!(short_legs, vec!["reversal"]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn leg_and_target_gross_normalisation() {
        let legs = vec![
            leg("a", dec!(0.5), &[("AAA", dec!(0.25))]),
            leg("b", dec!(0.5), &[("BBB", dec!(2))]),
        ];
        let blend = blend(&legs, Some(dec!(1)), Some(dec!(0.5))).unwrap();
        assert_eq!(blend.leg_pre[0]["AAA"], dec!(1));
        assert_eq!(blend.leg_pre[1]["BBB"], dec!(1));
        assert_eq!(blend.blended["AAA"], dec!(0.25));
        assert_eq!(blend.blended["BBB"], dec!(0.25));
        assert_eq!(blend.contributions[0]["AAA"], dec!(0.25));
    }
}
