use configuration::ConstraintConfig;
use core_types::{ConstraintAdjustment, Weights, gross_exposure, net_exposure};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::BTreeSet;

/// Limits are only enforced when exceeded by more than this, so rounding in a
/// previous scale step never triggers another one.
const TOLERANCE: Decimal = dec!(0.000000001);

/// Upper bound on full passes over the stage sequence.
const MAX_PASSES: usize = 8;

/// The constrained weights plus a record of every stage that changed them.
#[derive(Debug, Clone, PartialEq)]
pub struct ConstraintOutcome {
    pub weights: Weights,
    pub adjustments: Vec<ConstraintAdjustment>,
}

/// Applies the configured portfolio limits in a fixed order.
///
/// The static limits (position weight, position count, gross, net) are
/// repeated until they reach a fixed point. `max_turnover` runs once, last,
/// and takes precedence: when the current book itself breaches a static
/// limit, the result moves toward compliance by at most the turnover cap and
/// may still breach it. Each stage is the identity on input that already
/// satisfies it.
#[derive(Debug, Clone, Default)]
pub struct ConstraintPipeline {
    config: ConstraintConfig,
}

impl ConstraintPipeline {
    pub fn new(config: ConstraintConfig) -> Self {
        Self { config }
    }

    pub fn apply(&self, target: &Weights, current: &Weights) -> ConstraintOutcome {
        let mut weights = without_zeros(target.clone());
        let mut adjustments = Vec::new();

        for pass in 0..MAX_PASSES {
            let before = weights.clone();

            if let Some(limit) = self.config.max_position_weight {
                weights = clip_positions(weights, limit, &mut adjustments);
            }
            if let Some(limit) = self.config.max_positions {
                weights = keep_largest(weights, limit, &mut adjustments);
            }
            if let Some(limit) = self.config.max_gross {
                weights = cap_gross(weights, limit, &mut adjustments);
            }
            if let Some(limit) = self.config.max_net {
                weights = cap_net(weights, limit, &mut adjustments);
            }

            if weights == before {
                break;
            }
            if pass + 1 == MAX_PASSES {
                tracing::warn!(
                    passes = MAX_PASSES,
                    "Constraint pipeline did not reach a fixed point; using the last pass"
                );
            }
        }

        if let Some(limit) = self.config.max_turnover {
            weights = cap_turnover(weights, current, limit, &mut adjustments);
        }

        ConstraintOutcome {
            weights,
            adjustments,
        }
    }
}

/// Sum of |target - current| over the union of symbols, halved.
pub fn turnover(target: &Weights, current: &Weights) -> Decimal {
    let symbols: BTreeSet<&String> = target.keys().chain(current.keys()).collect();
    let total: Decimal = symbols
        .into_iter()
        .map(|s| {
            let t = target.get(s).copied().unwrap_or_default();
            let c = current.get(s).copied().unwrap_or_default();
            (t - c).abs()
        })
        .sum();
    total / dec!(2)
}

fn without_zeros(weights: Weights) -> Weights {
    weights.into_iter().filter(|(_, w)| !w.is_zero()).collect()
}

fn record(adjustments: &mut Vec<ConstraintAdjustment>, stage: &str, detail: String) {
    tracing::debug!(stage, %detail, "Constraint applied");
    adjustments.push(ConstraintAdjustment {
        stage: stage.to_string(),
        detail,
    });
}

fn clip_positions(
    weights: Weights,
    limit: Decimal,
    adjustments: &mut Vec<ConstraintAdjustment>,
) -> Weights {
    weights
        .into_iter()
        .map(|(symbol, w)| {
            if w.abs() > limit {
                let clipped = if w.is_sign_negative() { -limit } else { limit };
                record(
                    adjustments,
                    "max_position_weight",
                    format!("{symbol} clipped from {w} to {clipped}"),
                );
                (symbol, clipped)
            } else {
                (symbol, w)
            }
        })
        .collect()
}

fn keep_largest(
    weights: Weights,
    limit: usize,
    adjustments: &mut Vec<ConstraintAdjustment>,
) -> Weights {
    if weights.len() <= limit {
        return weights;
    }
    let mut ranked: Vec<(String, Decimal)> = weights.into_iter().collect();
    // Largest magnitude first; BTreeMap order already gives symbol-ascending ties.
    ranked.sort_by(|a, b| b.1.abs().cmp(&a.1.abs()));
    let dropped: Vec<String> = ranked[limit..].iter().map(|(s, _)| s.clone()).collect();
    record(
        adjustments,
        "max_positions",
        format!("kept {limit}, dropped {}", dropped.join(", ")),
    );
    ranked.truncate(limit);
    ranked.into_iter().collect()
}

fn cap_gross(
    weights: Weights,
    limit: Decimal,
    adjustments: &mut Vec<ConstraintAdjustment>,
) -> Weights {
    let gross = gross_exposure(&weights);
    if gross <= limit + TOLERANCE {
        return weights;
    }
    let factor = limit / gross;
    record(
        adjustments,
        "max_gross",
        format!("gross {gross} scaled by {factor}"),
    );
    scale(weights, factor)
}

fn cap_net(
    weights: Weights,
    limit: Decimal,
    adjustments: &mut Vec<ConstraintAdjustment>,
) -> Weights {
    let net = net_exposure(&weights).abs();
    if net <= limit + TOLERANCE {
        return weights;
    }
    let factor = limit / net;
    record(adjustments, "max_net", format!("net {net} scaled by {factor}"));
    scale(weights, factor)
}

fn cap_turnover(
    weights: Weights,
    current: &Weights,
    limit: Decimal,
    adjustments: &mut Vec<ConstraintAdjustment>,
) -> Weights {
    let traded = turnover(&weights, current);
    if traded <= limit + TOLERANCE {
        return weights;
    }
    let factor = limit / traded;
    record(
        adjustments,
        "max_turnover",
        format!("turnover {traded} scaled by {factor}"),
    );
    let symbols: BTreeSet<&String> = weights.keys().chain(current.keys()).collect();
    let moved = symbols
        .into_iter()
        .map(|s| {
            let t = weights.get(s).copied().unwrap_or_default();
            let c = current.get(s).copied().unwrap_or_default();
            (s.clone(), c + (t - c) * factor)
        })
        .collect();
    without_zeros(moved)
}

fn scale(weights: Weights, factor: Decimal) -> Weights {
    without_zeros(weights.into_iter().map(|(s, w)| (s, w * factor)).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn weights(pairs: &[(&str, Decimal)]) -> Weights {
        pairs.iter().map(|(s, w)| (s.to_string(), *w)).collect()
    }

    #[test]
    fn stages_are_identity_on_satisfying_input() {
        let pipeline = ConstraintPipeline::new(ConstraintConfig {
            max_position_weight: Some(dec!(0.5)),
            max_positions: Some(3),
            max_gross: Some(dec!(1)),
            max_net: Some(dec!(1)),
            max_turnover: None,
        });
        let target = weights(&[("AAA", dec!(0.4)), ("BBB", dec!(0.4))]);
        let outcome = pipeline.apply(&target, &Weights::new());
        assert_eq!(outcome.weights, target);
        assert!(outcome.adjustments.is_empty());
    }

    #[test]
    fn max_positions_keeps_largest_with_symbol_tie_break() {
        let pipeline = ConstraintPipeline::new(ConstraintConfig {
            max_positions: Some(2),
            ..ConstraintConfig::default()
        });
        let target = weights(&[
            ("AAA", dec!(0.2)),
            ("BBB", dec!(0.3)),
            ("CCC", dec!(0.2)),
            ("DDD", dec!(-0.3)),
        ]);
        let outcome = pipeline.apply(&target, &Weights::new());
        assert_eq!(
            outcome.weights,
            weights(&[("BBB", dec!(0.3)), ("DDD", dec!(-0.3))])
        );
        assert_eq!(outcome.adjustments[0].stage, "max_positions");
    }

    #[test]
    fn clip_then_gross_cap() {
        let pipeline = ConstraintPipeline::new(ConstraintConfig {
            max_position_weight: Some(dec!(0.5)),
            max_gross: Some(dec!(0.5)),
            ..ConstraintConfig::default()
        });
        let target = weights(&[("AAA", dec!(0.8)), ("BBB", dec!(0.5))]);
        let outcome = pipeline.apply(&target, &Weights::new());
        assert_eq!(outcome.weights["AAA"], dec!(0.25));
        assert_eq!(outcome.weights["BBB"], dec!(0.25));
        let stages: Vec<&str> = outcome.adjustments.iter().map(|a| a.stage.as_str()).collect();
        assert_eq!(stages, vec!["max_position_weight", "max_gross"]);
    }

    #[test]
    fn turnover_moves_part_of_the_way_from_current() {
        let pipeline = ConstraintPipeline::new(ConstraintConfig {
            max_turnover: Some(dec!(0.25)),
            ..ConstraintConfig::default()
        });
        let current = weights(&[("AAA", dec!(1))]);
        let target = weights(&[("BBB", dec!(1))]);
        let outcome = pipeline.apply(&target, &current);
        assert_eq!(outcome.weights["AAA"], dec!(0.75));
        assert_eq!(outcome.weights["BBB"], dec!(0.25));
        assert_eq!(turnover(&outcome.weights, &current), dec!(0.25));
    }

    #[test]
    fn turnover_wins_over_a_position_cap_the_book_already_breaches() {
        let pipeline = ConstraintPipeline::new(ConstraintConfig {
            max_position_weight: Some(dec!(0.5)),
            max_turnover: Some(dec!(0.1)),
            ..ConstraintConfig::default()
        });
        let current = weights(&[("AAA", dec!(1))]);
        let outcome = pipeline.apply(&current, &current);

        // Clipped to 0.5, then only a fifth of the way there.
        assert_eq!(outcome.weights, weights(&[("AAA", dec!(0.8))]));
        assert_eq!(turnover(&outcome.weights, &current), dec!(0.1));
        let stages: Vec<&str> = outcome.adjustments.iter().map(|a| a.stage.as_str()).collect();
        assert_eq!(stages, vec!["max_position_weight", "max_turnover"]);

        // The next rebalance keeps converging.
        let next = pipeline.apply(&current, &outcome.weights);
        assert!((next.weights["AAA"] - dec!(0.6)).abs() < dec!(0.000001), "{:?}", next.weights);
    }

    fn arb_weights() -> impl Strategy<Value = Weights> {
        prop::collection::btree_map(
            "[A-H]{3}",
            (-2000i64..2000).prop_map(|v| Decimal::new(v, 3)),
            0..8,
        )
    }

    fn arb_config() -> impl Strategy<Value = ConstraintConfig> {
        (
            prop::option::of(1i64..1000),
            prop::option::of(1usize..6),
            prop::option::of(1i64..3000),
            prop::option::of(1i64..3000),
        )
            .prop_map(|(position, count, gross, net)| ConstraintConfig {
                max_position_weight: position.map(|v| Decimal::new(v, 3)),
                max_positions: count,
                max_gross: gross.map(|v| Decimal::new(v, 3)),
                max_net: net.map(|v| Decimal::new(v, 3)),
                max_turnover: None,
            })
    }

    proptest! {
        #[test]
        fn pipeline_is_idempotent(config in arb_config(), target in arb_weights(), current in arb_weights()) {
            let pipeline = ConstraintPipeline::new(config);
            let once = pipeline.apply(&target, &current);
            let twice = pipeline.apply(&once.weights, &current);
            prop_assert_eq!(&twice.weights, &once.weights);
            prop_assert!(twice.adjustments.is_empty());
        }

        #[test]
        fn turnover_cap_from_flat_is_idempotent(
            config in arb_config(),
            limit in 1i64..2000,
            target in arb_weights(),
        ) {
            let pipeline = ConstraintPipeline::new(ConstraintConfig {
                max_turnover: Some(Decimal::new(limit, 3)),
                ..config
            });
            let flat = Weights::new();
            let once = pipeline.apply(&target, &flat);
            let twice = pipeline.apply(&once.weights, &flat);
            prop_assert_eq!(&twice.weights, &once.weights);
        }
    }
}
