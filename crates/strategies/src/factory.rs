use crate::Strategy;
use crate::composite::{CompositeLeg, CompositeStrategy};
use crate::configured::ConfiguredStrategy;
use crate::error::StrategyError;
use crate::long_short::LongShortTopN;
use crate::signal_top_n::SignalTopN;
use crate::static_universe::StaticUniverse;
use configuration::StrategyConfig;
use risk::create_sizer;

/// Creates a new strategy instance from its configuration.
///
/// Composite legs are built recursively, each with its own sizer. A composite
/// nested inside a composite is rejected here as well as at validation.
pub fn create_strategy(config: &StrategyConfig) -> Result<Box<dyn Strategy>, StrategyError> {
    build(config, false)
}

fn build(config: &StrategyConfig, inside_composite: bool) -> Result<Box<dyn Strategy>, StrategyError> {
    match config {
        StrategyConfig::StaticUniverse(params) => Ok(Box::new(StaticUniverse::new(params.clone())?)),
        StrategyConfig::SignalTopN(params) => Ok(Box::new(SignalTopN::new(params.clone())?)),
        StrategyConfig::LongShortTopN(params) => Ok(Box::new(LongShortTopN::new(params.clone())?)),
        StrategyConfig::Configured(params) => Ok(Box::new(ConfiguredStrategy::new(params.clone())?)),
        StrategyConfig::Composite(params) => {
            if inside_composite {
                return Err(StrategyError::InvalidParameters(
                    "composite legs cannot themselves be composite".to_string(),
                ));
            }
            let legs = params
                .legs
                .iter()
                .map(|leg| {
                    Ok(CompositeLeg {
                        name: leg.name.clone(),
                        weight: leg.weight,
                        strategy: build(&leg.strategy, true)?,
                        sizer: create_sizer(&leg.sizer)?,
                    })
                })
                .collect::<Result<Vec<_>, StrategyError>>()?;
            Ok(Box::new(CompositeStrategy::new(
                legs,
                params.leg_gross,
                params.target_gross,
            )?))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use configuration::{CompositeParams, LegConfig, SizerConfig, StaticUniverseParams};
    use rust_decimal_macros::dec;

    fn static_config() -> StrategyConfig {
        StrategyConfig::StaticUniverse(StaticUniverseParams {
            symbols: vec!["AAA".into()],
            weights: None,
        })
    }

    #[test]
    fn builds_every_kind_by_name() {
        assert_eq!(create_strategy(&static_config()).unwrap().name(), "static_universe");

        let composite = StrategyConfig::Composite(CompositeParams {
            legs: vec![LegConfig {
                name: "only".into(),
                weight: dec!(1),
                strategy: static_config(),
                sizer: SizerConfig::EqualWeight,
            }],
            leg_gross: None,
            target_gross: None,
        });
        assert_eq!(create_strategy(&composite).unwrap().name(), "composite");
    }

    #[test]
    fn nested_composites_are_rejected() {
        let inner = StrategyConfig::Composite(CompositeParams {
            legs: vec![LegConfig {
                name: "inner".into(),
                weight: dec!(1),
                strategy: static_config(),
                sizer: SizerConfig::EqualWeight,
            }],
            leg_gross: None,
            target_gross: None,
        });
        let outer = StrategyConfig::Composite(CompositeParams {
            legs: vec![LegConfig {
                name: "outer".into(),
                weight: dec!(1),
                strategy: inner,
                sizer: SizerConfig::EqualWeight,
            }],
            leg_gross: None,
            target_gross: None,
        });
        assert!(matches!(
            create_strategy(&outer),
            Err(StrategyError::InvalidParameters(_))
        ));
    }
}
