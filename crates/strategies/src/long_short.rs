use crate::error::StrategyError;
use crate::ranking::{rank_ascending, rank_descending};
use crate::{Strategy, StrategyContext};
use configuration::LongShortParams;
use core_types::{ScoredSelection, StrategyDecision};
use market_data::DataError;
use rust_decimal::Decimal;
use std::collections::BTreeMap;

/// Long the highest `long_n` values of a column, short the lowest `short_n`.
#[derive(Debug, Clone)]
pub struct LongShortTopN {
    params: LongShortParams,
}

impl LongShortTopN {
    pub fn new(params: LongShortParams) -> Result<Self, StrategyError> {
        if params.long_n == 0 && params.short_n == 0 {
            return Err(StrategyError::InvalidParameters(
                "long_n and short_n cannot both be zero".to_string(),
            ));
        }
        Ok(Self { params })
    }
}

impl Strategy for LongShortTopN {
    fn name(&self) -> &str {
        "long_short_top_n"
    }

    fn decide(&mut self, ctx: &StrategyContext<'_>) -> Result<StrategyDecision, StrategyError> {
        if !ctx.is_rebalance_day {
            return Ok(StrategyDecision::None);
        }
        let column = &self.params.column;
        if !ctx.market.has_signal_column(column) {
            return Err(DataError::MissingColumn(column.clone()).into());
        }
        let Some(row) = ctx.market.signal_row(column) else {
            tracing::warn!(date = %ctx.date, column = %column, "No signal row published; skipping rebalance");
            return Ok(StrategyDecision::None);
        };

        let eligible: BTreeMap<String, Decimal> = row
            .iter()
            .filter(|(symbol, _)| ctx.market.close(symbol).is_some())
            .map(|(s, v)| (s.clone(), *v))
            .collect();

        let long: BTreeMap<String, Decimal> = rank_descending(&eligible)
            .into_iter()
            .take(self.params.long_n)
            .collect();
        // A name can only sit on one side.
        let short: BTreeMap<String, Decimal> = rank_ascending(&eligible)
            .into_iter()
            .filter(|(s, _)| !long.contains_key(s))
            .take(self.params.short_n)
            .collect();

        Ok(StrategyDecision::scores(ScoredSelection {
            long,
            short,
            long_exposure: self.params.long_exposure,
            short_exposure: self.params.short_exposure,
        }))
    }
}
