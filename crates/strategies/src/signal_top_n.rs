use crate::error::StrategyError;
use crate::ranking::rank_descending;
use crate::{Strategy, StrategyContext};
use configuration::SignalTopNParams;
use core_types::{ScoredSelection, StrategyDecision};
use market_data::DataError;
use rust_decimal::Decimal;
use std::collections::BTreeMap;

/// Goes long the `top_n` symbols with the highest value in a signal column.
#[derive(Debug, Clone)]
pub struct SignalTopN {
    params: SignalTopNParams,
}

impl SignalTopN {
    pub fn new(params: SignalTopNParams) -> Result<Self, StrategyError> {
        if params.top_n == 0 {
            return Err(StrategyError::InvalidParameters(
                "top_n must be at least 1".to_string(),
            ));
        }
        Ok(Self { params })
    }
}

impl Strategy for SignalTopN {
    fn name(&self) -> &str {
        "signal_top_n"
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
            .filter(|(_, value)| self.params.threshold.is_none_or(|t| **value >= t))
            .map(|(s, v)| (s.clone(), *v))
            .collect();

        let top: BTreeMap<String, Decimal> = rank_descending(&eligible)
            .into_iter()
            .take(self.params.top_n)
            .collect();
        Ok(StrategyDecision::scores(ScoredSelection::long_only(
            top,
            Decimal::ONE,
        )))
    }
}
