use crate::StrategyContext;
use chrono::NaiveDate;
use configuration::ExitRule;
use core_types::{ExitEvent, Side};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, PartialEq)]
pub enum ExitAction {
    Exit { reason: &'static str },
    Scale { factor: Decimal },
}

/// Checks every holding against the exit rules at each close.
///
/// An exit always beats a scale for the same symbol. Among exits the first
/// matching rule, in configuration order, names the reason. A scale-out fires
/// at most once per holding (a holding is identified by symbol and open date).
#[derive(Debug, Clone)]
pub struct ExitEvaluator {
    rules: Vec<ExitRule>,
    scaled: BTreeSet<(String, NaiveDate)>,
}

impl ExitEvaluator {
    pub fn new(rules: Vec<ExitRule>) -> Self {
        Self {
            rules,
            scaled: BTreeSet::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn evaluate(
        &mut self,
        ctx: &StrategyContext<'_>,
        scores: &BTreeMap<String, Decimal>,
    ) -> BTreeMap<String, ExitAction> {
        let holdings = &ctx.portfolio.holdings;
        self.scaled
            .retain(|(symbol, opened)| holdings.get(symbol).is_some_and(|h| h.position.opened_on == *opened));

        let mut actions = BTreeMap::new();
        for (symbol, holding) in holdings {
            let position = &holding.position;
            if position.is_flat() {
                continue;
            }
            let price = ctx
                .market
                .close(symbol)
                .or_else(|| ctx.market.last_close(symbol))
                .unwrap_or(holding.price);
            let gain = position.unrealized_return(price);
            let mut scale = None;

            let exit = self.rules.iter().find_map(|rule| match rule {
                ExitRule::StopLoss { pct } => (gain <= -*pct).then_some(rule.label()),
                ExitRule::MaxHoldingDays { days } => {
                    ((ctx.date - position.opened_on).num_days() >= *days).then_some(rule.label())
                }
                ExitRule::ScoreBelow { threshold } => {
                    let score = scores.get(symbol)?;
                    let breached = match position.side() {
                        Side::Long => *score < *threshold,
                        Side::Short => *score > *threshold,
                    };
                    breached.then_some(rule.label())
                }
                ExitRule::ScaleOut { gain_pct, factor } => {
                    if scale.is_none() && gain >= *gain_pct {
                        scale = Some(*factor);
                    }
                    None
                }
            });

            match (exit, scale) {
                (Some(reason), _) => {
                    actions.insert(symbol.clone(), ExitAction::Exit { reason });
                }
                (None, Some(factor)) => {
                    let key = (symbol.clone(), position.opened_on);
                    if self.scaled.insert(key) {
                        actions.insert(symbol.clone(), ExitAction::Scale { factor });
                    }
                }
                (None, None) => {}
            }
        }
        actions
    }
}

/// The trace entries for a set of actions.
pub fn exit_events(actions: &BTreeMap<String, ExitAction>) -> Vec<ExitEvent> {
    actions
        .iter()
        .map(|(symbol, action)| ExitEvent {
            symbol: symbol.clone(),
            reason: match action {
                ExitAction::Exit { reason } => (*reason).to_string(),
                ExitAction::Scale { factor } => format!("scale_out x{factor}"),
            },
        })
        .collect()
}
