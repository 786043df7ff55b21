//! Blends N independently run legs into one target.
//!
//! Every leg runs its own strategy and sizer against its own sleeve. The
//! blended target goes through the run's constraints once; the constrained
//! result is attributed back to the legs symbol by symbol, and fills are split
//! across sleeves in the same proportions.

pub mod blend;
pub mod sleeve;

use crate::error::StrategyError;
use crate::{Strategy, StrategyContext};
use blend::{LegTarget, blend};
use chrono::NaiveDate;
use core_types::{DecisionTrace, ExecutionReport, LegWeights, Scales, StrategyDecision, Weights};
use risk::{Sizer, apply_scales, resolve_target};
use rust_decimal::Decimal;
use sleeve::Sleeve;
use std::collections::{BTreeMap, BTreeSet};

pub struct CompositeLeg {
    pub name: String,
    pub weight: Decimal,
    pub strategy: Box<dyn Strategy>,
    pub sizer: Box<dyn Sizer>,
}

/// Pre-constraint state of the last blended decision, kept until the engine
/// reports the constrained weights.
#[derive(Debug, Clone)]
struct BlendState {
    leg_pre: Vec<Weights>,
    contributions: Vec<Weights>,
}

pub struct CompositeStrategy {
    legs: Vec<CompositeLeg>,
    sleeves: Vec<Sleeve>,
    leg_gross: Option<Decimal>,
    target_gross: Option<Decimal>,
    blend_state: Option<BlendState>,
    /// Per-leg share of each symbol in the decision awaiting execution.
    pending: Option<Vec<BTreeMap<String, Decimal>>>,
    leg_weights: Option<Vec<LegWeights>>,
    traces: Vec<DecisionTrace>,
}

impl std::fmt::Debug for CompositeStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let legs: Vec<(&str, Decimal)> = self
            .legs
            .iter()
            .map(|l| (l.name.as_str(), l.weight))
            .collect();
        f.debug_struct("CompositeStrategy")
            .field("legs", &legs)
            .field("sleeves", &self.sleeves)
            .finish()
    }
}

impl CompositeStrategy {
    pub fn new(
        legs: Vec<CompositeLeg>,
        leg_gross: Option<Decimal>,
        target_gross: Option<Decimal>,
    ) -> Result<Self, StrategyError> {
        if legs.is_empty() {
            return Err(StrategyError::InvalidParameters(
                "a composite needs at least one leg".to_string(),
            ));
        }
        if let Some(leg) = legs.iter().find(|l| l.weight <= Decimal::ZERO) {
            return Err(StrategyError::InvalidParameters(format!(
                "leg {} needs a positive weight",
                leg.name
            )));
        }
        let sleeves = vec![Sleeve::default(); legs.len()];
        Ok(Self {
            legs,
            sleeves,
            leg_gross,
            target_gross,
            blend_state: None,
            pending: None,
            leg_weights: None,
            traces: Vec::new(),
        })
    }

    pub fn sleeve(&self, index: usize) -> Option<&Sleeve> {
        self.sleeves.get(index)
    }

    /// Partial exits from every acting leg, merged by each leg's share of the symbol.
    fn combine_scales(&mut self, decisions: &[StrategyDecision]) -> StrategyDecision {
        let symbols: BTreeSet<String> = decisions
            .iter()
            .filter_map(|d| match d {
                StrategyDecision::Scale { scales } => Some(scales.keys().cloned()),
                _ => None,
            })
            .flatten()
            .collect();

        let mut combined = Scales::new();
        let mut pending = vec![BTreeMap::new(); self.legs.len()];
        for symbol in symbols {
            let quantities: Vec<Decimal> = self.sleeves.iter().map(|s| s.quantity(&symbol)).collect();
            let total: Decimal = quantities.iter().copied().sum();
            if total.is_zero() {
                continue;
            }
            let mut factor = Decimal::ZERO;
            for (j, decision) in decisions.iter().enumerate() {
                let leg_factor = match decision {
                    StrategyDecision::Scale { scales } => {
                        scales.get(&symbol).copied().unwrap_or(Decimal::ONE)
                    }
                    _ => Decimal::ONE,
                };
                factor += quantities[j] / total * leg_factor;
                pending[j].insert(symbol.clone(), quantities[j] * leg_factor);
            }
            combined.insert(symbol, factor);
        }

        self.blend_state = None;
        self.leg_weights = None;
        self.pending = Some(pending);
        StrategyDecision::Scale { scales: combined }
    }

    fn blend_targets(
        &mut self,
        ctx: &StrategyContext<'_>,
        decisions: Vec<StrategyDecision>,
    ) -> Result<StrategyDecision, StrategyError> {
        let equity = ctx.portfolio.equity;
        let mut targets = Vec::with_capacity(self.legs.len());
        for ((leg, sleeve), decision) in self.legs.iter().zip(&self.sleeves).zip(decisions) {
            let capital = leg.weight * equity;
            let pre = match decision {
                StrategyDecision::Target { target, scales } => {
                    let sized = resolve_target(&target, leg.sizer.as_ref(), ctx.market)?;
                    apply_scales(sized, &scales)
                }
                StrategyDecision::Scale { scales } => {
                    apply_scales(sleeve.weights(capital, ctx.market), &scales)
                }
                StrategyDecision::None => sleeve.weights(capital, ctx.market),
            };
            targets.push(LegTarget {
                name: leg.name.clone(),
                weight: leg.weight,
                pre,
            });
        }

        let result = blend(&targets, self.leg_gross, self.target_gross)?;
        self.blend_state = Some(BlendState {
            leg_pre: result.leg_pre,
            contributions: result.contributions,
        });
        Ok(StrategyDecision::weights(result.blended))
    }

    fn attribute(&mut self, symbol: &str, actual: Decimal, shares: &[Decimal], price: Option<Decimal>, date: NaiveDate) {
        let total: Decimal = shares.iter().copied().sum();
        let existing: Vec<Decimal> = self.sleeves.iter().map(|s| s.quantity(symbol)).collect();
        let held: Decimal = existing.iter().copied().sum();

        let targets: Vec<Decimal> = if !total.is_zero() {
            shares.iter().map(|c| actual * *c / total).collect()
        } else if actual.is_zero() {
            vec![Decimal::ZERO; shares.len()]
        } else if !held.is_zero() {
            existing.iter().map(|q| actual * *q / held).collect()
        } else {
            tracing::warn!(symbol, %actual, "No leg claims an executed position; leaving sleeves unchanged");
            return;
        };

        for (sleeve, quantity) in self.sleeves.iter_mut().zip(targets) {
            sleeve.set_quantity(symbol, quantity, price, date);
        }
    }
}

impl Strategy for CompositeStrategy {
    fn name(&self) -> &str {
        "composite"
    }

    fn evaluates_daily(&self) -> bool {
        self.legs.iter().any(|l| l.strategy.evaluates_daily())
    }

    fn decide(&mut self, ctx: &StrategyContext<'_>) -> Result<StrategyDecision, StrategyError> {
        let equity = ctx.portfolio.equity;
        let mut decisions = Vec::with_capacity(self.legs.len());

        for (leg, sleeve) in self.legs.iter_mut().zip(&self.sleeves) {
            if !ctx.is_rebalance_day && !leg.strategy.evaluates_daily() {
                decisions.push(StrategyDecision::None);
                continue;
            }
            let book = sleeve.snapshot(ctx.date, leg.weight * equity, ctx.market);
            let leg_ctx = StrategyContext {
                portfolio: &book,
                ..*ctx
            };
            decisions.push(leg.strategy.decide(&leg_ctx)?);
            for mut trace in leg.strategy.drain_traces() {
                trace.leg = Some(leg.name.clone());
                self.traces.push(trace);
            }
        }

        if decisions.iter().all(StrategyDecision::is_none) {
            return Ok(StrategyDecision::None);
        }
        let only_scales = decisions
            .iter()
            .all(|d| matches!(d, StrategyDecision::None | StrategyDecision::Scale { .. }));
        if only_scales {
            return Ok(self.combine_scales(&decisions));
        }
        self.blend_targets(ctx, decisions)
    }

    fn after_constraints(&mut self, pre: &Weights, post: &Weights) -> Result<(), StrategyError> {
        let Some(state) = self.blend_state.take() else {
            return Ok(());
        };

        let ratio = |symbol: &str| -> Decimal {
            match (pre.get(symbol), post.get(symbol)) {
                (Some(p), Some(q)) if !p.is_zero() => *q / *p,
                _ => Decimal::ZERO,
            }
        };

        let mut leg_weights = Vec::with_capacity(self.legs.len());
        let mut pending = Vec::with_capacity(self.legs.len());
        for ((leg, leg_pre), contribution) in self.legs.iter().zip(state.leg_pre).zip(state.contributions) {
            let leg_post: Weights = leg_pre
                .iter()
                .map(|(s, w)| (s.clone(), *w * ratio(s)))
                .filter(|(_, w)| !w.is_zero())
                .collect();
            pending.push(
                contribution
                    .into_iter()
                    .map(|(s, w)| {
                        let r = ratio(&s);
                        (s, w * r)
                    })
                    .collect::<BTreeMap<_, _>>(),
            );
            leg_weights.push(LegWeights {
                leg: leg.name.clone(),
                pre: leg_pre,
                post: leg_post,
            });
        }
        self.leg_weights = Some(leg_weights);
        self.pending = Some(pending);
        Ok(())
    }

    fn on_execution(&mut self, report: &ExecutionReport) {
        let Some(date) = report.date else {
            return;
        };
        let pending = self
            .pending
            .take()
            .unwrap_or_else(|| vec![BTreeMap::new(); self.legs.len()]);

        let mut symbols: BTreeSet<String> = report.quantities.keys().cloned().collect();
        for sleeve in &self.sleeves {
            symbols.extend(sleeve.symbols().cloned());
        }
        for shares in &pending {
            symbols.extend(shares.keys().cloned());
        }

        for symbol in symbols {
            let actual = report.quantities.get(&symbol).copied().unwrap_or(Decimal::ZERO);
            let price = report
                .fill_price(&symbol)
                .or_else(|| report.reference_prices.get(&symbol).copied());
            let shares: Vec<Decimal> = pending
                .iter()
                .map(|p| p.get(&symbol).copied().unwrap_or(Decimal::ZERO))
                .collect();
            self.attribute(&symbol, actual, &shares, price, date);
        }
    }

    fn drain_traces(&mut self) -> Vec<DecisionTrace> {
        std::mem::take(&mut self.traces)
    }

    fn leg_weights(&self) -> Option<Vec<LegWeights>> {
        self.leg_weights.clone()
    }
}
