//! A strategy assembled from stages declared in the run document.
//!
//! On rebalance days the stages run in a fixed order: universe, scoring,
//! selection, holding, then any postprocess steps. Exit rules run on every
//! trading day, independently of the rebalance cadence.

pub mod exits;
pub mod stages;

use crate::error::StrategyError;
use crate::{Strategy, StrategyContext};
use configuration::ConfiguredParams;
use core_types::{DecisionTrace, Scales, StrategyDecision, Target};
use exits::{ExitAction, ExitEvaluator, exit_events};
use rust_decimal::Decimal;
use stages::{
    HoldingStage, PipelineState, PostprocessStage, ScoringStage, SelectionStage, Stage,
    StageOutcome, UniverseStage,
};
use std::collections::BTreeMap;

pub struct ConfiguredStrategy {
    stages: Vec<Box<dyn Stage>>,
    scorer: ScoringStage,
    refresh_scores: bool,
    exits: ExitEvaluator,
    /// Latest known score of each held name, used by score-based exits.
    known_scores: BTreeMap<String, Decimal>,
    traces: Vec<DecisionTrace>,
}

impl std::fmt::Debug for ConfiguredStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let stages: Vec<&str> = self.stages.iter().map(|s| s.name()).collect();
        f.debug_struct("ConfiguredStrategy")
            .field("stages", &stages)
            .field("exits", &self.exits)
            .finish()
    }
}

impl ConfiguredStrategy {
    pub fn new(params: ConfiguredParams) -> Result<Self, StrategyError> {
        if params.selection.top_n == 0 {
            return Err(StrategyError::InvalidParameters(
                "selection.top_n must be at least 1".to_string(),
            ));
        }
        let scorer = ScoringStage::new(params.scoring.clone());
        let holding = HoldingStage::new(params.holding.clone(), params.selection.clone());
        let refresh_scores = holding.refreshes_scores();

        let mut stages: Vec<Box<dyn Stage>> = vec![
            Box::new(UniverseStage::new(params.universe)),
            Box::new(scorer.clone()),
            Box::new(SelectionStage::new(params.selection)),
            Box::new(holding),
        ];
        stages.extend(
            params
                .postprocess
                .into_iter()
                .map(|step| Box::new(PostprocessStage::new(step)) as Box<dyn Stage>),
        );

        Ok(Self {
            stages,
            scorer,
            refresh_scores,
            exits: ExitEvaluator::new(params.exits),
            known_scores: BTreeMap::new(),
            traces: Vec::new(),
        })
    }

    fn run_stages(&self, ctx: &StrategyContext<'_>) -> Result<Option<PipelineState>, StrategyError> {
        let mut state = PipelineState::default();
        for stage in &self.stages {
            match stage.apply(&mut state, ctx)? {
                StageOutcome::NoDecision => return Ok(None),
                outcome => tracing::trace!(stage = stage.name(), ?outcome, "Stage applied"),
            }
        }
        Ok(Some(state))
    }

    /// Exits found on a day the pipeline does not otherwise run.
    fn exit_only_decision(
        &mut self,
        ctx: &StrategyContext<'_>,
        actions: BTreeMap<String, ExitAction>,
    ) -> StrategyDecision {
        let exits_everything = ctx
            .portfolio
            .holdings
            .keys()
            .all(|s| matches!(actions.get(s), Some(ExitAction::Exit { .. })));

        let scales: Scales = actions
            .iter()
            .map(|(symbol, action)| {
                let factor = match action {
                    ExitAction::Exit { .. } => Decimal::ZERO,
                    ExitAction::Scale { factor } => *factor,
                };
                (symbol.clone(), factor)
            })
            .collect();

        let held = ctx
            .portfolio
            .holdings
            .keys()
            .filter(|s| !matches!(actions.get(*s), Some(ExitAction::Exit { .. })))
            .cloned()
            .collect();
        self.traces.push(DecisionTrace {
            date: Some(ctx.date),
            held,
            scales: scales.clone(),
            exits: exit_events(&actions),
            ..DecisionTrace::default()
        });

        if exits_everything {
            StrategyDecision::liquidate()
        } else {
            StrategyDecision::Scale { scales }
        }
    }
}

impl Strategy for ConfiguredStrategy {
    fn name(&self) -> &str {
        "configured"
    }

    fn evaluates_daily(&self) -> bool {
        !self.exits.is_empty()
    }

    fn decide(&mut self, ctx: &StrategyContext<'_>) -> Result<StrategyDecision, StrategyError> {
        if self.refresh_scores && !ctx.portfolio.holdings.is_empty() {
            let refreshed = self.scorer.score(ctx.portfolio.holdings.keys(), ctx);
            self.known_scores.extend(refreshed);
        }
        let actions = self.exits.evaluate(ctx, &self.known_scores);

        if !ctx.is_rebalance_day {
            if actions.is_empty() {
                return Ok(StrategyDecision::None);
            }
            return Ok(self.exit_only_decision(ctx, actions));
        }

        let Some(mut state) = self.run_stages(ctx)? else {
            if actions.is_empty() {
                return Ok(StrategyDecision::None);
            }
            return Ok(self.exit_only_decision(ctx, actions));
        };

        // Exits take precedence over whatever the pipeline selected.
        let mut scales = Scales::new();
        for (symbol, action) in &actions {
            match action {
                ExitAction::Exit { .. } => {
                    state.held.retain(|s| s != symbol);
                    state.selection.long.remove(symbol);
                    state.selection.short.remove(symbol);
                }
                ExitAction::Scale { factor } => {
                    if state.held.contains(symbol) {
                        scales.insert(symbol.clone(), *factor);
                    }
                }
            }
        }

        self.known_scores = state
            .held
            .iter()
            .filter_map(|s| state.scores.get(s).map(|v| (s.clone(), *v)))
            .collect();

        self.traces.push(DecisionTrace {
            date: Some(ctx.date),
            leg: None,
            universe: state.universe,
            raw_scores: state.raw_scores,
            selected: state.selected,
            held: state.held,
            scales: scales.clone(),
            exits: exit_events(&actions),
        });

        Ok(StrategyDecision::Target {
            target: Target::Scores(state.selection),
            scales,
        })
    }

    fn drain_traces(&mut self) -> Vec<DecisionTrace> {
        std::mem::take(&mut self.traces)
    }
}
