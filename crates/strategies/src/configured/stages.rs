use crate::StrategyContext;
use crate::error::StrategyError;
use crate::ranking::{rank_ascending, rank_descending};
use configuration::{
    HoldingConfig, MissingPolicy, PostprocessConfig, ScoreSource, ScoreTransform, ScoringConfig,
    SelectionConfig, UniverseConfig,
};
use core_types::{ScoredSelection, Side};
use market_data::DataError;
use risk::sizer::sample_std_dev;
use rust_decimal::Decimal;
use std::collections::{BTreeMap, BTreeSet};

/// Working state handed from one stage to the next on a rebalance day.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PipelineState {
    pub universe: Vec<String>,
    /// Scores as read from the source, before any transform.
    pub raw_scores: BTreeMap<String, Decimal>,
    pub scores: BTreeMap<String, Decimal>,
    /// Every candidate that passed the threshold, best first.
    pub ranked: Vec<(String, Decimal)>,
    pub selected: Vec<String>,
    pub held: Vec<String>,
    pub selection: ScoredSelection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageOutcome {
    Applied,
    /// The stage had nothing to do; the state is untouched.
    NoChange,
    /// There is no basis for a decision today; the rebalance is skipped.
    NoDecision,
}

/// One step of a configured pipeline.
pub trait Stage: Send {
    fn name(&self) -> &'static str;

    fn apply(
        &self,
        state: &mut PipelineState,
        ctx: &StrategyContext<'_>,
    ) -> Result<StageOutcome, StrategyError>;
}

/// Picks the eligible symbols for the date. A symbol without a close at T is never eligible.
#[derive(Debug, Clone)]
pub struct UniverseStage {
    config: UniverseConfig,
}

impl UniverseStage {
    pub fn new(config: UniverseConfig) -> Self {
        Self { config }
    }
}

impl Stage for UniverseStage {
    fn name(&self) -> &'static str {
        "universe"
    }

    fn apply(
        &self,
        state: &mut PipelineState,
        ctx: &StrategyContext<'_>,
    ) -> Result<StageOutcome, StrategyError> {
        match &self.config {
            UniverseConfig::Static { symbols } => {
                state.universe = symbols
                    .iter()
                    .filter(|s| ctx.market.close(s).is_some())
                    .cloned()
                    .collect();
            }
            UniverseConfig::Signal {
                column,
                required_columns,
            } => {
                for required in std::iter::once(column).chain(required_columns) {
                    if !ctx.market.has_signal_column(required) {
                        return Err(DataError::MissingColumn(required.clone()).into());
                    }
                }
                let Some(row) = ctx.market.signal_row(column) else {
                    tracing::warn!(date = %ctx.date, column = %column, "No signal row published; skipping rebalance");
                    return Ok(StageOutcome::NoDecision);
                };
                state.universe = row
                    .keys()
                    .filter(|s| ctx.market.close(s).is_some())
                    .filter(|s| {
                        required_columns
                            .iter()
                            .all(|c| ctx.market.signal(c, s).is_some())
                    })
                    .cloned()
                    .collect();
            }
        }
        Ok(StageOutcome::Applied)
    }
}

/// Maps each eligible symbol to a score.
#[derive(Debug, Clone)]
pub struct ScoringStage {
    config: ScoringConfig,
}

impl ScoringStage {
    pub fn new(config: ScoringConfig) -> Self {
        Self { config }
    }

    fn source_value(&self, symbol: &str, ctx: &StrategyContext<'_>) -> Option<Decimal> {
        match &self.config.source {
            ScoreSource::Column { name } => ctx.market.signal(name, symbol),
            ScoreSource::Momentum { lookback } => {
                let closes = ctx.market.closes(symbol, *lookback)?;
                let first = *closes.first()?;
                let last = *closes.last()?;
                (!first.is_zero()).then(|| last / first - Decimal::ONE)
            }
            ScoreSource::Constant { value } => Some(*value),
        }
    }

    /// Raw source values for `symbols`, with the missing-value policy applied.
    pub fn raw_scores<'s>(
        &self,
        symbols: impl IntoIterator<Item = &'s String>,
        ctx: &StrategyContext<'_>,
    ) -> BTreeMap<String, Decimal> {
        symbols
            .into_iter()
            .filter_map(|symbol| {
                let value = match (self.source_value(symbol, ctx), &self.config.missing) {
                    (Some(v), _) => v,
                    (None, MissingPolicy::Fill { value }) => *value,
                    (None, MissingPolicy::Drop) => return None,
                };
                Some((symbol.clone(), value))
            })
            .collect()
    }

    pub fn transform(&self, raw: &BTreeMap<String, Decimal>) -> BTreeMap<String, Decimal> {
        match self.config.transform {
            ScoreTransform::Identity => raw.clone(),
            ScoreTransform::Negate => raw.iter().map(|(s, v)| (s.clone(), -*v)).collect(),
            ScoreTransform::Rank => rank_ascending(raw)
                .into_iter()
                .enumerate()
                .map(|(i, (s, _))| (s, Decimal::from(i + 1)))
                .collect(),
            ScoreTransform::Zscore => {
                let values: Vec<Decimal> = raw.values().copied().collect();
                match sample_std_dev(&values) {
                    Some(std) if !std.is_zero() => {
                        let mean =
                            values.iter().copied().sum::<Decimal>() / Decimal::from(values.len());
                        raw.iter()
                            .map(|(s, v)| (s.clone(), (*v - mean) / std))
                            .collect()
                    }
                    _ => raw.keys().map(|s| (s.clone(), Decimal::ZERO)).collect(),
                }
            }
        }
    }

    /// Final scores for `symbols`, as the pipeline would compute them today.
    pub fn score<'s>(
        &self,
        symbols: impl IntoIterator<Item = &'s String>,
        ctx: &StrategyContext<'_>,
    ) -> BTreeMap<String, Decimal> {
        self.transform(&self.raw_scores(symbols, ctx))
    }
}

impl Stage for ScoringStage {
    fn name(&self) -> &'static str {
        "scoring"
    }

    fn apply(
        &self,
        state: &mut PipelineState,
        ctx: &StrategyContext<'_>,
    ) -> Result<StageOutcome, StrategyError> {
        state.raw_scores = self.raw_scores(&state.universe, ctx);
        state.scores = self.transform(&state.raw_scores);
        Ok(StageOutcome::Applied)
    }
}

/// Top-N by score on the configured side, after the optional threshold.
#[derive(Debug, Clone)]
pub struct SelectionStage {
    config: SelectionConfig,
}

impl SelectionStage {
    pub fn new(config: SelectionConfig) -> Self {
        Self { config }
    }
}

impl Stage for SelectionStage {
    fn name(&self) -> &'static str {
        "selection"
    }

    fn apply(
        &self,
        state: &mut PipelineState,
        _ctx: &StrategyContext<'_>,
    ) -> Result<StageOutcome, StrategyError> {
        let threshold = self.config.threshold;
        state.ranked = match self.config.side {
            Side::Long => rank_descending(&state.scores)
                .into_iter()
                .filter(|(_, v)| threshold.is_none_or(|t| *v >= t))
                .collect(),
            Side::Short => rank_ascending(&state.scores)
                .into_iter()
                .filter(|(_, v)| threshold.is_none_or(|t| *v <= t))
                .collect(),
        };
        state.selected = state
            .ranked
            .iter()
            .take(self.config.top_n)
            .map(|(s, _)| s.clone())
            .collect();
        Ok(StageOutcome::Applied)
    }
}

/// Decides which names make up the book and turns them into a scored selection.
#[derive(Debug, Clone)]
pub struct HoldingStage {
    policy: HoldingConfig,
    selection: SelectionConfig,
}

impl HoldingStage {
    pub fn new(policy: HoldingConfig, selection: SelectionConfig) -> Self {
        Self { policy, selection }
    }

    pub fn refreshes_scores(&self) -> bool {
        matches!(
            self.policy,
            HoldingConfig::ReplaceAll {
                refresh_scores: true
            }
        )
    }
}

impl Stage for HoldingStage {
    fn name(&self) -> &'static str {
        "holding"
    }

    fn apply(
        &self,
        state: &mut PipelineState,
        ctx: &StrategyContext<'_>,
    ) -> Result<StageOutcome, StrategyError> {
        state.held = match &self.policy {
            HoldingConfig::ReplaceAll { .. } => state.selected.clone(),
            HoldingConfig::Buffer { exit_rank } => {
                let buffer: Vec<&String> =
                    state.ranked.iter().take(*exit_rank).map(|(s, _)| s).collect();
                let mut held: Vec<String> = buffer
                    .into_iter()
                    .filter(|s| ctx.portfolio.holds(s))
                    .cloned()
                    .collect();
                for symbol in &state.selected {
                    if held.len() >= self.selection.top_n {
                        break;
                    }
                    if !held.contains(symbol) {
                        held.push(symbol.clone());
                    }
                }
                held
            }
        };

        let scores: BTreeMap<String, Decimal> = state
            .held
            .iter()
            .filter_map(|s| state.scores.get(s).map(|v| (s.clone(), *v)))
            .collect();
        state.selection = match self.selection.side {
            Side::Long => ScoredSelection::long_only(scores, self.selection.exposure),
            Side::Short => ScoredSelection {
                long: BTreeMap::new(),
                short: scores,
                long_exposure: Decimal::ZERO,
                short_exposure: self.selection.exposure,
            },
        };
        Ok(StageOutcome::Applied)
    }
}

/// Final adjustments to the selection.
#[derive(Debug, Clone)]
pub struct PostprocessStage {
    config: PostprocessConfig,
}

impl PostprocessStage {
    pub fn new(config: PostprocessConfig) -> Self {
        Self { config }
    }
}

impl Stage for PostprocessStage {
    fn name(&self) -> &'static str {
        match self.config {
            PostprocessConfig::Exclude { .. } => "postprocess.exclude",
            PostprocessConfig::Exposure { .. } => "postprocess.exposure",
        }
    }

    fn apply(
        &self,
        state: &mut PipelineState,
        _ctx: &StrategyContext<'_>,
    ) -> Result<StageOutcome, StrategyError> {
        match &self.config {
            PostprocessConfig::Exclude { symbols } => {
                let excluded: BTreeSet<&String> = symbols.iter().collect();
                let before = state.held.len();
                state.held.retain(|s| !excluded.contains(s));
                if state.held.len() == before {
                    return Ok(StageOutcome::NoChange);
                }
                state.selection.long.retain(|s, _| !excluded.contains(s));
                state.selection.short.retain(|s, _| !excluded.contains(s));
            }
            PostprocessConfig::Exposure { factor } => {
                if *factor == Decimal::ONE {
                    return Ok(StageOutcome::NoChange);
                }
                state.selection.long_exposure *= *factor;
                state.selection.short_exposure *= *factor;
            }
        }
        Ok(StageOutcome::Applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{day, prices, signals, snapshot};
    use market_data::MarketView;
    use rust_decimal_macros::dec;

    fn scoring(transform: ScoreTransform) -> ScoringStage {
        ScoringStage::new(ScoringConfig {
            source: ScoreSource::Constant { value: dec!(0) },
            transform,
            missing: MissingPolicy::Drop,
        })
    }

    fn raw(values: &[(&str, Decimal)]) -> BTreeMap<String, Decimal> {
        values.iter().map(|(s, v)| (s.to_string(), *v)).collect()
    }

    #[test]
    fn rank_transform_is_one_based_and_ascending() {
        let ranked = scoring(ScoreTransform::Rank).transform(&raw(&[
            ("AAA", dec!(5)),
            ("BBB", dec!(-1)),
            ("CCC", dec!(5)),
        ]));
        assert_eq!(ranked["BBB"], dec!(1));
        assert_eq!(ranked["AAA"], dec!(2));
        assert_eq!(ranked["CCC"], dec!(3));
    }

    #[test]
    fn zscore_of_constant_scores_is_zero() {
        let z = scoring(ScoreTransform::Zscore).transform(&raw(&[("AAA", dec!(2)), ("BBB", dec!(2))]));
        assert!(z.values().all(|v| v.is_zero()));
    }

    #[test]
    fn missing_scores_are_dropped_or_filled() {
        let frame = prices(&[("AAA", &[dec!(1)]), ("BBB", &[dec!(1)])]);
        let table = signals("value", day(2), &[("AAA", dec!(0.4))]);
        let view = MarketView::new(&frame, &table, 0).unwrap();
        let book = snapshot(day(2), &[], dec!(0));
        let ctx = StrategyContext {
            date: day(2),
            is_rebalance_day: true,
            market: &view,
            portfolio: &book,
        };
        let universe = vec!["AAA".to_string(), "BBB".to_string()];

        let mut config = ScoringConfig {
            source: ScoreSource::Column { name: "value".into() },
            transform: ScoreTransform::Identity,
            missing: MissingPolicy::Drop,
        };
        assert_eq!(ScoringStage::new(config.clone()).score(&universe, &ctx).len(), 1);

        config.missing = MissingPolicy::Fill { value: dec!(-1) };
        let filled = ScoringStage::new(config).score(&universe, &ctx);
        assert_eq!(filled["BBB"], dec!(-1));
    }

    #[test]
    fn absent_threshold_means_no_filter() {
        let frame = prices(&[("AAA", &[dec!(1)])]);
        let table = signals("value", day(2), &[]);
        let view = MarketView::new(&frame, &table, 0).unwrap();
        let book = snapshot(day(2), &[], dec!(0));
        let ctx = StrategyContext {
            date: day(2),
            is_rebalance_day: true,
            market: &view,
            portfolio: &book,
        };
        let mut state = PipelineState {
            scores: raw(&[("AAA", dec!(-3)), ("BBB", dec!(0)), ("CCC", dec!(2))]),
            ..PipelineState::default()
        };

        let unfiltered = SelectionStage::new(SelectionConfig {
            top_n: 5,
            side: Side::Long,
            threshold: None,
            exposure: Decimal::ONE,
        });
        unfiltered.apply(&mut state, &ctx).unwrap();
        assert_eq!(state.selected, vec!["CCC", "BBB", "AAA"]);

        let zero = SelectionStage::new(SelectionConfig {
            top_n: 5,
            side: Side::Long,
            threshold: Some(dec!(0)),
            exposure: Decimal::ONE,
        });
        zero.apply(&mut state, &ctx).unwrap();
        assert_eq!(state.selected, vec!["CCC", "BBB"]);
    }

    #[test]
    fn buffer_keeps_held_names_inside_the_exit_rank() {
        let frame = prices(&[("AAA", &[dec!(1)])]);
        let table = signals("value", day(2), &[]);
        let view = MarketView::new(&frame, &table, 0).unwrap();
        let book = snapshot(day(2), &[("DDD", dec!(10), dec!(1), day(2))], dec!(1));
        let ctx = StrategyContext {
            date: day(2),
            is_rebalance_day: true,
            market: &view,
            portfolio: &book,
        };
        let selection = SelectionConfig {
            top_n: 2,
            side: Side::Long,
            threshold: None,
            exposure: Decimal::ONE,
        };
        let mut state = PipelineState {
            scores: raw(&[("AAA", dec!(4)), ("BBB", dec!(3)), ("DDD", dec!(2)), ("EEE", dec!(1))]),
            ..PipelineState::default()
        };
        SelectionStage::new(selection.clone()).apply(&mut state, &ctx).unwrap();
        HoldingStage::new(HoldingConfig::Buffer { exit_rank: 3 }, selection)
            .apply(&mut state, &ctx)
            .unwrap();

        assert_eq!(state.held, vec!["DDD", "AAA"]);
        assert_eq!(state.selection.long.len(), 2);
    }
}
