use crate::error::BacktestError;
use crate::schedule::RebalanceSchedule;
use configuration::BacktestConfig;
use core_types::{
    DailyRecord, DecisionKind, DecisionRecord, DecisionTrace, PortfolioSnapshot, Scales,
    StrategyDecision, Target, Weights, gross_exposure, net_exposure,
};
use executor::{Portfolio, SimulatedBroker};
use indicatif::{ProgressBar, ProgressStyle};
use market_data::{MarketView, PriceFrame, SignalFrame};
use risk::{ConstraintOutcome, ConstraintPipeline, Sizer, apply_scales, create_sizer, resolve_target};
use rust_decimal::Decimal;
use strategies::{Strategy, StrategyContext, create_strategy};
use tokio::sync::watch;

/// A decision made at Close(T), waiting for Open(T+1).
#[derive(Debug, Clone)]
enum Pending {
    Rebalance(Weights),
    Scale(Scales),
}

/// Everything a finished simulation produced, in date order.
#[derive(Debug, Clone)]
pub struct BacktestResult {
    pub strategy_kind: String,
    pub initial_cash: Decimal,
    pub records: Vec<DailyRecord>,
    pub decisions: Vec<DecisionRecord>,
    pub traces: Vec<DecisionTrace>,
    pub final_snapshot: PortfolioSnapshot,
}

/// The main backtesting engine.
///
/// For each trading day T, strictly in this order: execute the decision
/// scheduled at T-1 at Open(T), mark to market at Close(T), then (on
/// rebalance days, or every day for strategies with exits) decide at
/// Close(T) for Open(T+1).
pub struct Backtester {
    // --- Context ---
    config: BacktestConfig,
    // --- Components ---
    portfolio: Portfolio,
    strategy: Box<dyn Strategy>,
    sizer: Box<dyn Sizer>,
    constraints: ConstraintPipeline,
    broker: SimulatedBroker,
    schedule: RebalanceSchedule,
    // --- Controls ---
    cancel: Option<watch::Receiver<bool>>,
    progress: bool,
}

impl Backtester {
    /// Builds every component from a validated run document.
    pub fn new(config: BacktestConfig) -> Result<Self, BacktestError> {
        let strategy = create_strategy(&config.strategy)?;
        let sizer = create_sizer(&config.sizer)?;
        Ok(Self {
            portfolio: Portfolio::new(config.initial_cash),
            strategy,
            sizer,
            constraints: ConstraintPipeline::new(config.constraints.clone()),
            broker: SimulatedBroker::new(config.broker.clone()),
            schedule: RebalanceSchedule::new(config.rebalance),
            cancel: None,
            progress: false,
            config,
        })
    }

    /// Checks `cancel` between days; a `true` stops the run before the next day.
    pub fn with_cancellation(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Draws a progress bar on stderr while the loop runs.
    pub fn with_progress(mut self, progress: bool) -> Self {
        self.progress = progress;
        self
    }

    /// Runs the simulation over `prices`, starting at the first trading day
    /// on or after `start_date`. Rows before that are history for lookbacks.
    pub fn run(mut self, prices: &PriceFrame, signals: &SignalFrame) -> Result<BacktestResult, BacktestError> {
        let dates = prices.dates();
        let first = prices
            .first_index_on_or_after(self.config.start_date)
            .filter(|i| dates[*i] <= self.config.end_date)
            .ok_or_else(|| BacktestError::NoTradingDays {
                start: self.config.start_date.to_string(),
                end: self.config.end_date.to_string(),
            })?;
        let last = dates.partition_point(|d| *d <= self.config.end_date);

        let progress_bar = self.progress_bar((last - first) as u64)?;
        tracing::info!(
            strategy = self.strategy.name(),
            days = last - first,
            start = %dates[first],
            "Starting simulation"
        );

        let mut records = Vec::with_capacity(last - first);
        let mut decisions = Vec::new();
        let mut traces = Vec::new();
        let mut pending: Option<Pending> = None;
        let mut final_snapshot = PortfolioSnapshot::empty(dates[first], self.config.initial_cash);

        for index in first..last {
            if self.cancelled() {
                progress_bar.abandon();
                return Err(BacktestError::Cancelled(dates[index].to_string()));
            }
            let Some(view) = MarketView::new(prices, signals, index) else {
                break;
            };

            // --- 1. Execute at Open(T) ---
            let mut fills = Vec::new();
            if let Some(decision) = pending.take() {
                let report = match &decision {
                    Pending::Rebalance(target) => self.broker.rebalance(&mut self.portfolio, target, &view)?,
                    Pending::Scale(scales) => self.broker.scale(&mut self.portfolio, scales, &view)?,
                };
                self.strategy.on_execution(&report);
                fills = report.fills;
            }

            // --- 2. Mark to market at Close(T) ---
            let snapshot = self.portfolio.snapshot(&view);
            let weights = snapshot.weights();
            records.push(DailyRecord {
                date: view.date(),
                equity: snapshot.equity,
                cash: snapshot.cash,
                gross_exposure: gross_exposure(&weights),
                net_exposure: net_exposure(&weights),
                commission: fills.iter().map(|f| f.commission).sum(),
                slippage: fills.iter().map(|f| f.slippage).sum(),
                positions: snapshot.holdings.len(),
                fills,
            });

            // --- 3. Decide at Close(T) ---
            let is_rebalance_day = self.schedule.is_rebalance(view.date());
            if is_rebalance_day || self.strategy.evaluates_daily() {
                let ctx = StrategyContext {
                    date: view.date(),
                    is_rebalance_day,
                    market: &view,
                    portfolio: &snapshot,
                };
                let decision = self.strategy.decide(&ctx)?;
                traces.extend(self.strategy.drain_traces());
                if let Some((record, next)) = self.finalize(decision, &view, &weights)? {
                    decisions.push(record);
                    pending = Some(next);
                }
            }

            final_snapshot = snapshot;
            progress_bar.inc(1);
        }

        progress_bar.finish_and_clear();
        if pending.is_some() {
            tracing::debug!("Decision on the last day has no next open and is not executed");
        }
        tracing::info!(
            days = records.len(),
            decisions = decisions.len(),
            final_equity = %final_snapshot.equity,
            "Simulation complete"
        );

        Ok(BacktestResult {
            strategy_kind: self.config.strategy.kind_name().to_string(),
            initial_cash: self.config.initial_cash,
            records,
            decisions,
            traces,
            final_snapshot,
        })
    }

    /// Turns a strategy decision into what the broker will execute next open:
    /// size, apply scales, constrain once, then report back to the strategy.
    ///
    /// Exits are executed in full. A `Scale` decision and an explicit
    /// liquidation (`Target::Weights` with no entries) skip the constraint
    /// pipeline, so `max_turnover` never spreads an exit over several days.
    fn finalize(
        &mut self,
        decision: StrategyDecision,
        view: &MarketView<'_>,
        current: &Weights,
    ) -> Result<Option<(DecisionRecord, Pending)>, BacktestError> {
        match decision {
            StrategyDecision::None => Ok(None),
            StrategyDecision::Scale { scales } => {
                if scales.is_empty() {
                    return Ok(None);
                }
                let record = DecisionRecord {
                    date: view.date(),
                    kind: DecisionKind::Scale,
                    pre_constraint: Weights::new(),
                    post_constraint: Weights::new(),
                    scales: scales.clone(),
                    adjustments: Vec::new(),
                    legs: Vec::new(),
                };
                Ok(Some((record, Pending::Scale(scales))))
            }
            StrategyDecision::Target { target, scales } => {
                let liquidation = matches!(&target, Target::Weights(w) if w.is_empty());
                let sized = resolve_target(&target, self.sizer.as_ref(), view)?;
                let pre = apply_scales(sized, &scales);
                let outcome = if liquidation {
                    ConstraintOutcome {
                        weights: Weights::new(),
                        adjustments: Vec::new(),
                    }
                } else {
                    self.constraints.apply(&pre, current)
                };
                for adjustment in &outcome.adjustments {
                    tracing::debug!(date = %view.date(), stage = %adjustment.stage, detail = %adjustment.detail, "Constraint adjusted target");
                }
                self.strategy.after_constraints(&pre, &outcome.weights)?;

                let record = DecisionRecord {
                    date: view.date(),
                    kind: DecisionKind::Rebalance,
                    pre_constraint: pre,
                    post_constraint: outcome.weights.clone(),
                    scales,
                    adjustments: outcome.adjustments,
                    legs: self.strategy.leg_weights().unwrap_or_default(),
                };
                Ok(Some((record, Pending::Rebalance(outcome.weights))))
            }
        }
    }

    fn cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|rx| *rx.borrow())
    }

    fn progress_bar(&self, len: u64) -> Result<ProgressBar, BacktestError> {
        if !self.progress {
            return Ok(ProgressBar::hidden());
        }
        let bar = ProgressBar::new(len);
        bar.set_style(
            ProgressStyle::with_template(
                "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})",
            )?
            .progress_chars("=>-"),
        );
        Ok(bar)
    }
}
