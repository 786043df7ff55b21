use crate::error::AnalyticsError;
use crate::report::{DailyMetric, MonthlyReturnRow, PerformanceReport};
use chrono::Datelike;
use core_types::DailyRecord;
use rust_decimal::{Decimal, MathematicalOps};
use std::collections::BTreeMap;

const TRADING_DAYS_PER_YEAR: i64 = 252;
const DAYS_PER_YEAR: &str = "365.25";

/// A stateless calculator for deriving performance metrics from the engine's
/// daily records.
#[derive(Debug, Default)]
pub struct AnalyticsEngine {}

impl AnalyticsEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// The main entry point for calculating the run summary.
    ///
    /// # Arguments
    ///
    /// * `records` - One `DailyRecord` per simulated trading day, in date order.
    /// * `initial_equity` - The starting cash of the run.
    /// * `strategy` - The strategy kind, carried into the report.
    pub fn calculate(
        &self,
        records: &[DailyRecord],
        initial_equity: Decimal,
        strategy: &str,
    ) -> Result<PerformanceReport, AnalyticsError> {
        let mut report = PerformanceReport::new(strategy, initial_equity);
        let (Some(first), Some(last)) = (records.first(), records.last()) else {
            return Ok(report);
        };
        if initial_equity <= Decimal::ZERO {
            return Err(AnalyticsError::NotEnoughData(
                "initial equity must be positive".to_string(),
            ));
        }

        report.start_date = Some(first.date);
        report.end_date = Some(last.date);
        report.trading_days = records.len();
        report.final_equity = last.equity;
        report.total_return = last.equity / initial_equity - Decimal::ONE;

        let metrics = self.daily_metrics(records, initial_equity);
        report.max_drawdown = metrics
            .iter()
            .map(|m| -m.drawdown)
            .max()
            .unwrap_or(Decimal::ZERO);

        self.calculate_cagr(records, initial_equity, &mut report);
        self.calculate_ratios(&metrics, &mut report);

        for record in records {
            report.trade_count += record.fills.len();
            report.total_commission += record.commission;
            report.total_slippage += record.slippage;
        }
        Ok(report)
    }

    /// Per-day return and drawdown. The first day's return is measured against
    /// the initial equity, which also seeds the running peak.
    pub fn daily_metrics(&self, records: &[DailyRecord], initial_equity: Decimal) -> Vec<DailyMetric> {
        let mut previous = initial_equity;
        let mut peak = initial_equity;
        records
            .iter()
            .map(|record| {
                let daily_return = if previous.is_zero() {
                    Decimal::ZERO
                } else {
                    record.equity / previous - Decimal::ONE
                };
                peak = peak.max(record.equity);
                let drawdown = if peak.is_zero() {
                    Decimal::ZERO
                } else {
                    record.equity / peak - Decimal::ONE
                };
                previous = record.equity;
                DailyMetric {
                    date: record.date,
                    equity: record.equity,
                    cash: record.cash,
                    daily_return,
                    drawdown,
                    commission: record.commission,
                    slippage: record.slippage,
                    gross_exposure: record.gross_exposure,
                    net_exposure: record.net_exposure,
                    positions: record.positions,
                }
            })
            .collect()
    }

    /// Month-end over previous month-end equity, pivoted one row per year.
    pub fn monthly_returns(&self, records: &[DailyRecord], initial_equity: Decimal) -> Vec<MonthlyReturnRow> {
        let mut month_end: BTreeMap<(i32, u32), Decimal> = BTreeMap::new();
        for record in records {
            month_end.insert((record.date.year(), record.date.month()), record.equity);
        }

        let mut rows: BTreeMap<i32, MonthlyReturnRow> = BTreeMap::new();
        let mut year_start: BTreeMap<i32, Decimal> = BTreeMap::new();
        let mut previous = initial_equity;
        for ((year, month), equity) in month_end {
            year_start.entry(year).or_insert(previous);
            let row = rows.entry(year).or_insert_with(|| MonthlyReturnRow {
                year,
                ..MonthlyReturnRow::default()
            });
            if let Some(cell) = row.month_mut(month) {
                *cell = (!previous.is_zero()).then(|| equity / previous - Decimal::ONE);
            }
            if let Some(start) = year_start.get(&year).filter(|s| !s.is_zero()) {
                row.total = Some(equity / *start - Decimal::ONE);
            }
            previous = equity;
        }
        rows.into_values().collect()
    }

    fn calculate_cagr(&self, records: &[DailyRecord], initial_equity: Decimal, report: &mut PerformanceReport) {
        let (Some(first), Some(last)) = (records.first(), records.last()) else {
            return;
        };
        let days = (last.date - first.date).num_days();
        if days <= 0 || last.equity <= Decimal::ZERO {
            return;
        }
        let Ok(days_per_year) = DAYS_PER_YEAR.parse::<Decimal>() else {
            return;
        };
        let years = Decimal::from(days) / days_per_year;
        let growth = last.equity / initial_equity;
        report.cagr = growth
            .checked_powd(Decimal::ONE / years)
            .map(|g| g - Decimal::ONE);
    }

    /// Annualised volatility and Sharpe ratio (risk-free rate 0).
    fn calculate_ratios(&self, metrics: &[DailyMetric], report: &mut PerformanceReport) {
        // 1. Daily returns
        let returns: Vec<Decimal> = metrics.iter().map(|m| m.daily_return).collect();
        if returns.len() < 2 {
            return;
        }

        // 2. The mean of returns
        let n = Decimal::from(returns.len());
        let mean = returns.iter().copied().sum::<Decimal>() / n;

        // 3. The sample standard deviation of returns
        let variance = returns
            .iter()
            .map(|r| (*r - mean) * (*r - mean))
            .sum::<Decimal>()
            / (n - Decimal::ONE);
        let Some(std_dev) = variance.sqrt().filter(|s| *s > Decimal::ZERO) else {
            return;
        };

        // 4. Annualise by sqrt(252)
        let Some(annualizer) = Decimal::from(TRADING_DAYS_PER_YEAR).sqrt() else {
            return;
        };
        report.annualized_volatility = Some(std_dev * annualizer);
        report.sharpe_ratio = Some(mean / std_dev * annualizer);
    }
}
