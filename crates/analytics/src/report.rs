use chrono::NaiveDate;
use core_types::OrderSide;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A row type of one of the CSV artifacts. The header is written even when
/// there are no rows, so an empty trade log is still a valid table.
pub trait CsvRow: Serialize {
    const HEADERS: &'static [&'static str];
}

/// Headline numbers of a finished run, written as `summary.json`.
///
/// Ratios are fractions (0.05 = 5%). Annualised figures use 252 trading days
/// and a zero risk-free rate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceReport {
    pub strategy: String,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub trading_days: usize,

    // I. Returns
    pub initial_equity: Decimal,
    pub final_equity: Decimal,
    pub total_return: Decimal,
    pub cagr: Option<Decimal>, // None for runs shorter than a day or a wiped-out book

    // II. Risk and Drawdown
    pub annualized_volatility: Option<Decimal>,
    pub sharpe_ratio: Option<Decimal>, // Option<> for cases with no stdev
    pub max_drawdown: Decimal,

    // III. Trading activity
    pub trade_count: usize,
    pub total_commission: Decimal,
    pub total_slippage: Decimal,
}

impl PerformanceReport {
    /// A report for a run that never traded.
    pub fn new(strategy: &str, initial_equity: Decimal) -> Self {
        Self {
            strategy: strategy.to_string(),
            start_date: None,
            end_date: None,
            trading_days: 0,
            initial_equity,
            final_equity: initial_equity,
            total_return: Decimal::ZERO,
            cagr: None,
            annualized_volatility: None,
            sharpe_ratio: None,
            max_drawdown: Decimal::ZERO,
            trade_count: 0,
            total_commission: Decimal::ZERO,
            total_slippage: Decimal::ZERO,
        }
    }
}

/// One row of `daily_metrics.csv`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyMetric {
    pub date: NaiveDate,
    pub equity: Decimal,
    pub cash: Decimal,
    pub daily_return: Decimal,
    /// Distance below the running peak, as a non-positive fraction.
    pub drawdown: Decimal,
    pub commission: Decimal,
    pub slippage: Decimal,
    pub gross_exposure: Decimal,
    pub net_exposure: Decimal,
    pub positions: usize,
}

/// One row of `trades.csv`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRow {
    pub date: NaiveDate,
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: Decimal,
    pub price: Decimal,
    pub reference_price: Decimal,
    pub commission: Decimal,
    pub slippage: Decimal,
}

/// One year of `monthly_returns.csv`; empty cells are months without trading days.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MonthlyReturnRow {
    pub year: i32,
    pub jan: Option<Decimal>,
    pub feb: Option<Decimal>,
    pub mar: Option<Decimal>,
    pub apr: Option<Decimal>,
    pub may: Option<Decimal>,
    pub jun: Option<Decimal>,
    pub jul: Option<Decimal>,
    pub aug: Option<Decimal>,
    pub sep: Option<Decimal>,
    pub oct: Option<Decimal>,
    pub nov: Option<Decimal>,
    pub dec: Option<Decimal>,
    pub total: Option<Decimal>,
}

impl MonthlyReturnRow {
    pub fn month_mut(&mut self, month: u32) -> Option<&mut Option<Decimal>> {
        Some(match month {
            1 => &mut self.jan,
            2 => &mut self.feb,
            3 => &mut self.mar,
            4 => &mut self.apr,
            5 => &mut self.may,
            6 => &mut self.jun,
            7 => &mut self.jul,
            8 => &mut self.aug,
            9 => &mut self.sep,
            10 => &mut self.oct,
            11 => &mut self.nov,
            12 => &mut self.dec,
            _ => return None,
        })
    }
}

/// One row of `leg_weights.csv`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegWeightRow {
    pub date: NaiveDate,
    pub leg: String,
    pub symbol: String,
    pub pre: Decimal,
    pub post: Decimal,
}

/// One row of `blended_weights.csv`: the target before and after constraints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlendedWeightRow {
    pub date: NaiveDate,
    pub symbol: String,
    pub pre: Decimal,
    pub post: Decimal,
}

impl CsvRow for DailyMetric {
    const HEADERS: &'static [&'static str] = &[
        "date",
        "equity",
        "cash",
        "daily_return",
        "drawdown",
        "commission",
        "slippage",
        "gross_exposure",
        "net_exposure",
        "positions",
    ];
}

impl CsvRow for TradeRow {
    const HEADERS: &'static [&'static str] = &[
        "date",
        "symbol",
        "side",
        "quantity",
        "price",
        "reference_price",
        "commission",
        "slippage",
    ];
}

impl CsvRow for MonthlyReturnRow {
    const HEADERS: &'static [&'static str] = &[
        "year", "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
        "total",
    ];
}

impl CsvRow for LegWeightRow {
    const HEADERS: &'static [&'static str] = &["date", "leg", "symbol", "pre", "post"];
}

impl CsvRow for BlendedWeightRow {
    const HEADERS: &'static [&'static str] = &["date", "symbol", "pre", "post"];
}
