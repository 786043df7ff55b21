#![allow(dead_code)]

use backtester::{BacktestResult, run_backtest};
use chrono::{Datelike, NaiveDate, Weekday};
use configuration::{BacktestConfig, DocumentFormat};
use core_types::{Bar, Fill};
use market_data::InMemoryDataSource;
use rust_decimal::Decimal;

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

/// Monday to Friday between `start` and `end`, inclusive.
pub fn weekdays(start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
    start
        .iter_days()
        .take_while(|d| *d <= end)
        .filter(|d| !matches!(d.weekday(), Weekday::Sat | Weekday::Sun))
        .collect()
}

/// A bar that opens half a point above the previous close level.
pub fn bar(open: Decimal, close: Decimal) -> Bar {
    Bar {
        open,
        high: open.max(close),
        low: open.min(close),
        close,
        volume: Decimal::ZERO,
    }
}

/// A deterministic, wobbly price path per symbol.
pub fn wobbly(days: &[NaiveDate], seed: i64) -> Vec<(NaiveDate, Bar)> {
    days.iter()
        .enumerate()
        .map(|(i, d)| {
            let i = i as i64;
            let close = Decimal::from(50 + seed * 10 + (i * 7 + seed * 3) % 11);
            let open = close + Decimal::from((i + seed) % 3 - 1);
            (*d, bar(open, close))
        })
        .collect()
}

pub fn parse(json: &str) -> BacktestConfig {
    BacktestConfig::parse(json, DocumentFormat::Json).unwrap()
}

pub fn run(json: &str, data: &InMemoryDataSource) -> BacktestResult {
    run_backtest(&parse(json), data, None).unwrap()
}

pub fn all_fills(result: &BacktestResult) -> Vec<Fill> {
    result
        .records
        .iter()
        .flat_map(|r| r.fills.iter().cloned())
        .collect()
}
