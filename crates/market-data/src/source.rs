use crate::error::DataError;
use crate::frame::{PriceFrame, SignalFrame};
use chrono::NaiveDate;
use core_types::Bar;
use rust_decimal::Decimal;
use std::collections::{BTreeMap, BTreeSet};

/// Supplies aligned historical tables for a requested universe and window.
///
/// Implementations are synchronous; the engine runs on a blocking worker.
pub trait DataAccess: Send + Sync {
    /// Bars for `symbols` between `start` and `end` inclusive.
    ///
    /// A requested symbol with no bars in the window is `DataError::Unavailable`.
    fn load_prices(
        &self,
        symbols: &BTreeSet<String>,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<PriceFrame, DataError>;

    /// Values of `columns` between `start` and `end` inclusive.
    ///
    /// An unknown column is `DataError::MissingColumn`.
    fn load_signals(
        &self,
        columns: &BTreeSet<String>,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<SignalFrame, DataError>;

    /// Every symbol with at least one value of `column` in the window.
    fn signal_symbols(
        &self,
        column: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<BTreeSet<String>, DataError>;
}

/// A data source held entirely in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryDataSource {
    prices: BTreeMap<String, Vec<(NaiveDate, Bar)>>,
    signals: SignalFrame,
}

impl InMemoryDataSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bars(mut self, symbol: &str, bars: Vec<(NaiveDate, Bar)>) -> Self {
        self.insert_bars(symbol, bars);
        self
    }

    pub fn insert_bars(&mut self, symbol: &str, bars: Vec<(NaiveDate, Bar)>) {
        let series = self.prices.entry(symbol.to_string()).or_default();
        series.extend(bars);
        series.sort_by_key(|(date, _)| *date);
    }

    pub fn insert_signal(&mut self, column: &str, date: NaiveDate, symbol: &str, value: Decimal) {
        self.signals.insert(column, date, symbol, value);
    }
}

impl DataAccess for InMemoryDataSource {
    fn load_prices(
        &self,
        symbols: &BTreeSet<String>,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<PriceFrame, DataError> {
        let mut series = BTreeMap::new();
        for symbol in symbols {
            let rows: Vec<(NaiveDate, Bar)> = self
                .prices
                .get(symbol)
                .map(|rows| {
                    rows.iter()
                        .filter(|(date, _)| *date >= start && *date <= end)
                        .copied()
                        .collect()
                })
                .unwrap_or_default();
            if rows.is_empty() {
                return Err(DataError::Unavailable(format!(
                    "no prices for {symbol} between {start} and {end}"
                )));
            }
            series.insert(symbol.clone(), rows);
        }
        Ok(PriceFrame::from_series(series))
    }

    fn load_signals(
        &self,
        columns: &BTreeSet<String>,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<SignalFrame, DataError> {
        let mut frame = SignalFrame::new();
        for column in columns {
            if !self.signals.has_column(column) {
                return Err(DataError::MissingColumn(column.clone()));
            }
            frame.ensure_column(column);
            for (date, row) in self.signals.rows_between(column, start, end) {
                for (symbol, value) in row {
                    frame.insert(column, *date, symbol, *value);
                }
            }
        }
        Ok(frame)
    }

    fn signal_symbols(
        &self,
        column: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<BTreeSet<String>, DataError> {
        let columns = BTreeSet::from([column.to_string()]);
        Ok(self.load_signals(&columns, start, end)?.symbols())
    }
}
