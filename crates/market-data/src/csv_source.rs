use crate::error::DataError;
use crate::frame::{PriceFrame, SignalFrame};
use crate::source::DataAccess;
use chrono::NaiveDate;
use core_types::Bar;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Reads CSV tables from a directory laid out as:
///
/// ```text
/// <root>/prices/<SYMBOL>.csv    date,open,high,low,close[,volume]
/// <root>/signals/<column>.csv   date,symbol,value
/// ```
#[derive(Debug, Clone)]
pub struct CsvDataSource {
    root: PathBuf,
}

#[derive(Debug, Deserialize)]
struct PriceRow {
    date: NaiveDate,
    open: String,
    high: String,
    low: String,
    close: String,
    #[serde(default)]
    volume: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SignalRow {
    date: NaiveDate,
    symbol: String,
    value: String,
}

impl CsvDataSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn price_path(&self, symbol: &str) -> PathBuf {
        self.root.join("prices").join(format!("{symbol}.csv"))
    }

    fn signal_path(&self, column: &str) -> PathBuf {
        self.root.join("signals").join(format!("{column}.csv"))
    }

    fn read_prices(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<(NaiveDate, Bar)>, DataError> {
        let path = self.price_path(symbol);
        if !path.exists() {
            return Err(DataError::Unavailable(format!(
                "no price file for {symbol} at {}",
                path.display()
            )));
        }
        let mut reader = csv::Reader::from_path(&path)?;
        let mut rows = Vec::new();
        for record in reader.deserialize::<PriceRow>() {
            let row = record?;
            if row.date < start || row.date > end {
                continue;
            }
            let bar = Bar {
                open: parse_decimal(&path, &row.open)?,
                high: parse_decimal(&path, &row.high)?,
                low: parse_decimal(&path, &row.low)?,
                close: parse_decimal(&path, &row.close)?,
                volume: match row.volume.as_deref() {
                    Some(v) if !v.trim().is_empty() => parse_decimal(&path, v)?,
                    _ => Decimal::ZERO,
                },
            };
            rows.push((row.date, bar));
        }
        Ok(rows)
    }

    fn read_signal(
        &self,
        column: &str,
        start: NaiveDate,
        end: NaiveDate,
        frame: &mut SignalFrame,
    ) -> Result<(), DataError> {
        let path = self.signal_path(column);
        if !path.exists() {
            return Err(DataError::MissingColumn(column.to_string()));
        }
        frame.ensure_column(column);
        let mut reader = csv::Reader::from_path(&path)?;
        for record in reader.deserialize::<SignalRow>() {
            let row = record?;
            if row.date < start || row.date > end || row.value.trim().is_empty() {
                continue;
            }
            let value = parse_decimal(&path, &row.value)?;
            frame.insert(column, row.date, &row.symbol, value);
        }
        Ok(())
    }
}

fn parse_decimal(path: &Path, raw: &str) -> Result<Decimal, DataError> {
    let trimmed = raw.trim();
    Decimal::from_str(trimmed)
        .or_else(|_| Decimal::from_scientific(trimmed))
        .map_err(|e| DataError::Malformed {
            path: path.to_path_buf(),
            message: format!("'{raw}' is not a number: {e}"),
        })
}

impl DataAccess for CsvDataSource {
    fn load_prices(
        &self,
        symbols: &BTreeSet<String>,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<PriceFrame, DataError> {
        let mut series = BTreeMap::new();
        for symbol in symbols {
            let rows = self.read_prices(symbol, start, end)?;
            if rows.is_empty() {
                return Err(DataError::Unavailable(format!(
                    "no prices for {symbol} between {start} and {end}"
                )));
            }
            tracing::debug!(symbol = %symbol, bars = rows.len(), "Loaded price series");
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
            self.read_signal(column, start, end, &mut frame)?;
        }
        Ok(frame)
    }

    fn signal_symbols(
        &self,
        column: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<BTreeSet<String>, DataError> {
        let mut frame = SignalFrame::new();
        self.read_signal(column, start, end, &mut frame)?;
        Ok(frame.symbols())
    }
}
