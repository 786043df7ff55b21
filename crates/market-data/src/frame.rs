use chrono::NaiveDate;
use core_types::Bar;
use rust_decimal::Decimal;
use std::collections::{BTreeMap, BTreeSet};

/// Daily bars for a set of symbols, aligned on the union of their trading dates.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PriceFrame {
    dates: Vec<NaiveDate>,
    bars: BTreeMap<String, Vec<Option<Bar>>>,
}

impl PriceFrame {
    /// Builds a frame from unaligned per-symbol series. Duplicate dates keep the last bar.
    pub fn from_series(series: BTreeMap<String, Vec<(NaiveDate, Bar)>>) -> Self {
        let dates: Vec<NaiveDate> = series
            .values()
            .flat_map(|rows| rows.iter().map(|(date, _)| *date))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let position: BTreeMap<NaiveDate, usize> =
            dates.iter().enumerate().map(|(i, d)| (*d, i)).collect();

        let bars = series
            .into_iter()
            .map(|(symbol, rows)| {
                let mut column = vec![None; dates.len()];
                for (date, bar) in rows {
                    if let Some(&i) = position.get(&date) {
                        column[i] = Some(bar);
                    }
                }
                (symbol, column)
            })
            .collect();

        Self { dates, bars }
    }

    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    pub fn symbols(&self) -> impl Iterator<Item = &String> {
        self.bars.keys()
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.bars.contains_key(symbol)
    }

    pub fn bar(&self, symbol: &str, index: usize) -> Option<&Bar> {
        self.bars.get(symbol)?.get(index)?.as_ref()
    }

    /// Index of the first trading day on or after `date`.
    pub fn first_index_on_or_after(&self, date: NaiveDate) -> Option<usize> {
        let i = self.dates.partition_point(|d| *d < date);
        (i < self.dates.len()).then_some(i)
    }

    /// Drops everything more than `lookback` trading days before `start`.
    pub fn trim_history(mut self, start: NaiveDate, lookback: usize) -> Self {
        let first = self.dates.partition_point(|d| *d < start);
        let keep_from = first.saturating_sub(lookback);
        if keep_from == 0 {
            return self;
        }
        self.dates.drain(..keep_from);
        for column in self.bars.values_mut() {
            column.drain(..keep_from);
        }
        self
    }
}

/// Signal tables keyed by column, then date, then symbol.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SignalFrame {
    columns: BTreeMap<String, BTreeMap<NaiveDate, BTreeMap<String, Decimal>>>,
}

impl SignalFrame {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, column: &str, date: NaiveDate, symbol: &str, value: Decimal) {
        self.columns
            .entry(column.to_string())
            .or_default()
            .entry(date)
            .or_default()
            .insert(symbol.to_string(), value);
    }

    /// Registers a column with no rows, so it counts as present.
    pub fn ensure_column(&mut self, column: &str) {
        self.columns.entry(column.to_string()).or_default();
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.columns.contains_key(column)
    }

    pub fn columns(&self) -> impl Iterator<Item = &String> {
        self.columns.keys()
    }

    /// Every value of `column` on exactly `date`.
    pub fn row(&self, column: &str, date: NaiveDate) -> Option<&BTreeMap<String, Decimal>> {
        self.columns.get(column)?.get(&date)
    }

    /// Rows of `column` dated within `start..=end`, in date order.
    pub fn rows_between(
        &self,
        column: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> impl Iterator<Item = (&NaiveDate, &BTreeMap<String, Decimal>)> {
        self.columns
            .get(column)
            .into_iter()
            .flat_map(move |by_date| by_date.range(start..=end))
    }

    pub fn value(&self, column: &str, date: NaiveDate, symbol: &str) -> Option<Decimal> {
        self.row(column, date)?.get(symbol).copied()
    }

    /// Every symbol that appears in any column.
    pub fn symbols(&self) -> BTreeSet<String> {
        self.columns
            .values()
            .flat_map(|by_date| by_date.values())
            .flat_map(|row| row.keys().cloned())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    #[test]
    fn series_are_aligned_on_the_union_calendar() {
        let mut series = BTreeMap::new();
        series.insert(
            "AAA".to_string(),
            vec![(day(2), Bar::flat(dec!(10))), (day(4), Bar::flat(dec!(11)))],
        );
        series.insert("BBB".to_string(), vec![(day(3), Bar::flat(dec!(20)))]);

        let frame = PriceFrame::from_series(series);
        assert_eq!(frame.dates(), &[day(2), day(3), day(4)]);
        assert!(frame.bar("AAA", 1).is_none());
        assert_eq!(frame.bar("BBB", 1).map(|b| b.close), Some(dec!(20)));
        assert_eq!(frame.first_index_on_or_after(day(3)), Some(1));
        assert_eq!(frame.first_index_on_or_after(day(5)), None);
    }

    #[test]
    fn trimming_keeps_only_the_requested_history() {
        let rows: Vec<_> = (2..=8).map(|d| (day(d), Bar::flat(dec!(1)))).collect();
        let frame = PriceFrame::from_series(BTreeMap::from([("AAA".to_string(), rows)]));

        let trimmed = frame.trim_history(day(6), 2);
        assert_eq!(trimmed.dates().first(), Some(&day(4)));
        assert_eq!(trimmed.len(), 5);
    }
}
