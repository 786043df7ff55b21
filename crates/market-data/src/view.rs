use crate::frame::{PriceFrame, SignalFrame};
use chrono::NaiveDate;
use core_types::Bar;
use rust_decimal::Decimal;
use std::collections::BTreeMap;

/// Everything a strategy may know at day T.
///
/// Accessors take a lookback measured backwards from the cursor and never
/// index past it, so data after T is unreachable.
#[derive(Debug, Clone, Copy)]
pub struct MarketView<'a> {
    prices: &'a PriceFrame,
    signals: &'a SignalFrame,
    index: usize,
}

impl<'a> MarketView<'a> {
    /// Returns `None` when `index` is outside the frame.
    pub fn new(prices: &'a PriceFrame, signals: &'a SignalFrame, index: usize) -> Option<Self> {
        (index < prices.len()).then_some(Self {
            prices,
            signals,
            index,
        })
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn date(&self) -> NaiveDate {
        self.prices.dates()[self.index]
    }

    pub fn symbols(&self) -> impl Iterator<Item = &'a String> {
        self.prices.symbols()
    }

    pub fn bar(&self, symbol: &str) -> Option<&'a Bar> {
        self.prices.bar(symbol, self.index)
    }

    pub fn open(&self, symbol: &str) -> Option<Decimal> {
        self.bar(symbol).map(|b| b.open)
    }

    pub fn close(&self, symbol: &str) -> Option<Decimal> {
        self.bar(symbol).map(|b| b.close)
    }

    /// The most recent close at or before T, for marking stale positions.
    pub fn last_close(&self, symbol: &str) -> Option<Decimal> {
        (0..=self.index)
            .rev()
            .find_map(|i| self.prices.bar(symbol, i))
            .map(|b| b.close)
    }

    /// The `lookback + 1` closes ending at T, or `None` if any is missing.
    pub fn closes(&self, symbol: &str, lookback: usize) -> Option<Vec<Decimal>> {
        if lookback > self.index {
            return None;
        }
        (self.index - lookback..=self.index)
            .map(|i| self.prices.bar(symbol, i).map(|b| b.close))
            .collect()
    }

    /// Simple close-to-close returns over the trailing `lookback` days.
    pub fn returns(&self, symbol: &str, lookback: usize) -> Option<Vec<Decimal>> {
        let closes = self.closes(symbol, lookback)?;
        closes
            .windows(2)
            .map(|w| {
                if w[0].is_zero() {
                    None
                } else {
                    Some(w[1] / w[0] - Decimal::ONE)
                }
            })
            .collect()
    }

    pub fn has_signal_column(&self, column: &str) -> bool {
        self.signals.has_column(column)
    }

    /// The value of `column` for `symbol` published on T.
    pub fn signal(&self, column: &str, symbol: &str) -> Option<Decimal> {
        self.signals.value(column, self.date(), symbol)
    }

    pub fn signal_row(&self, column: &str) -> Option<&'a BTreeMap<String, Decimal>> {
        self.signals.row(column, self.date())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn frame() -> PriceFrame {
        let rows = (2..=6)
            .map(|d| {
                (
                    NaiveDate::from_ymd_opt(2024, 1, d).unwrap(),
                    Bar::flat(Decimal::from(d * 10)),
                )
            })
            .collect();
        PriceFrame::from_series(BTreeMap::from([("AAA".to_string(), rows)]))
    }

    #[test]
    fn trailing_windows_end_at_the_cursor() {
        let prices = frame();
        let signals = SignalFrame::new();
        let view = MarketView::new(&prices, &signals, 2).unwrap();

        assert_eq!(view.closes("AAA", 2), Some(vec![dec!(20), dec!(30), dec!(40)]));
        assert_eq!(view.closes("AAA", 3), None);
        assert_eq!(view.returns("AAA", 1), Some(vec![dec!(40) / dec!(30) - Decimal::ONE]));
    }

    #[test]
    fn last_close_falls_back_to_earlier_rows() {
        let mut series = BTreeMap::new();
        series.insert(
            "AAA".to_string(),
            vec![(NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(), Bar::flat(dec!(5)))],
        );
        series.insert(
            "BBB".to_string(),
            vec![(NaiveDate::from_ymd_opt(2024, 1, 3).unwrap(), Bar::flat(dec!(7)))],
        );
        let prices = PriceFrame::from_series(series);
        let signals = SignalFrame::new();
        let view = MarketView::new(&prices, &signals, 1).unwrap();

        assert_eq!(view.close("AAA"), None);
        assert_eq!(view.last_close("AAA"), Some(dec!(5)));
    }

    #[test]
    fn signals_are_read_on_the_cursor_date_only() {
        let prices = frame();
        let mut signals = SignalFrame::new();
        let tomorrow = NaiveDate::from_ymd_opt(2024, 1, 4).unwrap();
        signals.insert("mom", tomorrow, "AAA", dec!(1));

        let today = MarketView::new(&prices, &signals, 1).unwrap();
        assert_eq!(today.signal("mom", "AAA"), None);
        let next = MarketView::new(&prices, &signals, 2).unwrap();
        assert_eq!(next.signal("mom", "AAA"), Some(dec!(1)));
    }
}
