use crate::enums::{OrderSide, Side};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Symbol -> signed portfolio weight. Ordered so every iteration is deterministic.
pub type Weights = BTreeMap<String, Decimal>;

/// Symbol -> multiplicative factor applied to the current position (0 = full exit).
pub type Scales = BTreeMap<String, Decimal>;

/// One day's OHLCV record for a symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bar {
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

impl Bar {
    /// A bar with the same price at every point of the day.
    pub fn flat(price: Decimal) -> Self {
        Self {
            open: price,
            high: price,
            low: price,
            close: price,
            volume: Decimal::ZERO,
        }
    }
}

/// Scores per side plus the exposure budget each side should receive once sized.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoredSelection {
    pub long: BTreeMap<String, Decimal>,
    pub short: BTreeMap<String, Decimal>,
    pub long_exposure: Decimal,
    pub short_exposure: Decimal,
}

impl ScoredSelection {
    pub fn long_only(scores: BTreeMap<String, Decimal>, exposure: Decimal) -> Self {
        Self {
            long: scores,
            short: BTreeMap::new(),
            long_exposure: exposure,
            short_exposure: Decimal::ZERO,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.long.is_empty() && self.short.is_empty()
    }

    pub fn symbols(&self) -> impl Iterator<Item = &String> {
        self.long.keys().chain(self.short.keys())
    }
}

/// What a strategy wants the book to look like after the next open.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Target {
    /// An explicit weight map. An empty map is a full liquidation.
    Weights(Weights),
    /// Raw scores that still have to go through a sizer.
    Scores(ScoredSelection),
}

/// The output of a strategy for one decision date.
///
/// `None` means "no rebalance today" and never produces a trade, while
/// `Target { target: Target::Weights(empty), .. }` is an actionable liquidation.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StrategyDecision {
    #[default]
    None,
    Target { target: Target, scales: Scales },
    /// Partial exits only: each listed position is multiplied by its factor,
    /// every other holding is left untouched.
    Scale { scales: Scales },
}

impl StrategyDecision {
    pub fn liquidate() -> Self {
        Self::weights(Weights::new())
    }

    pub fn weights(weights: Weights) -> Self {
        StrategyDecision::Target {
            target: Target::Weights(weights),
            scales: Scales::new(),
        }
    }

    pub fn scores(selection: ScoredSelection) -> Self {
        StrategyDecision::Target {
            target: Target::Scores(selection),
            scales: Scales::new(),
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, StrategyDecision::None)
    }
}

/// An open position. Quantity is signed: negative is short.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub quantity: Decimal,
    /// Average entry price of the current (same-sign) position.
    pub entry_price: Decimal,
    /// Date the current position was opened from flat (or flipped).
    pub opened_on: NaiveDate,
}

impl Position {
    pub fn open(symbol: &str, quantity: Decimal, price: Decimal, date: NaiveDate) -> Self {
        Self {
            symbol: symbol.to_string(),
            quantity,
            entry_price: price,
            opened_on: date,
        }
    }

    pub fn is_flat(&self) -> bool {
        self.quantity.is_zero()
    }

    pub fn side(&self) -> Side {
        if self.quantity.is_sign_negative() && !self.quantity.is_zero() {
            Side::Short
        } else {
            Side::Long
        }
    }

    /// Applies a signed quantity change traded at `price` on `date`.
    ///
    /// Increasing a position averages the entry price, reducing it keeps the
    /// entry price, and crossing through zero re-opens at `price`.
    pub fn apply(&mut self, delta: Decimal, price: Decimal, date: NaiveDate) {
        if delta.is_zero() {
            return;
        }
        if self.quantity.is_zero() {
            self.quantity = delta;
            self.entry_price = price;
            self.opened_on = date;
            return;
        }

        let new_quantity = self.quantity + delta;
        let same_direction = self.quantity.is_sign_negative() == delta.is_sign_negative();
        if same_direction {
            self.entry_price = (self.entry_price * self.quantity + price * delta) / new_quantity;
        } else if !new_quantity.is_zero()
            && new_quantity.is_sign_negative() != self.quantity.is_sign_negative()
        {
            self.entry_price = price;
            self.opened_on = date;
        }
        self.quantity = new_quantity;
    }

    /// Unrealised return of the position at `price`, signed by direction.
    pub fn unrealized_return(&self, price: Decimal) -> Decimal {
        if self.entry_price.is_zero() {
            return Decimal::ZERO;
        }
        let raw = (price - self.entry_price) / self.entry_price;
        match self.side() {
            Side::Long => raw,
            Side::Short => -raw,
        }
    }
}

/// A position marked at a price.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Holding {
    pub position: Position,
    pub price: Decimal,
    pub market_value: Decimal,
}

/// Read-only view of a portfolio at one point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioSnapshot {
    pub as_of: NaiveDate,
    pub cash: Decimal,
    pub equity: Decimal,
    pub holdings: BTreeMap<String, Holding>,
}

impl PortfolioSnapshot {
    pub fn empty(as_of: NaiveDate, cash: Decimal) -> Self {
        Self {
            as_of,
            cash,
            equity: cash,
            holdings: BTreeMap::new(),
        }
    }

    pub fn holds(&self, symbol: &str) -> bool {
        self.holdings.contains_key(symbol)
    }

    pub fn quantity(&self, symbol: &str) -> Decimal {
        self.holdings
            .get(symbol)
            .map(|h| h.position.quantity)
            .unwrap_or(Decimal::ZERO)
    }

    /// Market value of each holding as a fraction of equity.
    pub fn weights(&self) -> Weights {
        if self.equity <= Decimal::ZERO {
            return Weights::new();
        }
        self.holdings
            .iter()
            .map(|(symbol, h)| (symbol.clone(), h.market_value / self.equity))
            .collect()
    }
}

/// A single simulated fill. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fill {
    pub date: NaiveDate,
    pub symbol: String,
    pub side: OrderSide,
    /// Always positive; the side carries the direction.
    pub quantity: Decimal,
    pub price: Decimal,
    /// The unslipped open the fill was priced from.
    pub reference_price: Decimal,
    pub commission: Decimal,
    /// Cost of slippage in currency: |price - reference_price| * quantity.
    pub slippage: Decimal,
}

impl Fill {
    pub fn signed_quantity(&self) -> Decimal {
        match self.side {
            OrderSide::Buy => self.quantity,
            OrderSide::Sell => -self.quantity,
        }
    }

    pub fn notional(&self) -> Decimal {
        self.price * self.quantity
    }
}

/// What happened at one open: the fills plus the resulting book.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub date: Option<NaiveDate>,
    pub fills: Vec<Fill>,
    /// Post-execution signed quantity for every symbol touched or still held.
    pub quantities: BTreeMap<String, Decimal>,
    /// Open prices used as the reference for this execution.
    pub reference_prices: BTreeMap<String, Decimal>,
}

impl ExecutionReport {
    pub fn fill_price(&self, symbol: &str) -> Option<Decimal> {
        self.fills
            .iter()
            .rev()
            .find(|f| f.symbol == symbol)
            .map(|f| f.price)
    }
}

/// Sum of absolute weights.
pub fn gross_exposure(weights: &Weights) -> Decimal {
    weights.values().map(|w| w.abs()).sum()
}

/// Sum of signed weights.
pub fn net_exposure(weights: &Weights) -> Decimal {
    weights.values().copied().sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    #[test]
    fn adding_to_a_position_averages_the_entry_price() {
        let mut p = Position::open("AAA", dec!(10), dec!(100), day(2));
        p.apply(dec!(10), dec!(110), day(3));
        assert_eq!(p.quantity, dec!(20));
        assert_eq!(p.entry_price, dec!(105));
        assert_eq!(p.opened_on, day(2));
    }

    #[test]
    fn reducing_keeps_entry_and_flipping_reopens() {
        let mut p = Position::open("AAA", dec!(10), dec!(100), day(2));
        p.apply(dec!(-4), dec!(120), day(3));
        assert_eq!(p.quantity, dec!(6));
        assert_eq!(p.entry_price, dec!(100));

        p.apply(dec!(-10), dec!(90), day(4));
        assert_eq!(p.quantity, dec!(-4));
        assert_eq!(p.entry_price, dec!(90));
        assert_eq!(p.opened_on, day(4));
        assert_eq!(p.side(), Side::Short);
    }

    #[test]
    fn short_unrealized_return_is_mirrored() {
        let p = Position::open("AAA", dec!(-5), dec!(100), day(2));
        assert_eq!(p.unrealized_return(dec!(90)), dec!(0.1));
    }

    #[test]
    fn empty_weights_is_a_decision_not_a_none() {
        let decision = StrategyDecision::liquidate();
        assert!(!decision.is_none());
        assert!(StrategyDecision::None.is_none());
    }
}
