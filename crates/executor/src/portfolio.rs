use crate::error::ExecutorError;
use chrono::NaiveDate;
use core_types::{Fill, Holding, OrderSide, PortfolioSnapshot, Position};
use market_data::MarketView;
use rust_decimal::Decimal;
use std::collections::BTreeMap;

/// Manages the state of a simulated account: cash plus signed positions.
/// Its sole responsibility is to accurately reflect the current state based on fills.
#[derive(Debug, Clone)]
pub struct Portfolio {
    cash: Decimal,
    positions: BTreeMap<String, Position>,
}

impl Portfolio {
    /// Creates a new `Portfolio` with a given amount of starting cash.
    pub fn new(initial_cash: Decimal) -> Self {
        Self {
            cash: initial_cash,
            positions: BTreeMap::new(),
        }
    }

    pub fn cash(&self) -> Decimal {
        self.cash
    }

    pub fn positions(&self) -> &BTreeMap<String, Position> {
        &self.positions
    }

    pub fn quantity(&self, symbol: &str) -> Decimal {
        self.positions
            .get(symbol)
            .map(|p| p.quantity)
            .unwrap_or(Decimal::ZERO)
    }

    /// Books a fill. This is the core state transition: cash moves by the
    /// signed notional and the commission, and the position is averaged,
    /// reduced or flipped by `Position::apply`.
    pub fn apply_fill(&mut self, fill: &Fill) -> Result<(), ExecutorError> {
        if fill.quantity <= Decimal::ZERO {
            return Err(ExecutorError::InvalidFill {
                symbol: fill.symbol.clone(),
                reason: format!("quantity must be positive, got {}", fill.quantity),
            });
        }
        if fill.price <= Decimal::ZERO {
            return Err(ExecutorError::InvalidFill {
                symbol: fill.symbol.clone(),
                reason: format!("price must be positive, got {}", fill.price),
            });
        }

        // --- Cash Update ---
        // For a Buy, cash decreases. For a Sell, cash increases.
        // The commission is paid regardless of direction.
        let notional = fill.notional();
        match fill.side {
            OrderSide::Buy => self.cash -= notional,
            OrderSide::Sell => self.cash += notional,
        }
        self.cash -= fill.commission;

        // --- Position Update ---
        let position = self
            .positions
            .entry(fill.symbol.clone())
            .or_insert_with(|| Position::open(&fill.symbol, Decimal::ZERO, fill.price, fill.date));
        position.apply(fill.signed_quantity(), fill.price, fill.date);

        // Flat positions are removed so the book only lists what is held.
        if position.is_flat() {
            self.positions.remove(&fill.symbol);
        }
        Ok(())
    }

    /// Equity at arbitrary prices. Shorts carry negative market value.
    pub fn equity_with<F>(&self, mut price: F) -> Result<Decimal, ExecutorError>
    where
        F: FnMut(&str) -> Option<Decimal>,
    {
        let mut total = self.cash;
        for (symbol, position) in &self.positions {
            let p = price(symbol).ok_or_else(|| {
                ExecutorError::Valuation(format!("no price available for held symbol {symbol}"))
            })?;
            total += position.quantity * p;
        }
        Ok(total)
    }

    /// Marks every position at the latest close known to `market` (the close
    /// of T, or an earlier one when T has no bar for the symbol).
    pub fn snapshot(&self, market: &MarketView<'_>) -> PortfolioSnapshot {
        self.snapshot_with(market.date(), |symbol| market.last_close(symbol))
    }

    pub(crate) fn snapshot_with<F>(&self, as_of: NaiveDate, mut price: F) -> PortfolioSnapshot
    where
        F: FnMut(&str) -> Option<Decimal>,
    {
        let mut snapshot = PortfolioSnapshot::empty(as_of, self.cash);
        let mut equity = self.cash;
        for (symbol, position) in &self.positions {
            // A symbol with no price history at all can only have been filled
            // at its entry price, so that is the best available mark.
            let mark = price(symbol).unwrap_or(position.entry_price);
            let market_value = position.quantity * mark;
            equity += market_value;
            snapshot.holdings.insert(
                symbol.clone(),
                Holding {
                    position: position.clone(),
                    price: mark,
                    market_value,
                },
            );
        }
        snapshot.equity = equity;
        snapshot
    }
}
