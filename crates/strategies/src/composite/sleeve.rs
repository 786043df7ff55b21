use chrono::NaiveDate;
use core_types::{Holding, PortfolioSnapshot, Position, Weights};
use market_data::MarketView;
use rust_decimal::Decimal;
use std::collections::BTreeMap;

/// The positions attributed to one composite leg.
///
/// Sleeves are owned by the composite and addressed by leg index; a leg only
/// ever sees its own sleeve.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Sleeve {
    positions: BTreeMap<String, Position>,
}

impl Sleeve {
    pub fn quantity(&self, symbol: &str) -> Decimal {
        self.positions
            .get(symbol)
            .map(|p| p.quantity)
            .unwrap_or(Decimal::ZERO)
    }

    pub fn symbols(&self) -> impl Iterator<Item = &String> {
        self.positions.keys()
    }

    fn mark(&self, market: &MarketView<'_>) -> BTreeMap<String, Holding> {
        self.positions
            .iter()
            .map(|(symbol, position)| {
                let price = market.last_close(symbol).unwrap_or(position.entry_price);
                let holding = Holding {
                    position: position.clone(),
                    price,
                    market_value: position.quantity * price,
                };
                (symbol.clone(), holding)
            })
            .collect()
    }

    /// The sleeve as a portfolio whose equity is the leg's share of capital.
    pub fn snapshot(&self, as_of: NaiveDate, capital: Decimal, market: &MarketView<'_>) -> PortfolioSnapshot {
        let holdings = self.mark(market);
        let invested: Decimal = holdings.values().map(|h| h.market_value).sum();
        PortfolioSnapshot {
            as_of,
            cash: capital - invested,
            equity: capital,
            holdings,
        }
    }

    /// Market value of each position as a fraction of the leg's capital.
    pub fn weights(&self, capital: Decimal, market: &MarketView<'_>) -> Weights {
        if capital <= Decimal::ZERO {
            return Weights::new();
        }
        self.mark(market)
            .into_iter()
            .map(|(symbol, h)| (symbol, h.market_value / capital))
            .filter(|(_, w)| !w.is_zero())
            .collect()
    }

    /// Moves the sleeve's quantity of `symbol` to `quantity`, trading at `price`
    /// (or the current entry price when the change is a pure re-attribution).
    pub fn set_quantity(&mut self, symbol: &str, quantity: Decimal, price: Option<Decimal>, date: NaiveDate) {
        match self.positions.get_mut(symbol) {
            Some(position) => {
                let delta = quantity - position.quantity;
                let price = price.unwrap_or(position.entry_price);
                position.apply(delta, price, date);
                if position.is_flat() {
                    self.positions.remove(symbol);
                }
            }
            None if !quantity.is_zero() => {
                let Some(price) = price else {
                    tracing::warn!(symbol, "Attributing a position to a sleeve without a price");
                    self.positions
                        .insert(symbol.to_string(), Position::open(symbol, quantity, Decimal::ZERO, date));
                    return;
                };
                self.positions
                    .insert(symbol.to_string(), Position::open(symbol, quantity, price, date));
            }
            None => {}
        }
    }
}
