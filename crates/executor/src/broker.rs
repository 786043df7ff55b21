use crate::error::ExecutorError;
use crate::portfolio::Portfolio;
use configuration::BrokerConfig;
use core_types::{ExecutionReport, Fill, OrderSide, Scales, Weights};
use market_data::MarketView;
use rust_decimal::{Decimal, RoundingStrategy};
use std::collections::{BTreeMap, BTreeSet};

/// Decimal places kept for quantities when fractional shares are allowed.
const FRACTIONAL_DP: u32 = 8;

/// One leg of a trade, before it is priced.
#[derive(Debug, Clone)]
struct Order {
    symbol: String,
    /// Signed quantity change.
    delta: Decimal,
    open: Decimal,
}

/// The "virtual exchange" for backtesting.
///
/// Every order fills at the open of the execution day, moved against the
/// trader by `slippage_pct`, and pays `max(notional * commission_pct,
/// min_commission)`.
#[derive(Debug, Clone)]
pub struct SimulatedBroker {
    params: BrokerConfig,
}

impl SimulatedBroker {
    pub fn new(params: BrokerConfig) -> Self {
        Self { params }
    }

    /// Rebalances `portfolio` to `target` at the opens of `market`'s day.
    ///
    /// Equity is marked at the opens (last close for symbols without one).
    /// Symbols missing from `target` are closed, so an empty target
    /// liquidates the book. Symbols without an open today are left untouched.
    pub fn rebalance(
        &self,
        portfolio: &mut Portfolio,
        target: &Weights,
        market: &MarketView<'_>,
    ) -> Result<ExecutionReport, ExecutorError> {
        if !self.params.allow_short {
            if let Some((symbol, weight)) = target.iter().find(|(_, w)| w.is_sign_negative() && !w.is_zero()) {
                return Err(ExecutorError::ShortingDisabled {
                    symbol: symbol.clone(),
                    weight: weight.to_string(),
                });
            }
        }

        let equity = portfolio
            .equity_with(|symbol| market.open(symbol).or_else(|| market.last_close(symbol)))?;

        let symbols: BTreeSet<String> = target
            .keys()
            .chain(portfolio.positions().keys())
            .cloned()
            .collect();

        let mut orders = Vec::new();
        let mut reference_prices = BTreeMap::new();
        for symbol in &symbols {
            let weight = target.get(symbol).copied().unwrap_or(Decimal::ZERO);
            let current = portfolio.quantity(symbol);
            let Some(open) = market.open(symbol).filter(|p| *p > Decimal::ZERO) else {
                if !weight.is_zero() || !current.is_zero() {
                    tracing::warn!(%symbol, date = %market.date(), "No open price; order skipped");
                }
                continue;
            };
            reference_prices.insert(symbol.clone(), open);

            let desired = self.quantize(weight * equity / open);
            let delta = desired - current;
            if !delta.is_zero() {
                orders.push(Order {
                    symbol: symbol.clone(),
                    delta,
                    open,
                });
            }
        }

        let fills = self.execute(portfolio, orders, market)?;
        Ok(report(market, portfolio, &symbols, fills, reference_prices))
    }

    /// Multiplies the listed positions by their factors at the opens of
    /// `market`'s day. Positions not listed are left alone.
    pub fn scale(
        &self,
        portfolio: &mut Portfolio,
        scales: &Scales,
        market: &MarketView<'_>,
    ) -> Result<ExecutionReport, ExecutorError> {
        let mut orders = Vec::new();
        let mut reference_prices = BTreeMap::new();
        for (symbol, factor) in scales {
            let current = portfolio.quantity(symbol);
            if current.is_zero() {
                continue;
            }
            let Some(open) = market.open(symbol).filter(|p| *p > Decimal::ZERO) else {
                tracing::warn!(%symbol, date = %market.date(), "No open price; scale skipped");
                continue;
            };
            reference_prices.insert(symbol.clone(), open);

            let delta = self.quantize(current * *factor) - current;
            if !delta.is_zero() {
                orders.push(Order {
                    symbol: symbol.clone(),
                    delta,
                    open,
                });
            }
        }

        let touched: BTreeSet<String> = scales
            .keys()
            .chain(portfolio.positions().keys())
            .cloned()
            .collect();
        let fills = self.execute(portfolio, orders, market)?;
        Ok(report(market, portfolio, &touched, fills, reference_prices))
    }

    /// Fills `orders` against `portfolio`: every trade that moves a position
    /// towards flat first, then new short exposure, then new long exposure
    /// (clamped to the cash left).
    fn execute(
        &self,
        portfolio: &mut Portfolio,
        orders: Vec<Order>,
        market: &MarketView<'_>,
    ) -> Result<Vec<Fill>, ExecutorError> {
        // --- 1. Split each order into its closing and opening parts ---
        let mut closing = Vec::new();
        let mut opening_short = Vec::new();
        let mut opening_long = Vec::new();
        for order in orders {
            let current = portfolio.quantity(&order.symbol);
            let opposes = !current.is_zero() && current.is_sign_negative() != order.delta.is_sign_negative();
            let (close_part, open_part) = if opposes {
                if order.delta.abs() <= current.abs() {
                    (order.delta, Decimal::ZERO)
                } else {
                    (-current, order.delta + current)
                }
            } else {
                (Decimal::ZERO, order.delta)
            };

            if !close_part.is_zero() {
                closing.push(Order {
                    delta: close_part,
                    ..order.clone()
                });
            }
            if open_part.is_sign_negative() && !open_part.is_zero() {
                opening_short.push(Order {
                    delta: open_part,
                    ..order
                });
            } else if !open_part.is_zero() {
                opening_long.push(Order {
                    delta: open_part,
                    ..order
                });
            }
        }

        // --- 2. Fill in phase order ---
        let mut fills = Vec::new();
        for order in closing.into_iter().chain(opening_short) {
            let fill = self.price_fill(market, &order.symbol, order.delta, order.open);
            portfolio.apply_fill(&fill)?;
            fills.push(fill);
        }
        for order in opening_long {
            let quantity = self.affordable(order.delta, order.open, portfolio.cash());
            if quantity <= Decimal::ZERO {
                tracing::debug!(symbol = %order.symbol, wanted = %order.delta, "Buy dropped, no cash left");
                continue;
            }
            if quantity < order.delta {
                tracing::debug!(symbol = %order.symbol, wanted = %order.delta, filled = %quantity, "Buy clamped to available cash");
            }
            let fill = self.price_fill(market, &order.symbol, quantity, order.open);
            portfolio.apply_fill(&fill)?;
            fills.push(fill);
        }
        Ok(fills)
    }

    /// Calculates the execution price (slipped against the trader) and costs.
    fn price_fill(&self, market: &MarketView<'_>, symbol: &str, delta: Decimal, open: Decimal) -> Fill {
        let side = if delta.is_sign_negative() {
            OrderSide::Sell
        } else {
            OrderSide::Buy
        };
        let price = self.fill_price(side, open);
        let quantity = delta.abs();
        Fill {
            date: market.date(),
            symbol: symbol.to_string(),
            side,
            quantity,
            price,
            reference_price: open,
            commission: self.commission(price * quantity),
            slippage: (price - open).abs() * quantity,
        }
    }

    fn fill_price(&self, side: OrderSide, open: Decimal) -> Decimal {
        match side {
            // For a buy, slippage makes the price HIGHER (worse).
            OrderSide::Buy => open * (Decimal::ONE + self.params.slippage_pct),
            // For a sell, slippage makes the price LOWER (worse).
            OrderSide::Sell => open * (Decimal::ONE - self.params.slippage_pct),
        }
    }

    fn commission(&self, notional: Decimal) -> Decimal {
        (notional * self.params.commission_pct).max(self.params.min_commission)
    }

    /// Largest quantity up to `wanted` whose cost, commission included, fits in `cash`.
    fn affordable(&self, wanted: Decimal, open: Decimal, cash: Decimal) -> Decimal {
        let price = self.fill_price(OrderSide::Buy, open);
        let cost = |q: Decimal| price * q + self.commission(price * q);
        if cost(wanted) <= cash {
            return wanted;
        }
        if cash <= Decimal::ZERO {
            return Decimal::ZERO;
        }

        // Proportional commission: q * p * (1 + pct) <= cash.
        let proportional = cash / (price * (Decimal::ONE + self.params.commission_pct));
        // Minimum commission: q * p + min <= cash.
        let at_minimum = (cash - self.params.min_commission) / price;
        let mut quantity = self.quantize(proportional.min(at_minimum).min(wanted));
        let step = self.step();
        while quantity > Decimal::ZERO && cost(quantity) > cash {
            quantity -= step;
        }
        quantity.max(Decimal::ZERO)
    }

    fn quantize(&self, quantity: Decimal) -> Decimal {
        if self.params.fractional_shares {
            quantity.round_dp_with_strategy(FRACTIONAL_DP, RoundingStrategy::ToZero)
        } else {
            quantity.trunc()
        }
    }

    fn step(&self) -> Decimal {
        if self.params.fractional_shares {
            Decimal::new(1, FRACTIONAL_DP)
        } else {
            Decimal::ONE
        }
    }
}

fn report(
    market: &MarketView<'_>,
    portfolio: &Portfolio,
    touched: &BTreeSet<String>,
    fills: Vec<Fill>,
    reference_prices: BTreeMap<String, Decimal>,
) -> ExecutionReport {
    let quantities = touched
        .iter()
        .chain(portfolio.positions().keys())
        .map(|symbol| (symbol.clone(), portfolio.quantity(symbol)))
        .collect();
    ExecutionReport {
        date: Some(market.date()),
        fills,
        quantities,
        reference_prices,
    }
}
