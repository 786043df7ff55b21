use crate::error::BacktestError;
use chrono::Duration;
use configuration::BacktestConfig;
use market_data::{DataAccess, PriceFrame, SignalFrame};
use std::collections::BTreeSet;

/// Loads every table a run needs: prices for the static symbols plus every
/// symbol that appears in a referenced signal column, with enough history
/// before `start_date` to cover the configured lookback.
pub fn load_market_data(
    config: &BacktestConfig,
    data: &dyn DataAccess,
) -> Result<(PriceFrame, SignalFrame), BacktestError> {
    let columns = config.signal_columns();
    let mut symbols: BTreeSet<String> = config.static_symbols();
    for column in &columns {
        symbols.extend(data.signal_symbols(column, config.start_date, config.end_date)?);
    }
    if symbols.is_empty() {
        return Err(market_data::DataError::Unavailable(format!(
            "no symbols in any signal column between {} and {}",
            config.start_date, config.end_date
        ))
        .into());
    }

    let lookback = config.lookback_days.max(config.sizer.lookback());
    // Trading days to calendar days, with slack for holidays.
    let history_start = config.start_date - Duration::days(lookback as i64 * 7 / 5 + 10);

    let prices = data
        .load_prices(&symbols, history_start, config.end_date)?
        .trim_history(config.start_date, lookback);
    let signals = data.load_signals(&columns, config.start_date, config.end_date)?;
    tracing::debug!(
        symbols = symbols.len(),
        columns = columns.len(),
        days = prices.len(),
        "Market data loaded"
    );
    Ok((prices, signals))
}
