mod common;

use backtester::{BacktestError, Backtester, load_market_data, run_backtest};
use common::{all_fills, bar, date, parse, run, weekdays, wobbly};
use core_types::{Bar, DecisionKind, OrderSide};
use market_data::InMemoryDataSource;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio::sync::watch;

const TOP_N_DAILY: &str = r#"{
    "start_date": "2024-01-01",
    "end_date": "2024-01-31",
    "initial_cash": "100000",
    "rebalance": { "frequency": "daily" },
    "strategy": { "kind": "signal_top_n", "column": "score", "top_n": 2 }
}"#;

fn scored_source(perturb_after: Option<usize>) -> InMemoryDataSource {
    let days = weekdays(date(2024, 1, 1), date(2024, 1, 31));
    let mut data = InMemoryDataSource::new();
    for (seed, symbol) in ["AAA", "BBB", "CCC", "DDD"].iter().enumerate() {
        let mut bars = wobbly(&days, seed as i64);
        for (i, (day, b)) in bars.iter_mut().enumerate() {
            let mut value = Decimal::from(((i * 5 + seed * 7) % 9) as i64);
            if perturb_after.is_some_and(|k| i > k) {
                *b = bar(b.open * dec!(3), b.close * dec!(0.5));
                value = Decimal::from(((i * 11 + seed * 2) % 7) as i64);
            }
            data.insert_signal("score", *day, symbol, value);
        }
        data.insert_bars(symbol, bars);
    }
    data
}

#[test]
fn decisions_never_depend_on_later_bars() {
    let cutoff = 10;
    let baseline = run(TOP_N_DAILY, &scored_source(None));
    let perturbed = run(TOP_N_DAILY, &scored_source(Some(cutoff)));

    let cutoff_date = baseline.records[cutoff].date;
    assert_eq!(baseline.records[..=cutoff], perturbed.records[..=cutoff]);

    let before = |r: &backtester::BacktestResult| -> Vec<_> {
        r.decisions
            .iter()
            .filter(|d| d.date <= cutoff_date)
            .cloned()
            .collect()
    };
    assert_eq!(before(&baseline), before(&perturbed));
    assert!(!before(&baseline).is_empty());

    // The perturbation itself is visible afterwards.
    assert_ne!(baseline.records, perturbed.records);
}

#[test]
fn first_trade_executes_at_the_next_open() {
    let result = run(TOP_N_DAILY, &scored_source(None));
    assert!(result.records[0].fills.is_empty());
    let first_fills = &result.records[1].fills;
    assert!(!first_fills.is_empty());
    let days = weekdays(date(2024, 1, 1), date(2024, 1, 31));
    for fill in first_fills {
        assert_eq!(fill.date, days[1]);
        assert_eq!(fill.side, OrderSide::Buy);
    }
}

fn two_symbol_source(scores: &[(usize, Option<[i64; 2]>)]) -> InMemoryDataSource {
    let days = weekdays(date(2024, 1, 1), date(2024, 1, 12));
    let flat: Vec<(chrono::NaiveDate, Bar)> = days.iter().map(|d| (*d, Bar::flat(dec!(10)))).collect();
    let mut data = InMemoryDataSource::new()
        .with_bars("AAA", flat.clone())
        .with_bars("BBB", flat);
    for (i, values) in scores {
        if let Some([a, b]) = values {
            data.insert_signal("score", days[*i], "AAA", Decimal::from(*a));
            data.insert_signal("score", days[*i], "BBB", Decimal::from(*b));
        }
    }
    data
}

const THRESHOLD_DAILY: &str = r#"{
    "start_date": "2024-01-01",
    "end_date": "2024-01-12",
    "initial_cash": "10000",
    "rebalance": { "frequency": "daily" },
    "strategy": { "kind": "signal_top_n", "column": "score", "top_n": 2, "threshold": "5" }
}"#;

#[test]
fn empty_target_liquidates_at_the_next_open() {
    // Both names qualify on day 0; nothing qualifies on day 2.
    let data = two_symbol_source(&[(0, Some([9, 8])), (1, Some([9, 8])), (2, Some([1, 1]))]);
    let result = run(THRESHOLD_DAILY, &data);

    let liquidation = &result.records[3];
    assert_eq!(liquidation.fills.len(), 2);
    assert!(liquidation.fills.iter().all(|f| f.side == OrderSide::Sell));
    assert_eq!(liquidation.positions, 0);

    let decision = result.decisions.iter().find(|d| d.date == result.records[2].date).unwrap();
    assert_eq!(decision.kind, DecisionKind::Rebalance);
    assert!(decision.post_constraint.is_empty());
}

#[test]
fn no_decision_means_no_trade() {
    // Day 2 publishes no signal row at all: the book is left alone.
    let data = two_symbol_source(&[(0, Some([9, 8])), (1, Some([9, 8])), (2, None)]);
    let result = run(THRESHOLD_DAILY, &data);

    assert!(result.records[3].fills.is_empty());
    assert!(result.records[3..].iter().all(|r| r.positions == 2));
    assert!(!result.decisions.iter().any(|d| d.date == result.records[2].date));
}

const STOP_LOSS: &str = r#"{
    "name": "stop-loss scenario",
    "start_date": "2024-01-01",
    "end_date": "2024-06-28",
    "initial_cash": "100000",
    "rebalance": { "frequency": "monthly" },
    "strategy": {
        "kind": "configured",
        "universe": { "kind": "static", "symbols": ["AAA", "BBB"] },
        "scoring": { "source": { "kind": "constant", "value": "1" } },
        "selection": { "top_n": 2 },
        "exits": [ { "kind": "stop_loss", "pct": "0.1" } ]
    }
}"#;

const CRASH: (i32, u32, u32) = (2024, 2, 14);

/// AAA stays at 100; BBB drops to 85 at the close of `CRASH` and stays there.
fn crash_source() -> InMemoryDataSource {
    let days = weekdays(date(2024, 1, 1), date(2024, 6, 28));
    let crash = date(CRASH.0, CRASH.1, CRASH.2);
    let aaa = days.iter().map(|d| (*d, Bar::flat(dec!(100)))).collect();
    let bbb = days
        .iter()
        .map(|d| {
            let b = if *d < crash {
                Bar::flat(dec!(100))
            } else if *d == crash {
                bar(dec!(100), dec!(85))
            } else {
                Bar::flat(dec!(85))
            };
            (*d, b)
        })
        .collect();
    InMemoryDataSource::new().with_bars("AAA", aaa).with_bars("BBB", bbb)
}

#[test]
fn stop_loss_on_a_non_rebalance_day_sells_at_the_next_open() {
    let crash = date(CRASH.0, CRASH.1, CRASH.2);
    let result = run(STOP_LOSS, &crash_source());

    let next_day = date(2024, 2, 15);
    let sells: Vec<_> = all_fills(&result)
        .into_iter()
        .filter(|f| f.symbol == "BBB" && f.side == OrderSide::Sell)
        .collect();
    assert_eq!(sells.len(), 1);
    assert_eq!(sells[0].date, next_day);
    assert_eq!(sells[0].reference_price, dec!(85));
    assert_eq!(sells[0].quantity, dec!(500));

    let scale = result.decisions.iter().find(|d| d.date == crash).unwrap();
    assert_eq!(scale.kind, DecisionKind::Scale);
    assert_eq!(scale.scales["BBB"], Decimal::ZERO);

    // Flat in BBB until the March rebalance buys it back.
    let after: Vec<_> = result
        .records
        .iter()
        .filter(|r| r.date >= next_day && r.date < date(2024, 3, 1))
        .collect();
    assert!(!after.is_empty());
    assert!(after.iter().all(|r| r.positions == 1));

    let trace = result.traces.iter().find(|t| t.date == Some(crash)).unwrap();
    assert_eq!(trace.exits[0].symbol, "BBB");
    assert_eq!(trace.exits[0].reason, "stop_loss");
}

fn throttled_stop_loss(symbols: &str) -> String {
    format!(
        r#"{{
            "start_date": "2024-01-01",
            "end_date": "2024-06-28",
            "initial_cash": "100000",
            "rebalance": {{ "frequency": "monthly" }},
            "constraints": {{ "max_turnover": "0.2" }},
            "strategy": {{
                "kind": "configured",
                "universe": {{ "kind": "static", "symbols": [{symbols}] }},
                "scoring": {{ "source": {{ "kind": "constant", "value": "1" }} }},
                "selection": {{ "top_n": 2 }},
                "exits": [ {{ "kind": "stop_loss", "pct": "0.1" }} ]
            }}
        }}"#
    )
}

#[test]
fn exits_are_not_throttled_by_the_turnover_cap() {
    let crash = date(CRASH.0, CRASH.1, CRASH.2);
    // Every holding exiting is an explicit liquidation; one of two is a scale.
    for (symbols, held_after) in [(r#""BBB""#, 0), (r#""AAA", "BBB""#, 1)] {
        let result = run(&throttled_stop_loss(symbols), &crash_source());

        let exit = result.decisions.iter().find(|d| d.date == crash).unwrap();
        assert!(exit.adjustments.is_empty(), "{symbols}: {:?}", exit.adjustments);

        let sells: Vec<_> = all_fills(&result)
            .into_iter()
            .filter(|f| f.symbol == "BBB" && f.side == OrderSide::Sell && f.date > crash)
            .collect();
        assert_eq!(sells.len(), 1, "{symbols}: {sells:?}");
        assert_eq!(sells[0].date, date(2024, 2, 15));

        let flat_until_march = result
            .records
            .iter()
            .filter(|r| r.date > crash && r.date < date(2024, 3, 1));
        for record in flat_until_march {
            assert_eq!(record.positions, held_after, "{symbols} on {}", record.date);
        }
    }
}

#[test]
fn missing_prices_fail_the_run() {
    let days = weekdays(date(2024, 1, 1), date(2024, 1, 31));
    let data = InMemoryDataSource::new().with_bars("AAA", wobbly(&days, 0));
    let config = parse(
        r#"{
            "start_date": "2024-01-01",
            "end_date": "2024-01-31",
            "initial_cash": "1000",
            "rebalance": { "frequency": "weekly" },
            "strategy": { "kind": "static_universe", "symbols": ["AAA", "ZZZ"] }
        }"#,
    );
    let err = run_backtest(&config, &data, None).unwrap_err();
    assert!(matches!(err, BacktestError::Data(_)));
}

#[test]
fn cancellation_is_checked_between_days() {
    let config = parse(TOP_N_DAILY);
    let data = scored_source(None);
    let (prices, signals) = load_market_data(&config, &data).unwrap();
    let (tx, rx) = watch::channel(false);
    tx.send(true).unwrap();

    let err = Backtester::new(config)
        .unwrap()
        .with_cancellation(rx)
        .run(&prices, &signals)
        .unwrap_err();
    assert!(matches!(err, BacktestError::Cancelled(_)));
}
