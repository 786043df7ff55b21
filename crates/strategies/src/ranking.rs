use rust_decimal::Decimal;
use std::collections::BTreeMap;

/// Symbols ordered by score, highest first; equal scores fall back to symbol ascending.
pub fn rank_descending(scores: &BTreeMap<String, Decimal>) -> Vec<(String, Decimal)> {
    let mut ranked: Vec<(String, Decimal)> =
        scores.iter().map(|(s, v)| (s.clone(), *v)).collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    ranked
}

/// Symbols ordered by score, lowest first; equal scores fall back to symbol ascending.
pub fn rank_ascending(scores: &BTreeMap<String, Decimal>) -> Vec<(String, Decimal)> {
    let mut ranked: Vec<(String, Decimal)> =
        scores.iter().map(|(s, v)| (s.clone(), *v)).collect();
    ranked.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn ties_break_on_symbol_in_both_directions() {
        let scores: BTreeMap<String, Decimal> = [("CCC", dec!(1)), ("AAA", dec!(1)), ("BBB", dec!(2))]
            .into_iter()
            .map(|(s, v)| (s.to_string(), v))
            .collect();

        let desc: Vec<String> = rank_descending(&scores).into_iter().map(|(s, _)| s).collect();
        assert_eq!(desc, vec!["BBB", "AAA", "CCC"]);
        let asc: Vec<String> = rank_ascending(&scores).into_iter().map(|(s, _)| s).collect();
        assert_eq!(asc, vec!["AAA", "CCC", "BBB"]);
    }
}
