use crate::structs::{Fill, Scales, Weights};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The engine's output for one trading day, recorded after the close.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyRecord {
    pub date: NaiveDate,
    pub equity: Decimal,
    pub cash: Decimal,
    pub gross_exposure: Decimal,
    pub net_exposure: Decimal,
    pub commission: Decimal,
    pub slippage: Decimal,
    pub positions: usize,
    pub fills: Vec<Fill>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionKind {
    Rebalance,
    Scale,
}

/// One constraint stage that changed the weights it was handed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstraintAdjustment {
    pub stage: String,
    pub detail: String,
}

/// Pre/post-constraint weights of a single composite leg.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegWeights {
    pub leg: String,
    pub pre: Weights,
    pub post: Weights,
}

/// A decision scheduled at Close(T) for execution at Open(T+1).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub date: NaiveDate,
    pub kind: DecisionKind,
    pub pre_constraint: Weights,
    pub post_constraint: Weights,
    pub scales: Scales,
    pub adjustments: Vec<ConstraintAdjustment>,
    pub legs: Vec<LegWeights>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExitEvent {
    pub symbol: String,
    pub reason: String,
}

/// Intermediate state of a configured pipeline on a decision date.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DecisionTrace {
    pub date: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub leg: Option<String>,
    pub universe: Vec<String>,
    pub raw_scores: BTreeMap<String, Decimal>,
    pub selected: Vec<String>,
    pub held: Vec<String>,
    pub scales: Scales,
    pub exits: Vec<ExitEvent>,
}
