use crate::error::ConfigError;
use chrono::NaiveDate;
use core_types::Side;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// The run document submitted to the service: everything needed to replay a backtest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BacktestConfig {
    #[serde(default)]
    pub name: Option<String>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub initial_cash: Decimal,
    /// Trading days of history loaded before `start_date` for lookback-based stages.
    #[serde(default)]
    pub lookback_days: usize,
    pub rebalance: RebalanceFrequency,
    pub strategy: StrategyConfig,
    #[serde(default)]
    pub sizer: SizerConfig,
    #[serde(default)]
    pub constraints: ConstraintConfig,
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

/// Which trading days are rebalance days.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "frequency", rename_all = "snake_case")]
pub enum RebalanceFrequency {
    Daily,
    Weekly,
    Monthly,
    Quarterly,
    Annual,
    EveryNDays { n: usize },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StrategyConfig {
    StaticUniverse(StaticUniverseParams),
    SignalTopN(SignalTopNParams),
    LongShortTopN(LongShortParams),
    Configured(ConfiguredParams),
    Composite(CompositeParams),
}

/// A fixed list of symbols, equal-weighted unless explicit weights are given.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StaticUniverseParams {
    pub symbols: Vec<String>,
    #[serde(default)]
    pub weights: Option<BTreeMap<String, Decimal>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalTopNParams {
    pub column: String,
    pub top_n: usize,
    #[serde(default)]
    pub threshold: Option<Decimal>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LongShortParams {
    pub column: String,
    pub long_n: usize,
    pub short_n: usize,
    #[serde(default = "half")]
    pub long_exposure: Decimal,
    #[serde(default = "half")]
    pub short_exposure: Decimal,
}

/// A strategy assembled from pluggable stages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfiguredParams {
    pub universe: UniverseConfig,
    pub scoring: ScoringConfig,
    pub selection: SelectionConfig,
    #[serde(default)]
    pub holding: HoldingConfig,
    #[serde(default)]
    pub exits: Vec<ExitRule>,
    #[serde(default)]
    pub postprocess: Vec<PostprocessConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UniverseConfig {
    Static {
        symbols: Vec<String>,
    },
    /// Every symbol that has a value in `column` on the decision date.
    Signal {
        column: String,
        #[serde(default)]
        required_columns: Vec<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringConfig {
    pub source: ScoreSource,
    #[serde(default)]
    pub transform: ScoreTransform,
    #[serde(default)]
    pub missing: MissingPolicy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScoreSource {
    Column { name: String },
    /// Close-to-close return over `lookback` trading days.
    Momentum { lookback: usize },
    Constant { value: Decimal },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreTransform {
    #[default]
    Identity,
    Negate,
    /// Ascending rank, 1-based.
    Rank,
    Zscore,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum MissingPolicy {
    #[default]
    Drop,
    Fill {
        value: Decimal,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectionConfig {
    pub top_n: usize,
    #[serde(default)]
    pub side: Side,
    /// Longs need a score at or above it, shorts at or below it.
    #[serde(default)]
    pub threshold: Option<Decimal>,
    #[serde(default = "one")]
    pub exposure: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HoldingConfig {
    /// The new selection replaces the book.
    ReplaceAll {
        #[serde(default)]
        refresh_scores: bool,
    },
    /// Holdings are kept while they still rank inside `exit_rank`.
    Buffer { exit_rank: usize },
}

impl Default for HoldingConfig {
    fn default() -> Self {
        HoldingConfig::ReplaceAll {
            refresh_scores: false,
        }
    }
}

/// Rules checked against each holding at every close.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExitRule {
    StopLoss { pct: Decimal },
    MaxHoldingDays { days: i64 },
    ScoreBelow { threshold: Decimal },
    /// Multiplies a holding by `factor` once its gain reaches `gain_pct`.
    ScaleOut { gain_pct: Decimal, factor: Decimal },
}

impl ExitRule {
    pub fn label(&self) -> &'static str {
        match self {
            ExitRule::StopLoss { .. } => "stop_loss",
            ExitRule::MaxHoldingDays { .. } => "max_holding_days",
            ExitRule::ScoreBelow { .. } => "score_below",
            ExitRule::ScaleOut { .. } => "scale_out",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PostprocessConfig {
    Exclude { symbols: Vec<String> },
    Exposure { factor: Decimal },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositeParams {
    pub legs: Vec<LegConfig>,
    /// Each leg's pre-constraint weights are scaled to this gross before blending.
    #[serde(default)]
    pub leg_gross: Option<Decimal>,
    /// The blended weights are scaled to this gross.
    #[serde(default)]
    pub target_gross: Option<Decimal>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegConfig {
    pub name: String,
    pub weight: Decimal,
    pub strategy: StrategyConfig,
    #[serde(default)]
    pub sizer: SizerConfig,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SizerConfig {
    #[default]
    EqualWeight,
    ScoreWeighted,
    InverseVolatility {
        lookback: usize,
    },
}

/// Portfolio limits. Every field is optional; unset limits are not enforced.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ConstraintConfig {
    #[serde(default)]
    pub max_position_weight: Option<Decimal>,
    #[serde(default)]
    pub max_positions: Option<usize>,
    #[serde(default)]
    pub max_gross: Option<Decimal>,
    #[serde(default)]
    pub max_net: Option<Decimal>,
    /// Maximum one-way turnover (sum of |target - current| / 2) per rebalance.
    #[serde(default)]
    pub max_turnover: Option<Decimal>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// Fills are this fraction worse than the open (0.001 = 10 bps).
    #[serde(default)]
    pub slippage_pct: Decimal,
    #[serde(default)]
    pub commission_pct: Decimal,
    #[serde(default)]
    pub min_commission: Decimal,
    #[serde(default)]
    pub allow_short: bool,
    #[serde(default)]
    pub fractional_shares: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "enabled")]
    pub debug_traces: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self { debug_traces: true }
    }
}

fn half() -> Decimal {
    Decimal::new(5, 1)
}

fn one() -> Decimal {
    Decimal::ONE
}

fn enabled() -> bool {
    true
}

/// Accepted encodings of a run document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Json,
    Toml,
}

impl DocumentFormat {
    /// Picks the format from a file extension, defaulting to JSON.
    pub fn from_extension(ext: Option<&str>) -> Self {
        match ext {
            Some(e) if e.eq_ignore_ascii_case("toml") => DocumentFormat::Toml,
            _ => DocumentFormat::Json,
        }
    }
}

impl BacktestConfig {
    /// Parses and validates a run document.
    pub fn parse(text: &str, format: DocumentFormat) -> Result<Self, ConfigError> {
        let config: BacktestConfig = match format {
            DocumentFormat::Json => serde_json::from_str(text)?,
            DocumentFormat::Toml => config::Config::builder()
                .add_source(config::File::from_str(text, config::FileFormat::Toml))
                .build()?
                .try_deserialize()?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn display_name(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| format!("{}-{}", self.strategy.kind_name(), self.start_date))
    }

    /// Checks every invariant the engine relies on. Invalid documents never become runs.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.start_date > self.end_date {
            return invalid(format!(
                "start_date {} is after end_date {}",
                self.start_date, self.end_date
            ));
        }
        if self.initial_cash <= Decimal::ZERO {
            return invalid("initial_cash must be positive");
        }
        if let RebalanceFrequency::EveryNDays { n: 0 } = self.rebalance {
            return invalid("rebalance every_n_days needs n >= 1");
        }
        self.broker.validate()?;
        self.constraints.validate()?;
        self.sizer.validate()?;
        self.strategy.validate(&self.broker, false)
    }

    /// Signal columns the strategy reads, so the data layer can load them up front.
    pub fn signal_columns(&self) -> BTreeSet<String> {
        let mut columns = BTreeSet::new();
        self.strategy.collect_columns(&mut columns);
        columns
    }

    /// Symbols named directly in the document. Signal-driven universes add more at runtime.
    pub fn static_symbols(&self) -> BTreeSet<String> {
        let mut symbols = BTreeSet::new();
        self.strategy.collect_symbols(&mut symbols);
        symbols
    }
}

impl BrokerConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if !unit_interval(self.slippage_pct) {
            return invalid("broker.slippage_pct must be in [0, 1)");
        }
        if !unit_interval(self.commission_pct) {
            return invalid("broker.commission_pct must be in [0, 1)");
        }
        if self.min_commission < Decimal::ZERO {
            return invalid("broker.min_commission must not be negative");
        }
        Ok(())
    }
}

impl ConstraintConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        let limits = [
            ("max_position_weight", self.max_position_weight),
            ("max_gross", self.max_gross),
            ("max_net", self.max_net),
        ];
        for (name, limit) in limits {
            if matches!(limit, Some(v) if v <= Decimal::ZERO) {
                return invalid(format!("constraints.{name} must be positive"));
            }
        }
        if matches!(self.max_turnover, Some(v) if v < Decimal::ZERO) {
            return invalid("constraints.max_turnover must not be negative");
        }
        if self.max_positions == Some(0) {
            return invalid("constraints.max_positions must be at least 1");
        }
        Ok(())
    }
}

impl SizerConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        match self {
            SizerConfig::InverseVolatility { lookback } if *lookback < 2 => {
                invalid("inverse_volatility sizer needs a lookback of at least 2")
            }
            _ => Ok(()),
        }
    }

    pub fn lookback(&self) -> usize {
        match self {
            SizerConfig::InverseVolatility { lookback } => *lookback,
            _ => 0,
        }
    }
}

impl StrategyConfig {
    pub fn kind_name(&self) -> &'static str {
        match self {
            StrategyConfig::StaticUniverse(_) => "static_universe",
            StrategyConfig::SignalTopN(_) => "signal_top_n",
            StrategyConfig::LongShortTopN(_) => "long_short_top_n",
            StrategyConfig::Configured(_) => "configured",
            StrategyConfig::Composite(_) => "composite",
        }
    }

    fn validate(&self, broker: &BrokerConfig, inside_composite: bool) -> Result<(), ConfigError> {
        match self {
            StrategyConfig::StaticUniverse(p) => {
                if p.symbols.is_empty() {
                    return invalid("static_universe needs at least one symbol");
                }
                unique_symbols(&p.symbols)?;
                if let Some(weights) = &p.weights {
                    for (symbol, weight) in weights {
                        if !p.symbols.contains(symbol) {
                            return invalid(format!("weight given for {symbol}, which is not in symbols"));
                        }
                        if *weight < Decimal::ZERO && !broker.allow_short {
                            return invalid(format!(
                                "negative weight for {symbol} requires broker.allow_short"
                            ));
                        }
                    }
                }
                Ok(())
            }
            StrategyConfig::SignalTopN(p) => {
                non_empty("signal_top_n.column", &p.column)?;
                if p.top_n == 0 {
                    return invalid("signal_top_n.top_n must be at least 1");
                }
                Ok(())
            }
            StrategyConfig::LongShortTopN(p) => {
                non_empty("long_short_top_n.column", &p.column)?;
                if p.long_n == 0 && p.short_n == 0 {
                    return invalid("long_short_top_n needs long_n or short_n");
                }
                if p.long_exposure < Decimal::ZERO || p.short_exposure < Decimal::ZERO {
                    return invalid("long_short_top_n exposures must not be negative");
                }
                if p.short_n > 0 && !broker.allow_short {
                    return invalid("long_short_top_n with short_n > 0 requires broker.allow_short");
                }
                Ok(())
            }
            StrategyConfig::Configured(p) => p.validate(broker),
            StrategyConfig::Composite(p) => {
                if inside_composite {
                    return invalid("composite legs cannot themselves be composite");
                }
                if p.legs.is_empty() {
                    return invalid("composite needs at least one leg");
                }
                let mut names = BTreeSet::new();
                for leg in &p.legs {
                    non_empty("composite leg name", &leg.name)?;
                    if !names.insert(leg.name.as_str()) {
                        return invalid(format!("duplicate composite leg name {}", leg.name));
                    }
                    if leg.weight <= Decimal::ZERO {
                        return invalid(format!("composite leg {} needs a positive weight", leg.name));
                    }
                    leg.sizer.validate()?;
                    leg.strategy.validate(broker, true)?;
                }
                for (name, gross) in [("leg_gross", p.leg_gross), ("target_gross", p.target_gross)] {
                    if matches!(gross, Some(v) if v <= Decimal::ZERO) {
                        return invalid(format!("composite.{name} must be positive"));
                    }
                }
                Ok(())
            }
        }
    }

    fn collect_columns(&self, out: &mut BTreeSet<String>) {
        match self {
            StrategyConfig::StaticUniverse(_) => {}
            StrategyConfig::SignalTopN(p) => {
                out.insert(p.column.clone());
            }
            StrategyConfig::LongShortTopN(p) => {
                out.insert(p.column.clone());
            }
            StrategyConfig::Configured(p) => {
                if let UniverseConfig::Signal {
                    column,
                    required_columns,
                } = &p.universe
                {
                    out.insert(column.clone());
                    out.extend(required_columns.iter().cloned());
                }
                if let ScoreSource::Column { name } = &p.scoring.source {
                    out.insert(name.clone());
                }
            }
            StrategyConfig::Composite(p) => {
                for leg in &p.legs {
                    leg.strategy.collect_columns(out);
                }
            }
        }
    }

    fn collect_symbols(&self, out: &mut BTreeSet<String>) {
        match self {
            StrategyConfig::StaticUniverse(p) => out.extend(p.symbols.iter().cloned()),
            StrategyConfig::Configured(p) => {
                if let UniverseConfig::Static { symbols } = &p.universe {
                    out.extend(symbols.iter().cloned());
                }
            }
            StrategyConfig::Composite(p) => {
                for leg in &p.legs {
                    leg.strategy.collect_symbols(out);
                }
            }
            StrategyConfig::SignalTopN(_) | StrategyConfig::LongShortTopN(_) => {}
        }
    }
}

impl ConfiguredParams {
    fn validate(&self, broker: &BrokerConfig) -> Result<(), ConfigError> {
        match &self.universe {
            UniverseConfig::Static { symbols } => {
                if symbols.is_empty() {
                    return invalid("configured universe needs at least one symbol");
                }
                unique_symbols(symbols)?;
            }
            UniverseConfig::Signal { column, .. } => non_empty("universe.column", column)?,
        }
        match &self.scoring.source {
            ScoreSource::Column { name } => non_empty("scoring.source.name", name)?,
            ScoreSource::Momentum { lookback: 0 } => {
                return invalid("momentum scoring needs a lookback of at least 1");
            }
            _ => {}
        }
        if self.selection.top_n == 0 {
            return invalid("selection.top_n must be at least 1");
        }
        if self.selection.exposure <= Decimal::ZERO {
            return invalid("selection.exposure must be positive");
        }
        if self.selection.side == Side::Short && !broker.allow_short {
            return invalid("a short selection requires broker.allow_short");
        }
        if let HoldingConfig::Buffer { exit_rank } = self.holding {
            if exit_rank < self.selection.top_n {
                return invalid("holding.exit_rank must be at least selection.top_n");
            }
        }
        for rule in &self.exits {
            match rule {
                ExitRule::StopLoss { pct } if *pct <= Decimal::ZERO || *pct >= Decimal::ONE => {
                    return invalid("stop_loss.pct must be in (0, 1)");
                }
                ExitRule::MaxHoldingDays { days } if *days < 1 => {
                    return invalid("max_holding_days.days must be at least 1");
                }
                ExitRule::ScaleOut { gain_pct, factor } => {
                    if *gain_pct <= Decimal::ZERO {
                        return invalid("scale_out.gain_pct must be positive");
                    }
                    if *factor <= Decimal::ZERO || *factor >= Decimal::ONE {
                        return invalid("scale_out.factor must be in (0, 1)");
                    }
                }
                _ => {}
            }
        }
        for step in &self.postprocess {
            if let PostprocessConfig::Exposure { factor } = step {
                if *factor < Decimal::ZERO {
                    return invalid("postprocess exposure factor must not be negative");
                }
            }
        }
        Ok(())
    }
}

fn invalid<T>(message: impl Into<String>) -> Result<T, ConfigError> {
    Err(ConfigError::ValidationError(message.into()))
}

fn unit_interval(value: Decimal) -> bool {
    value >= Decimal::ZERO && value < Decimal::ONE
}

fn non_empty(field: &str, value: &str) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return invalid(format!("{field} must not be empty"));
    }
    Ok(())
}

fn unique_symbols(symbols: &[String]) -> Result<(), ConfigError> {
    let mut seen = BTreeSet::new();
    for symbol in symbols {
        non_empty("symbol", symbol)?;
        if !seen.insert(symbol.as_str()) {
            return invalid(format!("duplicate symbol {symbol}"));
        }
    }
    Ok(())
}
