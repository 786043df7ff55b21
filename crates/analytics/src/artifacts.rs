use crate::engine::AnalyticsEngine;
use crate::error::AnalyticsError;
use crate::report::{
    BlendedWeightRow, CsvRow, DailyMetric, LegWeightRow, PerformanceReport, TradeRow,
};
use backtester::BacktestResult;
use configuration::{ArtifactSettings, OutputConfig, ReplicaPolicy};
use core_types::DecisionKind;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

pub const SUMMARY: &str = "summary.json";
pub const DAILY_METRICS: &str = "daily_metrics.csv";
pub const TRADES: &str = "trades.csv";
pub const MONTHLY_RETURNS: &str = "monthly_returns.csv";
pub const LEG_WEIGHTS: &str = "leg_weights.csv";
pub const BLENDED_WEIGHTS: &str = "blended_weights.csv";
pub const DEBUG_TRACES: &str = "debug_traces.jsonl";

/// Every file name a run directory may contain, in listing order.
pub const ARTIFACT_NAMES: [&str; 7] = [
    SUMMARY,
    DAILY_METRICS,
    TRADES,
    MONTHLY_RETURNS,
    LEG_WEIGHTS,
    BLENDED_WEIGHTS,
    DEBUG_TRACES,
];

const PARTIAL_SUFFIX: &str = ".partial";

/// Which copy of the artifacts a read goes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataSource {
    #[default]
    Local,
    Remote,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactInfo {
    pub name: String,
    pub size: u64,
}

/// One page of a tabular artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub total: usize,
    pub offset: usize,
    pub items: Vec<T>,
}

/// Writes and reads the per-run artifact directories.
///
/// A run's files are written into `<root>/<run_id>.partial` and renamed to
/// `<root>/<run_id>` once complete, so readers never see a half-written set.
/// When a remote root is configured the published directory is mirrored
/// there the same way.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
    remote_root: Option<PathBuf>,
    replica_policy: ReplicaPolicy,
    engine: std::sync::Arc<AnalyticsEngine>,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            remote_root: None,
            replica_policy: ReplicaPolicy::default(),
            engine: std::sync::Arc::new(AnalyticsEngine::new()),
        }
    }

    pub fn from_settings(settings: &ArtifactSettings) -> Self {
        let store = Self::new(&settings.root);
        match &settings.remote_root {
            Some(remote) => store.with_remote(remote, settings.replica_policy),
            None => store,
        }
    }

    pub fn with_remote(mut self, remote_root: impl Into<PathBuf>, policy: ReplicaPolicy) -> Self {
        self.remote_root = Some(remote_root.into());
        self.replica_policy = policy;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn run_dir(&self, run_id: &str) -> PathBuf {
        self.root.join(run_id)
    }

    /// Computes the summary and writes every artifact for a finished run.
    pub fn publish(
        &self,
        run_id: &str,
        result: &BacktestResult,
        output: &OutputConfig,
    ) -> Result<PerformanceReport, AnalyticsError> {
        check_run_id(run_id)?;
        let final_dir = self.run_dir(run_id);
        if final_dir.exists() {
            return Err(AnalyticsError::AlreadyPublished(run_id.to_string()));
        }
        let partial = self.root.join(format!("{run_id}{PARTIAL_SUFFIX}"));
        if partial.exists() {
            fs::remove_dir_all(&partial).map_err(AnalyticsError::io(&partial))?;
        }
        fs::create_dir_all(&partial).map_err(AnalyticsError::io(&partial))?;

        // --- 1. Summary and the always-present tables ---
        let report = self
            .engine
            .calculate(&result.records, result.initial_cash, &result.strategy_kind)?;
        write_json(&partial.join(SUMMARY), &report)?;
        write_csv(
            &partial.join(DAILY_METRICS),
            &self.engine.daily_metrics(&result.records, result.initial_cash),
        )?;
        write_csv(&partial.join(TRADES), &trade_rows(result))?;
        write_csv(
            &partial.join(MONTHLY_RETURNS),
            &self.engine.monthly_returns(&result.records, result.initial_cash),
        )?;

        // --- 2. Pipeline and blend detail ---
        let detailed = matches!(result.strategy_kind.as_str(), "configured" | "composite");
        if result.decisions.iter().any(|d| !d.legs.is_empty()) {
            write_csv(&partial.join(LEG_WEIGHTS), &leg_rows(result))?;
        }
        if detailed {
            write_csv(&partial.join(BLENDED_WEIGHTS), &blended_rows(result))?;
            if output.debug_traces {
                write_jsonl(&partial.join(DEBUG_TRACES), &result.traces)?;
            }
        }

        // --- 3. Publish ---
        fs::rename(&partial, &final_dir).map_err(AnalyticsError::io(&final_dir))?;
        tracing::info!(run_id, dir = %final_dir.display(), "Artifacts published");

        self.mirror(run_id)?;
        Ok(report)
    }

    /// Copies a published run directory to the remote root, honouring the
    /// replica policy on failure.
    fn mirror(&self, run_id: &str) -> Result<(), AnalyticsError> {
        let Some(remote_root) = &self.remote_root else {
            return Ok(());
        };
        match copy_run(&self.run_dir(run_id), remote_root, run_id) {
            Ok(()) => {
                tracing::debug!(run_id, remote = %remote_root.display(), "Artifacts mirrored");
                Ok(())
            }
            Err(e) => match self.replica_policy {
                ReplicaPolicy::BestEffort => {
                    tracing::warn!(run_id, error = %e, "Artifact mirror failed; local copy is authoritative");
                    Ok(())
                }
                ReplicaPolicy::Required => Err(AnalyticsError::Mirror(e.to_string())),
            },
        }
    }

    fn dir_for(&self, run_id: &str, source: DataSource) -> Result<PathBuf, AnalyticsError> {
        check_run_id(run_id)?;
        let base = match source {
            DataSource::Local => &self.root,
            DataSource::Remote => self.remote_root.as_ref().ok_or(AnalyticsError::NoRemote)?,
        };
        let dir = base.join(run_id);
        if !dir.is_dir() {
            return Err(AnalyticsError::NotFound(format!("artifacts for run {run_id}")));
        }
        Ok(dir)
    }

    pub fn list(&self, run_id: &str, source: DataSource) -> Result<Vec<ArtifactInfo>, AnalyticsError> {
        let dir = self.dir_for(run_id, source)?;
        let mut artifacts = Vec::new();
        for name in ARTIFACT_NAMES {
            let path = dir.join(name);
            if let Ok(meta) = fs::metadata(&path) {
                artifacts.push(ArtifactInfo {
                    name: name.to_string(),
                    size: meta.len(),
                });
            }
        }
        Ok(artifacts)
    }

    /// Reads an artifact by its stable name.
    pub fn read(&self, run_id: &str, name: &str, source: DataSource) -> Result<Vec<u8>, AnalyticsError> {
        if !ARTIFACT_NAMES.contains(&name) {
            return Err(AnalyticsError::UnknownArtifact(name.to_string()));
        }
        let path = self.dir_for(run_id, source)?.join(name);
        match fs::read(&path) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(AnalyticsError::NotFound(format!("{name} for run {run_id}")))
            }
            Err(e) => Err(AnalyticsError::Io { path, source: e }),
        }
    }

    pub fn summary(&self, run_id: &str, source: DataSource) -> Result<PerformanceReport, AnalyticsError> {
        let bytes = self.read(run_id, SUMMARY, source)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub fn trades(
        &self,
        run_id: &str,
        offset: usize,
        limit: usize,
        source: DataSource,
    ) -> Result<Page<TradeRow>, AnalyticsError> {
        self.page(run_id, TRADES, offset, limit, source)
    }

    pub fn daily_metrics(
        &self,
        run_id: &str,
        offset: usize,
        limit: usize,
        source: DataSource,
    ) -> Result<Page<DailyMetric>, AnalyticsError> {
        self.page(run_id, DAILY_METRICS, offset, limit, source)
    }

    fn page<T: DeserializeOwned>(
        &self,
        run_id: &str,
        name: &str,
        offset: usize,
        limit: usize,
        source: DataSource,
    ) -> Result<Page<T>, AnalyticsError> {
        let bytes = self.read(run_id, name, source)?;
        let mut reader = csv::Reader::from_reader(bytes.as_slice());
        let mut total = 0;
        let mut items = Vec::new();
        for row in reader.deserialize::<T>() {
            let row = row?;
            if total >= offset && items.len() < limit {
                items.push(row);
            }
            total += 1;
        }
        Ok(Page {
            total,
            offset,
            items,
        })
    }
}

/// Run ids become directory names; anything but `[A-Za-z0-9_-]` is refused.
fn check_run_id(run_id: &str) -> Result<(), AnalyticsError> {
    let valid = !run_id.is_empty()
        && run_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(AnalyticsError::NotFound(format!("artifacts for run {run_id}")))
    }
}

fn trade_rows(result: &BacktestResult) -> Vec<TradeRow> {
    result
        .records
        .iter()
        .flat_map(|r| &r.fills)
        .map(|f| TradeRow {
            date: f.date,
            symbol: f.symbol.clone(),
            side: f.side,
            quantity: f.quantity,
            price: f.price,
            reference_price: f.reference_price,
            commission: f.commission,
            slippage: f.slippage,
        })
        .collect()
}

fn leg_rows(result: &BacktestResult) -> Vec<LegWeightRow> {
    let mut rows = Vec::new();
    for decision in &result.decisions {
        for leg in &decision.legs {
            let symbols: BTreeSet<&String> = leg.pre.keys().chain(leg.post.keys()).collect();
            for symbol in symbols {
                rows.push(LegWeightRow {
                    date: decision.date,
                    leg: leg.leg.clone(),
                    symbol: symbol.clone(),
                    pre: leg.pre.get(symbol).copied().unwrap_or_default(),
                    post: leg.post.get(symbol).copied().unwrap_or_default(),
                });
            }
        }
    }
    rows
}

fn blended_rows(result: &BacktestResult) -> Vec<BlendedWeightRow> {
    let mut rows = Vec::new();
    for decision in result.decisions.iter().filter(|d| d.kind == DecisionKind::Rebalance) {
        let symbols: BTreeSet<&String> = decision
            .pre_constraint
            .keys()
            .chain(decision.post_constraint.keys())
            .collect();
        for symbol in symbols {
            rows.push(BlendedWeightRow {
                date: decision.date,
                symbol: symbol.clone(),
                pre: decision.pre_constraint.get(symbol).copied().unwrap_or_default(),
                post: decision.post_constraint.get(symbol).copied().unwrap_or_default(),
            });
        }
    }
    rows
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), AnalyticsError> {
    let file = fs::File::create(path).map_err(AnalyticsError::io(path))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, value)?;
    writer.flush().map_err(AnalyticsError::io(path))
}

fn write_jsonl<T: Serialize>(path: &Path, values: &[T]) -> Result<(), AnalyticsError> {
    let file = fs::File::create(path).map_err(AnalyticsError::io(path))?;
    let mut writer = BufWriter::new(file);
    for value in values {
        serde_json::to_writer(&mut writer, value)?;
        writer.write_all(b"\n").map_err(AnalyticsError::io(path))?;
    }
    writer.flush().map_err(AnalyticsError::io(path))
}

fn write_csv<T: CsvRow>(path: &Path, rows: &[T]) -> Result<(), AnalyticsError> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_path(path)?;
    writer.write_record(T::HEADERS)?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush().map_err(AnalyticsError::io(path))
}

fn copy_run(source: &Path, remote_root: &Path, run_id: &str) -> std::io::Result<()> {
    let target = remote_root.join(run_id);
    if target.exists() {
        return Ok(());
    }
    let partial = remote_root.join(format!("{run_id}{PARTIAL_SUFFIX}"));
    if partial.exists() {
        fs::remove_dir_all(&partial)?;
    }
    fs::create_dir_all(&partial)?;
    for entry in fs::read_dir(source)? {
        let entry = entry?;
        fs::copy(entry.path(), partial.join(entry.file_name()))?;
    }
    fs::rename(&partial, &target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use core_types::{
        DailyRecord, DecisionRecord, DecisionTrace, Fill, LegWeights, OrderSide, PortfolioSnapshot,
        Weights,
    };
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    fn result(kind: &str) -> BacktestResult {
        let fill = Fill {
            date: day(3),
            symbol: "AAA".into(),
            side: OrderSide::Buy,
            quantity: dec!(10),
            price: dec!(10.5),
            reference_price: dec!(10),
            commission: dec!(1),
            slippage: dec!(5),
        };
        let record = |d: u32, equity: Decimal, fills: Vec<Fill>| DailyRecord {
            date: day(d),
            equity,
            cash: equity,
            gross_exposure: Decimal::ZERO,
            net_exposure: Decimal::ZERO,
            commission: fills.iter().map(|f| f.commission).sum(),
            slippage: fills.iter().map(|f| f.slippage).sum(),
            positions: 0,
            fills,
        };
        let weights = Weights::from([("AAA".to_string(), dec!(1))]);
        BacktestResult {
            strategy_kind: kind.to_string(),
            initial_cash: dec!(1000),
            records: vec![
                record(2, dec!(1000), vec![]),
                record(3, dec!(990), vec![fill]),
                record(4, dec!(1010), vec![]),
            ],
            decisions: vec![DecisionRecord {
                date: day(2),
                kind: DecisionKind::Rebalance,
                pre_constraint: weights.clone(),
                post_constraint: weights.clone(),
                scales: Default::default(),
                adjustments: vec![],
                legs: vec![LegWeights {
                    leg: "only".into(),
                    pre: weights.clone(),
                    post: weights,
                }],
            }],
            traces: vec![DecisionTrace {
                date: Some(day(2)),
                universe: vec!["AAA".into()],
                ..DecisionTrace::default()
            }],
            final_snapshot: PortfolioSnapshot::empty(day(4), dec!(1010)),
        }
    }

    #[test]
    fn publishes_every_artifact_for_a_composite_run() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let report = store
            .publish("run-1", &result("composite"), &OutputConfig::default())
            .unwrap();
        assert_eq!(report.trade_count, 1);
        assert_eq!(report.final_equity, dec!(1010));

        let names: Vec<String> = store
            .list("run-1", DataSource::Local)
            .unwrap()
            .into_iter()
            .map(|a| a.name)
            .collect();
        assert_eq!(names, ARTIFACT_NAMES.to_vec());
        assert!(!dir.path().join("run-1.partial").exists());

        let traces = String::from_utf8(store.read("run-1", DEBUG_TRACES, DataSource::Local).unwrap()).unwrap();
        assert_eq!(traces.lines().count(), 1);
        assert_eq!(store.summary("run-1", DataSource::Local).unwrap(), report);
    }

    #[test]
    fn simple_strategies_only_get_the_core_tables() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let mut plain = result("static_universe");
        plain.decisions[0].legs.clear();
        store.publish("run-2", &plain, &OutputConfig::default()).unwrap();

        let names: Vec<String> = store
            .list("run-2", DataSource::Local)
            .unwrap()
            .into_iter()
            .map(|a| a.name)
            .collect();
        assert_eq!(names, vec![SUMMARY, DAILY_METRICS, TRADES, MONTHLY_RETURNS]);
    }

    #[test]
    fn paging_reads_trade_and_metric_rows() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        store
            .publish("run-3", &result("static_universe"), &OutputConfig::default())
            .unwrap();

        let trades = store.trades("run-3", 0, 10, DataSource::Local).unwrap();
        assert_eq!(trades.total, 1);
        assert_eq!(trades.items[0].symbol, "AAA");
        assert_eq!(trades.items[0].side, OrderSide::Buy);
        assert_eq!(trades.items[0].price, dec!(10.5));

        let metrics = store.daily_metrics("run-3", 1, 1, DataSource::Local).unwrap();
        assert_eq!(metrics.total, 3);
        assert_eq!(metrics.items.len(), 1);
        assert_eq!(metrics.items[0].date, day(3));
    }

    #[test]
    fn unknown_names_and_missing_runs_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        assert!(matches!(
            store.read("run-x", "../secrets", DataSource::Local),
            Err(AnalyticsError::UnknownArtifact(_))
        ));
        assert!(matches!(
            store.read("run-x", TRADES, DataSource::Local),
            Err(AnalyticsError::NotFound(_))
        ));
        assert!(matches!(
            store.read("../run", TRADES, DataSource::Local),
            Err(AnalyticsError::NotFound(_))
        ));
    }

    #[test]
    fn publishing_twice_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        store.publish("run-4", &result("static_universe"), &OutputConfig::default()).unwrap();
        assert!(matches!(
            store.publish("run-4", &result("static_universe"), &OutputConfig::default()),
            Err(AnalyticsError::AlreadyPublished(_))
        ));
    }

    #[test]
    fn remote_mirror_is_readable_and_failures_follow_the_policy() {
        let local = tempfile::tempdir().unwrap();
        let remote = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(local.path()).with_remote(remote.path(), ReplicaPolicy::Required);
        store.publish("run-5", &result("static_universe"), &OutputConfig::default()).unwrap();
        let page = store.trades("run-5", 0, 5, DataSource::Remote).unwrap();
        assert_eq!(page.total, 1);

        // A file where the remote root should be makes the copy fail.
        let blocker = remote.path().join("not-a-dir");
        fs::write(&blocker, b"x").unwrap();
        let best_effort = ArtifactStore::new(local.path()).with_remote(&blocker, ReplicaPolicy::BestEffort);
        assert!(best_effort.publish("run-6", &result("static_universe"), &OutputConfig::default()).is_ok());

        let required = ArtifactStore::new(local.path()).with_remote(&blocker, ReplicaPolicy::Required);
        assert!(matches!(
            required.publish("run-7", &result("static_universe"), &OutputConfig::default()),
            Err(AnalyticsError::Mirror(_))
        ));
    }
}
