use analytics::{ArtifactStore, DataSource};
use chrono::{Datelike, NaiveDate, Weekday};
use configuration::{DocumentFormat, JobSettings};
use core_types::{Bar, RunStatus};
use async_trait::async_trait;
use database::{
    FileRunStore, InProcessLeaseManager, LeaseManager, Run, RunStore, RunTransition,
    SqlLeaseManager, SqlRunStore, StoreError, StoreHandles, timestamp,
};
use jobs::{JobError, RunService};
use market_data::{DataAccess, InMemoryDataSource};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const POLL: Duration = Duration::from_millis(5);
const PATIENCE: Option<Duration> = Some(Duration::from_secs(60));

fn weekdays(start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
    start
        .iter_days()
        .take_while(|d| *d <= end)
        .filter(|d| !matches!(d.weekday(), Weekday::Sat | Weekday::Sun))
        .collect()
}

fn market(start: NaiveDate, end: NaiveDate) -> InMemoryDataSource {
    let days = weekdays(start, end);
    let series = |base: Decimal| -> Vec<(NaiveDate, Bar)> {
        days.iter()
            .enumerate()
            .map(|(i, d)| {
                let drift = Decimal::from((i % 7) as i64) - dec!(3);
                let open = base + drift;
                let close = open + dec!(0.5);
                let bar = Bar {
                    open,
                    high: close.max(open),
                    low: close.min(open),
                    close,
                    volume: dec!(1000),
                };
                (*d, bar)
            })
            .collect()
    };
    InMemoryDataSource::new()
        .with_bars("AAA", series(dec!(50)))
        .with_bars("BBB", series(dec!(80)))
}

fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn document(symbols: &str, start: &str, end: &str, frequency: &str) -> String {
    format!(
        r#"{{
            "start_date": "{start}",
            "end_date": "{end}",
            "initial_cash": "100000",
            "rebalance": {{ "frequency": "{frequency}" }},
            "strategy": {{ "kind": "static_universe", "symbols": [{symbols}] }},
            "broker": {{ "commission_pct": "0.001" }}
        }}"#
    )
}

fn six_months() -> String {
    document(r#""AAA", "BBB""#, "2024-01-01", "2024-06-28", "monthly")
}

struct Harness {
    _dir: TempDir,
    service: RunService,
    runs: Arc<dyn RunStore>,
    leases: Arc<dyn LeaseManager>,
}

async fn harness(data: InMemoryDataSource, max_concurrency: usize) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    harness_in(dir, data, max_concurrency).await
}

async fn harness_in(dir: TempDir, data: InMemoryDataSource, max_concurrency: usize) -> Harness {
    let runs: Arc<dyn RunStore> =
        Arc::new(FileRunStore::open(dir.path().join("runs.json")).await.unwrap());
    let leases: Arc<dyn LeaseManager> = Arc::new(InProcessLeaseManager::new());
    let handles = StoreHandles {
        runs: Arc::clone(&runs),
        leases: Arc::clone(&leases),
    };
    let data: Arc<dyn DataAccess> = Arc::new(data);
    let settings = JobSettings {
        max_concurrency,
        lease_ttl_secs: 30,
        owner: Some("test-worker".into()),
    };
    let service = RunService::start(handles, data, ArtifactStore::new(dir.path().join("artifacts")), &settings)
        .await
        .unwrap();
    Harness {
        _dir: dir,
        service,
        runs,
        leases,
    }
}

#[tokio::test]
async fn submitted_run_completes_and_serves_artifacts() {
    let h = harness(market(ymd(2024, 1, 1), ymd(2024, 6, 28)), 2).await;
    let run = h.service.submit(&six_months(), DocumentFormat::Json).await.unwrap();
    assert_eq!(run.status, RunStatus::Queued);

    let done = h.service.wait_for_terminal(&run.run_id, POLL, PATIENCE).await.unwrap();
    assert_eq!(done.status, RunStatus::Completed, "error: {:?}", done.error);
    assert!(done.started_at.is_some() && done.completed_at.is_some());
    assert!(done.started_at <= done.completed_at);

    let names: Vec<String> = h
        .service
        .list_artifacts(&run.run_id, DataSource::Local)
        .await
        .unwrap()
        .into_iter()
        .map(|a| a.name)
        .collect();
    assert!(names.contains(&"summary.json".to_string()));
    assert!(names.contains(&"trades.csv".to_string()));

    let summary = h.service.summary(&run.run_id, DataSource::Local).await.unwrap();
    assert_eq!(summary.initial_equity, dec!(100000));
    assert!(summary.trade_count > 0);

    let trades = h.service.trades(&run.run_id, 0, 1, DataSource::Local).await.unwrap();
    assert_eq!(trades.items.len(), 1);
    assert_eq!(trades.total, summary.trade_count);

    let metrics = h.service.daily_metrics(&run.run_id, 0, 1000, DataSource::Local).await.unwrap();
    assert_eq!(metrics.total, summary.trading_days);

    assert!(matches!(
        h.service.read_artifact(&run.run_id, "nope.csv", DataSource::Local).await,
        Err(JobError::Artifacts(_))
    ));
}

#[tokio::test]
async fn invalid_documents_never_create_runs() {
    let h = harness(InMemoryDataSource::new(), 1).await;
    let backwards = document(r#""AAA""#, "2024-06-28", "2024-01-01", "monthly");
    assert!(matches!(
        h.service.submit(&backwards, DocumentFormat::Json).await,
        Err(JobError::Config(_))
    ));
    let unknown_kind = r#"{
        "start_date": "2024-01-01", "end_date": "2024-02-01", "initial_cash": "1",
        "rebalance": { "frequency": "monthly" },
        "strategy": { "kind": "astrology" }
    }"#;
    assert!(matches!(
        h.service.submit(unknown_kind, DocumentFormat::Json).await,
        Err(JobError::Config(_))
    ));
    assert!(h.service.list_runs(None).await.unwrap().is_empty());
}

#[tokio::test]
async fn missing_data_fails_the_run_with_its_error() {
    let h = harness(market(ymd(2024, 1, 1), ymd(2024, 6, 28)), 1).await;
    let doc = document(r#""AAA", "ZZZ""#, "2024-01-01", "2024-06-28", "monthly");
    let run = h.service.submit(&doc, DocumentFormat::Json).await.unwrap();

    let done = h.service.wait_for_terminal(&run.run_id, POLL, PATIENCE).await.unwrap();
    assert_eq!(done.status, RunStatus::Failed);
    assert!(done.error.as_deref().unwrap_or_default().contains("ZZZ"));

    assert!(matches!(
        h.service.trades(&run.run_id, 0, 10, DataSource::Local).await,
        Err(JobError::NotYetAvailable { status: RunStatus::Failed, .. })
    ));
}

#[tokio::test]
async fn pool_bound_and_status_order_hold_under_load() {
    let h = harness(market(ymd(2022, 1, 3), ymd(2024, 6, 28)), 1).await;
    let doc = document(r#""AAA", "BBB""#, "2022-01-03", "2024-06-28", "daily");
    let mut ids = Vec::new();
    for _ in 0..3 {
        ids.push(h.service.submit(&doc, DocumentFormat::Json).await.unwrap().run_id);
    }

    let rank = |s: RunStatus| match s {
        RunStatus::Queued => 0,
        RunStatus::Running => 1,
        RunStatus::Completed | RunStatus::Failed => 2,
    };
    let mut last: HashMap<String, RunStatus> = HashMap::new();
    loop {
        let runs = h.service.list_runs(None).await.unwrap();
        let running = runs.iter().filter(|r| r.status == RunStatus::Running).count();
        assert!(running <= 1, "{running} runs executing with a pool of one");
        assert!(h.service.manager().active() <= 1);

        for run in &runs {
            if let Some(previous) = last.get(&run.run_id) {
                assert!(rank(*previous) <= rank(run.status), "{previous} -> {}", run.status);
                if previous.is_terminal() {
                    assert_eq!(*previous, run.status, "left a terminal state");
                }
            }
            last.insert(run.run_id.clone(), run.status);
        }
        if runs.iter().all(|r| r.status.is_terminal()) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    for id in ids {
        assert_eq!(last[&id], RunStatus::Completed);
    }
}

#[tokio::test]
async fn cancelled_runs_fail_with_a_reason() {
    let h = harness(market(ymd(2000, 1, 3), ymd(2023, 12, 29)), 1).await;
    let doc = document(r#""AAA", "BBB""#, "2000-01-03", "2023-12-29", "daily");
    let first = h.service.submit(&doc, DocumentFormat::Json).await.unwrap();
    let second = h.service.submit(&doc, DocumentFormat::Json).await.unwrap();
    h.service.cancel(&second.run_id).await.unwrap();

    let cancelled = h.service.wait_for_terminal(&second.run_id, POLL, PATIENCE).await.unwrap();
    assert_eq!(cancelled.status, RunStatus::Failed);
    assert!(cancelled.error.unwrap().to_lowercase().contains("cancelled"));

    let finished = h.service.wait_for_terminal(&first.run_id, POLL, PATIENCE).await.unwrap();
    assert_eq!(finished.status, RunStatus::Completed);

    // Cancelling a terminal run changes nothing.
    let again = h.service.cancel(&first.run_id).await.unwrap();
    assert_eq!(again.status, RunStatus::Completed);
}

#[tokio::test]
async fn startup_fails_runs_left_by_a_previous_process() {
    let dir = tempfile::tempdir().unwrap();
    {
        let store = FileRunStore::open(dir.path().join("runs.json")).await.unwrap();
        let config = configuration::BacktestConfig::parse(&six_months(), DocumentFormat::Json).unwrap();
        let running = Run::queued(config.clone());
        store.create(&running).await.unwrap();
        store
            .update(&running.run_id, RunTransition::Start { at: timestamp() })
            .await
            .unwrap();
        store.create(&Run::queued(config)).await.unwrap();
    }

    let h = harness_in(dir, InMemoryDataSource::new(), 1).await;
    let runs = h.service.list_runs(None).await.unwrap();
    assert_eq!(runs.len(), 2);
    for run in runs {
        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.error.as_deref(), Some(database::INTERRUPTED_ERROR));
    }
}

#[tokio::test]
async fn artifacts_are_not_served_before_completion() {
    let h = harness(InMemoryDataSource::new(), 1).await;
    let config = configuration::BacktestConfig::parse(&six_months(), DocumentFormat::Json).unwrap();
    let run = Run::queued(config);
    h.runs.create(&run).await.unwrap();

    for result in [
        h.service.read_artifact(&run.run_id, "summary.json", DataSource::Local).await.map(|_| ()),
        h.service.list_artifacts(&run.run_id, DataSource::Local).await.map(|_| ()),
    ] {
        assert!(matches!(
            result,
            Err(JobError::NotYetAvailable { status: RunStatus::Queued, .. })
        ));
    }
    assert!(matches!(
        h.service.get_run("no-such-run").await,
        Err(JobError::NotFound(_))
    ));
}

#[tokio::test]
async fn a_run_leased_elsewhere_waits_for_the_lease_to_expire() {
    let h = harness(market(ymd(2024, 1, 1), ymd(2024, 6, 28)), 1).await;
    let config = configuration::BacktestConfig::parse(&six_months(), DocumentFormat::Json).unwrap();
    let run = Run::queued(config);
    h.runs.create(&run).await.unwrap();
    h.leases
        .acquire(&run.run_id, "another-process", Duration::from_millis(300))
        .await
        .unwrap();

    h.service.manager().enqueue(run.clone()).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(h.service.get_run(&run.run_id).await.unwrap().status, RunStatus::Queued);

    // The other holder never renews, so this worker takes the run over.
    let done = h.service.wait_for_terminal(&run.run_id, POLL, PATIENCE).await.unwrap();
    assert_eq!(done.status, RunStatus::Completed, "error: {:?}", done.error);
}

#[tokio::test]
async fn a_run_started_by_its_lease_holder_is_left_to_it() {
    let h = harness(market(ymd(2024, 1, 1), ymd(2024, 6, 28)), 1).await;
    let config = configuration::BacktestConfig::parse(&six_months(), DocumentFormat::Json).unwrap();
    let run = Run::queued(config);
    h.runs.create(&run).await.unwrap();
    h.leases
        .acquire(&run.run_id, "another-process", Duration::from_secs(60))
        .await
        .unwrap();

    h.service.manager().enqueue(run.clone()).await;
    h.runs
        .update(&run.run_id, RunTransition::Start { at: timestamp() })
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;

    // Still the holder's: neither executed nor failed here.
    let stored = h.service.get_run(&run.run_id).await.unwrap();
    assert_eq!(stored.status, RunStatus::Running);
    assert_eq!(stored.error, None);
    assert_eq!(h.service.manager().active(), 0);
}

/// Refuses every `Start` write; everything else goes to the file store.
struct StartRefused(FileRunStore);

#[async_trait]
impl RunStore for StartRefused {
    fn backend(&self) -> &'static str {
        self.0.backend()
    }

    async fn create(&self, run: &Run) -> Result<(), StoreError> {
        self.0.create(run).await
    }

    async fn update(&self, run_id: &str, transition: RunTransition) -> Result<Run, StoreError> {
        match transition {
            RunTransition::Start { .. } => Err(StoreError::Unavailable("disk full".into())),
            other => self.0.update(run_id, other).await,
        }
    }

    async fn get(&self, run_id: &str) -> Result<Option<Run>, StoreError> {
        self.0.get(run_id).await
    }

    async fn list(&self) -> Result<Vec<Run>, StoreError> {
        self.0.list().await
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.0.ping().await
    }
}

#[tokio::test]
async fn a_run_that_cannot_be_started_fails_with_the_store_error() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileRunStore::open(dir.path().join("runs.json")).await.unwrap();
    let handles = StoreHandles {
        runs: Arc::new(StartRefused(store)),
        leases: Arc::new(InProcessLeaseManager::new()),
    };
    let service = RunService::start(
        handles,
        Arc::new(market(ymd(2024, 1, 1), ymd(2024, 6, 28))),
        ArtifactStore::new(dir.path().join("artifacts")),
        &JobSettings::default(),
    )
    .await
    .unwrap();

    let run = service.submit(&six_months(), DocumentFormat::Json).await.unwrap();
    let done = service.wait_for_terminal(&run.run_id, POLL, PATIENCE).await.unwrap();
    assert_eq!(done.status, RunStatus::Failed);
    let error = done.error.unwrap();
    assert!(error.contains("could not start run") && error.contains("disk full"), "{error}");
}

async fn sql_process(url: &str, root: &Path, data: InMemoryDataSource, owner: &str) -> RunService {
    let store = SqlRunStore::open(url).await.unwrap();
    let leases = SqlLeaseManager::new(store.pool().clone());
    let handles = StoreHandles {
        runs: Arc::new(store),
        leases: Arc::new(leases),
    };
    let settings = JobSettings {
        max_concurrency: 1,
        lease_ttl_secs: 30,
        owner: Some(owner.into()),
    };
    RunService::start(handles, Arc::new(data), ArtifactStore::new(root.join("artifacts")), &settings)
        .await
        .unwrap()
}

#[tokio::test]
async fn starting_a_second_process_spares_runs_the_first_one_holds() {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}?mode=rwc", dir.path().join("runs.db").display());
    let data = market(ymd(2000, 1, 3), ymd(2023, 12, 29));
    let doc = document(r#""AAA", "BBB""#, "2000-01-03", "2023-12-29", "daily");

    let first = sql_process(&url, dir.path(), data.clone(), "process-a").await;
    let running = first.submit(&doc, DocumentFormat::Json).await.unwrap();
    let waiting = first.submit(&doc, DocumentFormat::Json).await.unwrap();
    let started = std::time::Instant::now();
    while first.get_run(&running.run_id).await.unwrap().status == RunStatus::Queued {
        assert!(started.elapsed() < Duration::from_secs(60), "run never started");
        tokio::time::sleep(POLL).await;
    }

    let second = sql_process(&url, dir.path(), data, "process-b").await;
    for run_id in [&running.run_id, &waiting.run_id] {
        let run = second.get_run(run_id).await.unwrap();
        assert_ne!(run.error.as_deref(), Some(database::INTERRUPTED_ERROR), "{run_id} was reconciled");
    }

    for run_id in [&running.run_id, &waiting.run_id] {
        let done = first.wait_for_terminal(run_id, POLL, PATIENCE).await.unwrap();
        assert_eq!(done.status, RunStatus::Completed, "error: {:?}", done.error);
    }
}

#[tokio::test]
async fn readiness_reports_an_unreachable_store() {
    let dir = tempfile::tempdir().unwrap();
    let state = dir.path().join("state");
    std::fs::create_dir_all(&state).unwrap();
    let runs: Arc<dyn RunStore> = Arc::new(FileRunStore::open(state.join("runs.json")).await.unwrap());
    let handles = StoreHandles {
        runs,
        leases: Arc::new(InProcessLeaseManager::new()),
    };
    let service = RunService::start(
        handles,
        Arc::new(InMemoryDataSource::new()),
        ArtifactStore::new(dir.path().join("artifacts")),
        &JobSettings::default(),
    )
    .await
    .unwrap();
    assert!(service.readiness().await.ready);

    std::fs::remove_dir_all(&state).unwrap();
    let readiness = service.readiness().await;
    assert!(!readiness.ready);
    assert_eq!(readiness.backend, "file");
    assert!(readiness.detail.is_some());
}
