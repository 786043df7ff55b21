use crate::error::JobError;
use crate::manager::JobManager;
use analytics::{
    AnalyticsError, ArtifactInfo, ArtifactStore, DailyMetric, DataSource, Page, PerformanceReport,
    TradeRow,
};
use configuration::{BacktestConfig, DocumentFormat, JobSettings, Settings};
use core_types::RunStatus;
use database::{Run, RunStore, StoreHandles, open_store, timestamp};
use market_data::{CsvDataSource, DataAccess};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Result of a readiness probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Readiness {
    pub ready: bool,
    pub backend: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// The service boundary: submission, status, and artifact reads.
#[derive(Clone)]
pub struct RunService {
    store: Arc<dyn RunStore>,
    manager: JobManager,
    artifacts: ArtifactStore,
}

impl RunService {
    /// Wires the service from settings: the configured store, the CSV data
    /// directory and the artifact roots.
    pub async fn from_settings(settings: &Settings) -> Result<Self, JobError> {
        let handles = open_store(&settings.store).await?;
        let data: Arc<dyn DataAccess> = Arc::new(CsvDataSource::new(&settings.data.root));
        let artifacts = ArtifactStore::from_settings(&settings.artifacts);
        Self::start(handles, data, artifacts, &settings.jobs).await
    }

    /// Reconciles runs a previous process left unfinished, then starts
    /// accepting work. Runs another live process holds a lease on are left
    /// alone.
    pub async fn start(
        handles: StoreHandles,
        data: Arc<dyn DataAccess>,
        artifacts: ArtifactStore,
        jobs: &JobSettings,
    ) -> Result<Self, JobError> {
        let store = Arc::clone(&handles.runs);
        let leases = Arc::clone(&handles.leases);
        let manager = JobManager::new(handles, data, artifacts.clone(), jobs);

        let live = leases.live(manager.owner()).await?;
        let reconciled = store.reconcile_interrupted(timestamp(), &live).await?;
        for run_id in &reconciled {
            tracing::warn!(run_id = %run_id, "Run was interrupted by a restart and is now failed");
        }
        if !live.run_ids.is_empty() {
            tracing::info!(count = live.run_ids.len(), "Left runs leased by other processes running");
        }
        Ok(Self {
            store,
            manager,
            artifacts,
        })
    }

    pub fn manager(&self) -> &JobManager {
        &self.manager
    }

    /// Parses, validates and queues a run document. Invalid documents are
    /// rejected before any run record exists.
    pub async fn submit(&self, document: &str, format: DocumentFormat) -> Result<Run, JobError> {
        let config = BacktestConfig::parse(document, format)?;
        self.submit_config(config).await
    }

    pub async fn submit_config(&self, config: BacktestConfig) -> Result<Run, JobError> {
        config.validate()?;
        let run = Run::queued(config);
        self.store.create(&run).await?;
        tracing::info!(run_id = %run.run_id, name = %run.name, strategy = %run.strategy_kind, "Run submitted");
        self.manager.enqueue(run.clone()).await;
        Ok(run)
    }

    pub async fn get_run(&self, run_id: &str) -> Result<Run, JobError> {
        self.store
            .get(run_id)
            .await?
            .ok_or_else(|| JobError::NotFound(run_id.to_string()))
    }

    /// All runs, oldest first, optionally limited to one status.
    pub async fn list_runs(&self, status: Option<RunStatus>) -> Result<Vec<Run>, JobError> {
        let runs = self.store.list().await?;
        Ok(match status {
            Some(status) => runs.into_iter().filter(|r| r.status == status).collect(),
            None => runs,
        })
    }

    /// Not ready whenever the store cannot be reached.
    pub async fn readiness(&self) -> Readiness {
        let backend = self.store.backend().to_string();
        match self.store.ping().await {
            Ok(()) => Readiness {
                ready: true,
                backend,
                detail: None,
            },
            Err(e) => {
                tracing::warn!(backend = %backend, error = %e, "Readiness check failed");
                Readiness {
                    ready: false,
                    backend,
                    detail: Some(e.to_string()),
                }
            }
        }
    }

    async fn completed_dir(&self, run_id: &str) -> Result<String, JobError> {
        let run = self.get_run(run_id).await?;
        match (run.status, run.artifact_dir) {
            (RunStatus::Completed, Some(dir)) => Ok(dir),
            (status, _) => Err(JobError::NotYetAvailable {
                run_id: run_id.to_string(),
                status,
            }),
        }
    }

    /// Artifact reads touch the filesystem, so they run on the blocking pool.
    async fn read_blocking<T, F>(&self, run_id: &str, read: F) -> Result<T, JobError>
    where
        T: Send + 'static,
        F: FnOnce(&ArtifactStore, &str) -> Result<T, AnalyticsError> + Send + 'static,
    {
        let dir = self.completed_dir(run_id).await?;
        let artifacts = self.artifacts.clone();
        tokio::task::spawn_blocking(move || read(&artifacts, &dir))
            .await
            .map_err(|e| JobError::Worker {
                run_id: run_id.to_string(),
                message: e.to_string(),
            })?
            .map_err(JobError::from)
    }

    pub async fn list_artifacts(&self, run_id: &str, source: DataSource) -> Result<Vec<ArtifactInfo>, JobError> {
        self.read_blocking(run_id, move |a, dir| a.list(dir, source)).await
    }

    pub async fn read_artifact(&self, run_id: &str, name: &str, source: DataSource) -> Result<Vec<u8>, JobError> {
        let name = name.to_string();
        self.read_blocking(run_id, move |a, dir| a.read(dir, &name, source)).await
    }

    pub async fn summary(&self, run_id: &str, source: DataSource) -> Result<PerformanceReport, JobError> {
        self.read_blocking(run_id, move |a, dir| a.summary(dir, source)).await
    }

    pub async fn trades(
        &self,
        run_id: &str,
        offset: usize,
        limit: usize,
        source: DataSource,
    ) -> Result<Page<TradeRow>, JobError> {
        self.read_blocking(run_id, move |a, dir| a.trades(dir, offset, limit, source))
            .await
    }

    pub async fn daily_metrics(
        &self,
        run_id: &str,
        offset: usize,
        limit: usize,
        source: DataSource,
    ) -> Result<Page<DailyMetric>, JobError> {
        self.read_blocking(run_id, move |a, dir| a.daily_metrics(dir, offset, limit, source))
            .await
    }

    /// Polls the store until the run is terminal. `timeout` of `None` waits
    /// indefinitely.
    pub async fn wait_for_terminal(
        &self,
        run_id: &str,
        poll: Duration,
        timeout: Option<Duration>,
    ) -> Result<Run, JobError> {
        let started = Instant::now();
        loop {
            let run = self.get_run(run_id).await?;
            if run.status.is_terminal() {
                return Ok(run);
            }
            if timeout.is_some_and(|t| started.elapsed() >= t) {
                return Err(JobError::Timeout(run_id.to_string()));
            }
            tokio::time::sleep(poll).await;
        }
    }

    /// Requests cooperative cancellation. A terminal run is returned unchanged.
    pub async fn cancel(&self, run_id: &str) -> Result<Run, JobError> {
        let run = self.get_run(run_id).await?;
        if !run.status.is_terminal() && !self.manager.cancel(run_id).await {
            tracing::warn!(run_id, status = %run.status, "Run is not tracked by this process; cannot cancel");
        }
        Ok(run)
    }
}
