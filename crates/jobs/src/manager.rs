use crate::error::JobError;
use analytics::ArtifactStore;
use backtester::run_backtest;
use configuration::JobSettings;
use core_types::RunStatus;
use database::{Lease, LeaseManager, Run, RunStore, RunTransition, StoreError, StoreHandles, timestamp};
use market_data::DataAccess;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore, watch};

/// First wait before retrying a lease another worker holds.
const CLAIM_BACKOFF: Duration = Duration::from_millis(50);

/// Executes runs on a bounded pool of blocking workers.
///
/// A run is claimed with a lease on its id as soon as it is enqueued, so the
/// claim covers the wait for a worker as well as execution. Once a pool
/// permit is free the run moves to `running`. Whatever happens inside the
/// worker, the run leaves `running` through `completed` or `failed` before
/// the lease is released.
#[derive(Clone)]
pub struct JobManager {
    inner: Arc<Inner>,
}

struct Inner {
    store: Arc<dyn RunStore>,
    leases: Arc<dyn LeaseManager>,
    data: Arc<dyn DataAccess>,
    artifacts: ArtifactStore,
    permits: Arc<Semaphore>,
    max_concurrency: usize,
    owner: String,
    lease_ttl: Duration,
    cancels: Mutex<HashMap<String, Arc<watch::Sender<bool>>>>,
}

/// How the wait for a worker ended.
enum Slot {
    Worker(OwnedSemaphorePermit),
    Cancelled,
    Closed,
}

impl JobManager {
    pub fn new(
        handles: StoreHandles,
        data: Arc<dyn DataAccess>,
        artifacts: ArtifactStore,
        settings: &JobSettings,
    ) -> Self {
        let max_concurrency = settings.max_concurrency.max(1);
        let owner = settings
            .owner
            .clone()
            .unwrap_or_else(|| format!("meridian-{}", uuid::Uuid::new_v4()));
        tracing::info!(max_concurrency, owner = %owner, "Job manager ready");
        Self {
            inner: Arc::new(Inner {
                store: handles.runs,
                leases: handles.leases,
                data,
                artifacts,
                permits: Arc::new(Semaphore::new(max_concurrency)),
                max_concurrency,
                owner,
                lease_ttl: Duration::from_secs(settings.lease_ttl_secs.max(1)),
                cancels: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn owner(&self) -> &str {
        &self.inner.owner
    }

    /// Workers currently executing a run.
    pub fn active(&self) -> usize {
        self.inner.max_concurrency - self.inner.permits.available_permits()
    }

    /// Schedules a queued run. Returns immediately; the run waits for its
    /// lease and then for a free worker.
    pub async fn enqueue(&self, run: Run) {
        let (tx, rx) = watch::channel(false);
        self.inner
            .cancels
            .lock()
            .await
            .insert(run.run_id.clone(), Arc::new(tx));

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let run_id = run.run_id.clone();
            inner.drive(run, rx).await;
            inner.cancels.lock().await.remove(&run_id);
        });
    }

    /// Asks a queued or running run to stop. Returns false if this manager
    /// is not tracking the run.
    pub async fn cancel(&self, run_id: &str) -> bool {
        match self.inner.cancels.lock().await.get(run_id) {
            Some(flag) => {
                flag.send_replace(true);
                tracing::info!(run_id, "Cancellation requested");
                true
            }
            None => false,
        }
    }
}

impl Inner {
    async fn drive(&self, run: Run, cancel: watch::Receiver<bool>) {
        let run_id = run.run_id.clone();

        // --- 1. Exclusive claim on the run id ---
        let Some(lease) = self.claim(&run_id, &cancel).await else {
            return;
        };

        // --- 2. Keep the lease alive; losing it stops the run ---
        let renewer = self.spawn_renewer(lease.clone(), &run_id).await;

        // --- 3. Wait for a worker, or for cancellation ---
        let mut flag = cancel.clone();
        let slot = tokio::select! {
            permit = Arc::clone(&self.permits).acquire_owned() => match permit {
                Ok(permit) => Slot::Worker(permit),
                Err(_) => Slot::Closed,
            },
            Ok(()) = async { flag.wait_for(|cancelled| *cancelled).await.map(|_| ()) } => Slot::Cancelled,
        };

        let outcome = match slot {
            Slot::Worker(_permit) => self.execute(&run, cancel).await,
            Slot::Cancelled => Some(Err(JobError::CancelledBeforeStart(run_id.clone()).to_string())),
            Slot::Closed => {
                tracing::error!(run_id = %run_id, "Worker pool closed before the run started");
                Some(Err("worker pool closed".to_string()))
            }
        };

        if let Some(renewer) = renewer {
            renewer.abort();
        }

        // --- 6. running -> completed | failed ---
        if let Some(outcome) = outcome {
            self.finish(&run_id, outcome).await;
        }
        self.release(&lease).await;
    }

    /// Takes the run's lease. While another worker holds it, retries with a
    /// doubling backoff capped at a third of the lease TTL, until the lease
    /// expires or the run stops being queued. Returns `None` when this
    /// worker will not execute the run; any state change that implies has
    /// already been recorded.
    async fn claim(&self, run_id: &str, cancel: &watch::Receiver<bool>) -> Option<Lease> {
        let cap = (self.lease_ttl / 3).max(CLAIM_BACKOFF);
        let mut backoff = CLAIM_BACKOFF;
        loop {
            match self.leases.acquire(run_id, &self.owner, self.lease_ttl).await {
                Ok(lease) => return Some(lease),
                Err(StoreError::LeaseHeld { owner, .. }) => {
                    tracing::debug!(run_id, holder = %owner, retry_in = ?backoff, "Run is leased by another worker");
                }
                Err(e) => {
                    tracing::error!(run_id, error = %e, "Could not acquire run lease");
                    self.finish(run_id, Err(format!("lease unavailable: {e}"))).await;
                    return None;
                }
            }

            let cancelled = *cancel.borrow();
            if cancelled {
                let error = JobError::CancelledBeforeStart(run_id.to_string()).to_string();
                self.finish(run_id, Err(error)).await;
                return None;
            }
            match self.store.get(run_id).await {
                Ok(Some(run)) if run.status == RunStatus::Queued => {}
                Ok(Some(run)) => {
                    tracing::info!(run_id, status = %run.status, "Run was taken up by another worker");
                    return None;
                }
                Ok(None) => {
                    tracing::warn!(run_id, "Run disappeared from the store");
                    return None;
                }
                Err(e) => tracing::warn!(run_id, error = %e, "Could not read run while waiting for its lease"),
            }

            tokio::time::sleep(backoff).await;
            backoff = backoff.saturating_mul(2).min(cap);
        }
    }

    /// Starts and runs the simulation. `None` means the run was no longer
    /// queued, so its state belongs to someone else.
    async fn execute(&self, run: &Run, cancel: watch::Receiver<bool>) -> Option<Result<(), String>> {
        let run_id = run.run_id.clone();

        // --- 4. queued -> running ---
        let cancelled = *cancel.borrow();
        if cancelled {
            return Some(Err(JobError::CancelledBeforeStart(run_id).to_string()));
        }
        match self.store.update(&run_id, RunTransition::Start { at: timestamp() }).await {
            Ok(_) => tracing::info!(run_id = %run_id, name = %run.name, "Run started"),
            Err(e @ StoreError::InvalidTransition { .. }) => {
                tracing::warn!(run_id = %run_id, error = %e, "Run is no longer queued; skipping");
                return None;
            }
            Err(e) => {
                tracing::error!(run_id = %run_id, error = %e, "Run could not be started");
                return Some(Err(format!("could not start run: {e}")));
            }
        }

        // --- 5. Simulate and publish on a blocking worker ---
        let data = Arc::clone(&self.data);
        let artifacts = self.artifacts.clone();
        let config = run.config.clone();
        let worker_id = run_id.clone();
        let outcome = tokio::task::spawn_blocking(move || -> Result<(), JobError> {
            let result = run_backtest(&config, data.as_ref(), Some(cancel))?;
            artifacts.publish(&worker_id, &result, &config.output)?;
            Ok(())
        })
        .await;

        Some(match outcome {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(e.to_string()),
            Err(join) => Err(JobError::Worker {
                run_id,
                message: join.to_string(),
            }
            .to_string()),
        })
    }

    /// Records the terminal state. A failed `completed` write falls back to
    /// `failed` so the run never stays `running` while this process lives.
    async fn finish(&self, run_id: &str, outcome: Result<(), String>) {
        let transition = match &outcome {
            Ok(()) => RunTransition::Complete {
                at: timestamp(),
                artifact_dir: run_id.to_string(),
            },
            Err(error) => RunTransition::Fail {
                at: timestamp(),
                error: error.clone(),
            },
        };
        match self.store.update(run_id, transition).await {
            Ok(run) => match &run.error {
                None => tracing::info!(run_id, status = %run.status, "Run finished"),
                Some(error) => tracing::warn!(run_id, status = %run.status, error = %error, "Run finished"),
            },
            Err(e) if outcome.is_ok() => {
                tracing::error!(run_id, error = %e, "Could not record completion; marking failed");
                let fallback = RunTransition::Fail {
                    at: timestamp(),
                    error: format!("could not record completion: {e}"),
                };
                if let Err(e) = self.store.update(run_id, fallback).await {
                    tracing::error!(run_id, error = %e, "Run state left for startup reconciliation");
                }
            }
            Err(e) => {
                tracing::error!(run_id, error = %e, "Run state left for startup reconciliation");
            }
        }
    }

    async fn spawn_renewer(&self, lease: Lease, run_id: &str) -> Option<tokio::task::JoinHandle<()>> {
        let flag = self.cancels.lock().await.get(run_id).cloned()?;
        let leases = Arc::clone(&self.leases);
        let ttl = self.lease_ttl;
        let mut interval = tokio::time::interval(ttl / 3);
        Some(tokio::spawn(async move {
            // The first tick completes immediately.
            interval.tick().await;
            loop {
                interval.tick().await;
                if let Err(e) = leases.renew(&lease, ttl).await {
                    tracing::error!(run_id = %lease.run_id, error = %e, "Lease renewal failed; cancelling run");
                    flag.send_replace(true);
                    return;
                }
            }
        }))
    }

    async fn release(&self, lease: &Lease) {
        if let Err(e) = self.leases.release(lease).await {
            tracing::warn!(run_id = %lease.run_id, error = %e, "Could not release run lease");
        }
    }
}
