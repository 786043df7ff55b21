use crate::error::StoreError;
use crate::lease::LiveLeases;
use crate::run::{INTERRUPTED_ERROR, Run, RunTransition};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// The contract every run store backend implements.
///
/// `create` and `update` are atomic: a reader sees the previous record or
/// the new one, never a mix. `update` validates the edge with
/// [`Run::apply`] against the stored state inside the same atomic step.
#[async_trait]
pub trait RunStore: Send + Sync {
    /// A short backend name for logs and the readiness report.
    fn backend(&self) -> &'static str;

    /// Inserts a new queued run. Fails with `AlreadyExists` on a duplicate id.
    async fn create(&self, run: &Run) -> Result<(), StoreError>;

    /// Applies one state transition and returns the updated run.
    async fn update(&self, run_id: &str, transition: RunTransition) -> Result<Run, StoreError>;

    async fn get(&self, run_id: &str) -> Result<Option<Run>, StoreError>;

    /// All runs, oldest submission first.
    async fn list(&self) -> Result<Vec<Run>, StoreError>;

    /// Proves the backend is reachable. Never succeeds without touching it.
    async fn ping(&self) -> Result<(), StoreError>;

    /// Fails every run left queued or running by a previous process and
    /// returns their ids. Runs in `live` are held by another process's
    /// unexpired lease and are left as they are.
    async fn reconcile_interrupted(
        &self,
        at: DateTime<Utc>,
        live: &LiveLeases,
    ) -> Result<Vec<String>, StoreError> {
        let mut reconciled = Vec::new();
        for run in self.list().await? {
            if run.status.is_terminal() || live.contains(&run.run_id) {
                continue;
            }
            let transition = RunTransition::Fail {
                at,
                error: INTERRUPTED_ERROR.to_string(),
            };
            match self.update(&run.run_id, transition).await {
                Ok(_) => reconciled.push(run.run_id),
                // Finished by someone else between list and update.
                Err(StoreError::InvalidTransition { .. }) => {}
                Err(e) => return Err(e),
            }
        }
        if !reconciled.is_empty() {
            tracing::warn!(backend = self.backend(), count = reconciled.len(), "Reconciled interrupted runs to failed");
        }
        Ok(reconciled)
    }
}
