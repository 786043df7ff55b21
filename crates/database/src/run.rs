use crate::error::StoreError;
use chrono::{DateTime, SubsecRound, Utc};
use configuration::BacktestConfig;
use core_types::RunStatus;
use serde::{Deserialize, Serialize};

/// Error text recorded on runs found unfinished at startup.
pub const INTERRUPTED_ERROR: &str = "interrupted: the process exited before the run finished";

/// A submitted simulation and where it is in its lifecycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    pub run_id: String,
    pub name: String,
    pub strategy_kind: String,
    pub config: BacktestConfig,
    pub status: RunStatus,
    pub submitted_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    /// Directory name of the published artifacts, set on completion.
    pub artifact_dir: Option<String>,
}

/// A state change requested of the store. Each variant names its target state.
#[derive(Debug, Clone, PartialEq)]
pub enum RunTransition {
    Start { at: DateTime<Utc> },
    Complete { at: DateTime<Utc>, artifact_dir: String },
    Fail { at: DateTime<Utc>, error: String },
}

impl RunTransition {
    pub fn target(&self) -> RunStatus {
        match self {
            RunTransition::Start { .. } => RunStatus::Running,
            RunTransition::Complete { .. } => RunStatus::Completed,
            RunTransition::Fail { .. } => RunStatus::Failed,
        }
    }
}

impl Run {
    /// A freshly queued run with a generated id.
    pub fn queued(config: BacktestConfig) -> Self {
        Self::queued_with_id(new_run_id(), config, timestamp())
    }

    pub fn queued_with_id(run_id: String, config: BacktestConfig, submitted_at: DateTime<Utc>) -> Self {
        Self {
            run_id,
            name: config.display_name(),
            strategy_kind: config.strategy.kind_name().to_string(),
            config,
            status: RunStatus::Queued,
            submitted_at,
            started_at: None,
            completed_at: None,
            error: None,
            artifact_dir: None,
        }
    }

    /// Applies one edge of the state machine. Every backend routes updates
    /// through here, so an illegal edge is refused the same way everywhere.
    pub fn apply(&mut self, transition: RunTransition) -> Result<(), StoreError> {
        let target = transition.target();
        if !self.status.can_transition_to(target) {
            return Err(StoreError::InvalidTransition {
                run_id: self.run_id.clone(),
                from: self.status,
                to: target,
            });
        }
        match transition {
            RunTransition::Start { at } => {
                self.started_at = Some(at);
            }
            RunTransition::Complete { at, artifact_dir } => {
                self.completed_at = Some(at);
                self.artifact_dir = Some(artifact_dir);
            }
            RunTransition::Fail { at, error } => {
                self.completed_at = Some(at);
                self.error = Some(error);
            }
        }
        self.status = target;
        Ok(())
    }
}

pub fn new_run_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// The current time at the precision every backend can store losslessly.
pub fn timestamp() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Orders runs oldest first, ties broken by id.
pub(crate) fn sort_runs(runs: &mut [Run]) {
    runs.sort_by(|a, b| {
        a.submitted_at
            .cmp(&b.submitted_at)
            .then_with(|| a.run_id.cmp(&b.run_id))
    });
}
