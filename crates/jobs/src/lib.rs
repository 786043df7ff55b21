//! # Meridian Jobs
//!
//! Orchestration around the engine: the `JobManager` executes runs on a
//! bounded worker pool, and the `RunService` is the boundary the CLI and the
//! HTTP server talk to.
//!
//! ## Architectural Principles
//!
//! - **Bounded Pool:** at most `jobs.max_concurrency` runs execute at once.
//!   Each run holds one pool permit from data load to artifact publication.
//! - **Single Writer per Run:** a run is leased when it is enqueued and the
//!   lease is renewed until the run is terminal. A run leased elsewhere is
//!   retried with backoff until that lease expires or the run leaves
//!   `queued`. Losing the lease cancels the run.
//! - **Failures Become State:** anything that goes wrong inside a worker is
//!   recorded as a `failed` run with its error text; it never crashes the
//!   process and never leaves the run `running`.
//! - **Fail Fast on Submission:** documents are validated before a run record
//!   is created.
//!
//! ## Public API
//!
//! - `RunService`: `submit`, `get_run`, `list_runs`, `readiness`,
//!   `list_artifacts`, `read_artifact`, `summary`, `trades`, `daily_metrics`,
//!   `wait_for_terminal`, `cancel`.
//! - `JobManager`, `Readiness`, `JobError`

pub mod error;
pub mod manager;
pub mod service;

pub use error::JobError;
pub use manager::JobManager;
pub use service::{Readiness, RunService};
