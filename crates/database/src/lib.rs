//! # Meridian Run Store
//!
//! Durable state for submitted runs: one record per run moving through
//! `queued -> running -> {completed, failed}`, behind a single async contract
//! with three interchangeable backends.
//!
//! ## Architectural Principles
//!
//! - **One State Machine:** every backend applies transitions through
//!   `Run::apply`, so illegal edges are refused identically everywhere.
//! - **Atomic Writes:** the file index is replaced by rename under a lock,
//!   object documents are written with generation preconditions, and SQL
//!   transitions run in one transaction guarded by the status that was read.
//! - **Restart Safety:** `reconcile_interrupted` fails every run a previous
//!   process left unfinished, skipping runs another process still holds a
//!   live lease on.
//! - **Explicit Leases:** `LeaseManager` grants one live lease per run id, so
//!   more than one worker process can share a store.
//!
//! ## Public API
//!
//! - `Run`, `RunTransition`: the record and its state changes.
//! - `RunStore`: `create`, `update`, `get`, `list`, `ping`, `reconcile_interrupted`.
//! - `FileRunStore`, `ObjectRunStore` (over `ObjectStorage`), `SqlRunStore`.
//! - `LeaseManager`, `LiveLeases`, `InProcessLeaseManager`, `SqlLeaseManager`.
//! - `open_store`: builds the configured backend.
//! - `StoreError`

pub mod connection;
pub mod error;
pub mod file;
pub mod lease;
pub mod object;
pub mod run;
pub mod sql;
pub mod store;

pub use connection::{StoreHandles, open_store};
pub use error::StoreError;
pub use file::FileRunStore;
pub use lease::{InProcessLeaseManager, Lease, LeaseManager, LiveLeases, SqlLeaseManager};
pub use object::{
    InMemoryObjectStorage, LocalObjectStorage, ObjectData, ObjectRunStore, ObjectStorage,
    Precondition,
};
pub use run::{INTERRUPTED_ERROR, Run, RunTransition, new_run_id, timestamp};
pub use sql::{SqlRunStore, connect, run_migrations};
pub use store::RunStore;
