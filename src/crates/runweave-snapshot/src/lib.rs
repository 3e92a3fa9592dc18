//! # runweave-snapshot - Run State Persistence for Workflow Execution
//!
//! **Snapshot records and the trait-based storage seam** for persisting and
//! restoring workflow run state. Snapshots enable suspend/resume across
//! process restarts, time-travel replay, and audit of long-running runs.
//!
//! ## Overview
//!
//! A snapshot captures everything needed to continue a run later:
//!
//! - **Per-step results** - [`StepResult`] records keyed by step id, with
//!   accumulate-never-replace update semantics
//! - **Workflow state** - the schema-declared state value
//! - **Request context** - the run-scoped key/value bag, persisted verbatim
//! - **Suspended paths** - ordered id-paths of every suspended leaf
//! - **Graph shape** - a serialized, handler-free projection of the graph
//!
//! ## Core Types
//!
//! - [`SnapshotStore`] - trait for storage backend implementations
//! - [`InMemorySnapshotStore`] - reference backend for development and tests
//! - [`RunSnapshot`] - the persisted record
//! - [`StepResult`] / [`StepStatus`] / [`StepFailure`] - per-step records
//! - [`RunStatus`] - overall run status
//!
//! The execution engine lives in `runweave-core`; this crate deliberately has
//! no knowledge of graph walking. It treats the snapshot as an opaque,
//! versioned record so alternative durability substrates stay pluggable.

pub mod error;
pub mod memory;
pub mod result;
pub mod snapshot;
pub mod traits;

pub use error::{Result, SnapshotError};
pub use memory::InMemorySnapshotStore;
pub use result::{StepFailure, StepResult, StepStatus};
pub use snapshot::{RunSnapshot, RunStatus, StepPath};
pub use traits::SnapshotStore;
