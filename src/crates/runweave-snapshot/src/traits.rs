//! Extensible snapshot storage trait for custom backend implementations
//!
//! This module defines the [`SnapshotStore`] trait — the seam between the
//! execution engine and whatever durability substrate a deployment uses.
//! The engine calls `save` after every operation and at every suspension
//! point; backends may persist to anything that can hold an opaque versioned
//! JSON record (Postgres, SQLite, Redis, object storage, ...).
//!
//! The engine is deterministic and idempotent under replay, so a backend may
//! re-deliver a previously saved snapshot without corrupting a run.
//!
//! # Implementing a backend
//!
//! ```rust,ignore
//! use runweave_snapshot::{RunSnapshot, SnapshotStore, SnapshotError};
//! use async_trait::async_trait;
//!
//! struct PostgresStore { pool: sqlx::PgPool }
//!
//! #[async_trait]
//! impl SnapshotStore for PostgresStore {
//!     async fn save(&self, snapshot: &RunSnapshot) -> runweave_snapshot::Result<()> {
//!         let record = serde_json::to_value(snapshot)?;
//!         sqlx::query("INSERT INTO run_snapshots (run_id, workflow, record) \
//!                      VALUES ($1, $2, $3) \
//!                      ON CONFLICT (run_id) DO UPDATE SET record = $3")
//!             .bind(&snapshot.run_id)
//!             .bind(&snapshot.workflow_name)
//!             .bind(record)
//!             .execute(&self.pool)
//!             .await
//!             .map_err(|e| SnapshotError::Storage(e.to_string()))?;
//!         Ok(())
//!     }
//!     // ... load / list ...
//! }
//! ```

use crate::error::Result;
use crate::snapshot::RunSnapshot;
use async_trait::async_trait;

/// Storage backend for run snapshots
///
/// `save` must be last-write-wins per run id; `list` returns the latest
/// snapshot of every run belonging to a workflow, most recent first.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Persist the latest snapshot for a run, replacing any previous one
    async fn save(&self, snapshot: &RunSnapshot) -> Result<()>;

    /// Load the latest snapshot for a run, if one exists
    async fn load(&self, run_id: &str) -> Result<Option<RunSnapshot>>;

    /// List the latest snapshots of all runs of the named workflow
    async fn list(&self, workflow_name: &str) -> Result<Vec<RunSnapshot>>;
}
