//! Run snapshot records
//!
//! A [`RunSnapshot`] is the persisted representation of a run's progress: its
//! status, every step's [`StepResult`], the workflow state value, the request
//! context, and the ordered id-paths of any currently suspended leaves. The
//! snapshot is treated as an opaque versioned record by storage backends and is
//! owned exclusively by its run — it is mutated only by the execution engine
//! during a single active operation on that run id.

use crate::result::StepResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Overall status of a workflow run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// An operation is actively walking the graph
    Running,
    /// The walk reached the end of the graph (or a step bailed)
    Success,
    /// A step failed after exhausting retries and short-circuited the walk
    Failed,
    /// At least one leaf is suspended and waiting for resume data
    Suspended,
    /// Single-step mode halted after executing one leaf
    Paused,
    /// The run was cooperatively canceled
    Canceled,
}

impl RunStatus {
    /// Whether a run in this status has settled and accepts no further progress
    /// without an explicit resume or time-travel operation
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Success | RunStatus::Failed | RunStatus::Canceled
        )
    }
}

/// Ordered id-path addressing a leaf, outermost graph first
///
/// A path of length 1 addresses a top-level leaf; longer paths descend through
/// nested workflows (e.g. `["inner-workflow", "approval-step"]`).
pub type StepPath = Vec<String>;

/// Persisted representation of a run's current progress
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSnapshot {
    /// Unique id of the run
    pub run_id: String,
    /// Caller-supplied resource the run is associated with
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<String>,
    /// Id of the workflow definition this run executes
    pub workflow_name: String,
    /// Run status at the time the snapshot was taken
    pub status: RunStatus,
    /// Root input the run was started with
    pub input: Value,
    /// Per-step results, keyed by step id
    pub steps: HashMap<String, StepResult>,
    /// Workflow state value (per the definition's state schema)
    pub state: Value,
    /// Request context entries, persisted verbatim across suspend/resume
    pub request_context: Value,
    /// Ordered id-paths of all currently suspended leaves
    pub suspended_paths: Vec<StepPath>,
    /// Serialized shape of the compiled graph (node kinds and ids, no handlers)
    pub graph: Value,
    /// When this snapshot was taken
    pub timestamp: DateTime<Utc>,
}

impl RunSnapshot {
    /// Look up a step result by id
    pub fn step(&self, id: &str) -> Option<&StepResult> {
        self.steps.get(id)
    }

    /// Whether the given path is currently suspended
    pub fn is_suspended_at(&self, path: &[String]) -> bool {
        self.suspended_paths.iter().any(|p| p == path)
    }
}
