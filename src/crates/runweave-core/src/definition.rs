//! Committed workflow definitions
//!
//! A [`WorkflowDefinition`] is the immutable output of
//! [`WorkflowBuilder::commit`](crate::builder::WorkflowBuilder::commit): the
//! compiled step graph plus workflow-level configuration. Definitions are
//! shared behind `Arc` so one definition can be embedded in other workflows
//! and drive any number of concurrent runs.

use crate::graph::StepGraph;
use crate::retry::RetryConfig;
use crate::run::{RunOptions, RunResult, WorkflowRun};
use crate::schema::Schema;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Callback invoked when a run settles
pub type LifecycleCallback = Arc<
    dyn Fn(&RunResult) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>>
        + Send
        + Sync,
>;

/// Execution-shaping hints carried on a definition
///
/// The engine records these verbatim and surfaces them to schedulers; none of
/// them alter the interpreter itself.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowControlConfig {
    /// Maximum concurrent runs of this workflow
    #[serde(skip_serializing_if = "Option::is_none")]
    pub concurrency: Option<u32>,
    /// Maximum run starts per interval
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<u32>,
    /// Minimum milliseconds between run starts
    #[serde(skip_serializing_if = "Option::is_none")]
    pub throttle_ms: Option<u64>,
    /// Collapse run starts within this many milliseconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debounce_ms: Option<u64>,
    /// Scheduling priority
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<i32>,
    /// Cron expression for scheduled starts
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cron: Option<String>,
}

/// An immutable, committed workflow: compiled graph plus configuration
pub struct WorkflowDefinition {
    pub(crate) id: String,
    pub(crate) description: Option<String>,
    pub(crate) graph: StepGraph,
    pub(crate) input_schema: Option<Schema>,
    pub(crate) output_schema: Option<Schema>,
    pub(crate) state_schema: Option<Schema>,
    pub(crate) retry_config: RetryConfig,
    pub(crate) flow_control: FlowControlConfig,
    pub(crate) validate_inputs: bool,
    pub(crate) on_finish: Option<LifecycleCallback>,
    pub(crate) on_error: Option<LifecycleCallback>,
}

impl WorkflowDefinition {
    /// Workflow id
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Human-readable description
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// The compiled step graph
    pub(crate) fn graph(&self) -> &StepGraph {
        &self.graph
    }

    /// Schema validated against run input when input validation is enabled
    pub fn input_schema(&self) -> Option<&Schema> {
        self.input_schema.as_ref()
    }

    /// Declared shape of the run output
    pub fn output_schema(&self) -> Option<&Schema> {
        self.output_schema.as_ref()
    }

    /// Declared shape of the workflow state
    pub fn state_schema(&self) -> Option<&Schema> {
        self.state_schema.as_ref()
    }

    /// Flow-control hints recorded on this definition
    pub fn flow_control(&self) -> &FlowControlConfig {
        &self.flow_control
    }

    /// Create a run of this workflow with default options
    pub fn create_run(self: &Arc<Self>) -> WorkflowRun {
        WorkflowRun::new(Arc::clone(self), RunOptions::default())
    }

    /// Create a run with explicit options (run id, resource id, store)
    pub fn create_run_with(self: &Arc<Self>, options: RunOptions) -> WorkflowRun {
        WorkflowRun::new(Arc::clone(self), options)
    }
}

impl std::fmt::Debug for WorkflowDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowDefinition")
            .field("id", &self.id)
            .field("description", &self.description)
            .field("validate_inputs", &self.validate_inputs)
            .field("retry_config", &self.retry_config)
            .finish()
    }
}
