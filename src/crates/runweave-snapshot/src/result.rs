//! Per-step execution records
//!
//! A [`StepResult`] is the durable record of a single leaf's progress inside a
//! run. Records **accumulate**: resuming a suspended step adds
//! `resume_payload`/`resumed_at` without discarding the suspend-era fields, and
//! retries overwrite only the terminal fields of the same record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Lifecycle status of a single step within a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    /// Handler is currently executing (or was executing when the snapshot was taken)
    Running,
    /// Handler completed and produced an output
    Success,
    /// Handler (or input validation) failed after exhausting retries
    Failed,
    /// The step voluntarily suspended itself and is waiting for resume data
    Suspended,
    /// Transient status surfaced while a sleep node parks the walk
    Waiting,
}

/// A structured step failure preserving the original error's identity
///
/// Handler failures are values, not panics: the `message` carries the error's
/// display form, `details` carries any custom properties the handler attached,
/// and `cause` carries the rendered cause chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepFailure {
    /// Human-readable error message
    pub message: String,
    /// Custom error properties supplied by the handler
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    /// Rendered cause chain, outermost first
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,
}

impl StepFailure {
    /// Create a failure from a message alone
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            details: None,
            cause: None,
        }
    }

    /// Attach custom properties to this failure
    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Attach a rendered cause chain to this failure
    pub fn with_cause(mut self, cause: impl Into<String>) -> Self {
        self.cause = Some(cause.into());
        self
    }
}

impl std::fmt::Display for StepFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(cause) = &self.cause {
            write!(f, " (caused by: {})", cause)?;
        }
        Ok(())
    }
}

/// Durable record of a single step's progress
///
/// Owned by the run snapshot, keyed by step id. Mutated only by the execution
/// engine during a single active operation on the run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepResult {
    /// Current lifecycle status
    pub status: StepStatus,
    /// Input the handler was actually invoked with
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    /// Output produced on success
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    /// Failure record, present only when `status == Failed`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<StepFailure>,
    /// When the handler was first invoked
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// When the step reached a terminal status
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    /// When the step suspended itself
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suspended_at: Option<DateTime<Utc>>,
    /// When the step was re-entered with resume data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resumed_at: Option<DateTime<Utc>>,
    /// Payload the step handed to `suspend`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suspend_payload: Option<Value>,
    /// Resume data supplied by the caller
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resume_payload: Option<Value>,
    /// Engine-recorded metadata (iteration counts, fan-out bookkeeping, nested results)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl StepResult {
    /// Record for a step whose handler has just been invoked
    pub fn running(payload: Value) -> Self {
        Self {
            status: StepStatus::Running,
            payload: Some(payload),
            output: None,
            error: None,
            started_at: Some(Utc::now()),
            ended_at: None,
            suspended_at: None,
            resumed_at: None,
            suspend_payload: None,
            resume_payload: None,
            metadata: None,
        }
    }

    /// Record for a step that completed successfully
    pub fn success(output: Value) -> Self {
        let mut result = Self::running(Value::Null);
        result.payload = None;
        result.complete(output);
        result
    }

    /// Transition this record to `Success`, keeping accumulated fields
    pub fn complete(&mut self, output: Value) {
        self.status = StepStatus::Success;
        self.output = Some(output);
        self.ended_at = Some(Utc::now());
    }

    /// Transition this record to `Failed`, keeping accumulated fields
    pub fn fail(&mut self, error: StepFailure) {
        self.status = StepStatus::Failed;
        self.error = Some(error);
        self.ended_at = Some(Utc::now());
    }

    /// Transition this record to `Suspended`, recording the suspend payload
    pub fn suspend(&mut self, payload: Value) {
        self.status = StepStatus::Suspended;
        self.suspend_payload = Some(payload);
        self.suspended_at = Some(Utc::now());
    }

    /// Mark this record as re-entered with resume data
    ///
    /// Suspend-era fields are preserved; the record accumulates, never
    /// replaces wholesale.
    pub fn resume(&mut self, resume_payload: Value) {
        self.status = StepStatus::Running;
        self.resume_payload = Some(resume_payload);
        self.resumed_at = Some(Utc::now());
    }

    /// Merge a metadata field into this record
    pub fn set_metadata(&mut self, key: &str, value: Value) {
        match &mut self.metadata {
            Some(Value::Object(map)) => {
                map.insert(key.to_string(), value);
            }
            _ => {
                let mut map = serde_json::Map::new();
                map.insert(key.to_string(), value);
                self.metadata = Some(Value::Object(map));
            }
        }
    }

    /// Read a metadata field from this record
    pub fn metadata_field(&self, key: &str) -> Option<&Value> {
        self.metadata.as_ref().and_then(|m| m.get(key))
    }
}
