//! Error types and error handling for workflow operations
//!
//! This module defines all error types that can surface from graph
//! construction and run operations. All errors implement `std::error::Error`
//! via the `thiserror` crate.
//!
//! # Error Hierarchy
//!
//! ```text
//! WorkflowError
//! ├── Construction   - Builder misuse, caught at commit time
//! ├── Validation     - Payload rejected by a declared schema
//! ├── Contract       - Synchronous misuse of a run handle (never persisted)
//! ├── Execution      - Engine-internal failures
//! ├── Snapshot       - Persistence errors from the snapshot store
//! └── Serialization  - JSON errors
//! ```
//!
//! Two things are deliberately **not** errors:
//!
//! - Control signals (a step suspending or bailing) are
//!   [`StepOutcome`](crate::step::StepOutcome) variants the engine branches
//!   on; they never travel through `Result`.
//! - Handler failures are values: they are retried, then recorded inside the
//!   step's [`StepResult`](runweave_snapshot::StepResult) as a
//!   [`StepFailure`](runweave_snapshot::StepFailure) preserving the original
//!   error's message, custom properties, and cause chain. The run reports
//!   `failed`, but no `WorkflowError` is raised for them.

use crate::schema::FieldError;
use thiserror::Error;

/// Convenience result type using [`WorkflowError`]
pub type Result<T> = std::result::Result<T, WorkflowError>;

/// Errors surfaced to callers of the workflow engine
#[derive(Error, Debug)]
pub enum WorkflowError {
    /// Graph construction failed at `commit()`
    ///
    /// Duplicate step ids at one graph level, references to undeclared steps,
    /// or an empty graph. Always raised before a definition exists, never at
    /// runtime.
    #[error("Workflow construction failed: {0}")]
    Construction(String),

    /// A payload was rejected by a declared schema
    ///
    /// Carries the offending step id (when the schema belongs to a step) and
    /// the full list of field errors. Reported directly to the caller for
    /// workflow input, resume data, and time-travel input; recorded as a
    /// failed step result for leaf input validation.
    #[error("Validation failed{}: {}", step.as_ref().map(|s| format!(" for step '{}'", s)).unwrap_or_default(), format_field_errors(errors))]
    Validation {
        /// Step whose schema rejected the payload, if any
        step: Option<String>,
        /// All missing or invalid fields
        errors: Vec<FieldError>,
    },

    /// Synchronous misuse of a run handle
    ///
    /// Resuming a step that is not suspended, time-traveling a running run,
    /// addressing a step that does not exist, or overlapping operations on
    /// one run id. Never persisted in the snapshot.
    #[error("Contract violation: {0}")]
    Contract(String),

    /// Engine-internal execution failure
    #[error("Execution failed: {0}")]
    Execution(String),

    /// Snapshot persistence error
    ///
    /// Wraps errors from the snapshot store backend.
    #[error("Snapshot error: {0}")]
    Snapshot(#[from] runweave_snapshot::SnapshotError),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl WorkflowError {
    /// Create a construction error
    pub fn construction(message: impl Into<String>) -> Self {
        Self::Construction(message.into())
    }

    /// Create a contract violation error
    pub fn contract(message: impl Into<String>) -> Self {
        Self::Contract(message.into())
    }

    /// Create a validation error for an optional step
    pub fn validation(step: Option<impl Into<String>>, errors: Vec<FieldError>) -> Self {
        Self::Validation {
            step: step.map(|s| s.into()),
            errors,
        }
    }
}

fn format_field_errors(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}
