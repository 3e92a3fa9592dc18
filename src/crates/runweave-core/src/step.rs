//! Steps: the atomic units of work
//!
//! A [`Step`] is a leaf of the step graph: an id, an async handler, optional
//! schemas for its input/output and suspend/resume payloads, and an optional
//! per-step retry override. Handlers receive a [`StepContext`] carrying the
//! full effect surface of the engine and return a [`StepOutcome`].
//!
//! # Outcomes are values, not exceptions
//!
//! A handler reports exactly one of four outcomes: `Success`, `Suspended`,
//! `Bailed`, or `Failed`. The interpreter branches on the tag; suspension and
//! bailing never travel through `Result` or panics, so engine control flow
//! stays inspectable and testable.
//!
//! # Example
//!
//! ```rust
//! use runweave_core::step::{Step, StepOutcome};
//! use serde_json::json;
//!
//! let step = Step::new("greet", |ctx| async move {
//!     let name = ctx.input()["name"].as_str().unwrap_or("world").to_string();
//!     StepOutcome::success(json!({"greeting": format!("hello {name}")}))
//! });
//!
//! let approval = Step::new("approval", |ctx| async move {
//!     match ctx.resume_data() {
//!         Some(data) => StepOutcome::success(data.clone()),
//!         None => ctx.suspend(json!({"reason": "awaiting approval"})),
//!     }
//! });
//! # let _ = (step, approval);
//! ```

use crate::context::{AbortSignal, RequestContext, RunState, SharedResults};
use crate::schema::Schema;
use crate::stream::{RunEvent, StreamEmitter};
use futures::future::BoxFuture;
use runweave_snapshot::{StepFailure, StepResult};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;

/// Boxed async step handler
pub type StepHandler = Arc<dyn Fn(StepContext) -> BoxFuture<'static, StepOutcome> + Send + Sync>;

/// Tagged result of one handler invocation
#[derive(Debug, Clone)]
pub enum StepOutcome {
    /// The step completed and produced an output
    Success(Value),
    /// The step paused itself with a suspend payload; the run can be resumed
    /// at this step later
    Suspended(Value),
    /// The step completed successfully and requests immediate termination of
    /// the entire run with overall status `success`
    Bailed(Value),
    /// The step failed; retried per policy, then recorded as a failed result
    Failed(StepFailure),
}

impl StepOutcome {
    /// Successful completion with the given output
    pub fn success(output: Value) -> Self {
        Self::Success(output)
    }

    /// Failure with a message only
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(StepFailure::new(message))
    }

    /// Failure preserving a full structured error
    pub fn failed_with(failure: StepFailure) -> Self {
        Self::Failed(failure)
    }
}

impl From<StepFailure> for StepOutcome {
    fn from(failure: StepFailure) -> Self {
        Self::Failed(failure)
    }
}

/// Everything a handler can see and do during one invocation
///
/// Cheap to clone; all mutable members are shared with the rest of the walk,
/// so `set_state` and request-context writes are visible to sibling and
/// subsequent steps immediately.
#[derive(Clone)]
pub struct StepContext {
    pub(crate) step_id: String,
    pub(crate) input: Value,
    pub(crate) resume_data: Option<Value>,
    pub(crate) init_data: Value,
    pub(crate) state: RunState,
    pub(crate) request_context: RequestContext,
    pub(crate) results: SharedResults,
    pub(crate) abort: AbortSignal,
    pub(crate) emitter: StreamEmitter,
}

impl StepContext {
    /// Id of the step being executed
    pub fn step_id(&self) -> &str {
        &self.step_id
    }

    /// Input this invocation was called with
    pub fn input(&self) -> &Value {
        &self.input
    }

    /// Resume data, present only when re-entering a suspended step
    pub fn resume_data(&self) -> Option<&Value> {
        self.resume_data.as_ref()
    }

    /// Root input the run was started with
    pub fn init_data(&self) -> &Value {
        &self.init_data
    }

    /// Read the current workflow state
    pub fn state(&self) -> Value {
        self.state.get()
    }

    /// Replace the workflow state; visible to siblings and later steps
    pub fn set_state(&self, value: Value) {
        self.state.set(value);
    }

    /// The run's request context
    pub fn request_context(&self) -> &RequestContext {
        &self.request_context
    }

    /// Result of a previously executed step in this run, by id
    pub fn get_step_result(&self, id: &str) -> Option<StepResult> {
        self.results
            .lock()
            .expect("results lock poisoned")
            .get(id)
            .cloned()
    }

    /// Cooperative cancellation signal for this run
    pub fn abort_signal(&self) -> &AbortSignal {
        &self.abort
    }

    /// Write a custom event into the run's event stream
    ///
    /// Custom events are delivered between this step's start and result
    /// events; they are dropped when the run has no stream consumer.
    pub fn emit(&self, data: Value) {
        self.emitter.emit(RunEvent::StepCustom {
            step_id: self.step_id.clone(),
            data,
        });
    }

    /// Suspend this step with a payload describing what it is waiting for
    ///
    /// Returns the outcome to hand back from the handler; downstream nodes in
    /// this branch will not execute until the run is resumed at this step.
    pub fn suspend(&self, payload: Value) -> StepOutcome {
        StepOutcome::Suspended(payload)
    }

    /// Terminate the entire run early with overall status `success`
    ///
    /// This step is recorded as successful with the given output; all
    /// remaining nodes are skipped.
    pub fn bail(&self, output: Value) -> StepOutcome {
        StepOutcome::Bailed(output)
    }
}

impl std::fmt::Debug for StepContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepContext")
            .field("step_id", &self.step_id)
            .field("input", &self.input)
            .field("resume_data", &self.resume_data)
            .finish()
    }
}

/// A leaf step: unit of work with an async handler
#[derive(Clone)]
pub struct Step {
    pub(crate) id: String,
    pub(crate) description: Option<String>,
    pub(crate) handler: StepHandler,
    pub(crate) input_schema: Option<Schema>,
    pub(crate) output_schema: Option<Schema>,
    pub(crate) suspend_schema: Option<Schema>,
    pub(crate) resume_schema: Option<Schema>,
    pub(crate) retries: Option<u32>,
}

impl Step {
    /// Create a step from an id and an async handler
    pub fn new<F, Fut>(id: impl Into<String>, handler: F) -> Self
    where
        F: Fn(StepContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = StepOutcome> + Send + 'static,
    {
        Self {
            id: id.into(),
            description: None,
            handler: Arc::new(move |ctx| Box::pin(handler(ctx))),
            input_schema: None,
            output_schema: None,
            suspend_schema: None,
            resume_schema: None,
            retries: None,
        }
    }

    /// Step id
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Human-readable description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Schema validated against the step's input when the workflow has
    /// `validate_inputs` enabled
    pub fn with_input_schema(mut self, schema: Schema) -> Self {
        self.input_schema = Some(schema);
        self
    }

    /// Schema describing the step's output
    pub fn with_output_schema(mut self, schema: Schema) -> Self {
        self.output_schema = Some(schema);
        self
    }

    /// Schema describing the suspend payload
    pub fn with_suspend_schema(mut self, schema: Schema) -> Self {
        self.suspend_schema = Some(schema);
        self
    }

    /// Schema validated against resume data when the workflow has
    /// `validate_inputs` enabled
    pub fn with_resume_schema(mut self, schema: Schema) -> Self {
        self.resume_schema = Some(schema);
        self
    }

    /// Per-step retry override; takes precedence over the workflow-level
    /// retry config
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = Some(retries);
        self
    }

    /// Copy of this step under a fresh id, for reuse within the same graph
    ///
    /// Step ids must be unique within one graph level; `clone_as` shares the
    /// handler and schemas but records results under the new id.
    pub fn clone_as(&self, id: impl Into<String>) -> Self {
        let mut copy = self.clone();
        copy.id = id.into();
        copy
    }
}

impl std::fmt::Debug for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Step")
            .field("id", &self.id)
            .field("description", &self.description)
            .field("retries", &self.retries)
            .field("handler", &"<async fn>")
            .finish()
    }
}
