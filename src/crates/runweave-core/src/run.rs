//! Run handles: the operational surface of a workflow
//!
//! A [`WorkflowRun`] owns one run id and its durable record set. All
//! operations on a run are serialized through an internal lock: overlapping
//! `start`/`resume`/`time_travel`/`step` calls on the same handle fail fast
//! with a contract violation instead of interleaving.
//!
//! # Operations
//!
//! | Operation | Precondition | Effect |
//! |-----------|--------------|--------|
//! | `start` | never started | walk the graph from the root |
//! | `start_per_step` | never started | run one leaf, then pause |
//! | `step` | paused | run the next leaf, then pause again |
//! | `resume` | suspended (or paused) | re-enter one suspended leaf with data |
//! | `time_travel` | not mid-operation | rebuild the frontier at a chosen step |
//! | `stream` | never started | `start` plus an ordered event stream |
//! | `cancel` | any | request cooperative abort |
//!
//! Every continuation re-walks the graph from the root and replays recorded
//! successes without re-invoking handlers, so chained inputs are
//! reconstructed deterministically.
//!
//! # Example
//!
//! ```rust,ignore
//! let run = workflow.create_run();
//! let result = run.start(json!({"value": "test"})).await?;
//! if result.status == RunStatus::Suspended {
//!     run.resume(ResumeOptions::step("approval", json!({"approved": true}))).await?;
//! }
//! ```

use crate::context::{AbortSignal, RequestContext, RunState, SharedResults};
use crate::definition::WorkflowDefinition;
use crate::engine::{execute_node, ExecEnv, NodeOutcome};
use crate::error::{Result, WorkflowError};
use crate::stream::{RunEvent, StreamEmitter};
use crate::time_travel::{build_plan, TimeTravelOptions, TravelPlan};
use chrono::Utc;
use runweave_snapshot::{
    RunSnapshot, RunStatus, SnapshotStore, StepFailure, StepPath, StepResult,
};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};
use tokio_stream::wrappers::UnboundedReceiverStream;

/// Options accepted when creating a run
#[derive(Clone, Default)]
pub struct RunOptions {
    /// Run id; generated when absent
    pub run_id: Option<String>,
    /// Caller-supplied resource this run is associated with
    pub resource_id: Option<String>,
    /// Store that receives a snapshot after every settled operation
    pub store: Option<Arc<dyn SnapshotStore>>,
}

/// Resume parameters: which suspended leaf, and the data it receives
#[derive(Clone, Debug)]
pub struct ResumeOptions {
    /// Path of the suspended leaf; a single id matches a suspended path by
    /// its first or last element
    pub step: StepPath,
    /// Data handed to the handler as `resume_data`
    pub resume_data: Value,
}

impl ResumeOptions {
    /// Resume a leaf addressed by a single id
    pub fn step(id: impl Into<String>, resume_data: Value) -> Self {
        Self {
            step: vec![id.into()],
            resume_data,
        }
    }

    /// Resume a leaf addressed by full path
    pub fn path(step: StepPath, resume_data: Value) -> Self {
        Self { step, resume_data }
    }
}

/// Settled result of one run operation
#[derive(Debug, Clone)]
pub struct RunResult {
    /// Id of the run
    pub run_id: String,
    /// Status the operation settled at
    pub status: RunStatus,
    /// Per-step records, keyed by step id
    pub steps: HashMap<String, StepResult>,
    /// Output of the final node, present when the run succeeded
    pub output: Option<Value>,
    /// Failure that short-circuited the run, present when it failed
    pub error: Option<StepFailure>,
    /// Paths of all currently suspended leaves
    pub suspended: Vec<StepPath>,
}

impl RunResult {
    /// Look up a step record by id
    pub fn step(&self, id: &str) -> Option<&StepResult> {
        self.steps.get(id)
    }

    /// Whether the run settled successfully
    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Success
    }
}

/// A run in flight: the graph walk plus an ordered event stream
pub struct RunStream {
    /// Ordered run events; `RunStart` first, `RunFinish` last
    pub events: UnboundedReceiverStream<RunEvent>,
    handle: tokio::task::JoinHandle<Result<RunResult>>,
}

impl RunStream {
    /// Wait for the walk to settle
    pub async fn result(self) -> Result<RunResult> {
        self.handle
            .await
            .map_err(|e| WorkflowError::Execution(format!("run task failed: {e}")))?
    }
}

/// Handle to one run of a committed workflow
///
/// Cloning shares the underlying run: clones observe the same results,
/// status, and suspended paths.
#[derive(Clone)]
pub struct WorkflowRun {
    definition: Arc<WorkflowDefinition>,
    run_id: String,
    resource_id: Option<String>,
    store: Option<Arc<dyn SnapshotStore>>,
    request_context: RequestContext,
    state: RunState,
    results: SharedResults,
    suspended_paths: Arc<Mutex<Vec<StepPath>>>,
    status: Arc<Mutex<Option<RunStatus>>>,
    abort: AbortSignal,
    op_lock: Arc<tokio::sync::Mutex<()>>,
    init_data: Arc<Mutex<Value>>,
    nested_seeds: Arc<Mutex<HashMap<String, HashMap<String, StepResult>>>>,
}

impl WorkflowRun {
    pub(crate) fn new(definition: Arc<WorkflowDefinition>, options: RunOptions) -> Self {
        Self {
            definition,
            run_id: options
                .run_id
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            resource_id: options.resource_id,
            store: options.store,
            request_context: RequestContext::new(),
            state: RunState::new(Value::Null),
            results: Arc::new(Mutex::new(HashMap::new())),
            suspended_paths: Arc::new(Mutex::new(Vec::new())),
            status: Arc::new(Mutex::new(None)),
            abort: AbortSignal::new(),
            op_lock: Arc::new(tokio::sync::Mutex::new(())),
            init_data: Arc::new(Mutex::new(Value::Null)),
            nested_seeds: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Rebuild a run handle from a persisted snapshot
    ///
    /// The definition must be the workflow the snapshot was taken from;
    /// handlers are not persisted, so the caller supplies the committed
    /// definition and the snapshot supplies the record set.
    pub fn from_snapshot(
        definition: Arc<WorkflowDefinition>,
        snapshot: RunSnapshot,
        store: Option<Arc<dyn SnapshotStore>>,
    ) -> Result<Self> {
        if snapshot.workflow_name != definition.id() {
            return Err(WorkflowError::contract(format!(
                "snapshot belongs to workflow '{}', not '{}'",
                snapshot.workflow_name,
                definition.id()
            )));
        }
        Ok(Self {
            definition,
            run_id: snapshot.run_id,
            resource_id: snapshot.resource_id,
            store,
            request_context: RequestContext::from_value(&snapshot.request_context),
            state: RunState::new(snapshot.state),
            results: Arc::new(Mutex::new(snapshot.steps)),
            suspended_paths: Arc::new(Mutex::new(snapshot.suspended_paths)),
            status: Arc::new(Mutex::new(Some(snapshot.status))),
            abort: AbortSignal::new(),
            op_lock: Arc::new(tokio::sync::Mutex::new(())),
            init_data: Arc::new(Mutex::new(snapshot.input)),
            nested_seeds: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// Id of this run
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Current run status; `None` before the first operation
    pub fn status(&self) -> Option<RunStatus> {
        *self.status.lock().expect("status lock poisoned")
    }

    /// The run's request context; entries set here are visible to every step
    pub fn request_context(&self) -> &RequestContext {
        &self.request_context
    }

    /// The run's mutable workflow state
    pub fn state(&self) -> &RunState {
        &self.state
    }

    /// A step's current record, by id
    pub fn step_result(&self, id: &str) -> Option<StepResult> {
        self.results
            .lock()
            .expect("results lock poisoned")
            .get(id)
            .cloned()
    }

    /// Paths of all currently suspended leaves
    pub fn suspended_steps(&self) -> Vec<StepPath> {
        self.suspended_paths
            .lock()
            .expect("suspended list lock poisoned")
            .clone()
    }

    /// Execute the workflow from the root
    pub async fn start(&self, input: Value) -> Result<RunResult> {
        self.start_inner(input, StreamEmitter::disabled(), false)
            .await
    }

    /// Execute stepwise: run exactly one leaf, then settle as paused
    pub async fn start_per_step(&self, input: Value) -> Result<RunResult> {
        self.start_inner(input, StreamEmitter::disabled(), true)
            .await
    }

    /// Execute the workflow, surfacing an ordered event stream alongside
    pub fn stream(&self, input: Value) -> RunStream {
        let (emitter, rx) = StreamEmitter::channel();
        let run = self.clone();
        let handle =
            tokio::spawn(async move { run.start_inner(input, emitter, false).await });
        RunStream {
            events: UnboundedReceiverStream::new(rx),
            handle,
        }
    }

    async fn start_inner(
        &self,
        input: Value,
        emitter: StreamEmitter,
        stepwise: bool,
    ) -> Result<RunResult> {
        let _guard = self.try_op_lock()?;
        if self.status().is_some() {
            return Err(WorkflowError::contract(format!(
                "run '{}' has already been started",
                self.run_id
            )));
        }

        // A rejected input leaves the run untouched: no records, no snapshot.
        if self.definition.validate_inputs {
            if let Some(schema) = self.definition.input_schema() {
                if let Err(errors) = schema.validate(&input) {
                    return Err(WorkflowError::Validation { step: None, errors });
                }
            }
        }

        *self.init_data.lock().expect("init data lock poisoned") = input.clone();
        self.set_status(RunStatus::Running);
        tracing::info!(run = %self.run_id, workflow = %self.definition.id(), "starting run");
        emitter.emit(RunEvent::RunStart {
            run_id: self.run_id.clone(),
            workflow_name: self.definition.id().to_string(),
        });

        let budget = stepwise.then(|| Arc::new(AtomicBool::new(true)));
        let env = self.make_env(emitter.clone(), HashSet::new(), Arc::new(HashMap::new()), None, budget);
        let outcome = execute_node(env, self.definition.graph().root(), input).await;
        self.finalize(outcome, &emitter).await
    }

    /// Run the next leaf of a paused run, then pause again
    pub async fn step(&self) -> Result<RunResult> {
        let _guard = self.try_op_lock()?;
        if self.status() != Some(RunStatus::Paused) {
            return Err(WorkflowError::contract(format!(
                "run '{}' is not paused",
                self.run_id
            )));
        }

        self.set_status(RunStatus::Running);
        let replayed = self.recorded_ids();
        let budget = Some(Arc::new(AtomicBool::new(true)));
        let emitter = StreamEmitter::disabled();
        let env = self.make_env(
            emitter.clone(),
            replayed,
            Arc::new(HashMap::new()),
            None,
            budget,
        );
        let input = self.init_data.lock().expect("init data lock poisoned").clone();
        let outcome = execute_node(env, self.definition.graph().root(), input).await;
        self.finalize(outcome, &emitter).await
    }

    /// Re-enter one suspended leaf with resume data
    ///
    /// The walk replays recorded successes to rebuild chained inputs, invokes
    /// the target's handler with `resume_data` set, and continues downstream.
    /// Other suspended leaves stay suspended.
    pub async fn resume(&self, options: ResumeOptions) -> Result<RunResult> {
        let _guard = self.try_op_lock()?;
        match self.status() {
            Some(RunStatus::Suspended) | Some(RunStatus::Paused) => {}
            _ => {
                return Err(WorkflowError::contract(format!(
                    "run '{}' is not suspended",
                    self.run_id
                )))
            }
        }

        let suspended = self.suspended_steps();
        let resolved = resolve_resume_path(&suspended, &options.step).ok_or_else(|| {
            WorkflowError::contract(format!(
                "step '{}' is not currently suspended",
                options.step.join(".")
            ))
        })?;

        if self.definition.validate_inputs {
            if let Some(step) = self.definition.graph().resolve_step(&resolved) {
                if let Some(schema) = &step.resume_schema {
                    if let Err(errors) = schema.validate(&options.resume_data) {
                        return Err(WorkflowError::Validation {
                            step: Some(step.id().to_string()),
                            errors,
                        });
                    }
                }
            }
        }

        self.set_status(RunStatus::Running);
        tracing::info!(run = %self.run_id, step = %resolved.join("."), "resuming run");
        // Still-suspended siblings re-register themselves during the replay.
        self.suspended_paths
            .lock()
            .expect("suspended list lock poisoned")
            .clear();

        let mut targets = HashMap::new();
        targets.insert(resolved, options.resume_data);
        let emitter = StreamEmitter::disabled();
        let env = self.make_env(
            emitter.clone(),
            self.recorded_ids(),
            Arc::new(targets),
            None,
            None,
        );
        let input = self.init_data.lock().expect("init data lock poisoned").clone();
        let outcome = execute_node(env, self.definition.graph().root(), input).await;
        self.finalize(outcome, &emitter).await
    }

    /// Rebuild the execution frontier at a chosen step and run from there
    ///
    /// Results for steps preceding the target are seeded (from
    /// `options.context`, or as empty successes) and replayed without
    /// invoking any handler. The target and everything after it execute
    /// fresh.
    pub async fn time_travel(&self, options: TimeTravelOptions) -> Result<RunResult> {
        let _guard = self.try_op_lock()?;
        if self.status() == Some(RunStatus::Running) {
            return Err(WorkflowError::contract(format!(
                "run '{}' is currently executing",
                self.run_id
            )));
        }

        let (plan, seeded) = build_plan(&self.definition, &options)?;
        tracing::info!(run = %self.run_id, target = %options.step.join("."), "time traveling");

        *self.results.lock().expect("results lock poisoned") = seeded.clone();
        self.suspended_paths
            .lock()
            .expect("suspended list lock poisoned")
            .clear();
        *self.nested_seeds.lock().expect("nested seeds lock poisoned") =
            options.nested_steps_context.clone().unwrap_or_default();

        self.set_status(RunStatus::Running);
        let replayed: HashSet<String> = seeded.keys().cloned().collect();
        let budget = options
            .per_step
            .then(|| Arc::new(AtomicBool::new(true)));
        let emitter = StreamEmitter::disabled();
        let env = self.make_env(
            emitter.clone(),
            replayed,
            Arc::new(HashMap::new()),
            Some(Arc::new(plan)),
            budget,
        );
        let input = self.init_data.lock().expect("init data lock poisoned").clone();
        let outcome = execute_node(env, self.definition.graph().root(), input).await;
        self.finalize(outcome, &emitter).await
    }

    /// Request cooperative cancellation
    ///
    /// In-flight handlers may observe the abort signal and stop early; the
    /// walk cancels at the next node boundary. An idle non-terminal run is
    /// marked canceled immediately.
    pub async fn cancel(&self) -> Result<()> {
        self.abort.abort();
        tracing::info!(run = %self.run_id, "cancel requested");
        if let Ok(_guard) = self.op_lock.try_lock() {
            let terminal = self.status().map(|s| s.is_terminal()).unwrap_or(false);
            if self.status().is_some() && !terminal {
                self.set_status(RunStatus::Canceled);
                self.persist().await?;
            }
        }
        Ok(())
    }

    /// Snapshot of the run's current progress
    pub fn snapshot(&self) -> RunSnapshot {
        RunSnapshot {
            run_id: self.run_id.clone(),
            resource_id: self.resource_id.clone(),
            workflow_name: self.definition.id().to_string(),
            status: self.status().unwrap_or(RunStatus::Running),
            input: self.init_data.lock().expect("init data lock poisoned").clone(),
            steps: self.results.lock().expect("results lock poisoned").clone(),
            state: self.state.get(),
            request_context: self.request_context.to_value(),
            suspended_paths: self.suspended_steps(),
            graph: self.definition.graph().serializable(),
            timestamp: Utc::now(),
        }
    }

    fn try_op_lock(&self) -> Result<tokio::sync::MutexGuard<'_, ()>> {
        self.op_lock.try_lock().map_err(|_| {
            WorkflowError::contract(format!(
                "run '{}' already has an operation in flight",
                self.run_id
            ))
        })
    }

    fn set_status(&self, status: RunStatus) {
        *self.status.lock().expect("status lock poisoned") = Some(status);
    }

    fn recorded_ids(&self) -> HashSet<String> {
        self.results
            .lock()
            .expect("results lock poisoned")
            .keys()
            .cloned()
            .collect()
    }

    fn make_env(
        &self,
        emitter: StreamEmitter,
        replayed: HashSet<String>,
        resume_targets: Arc<HashMap<StepPath, Value>>,
        travel: Option<Arc<TravelPlan>>,
        per_step_budget: Option<Arc<AtomicBool>>,
    ) -> ExecEnv {
        ExecEnv {
            definition: Arc::clone(&self.definition),
            results: self.results.clone(),
            state: self.state.clone(),
            request_context: self.request_context.clone(),
            init_data: self.init_data.lock().expect("init data lock poisoned").clone(),
            abort: self.abort.clone(),
            emitter,
            suspended: self.suspended_paths.clone(),
            path_prefix: Vec::new(),
            replayed: Arc::new(Mutex::new(replayed)),
            resume_targets,
            travel,
            per_step_budget,
            nested_seeds: Arc::new(
                self.nested_seeds
                    .lock()
                    .expect("nested seeds lock poisoned")
                    .clone(),
            ),
        }
    }

    async fn finalize(&self, outcome: NodeOutcome, emitter: &StreamEmitter) -> Result<RunResult> {
        let (status, output, error) = match outcome {
            NodeOutcome::Continue(value) => (RunStatus::Success, Some(value), None),
            // A bail is an early success: its output is the run output.
            NodeOutcome::Bailed(value) => (RunStatus::Success, Some(value), None),
            NodeOutcome::Failed(failure) => (RunStatus::Failed, None, Some(failure)),
            NodeOutcome::Suspended => (RunStatus::Suspended, None, None),
            NodeOutcome::Paused => (RunStatus::Paused, None, None),
            NodeOutcome::Canceled => (RunStatus::Canceled, None, None),
        };
        self.set_status(status);
        tracing::info!(run = %self.run_id, ?status, "run settled");

        let steps = self.results.lock().expect("results lock poisoned").clone();
        let result = RunResult {
            run_id: self.run_id.clone(),
            status,
            output,
            error,
            suspended: self.suspended_steps(),
            steps,
        };
        emitter.emit(RunEvent::RunFinish {
            run_id: self.run_id.clone(),
            status,
            steps: result.steps.len(),
        });

        self.persist().await?;

        // Callback errors are logged, never propagated into the run result.
        if status.is_terminal() {
            if let Some(callback) = &self.definition.on_finish {
                if let Err(err) = callback(&result) {
                    tracing::warn!(run = %self.run_id, error = %err, "finish callback failed");
                }
            }
        }
        if status == RunStatus::Failed {
            if let Some(callback) = &self.definition.on_error {
                if let Err(err) = callback(&result) {
                    tracing::warn!(run = %self.run_id, error = %err, "error callback failed");
                }
            }
        }

        Ok(result)
    }

    async fn persist(&self) -> Result<()> {
        if let Some(store) = &self.store {
            store.save(&self.snapshot()).await?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for WorkflowRun {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowRun")
            .field("run_id", &self.run_id)
            .field("workflow", &self.definition.id())
            .field("status", &self.status())
            .finish()
    }
}

/// Match a requested resume path against the suspended list
///
/// Exact paths match directly; a single id matches a suspended path whose
/// first element (a nested workflow) or last element (the leaf itself)
/// equals it.
fn resolve_resume_path(suspended: &[StepPath], requested: &StepPath) -> Option<StepPath> {
    if suspended.iter().any(|path| path == requested) {
        return Some(requested.clone());
    }
    if let [id] = requested.as_slice() {
        return suspended
            .iter()
            .find(|path| path.last() == Some(id) || path.first() == Some(id))
            .cloned();
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(ids: &[&str]) -> StepPath {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_resolve_exact_path() {
        let suspended = vec![path(&["a"]), path(&["wf", "b"])];
        assert_eq!(
            resolve_resume_path(&suspended, &path(&["wf", "b"])),
            Some(path(&["wf", "b"]))
        );
    }

    #[test]
    fn test_single_id_matches_nested_leaf() {
        let suspended = vec![path(&["wf", "approval"])];
        assert_eq!(
            resolve_resume_path(&suspended, &path(&["approval"])),
            Some(path(&["wf", "approval"]))
        );
        assert_eq!(
            resolve_resume_path(&suspended, &path(&["wf"])),
            Some(path(&["wf", "approval"]))
        );
    }

    #[test]
    fn test_unknown_step_unresolved() {
        let suspended = vec![path(&["a"])];
        assert_eq!(resolve_resume_path(&suspended, &path(&["b"])), None);
    }
}
