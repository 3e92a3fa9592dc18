//! Graph interpreter
//!
//! The engine walks a committed step graph recursively, threading each node's
//! output into the next node's input and recording a [`StepResult`] per
//! recordable node. Control flow is value-driven end to end: every node
//! evaluation settles to a [`NodeOutcome`] tag and composite nodes branch on
//! the tags of their children. Nothing engine-related travels through panics
//! or `Result`.
//!
//! # Replay
//!
//! Every resume, continue, and targeted replay re-walks the graph from the
//! root. Nodes whose id is in the `replayed` set short-circuit: a recorded
//! success yields its stored output without invoking the handler, so the walk
//! reconstructs chained inputs deterministically and reaches the frontier
//! with zero handler re-invocations. Recorded failures are removed from the
//! set and re-execute.
//!
//! # Fan-out merging
//!
//! Branch and Parallel children run concurrently and all settle before the
//! merged outcome is chosen, in priority order: bailed, failed, canceled,
//! suspended, paused, then a combined success object keyed by child step id.

use crate::context::{AbortSignal, RequestContext, RunState, SharedResults};
use crate::definition::WorkflowDefinition;
use crate::graph::{
    resolve_map_source, EvalContext, GraphNode, LoopKind, MapSpec, NodeIndex, SleepSpec,
    SleepUntilSpec,
};
use crate::retry::resolve_attempts;
use crate::step::{Step, StepContext, StepOutcome};
use crate::stream::{RunEvent, StreamEmitter};
use crate::time_travel::TravelPlan;
use chrono::Utc;
use futures::future::{join_all, BoxFuture};
use futures::StreamExt;
use runweave_snapshot::{StepFailure, StepPath, StepResult, StepStatus};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Everything one walk threads through the graph
///
/// Cheap to clone; composite nodes hand clones to their children. A nested
/// workflow swaps in its own definition, result map, replay set, and state
/// while keeping the request context, abort signal, suspended-path list, and
/// emitter shared with the outer walk.
#[derive(Clone)]
pub(crate) struct ExecEnv {
    pub(crate) definition: Arc<WorkflowDefinition>,
    pub(crate) results: SharedResults,
    pub(crate) state: RunState,
    pub(crate) request_context: RequestContext,
    pub(crate) init_data: Value,
    pub(crate) abort: AbortSignal,
    pub(crate) emitter: StreamEmitter,
    /// Absolute paths of currently suspended leaves, shared across nesting
    pub(crate) suspended: Arc<Mutex<Vec<StepPath>>>,
    /// Path from the run root to this walk's graph level
    pub(crate) path_prefix: Vec<String>,
    /// Ids whose recorded results short-circuit instead of executing
    pub(crate) replayed: Arc<Mutex<HashSet<String>>>,
    /// Resume data keyed by absolute suspended path
    pub(crate) resume_targets: Arc<HashMap<StepPath, Value>>,
    /// Targeted-replay plan, when this walk is a time travel
    pub(crate) travel: Option<Arc<TravelPlan>>,
    /// Single-leaf budget for stepwise execution; exhausted budget pauses
    pub(crate) per_step_budget: Option<Arc<AtomicBool>>,
    /// Seed result maps for nested workflows during targeted replay
    pub(crate) nested_seeds: Arc<HashMap<String, HashMap<String, StepResult>>>,
}

impl ExecEnv {
    fn results_snapshot(&self) -> HashMap<String, StepResult> {
        self.results.lock().expect("results lock poisoned").clone()
    }

    fn record(&self, id: &str) -> Option<StepResult> {
        self.results
            .lock()
            .expect("results lock poisoned")
            .get(id)
            .cloned()
    }

    fn insert_record(&self, id: &str, record: StepResult) {
        self.results
            .lock()
            .expect("results lock poisoned")
            .insert(id.to_string(), record);
    }

    /// Mutate a record in place, returning the updated copy
    fn mutate_record(&self, id: &str, f: impl FnOnce(&mut StepResult)) -> StepResult {
        let mut guard = self.results.lock().expect("results lock poisoned");
        let entry = guard
            .entry(id.to_string())
            .or_insert_with(|| StepResult::running(Value::Null));
        f(entry);
        entry.clone()
    }

    fn abs_path(&self, id: &str) -> StepPath {
        let mut path = self.path_prefix.clone();
        path.push(id.to_string());
        path
    }

    fn is_replayed(&self, id: &str) -> bool {
        self.replayed
            .lock()
            .expect("replay set lock poisoned")
            .contains(id)
    }

    fn unreplay(&self, id: &str) {
        self.replayed
            .lock()
            .expect("replay set lock poisoned")
            .remove(id);
    }

    fn push_suspended(&self, path: StepPath) {
        let mut guard = self.suspended.lock().expect("suspended list lock poisoned");
        if !guard.contains(&path) {
            guard.push(path);
        }
    }

    fn eval_context(&self, input: Value, iteration: Option<u64>) -> EvalContext {
        EvalContext {
            input,
            iteration,
            init_data: self.init_data.clone(),
            results: self.results_snapshot(),
        }
    }
}

/// Settled evaluation of one graph node
#[derive(Debug, Clone)]
pub(crate) enum NodeOutcome {
    /// The node produced an output; the walk continues
    Continue(Value),
    /// A leaf in this subtree suspended; its path is in the suspended list
    Suspended,
    /// A leaf in this subtree failed after exhausting retries
    Failed(StepFailure),
    /// A leaf requested early successful termination of the whole run
    Bailed(Value),
    /// The stepwise budget ran out before this node's leaf
    Paused,
    /// Abort was observed before this node executed
    Canceled,
}

/// Evaluate one node of the graph
pub(crate) fn execute_node(
    env: ExecEnv,
    index: NodeIndex,
    input: Value,
) -> BoxFuture<'static, NodeOutcome> {
    Box::pin(async move {
        if env.abort.is_aborted() {
            return NodeOutcome::Canceled;
        }
        let node = env.definition.graph().node(index).clone();
        match node {
            GraphNode::Step(step) => execute_leaf(env, step, input).await,
            GraphNode::Sequence { children } => {
                let mut current = input;
                for child in children {
                    match execute_node(env.clone(), child, current).await {
                        NodeOutcome::Continue(output) => current = output,
                        other => return other,
                    }
                }
                NodeOutcome::Continue(current)
            }
            GraphNode::Branch { arms } => {
                // All predicates see the same upstream output, evaluated
                // before any arm runs.
                let eval = env.eval_context(input.clone(), None);
                let matched: Vec<NodeIndex> = arms
                    .iter()
                    .filter(|(predicate, _)| predicate(&eval))
                    .map(|(_, child)| *child)
                    .collect();
                if matched.is_empty() {
                    return NodeOutcome::Continue(json!({}));
                }
                execute_fanout(&env, &matched, input).await
            }
            GraphNode::Parallel { children } => execute_fanout(&env, &children, input).await,
            GraphNode::Loop {
                kind,
                body,
                predicate,
            } => execute_loop(env, kind, body, predicate, input).await,
            GraphNode::Foreach { body, concurrency } => {
                execute_foreach(env, body, concurrency, input).await
            }
            GraphNode::Sleep { id, spec } => execute_sleep(env, id, spec, input).await,
            GraphNode::SleepUntil { id, spec } => execute_sleep_until(env, id, spec, input).await,
            GraphNode::Map { id, spec } => execute_map(env, id, spec, input),
            GraphNode::Nested { definition } => execute_nested(env, definition, input).await,
        }
    })
}

/// Run fan-out children concurrently and merge their outcomes
async fn execute_fanout(env: &ExecEnv, children: &[NodeIndex], input: Value) -> NodeOutcome {
    let futures = children
        .iter()
        .map(|child| execute_node(env.clone(), *child, input.clone()));
    let outcomes = join_all(futures).await;
    let tagged = children
        .iter()
        .map(|child| env.definition.graph().primary_id(*child))
        .zip(outcomes)
        .collect();
    merge_fanout(tagged)
}

/// Merge settled fan-out outcomes in priority order
fn merge_fanout(outcomes: Vec<(Option<String>, NodeOutcome)>) -> NodeOutcome {
    for (_, outcome) in &outcomes {
        if let NodeOutcome::Bailed(output) = outcome {
            return NodeOutcome::Bailed(output.clone());
        }
    }
    for (_, outcome) in &outcomes {
        if let NodeOutcome::Failed(failure) = outcome {
            return NodeOutcome::Failed(failure.clone());
        }
    }
    if outcomes
        .iter()
        .any(|(_, o)| matches!(o, NodeOutcome::Canceled))
    {
        return NodeOutcome::Canceled;
    }
    if outcomes
        .iter()
        .any(|(_, o)| matches!(o, NodeOutcome::Suspended))
    {
        return NodeOutcome::Suspended;
    }
    if outcomes
        .iter()
        .any(|(_, o)| matches!(o, NodeOutcome::Paused))
    {
        return NodeOutcome::Paused;
    }
    let mut map = serde_json::Map::new();
    for (id, outcome) in outcomes {
        if let (Some(id), NodeOutcome::Continue(output)) = (id, outcome) {
            map.insert(id, output);
        }
    }
    NodeOutcome::Continue(Value::Object(map))
}

/// Execute one leaf step: replay handling, budget, validation, retries
async fn execute_leaf(env: ExecEnv, step: Step, input: Value) -> NodeOutcome {
    let id = step.id().to_string();
    let path = env.abs_path(&id);

    let mut resume_data: Option<Value> = None;
    if env.is_replayed(&id) {
        match env.record(&id) {
            Some(record) if record.status == StepStatus::Success => {
                return NodeOutcome::Continue(record.output.unwrap_or(Value::Null));
            }
            Some(record) if record.status == StepStatus::Suspended => {
                match env.resume_targets.get(&path) {
                    Some(data) => {
                        resume_data = Some(data.clone());
                        env.unreplay(&id);
                    }
                    None => {
                        env.push_suspended(path);
                        return NodeOutcome::Suspended;
                    }
                }
            }
            _ => env.unreplay(&id),
        }
    }

    // Targeted replay may override the chained input at its target leaf.
    let mut input = input;
    if let Some(travel) = &env.travel {
        if travel.target == path {
            if let Some(override_input) = &travel.input {
                input = override_input.clone();
            }
        }
    }

    if let Some(budget) = &env.per_step_budget {
        if !budget.swap(false, Ordering::SeqCst) {
            return NodeOutcome::Paused;
        }
    }

    if resume_data.is_none() && env.definition.validate_inputs {
        if let Some(schema) = &step.input_schema {
            if let Err(errors) = schema.validate(&input) {
                env.emitter.emit(RunEvent::StepStart {
                    step_id: id.clone(),
                    payload: input.clone(),
                });
                let failure = StepFailure::new(format!(
                    "input validation failed for step '{id}'"
                ))
                .with_details(json!({ "errors": errors }));
                let mut record = StepResult::running(input.clone());
                record.fail(failure.clone());
                env.insert_record(&id, record.clone());
                env.emitter.emit(RunEvent::StepResult {
                    step_id: id.clone(),
                    result: record,
                });
                return NodeOutcome::Failed(failure);
            }
        }
    }

    match &resume_data {
        Some(data) => {
            env.mutate_record(&id, |record| record.resume(data.clone()));
        }
        None => {
            env.insert_record(&id, StepResult::running(input.clone()));
        }
    }
    env.emitter.emit(RunEvent::StepStart {
        step_id: id.clone(),
        payload: input.clone(),
    });
    tracing::debug!(step = %id, "executing step");

    let attempts = resolve_attempts(&step, &env.definition.retry_config);
    let mut remaining = attempts;
    let mut outcome = invoke(&env, &step, &id, &input, &resume_data).await;
    while matches!(outcome, StepOutcome::Failed(_)) && remaining > 0 {
        remaining -= 1;
        tracing::debug!(step = %id, remaining, "step failed, retrying");
        outcome = invoke(&env, &step, &id, &input, &resume_data).await;
    }

    match outcome {
        StepOutcome::Success(output) => {
            let record = env.mutate_record(&id, |record| record.complete(output.clone()));
            env.emitter.emit(RunEvent::StepResult {
                step_id: id.clone(),
                result: record,
            });
            env.emitter.emit(RunEvent::StepFinish { step_id: id });
            NodeOutcome::Continue(output)
        }
        StepOutcome::Suspended(payload) => {
            let record = env.mutate_record(&id, |record| record.suspend(payload.clone()));
            env.push_suspended(path);
            env.emitter.emit(RunEvent::StepResult {
                step_id: id,
                result: record,
            });
            NodeOutcome::Suspended
        }
        StepOutcome::Bailed(output) => {
            let record = env.mutate_record(&id, |record| record.complete(output.clone()));
            env.emitter.emit(RunEvent::StepResult {
                step_id: id.clone(),
                result: record,
            });
            env.emitter.emit(RunEvent::StepFinish { step_id: id });
            NodeOutcome::Bailed(output)
        }
        StepOutcome::Failed(failure) => {
            let record = env.mutate_record(&id, |record| record.fail(failure.clone()));
            env.emitter.emit(RunEvent::StepResult {
                step_id: id,
                result: record,
            });
            NodeOutcome::Failed(failure)
        }
    }
}

async fn invoke(
    env: &ExecEnv,
    step: &Step,
    id: &str,
    input: &Value,
    resume_data: &Option<Value>,
) -> StepOutcome {
    let ctx = StepContext {
        step_id: id.to_string(),
        input: input.clone(),
        resume_data: resume_data.clone(),
        init_data: env.init_data.clone(),
        state: env.state.clone(),
        request_context: env.request_context.clone(),
        results: env.results.clone(),
        abort: env.abort.clone(),
        emitter: env.emitter.clone(),
    };
    (step.handler)(ctx).await
}

/// Repeat the body per the loop kind, counting iterations in the body's
/// result metadata so replay restores the count
async fn execute_loop(
    env: ExecEnv,
    kind: LoopKind,
    body: NodeIndex,
    predicate: crate::graph::ConditionFn,
    input: Value,
) -> NodeOutcome {
    let primary = match env.definition.graph().primary_id(body) {
        Some(id) => id,
        None => {
            return NodeOutcome::Failed(StepFailure::new("loop body has no recordable step"))
        }
    };

    let mut count: u64 = 0;
    if env.is_replayed(&primary) {
        if let Some(record) = env.record(&primary) {
            if let Some(stored) = record
                .metadata_field("iterationCount")
                .and_then(|v| v.as_u64())
            {
                count = stored;
            }
        }
    }

    let mut current = input;
    loop {
        // A recorded success short-circuits the body without re-running it;
        // that iteration was already counted before the walk restarted.
        let short_circuit = env.is_replayed(&primary)
            && env
                .record(&primary)
                .map(|r| r.status == StepStatus::Success)
                .unwrap_or(false);

        let output = match execute_node(env.clone(), body, current).await {
            NodeOutcome::Continue(output) => output,
            other => return other,
        };

        if short_circuit {
            env.unreplay(&primary);
        } else {
            count += 1;
            env.mutate_record(&primary, |record| {
                record.set_metadata("iterationCount", json!(count));
            });
        }

        let eval = env.eval_context(output.clone(), Some(count));
        let exit = match kind {
            LoopKind::DoUntil => predicate(&eval),
            LoopKind::DoWhile => !predicate(&eval),
        };
        if exit {
            return NodeOutcome::Continue(output);
        }
        current = output;
    }
}

/// Run the body once per array element, recording an aggregate output in
/// input order under the body's id
async fn execute_foreach(
    env: ExecEnv,
    body: NodeIndex,
    concurrency: usize,
    input: Value,
) -> NodeOutcome {
    let primary = match env.definition.graph().primary_id(body) {
        Some(id) => id,
        None => {
            return NodeOutcome::Failed(StepFailure::new("foreach body has no recordable step"))
        }
    };

    let mut start = 0;
    let mut outputs: Vec<Value> = Vec::new();
    if env.is_replayed(&primary) {
        match env.record(&primary) {
            Some(record) if record.status == StepStatus::Success => {
                return NodeOutcome::Continue(record.output.unwrap_or(Value::Null));
            }
            Some(record) if record.status == StepStatus::Suspended => {
                let path = env.abs_path(&primary);
                if !env.resume_targets.contains_key(&path) {
                    env.push_suspended(path);
                    return NodeOutcome::Suspended;
                }
                // Re-enter the suspended element; the leaf resume handling
                // fires because the id is still in the replay set.
                let index = record
                    .metadata_field("foreachIndex")
                    .and_then(|v| v.as_u64())
                    .unwrap_or(0) as usize;
                outputs = record
                    .metadata_field("foreachOutputs")
                    .and_then(|v| v.as_array().cloned())
                    .unwrap_or_default();
                let elements = match input.as_array() {
                    Some(elements) => elements.clone(),
                    None => {
                        return NodeOutcome::Failed(StepFailure::new(format!(
                            "foreach over '{primary}' requires an array input"
                        )))
                    }
                };
                let element = elements.get(index).cloned().unwrap_or(Value::Null);
                match execute_node(env.clone(), body, element).await {
                    NodeOutcome::Continue(output) => {
                        if outputs.len() <= index {
                            outputs.resize(index + 1, Value::Null);
                        }
                        outputs[index] = output;
                    }
                    other => return other,
                }
                start = index + 1;
            }
            Some(record) => {
                // Interrupted mid-collection; keep the outputs gathered so
                // far so settled elements are not re-executed.
                outputs = record
                    .metadata_field("foreachOutputs")
                    .and_then(|v| v.as_array().cloned())
                    .unwrap_or_default();
                env.unreplay(&primary);
            }
            None => env.unreplay(&primary),
        }
    }
    env.unreplay(&primary);

    let elements = match input.as_array() {
        Some(elements) => elements.clone(),
        None => {
            let failure = StepFailure::new(format!(
                "foreach over '{primary}' requires an array input"
            ));
            let mut record = StepResult::running(input.clone());
            record.fail(failure.clone());
            env.insert_record(&primary, record);
            return NodeOutcome::Failed(failure);
        }
    };

    if concurrency <= 1 {
        for (index, element) in elements.iter().enumerate().skip(start) {
            if outputs.get(index).map(|v| !v.is_null()).unwrap_or(false) {
                continue;
            }
            match execute_node(env.clone(), body, element.clone()).await {
                NodeOutcome::Continue(output) => {
                    if outputs.len() <= index {
                        outputs.resize(index + 1, Value::Null);
                    }
                    outputs[index] = output;
                }
                suspended @ (NodeOutcome::Suspended | NodeOutcome::Paused) => {
                    env.mutate_record(&primary, |record| {
                        record.set_metadata("foreachIndex", json!(index));
                        record.set_metadata("foreachOutputs", json!(outputs.clone()));
                    });
                    return suspended;
                }
                other => return other,
            }
        }
    } else {
        let pending: Vec<(usize, Value)> = elements
            .iter()
            .cloned()
            .enumerate()
            .skip(start)
            .filter(|(index, _)| outputs.get(*index).map(|v| v.is_null()).unwrap_or(true))
            .collect();
        let settled: Vec<(usize, NodeOutcome)> =
            futures::stream::iter(pending.into_iter().map(|(index, element)| {
                let env = env.clone();
                async move { (index, execute_node(env, body, element).await) }
            }))
            .buffered(concurrency)
            .collect()
            .await;

        outputs.resize(elements.len(), Value::Null);
        let mut suspended_at: Option<usize> = None;
        let mut paused = false;
        let mut canceled = false;
        let mut failed: Option<StepFailure> = None;
        for (index, outcome) in settled {
            match outcome {
                NodeOutcome::Continue(output) => outputs[index] = output,
                NodeOutcome::Bailed(output) => return NodeOutcome::Bailed(output),
                NodeOutcome::Failed(failure) => failed = failed.or(Some(failure)),
                NodeOutcome::Canceled => canceled = true,
                NodeOutcome::Suspended => {
                    suspended_at = Some(suspended_at.map_or(index, |prior| prior.min(index)));
                }
                NodeOutcome::Paused => paused = true,
            }
        }
        if let Some(failure) = failed {
            return NodeOutcome::Failed(failure);
        }
        if canceled {
            return NodeOutcome::Canceled;
        }
        if let Some(index) = suspended_at {
            env.mutate_record(&primary, |record| {
                record.status = StepStatus::Suspended;
                record.set_metadata("foreachIndex", json!(index));
                record.set_metadata("foreachOutputs", json!(outputs.clone()));
            });
            return NodeOutcome::Suspended;
        }
        if paused {
            env.mutate_record(&primary, |record| {
                record.set_metadata("foreachOutputs", json!(outputs.clone()));
            });
            return NodeOutcome::Paused;
        }
    }

    let aggregate = Value::Array(outputs);
    let record = env.mutate_record(&primary, |record| record.complete(aggregate.clone()));
    env.emitter.emit(RunEvent::StepResult {
        step_id: primary.clone(),
        result: record,
    });
    env.emitter.emit(RunEvent::StepFinish { step_id: primary });
    NodeOutcome::Continue(aggregate)
}

async fn execute_sleep(env: ExecEnv, id: String, spec: SleepSpec, input: Value) -> NodeOutcome {
    if env.is_replayed(&id) {
        if let Some(record) = env.record(&id) {
            if record.status == StepStatus::Success {
                return NodeOutcome::Continue(record.output.unwrap_or(Value::Null));
            }
        }
        env.unreplay(&id);
    }

    let mut record = StepResult::running(input.clone());
    record.status = StepStatus::Waiting;
    env.insert_record(&id, record);
    env.emitter.emit(RunEvent::StepStart {
        step_id: id.clone(),
        payload: input.clone(),
    });
    env.emitter.emit(RunEvent::StepWaiting {
        step_id: id.clone(),
    });

    let duration = match spec {
        SleepSpec::Duration(duration) => duration,
        SleepSpec::Computed(f) => f(&env.eval_context(input.clone(), None)),
    };
    tracing::debug!(node = %id, ms = duration.as_millis() as u64, "sleeping");
    tokio::time::sleep(duration).await;

    let record = env.mutate_record(&id, |record| {
        record.set_metadata("durationMs", json!(duration.as_millis() as u64));
        record.complete(input.clone());
    });
    env.emitter.emit(RunEvent::StepResult {
        step_id: id.clone(),
        result: record,
    });
    env.emitter.emit(RunEvent::StepFinish { step_id: id });
    NodeOutcome::Continue(input)
}

async fn execute_sleep_until(
    env: ExecEnv,
    id: String,
    spec: SleepUntilSpec,
    input: Value,
) -> NodeOutcome {
    if env.is_replayed(&id) {
        if let Some(record) = env.record(&id) {
            if record.status == StepStatus::Success {
                return NodeOutcome::Continue(record.output.unwrap_or(Value::Null));
            }
        }
        env.unreplay(&id);
    }

    let mut record = StepResult::running(input.clone());
    record.status = StepStatus::Waiting;
    env.insert_record(&id, record);
    env.emitter.emit(RunEvent::StepStart {
        step_id: id.clone(),
        payload: input.clone(),
    });
    env.emitter.emit(RunEvent::StepWaiting {
        step_id: id.clone(),
    });

    let at = match spec {
        SleepUntilSpec::At(at) => at,
        SleepUntilSpec::Computed(f) => f(&env.eval_context(input.clone(), None)),
    };
    // Past deadlines proceed immediately.
    let remaining = (at - Utc::now()).to_std().unwrap_or_default();
    tokio::time::sleep(remaining).await;

    let record = env.mutate_record(&id, |record| {
        record.set_metadata("until", json!(at.to_rfc3339()));
        record.complete(input.clone());
    });
    env.emitter.emit(RunEvent::StepResult {
        step_id: id.clone(),
        result: record,
    });
    env.emitter.emit(RunEvent::StepFinish { step_id: id });
    NodeOutcome::Continue(input)
}

/// Reshape upstream outputs into the next node's input; recorded as an
/// instantaneous successful step
fn execute_map(env: ExecEnv, id: String, spec: MapSpec, input: Value) -> NodeOutcome {
    if env.is_replayed(&id) {
        if let Some(record) = env.record(&id) {
            if record.status == StepStatus::Success {
                return NodeOutcome::Continue(record.output.unwrap_or(Value::Null));
            }
        }
        env.unreplay(&id);
    }

    env.emitter.emit(RunEvent::StepStart {
        step_id: id.clone(),
        payload: input.clone(),
    });

    let value = match spec {
        MapSpec::Bindings(bindings) => {
            let results = env.results_snapshot();
            let mut map = serde_json::Map::new();
            for (field, source) in &bindings {
                map.insert(
                    field.clone(),
                    resolve_map_source(source, &results, &env.init_data),
                );
            }
            Value::Object(map)
        }
        MapSpec::Transform(f) => f(&env.eval_context(input.clone(), None)),
    };

    let mut record = StepResult::running(input);
    record.complete(value.clone());
    env.insert_record(&id, record.clone());
    env.emitter.emit(RunEvent::StepResult {
        step_id: id.clone(),
        result: record,
    });
    env.emitter.emit(RunEvent::StepFinish { step_id: id });
    NodeOutcome::Continue(value)
}

/// Execute an embedded workflow in its own result and state scope
///
/// The nested walk shares the request context, abort signal, suspended-path
/// list, resume targets, and emitter with the outer walk; its per-step
/// results are preserved in the outer record's metadata so suspend/resume and
/// targeted replay can reconstruct the inner scope.
async fn execute_nested(
    env: ExecEnv,
    definition: Arc<WorkflowDefinition>,
    input: Value,
) -> NodeOutcome {
    let id = definition.id().to_string();
    let path = env.abs_path(&id);

    let mut child_results: HashMap<String, StepResult> = HashMap::new();
    if env.is_replayed(&id) {
        match env.record(&id) {
            Some(record) if record.status == StepStatus::Success => {
                return NodeOutcome::Continue(record.output.unwrap_or(Value::Null));
            }
            Some(record) if record.status == StepStatus::Suspended => {
                let targets_inside = env
                    .resume_targets
                    .keys()
                    .any(|target| target.len() > path.len() && target.starts_with(&path));
                if !targets_inside {
                    let relative = record
                        .suspend_payload
                        .as_ref()
                        .and_then(|p| p.get("__workflow_path"))
                        .and_then(|v| serde_json::from_value::<Vec<String>>(v.clone()).ok())
                        .unwrap_or_else(|| vec![id.clone()]);
                    let mut full = env.path_prefix.clone();
                    full.extend(relative);
                    env.push_suspended(full);
                    return NodeOutcome::Suspended;
                }
                if let Some(stored) = record.metadata_field("nestedSteps") {
                    child_results = serde_json::from_value(stored.clone()).unwrap_or_default();
                }
                env.unreplay(&id);
            }
            _ => env.unreplay(&id),
        }
    }

    if child_results.is_empty() {
        if let Some(seed) = env.nested_seeds.get(&id) {
            child_results = seed.clone();
        }
    }

    if definition.validate_inputs {
        if let Some(schema) = definition.input_schema() {
            if let Err(errors) = schema.validate(&input) {
                env.emitter.emit(RunEvent::StepStart {
                    step_id: id.clone(),
                    payload: input.clone(),
                });
                let failure = StepFailure::new(format!(
                    "input validation failed for workflow '{id}'"
                ))
                .with_details(json!({ "errors": errors }));
                let mut record = StepResult::running(input.clone());
                record.fail(failure.clone());
                env.insert_record(&id, record.clone());
                env.emitter.emit(RunEvent::StepResult {
                    step_id: id,
                    result: record,
                });
                return NodeOutcome::Failed(failure);
            }
        }
    }

    env.insert_record(&id, StepResult::running(input.clone()));
    env.emitter.emit(RunEvent::StepStart {
        step_id: id.clone(),
        payload: input.clone(),
    });
    tracing::debug!(workflow = %id, "entering nested workflow");

    let child_replayed: HashSet<String> = child_results.keys().cloned().collect();
    let child_env = ExecEnv {
        definition: Arc::clone(&definition),
        results: Arc::new(Mutex::new(child_results)),
        state: RunState::new(Value::Null),
        request_context: env.request_context.clone(),
        init_data: input.clone(),
        abort: env.abort.clone(),
        emitter: env.emitter.clone(),
        suspended: env.suspended.clone(),
        path_prefix: path.clone(),
        replayed: Arc::new(Mutex::new(child_replayed)),
        resume_targets: env.resume_targets.clone(),
        travel: env.travel.clone(),
        per_step_budget: env.per_step_budget.clone(),
        nested_seeds: env.nested_seeds.clone(),
    };
    let root = child_env.definition.graph().root();
    let outcome = execute_node(child_env.clone(), root, input).await;

    let nested_steps = {
        let guard = child_env.results.lock().expect("results lock poisoned");
        serde_json::to_value(&*guard).unwrap_or(Value::Null)
    };

    match outcome {
        NodeOutcome::Continue(output) => {
            let record = env.mutate_record(&id, |record| {
                record.set_metadata("nestedSteps", nested_steps.clone());
                record.complete(output.clone());
            });
            env.emitter.emit(RunEvent::StepResult {
                step_id: id.clone(),
                result: record,
            });
            env.emitter.emit(RunEvent::StepFinish { step_id: id });
            NodeOutcome::Continue(output)
        }
        NodeOutcome::Suspended => {
            // The inner leaf already pushed its absolute path; mirror it in
            // the outer record so callers can address the nested leaf.
            let relative: Vec<String> = {
                let guard = env.suspended.lock().expect("suspended list lock poisoned");
                guard
                    .iter()
                    .find(|p| p.len() > path.len() && p.starts_with(&path))
                    .map(|p| p[env.path_prefix.len()..].to_vec())
                    .unwrap_or_else(|| vec![id.clone()])
            };
            let record = env.mutate_record(&id, |record| {
                record.set_metadata("nestedSteps", nested_steps.clone());
                record.suspend(json!({ "__workflow_path": relative }));
            });
            env.emitter.emit(RunEvent::StepResult {
                step_id: id,
                result: record,
            });
            NodeOutcome::Suspended
        }
        NodeOutcome::Failed(failure) => {
            let record = env.mutate_record(&id, |record| {
                record.set_metadata("nestedSteps", nested_steps.clone());
                record.fail(failure.clone());
            });
            env.emitter.emit(RunEvent::StepResult {
                step_id: id,
                result: record,
            });
            NodeOutcome::Failed(failure)
        }
        NodeOutcome::Bailed(output) => {
            let record = env.mutate_record(&id, |record| {
                record.set_metadata("nestedSteps", nested_steps.clone());
                record.complete(output.clone());
            });
            env.emitter.emit(RunEvent::StepResult {
                step_id: id.clone(),
                result: record,
            });
            env.emitter.emit(RunEvent::StepFinish { step_id: id });
            NodeOutcome::Bailed(output)
        }
        other @ (NodeOutcome::Paused | NodeOutcome::Canceled) => {
            env.mutate_record(&id, |record| {
                record.set_metadata("nestedSteps", nested_steps.clone());
            });
            other
        }
    }
}
