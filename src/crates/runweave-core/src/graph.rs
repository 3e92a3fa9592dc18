//! Core step-graph data structures
//!
//! A [`StepGraph`] is an immutable tagged tree of nodes compiled from the
//! fluent builder. Nodes live in a single arena (`Vec<GraphNode>`) and refer
//! to each other by [`NodeIndex`], so reusing a step in several places always
//! goes through an explicit `clone_as` with a fresh id rather than structural
//! sharing of one object.
//!
//! # Node kinds
//!
//! | Kind | Semantics |
//! |------|-----------|
//! | `Step` | unit of work (leaf) |
//! | `Sequence` | thread output → input through children in order |
//! | `Branch` | run every child whose predicate is true |
//! | `Loop` | repeat body until/while a predicate holds |
//! | `Foreach` | map body over input-array elements |
//! | `Parallel` | run children concurrently, isolated from each other |
//! | `Sleep` / `SleepUntil` | park the walk for a duration / until a moment |
//! | `Map` | pure reshaping of upstream outputs |
//! | `Nested` | embedded workflow definition, recursively interpreted |

use crate::definition::WorkflowDefinition;
use crate::step::Step;
use chrono::{DateTime, Utc};
use runweave_snapshot::{StepPath, StepResult, StepStatus};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Index of a node within its graph's arena
pub type NodeIndex = usize;

/// Read-only context handed to predicates, computed sleeps, and map transforms
///
/// Pure functions only see what this context supplies: the upstream input,
/// the loop iteration count (when inside a loop predicate), the run's initial
/// input, and the results recorded so far.
#[derive(Debug, Clone)]
pub struct EvalContext {
    pub(crate) input: Value,
    pub(crate) iteration: Option<u64>,
    pub(crate) init_data: Value,
    pub(crate) results: HashMap<String, StepResult>,
}

impl EvalContext {
    /// Upstream input the evaluated node received
    pub fn input(&self) -> &Value {
        &self.input
    }

    /// 1-based count of completed loop body runs, inside loop predicates
    pub fn iteration(&self) -> Option<u64> {
        self.iteration
    }

    /// Root input the run was started with
    pub fn init_data(&self) -> &Value {
        &self.init_data
    }

    /// Result of a previously executed step, by id
    pub fn get_step_result(&self, id: &str) -> Option<&StepResult> {
        self.results.get(id)
    }
}

/// Pure predicate over an [`EvalContext`]
pub type ConditionFn = Arc<dyn Fn(&EvalContext) -> bool + Send + Sync>;

/// Build a [`ConditionFn`] from a closure
pub fn condition<F>(f: F) -> ConditionFn
where
    F: Fn(&EvalContext) -> bool + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Loop repetition rule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopKind {
    /// Repeat while the predicate is false (exit on first true)
    DoUntil,
    /// Repeat while the predicate is true (exit on first false)
    DoWhile,
}

/// Sleep duration, literal or computed from upstream output
#[derive(Clone)]
pub enum SleepSpec {
    /// Fixed duration
    Duration(Duration),
    /// Duration computed from the node's input at execution time
    Computed(Arc<dyn Fn(&EvalContext) -> Duration + Send + Sync>),
}

/// Sleep deadline, literal or computed from upstream output
#[derive(Clone)]
pub enum SleepUntilSpec {
    /// Fixed target timestamp
    At(DateTime<Utc>),
    /// Timestamp computed from the node's input at execution time
    Computed(Arc<dyn Fn(&EvalContext) -> DateTime<Utc> + Send + Sync>),
}

/// Source of one mapped field
#[derive(Clone, Debug)]
pub enum MapSource {
    /// Output of a prior step, first candidate that actually ran
    ///
    /// Non-executed candidates read as empty objects, so a path into them
    /// resolves to null. Listing several candidates is how a map placed after
    /// a branch picks up whichever arm executed.
    StepOutput {
        /// Candidate step ids, checked in order
        candidates: Vec<String>,
        /// Optional dot-separated path into the output
        path: Option<String>,
    },
    /// The run's initial input
    InitData {
        /// Optional dot-separated path into the input
        path: Option<String>,
    },
    /// A constant value
    Constant(Value),
}

impl MapSource {
    /// Full output of one step
    pub fn step(id: impl Into<String>) -> Self {
        Self::StepOutput {
            candidates: vec![id.into()],
            path: None,
        }
    }

    /// Field of one step's output, by dot-separated path
    pub fn step_path(id: impl Into<String>, path: impl Into<String>) -> Self {
        Self::StepOutput {
            candidates: vec![id.into()],
            path: Some(path.into()),
        }
    }

    /// Field resolved from whichever of the candidate steps actually ran
    pub fn any_of(candidates: Vec<String>, path: impl Into<String>) -> Self {
        Self::StepOutput {
            candidates,
            path: Some(path.into()),
        }
    }

    /// The run's initial input, optionally a field of it
    pub fn init(path: Option<&str>) -> Self {
        Self::InitData {
            path: path.map(|p| p.to_string()),
        }
    }

    /// A constant value
    pub fn constant(value: Value) -> Self {
        Self::Constant(value)
    }

    /// Step ids this source references, for commit-time validation
    pub(crate) fn referenced_steps(&self) -> &[String] {
        match self {
            Self::StepOutput { candidates, .. } => candidates,
            _ => &[],
        }
    }
}

/// Map node payload: field bindings or a free transform
#[derive(Clone)]
pub enum MapSpec {
    /// Build an object field-by-field from named sources
    Bindings(Vec<(String, MapSource)>),
    /// Arbitrary pure reshaping of the evaluation context
    Transform(Arc<dyn Fn(&EvalContext) -> Value + Send + Sync>),
}

/// One node of the compiled graph
#[derive(Clone)]
pub enum GraphNode {
    /// Leaf unit of work
    Step(Step),
    /// Children executed in order, output threaded into the next input
    Sequence { children: Vec<NodeIndex> },
    /// Every arm whose predicate is true executes
    Branch { arms: Vec<(ConditionFn, NodeIndex)> },
    /// Body repeated per [`LoopKind`]
    Loop {
        kind: LoopKind,
        body: NodeIndex,
        predicate: ConditionFn,
    },
    /// Body mapped over the elements of an array input
    Foreach { body: NodeIndex, concurrency: usize },
    /// Children dispatched concurrently with per-child isolation
    Parallel { children: Vec<NodeIndex> },
    /// Park the walk for a duration
    Sleep { id: String, spec: SleepSpec },
    /// Park the walk until a moment
    SleepUntil { id: String, spec: SleepUntilSpec },
    /// Pure reshaping of upstream outputs into the next input
    Map { id: String, spec: MapSpec },
    /// Embedded workflow, interpreted recursively
    Nested { definition: Arc<WorkflowDefinition> },
}

impl From<Step> for GraphNode {
    fn from(step: Step) -> Self {
        GraphNode::Step(step)
    }
}

impl From<Arc<WorkflowDefinition>> for GraphNode {
    fn from(definition: Arc<WorkflowDefinition>) -> Self {
        GraphNode::Nested { definition }
    }
}

impl std::fmt::Debug for GraphNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GraphNode::Step(step) => f.debug_tuple("Step").field(&step.id()).finish(),
            GraphNode::Sequence { children } => {
                f.debug_struct("Sequence").field("children", children).finish()
            }
            GraphNode::Branch { arms } => f
                .debug_struct("Branch")
                .field("arms", &arms.len())
                .finish(),
            GraphNode::Loop { kind, body, .. } => f
                .debug_struct("Loop")
                .field("kind", kind)
                .field("body", body)
                .finish(),
            GraphNode::Foreach { body, concurrency } => f
                .debug_struct("Foreach")
                .field("body", body)
                .field("concurrency", concurrency)
                .finish(),
            GraphNode::Parallel { children } => {
                f.debug_struct("Parallel").field("children", children).finish()
            }
            GraphNode::Sleep { id, .. } => f.debug_struct("Sleep").field("id", id).finish(),
            GraphNode::SleepUntil { id, .. } => {
                f.debug_struct("SleepUntil").field("id", id).finish()
            }
            GraphNode::Map { id, .. } => f.debug_struct("Map").field("id", id).finish(),
            GraphNode::Nested { definition } => f
                .debug_struct("Nested")
                .field("workflow", &definition.id())
                .finish(),
        }
    }
}

/// Immutable compiled step graph: arena of nodes plus a root index
#[derive(Debug, Clone)]
pub struct StepGraph {
    pub(crate) nodes: Vec<GraphNode>,
    pub(crate) root: NodeIndex,
}

impl StepGraph {
    /// Node by arena index
    pub(crate) fn node(&self, index: NodeIndex) -> &GraphNode {
        &self.nodes[index]
    }

    /// Root node index (always a `Sequence`)
    pub(crate) fn root(&self) -> NodeIndex {
        self.root
    }

    /// Id a node's results are recorded under, when it has one
    ///
    /// Loop and Foreach report their body's id; Sequence, Branch, and
    /// Parallel are structural and record nothing themselves.
    pub(crate) fn primary_id(&self, index: NodeIndex) -> Option<String> {
        match self.node(index) {
            GraphNode::Step(step) => Some(step.id().to_string()),
            GraphNode::Nested { definition } => Some(definition.id().to_string()),
            GraphNode::Sleep { id, .. }
            | GraphNode::SleepUntil { id, .. }
            | GraphNode::Map { id, .. } => Some(id.clone()),
            GraphNode::Loop { body, .. } | GraphNode::Foreach { body, .. } => {
                self.primary_id(*body)
            }
            GraphNode::Sequence { .. }
            | GraphNode::Branch { .. }
            | GraphNode::Parallel { .. } => None,
        }
    }

    /// All recordable ids at this graph level, in document order
    ///
    /// Used for commit-time uniqueness validation and predecessor seeding.
    /// Does not descend into nested workflows; a nested workflow contributes
    /// its own id only.
    pub(crate) fn recordable_ids(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.collect_ids_until(self.root, None, &mut out);
        out
    }

    /// Recordable ids preceding `target` in document order, at this level
    pub(crate) fn predecessor_ids(&self, target: &str) -> Vec<String> {
        let mut out = Vec::new();
        self.collect_ids_until(self.root, Some(target), &mut out);
        out
    }

    /// Preorder id collection; returns true once the target was reached
    fn collect_ids_until(
        &self,
        index: NodeIndex,
        target: Option<&str>,
        out: &mut Vec<String>,
    ) -> bool {
        match self.node(index) {
            GraphNode::Step(step) => {
                if target == Some(step.id()) {
                    return true;
                }
                out.push(step.id().to_string());
            }
            GraphNode::Nested { definition } => {
                if target == Some(definition.id()) {
                    return true;
                }
                out.push(definition.id().to_string());
            }
            GraphNode::Sleep { id, .. }
            | GraphNode::SleepUntil { id, .. }
            | GraphNode::Map { id, .. } => {
                if target == Some(id.as_str()) {
                    return true;
                }
                out.push(id.clone());
            }
            GraphNode::Sequence { children } | GraphNode::Parallel { children } => {
                for child in children {
                    if self.collect_ids_until(*child, target, out) {
                        return true;
                    }
                }
            }
            GraphNode::Branch { arms } => {
                for (_, child) in arms {
                    if self.collect_ids_until(*child, target, out) {
                        return true;
                    }
                }
            }
            GraphNode::Loop { body, .. } | GraphNode::Foreach { body, .. } => {
                if self.collect_ids_until(*body, target, out) {
                    return true;
                }
            }
        }
        false
    }

    /// All addressable step paths, descending into nested workflows
    pub(crate) fn step_paths(&self) -> Vec<StepPath> {
        let mut out = Vec::new();
        self.collect_paths(self.root, &[], &mut out);
        out
    }

    fn collect_paths(&self, index: NodeIndex, prefix: &[String], out: &mut Vec<StepPath>) {
        let with = |id: &str| {
            let mut path = prefix.to_vec();
            path.push(id.to_string());
            path
        };
        match self.node(index) {
            GraphNode::Step(step) => out.push(with(step.id())),
            GraphNode::Sleep { id, .. }
            | GraphNode::SleepUntil { id, .. }
            | GraphNode::Map { id, .. } => out.push(with(id)),
            GraphNode::Nested { definition } => {
                let nested_prefix = with(definition.id());
                out.push(nested_prefix.clone());
                definition
                    .graph()
                    .collect_paths(definition.graph().root, &nested_prefix, out);
            }
            GraphNode::Sequence { children } | GraphNode::Parallel { children } => {
                for child in children {
                    self.collect_paths(*child, prefix, out);
                }
            }
            GraphNode::Branch { arms } => {
                for (_, child) in arms {
                    self.collect_paths(*child, prefix, out);
                }
            }
            GraphNode::Loop { body, .. } | GraphNode::Foreach { body, .. } => {
                self.collect_paths(*body, prefix, out);
            }
        }
    }

    /// Whether the given path addresses a node in this graph
    pub(crate) fn contains_path(&self, path: &[String]) -> bool {
        self.step_paths().iter().any(|p| p == path)
    }

    /// Resolve a leaf step by ordered id-path, descending nested workflows
    pub(crate) fn resolve_step(&self, path: &[String]) -> Option<&Step> {
        let (head, rest) = path.split_first()?;
        self.resolve_step_from(self.root, head, rest)
    }

    fn resolve_step_from<'a>(
        &'a self,
        index: NodeIndex,
        head: &str,
        rest: &[String],
    ) -> Option<&'a Step> {
        match self.node(index) {
            GraphNode::Step(step) => {
                if step.id() == head && rest.is_empty() {
                    Some(step)
                } else {
                    None
                }
            }
            GraphNode::Nested { definition } => {
                if definition.id() == head && !rest.is_empty() {
                    definition.graph().resolve_step(rest)
                } else {
                    None
                }
            }
            GraphNode::Sequence { children } | GraphNode::Parallel { children } => children
                .iter()
                .find_map(|c| self.resolve_step_from(*c, head, rest)),
            GraphNode::Branch { arms } => arms
                .iter()
                .find_map(|(_, c)| self.resolve_step_from(*c, head, rest)),
            GraphNode::Loop { body, .. } | GraphNode::Foreach { body, .. } => {
                self.resolve_step_from(*body, head, rest)
            }
            _ => None,
        }
    }

    /// Handler-free JSON projection of the graph, for snapshot persistence
    /// and node lookup in stored runs
    pub fn serializable(&self) -> Value {
        self.node_to_value(self.root)
    }

    fn node_to_value(&self, index: NodeIndex) -> Value {
        match self.node(index) {
            GraphNode::Step(step) => json!({"kind": "step", "id": step.id()}),
            GraphNode::Sequence { children } => json!({
                "kind": "sequence",
                "children": children.iter().map(|c| self.node_to_value(*c)).collect::<Vec<_>>(),
            }),
            GraphNode::Branch { arms } => json!({
                "kind": "branch",
                "arms": arms.iter().map(|(_, c)| self.node_to_value(*c)).collect::<Vec<_>>(),
            }),
            GraphNode::Loop { kind, body, .. } => json!({
                "kind": match kind { LoopKind::DoUntil => "dountil", LoopKind::DoWhile => "dowhile" },
                "body": self.node_to_value(*body),
            }),
            GraphNode::Foreach { body, concurrency } => json!({
                "kind": "foreach",
                "concurrency": concurrency,
                "body": self.node_to_value(*body),
            }),
            GraphNode::Parallel { children } => json!({
                "kind": "parallel",
                "children": children.iter().map(|c| self.node_to_value(*c)).collect::<Vec<_>>(),
            }),
            GraphNode::Sleep { id, .. } => json!({"kind": "sleep", "id": id}),
            GraphNode::SleepUntil { id, .. } => json!({"kind": "sleepUntil", "id": id}),
            GraphNode::Map { id, .. } => json!({"kind": "map", "id": id}),
            GraphNode::Nested { definition } => json!({
                "kind": "workflow",
                "id": definition.id(),
                "graph": definition.graph().serializable(),
            }),
        }
    }
}

/// Resolve a dot-separated path into a JSON value
///
/// Missing segments resolve to null, matching the behavior of mapping over a
/// branch candidate that never executed.
pub(crate) fn lookup_path(value: &Value, path: &str) -> Value {
    let mut current = value;
    for segment in path.split('.') {
        match current.get(segment) {
            Some(next) => current = next,
            None => return Value::Null,
        }
    }
    current.clone()
}

/// Resolve one map source against recorded results and the run input
pub(crate) fn resolve_map_source(
    source: &MapSource,
    results: &HashMap<String, StepResult>,
    init_data: &Value,
) -> Value {
    match source {
        MapSource::Constant(value) => value.clone(),
        MapSource::InitData { path } => match path {
            Some(p) => lookup_path(init_data, p),
            None => init_data.clone(),
        },
        MapSource::StepOutput { candidates, path } => {
            let output = candidates
                .iter()
                .find_map(|id| {
                    results
                        .get(id)
                        .filter(|r| r.status == StepStatus::Success)
                        .and_then(|r| r.output.clone())
                })
                .unwrap_or_else(|| json!({}));
            match path {
                Some(p) => lookup_path(&output, p),
                None => output,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_path() {
        let value = json!({"a": {"b": {"c": 42}}});
        assert_eq!(lookup_path(&value, "a.b.c"), json!(42));
        assert_eq!(lookup_path(&value, "a.b"), json!({"c": 42}));
        assert_eq!(lookup_path(&value, "a.missing"), Value::Null);
    }

    #[test]
    fn test_resolve_map_source_candidates() {
        let mut results = HashMap::new();
        results.insert(
            "ran".to_string(),
            StepResult::success(json!({"field": "yes"})),
        );

        let source = MapSource::any_of(
            vec!["did-not-run".to_string(), "ran".to_string()],
            "field",
        );
        let resolved = resolve_map_source(&source, &results, &json!({}));
        assert_eq!(resolved, json!("yes"));

        // With no executed candidate the source reads as an empty object,
        // so a path into it is null.
        let source = MapSource::any_of(vec!["did-not-run".to_string()], "field");
        let resolved = resolve_map_source(&source, &results, &json!({}));
        assert_eq!(resolved, Value::Null);
    }

    #[test]
    fn test_resolve_map_source_init_data() {
        let init = json!({"user": {"name": "ada"}});
        let resolved =
            resolve_map_source(&MapSource::init(Some("user.name")), &HashMap::new(), &init);
        assert_eq!(resolved, json!("ada"));
    }
}
