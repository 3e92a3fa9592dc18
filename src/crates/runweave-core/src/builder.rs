//! Fluent workflow builder
//!
//! [`WorkflowBuilder`] assembles a step graph through chained combinators and
//! compiles it into an immutable [`WorkflowDefinition`] with
//! [`commit`](WorkflowBuilder::commit). Construction errors (duplicate step
//! ids at one level, map references to undeclared steps, an empty graph) are
//! reported at commit time, never at run time.
//!
//! Branch arms, parallel siblings, and loop/foreach bodies accept anything
//! convertible into a graph node: a [`Step`] or a committed workflow behind
//! `Arc`, so workflows compose in every structural position.
//!
//! # Example
//!
//! ```rust
//! use runweave_core::builder::WorkflowBuilder;
//! use runweave_core::graph::condition;
//! use runweave_core::step::{Step, StepOutcome};
//! use serde_json::json;
//!
//! let fetch = Step::new("fetch", |ctx| async move {
//!     StepOutcome::success(json!({"items": ctx.input()["items"]}))
//! });
//! let poll = Step::new("poll", |_ctx| async move {
//!     StepOutcome::success(json!({"ready": true}))
//! });
//!
//! let workflow = WorkflowBuilder::new("ingest")
//!     .then(fetch)
//!     .dountil(
//!         poll,
//!         condition(|ctx| ctx.input()["ready"].as_bool().unwrap_or(false)),
//!     )
//!     .commit()
//!     .unwrap();
//! assert_eq!(workflow.id(), "ingest");
//! ```

use crate::definition::{FlowControlConfig, LifecycleCallback, WorkflowDefinition};
use crate::error::{Result, WorkflowError};
use crate::graph::{
    ConditionFn, EvalContext, GraphNode, LoopKind, MapSource, MapSpec, NodeIndex, SleepSpec,
    SleepUntilSpec, StepGraph,
};
use crate::retry::RetryConfig;
use crate::run::RunResult;
use crate::schema::Schema;
use crate::step::Step;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

/// Builder for a [`WorkflowDefinition`]
pub struct WorkflowBuilder {
    id: String,
    description: Option<String>,
    input_schema: Option<Schema>,
    output_schema: Option<Schema>,
    state_schema: Option<Schema>,
    retry_config: RetryConfig,
    flow_control: FlowControlConfig,
    validate_inputs: bool,
    on_finish: Option<LifecycleCallback>,
    on_error: Option<LifecycleCallback>,
    nodes: Vec<GraphNode>,
    root_children: Vec<NodeIndex>,
    map_counter: usize,
    sleep_counter: usize,
    sleep_until_counter: usize,
}

impl WorkflowBuilder {
    /// Start building a workflow with the given id
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: None,
            input_schema: None,
            output_schema: None,
            state_schema: None,
            retry_config: RetryConfig::default(),
            flow_control: FlowControlConfig::default(),
            validate_inputs: false,
            on_finish: None,
            on_error: None,
            nodes: Vec::new(),
            root_children: Vec::new(),
            map_counter: 0,
            sleep_counter: 0,
            sleep_until_counter: 0,
        }
    }

    /// Human-readable description
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Schema validated against run input when validation is enabled
    pub fn input_schema(mut self, schema: Schema) -> Self {
        self.input_schema = Some(schema);
        self
    }

    /// Declared shape of the run output
    pub fn output_schema(mut self, schema: Schema) -> Self {
        self.output_schema = Some(schema);
        self
    }

    /// Declared shape of the mutable workflow state
    pub fn state_schema(mut self, schema: Schema) -> Self {
        self.state_schema = Some(schema);
        self
    }

    /// Workflow-level retry config; per-step overrides win
    pub fn retry_config(mut self, config: RetryConfig) -> Self {
        self.retry_config = config;
        self
    }

    /// Flow-control hints recorded verbatim on the definition
    pub fn flow_control(mut self, config: FlowControlConfig) -> Self {
        self.flow_control = config;
        self
    }

    /// Enable schema validation of run input, leaf inputs, and resume data
    pub fn validate_inputs(mut self, enabled: bool) -> Self {
        self.validate_inputs = enabled;
        self
    }

    /// Callback fired once per settled run, on every terminal status
    pub fn on_finish<F>(mut self, callback: F) -> Self
    where
        F: Fn(&RunResult) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>>
            + Send
            + Sync
            + 'static,
    {
        self.on_finish = Some(Arc::new(callback));
        self
    }

    /// Callback fired in addition to `on_finish` when a run settles failed
    pub fn on_error<F>(mut self, callback: F) -> Self
    where
        F: Fn(&RunResult) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>>
            + Send
            + Sync
            + 'static,
    {
        self.on_error = Some(Arc::new(callback));
        self
    }

    fn push(&mut self, node: GraphNode) -> NodeIndex {
        self.nodes.push(node);
        self.nodes.len() - 1
    }

    fn push_root(&mut self, node: GraphNode) {
        let index = self.push(node);
        self.root_children.push(index);
    }

    /// Append a step; its output becomes the next node's input
    pub fn then(mut self, step: Step) -> Self {
        self.push_root(GraphNode::Step(step));
        self
    }

    /// Append a committed workflow as a nested step
    ///
    /// The nested workflow records a single result under its own id; its
    /// internal steps are addressable through path-based suspend/resume.
    pub fn then_workflow(mut self, workflow: Arc<WorkflowDefinition>) -> Self {
        self.push_root(GraphNode::Nested {
            definition: workflow,
        });
        self
    }

    /// Append a branch: every arm whose predicate is true executes
    ///
    /// All predicates are evaluated against the same upstream output before
    /// any arm runs; matched arms execute concurrently. The branch's output
    /// is an object keyed by the executed arms' ids. Arms may be steps or
    /// committed workflows.
    pub fn branch<N: Into<GraphNode>>(mut self, arms: Vec<(ConditionFn, N)>) -> Self {
        let arms = arms
            .into_iter()
            .map(|(predicate, node)| {
                let index = self.push(node.into());
                (predicate, index)
            })
            .collect();
        self.push_root(GraphNode::Branch { arms });
        self
    }

    /// Append nodes that run concurrently with per-sibling isolation
    ///
    /// The combined output is an object keyed by node id. One sibling failing
    /// does not interrupt the others. Siblings may be steps or committed
    /// workflows; mixing kinds goes through `Vec<GraphNode>` with `into()`.
    pub fn parallel<N: Into<GraphNode>>(mut self, nodes: Vec<N>) -> Self {
        let children = nodes
            .into_iter()
            .map(|node| self.push(node.into()))
            .collect();
        self.push_root(GraphNode::Parallel { children });
        self
    }

    /// Repeat a body until the predicate becomes true
    ///
    /// The body always runs at least once. The predicate sees the body's
    /// output and a 1-based iteration count.
    pub fn dountil(mut self, body: impl Into<GraphNode>, predicate: ConditionFn) -> Self {
        let body = self.push(body.into());
        self.push_root(GraphNode::Loop {
            kind: LoopKind::DoUntil,
            body,
            predicate,
        });
        self
    }

    /// Repeat a body while the predicate stays true
    pub fn dowhile(mut self, body: impl Into<GraphNode>, predicate: ConditionFn) -> Self {
        let body = self.push(body.into());
        self.push_root(GraphNode::Loop {
            kind: LoopKind::DoWhile,
            body,
            predicate,
        });
        self
    }

    /// Run a body once per element of an array input, sequentially
    pub fn foreach(self, body: impl Into<GraphNode>) -> Self {
        self.foreach_concurrent(body, 1)
    }

    /// Run a body once per element of an array input, at most `concurrency`
    /// elements in flight
    ///
    /// Outputs are collected in input order regardless of completion order.
    pub fn foreach_concurrent(mut self, body: impl Into<GraphNode>, concurrency: usize) -> Self {
        let body = self.push(body.into());
        self.push_root(GraphNode::Foreach {
            body,
            concurrency: concurrency.max(1),
        });
        self
    }

    /// Reshape upstream outputs into the next node's input, field by field
    pub fn map(mut self, bindings: Vec<(String, MapSource)>) -> Self {
        let id = format!("map_{}", self.map_counter);
        self.map_counter += 1;
        self.push_root(GraphNode::Map {
            id,
            spec: MapSpec::Bindings(bindings),
        });
        self
    }

    /// Reshape upstream outputs with a free transform function
    pub fn map_with<F>(mut self, transform: F) -> Self
    where
        F: Fn(&EvalContext) -> Value + Send + Sync + 'static,
    {
        let id = format!("map_{}", self.map_counter);
        self.map_counter += 1;
        self.push_root(GraphNode::Map {
            id,
            spec: MapSpec::Transform(Arc::new(transform)),
        });
        self
    }

    /// Park the walk for a fixed duration, passing the input through
    pub fn sleep(mut self, duration: Duration) -> Self {
        let id = format!("sleep_{}", self.sleep_counter);
        self.sleep_counter += 1;
        self.push_root(GraphNode::Sleep {
            id,
            spec: SleepSpec::Duration(duration),
        });
        self
    }

    /// Park the walk for a duration computed from the upstream output
    pub fn sleep_computed<F>(mut self, f: F) -> Self
    where
        F: Fn(&EvalContext) -> Duration + Send + Sync + 'static,
    {
        let id = format!("sleep_{}", self.sleep_counter);
        self.sleep_counter += 1;
        self.push_root(GraphNode::Sleep {
            id,
            spec: SleepSpec::Computed(Arc::new(f)),
        });
        self
    }

    /// Park the walk until a fixed moment; past deadlines proceed immediately
    pub fn sleep_until(mut self, at: DateTime<Utc>) -> Self {
        let id = format!("sleep_until_{}", self.sleep_until_counter);
        self.sleep_until_counter += 1;
        self.push_root(GraphNode::SleepUntil {
            id,
            spec: SleepUntilSpec::At(at),
        });
        self
    }

    /// Park the walk until a moment computed from the upstream output
    pub fn sleep_until_computed<F>(mut self, f: F) -> Self
    where
        F: Fn(&EvalContext) -> DateTime<Utc> + Send + Sync + 'static,
    {
        let id = format!("sleep_until_{}", self.sleep_until_counter);
        self.sleep_until_counter += 1;
        self.push_root(GraphNode::SleepUntil {
            id,
            spec: SleepUntilSpec::Computed(Arc::new(f)),
        });
        self
    }

    /// Compile the builder into an immutable definition
    ///
    /// Validates the graph: it must be non-empty, step ids must be unique
    /// within this graph level, and map sources may only reference declared
    /// step ids.
    pub fn commit(self) -> Result<Arc<WorkflowDefinition>> {
        if self.root_children.is_empty() {
            return Err(WorkflowError::construction(format!(
                "workflow '{}' has no steps",
                self.id
            )));
        }

        let root = self.nodes.len();
        let mut nodes = self.nodes;
        nodes.push(GraphNode::Sequence {
            children: self.root_children,
        });
        let graph = StepGraph { nodes, root };

        let ids = graph.recordable_ids();
        let mut seen = HashSet::new();
        for id in &ids {
            if !seen.insert(id.as_str()) {
                return Err(WorkflowError::construction(format!(
                    "duplicate step id '{}' in workflow '{}'",
                    id, self.id
                )));
            }
        }

        for node in &graph.nodes {
            if let GraphNode::Map {
                id,
                spec: MapSpec::Bindings(bindings),
            } = node
            {
                for (field, source) in bindings {
                    for referenced in source.referenced_steps() {
                        if !ids.iter().any(|known| known == referenced) {
                            return Err(WorkflowError::construction(format!(
                                "map '{}' field '{}' references unknown step '{}'",
                                id, field, referenced
                            )));
                        }
                    }
                }
            }
        }

        Ok(Arc::new(WorkflowDefinition {
            id: self.id,
            description: self.description,
            graph,
            input_schema: self.input_schema,
            output_schema: self.output_schema,
            state_schema: self.state_schema,
            retry_config: self.retry_config,
            flow_control: self.flow_control,
            validate_inputs: self.validate_inputs,
            on_finish: self.on_finish,
            on_error: self.on_error,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::condition;
    use crate::step::StepOutcome;
    use serde_json::json;

    fn noop(id: &str) -> Step {
        Step::new(id, |_ctx| async move { StepOutcome::success(json!({})) })
    }

    #[test]
    fn test_empty_workflow_rejected() {
        let err = WorkflowBuilder::new("empty").commit().unwrap_err();
        assert!(matches!(err, WorkflowError::Construction(_)));
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let err = WorkflowBuilder::new("dup")
            .then(noop("a"))
            .then(noop("a"))
            .commit()
            .unwrap_err();
        assert!(err.to_string().contains("duplicate step id 'a'"));
    }

    #[test]
    fn test_clone_as_allows_reuse() {
        let step = noop("a");
        let again = step.clone_as("a2");
        assert!(WorkflowBuilder::new("reuse")
            .then(step)
            .then(again)
            .commit()
            .is_ok());
    }

    #[test]
    fn test_nested_ids_do_not_collide_with_outer() {
        let inner = WorkflowBuilder::new("inner").then(noop("a")).commit().unwrap();
        assert!(WorkflowBuilder::new("outer")
            .then(noop("a"))
            .then_workflow(inner)
            .commit()
            .is_ok());
    }

    #[test]
    fn test_map_reference_validated() {
        let err = WorkflowBuilder::new("wf")
            .then(noop("a"))
            .map(vec![(
                "x".to_string(),
                MapSource::step_path("missing", "field"),
            )])
            .commit()
            .unwrap_err();
        assert!(err.to_string().contains("unknown step 'missing'"));
    }

    #[test]
    fn test_generated_node_ids() {
        let wf = WorkflowBuilder::new("wf")
            .then(noop("a"))
            .sleep(Duration::from_millis(1))
            .map(vec![("v".to_string(), MapSource::step("a"))])
            .commit()
            .unwrap();
        let ids = wf.graph.recordable_ids();
        assert_eq!(ids, vec!["a", "sleep_0", "map_0"]);
    }

    #[test]
    fn test_branch_and_loop_shapes() {
        let wf = WorkflowBuilder::new("wf")
            .branch(vec![
                (condition(|_| true), noop("left")),
                (condition(|_| false), noop("right")),
            ])
            .dountil(noop("poll"), condition(|_| true))
            .commit()
            .unwrap();
        assert_eq!(
            wf.graph.recordable_ids(),
            vec!["left", "right", "poll"]
        );
    }

    #[test]
    fn test_workflows_compose_in_structural_positions() {
        let scorer = WorkflowBuilder::new("scorer").then(noop("rate")).commit().unwrap();
        let checker = WorkflowBuilder::new("checker").then(noop("verify")).commit().unwrap();
        let grader = WorkflowBuilder::new("grader").then(noop("grade")).commit().unwrap();

        let wf = WorkflowBuilder::new("composite")
            .branch(vec![(condition(|_| true), scorer)])
            .parallel(vec![GraphNode::from(noop("solo")), checker.into()])
            .foreach(grader)
            .commit()
            .unwrap();
        assert_eq!(
            wf.graph.recordable_ids(),
            vec!["scorer", "solo", "checker", "grader"]
        );
    }

    #[test]
    fn test_nested_id_collides_with_step_id() {
        let inner = WorkflowBuilder::new("a").then(noop("x")).commit().unwrap();
        let err = WorkflowBuilder::new("dup")
            .then(noop("a"))
            .parallel(vec![GraphNode::from(inner)])
            .commit()
            .unwrap_err();
        assert!(err.to_string().contains("duplicate step id 'a'"));
    }
}
