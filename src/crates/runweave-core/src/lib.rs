//! # runweave-core - Durable Workflow Orchestration
//!
//! **Declarative step graphs with durable, resumable execution** - compose
//! async steps into workflows with branching, loops, fan-out, and nested
//! workflows, and drive them through suspend/resume, stepwise execution, and
//! targeted replay.
//!
//! ## Overview
//!
//! `runweave-core` provides:
//!
//! - **Declarative graphs** - Sequence, Branch (multi-match), Loop, Foreach,
//!   Parallel, Sleep, Map, and nested workflows via a fluent builder
//! - **Async-first execution** - tokio-based interpreter with bounded
//!   fan-out concurrency
//! - **Durable records** - every step's progress is a [`StepResult`] the run
//!   can be reconstructed from
//! - **Human-in-the-loop** - steps suspend themselves with a payload and are
//!   resumed later with data, addressed by path through nested workflows
//! - **Targeted replay** - rebuild a run's frontier at any step with zero
//!   ancestor re-invocations
//! - **Streaming** - ordered per-run event streams
//! - **Snapshot seam** - pluggable persistence via the
//!   [`SnapshotStore`](runweave_snapshot::SnapshotStore) trait
//!
//! ## Core Concepts
//!
//! ### 1. Steps and Outcomes
//!
//! A [`Step`](step::Step) is an id plus an async handler. Handlers return a
//! tagged [`StepOutcome`](step::StepOutcome): success, suspended, bailed, or
//! failed. The interpreter branches on the tag; no engine control flow
//! travels through panics or `Result`.
//!
//! ### 2. Builder and Definition
//!
//! [`WorkflowBuilder`](builder::WorkflowBuilder) assembles the graph;
//! [`commit`](builder::WorkflowBuilder::commit) validates it and produces an
//! immutable [`WorkflowDefinition`](definition::WorkflowDefinition) shared
//! behind `Arc`. Definitions embed in other definitions as nested steps.
//!
//! ### 3. Runs and Replay
//!
//! A [`WorkflowRun`](run::WorkflowRun) owns one run id and its record set.
//! Every continuation (resume, step, time travel) re-walks the graph from
//! the root and replays recorded successes without re-invoking handlers, so
//! chained inputs are reconstructed deterministically.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use runweave_core::{Step, StepOutcome, WorkflowBuilder};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> runweave_core::Result<()> {
//!     let greet = Step::new("greet", |ctx| async move {
//!         let name = ctx.input()["name"].as_str().unwrap_or("world").to_string();
//!         StepOutcome::success(json!({"greeting": format!("hello {name}")}))
//!     });
//!
//!     let workflow = WorkflowBuilder::new("hello").then(greet).commit()?;
//!     let run = workflow.create_run();
//!     let result = run.start(json!({"name": "ada"})).await?;
//!     println!("{:?}", result.output);
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! - [`step`] - [`Step`](step::Step), handler context, tagged outcomes
//! - [`builder`] - fluent graph construction and commit-time validation
//! - [`definition`] - committed workflows, flow control, lifecycle callbacks
//! - [`graph`] - compiled graph model, predicates, map sources
//! - [`run`] - run handles: start, resume, step, time travel, stream, cancel
//! - [`time_travel`] - targeted-replay options and seeding
//! - [`context`] - workflow state, request context, abort signal
//! - [`stream`] - run events and the stream emitter
//! - [`schema`] - declarative value schemas and field errors
//! - [`retry`] - retry policy resolution
//! - [`error`] - the [`WorkflowError`](error::WorkflowError) taxonomy
//!
//! ## See Also
//!
//! - [`runweave_snapshot`] - step/run records and the snapshot store seam

pub mod builder;
pub mod context;
pub mod definition;
pub mod engine;
pub mod error;
pub mod graph;
pub mod retry;
pub mod run;
pub mod schema;
pub mod step;
pub mod stream;
pub mod time_travel;

// Re-export main types
pub use builder::WorkflowBuilder;
pub use context::{AbortSignal, RequestContext, RunState};
pub use definition::{FlowControlConfig, LifecycleCallback, WorkflowDefinition};
pub use error::{Result, WorkflowError};
pub use graph::{condition, ConditionFn, EvalContext, GraphNode, LoopKind, MapSource};
pub use retry::RetryConfig;
pub use run::{ResumeOptions, RunOptions, RunResult, RunStream, WorkflowRun};
pub use runweave_snapshot::{
    RunSnapshot, RunStatus, SnapshotStore, StepFailure, StepPath, StepResult, StepStatus,
};
pub use schema::{FieldError, FieldKind, Schema};
pub use step::{Step, StepContext, StepOutcome};
pub use stream::RunEvent;
pub use time_travel::TimeTravelOptions;
