//! Targeted replay of a run from a chosen step
//!
//! Time travel rebuilds a run's execution frontier at an arbitrary step
//! without re-invoking any ancestor handler: results for every step preceding
//! the target in document order are seeded (from the caller's context, or as
//! empty successes) and the walk replays through them, so execution begins at
//! the target with a deterministic surrounding record set.
//!
//! Supplying `input_data` overrides the chained input at the target only;
//! every other node still receives the replay-reconstructed value.

use crate::definition::WorkflowDefinition;
use crate::error::{Result, WorkflowError};
use runweave_snapshot::{StepPath, StepResult};
use serde_json::{json, Value};
use std::collections::HashMap;

/// Options for [`WorkflowRun::time_travel`](crate::run::WorkflowRun::time_travel)
#[derive(Clone, Debug, Default)]
pub struct TimeTravelOptions {
    /// Path of the step execution restarts from
    pub step: StepPath,
    /// Seed results for steps preceding the target; unlisted predecessors
    /// are seeded as successes with an empty output
    pub context: Option<HashMap<String, StepResult>>,
    /// Input override applied at the target step only
    pub input_data: Option<Value>,
    /// Seed result maps for nested workflows, keyed by nested workflow id
    pub nested_steps_context: Option<HashMap<String, HashMap<String, StepResult>>>,
    /// Execute stepwise from the target: run one step, then pause
    pub per_step: bool,
}

impl TimeTravelOptions {
    /// Travel to a top-level step by id
    pub fn at(step: impl Into<String>) -> Self {
        Self {
            step: vec![step.into()],
            ..Self::default()
        }
    }

    /// Travel to a step addressed by path (nested workflows descend by id)
    pub fn at_path(step: StepPath) -> Self {
        Self {
            step,
            ..Self::default()
        }
    }

    /// Seed specific predecessor results instead of empty successes
    pub fn with_context(mut self, context: HashMap<String, StepResult>) -> Self {
        self.context = Some(context);
        self
    }

    /// Override the target step's input
    pub fn with_input(mut self, input: Value) -> Self {
        self.input_data = Some(input);
        self
    }

    /// Seed the inner result maps of nested workflows
    pub fn with_nested_context(
        mut self,
        context: HashMap<String, HashMap<String, StepResult>>,
    ) -> Self {
        self.nested_steps_context = Some(context);
        self
    }

    /// Run one step at a time from the target, pausing between steps
    pub fn per_step(mut self) -> Self {
        self.per_step = true;
        self
    }
}

/// Compiled travel plan threaded through the walk
#[derive(Debug, Clone)]
pub(crate) struct TravelPlan {
    /// Absolute path of the target step
    pub(crate) target: StepPath,
    /// Input override applied at the target
    pub(crate) input: Option<Value>,
}

/// Validate travel options against a definition and build the seeded result
/// map for the replay walk
pub(crate) fn build_plan(
    definition: &WorkflowDefinition,
    options: &TimeTravelOptions,
) -> Result<(TravelPlan, HashMap<String, StepResult>)> {
    if options.step.is_empty() {
        return Err(WorkflowError::contract("time travel requires a step path"));
    }
    if !definition.graph().contains_path(&options.step) {
        return Err(WorkflowError::contract(format!(
            "step path '{}' does not exist in workflow '{}'",
            options.step.join("."),
            definition.id()
        )));
    }

    if definition.validate_inputs {
        if let (Some(input), Some(step)) = (
            &options.input_data,
            definition.graph().resolve_step(&options.step),
        ) {
            if let Some(schema) = &step.input_schema {
                if let Err(errors) = schema.validate(input) {
                    return Err(WorkflowError::validation(Some(step.id()), errors));
                }
            }
        }
    }

    // Seed every step before the target at the top level; the walk replays
    // through these without invoking any handler.
    let head = &options.step[0];
    let mut seeded = HashMap::new();
    for predecessor in definition.graph().predecessor_ids(head) {
        let record = options
            .context
            .as_ref()
            .and_then(|ctx| ctx.get(&predecessor).cloned())
            .unwrap_or_else(|| StepResult::success(json!({})));
        seeded.insert(predecessor, record);
    }

    Ok((
        TravelPlan {
            target: options.step.clone(),
            input: options.input_data.clone(),
        },
        seeded,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::WorkflowBuilder;
    use crate::step::{Step, StepOutcome};
    use runweave_snapshot::StepStatus;

    fn noop(id: &str) -> Step {
        Step::new(id, |_ctx| async move { StepOutcome::success(json!({})) })
    }

    fn three_steps() -> std::sync::Arc<WorkflowDefinition> {
        WorkflowBuilder::new("wf")
            .then(noop("a"))
            .then(noop("b"))
            .then(noop("c"))
            .commit()
            .unwrap()
    }

    #[test]
    fn test_unknown_path_rejected() {
        let wf = three_steps();
        let err = build_plan(&wf, &TimeTravelOptions::at("nope")).unwrap_err();
        assert!(matches!(err, WorkflowError::Contract(_)));
    }

    #[test]
    fn test_predecessors_seeded_as_empty_successes() {
        let wf = three_steps();
        let (plan, seeded) = build_plan(&wf, &TimeTravelOptions::at("c")).unwrap();
        assert_eq!(plan.target, vec!["c".to_string()]);
        assert_eq!(seeded.len(), 2);
        assert_eq!(seeded["a"].status, StepStatus::Success);
        assert_eq!(seeded["b"].output, Some(json!({})));
    }

    #[test]
    fn test_supplied_context_wins_over_default_seed() {
        let wf = three_steps();
        let mut context = HashMap::new();
        context.insert("a".to_string(), StepResult::success(json!({"real": true})));

        let (_, seeded) = build_plan(
            &wf,
            &TimeTravelOptions::at("b").with_context(context),
        )
        .unwrap();
        assert_eq!(seeded["a"].output, Some(json!({"real": true})));
        assert!(!seeded.contains_key("b"));
    }
}
