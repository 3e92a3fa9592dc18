//! Integration tests for graph execution
//!
//! These cover the interpreter's control-flow semantics end to end:
//! sequential chaining, branching, loops, foreach, parallel isolation,
//! bailing, mapping, sleeping, and the context surfaces steps share.

use runweave_core::{
    condition, FieldKind, MapSource, RetryConfig, Schema, Step, StepOutcome, StepStatus,
    RunStatus, WorkflowBuilder,
};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn echo_step(id: &str) -> Step {
    Step::new(id, |ctx| async move { StepOutcome::success(ctx.input().clone()) })
}

#[tokio::test]
async fn test_sequence_chains_outputs() {
    let step1 = Step::new("step1", |ctx| async move {
        let value = ctx.input()["value"].as_str().unwrap_or_default();
        StepOutcome::success(json!({"value": format!("step1: {value}")}))
    });
    let step2 = Step::new("step2", |ctx| async move {
        let value = ctx.input()["value"].as_str().unwrap_or_default();
        StepOutcome::success(json!({"value": format!("step2: {value}")}))
    });

    let workflow = WorkflowBuilder::new("sequence")
        .then(step1)
        .then(step2)
        .commit()
        .unwrap();
    let result = workflow
        .create_run()
        .start(json!({"value": "test"}))
        .await
        .unwrap();

    assert_eq!(result.status, RunStatus::Success);
    assert_eq!(
        result.step("step1").unwrap().output,
        Some(json!({"value": "step1: test"}))
    );
    assert_eq!(
        result.output,
        Some(json!({"value": "step2: step1: test"}))
    );
}

#[tokio::test]
async fn test_failed_step_short_circuits_downstream() {
    let downstream_calls = Arc::new(AtomicUsize::new(0));
    let calls = downstream_calls.clone();

    let boom = Step::new("boom", |_ctx| async move {
        StepOutcome::failed("upstream exploded")
    });
    let after = Step::new("after", move |_ctx| {
        let calls = calls.clone();
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            StepOutcome::success(json!({}))
        }
    });

    let workflow = WorkflowBuilder::new("short-circuit")
        .then(boom)
        .then(after)
        .commit()
        .unwrap();
    let result = workflow.create_run().start(json!({})).await.unwrap();

    assert_eq!(result.status, RunStatus::Failed);
    assert_eq!(result.error.as_ref().unwrap().message, "upstream exploded");
    assert_eq!(downstream_calls.load(Ordering::SeqCst), 0);
    assert!(result.step("after").is_none());
}

#[tokio::test]
async fn test_branch_runs_every_matching_arm() {
    let low = Step::new("low", |_ctx| async move {
        StepOutcome::success(json!({"tier": "low"}))
    });
    let high = Step::new("high", |_ctx| async move {
        StepOutcome::success(json!({"tier": "high"}))
    });
    let never = Step::new("never", |_ctx| async move {
        StepOutcome::success(json!({"tier": "never"}))
    });

    let workflow = WorkflowBuilder::new("branching")
        .branch(vec![
            (
                condition(|ctx| ctx.input()["n"].as_i64().unwrap_or(0) > 0),
                low,
            ),
            (
                condition(|ctx| ctx.input()["n"].as_i64().unwrap_or(0) > 10),
                high,
            ),
            (condition(|_| false), never),
        ])
        .commit()
        .unwrap();
    let result = workflow.create_run().start(json!({"n": 25})).await.unwrap();

    assert_eq!(result.status, RunStatus::Success);
    assert_eq!(
        result.output,
        Some(json!({"low": {"tier": "low"}, "high": {"tier": "high"}}))
    );
    assert!(result.step("never").is_none());
}

#[tokio::test]
async fn test_branch_with_no_match_continues_empty() {
    let arm = echo_step("arm");
    let after = echo_step("after");

    let workflow = WorkflowBuilder::new("no-match")
        .branch(vec![(condition(|_| false), arm)])
        .then(after)
        .commit()
        .unwrap();
    let result = workflow.create_run().start(json!({"x": 1})).await.unwrap();

    assert_eq!(result.status, RunStatus::Success);
    assert_eq!(result.output, Some(json!({})));
}

#[tokio::test]
async fn test_dountil_counts_iterations() {
    let invocations = Arc::new(AtomicUsize::new(0));
    let counter = invocations.clone();

    let increment = Step::new("increment", move |ctx| {
        let counter = counter.clone();
        async move {
            let n = ctx.input()["n"].as_i64().unwrap_or(0);
            counter.fetch_add(1, Ordering::SeqCst);
            StepOutcome::success(json!({"n": n + 1}))
        }
    });

    let workflow = WorkflowBuilder::new("loop")
        .dountil(
            increment,
            condition(|ctx| ctx.input()["n"].as_i64().unwrap_or(0) >= 3),
        )
        .commit()
        .unwrap();
    let result = workflow.create_run().start(json!({"n": 0})).await.unwrap();

    assert_eq!(result.status, RunStatus::Success);
    assert_eq!(result.output, Some(json!({"n": 3})));
    assert_eq!(invocations.load(Ordering::SeqCst), 3);
    assert_eq!(
        result.step("increment").unwrap().metadata_field("iterationCount"),
        Some(&json!(3))
    );
}

#[tokio::test]
async fn test_dowhile_exits_on_first_false() {
    let drain = Step::new("drain", |ctx| async move {
        let left = ctx.input()["left"].as_i64().unwrap_or(0);
        StepOutcome::success(json!({"left": left - 1}))
    });

    let workflow = WorkflowBuilder::new("dowhile")
        .dowhile(
            drain,
            condition(|ctx| ctx.input()["left"].as_i64().unwrap_or(0) > 0),
        )
        .commit()
        .unwrap();
    let result = workflow.create_run().start(json!({"left": 2})).await.unwrap();

    assert_eq!(result.output, Some(json!({"left": 0})));
}

#[tokio::test]
async fn test_foreach_sequential_preserves_order_and_serializes() {
    let bump = Step::new("bump", |ctx| async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        let n = ctx.input()["number"].as_i64().unwrap_or(0);
        StepOutcome::success(json!(n + 1))
    });

    let workflow = WorkflowBuilder::new("foreach")
        .foreach(bump)
        .commit()
        .unwrap();
    let started = Instant::now();
    let result = workflow
        .create_run()
        .start(json!([{"number": 11}, {"number": 22}, {"number": 333}]))
        .await
        .unwrap();

    assert!(started.elapsed() >= Duration::from_millis(150));
    assert_eq!(result.status, RunStatus::Success);
    assert_eq!(result.output, Some(json!([12, 23, 334])));
    assert_eq!(
        result.step("bump").unwrap().output,
        Some(json!([12, 23, 334]))
    );
}

#[tokio::test]
async fn test_foreach_concurrency_overlaps_elements() {
    let slow = Step::new("slow", |ctx| async move {
        tokio::time::sleep(Duration::from_millis(80)).await;
        StepOutcome::success(ctx.input().clone())
    });

    let workflow = WorkflowBuilder::new("foreach-concurrent")
        .foreach_concurrent(slow, 3)
        .commit()
        .unwrap();
    let started = Instant::now();
    let result = workflow
        .create_run()
        .start(json!([1, 2, 3]))
        .await
        .unwrap();

    // Three 80ms elements with concurrency 3 finish well under 240ms.
    assert!(started.elapsed() < Duration::from_millis(200));
    assert_eq!(result.output, Some(json!([1, 2, 3])));
}

#[tokio::test]
async fn test_foreach_rejects_non_array_input() {
    let workflow = WorkflowBuilder::new("foreach-bad")
        .foreach(echo_step("body"))
        .commit()
        .unwrap();
    let result = workflow
        .create_run()
        .start(json!({"not": "an array"}))
        .await
        .unwrap();

    assert_eq!(result.status, RunStatus::Failed);
    assert!(result
        .error
        .unwrap()
        .message
        .contains("requires an array input"));
}

#[tokio::test]
async fn test_parallel_isolates_failures() {
    let failing = Step::new("failing", |_ctx| async move {
        StepOutcome::failed("this one breaks")
    });
    let healthy = Step::new("healthy", |_ctx| async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        StepOutcome::success(json!({"ok": true}))
    });

    let workflow = WorkflowBuilder::new("parallel")
        .parallel(vec![failing, healthy])
        .commit()
        .unwrap();
    let result = workflow.create_run().start(json!({})).await.unwrap();

    // The run fails, but the healthy sibling still ran to completion and
    // kept its own record.
    assert_eq!(result.status, RunStatus::Failed);
    assert_eq!(result.step("failing").unwrap().status, StepStatus::Failed);
    assert_eq!(result.step("healthy").unwrap().status, StepStatus::Success);
    assert_eq!(
        result.step("healthy").unwrap().output,
        Some(json!({"ok": true}))
    );
}

#[tokio::test]
async fn test_parallel_merges_outputs_by_step_id() {
    let a = Step::new("a", |_ctx| async move { StepOutcome::success(json!(1)) });
    let b = Step::new("b", |_ctx| async move { StepOutcome::success(json!(2)) });

    let workflow = WorkflowBuilder::new("parallel-merge")
        .parallel(vec![a, b])
        .commit()
        .unwrap();
    let result = workflow.create_run().start(json!({})).await.unwrap();

    assert_eq!(result.output, Some(json!({"a": 1, "b": 2})));
}

#[tokio::test]
async fn test_bail_ends_run_successfully_and_skips_rest() {
    let skipped_calls = Arc::new(AtomicUsize::new(0));
    let calls = skipped_calls.clone();

    let early_exit = Step::new("early_exit", |ctx| async move {
        ctx.bail(json!({"done": "early"}))
    });
    let skipped = Step::new("skipped", move |_ctx| {
        let calls = calls.clone();
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            StepOutcome::success(json!({}))
        }
    });

    let workflow = WorkflowBuilder::new("bailing")
        .then(early_exit)
        .then(skipped)
        .commit()
        .unwrap();
    let result = workflow.create_run().start(json!({})).await.unwrap();

    assert_eq!(result.status, RunStatus::Success);
    assert_eq!(result.output, Some(json!({"done": "early"})));
    assert_eq!(result.step("early_exit").unwrap().status, StepStatus::Success);
    assert_eq!(skipped_calls.load(Ordering::SeqCst), 0);
    assert!(result.step("skipped").is_none());
}

#[tokio::test]
async fn test_map_reshapes_between_steps() {
    let fetch_user = Step::new("fetch_user", |_ctx| async move {
        StepOutcome::success(json!({"user": {"name": "ada", "id": 7}}))
    });
    let greet = Step::new("greet", |ctx| async move {
        let name = ctx.input()["name"].as_str().unwrap_or_default();
        StepOutcome::success(json!({"greeting": format!("hello {name}")}))
    });

    let workflow = WorkflowBuilder::new("mapping")
        .then(fetch_user)
        .map(vec![
            ("name".to_string(), MapSource::step_path("fetch_user", "user.name")),
            ("source".to_string(), MapSource::constant(json!("directory"))),
        ])
        .then(greet)
        .commit()
        .unwrap();
    let result = workflow.create_run().start(json!({})).await.unwrap();

    assert_eq!(result.output, Some(json!({"greeting": "hello ada"})));
    assert_eq!(
        result.step("map_0").unwrap().output,
        Some(json!({"name": "ada", "source": "directory"}))
    );
}

#[tokio::test]
async fn test_sleep_passes_input_through() {
    let workflow = WorkflowBuilder::new("sleeping")
        .then(echo_step("first"))
        .sleep(Duration::from_millis(60))
        .then(echo_step("second"))
        .commit()
        .unwrap();

    let started = Instant::now();
    let result = workflow.create_run().start(json!({"v": 9})).await.unwrap();

    assert!(started.elapsed() >= Duration::from_millis(60));
    assert_eq!(result.output, Some(json!({"v": 9})));
    let sleep_record = result.step("sleep_0").unwrap();
    assert_eq!(sleep_record.status, StepStatus::Success);
    assert!(sleep_record.metadata_field("durationMs").is_some());
}

#[tokio::test]
async fn test_sleep_until_past_deadline_proceeds_immediately() {
    let workflow = WorkflowBuilder::new("sleep-until")
        .sleep_until(chrono::Utc::now() - chrono::Duration::seconds(5))
        .then(echo_step("after"))
        .commit()
        .unwrap();

    let started = Instant::now();
    let result = workflow.create_run().start(json!({"v": 1})).await.unwrap();

    assert!(started.elapsed() < Duration::from_millis(100));
    assert_eq!(result.output, Some(json!({"v": 1})));
}

#[tokio::test]
async fn test_state_shared_across_steps() {
    let writer = Step::new("writer", |ctx| async move {
        ctx.set_state(json!({"seen": ["writer"]}));
        StepOutcome::success(json!({}))
    });
    let reader = Step::new("reader", |ctx| async move {
        StepOutcome::success(ctx.state())
    });

    let workflow = WorkflowBuilder::new("stateful")
        .then(writer)
        .then(reader)
        .commit()
        .unwrap();
    let result = workflow.create_run().start(json!({})).await.unwrap();

    assert_eq!(result.output, Some(json!({"seen": ["writer"]})));
}

#[tokio::test]
async fn test_request_context_delete_stays_deleted() {
    let observed = Arc::new(std::sync::Mutex::new(Vec::<Option<Value>>::new()));

    let setter = Step::new("setter", |ctx| async move {
        ctx.request_context().set("token", json!("secret"));
        StepOutcome::success(json!({}))
    });
    let deleter = Step::new("deleter", |ctx| async move {
        ctx.request_context().delete("token");
        StepOutcome::success(json!({}))
    });
    let seen = observed.clone();
    let checker = Step::new("checker", move |ctx| {
        let seen = seen.clone();
        async move {
            seen.lock().unwrap().push(ctx.request_context().get("token"));
            StepOutcome::success(json!({}))
        }
    });

    let workflow = WorkflowBuilder::new("request-context")
        .then(setter)
        .then(deleter)
        .then(checker)
        .commit()
        .unwrap();
    let run = workflow.create_run();
    run.request_context().set("tenant", json!("acme"));
    run.start(json!({})).await.unwrap();

    assert_eq!(observed.lock().unwrap().as_slice(), &[None]);
    assert_eq!(run.request_context().get("tenant"), Some(json!("acme")));
}

#[tokio::test]
async fn test_step_retry_override_wins_over_workflow_config() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = attempts.clone();

    let flaky = Step::new("flaky", move |_ctx| {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            StepOutcome::failed("still broken")
        }
    })
    .with_retries(2);

    let workflow = WorkflowBuilder::new("retrying")
        .retry_config(RetryConfig::new(5))
        .then(flaky)
        .commit()
        .unwrap();
    let result = workflow.create_run().start(json!({})).await.unwrap();

    // One initial try plus the step-level two retries; the workflow-level
    // five never applies.
    assert_eq!(result.status, RunStatus::Failed);
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_retry_recovers_on_later_attempt() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = attempts.clone();

    let flaky = Step::new("flaky", move |_ctx| {
        let counter = counter.clone();
        async move {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                StepOutcome::failed("transient")
            } else {
                StepOutcome::success(json!({"recovered": true}))
            }
        }
    });

    let workflow = WorkflowBuilder::new("recovering")
        .retry_config(RetryConfig::new(3))
        .then(flaky)
        .commit()
        .unwrap();
    let result = workflow.create_run().start(json!({})).await.unwrap();

    assert_eq!(result.status, RunStatus::Success);
    assert_eq!(result.output, Some(json!({"recovered": true})));
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_workflow_input_validation_rejects_before_running() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let step = Step::new("only", move |_ctx| {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            StepOutcome::success(json!({}))
        }
    });

    let workflow = WorkflowBuilder::new("validated")
        .input_schema(Schema::object().field("value", FieldKind::String))
        .validate_inputs(true)
        .then(step)
        .commit()
        .unwrap();
    let run = workflow.create_run();
    let err = run.start(json!({"value": 42})).await.unwrap_err();

    assert!(err.to_string().contains("Validation failed"));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    // The rejected start leaves the run unstarted.
    assert_eq!(run.status(), None);
}

#[tokio::test]
async fn test_step_input_validation_records_failed_result() {
    let handler_calls = Arc::new(AtomicUsize::new(0));
    let counter = handler_calls.clone();

    let producer = Step::new("producer", |_ctx| async move {
        StepOutcome::success(json!({"count": "not a number"}))
    });
    let consumer = Step::new("consumer", move |_ctx| {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            StepOutcome::success(json!({}))
        }
    })
    .with_input_schema(Schema::object().field("count", FieldKind::Number));

    let workflow = WorkflowBuilder::new("leaf-validation")
        .validate_inputs(true)
        .then(producer)
        .then(consumer)
        .commit()
        .unwrap();
    let result = workflow.create_run().start(json!({})).await.unwrap();

    assert_eq!(result.status, RunStatus::Failed);
    assert_eq!(handler_calls.load(Ordering::SeqCst), 0);
    let record = result.step("consumer").unwrap();
    assert_eq!(record.status, StepStatus::Failed);
    assert!(record.error.as_ref().unwrap().details.is_some());
}

#[tokio::test]
async fn test_failure_preserves_details_and_cause() {
    use runweave_core::StepFailure;

    let failing = Step::new("failing", |_ctx| async move {
        StepOutcome::failed_with(
            StepFailure::new("payment declined")
                .with_details(json!({"code": "card_declined"}))
                .with_cause("gateway returned 402"),
        )
    });

    let workflow = WorkflowBuilder::new("rich-failure")
        .then(failing)
        .commit()
        .unwrap();
    let result = workflow.create_run().start(json!({})).await.unwrap();

    let error = result.error.unwrap();
    assert_eq!(error.message, "payment declined");
    assert_eq!(error.details, Some(json!({"code": "card_declined"})));
    assert_eq!(error.cause.as_deref(), Some("gateway returned 402"));
}

#[tokio::test]
async fn test_lifecycle_callbacks_fire_on_failure() {
    let finished = Arc::new(AtomicUsize::new(0));
    let errored = Arc::new(AtomicUsize::new(0));
    let finish_counter = finished.clone();
    let error_counter = errored.clone();

    let workflow = WorkflowBuilder::new("callbacks")
        .then(Step::new("boom", |_ctx| async move {
            StepOutcome::failed("nope")
        }))
        .on_finish(move |_result| {
            finish_counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .on_error(move |result| {
            assert_eq!(result.status, RunStatus::Failed);
            error_counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .commit()
        .unwrap();
    workflow.create_run().start(json!({})).await.unwrap();

    assert_eq!(finished.load(Ordering::SeqCst), 1);
    assert_eq!(errored.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_callback_error_does_not_poison_result() {
    let workflow = WorkflowBuilder::new("bad-callback")
        .then(echo_step("only"))
        .on_finish(|_result| Err("callback exploded".into()))
        .commit()
        .unwrap();

    let result = workflow.create_run().start(json!({"ok": 1})).await.unwrap();
    assert_eq!(result.status, RunStatus::Success);
}

#[tokio::test]
async fn test_cancel_before_start_cancels_walk() {
    let workflow = WorkflowBuilder::new("cancelable")
        .then(echo_step("only"))
        .commit()
        .unwrap();
    let run = workflow.create_run();
    run.cancel().await.unwrap();

    let result = run.start(json!({})).await.unwrap();
    assert_eq!(result.status, RunStatus::Canceled);
    assert!(result.steps.is_empty());
}

#[tokio::test]
async fn test_foreach_over_nested_workflow() {
    let scorer = WorkflowBuilder::new("scorer")
        .then(Step::new("rate", |ctx| async move {
            let n = ctx.input().as_i64().unwrap_or(0);
            StepOutcome::success(json!(n * 2))
        }))
        .commit()
        .unwrap();

    let workflow = WorkflowBuilder::new("scored-batch")
        .foreach(scorer)
        .commit()
        .unwrap();
    let result = workflow
        .create_run()
        .start(json!([1, 2, 3]))
        .await
        .unwrap();

    assert_eq!(result.status, RunStatus::Success);
    assert_eq!(result.output, Some(json!([2, 4, 6])));
    // The nested workflow records under its own id; inner leaves stay inside.
    assert_eq!(result.step("scorer").unwrap().output, Some(json!([2, 4, 6])));
    assert!(result.step("rate").is_none());
}

#[tokio::test]
async fn test_parallel_mixes_steps_and_workflows() {
    use runweave_core::GraphNode;

    let audit = WorkflowBuilder::new("audit")
        .then(Step::new("inspect", |_ctx| async move {
            StepOutcome::success(json!({"clean": true}))
        }))
        .commit()
        .unwrap();
    let solo = Step::new("solo", |_ctx| async move {
        StepOutcome::success(json!(7))
    });

    let workflow = WorkflowBuilder::new("mixed")
        .parallel(vec![GraphNode::from(solo), audit.into()])
        .commit()
        .unwrap();
    let result = workflow.create_run().start(json!({})).await.unwrap();

    assert_eq!(result.status, RunStatus::Success);
    assert_eq!(
        result.output,
        Some(json!({"solo": 7, "audit": {"clean": true}}))
    );
}

#[tokio::test]
async fn test_loop_over_nested_workflow_body() {
    let refine = WorkflowBuilder::new("refine")
        .then(Step::new("halve", |ctx| async move {
            let n = ctx.input()["n"].as_i64().unwrap_or(0);
            StepOutcome::success(json!({"n": n / 2}))
        }))
        .commit()
        .unwrap();

    let workflow = WorkflowBuilder::new("until-small")
        .dountil(
            refine,
            condition(|ctx| ctx.input()["n"].as_i64().unwrap_or(0) <= 1),
        )
        .commit()
        .unwrap();
    let result = workflow.create_run().start(json!({"n": 8})).await.unwrap();

    assert_eq!(result.status, RunStatus::Success);
    assert_eq!(result.output, Some(json!({"n": 1})));
    assert_eq!(
        result.step("refine").unwrap().metadata_field("iterationCount"),
        Some(&json!(3))
    );
}
