// crates/dagruntime/tests/engine_test.rs

mod common;

use common::{constant, failing, init_tracing, number, sleepy, step};
use dagcore::{
    EngineError, ExecutionEvent, RetryPolicy, SkipPropagation, Step, StepBuilder, StepError,
    StepResult, StepStatus, Value, Workflow, WorkflowError, WorkflowState, WorkflowStatus,
    PREVIOUS_ERROR_KEY,
};
use dagruntime::{EngineConfig, WorkflowEngine, WorkflowObserver};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn engine() -> WorkflowEngine {
    WorkflowEngine::new(EngineConfig::default())
}

#[tokio::test]
async fn test_chained_steps_pass_values_through_context() {
    init_tracing();

    let mut workflow = Workflow::new("chain");
    workflow
        .add_step(step("A", |ctx| async move {
            Ok(Value::from(number(&ctx, "a") + number(&ctx, "b")))
        }))
        .unwrap();
    workflow
        .add_step(
            step("B", |ctx| async move { Ok(Value::from(number(&ctx, "A") * 2.0)) })
                .depends_on(["A"]),
        )
        .unwrap();

    let mut initial = HashMap::new();
    initial.insert("a".to_string(), Value::from(10));
    initial.insert("b".to_string(), Value::from(5));

    let state = engine().execute_workflow(&workflow, initial).await.unwrap();

    assert_eq!(state.status, WorkflowStatus::Completed);
    assert_eq!(state.context.get("A"), Some(Value::Number(15.0)));
    assert_eq!(state.context.get("B"), Some(Value::Number(30.0)));
    assert_eq!(state.completed_steps.len(), 2);
    assert!(state.failed_steps.is_empty());
    assert!(state.end_time.is_some());
    assert!(state.step_results["B"].duration().is_some());
}

#[tokio::test]
async fn test_run_records_ids_in_metadata() {
    let mut workflow = Workflow::new("meta").with_id("wf-meta");
    workflow.add_step(constant("only", 1)).unwrap();

    let state = engine().execute_workflow(&workflow, HashMap::new()).await.unwrap();

    assert_eq!(
        state.context.get_metadata("workflow_id"),
        Some(Value::from("wf-meta"))
    );
    assert!(state.context.get_metadata("execution_id").is_some());
    assert_eq!(state.workflow_id, "wf-meta");
}

#[tokio::test]
async fn test_validation_failure_aborts_before_any_step_runs() {
    let runs = Arc::new(AtomicUsize::new(0));
    let counter = runs.clone();
    let counted = step("a", move |_| {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Value::Null)
        }
    })
    .depends_on(["b"]);

    let workflow = Workflow::from_steps(
        "cyclic",
        vec![
            Arc::new(counted) as Arc<dyn Step>,
            Arc::new(constant("b", 1).depends_on(["a"])) as Arc<dyn Step>,
        ],
    )
    .unwrap();

    let err = engine()
        .execute_workflow(&workflow, HashMap::new())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::Validation(WorkflowError::Validation(_))
    ));
    assert_eq!(runs.load(Ordering::SeqCst), 0);

    let err = engine()
        .run(&Workflow::new("empty"), HashMap::new(), CancellationToken::new())
        .await
        .unwrap_err();
    assert_eq!(
        err,
        WorkflowError::Validation(vec!["Workflow has no steps".to_string()])
    );
}

#[tokio::test]
async fn test_skipped_step_satisfies_dependents() {
    let mut workflow = Workflow::new("skip");
    workflow
        .add_step(constant("optional", 1).with_condition(|ctx| ctx.contains("enabled")))
        .unwrap();
    workflow
        .add_step(constant("after", 2).depends_on(["optional"]))
        .unwrap();

    let state = engine().execute_workflow(&workflow, HashMap::new()).await.unwrap();

    assert!(state.is_step_skipped("optional"));
    assert!(state.is_step_completed("after"));
    let skipped = &state.step_results["optional"];
    assert_eq!(skipped.status, StepStatus::Skipped);
    assert_eq!(
        skipped.metadata.get("skip_reason"),
        Some(&Value::from("condition not met"))
    );
    assert!(!state.context.contains("optional"));
}

#[tokio::test]
async fn test_cascading_skip_blocks_dependents_transitively() {
    let mut workflow = Workflow::new("cascade");
    workflow
        .add_step(
            constant("gate", 1)
                .with_condition(|_| false)
                .with_skip_propagation(SkipPropagation::Cascade),
        )
        .unwrap();
    workflow.add_step(constant("other", 2)).unwrap();
    workflow
        .add_step(constant("child", 3).depends_on(["gate", "other"]))
        .unwrap();
    workflow
        .add_step(constant("grandchild", 4).depends_on(["child"]))
        .unwrap();
    workflow
        .add_step(constant("sibling", 5).depends_on(["other"]))
        .unwrap();

    let state = engine().execute_workflow(&workflow, HashMap::new()).await.unwrap();

    assert_eq!(state.status, WorkflowStatus::Completed);
    for id in ["gate", "child", "grandchild"] {
        assert!(state.is_step_skipped(id), "{} should be skipped", id);
    }
    assert!(state.is_step_completed("other"));
    assert!(state.is_step_completed("sibling"));
    assert_eq!(
        state.step_results["grandchild"].metadata.get("skip_reason"),
        Some(&Value::from("dependency 'child' was skipped"))
    );
}

#[tokio::test]
async fn test_failure_stops_dispatch_but_lets_running_steps_finish() {
    init_tracing();

    let mut workflow = Workflow::new("fail-fast");
    workflow.add_step(failing("broken", "boom")).unwrap();
    workflow.add_step(sleepy("slow", 50, "done")).unwrap();
    workflow
        .add_step(constant("after_broken", 1).depends_on(["broken"]))
        .unwrap();
    workflow
        .add_step(constant("after_slow", 1).depends_on(["slow"]))
        .unwrap();

    let state = engine()
        .run(&workflow, HashMap::new(), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(state.status, WorkflowStatus::Failed);
    assert!(state.is_step_failed("broken"));
    assert!(state.is_step_completed("slow"), "running sibling finishes");
    assert!(!state.step_results.contains_key("after_broken"));
    assert!(!state.step_results.contains_key("after_slow"));
    assert_eq!(
        state.error.as_deref(),
        Some("Step 'broken' failed: Execution failed: boom")
    );

    let err = engine()
        .execute_workflow(&workflow, HashMap::new())
        .await
        .unwrap_err();
    match err {
        EngineError::StepFailed { step_id, source } => {
            assert_eq!(step_id, "broken");
            assert_eq!(source, StepError::failed("boom"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

fn fails_then_succeeds(id: &str, failures: usize, attempts: Arc<AtomicUsize>) -> common::TestStep {
    step(id, move |_| {
        let attempts = attempts.clone();
        async move {
            let attempt = attempts.fetch_add(1, Ordering::SeqCst) + 1;
            if attempt <= failures {
                Err(StepError::failed(format!("attempt {} failed", attempt)))
            } else {
                Ok(Value::from("recovered"))
            }
        }
    })
}

#[tokio::test(start_paused = true)]
async fn test_retry_with_exponential_backoff() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let mut workflow = Workflow::new("retry");
    workflow
        .add_step(
            fails_then_succeeds("flaky", 2, attempts.clone())
                .with_retry(RetryPolicy::new(2, Duration::from_secs(1), 2.0)),
        )
        .unwrap();

    let engine = engine();
    let mut events = engine.subscribe_events();

    let started = tokio::time::Instant::now();
    let state = engine.execute_workflow(&workflow, HashMap::new()).await.unwrap();
    let elapsed = started.elapsed();

    assert!(elapsed >= Duration::from_secs(3), "elapsed {:?}", elapsed);
    assert_eq!(attempts.load(Ordering::SeqCst), 3);

    let result: &StepResult = &state.step_results["flaky"];
    assert_eq!(result.status, StepStatus::Completed);
    assert_eq!(result.retry_count(), 2);
    assert_eq!(
        result.metadata.get(PREVIOUS_ERROR_KEY),
        Some(&Value::from("Execution failed: attempt 2 failed"))
    );
    assert!(state.failed_steps.is_empty());

    let mut delays = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let ExecutionEvent::StepRetrying { retry, delay_ms, .. } = event {
            delays.push((retry, delay_ms));
        }
    }
    assert_eq!(delays, vec![(1, 1000), (2, 2000)]);
}

#[tokio::test(start_paused = true)]
async fn test_retries_exhausted_fail_the_step() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let mut workflow = Workflow::new("exhaust");
    workflow
        .add_step(
            fails_then_succeeds("never", usize::MAX, attempts.clone())
                .with_retry(RetryPolicy::new(2, Duration::from_millis(10), 2.0)),
        )
        .unwrap();

    let err = engine()
        .execute_workflow(&workflow, HashMap::new())
        .await
        .unwrap_err();

    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    match err {
        EngineError::StepFailed {
            source: StepError::RetryExhausted { retries, last },
            ..
        } => {
            assert_eq!(retries, 2);
            assert_eq!(*last, StepError::failed("attempt 3 failed"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_disabled_retries_ignore_policy() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let mut workflow = Workflow::new("no-retry");
    workflow
        .add_step(
            fails_then_succeeds("once", 1, attempts.clone())
                .with_retry(RetryPolicy::new(3, Duration::from_millis(1), 1.0)),
        )
        .unwrap();

    let engine = WorkflowEngine::new(EngineConfig::default().with_retries(false));
    let err = engine
        .execute_workflow(&workflow, HashMap::new())
        .await
        .unwrap_err();

    assert_eq!(err.step_id(), Some("once"));
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_step_timeout_fails_without_retry() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = attempts.clone();
    let mut workflow = Workflow::new("timeout");
    workflow
        .add_step(
            step("slow", move |_| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(300)).await;
                    Ok(Value::from("too late"))
                }
            })
            .with_retry(RetryPolicy::new(3, Duration::from_millis(10), 1.0)),
        )
        .unwrap();

    let engine = WorkflowEngine::new(
        EngineConfig::default().with_step_timeout(Duration::from_millis(100)),
    );
    let err = engine
        .execute_workflow(&workflow, HashMap::new())
        .await
        .unwrap_err();

    assert_eq!(attempts.load(Ordering::SeqCst), 1);
    match err {
        EngineError::StepFailed { step_id, source } => {
            assert_eq!(step_id, "slow");
            assert_eq!(source, StepError::Timeout { millis: 100 });
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_aborts_running_steps() {
    let mut workflow = Workflow::new("cancel");
    workflow.add_step(sleepy("long", 10_000, 1)).unwrap();
    workflow.add_step(constant("quick", 2)).unwrap();
    workflow
        .add_step(constant("after", 3).depends_on(["long"]))
        .unwrap();

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let state = engine().run(&workflow, HashMap::new(), cancel).await.unwrap();

    assert_eq!(state.status, WorkflowStatus::Cancelled);
    assert_eq!(state.step_results["long"].status, StepStatus::Cancelled);
    assert!(state.is_step_completed("quick"));
    assert!(!state.step_results.contains_key("after"));
    assert!(!state.context.contains("long"));
}

#[tokio::test(start_paused = true)]
async fn test_dropping_the_run_aborts_step_tasks() {
    let finished = Arc::new(AtomicUsize::new(0));
    let counter = finished.clone();

    let mut workflow = Workflow::new("dropped");
    workflow
        .add_step(step("slow", move |ctx| {
            let counter = counter.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(500)).await;
                counter.fetch_add(1, Ordering::SeqCst);
                ctx.set("slow_done", true);
                Ok(Value::Null)
            }
        }))
        .unwrap();

    let engine = engine();
    let outcome = tokio::time::timeout(
        Duration::from_millis(50),
        engine.execute_workflow(&workflow, HashMap::new()),
    )
    .await;
    assert!(outcome.is_err());

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(finished.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_cancelled_before_start_runs_nothing() {
    let mut workflow = Workflow::new("precancelled");
    workflow.add_step(constant("a", 1)).unwrap();

    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = engine()
        .execute_with_cancel(&workflow, HashMap::new(), cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Cancelled));
}

fn tracked(id: &str, active: Arc<AtomicUsize>, peak: Arc<AtomicUsize>) -> common::TestStep {
    step(id, move |_| {
        let active = active.clone();
        let peak = peak.clone();
        async move {
            let now = active.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            active.fetch_sub(1, Ordering::SeqCst);
            Ok(Value::Null)
        }
    })
}

#[tokio::test(start_paused = true)]
async fn test_parallelism_is_bounded() {
    for (limit, expected_peak) in [(2, 2), (0, 1)] {
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut workflow = Workflow::new("bounded");
        for i in 0..6 {
            workflow
                .add_step(tracked(&format!("s{}", i), active.clone(), peak.clone()))
                .unwrap();
        }

        let engine =
            WorkflowEngine::new(EngineConfig::default().with_max_parallel_steps(limit));
        let state = engine.execute_workflow(&workflow, HashMap::new()).await.unwrap();

        assert_eq!(state.completed_steps.len(), 6);
        assert_eq!(peak.load(Ordering::SeqCst), expected_peak, "limit {}", limit);
    }
}

#[derive(Default)]
struct Recorder {
    calls: Mutex<Vec<String>>,
}

impl Recorder {
    fn push(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl WorkflowObserver for Recorder {
    fn on_workflow_start(&self, workflow: &Workflow, _state: &WorkflowState) {
        self.push(format!("workflow_start:{}", workflow.name));
    }

    fn on_workflow_complete(&self, _workflow: &Workflow, state: &WorkflowState) {
        self.push(format!("workflow_complete:{:?}", state.status));
    }

    fn on_workflow_error(&self, _workflow: &Workflow, _state: &WorkflowState, error: &EngineError) {
        self.push(format!("workflow_error:{}", error.step_id().unwrap_or("-")));
    }

    fn on_step_start(&self, step: &dyn Step, _state: &WorkflowState) {
        self.push(format!("step_start:{}", step.id()));
    }

    fn on_step_complete(&self, step: &dyn Step, result: &StepResult, _state: &WorkflowState) {
        self.push(format!("step_complete:{}={}", step.id(), result.result));
    }

    fn on_step_error(&self, step: &dyn Step, _error: &StepError, _state: &WorkflowState) {
        self.push(format!("step_error:{}", step.id()));
    }
}

#[tokio::test]
async fn test_observer_sees_lifecycle_in_order() {
    let recorder = Arc::new(Recorder::default());
    let mut engine = engine();
    engine.add_observer(recorder.clone());

    let mut workflow = Workflow::new("observed");
    workflow.add_step(constant("first", 1)).unwrap();
    workflow
        .add_step(constant("second", 2).depends_on(["first"]))
        .unwrap();
    engine.execute_workflow(&workflow, HashMap::new()).await.unwrap();

    assert_eq!(
        recorder.calls(),
        vec![
            "workflow_start:observed",
            "step_start:first",
            "step_complete:first=1",
            "step_start:second",
            "step_complete:second=2",
            "workflow_complete:Completed",
        ]
    );

    let failing_recorder = Arc::new(Recorder::default());
    let mut engine = WorkflowEngine::new(EngineConfig::default());
    engine.add_observer(failing_recorder.clone());
    let mut workflow = Workflow::new("observed-failure");
    workflow.add_step(failing("bad", "nope")).unwrap();
    let _ = engine.execute_workflow(&workflow, HashMap::new()).await;

    assert_eq!(
        failing_recorder.calls(),
        vec![
            "workflow_start:observed-failure",
            "step_start:bad",
            "step_error:bad",
            "workflow_error:bad",
        ]
    );
}

#[tokio::test]
async fn test_event_stream_brackets_the_run() {
    let engine = engine();
    let mut events = engine.subscribe_events();

    let mut workflow = Workflow::new("events");
    workflow.add_step(constant("one", 1)).unwrap();
    workflow
        .add_step(constant("two", 2).with_condition(|_| false))
        .unwrap();
    engine.execute_workflow(&workflow, HashMap::new()).await.unwrap();

    let mut received = Vec::new();
    while let Ok(event) = events.try_recv() {
        received.push(event);
    }

    assert!(matches!(received.first(), Some(ExecutionEvent::WorkflowStarted { .. })));
    assert!(matches!(received.last(), Some(ExecutionEvent::WorkflowCompleted { .. })));
    assert!(received.iter().any(|e| matches!(
        e,
        ExecutionEvent::StepSkipped { step_id, .. } if step_id == "two"
    )));
    let execution_id = received[0].execution_id();
    assert!(received.iter().all(|e| e.execution_id() == execution_id));
}

#[tokio::test]
async fn test_panicking_step_fails_the_workflow() {
    let mut workflow = Workflow::new("panic");
    workflow
        .add_step(step("explode", |_| async move {
            if true {
                panic!("kaboom");
            }
            Ok(Value::Null)
        }))
        .unwrap();

    let state = engine()
        .run(&workflow, HashMap::new(), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(state.status, WorkflowStatus::Failed);
    let error = state.step_results["explode"].error.clone().unwrap_or_default();
    assert!(error.contains("panicked"), "error was {error}");
}

#[tokio::test]
async fn test_execution_plan_from_engine() {
    let mut workflow = Workflow::new("plan");
    workflow.add_step(constant("a", 1)).unwrap();
    workflow.add_step(constant("b", 1).depends_on(["a"])).unwrap();
    workflow.add_step(constant("c", 1)).unwrap();

    let plan = engine().create_execution_plan(&workflow).unwrap();
    assert_eq!(plan.estimated_parallel_stages, 2);
    assert_eq!(plan.parallel_groups[&1], vec!["b".to_string()]);
}
