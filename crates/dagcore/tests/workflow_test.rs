// crates/dagcore/tests/workflow_test.rs

mod common;

use async_trait::async_trait;
use common::init_tracing;
use dagcore::{
    Context, RetryPolicy, Step, StepBuilder, StepError, StepSpec, Value, Workflow, WorkflowError,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

struct NoopStep {
    spec: StepSpec,
    broken: bool,
}

#[async_trait]
impl Step for NoopStep {
    fn spec(&self) -> &StepSpec {
        &self.spec
    }

    fn kind(&self) -> &str {
        "noop"
    }

    async fn execute(&self, _ctx: &Context) -> Result<Value, StepError> {
        Ok(Value::Null)
    }

    fn validate_config(&self) -> Result<(), StepError> {
        if self.broken {
            return Err(StepError::Configuration("broken on purpose".to_string()));
        }
        Ok(())
    }
}

fn noop(id: &str, deps: &[&str]) -> NoopStep {
    NoopStep {
        spec: StepSpec::new(id).depends_on(deps.iter().copied()),
        broken: false,
    }
}

fn shared(id: &str, deps: &[&str]) -> Arc<dyn Step> {
    Arc::new(noop(id, deps))
}

fn position(order: &[String], id: &str) -> usize {
    order.iter().position(|s| s == id).unwrap()
}

#[test]
fn test_add_step_rejects_duplicates_and_unknown_dependencies() {
    let mut workflow = Workflow::new("build");
    workflow.add_step(noop("a", &[])).unwrap();

    assert_eq!(
        workflow.add_step(noop("a", &[])),
        Err(WorkflowError::DuplicateStep("a".to_string()))
    );
    assert_eq!(
        workflow.add_step(noop("b", &["later"])),
        Err(WorkflowError::UnknownDependency {
            step: "b".to_string(),
            dependency: "later".to_string(),
        })
    );
    assert_eq!(workflow.list_steps(), vec!["a".to_string()]);
}

#[test]
fn test_execution_order_respects_dependencies() {
    let mut workflow = Workflow::new("diamond");
    workflow.add_step(noop("fetch", &[])).unwrap();
    workflow.add_step(noop("left", &["fetch"])).unwrap();
    workflow.add_step(noop("right", &["fetch"])).unwrap();
    workflow.add_step(noop("join", &["left", "right"])).unwrap();

    let order = workflow.execution_order().unwrap();
    assert_eq!(order.len(), 4);
    assert!(position(&order, "fetch") < position(&order, "left"));
    assert!(position(&order, "fetch") < position(&order, "right"));
    assert!(position(&order, "left") < position(&order, "join"));
    assert!(position(&order, "right") < position(&order, "join"));
}

#[test]
fn test_execution_order_on_wider_graph() {
    // Declared in reverse so the traversal, not insertion, produces the order.
    let mut steps = Vec::new();
    for i in (0..30).rev() {
        let deps: Vec<String> = [i / 2, i / 3]
            .into_iter()
            .filter(|&d| d != i)
            .map(|d| format!("s{}", d))
            .collect();
        let deps: Vec<&str> = deps.iter().map(String::as_str).collect();
        steps.push(shared(&format!("s{}", i), &deps));
    }
    let workflow = Workflow::from_steps("wide", steps).unwrap();

    let order = workflow.execution_order().unwrap();
    assert_eq!(order.len(), 30);
    for step in workflow.steps() {
        for dep in step.dependencies() {
            assert!(position(&order, dep) < position(&order, step.id()));
        }
    }
}

#[test]
fn test_cycle_detected_by_order_and_validate() {
    let workflow = Workflow::from_steps(
        "cyclic",
        vec![
            shared("a", &["c"]),
            shared("b", &["a"]),
            shared("c", &["b"]),
        ],
    )
    .unwrap();

    assert!(matches!(
        workflow.execution_order(),
        Err(WorkflowError::CircularDependency(_))
    ));
    let problems = workflow.validate();
    assert_eq!(problems.len(), 1);
    assert!(problems[0].contains("Circular dependency"));
}

#[test]
fn test_long_chain_orders_without_deep_recursion() {
    // Declared last-to-first so the first walk descends the whole chain.
    let len = 50_000;
    let mut steps = Vec::with_capacity(len);
    for i in (0..len).rev() {
        let deps: Vec<String> = if i == 0 {
            Vec::new()
        } else {
            vec![format!("s{}", i - 1)]
        };
        let deps: Vec<&str> = deps.iter().map(String::as_str).collect();
        steps.push(shared(&format!("s{}", i), &deps));
    }
    let workflow = Workflow::from_steps("long", steps).unwrap();

    let order = workflow.execution_order().unwrap();
    assert_eq!(order.len(), len);
    assert_eq!(order.first().map(String::as_str), Some("s0"));
    assert_eq!(order.last().map(String::as_str), Some("s49999"));
    assert!(workflow.validate().is_empty());

    let plan = workflow.execution_plan().unwrap();
    assert_eq!(plan.estimated_parallel_stages, len);
}

#[test]
fn test_self_dependency_is_a_cycle() {
    let workflow = Workflow::from_steps("self", vec![shared("loop", &["loop"])]).unwrap();

    assert_eq!(
        workflow.execution_order(),
        Err(WorkflowError::CircularDependency("loop".to_string()))
    );
}

#[test]
fn test_validate_reports_every_problem() {
    init_tracing();
    assert_eq!(
        Workflow::new("empty").validate(),
        vec!["Workflow has no steps".to_string()]
    );

    let mut broken = noop("bad", &[]);
    broken.broken = true;
    let workflow = Workflow::from_steps(
        "problems",
        vec![shared("a", &["ghost"]), Arc::new(broken) as Arc<dyn Step>],
    )
    .unwrap();

    let problems = workflow.validate();
    assert_eq!(problems.len(), 2);
    assert!(problems
        .iter()
        .any(|p| p == "Step 'a' depends on unknown step 'ghost'"));
    assert!(problems
        .iter()
        .any(|p| p == "Step 'bad': Configuration error: broken on purpose"));
}

#[test]
fn test_execution_plan_groups_by_longest_chain() {
    let mut workflow = Workflow::new("plan").with_id("plan-1");
    workflow.add_step(noop("a", &[])).unwrap();
    workflow.add_step(noop("b", &["a"])).unwrap();
    workflow.add_step(noop("c", &["a"])).unwrap();
    workflow.add_step(noop("d", &["b", "c"])).unwrap();
    workflow.add_step(noop("e", &[])).unwrap();
    workflow.add_step(noop("f", &["a", "d"])).unwrap();

    let plan = workflow.execution_plan().unwrap();
    assert_eq!(plan.workflow_id, "plan-1");
    assert_eq!(plan.total_steps, 6);
    assert_eq!(plan.estimated_parallel_stages, 4);

    let levels: HashMap<&str, usize> = plan
        .dependency_levels
        .iter()
        .map(|(k, v)| (k.as_str(), *v))
        .collect();
    assert_eq!(levels["a"], 0);
    assert_eq!(levels["e"], 0);
    assert_eq!(levels["b"], 1);
    assert_eq!(levels["c"], 1);
    assert_eq!(levels["d"], 2);
    assert_eq!(levels["f"], 3);

    let mut level_one = plan.parallel_groups[&1].clone();
    level_one.sort();
    assert_eq!(level_one, vec!["b".to_string(), "c".to_string()]);

    let json = serde_json::to_value(&plan).unwrap();
    assert_eq!(json["total_steps"], 6);
}

#[test]
fn test_dependency_graph_lookups() {
    let mut workflow = Workflow::new("graph");
    workflow.add_step(noop("root", &[])).unwrap();
    workflow.add_step(noop("z", &["root"])).unwrap();
    workflow.add_step(noop("y", &["root"])).unwrap();

    let graph = workflow.dependency_graph();
    assert_eq!(graph.node_count(), 3);
    assert_eq!(graph.dependents("root"), vec!["y".to_string(), "z".to_string()]);
    assert_eq!(graph.dependencies("z"), vec!["root".to_string()]);
    assert!(workflow.dependents_of("missing").is_empty());
}

#[test]
fn test_step_spec_defaults_and_builders() {
    let spec = StepSpec::new("fetch")
        .depends_on(["a", "b", "a"])
        .with_description("downloads things")
        .with_condition(|ctx| ctx.contains("go"));

    assert_eq!(spec.name, "fetch");
    assert_eq!(spec.dependencies, vec!["a".to_string(), "b".to_string()]);
    assert!(spec.retry_policy.is_none());

    let ctx = Context::new();
    assert!(!spec.should_execute(&ctx));
    ctx.set("go", true);
    assert!(spec.should_execute(&ctx));
}

#[test]
fn test_retry_policy_backoff() {
    let policy = RetryPolicy::default();
    assert_eq!(policy.max_retries, 3);
    assert_eq!(policy.delay_for(1), Duration::from_secs(1));
    assert_eq!(policy.delay_for(2), Duration::from_secs(2));
    assert_eq!(policy.delay_for(3), Duration::from_secs(4));

    let flat = RetryPolicy::new(5, Duration::from_millis(250), 1.0);
    assert_eq!(flat.delay_for(4), Duration::from_millis(250));
}
