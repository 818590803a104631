//! Built-in demonstration workflows

use anyhow::{anyhow, Result};
use dagcore::{Input, RetryPolicy, SkipPropagation, StepBuilder, StepError, Value, Workflow};
use dagruntime::{FunctionRegistry, ParameterDefinition, ToolExecutor, ToolMetadata, ToolRegistry};
use dagsteps::{
    register_builtins, BranchStep, DelayStep, FanOutStep, FunctionStep, IterateStep, JoinPolicy,
    ToolStep, TransformStep,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const DEMOS: &[(&str, &str)] = &[
    ("simple", "Chain two arithmetic tools: a + b, then double it"),
    ("conditional", "Branch on a threshold and skip a step by condition"),
    ("parallel", "Fan out three tools, one of which fails"),
    ("loop", "Square every element of a list"),
    ("pipeline", "Text transforms, a flaky retried tool and a pause"),
];

fn number(inputs: &HashMap<String, Value>, name: &str) -> Result<f64, StepError> {
    let value = inputs
        .get(name)
        .ok_or_else(|| StepError::MissingInput(name.to_string()))?;
    value.as_f64().ok_or_else(|| StepError::InvalidInputType {
        field: name.to_string(),
        expected: "number".to_string(),
        actual: value.type_name().to_string(),
    })
}

fn binary_metadata(description: &str) -> ToolMetadata {
    ToolMetadata {
        description: description.to_string(),
        category: "math".to_string(),
        parameters: vec![
            ParameterDefinition::required("a", "left operand"),
            ParameterDefinition::required("b", "right operand"),
        ],
    }
}

/// Tools the demo workflows call
pub fn demo_tools() -> ToolRegistry {
    let mut tools = ToolRegistry::new();

    tools.register_fn("add", binary_metadata("Add two numbers"), |inputs| async move {
        Ok(Value::from(number(&inputs, "a")? + number(&inputs, "b")?))
    });

    tools.register_fn(
        "multiply",
        binary_metadata("Multiply two numbers"),
        |inputs| async move { Ok(Value::from(number(&inputs, "a")? * number(&inputs, "b")?)) },
    );

    tools.register_fn(
        "fail",
        ToolMetadata {
            description: "Always fails".to_string(),
            category: "testing".to_string(),
            parameters: Vec::new(),
        },
        |_| async move { Err(StepError::failed("this tool always fails")) },
    );

    let calls = Arc::new(AtomicU32::new(0));
    tools.register_fn(
        "flaky",
        ToolMetadata {
            description: "Fails on its first call, then echoes `value`".to_string(),
            category: "testing".to_string(),
            parameters: vec![ParameterDefinition::optional("value", "value to echo")],
        },
        move |inputs| {
            let calls = calls.clone();
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    return Err(StepError::failed("transient failure"));
                }
                Ok(inputs.get("value").cloned().unwrap_or_default())
            }
        },
    );

    tools
}

/// Functions the demo workflows resolve by name
pub fn demo_functions() -> FunctionRegistry {
    let mut functions = FunctionRegistry::new();
    register_builtins(&mut functions);

    functions.register_sync("square", |value| {
        let n = value.as_f64().ok_or_else(|| StepError::InvalidInputType {
            field: "square".to_string(),
            expected: "number".to_string(),
            actual: value.type_name().to_string(),
        })?;
        Ok(Value::from(n * n))
    });

    functions.register_action("summary", |ctx| async move {
        let mut summary = HashMap::new();
        summary.insert("title".to_string(), ctx.get("title_upper").unwrap_or_default());
        summary.insert("length".to_string(), ctx.get("title_length").unwrap_or_default());
        Ok(Value::Object(summary))
    });

    functions
}

/// Build the named demo and its initial context
pub fn build(
    name: &str,
    executor: Arc<dyn ToolExecutor>,
    functions: &FunctionRegistry,
) -> Result<(Workflow, HashMap<String, Value>)> {
    let mut initial = HashMap::new();

    let workflow = match name {
        "simple" => {
            let mut workflow = Workflow::new("simple").with_description(DEMOS[0].1);
            workflow.add_step(
                ToolStep::new("A", "add", executor.clone())
                    .with_input("a", 10)
                    .with_input("b", 5),
            )?;
            workflow.add_step(
                ToolStep::new("B", "multiply", executor)
                    .with_input("a", Input::reference("A"))
                    .with_input("b", 2)
                    .depends_on(["A"]),
            )?;
            workflow
        }
        "conditional" => {
            initial.insert("threshold".to_string(), Value::from(10));
            let mut workflow = Workflow::new("conditional").with_description(DEMOS[1].1);
            workflow.add_step(
                ToolStep::new("score", "add", executor.clone())
                    .with_input("a", 7)
                    .with_input("b", 8),
            )?;
            workflow.add_step(
                BranchStep::new("check", |ctx| {
                    let score = ctx.get("score").and_then(|v| v.as_f64()).unwrap_or(0.0);
                    let threshold = ctx.get("threshold").and_then(|v| v.as_f64()).unwrap_or(0.0);
                    score > threshold
                })
                .with_true_branch(
                    ToolStep::new("bonus", "multiply", executor.clone())
                        .with_input("a", "$score")
                        .with_input("b", 10),
                )
                .with_false_branch(DelayStep::from_millis("wait", 10))
                .depends_on(["score"]),
            )?;
            workflow.add_step(
                ToolStep::new("penalty", "add", executor.clone())
                    .with_input("a", "$score")
                    .with_input("b", -5)
                    .with_condition(|ctx| !ctx.get("check_condition").map(|v| v.is_truthy()).unwrap_or(false))
                    .with_skip_propagation(SkipPropagation::Cascade)
                    .depends_on(["check"]),
            )?;
            workflow.add_step(
                ToolStep::new("penalty_report", "add", executor)
                    .with_input("a", "$penalty")
                    .with_input("b", 0)
                    .depends_on(["penalty"]),
            )?;
            workflow
        }
        "parallel" => {
            let mut workflow = Workflow::new("parallel").with_description(DEMOS[2].1);
            workflow.add_step(
                FanOutStep::new("fan")
                    .with_branch(
                        ToolStep::new("sum", "add", executor.clone())
                            .with_input("a", 1)
                            .with_input("b", 2),
                    )
                    .with_branch(
                        ToolStep::new("product", "multiply", executor.clone())
                            .with_input("a", 3)
                            .with_input("b", 4),
                    )
                    .with_branch(ToolStep::new("broken", "fail", executor))
                    .with_policy(JoinPolicy::WaitForAll),
            )?;
            workflow
        }
        "loop" => {
            initial.insert("numbers".to_string(), Value::from(vec![2, 3, 4]));
            let mut workflow = Workflow::new("loop").with_description(DEMOS[3].1);
            workflow.add_step(
                IterateStep::new(
                    "squares",
                    "numbers",
                    TransformStep::from_registry(
                        "square",
                        "squares_current_item",
                        functions,
                        "square",
                    )?,
                )
                .with_max_iterations(100),
            )?;
            workflow
        }
        "pipeline" => {
            initial.insert("title".to_string(), Value::from("dag workflows"));
            let mut workflow = Workflow::new("pipeline").with_description(DEMOS[4].1);
            workflow.add_step(
                TransformStep::from_registry("upper", "title", functions, "upper")?
                    .with_output_key("title_upper"),
            )?;
            workflow.add_step(
                TransformStep::from_registry("length", "title", functions, "length")?
                    .with_output_key("title_length"),
            )?;
            workflow.add_step(
                ToolStep::new("flaky", "flaky", executor)
                    .with_input("value", "$title_upper")
                    .with_retry(RetryPolicy::new(2, Duration::from_millis(100), 2.0))
                    .depends_on(["upper"]),
            )?;
            workflow.add_step(DelayStep::from_millis("pause", 50).depends_on(["flaky"]))?;
            workflow.add_step(
                FunctionStep::from_registry("summary", functions, "summary")?
                    .depends_on(["length", "pause"]),
            )?;
            workflow
        }
        other => return Err(anyhow!("Unknown demo '{}'. Try `dag list`.", other)),
    };

    Ok((workflow, initial))
}
