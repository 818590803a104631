//! Standard step library
//!
//! Collection of built-in step variants for common workflow patterns

mod branch;
mod email;
mod function;
mod http;
mod iterate;
mod parallel;
mod time;
mod tool;
mod transform;

pub use branch::BranchStep;
pub use email::{EmailStep, SmtpConfig};
pub use function::FunctionStep;
pub use http::{HttpMethod, WebhookStep};
pub use iterate::{BreakCondition, IterateStep};
pub use parallel::{FanOutStep, JoinPolicy};
pub use time::DelayStep;
pub use tool::ToolStep;
pub use transform::{register_builtins, TransformStep};

/// Wire a step type's `spec` field into the shared builder methods.
macro_rules! impl_step_builder {
    ($($ty:ty),* $(,)?) => {
        $(
            impl dagcore::StepBuilder for $ty {
                fn spec_mut(&mut self) -> &mut dagcore::StepSpec {
                    &mut self.spec
                }
            }
        )*
    };
}

impl_step_builder!(
    BranchStep,
    DelayStep,
    EmailStep,
    FanOutStep,
    FunctionStep,
    IterateStep,
    ToolStep,
    TransformStep,
    WebhookStep,
);

/// Key under which a step stores derived output, e.g. `fetch_results`
pub(crate) fn derived_key(step_id: &str, suffix: &str) -> String {
    format!("{}_{}", step_id, suffix)
}

/// Record a sub-step outcome as `{success, result}` or `{success, error}`
pub(crate) fn outcome_entry(
    outcome: Result<dagcore::Value, dagcore::StepError>,
) -> std::collections::HashMap<String, dagcore::Value> {
    use dagcore::Value;

    let mut entry = std::collections::HashMap::new();
    match outcome {
        Ok(result) => {
            entry.insert("success".to_string(), Value::Bool(true));
            entry.insert("result".to_string(), result);
        }
        Err(e) => {
            entry.insert("success".to_string(), Value::Bool(false));
            entry.insert("error".to_string(), Value::String(e.to_string()));
        }
    }
    entry
}
