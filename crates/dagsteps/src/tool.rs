use async_trait::async_trait;
use dagcore::{resolve_inputs, Context, Input, Step, StepError, StepSpec, StepId, Value};
use dagruntime::ToolExecutor;
use std::collections::HashMap;
use std::sync::Arc;

/// Computation step that delegates to an external tool executor
pub struct ToolStep {
    pub(crate) spec: StepSpec,
    tool_name: String,
    inputs: HashMap<String, Input>,
    output_key: Option<String>,
    executor: Arc<dyn ToolExecutor>,
}

impl ToolStep {
    pub fn new(
        id: impl Into<StepId>,
        tool_name: impl Into<String>,
        executor: Arc<dyn ToolExecutor>,
    ) -> Self {
        Self {
            spec: StepSpec::new(id),
            tool_name: tool_name.into(),
            inputs: HashMap::new(),
            output_key: None,
            executor,
        }
    }

    /// Add one named input. Plain strings starting with `$` are read as
    /// context references; use [`Input::literal`] to pass such a string as is.
    pub fn with_input(mut self, name: impl Into<String>, input: impl Into<Input>) -> Self {
        self.inputs.insert(name.into(), input.into());
        self
    }

    pub fn with_inputs<K, I>(mut self, inputs: impl IntoIterator<Item = (K, I)>) -> Self
    where
        K: Into<String>,
        I: Into<Input>,
    {
        for (name, input) in inputs {
            self.inputs.insert(name.into(), input.into());
        }
        self
    }

    pub fn with_output_key(mut self, key: impl Into<String>) -> Self {
        self.output_key = Some(key.into());
        self
    }

    pub fn tool_name(&self) -> &str {
        &self.tool_name
    }

    pub fn output_key(&self) -> &str {
        self.output_key.as_deref().unwrap_or(&self.spec.id)
    }
}

#[async_trait]
impl Step for ToolStep {
    fn spec(&self) -> &StepSpec {
        &self.spec
    }

    fn kind(&self) -> &str {
        "tool"
    }

    async fn execute(&self, ctx: &Context) -> Result<Value, StepError> {
        let resolved = resolve_inputs(&self.inputs, ctx);
        tracing::debug!(step_id = %self.spec.id, tool = %self.tool_name, "Calling tool");

        let result = self.executor.invoke(&self.tool_name, resolved).await?;

        ctx.set(self.output_key(), result.clone());
        Ok(result)
    }

    fn validate_config(&self) -> Result<(), StepError> {
        if self.tool_name.trim().is_empty() {
            return Err(StepError::Configuration("tool name is empty".to_string()));
        }
        Ok(())
    }
}
