use async_trait::async_trait;
use dagcore::{Context, Step, StepError, StepId, StepSpec, Value};
use dagruntime::{FunctionRegistry, StepFunction};
use std::sync::Arc;

/// Applies a registered function to one context key
pub struct TransformStep {
    pub(crate) spec: StepSpec,
    function: StepFunction,
    input_key: String,
    output_key: Option<String>,
}

impl TransformStep {
    pub fn new(id: impl Into<StepId>, input_key: impl Into<String>, function: StepFunction) -> Self {
        Self {
            spec: StepSpec::new(id),
            function,
            input_key: input_key.into(),
            output_key: None,
        }
    }

    /// Resolve `name` in the registry now, so a typo fails while building.
    pub fn from_registry(
        id: impl Into<StepId>,
        input_key: impl Into<String>,
        registry: &FunctionRegistry,
        name: &str,
    ) -> Result<Self, StepError> {
        let function = registry.resolve(name)?;
        Ok(Self::new(id, input_key, function))
    }

    /// Wrap a plain closure
    pub fn from_fn<F>(id: impl Into<StepId>, input_key: impl Into<String>, func: F) -> Self
    where
        F: Fn(Value) -> Result<Value, StepError> + Send + Sync + 'static,
    {
        Self::new(id, input_key, StepFunction::Sync(Arc::new(func)))
    }

    pub fn with_output_key(mut self, key: impl Into<String>) -> Self {
        self.output_key = Some(key.into());
        self
    }

    pub fn output_key(&self) -> &str {
        self.output_key.as_deref().unwrap_or(&self.spec.id)
    }
}

#[async_trait]
impl Step for TransformStep {
    fn spec(&self) -> &StepSpec {
        &self.spec
    }

    fn kind(&self) -> &str {
        "transform"
    }

    async fn execute(&self, ctx: &Context) -> Result<Value, StepError> {
        let input = ctx.get(&self.input_key).unwrap_or_default();
        let output = self.function.call(input).await?;
        ctx.set(self.output_key(), output.clone());
        Ok(output)
    }
}

fn expect_str<'a>(value: &'a Value, function: &str) -> Result<&'a str, StepError> {
    value.as_str().ok_or_else(|| StepError::InvalidInputType {
        field: function.to_string(),
        expected: "string".to_string(),
        actual: value.type_name().to_string(),
    })
}

/// Register the built-in transforms: `upper`, `lower`, `length`, `json`
/// and `identity`.
pub fn register_builtins(registry: &mut FunctionRegistry) {
    registry.register_sync("upper", |value| {
        Ok(Value::from(expect_str(&value, "upper")?.to_uppercase()))
    });

    registry.register_sync("lower", |value| {
        Ok(Value::from(expect_str(&value, "lower")?.to_lowercase()))
    });

    registry.register_sync("length", |value| {
        let len = match &value {
            Value::String(s) => s.chars().count(),
            Value::Array(items) => items.len(),
            Value::Object(map) => map.len(),
            other => {
                return Err(StepError::InvalidInputType {
                    field: "length".to_string(),
                    expected: "string, array or object".to_string(),
                    actual: other.type_name().to_string(),
                })
            }
        };
        Ok(Value::from(len))
    });

    registry.register_sync("json", |value| {
        let text = expect_str(&value, "json")?;
        let parsed: serde_json::Value = serde_json::from_str(text)
            .map_err(|e| StepError::failed(format!("JSON parse error: {}", e)))?;
        Ok(Value::from(parsed))
    });

    registry.register_sync("identity", Ok);
}
