use async_trait::async_trait;
use dagcore::{Context, Step, StepError, StepId, StepSpec, Value};
use dagruntime::{ContextAction, FunctionRegistry};
use futures::FutureExt;
use std::future::Future;
use std::sync::Arc;

/// Runs host-registered logic against the live context and stores what it
/// returns under the output key.
pub struct FunctionStep {
    pub(crate) spec: StepSpec,
    action: ContextAction,
    output_key: Option<String>,
}

impl FunctionStep {
    pub fn new(id: impl Into<StepId>, action: ContextAction) -> Self {
        Self {
            spec: StepSpec::new(id),
            action,
            output_key: None,
        }
    }

    /// Look the action up by name while the workflow is being built
    pub fn from_registry(
        id: impl Into<StepId>,
        registry: &FunctionRegistry,
        name: &str,
    ) -> Result<Self, StepError> {
        Ok(Self::new(id, registry.action(name)?))
    }

    pub fn from_fn<F, Fut>(id: impl Into<StepId>, func: F) -> Self
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, StepError>> + Send + 'static,
    {
        let action: ContextAction = Arc::new(move |ctx| func(ctx).boxed());
        Self::new(id, action)
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
impl Step for FunctionStep {
    fn spec(&self) -> &StepSpec {
        &self.spec
    }

    fn kind(&self) -> &str {
        "function"
    }

    async fn execute(&self, ctx: &Context) -> Result<Value, StepError> {
        let result = (self.action)(ctx.clone()).await?;
        ctx.set(self.output_key(), result.clone());
        Ok(result)
    }
}
