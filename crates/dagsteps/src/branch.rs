use crate::derived_key;
use async_trait::async_trait;
use dagcore::{Condition, Context, Step, StepError, StepId, StepSpec, Value};
use std::sync::Arc;

/// Evaluates a predicate and runs exactly one of two optional sub-steps.
///
/// Stores the boolean under `{id}_condition` and, when a sub-step ran, its
/// result under `{id}_result`. With no sub-step for the chosen side the
/// boolean itself is the result.
pub struct BranchStep {
    pub(crate) spec: StepSpec,
    predicate: Condition,
    if_true: Option<Arc<dyn Step>>,
    if_false: Option<Arc<dyn Step>>,
}

impl BranchStep {
    pub fn new<F>(id: impl Into<StepId>, predicate: F) -> Self
    where
        F: Fn(&Context) -> bool + Send + Sync + 'static,
    {
        Self {
            spec: StepSpec::new(id),
            predicate: Arc::new(predicate),
            if_true: None,
            if_false: None,
        }
    }

    /// Branch on the truthiness of a context value; a missing key is false.
    pub fn from_key(id: impl Into<StepId>, key: impl Into<String>) -> Self {
        let key = key.into();
        Self::new(id, move |ctx| {
            ctx.get(&key).map(|v| v.is_truthy()).unwrap_or(false)
        })
    }

    pub fn with_true_branch(mut self, step: impl Step + 'static) -> Self {
        self.if_true = Some(Arc::new(step));
        self
    }

    pub fn with_false_branch(mut self, step: impl Step + 'static) -> Self {
        self.if_false = Some(Arc::new(step));
        self
    }
}

#[async_trait]
impl Step for BranchStep {
    fn spec(&self) -> &StepSpec {
        &self.spec
    }

    fn kind(&self) -> &str {
        "branch"
    }

    async fn execute(&self, ctx: &Context) -> Result<Value, StepError> {
        let taken = (self.predicate)(ctx);
        ctx.set(derived_key(&self.spec.id, "condition"), taken);

        let branch = if taken { &self.if_true } else { &self.if_false };
        let Some(step) = branch else {
            return Ok(Value::Bool(taken));
        };

        tracing::debug!(step_id = %self.spec.id, taken, branch = %step.id(), "Branch selected");
        let result = step.execute(ctx).await?;
        ctx.set(derived_key(&self.spec.id, "result"), result.clone());
        Ok(result)
    }

    fn validate_config(&self) -> Result<(), StepError> {
        for step in self.if_true.iter().chain(self.if_false.iter()) {
            step.validate_config()?;
        }
        Ok(())
    }
}
