use crate::{derived_key, outcome_entry};
use async_trait::async_trait;
use dagcore::{Context, Step, StepError, StepId, StepSpec, Value};
use std::sync::Arc;

/// Predicate over the context and the index about to run; true stops the loop.
pub type BreakCondition = Arc<dyn Fn(&Context, usize) -> bool + Send + Sync>;

/// Runs a sub-step once per element of a context-held array.
///
/// Before each run the element and its index are stored under
/// `{id}_current_item` and `{id}_iteration`. A failing iteration is recorded
/// and the loop moves on. The list of `{index, success, result | error}`
/// entries is returned and stored under `{id}_results`.
pub struct IterateStep {
    pub(crate) spec: StepSpec,
    body: Arc<dyn Step>,
    items_key: String,
    max_iterations: Option<usize>,
    break_when: Option<BreakCondition>,
}

impl IterateStep {
    pub fn new(id: impl Into<StepId>, items_key: impl Into<String>, body: impl Step + 'static) -> Self {
        Self {
            spec: StepSpec::new(id),
            body: Arc::new(body),
            items_key: items_key.into(),
            max_iterations: None,
            break_when: None,
        }
    }

    pub fn with_max_iterations(mut self, max: usize) -> Self {
        self.max_iterations = Some(max);
        self
    }

    pub fn with_break_condition<F>(mut self, condition: F) -> Self
    where
        F: Fn(&Context, usize) -> bool + Send + Sync + 'static,
    {
        self.break_when = Some(Arc::new(condition));
        self
    }

    /// Context key the current element is stored under
    pub fn item_key(&self) -> String {
        derived_key(&self.spec.id, "current_item")
    }

    pub fn index_key(&self) -> String {
        derived_key(&self.spec.id, "iteration")
    }

    fn items(&self, ctx: &Context) -> Result<Vec<Value>, StepError> {
        match ctx.get(&self.items_key) {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(Value::Array(items)) => Ok(items),
            Some(other) => Err(StepError::InvalidInputType {
                field: self.items_key.clone(),
                expected: "array".to_string(),
                actual: other.type_name().to_string(),
            }),
        }
    }
}

#[async_trait]
impl Step for IterateStep {
    fn spec(&self) -> &StepSpec {
        &self.spec
    }

    fn kind(&self) -> &str {
        "iterate"
    }

    async fn execute(&self, ctx: &Context) -> Result<Value, StepError> {
        let items = self.items(ctx)?;
        let item_key = self.item_key();
        let index_key = self.index_key();
        let mut results = Vec::with_capacity(items.len());

        for (index, item) in items.into_iter().enumerate() {
            if self.max_iterations.is_some_and(|max| index >= max) {
                break;
            }
            if let Some(stop) = &self.break_when {
                if stop(ctx, index) {
                    tracing::debug!(step_id = %self.spec.id, index, "Loop break condition met");
                    break;
                }
            }

            ctx.set(item_key.as_str(), item);
            ctx.set(index_key.as_str(), index);

            let outcome = self.body.execute(ctx).await;
            if let Err(e) = &outcome {
                tracing::warn!(step_id = %self.spec.id, index, error = %e, "Iteration failed");
            }
            let mut entry = outcome_entry(outcome);
            entry.insert("index".to_string(), Value::from(index));
            results.push(Value::Object(entry));
        }

        let results = Value::Array(results);
        ctx.set(derived_key(&self.spec.id, "results"), results.clone());
        Ok(results)
    }

    fn validate_config(&self) -> Result<(), StepError> {
        if self.items_key.is_empty() {
            return Err(StepError::Configuration("items key is empty".to_string()));
        }
        self.body.validate_config()
    }
}
