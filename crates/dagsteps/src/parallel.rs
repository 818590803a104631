use crate::{derived_key, outcome_entry};
use async_trait::async_trait;
use dagcore::{Context, Step, StepError, StepId, StepSpec, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinSet;

/// How a fan-out step joins its sub-steps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JoinPolicy {
    /// Await every sub-step; failures are recorded, never propagated
    #[default]
    WaitForAll,
    /// The first sub-step to finish wins and the rest are aborted
    Race,
}

/// Runs a set of sub-steps concurrently against the same context.
///
/// The result is a map from sub-step id to `{success, result}` or
/// `{success, error}`, also stored under `{id}_results`.
pub struct FanOutStep {
    pub(crate) spec: StepSpec,
    branches: Vec<Arc<dyn Step>>,
    policy: JoinPolicy,
}

impl FanOutStep {
    pub fn new(id: impl Into<StepId>) -> Self {
        Self {
            spec: StepSpec::new(id),
            branches: Vec::new(),
            policy: JoinPolicy::default(),
        }
    }

    pub fn with_branch(mut self, step: impl Step + 'static) -> Self {
        self.branches.push(Arc::new(step));
        self
    }

    pub fn with_shared_branch(mut self, step: Arc<dyn Step>) -> Self {
        self.branches.push(step);
        self
    }

    pub fn with_policy(mut self, policy: JoinPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> JoinPolicy {
        self.policy
    }
}

#[async_trait]
impl Step for FanOutStep {
    fn spec(&self) -> &StepSpec {
        &self.spec
    }

    fn kind(&self) -> &str {
        "fan_out"
    }

    async fn execute(&self, ctx: &Context) -> Result<Value, StepError> {
        let mut set = JoinSet::new();
        for step in &self.branches {
            let step = step.clone();
            let ctx = ctx.clone();
            set.spawn(async move {
                let outcome = step.execute(&ctx).await;
                (step.id().to_string(), outcome)
            });
        }

        tracing::debug!(
            step_id = %self.spec.id,
            branches = self.branches.len(),
            policy = ?self.policy,
            "Fanning out"
        );

        let mut results: HashMap<String, Value> = HashMap::new();
        while let Some(joined) = set.join_next().await {
            let (id, outcome) = match joined {
                Ok(done) => done,
                Err(e) if e.is_cancelled() => continue,
                Err(e) => {
                    tracing::warn!(step_id = %self.spec.id, error = %e, "Sub-step task panicked");
                    continue;
                }
            };
            results.insert(id, Value::Object(outcome_entry(outcome)));

            if self.policy == JoinPolicy::Race {
                set.abort_all();
                break;
            }
        }

        if self.policy == JoinPolicy::WaitForAll {
            for step in &self.branches {
                results.entry(step.id().to_string()).or_insert_with(|| {
                    Value::Object(outcome_entry(Err(StepError::failed(
                        "sub-step task panicked",
                    ))))
                });
            }
        }

        let results = Value::Object(results);
        ctx.set(derived_key(&self.spec.id, "results"), results.clone());
        Ok(results)
    }

    fn validate_config(&self) -> Result<(), StepError> {
        if self.branches.is_empty() {
            return Err(StepError::Configuration(
                "fan-out step has no sub-steps".to_string(),
            ));
        }
        for step in &self.branches {
            step.validate_config()?;
        }
        Ok(())
    }
}
