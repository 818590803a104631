use crate::{Context, StepError, Value};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

pub type StepId = String;

/// Predicate over the context deciding whether a step runs.
pub type Condition = Arc<dyn Fn(&Context) -> bool + Send + Sync>;

/// Core trait that all executable steps implement
#[async_trait]
pub trait Step: Send + Sync {
    /// Declared configuration shared by every step kind
    fn spec(&self) -> &StepSpec;

    /// Type identifier (e.g. "tool", "branch", "fan_out")
    fn kind(&self) -> &str;

    /// Run the step against the shared context
    async fn execute(&self, ctx: &Context) -> Result<Value, StepError>;

    /// Optional: Validate configuration at workflow validation time
    fn validate_config(&self) -> Result<(), StepError> {
        Ok(())
    }

    fn id(&self) -> &str {
        &self.spec().id
    }

    fn dependencies(&self) -> &[StepId] {
        &self.spec().dependencies
    }

    fn should_execute(&self, ctx: &Context) -> bool {
        self.spec().should_execute(ctx)
    }
}

/// Configuration common to all steps.
#[derive(Clone)]
pub struct StepSpec {
    pub id: StepId,
    pub name: String,
    pub description: String,
    pub dependencies: Vec<StepId>,
    pub condition: Option<Condition>,
    pub retry_policy: Option<RetryPolicy>,
    pub skip_propagation: SkipPropagation,
}

impl StepSpec {
    pub fn new(id: impl Into<StepId>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            description: String::new(),
            dependencies: Vec::new(),
            condition: None,
            retry_policy: None,
            skip_propagation: SkipPropagation::default(),
        }
    }

    pub fn should_execute(&self, ctx: &Context) -> bool {
        match &self.condition {
            Some(condition) => condition(ctx),
            None => true,
        }
    }
}

impl fmt::Debug for StepSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepSpec")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("dependencies", &self.dependencies)
            .field("has_condition", &self.condition.is_some())
            .field("retry_policy", &self.retry_policy)
            .field("skip_propagation", &self.skip_propagation)
            .finish()
    }
}

/// Builder methods available on every step type.
pub trait StepBuilder: Sized {
    fn spec_mut(&mut self) -> &mut StepSpec;

    fn depends_on<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<StepId>,
    {
        let spec = self.spec_mut();
        for dep in deps {
            let dep = dep.into();
            if !spec.dependencies.contains(&dep) {
                spec.dependencies.push(dep);
            }
        }
        self
    }

    fn with_name(mut self, name: impl Into<String>) -> Self {
        self.spec_mut().name = name.into();
        self
    }

    fn with_description(mut self, description: impl Into<String>) -> Self {
        self.spec_mut().description = description.into();
        self
    }

    fn with_condition<F>(mut self, condition: F) -> Self
    where
        F: Fn(&Context) -> bool + Send + Sync + 'static,
    {
        self.spec_mut().condition = Some(Arc::new(condition));
        self
    }

    fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.spec_mut().retry_policy = Some(policy);
        self
    }

    fn with_skip_propagation(mut self, propagation: SkipPropagation) -> Self {
        self.spec_mut().skip_propagation = propagation;
        self
    }
}

impl StepBuilder for StepSpec {
    fn spec_mut(&mut self) -> &mut StepSpec {
        self
    }
}

/// Retry policy for step execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub backoff_multiplier: f64,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration, backoff_multiplier: f64) -> Self {
        Self {
            max_retries,
            base_delay,
            backoff_multiplier,
        }
    }

    /// Delay before the given retry (1-based): `base * multiplier^(retry - 1)`.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1) as i32;
        let factor = self.backoff_multiplier.max(0.0).powi(exponent);
        Duration::try_from_secs_f64(self.base_delay.as_secs_f64() * factor).unwrap_or(Duration::MAX)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            backoff_multiplier: 2.0,
        }
    }
}

/// How a skipped step affects the steps that depend on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SkipPropagation {
    /// The skip satisfies dependents, which then run normally
    #[default]
    Satisfy,
    /// Dependents are skipped as well, transitively
    Cascade,
}
