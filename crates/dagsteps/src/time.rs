use async_trait::async_trait;
use dagcore::{Context, Step, StepError, StepId, StepSpec, Value};
use tokio::time::{sleep, Duration};

/// Delay execution for a fixed duration
pub struct DelayStep {
    pub(crate) spec: StepSpec,
    delay: Duration,
}

impl DelayStep {
    pub fn new(id: impl Into<StepId>, delay: Duration) -> Self {
        Self {
            spec: StepSpec::new(id),
            delay,
        }
    }

    pub fn from_millis(id: impl Into<StepId>, millis: u64) -> Self {
        Self::new(id, Duration::from_millis(millis))
    }
}

#[async_trait]
impl Step for DelayStep {
    fn spec(&self) -> &StepSpec {
        &self.spec
    }

    fn kind(&self) -> &str {
        "delay"
    }

    async fn execute(&self, _ctx: &Context) -> Result<Value, StepError> {
        let delay_ms = self.delay.as_millis();
        tracing::debug!(step_id = %self.spec.id, delay_ms = delay_ms as u64, "Delaying");

        sleep(self.delay).await;

        Ok(Value::String(format!("Delayed for {}ms", delay_ms)))
    }
}
