#![allow(dead_code)]

use async_trait::async_trait;
use dagcore::{Context, Step, StepBuilder, StepError, StepSpec, Value};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::future::Future;
use std::sync::Arc;

/// Initialize tracing for tests
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};
    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")),
        )
        .with_test_writer()
        .try_init();
}

type RunFn = Arc<dyn Fn(Context) -> BoxFuture<'static, Result<Value, StepError>> + Send + Sync>;

/// Step backed by a closure; stores its result under its own id
pub struct TestStep {
    spec: StepSpec,
    run: RunFn,
}

impl StepBuilder for TestStep {
    fn spec_mut(&mut self) -> &mut StepSpec {
        &mut self.spec
    }
}

#[async_trait]
impl Step for TestStep {
    fn spec(&self) -> &StepSpec {
        &self.spec
    }

    fn kind(&self) -> &str {
        "test"
    }

    async fn execute(&self, ctx: &Context) -> Result<Value, StepError> {
        let result = (self.run)(ctx.clone()).await?;
        ctx.set(self.spec.id.as_str(), result.clone());
        Ok(result)
    }
}

pub fn step<F, Fut>(id: &str, run: F) -> TestStep
where
    F: Fn(Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, StepError>> + Send + 'static,
{
    TestStep {
        spec: StepSpec::new(id),
        run: Arc::new(move |ctx| run(ctx).boxed()),
    }
}

/// Step that returns a fixed value
pub fn constant(id: &str, value: impl Into<Value>) -> TestStep {
    let value = value.into();
    step(id, move |_| {
        let value = value.clone();
        async move { Ok(value) }
    })
}

/// Step that always fails with `message`
pub fn failing(id: &str, message: &str) -> TestStep {
    let message = message.to_string();
    step(id, move |_| {
        let message = message.clone();
        async move { Err(StepError::failed(message)) }
    })
}

/// Step that sleeps for `millis` and then returns `value`
pub fn sleepy(id: &str, millis: u64, value: impl Into<Value>) -> TestStep {
    let value = value.into();
    step(id, move |_| {
        let value = value.clone();
        async move {
            tokio::time::sleep(std::time::Duration::from_millis(millis)).await;
            Ok(value)
        }
    })
}

pub fn number(ctx: &Context, key: &str) -> f64 {
    ctx.get(key).and_then(|v| v.as_f64()).unwrap_or(f64::NAN)
}
