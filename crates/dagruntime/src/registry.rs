use async_trait::async_trait;
use dagcore::{Context, StepError, Value};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

/// External collaborator that turns a named operation plus arguments into a
/// result. Must be safe to call concurrently.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn invoke(&self, name: &str, inputs: HashMap<String, Value>) -> Result<Value, StepError>;
}

/// A single named tool
#[async_trait]
pub trait Tool: Send + Sync {
    /// Name the tool is registered under
    fn name(&self) -> &str;

    /// Optional: description, category and parameters
    fn metadata(&self) -> ToolMetadata {
        ToolMetadata::default()
    }

    async fn invoke(&self, inputs: HashMap<String, Value>) -> Result<Value, StepError>;
}

/// Metadata about a tool
#[derive(Debug, Clone)]
pub struct ToolMetadata {
    pub description: String,
    pub category: String,
    pub parameters: Vec<ParameterDefinition>,
}

impl Default for ToolMetadata {
    fn default() -> Self {
        Self {
            description: String::new(),
            category: "general".to_string(),
            parameters: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ParameterDefinition {
    pub name: String,
    pub description: String,
    pub required: bool,
}

impl ParameterDefinition {
    pub fn required(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            required: true,
        }
    }

    pub fn optional(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            required: false,
            ..Self::required(name, description)
        }
    }
}

type ToolFn = Arc<dyn Fn(HashMap<String, Value>) -> BoxFuture<'static, Result<Value, StepError>> + Send + Sync>;

/// Tool backed by a closure, created through [`ToolRegistry::register_fn`]
struct FnTool {
    name: String,
    metadata: ToolMetadata,
    func: ToolFn,
}

#[async_trait]
impl Tool for FnTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn metadata(&self) -> ToolMetadata {
        self.metadata.clone()
    }

    async fn invoke(&self, inputs: HashMap<String, Value>) -> Result<Value, StepError> {
        (self.func)(inputs).await
    }
}

/// Registry of available tools
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Register a tool, replacing any tool with the same name
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        tracing::info!("Registering tool: {}", name);
        self.tools.insert(name, tool);
    }

    /// Register an async closure as a tool
    pub fn register_fn<F, Fut>(&mut self, name: impl Into<String>, metadata: ToolMetadata, func: F)
    where
        F: Fn(HashMap<String, Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, StepError>> + Send + 'static,
    {
        let func: ToolFn = Arc::new(move |inputs| func(inputs).boxed());
        self.register(Arc::new(FnTool {
            name: name.into(),
            metadata,
            func,
        }));
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.get(name)
    }

    /// Names of all registered tools, sorted
    pub fn list_tools(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn get_metadata(&self, name: &str) -> Option<ToolMetadata> {
        self.tools.get(name).map(|t| t.metadata())
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ToolExecutor for ToolRegistry {
    async fn invoke(&self, name: &str, inputs: HashMap<String, Value>) -> Result<Value, StepError> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| StepError::ToolNotFound(name.to_string()))?;
        tracing::debug!(tool = name, inputs = inputs.len(), "Invoking tool");
        tool.invoke(inputs).await
    }
}

/// Async function from one value to another
pub type AsyncTransform =
    Arc<dyn Fn(Value) -> BoxFuture<'static, Result<Value, StepError>> + Send + Sync>;

/// Synchronous function from one value to another
pub type SyncTransform = Arc<dyn Fn(Value) -> Result<Value, StepError> + Send + Sync>;

/// Async function that runs against the live context
pub type ContextAction =
    Arc<dyn Fn(Context) -> BoxFuture<'static, Result<Value, StepError>> + Send + Sync>;

/// A registered transform, either plain or suspending
#[derive(Clone)]
pub enum StepFunction {
    Sync(SyncTransform),
    Async(AsyncTransform),
}

impl StepFunction {
    pub async fn call(&self, input: Value) -> Result<Value, StepError> {
        match self {
            StepFunction::Sync(f) => f(input),
            StepFunction::Async(f) => f(input).await,
        }
    }
}

/// Capability table of named functions that steps resolve when they are built.
///
/// Nothing here is evaluated from source text; a step can only call what the
/// host program registered.
#[derive(Clone, Default)]
pub struct FunctionRegistry {
    transforms: HashMap<String, StepFunction>,
    actions: HashMap<String, ContextAction>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_sync<F>(&mut self, name: impl Into<String>, func: F)
    where
        F: Fn(Value) -> Result<Value, StepError> + Send + Sync + 'static,
    {
        self.transforms
            .insert(name.into(), StepFunction::Sync(Arc::new(func)));
    }

    pub fn register_async<F, Fut>(&mut self, name: impl Into<String>, func: F)
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, StepError>> + Send + 'static,
    {
        let func: AsyncTransform = Arc::new(move |input| func(input).boxed());
        self.transforms
            .insert(name.into(), StepFunction::Async(func));
    }

    pub fn register_action<F, Fut>(&mut self, name: impl Into<String>, func: F)
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, StepError>> + Send + 'static,
    {
        let func: ContextAction = Arc::new(move |ctx| func(ctx).boxed());
        self.actions.insert(name.into(), func);
    }

    /// Look up a transform by name
    pub fn resolve(&self, name: &str) -> Result<StepFunction, StepError> {
        self.transforms
            .get(name)
            .cloned()
            .ok_or_else(|| StepError::FunctionNotFound(name.to_string()))
    }

    /// Look up a context action by name
    pub fn action(&self, name: &str) -> Result<ContextAction, StepError> {
        self.actions
            .get(name)
            .cloned()
            .ok_or_else(|| StepError::FunctionNotFound(name.to_string()))
    }

    pub fn list_functions(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .transforms
            .keys()
            .chain(self.actions.keys())
            .cloned()
            .collect();
        names.sort();
        names
    }
}
