use crate::{
    EngineConfig, FunctionRegistry, ToolExecutor, ToolRegistry, WorkflowEngine, WorkflowObserver,
};
use dagcore::{
    EngineError, ExecutionEvent, ExecutionPlan, Value, Workflow, WorkflowError, WorkflowId,
    WorkflowState,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tokio_util::sync::CancellationToken;

/// Main runtime for executing workflows
pub struct DagRuntime {
    tools: Arc<ToolRegistry>,
    functions: Arc<FunctionRegistry>,
    engine: Arc<WorkflowEngine>,
    workflows: Arc<RwLock<HashMap<WorkflowId, Workflow>>>,
}

impl DagRuntime {
    /// Create a new runtime with empty registries and default settings
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        Self::with_registries(ToolRegistry::new(), FunctionRegistry::new(), config)
    }

    /// Create a runtime around pre-populated registries
    pub fn with_registries(
        tools: ToolRegistry,
        functions: FunctionRegistry,
        config: EngineConfig,
    ) -> Self {
        Self::with_engine(tools, functions, WorkflowEngine::new(config))
    }

    /// Create a runtime around an engine that already has its observers
    pub fn with_engine(tools: ToolRegistry, functions: FunctionRegistry, engine: WorkflowEngine) -> Self {
        Self {
            tools: Arc::new(tools),
            functions: Arc::new(functions),
            engine: Arc::new(engine),
            workflows: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Build a runtime whose engine reports to `observers`
    pub fn with_observers(
        tools: ToolRegistry,
        functions: FunctionRegistry,
        config: EngineConfig,
        observers: impl IntoIterator<Item = Arc<dyn WorkflowObserver>>,
    ) -> Self {
        let mut engine = WorkflowEngine::new(config);
        for observer in observers {
            engine.add_observer(observer);
        }
        Self::with_engine(tools, functions, engine)
    }

    pub fn tools(&self) -> &Arc<ToolRegistry> {
        &self.tools
    }

    /// The tool registry as the executor handed to tool steps
    pub fn executor(&self) -> Arc<dyn ToolExecutor> {
        self.tools.clone()
    }

    pub fn functions(&self) -> &Arc<FunctionRegistry> {
        &self.functions
    }

    pub fn engine(&self) -> &Arc<WorkflowEngine> {
        &self.engine
    }

    /// Register a workflow, replacing any earlier one with the same id
    pub async fn register_workflow(&self, workflow: Workflow) -> WorkflowId {
        let id = workflow.id.clone();
        tracing::info!(workflow_id = %id, workflow = %workflow.name, "Registering workflow");
        let mut workflows = self.workflows.write().await;
        workflows.insert(id.clone(), workflow);
        id
    }

    pub async fn list_workflows(&self) -> Vec<WorkflowId> {
        let workflows = self.workflows.read().await;
        let mut ids: Vec<WorkflowId> = workflows.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn get_workflow(&self, workflow_id: &str) -> Result<Workflow, WorkflowError> {
        let workflows = self.workflows.read().await;
        workflows
            .get(workflow_id)
            .cloned()
            .ok_or_else(|| WorkflowError::NotFound(workflow_id.to_string()))
    }

    /// Execute a registered workflow by id
    pub async fn execute_workflow(
        &self,
        workflow_id: &str,
        inputs: HashMap<String, Value>,
    ) -> Result<WorkflowState, EngineError> {
        // Clone out of the lock so a long run does not block registration.
        let workflow = self.get_workflow(workflow_id).await?;
        self.engine.execute_workflow(&workflow, inputs).await
    }

    /// Execute a registered workflow, returning its terminal state
    pub async fn run_workflow(
        &self,
        workflow_id: &str,
        inputs: HashMap<String, Value>,
        cancel: CancellationToken,
    ) -> Result<WorkflowState, WorkflowError> {
        let workflow = self.get_workflow(workflow_id).await?;
        self.engine.run(&workflow, inputs, cancel).await
    }

    /// Execute a workflow directly (without registration)
    pub async fn execute(
        &self,
        workflow: &Workflow,
        inputs: HashMap<String, Value>,
    ) -> Result<WorkflowState, EngineError> {
        self.engine.execute_workflow(workflow, inputs).await
    }

    pub async fn create_execution_plan(&self, workflow_id: &str) -> Result<ExecutionPlan, WorkflowError> {
        let workflow = self.get_workflow(workflow_id).await?;
        self.engine.create_execution_plan(&workflow)
    }

    /// Subscribe to execution events
    pub fn subscribe_events(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.engine.subscribe_events()
    }
}

impl Default for DagRuntime {
    fn default() -> Self {
        Self::new()
    }
}
