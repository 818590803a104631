use crate::observer::WorkflowObserver;
use chrono::Utc;
use dagcore::{
    Context, EngineError, EventBus, EventEmitter, ExecutionEvent, ExecutionId, ExecutionPlan,
    SkipPropagation, Step, StepError, StepGraph, StepId, StepResult, Value, Workflow,
    WorkflowError, WorkflowState, WorkflowStatus, PREVIOUS_ERROR_KEY, RETRY_COUNT_KEY,
};
use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use std::collections::{HashMap, HashSet, VecDeque};
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::{AbortHandle, JoinError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// Configuration for the engine
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Upper bound on concurrently running steps; values below 1 act as 1
    pub max_parallel_steps: usize,
    /// Deadline applied to every step attempt
    pub step_timeout: Option<Duration>,
    pub enable_retries: bool,
    pub event_buffer_size: usize,
}

impl EngineConfig {
    pub fn with_max_parallel_steps(mut self, max: usize) -> Self {
        self.max_parallel_steps = max;
        self
    }

    pub fn with_step_timeout(mut self, timeout: Duration) -> Self {
        self.step_timeout = Some(timeout);
        self
    }

    pub fn with_retries(mut self, enabled: bool) -> Self {
        self.enable_retries = enabled;
        self
    }

    fn parallel_limit(&self) -> usize {
        self.max_parallel_steps.max(1)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_parallel_steps: 5,
            step_timeout: None,
            enable_retries: true,
            event_buffer_size: 1000,
        }
    }
}

/// Executes workflows as DAGs with bounded parallelism
pub struct WorkflowEngine {
    config: EngineConfig,
    event_bus: Arc<EventBus>,
    observers: Vec<Arc<dyn WorkflowObserver>>,
}

impl WorkflowEngine {
    pub fn new(config: EngineConfig) -> Self {
        let event_bus = Arc::new(EventBus::new(config.event_buffer_size));
        Self::with_event_bus(config, event_bus)
    }

    pub fn with_event_bus(config: EngineConfig, event_bus: Arc<EventBus>) -> Self {
        Self {
            config,
            event_bus,
            observers: Vec::new(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Register a lifecycle observer; observers are called in registration order
    pub fn add_observer(&mut self, observer: Arc<dyn WorkflowObserver>) {
        self.observers.push(observer);
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.event_bus.subscribe()
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }

    pub fn create_execution_plan(&self, workflow: &Workflow) -> Result<ExecutionPlan, WorkflowError> {
        workflow.execution_plan()
    }

    /// Execute a workflow to completion.
    ///
    /// Returns the completed state, or the error that stopped the run. After
    /// a step fails no new steps start, but steps already running are awaited
    /// before the failure is returned, so a long-running sibling delays it
    /// unless `step_timeout` bounds it. Dropping the returned future aborts
    /// every running step task.
    pub async fn execute_workflow(
        &self,
        workflow: &Workflow,
        initial_context: HashMap<String, Value>,
    ) -> Result<WorkflowState, EngineError> {
        self.execute_with_cancel(workflow, initial_context, CancellationToken::new())
            .await
    }

    /// Like [`execute_workflow`](Self::execute_workflow), stopping early when
    /// `cancel` fires.
    pub async fn execute_with_cancel(
        &self,
        workflow: &Workflow,
        initial_context: HashMap<String, Value>,
        cancel: CancellationToken,
    ) -> Result<WorkflowState, EngineError> {
        let (state, failure) = self.drive(workflow, initial_context, cancel).await?;
        match failure {
            Some(e) => Err(e),
            None => Ok(state),
        }
    }

    /// Execute a workflow and hand back its terminal state whatever the
    /// outcome. Only validation problems are returned as errors.
    pub async fn run(
        &self,
        workflow: &Workflow,
        initial_context: HashMap<String, Value>,
        cancel: CancellationToken,
    ) -> Result<WorkflowState, WorkflowError> {
        let (state, _) = self.drive(workflow, initial_context, cancel).await?;
        Ok(state)
    }

    #[instrument(
        name = "workflow_run",
        skip_all,
        fields(workflow_id = %workflow.id, workflow = %workflow.name)
    )]
    async fn drive(
        &self,
        workflow: &Workflow,
        initial_context: HashMap<String, Value>,
        cancel: CancellationToken,
    ) -> Result<(WorkflowState, Option<EngineError>), WorkflowError> {
        let problems = workflow.validate();
        if !problems.is_empty() {
            error!(problems = ?problems, "Workflow validation failed");
            return Err(WorkflowError::Validation(problems));
        }

        let execution_id = Uuid::new_v4();
        let mut state = workflow.create_state();
        state.status = WorkflowStatus::Running;
        state.start_time = Some(Utc::now());
        state.context.update(initial_context);
        state
            .context
            .set_metadata("workflow_id", workflow.id.clone());
        state
            .context
            .set_metadata("execution_id", execution_id.to_string());

        info!(%execution_id, steps = workflow.len(), "Starting workflow execution");
        self.event_bus.emit(ExecutionEvent::WorkflowStarted {
            execution_id,
            workflow_id: workflow.id.clone(),
            timestamp: Utc::now(),
        });
        for observer in &self.observers {
            observer.on_workflow_start(workflow, &state);
        }

        let mut run = Run {
            engine: self,
            workflow,
            graph: workflow.dependency_graph(),
            state,
            execution_id,
            cancel,
            ready: VecDeque::new(),
            queued: HashSet::new(),
            running: FuturesUnordered::new(),
            handles: TaskHandles::default(),
            cascading: HashSet::new(),
            failure: None,
        };
        run.execute().await;

        Ok((run.state, run.failure))
    }

    fn notify_step_error(&self, step: &dyn Step, error: &StepError, state: &WorkflowState) {
        for observer in &self.observers {
            observer.on_step_error(step, error, state);
        }
    }
}

/// Output of one step task, sent back to the coordinating routine
struct StepRun {
    result: StepResult,
    outcome: Result<Value, StepError>,
}

type RunningStep = BoxFuture<'static, (StepId, Result<StepRun, JoinError>)>;

/// Abort handles of the running step tasks, keyed by step id. Whatever is
/// still here when the run is dropped gets aborted.
#[derive(Default)]
struct TaskHandles(HashMap<StepId, AbortHandle>);

impl Deref for TaskHandles {
    type Target = HashMap<StepId, AbortHandle>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for TaskHandles {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl Drop for TaskHandles {
    fn drop(&mut self) {
        if self.0.is_empty() {
            return;
        }
        warn!(running = self.0.len(), "Run dropped; aborting step tasks");
        for handle in self.0.values() {
            handle.abort();
        }
    }
}

enum Wake {
    Cancelled,
    Finished(StepId, Result<StepRun, JoinError>),
}

/// Bookkeeping for a single execution. Owned by the coordinating routine;
/// step tasks only report back through their join handles.
struct Run<'a> {
    engine: &'a WorkflowEngine,
    workflow: &'a Workflow,
    graph: StepGraph,
    state: WorkflowState,
    execution_id: ExecutionId,
    cancel: CancellationToken,
    ready: VecDeque<StepId>,
    queued: HashSet<StepId>,
    running: FuturesUnordered<RunningStep>,
    handles: TaskHandles,
    /// Skipped steps whose skip blocks their dependents
    cascading: HashSet<StepId>,
    failure: Option<EngineError>,
}

impl<'a> Run<'a> {
    async fn execute(&mut self) {
        let workflow = self.workflow;
        for step in workflow.steps() {
            if step.dependencies().is_empty() {
                self.enqueue(step.id().to_string());
            }
        }

        let limit = self.engine.config.parallel_limit();

        loop {
            if self.cancel.is_cancelled() {
                self.cancel_running();
                return;
            }

            while self.failure.is_none() && self.handles.len() < limit {
                let Some(step_id) = self.ready.pop_front() else {
                    break;
                };
                self.queued.remove(&step_id);
                self.dispatch(step_id);
            }

            if self.running.is_empty() {
                break;
            }

            let wake = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => Wake::Cancelled,
                Some((step_id, joined)) = self.running.next() => Wake::Finished(step_id, joined),
            };

            match wake {
                Wake::Cancelled => {
                    self.cancel_running();
                    return;
                }
                Wake::Finished(step_id, joined) => {
                    self.handles.remove(&step_id);
                    self.finish(step_id, joined);
                }
            }
        }

        self.conclude();
    }

    fn enqueue(&mut self, step_id: StepId) {
        if self.queued.insert(step_id.clone()) {
            debug!(step_id = %step_id, "Step ready");
            self.ready.push_back(step_id);
        }
    }

    fn dispatch(&mut self, step_id: StepId) {
        let Some(step) = self.workflow.get_step(&step_id).cloned() else {
            return;
        };

        if !step.should_execute(&self.state.context) {
            let cascade = step.spec().skip_propagation == SkipPropagation::Cascade;
            self.skip(&step_id, "condition not met", cascade);
            return;
        }

        let ctx = self.state.context.clone();
        let emitter = self
            .engine
            .event_bus
            .create_emitter(self.execution_id, step_id.clone());
        let timeout = self.engine.config.step_timeout;
        let enable_retries = self.engine.config.enable_retries;

        let handle = tokio::spawn(execute_step_with_timeout(
            step.clone(),
            ctx,
            timeout,
            enable_retries,
            emitter,
        ));
        self.handles.insert(step_id.clone(), handle.abort_handle());
        let id = step_id.clone();
        self.running.push(async move { (id, handle.await) }.boxed());

        self.state
            .step_results
            .insert(step_id.clone(), StepResult::started(step_id.clone()));

        info!(step_id = %step_id, kind = step.kind(), "Starting step");
        self.engine.event_bus.emit(ExecutionEvent::StepStarted {
            execution_id: self.execution_id,
            step_id,
            step_kind: step.kind().to_string(),
            timestamp: Utc::now(),
        });
        for observer in &self.engine.observers {
            observer.on_step_start(step.as_ref(), &self.state);
        }
    }

    fn finish(&mut self, step_id: StepId, joined: Result<StepRun, JoinError>) {
        let Some(step) = self.workflow.get_step(&step_id).cloned() else {
            return;
        };

        let run = match joined {
            Ok(run) => run,
            Err(e) if e.is_cancelled() => {
                let record = self.running_record(&step_id).cancel();
                self.state.record_cancelled(record);
                return;
            }
            Err(e) => {
                let err = StepError::failed(format!("step task panicked: {}", e));
                StepRun {
                    result: self.running_record(&step_id).fail(err.to_string()),
                    outcome: Err(err),
                }
            }
        };

        match run.outcome {
            Ok(value) => {
                let duration_ms = run
                    .result
                    .duration()
                    .map(|d| d.as_millis() as u64)
                    .unwrap_or(0);
                info!(step_id = %step_id, duration_ms, "Step completed");
                self.state.record_completed(run.result);

                self.engine.event_bus.emit(ExecutionEvent::StepCompleted {
                    execution_id: self.execution_id,
                    step_id: step_id.clone(),
                    result: value,
                    duration_ms,
                    timestamp: Utc::now(),
                });
                if let Some(result) = self.state.step_results.get(&step_id) {
                    for observer in &self.engine.observers {
                        observer.on_step_complete(step.as_ref(), result, &self.state);
                    }
                }

                self.release_dependents(&step_id);
            }
            Err(err) => {
                error!(step_id = %step_id, error = %err, "Step failed");
                self.state.record_failed(run.result);

                self.engine.event_bus.emit(ExecutionEvent::StepFailed {
                    execution_id: self.execution_id,
                    step_id: step_id.clone(),
                    error: err.to_string(),
                    timestamp: Utc::now(),
                });
                self.engine
                    .notify_step_error(step.as_ref(), &err, &self.state);

                if self.failure.is_none() {
                    if !self.ready.is_empty() || !self.running.is_empty() {
                        warn!(
                            step_id = %step_id,
                            running = self.running.len(),
                            "Halting dispatch after step failure"
                        );
                    }
                    self.failure = Some(EngineError::StepFailed {
                        step_id,
                        source: err,
                    });
                }
            }
        }
    }

    fn running_record(&self, step_id: &str) -> StepResult {
        self.state
            .step_results
            .get(step_id)
            .cloned()
            .unwrap_or_else(|| StepResult::started(step_id))
    }

    fn skip(&mut self, step_id: &str, reason: &str, cascade: bool) {
        info!(step_id = %step_id, reason, "Skipping step");
        self.state
            .record_skipped(StepResult::skipped(step_id, reason));
        if cascade {
            self.cascading.insert(step_id.to_string());
        }

        self.engine.event_bus.emit(ExecutionEvent::StepSkipped {
            execution_id: self.execution_id,
            step_id: step_id.to_string(),
            reason: reason.to_string(),
            timestamp: Utc::now(),
        });

        self.release_dependents(step_id);
    }

    /// Re-examine the dependents of a step that just completed or was skipped.
    fn release_dependents(&mut self, step_id: &str) {
        let blocking = self.cascading.contains(step_id);

        for dependent in self.graph.dependents(step_id) {
            if self.is_settled_or_pending(&dependent) {
                continue;
            }

            if blocking {
                let reason = format!("dependency '{}' was skipped", step_id);
                self.skip(&dependent, &reason, true);
                continue;
            }

            let satisfied = self
                .graph
                .dependencies(&dependent)
                .iter()
                .all(|dep| self.is_satisfied(dep));
            if satisfied {
                self.enqueue(dependent);
            }
        }
    }

    fn is_satisfied(&self, step_id: &str) -> bool {
        self.state.is_step_completed(step_id)
            || (self.state.is_step_skipped(step_id) && !self.cascading.contains(step_id))
    }

    fn is_settled_or_pending(&self, step_id: &str) -> bool {
        self.state.is_step_completed(step_id)
            || self.state.is_step_failed(step_id)
            || self.state.is_step_skipped(step_id)
            || self.queued.contains(step_id)
            || self.handles.contains_key(step_id)
    }

    fn cancel_running(&mut self) {
        warn!(running = self.handles.len(), "Workflow execution cancelled");

        let handles: Vec<(StepId, AbortHandle)> = self.handles.drain().collect();
        for (step_id, handle) in handles {
            handle.abort();
            let record = self.running_record(&step_id).cancel();
            self.state.record_cancelled(record);
        }
        self.running = FuturesUnordered::new();
        self.ready.clear();
        self.queued.clear();

        self.state.status = WorkflowStatus::Cancelled;
        self.state.error = Some(EngineError::Cancelled.to_string());
        self.state.end_time = Some(Utc::now());

        self.engine.event_bus.emit(ExecutionEvent::WorkflowCancelled {
            execution_id: self.execution_id,
            workflow_id: self.workflow.id.clone(),
            timestamp: Utc::now(),
        });
        let err = EngineError::Cancelled;
        for observer in &self.engine.observers {
            observer.on_workflow_error(self.workflow, &self.state, &err);
        }
        self.failure = Some(err);
    }

    /// Check that every step settled and move the state to its terminal status.
    fn conclude(&mut self) {
        if self.failure.is_none() {
            let workflow = self.workflow;
            let unsettled = workflow
                .steps()
                .map(|step| step.id())
                .find(|id| !self.state.is_step_settled(id));
            if let Some(step_id) = unsettled {
                self.failure = Some(EngineError::StepIncomplete {
                    step_id: step_id.to_string(),
                });
            }
        }

        self.state.end_time = Some(Utc::now());
        let duration_ms = self
            .state
            .duration()
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);

        match &self.failure {
            None => {
                self.state.status = WorkflowStatus::Completed;
                info!(
                    completed = self.state.completed_steps.len(),
                    skipped = self.state.skipped_steps.len(),
                    duration_ms,
                    "Workflow completed"
                );
                self.engine.event_bus.emit(ExecutionEvent::WorkflowCompleted {
                    execution_id: self.execution_id,
                    workflow_id: self.workflow.id.clone(),
                    duration_ms,
                    timestamp: Utc::now(),
                });
                for observer in &self.engine.observers {
                    observer.on_workflow_complete(self.workflow, &self.state);
                }
            }
            Some(err) => {
                self.state.status = WorkflowStatus::Failed;
                self.state.error = Some(err.to_string());
                error!(error = %err, duration_ms, "Workflow failed");
                self.engine.event_bus.emit(ExecutionEvent::WorkflowFailed {
                    execution_id: self.execution_id,
                    workflow_id: self.workflow.id.clone(),
                    step_id: err.step_id().map(str::to_string),
                    error: err.to_string(),
                    timestamp: Utc::now(),
                });
                for observer in &self.engine.observers {
                    observer.on_workflow_error(self.workflow, &self.state, err);
                }
            }
        }
    }
}

/// Run one step with the configured deadline and the step's retry policy.
///
/// Timeouts are final. Any other failure is retried while the policy allows,
/// sleeping `base * multiplier^(retry - 1)` before each retry; the record of
/// every new attempt carries the retry count and the previous error.
async fn execute_step_with_timeout(
    step: Arc<dyn Step>,
    ctx: Context,
    timeout: Option<Duration>,
    enable_retries: bool,
    emitter: EventEmitter,
) -> StepRun {
    let policy = if enable_retries {
        step.spec().retry_policy.clone()
    } else {
        None
    };
    let mut retries = 0u32;
    let mut previous_error: Option<String> = None;

    loop {
        let mut record = StepResult::started(step.id());
        if retries > 0 {
            record
                .metadata
                .insert(RETRY_COUNT_KEY.to_string(), Value::from(retries as i64));
        }
        if let Some(prev) = &previous_error {
            record
                .metadata
                .insert(PREVIOUS_ERROR_KEY.to_string(), Value::from(prev.as_str()));
        }

        let outcome = match timeout {
            Some(limit) => match tokio::time::timeout(limit, step.execute(&ctx)).await {
                Ok(outcome) => outcome,
                Err(_) => Err(StepError::Timeout {
                    millis: limit.as_millis() as u64,
                }),
            },
            None => step.execute(&ctx).await,
        };

        let err = match outcome {
            Ok(value) => {
                return StepRun {
                    result: record.complete(value.clone()),
                    outcome: Ok(value),
                }
            }
            Err(err) => err,
        };

        if err.is_timeout() {
            warn!(step_id = %step.id(), error = %err, "Step exceeded its deadline");
            return StepRun {
                result: record.fail(err.to_string()),
                outcome: Err(err),
            };
        }

        match &policy {
            Some(policy) if retries < policy.max_retries => {
                retries += 1;
                let delay = policy.delay_for(retries);
                warn!(
                    step_id = %step.id(),
                    retry = retries,
                    max_retries = policy.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Retrying step"
                );
                emitter.retrying(retries, delay, err.to_string());
                previous_error = Some(err.to_string());
                tokio::time::sleep(delay).await;
            }
            _ => {
                let err = if retries > 0 {
                    StepError::RetryExhausted {
                        retries,
                        last: Box::new(err),
                    }
                } else {
                    err
                };
                return StepRun {
                    result: record.fail(err.to_string()),
                    outcome: Err(err),
                };
            }
        }
    }
}
