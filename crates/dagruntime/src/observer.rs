use dagcore::{EngineError, Step, StepError, StepResult, Workflow, WorkflowState};

/// Lifecycle hooks for a workflow run.
///
/// Every method has a no-op default. Hooks run synchronously on the engine's
/// coordinating routine, so implementations should return quickly; use the
/// event bus for anything slow.
pub trait WorkflowObserver: Send + Sync {
    fn on_workflow_start(&self, _workflow: &Workflow, _state: &WorkflowState) {}

    fn on_workflow_complete(&self, _workflow: &Workflow, _state: &WorkflowState) {}

    fn on_workflow_error(&self, _workflow: &Workflow, _state: &WorkflowState, _error: &EngineError) {}

    fn on_step_start(&self, _step: &dyn Step, _state: &WorkflowState) {}

    fn on_step_complete(&self, _step: &dyn Step, _result: &StepResult, _state: &WorkflowState) {}

    fn on_step_error(&self, _step: &dyn Step, _error: &StepError, _state: &WorkflowState) {}
}

/// Observer that mirrors lifecycle hooks into the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingObserver;

impl WorkflowObserver for LoggingObserver {
    fn on_workflow_start(&self, workflow: &Workflow, _state: &WorkflowState) {
        tracing::info!(workflow = %workflow.name, steps = workflow.len(), "workflow started");
    }

    fn on_workflow_complete(&self, workflow: &Workflow, state: &WorkflowState) {
        tracing::info!(
            workflow = %workflow.name,
            completed = state.completed_steps.len(),
            skipped = state.skipped_steps.len(),
            "workflow completed"
        );
    }

    fn on_workflow_error(&self, workflow: &Workflow, _state: &WorkflowState, error: &EngineError) {
        tracing::error!(workflow = %workflow.name, error = %error, "workflow failed");
    }

    fn on_step_complete(&self, step: &dyn Step, result: &StepResult, _state: &WorkflowState) {
        tracing::debug!(step_id = %step.id(), result = %result.result, "step finished");
    }

    fn on_step_error(&self, step: &dyn Step, error: &StepError, _state: &WorkflowState) {
        tracing::warn!(step_id = %step.id(), error = %error, "step errored");
    }
}
