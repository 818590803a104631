use crate::{Context, StepId, Value, WorkflowId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::time::Duration;

/// Metadata key carrying how many retries produced a step result.
pub const RETRY_COUNT_KEY: &str = "retry_count";
/// Metadata key carrying the error of the attempt before the last one.
pub const PREVIOUS_ERROR_KEY: &str = "previous_error";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
    Paused,
}

impl WorkflowStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            WorkflowStatus::Completed | WorkflowStatus::Failed | WorkflowStatus::Cancelled
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
    Cancelled,
}

/// Outcome of running one step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    pub step_id: StepId,
    pub status: StepStatus,
    pub result: Value,
    pub error: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub metadata: HashMap<String, Value>,
}

impl StepResult {
    /// A result for a step that has just started running.
    pub fn started(step_id: impl Into<StepId>) -> Self {
        Self {
            step_id: step_id.into(),
            status: StepStatus::Running,
            result: Value::Null,
            error: None,
            start_time: Some(Utc::now()),
            end_time: None,
            metadata: HashMap::new(),
        }
    }

    pub fn skipped(step_id: impl Into<StepId>, reason: impl Into<String>) -> Self {
        let now = Utc::now();
        let mut result = Self {
            step_id: step_id.into(),
            status: StepStatus::Skipped,
            result: Value::Null,
            error: None,
            start_time: Some(now),
            end_time: Some(now),
            metadata: HashMap::new(),
        };
        result
            .metadata
            .insert("skip_reason".to_string(), Value::String(reason.into()));
        result
    }

    pub fn complete(mut self, value: Value) -> Self {
        self.status = StepStatus::Completed;
        self.result = value;
        self.error = None;
        self.end_time = Some(Utc::now());
        self
    }

    pub fn fail(mut self, error: impl Into<String>) -> Self {
        self.status = StepStatus::Failed;
        self.error = Some(error.into());
        self.end_time = Some(Utc::now());
        self
    }

    pub fn cancel(mut self) -> Self {
        self.status = StepStatus::Cancelled;
        self.error = Some("Cancelled".to_string());
        self.end_time = Some(Utc::now());
        self
    }

    pub fn duration(&self) -> Option<Duration> {
        match (self.start_time, self.end_time) {
            (Some(start), Some(end)) => (end - start).to_std().ok(),
            _ => None,
        }
    }

    pub fn success(&self) -> bool {
        self.status == StepStatus::Completed
    }

    pub fn retry_count(&self) -> u32 {
        self.metadata
            .get(RETRY_COUNT_KEY)
            .and_then(Value::as_f64)
            .map(|n| n as u32)
            .unwrap_or(0)
    }
}

/// Mutable run record of one workflow execution
///
/// Mutated only by the engine's coordinating routine. Once `status` is
/// terminal the record is no longer touched.
#[derive(Debug, Clone)]
pub struct WorkflowState {
    pub workflow_id: WorkflowId,
    pub status: WorkflowStatus,
    pub completed_steps: HashSet<StepId>,
    pub failed_steps: HashSet<StepId>,
    pub skipped_steps: HashSet<StepId>,
    pub step_results: HashMap<StepId, StepResult>,
    pub context: Context,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl WorkflowState {
    pub fn new(workflow_id: impl Into<WorkflowId>) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            status: WorkflowStatus::Pending,
            completed_steps: HashSet::new(),
            failed_steps: HashSet::new(),
            skipped_steps: HashSet::new(),
            step_results: HashMap::new(),
            context: Context::new(),
            start_time: None,
            end_time: None,
            error: None,
        }
    }

    pub fn duration(&self) -> Option<Duration> {
        match (self.start_time, self.end_time) {
            (Some(start), Some(end)) => (end - start).to_std().ok(),
            _ => None,
        }
    }

    pub fn success(&self) -> bool {
        self.status == WorkflowStatus::Completed
    }

    pub fn step_result(&self, step_id: &str) -> Option<&StepResult> {
        self.step_results.get(step_id)
    }

    pub fn is_step_completed(&self, step_id: &str) -> bool {
        self.completed_steps.contains(step_id)
    }

    pub fn is_step_failed(&self, step_id: &str) -> bool {
        self.failed_steps.contains(step_id)
    }

    pub fn is_step_skipped(&self, step_id: &str) -> bool {
        self.skipped_steps.contains(step_id)
    }

    /// Completed or skipped: the step no longer blocks anything.
    pub fn is_step_settled(&self, step_id: &str) -> bool {
        self.is_step_completed(step_id) || self.is_step_skipped(step_id)
    }

    /// Record a successful step, clearing any earlier failure for it.
    pub fn record_completed(&mut self, result: StepResult) {
        self.failed_steps.remove(&result.step_id);
        self.completed_steps.insert(result.step_id.clone());
        self.step_results.insert(result.step_id.clone(), result);
    }

    pub fn record_failed(&mut self, result: StepResult) {
        self.completed_steps.remove(&result.step_id);
        self.failed_steps.insert(result.step_id.clone());
        self.step_results.insert(result.step_id.clone(), result);
    }

    pub fn record_skipped(&mut self, result: StepResult) {
        self.skipped_steps.insert(result.step_id.clone());
        self.step_results.insert(result.step_id.clone(), result);
    }

    pub fn record_cancelled(&mut self, result: StepResult) {
        self.step_results.insert(result.step_id.clone(), result);
    }
}
