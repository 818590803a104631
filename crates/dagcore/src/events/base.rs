use crate::{StepId, Value, WorkflowId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::broadcast;
use uuid::Uuid;

pub type ExecutionId = Uuid;

/// Events emitted during workflow execution
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ExecutionEvent {
    WorkflowStarted {
        execution_id: ExecutionId,
        workflow_id: WorkflowId,
        timestamp: DateTime<Utc>,
    },
    WorkflowCompleted {
        execution_id: ExecutionId,
        workflow_id: WorkflowId,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
    WorkflowFailed {
        execution_id: ExecutionId,
        workflow_id: WorkflowId,
        step_id: Option<StepId>,
        error: String,
        timestamp: DateTime<Utc>,
    },
    WorkflowCancelled {
        execution_id: ExecutionId,
        workflow_id: WorkflowId,
        timestamp: DateTime<Utc>,
    },
    StepStarted {
        execution_id: ExecutionId,
        step_id: StepId,
        step_kind: String,
        timestamp: DateTime<Utc>,
    },
    StepCompleted {
        execution_id: ExecutionId,
        step_id: StepId,
        result: Value,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
    StepFailed {
        execution_id: ExecutionId,
        step_id: StepId,
        error: String,
        timestamp: DateTime<Utc>,
    },
    StepSkipped {
        execution_id: ExecutionId,
        step_id: StepId,
        reason: String,
        timestamp: DateTime<Utc>,
    },
    StepRetrying {
        execution_id: ExecutionId,
        step_id: StepId,
        retry: u32,
        delay_ms: u64,
        error: String,
        timestamp: DateTime<Utc>,
    },
}

impl ExecutionEvent {
    pub fn execution_id(&self) -> ExecutionId {
        match self {
            ExecutionEvent::WorkflowStarted { execution_id, .. }
            | ExecutionEvent::WorkflowCompleted { execution_id, .. }
            | ExecutionEvent::WorkflowFailed { execution_id, .. }
            | ExecutionEvent::WorkflowCancelled { execution_id, .. }
            | ExecutionEvent::StepStarted { execution_id, .. }
            | ExecutionEvent::StepCompleted { execution_id, .. }
            | ExecutionEvent::StepFailed { execution_id, .. }
            | ExecutionEvent::StepSkipped { execution_id, .. }
            | ExecutionEvent::StepRetrying { execution_id, .. } => *execution_id,
        }
    }
}

/// Event emitter handed to a running step task
#[derive(Clone)]
pub struct EventEmitter {
    execution_id: ExecutionId,
    step_id: StepId,
    sender: broadcast::Sender<ExecutionEvent>,
}

impl EventEmitter {
    pub fn new(
        execution_id: ExecutionId,
        step_id: StepId,
        sender: broadcast::Sender<ExecutionEvent>,
    ) -> Self {
        Self {
            execution_id,
            step_id,
            sender,
        }
    }

    /// Announce that the step will be attempted again after `delay`
    pub fn retrying(&self, retry: u32, delay: Duration, error: impl Into<String>) {
        let _ = self.sender.send(ExecutionEvent::StepRetrying {
            execution_id: self.execution_id,
            step_id: self.step_id.clone(),
            retry,
            delay_ms: delay.as_millis() as u64,
            error: error.into(),
            timestamp: Utc::now(),
        });
    }
}

/// Broadcast bus for execution events; sending never blocks and events
/// without subscribers are dropped
pub struct EventBus {
    sender: broadcast::Sender<ExecutionEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: ExecutionEvent) {
        let _ = self.sender.send(event);
    }

    pub fn create_emitter(&self, execution_id: ExecutionId, step_id: impl Into<StepId>) -> EventEmitter {
        EventEmitter::new(execution_id, step_id.into(), self.sender.clone())
    }
}
