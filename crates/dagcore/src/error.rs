use thiserror::Error;

/// Failure of a single step's own logic or of its execution envelope.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StepError {
    #[error("Missing required input: {0}")]
    MissingInput(String),

    #[error("Invalid input type for '{field}': expected {expected}, got {actual}")]
    InvalidInputType {
        field: String,
        expected: String,
        actual: String,
    },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Tool '{0}' not found in registry")]
    ToolNotFound(String),

    #[error("Function '{0}' not found in registry")]
    FunctionNotFound(String),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Step timed out after {millis}ms")]
    Timeout { millis: u64 },

    #[error("Cancelled")]
    Cancelled,

    #[error("Failed after {retries} retries: {last}")]
    RetryExhausted { retries: u32, last: Box<StepError> },
}

impl StepError {
    /// Shorthand for the most common variant raised by step logic.
    pub fn failed(message: impl Into<String>) -> Self {
        StepError::ExecutionFailed(message.into())
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, StepError::Timeout { .. })
    }
}

/// Errors raised while building or validating a workflow definition.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum WorkflowError {
    #[error("Workflow not found: {0}")]
    NotFound(String),

    #[error("Step with ID '{0}' already exists in workflow")]
    DuplicateStep(String),

    #[error("Step '{step}' depends on unknown step '{dependency}'")]
    UnknownDependency { step: String, dependency: String },

    #[error("Circular dependency detected involving step '{0}'")]
    CircularDependency(String),

    #[error("Workflow validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),
}

/// Top-level error surfaced to callers of the engine.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Validation(#[from] WorkflowError),

    #[error("Step '{step_id}' failed: {source}")]
    StepFailed {
        step_id: String,
        #[source]
        source: StepError,
    },

    #[error("Required step '{step_id}' did not complete")]
    StepIncomplete { step_id: String },

    #[error("Workflow execution cancelled")]
    Cancelled,
}

impl EngineError {
    /// Id of the step that caused the failure, when there is one.
    pub fn step_id(&self) -> Option<&str> {
        match self {
            EngineError::StepFailed { step_id, .. } | EngineError::StepIncomplete { step_id } => {
                Some(step_id)
            }
            _ => None,
        }
    }
}
