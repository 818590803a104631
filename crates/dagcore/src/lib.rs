//! Core abstractions for the workflow engine
//!
//! This crate provides the value model, the shared context, the step trait,
//! workflow definitions and run records that every other component builds
//! on. It does no scheduling itself.

mod context;
mod error;
pub mod events;
mod input;
mod state;
mod step;
mod value;
mod workflow;

pub use context::Context;
pub use error::{EngineError, StepError, WorkflowError};
pub use input::{resolve_inputs, Input, CONTEXT_REF_KEY};
pub use state::{
    StepResult, StepStatus, WorkflowState, WorkflowStatus, PREVIOUS_ERROR_KEY, RETRY_COUNT_KEY,
};
pub use step::{
    Condition, RetryPolicy, SkipPropagation, Step, StepBuilder, StepId, StepSpec,
};
pub use value::Value;
pub use workflow::{ExecutionPlan, StepGraph, Workflow, WorkflowId};
pub use events::*;
