//! Workflow execution runtime
//!
//! This crate provides the engine that runs workflows as DAGs with bounded
//! parallelism, the tool and function registries steps call into, and a
//! runtime facade that keeps registered workflows.

mod executor;
mod observer;
mod registry;
mod runtime;

pub use executor::{EngineConfig, WorkflowEngine};
pub use observer::{LoggingObserver, WorkflowObserver};
pub use registry::{
    AsyncTransform, ContextAction, FunctionRegistry, ParameterDefinition, StepFunction,
    SyncTransform, Tool, ToolExecutor, ToolMetadata, ToolRegistry,
};
pub use runtime::DagRuntime;
