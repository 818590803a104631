use crate::{Step, StepId, Value, WorkflowError, WorkflowState};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

pub type WorkflowId = String;

/// Complete workflow definition
///
/// Steps are kept in insertion order. A workflow is built once and then only
/// read; the engine never mutates it.
#[derive(Clone)]
pub struct Workflow {
    pub id: WorkflowId,
    pub name: String,
    pub description: String,
    pub version: String,
    pub metadata: HashMap<String, Value>,
    steps: Vec<Arc<dyn Step>>,
    index: HashMap<StepId, usize>,
}

impl Workflow {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            description: String::new(),
            version: "1.0.0".to_string(),
            metadata: HashMap::new(),
            steps: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Build a workflow from a batch of steps.
    ///
    /// Only duplicate ids are rejected here. Dependencies may point forward
    /// or at nothing at all; [`Workflow::validate`] reports those problems.
    pub fn from_steps(
        name: impl Into<String>,
        steps: impl IntoIterator<Item = Arc<dyn Step>>,
    ) -> Result<Self, WorkflowError> {
        let mut workflow = Self::new(name);
        for step in steps {
            workflow.insert(step)?;
        }
        Ok(workflow)
    }

    pub fn with_id(mut self, id: impl Into<WorkflowId>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Add a step whose dependencies are all already part of the workflow.
    pub fn add_step<S: Step + 'static>(&mut self, step: S) -> Result<(), WorkflowError> {
        self.add_shared(Arc::new(step))
    }

    pub fn add_shared(&mut self, step: Arc<dyn Step>) -> Result<(), WorkflowError> {
        if self.index.contains_key(step.id()) {
            return Err(WorkflowError::DuplicateStep(step.id().to_string()));
        }
        if let Some(missing) = step
            .dependencies()
            .iter()
            .find(|dep| !self.index.contains_key(dep.as_str()))
        {
            return Err(WorkflowError::UnknownDependency {
                step: step.id().to_string(),
                dependency: missing.clone(),
            });
        }
        self.insert(step)
    }

    fn insert(&mut self, step: Arc<dyn Step>) -> Result<(), WorkflowError> {
        let id = step.id().to_string();
        if self.index.contains_key(&id) {
            return Err(WorkflowError::DuplicateStep(id));
        }
        tracing::debug!(workflow = %self.name, step_id = %id, kind = step.kind(), "Adding step");
        self.index.insert(id, self.steps.len());
        self.steps.push(step);
        Ok(())
    }

    pub fn get_step(&self, id: &str) -> Option<&Arc<dyn Step>> {
        self.index.get(id).map(|&i| &self.steps[i])
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// Steps in insertion order
    pub fn steps(&self) -> impl Iterator<Item = &Arc<dyn Step>> {
        self.steps.iter()
    }

    pub fn list_steps(&self) -> Vec<StepId> {
        self.steps.iter().map(|s| s.id().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Build the dependency graph. Edges point from a dependency to its
    /// dependent; dependencies on unknown steps are left out.
    pub fn dependency_graph(&self) -> StepGraph {
        let mut graph = DiGraph::new();
        let mut nodes = HashMap::new();

        for step in &self.steps {
            let idx = graph.add_node(step.id().to_string());
            nodes.insert(step.id().to_string(), idx);
        }

        for step in &self.steps {
            let to = nodes[step.id()];
            for dep in step.dependencies() {
                if let Some(&from) = nodes.get(dep) {
                    graph.add_edge(from, to, ());
                }
            }
        }

        StepGraph { graph, nodes }
    }

    pub fn dependents_of(&self, id: &str) -> Vec<StepId> {
        self.dependency_graph().dependents(id)
    }

    /// Topological order of all step ids.
    ///
    /// Depth-first over each step's declared dependencies, keeping the set of
    /// steps on the current path; revisiting one of them is a cycle. The walk
    /// keeps its own stack, so chain length is not bounded by the call stack.
    pub fn execution_order(&self) -> Result<Vec<StepId>, WorkflowError> {
        let mut visited = HashSet::new();
        let mut on_path = HashSet::new();
        let mut order = Vec::with_capacity(self.steps.len());

        for step in &self.steps {
            self.visit(step.id(), &mut visited, &mut on_path, &mut order)?;
        }

        Ok(order)
    }

    fn visit<'a>(
        &'a self,
        root: &'a str,
        visited: &mut HashSet<&'a str>,
        on_path: &mut HashSet<&'a str>,
        order: &mut Vec<StepId>,
    ) -> Result<(), WorkflowError> {
        if visited.contains(root) || !self.contains(root) {
            return Ok(());
        }

        // (step id, index of its next dependency to walk)
        let mut stack: Vec<(&'a str, usize)> = vec![(root, 0)];
        on_path.insert(root);

        while let Some(frame) = stack.last_mut() {
            let (id, next) = *frame;
            let deps: &'a [StepId] = match self.get_step(id) {
                Some(step) => step.dependencies(),
                None => &[],
            };

            match deps.get(next) {
                Some(dep) => {
                    frame.1 += 1;
                    let dep = dep.as_str();
                    if on_path.contains(dep) {
                        return Err(WorkflowError::CircularDependency(dep.to_string()));
                    }
                    if visited.contains(dep) || !self.contains(dep) {
                        continue;
                    }
                    on_path.insert(dep);
                    stack.push((dep, 0));
                }
                None => {
                    stack.pop();
                    on_path.remove(id);
                    visited.insert(id);
                    order.push(id.to_string());
                }
            }
        }

        Ok(())
    }

    /// Collect every problem with the definition without failing.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.steps.is_empty() {
            errors.push("Workflow has no steps".to_string());
            return errors;
        }

        for step in &self.steps {
            for dep in step.dependencies() {
                if !self.contains(dep) {
                    errors.push(
                        WorkflowError::UnknownDependency {
                            step: step.id().to_string(),
                            dependency: dep.clone(),
                        }
                        .to_string(),
                    );
                }
            }
            if let Err(e) = step.validate_config() {
                errors.push(format!("Step '{}': {}", step.id(), e));
            }
        }

        if let Err(e) = self.execution_order() {
            errors.push(e.to_string());
        }

        errors
    }

    /// Group steps by the length of the longest dependency chain ending at
    /// them. Steps in one group could run together given unlimited
    /// parallelism; the engine does not schedule by this grouping.
    pub fn execution_plan(&self) -> Result<ExecutionPlan, WorkflowError> {
        let execution_order = self.execution_order()?;
        let mut dependency_levels: HashMap<StepId, usize> = HashMap::new();

        for id in &execution_order {
            let level = self
                .get_step(id)
                .map(|step| {
                    step.dependencies()
                        .iter()
                        .filter_map(|dep| dependency_levels.get(dep))
                        .map(|level| level + 1)
                        .max()
                        .unwrap_or(0)
                })
                .unwrap_or(0);
            dependency_levels.insert(id.clone(), level);
        }

        let mut parallel_groups: BTreeMap<usize, Vec<StepId>> = BTreeMap::new();
        for id in &execution_order {
            parallel_groups
                .entry(dependency_levels[id])
                .or_default()
                .push(id.clone());
        }

        Ok(ExecutionPlan {
            workflow_id: self.id.clone(),
            total_steps: self.steps.len(),
            estimated_parallel_stages: parallel_groups.len(),
            execution_order,
            dependency_levels,
            parallel_groups,
        })
    }

    /// Fresh run record for this workflow.
    pub fn create_state(&self) -> WorkflowState {
        WorkflowState::new(self.id.clone())
    }
}

impl fmt::Debug for Workflow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Workflow")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("steps", &self.list_steps())
            .finish()
    }
}

/// Dependency graph over step ids
#[derive(Debug, Clone)]
pub struct StepGraph {
    graph: DiGraph<StepId, ()>,
    nodes: HashMap<StepId, NodeIndex>,
}

impl StepGraph {
    /// Steps that declare `id` as a dependency
    pub fn dependents(&self, id: &str) -> Vec<StepId> {
        self.neighbors(id, Direction::Outgoing)
    }

    /// Known dependencies of `id`
    pub fn dependencies(&self, id: &str) -> Vec<StepId> {
        self.neighbors(id, Direction::Incoming)
    }

    fn neighbors(&self, id: &str, direction: Direction) -> Vec<StepId> {
        let Some(&idx) = self.nodes.get(id) else {
            return Vec::new();
        };
        let mut ids: Vec<StepId> = self
            .graph
            .neighbors_directed(idx, direction)
            .map(|n| self.graph[n].clone())
            .collect();
        ids.sort();
        ids.dedup();
        ids
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }
}

/// Advisory execution plan for reporting and parallelism estimates
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutionPlan {
    pub workflow_id: WorkflowId,
    pub total_steps: usize,
    pub execution_order: Vec<StepId>,
    pub dependency_levels: HashMap<StepId, usize>,
    pub parallel_groups: BTreeMap<usize, Vec<StepId>>,
    pub estimated_parallel_stages: usize,
}
