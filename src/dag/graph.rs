// src/dag/graph.rs

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;
use thiserror::Error;

use crate::dag::task_info::TaskNode;
use crate::engine::TaskName;

/// Reasons a set of task nodes does not form a valid graph.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("task graph must contain at least one task")]
    Empty,

    #[error("duplicate task name '{0}'")]
    DuplicateTask(TaskName),

    #[error("task '{task}' depends on unknown task '{dependency}'")]
    UnknownDependency { task: TaskName, dependency: TaskName },

    #[error("task '{0}' cannot depend on itself")]
    SelfDependency(TaskName),

    #[error("cycle detected in task graph involving task '{0}'")]
    Cycle(TaskName),
}

/// Immutable DAG of task nodes keyed by name.
///
/// Changing the pipeline means building a new graph; nothing here mutates
/// after [`TaskGraph::build`] returns.
#[derive(Debug, Clone)]
pub struct TaskGraph {
    nodes: BTreeMap<TaskName, Arc<TaskNode>>,
    /// Direct dependents of each task, sorted by name.
    dependents: BTreeMap<TaskName, Vec<TaskName>>,
}

impl TaskGraph {
    /// Validate `nodes` and assemble the graph.
    ///
    /// Fails on duplicate names, unknown or self dependencies, and cycles.
    pub fn build(nodes: impl IntoIterator<Item = TaskNode>) -> Result<Self, GraphError> {
        let mut by_name: BTreeMap<TaskName, Arc<TaskNode>> = BTreeMap::new();
        for node in nodes {
            if by_name.contains_key(&node.name) {
                return Err(GraphError::DuplicateTask(node.name));
            }
            by_name.insert(node.name.clone(), Arc::new(node));
        }

        if by_name.is_empty() {
            return Err(GraphError::Empty);
        }

        for (name, node) in &by_name {
            for dep in &node.dependencies {
                if dep == name {
                    return Err(GraphError::SelfDependency(name.clone()));
                }
                if !by_name.contains_key(dep) {
                    return Err(GraphError::UnknownDependency {
                        task: name.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
        }

        ensure_acyclic(&by_name)?;

        let mut dependents: BTreeMap<TaskName, Vec<TaskName>> = by_name
            .keys()
            .map(|name| (name.clone(), Vec::new()))
            .collect();
        for (name, node) in &by_name {
            for dep in &node.dependencies {
                if let Some(list) = dependents.get_mut(dep) {
                    list.push(name.clone());
                }
            }
        }
        // Outer iteration is already name-ordered, so each list is sorted.

        Ok(Self {
            nodes: by_name,
            dependents,
        })
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.nodes.contains_key(name)
    }

    pub fn node(&self, name: &str) -> Option<&Arc<TaskNode>> {
        self.nodes.get(name)
    }

    /// All nodes in name order.
    pub fn nodes(&self) -> impl Iterator<Item = &Arc<TaskNode>> {
        self.nodes.values()
    }

    /// All task names in lexicographic order.
    pub fn tasks(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(|s| s.as_str())
    }

    /// Immediate dependencies of a task (its `after` list).
    pub fn dependencies_of(&self, name: &str) -> &[TaskName] {
        self.nodes
            .get(name)
            .map(|n| n.dependencies.as_slice())
            .unwrap_or(&[])
    }

    /// Immediate dependents of a task (tasks listing it in `after`).
    pub fn dependents_of(&self, name: &str) -> &[TaskName] {
        self.dependents
            .get(name)
            .map(|d| d.as_slice())
            .unwrap_or(&[])
    }

    /// Every task reachable downstream of `name`, excluding `name` itself.
    pub fn transitive_dependents(&self, name: &str) -> BTreeSet<TaskName> {
        let mut seen = BTreeSet::new();
        let mut stack: Vec<&str> = self.dependents_of(name).iter().map(|s| s.as_str()).collect();

        while let Some(current) = stack.pop() {
            if seen.insert(current.to_string()) {
                stack.extend(self.dependents_of(current).iter().map(|s| s.as_str()));
            }
        }

        seen
    }

    /// Tasks without dependencies.
    pub fn roots(&self) -> impl Iterator<Item = &str> {
        self.nodes
            .values()
            .filter(|n| n.dependencies.is_empty())
            .map(|n| n.name.as_str())
    }

    /// Maximum-parallelism schedule: each batch holds the tasks whose
    /// dependencies all sit in strictly earlier batches.
    ///
    /// The iterator is lazy and each call starts from scratch.
    pub fn topological_batches(&self) -> TopologicalBatches<'_> {
        let remaining: BTreeMap<&str, usize> = self
            .nodes
            .values()
            .map(|n| (n.name.as_str(), n.dependencies.len()))
            .collect();
        let frontier = remaining
            .iter()
            .filter(|(_, deps)| **deps == 0)
            .map(|(name, _)| *name)
            .collect();

        TopologicalBatches {
            graph: self,
            remaining,
            frontier,
        }
    }
}

/// Lazy iterator returned by [`TaskGraph::topological_batches`].
#[derive(Debug, Clone)]
pub struct TopologicalBatches<'a> {
    graph: &'a TaskGraph,
    remaining: BTreeMap<&'a str, usize>,
    frontier: BTreeSet<&'a str>,
}

impl Iterator for TopologicalBatches<'_> {
    type Item = BTreeSet<TaskName>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.frontier.is_empty() {
            return None;
        }

        let batch = std::mem::take(&mut self.frontier);
        for name in &batch {
            for dependent in self.graph.dependents_of(name) {
                if let Some(count) = self.remaining.get_mut(dependent.as_str()) {
                    *count -= 1;
                    if *count == 0 {
                        self.frontier.insert(dependent.as_str());
                    }
                }
            }
        }

        Some(batch.into_iter().map(str::to_string).collect())
    }
}

fn ensure_acyclic(nodes: &BTreeMap<TaskName, Arc<TaskNode>>) -> Result<(), GraphError> {
    // Edge direction: dependency -> dependent.
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();

    for name in nodes.keys() {
        graph.add_node(name.as_str());
    }
    for (name, node) in nodes {
        for dep in &node.dependencies {
            graph.add_edge(dep.as_str(), name.as_str(), ());
        }
    }

    toposort(&graph, None)
        .map(|_| ())
        .map_err(|cycle| GraphError::Cycle(cycle.node_id().to_string()))
}
