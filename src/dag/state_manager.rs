// src/dag/state_manager.rs

//! Per-run state transitions for tasks in the scheduler.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::dag::graph::TaskGraph;
use crate::dag::scheduler_step::SkippedTask;
use crate::dag::task_info::{DispatchedTask, TaskNode, TaskState};
use crate::engine::TaskName;

/// Mutable per-run bookkeeping for one task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskProgress {
    pub state: TaskState,
    /// Highest attempt number already written to the ledger for this run.
    pub attempts_recorded: u32,
}

impl TaskProgress {
    pub fn pending() -> Self {
        Self {
            state: TaskState::Pending,
            attempts_recorded: 0,
        }
    }
}

/// Identity of the run the scheduler is driving.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunContext {
    pub run_id: String,
    pub logical_ts: DateTime<Utc>,
}

/// Manages per-run state transitions for tasks.
pub struct StateManager<'a> {
    graph: &'a TaskGraph,
    tasks: &'a mut BTreeMap<TaskName, TaskProgress>,
}

impl<'a> StateManager<'a> {
    pub fn new(graph: &'a TaskGraph, tasks: &'a mut BTreeMap<TaskName, TaskProgress>) -> Self {
        Self { graph, tasks }
    }

    /// Whether `node` may be dispatched given its dependencies' states.
    pub fn deps_satisfied(&self, node: &TaskNode) -> bool {
        ReadOnlyStateManager::new(self.tasks).deps_satisfied(node)
    }

    /// Mark every pending transitive dependent of `failed_task` as skipped.
    ///
    /// Propagation stops at tasks flagged `run_on_upstream_failure`: they stay
    /// pending and become ready once all of their dependencies are terminal.
    pub fn mark_dependents_skipped(&mut self, failed_task: &str) -> Vec<SkippedTask> {
        let cause = format!("upstream task '{failed_task}' failed");
        let mut stack: Vec<TaskName> = self.graph.dependents_of(failed_task).to_vec();
        let mut newly_skipped = Vec::new();

        while let Some(name) = stack.pop() {
            let Some(node) = self.graph.node(&name) else {
                warn!(task = %name, "dependent missing from graph");
                continue;
            };
            if node.run_on_upstream_failure {
                debug!(task = %name, upstream = %failed_task, "run_on_upstream_failure set; not skipping");
                continue;
            }
            let Some(progress) = self.tasks.get_mut(&name) else {
                continue;
            };
            if progress.state != TaskState::Pending {
                continue;
            }

            progress.state = TaskState::Skipped;
            progress.attempts_recorded += 1;
            debug!(task = %name, upstream = %failed_task, "skipping dependent of failed task");
            newly_skipped.push(SkippedTask {
                name: name.clone(),
                cause: cause.clone(),
                attempt_number: progress.attempts_recorded,
            });
            stack.extend(self.graph.dependents_of(&name).iter().cloned());
        }

        newly_skipped.sort_by(|a, b| a.name.cmp(&b.name));
        newly_skipped
    }

    /// Skip every task that has not been dispatched yet.
    pub fn skip_all_pending(&mut self, cause: &str) -> Vec<SkippedTask> {
        let mut skipped = Vec::new();
        for (name, progress) in self.tasks.iter_mut() {
            if progress.state == TaskState::Pending {
                progress.state = TaskState::Skipped;
                progress.attempts_recorded += 1;
                skipped.push(SkippedTask {
                    name: name.clone(),
                    cause: cause.to_string(),
                    attempt_number: progress.attempts_recorded,
                });
            }
        }
        skipped
    }

    /// Collect pending tasks whose dependencies are satisfied, in name order,
    /// until `slots` tasks are running. Marks them `Running`.
    pub fn collect_new_ready_tasks(
        &mut self,
        run: &RunContext,
        max_concurrency: usize,
    ) -> Vec<DispatchedTask> {
        let running = self.count_in(TaskState::Running);
        let slots = max_concurrency.saturating_sub(running);
        if slots == 0 {
            return Vec::new();
        }

        // Decide first, then mutate to avoid borrowing issues.
        let candidates: Vec<TaskName> = self
            .tasks
            .iter()
            .filter(|(_, p)| p.state == TaskState::Pending)
            .filter_map(|(name, _)| self.graph.node(name))
            .filter(|node| self.deps_satisfied(node))
            .map(|node| node.name.clone())
            .take(slots)
            .collect();

        let mut ready = Vec::with_capacity(candidates.len());
        for name in candidates {
            let (Some(node), Some(progress)) = (self.graph.node(&name), self.tasks.get_mut(&name))
            else {
                continue;
            };
            progress.state = TaskState::Running;
            let first_attempt = progress.attempts_recorded + 1;

            info!(
                task = %name,
                run_id = %run.run_id,
                kind = node.action.kind(),
                first_attempt,
                "dependencies satisfied; dispatching task"
            );

            ready.push(DispatchedTask {
                node: node.clone(),
                run_id: run.run_id.clone(),
                logical_ts: run.logical_ts,
                first_attempt,
            });
        }

        ready
    }

    pub fn count_in(&self, state: TaskState) -> usize {
        self.tasks.values().filter(|p| p.state == state).count()
    }

    /// Check if all tasks are in a terminal state.
    pub fn all_tasks_terminal(&self) -> bool {
        self.tasks.values().all(|p| p.state.is_terminal())
    }
}

/// A read-only view of the task states for checking dependency satisfaction.
pub struct ReadOnlyStateManager<'a> {
    tasks: &'a BTreeMap<TaskName, TaskProgress>,
}

impl<'a> ReadOnlyStateManager<'a> {
    pub fn new(tasks: &'a BTreeMap<TaskName, TaskProgress>) -> Self {
        Self { tasks }
    }

    /// All dependencies succeeded, or, for `run_on_upstream_failure` tasks,
    /// all dependencies reached any terminal state.
    pub fn deps_satisfied(&self, node: &TaskNode) -> bool {
        node.dependencies.iter().all(|dep| {
            match self.tasks.get(dep).map(|p| p.state) {
                Some(TaskState::Succeeded) => true,
                Some(state) if node.run_on_upstream_failure => state.is_terminal(),
                Some(_) => false,
                None => {
                    warn!(task = %node.name, dep = %dep, "dependency missing from tasks map");
                    false
                }
            }
        })
    }
}
