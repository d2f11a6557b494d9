// src/dag/task_info.rs

//! Task definitions and per-run task state.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::engine::TaskName;
use crate::exec::retry::RetryPolicy;
use crate::quality::QualityCheck;

/// Which transform-tool command a transform task runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransformOp {
    /// Install project dependencies (`dbt deps`).
    Deps,
    /// Build the selected models (`dbt run`).
    Run,
    /// Run the tests attached to the selected models (`dbt test`).
    Test,
    /// Check the load age of the selected sources (`dbt source freshness`).
    Freshness,
}

/// The external work a task performs.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskAction {
    /// Extract-load one source; advances that source's watermark on success.
    Sync { source: String },
    /// Transform step over an optional model selector.
    Transform {
        op: TransformOp,
        select: Option<String>,
    },
    /// Evaluate data-quality checks; failure halts dependents.
    QualityGate { checks: Vec<QualityCheck> },
}

impl TaskAction {
    /// Short label for logs and dry-run output.
    pub fn kind(&self) -> &'static str {
        match self {
            TaskAction::Sync { .. } => "sync",
            TaskAction::Transform { op: TransformOp::Deps, .. } => "transform:deps",
            TaskAction::Transform { op: TransformOp::Run, .. } => "transform:run",
            TaskAction::Transform { op: TransformOp::Test, .. } => "transform:test",
            TaskAction::Transform { op: TransformOp::Freshness, .. } => "transform:freshness",
            TaskAction::QualityGate { .. } => "quality_gate",
        }
    }
}

/// One node of the task graph.
///
/// Nodes are plain values; the graph takes ownership and never mutates them.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskNode {
    pub name: TaskName,
    /// Direct dependencies, sorted and de-duplicated by [`TaskNode::after`].
    pub dependencies: Vec<TaskName>,
    pub action: TaskAction,
    pub retry_policy: RetryPolicy,
    /// Dispatch this task even when an upstream task failed or was skipped.
    pub run_on_upstream_failure: bool,
    /// Upper bound for a single attempt.
    pub timeout: Option<Duration>,
    /// Treat a timed-out attempt as non-retryable.
    pub timeout_is_fatal: bool,
    /// Display-only grouping (e.g. "extract_load"); carries no scheduling meaning.
    pub group: Option<String>,
}

impl TaskNode {
    pub fn new(name: impl Into<TaskName>, action: TaskAction) -> Self {
        Self {
            name: name.into(),
            dependencies: Vec::new(),
            action,
            retry_policy: RetryPolicy::default(),
            run_on_upstream_failure: false,
            timeout: None,
            timeout_is_fatal: false,
            group: None,
        }
    }

    pub fn sync(name: impl Into<TaskName>, source: impl Into<String>) -> Self {
        Self::new(
            name,
            TaskAction::Sync {
                source: source.into(),
            },
        )
    }

    pub fn transform(name: impl Into<TaskName>, op: TransformOp, select: Option<&str>) -> Self {
        Self::new(
            name,
            TaskAction::Transform {
                op,
                select: select.map(str::to_string),
            },
        )
    }

    pub fn gate(name: impl Into<TaskName>, checks: Vec<QualityCheck>) -> Self {
        Self::new(name, TaskAction::QualityGate { checks })
    }

    pub fn after(mut self, dep: impl Into<TaskName>) -> Self {
        let dep = dep.into();
        if let Err(pos) = self.dependencies.binary_search(&dep) {
            self.dependencies.insert(pos, dep);
        }
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration, fatal: bool) -> Self {
        self.timeout = Some(timeout);
        self.timeout_is_fatal = fatal;
        self
    }

    pub fn run_on_upstream_failure(mut self, yes: bool) -> Self {
        self.run_on_upstream_failure = yes;
        self
    }

    pub fn in_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    pub fn is_gate(&self) -> bool {
        matches!(self.action, TaskAction::QualityGate { .. })
    }

    /// Source whose watermark this task advances, if it is an extract task.
    pub fn sync_source(&self) -> Option<&str> {
        match &self.action {
            TaskAction::Sync { source } => Some(source),
            _ => None,
        }
    }
}

/// Per-run state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    /// Waiting on dependencies or on a free concurrency slot.
    Pending,
    /// Dispatched to the executor.
    Running,
    Succeeded,
    Failed,
    /// Never dispatched: upstream failure or run cancellation.
    Skipped,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Succeeded | TaskState::Failed | TaskState::Skipped
        )
    }
}

/// A task the scheduler wants the executor to run now.
#[derive(Debug, Clone)]
pub struct DispatchedTask {
    pub node: Arc<TaskNode>,
    pub run_id: String,
    pub logical_ts: DateTime<Utc>,
    /// Attempt number the executor should use for its first attempt.
    ///
    /// Greater than 1 when a resumed run already holds attempts for this task.
    pub first_attempt: u32,
}

impl DispatchedTask {
    pub fn name(&self) -> &str {
        &self.node.name
    }
}
