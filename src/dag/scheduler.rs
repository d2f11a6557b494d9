// src/dag/scheduler.rs

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::dag::graph::TaskGraph;
use crate::dag::scheduler_step::{SchedulerStep, SkippedTask};
use crate::dag::state_manager::{ReadOnlyStateManager, RunContext, StateManager, TaskProgress};
use crate::dag::task_info::TaskState;
use crate::engine::{TaskName, TaskOutcome};
use crate::state::{AttemptStatus, Run, RunStatus, TaskAttempt};

/// Cause recorded for tasks skipped because the run was cancelled.
pub const CANCELLED_CAUSE: &str = "run cancelled";

/// Scheduler holds the immutable task graph plus mutable per-run state.
///
/// It is responsible for:
/// - deciding when a pending task is ready (dependencies satisfied)
/// - bounding the number of in-flight tasks by `max_concurrency`
/// - marking tasks as succeeded or failed as outcomes arrive
/// - skipping dependents when a task fails
/// - deriving the final run status
///
/// It performs no IO. The engine feeds it outcomes and executes the
/// [`SchedulerStep`]s it returns.
#[derive(Debug)]
pub struct Scheduler {
    graph: Arc<TaskGraph>,
    tasks: BTreeMap<TaskName, TaskProgress>,
    max_concurrency: usize,
    run: Option<RunContext>,
    cancelled: bool,
    /// Gates whose checks failed; they count toward `partial`, not `failed`.
    failed_gates: Vec<TaskName>,
    finished: Option<RunStatus>,
}

impl Scheduler {
    /// `max_concurrency` is clamped to at least 1.
    pub fn new(graph: Arc<TaskGraph>, max_concurrency: usize) -> Self {
        let tasks = graph
            .tasks()
            .map(|name| (name.to_string(), TaskProgress::pending()))
            .collect();

        Self {
            graph,
            tasks,
            max_concurrency: max_concurrency.max(1),
            run: None,
            cancelled: false,
            failed_gates: Vec::new(),
            finished: None,
        }
    }

    pub fn graph(&self) -> &Arc<TaskGraph> {
        &self.graph
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    /// `true` before a run starts and after it finished.
    pub fn is_idle(&self) -> bool {
        self.run.is_none() || self.finished.is_some()
    }

    pub fn run_id(&self) -> Option<&str> {
        self.run.as_ref().map(|r| r.run_id.as_str())
    }

    pub fn state_of(&self, task: &str) -> Option<TaskState> {
        self.tasks.get(task).map(|p| p.state)
    }

    /// Snapshot of every task's state, in name order.
    pub fn task_states(&self) -> BTreeMap<TaskName, TaskState> {
        self.tasks
            .iter()
            .map(|(name, p)| (name.clone(), p.state))
            .collect()
    }

    /// Whether the dependencies of `task` are satisfied right now.
    ///
    /// Returns `None` if the task is unknown.
    pub fn deps_satisfied(&self, task: &str) -> Option<bool> {
        let node = self.graph.node(task)?;
        Some(ReadOnlyStateManager::new(&self.tasks).deps_satisfied(node))
    }

    /// Start a fresh run: every task pending, roots dispatched.
    pub fn start_run(&mut self, run: &Run) -> SchedulerStep {
        for progress in self.tasks.values_mut() {
            *progress = TaskProgress::pending();
        }
        self.begin(run);
        debug!(run_id = %run.run_id, tasks = self.tasks.len(), "scheduler: starting run");
        self.advance(Vec::new())
    }

    /// Continue an unfinished run from its ledger history.
    ///
    /// Tasks with a succeeded attempt keep that result. Every other task is
    /// pending again and, when dispatched, continues numbering after the
    /// highest attempt already recorded. `history` must not contain
    /// `running` attempts; the caller closes them first.
    pub fn resume_run(&mut self, run: &Run, history: &[TaskAttempt]) -> SchedulerStep {
        for progress in self.tasks.values_mut() {
            *progress = TaskProgress::pending();
        }

        for attempt in history {
            let Some(progress) = self.tasks.get_mut(&attempt.task_name) else {
                warn!(task = %attempt.task_name, "ledger history names a task missing from the graph; ignoring");
                continue;
            };
            progress.attempts_recorded = progress.attempts_recorded.max(attempt.attempt_number);
            match attempt.status {
                AttemptStatus::Succeeded => progress.state = TaskState::Succeeded,
                AttemptStatus::Running => {
                    warn!(task = %attempt.task_name, attempt = attempt.attempt_number, "dangling running attempt in history");
                }
                AttemptStatus::Failed | AttemptStatus::Skipped => {}
            }
        }

        self.begin(run);
        let done = self.tasks.values().filter(|p| p.state == TaskState::Succeeded).count();
        info!(run_id = %run.run_id, already_succeeded = done, "scheduler: resuming run");
        self.advance(Vec::new())
    }

    /// Apply a task's terminal outcome and dispatch whatever became ready.
    pub fn step_completion(&mut self, task: &str, outcome: &TaskOutcome) -> SchedulerStep {
        if self.is_idle() {
            warn!(task = %task, "completion received with no active run; ignoring");
            return SchedulerStep::default();
        }

        let mut newly_skipped = Vec::new();

        match self.tasks.get_mut(task) {
            Some(progress) if progress.state == TaskState::Running => match outcome {
                TaskOutcome::Succeeded { attempts } => {
                    progress.state = TaskState::Succeeded;
                    progress.attempts_recorded = progress.attempts_recorded.max(*attempts);
                    debug!(task = %task, attempts, "task succeeded");
                }
                TaskOutcome::Failed { attempts, error, .. } => {
                    progress.state = TaskState::Failed;
                    progress.attempts_recorded = progress.attempts_recorded.max(*attempts);
                    let is_gate = self.graph.node(task).is_some_and(|n| n.is_gate());
                    if is_gate {
                        self.failed_gates.push(task.to_string());
                    }
                    warn!(task = %task, attempts, is_gate, error = %error, "task failed; skipping dependents");
                    let mut manager = StateManager::new(&self.graph, &mut self.tasks);
                    newly_skipped = manager.mark_dependents_skipped(task);
                }
            },
            Some(progress) => {
                warn!(task = %task, state = ?progress.state, "completion for a task that is not running; ignoring");
                return SchedulerStep::default();
            }
            None => {
                warn!(task = %task, "completion for unknown task; ignoring");
                return SchedulerStep::default();
            }
        }

        self.advance(newly_skipped)
    }

    /// Stop dispatching and skip every task that has not started.
    ///
    /// Running tasks keep their state; their completions are still accepted.
    pub fn cancel(&mut self) -> SchedulerStep {
        if self.is_idle() {
            return SchedulerStep::default();
        }
        self.cancelled = true;
        let mut manager = StateManager::new(&self.graph, &mut self.tasks);
        let skipped = manager.skip_all_pending(CANCELLED_CAUSE);
        info!(skipped = skipped.len(), "scheduler: run cancelled");
        self.advance(skipped)
    }

    /// Status the run has (or would have) given the current task states.
    pub fn run_status(&self) -> RunStatus {
        if self.run.is_none() {
            return RunStatus::Pending;
        }
        if self.tasks.values().any(|p| !p.state.is_terminal()) {
            return RunStatus::Running;
        }

        let failed_non_gate = self
            .tasks
            .iter()
            .any(|(name, p)| p.state == TaskState::Failed && !self.failed_gates.contains(name));
        if failed_non_gate {
            return RunStatus::Failed;
        }

        let any_skipped = self.tasks.values().any(|p| p.state == TaskState::Skipped);
        let any_succeeded = self.tasks.values().any(|p| p.state == TaskState::Succeeded);

        match (any_skipped || !self.failed_gates.is_empty(), any_succeeded) {
            (false, _) => RunStatus::Succeeded,
            (true, true) => RunStatus::Partial,
            (true, false) => RunStatus::Failed,
        }
    }

    fn begin(&mut self, run: &Run) {
        self.run = Some(RunContext {
            run_id: run.run_id.clone(),
            logical_ts: run.logical_ts,
        });
        self.cancelled = false;
        self.failed_gates.clear();
        self.finished = None;
    }

    /// Dispatch ready work and detect the end of the run.
    fn advance(&mut self, newly_skipped: Vec<SkippedTask>) -> SchedulerStep {
        let Some(run) = self.run.clone() else {
            return SchedulerStep::default();
        };

        let newly_dispatched = if self.cancelled {
            Vec::new()
        } else {
            let mut manager = StateManager::new(&self.graph, &mut self.tasks);
            manager.collect_new_ready_tasks(&run, self.max_concurrency)
        };

        let all_terminal = StateManager::new(&self.graph, &mut self.tasks).all_tasks_terminal();
        let run_finished = if self.finished.is_none() && all_terminal {
            let status = self.run_status();
            info!(run_id = %run.run_id, status = %status, "scheduler: all tasks terminal; run finished");
            self.finished = Some(status);
            Some(status)
        } else {
            None
        };

        SchedulerStep {
            newly_dispatched,
            newly_skipped,
            run_finished,
        }
    }
}
