// src/dag/scheduler_step.rs

//! Step-by-step execution result types for the scheduler.

use crate::dag::task_info::DispatchedTask;
use crate::engine::TaskName;
use crate::state::RunStatus;

/// A task the scheduler decided will never be dispatched in this run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedTask {
    pub name: TaskName,
    pub cause: String,
    /// Attempt number for the `skipped` ledger entry.
    pub attempt_number: u32,
}

/// Structured result of a single scheduler "step".
///
/// Tests use it to step the graph by hand and assert on what changed.
#[derive(Debug, Clone, Default)]
pub struct SchedulerStep {
    /// Tasks that became ready and were marked running, in dispatch order.
    pub newly_dispatched: Vec<DispatchedTask>,
    /// Tasks newly marked skipped in this step.
    pub newly_skipped: Vec<SkippedTask>,
    /// Set when this step made every task terminal.
    pub run_finished: Option<RunStatus>,
}

impl SchedulerStep {
    pub fn dispatched_names(&self) -> Vec<&str> {
        self.newly_dispatched.iter().map(|t| t.name()).collect()
    }

    pub fn skipped_names(&self) -> Vec<&str> {
        self.newly_skipped.iter().map(|t| t.name.as_str()).collect()
    }
}
