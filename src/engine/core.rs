// src/engine/core.rs

//! Pure core runtime state machine.
//!
//! This module contains a synchronous, deterministic "core runtime" that
//! consumes [`RuntimeEvent`]s and produces:
//! - an updated core state
//! - a list of "commands" describing what the IO shell should do next
//!
//! The async/IO-heavy shell (`engine::runtime::Runtime`) is responsible for:
//! - reading events from channels
//! - sending `DispatchedTask`s to the executor
//! - writing skipped attempts to the ledger
//! - handling cancellation
//!
//! The core is unit tested without any Tokio, channels, or adapters.

use crate::dag::{Scheduler, TaskGraph, TaskState};
use crate::engine::event_handlers::{CoreStep, handle_cancel, handle_task_finished, into_core_step};
use crate::engine::{RunReport, RuntimeEvent};
use crate::state::{Run, RunStatus, TaskAttempt};

/// Pure core runtime state for one run.
///
/// It has **no** channels, no Tokio types, and does not perform any IO.
#[derive(Debug)]
pub struct CoreRuntime {
    scheduler: Scheduler,
    run: Run,
}

impl CoreRuntime {
    pub fn new(scheduler: Scheduler, run: Run) -> Self {
        Self { scheduler, run }
    }

    pub fn run(&self) -> &Run {
        &self.run
    }

    pub fn graph(&self) -> &TaskGraph {
        self.scheduler.graph()
    }

    /// Expose whether the scheduler is idle (for tests).
    pub fn is_idle(&self) -> bool {
        self.scheduler.is_idle()
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Seed a fresh run.
    pub fn start(&mut self) -> CoreStep {
        let step = self.scheduler.start_run(&self.run);
        into_core_step(&self.scheduler, &self.run, step)
    }

    /// Seed a run continued from its ledger history.
    pub fn resume(&mut self, history: &[TaskAttempt]) -> CoreStep {
        let step = self.scheduler.resume_run(&self.run, history);
        into_core_step(&self.scheduler, &self.run, step)
    }

    /// Report for a run the shell had to abort: status `Failed`, with
    /// `culprit` (when known) counted as a failed task. Other tasks keep
    /// whatever state they had reached.
    pub fn abort_report(&self, culprit: Option<&str>) -> RunReport {
        let mut tasks = self.scheduler.task_states();
        if let Some(state) = culprit.and_then(|name| tasks.get_mut(name)) {
            *state = TaskState::Failed;
        }
        let run = Run {
            status: RunStatus::Failed,
            ..self.run.clone()
        };
        RunReport::new(run, tasks)
    }

    /// Handle a single runtime event, updating core state and returning the
    /// resulting commands for the IO shell.
    ///
    /// `Fatal` is handled by the shell before it reaches the core; if it does
    /// arrive here the core stops.
    pub fn step(&mut self, event: RuntimeEvent) -> CoreStep {
        match event {
            RuntimeEvent::TaskFinished { task, outcome } => {
                handle_task_finished(&mut self.scheduler, &self.run, task, outcome)
            }
            RuntimeEvent::CancelRequested => handle_cancel(&mut self.scheduler, &self.run),
            RuntimeEvent::Fatal { .. } => CoreStep {
                commands: Vec::new(),
                keep_running: false,
            },
        }
    }
}
