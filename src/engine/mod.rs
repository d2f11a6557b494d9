// src/engine/mod.rs

//! Orchestration engine for eltflow.
//!
//! This module ties together:
//! - the task scheduler
//! - the run ledger (what was attempted, and with which result)
//! - the main runtime event loop that reacts to:
//!   - task completion events from the executor
//!   - fatal state errors
//!   - cancellation (Ctrl-C, schedule shutdown)
//!
//! The pure core state machine lives in [`core`]; the async/IO shell is
//! implemented in [`runtime`]. [`pipeline`] wires both to the ledger,
//! watermark store and adapters for a single run.

use std::collections::BTreeMap;

use crate::dag::TaskState;
use crate::errors::EltflowError;
use crate::state::{Run, RunStatus};

/// Canonical task name type used throughout the engine.
pub type TaskName = String;

/// Terminal outcome of a dispatched task after the executor's retry loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Succeeded {
        /// Highest attempt number used.
        attempts: u32,
    },
    Failed {
        attempts: u32,
        error: String,
        /// The last error was not retryable (or retries were not attempted).
        fatal: bool,
    },
}

impl TaskOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, TaskOutcome::Succeeded { .. })
    }
}

/// Events flowing into the runtime from the executor and the signal handler.
#[derive(Debug)]
pub enum RuntimeEvent {
    /// A dispatched task reached a terminal outcome.
    TaskFinished { task: TaskName, outcome: TaskOutcome },
    /// Stop dispatching; skip everything not yet started.
    CancelRequested,
    /// A state write failed; the run cannot continue durably.
    Fatal { task: TaskName, error: EltflowError },
}

/// Terminal summary of a run, handed to the notifier and the CLI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub run: Run,
    pub tasks: BTreeMap<TaskName, TaskState>,
    pub failed_tasks: Vec<TaskName>,
    pub skipped_tasks: Vec<TaskName>,
}

impl RunReport {
    pub fn new(run: Run, tasks: BTreeMap<TaskName, TaskState>) -> Self {
        let pick = |state: TaskState| {
            tasks
                .iter()
                .filter(|(_, s)| **s == state)
                .map(|(name, _)| name.clone())
                .collect::<Vec<_>>()
        };
        let failed_tasks = pick(TaskState::Failed);
        let skipped_tasks = pick(TaskState::Skipped);
        Self {
            run,
            tasks,
            failed_tasks,
            skipped_tasks,
        }
    }

    pub fn status(&self) -> RunStatus {
        self.run.status
    }

    /// CLI exit code: 0 succeeded, 2 partial, 1 otherwise.
    pub fn exit_code(&self) -> i32 {
        self.run.status.exit_code()
    }
}

pub mod core;
pub mod event_handlers;
pub mod pipeline;
pub mod runtime;

pub use core::CoreRuntime;
pub use event_handlers::{CoreCommand, CoreStep};
pub use pipeline::Pipeline;
pub use runtime::{RunAbort, Runtime};
