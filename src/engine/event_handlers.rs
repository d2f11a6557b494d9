// src/engine/event_handlers.rs

//! Event handling logic for the core runtime.

use crate::dag::{DispatchedTask, Scheduler, SchedulerStep, SkippedTask};
use crate::engine::{RunReport, TaskName, TaskOutcome};
use crate::state::Run;

/// Command produced by the pure core, to be executed by the outer IO shell.
#[derive(Debug, Clone)]
pub enum CoreCommand {
    /// Send these tasks to the executor.
    DispatchTasks(Vec<DispatchedTask>),
    /// Write `skipped` ledger entries for these tasks.
    RecordSkipped(Vec<SkippedTask>),
    /// Every task is terminal; finalize the run with this report.
    FinishRun(RunReport),
}

/// Decision returned by the core after handling a single `RuntimeEvent`.
#[derive(Debug, Clone)]
pub struct CoreStep {
    /// Commands the IO shell should execute, in order.
    pub commands: Vec<CoreCommand>,
    /// Whether the outer runtime loop should keep running.
    pub keep_running: bool,
}

/// Handle a task completion event.
pub fn handle_task_finished(
    scheduler: &mut Scheduler,
    run: &Run,
    task: TaskName,
    outcome: TaskOutcome,
) -> CoreStep {
    let step = scheduler.step_completion(&task, &outcome);
    into_core_step(scheduler, run, step)
}

/// Handle a cancellation request.
pub fn handle_cancel(scheduler: &mut Scheduler, run: &Run) -> CoreStep {
    let step = scheduler.cancel();
    into_core_step(scheduler, run, step)
}

/// Translate a [`SchedulerStep`] into commands for the shell.
///
/// Skips are recorded before new dispatches; the finish command always comes
/// last.
pub fn into_core_step(scheduler: &Scheduler, run: &Run, step: SchedulerStep) -> CoreStep {
    let mut commands = Vec::new();

    if !step.newly_skipped.is_empty() {
        commands.push(CoreCommand::RecordSkipped(step.newly_skipped));
    }
    if !step.newly_dispatched.is_empty() {
        commands.push(CoreCommand::DispatchTasks(step.newly_dispatched));
    }

    let mut keep_running = true;
    if let Some(status) = step.run_finished {
        let mut finished = run.clone();
        finished.status = status;
        commands.push(CoreCommand::FinishRun(RunReport::new(
            finished,
            scheduler.task_states(),
        )));
        keep_running = false;
    }

    CoreStep {
        commands,
        keep_running,
    }
}
