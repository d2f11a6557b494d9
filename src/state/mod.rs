// src/state/mod.rs

//! Durable pipeline state: the run ledger and the watermark store.
//!
//! - [`RunLedger`] is the append-only record of runs and task attempts. It is
//!   the crash-recovery boundary: a restarted process rebuilds the ready-set
//!   of an unfinished run from [`RunLedger::history`].
//! - [`WatermarkStore`] keeps, per source, the last position an extract task
//!   loaded successfully.
//!
//! Two backends implement both traits: [`InMemoryState`] (tests, dry runs,
//! no `state_path`) and [`SqliteState`].

pub mod error;
pub mod memory;
pub mod model;
pub mod sqlite;

pub use error::StateError;
pub use memory::InMemoryState;
pub use model::{
    AttemptStatus, Run, RunStatus, TaskAttempt, Watermark, WatermarkPosition,
};
pub use sqlite::SqliteState;

/// Append-only store of runs and task attempts.
///
/// Implementations must be `Send + Sync`; workers share one instance behind
/// an `Arc<dyn RunLedger>`.
pub trait RunLedger: Send + Sync {
    /// Insert a run, or move an existing non-terminal run back to its new
    /// status (used when resuming). Fails for terminal runs.
    fn begin_run(&self, run: &Run) -> error::Result<()>;

    /// Set the terminal status of a run. A run can be finished once.
    fn finish_run(&self, run_id: &str, status: RunStatus) -> error::Result<()>;

    fn run(&self, run_id: &str) -> error::Result<Option<Run>>;

    /// Run with the greatest logical timestamp for a pipeline.
    fn latest_run(&self, pipeline_id: &str) -> error::Result<Option<Run>>;

    /// Record an attempt.
    ///
    /// A new `(run, task, attempt_number)` is appended; its number must exceed
    /// every number already recorded for that task. An existing `running`
    /// entry may be completed once with a terminal status. Nothing else is
    /// ever overwritten.
    fn record(&self, attempt: &TaskAttempt) -> error::Result<()>;

    /// All attempts of a run in creation order.
    fn history(&self, run_id: &str) -> error::Result<Vec<TaskAttempt>>;
}

/// Per-source extraction positions.
pub trait WatermarkStore: Send + Sync {
    fn get(&self, source_name: &str) -> error::Result<Option<Watermark>>;

    /// Unconditional upsert.
    fn set(&self, source_name: &str, position: &WatermarkPosition) -> error::Result<()>;

    /// Atomically replace the position only if the stored one equals
    /// `expected`. `expected = None` means "only if no watermark exists".
    ///
    /// Returns whether the write was applied.
    fn compare_and_set(
        &self,
        source_name: &str,
        expected: Option<&WatermarkPosition>,
        new: &WatermarkPosition,
    ) -> error::Result<bool>;
}

/// Checks shared by both backends before appending an attempt.
pub(crate) fn check_append(
    latest_for_task: Option<&TaskAttempt>,
    attempt: &TaskAttempt,
) -> error::Result<AppendAction> {
    match latest_for_task {
        Some(existing) if existing.attempt_number == attempt.attempt_number => {
            if existing.status.is_terminal() || !attempt.status.is_terminal() {
                Err(StateError::AttemptAlreadyTerminal {
                    run_id: attempt.run_id.clone(),
                    task: attempt.task_name.clone(),
                    attempt_number: attempt.attempt_number,
                })
            } else {
                Ok(AppendAction::Complete)
            }
        }
        Some(existing) if existing.attempt_number > attempt.attempt_number => {
            Err(StateError::AttemptOutOfOrder {
                run_id: attempt.run_id.clone(),
                task: attempt.task_name.clone(),
                attempt_number: attempt.attempt_number,
                latest: existing.attempt_number,
            })
        }
        _ if attempt.attempt_number == 0 => Err(StateError::AttemptOutOfOrder {
            run_id: attempt.run_id.clone(),
            task: attempt.task_name.clone(),
            attempt_number: 0,
            latest: 0,
        }),
        _ => Ok(AppendAction::Insert),
    }
}

/// What [`check_append`] allows the backend to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AppendAction {
    Insert,
    /// Close the existing `running` entry with the same number.
    Complete,
}
