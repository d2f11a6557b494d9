#![allow(dead_code)]

use std::error::Error;

use eltflow::state::{AttemptStatus, RunLedger, TaskAttempt};

pub use eltflow_test_utils::init_tracing;

pub type TestResult = Result<(), Box<dyn Error>>;

/// Ledger entries of one task, in creation order.
pub fn attempts_of(ledger: &dyn RunLedger, run_id: &str, task: &str) -> Vec<TaskAttempt> {
    ledger
        .history(run_id)
        .expect("ledger history should be readable")
        .into_iter()
        .filter(|a| a.task_name == task)
        .collect()
}

/// `(attempt_number, status)` pairs of one task.
pub fn statuses_of(ledger: &dyn RunLedger, run_id: &str, task: &str) -> Vec<(u32, AttemptStatus)> {
    attempts_of(ledger, run_id, task)
        .into_iter()
        .map(|a| (a.attempt_number, a.status))
        .collect()
}
