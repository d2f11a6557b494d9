// src/state/memory.rs

//! In-process state backend.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;

use super::error::{self, StateError};
use super::model::{Run, RunStatus, TaskAttempt, Watermark, WatermarkPosition};
use super::{AppendAction, RunLedger, WatermarkStore, check_append};

#[derive(Debug, Default)]
struct Inner {
    runs: BTreeMap<String, Run>,
    /// Per run, attempts in creation order.
    attempts: HashMap<String, Vec<TaskAttempt>>,
    watermarks: HashMap<String, Watermark>,
}

/// Ledger and watermark store held in memory; lost when the process exits.
#[derive(Debug, Default)]
pub struct InMemoryState {
    inner: Mutex<Inner>,
}

impl InMemoryState {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> error::Result<MutexGuard<'_, Inner>> {
        self.inner.lock().map_err(|_| StateError::LockPoisoned)
    }
}

impl RunLedger for InMemoryState {
    fn begin_run(&self, run: &Run) -> error::Result<()> {
        let mut inner = self.lock()?;
        if let Some(existing) = inner.runs.get_mut(&run.run_id) {
            if existing.status.is_terminal() {
                return Err(StateError::RunAlreadyTerminal(run.run_id.clone()));
            }
            existing.status = run.status;
            return Ok(());
        }
        inner.runs.insert(run.run_id.clone(), run.clone());
        Ok(())
    }

    fn finish_run(&self, run_id: &str, status: RunStatus) -> error::Result<()> {
        let mut inner = self.lock()?;
        let run = inner
            .runs
            .get_mut(run_id)
            .ok_or_else(|| StateError::UnknownRun(run_id.to_string()))?;
        if run.status.is_terminal() {
            return Err(StateError::RunAlreadyTerminal(run_id.to_string()));
        }
        run.status = status;
        Ok(())
    }

    fn run(&self, run_id: &str) -> error::Result<Option<Run>> {
        Ok(self.lock()?.runs.get(run_id).cloned())
    }

    fn latest_run(&self, pipeline_id: &str) -> error::Result<Option<Run>> {
        Ok(self
            .lock()?
            .runs
            .values()
            .filter(|r| r.pipeline_id == pipeline_id)
            .max_by_key(|r| r.logical_ts)
            .cloned())
    }

    fn record(&self, attempt: &TaskAttempt) -> error::Result<()> {
        let mut inner = self.lock()?;
        let entries = inner.attempts.entry(attempt.run_id.clone()).or_default();

        let latest_idx = entries
            .iter()
            .enumerate()
            .filter(|(_, a)| a.task_name == attempt.task_name)
            .max_by_key(|(_, a)| a.attempt_number)
            .map(|(idx, _)| idx);

        match check_append(latest_idx.map(|i| &entries[i]), attempt)? {
            AppendAction::Insert => entries.push(attempt.clone()),
            AppendAction::Complete => {
                if let Some(idx) = latest_idx {
                    let entry = &mut entries[idx];
                    entry.status = attempt.status;
                    entry.ended_at = attempt.ended_at;
                    entry.error = attempt.error.clone();
                }
            }
        }
        Ok(())
    }

    fn history(&self, run_id: &str) -> error::Result<Vec<TaskAttempt>> {
        Ok(self
            .lock()?
            .attempts
            .get(run_id)
            .cloned()
            .unwrap_or_default())
    }
}

impl WatermarkStore for InMemoryState {
    fn get(&self, source_name: &str) -> error::Result<Option<Watermark>> {
        Ok(self.lock()?.watermarks.get(source_name).cloned())
    }

    fn set(&self, source_name: &str, position: &WatermarkPosition) -> error::Result<()> {
        self.lock()?.watermarks.insert(
            source_name.to_string(),
            Watermark {
                source_name: source_name.to_string(),
                position: position.clone(),
                updated_at: Utc::now(),
            },
        );
        Ok(())
    }

    fn compare_and_set(
        &self,
        source_name: &str,
        expected: Option<&WatermarkPosition>,
        new: &WatermarkPosition,
    ) -> error::Result<bool> {
        let mut inner = self.lock()?;
        let current = inner.watermarks.get(source_name).map(|w| &w.position);
        if current != expected {
            return Ok(false);
        }
        inner.watermarks.insert(
            source_name.to_string(),
            Watermark {
                source_name: source_name.to_string(),
                position: new.clone(),
                updated_at: Utc::now(),
            },
        );
        Ok(true)
    }
}
