// src/engine/pipeline.rs

//! One pipeline: its graph plus everything a run needs.

use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::adapters::{Adapters, NoopNotifier, Notifier};
use crate::dag::{Scheduler, TaskGraph};
use crate::errors::{EltflowError, Result};
use crate::exec::{AdapterExecutorBackend, ExecutorBackend, TaskEnv};
use crate::state::{AttemptStatus, Run, RunLedger, RunStatus, TaskAttempt, WatermarkStore};
use crate::trigger::RunTrigger;

use super::core::CoreRuntime;
use super::runtime::{RunAbort, RunStart, Runtime};
use super::{RunReport, RuntimeEvent};

/// Error recorded on attempts left `running` by a previous process.
pub const INTERRUPTED_ERROR: &str = "interrupted: process stopped before the attempt finished";

/// Capacity of the runtime event channel.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// A validated pipeline bound to its state stores and adapters.
pub struct Pipeline {
    pub id: String,
    pub graph: Arc<TaskGraph>,
    pub max_concurrency: usize,
    pub ledger: Arc<dyn RunLedger>,
    pub watermarks: Arc<dyn WatermarkStore>,
    pub adapters: Arc<Adapters>,
    pub notifier: Arc<dyn Notifier>,
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("id", &self.id)
            .field("tasks", &self.graph.len())
            .field("max_concurrency", &self.max_concurrency)
            .field("adapters", &self.adapters)
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    pub fn new(
        id: impl Into<String>,
        graph: Arc<TaskGraph>,
        ledger: Arc<dyn RunLedger>,
        watermarks: Arc<dyn WatermarkStore>,
        adapters: Adapters,
    ) -> Self {
        Self {
            id: id.into(),
            graph,
            max_concurrency: 4,
            ledger,
            watermarks,
            adapters: Arc::new(adapters),
            notifier: Arc::new(NoopNotifier),
        }
    }

    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency.max(1);
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Execute (or resume) the run for `trigger` against the real adapters.
    ///
    /// The run gets a child of `cancel`: cancelling `cancel` stops the run,
    /// while an aborted run only cancels its own tasks.
    pub async fn execute(&self, trigger: &RunTrigger, cancel: CancellationToken) -> Result<RunReport> {
        let cancel = cancel.child_token();
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let env = Arc::new(TaskEnv {
            ledger: Arc::clone(&self.ledger),
            watermarks: Arc::clone(&self.watermarks),
            adapters: Arc::clone(&self.adapters),
            cancel: cancel.clone(),
        });
        let backend = AdapterExecutorBackend::new(event_tx, env);
        self.execute_with(trigger, cancel, backend, event_rx).await
    }

    /// Execute the run with a caller-supplied executor backend.
    ///
    /// `event_rx` must be the receiving end of the channel the backend
    /// reports `RuntimeEvent`s on.
    pub async fn execute_with<E: ExecutorBackend>(
        &self,
        trigger: &RunTrigger,
        cancel: CancellationToken,
        backend: E,
        event_rx: mpsc::Receiver<RuntimeEvent>,
    ) -> Result<RunReport> {
        let run = Run {
            run_id: trigger.run_id(),
            pipeline_id: self.id.clone(),
            logical_ts: trigger.logical_ts,
            status: RunStatus::Running,
        };

        let start = self.prepare(&run)?;
        self.ledger.begin_run(&run).map_err(EltflowError::LedgerWrite)?;
        info!(
            pipeline = %self.id,
            run_id = %run.run_id,
            logical_ts = %run.logical_ts,
            resumed = matches!(start, RunStart::Resume(_)),
            "run started"
        );

        let core = CoreRuntime::new(
            Scheduler::new(Arc::clone(&self.graph), self.max_concurrency),
            run.clone(),
        );
        let runtime = Runtime::new(core, event_rx, backend, Arc::clone(&self.ledger), cancel);

        match runtime.run(start).await {
            Ok(report) => {
                self.ledger
                    .finish_run(&run.run_id, report.status())
                    .map_err(EltflowError::LedgerWrite)?;
                self.notifier.notify(&report).await;
                Ok(report)
            }
            Err(RunAbort { report, error }) => {
                if let Err(e) = self.ledger.finish_run(&run.run_id, RunStatus::Failed) {
                    warn!(run_id = %run.run_id, error = %e, "could not mark aborted run as failed");
                }
                self.notifier.notify(&report).await;
                Err(error)
            }
        }
    }

    /// Decide between a fresh run and a resume, closing dangling attempts.
    fn prepare(&self, run: &Run) -> Result<RunStart> {
        let Some(existing) = self.ledger.run(&run.run_id)? else {
            return Ok(RunStart::Fresh);
        };
        if existing.status.is_terminal() {
            return Err(EltflowError::RunAlreadyFinished(run.run_id.clone()));
        }

        let mut history = self.ledger.history(&run.run_id)?;
        for attempt in history.iter_mut().filter(|a| a.status == AttemptStatus::Running) {
            warn!(
                task = %attempt.task_name,
                attempt = attempt.attempt_number,
                "closing attempt left running by a previous process"
            );
            let closed: TaskAttempt = attempt.clone().failed(INTERRUPTED_ERROR);
            self.ledger.record(&closed).map_err(EltflowError::LedgerWrite)?;
            *attempt = closed;
        }

        Ok(RunStart::Resume(history))
    }
}
