// src/engine/runtime.rs

use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::dag::{DispatchedTask, SkippedTask};
use crate::errors::{EltflowError, Result};
use crate::exec::ExecutorBackend;
use crate::state::{RunLedger, TaskAttempt};

use super::core::CoreRuntime;
use super::{CoreCommand, CoreStep, RunReport, RuntimeEvent, TaskName};

/// How the runtime seeds the scheduler.
#[derive(Debug, Clone)]
pub enum RunStart {
    Fresh,
    /// Continue from ledger history (no `running` attempts left in it).
    Resume(Vec<TaskAttempt>),
}

/// A run stopped by an error before it reached a terminal status.
#[derive(Debug)]
pub struct RunAbort {
    /// Task states at the moment of the abort; the run status is `Failed`.
    pub report: RunReport,
    pub error: EltflowError,
}

/// Drives the scheduler in response to `RuntimeEvent`s, and delegates task
/// execution to an `ExecutorBackend`.
///
/// This is an IO shell around `CoreRuntime`, which contains all the run
/// semantics. This struct handles async IO: reading events from the channel,
/// dispatching tasks, writing skipped attempts and reacting to cancellation.
pub struct Runtime<E: ExecutorBackend> {
    core: CoreRuntime,
    event_rx: mpsc::Receiver<RuntimeEvent>,
    executor: E,
    ledger: Arc<dyn RunLedger>,
    cancel: CancellationToken,
    /// Task whose state write aborted the run, if any.
    culprit: Option<TaskName>,
}

impl<E: ExecutorBackend> fmt::Debug for Runtime<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("core", &self.core)
            .finish_non_exhaustive()
    }
}

impl<E: ExecutorBackend> Runtime<E> {
    pub fn new(
        core: CoreRuntime,
        event_rx: mpsc::Receiver<RuntimeEvent>,
        executor: E,
        ledger: Arc<dyn RunLedger>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            core,
            event_rx,
            executor,
            ledger,
            cancel,
            culprit: None,
        }
    }

    /// Main event loop.
    ///
    /// - Seeds the run and dispatches the first ready tasks.
    /// - Consumes `RuntimeEvent`s from `event_rx` and feeds them to the core.
    /// - Executes the commands the core returns.
    /// - Turns the cancellation token into one `CancelRequested` event.
    ///
    /// Returns the final report. On any error the cancellation token is
    /// fired so in-flight tasks stop, and a `Failed` snapshot of the run is
    /// returned alongside the error.
    pub async fn run(mut self, start: RunStart) -> std::result::Result<RunReport, RunAbort> {
        match self.drive(start).await {
            Ok(report) => Ok(report),
            Err(error) => {
                warn!(
                    run_id = %self.core.run().run_id,
                    task = self.culprit.as_deref().unwrap_or("-"),
                    error = %error,
                    "run aborted; cancelling in-flight work"
                );
                self.cancel.cancel();
                let report = self.core.abort_report(self.culprit.as_deref());
                Err(RunAbort { report, error })
            }
        }
    }

    async fn drive(&mut self, start: RunStart) -> Result<RunReport> {
        let run_id = self.core.run().run_id.clone();
        info!(run_id = %run_id, "eltflow runtime started");

        let first = match start {
            RunStart::Fresh => self.core.start(),
            RunStart::Resume(history) => self.core.resume(&history),
        };
        if let Some(report) = self.apply(first).await? {
            return Ok(report);
        }

        let mut cancel_seen = false;
        loop {
            let event = tokio::select! {
                _ = self.cancel.cancelled(), if !cancel_seen => {
                    cancel_seen = true;
                    RuntimeEvent::CancelRequested
                }
                event = self.event_rx.recv() => match event {
                    Some(e) => e,
                    None => {
                        return Err(EltflowError::Other(anyhow::anyhow!(
                            "runtime event channel closed before run '{run_id}' finished"
                        )));
                    }
                },
            };

            debug!(?event, "runtime received event");

            if let RuntimeEvent::Fatal { task, error } = event {
                self.culprit = Some(task);
                return Err(error);
            }

            let step = self.core.step(event);
            if let Some(report) = self.apply(step).await? {
                info!(run_id = %run_id, status = %report.status(), "runtime exiting");
                return Ok(report);
            }
        }
    }

    /// Execute the commands of one core step; returns the report when the run
    /// finished.
    async fn apply(&mut self, step: CoreStep) -> Result<Option<RunReport>> {
        let mut report = None;
        for command in step.commands {
            match command {
                CoreCommand::RecordSkipped(skipped) => self.record_skipped(&skipped)?,
                CoreCommand::DispatchTasks(tasks) => self.spawn_ready(tasks).await?,
                CoreCommand::FinishRun(r) => report = Some(r),
            }
        }
        if !step.keep_running && report.is_none() {
            return Err(EltflowError::Other(anyhow::anyhow!(
                "core stopped without finishing the run"
            )));
        }
        Ok(report)
    }

    fn record_skipped(&mut self, skipped: &[SkippedTask]) -> Result<()> {
        let run_id = &self.core.run().run_id;
        for task in skipped {
            info!(task = %task.name, cause = %task.cause, "task skipped");
            let attempt = TaskAttempt::skipped(run_id, &task.name, task.attempt_number, &task.cause);
            if let Err(e) = self.ledger.record(&attempt) {
                self.culprit = Some(task.name.clone());
                return Err(EltflowError::LedgerWrite(e));
            }
        }
        Ok(())
    }

    async fn spawn_ready(&mut self, tasks: Vec<DispatchedTask>) -> Result<()> {
        if tasks.is_empty() {
            return Ok(());
        }

        let names: Vec<_> = tasks.iter().map(|t| t.name()).collect();
        debug!(?names, "spawning ready tasks");

        self.executor.spawn_ready_tasks(tasks).await
    }
}
