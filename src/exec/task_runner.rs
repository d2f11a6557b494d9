// src/exec/task_runner.rs

//! Runs one dispatched task: the retry loop around a single adapter call.

use std::cmp::Ordering;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::adapters::{
    AdapterError, Adapters, AttemptContext, SyncRequest, SyncResult, TestOutcome,
};
use crate::dag::{DispatchedTask, TaskAction, TaskNode, TransformOp};
use crate::engine::{RuntimeEvent, TaskOutcome};
use crate::errors::{EltflowError, Result};
use crate::quality::QualityGate;
use crate::state::{RunLedger, TaskAttempt, WatermarkPosition, WatermarkStore};

/// Shared services every task execution needs.
pub struct TaskEnv {
    pub ledger: Arc<dyn RunLedger>,
    pub watermarks: Arc<dyn WatermarkStore>,
    pub adapters: Arc<Adapters>,
    /// Run-level cancellation: no new attempt starts once it fires.
    pub cancel: CancellationToken,
}

/// What a successful adapter call produced.
enum ActionOutput {
    Synced(SyncResult),
    Done,
}

/// Execute `task` and report the result to the runtime.
///
/// Task failures become `TaskFinished` with a failed outcome. State errors
/// (ledger or watermark writes) become `Fatal`, which aborts the run.
pub async fn run_task(
    task: DispatchedTask,
    env: Arc<TaskEnv>,
    runtime_tx: mpsc::Sender<RuntimeEvent>,
) {
    let name = task.name().to_string();
    let event = match execute(&task, &env).await {
        Ok(outcome) => RuntimeEvent::TaskFinished {
            task: name.clone(),
            outcome,
        },
        Err(err) => {
            error!(task = %name, run_id = %task.run_id, error = %err, "task aborted by state error");
            RuntimeEvent::Fatal {
                task: name.clone(),
                error: err,
            }
        }
    };

    if runtime_tx.send(event).await.is_err() {
        debug!(task = %name, "runtime channel closed before task result was delivered");
    }
}

/// The retry loop.
///
/// Attempt numbers start at `task.first_attempt`; at most
/// `retry_policy.max_attempts` attempts are made. Every attempt is recorded
/// as `running` before the adapter call and completed afterwards.
pub async fn execute(task: &DispatchedTask, env: &TaskEnv) -> Result<TaskOutcome> {
    let node = &task.node;
    let policy = &node.retry_policy;
    let last_attempt = task.first_attempt + policy.max_attempts.max(1) - 1;
    let mut attempt = task.first_attempt;
    let mut failures = 0u32;

    loop {
        if env.cancel.is_cancelled() && failures == 0 {
            let record = TaskAttempt::start(&task.run_id, &node.name, attempt)
                .failed("run cancelled before the attempt started");
            env.ledger.record(&record).map_err(EltflowError::LedgerWrite)?;
            return Ok(TaskOutcome::Failed {
                attempts: attempt,
                error: "run cancelled".to_string(),
                fatal: true,
            });
        }

        let watermark = match node.sync_source() {
            Some(source) => env.watermarks.get(source)?.map(|w| w.position),
            None => None,
        };

        let ctx = AttemptContext {
            run_id: task.run_id.clone(),
            task: node.name.clone(),
            attempt,
            logical_ts: task.logical_ts,
            cancel: env.cancel.clone(),
        };

        let running = TaskAttempt::start(&task.run_id, &node.name, attempt);
        env.ledger.record(&running).map_err(EltflowError::LedgerWrite)?;
        info!(task = %node.name, run_id = %task.run_id, attempt, "attempt started");

        match perform_with_timeout(node, &ctx, &env.adapters, watermark.clone()).await {
            Ok(output) => {
                env.ledger
                    .record(&running.succeeded())
                    .map_err(EltflowError::LedgerWrite)?;

                if let (ActionOutput::Synced(result), Some(source)) = (&output, node.sync_source()) {
                    info!(task = %node.name, source, rows = result.rows_synced, "sync finished");
                    if let Some(position) = &result.watermark_position {
                        advance_watermark(env.watermarks.as_ref(), source, watermark.as_ref(), position)?;
                    }
                }

                info!(task = %node.name, run_id = %task.run_id, attempt, "attempt succeeded");
                return Ok(TaskOutcome::Succeeded { attempts: attempt });
            }
            Err(err) => {
                env.ledger
                    .record(&running.failed(err.message.clone()))
                    .map_err(EltflowError::LedgerWrite)?;

                if !err.retryable || attempt >= last_attempt {
                    warn!(
                        task = %node.name,
                        run_id = %task.run_id,
                        attempt,
                        retryable = err.retryable,
                        error = %err,
                        "task failed"
                    );
                    return Ok(TaskOutcome::Failed {
                        attempts: attempt,
                        error: err.message,
                        fatal: !err.retryable,
                    });
                }

                failures += 1;
                let delay = policy.backoff_for(failures);
                warn!(
                    task = %node.name,
                    run_id = %task.run_id,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "attempt failed; retrying after backoff"
                );

                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = env.cancel.cancelled() => {
                        info!(task = %node.name, attempt, "run cancelled during backoff; not retrying");
                        return Ok(TaskOutcome::Failed {
                            attempts: attempt,
                            error: format!("{}; retry abandoned because the run was cancelled", err.message),
                            fatal: true,
                        });
                    }
                }
                attempt += 1;
            }
        }
    }
}

async fn perform_with_timeout(
    node: &TaskNode,
    ctx: &AttemptContext,
    adapters: &Adapters,
    watermark: Option<WatermarkPosition>,
) -> std::result::Result<ActionOutput, AdapterError> {
    match node.timeout {
        Some(limit) => match tokio::time::timeout(limit, perform(node, ctx, adapters, watermark)).await {
            Ok(result) => result,
            Err(_) => {
                let message = format!("attempt timed out after {limit:?}");
                if node.timeout_is_fatal {
                    Err(AdapterError::fatal(message))
                } else {
                    Err(AdapterError::retryable(message))
                }
            }
        },
        None => perform(node, ctx, adapters, watermark).await,
    }
}

/// One adapter call for the task's action.
async fn perform(
    node: &TaskNode,
    ctx: &AttemptContext,
    adapters: &Adapters,
    watermark: Option<WatermarkPosition>,
) -> std::result::Result<ActionOutput, AdapterError> {
    match &node.action {
        TaskAction::Sync { source } => {
            let adapter = adapters.sync.get(source).ok_or_else(|| {
                AdapterError::fatal(format!("no sync adapter configured for source '{source}'"))
            })?;
            let request = SyncRequest {
                source: source.clone(),
                watermark,
            };
            adapter.trigger(ctx, &request).await.map(ActionOutput::Synced)
        }

        TaskAction::Transform { op, select } => {
            let adapter = adapters
                .transform
                .as_ref()
                .ok_or_else(|| AdapterError::fatal("no transform adapter configured"))?;
            let select = select.as_deref();

            match op {
                TransformOp::Deps => adapter.deps(ctx).await?,
                TransformOp::Run => {
                    let result = adapter.run(ctx, select).await?;
                    if result.models_failed > 0 {
                        return Err(AdapterError::fatal(format!(
                            "{} of {} models failed to build",
                            result.models_failed,
                            result.models_built + result.models_failed
                        )));
                    }
                }
                TransformOp::Test => {
                    let outcomes = adapter.test(ctx, select).await?;
                    fail_on_failed_outcomes(&outcomes, "tests failed")?;
                }
                TransformOp::Freshness => {
                    let outcomes = adapter.freshness(ctx, select).await?;
                    fail_on_failed_outcomes(&outcomes, "sources are stale")?;
                }
            }
            Ok(ActionOutput::Done)
        }

        TaskAction::QualityGate { checks } => {
            let adapter = adapters
                .metrics
                .as_ref()
                .ok_or_else(|| AdapterError::fatal("no metric adapter configured"))?;

            let mut results = Vec::with_capacity(checks.len());
            for check in checks {
                let value = adapter.query(ctx, check).await?;
                let result = QualityGate::evaluate(check, value);
                info!(
                    task = %node.name,
                    check = %result.check_name,
                    metric = result.metric_value,
                    threshold = %result.threshold,
                    passed = result.passed,
                    "quality check evaluated"
                );
                results.push(result);
            }

            match QualityGate::failure_summary(&results) {
                Some(summary) => Err(AdapterError::fatal(summary)),
                None => Ok(ActionOutput::Done),
            }
        }
    }
}

/// `N of M <what>: a, b` when any outcome did not pass.
fn fail_on_failed_outcomes(outcomes: &[TestOutcome], what: &str) -> std::result::Result<(), AdapterError> {
    let failed: Vec<&str> = outcomes
        .iter()
        .filter(|o| !o.passed)
        .map(|o| o.name.as_str())
        .collect();
    if failed.is_empty() {
        return Ok(());
    }
    Err(AdapterError::fatal(format!(
        "{} of {} {what}: {}",
        failed.len(),
        outcomes.len(),
        failed.join(", ")
    )))
}

/// Compare-and-set the source's watermark from the position read before the
/// attempt. A moving position is logged even when it goes backwards.
fn advance_watermark(
    store: &dyn WatermarkStore,
    source: &str,
    expected: Option<&WatermarkPosition>,
    new: &WatermarkPosition,
) -> Result<()> {
    if let Some(previous) = expected {
        match new.partial_cmp(previous) {
            Some(Ordering::Less) => {
                warn!(source, from = %previous, to = %new, "watermark moves backwards");
            }
            None => {
                warn!(source, from = %previous, to = %new, "watermark changes kind");
            }
            _ => {}
        }
    }

    match store.compare_and_set(source, expected, new) {
        Ok(true) => {
            info!(source, position = %new, "watermark advanced");
            Ok(())
        }
        Ok(false) => Err(EltflowError::WatermarkWrite {
            source_name: source.to_string(),
            reason: "stored position changed while the sync was running".to_string(),
        }),
        Err(e) => Err(EltflowError::WatermarkWrite {
            source_name: source.to_string(),
            reason: e.to_string(),
        }),
    }
}
