// src/lib.rs

pub mod adapters;
pub mod cli;
pub mod config;
pub mod dag;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod logging;
pub mod quality;
pub mod state;
pub mod trigger;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, SubsecRound, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::adapters::LogNotifier;
use crate::cli::{CliArgs, Command};
use crate::config::{ConfigFile, PipelineSettings, build_adapters, load_and_validate};
use crate::dag::TaskAction;
use crate::engine::Pipeline;
use crate::errors::EltflowError;
use crate::state::{InMemoryState, RunLedger, SqliteState, WatermarkStore};
use crate::trigger::clock::MAX_CATCHUP_TICKS;
use crate::trigger::{CatchupBehaviour, Clock, RunQueue, RunTrigger, parse_timestamp};

/// High-level entry point used by `main.rs`. Returns the process exit code.
///
/// This wires together:
/// - config loading and adapter construction
/// - the state backend (SQLite or in-memory)
/// - the pipeline engine, once or on its schedule
/// - Ctrl-C handling
pub async fn run(args: CliArgs) -> Result<i32> {
    let config_path = PathBuf::from(&args.config);
    let cfg = load_and_validate(&config_path)?;

    match args.command {
        Command::Validate => {
            print_plan(&cfg);
            Ok(0)
        }
        Command::Run {
            pipeline_id,
            from,
            dry_run,
        } => {
            ensure_pipeline_id(&cfg, &pipeline_id)?;
            let logical_ts = match from.as_deref() {
                Some(ts) => parse_timestamp(ts)?,
                None => Utc::now().trunc_subsecs(0),
            };
            let trigger = RunTrigger::manual(logical_ts);

            if dry_run {
                println!("eltflow dry-run: {}", trigger.run_id());
                print_plan(&cfg);
                return Ok(0);
            }

            let pipeline = build_pipeline(&cfg)?;
            let cancel = cancel_on_ctrl_c();
            let report = pipeline.execute(&trigger, cancel).await?;
            println!("{} {}", report.run.run_id, report.status());
            Ok(report.exit_code())
        }
        Command::Schedule { pipeline_id } => {
            ensure_pipeline_id(&cfg, &pipeline_id)?;
            let pipeline = build_pipeline(&cfg)?;
            run_schedule(&cfg, &pipeline, cancel_on_ctrl_c()).await?;
            Ok(0)
        }
        Command::History { run_id } => {
            let (ledger, _) = open_state(cfg.pipeline.state_path.as_deref())?;
            print_history(ledger.as_ref(), &run_id)
        }
    }
}

fn ensure_pipeline_id(cfg: &ConfigFile, pipeline_id: &str) -> Result<()> {
    if cfg.pipeline.id != pipeline_id {
        return Err(EltflowError::ConfigError(format!(
            "unknown pipeline '{pipeline_id}' (config defines '{}')",
            cfg.pipeline.id
        ))
        .into());
    }
    Ok(())
}

/// Open the ledger and watermark store. Both live in the same backend.
pub fn open_state(
    state_path: Option<&Path>,
) -> Result<(Arc<dyn RunLedger>, Arc<dyn WatermarkStore>)> {
    match state_path {
        Some(path) => {
            let state = Arc::new(SqliteState::open(path).map_err(EltflowError::from)?);
            info!(path = %path.display(), "using sqlite state");
            let ledger: Arc<dyn RunLedger> = state.clone();
            let watermarks: Arc<dyn WatermarkStore> = state;
            Ok((ledger, watermarks))
        }
        None => {
            warn!("no state_path configured; ledger and watermarks are kept in memory");
            let state = Arc::new(InMemoryState::new());
            let ledger: Arc<dyn RunLedger> = state.clone();
            let watermarks: Arc<dyn WatermarkStore> = state;
            Ok((ledger, watermarks))
        }
    }
}

/// Assemble a [`Pipeline`] from a validated config.
pub fn build_pipeline(cfg: &ConfigFile) -> Result<Pipeline> {
    let (ledger, watermarks) = open_state(cfg.pipeline.state_path.as_deref())?;
    let adapters = build_adapters(cfg)?;
    debug!(?adapters, "adapters ready");

    Ok(Pipeline::new(
        cfg.pipeline.id.as_str(),
        Arc::clone(&cfg.graph),
        ledger,
        watermarks,
        adapters,
    )
    .with_max_concurrency(cfg.pipeline.max_concurrency)
    .with_notifier(Arc::new(LogNotifier)))
}

/// Cancel the returned token on the first Ctrl-C.
fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for Ctrl+C");
            return;
        }
        info!("Ctrl+C received; cancelling");
        token.cancel();
    });
    cancel
}

/// Run the pipeline on its cron schedule until `cancel` fires.
///
/// An unfinished scheduled run found in the ledger is resumed before any
/// new tick is considered. Ticks that already have a terminal run are
/// skipped.
pub async fn run_schedule(
    cfg: &ConfigFile,
    pipeline: &Pipeline,
    cancel: CancellationToken,
) -> Result<()> {
    run_schedule_with(&cfg.pipeline, pipeline, cancel, Utc::now).await
}

/// [`run_schedule`] with an injected wall clock.
pub async fn run_schedule_with(
    settings: &PipelineSettings,
    pipeline: &Pipeline,
    cancel: CancellationToken,
    now: impl Fn() -> DateTime<Utc>,
) -> Result<()> {
    let clock = Clock::parse(&settings.schedule)?;
    let catchup = settings.catchup;
    let mut queue = RunQueue::new(CatchupBehaviour::from_catchup(catchup), MAX_CATCHUP_TICKS);

    info!(
        pipeline = %pipeline.id,
        schedule = %clock.expression(),
        catchup,
        "scheduler started"
    );

    let latest = pipeline
        .ledger
        .latest_run(&pipeline.id)
        .map_err(EltflowError::from)?;
    let mut last_run = latest.as_ref().map(|run| run.logical_ts);
    if let Some(run) = latest.filter(|run| !run.status.is_terminal()) {
        if run.run_id == RunTrigger::scheduled(run.logical_ts).run_id() {
            info!(run_id = %run.run_id, "resuming unfinished scheduled run");
            execute_tick(pipeline, run.logical_ts, &cancel).await?;
        }
    }

    while !cancel.is_cancelled() {
        for tick in clock.due_ticks(last_run, now(), catchup, settings.start_date) {
            queue.record_tick(tick);
        }

        while let Some(tick) = queue.pop_next() {
            if cancel.is_cancelled() {
                break;
            }
            execute_tick(pipeline, tick, &cancel).await?;
            last_run = last_run.max(Some(tick));
        }

        let current = now();
        let Some(next) = clock.next_after(&current) else {
            warn!(schedule = %clock.expression(), "schedule has no future ticks; stopping");
            break;
        };
        let wait = (next - current).to_std().unwrap_or_default();
        debug!(next = %next, "sleeping until next tick");

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(wait) => {}
        }
    }

    info!(pipeline = %pipeline.id, "scheduler stopped");
    Ok(())
}

/// Execute (or resume) the scheduled run for `tick`.
async fn execute_tick(
    pipeline: &Pipeline,
    tick: DateTime<Utc>,
    cancel: &CancellationToken,
) -> Result<()> {
    match pipeline.execute(&RunTrigger::scheduled(tick), cancel.clone()).await {
        Ok(report) => {
            info!(run_id = %report.run.run_id, status = %report.status(), "scheduled run finished");
            Ok(())
        }
        Err(EltflowError::RunAlreadyFinished(run_id)) => {
            debug!(%run_id, "tick already has a finished run; skipping");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

/// Print the ledger entries of one run. Exit code 1 when the run is unknown.
fn print_history(ledger: &dyn RunLedger, run_id: &str) -> Result<i32> {
    let Some(run) = ledger.run(run_id).map_err(EltflowError::from)? else {
        eprintln!("run '{run_id}' not found");
        return Ok(1);
    };

    println!(
        "{} pipeline={} logical_ts={} status={}",
        run.run_id,
        run.pipeline_id,
        run.logical_ts.to_rfc3339(),
        run.status
    );
    for attempt in ledger.history(run_id).map_err(EltflowError::from)? {
        let ended = attempt
            .ended_at
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "  {:<24} #{:<2} {:<9} {} -> {}{}",
            attempt.task_name,
            attempt.attempt_number,
            attempt.status,
            attempt.started_at.to_rfc3339(),
            ended,
            attempt
                .error
                .as_deref()
                .map(|e| format!("  ({e})"))
                .unwrap_or_default()
        );
    }
    Ok(0)
}

/// Print tasks batch by batch, in execution order.
fn print_plan(cfg: &ConfigFile) {
    println!("pipeline: {}", cfg.pipeline.id);
    println!("  schedule = {}", cfg.pipeline.schedule);
    println!("  catchup = {}", cfg.pipeline.catchup);
    println!("  max_concurrency = {}", cfg.pipeline.max_concurrency);
    println!();

    for (i, batch) in cfg.graph.topological_batches().enumerate() {
        println!("batch {}:", i + 1);
        for name in batch {
            let Some(node) = cfg.graph.node(&name) else {
                continue;
            };
            let detail = match &node.action {
                TaskAction::Sync { source } => format!("source={source}"),
                TaskAction::Transform { op, select } => match select {
                    Some(sel) => format!("op={op:?} select={sel}"),
                    None => format!("op={op:?}"),
                },
                TaskAction::QualityGate { checks } => format!("checks={}", checks.len()),
            };
            println!("  - {name} [{}] {detail}", node.action.kind());
            if !node.dependencies.is_empty() {
                println!("      after: {:?}", node.dependencies);
            }
            println!("      max_attempts: {}", node.retry_policy.max_attempts);
        }
    }

    debug!("plan printed (no execution)");
}
