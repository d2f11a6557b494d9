// tests/watermarks.rs

mod common;
use crate::common::{TestResult, attempts_of, init_tracing, statuses_of};

use std::sync::Arc;

use chrono::Duration as ChronoDuration;
use tokio_util::sync::CancellationToken;

use eltflow::adapters::{
    AdapterError, AdapterFuture, Adapters, AttemptContext, SyncAdapter, SyncRequest, SyncResult,
};
use eltflow::dag::TaskNode;
use eltflow::engine::pipeline::INTERRUPTED_ERROR;
use eltflow::errors::EltflowError;
use eltflow::state::{
    AttemptStatus, InMemoryState, Run, RunLedger, RunStatus, TaskAttempt, WatermarkPosition,
    WatermarkStore,
};
use eltflow::trigger::RunTrigger;
use eltflow_test_utils::builders::{PipelineHarness, fast_retry, graph, logical_ts, manual_trigger};
use eltflow_test_utils::fake_adapters::ScriptedSyncAdapter;
use eltflow_test_utils::with_timeout;

fn extract_graph(attempts: u32) -> Arc<eltflow::dag::TaskGraph> {
    graph([TaskNode::sync("extract", "orders").with_retry_policy(fast_retry(attempts))])
}

#[tokio::test]
async fn failed_extract_leaves_watermark_unchanged() -> TestResult {
    init_tracing();

    let harness = PipelineHarness::new(
        extract_graph(2),
        Adapters::new().with_sync(
            "orders",
            Arc::new(ScriptedSyncAdapter::failing(AdapterError::retryable("timeout"))),
        ),
    );
    harness.state.set("orders", &WatermarkPosition::Offset(10))?;

    let report = with_timeout(
        harness
            .pipeline
            .execute(&manual_trigger(), CancellationToken::new()),
    )
    .await?;

    assert_eq!(report.status(), RunStatus::Failed);
    assert_eq!(
        harness.state.get("orders")?.map(|w| w.position),
        Some(WatermarkPosition::Offset(10))
    );
    Ok(())
}

#[tokio::test]
async fn next_run_extracts_from_previous_watermark() -> TestResult {
    init_tracing();

    let sync = Arc::new(ScriptedSyncAdapter::new(vec![
        Ok(SyncResult {
            rows_synced: 100,
            watermark_position: Some(WatermarkPosition::Offset(100)),
        }),
        Ok(SyncResult {
            rows_synced: 20,
            watermark_position: Some(WatermarkPosition::Offset(120)),
        }),
    ]));
    let harness = PipelineHarness::new(
        extract_graph(1),
        Adapters::new().with_sync("orders", sync.clone()),
    );

    let first = RunTrigger::scheduled(logical_ts());
    let second = RunTrigger::scheduled(logical_ts() + ChronoDuration::hours(1));
    with_timeout(harness.pipeline.execute(&first, CancellationToken::new())).await?;
    with_timeout(harness.pipeline.execute(&second, CancellationToken::new())).await?;

    assert_eq!(
        sync.watermarks_seen(),
        vec![None, Some(WatermarkPosition::Offset(100))]
    );
    assert_eq!(
        harness.state.get("orders")?.map(|w| w.position),
        Some(WatermarkPosition::Offset(120))
    );
    Ok(())
}

#[tokio::test]
async fn sync_without_position_keeps_watermark() -> TestResult {
    init_tracing();

    let sync = ScriptedSyncAdapter::new(vec![Ok(SyncResult {
        rows_synced: 0,
        watermark_position: None,
    })]);
    let harness = PipelineHarness::new(
        extract_graph(1),
        Adapters::new().with_sync("orders", Arc::new(sync)),
    );
    harness.state.set("orders", &WatermarkPosition::Offset(5))?;

    let report = with_timeout(
        harness
            .pipeline
            .execute(&manual_trigger(), CancellationToken::new()),
    )
    .await?;

    assert_eq!(report.status(), RunStatus::Succeeded);
    assert_eq!(
        harness.state.get("orders")?.map(|w| w.position),
        Some(WatermarkPosition::Offset(5))
    );
    Ok(())
}

#[tokio::test]
async fn crash_mid_attempt_reextracts_from_old_watermark() -> TestResult {
    init_tracing();

    // A previous process started attempt 1 and died before finishing it.
    let state = Arc::new(InMemoryState::new());
    let trigger = manual_trigger();
    let run_id = trigger.run_id();
    state.begin_run(&Run {
        run_id: run_id.clone(),
        pipeline_id: "marketplace_elt_pipeline".into(),
        logical_ts: trigger.logical_ts,
        status: RunStatus::Running,
    })?;
    state.record(&TaskAttempt::start(&run_id, "extract", 1))?;
    state.set("orders", &WatermarkPosition::Offset(10))?;

    let sync = Arc::new(ScriptedSyncAdapter::succeeding(3, 13));
    let harness = PipelineHarness::with_state(
        extract_graph(1),
        Adapters::new().with_sync("orders", sync.clone()),
        state,
    );

    let report = with_timeout(harness.pipeline.execute(&trigger, CancellationToken::new())).await?;

    assert_eq!(report.status(), RunStatus::Succeeded);
    assert_eq!(sync.watermarks_seen(), vec![Some(WatermarkPosition::Offset(10))]);
    assert_eq!(
        statuses_of(harness.state.as_ref(), &run_id, "extract"),
        vec![(1, AttemptStatus::Failed), (2, AttemptStatus::Succeeded)]
    );
    let interrupted = &attempts_of(harness.state.as_ref(), &run_id, "extract")[0];
    assert_eq!(interrupted.error.as_deref(), Some(INTERRUPTED_ERROR));
    assert_eq!(
        harness.state.get("orders")?.map(|w| w.position),
        Some(WatermarkPosition::Offset(13))
    );
    Ok(())
}

/// Moves the stored watermark behind the executor's back during the sync.
struct RacingSync {
    state: Arc<InMemoryState>,
}

impl SyncAdapter for RacingSync {
    fn trigger<'a>(
        &'a self,
        _ctx: &'a AttemptContext,
        request: &'a SyncRequest,
    ) -> AdapterFuture<'a, SyncResult> {
        Box::pin(async move {
            self.state
                .set(&request.source, &WatermarkPosition::Offset(99))
                .map_err(|e| AdapterError::fatal(e.to_string()))?;
            Ok(SyncResult {
                rows_synced: 1,
                watermark_position: Some(WatermarkPosition::Offset(50)),
            })
        })
    }
}

#[tokio::test]
async fn concurrent_watermark_change_aborts_the_run() -> TestResult {
    init_tracing();

    let state = Arc::new(InMemoryState::new());
    let harness = PipelineHarness::with_state(
        extract_graph(1),
        Adapters::new().with_sync(
            "orders",
            Arc::new(RacingSync {
                state: state.clone(),
            }),
        ),
        state,
    );

    let result = with_timeout(
        harness
            .pipeline
            .execute(&manual_trigger(), CancellationToken::new()),
    )
    .await;

    assert!(
        matches!(result, Err(EltflowError::WatermarkWrite { ref source_name, .. }) if source_name == "orders"),
        "got: {result:?}"
    );
    assert_eq!(
        harness.state.get("orders")?.map(|w| w.position),
        Some(WatermarkPosition::Offset(99))
    );
    let run = harness
        .state
        .run(&manual_trigger().run_id())?
        .expect("run recorded");
    assert_eq!(run.status, RunStatus::Failed);

    let reports = harness.notifier.reports();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].status(), RunStatus::Failed);
    assert_eq!(reports[0].failed_tasks, vec!["extract".to_string()]);
    Ok(())
}
