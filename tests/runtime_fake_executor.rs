// tests/runtime_fake_executor.rs

mod common;
use crate::common::{TestResult, init_tracing, statuses_of};

use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio::time::{Duration, timeout};
use tokio_util::sync::CancellationToken;

use eltflow::adapters::Adapters;
use eltflow::dag::{TaskNode, TaskState, TransformOp};
use eltflow::engine::{RuntimeEvent, TaskOutcome};
use eltflow::state::{AttemptStatus, InMemoryState, Run, RunLedger, RunStatus, TaskAttempt};
use eltflow_test_utils::builders::{PipelineHarness, graph, manual_trigger, marketplace_graph};
use eltflow_test_utils::fake_executor::FakeExecutor;

fn failed(error: &str) -> TaskOutcome {
    TaskOutcome::Failed {
        attempts: 1,
        error: error.to_string(),
        fatal: true,
    }
}

#[tokio::test]
async fn runtime_with_fake_executor_runs_chain_in_order() -> TestResult {
    init_tracing();

    let harness = PipelineHarness::new(marketplace_graph(), Adapters::new());
    let (rt_tx, rt_rx) = mpsc::channel::<RuntimeEvent>(16);
    let executed = Arc::new(Mutex::new(Vec::new()));
    let executor = FakeExecutor::new(rt_tx, executed.clone());

    // Enforce an upper bound on how long this test may run.
    let report = timeout(
        Duration::from_secs(3),
        harness
            .pipeline
            .execute_with(&manual_trigger(), CancellationToken::new(), executor, rt_rx),
    )
    .await
    .expect("runtime did not finish within 3 seconds")?;

    assert_eq!(report.status(), RunStatus::Succeeded);
    let tasks_run: Vec<String> = executed.lock().unwrap().iter().map(|(n, _)| n.clone()).collect();
    assert_eq!(
        tasks_run,
        vec!["extract", "transform", "quality_gate", "mart_publish"]
    );
    Ok(())
}

#[tokio::test]
async fn ready_tasks_dispatch_in_name_order() -> TestResult {
    init_tracing();

    let g = graph([
        TaskNode::sync("extract_orders", "orders"),
        TaskNode::sync("extract_customers", "customers"),
        TaskNode::sync("extract_products", "products"),
    ]);
    let harness = PipelineHarness::new(g, Adapters::new()).with_max_concurrency(8);
    let (rt_tx, rt_rx) = mpsc::channel::<RuntimeEvent>(16);
    let executed = Arc::new(Mutex::new(Vec::new()));
    let executor = FakeExecutor::new(rt_tx, executed.clone());

    harness
        .pipeline
        .execute_with(&manual_trigger(), CancellationToken::new(), executor, rt_rx)
        .await?;

    let names: Vec<String> = executed.lock().unwrap().iter().map(|(n, _)| n.clone()).collect();
    assert_eq!(
        names,
        vec!["extract_customers", "extract_orders", "extract_products"]
    );
    Ok(())
}

#[tokio::test]
async fn run_on_upstream_failure_task_still_runs() -> TestResult {
    init_tracing();

    let g = graph([
        TaskNode::sync("extract", "orders"),
        TaskNode::transform("transform", TransformOp::Run, None).after("extract"),
        TaskNode::transform("cleanup", TransformOp::Run, Some("tmp"))
            .after("transform")
            .run_on_upstream_failure(true),
    ]);
    let harness = PipelineHarness::new(g, Adapters::new());
    let (rt_tx, rt_rx) = mpsc::channel::<RuntimeEvent>(16);
    let executed = Arc::new(Mutex::new(Vec::new()));
    let executor =
        FakeExecutor::new(rt_tx, executed.clone()).with_outcome("extract", failed("source down"));

    let report = harness
        .pipeline
        .execute_with(&manual_trigger(), CancellationToken::new(), executor, rt_rx)
        .await?;

    assert_eq!(report.tasks["extract"], TaskState::Failed);
    assert_eq!(report.tasks["transform"], TaskState::Skipped);
    assert_eq!(report.tasks["cleanup"], TaskState::Succeeded);
    assert_eq!(report.status(), RunStatus::Failed);

    let names: Vec<String> = executed.lock().unwrap().iter().map(|(n, _)| n.clone()).collect();
    assert_eq!(names, vec!["extract", "cleanup"]);
    Ok(())
}

#[tokio::test]
async fn resume_skips_tasks_that_already_succeeded() -> TestResult {
    init_tracing();

    let state = Arc::new(InMemoryState::new());
    let trigger = manual_trigger();
    let run_id = trigger.run_id();
    state.begin_run(&Run {
        run_id: run_id.clone(),
        pipeline_id: "marketplace_elt_pipeline".into(),
        logical_ts: trigger.logical_ts,
        status: RunStatus::Running,
    })?;
    state.record(&TaskAttempt::start(&run_id, "extract", 1).succeeded())?;
    state.record(&TaskAttempt::start(&run_id, "transform", 1).failed("dbt crashed"))?;
    state.record(&TaskAttempt::start(&run_id, "transform", 2))?;

    let harness = PipelineHarness::with_state(marketplace_graph(), Adapters::new(), state);
    let (rt_tx, rt_rx) = mpsc::channel::<RuntimeEvent>(16);
    let executed = Arc::new(Mutex::new(Vec::new()));
    let executor = FakeExecutor::new(rt_tx, executed.clone());

    let report = harness
        .pipeline
        .execute_with(&trigger, CancellationToken::new(), executor, rt_rx)
        .await?;

    assert_eq!(report.status(), RunStatus::Succeeded);
    assert_eq!(
        executed.lock().unwrap().clone(),
        vec![
            ("transform".to_string(), 3u32),
            ("quality_gate".to_string(), 1u32),
            ("mart_publish".to_string(), 1u32),
        ]
    );
    // The dangling attempt 2 was closed as failed.
    assert_eq!(
        statuses_of(harness.state.as_ref(), &run_id, "transform"),
        vec![(1, AttemptStatus::Failed), (2, AttemptStatus::Failed)]
    );
    assert_eq!(
        harness.state.run(&run_id)?.map(|r| r.status),
        Some(RunStatus::Succeeded)
    );
    Ok(())
}

#[tokio::test]
async fn fatal_event_aborts_the_run() -> TestResult {
    init_tracing();

    let harness = PipelineHarness::new(marketplace_graph(), Adapters::new());
    let (rt_tx, rt_rx) = mpsc::channel::<RuntimeEvent>(16);

    // An executor that reports a ledger failure for the first task.
    struct BrokenLedgerExecutor(mpsc::Sender<RuntimeEvent>);
    impl eltflow::exec::ExecutorBackend for BrokenLedgerExecutor {
        fn spawn_ready_tasks(
            &mut self,
            tasks: Vec<eltflow::dag::DispatchedTask>,
        ) -> std::pin::Pin<Box<dyn std::future::Future<Output = eltflow::errors::Result<()>> + Send + '_>>
        {
            let tx = self.0.clone();
            Box::pin(async move {
                for t in tasks {
                    tx.send(RuntimeEvent::Fatal {
                        task: t.name().to_string(),
                        error: eltflow::errors::EltflowError::LedgerWrite(
                            eltflow::state::StateError::LockPoisoned,
                        ),
                    })
                    .await
                    .map_err(anyhow::Error::from)?;
                }
                Ok(())
            })
        }
    }

    let cancel = CancellationToken::new();
    let result = harness
        .pipeline
        .execute_with(
            &manual_trigger(),
            cancel.clone(),
            BrokenLedgerExecutor(rt_tx),
            rt_rx,
        )
        .await;

    assert!(
        matches!(result, Err(eltflow::errors::EltflowError::LedgerWrite(_))),
        "got: {result:?}"
    );
    assert!(cancel.is_cancelled());

    let reports = harness.notifier.reports();
    assert_eq!(reports.len(), 1, "an aborted run is still reported");
    assert_eq!(reports[0].status(), RunStatus::Failed);
    assert_eq!(reports[0].failed_tasks, vec!["extract".to_string()]);
    assert_eq!(
        harness.state.run(&manual_trigger().run_id())?.map(|r| r.status),
        Some(RunStatus::Failed)
    );
    Ok(())
}
