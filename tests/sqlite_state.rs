// tests/sqlite_state.rs

//! Both state backends must behave identically; the SQLite one must also
//! survive a process restart.

mod common;
use crate::common::{TestResult, init_tracing, statuses_of};

use std::sync::Arc;

use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use tokio_util::sync::CancellationToken;

use eltflow::adapters::Adapters;
use eltflow::engine::Pipeline;
use eltflow::state::{
    AttemptStatus, InMemoryState, Run, RunLedger, RunStatus, SqliteState, StateError, TaskAttempt,
    WatermarkPosition, WatermarkStore,
};
use eltflow_test_utils::builders::{logical_ts, manual_trigger, marketplace_graph};
use eltflow_test_utils::fake_adapters::{
    FixedMetricAdapter, ScriptedSyncAdapter, ScriptedTransformAdapter,
};
use eltflow_test_utils::with_timeout;

fn run_at(run_id: &str, hours: i64) -> Run {
    Run {
        run_id: run_id.to_string(),
        pipeline_id: "p".to_string(),
        logical_ts: logical_ts() + ChronoDuration::hours(hours),
        status: RunStatus::Running,
    }
}

fn ledger_behaves(ledger: &dyn RunLedger) -> TestResult {
    ledger.begin_run(&run_at("r1", 0))?;
    ledger.begin_run(&run_at("r2", 1))?;
    assert_eq!(ledger.latest_run("p")?.map(|r| r.run_id), Some("r2".to_string()));
    assert!(ledger.latest_run("other")?.is_none());

    ledger.record(&TaskAttempt::start("r1", "extract", 1))?;
    ledger.record(&TaskAttempt::start("r1", "extract", 1).failed("boom"))?;
    ledger.record(&TaskAttempt::start("r1", "extract", 2).succeeded())?;
    ledger.record(&TaskAttempt::skipped("r1", "publish", 1, "upstream task 'gate' failed"))?;

    let err = ledger
        .record(&TaskAttempt::start("r1", "extract", 2).failed("late"))
        .unwrap_err();
    assert!(matches!(err, StateError::AttemptAlreadyTerminal { attempt_number: 2, .. }), "got: {err:?}");

    let err = ledger.record(&TaskAttempt::start("r1", "extract", 1)).unwrap_err();
    assert!(matches!(err, StateError::AttemptOutOfOrder { latest: 2, .. }), "got: {err:?}");

    assert_eq!(
        statuses_of(ledger, "r1", "extract"),
        vec![(1, AttemptStatus::Failed), (2, AttemptStatus::Succeeded)]
    );
    let history = ledger.history("r1")?;
    assert_eq!(history.len(), 3);
    assert_eq!(history[0].error.as_deref(), Some("boom"));
    assert_eq!(history[2].status, AttemptStatus::Skipped);
    assert!(ledger.history("r2")?.is_empty());

    ledger.finish_run("r1", RunStatus::Partial)?;
    assert_eq!(ledger.run("r1")?.map(|r| r.status), Some(RunStatus::Partial));
    assert!(matches!(
        ledger.finish_run("r1", RunStatus::Failed),
        Err(StateError::RunAlreadyTerminal(_))
    ));
    assert!(matches!(
        ledger.begin_run(&run_at("r1", 0)),
        Err(StateError::RunAlreadyTerminal(_))
    ));
    assert!(matches!(
        ledger.finish_run("missing", RunStatus::Failed),
        Err(StateError::UnknownRun(_))
    ));
    Ok(())
}

fn watermarks_behave(store: &dyn WatermarkStore) -> TestResult {
    assert!(store.get("orders")?.is_none());

    assert!(store.compare_and_set("orders", None, &WatermarkPosition::Offset(10))?);
    assert!(!store.compare_and_set("orders", None, &WatermarkPosition::Offset(11))?);
    assert!(!store.compare_and_set(
        "orders",
        Some(&WatermarkPosition::Offset(9)),
        &WatermarkPosition::Offset(12)
    )?);
    assert!(store.compare_and_set(
        "orders",
        Some(&WatermarkPosition::Offset(10)),
        &WatermarkPosition::Offset(20)
    )?);
    assert_eq!(
        store.get("orders")?.map(|w| w.position),
        Some(WatermarkPosition::Offset(20))
    );

    let ts = Utc.with_ymd_and_hms(2024, 5, 1, 9, 30, 0).unwrap();
    store.set("customers", &WatermarkPosition::Timestamp(ts))?;
    let stored = store.get("customers")?.expect("watermark stored");
    assert_eq!(stored.source_name, "customers");
    assert_eq!(stored.position, WatermarkPosition::Timestamp(ts));
    Ok(())
}

#[test]
fn in_memory_ledger() -> TestResult {
    ledger_behaves(&InMemoryState::new())
}

#[test]
fn sqlite_ledger() -> TestResult {
    ledger_behaves(&SqliteState::in_memory()?)
}

#[test]
fn in_memory_watermarks() -> TestResult {
    watermarks_behave(&InMemoryState::new())
}

#[test]
fn sqlite_watermarks() -> TestResult {
    watermarks_behave(&SqliteState::in_memory()?)
}

#[test]
fn sqlite_state_survives_reopen() -> TestResult {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("state.db");

    {
        let state = SqliteState::open(&path)?;
        state.begin_run(&run_at("r1", 0))?;
        state.record(&TaskAttempt::start("r1", "extract", 1))?;
        state.set("orders", &WatermarkPosition::Offset(7))?;
    }

    let state = SqliteState::open(&path)?;
    let run = state.run("r1")?.expect("run persisted");
    assert_eq!(run.status, RunStatus::Running);
    assert_eq!(run.logical_ts, logical_ts());

    // The dangling attempt can still be closed after the restart.
    state.record(&TaskAttempt::start("r1", "extract", 1).failed("interrupted"))?;
    assert_eq!(
        statuses_of(&state, "r1", "extract"),
        vec![(1, AttemptStatus::Failed)]
    );
    assert_eq!(
        state.get("orders")?.map(|w| w.position),
        Some(WatermarkPosition::Offset(7))
    );
    Ok(())
}

#[tokio::test]
async fn pipeline_run_persists_to_sqlite() -> TestResult {
    init_tracing();

    let dir = tempfile::tempdir()?;
    let path = dir.path().join("state.db");
    let trigger = manual_trigger();

    {
        let state = Arc::new(SqliteState::open(&path)?);
        let adapters = Adapters::new()
            .with_sync("orders", Arc::new(ScriptedSyncAdapter::succeeding(50, 500)))
            .with_transform(Arc::new(ScriptedTransformAdapter::new()))
            .with_metrics(Arc::new(
                FixedMetricAdapter::new().with_value("orders_not_empty", 50.0),
            ));
        let pipeline = Pipeline::new(
            "marketplace_elt_pipeline",
            marketplace_graph(),
            state.clone(),
            state,
            adapters,
        );

        let report = with_timeout(pipeline.execute(&trigger, CancellationToken::new())).await?;
        assert_eq!(report.status(), RunStatus::Succeeded);
    }

    let state = SqliteState::open(&path)?;
    let run = state
        .latest_run("marketplace_elt_pipeline")?
        .expect("run persisted");
    assert_eq!(run.run_id, trigger.run_id());
    assert_eq!(run.status, RunStatus::Succeeded);

    let history = state.history(&run.run_id)?;
    let tasks: Vec<&str> = history.iter().map(|a| a.task_name.as_str()).collect();
    assert_eq!(tasks, vec!["extract", "transform", "quality_gate", "mart_publish"]);
    assert!(history.iter().all(|a| a.status == AttemptStatus::Succeeded));
    assert_eq!(
        state.get("orders")?.map(|w| w.position),
        Some(WatermarkPosition::Offset(500))
    );
    Ok(())
}
