#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use eltflow::adapters::Adapters;
use eltflow::dag::{TaskGraph, TaskNode, TransformOp};
use eltflow::engine::Pipeline;
use eltflow::exec::RetryPolicy;
use eltflow::quality::{Comparator, QualityCheck};
use eltflow::state::InMemoryState;
use eltflow::trigger::RunTrigger;

use crate::fake_adapters::RecordingNotifier;

/// Logical timestamp shared by most tests.
pub fn logical_ts() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap()
}

pub fn manual_trigger() -> RunTrigger {
    RunTrigger::manual(logical_ts())
}

/// `max_attempts` attempts with millisecond backoff and no jitter.
pub fn fast_retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy::from_retry_count(max_attempts.saturating_sub(1), 5, 20).without_jitter()
}

pub fn row_count_check() -> QualityCheck {
    QualityCheck::new(
        "orders_not_empty",
        "select count(*) from stg_orders",
        Comparator::Gt,
        0.0,
    )
}

/// `extract -> transform -> quality_gate -> mart_publish`, single attempts.
pub fn marketplace_nodes() -> Vec<TaskNode> {
    vec![
        TaskNode::sync("extract", "orders").with_retry_policy(fast_retry(1)),
        TaskNode::transform("transform", TransformOp::Run, Some("staging"))
            .after("extract")
            .with_retry_policy(fast_retry(1)),
        TaskNode::gate("quality_gate", vec![row_count_check()])
            .after("transform")
            .with_retry_policy(fast_retry(1)),
        TaskNode::transform("mart_publish", TransformOp::Run, Some("marts"))
            .after("quality_gate")
            .with_retry_policy(fast_retry(1)),
    ]
}

pub fn marketplace_graph() -> Arc<TaskGraph> {
    graph(marketplace_nodes())
}

pub fn graph(nodes: impl IntoIterator<Item = TaskNode>) -> Arc<TaskGraph> {
    Arc::new(TaskGraph::build(nodes).expect("test graph should be valid"))
}

/// A pipeline over in-memory state, with handles to inspect it afterwards.
pub struct PipelineHarness {
    pub state: Arc<InMemoryState>,
    pub notifier: Arc<RecordingNotifier>,
    pub pipeline: Pipeline,
}

impl PipelineHarness {
    pub fn new(graph: Arc<TaskGraph>, adapters: Adapters) -> Self {
        Self::with_state(graph, adapters, Arc::new(InMemoryState::new()))
    }

    /// Reuse `state`, e.g. to simulate a restarted process.
    pub fn with_state(graph: Arc<TaskGraph>, adapters: Adapters, state: Arc<InMemoryState>) -> Self {
        let notifier = Arc::new(RecordingNotifier::default());
        let pipeline = Pipeline::new("marketplace_elt_pipeline", graph, state.clone(), state.clone(), adapters)
            .with_notifier(notifier.clone());
        Self {
            state,
            notifier,
            pipeline,
        }
    }

    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.pipeline = self.pipeline.with_max_concurrency(max_concurrency);
        self
    }
}
