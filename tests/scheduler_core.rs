// tests/scheduler_core.rs

//! The pure core, driven by hand: no Tokio, no channels, no adapters.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use proptest::prelude::*;

use eltflow::dag::{Scheduler, TaskGraph, TaskNode, TaskState};
use eltflow::engine::{CoreCommand, CoreRuntime, CoreStep, RuntimeEvent, TaskOutcome};
use eltflow::state::{Run, RunStatus};
use eltflow_test_utils::builders::{graph, logical_ts, marketplace_graph};

fn run() -> Run {
    Run {
        run_id: "manual__2024-05-01T10:00:00Z".into(),
        pipeline_id: "p".into(),
        logical_ts: logical_ts(),
        status: RunStatus::Running,
    }
}

fn dispatched(step: &CoreStep) -> Vec<String> {
    step.commands
        .iter()
        .filter_map(|c| match c {
            CoreCommand::DispatchTasks(tasks) => Some(tasks.iter().map(|t| t.name().to_string())),
            _ => None,
        })
        .flatten()
        .collect()
}

fn skipped(step: &CoreStep) -> Vec<String> {
    step.commands
        .iter()
        .filter_map(|c| match c {
            CoreCommand::RecordSkipped(tasks) => Some(tasks.iter().map(|t| t.name.clone())),
            _ => None,
        })
        .flatten()
        .collect()
}

fn finished_status(step: &CoreStep) -> Option<RunStatus> {
    step.commands.iter().find_map(|c| match c {
        CoreCommand::FinishRun(report) => Some(report.status()),
        _ => None,
    })
}

fn ok() -> TaskOutcome {
    TaskOutcome::Succeeded { attempts: 1 }
}

fn failed() -> TaskOutcome {
    TaskOutcome::Failed {
        attempts: 1,
        error: "boom".into(),
        fatal: true,
    }
}

fn finish(task: &str, outcome: TaskOutcome) -> RuntimeEvent {
    RuntimeEvent::TaskFinished {
        task: task.into(),
        outcome,
    }
}

#[test]
fn gate_failure_skips_dependents_and_yields_partial() {
    let mut core = CoreRuntime::new(Scheduler::new(marketplace_graph(), 4), run());

    assert_eq!(dispatched(&core.start()), vec!["extract"]);
    assert_eq!(dispatched(&core.step(finish("extract", ok()))), vec!["transform"]);
    assert_eq!(dispatched(&core.step(finish("transform", ok()))), vec!["quality_gate"]);

    let step = core.step(finish("quality_gate", failed()));
    assert_eq!(skipped(&step), vec!["mart_publish"]);
    assert!(dispatched(&step).is_empty());
    assert_eq!(finished_status(&step), Some(RunStatus::Partial));
    assert!(!step.keep_running);
    assert!(core.is_idle());
}

#[test]
fn fatal_root_failure_skips_all_transitive_dependents_at_once() {
    let mut core = CoreRuntime::new(Scheduler::new(marketplace_graph(), 4), run());
    core.start();

    let step = core.step(finish("extract", failed()));
    assert_eq!(skipped(&step), vec!["transform", "quality_gate", "mart_publish"]);
    assert_eq!(finished_status(&step), Some(RunStatus::Failed));
}

#[test]
fn partial_when_a_branch_fails_but_another_succeeds() {
    let g = graph([
        TaskNode::sync("extract_orders", "orders"),
        TaskNode::sync("extract_customers", "customers"),
        TaskNode::gate("check_orders", vec![eltflow_test_utils::builders::row_count_check()])
            .after("extract_orders"),
        TaskNode::transform("publish_orders", eltflow::dag::TransformOp::Run, None)
            .after("check_orders"),
    ]);
    let mut core = CoreRuntime::new(Scheduler::new(g, 4), run());

    assert_eq!(
        dispatched(&core.start()),
        vec!["extract_customers", "extract_orders"]
    );
    core.step(finish("extract_customers", ok()));
    core.step(finish("extract_orders", ok()));
    let step = core.step(finish("check_orders", failed()));
    assert_eq!(finished_status(&step), Some(RunStatus::Partial));
}

#[test]
fn concurrency_bound_holds_back_ready_tasks() {
    let g = graph((0..5).map(|i| TaskNode::sync(format!("t{i}"), "s")));
    let mut core = CoreRuntime::new(Scheduler::new(g, 2), run());

    assert_eq!(dispatched(&core.start()), vec!["t0", "t1"]);
    assert_eq!(dispatched(&core.step(finish("t1", ok()))), vec!["t2"]);
    assert_eq!(dispatched(&core.step(finish("t0", ok()))), vec!["t3"]);
}

#[test]
fn cancel_skips_pending_and_waits_for_running() {
    let g = graph((0..3).map(|i| TaskNode::sync(format!("t{i}"), "s")));
    let mut core = CoreRuntime::new(Scheduler::new(g, 1), run());
    core.start();

    let step = core.step(RuntimeEvent::CancelRequested);
    assert_eq!(skipped(&step), vec!["t1", "t2"]);
    assert!(step.keep_running, "t0 is still running");

    let step = core.step(finish("t0", ok()));
    assert!(dispatched(&step).is_empty());
    assert_eq!(finished_status(&step), Some(RunStatus::Partial));
}

#[test]
fn completion_for_task_not_running_is_ignored() {
    let mut core = CoreRuntime::new(Scheduler::new(marketplace_graph(), 4), run());
    core.start();

    let step = core.step(finish("mart_publish", ok()));
    assert!(step.commands.is_empty());
    assert_eq!(core.scheduler().state_of("mart_publish"), Some(TaskState::Pending));
}

#[test]
fn dependency_satisfaction_tracks_upstream_state() {
    let mut core = CoreRuntime::new(Scheduler::new(marketplace_graph(), 4), run());
    core.start();

    assert_eq!(core.scheduler().deps_satisfied("transform"), Some(false));
    core.step(finish("extract", ok()));
    assert_eq!(core.scheduler().deps_satisfied("transform"), Some(true));
    assert_eq!(core.scheduler().deps_satisfied("nope"), None);
}

// Acyclic by construction: task i may only depend on tasks 0..i.
fn graph_strategy(max_tasks: usize) -> impl Strategy<Value = Arc<TaskGraph>> {
    (1..=max_tasks).prop_flat_map(|num_tasks| {
        proptest::collection::vec(proptest::collection::vec(any::<usize>(), 0..3), num_tasks)
            .prop_map(move |raw_deps| {
                graph(raw_deps.into_iter().enumerate().map(|(i, deps)| {
                    let mut node = TaskNode::sync(format!("task_{i:02}"), "s");
                    if i > 0 {
                        for d in deps {
                            node = node.after(format!("task_{:02}", d % i));
                        }
                    }
                    node
                }))
            })
    })
}

proptest! {
    #[test]
    fn every_run_terminates_without_violating_dependencies(
        g in graph_strategy(10),
        failing in proptest::collection::vec(0..10usize, 0..4),
        max_concurrency in 1..4usize,
    ) {
        let failing: HashSet<String> = failing.iter().map(|i| format!("task_{i:02}")).collect();
        let mut core = CoreRuntime::new(Scheduler::new(Arc::clone(&g), max_concurrency), run());

        let mut in_flight: Vec<String> = dispatched(&core.start());
        let mut done: BTreeSet<String> = BTreeSet::new();
        let mut steps = 0;

        while !in_flight.is_empty() {
            prop_assert!(in_flight.len() <= max_concurrency);
            let task = in_flight.remove(0);
            let outcome = if failing.contains(&task) { failed() } else { ok() };
            let step = core.step(finish(&task, outcome));
            done.insert(task);

            for next in dispatched(&step) {
                for dep in g.dependencies_of(&next) {
                    prop_assert!(done.contains(dep), "{} started before {}", next, dep);
                }
                in_flight.push(next);
            }

            steps += 1;
            prop_assert!(steps <= 100, "run did not terminate");
        }

        prop_assert!(core.is_idle());
        prop_assert!(core.scheduler().task_states().values().all(|s| s.is_terminal()));
    }
}
