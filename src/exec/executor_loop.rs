// src/exec/executor_loop.rs

//! Main executor loop that manages running tasks.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::dag::DispatchedTask;
use crate::engine::RuntimeEvent;
use crate::exec::task_runner::{TaskEnv, run_task};

/// Spawn the background executor loop.
///
/// The returned `mpsc::Sender<DispatchedTask>` is what
/// `AdapterExecutorBackend` forwards dispatched tasks into. Each task runs in
/// its own Tokio task, and **per task name there is never more than one
/// execution in flight**: a dispatch for a task that is still running is
/// logged and dropped.
pub fn spawn_executor(
    runtime_tx: mpsc::Sender<RuntimeEvent>,
    env: Arc<TaskEnv>,
) -> mpsc::Sender<DispatchedTask> {
    let (tx, mut rx) = mpsc::channel::<DispatchedTask>(32);

    tokio::spawn(async move {
        info!("executor loop started");

        // At most one handle per task name.
        let mut active: HashMap<String, JoinHandle<()>> = HashMap::new();

        while let Some(task) = rx.recv().await {
            handle_dispatched_task(task, &mut active, &env, &runtime_tx);
        }

        // Let in-flight tasks record their results before the loop ends.
        for (name, handle) in active.drain() {
            if let Err(e) = handle.await {
                warn!(task = %name, error = %e, "task runner panicked or was aborted");
            }
        }
        info!("executor loop finished (channel closed)");
    });

    tx
}

fn handle_dispatched_task(
    task: DispatchedTask,
    active: &mut HashMap<String, JoinHandle<()>>,
    env: &Arc<TaskEnv>,
    runtime_tx: &mpsc::Sender<RuntimeEvent>,
) {
    let name = task.name().to_string();

    if let Some(existing) = active.get(&name) {
        if !existing.is_finished() {
            warn!(
                task = %name,
                run_id = %task.run_id,
                "task already in flight; ignoring duplicate dispatch"
            );
            return;
        }
    }

    let env = Arc::clone(env);
    let rt_tx = runtime_tx.clone();
    let spawn_name = name.clone();
    let handle = tokio::spawn(async move {
        run_task(task, env, rt_tx).await;
        debug!(task = %spawn_name, "task runner future finished");
    });

    active.insert(name, handle);
}
