// src/exec/backend.rs

//! Pluggable executor backend abstraction.
//!
//! The runtime talks to an `ExecutorBackend` instead of a raw mpsc sender.
//! This makes it easy to swap in a fake executor in tests while keeping the
//! production executor in [`executor_loop`](super::executor_loop).
//!
//! - `AdapterExecutorBackend` is the implementation used by `eltflow`. It
//!   wraps the `spawn_executor` loop and forwards dispatched tasks over an
//!   mpsc channel.
//! - Tests can provide their own `ExecutorBackend` that, for example, records
//!   which tasks were dispatched and directly emits `TaskFinished` events.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use anyhow::anyhow;
use tokio::sync::mpsc;

use crate::dag::DispatchedTask;
use crate::engine::RuntimeEvent;
use crate::errors::{EltflowError, Result};

use super::executor_loop::spawn_executor;
use super::task_runner::TaskEnv;

/// Trait abstracting how dispatched tasks are executed.
pub trait ExecutorBackend: Send {
    /// Dispatch the given tasks for execution.
    ///
    /// The implementation is free to:
    /// - call the real adapters (production)
    /// - simulate completion and emit `RuntimeEvent`s (tests)
    fn spawn_ready_tasks(
        &mut self,
        tasks: Vec<DispatchedTask>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}

/// Executor backend that runs tasks against the configured adapters.
pub struct AdapterExecutorBackend {
    tx: mpsc::Sender<DispatchedTask>,
}

impl AdapterExecutorBackend {
    /// Create the backend, wiring it to the given runtime event sender.
    ///
    /// This spawns the background executor loop immediately.
    pub fn new(runtime_tx: mpsc::Sender<RuntimeEvent>, env: Arc<TaskEnv>) -> Self {
        let tx = spawn_executor(runtime_tx, env);
        Self { tx }
    }
}

impl ExecutorBackend for AdapterExecutorBackend {
    fn spawn_ready_tasks(
        &mut self,
        tasks: Vec<DispatchedTask>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        // Clone the sender so the future doesn't borrow `self` across `await`.
        let tx = self.tx.clone();
        Box::pin(async move {
            for task in tasks {
                tx.send(task)
                    .await
                    .map_err(|e| EltflowError::Other(anyhow!("executor loop stopped: {e}")))?;
            }
            Ok(())
        })
    }
}
