// src/exec/mod.rs

//! Task execution layer.
//!
//! This module runs dispatched tasks against the adapters, applies each
//! task's retry policy, records attempts in the run ledger and reports back to
//! the orchestration runtime via `RuntimeEvent`s.
//!
//! - [`executor_loop`] owns the loop that spawns one Tokio task per dispatch.
//! - [`task_runner`] is the per-task retry loop.
//! - [`retry`] holds the retry policy and backoff computation.
//! - [`backend`] provides the `ExecutorBackend` trait and the
//!   `AdapterExecutorBackend` the runtime uses in production, and which
//!   tests can replace with a fake implementation.

pub mod backend;
pub mod executor_loop;
pub mod retry;
pub mod task_runner;

pub use backend::{AdapterExecutorBackend, ExecutorBackend};
pub use executor_loop::spawn_executor;
pub use retry::RetryPolicy;
pub use task_runner::{TaskEnv, execute, run_task};
