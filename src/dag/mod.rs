// src/dag/mod.rs

//! Task graph representation and scheduling.
//!
//! - [`graph`] holds the validated, immutable graph of tasks.
//! - [`scheduler`] contains the per-run state machine that decides
//!   which tasks are ready and how failures propagate.
//! - [`task_info`] provides task definitions and dispatched task types.
//! - [`scheduler_step`] defines the result type for scheduler steps.
//! - [`state_manager`] manages per-run state transitions.

pub mod graph;
pub mod scheduler;
pub mod scheduler_step;
pub mod state_manager;
pub mod task_info;

pub use graph::{GraphError, TaskGraph};
pub use scheduler::Scheduler;
pub use scheduler_step::{SchedulerStep, SkippedTask};
pub use task_info::{DispatchedTask, TaskAction, TaskNode, TaskState, TransformOp};
