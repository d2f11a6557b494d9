// src/adapters/notifier.rs

//! End-of-run notifications.

use std::future::Future;
use std::pin::Pin;

use tracing::{info, warn};

use crate::engine::RunReport;
use crate::state::RunStatus;

/// Receives the terminal report of every run.
///
/// Notification failures are the notifier's own business: the run is already
/// recorded, so the trait has no error channel.
pub trait Notifier: Send + Sync {
    fn notify<'a>(&'a self, report: &'a RunReport) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>>;
}

/// Does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopNotifier;

impl Notifier for NoopNotifier {
    fn notify<'a>(&'a self, _report: &'a RunReport) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        Box::pin(async {})
    }
}

/// Emits one log event per finished run.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify<'a>(&'a self, report: &'a RunReport) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        Box::pin(async move {
            let run = &report.run;
            match run.status {
                RunStatus::Succeeded => info!(
                    pipeline = %run.pipeline_id,
                    run_id = %run.run_id,
                    tasks = report.tasks.len(),
                    "run succeeded"
                ),
                status => warn!(
                    pipeline = %run.pipeline_id,
                    run_id = %run.run_id,
                    status = %status,
                    failed = ?report.failed_tasks,
                    skipped = ?report.skipped_tasks,
                    "run did not succeed"
                ),
            }
        })
    }
}
