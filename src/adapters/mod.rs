// src/adapters/mod.rs

//! Interfaces to the external systems a pipeline drives.
//!
//! The engine only sees the traits in this module. Concrete implementations:
//! - [`airbyte`]: extract-load syncs through the Airbyte HTTP API.
//! - [`command`]: syncs and metric queries backed by shell commands.
//! - [`dbt`]: transforms through the `dbt` CLI.
//! - [`notifier`]: end-of-run notifications.
//!
//! Adapter methods return boxed futures so the traits stay object safe, the
//! same way the executor backend does.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::quality::QualityCheck;
use crate::state::WatermarkPosition;

pub mod airbyte;
pub mod command;
pub mod dbt;
pub mod notifier;
pub mod process;

pub use airbyte::AirbyteSyncAdapter;
pub use command::{CommandMetricAdapter, CommandSyncAdapter};
pub use dbt::DbtAdapter;
pub use notifier::{LogNotifier, NoopNotifier, Notifier};

/// Boxed future returned by adapter methods.
pub type AdapterFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, AdapterError>> + Send + 'a>>;

/// Failure reported by an adapter call.
///
/// `retryable` decides whether the executor tries again; everything else about
/// the failure is carried in the message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct AdapterError {
    pub retryable: bool,
    pub message: String,
}

impl AdapterError {
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            retryable: true,
            message: message.into(),
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            retryable: false,
            message: message.into(),
        }
    }
}

/// Per-attempt information every adapter call receives.
#[derive(Debug, Clone)]
pub struct AttemptContext {
    pub run_id: String,
    pub task: String,
    pub attempt: u32,
    pub logical_ts: DateTime<Utc>,
    /// Cancelled when the run is cancelled; long calls should stop early.
    pub cancel: CancellationToken,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SyncRequest {
    pub source: String,
    /// Position the previous successful sync stopped at.
    pub watermark: Option<WatermarkPosition>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncResult {
    #[serde(default)]
    pub rows_synced: u64,
    /// New position to store. `None` leaves the watermark untouched.
    #[serde(default)]
    pub watermark_position: Option<WatermarkPosition>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TransformResult {
    pub models_built: u32,
    pub models_failed: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestOutcome {
    pub name: String,
    pub passed: bool,
}

/// Extract-load for one or more named sources.
pub trait SyncAdapter: Send + Sync {
    fn trigger<'a>(
        &'a self,
        ctx: &'a AttemptContext,
        request: &'a SyncRequest,
    ) -> AdapterFuture<'a, SyncResult>;
}

/// Transformation tool operations.
pub trait TransformAdapter: Send + Sync {
    fn deps<'a>(&'a self, ctx: &'a AttemptContext) -> AdapterFuture<'a, ()>;

    fn run<'a>(
        &'a self,
        ctx: &'a AttemptContext,
        select: Option<&'a str>,
    ) -> AdapterFuture<'a, TransformResult>;

    fn test<'a>(
        &'a self,
        ctx: &'a AttemptContext,
        select: Option<&'a str>,
    ) -> AdapterFuture<'a, Vec<TestOutcome>>;

    /// One outcome per checked source; a stale source has `passed = false`.
    fn freshness<'a>(
        &'a self,
        ctx: &'a AttemptContext,
        select: Option<&'a str>,
    ) -> AdapterFuture<'a, Vec<TestOutcome>>;
}

/// Evaluates the metric behind a quality check.
pub trait MetricAdapter: Send + Sync {
    fn query<'a>(&'a self, ctx: &'a AttemptContext, check: &'a QualityCheck) -> AdapterFuture<'a, f64>;
}

/// The adapters a pipeline's tasks resolve against.
#[derive(Clone, Default)]
pub struct Adapters {
    /// Keyed by source name.
    pub sync: HashMap<String, Arc<dyn SyncAdapter>>,
    pub transform: Option<Arc<dyn TransformAdapter>>,
    pub metrics: Option<Arc<dyn MetricAdapter>>,
}

impl Adapters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sync(mut self, source: impl Into<String>, adapter: Arc<dyn SyncAdapter>) -> Self {
        self.sync.insert(source.into(), adapter);
        self
    }

    pub fn with_transform(mut self, adapter: Arc<dyn TransformAdapter>) -> Self {
        self.transform = Some(adapter);
        self
    }

    pub fn with_metrics(mut self, adapter: Arc<dyn MetricAdapter>) -> Self {
        self.metrics = Some(adapter);
        self
    }
}

impl fmt::Debug for Adapters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut sources: Vec<&String> = self.sync.keys().collect();
        sources.sort();
        f.debug_struct("Adapters")
            .field("sync", &sources)
            .field("transform", &self.transform.is_some())
            .field("metrics", &self.metrics.is_some())
            .finish()
    }
}
