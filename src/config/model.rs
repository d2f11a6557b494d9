// src/config/model.rs

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Deserialize;

use crate::dag::{TaskGraph, TransformOp};
use crate::quality::Comparator;

/// Top-level configuration as read from a TOML file, before validation.
///
/// ```toml
/// [pipeline]
/// id = "marketplace_elt_pipeline"
/// schedule = "@hourly"
///
/// [sources.orders]
/// kind = "airbyte"
/// base_url = "http://airbyte-server:8001"
/// connection_id = "6f1c..."
///
/// [transform]
/// project_dir = "dbt"
///
/// [task.extract_orders]
/// kind = "sync"
/// source = "orders"
///
/// [task.dbt_run]
/// kind = "transform"
/// after = ["extract_orders"]
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawConfigFile {
    pub pipeline: PipelineSection,

    /// Extract-load sources from `[sources.<name>]`.
    #[serde(default)]
    pub sources: BTreeMap<String, SourceConfig>,

    #[serde(default)]
    pub transform: Option<TransformSection>,

    #[serde(default)]
    pub metrics: Option<MetricsSection>,

    /// All tasks from `[task.<name>]`, keyed by task name.
    #[serde(default)]
    pub task: BTreeMap<String, TaskConfig>,
}

/// `[pipeline]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineSection {
    pub id: String,

    #[serde(default = "default_schedule")]
    pub schedule: String,

    /// Backfill every missed tick instead of only the latest one.
    #[serde(default)]
    pub catchup: bool,

    /// First logical timestamp eligible for backfill.
    #[serde(default)]
    pub start_date: Option<String>,

    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Retries after the first attempt, for tasks that don't set `retries`.
    #[serde(default = "default_retry_count")]
    pub default_retry_count: u32,

    #[serde(default = "default_backoff_base_ms")]
    pub default_backoff_base_ms: u64,

    #[serde(default = "default_backoff_max_ms")]
    pub default_backoff_max_ms: u64,

    /// SQLite file for the ledger and watermarks; in-memory when absent.
    #[serde(default)]
    pub state_path: Option<PathBuf>,
}

fn default_schedule() -> String {
    "@hourly".to_string()
}

fn default_max_concurrency() -> usize {
    4
}

fn default_retry_count() -> u32 {
    1
}

fn default_backoff_base_ms() -> u64 {
    1_000
}

fn default_backoff_max_ms() -> u64 {
    300_000
}

/// `[sources.<name>]`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SourceConfig {
    Airbyte {
        base_url: String,
        connection_id: String,
        /// Environment variable holding a bearer token.
        #[serde(default)]
        api_token_env: Option<String>,
        /// Job polling interval, e.g. `"10s"`.
        #[serde(default)]
        poll_interval: Option<String>,
    },
    Command {
        cmd: String,
    },
}

/// `[transform]`: how to invoke dbt.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TransformSection {
    #[serde(default = "default_dbt_bin")]
    pub dbt_bin: String,
    pub project_dir: PathBuf,
    #[serde(default)]
    pub profiles_dir: Option<PathBuf>,
    #[serde(default)]
    pub target: Option<String>,
}

fn default_dbt_bin() -> String {
    "dbt".to_string()
}

/// `[metrics]`: command that evaluates quality-check queries.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MetricsSection {
    pub cmd: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Sync,
    Transform,
    QualityGate,
}

/// `[task.<name>]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TaskConfig {
    pub kind: TaskKind,

    /// Dependency list: this task waits for all tasks listed here.
    #[serde(default)]
    pub after: Vec<String>,

    /// Source name, for `kind = "sync"`.
    #[serde(default)]
    pub source: Option<String>,

    /// dbt command, for `kind = "transform"`. Defaults to `run`.
    #[serde(default)]
    pub op: Option<TransformOp>,

    /// dbt `--select` expression.
    #[serde(default)]
    pub select: Option<String>,

    /// Checks, for `kind = "quality_gate"`.
    #[serde(default)]
    pub checks: Vec<CheckConfig>,

    /// Overrides `pipeline.default_retry_count`.
    #[serde(default)]
    pub retries: Option<u32>,

    /// Overrides `pipeline.default_backoff_base_ms`.
    #[serde(default)]
    pub backoff_base_ms: Option<u64>,

    /// Per-attempt limit, e.g. `"30m"`.
    #[serde(default)]
    pub timeout: Option<String>,

    #[serde(default)]
    pub timeout_is_fatal: bool,

    #[serde(default)]
    pub run_on_upstream_failure: bool,

    #[serde(default)]
    pub group: Option<String>,
}

/// One `[[task.<name>.checks]]` entry.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CheckConfig {
    pub name: String,
    pub query: String,
    pub op: Comparator,
    #[serde(default)]
    pub threshold: Option<f64>,
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
}

/// Validated pipeline settings.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineSettings {
    pub id: String,
    pub schedule: String,
    pub catchup: bool,
    pub start_date: Option<chrono::DateTime<chrono::Utc>>,
    pub max_concurrency: usize,
    pub state_path: Option<PathBuf>,
}

/// Validated configuration.
///
/// Only constructed through `TryFrom<RawConfigFile>`, so the graph is acyclic
/// and every task resolves to a configured adapter.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub pipeline: PipelineSettings,
    pub sources: BTreeMap<String, SourceConfig>,
    pub transform: Option<TransformSection>,
    pub metrics: Option<MetricsSection>,
    pub graph: Arc<TaskGraph>,
}
