// src/adapters/command.rs

//! Shell-command adapters for syncs and metric queries.
//!
//! Protocol for a sync command: the source name, previous watermark and
//! logical timestamp arrive as environment variables; the last non-empty
//! stdout line is a JSON object `{"rows_synced": N, "watermark_position": P}`
//! where `P` is an integer offset, an RFC 3339 timestamp or `null`.
//!
//! A metric command receives the check's query in `ELTFLOW_QUERY` and prints
//! the metric value as its last stdout line.

use tracing::debug;

use super::process::{ProcessSpec, exit_code_error, run_process};
use super::{AdapterError, AdapterFuture, AttemptContext, MetricAdapter, SyncAdapter, SyncRequest, SyncResult};
use crate::quality::QualityCheck;

pub const ENV_SOURCE: &str = "ELTFLOW_SOURCE";
pub const ENV_WATERMARK: &str = "ELTFLOW_WATERMARK";
pub const ENV_LOGICAL_TS: &str = "ELTFLOW_LOGICAL_TS";
pub const ENV_RUN_ID: &str = "ELTFLOW_RUN_ID";
pub const ENV_QUERY: &str = "ELTFLOW_QUERY";
pub const ENV_CHECK: &str = "ELTFLOW_CHECK";

#[derive(Debug, Clone)]
pub struct CommandSyncAdapter {
    cmd: String,
}

impl CommandSyncAdapter {
    pub fn new(cmd: impl Into<String>) -> Self {
        Self { cmd: cmd.into() }
    }

    async fn trigger_inner(
        &self,
        ctx: &AttemptContext,
        request: &SyncRequest,
    ) -> Result<SyncResult, AdapterError> {
        let watermark = request
            .watermark
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_default();

        let spec = ProcessSpec::shell(&self.cmd)
            .env(ENV_SOURCE, &request.source)
            .env(ENV_WATERMARK, watermark)
            .env(ENV_LOGICAL_TS, ctx.logical_ts.to_rfc3339())
            .env(ENV_RUN_ID, &ctx.run_id);

        let output = run_process(ctx, &spec).await?;
        if !output.success() {
            return Err(exit_code_error(
                &format!("sync command for source '{}'", request.source),
                output.exit_code,
            ));
        }

        let result = parse_sync_output(output.last_line())?;
        debug!(
            source = %request.source,
            rows = result.rows_synced,
            watermark = ?result.watermark_position,
            "sync command finished"
        );
        Ok(result)
    }
}

impl SyncAdapter for CommandSyncAdapter {
    fn trigger<'a>(
        &'a self,
        ctx: &'a AttemptContext,
        request: &'a SyncRequest,
    ) -> AdapterFuture<'a, SyncResult> {
        Box::pin(self.trigger_inner(ctx, request))
    }
}

/// Parse the result line of a sync command. No output means nothing synced.
///
/// Malformed output is fatal: the command ran, retrying will print the same.
pub fn parse_sync_output(line: Option<&str>) -> Result<SyncResult, AdapterError> {
    match line {
        None => Ok(SyncResult {
            rows_synced: 0,
            watermark_position: None,
        }),
        Some(line) => serde_json::from_str(line)
            .map_err(|e| AdapterError::fatal(format!("invalid sync command output '{line}': {e}"))),
    }
}

#[derive(Debug, Clone)]
pub struct CommandMetricAdapter {
    cmd: String,
}

impl CommandMetricAdapter {
    pub fn new(cmd: impl Into<String>) -> Self {
        Self { cmd: cmd.into() }
    }

    async fn query_inner(&self, ctx: &AttemptContext, check: &QualityCheck) -> Result<f64, AdapterError> {
        let spec = ProcessSpec::shell(&self.cmd)
            .env(ENV_QUERY, &check.query)
            .env(ENV_CHECK, &check.name)
            .env(ENV_LOGICAL_TS, ctx.logical_ts.to_rfc3339());

        let output = run_process(ctx, &spec).await?;
        if !output.success() {
            return Err(exit_code_error(
                &format!("metric command for check '{}'", check.name),
                output.exit_code,
            ));
        }

        parse_metric_output(output.last_line())
    }
}

impl MetricAdapter for CommandMetricAdapter {
    fn query<'a>(&'a self, ctx: &'a AttemptContext, check: &'a QualityCheck) -> AdapterFuture<'a, f64> {
        Box::pin(self.query_inner(ctx, check))
    }
}

pub fn parse_metric_output(line: Option<&str>) -> Result<f64, AdapterError> {
    let line = line.ok_or_else(|| AdapterError::fatal("metric command printed nothing"))?;
    line.parse::<f64>()
        .map_err(|e| AdapterError::fatal(format!("metric command output '{line}' is not a number: {e}")))
}
