// src/config/validate.rs

use std::sync::Arc;
use std::time::Duration;

use crate::config::model::{
    CheckConfig, ConfigFile, PipelineSettings, RawConfigFile, SourceConfig, TaskConfig, TaskKind,
};
use crate::dag::{TaskGraph, TaskNode, TransformOp};
use crate::errors::{EltflowError, Result};
use crate::exec::RetryPolicy;
use crate::quality::{Comparator, QualityCheck};
use crate::trigger::{Clock, parse_timestamp};

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = EltflowError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_pipeline(&raw)?;

        let nodes = raw
            .task
            .iter()
            .map(|(name, task)| build_node(&raw, name, task))
            .collect::<Result<Vec<_>>>()?;
        let graph = TaskGraph::build(nodes)?;

        let start_date = raw
            .pipeline
            .start_date
            .as_deref()
            .map(parse_timestamp)
            .transpose()?;

        Ok(ConfigFile {
            pipeline: PipelineSettings {
                id: raw.pipeline.id,
                schedule: raw.pipeline.schedule,
                catchup: raw.pipeline.catchup,
                start_date,
                max_concurrency: raw.pipeline.max_concurrency,
                state_path: raw.pipeline.state_path,
            },
            sources: raw.sources,
            transform: raw.transform,
            metrics: raw.metrics,
            graph: Arc::new(graph),
        })
    }
}

fn config_error(msg: impl Into<String>) -> EltflowError {
    EltflowError::ConfigError(msg.into())
}

fn validate_pipeline(cfg: &RawConfigFile) -> Result<()> {
    if cfg.pipeline.id.trim().is_empty() {
        return Err(config_error("[pipeline].id must not be empty"));
    }
    if cfg.pipeline.max_concurrency == 0 {
        return Err(config_error("[pipeline].max_concurrency must be >= 1 (got 0)"));
    }
    if cfg.task.is_empty() {
        return Err(config_error(
            "config must contain at least one [task.<name>] section",
        ));
    }
    Clock::parse(&cfg.pipeline.schedule)?;

    for (name, source) in &cfg.sources {
        if let SourceConfig::Airbyte {
            poll_interval: Some(interval),
            ..
        } = source
        {
            parse_duration(interval)
                .map_err(|e| config_error(format!("[sources.{name}].poll_interval: {e}")))?;
        }
    }
    Ok(())
}

/// Turn one `[task.<name>]` section into a graph node, resolving defaults.
fn build_node(cfg: &RawConfigFile, name: &str, task: &TaskConfig) -> Result<TaskNode> {
    let mut node = match task.kind {
        TaskKind::Sync => {
            let source = task.source.as_deref().ok_or_else(|| {
                config_error(format!("task '{name}' has kind = \"sync\" but no `source`"))
            })?;
            if !cfg.sources.contains_key(source) {
                return Err(config_error(format!(
                    "task '{name}' references unknown source '{source}'"
                )));
            }
            TaskNode::sync(name, source)
        }
        TaskKind::Transform => {
            if cfg.transform.is_none() {
                return Err(config_error(format!(
                    "task '{name}' is a transform but no [transform] section is configured"
                )));
            }
            TaskNode::transform(name, task.op.unwrap_or(TransformOp::Run), task.select.as_deref())
        }
        TaskKind::QualityGate => {
            if cfg.metrics.is_none() {
                return Err(config_error(format!(
                    "task '{name}' is a quality gate but no [metrics] section is configured"
                )));
            }
            if task.checks.is_empty() {
                return Err(config_error(format!(
                    "quality gate '{name}' must define at least one check"
                )));
            }
            let checks = task
                .checks
                .iter()
                .map(|c| build_check(name, c))
                .collect::<Result<Vec<_>>>()?;
            TaskNode::gate(name, checks)
        }
    };

    for dep in &task.after {
        node = node.after(dep.as_str());
    }

    let retries = task.retries.unwrap_or(cfg.pipeline.default_retry_count);
    let base_ms = task.backoff_base_ms.unwrap_or(cfg.pipeline.default_backoff_base_ms);
    node = node
        .with_retry_policy(RetryPolicy::from_retry_count(
            retries,
            base_ms,
            cfg.pipeline.default_backoff_max_ms,
        ))
        .run_on_upstream_failure(task.run_on_upstream_failure);

    if let Some(timeout) = &task.timeout {
        let limit = parse_duration(timeout)
            .map_err(|e| config_error(format!("task '{name}' has invalid timeout: {e}")))?;
        node = node.with_timeout(limit, task.timeout_is_fatal);
    } else if task.timeout_is_fatal {
        return Err(config_error(format!(
            "task '{name}' sets timeout_is_fatal without a timeout"
        )));
    }

    if let Some(group) = &task.group {
        node = node.in_group(group.as_str());
    }

    Ok(node)
}

fn build_check(task: &str, check: &CheckConfig) -> Result<QualityCheck> {
    match (check.op, check.threshold, check.min, check.max) {
        (Comparator::Between, None, Some(min), Some(max)) if min <= max => {
            Ok(QualityCheck::between(&check.name, &check.query, min, max))
        }
        (Comparator::Between, ..) => Err(config_error(format!(
            "check '{}' in task '{task}': `between` needs `min` <= `max` and no `threshold`",
            check.name
        ))),
        (op, Some(threshold), None, None) => {
            Ok(QualityCheck::new(&check.name, &check.query, op, threshold))
        }
        _ => Err(config_error(format!(
            "check '{}' in task '{task}': `{}` needs exactly a `threshold`",
            check.name,
            check.op.symbol()
        ))),
    }
}

/// Parse a simple duration string like `"3s"`, `"250ms"`, `"1m"`, `"2h"`.
pub fn parse_duration(s: &str) -> std::result::Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty duration string".to_string());
    }

    // Find the boundary between digits and suffix.
    let idx = s
        .chars()
        .position(|c| !c.is_ascii_digit())
        .ok_or_else(|| "duration missing unit suffix".to_string())?;

    let (num_part, unit_part) = s.split_at(idx);
    let value: u64 = num_part
        .parse()
        .map_err(|e| format!("invalid duration number '{}': {}", num_part, e))?;

    let unit = unit_part.trim().to_lowercase();
    match unit.as_str() {
        "ms" => Ok(Duration::from_millis(value)),
        "s" => Ok(Duration::from_secs(value)),
        "m" => Ok(Duration::from_secs(value * 60)),
        "h" => Ok(Duration::from_secs(value * 60 * 60)),
        _ => Err(format!(
            "unsupported duration unit '{}'; expected ms, s, m, or h",
            unit
        )),
    }
}
