// src/state/model.rs

//! Persisted records: runs, task attempts, watermarks.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::engine::TaskName;

/// Lifecycle of one pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    /// Some work succeeded, but a quality gate failed or tasks were skipped.
    Partial,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunStatus::Succeeded | RunStatus::Failed | RunStatus::Partial
        )
    }

    /// Process exit code reported by `eltflow run`.
    pub fn exit_code(self) -> i32 {
        match self {
            RunStatus::Succeeded => 0,
            RunStatus::Partial => 2,
            RunStatus::Pending | RunStatus::Running | RunStatus::Failed => 1,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Succeeded => "succeeded",
            RunStatus::Failed => "failed",
            RunStatus::Partial => "partial",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RunStatus::Pending),
            "running" => Ok(RunStatus::Running),
            "succeeded" => Ok(RunStatus::Succeeded),
            "failed" => Ok(RunStatus::Failed),
            "partial" => Ok(RunStatus::Partial),
            other => Err(format!("unknown run status '{other}'")),
        }
    }
}

/// One execution instance of a pipeline for a logical timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Run {
    pub run_id: String,
    pub pipeline_id: String,
    pub logical_ts: DateTime<Utc>,
    pub status: RunStatus,
}

/// Status of a single task attempt as stored in the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttemptStatus {
    Running,
    Succeeded,
    Failed,
    Skipped,
}

impl AttemptStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, AttemptStatus::Running)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AttemptStatus::Running => "running",
            AttemptStatus::Succeeded => "succeeded",
            AttemptStatus::Failed => "failed",
            AttemptStatus::Skipped => "skipped",
        }
    }
}

impl fmt::Display for AttemptStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AttemptStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(AttemptStatus::Running),
            "succeeded" => Ok(AttemptStatus::Succeeded),
            "failed" => Ok(AttemptStatus::Failed),
            "skipped" => Ok(AttemptStatus::Skipped),
            other => Err(format!("unknown attempt status '{other}'")),
        }
    }
}

/// Ledger entry for one attempt of one task within one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskAttempt {
    pub task_name: TaskName,
    pub run_id: String,
    /// 1-based, strictly increasing per (run, task).
    pub attempt_number: u32,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub status: AttemptStatus,
    pub error: Option<String>,
}

impl TaskAttempt {
    /// A fresh attempt in `running` state, stamped now.
    pub fn start(run_id: &str, task_name: &str, attempt_number: u32) -> Self {
        Self {
            task_name: task_name.to_string(),
            run_id: run_id.to_string(),
            attempt_number,
            started_at: Utc::now(),
            ended_at: None,
            status: AttemptStatus::Running,
            error: None,
        }
    }

    /// A terminal `skipped` entry for a task that was never dispatched.
    pub fn skipped(run_id: &str, task_name: &str, attempt_number: u32, cause: &str) -> Self {
        let now = Utc::now();
        Self {
            task_name: task_name.to_string(),
            run_id: run_id.to_string(),
            attempt_number,
            started_at: now,
            ended_at: Some(now),
            status: AttemptStatus::Skipped,
            error: Some(cause.to_string()),
        }
    }

    pub fn succeeded(mut self) -> Self {
        self.status = AttemptStatus::Succeeded;
        self.ended_at = Some(Utc::now());
        self.error = None;
        self
    }

    pub fn failed(mut self, error: impl Into<String>) -> Self {
        self.status = AttemptStatus::Failed;
        self.ended_at = Some(Utc::now());
        self.error = Some(error.into());
        self
    }
}

/// Position inside an incrementally loaded source.
///
/// Serialized untagged: offsets as JSON numbers, timestamps as RFC 3339
/// strings. Positions of different kinds are not comparable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WatermarkPosition {
    Offset(i64),
    Timestamp(DateTime<Utc>),
}

impl PartialOrd for WatermarkPosition {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (WatermarkPosition::Offset(a), WatermarkPosition::Offset(b)) => Some(a.cmp(b)),
            (WatermarkPosition::Timestamp(a), WatermarkPosition::Timestamp(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }
}

impl fmt::Display for WatermarkPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WatermarkPosition::Offset(v) => write!(f, "{v}"),
            WatermarkPosition::Timestamp(ts) => write!(f, "{}", ts.to_rfc3339()),
        }
    }
}

/// Last successfully extracted position for one source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Watermark {
    pub source_name: String,
    pub position: WatermarkPosition,
    pub updated_at: DateTime<Utc>,
}
