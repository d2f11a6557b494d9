// src/state/sqlite.rs

//! `SQLite`-backed implementation of [`RunLedger`] and [`WatermarkStore`].
//!
//! Uses a single `Mutex<Connection>`; every trait method is one short
//! critical section, so appends and compare-and-set are atomic per key.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, params};

use super::error::{self, StateError};
use super::model::{
    AttemptStatus, Run, RunStatus, TaskAttempt, Watermark, WatermarkPosition,
};
use super::{AppendAction, RunLedger, WatermarkStore, check_append};

/// Idempotent DDL for state tables.
const CREATE_TABLES: &str = r"
CREATE TABLE IF NOT EXISTS runs (
    run_id TEXT PRIMARY KEY,
    pipeline_id TEXT NOT NULL,
    logical_ts TEXT NOT NULL,
    status TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS task_attempts (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id TEXT NOT NULL,
    task_name TEXT NOT NULL,
    attempt_number INTEGER NOT NULL,
    started_at TEXT NOT NULL,
    ended_at TEXT,
    status TEXT NOT NULL,
    error TEXT,
    UNIQUE (run_id, task_name, attempt_number)
);

CREATE TABLE IF NOT EXISTS watermarks (
    source_name TEXT PRIMARY KEY,
    position TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_runs_pipeline ON runs (pipeline_id, logical_ts);
";

/// `SQLite` state storage.
///
/// Create with [`SqliteState::open`] for file-backed persistence or
/// [`SqliteState::in_memory`] for tests.
pub struct SqliteState {
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for SqliteState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteState").finish_non_exhaustive()
    }
}

impl SqliteState {
    /// Open or create a state database at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Io`] if the directory can't be created, or
    /// [`StateError::Sqlite`] if the database can't be opened.
    pub fn open(path: &Path) -> error::Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    /// In-memory database (for tests).
    pub fn in_memory() -> error::Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> error::Result<Self> {
        conn.execute_batch(CREATE_TABLES)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock_conn(&self) -> error::Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StateError::LockPoisoned)
    }
}

/// Fixed-width UTC timestamps so text ordering matches time ordering.
fn fmt_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(raw: &str) -> error::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StateError::Corrupt(format!("bad timestamp '{raw}': {e}")))
}

fn encode_position(position: &WatermarkPosition) -> error::Result<String> {
    serde_json::to_string(position).map_err(|e| StateError::Corrupt(e.to_string()))
}

fn decode_position(raw: &str) -> error::Result<WatermarkPosition> {
    serde_json::from_str(raw)
        .map_err(|e| StateError::Corrupt(format!("bad watermark position '{raw}': {e}")))
}

type RunRow = (String, String, String, String);

fn run_from_row(row: RunRow) -> error::Result<Run> {
    let (run_id, pipeline_id, logical_ts, status) = row;
    Ok(Run {
        run_id,
        pipeline_id,
        logical_ts: parse_ts(&logical_ts)?,
        status: status.parse().map_err(StateError::Corrupt)?,
    })
}

type AttemptRow = (String, String, u32, String, Option<String>, String, Option<String>);

fn attempt_from_row(row: AttemptRow) -> error::Result<TaskAttempt> {
    let (run_id, task_name, attempt_number, started_at, ended_at, status, error) = row;
    Ok(TaskAttempt {
        task_name,
        run_id,
        attempt_number,
        started_at: parse_ts(&started_at)?,
        ended_at: ended_at.as_deref().map(parse_ts).transpose()?,
        status: status.parse::<AttemptStatus>().map_err(StateError::Corrupt)?,
        error,
    })
}

const ATTEMPT_COLUMNS: &str =
    "run_id, task_name, attempt_number, started_at, ended_at, status, error";

impl RunLedger for SqliteState {
    fn begin_run(&self, run: &Run) -> error::Result<()> {
        let conn = self.lock_conn()?;
        let existing: Option<String> = conn
            .query_row(
                "SELECT status FROM runs WHERE run_id = ?1",
                [&run.run_id],
                |row| row.get(0),
            )
            .optional()?;

        match existing {
            Some(status) => {
                let status: RunStatus = status.parse().map_err(StateError::Corrupt)?;
                if status.is_terminal() {
                    return Err(StateError::RunAlreadyTerminal(run.run_id.clone()));
                }
                conn.execute(
                    "UPDATE runs SET status = ?1 WHERE run_id = ?2",
                    params![run.status.as_str(), run.run_id],
                )?;
            }
            None => {
                conn.execute(
                    "INSERT INTO runs (run_id, pipeline_id, logical_ts, status) \
                     VALUES (?1, ?2, ?3, ?4)",
                    params![
                        run.run_id,
                        run.pipeline_id,
                        fmt_ts(&run.logical_ts),
                        run.status.as_str()
                    ],
                )?;
            }
        }
        Ok(())
    }

    fn finish_run(&self, run_id: &str, status: RunStatus) -> error::Result<()> {
        let conn = self.lock_conn()?;
        let updated = conn.execute(
            "UPDATE runs SET status = ?1 \
             WHERE run_id = ?2 AND status NOT IN ('succeeded', 'failed', 'partial')",
            params![status.as_str(), run_id],
        )?;
        if updated == 1 {
            return Ok(());
        }

        let exists: Option<String> = conn
            .query_row("SELECT status FROM runs WHERE run_id = ?1", [run_id], |row| {
                row.get(0)
            })
            .optional()?;
        match exists {
            Some(_) => Err(StateError::RunAlreadyTerminal(run_id.to_string())),
            None => Err(StateError::UnknownRun(run_id.to_string())),
        }
    }

    fn run(&self, run_id: &str) -> error::Result<Option<Run>> {
        let conn = self.lock_conn()?;
        let row: Option<RunRow> = conn
            .query_row(
                "SELECT run_id, pipeline_id, logical_ts, status FROM runs WHERE run_id = ?1",
                [run_id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )
            .optional()?;
        row.map(run_from_row).transpose()
    }

    fn latest_run(&self, pipeline_id: &str) -> error::Result<Option<Run>> {
        let conn = self.lock_conn()?;
        let row: Option<RunRow> = conn
            .query_row(
                "SELECT run_id, pipeline_id, logical_ts, status FROM runs \
                 WHERE pipeline_id = ?1 ORDER BY logical_ts DESC LIMIT 1",
                [pipeline_id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )
            .optional()?;
        row.map(run_from_row).transpose()
    }

    fn record(&self, attempt: &TaskAttempt) -> error::Result<()> {
        let conn = self.lock_conn()?;
        let latest: Option<AttemptRow> = conn
            .query_row(
                &format!(
                    "SELECT {ATTEMPT_COLUMNS} FROM task_attempts \
                     WHERE run_id = ?1 AND task_name = ?2 \
                     ORDER BY attempt_number DESC LIMIT 1"
                ),
                params![attempt.run_id, attempt.task_name],
                |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                        row.get(5)?,
                        row.get(6)?,
                    ))
                },
            )
            .optional()?;
        let latest = latest.map(attempt_from_row).transpose()?;

        match check_append(latest.as_ref(), attempt)? {
            AppendAction::Insert => {
                conn.execute(
                    "INSERT INTO task_attempts \
                     (run_id, task_name, attempt_number, started_at, ended_at, status, error) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    params![
                        attempt.run_id,
                        attempt.task_name,
                        attempt.attempt_number,
                        fmt_ts(&attempt.started_at),
                        attempt.ended_at.as_ref().map(fmt_ts),
                        attempt.status.as_str(),
                        attempt.error
                    ],
                )?;
            }
            AppendAction::Complete => {
                conn.execute(
                    "UPDATE task_attempts SET ended_at = ?1, status = ?2, error = ?3 \
                     WHERE run_id = ?4 AND task_name = ?5 AND attempt_number = ?6 \
                     AND status = 'running'",
                    params![
                        attempt.ended_at.as_ref().map(fmt_ts),
                        attempt.status.as_str(),
                        attempt.error,
                        attempt.run_id,
                        attempt.task_name,
                        attempt.attempt_number
                    ],
                )?;
            }
        }
        Ok(())
    }

    fn history(&self, run_id: &str) -> error::Result<Vec<TaskAttempt>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {ATTEMPT_COLUMNS} FROM task_attempts WHERE run_id = ?1 ORDER BY seq"
        ))?;
        let rows = stmt.query_map([run_id], |row| {
            Ok((
                row.get(0)?,
                row.get(1)?,
                row.get(2)?,
                row.get(3)?,
                row.get(4)?,
                row.get(5)?,
                row.get(6)?,
            ))
        })?;

        let mut attempts = Vec::new();
        for row in rows {
            attempts.push(attempt_from_row(row?)?);
        }
        Ok(attempts)
    }
}

impl WatermarkStore for SqliteState {
    fn get(&self, source_name: &str) -> error::Result<Option<Watermark>> {
        let conn = self.lock_conn()?;
        let row: Option<(String, String)> = conn
            .query_row(
                "SELECT position, updated_at FROM watermarks WHERE source_name = ?1",
                [source_name],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        row.map(|(position, updated_at)| {
            Ok(Watermark {
                source_name: source_name.to_string(),
                position: decode_position(&position)?,
                updated_at: parse_ts(&updated_at)?,
            })
        })
        .transpose()
    }

    fn set(&self, source_name: &str, position: &WatermarkPosition) -> error::Result<()> {
        let encoded = encode_position(position)?;
        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT INTO watermarks (source_name, position, updated_at) VALUES (?1, ?2, ?3) \
             ON CONFLICT (source_name) DO UPDATE SET \
             position = excluded.position, updated_at = excluded.updated_at",
            params![source_name, encoded, fmt_ts(&Utc::now())],
        )?;
        Ok(())
    }

    fn compare_and_set(
        &self,
        source_name: &str,
        expected: Option<&WatermarkPosition>,
        new: &WatermarkPosition,
    ) -> error::Result<bool> {
        let encoded = encode_position(new)?;
        let now = fmt_ts(&Utc::now());
        let conn = self.lock_conn()?;

        let rows_affected = match expected {
            Some(expected) => conn.execute(
                "UPDATE watermarks SET position = ?1, updated_at = ?2 \
                 WHERE source_name = ?3 AND position = ?4",
                params![encoded, now, source_name, encode_position(expected)?],
            )?,
            None => conn.execute(
                "INSERT OR IGNORE INTO watermarks (source_name, position, updated_at) \
                 VALUES (?1, ?2, ?3)",
                params![source_name, encoded, now],
            )?,
        };

        Ok(rows_affected > 0)
    }
}
