// src/adapters/process.rs

//! Child-process runner shared by the command and dbt adapters.

use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::{AdapterError, AttemptContext};

/// `EX_NOPERM` from sysexits.h: the command says retrying will not help.
pub const EXIT_NO_PERMISSION: i32 = 77;
/// `EX_CONFIG` from sysexits.h: misconfiguration, never retried.
pub const EXIT_CONFIG: i32 = 78;

/// What to run and how.
#[derive(Debug, Clone)]
pub enum Invocation {
    /// A shell snippet run through `sh -c` (`cmd /C` on Windows).
    Shell(String),
    /// A program with explicit arguments, no shell involved.
    Program { program: String, args: Vec<String> },
}

impl Invocation {
    fn describe(&self) -> String {
        match self {
            Invocation::Shell(cmd) => cmd.clone(),
            Invocation::Program { program, args } => {
                let mut parts = vec![program.clone()];
                parts.extend(args.iter().cloned());
                parts.join(" ")
            }
        }
    }

    fn command(&self) -> Command {
        match self {
            Invocation::Shell(cmd) => {
                if cfg!(windows) {
                    let mut c = Command::new("cmd");
                    c.arg("/C").arg(cmd);
                    c
                } else {
                    let mut c = Command::new("sh");
                    c.arg("-c").arg(cmd);
                    c
                }
            }
            Invocation::Program { program, args } => {
                let mut c = Command::new(program);
                c.args(args);
                c
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProcessSpec {
    pub invocation: Invocation,
    pub env: Vec<(String, String)>,
}

impl ProcessSpec {
    pub fn shell(cmd: impl Into<String>) -> Self {
        Self {
            invocation: Invocation::Shell(cmd.into()),
            env: Vec::new(),
        }
    }

    pub fn program(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            invocation: Invocation::Program {
                program: program.into(),
                args,
            },
            env: Vec::new(),
        }
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }
}

/// Captured result of a finished process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutput {
    /// `-1` when the process was terminated by a signal.
    pub exit_code: i32,
    pub stdout: String,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Last non-empty stdout line, trimmed.
    pub fn last_line(&self) -> Option<&str> {
        self.stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .next_back()
    }
}

/// Map a non-zero exit code to an adapter error following the sysexits
/// convention: 77 and 78 are fatal, everything else may be retried.
pub fn exit_code_error(what: &str, code: i32) -> AdapterError {
    match code {
        EXIT_NO_PERMISSION | EXIT_CONFIG => {
            AdapterError::fatal(format!("{what} exited with code {code}"))
        }
        _ => AdapterError::retryable(format!("{what} exited with code {code}")),
    }
}

/// Run a process to completion, capturing stdout and logging stderr at debug.
///
/// Spawn failures are fatal. If the attempt's cancellation token fires the
/// child is killed and a retryable error is returned.
pub async fn run_process(
    ctx: &AttemptContext,
    spec: &ProcessSpec,
) -> Result<ProcessOutput, AdapterError> {
    let description = spec.invocation.describe();
    info!(
        task = %ctx.task,
        run_id = %ctx.run_id,
        attempt = ctx.attempt,
        cmd = %description,
        "starting task process"
    );

    let mut cmd = spec.invocation.command();
    cmd.envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd.spawn().map_err(|e| {
        AdapterError::fatal(format!("spawning process for task '{}': {e}", ctx.task))
    })?;

    // Always consume stderr so buffers don't fill; log at debug.
    if let Some(stderr) = child.stderr.take() {
        let task_name = ctx.task.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(task = %task_name, "stderr: {}", line);
            }
        });
    }

    let stdout_reader = child.stdout.take().map(|mut stdout| {
        tokio::spawn(async move {
            let mut buf = String::new();
            let _ = stdout.read_to_string(&mut buf).await;
            buf
        })
    });

    tokio::select! {
        status_res = child.wait() => {
            let status = status_res.map_err(|e| {
                AdapterError::retryable(format!("waiting for process of task '{}': {e}", ctx.task))
            })?;

            let stdout = match stdout_reader {
                Some(handle) => handle.await.unwrap_or_default(),
                None => String::new(),
            };
            for line in stdout.lines() {
                debug!(task = %ctx.task, "stdout: {}", line);
            }

            let exit_code = status.code().unwrap_or(-1);
            info!(
                task = %ctx.task,
                run_id = %ctx.run_id,
                exit_code,
                success = status.success(),
                "task process exited"
            );
            Ok(ProcessOutput { exit_code, stdout })
        }

        _ = ctx.cancel.cancelled() => {
            info!(task = %ctx.task, run_id = %ctx.run_id, "run cancelled; killing task process");
            if let Err(e) = child.kill().await {
                warn!(task = %ctx.task, error = %e, "failed to kill child process on cancellation");
            }
            Err(AdapterError::retryable(format!("task '{}' interrupted by cancellation", ctx.task)))
        }
    }
}
