// src/adapters/dbt.rs

//! Transform adapter driving the `dbt` command line.

use std::path::PathBuf;
use std::sync::LazyLock;

use regex::Regex;
use tracing::{info, warn};

use super::process::{ProcessOutput, ProcessSpec, run_process};
use super::{AdapterError, AdapterFuture, AttemptContext, TestOutcome, TransformAdapter, TransformResult};

/// `Done. PASS=3 WARN=0 ERROR=1 SKIP=0 TOTAL=4` (newer releases add `NO-OP=`).
static SUMMARY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Done\. PASS=(\d+) WARN=(\d+) ERROR=(\d+) SKIP=(\d+)(?: NO-OP=\d+)? TOTAL=(\d+)")
        .expect("dbt summary regex is valid")
});

/// `12 of 40 PASS not_null_orders_order_id ....... [PASS in 0.10s]`
static TEST_LINE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\d+ of \d+ (PASS|FAIL|WARN|ERROR) (?:\d+ )?(\S+)")
        .expect("dbt test regex is valid")
});

/// `3 of 4 ERROR STALE freshness of raw.orders ..... [ERROR STALE in 0.21s]`
static FRESHNESS_LINE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\d+ of \d+ (PASS|WARN|ERROR STALE|ERROR) freshness of (\S+)")
        .expect("dbt freshness regex is valid")
});

/// dbt's exit code when the command ran but models or tests failed.
const EXIT_MODEL_FAILURE: i32 = 1;

/// Parsed `Done.` line of a dbt invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DbtSummary {
    pub pass: u32,
    pub warn: u32,
    pub error: u32,
    pub skip: u32,
    pub total: u32,
}

impl DbtSummary {
    /// Finds the last summary line in `output`.
    pub fn parse(output: &str) -> Option<Self> {
        let caps = SUMMARY_RE.captures_iter(output).last()?;
        let num = |i: usize| caps.get(i).and_then(|m| m.as_str().parse().ok()).unwrap_or(0);
        Some(Self {
            pass: num(1),
            warn: num(2),
            error: num(3),
            skip: num(4),
            total: num(5),
        })
    }
}

/// Per-test results from `dbt test` output.
pub fn parse_test_outcomes(output: &str) -> Vec<TestOutcome> {
    TEST_LINE_RE
        .captures_iter(output)
        .map(|caps| TestOutcome {
            name: caps[2].to_string(),
            passed: matches!(&caps[1], "PASS" | "WARN"),
        })
        .collect()
}

/// Per-source results from `dbt source freshness` output. Sources past
/// their `warn_after` still pass; `error_after` (or a failed query) does not.
pub fn parse_freshness_outcomes(output: &str) -> Vec<TestOutcome> {
    FRESHNESS_LINE_RE
        .captures_iter(output)
        .map(|caps| TestOutcome {
            name: caps[2].to_string(),
            passed: matches!(&caps[1], "PASS" | "WARN"),
        })
        .collect()
}

/// Runs dbt from the process working directory; relative `project_dir` and
/// `profiles_dir` resolve against it once, through the CLI flags.
#[derive(Debug, Clone)]
pub struct DbtAdapter {
    dbt_bin: String,
    project_dir: PathBuf,
    profiles_dir: Option<PathBuf>,
    target: Option<String>,
}

impl DbtAdapter {
    pub fn new(dbt_bin: impl Into<String>, project_dir: impl Into<PathBuf>) -> Self {
        Self {
            dbt_bin: dbt_bin.into(),
            project_dir: project_dir.into(),
            profiles_dir: None,
            target: None,
        }
    }

    pub fn with_profiles_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.profiles_dir = Some(dir.into());
        self
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    /// Full argument list for one dbt sub-command (`"source freshness"` is
    /// split into its words).
    pub fn args(&self, subcommand: &str, select: Option<&str>) -> Vec<String> {
        let mut args: Vec<String> = subcommand.split_whitespace().map(String::from).collect();
        if let Some(select) = select {
            args.push("--select".to_string());
            args.push(select.to_string());
        }
        args.push("--project-dir".to_string());
        args.push(self.project_dir.display().to_string());
        if let Some(dir) = &self.profiles_dir {
            args.push("--profiles-dir".to_string());
            args.push(dir.display().to_string());
        }
        if let Some(target) = &self.target {
            args.push("--target".to_string());
            args.push(target.clone());
        }
        args
    }

    async fn invoke(
        &self,
        ctx: &AttemptContext,
        subcommand: &str,
        select: Option<&str>,
    ) -> Result<ProcessOutput, AdapterError> {
        let spec = ProcessSpec::program(&self.dbt_bin, self.args(subcommand, select));
        let output = run_process(ctx, &spec).await?;

        match output.exit_code {
            0 | EXIT_MODEL_FAILURE => Ok(output),
            code => Err(AdapterError::retryable(format!(
                "dbt {subcommand} exited with code {code}"
            ))),
        }
    }

    async fn run_inner(&self, ctx: &AttemptContext, select: Option<&str>) -> Result<TransformResult, AdapterError> {
        let output = self.invoke(ctx, "run", select).await?;
        let summary = DbtSummary::parse(&output.stdout);

        let result = match summary {
            Some(s) => TransformResult {
                models_built: s.pass + s.warn,
                models_failed: s.error,
            },
            None if output.success() => {
                warn!(task = %ctx.task, "dbt run printed no summary line");
                TransformResult::default()
            }
            None => {
                return Err(AdapterError::retryable(
                    "dbt run failed before printing a summary",
                ));
            }
        };

        info!(
            task = %ctx.task,
            built = result.models_built,
            failed = result.models_failed,
            "dbt run finished"
        );
        Ok(result)
    }

    async fn test_inner(&self, ctx: &AttemptContext, select: Option<&str>) -> Result<Vec<TestOutcome>, AdapterError> {
        let output = self.invoke(ctx, "test", select).await?;
        let outcomes = parse_test_outcomes(&output.stdout);

        if outcomes.is_empty() && !output.success() {
            return Err(AdapterError::retryable(
                "dbt test failed before reporting any test",
            ));
        }

        let failed = outcomes.iter().filter(|o| !o.passed).count();
        info!(task = %ctx.task, tests = outcomes.len(), failed, "dbt test finished");
        Ok(outcomes)
    }

    async fn freshness_inner(
        &self,
        ctx: &AttemptContext,
        select: Option<&str>,
    ) -> Result<Vec<TestOutcome>, AdapterError> {
        let output = self.invoke(ctx, "source freshness", select).await?;
        let sources = parse_freshness_outcomes(&output.stdout);

        if sources.is_empty() && !output.success() {
            return Err(AdapterError::retryable(
                "dbt source freshness failed before checking any source",
            ));
        }

        let stale = sources.iter().filter(|o| !o.passed).count();
        info!(task = %ctx.task, sources = sources.len(), stale, "dbt source freshness finished");
        Ok(sources)
    }

    async fn deps_inner(&self, ctx: &AttemptContext) -> Result<(), AdapterError> {
        let output = self.invoke(ctx, "deps", None).await?;
        if output.success() {
            Ok(())
        } else {
            Err(AdapterError::retryable("dbt deps failed"))
        }
    }
}

impl TransformAdapter for DbtAdapter {
    fn deps<'a>(&'a self, ctx: &'a AttemptContext) -> AdapterFuture<'a, ()> {
        Box::pin(self.deps_inner(ctx))
    }

    fn run<'a>(&'a self, ctx: &'a AttemptContext, select: Option<&'a str>) -> AdapterFuture<'a, TransformResult> {
        Box::pin(self.run_inner(ctx, select))
    }

    fn test<'a>(
        &'a self,
        ctx: &'a AttemptContext,
        select: Option<&'a str>,
    ) -> AdapterFuture<'a, Vec<TestOutcome>> {
        Box::pin(self.test_inner(ctx, select))
    }

    fn freshness<'a>(
        &'a self,
        ctx: &'a AttemptContext,
        select: Option<&'a str>,
    ) -> AdapterFuture<'a, Vec<TestOutcome>> {
        Box::pin(self.freshness_inner(ctx, select))
    }
}
