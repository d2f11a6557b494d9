#![allow(dead_code)]

//! Scripted stand-ins for the external systems.
//!
//! Each fake pops the next scripted result per call and repeats the last one
//! once the script runs out. Calls are written to a [`CallLog`] that several
//! fakes may share, which lets tests reason about overlapping executions.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use eltflow::adapters::{
    AdapterError, AdapterFuture, AttemptContext, MetricAdapter, Notifier, SyncAdapter,
    SyncRequest, SyncResult, TestOutcome, TransformAdapter, TransformResult,
};
use eltflow::engine::RunReport;
use eltflow::quality::QualityCheck;
use eltflow::state::WatermarkPosition;

/// One adapter call as seen by a fake.
#[derive(Debug, Clone)]
pub struct Call {
    pub task: String,
    pub attempt: u32,
    pub started: Instant,
    pub ended: Instant,
}

#[derive(Debug, Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<Call>>>);

impl CallLog {
    pub fn calls(&self) -> Vec<Call> {
        self.0.lock().unwrap().clone()
    }

    pub fn calls_for(&self, task: &str) -> Vec<Call> {
        self.calls().into_iter().filter(|c| c.task == task).collect()
    }

    /// Largest number of calls that were in progress at the same instant.
    pub fn max_overlap(&self) -> usize {
        let calls = self.calls();
        calls
            .iter()
            .map(|probe| {
                calls
                    .iter()
                    .filter(|c| c.started <= probe.started && probe.started < c.ended)
                    .count()
            })
            .max()
            .unwrap_or(0)
    }

    fn push(&self, ctx: &AttemptContext, started: Instant) {
        self.0.lock().unwrap().push(Call {
            task: ctx.task.clone(),
            attempt: ctx.attempt,
            started,
            ended: Instant::now(),
        });
    }
}

/// Ordered results, the last one repeating forever.
#[derive(Debug)]
struct Script<T> {
    steps: Mutex<(Vec<Result<T, AdapterError>>, usize)>,
}

impl<T: Clone> Script<T> {
    fn new(steps: Vec<Result<T, AdapterError>>) -> Self {
        assert!(!steps.is_empty(), "a script needs at least one step");
        Self {
            steps: Mutex::new((steps, 0)),
        }
    }

    fn next(&self) -> Result<T, AdapterError> {
        let mut guard = self.steps.lock().unwrap();
        let (steps, idx) = &mut *guard;
        let step = steps[(*idx).min(steps.len() - 1)].clone();
        *idx += 1;
        step
    }
}

/// Sleep for `delay`, or fail retryably if the run is cancelled first.
async fn simulate_work(ctx: &AttemptContext, delay: Duration) -> Result<(), AdapterError> {
    if delay.is_zero() {
        return Ok(());
    }
    tokio::select! {
        _ = tokio::time::sleep(delay) => Ok(()),
        _ = ctx.cancel.cancelled() => Err(AdapterError::retryable("interrupted by cancellation")),
    }
}

pub struct ScriptedSyncAdapter {
    script: Script<SyncResult>,
    delay: Duration,
    log: CallLog,
    watermarks_seen: Mutex<Vec<Option<WatermarkPosition>>>,
}

impl ScriptedSyncAdapter {
    pub fn new(steps: Vec<Result<SyncResult, AdapterError>>) -> Self {
        Self {
            script: Script::new(steps),
            delay: Duration::ZERO,
            log: CallLog::default(),
            watermarks_seen: Mutex::new(Vec::new()),
        }
    }

    /// Always succeeds, reporting `offset` as the new watermark.
    pub fn succeeding(rows: u64, offset: i64) -> Self {
        Self::new(vec![Ok(SyncResult {
            rows_synced: rows,
            watermark_position: Some(WatermarkPosition::Offset(offset)),
        })])
    }

    pub fn failing(error: AdapterError) -> Self {
        Self::new(vec![Err(error)])
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_log(mut self, log: CallLog) -> Self {
        self.log = log;
        self
    }

    pub fn log(&self) -> &CallLog {
        &self.log
    }

    /// Watermark handed to each call, in call order.
    pub fn watermarks_seen(&self) -> Vec<Option<WatermarkPosition>> {
        self.watermarks_seen.lock().unwrap().clone()
    }
}

impl SyncAdapter for ScriptedSyncAdapter {
    fn trigger<'a>(
        &'a self,
        ctx: &'a AttemptContext,
        request: &'a SyncRequest,
    ) -> AdapterFuture<'a, SyncResult> {
        Box::pin(async move {
            let started = Instant::now();
            self.watermarks_seen
                .lock()
                .unwrap()
                .push(request.watermark.clone());
            let worked = simulate_work(ctx, self.delay).await;
            self.log.push(ctx, started);
            worked?;
            self.script.next()
        })
    }
}

/// Transform fake: `run` results are scripted per selector, `test` and
/// `freshness` always report the configured outcomes.
pub struct ScriptedTransformAdapter {
    runs: HashMap<String, Script<TransformResult>>,
    tests: Vec<TestOutcome>,
    freshness: Vec<TestOutcome>,
    delay: Duration,
    log: CallLog,
}

impl Default for ScriptedTransformAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedTransformAdapter {
    /// Every selector builds one model successfully.
    pub fn new() -> Self {
        Self {
            runs: HashMap::new(),
            tests: Vec::new(),
            freshness: Vec::new(),
            delay: Duration::ZERO,
            log: CallLog::default(),
        }
    }

    pub fn with_run(mut self, select: &str, steps: Vec<Result<TransformResult, AdapterError>>) -> Self {
        self.runs.insert(select.to_string(), Script::new(steps));
        self
    }

    pub fn with_tests(mut self, tests: Vec<TestOutcome>) -> Self {
        self.tests = tests;
        self
    }

    pub fn with_freshness(mut self, sources: Vec<TestOutcome>) -> Self {
        self.freshness = sources;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_log(mut self, log: CallLog) -> Self {
        self.log = log;
        self
    }

    pub fn log(&self) -> &CallLog {
        &self.log
    }
}

impl TransformAdapter for ScriptedTransformAdapter {
    fn deps<'a>(&'a self, ctx: &'a AttemptContext) -> AdapterFuture<'a, ()> {
        Box::pin(async move {
            let started = Instant::now();
            let worked = simulate_work(ctx, self.delay).await;
            self.log.push(ctx, started);
            worked
        })
    }

    fn run<'a>(
        &'a self,
        ctx: &'a AttemptContext,
        select: Option<&'a str>,
    ) -> AdapterFuture<'a, TransformResult> {
        Box::pin(async move {
            let started = Instant::now();
            let worked = simulate_work(ctx, self.delay).await;
            self.log.push(ctx, started);
            worked?;
            match select.and_then(|s| self.runs.get(s)) {
                Some(script) => script.next(),
                None => Ok(TransformResult {
                    models_built: 1,
                    models_failed: 0,
                }),
            }
        })
    }

    fn test<'a>(
        &'a self,
        ctx: &'a AttemptContext,
        _select: Option<&'a str>,
    ) -> AdapterFuture<'a, Vec<TestOutcome>> {
        Box::pin(async move {
            let started = Instant::now();
            let worked = simulate_work(ctx, self.delay).await;
            self.log.push(ctx, started);
            worked?;
            Ok(self.tests.clone())
        })
    }

    fn freshness<'a>(
        &'a self,
        ctx: &'a AttemptContext,
        _select: Option<&'a str>,
    ) -> AdapterFuture<'a, Vec<TestOutcome>> {
        Box::pin(async move {
            let started = Instant::now();
            let worked = simulate_work(ctx, self.delay).await;
            self.log.push(ctx, started);
            worked?;
            Ok(self.freshness.clone())
        })
    }
}

/// Returns a fixed value per check name; unknown checks fail fatally.
#[derive(Debug, Default)]
pub struct FixedMetricAdapter {
    values: HashMap<String, f64>,
    log: CallLog,
}

impl FixedMetricAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_value(mut self, check: &str, value: f64) -> Self {
        self.values.insert(check.to_string(), value);
        self
    }

    pub fn log(&self) -> &CallLog {
        &self.log
    }
}

impl MetricAdapter for FixedMetricAdapter {
    fn query<'a>(&'a self, ctx: &'a AttemptContext, check: &'a QualityCheck) -> AdapterFuture<'a, f64> {
        Box::pin(async move {
            self.log.push(ctx, Instant::now());
            self.values
                .get(&check.name)
                .copied()
                .ok_or_else(|| AdapterError::fatal(format!("no metric for check '{}'", check.name)))
        })
    }
}

/// Keeps every report it is handed.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    reports: Mutex<Vec<RunReport>>,
}

impl RecordingNotifier {
    pub fn reports(&self) -> Vec<RunReport> {
        self.reports.lock().unwrap().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn notify<'a>(
        &'a self,
        report: &'a RunReport,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send + 'a>> {
        Box::pin(async move {
            self.reports.lock().unwrap().push(report.clone());
        })
    }
}
