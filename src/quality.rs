// src/quality.rs

//! Declarative data-quality checks and their evaluation.
//!
//! A gate task holds one or more [`QualityCheck`]s. The executor asks the
//! metric adapter for each check's current value and hands it to
//! [`QualityGate::evaluate`], which is a pure comparison. The gate task
//! succeeds only when every check passes.

use std::fmt;

use serde::{Deserialize, Serialize};

/// How the metric is compared with the threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Comparator {
    Gte,
    Lte,
    Gt,
    Lt,
    Eq,
    /// Inclusive range; requires [`Threshold::Range`].
    Between,
}

impl Comparator {
    pub fn symbol(self) -> &'static str {
        match self {
            Comparator::Gte => ">=",
            Comparator::Lte => "<=",
            Comparator::Gt => ">",
            Comparator::Lt => "<",
            Comparator::Eq => "==",
            Comparator::Between => "in",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Threshold {
    Value(f64),
    Range { min: f64, max: f64 },
}

impl fmt::Display for Threshold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Threshold::Value(v) => write!(f, "{v}"),
            Threshold::Range { min, max } => write!(f, "[{min}, {max}]"),
        }
    }
}

/// One check a gate task evaluates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityCheck {
    pub name: String,
    /// Metric definition handed to the metric adapter (usually SQL).
    pub query: String,
    pub comparator: Comparator,
    pub threshold: Threshold,
}

impl QualityCheck {
    pub fn new(
        name: impl Into<String>,
        query: impl Into<String>,
        comparator: Comparator,
        threshold: f64,
    ) -> Self {
        Self {
            name: name.into(),
            query: query.into(),
            comparator,
            threshold: Threshold::Value(threshold),
        }
    }

    pub fn between(name: impl Into<String>, query: impl Into<String>, min: f64, max: f64) -> Self {
        Self {
            name: name.into(),
            query: query.into(),
            comparator: Comparator::Between,
            threshold: Threshold::Range { min, max },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityCheckResult {
    pub check_name: String,
    pub passed: bool,
    pub metric_value: f64,
    pub comparator: Comparator,
    pub threshold: Threshold,
}

impl fmt::Display for QualityCheckResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: metric {} (expected {} {})",
            self.check_name,
            self.metric_value,
            self.comparator.symbol(),
            self.threshold
        )
    }
}

/// Stateless evaluator for quality checks.
pub struct QualityGate;

impl QualityGate {
    /// Compare `metric_value` against the check's threshold.
    ///
    /// NaN never passes. A `between` check with a scalar threshold, or a
    /// scalar comparator with a range, never passes either; config
    /// validation rejects both shapes up front.
    pub fn evaluate(check: &QualityCheck, metric_value: f64) -> QualityCheckResult {
        let passed = !metric_value.is_nan()
            && match (check.comparator, check.threshold) {
                (Comparator::Gte, Threshold::Value(t)) => metric_value >= t,
                (Comparator::Lte, Threshold::Value(t)) => metric_value <= t,
                (Comparator::Gt, Threshold::Value(t)) => metric_value > t,
                (Comparator::Lt, Threshold::Value(t)) => metric_value < t,
                (Comparator::Eq, Threshold::Value(t)) => approx_eq(metric_value, t),
                (Comparator::Between, Threshold::Range { min, max }) => {
                    metric_value >= min && metric_value <= max
                }
                _ => false,
            };

        QualityCheckResult {
            check_name: check.name.clone(),
            passed,
            metric_value,
            comparator: check.comparator,
            threshold: check.threshold,
        }
    }

    /// Error text for a failed gate, or `None` if every check passed.
    pub fn failure_summary(results: &[QualityCheckResult]) -> Option<String> {
        let failed: Vec<String> = results
            .iter()
            .filter(|r| !r.passed)
            .map(|r| r.to_string())
            .collect();

        if failed.is_empty() {
            None
        } else {
            Some(format!(
                "{} of {} quality checks failed: {}",
                failed.len(),
                results.len(),
                failed.join("; ")
            ))
        }
    }
}

fn approx_eq(a: f64, b: f64) -> bool {
    (a - b).abs() <= f64::EPSILON * a.abs().max(b.abs()).max(1.0)
}
