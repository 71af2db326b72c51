//! Comparison of one expanded test case across both targets.
//!
//! The [`Comparer`] evaluates a case against the reference target and the
//! system under test, then diffs the two [`CanonicalResult`]s:
//!
//! ```text
//! ExpandedTestCase
//!       │
//!       ├── reference client ──┐
//!       └── test client ───────┤   (issued concurrently)
//!                              ▼
//!                    error? ── ReferenceError / TestError
//!                              │
//!                    diff_results()
//!                              │
//!           ├── result type differs → ResultTypeMismatch
//!           ├── scalar / string     → value, timestamp
//!           └── vector / matrix     → fingerprint multiset match,
//!                                     then per-timestamp sample diff
//!                              ▼
//!                           Verdict
//! ```
//!
//! Float values match when both are NaN, both are the same infinity, or
//! `|a - b| <= epsilon * max(1, |a|, |b|)`. The rule is symmetric in its
//! arguments.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::Instrument;

use crate::client::{QueryClient, evaluate};
use crate::error::TransportError;
use crate::expand::ExpandedTestCase;
use crate::model::{
    CanonicalResult, Fingerprint, LabelSet, ResultType, Sample, Series, Target, format_value,
};

/// Final classification of a compared case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Pass,
    Mismatch,
    ReferenceError,
    TestError,
}

impl Outcome {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pass => "pass",
            Self::Mismatch => "mismatch",
            Self::ReferenceError => "reference_error",
            Self::TestError => "test_error",
        }
    }

    /// Execution failed against one of the targets.
    #[must_use]
    pub const fn is_error(self) -> bool {
        matches!(self, Self::ReferenceError | Self::TestError)
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One observed difference between the reference and test results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DiffEntry {
    /// The targets disagree on the kind of answer.
    ResultTypeMismatch {
        expected: ResultType,
        actual: ResultType,
    },
    /// A series present in the reference result is absent from the test result.
    MissingSeries { labels: LabelSet },
    /// A series present in the test result is absent from the reference result.
    UnexpectedSeries { labels: LabelSet },
    /// Matching timestamps carry values outside tolerance.
    ValueMismatch {
        labels: LabelSet,
        timestamp: f64,
        #[serde(with = "crate::model::sample_value")]
        expected: f64,
        #[serde(with = "crate::model::sample_value")]
        actual: f64,
    },
    /// A sample timestamp exists on one side only, or scalar timestamps differ.
    TimestampMismatch {
        labels: LabelSet,
        expected: Option<f64>,
        actual: Option<f64>,
    },
    /// String results differ.
    StringMismatch { expected: String, actual: String },
}

impl fmt::Display for DiffEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ResultTypeMismatch { expected, actual } => {
                write!(f, "result type mismatch: expected {expected}, got {actual}")
            }
            Self::MissingSeries { labels } => {
                write!(f, "missing series {}", Fingerprint::of(labels))
            }
            Self::UnexpectedSeries { labels } => {
                write!(f, "unexpected series {}", Fingerprint::of(labels))
            }
            Self::ValueMismatch {
                labels,
                timestamp,
                expected,
                actual,
            } => write!(
                f,
                "value mismatch {} @ {timestamp}: expected {}, got {}",
                Fingerprint::of(labels),
                format_value(*expected),
                format_value(*actual)
            ),
            Self::TimestampMismatch {
                labels,
                expected,
                actual,
            } => write!(
                f,
                "timestamp mismatch {}: expected {}, got {}",
                Fingerprint::of(labels),
                expected.map_or_else(|| "none".to_string(), |t| t.to_string()),
                actual.map_or_else(|| "none".to_string(), |t| t.to_string())
            ),
            Self::StringMismatch { expected, actual } => {
                write!(f, "string mismatch: expected {expected:?}, got {actual:?}")
            }
        }
    }
}

/// The result of comparing one expanded case.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Verdict {
    pub case: ExpandedTestCase,
    pub reference_result: Option<CanonicalResult>,
    pub test_result: Option<CanonicalResult>,
    pub reference_error: Option<String>,
    pub test_error: Option<String>,
    pub diffs: Vec<DiffEntry>,
    pub outcome: Outcome,
}

impl Verdict {
    #[must_use]
    pub fn passed(&self) -> bool {
        self.outcome == Outcome::Pass
    }

    /// The raw error that decided an error outcome.
    #[must_use]
    pub fn error(&self) -> Option<&str> {
        match self.outcome {
            Outcome::ReferenceError => self.reference_error.as_deref(),
            Outcome::TestError => self.test_error.as_deref(),
            Outcome::Pass | Outcome::Mismatch => None,
        }
    }

    /// Query text sent to the target whose call failed, if any.
    #[must_use]
    pub fn failed_query(&self) -> Option<&str> {
        match self.outcome {
            Outcome::ReferenceError => Some(self.case.query_for(Target::Reference)),
            Outcome::TestError => Some(self.case.query_for(Target::Test)),
            Outcome::Pass | Outcome::Mismatch => None,
        }
    }
}

/// Runs cases against both targets. Client handles are shared read-only, so
/// one comparer serves any number of concurrent comparisons.
#[derive(Clone)]
pub struct Comparer {
    reference: Arc<dyn QueryClient>,
    test: Arc<dyn QueryClient>,
    epsilon: f64,
}

impl fmt::Debug for Comparer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Comparer")
            .field("reference", &self.reference.endpoint())
            .field("test", &self.test.endpoint())
            .field("epsilon", &self.epsilon)
            .finish()
    }
}

impl Comparer {
    #[must_use]
    pub fn new(reference: Arc<dyn QueryClient>, test: Arc<dyn QueryClient>, epsilon: f64) -> Self {
        Self {
            reference,
            test,
            epsilon,
        }
    }

    #[must_use]
    pub fn epsilon(&self) -> f64 {
        self.epsilon
    }

    /// Execute `case` against both targets and judge the results.
    pub async fn compare(&self, case: &ExpandedTestCase) -> Verdict {
        let span = tracing::debug_span!(
            "compare",
            case_index = case.index,
            case = %case.name,
            mode = %case.mode()
        );
        self.judge(case).instrument(span).await
    }

    async fn judge(&self, case: &ExpandedTestCase) -> Verdict {
        let (reference, test) = tokio::join!(
            evaluate(self.reference.as_ref(), case.query_for(Target::Reference), &case.eval),
            evaluate(self.test.as_ref(), case.query_for(Target::Test), &case.eval),
        );

        let (reference_result, reference_failure) = split(reference);
        let (test_result, test_failure) = split(test);
        let remediation = reference_failure
            .as_ref()
            .or(test_failure.as_ref())
            .map(|err| err.remediation().summary);

        let mut verdict = Verdict {
            case: case.clone(),
            reference_result,
            test_result,
            reference_error: reference_failure.map(|err| err.to_string()),
            test_error: test_failure.map(|err| err.to_string()),
            diffs: Vec::new(),
            outcome: Outcome::Pass,
        };

        if verdict.reference_error.is_some() {
            verdict.outcome = Outcome::ReferenceError;
        } else if verdict.test_error.is_some() {
            verdict.outcome = Outcome::TestError;
        } else if let (Some(expected), Some(actual)) =
            (&verdict.reference_result, &verdict.test_result)
        {
            if !case.skip_comparison {
                let epsilon = case.epsilon.unwrap_or(self.epsilon);
                verdict.diffs = diff_results(expected, actual, epsilon);
                let diverged = !verdict.diffs.is_empty();
                verdict.outcome = if diverged == case.should_fail {
                    Outcome::Pass
                } else {
                    Outcome::Mismatch
                };
            }
        }

        match verdict.outcome {
            Outcome::Pass => tracing::debug!(
                outcome = %verdict.outcome,
                reference_samples = verdict.reference_result.as_ref().map_or(0, CanonicalResult::sample_count),
                test_samples = verdict.test_result.as_ref().map_or(0, CanonicalResult::sample_count),
                "case compared"
            ),
            Outcome::Mismatch => tracing::info!(
                outcome = %verdict.outcome,
                diffs = verdict.diffs.len(),
                should_fail = case.should_fail,
                "case mismatched"
            ),
            Outcome::ReferenceError | Outcome::TestError => tracing::warn!(
                outcome = %verdict.outcome,
                error = verdict.error().unwrap_or_default(),
                query = verdict.failed_query().unwrap_or_default(),
                remediation = remediation.as_deref().unwrap_or_default(),
                "case execution failed"
            ),
        }

        verdict
    }
}

fn split(
    result: Result<CanonicalResult, TransportError>,
) -> (Option<CanonicalResult>, Option<TransportError>) {
    match result {
        Ok(value) => (Some(value), None),
        Err(err) => (None, Some(err)),
    }
}

/// Tolerance-aware float equality. Symmetric in `a` and `b`.
#[must_use]
#[allow(clippy::float_cmp)]
pub fn values_match(a: f64, b: f64, epsilon: f64) -> bool {
    if a.is_nan() || b.is_nan() {
        return a.is_nan() && b.is_nan();
    }
    if a.is_infinite() || b.is_infinite() {
        return a == b;
    }
    let scale = 1.0_f64.max(a.abs()).max(b.abs());
    (a - b).abs() <= epsilon * scale
}

/// Structured diff of two results; empty iff they match.
#[must_use]
pub fn diff_results(
    reference: &CanonicalResult,
    test: &CanonicalResult,
    epsilon: f64,
) -> Vec<DiffEntry> {
    let mut diffs = Vec::new();
    match (reference, test) {
        (CanonicalResult::Scalar(expected), CanonicalResult::Scalar(actual)) => {
            diff_point(&LabelSet::new(), expected, actual, epsilon, &mut diffs);
        }
        (CanonicalResult::Vector(expected), CanonicalResult::Vector(actual))
        | (CanonicalResult::Matrix(expected), CanonicalResult::Matrix(actual)) => {
            diff_series_sets(expected, actual, epsilon, &mut diffs);
        }
        (
            CanonicalResult::String {
                timestamp: expected_ts,
                value: expected,
            },
            CanonicalResult::String {
                timestamp: actual_ts,
                value: actual,
            },
        ) => {
            if expected_ts.to_bits() != actual_ts.to_bits() {
                diffs.push(DiffEntry::TimestampMismatch {
                    labels: LabelSet::new(),
                    expected: Some(*expected_ts),
                    actual: Some(*actual_ts),
                });
            }
            if expected != actual {
                diffs.push(DiffEntry::StringMismatch {
                    expected: expected.clone(),
                    actual: actual.clone(),
                });
            }
        }
        (
            CanonicalResult::Scalar(_)
            | CanonicalResult::Vector(_)
            | CanonicalResult::Matrix(_)
            | CanonicalResult::String { .. },
            _,
        ) => diffs.push(DiffEntry::ResultTypeMismatch {
            expected: reference.result_type(),
            actual: test.result_type(),
        }),
    }
    diffs
}

#[allow(clippy::float_cmp)]
fn diff_point(
    labels: &LabelSet,
    expected: &Sample,
    actual: &Sample,
    epsilon: f64,
    diffs: &mut Vec<DiffEntry>,
) {
    if expected.timestamp != actual.timestamp {
        diffs.push(DiffEntry::TimestampMismatch {
            labels: labels.clone(),
            expected: Some(expected.timestamp),
            actual: Some(actual.timestamp),
        });
        return;
    }
    if !values_match(expected.value, actual.value, epsilon) {
        diffs.push(DiffEntry::ValueMismatch {
            labels: labels.clone(),
            timestamp: expected.timestamp,
            expected: expected.value,
            actual: actual.value,
        });
    }
}

fn group_by_fingerprint(series: &[Series]) -> BTreeMap<Fingerprint, Vec<&Series>> {
    let mut groups: BTreeMap<Fingerprint, Vec<&Series>> = BTreeMap::new();
    for s in series {
        groups.entry(s.fingerprint()).or_default().push(s);
    }
    groups
}

fn diff_series_sets(
    expected: &[Series],
    actual: &[Series],
    epsilon: f64,
    diffs: &mut Vec<DiffEntry>,
) {
    let expected = group_by_fingerprint(expected);
    let mut actual = group_by_fingerprint(actual);

    for (fingerprint, expected_group) in &expected {
        let actual_group = actual.remove(fingerprint).unwrap_or_default();
        for (i, series) in expected_group.iter().enumerate() {
            match actual_group.get(i) {
                Some(other) => diff_samples(series, other, epsilon, diffs),
                None => diffs.push(DiffEntry::MissingSeries {
                    labels: series.labels.clone(),
                }),
            }
        }
        for extra in actual_group.iter().skip(expected_group.len()) {
            diffs.push(DiffEntry::UnexpectedSeries {
                labels: extra.labels.clone(),
            });
        }
    }

    for extra in actual.values().flatten() {
        diffs.push(DiffEntry::UnexpectedSeries {
            labels: extra.labels.clone(),
        });
    }
}

/// Merge-join two sample sequences on timestamp.
fn diff_samples(expected: &Series, actual: &Series, epsilon: f64, diffs: &mut Vec<DiffEntry>) {
    let mut left = expected.samples.clone();
    let mut right = actual.samples.clone();
    left.sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));
    right.sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));

    let (mut i, mut j) = (0, 0);
    while i < left.len() || j < right.len() {
        let order = match (left.get(i), right.get(j)) {
            (Some(a), Some(b)) => a.timestamp.total_cmp(&b.timestamp),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, _) => std::cmp::Ordering::Greater,
        };
        match order {
            std::cmp::Ordering::Equal => {
                diff_point(&expected.labels, &left[i], &right[j], epsilon, diffs);
                i += 1;
                j += 1;
            }
            std::cmp::Ordering::Less => {
                diffs.push(DiffEntry::TimestampMismatch {
                    labels: expected.labels.clone(),
                    expected: Some(left[i].timestamp),
                    actual: None,
                });
                i += 1;
            }
            std::cmp::Ordering::Greater => {
                diffs.push(DiffEntry::TimestampMismatch {
                    labels: expected.labels.clone(),
                    expected: None,
                    actual: Some(right[j].timestamp),
                });
                j += 1;
            }
        }
    }
}
