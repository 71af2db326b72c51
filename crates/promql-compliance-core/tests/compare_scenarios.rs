//! End-to-end comparison scenarios against in-memory query engines.
//!
//! Each scenario wires a [`Comparer`] to two canned clients and checks the
//! resulting verdicts, the run summary and the failed-query report.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};

use promql_compliance_core::client::QueryClient;
use promql_compliance_core::compare::{Comparer, DiffEntry, Outcome};
use promql_compliance_core::error::TransportError;
use promql_compliance_core::expand::{
    EvalWindow, EvaluationMode, ExpandedTestCase, TestCaseTemplate, expand,
};
use promql_compliance_core::model::{CanonicalResult, LabelSet, ResultType, Sample, Series, Target};
use promql_compliance_core::runner::RunContext;
use promql_compliance_core::tweak::{QueryTweak, QueryTweaker, TweakTarget};

const T0: f64 = 1_700_000_000.0;

// =============================================================================
// Canned client
// =============================================================================

type Canned = Result<CanonicalResult, TransportError>;

/// Answers by exact query text; unknown queries get an API error envelope.
struct CannedClient {
    name: &'static str,
    answers: BTreeMap<String, Canned>,
    /// Per-query artificial latency, to shuffle completion order.
    delays: BTreeMap<String, Duration>,
    calls: AtomicUsize,
}

impl CannedClient {
    fn new(name: &'static str) -> Self {
        Self {
            name,
            answers: BTreeMap::new(),
            delays: BTreeMap::new(),
            calls: AtomicUsize::new(0),
        }
    }

    fn answer(mut self, query: &str, result: Canned) -> Self {
        self.answers.insert(query.to_string(), result);
        self
    }

    fn delay(mut self, query: &str, delay: Duration) -> Self {
        self.delays.insert(query.to_string(), delay);
        self
    }

    async fn respond(&self, query: &str) -> Canned {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delays.get(query) {
            tokio::time::sleep(*delay).await;
        }
        self.answers.get(query).cloned().unwrap_or_else(|| {
            Err(TransportError::QueryFailed {
                error_type: "bad_data".to_string(),
                message: format!("no canned answer for {query}"),
            })
        })
    }
}

#[async_trait]
impl QueryClient for CannedClient {
    async fn query(&self, query: &str, _time: f64) -> Canned {
        self.respond(query).await
    }

    async fn query_range(&self, query: &str, _start: f64, _end: f64, _step: f64) -> Canned {
        self.respond(query).await
    }

    fn endpoint(&self) -> &str {
        self.name
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn labels(pairs: &[(&str, &str)]) -> LabelSet {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect()
}

fn instant_vector(series: &[(&str, f64)]) -> CanonicalResult {
    CanonicalResult::Vector(
        series
            .iter()
            .map(|(job, value)| Series::new(labels(&[("job", job)]), vec![Sample::new(T0, *value)]))
            .collect(),
    )
}

fn window() -> EvalWindow {
    EvalWindow::ending_at(
        Utc.timestamp_opt(T0 as i64, 0).unwrap(),
        Duration::from_secs(600),
        Duration::from_secs(10),
    )
    .unwrap()
}

fn instant_cases(templates: Vec<TestCaseTemplate>, tweaks: &[QueryTweak]) -> Vec<ExpandedTestCase> {
    let templates: Vec<TestCaseTemplate> = templates
        .into_iter()
        .map(|t| TestCaseTemplate {
            evaluation_modes: vec![EvaluationMode::Instant],
            ..t
        })
        .collect();
    let tweaker = QueryTweaker::new(tweaks).unwrap();
    expand(&templates, &BTreeMap::new(), &tweaker, &window()).unwrap()
}

fn comparer(reference: CannedClient, test: CannedClient) -> Comparer {
    Comparer::new(Arc::new(reference), Arc::new(test), 1e-6)
}

fn up_case() -> ExpandedTestCase {
    instant_cases(vec![TestCaseTemplate::new("up", "up")], &[]).remove(0)
}

// =============================================================================
// Single-case scenarios
// =============================================================================

#[tokio::test]
async fn identical_vectors_pass() {
    let reference = CannedClient::new("ref").answer("up", Ok(instant_vector(&[("a", 1.0)])));
    let test = CannedClient::new("sut").answer("up", Ok(instant_vector(&[("a", 1.0)])));

    let verdict = comparer(reference, test).compare(&up_case()).await;
    assert_eq!(verdict.outcome, Outcome::Pass);
    assert!(verdict.diffs.is_empty());
    assert!(verdict.reference_result.is_some());
}

#[tokio::test]
async fn value_within_epsilon_passes() {
    // |1 - 1.0000001| = 1e-7 <= 1e-6 * 1.0000001
    let reference = CannedClient::new("ref").answer("up", Ok(instant_vector(&[("a", 1.0)])));
    let test = CannedClient::new("sut").answer("up", Ok(instant_vector(&[("a", 1.000_000_1)])));

    let verdict = comparer(reference, test).compare(&up_case()).await;
    assert_eq!(verdict.outcome, Outcome::Pass);
}

#[tokio::test]
async fn value_beyond_epsilon_mismatches() {
    let reference = CannedClient::new("ref").answer("up", Ok(instant_vector(&[("a", 1.0)])));
    let test = CannedClient::new("sut").answer("up", Ok(instant_vector(&[("a", 1.000_01)])));

    let verdict = comparer(reference, test).compare(&up_case()).await;
    assert_eq!(verdict.outcome, Outcome::Mismatch);
    assert_eq!(verdict.diffs.len(), 1);
    match &verdict.diffs[0] {
        DiffEntry::ValueMismatch {
            labels: l,
            expected,
            actual,
            ..
        } => {
            assert_eq!(l, &labels(&[("job", "a")]));
            assert_eq!(*expected, 1.0);
            assert_eq!(*actual, 1.000_01);
        }
        other => panic!("unexpected diff {other}"),
    }
}

#[tokio::test]
async fn per_case_epsilon_overrides_global() {
    let mut case = up_case();
    case.epsilon = Some(1e-3);
    let reference = CannedClient::new("ref").answer("up", Ok(instant_vector(&[("a", 1.0)])));
    let test = CannedClient::new("sut").answer("up", Ok(instant_vector(&[("a", 1.000_01)])));

    let verdict = comparer(reference, test).compare(&case).await;
    assert_eq!(verdict.outcome, Outcome::Pass);
}

#[tokio::test]
async fn missing_series_is_reported_once() {
    let reference = CannedClient::new("ref")
        .answer("up", Ok(instant_vector(&[("a", 1.0), ("b", 1.0)])));
    let test = CannedClient::new("sut").answer("up", Ok(instant_vector(&[("a", 1.0)])));

    let verdict = comparer(reference, test).compare(&up_case()).await;
    assert_eq!(verdict.outcome, Outcome::Mismatch);
    assert_eq!(
        verdict.diffs,
        vec![DiffEntry::MissingSeries {
            labels: labels(&[("job", "b")])
        }]
    );
}

#[tokio::test]
async fn result_type_mismatch_is_reported() {
    let reference = CannedClient::new("ref").answer("up", Ok(instant_vector(&[("a", 1.0)])));
    let test = CannedClient::new("sut").answer("up", Ok(CanonicalResult::Scalar(Sample::new(T0, 1.0))));

    let verdict = comparer(reference, test).compare(&up_case()).await;
    assert_eq!(verdict.outcome, Outcome::Mismatch);
    assert_eq!(
        verdict.diffs,
        vec![DiffEntry::ResultTypeMismatch {
            expected: ResultType::Vector,
            actual: ResultType::Scalar,
        }]
    );
}

#[tokio::test]
async fn should_fail_inverts_the_verdict() {
    let mut case = up_case();
    case.should_fail = true;

    let agree = comparer(
        CannedClient::new("ref").answer("up", Ok(instant_vector(&[("a", 1.0)]))),
        CannedClient::new("sut").answer("up", Ok(instant_vector(&[("a", 1.0)]))),
    )
    .compare(&case)
    .await;
    assert_eq!(agree.outcome, Outcome::Mismatch);
    assert!(agree.diffs.is_empty());

    let disagree = comparer(
        CannedClient::new("ref").answer("up", Ok(instant_vector(&[("a", 1.0)]))),
        CannedClient::new("sut").answer("up", Ok(instant_vector(&[("a", 2.0)]))),
    )
    .compare(&case)
    .await;
    assert_eq!(disagree.outcome, Outcome::Pass);
    assert_eq!(disagree.diffs.len(), 1);
}

#[tokio::test]
async fn skip_comparison_only_requires_answers() {
    let mut case = up_case();
    case.skip_comparison = true;

    let verdict = comparer(
        CannedClient::new("ref").answer("up", Ok(instant_vector(&[("a", 1.0)]))),
        CannedClient::new("sut").answer("up", Ok(instant_vector(&[("b", 7.0)]))),
    )
    .compare(&case)
    .await;
    assert_eq!(verdict.outcome, Outcome::Pass);
    assert!(verdict.diffs.is_empty());
}

#[tokio::test]
async fn reference_error_wins_over_test_error() {
    let reference = CannedClient::new("ref").answer("up", Err(TransportError::Timeout(60)));
    let test = CannedClient::new("sut").answer(
        "up",
        Err(TransportError::Status {
            status: 500,
            body: "oops".to_string(),
        }),
    );

    let verdict = comparer(reference, test).compare(&up_case()).await;
    assert_eq!(verdict.outcome, Outcome::ReferenceError);
    assert!(verdict.reference_error.is_some());
    assert!(verdict.test_error.is_some());
    assert_eq!(verdict.failed_query(), Some("up"));
}

#[tokio::test]
async fn test_error_carries_tweaked_query() {
    let tweaks = vec![QueryTweak {
        note: "sut lacks the up metric".to_string(),
        match_pattern: "^up$".to_string(),
        replacement: "up_sut".to_string(),
        applies_to: TweakTarget::Test,
        no_bug: false,
    }];
    let case = instant_cases(vec![TestCaseTemplate::new("up", "up")], &tweaks).remove(0);
    assert_eq!(case.query_for(Target::Test), "up_sut");

    let reference = CannedClient::new("ref").answer("up", Ok(instant_vector(&[("a", 1.0)])));
    let test = CannedClient::new("sut");

    let verdict = comparer(reference, test).compare(&case).await;
    assert_eq!(verdict.outcome, Outcome::TestError);
    assert_eq!(verdict.failed_query(), Some("up_sut"));
    assert!(verdict.error().unwrap().contains("no canned answer"));
}

#[tokio::test]
async fn both_targets_are_always_queried() {
    let reference = Arc::new(CannedClient::new("ref").answer("up", Err(TransportError::Timeout(1))));
    let test = Arc::new(CannedClient::new("sut").answer("up", Ok(instant_vector(&[]))));
    let comparer = Comparer::new(reference.clone(), test.clone(), 1e-6);

    let _ = comparer.compare(&up_case()).await;
    assert_eq!(reference.calls.load(Ordering::SeqCst), 1);
    assert_eq!(test.calls.load(Ordering::SeqCst), 1);
}

// =============================================================================
// Whole runs
// =============================================================================

#[tokio::test(start_paused = true)]
async fn concurrent_run_reports_in_case_order() {
    let templates: Vec<TestCaseTemplate> = (0..6)
        .map(|i| TestCaseTemplate::new(format!("case_{i}"), format!("metric_{i}")))
        .collect();
    let cases = instant_cases(templates, &[]);

    let mut reference = CannedClient::new("ref");
    let mut test = CannedClient::new("sut");
    for i in 0..6u64 {
        let query = format!("metric_{i}");
        // Earlier cases finish last.
        let delay = Duration::from_millis((6 - i) * 50);
        reference = reference
            .answer(&query, Ok(instant_vector(&[("a", i as f64)])))
            .delay(&query, delay);
        let value = if i == 3 { 99.0 } else { i as f64 };
        test = match i {
            4 => test,
            _ => test.answer(&query, Ok(instant_vector(&[("a", value)]))),
        };
    }

    let context = RunContext::new(comparer(reference, test), 4);
    let report = context.run(&cases, &[]).await;

    let order: Vec<usize> = report.verdicts.iter().map(|v| v.case.index).collect();
    assert_eq!(order, vec![0, 1, 2, 3, 4, 5]);
    assert_eq!(report.summary.total, 6);
    assert_eq!(report.summary.passed, 4);
    assert_eq!(report.summary.mismatched, 1);
    assert_eq!(report.summary.test_errors, 1);
    assert_eq!(report.verdicts[3].outcome, Outcome::Mismatch);
    assert_eq!(report.verdicts[4].outcome, Outcome::TestError);

    let failed = report.failed_queries();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].case, "case_4");
    assert_eq!(failed[0].query, "metric_4");
}

#[tokio::test]
async fn sequential_and_concurrent_runs_agree() {
    let templates: Vec<TestCaseTemplate> = (0..5)
        .map(|i| TestCaseTemplate::new(format!("case_{i}"), format!("metric_{i}")))
        .collect();
    let cases = instant_cases(templates, &[]);

    let build = || {
        let mut reference = CannedClient::new("ref");
        let mut test = CannedClient::new("sut");
        for i in 0..5 {
            let query = format!("metric_{i}");
            reference = reference.answer(&query, Ok(instant_vector(&[("a", 1.0)])));
            if i % 2 == 0 {
                test = test.answer(&query, Ok(instant_vector(&[("a", 1.0)])));
            } else {
                test = test.answer(&query, Ok(instant_vector(&[("b", 1.0)])));
            }
        }
        comparer(reference, test)
    };

    let sequential = RunContext::new(build(), 1).run(&cases, &[]).await;
    let concurrent = RunContext::new(build(), 8).run(&cases, &[]).await;
    assert_eq!(sequential.summary, concurrent.summary);
    assert_eq!(sequential.summary.passed, 3);
    assert_eq!(sequential.summary.mismatched, 2);
}

#[tokio::test]
async fn empty_run_is_empty() {
    let context = RunContext::new(
        comparer(CannedClient::new("ref"), CannedClient::new("sut")),
        2,
    );
    let report = context.run(&[], &[]).await;
    assert_eq!(report.summary.total, 0);
    assert!(report.verdicts.is_empty());
    assert!(!report.has_execution_errors());
}
