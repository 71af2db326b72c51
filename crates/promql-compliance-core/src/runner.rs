//! Run orchestration.
//!
//! A [`RunContext`] carries everything one run needs (the comparer with its
//! shared client handles, and the concurrency limit) so no state lives in
//! process-wide globals. Cases are driven through a bounded buffered stream:
//! up to `concurrency` comparisons are in flight at once, and verdicts come
//! back in case order.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::StreamExt;

use crate::client::{HttpQueryClient, QueryClient};
use crate::compare::{Comparer, Outcome};
use crate::config::Config;
use crate::error::ConfigError;
use crate::expand::{EvalWindow, ExpandedTestCase, expand};
use crate::model::Target;
use crate::report::{Aggregator, RunReport};
use crate::tweak::{QueryTweak, QueryTweaker};

/// Per-run execution context.
#[derive(Debug, Clone)]
pub struct RunContext {
    comparer: Comparer,
    concurrency: usize,
}

impl RunContext {
    #[must_use]
    pub fn new(comparer: Comparer, concurrency: usize) -> Self {
        Self {
            comparer,
            concurrency: concurrency.max(1),
        }
    }

    /// Build HTTP clients for both configured targets.
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let reference: Arc<dyn QueryClient> = Arc::new(HttpQueryClient::new(
            &config.reference_target_config,
            Target::Reference,
        )?);
        let test: Arc<dyn QueryClient> = Arc::new(HttpQueryClient::new(
            &config.test_target_config,
            Target::Test,
        )?);
        let comparer = Comparer::new(reference, test, config.comparison.epsilon);
        Ok(Self::new(comparer, config.comparison.concurrency))
    }

    #[must_use]
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Compare every case and aggregate the verdicts. Returns only after all
    /// cases have been attempted.
    pub async fn run(&self, cases: &[ExpandedTestCase], tweaks: &[QueryTweak]) -> RunReport {
        let total = cases.len();
        tracing::info!(
            cases = total,
            concurrency = self.concurrency(),
            epsilon = self.comparer.epsilon(),
            "starting comparison run"
        );

        let mut aggregator = Aggregator::new();
        let mut verdicts = futures::stream::iter(cases)
            .map(|case| self.comparer.compare(case))
            .buffered(self.concurrency);

        while let Some(verdict) = verdicts.next().await {
            if verdict.outcome != Outcome::Pass {
                tracing::debug!(
                    completed = aggregator.summary().total + 1,
                    total,
                    case = %verdict.case.name,
                    outcome = %verdict.outcome,
                    "case finished"
                );
            }
            aggregator.record(verdict);
        }

        let report = aggregator.finish(tweaks.to_vec());
        tracing::info!(
            total = report.summary.total,
            passed = report.summary.passed,
            mismatched = report.summary.mismatched,
            errors = report.summary.errors(),
            "comparison run finished"
        );
        report
    }
}

/// Resolve the time window and expand every configured test case.
pub fn plan_cases(
    config: &Config,
    now: DateTime<Utc>,
) -> Result<(EvalWindow, Vec<ExpandedTestCase>), ConfigError> {
    let window = config.query_time_parameters.resolve(now)?;
    let tweaker = QueryTweaker::new(&config.query_tweaks)?;
    let cases = expand(&config.test_cases, &config.variant_args, &tweaker, &window)?;
    tracing::info!(
        start = %window.start,
        end = %window.end,
        step_seconds = window.step.as_secs_f64(),
        templates = config.test_cases.len(),
        cases = cases.len(),
        "planned test cases"
    );
    Ok((window, cases))
}
