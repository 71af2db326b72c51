//! Run-level aggregation of verdicts.
//!
//! The [`Aggregator`] owns the counters for exactly one run. A failed
//! comparison is recorded like any other verdict and never aborts the run.

use serde::{Deserialize, Serialize};

use crate::compare::{Outcome, Verdict};
use crate::model::Target;
use crate::tweak::QueryTweak;

/// Outcome counters for one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub total: usize,
    pub passed: usize,
    pub mismatched: usize,
    pub reference_errors: usize,
    pub test_errors: usize,
}

impl RunSummary {
    pub fn record(&mut self, outcome: Outcome) {
        self.total += 1;
        match outcome {
            Outcome::Pass => self.passed += 1,
            Outcome::Mismatch => self.mismatched += 1,
            Outcome::ReferenceError => self.reference_errors += 1,
            Outcome::TestError => self.test_errors += 1,
        }
    }

    /// Cases whose execution failed against either target.
    #[must_use]
    pub const fn errors(&self) -> usize {
        self.reference_errors + self.test_errors
    }

    /// Cases that executed on both targets, whatever their verdict.
    #[must_use]
    pub const fn executed(&self) -> usize {
        self.passed + self.mismatched
    }

    /// `count` as a percentage of the total; zero for an empty run.
    #[must_use]
    pub fn percent(&self, count: usize) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        count as f64 / self.total as f64 * 100.0
    }
}

/// A case that failed to execute, with the exact query text that failed so
/// it can be replayed by hand.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedQuery {
    pub case: String,
    pub target: Target,
    pub query: String,
    pub error: String,
}

/// Everything handed across the rendering boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub summary: RunSummary,
    /// Ordered by expanded case index.
    pub verdicts: Vec<Verdict>,
    /// Declared tweaks, for annotating known divergences.
    pub tweaks: Vec<QueryTweak>,
}

impl RunReport {
    #[must_use]
    pub fn has_execution_errors(&self) -> bool {
        self.summary.errors() > 0
    }

    /// Verdicts to render; passing ones only when requested.
    pub fn visible_verdicts(&self, include_passing: bool) -> impl Iterator<Item = &Verdict> {
        self.verdicts
            .iter()
            .filter(move |v| include_passing || !v.passed())
    }

    #[must_use]
    pub fn failed_queries(&self) -> Vec<FailedQuery> {
        self.verdicts
            .iter()
            .filter_map(|v| {
                let target = match v.outcome {
                    Outcome::ReferenceError => Target::Reference,
                    Outcome::TestError => Target::Test,
                    Outcome::Pass | Outcome::Mismatch => return None,
                };
                Some(FailedQuery {
                    case: v.case.name.clone(),
                    target,
                    query: v.case.query_for(target).to_string(),
                    error: v.error().unwrap_or_default().to_string(),
                })
            })
            .collect()
    }
}

/// Collects verdicts for one run.
#[derive(Debug, Default)]
pub struct Aggregator {
    summary: RunSummary,
    verdicts: Vec<Verdict>,
}

impl Aggregator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, verdict: Verdict) {
        self.summary.record(verdict.outcome);
        self.verdicts.push(verdict);
    }

    #[must_use]
    pub fn summary(&self) -> RunSummary {
        self.summary
    }

    /// Finalize the run. Verdicts are ordered by case index regardless of the
    /// order in which they completed.
    #[must_use]
    pub fn finish(mut self, tweaks: Vec<QueryTweak>) -> RunReport {
        self.verdicts.sort_by_key(|v| v.case.index);
        RunReport {
            summary: self.summary,
            verdicts: self.verdicts,
            tweaks,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expand::{EvalTime, ExpandedTestCase};

    fn verdict(index: usize, outcome: Outcome) -> Verdict {
        let case = ExpandedTestCase {
            index,
            template_name: format!("t{index}"),
            name: format!("t{index}"),
            query: "up".into(),
            reference_query: "up".into(),
            test_query: "up_sut".into(),
            eval: EvalTime::Instant { time: 1.0 },
            should_fail: false,
            skip_comparison: false,
            epsilon: None,
        };
        Verdict {
            case,
            reference_result: None,
            test_result: None,
            reference_error: (outcome == Outcome::ReferenceError).then(|| "boom".to_string()),
            test_error: (outcome == Outcome::TestError).then(|| "bang".to_string()),
            diffs: Vec::new(),
            outcome,
        }
    }

    #[test]
    fn summary_counts_each_outcome() {
        let mut agg = Aggregator::new();
        for (i, outcome) in [
            Outcome::Pass,
            Outcome::Mismatch,
            Outcome::ReferenceError,
            Outcome::TestError,
            Outcome::Pass,
        ]
        .into_iter()
        .enumerate()
        {
            agg.record(verdict(i, outcome));
        }
        let summary = agg.summary();
        assert_eq!(summary.total, 5);
        assert_eq!(summary.passed, 2);
        assert_eq!(summary.mismatched, 1);
        assert_eq!(summary.errors(), 2);
        assert_eq!(summary.executed(), 3);
        assert!((summary.percent(summary.passed) - 40.0).abs() < 1e-9);
    }

    #[test]
    fn empty_run_percent_is_zero() {
        assert_eq!(RunSummary::default().percent(0), 0.0);
    }

    #[test]
    fn finish_orders_by_case_index() {
        let mut agg = Aggregator::new();
        agg.record(verdict(2, Outcome::Pass));
        agg.record(verdict(0, Outcome::Mismatch));
        agg.record(verdict(1, Outcome::Pass));
        let report = agg.finish(Vec::new());
        let order: Vec<_> = report.verdicts.iter().map(|v| v.case.index).collect();
        assert_eq!(order, vec![0, 1, 2]);
    }

    #[test]
    fn failed_queries_carry_target_query_text() {
        let mut agg = Aggregator::new();
        agg.record(verdict(0, Outcome::Pass));
        agg.record(verdict(1, Outcome::ReferenceError));
        agg.record(verdict(2, Outcome::TestError));
        let report = agg.finish(Vec::new());
        assert!(report.has_execution_errors());
        let failed = report.failed_queries();
        assert_eq!(failed.len(), 2);
        assert_eq!(failed[0].target, Target::Reference);
        assert_eq!(failed[0].query, "up");
        assert_eq!(failed[0].error, "boom");
        assert_eq!(failed[1].target, Target::Test);
        assert_eq!(failed[1].query, "up_sut");
    }

    #[test]
    fn visible_verdicts_hide_passing_by_default() {
        let mut agg = Aggregator::new();
        agg.record(verdict(0, Outcome::Pass));
        agg.record(verdict(1, Outcome::Mismatch));
        let report = agg.finish(Vec::new());
        assert_eq!(report.visible_verdicts(false).count(), 1);
        assert_eq!(report.visible_verdicts(true).count(), 2);
        assert!(!report.has_execution_errors());
    }
}
