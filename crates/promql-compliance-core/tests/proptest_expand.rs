//! Property-based tests for test case expansion.
//!
//! Covers determinism, fairness without tweaks, expansion cardinality and
//! index assignment, and last-rule-wins tweak ordering.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use proptest::prelude::*;

use promql_compliance_core::expand::{
    EvalWindow, EvaluationMode, TestCaseTemplate, VariantArgs, expand,
};
use promql_compliance_core::model::Target;
use promql_compliance_core::tweak::{QueryTweak, QueryTweaker, TweakTarget};

// =============================================================================
// Strategies
// =============================================================================

fn arb_metric() -> impl Strategy<Value = String> {
    "[a-z][a-z_]{0,12}"
}

fn arb_mode_set() -> impl Strategy<Value = Vec<EvaluationMode>> {
    prop_oneof![
        Just(vec![EvaluationMode::Instant]),
        Just(vec![EvaluationMode::Range]),
        Just(vec![EvaluationMode::Instant, EvaluationMode::Range]),
    ]
}

/// Variant axes `op` and `range` with 1..4 values each.
fn arb_variant_args() -> impl Strategy<Value = VariantArgs> {
    (
        prop::collection::btree_set(prop_oneof![Just("sum"), Just("avg"), Just("max"), Just("min")], 1..4),
        prop::collection::btree_set(prop_oneof![Just("1m"), Just("5m"), Just("1h")], 1..4),
    )
        .prop_map(|(ops, ranges)| {
            BTreeMap::from([
                ("op".to_string(), ops.into_iter().map(str::to_string).collect()),
                ("range".to_string(), ranges.into_iter().map(str::to_string).collect()),
            ])
        })
}

/// Templates with unique names; each uses zero, one or both axes.
fn arb_templates() -> impl Strategy<Value = Vec<TestCaseTemplate>> {
    prop::collection::vec((arb_metric(), 0usize..3, arb_mode_set()), 1..6).prop_map(|specs| {
        specs
            .into_iter()
            .enumerate()
            .map(|(i, (metric, axes, modes))| {
                let (query, variant_args) = match axes {
                    0 => (metric, Vec::new()),
                    1 => (format!("{{{{op}}}}({metric})"), vec!["op".to_string()]),
                    _ => (
                        format!("{{{{op}}}}(rate({metric}[{{{{range}}}}]))"),
                        vec!["op".to_string(), "range".to_string()],
                    ),
                };
                TestCaseTemplate {
                    variant_args,
                    evaluation_modes: modes,
                    ..TestCaseTemplate::new(format!("case_{i}"), query)
                }
            })
            .collect()
    })
}

fn window() -> EvalWindow {
    EvalWindow::ending_at(
        Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
        Duration::from_secs(600),
        Duration::from_secs(10),
    )
    .unwrap()
}

// =============================================================================
// Expansion
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn expansion_is_deterministic(templates in arb_templates(), args in arb_variant_args()) {
        let tweaker = QueryTweaker::default();
        let first = expand(&templates, &args, &tweaker, &window()).unwrap();
        let second = expand(&templates, &args, &tweaker, &window()).unwrap();
        prop_assert_eq!(first, second);
    }

    #[test]
    fn untweaked_queries_are_identical_for_both_targets(
        templates in arb_templates(),
        args in arb_variant_args(),
    ) {
        let cases = expand(&templates, &args, &QueryTweaker::default(), &window()).unwrap();
        for case in &cases {
            prop_assert_eq!(&case.reference_query, &case.test_query);
            prop_assert_eq!(&case.reference_query, &case.query);
            prop_assert!(!case.query.contains("{{"));
        }
    }

    #[test]
    fn case_count_is_product_of_axes_and_modes(
        templates in arb_templates(),
        args in arb_variant_args(),
    ) {
        let expected: usize = templates
            .iter()
            .map(|t| {
                let combos: usize = t.variant_args.iter().map(|axis| args[axis].len()).product();
                combos * t.evaluation_modes.len()
            })
            .sum();
        let cases = expand(&templates, &args, &QueryTweaker::default(), &window()).unwrap();
        prop_assert_eq!(cases.len(), expected);
        for (i, case) in cases.iter().enumerate() {
            prop_assert_eq!(case.index, i);
        }
    }

    #[test]
    fn templates_keep_declaration_order(
        templates in arb_templates(),
        args in arb_variant_args(),
    ) {
        let cases = expand(&templates, &args, &QueryTweaker::default(), &window()).unwrap();
        let mut seen: Vec<&str> = cases.iter().map(|c| c.template_name.as_str()).collect();
        seen.dedup();
        let declared: Vec<&str> = templates.iter().map(|t| t.name.as_str()).collect();
        prop_assert_eq!(seen, declared);
    }
}

// =============================================================================
// Tweaks
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn later_tweak_sees_earlier_output(metric in arb_metric()) {
        let tweaks = vec![
            QueryTweak {
                note: String::new(),
                match_pattern: regex::escape(&metric),
                replacement: "first".to_string(),
                applies_to: TweakTarget::Test,
                no_bug: false,
            },
            QueryTweak {
                note: String::new(),
                match_pattern: "first".to_string(),
                replacement: "second".to_string(),
                applies_to: TweakTarget::Test,
                no_bug: false,
            },
        ];
        let tweaker = QueryTweaker::new(&tweaks).unwrap();
        prop_assert_eq!(tweaker.apply(&metric, Target::Test), "second");
        prop_assert_eq!(tweaker.apply(&metric, Target::Reference), metric);
    }
}
