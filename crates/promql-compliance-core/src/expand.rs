//! Test-case expansion.
//!
//! Turns declarative [`TestCaseTemplate`]s plus a global [`EvalWindow`] into
//! the ordered list of [`ExpandedTestCase`]s the comparer executes.
//!
//! # Placeholders
//!
//! Template queries may embed `{{name}}` placeholders:
//!
//! - `{{start}}`, `{{end}}`: window bounds as epoch seconds
//! - `{{step}}`, `{{window}}`: resolution and window length as durations (`10s`, `10m`)
//! - any variant axis listed in the template's `variant_args`
//!
//! # Ordering
//!
//! Templates keep declaration order. Within a template, variant combinations
//! are enumerated with the first listed axis varying slowest, and each
//! combination yields one case per evaluation mode in declared order. For
//! fixed inputs the output is identical on every call.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::LazyLock;
use std::time::Duration;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::model::Target;
use crate::tweak::QueryTweaker;

/// Named variant axes: axis name to the values it expands to.
pub type VariantArgs = BTreeMap<String, Vec<String>>;

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*\}\}").expect("placeholder regex is valid")
});

const BUILTIN_PLACEHOLDERS: [&str; 4] = ["start", "end", "step", "window"];

/// How a query is evaluated against a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationMode {
    Instant,
    Range,
}

impl EvaluationMode {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Instant => "instant",
            Self::Range => "range",
        }
    }
}

impl fmt::Display for EvaluationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_evaluation_modes() -> Vec<EvaluationMode> {
    vec![EvaluationMode::Range]
}

/// A declarative test case, as loaded from configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCaseTemplate {
    /// Unique within a run.
    pub name: String,
    pub query: String,
    /// Variant axes this template expands over, in enumeration order.
    #[serde(default)]
    pub variant_args: Vec<String>,
    #[serde(default = "default_evaluation_modes")]
    pub evaluation_modes: Vec<EvaluationMode>,
    /// The targets are expected to diverge on this query.
    #[serde(default)]
    pub should_fail: bool,
    /// Only require both targets to answer; ignore result differences.
    #[serde(default)]
    pub skip_comparison: bool,
    /// Relative epsilon override for this template.
    #[serde(default)]
    pub epsilon: Option<f64>,
}

impl TestCaseTemplate {
    /// Template with default flags, evaluated as a range query.
    #[must_use]
    pub fn new(name: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            query: query.into(),
            variant_args: Vec::new(),
            evaluation_modes: default_evaluation_modes(),
            should_fail: false,
            skip_comparison: false,
            epsilon: None,
        }
    }
}

/// The global evaluation time window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvalWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub step: Duration,
}

impl EvalWindow {
    /// Window of length `range` ending at `end`, or `None` when the start
    /// falls outside the representable time range.
    #[must_use]
    pub fn ending_at(end: DateTime<Utc>, range: Duration, step: Duration) -> Option<Self> {
        let range = chrono::Duration::from_std(range).ok()?;
        let start = end.checked_sub_signed(range)?;
        Some(Self { start, end, step })
    }

    #[must_use]
    pub fn range(&self) -> Duration {
        (self.end - self.start).to_std().unwrap_or(Duration::ZERO)
    }
}

/// Concrete evaluation parameters, in fractional epoch seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum EvalTime {
    Instant { time: f64 },
    Range { start: f64, end: f64, step: f64 },
}

impl EvalTime {
    #[must_use]
    pub const fn mode(&self) -> EvaluationMode {
        match self {
            Self::Instant { .. } => EvaluationMode::Instant,
            Self::Range { .. } => EvaluationMode::Range,
        }
    }
}

/// One executable query bound to a concrete time window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpandedTestCase {
    /// Position in the expansion order.
    pub index: usize,
    pub template_name: String,
    /// Template name plus variant descriptor.
    pub name: String,
    /// Query with placeholders substituted, before any tweak.
    pub query: String,
    pub reference_query: String,
    pub test_query: String,
    pub eval: EvalTime,
    pub should_fail: bool,
    pub skip_comparison: bool,
    pub epsilon: Option<f64>,
}

impl ExpandedTestCase {
    #[must_use]
    pub fn query_for(&self, target: Target) -> &str {
        match target {
            Target::Reference => &self.reference_query,
            Target::Test => &self.test_query,
        }
    }

    #[must_use]
    pub const fn mode(&self) -> EvaluationMode {
        self.eval.mode()
    }

    /// True when tweaks rewrote the query differently per target.
    #[must_use]
    pub fn queries_diverge(&self) -> bool {
        self.reference_query != self.test_query
    }
}

/// Expand templates into concrete cases.
///
/// Returns an empty list only when `templates` is empty; a template that
/// cannot be expanded is a configuration error, never silently dropped.
pub fn expand(
    templates: &[TestCaseTemplate],
    variant_args: &VariantArgs,
    tweaker: &QueryTweaker,
    window: &EvalWindow,
) -> Result<Vec<ExpandedTestCase>, ConfigError> {
    let start = epoch_seconds(window.start);
    let end = epoch_seconds(window.end);
    let step = window.step.as_secs_f64();

    let mut builtins = BTreeMap::new();
    builtins.insert("start".to_string(), format_epoch(start));
    builtins.insert("end".to_string(), format_epoch(end));
    builtins.insert("step".to_string(), format_duration(window.step));
    builtins.insert("window".to_string(), format_duration(window.range()));

    let mut cases = Vec::new();
    for template in templates {
        if template.evaluation_modes.is_empty() {
            return Err(ConfigError::ValidationError(format!(
                "test case {:?} declares no evaluation modes",
                template.name
            )));
        }

        for combination in variant_combinations(template, variant_args)? {
            let mut bindings = builtins.clone();
            for (axis, value) in &combination {
                bindings.insert(axis.clone(), value.clone());
            }
            let query = substitute(&template.name, &template.query, &bindings)?;
            let reference_query = tweaker.apply(&query, Target::Reference);
            let test_query = tweaker.apply(&query, Target::Test);
            let name = derived_name(&template.name, &combination);

            for mode in &template.evaluation_modes {
                let eval = match mode {
                    EvaluationMode::Instant => EvalTime::Instant { time: end },
                    EvaluationMode::Range => EvalTime::Range { start, end, step },
                };
                cases.push(ExpandedTestCase {
                    index: cases.len(),
                    template_name: template.name.clone(),
                    name: name.clone(),
                    query: query.clone(),
                    reference_query: reference_query.clone(),
                    test_query: test_query.clone(),
                    eval,
                    should_fail: template.should_fail,
                    skip_comparison: template.skip_comparison,
                    epsilon: template.epsilon,
                });
            }
        }
    }

    tracing::debug!(
        templates = templates.len(),
        cases = cases.len(),
        "expanded test cases"
    );
    Ok(cases)
}

type Combination = Vec<(String, String)>;

fn variant_combinations(
    template: &TestCaseTemplate,
    variant_args: &VariantArgs,
) -> Result<Vec<Combination>, ConfigError> {
    let mut combinations: Vec<Combination> = vec![Vec::new()];
    for axis in &template.variant_args {
        let values = variant_args
            .get(axis)
            .ok_or_else(|| ConfigError::UnknownVariantAxis {
                test_case: template.name.clone(),
                axis: axis.clone(),
            })?;
        if values.is_empty() {
            return Err(ConfigError::EmptyVariantAxis(axis.clone()));
        }
        combinations = combinations
            .into_iter()
            .flat_map(|prefix| {
                values.iter().map(move |value| {
                    let mut next = prefix.clone();
                    next.push((axis.clone(), value.clone()));
                    next
                })
            })
            .collect();
    }
    Ok(combinations)
}

fn substitute(
    template_name: &str,
    query: &str,
    bindings: &BTreeMap<String, String>,
) -> Result<String, ConfigError> {
    if let Some(missing) = PLACEHOLDER
        .captures_iter(query)
        .map(|caps| caps[1].to_string())
        .find(|name| !bindings.contains_key(name))
    {
        return Err(ConfigError::ValidationError(format!(
            "test case {template_name:?} uses undefined placeholder {{{{{missing}}}}}"
        )));
    }
    Ok(PLACEHOLDER
        .replace_all(query, |caps: &regex::Captures<'_>| bindings[&caps[1]].clone())
        .into_owned())
}

fn derived_name(template_name: &str, combination: &Combination) -> String {
    if combination.is_empty() {
        return template_name.to_string();
    }
    let descriptor = combination
        .iter()
        .map(|(axis, value)| format!("{axis}={value}"))
        .collect::<Vec<_>>()
        .join(",");
    format!("{template_name}[{descriptor}]")
}

/// Whether `name` is one of the placeholders bound from the time window.
#[must_use]
pub fn is_builtin_placeholder(name: &str) -> bool {
    BUILTIN_PLACEHOLDERS.contains(&name)
}

/// Fractional epoch seconds for a timestamp.
#[must_use]
pub fn epoch_seconds(time: DateTime<Utc>) -> f64 {
    time.timestamp() as f64 + f64::from(time.timestamp_subsec_nanos()) / 1e9
}

/// Epoch seconds rendered with millisecond precision, trailing zeros trimmed.
#[must_use]
pub fn format_epoch(seconds: f64) -> String {
    let text = format!("{seconds:.3}");
    let trimmed = text.trim_end_matches('0').trim_end_matches('.');
    trimmed.to_string()
}

/// Render a duration in query-language syntax, e.g. `1h30m`, `10s`, `250ms`.
#[must_use]
pub fn format_duration(duration: Duration) -> String {
    let mut ms = duration.as_millis();
    if ms == 0 {
        return "0s".to_string();
    }
    let mut out = String::new();
    for (unit, size) in [("d", 86_400_000), ("h", 3_600_000), ("m", 60_000), ("s", 1_000), ("ms", 1)] {
        if ms >= size {
            out.push_str(&format!("{}{unit}", ms / size));
            ms %= size;
        }
    }
    out
}
