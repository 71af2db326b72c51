//! Configuration management for promql-compliance
//!
//! Handles loading and validation of the YAML configuration document: target
//! endpoints, query tweaks, variant axes, test cases and the global query time
//! window.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::expand::{EvalWindow, TestCaseTemplate, VariantArgs, is_builtin_placeholder};
use crate::tweak::{QueryTweak, QueryTweaker};

/// Safety margin subtracted from "now" when no end time is configured, so
/// queries never touch not-yet-ingested data.
pub const DEFAULT_END_TIME_OFFSET: Duration = Duration::from_secs(2 * 60);
/// Default query window length.
pub const DEFAULT_RANGE: Duration = Duration::from_secs(10 * 60);
/// Default query resolution.
pub const DEFAULT_RESOLUTION: Duration = Duration::from_secs(10);
/// Default relative epsilon for value comparison.
pub const DEFAULT_EPSILON: f64 = 1e-6;
/// Longest accepted query window (100 years).
pub const MAX_RANGE_SECONDS: f64 = 100.0 * 366.0 * 86_400.0;
/// Finest step the wire format can carry; timestamps go out with millisecond precision.
pub const MIN_RESOLUTION_SECONDS: f64 = 0.001;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Engine treated as ground truth
    pub reference_target_config: TargetConfig,

    /// System under test
    pub test_target_config: TargetConfig,

    /// Global time window parameters
    #[serde(default)]
    pub query_time_parameters: QueryTimeParameters,

    /// Comparison settings
    #[serde(default)]
    pub comparison: ComparisonConfig,

    /// Named variant axes referenced by test cases
    #[serde(default)]
    pub variant_args: VariantArgs,

    /// Per-target query rewrites
    #[serde(default)]
    pub query_tweaks: Vec<QueryTweak>,

    /// Declarative test cases
    #[serde(default)]
    pub test_cases: Vec<TestCaseTemplate>,
}

/// One remote query endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    /// Base URL of the query API (without `/api/v1`)
    pub query_url: String,

    /// Extra request headers
    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    #[serde(default)]
    pub basic_auth_user: Option<String>,

    #[serde(default)]
    pub basic_auth_pass: Option<String>,

    /// Per-call timeout
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

impl TargetConfig {
    #[must_use]
    pub fn new(query_url: impl Into<String>) -> Self {
        Self {
            query_url: query_url.into(),
            headers: BTreeMap::new(),
            basic_auth_user: None,
            basic_auth_pass: None,
            timeout_seconds: default_timeout_seconds(),
        }
    }
}

fn default_timeout_seconds() -> u64 {
    60
}

/// Global query time window parameters
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryTimeParameters {
    /// Fractional epoch seconds or RFC 3339 timestamp
    #[serde(default)]
    pub end_time: Option<String>,

    /// Window length; zero means the default
    #[serde(default)]
    pub range_in_seconds: f64,

    /// Query step; zero means the default
    #[serde(default)]
    pub resolution_in_seconds: f64,
}

impl QueryTimeParameters {
    /// Resolve the concrete evaluation window relative to `now`.
    pub fn resolve(&self, now: DateTime<Utc>) -> Result<EvalWindow, ConfigError> {
        let default_end = now
            - chrono::Duration::from_std(DEFAULT_END_TIME_OFFSET).unwrap_or(chrono::Duration::zero());
        let end = match self.end_time.as_deref() {
            Some(text) => parse_time(text).unwrap_or_else(|| {
                tracing::warn!(end_time = text, "unparseable end_time, using default");
                default_end
            }),
            None => default_end,
        };
        let range = non_zero_duration(self.range_in_seconds, DEFAULT_RANGE);
        let step = non_zero_duration(self.resolution_in_seconds, DEFAULT_RESOLUTION);
        EvalWindow::ending_at(end, range, step).ok_or_else(|| {
            ConfigError::ValidationError(format!(
                "query window of {}s ending at {end} starts before the earliest representable time",
                range.as_secs_f64()
            ))
        })
    }
}

/// Comparison settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComparisonConfig {
    /// Relative epsilon for float comparison
    #[serde(default = "default_epsilon")]
    pub epsilon: f64,

    /// Cases evaluated concurrently
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl Default for ComparisonConfig {
    fn default() -> Self {
        Self {
            epsilon: default_epsilon(),
            concurrency: default_concurrency(),
        }
    }
}

fn default_epsilon() -> f64 {
    DEFAULT_EPSILON
}

fn default_concurrency() -> usize {
    1
}

impl Config {
    /// Load configuration from a specific path
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let display = path.display().to_string();
        if !path.exists() {
            return Err(ConfigError::FileNotFound(display));
        }
        let content = std::fs::read_to_string(path)
            .map_err(|err| ConfigError::ReadFailed(display, err.to_string()))?;
        Self::from_yaml(&content)
    }

    /// Parse and validate configuration from a YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_yaml::from_str(yaml).map_err(|err| ConfigError::ParseError(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate cross-field consistency
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, target) in [
            ("reference", &self.reference_target_config),
            ("test", &self.test_target_config),
        ] {
            if target.query_url.trim().is_empty() {
                return Err(ConfigError::InvalidTarget {
                    target: name.to_string(),
                    reason: "query_url is empty".to_string(),
                });
            }
            if target.timeout_seconds == 0 {
                return Err(ConfigError::InvalidTarget {
                    target: name.to_string(),
                    reason: "timeout_seconds must be at least 1".to_string(),
                });
            }
        }

        if !(self.comparison.epsilon.is_finite() && self.comparison.epsilon >= 0.0) {
            return Err(ConfigError::ValidationError(format!(
                "comparison.epsilon must be a non-negative number, got {}",
                self.comparison.epsilon
            )));
        }
        if self.comparison.concurrency == 0 {
            return Err(ConfigError::ValidationError(
                "comparison.concurrency must be at least 1".to_string(),
            ));
        }

        let params = &self.query_time_parameters;
        for (field, value) in [
            ("range_in_seconds", params.range_in_seconds),
            ("resolution_in_seconds", params.resolution_in_seconds),
        ] {
            if !(value.is_finite() && value >= 0.0) {
                return Err(ConfigError::ValidationError(format!(
                    "query_time_parameters.{field} must be a non-negative number, got {value}"
                )));
            }
        }
        if params.range_in_seconds > MAX_RANGE_SECONDS {
            return Err(ConfigError::ValidationError(format!(
                "query_time_parameters.range_in_seconds must be at most {MAX_RANGE_SECONDS}, got {}",
                params.range_in_seconds
            )));
        }
        if params.resolution_in_seconds > 0.0 && params.resolution_in_seconds < MIN_RESOLUTION_SECONDS
        {
            return Err(ConfigError::ValidationError(format!(
                "query_time_parameters.resolution_in_seconds must be 0 (default) or at least {MIN_RESOLUTION_SECONDS}, got {}",
                params.resolution_in_seconds
            )));
        }

        for (axis, values) in &self.variant_args {
            if is_builtin_placeholder(axis) {
                return Err(ConfigError::ValidationError(format!(
                    "variant axis {axis:?} shadows a built-in time placeholder"
                )));
            }
            if values.is_empty() {
                return Err(ConfigError::EmptyVariantAxis(axis.clone()));
            }
        }

        // Compiling the tweaks surfaces bad patterns before any case runs.
        QueryTweaker::new(&self.query_tweaks)?;

        let mut seen = HashSet::new();
        for case in &self.test_cases {
            if !seen.insert(case.name.as_str()) {
                return Err(ConfigError::DuplicateTestCase(case.name.clone()));
            }
            if case.evaluation_modes.is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "test case {:?} declares no evaluation modes",
                    case.name
                )));
            }
            if let Some(epsilon) = case.epsilon {
                if !(epsilon.is_finite() && epsilon >= 0.0) {
                    return Err(ConfigError::ValidationError(format!(
                        "test case {:?} has invalid epsilon {epsilon}",
                        case.name
                    )));
                }
            }
            for axis in &case.variant_args {
                if !self.variant_args.contains_key(axis) {
                    return Err(ConfigError::UnknownVariantAxis {
                        test_case: case.name.clone(),
                        axis: axis.clone(),
                    });
                }
            }
        }

        Ok(())
    }
}

/// Parse fractional Unix epoch seconds or an RFC 3339 timestamp.
#[must_use]
pub fn parse_time(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if let Ok(seconds) = text.parse::<f64>() {
        if !seconds.is_finite() {
            return None;
        }
        let whole = seconds.floor();
        let nanos = ((seconds - whole) * 1e9).round() as u32;
        return DateTime::from_timestamp(whole as i64, nanos.min(999_999_999));
    }
    DateTime::parse_from_rfc3339(text)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn non_zero_duration(seconds: f64, default: Duration) -> Duration {
    if seconds == 0.0 {
        return default;
    }
    Duration::try_from_secs_f64(seconds).unwrap_or(default)
}
