//! Error types for promql-compliance-core

use std::fmt::Write;
use thiserror::Error;

/// Remediation command for resolving an error
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct RemediationCommand {
    /// Short label describing the command purpose
    pub label: String,
    /// Command to run
    pub command: String,
}

/// Actionable remediation guidance for an error
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Remediation {
    /// One-line summary of how to fix the issue
    pub summary: String,
    /// Suggested commands to resolve or diagnose the issue
    pub commands: Vec<RemediationCommand>,
    /// Additional alternative guidance
    pub alternatives: Vec<String>,
}

impl Remediation {
    /// Create a new remediation with a summary
    #[must_use]
    pub fn new(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            commands: Vec::new(),
            alternatives: Vec::new(),
        }
    }

    /// Add a diagnostic command
    #[must_use]
    pub fn command(mut self, label: impl Into<String>, command: impl Into<String>) -> Self {
        self.commands.push(RemediationCommand {
            label: label.into(),
            command: command.into(),
        });
        self
    }

    /// Add an alternative suggestion
    #[must_use]
    pub fn alternative(mut self, alternative: impl Into<String>) -> Self {
        self.alternatives.push(alternative.into());
        self
    }

    /// Render remediation text for human-readable output
    #[must_use]
    pub fn render_plain(&self) -> String {
        let mut output = String::new();
        let _ = writeln!(output, "To fix:");
        let _ = writeln!(output, "  {}", self.summary);

        if !self.commands.is_empty() {
            let _ = writeln!(output, "  Commands:");
            for cmd in &self.commands {
                let _ = writeln!(output, "    - {}: {}", cmd.label, cmd.command);
            }
        }

        if !self.alternatives.is_empty() {
            let _ = writeln!(output, "  Alternatives:");
            for alt in &self.alternatives {
                let _ = writeln!(output, "    - {alt}");
            }
        }

        output
    }
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    FileNotFound(String),

    /// Failed to read config file
    #[error("Failed to read config file {0}: {1}")]
    ReadFailed(String, String),

    /// Failed to parse config
    #[error("Failed to parse config: {0}")]
    ParseError(String),

    /// A target has no usable query URL
    #[error("Invalid {target} target: {reason}")]
    InvalidTarget { target: String, reason: String },

    /// A query tweak pattern does not compile
    #[error("Query tweak #{index} has an invalid pattern {pattern:?}: {reason}")]
    InvalidTweakPattern {
        index: usize,
        pattern: String,
        reason: String,
    },

    /// Two test cases share one name
    #[error("Duplicate test case name: {0}")]
    DuplicateTestCase(String),

    /// A test case references a variant axis the config does not declare
    #[error("Test case {test_case:?} references unknown variant axis {axis:?}")]
    UnknownVariantAxis { test_case: String, axis: String },

    /// A variant axis has no values
    #[error("Variant axis {0:?} declares no values")]
    EmptyVariantAxis(String),

    /// Config validation error
    #[error("Invalid config: {0}")]
    ValidationError(String),
}

impl ConfigError {
    #[must_use]
    pub fn remediation(&self) -> Remediation {
        match self {
            Self::FileNotFound(path) => {
                Remediation::new(format!("Create the configuration file at {path}."))
                    .command("Check path", format!("ls -la {path}"))
                    .alternative("Pass --config-file with the correct location.")
            }
            Self::ReadFailed(path, _) => {
                Remediation::new("Check file permissions and retry.")
                    .command("Check permissions", format!("ls -la {path}"))
            }
            Self::ParseError(_) => Remediation::new("Fix the YAML syntax in the config file.")
                .alternative("Validate indentation and quoting of query strings."),
            Self::InvalidTarget { target, .. } => Remediation::new(format!(
                "Fix {target}_target_config: query_url must be an http(s) URL and timeout_seconds at least 1."
            ))
            .command("Check endpoint", "curl -s <query_url>/api/v1/status/buildinfo"),
            Self::InvalidTweakPattern { .. } => Remediation::new(
                "Fix the regular expression in query_tweaks[].match_pattern.",
            )
            .alternative("Escape literal parentheses and brackets with a backslash."),
            Self::DuplicateTestCase(_) => {
                Remediation::new("Give every entry in test_cases a unique name.")
            }
            Self::UnknownVariantAxis { axis, .. } => Remediation::new(format!(
                "Declare variant_args.{axis} or remove it from the test case."
            )),
            Self::EmptyVariantAxis(axis) => {
                Remediation::new(format!("Add at least one value to variant_args.{axis}."))
            }
            Self::ValidationError(_) => Remediation::new("Review the config values and retry."),
        }
    }
}

/// Per-call transport errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The request could not be sent or no response arrived
    #[error("Request failed: {0}")]
    Request(String),

    /// The call exceeded the configured timeout
    #[error("Request timed out after {0} seconds")]
    Timeout(u64),

    /// The endpoint answered with a non-success status and no API envelope
    #[error("HTTP status {status}: {body}")]
    Status { status: u16, body: String },

    /// The response body is not a valid query API envelope
    #[error("Malformed response envelope: {0}")]
    MalformedEnvelope(String),

    /// The endpoint returned an API-level error envelope
    #[error("Query failed ({error_type}): {message}")]
    QueryFailed { error_type: String, message: String },

    /// The envelope declared a result type outside the canonical model
    #[error("Unrecognized result type: {0}")]
    UnknownResultType(String),
}

impl TransportError {
    #[must_use]
    pub fn remediation(&self) -> Remediation {
        match self {
            Self::Request(_) | Self::Timeout(_) => {
                Remediation::new("Check that the target endpoint is reachable, then retry.")
                    .command("Check endpoint", "curl -sv <query_url>/api/v1/query?query=1")
                    .alternative("Raise timeout_seconds in the target config.")
            }
            Self::Status { .. } => Remediation::new(
                "The endpoint rejected the request; verify credentials and headers.",
            )
            .alternative("Check basic_auth_user/basic_auth_pass and headers in the target config."),
            Self::MalformedEnvelope(_) | Self::UnknownResultType(_) => Remediation::new(
                "The endpoint does not speak the Prometheus query API; verify query_url.",
            ),
            Self::QueryFailed { .. } => Remediation::new(
                "The target rejected the query; replay it by hand to inspect the error.",
            )
            .alternative("Add a query tweak if the target needs different syntax."),
        }
    }
}
