//! Canonical result model.
//!
//! Query responses from either target are normalized into [`CanonicalResult`]
//! before comparison, independent of the wire encoding they arrived in.
//! Timestamps are always fractional epoch seconds.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Label name to label value. `BTreeMap` keeps keys sorted, so equality and
/// fingerprints never depend on insertion order.
pub type LabelSet = BTreeMap<String, String>;

/// The kind of answer a query produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultType {
    Scalar,
    Vector,
    Matrix,
    String,
}

impl ResultType {
    /// Wire name used by the query API envelope.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Scalar => "scalar",
            Self::Vector => "vector",
            Self::Matrix => "matrix",
            Self::String => "string",
        }
    }
}

impl fmt::Display for ResultType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ResultType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scalar" => Ok(Self::Scalar),
            "vector" => Ok(Self::Vector),
            "matrix" => Ok(Self::Matrix),
            "string" => Ok(Self::String),
            other => Err(other.to_string()),
        }
    }
}

/// Which side of the comparison a call or rewrite belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Target {
    /// The engine treated as ground truth.
    Reference,
    /// The system under test.
    Test,
}

impl Target {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Reference => "reference",
            Self::Test => "test",
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One `(timestamp, value)` point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Epoch seconds, fractional.
    pub timestamp: f64,
    #[serde(with = "sample_value")]
    pub value: f64,
}

impl Sample {
    #[must_use]
    pub const fn new(timestamp: f64, value: f64) -> Self {
        Self { timestamp, value }
    }
}

/// A label set plus its samples. Instant vectors carry exactly one sample
/// per series; range matrices carry zero or more.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Series {
    pub labels: LabelSet,
    pub samples: Vec<Sample>,
}

impl Series {
    #[must_use]
    pub fn new(labels: LabelSet, samples: Vec<Sample>) -> Self {
        Self { labels, samples }
    }

    #[must_use]
    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::of(&self.labels)
    }
}

/// Canonical identity of a label set.
///
/// Rendered as `{k1="v1", k2="v2"}` with keys in sorted order and values
/// escaped, so two label sets share a fingerprint iff they are equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    #[must_use]
    pub fn of(labels: &LabelSet) -> Self {
        let mut out = String::from("{");
        for (i, (name, value)) in labels.iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            out.push_str(name);
            out.push_str("=\"");
            for ch in value.chars() {
                match ch {
                    '\\' => out.push_str("\\\\"),
                    '"' => out.push_str("\\\""),
                    '\n' => out.push_str("\\n"),
                    c => out.push(c),
                }
            }
            out.push('"');
        }
        out.push('}');
        Self(out)
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Normalized query response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result_type", content = "data", rename_all = "snake_case")]
pub enum CanonicalResult {
    Scalar(Sample),
    Vector(Vec<Series>),
    Matrix(Vec<Series>),
    String { timestamp: f64, value: String },
}

impl CanonicalResult {
    #[must_use]
    pub const fn result_type(&self) -> ResultType {
        match self {
            Self::Scalar(_) => ResultType::Scalar,
            Self::Vector(_) => ResultType::Vector,
            Self::Matrix(_) => ResultType::Matrix,
            Self::String { .. } => ResultType::String,
        }
    }

    /// Series carried by a vector or matrix; empty for scalar and string.
    #[must_use]
    pub fn series(&self) -> &[Series] {
        match self {
            Self::Vector(series) | Self::Matrix(series) => series,
            Self::Scalar(_) | Self::String { .. } => &[],
        }
    }

    /// Number of samples across the whole result.
    #[must_use]
    pub fn sample_count(&self) -> usize {
        match self {
            Self::Scalar(_) | Self::String { .. } => 1,
            Self::Vector(series) | Self::Matrix(series) => {
                series.iter().map(|s| s.samples.len()).sum()
            }
        }
    }
}

/// Format a sample value the way the query API does on the wire.
#[must_use]
pub fn format_value(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value == f64::INFINITY {
        "+Inf".to_string()
    } else if value == f64::NEG_INFINITY {
        "-Inf".to_string()
    } else {
        value.to_string()
    }
}

/// Parse a sample value in wire form, including `NaN` and signed `Inf`.
#[must_use]
pub fn parse_value(raw: &str) -> Option<f64> {
    match raw {
        "NaN" => Some(f64::NAN),
        "+Inf" | "Inf" => Some(f64::INFINITY),
        "-Inf" => Some(f64::NEG_INFINITY),
        other => other.parse().ok(),
    }
}

// Sample values serialize as strings so NaN and Inf survive JSON.
pub(crate) mod sample_value {
    use serde::{Deserialize, Deserializer, Serializer, de::Error as _};

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::format_value(*value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        let raw = String::deserialize(deserializer)?;
        super::parse_value(&raw).ok_or_else(|| D::Error::custom(format!("invalid value {raw:?}")))
    }
}
