//! Target query clients.
//!
//! [`QueryClient`] is the seam between the comparer and a remote query
//! engine. Each call performs exactly one remote request with no retries and
//! normalizes the response envelope into a [`CanonicalResult`].
//!
//! [`HttpQueryClient`] speaks the Prometheus HTTP API
//! (`/api/v1/query`, `/api/v1/query_range`). Custom headers and basic-auth
//! credentials are attached per request; method, URL and body are never
//! altered by them.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::Deserialize;
use serde_json::Value;

use crate::config::TargetConfig;
use crate::error::{ConfigError, TransportError};
use crate::expand::{EvalTime, epoch_seconds, format_epoch};
use crate::model::{CanonicalResult, LabelSet, ResultType, Sample, Series, Target, parse_value};

/// Remote evaluation of queries against one target.
#[async_trait]
pub trait QueryClient: Send + Sync {
    /// Evaluate `query` at a single instant.
    async fn query(&self, query: &str, time: f64) -> Result<CanonicalResult, TransportError>;

    /// Evaluate `query` over `[start, end]` at resolution `step` (seconds).
    async fn query_range(
        &self,
        query: &str,
        start: f64,
        end: f64,
        step: f64,
    ) -> Result<CanonicalResult, TransportError>;

    /// Human-readable endpoint identity for logs.
    fn endpoint(&self) -> &str;
}

/// Dispatch a case's evaluation parameters to the matching client call.
pub async fn evaluate(
    client: &dyn QueryClient,
    query: &str,
    eval: &EvalTime,
) -> Result<CanonicalResult, TransportError> {
    match *eval {
        EvalTime::Instant { time } => client.query(query, time).await,
        EvalTime::Range { start, end, step } => client.query_range(query, start, end, step).await,
    }
}

/// HTTP client for the Prometheus query API.
#[derive(Debug, Clone)]
pub struct HttpQueryClient {
    base_url: String,
    http: reqwest::Client,
    headers: HeaderMap,
    basic_auth: Option<(String, String)>,
    timeout: Duration,
}

impl HttpQueryClient {
    /// Build a client for one configured target.
    pub fn new(config: &TargetConfig, target: Target) -> Result<Self, ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidTarget {
            target: target.to_string(),
            reason,
        };

        let url = reqwest::Url::parse(&config.query_url)
            .map_err(|err| invalid(format!("query_url {:?}: {err}", config.query_url)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(invalid(format!(
                "query_url {:?} must use http or https",
                config.query_url
            )));
        }

        let headers = header_map(&config.headers).map_err(invalid)?;
        let timeout = Duration::from_secs(config.timeout_seconds);
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| invalid(format!("building HTTP client: {err}")))?;

        let basic_auth = config
            .basic_auth_user
            .as_ref()
            .filter(|user| !user.is_empty())
            .map(|user| {
                (
                    user.clone(),
                    config.basic_auth_pass.clone().unwrap_or_default(),
                )
            });

        Ok(Self {
            base_url: config.query_url.trim_end_matches('/').to_string(),
            http,
            headers,
            basic_auth,
            timeout,
        })
    }

    async fn post(&self, path: &str, form: &[(&str, String)]) -> Result<CanonicalResult, TransportError> {
        let url = format!("{}{path}", self.base_url);
        let mut request = self
            .http
            .post(&url)
            .headers(self.headers.clone())
            .form(form);
        if let Some((user, pass)) = &self.basic_auth {
            request = request.basic_auth(user, Some(pass));
        }

        let response = request.send().await.map_err(|err| self.request_error(&err))?;
        let status = response.status();
        let body = response.text().await.map_err(|err| self.request_error(&err))?;

        if status.is_success() {
            return decode_response(&body);
        }
        // A failed status is never a usable result, even with a success envelope.
        match decode_response(&body) {
            Err(err @ TransportError::QueryFailed { .. }) => Err(err),
            _ => Err(TransportError::Status {
                status: status.as_u16(),
                body: truncate(&body, 512),
            }),
        }
    }

    fn request_error(&self, err: &reqwest::Error) -> TransportError {
        if err.is_timeout() {
            TransportError::Timeout(self.timeout.as_secs())
        } else {
            TransportError::Request(err.to_string())
        }
    }
}

#[async_trait]
impl QueryClient for HttpQueryClient {
    async fn query(&self, query: &str, time: f64) -> Result<CanonicalResult, TransportError> {
        tracing::debug!(endpoint = %self.base_url, query, time, "instant query");
        self.post(
            "/api/v1/query",
            &[("query", query.to_string()), ("time", format_epoch(time))],
        )
        .await
    }

    async fn query_range(
        &self,
        query: &str,
        start: f64,
        end: f64,
        step: f64,
    ) -> Result<CanonicalResult, TransportError> {
        tracing::debug!(endpoint = %self.base_url, query, start, end, step, "range query");
        self.post(
            "/api/v1/query_range",
            &[
                ("query", query.to_string()),
                ("start", format_epoch(start)),
                ("end", format_epoch(end)),
                ("step", format_epoch(step)),
            ],
        )
        .await
    }

    fn endpoint(&self) -> &str {
        &self.base_url
    }
}

fn header_map(headers: &BTreeMap<String, String>) -> Result<HeaderMap, String> {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|err| format!("header name {name:?}: {err}"))?;
        let value =
            HeaderValue::from_str(value).map_err(|err| format!("header {name} value: {err}"))?;
        map.append(name, value);
    }
    Ok(map)
}

fn truncate(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let mut cut = max;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}...", &text[..cut])
}

// ---------------------------------------------------------------------------
// Response envelope decoding
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct Envelope {
    status: String,
    #[serde(default)]
    data: Option<EnvelopeData>,
    #[serde(default, rename = "errorType")]
    error_type: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    warnings: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct EnvelopeData {
    #[serde(rename = "resultType")]
    result_type: String,
    #[serde(default)]
    result: Value,
}

#[derive(Debug, Deserialize)]
struct WireSeries {
    #[serde(default)]
    metric: LabelSet,
    #[serde(default)]
    value: Option<Value>,
    #[serde(default)]
    values: Option<Vec<Value>>,
}

/// Decode a query API response body into a canonical result.
pub fn decode_response(body: &str) -> Result<CanonicalResult, TransportError> {
    let envelope: Envelope = serde_json::from_str(body)
        .map_err(|err| TransportError::MalformedEnvelope(err.to_string()))?;

    if envelope.status != "success" {
        return Err(TransportError::QueryFailed {
            error_type: envelope.error_type.unwrap_or_else(|| "unknown".to_string()),
            message: envelope.error.unwrap_or_else(|| envelope.status.clone()),
        });
    }
    for warning in &envelope.warnings {
        tracing::warn!(warning = %warning, "query returned warning");
    }

    let data = envelope
        .data
        .ok_or_else(|| TransportError::MalformedEnvelope("missing data".to_string()))?;
    let result_type: ResultType = data
        .result_type
        .parse()
        .map_err(TransportError::UnknownResultType)?;

    match result_type {
        ResultType::Scalar => parse_point(&data.result).map(CanonicalResult::Scalar),
        ResultType::String => {
            let (timestamp, value) = parse_pair(&data.result)?;
            Ok(CanonicalResult::String {
                timestamp,
                value: value.to_string(),
            })
        }
        ResultType::Vector => {
            let series = parse_series_list(data.result)?
                .into_iter()
                .map(|wire| {
                    let point = wire.value.ok_or_else(|| {
                        TransportError::MalformedEnvelope(
                            "vector element without a float value".to_string(),
                        )
                    })?;
                    Ok(Series::new(wire.metric, vec![parse_point(&point)?]))
                })
                .collect::<Result<Vec<_>, TransportError>>()?;
            Ok(CanonicalResult::Vector(series))
        }
        ResultType::Matrix => {
            let series = parse_series_list(data.result)?
                .into_iter()
                .map(|wire| {
                    let samples = wire
                        .values
                        .unwrap_or_default()
                        .iter()
                        .map(parse_point)
                        .collect::<Result<Vec<_>, TransportError>>()?;
                    Ok(Series::new(wire.metric, samples))
                })
                .collect::<Result<Vec<_>, TransportError>>()?;
            Ok(CanonicalResult::Matrix(series))
        }
    }
}

fn parse_series_list(result: Value) -> Result<Vec<WireSeries>, TransportError> {
    if result.is_null() {
        return Ok(Vec::new());
    }
    serde_json::from_value(result).map_err(|err| TransportError::MalformedEnvelope(err.to_string()))
}

fn parse_pair(value: &Value) -> Result<(f64, &str), TransportError> {
    let malformed = || TransportError::MalformedEnvelope(format!("expected [timestamp, value], got {value}"));
    let pair = value.as_array().filter(|a| a.len() == 2).ok_or_else(malformed)?;
    let timestamp = parse_timestamp(&pair[0]).ok_or_else(malformed)?;
    let raw = pair[1].as_str().ok_or_else(malformed)?;
    Ok((timestamp, raw))
}

fn parse_point(value: &Value) -> Result<Sample, TransportError> {
    let (timestamp, raw) = parse_pair(value)?;
    let value = parse_value(raw).ok_or_else(|| {
        TransportError::MalformedEnvelope(format!("invalid sample value {raw:?}"))
    })?;
    Ok(Sample::new(timestamp, value))
}

/// Normalize a wire timestamp to fractional epoch seconds. Accepts numbers,
/// numeric strings and RFC 3339 strings.
fn parse_timestamp(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse::<f64>().ok().or_else(|| {
            chrono::DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|dt| epoch_seconds(dt.with_timezone(&chrono::Utc)))
        }),
        _ => None,
    }
}
