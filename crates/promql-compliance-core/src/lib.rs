//! promql-compliance-core: differential PromQL compliance testing
//!
//! Evaluates a catalog of PromQL queries against a trusted reference engine
//! and a system under test, then reports where their answers diverge.
//!
//! # Architecture
//!
//! ```text
//! Config (YAML) → Expander ──(QueryTweaker)──→ ExpandedTestCase*
//!                                   ↓
//!                    RunContext (bounded, ordered)
//!                                   ↓
//!            Comparer ── QueryClient(reference) / QueryClient(test)
//!                                   ↓
//!                      Aggregator → RunReport → renderers
//! ```
//!
//! # Modules
//!
//! - `model`: Canonical result values, labels and fingerprints
//! - `tweak`: Ordered regex rewrites for known divergences
//! - `expand`: Template expansion into concrete test cases
//! - `client`: Prometheus HTTP API client and envelope decoding
//! - `compare`: Tolerance-aware result diffing and verdicts
//! - `report`: Run summary aggregation
//! - `runner`: Per-run context and bounded concurrent execution
//! - `config`: YAML configuration loading and validation
//! - `logging`: Structured logging setup
//! - `error`: Error types with remediation hints
//!
//! # Safety
//!
//! This crate forbids unsafe code.

#![forbid(unsafe_code)]

pub mod client;
pub mod compare;
pub mod config;
pub mod error;
pub mod expand;
pub mod logging;
pub mod model;
pub mod report;
pub mod runner;
pub mod tweak;

/// Version of the promql-compliance-core crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
