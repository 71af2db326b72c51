//! promql-compliance-tester: run a PromQL compliance suite against two targets
//!
//! Exit codes:
//! - 0: every case executed on both targets (mismatches are reported, not fatal)
//! - 1: at least one case failed to execute against a target
//! - 2: configuration or startup error, before any case ran

use std::io::{self, Write};
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use promql_compliance_core::config::Config;
use promql_compliance_core::error::ConfigError;
use promql_compliance_core::logging::{LogConfig, LogFormat, init_logging};
use promql_compliance_core::report::RunReport;
use promql_compliance_core::runner::{RunContext, plan_cases};

mod output;

use output::OutputFormat;

#[derive(Debug, Parser)]
#[command(
    name = "promql-compliance-tester",
    version,
    about = "Compare PromQL query results between a reference engine and a system under test"
)]
struct Cli {
    /// YAML configuration file
    #[arg(long, default_value = "promql-compliance-tester.yml")]
    config_file: PathBuf,

    /// Report format written to stdout
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    output_format: OutputFormat,

    /// Include passing cases in the report
    #[arg(long)]
    output_passing: bool,

    /// Cases evaluated concurrently (overrides comparison.concurrency)
    #[arg(long)]
    concurrency: Option<NonZeroUsize>,

    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(long, env = "PROMQL_COMPLIANCE_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Log format (pretty, json)
    #[arg(long, env = "PROMQL_COMPLIANCE_LOG_FORMAT", default_value = "pretty")]
    log_format: LogFormat,

    /// Also append logs to this file
    #[arg(long)]
    log_file: Option<PathBuf>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(&cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:#}");
            if let Some(config_err) = err.downcast_ref::<ConfigError>() {
                eprintln!();
                eprint!("{}", config_err.remediation().render_plain());
            }
            ExitCode::from(2)
        }
    }
}

fn run(cli: &Cli) -> anyhow::Result<ExitCode> {
    init_logging(&LogConfig {
        level: cli.log_level.clone(),
        format: cli.log_format,
        file: cli.log_file.clone(),
    })
    .context("failed to initialize logging")?;

    let mut config = Config::load(&cli.config_file)
        .with_context(|| format!("failed to load {}", cli.config_file.display()))?;
    if let Some(concurrency) = cli.concurrency {
        config.comparison.concurrency = concurrency.get();
    }

    let (_window, cases) = plan_cases(&config, chrono::Utc::now())?;
    let context = RunContext::from_config(&config)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;
    let report = runtime.block_on(context.run(&cases, &config.query_tweaks));

    log_summary(&report);

    let mut out = io::stdout().lock();
    output::render(&report, cli.output_format, cli.output_passing, &mut out)
        .context("failed to write report")?;
    out.flush().context("failed to flush report")?;

    if report.has_execution_errors() {
        Ok(ExitCode::FAILURE)
    } else {
        Ok(ExitCode::SUCCESS)
    }
}

fn log_summary(report: &RunReport) {
    let summary = &report.summary;
    tracing::info!(
        total = summary.total,
        passed = summary.passed,
        passed_pct = summary.percent(summary.passed),
        mismatched = summary.mismatched,
        mismatched_pct = summary.percent(summary.mismatched),
        reference_errors = summary.reference_errors,
        test_errors = summary.test_errors,
        "run summary"
    );
    for failed in report.failed_queries() {
        tracing::error!(
            case = %failed.case,
            target_side = %failed.target,
            query = %failed.query,
            error = %failed.error,
            "query failed"
        );
    }
}
